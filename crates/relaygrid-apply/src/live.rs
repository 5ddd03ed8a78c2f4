//! Live strategy: converge the running core through its admin API,
//! one identity at a time, without touching the config file.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use relay_core::{diff, ClientSpec, InboundTags, RouteRule};
use relaygrid_proxy::AdminApi;

use crate::applier::Applier;
use crate::error::ApplyError;

pub struct LiveApplier {
    admin: Arc<dyn AdminApi>,
    inbounds: InboundTags,
}

impl LiveApplier {
    pub fn new(admin: Arc<dyn AdminApi>, inbounds: InboundTags) -> Self {
        Self { admin, inbounds }
    }
}

#[async_trait]
impl Applier for LiveApplier {
    /// Clients first, then routes; within each, removals strictly
    /// before additions so a changed identity never exists twice on
    /// the remote side. The first failed call aborts the rest.
    async fn apply(
        &self,
        current_clients: &HashMap<String, ClientSpec>,
        desired_clients: &[ClientSpec],
        current_routes: &HashMap<String, RouteRule>,
        desired_routes: &[RouteRule],
    ) -> Result<bool, ApplyError> {
        let clients = diff(current_clients, desired_clients);
        let routes = diff(current_routes, desired_routes);
        if clients.is_empty() && routes.is_empty() {
            return Ok(false);
        }

        for client in &clients.removes {
            let inbound = self.inbounds.for_proto(client.proto);
            self.admin.remove_client(inbound, &client.email).await?;
            debug!(email = %client.email, %inbound, "client removed");
        }
        for client in &clients.adds {
            let inbound = self.inbounds.for_proto(client.proto);
            // A registration can survive an agent restart that wiped
            // the in-memory store; clear the identity first and ignore
            // the result so the add cannot collide.
            if let Err(err) = self.admin.remove_client(inbound, &client.email).await {
                debug!(email = %client.email, %err, "pre-add removal skipped");
            }
            self.admin.add_client(inbound, client).await?;
            debug!(email = %client.email, %inbound, "client added");
        }

        for rule in &routes.removes {
            self.admin.remove_rule(&rule.tag).await?;
            debug!(tag = %rule.tag, "route removed");
        }
        for rule in &routes.adds {
            self.admin.add_rule(rule).await?;
            debug!(tag = %rule.tag, "route added");
        }

        Ok(true)
    }
}
