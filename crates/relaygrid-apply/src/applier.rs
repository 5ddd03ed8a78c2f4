//! Strategy seam between the reconciliation loop and the proxy.

use std::collections::HashMap;

use async_trait::async_trait;

use relay_core::{ClientSpec, RouteRule};

use crate::error::ApplyError;

/// Commits the difference between what is running and what the control
/// plane wants.
///
/// `current_*` is the last snapshot the agent successfully applied,
/// keyed by identity; `desired_*` is the fresh snapshot. Returns
/// whether anything was mutated. When nothing differs, implementations
/// touch neither the proxy nor the filesystem.
#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(
        &self,
        current_clients: &HashMap<String, ClientSpec>,
        desired_clients: &[ClientSpec],
        current_routes: &HashMap<String, RouteRule>,
        desired_routes: &[RouteRule],
    ) -> Result<bool, ApplyError>;
}
