//! Per-user traffic accounting read from the proxy core.
//!
//! The core keeps one counter per user and direction, named
//! `user>>>{email}>>>traffic>>>{uplink|downlink}`. Reading with reset
//! zeroes the counter in the same call, so each byte is reported at
//! most once and a lost push drops only that window.

use std::sync::Arc;

use relay_core::UserUsage;
use relaygrid_proxy::{ProxyError, StatsApi};

/// Reads traffic counters for the identities the control plane
/// currently provisions on this node.
pub struct StatsCollector {
    api: Arc<dyn StatsApi>,
    reset: bool,
}

impl StatsCollector {
    pub fn new(api: Arc<dyn StatsApi>, reset: bool) -> Self {
        Self { api, reset }
    }

    /// Query both directions for every identity. A counter the core has
    /// not created yet reads as zero, and every identity appears in the
    /// result so the control plane sees idle users too. The first
    /// failed read aborts the whole query.
    pub async fn query_user_bytes(&self, emails: &[String]) -> Result<Vec<UserUsage>, ProxyError> {
        let mut users = Vec::with_capacity(emails.len());
        for email in emails {
            let uplink = self.read_counter(email, "uplink").await?;
            let downlink = self.read_counter(email, "downlink").await?;
            users.push(UserUsage {
                email: email.clone(),
                uplink,
                downlink,
            });
        }
        Ok(users)
    }

    async fn read_counter(&self, email: &str, direction: &str) -> Result<i64, ProxyError> {
        let name = format!("user>>>{email}>>>traffic>>>{direction}");
        Ok(self.api.query_counter(&name, self.reset).await?.unwrap_or(0))
    }
}
