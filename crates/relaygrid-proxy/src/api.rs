//! Typed client for the proxy's loopback admin API.
//!
//! The admin API mutates the running core in place: inbound client
//! lists, routing rules, and traffic counters. Everything the rest of
//! the agent needs from it sits behind the [`AdminApi`] and
//! [`StatsApi`] traits so appliers and collectors can be exercised
//! against in-memory fakes.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use relay_core::{ClientSpec, Proto, ProxyConfig, RouteRule};

use crate::error::ProxyError;

/// Mutating operations on a running proxy core.
#[async_trait]
pub trait AdminApi: Send + Sync {
    /// Add a credential to the named inbound.
    async fn add_client(&self, inbound: &str, client: &ClientSpec) -> Result<(), ProxyError>;

    /// Remove the credential keyed by `email` from the named inbound.
    async fn remove_client(&self, inbound: &str, email: &str) -> Result<(), ProxyError>;

    /// Append a routing rule to the live routing table.
    async fn add_rule(&self, rule: &RouteRule) -> Result<(), ProxyError>;

    /// Remove the routing rule keyed by `tag`.
    async fn remove_rule(&self, tag: &str) -> Result<(), ProxyError>;
}

/// Read access to the proxy's traffic counters.
#[async_trait]
pub trait StatsApi: Send + Sync {
    /// Fetch one counter by name, optionally zeroing it in the same
    /// call. `None` means the counter does not exist yet, which the
    /// core reports for users who have moved no traffic.
    async fn query_counter(&self, name: &str, reset: bool) -> Result<Option<i64>, ProxyError>;
}

/// Account entry in the shape the proxy core keeps under an inbound's
/// `settings.clients` array. The field set differs per protocol.
pub fn client_entry(client: &ClientSpec) -> Value {
    match client.proto {
        Proto::Vless => json!({ "id": client.id, "email": client.email }),
        Proto::Vmess => json!({ "id": client.id, "email": client.email, "alterId": 0 }),
        Proto::Trojan => json!({ "password": client.password, "email": client.email }),
    }
}

/// Production client speaking HTTP to the core's admin listener.
pub struct HttpAdmin {
    http: reqwest::Client,
    base: String,
}

impl HttpAdmin {
    /// Build a client for the configured admin endpoint. The configured
    /// per-call timeout applies to every request as a whole.
    pub fn new(cfg: &ProxyConfig) -> Result<Self, ProxyError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.api_timeout())
            .build()?;
        Ok(Self {
            http,
            base: cfg.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ProxyError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ProxyError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl AdminApi for HttpAdmin {
    async fn add_client(&self, inbound: &str, client: &ClientSpec) -> Result<(), ProxyError> {
        let url = format!("{}/inbounds/{inbound}/clients", self.base);
        let resp = self
            .http
            .post(&url)
            .json(&client_entry(client))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn remove_client(&self, inbound: &str, email: &str) -> Result<(), ProxyError> {
        let url = format!("{}/inbounds/{inbound}/clients/{email}", self.base);
        let resp = self.http.delete(&url).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn add_rule(&self, rule: &RouteRule) -> Result<(), ProxyError> {
        let url = format!("{}/routing/rules", self.base);
        let resp = self.http.post(&url).json(rule).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn remove_rule(&self, tag: &str) -> Result<(), ProxyError> {
        let url = format!("{}/routing/rules/{tag}", self.base);
        let resp = self.http.delete(&url).send().await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct CounterEnvelope {
    stat: Counter,
}

#[derive(Deserialize)]
struct Counter {
    value: i64,
}

#[async_trait]
impl StatsApi for HttpAdmin {
    async fn query_counter(&self, name: &str, reset: bool) -> Result<Option<i64>, ProxyError> {
        let url = format!("{}/stats/counter", self.base);
        let resp = self
            .http
            .get(&url)
            .query(&[("name", name), ("reset", if reset { "true" } else { "false" })])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp).await?;
        let envelope: CounterEnvelope = resp.json().await?;
        Ok(Some(envelope.stat.value))
    }
}
