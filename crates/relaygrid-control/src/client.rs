//! The agent side of the control-plane API.
//!
//! Four endpoints under `/api/agents/{node}/`, all bearer-authenticated:
//! `state` is fetched, `stats`, `metrics`, and `heartbeat` are pushed.
//! Every request is bounded by the configured client timeout.

use std::time::Duration;

use async_trait::async_trait;

use relay_core::{ControlConfig, DesiredState, HeartbeatPush, MetricPush, StatsPush};

use crate::error::ControlError;

/// What the reconciliation and reporting loops need from the control
/// plane. The production implementation is [`ControlClient`]; tests
/// stand in with scripted fakes.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Fetch the desired snapshot for this node, with client emails
    /// already normalized for identity keying.
    async fn fetch_state(&self) -> Result<DesiredState, ControlError>;

    async fn push_stats(&self, push: &StatsPush) -> Result<(), ControlError>;

    async fn push_metrics(&self, push: &MetricPush) -> Result<(), ControlError>;

    async fn heartbeat(&self) -> Result<(), ControlError>;
}

pub struct ControlClient {
    http: reqwest::Client,
    base: String,
    token: String,
    node: String,
    version: String,
}

impl ControlClient {
    pub fn new(cfg: &ControlConfig) -> Result<Self, ControlError> {
        let mut builder = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .connect_timeout(Duration::from_secs(5));
        if cfg.tls_insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self {
            http: builder.build()?,
            base: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            node: cfg.node.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    fn url(&self, leaf: &str) -> String {
        format!("{}/api/agents/{}/{leaf}", self.base, self.node)
    }

    async fn check(
        endpoint: &'static str,
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, ControlError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ControlError::Http {
            endpoint,
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ControlApi for ControlClient {
    async fn fetch_state(&self) -> Result<DesiredState, ControlError> {
        let resp = self
            .http
            .get(self.url("state"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let resp = Self::check("state", resp).await?;
        let state: DesiredState = resp.json().await?;
        Ok(state.normalized())
    }

    async fn push_stats(&self, push: &StatsPush) -> Result<(), ControlError> {
        let resp = self
            .http
            .post(self.url("stats"))
            .bearer_auth(&self.token)
            .json(push)
            .send()
            .await?;
        Self::check("stats", resp).await?;
        Ok(())
    }

    async fn push_metrics(&self, push: &MetricPush) -> Result<(), ControlError> {
        let resp = self
            .http
            .post(self.url("metrics"))
            .bearer_auth(&self.token)
            .json(push)
            .send()
            .await?;
        Self::check("metrics", resp).await?;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), ControlError> {
        let push = HeartbeatPush {
            version: self.version.clone(),
        };
        let resp = self
            .http
            .post(self.url("heartbeat"))
            .bearer_auth(&self.token)
            .json(&push)
            .send()
            .await?;
        Self::check("heartbeat", resp).await?;
        Ok(())
    }
}
