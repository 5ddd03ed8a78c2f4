//! Domain types shared across the relaygrid crates.
//!
//! Everything the control plane publishes (desired state) and everything
//! the agent reports back (stats, metrics, heartbeat) lives here, with
//! the JSON field names the control-plane API uses on the wire.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ── Desired state ──────────────────────────────────────────────────

/// Inbound protocol a client credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    Vless,
    Vmess,
    Trojan,
}

impl Proto {
    /// All protocols, in the order inbound patches are applied.
    pub const ALL: [Proto; 3] = [Proto::Vless, Proto::Vmess, Proto::Trojan];

    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::Vless => "vless",
            Proto::Vmess => "vmess",
            Proto::Trojan => "trojan",
        }
    }
}

impl std::fmt::Display for Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proxy user credential as published by the control plane.
///
/// `id` carries the UUID for vless/vmess; `password` carries the trojan
/// secret; the field the protocol does not use stays empty. Identity key
/// is `email`, unique within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSpec {
    pub proto: Proto,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    pub email: String,
}

/// A routing rule as published by the control plane.
///
/// Field names mirror the proxy's own routing configuration. Identity
/// key is `tag`, unique within a snapshot; at least one of
/// `outbound_tag`/`balancer_tag` is non-empty. List-valued fields are
/// order-sensitive for equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteRule {
    pub tag: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub outbound_tag: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub balancer_tag: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domain: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source_port: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inbound_tag: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub protocol: Vec<String>,
}

/// One desired-state snapshot from the control plane. Immutable once
/// received; a fresh one is fetched on every state-loop tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub config_version: i64,
    #[serde(default)]
    pub clients: Vec<ClientSpec>,
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl DesiredState {
    /// Canonicalize client identities. Emails are keyed lower-case
    /// everywhere (store, diff, apply, stats), so the normalization
    /// happens exactly once, at the ingestion edge.
    pub fn normalized(mut self) -> Self {
        for client in &mut self.clients {
            client.email = client.email.trim().to_lowercase();
        }
        self
    }
}

// ── Agent reports ──────────────────────────────────────────────────

/// Per-user traffic totals for one stats window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUsage {
    pub email: String,
    pub uplink: i64,
    pub downlink: i64,
}

/// Usage report posted by the stats loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsPush {
    /// Unix seconds at query time.
    pub server_time: i64,
    pub users: Vec<UserUsage>,
}

/// Host telemetry posted by the metrics loop. Fields the sampler could
/// not obtain are omitted rather than sent as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPush {
    pub server_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth_up_mbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth_down_mbps: Option<f64>,
}

impl MetricPush {
    /// True when no sampler field was obtainable; such a sample is not
    /// worth pushing.
    pub fn is_empty(&self) -> bool {
        self.cpu_percent.is_none()
            && self.memory_percent.is_none()
            && self.bandwidth_up_mbps.is_none()
            && self.bandwidth_down_mbps.is_none()
    }
}

/// Liveness signal body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPush {
    pub version: String,
}

/// Wall clock in unix seconds, the timestamp every push report carries.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
