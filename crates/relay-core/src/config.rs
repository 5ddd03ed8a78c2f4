//! Agent configuration: a TOML file with named defaults.
//!
//! Every interval and timeout the agent uses is declared here rather
//! than as scattered literals, so deployments can tune them and tests
//! can shrink them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Proto;

/// Where `relayd` looks for its config when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/relaygrid/agent.toml";

const DEFAULT_CONTROL_TIMEOUT_SECS: u64 = 12;
const DEFAULT_API_BASE: &str = "http://127.0.0.1:10085";
const DEFAULT_API_TIMEOUT_SECS: u64 = 5;
const DEFAULT_STATE_INTERVAL_SECS: u64 = 15;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;
const DEFAULT_METRICS_INTERVAL_SECS: u64 = 30;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub control: ControlConfig,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub intervals: Intervals,
    #[serde(default)]
    pub log: LogConfig,
}

/// Control-plane endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub base_url: String,
    pub token: String,
    /// Slug under which this node is registered on the control plane.
    pub node: String,
    #[serde(default = "default_control_timeout_secs")]
    pub timeout_secs: u64,
    /// Accept self-signed control-plane certificates.
    #[serde(default)]
    pub tls_insecure: bool,
}

impl ControlConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How diffs are committed to the running proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    /// Live mutation through the proxy's admin API.
    Api,
    /// Patch the proxy's configuration file and reload the service.
    File,
}

impl ApplyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyMode::Api => "api",
            ApplyMode::File => "file",
        }
    }
}

/// The local proxy service being converged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub mode: ApplyMode,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,
    /// Live configuration file (file mode only).
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Advisory lock file; defaults to `{config_path}.lock`.
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
    #[serde(default = "default_proxy_binary")]
    pub binary: PathBuf,
    /// Service-manager unit name used for reload/restart.
    #[serde(default = "default_proxy_service")]
    pub service: String,
    /// Explicit reload command; takes precedence over the service
    /// manager when set.
    #[serde(default)]
    pub reload_cmd: Option<String>,
    /// Zero traffic counters as they are read (destructive read).
    #[serde(default = "default_true")]
    pub stats_reset: bool,
    #[serde(default)]
    pub inbounds: InboundTags,
}

impl ProxyConfig {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    /// Lock file guarding the config file: the configured path, or the
    /// config path with a `.lock` suffix appended.
    pub fn lock_path(&self) -> Option<PathBuf> {
        if let Some(lock) = &self.lock_path {
            return Some(lock.clone());
        }
        self.config_path.as_ref().map(|config| {
            let mut path = config.as_os_str().to_os_string();
            path.push(".lock");
            PathBuf::from(path)
        })
    }
}

/// Inbound tags the proxy config uses for each protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundTags {
    #[serde(default = "default_vless_tag")]
    pub vless: String,
    #[serde(default = "default_vmess_tag")]
    pub vmess: String,
    #[serde(default = "default_trojan_tag")]
    pub trojan: String,
}

impl InboundTags {
    pub fn for_proto(&self, proto: Proto) -> &str {
        match proto {
            Proto::Vless => &self.vless,
            Proto::Vmess => &self.vmess,
            Proto::Trojan => &self.trojan,
        }
    }
}

impl Default for InboundTags {
    fn default() -> Self {
        Self {
            vless: default_vless_tag(),
            vmess: default_vmess_tag(),
            trojan: default_trojan_tag(),
        }
    }
}

/// Loop tick intervals, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervals {
    #[serde(default = "default_state_interval_secs")]
    pub state_secs: u64,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_secs: u64,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_secs: u64,
}

impl Intervals {
    pub fn state(&self) -> Duration {
        Duration::from_secs(self.state_secs)
    }

    pub fn stats(&self) -> Duration {
        Duration::from_secs(self.stats_secs)
    }

    pub fn metrics(&self) -> Duration {
        Duration::from_secs(self.metrics_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            state_secs: default_state_interval_secs(),
            stats_secs: default_stats_interval_secs(),
            metrics_secs: default_metrics_interval_secs(),
            heartbeat_secs: default_heartbeat_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AgentConfig {
    /// Read, parse, and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AgentConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Enforce required fields and mode-specific requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control.base_url.is_empty() {
            return Err(invalid("control.base_url is required"));
        }
        if self.control.token.is_empty() {
            return Err(invalid("control.token is required"));
        }
        if self.control.node.is_empty() {
            return Err(invalid("control.node is required"));
        }

        match self.proxy.mode {
            ApplyMode::Api => {
                if self.proxy.api_base.is_empty() {
                    return Err(invalid("proxy.api_base is required in api mode"));
                }
            }
            ApplyMode::File => {
                if self.proxy.config_path.is_none() {
                    return Err(invalid("proxy.config_path is required in file mode"));
                }
            }
        }

        for proto in Proto::ALL {
            if self.proxy.inbounds.for_proto(proto).is_empty() {
                return Err(invalid(&format!(
                    "proxy.inbounds.{proto} must not be empty"
                )));
            }
        }

        for (name, secs) in [
            ("intervals.state_secs", self.intervals.state_secs),
            ("intervals.stats_secs", self.intervals.stats_secs),
            ("intervals.metrics_secs", self.intervals.metrics_secs),
            ("intervals.heartbeat_secs", self.intervals.heartbeat_secs),
        ] {
            if secs == 0 {
                return Err(invalid(&format!("{name} must be non-zero")));
            }
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

fn default_control_timeout_secs() -> u64 {
    DEFAULT_CONTROL_TIMEOUT_SECS
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_api_timeout_secs() -> u64 {
    DEFAULT_API_TIMEOUT_SECS
}

fn default_proxy_binary() -> PathBuf {
    PathBuf::from("xray")
}

fn default_proxy_service() -> String {
    "xray".to_string()
}

fn default_true() -> bool {
    true
}

fn default_vless_tag() -> String {
    "vless-in".to_string()
}

fn default_vmess_tag() -> String {
    "vmess-in".to_string()
}

fn default_trojan_tag() -> String {
    "trojan-in".to_string()
}

fn default_state_interval_secs() -> u64 {
    DEFAULT_STATE_INTERVAL_SECS
}

fn default_stats_interval_secs() -> u64 {
    DEFAULT_STATS_INTERVAL_SECS
}

fn default_metrics_interval_secs() -> u64 {
    DEFAULT_METRICS_INTERVAL_SECS
}

fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}
