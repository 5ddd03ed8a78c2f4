//! relay-core: shared foundation for the relaygrid agent crates.
//!
//! Holds the desired-state domain model published by the control plane,
//! the keyed diff engine that turns two snapshots into add/remove sets,
//! and the TOML agent configuration with named defaults.

pub mod config;
pub mod diff;
pub mod error;
pub mod types;

pub use config::{
    AgentConfig, ApplyMode, ControlConfig, DEFAULT_CONFIG_PATH, InboundTags, Intervals,
    LogConfig, ProxyConfig,
};
pub use diff::{Changes, Keyed, diff};
pub use error::ConfigError;
pub use types::*;
