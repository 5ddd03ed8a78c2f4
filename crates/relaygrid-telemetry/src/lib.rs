//! relaygrid-telemetry: what the agent reports back to the control plane.
//!
//! Two independent sources: per-user traffic counters read from the
//! proxy core's stats service, and host-level cpu/memory/bandwidth
//! samples taken from the operating system.

pub mod host;
pub mod stats;

pub use host::HostSampler;
pub use stats::StatsCollector;
