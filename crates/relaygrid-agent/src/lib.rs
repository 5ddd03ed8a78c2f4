//! relaygrid-agent: the periodic loops that drive a node.
//!
//! Reconciliation (state), usage reporting (stats), host telemetry
//! (metrics), and liveness (heartbeat) run as independent tasks on
//! their own cadences, sharing the last-applied snapshot. A failed
//! cycle is logged and retried at the next tick; only shutdown stops
//! a loop.

pub mod agent;
pub mod error;

pub use agent::Agent;
pub use error::CycleError;
