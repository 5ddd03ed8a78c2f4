//! Client surfaces for the local proxy core: the loopback admin API,
//! its traffic counters, and process-level service control.

pub mod api;
pub mod error;
pub mod service;

pub use api::{client_entry, AdminApi, HttpAdmin, StatsApi};
pub use error::ProxyError;
pub use service::{ProcessControl, ServiceControl};
