//! HTTP client for the control plane the agent reports to.

pub mod client;
pub mod error;

pub use client::{ControlApi, ControlClient};
pub use error::ControlError;
