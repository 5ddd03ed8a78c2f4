//! Cycle-level errors for the agent loops.

use thiserror::Error;

use relaygrid_apply::ApplyError;
use relaygrid_control::ControlError;
use relaygrid_proxy::ProxyError;

/// Why one cycle failed. Loops log these and retry on their own
/// cadence; nothing here is fatal to the agent.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Stats(#[from] ProxyError),
}
