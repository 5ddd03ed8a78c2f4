//! Errors surfaced by the admin client and service control.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Transport-level failure talking to the admin API.
    #[error("admin api request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The admin API answered with a non-success status.
    #[error("admin api returned {status}: {body}")]
    Api { status: u16, body: String },

    /// A control command could not be started at all.
    #[error("failed to run `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    /// A control command ran and exited non-zero.
    #[error("`{cmd}` failed ({status}): {detail}")]
    CommandFailed {
        cmd: String,
        status: std::process::ExitStatus,
        detail: String,
    },

    /// A control command ran but never finished.
    #[error("`{cmd}` timed out")]
    CommandTimeout { cmd: String },
}
