use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    /// The control plane answered with a non-success status.
    #[error("control plane returned {status} for {endpoint}: {body}")]
    Http {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    /// The request never got a usable answer (connect, TLS, timeout,
    /// or a body that does not parse).
    #[error("control plane request failed: {0}")]
    Transport(#[from] reqwest::Error),
}
