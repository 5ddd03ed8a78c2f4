//! Apply failures, split so the caller can tell retry-next-tick cases
//! apart from config problems that need an operator.

use std::path::PathBuf;

use thiserror::Error;

use relaygrid_proxy::ProxyError;

#[derive(Debug, Error)]
pub enum ApplyError {
    /// The config lock stayed contended through every retry.
    #[error("config lock still contended after {attempts} attempts")]
    LockContended { attempts: u32 },

    /// The lock file could not be opened or locked at all.
    #[error("config lock at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The live config file could not be read.
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The live config file is not valid JSON.
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The config has no `inbounds` list.
    #[error("config has no inbounds list")]
    MissingInbounds,

    /// No inbound carries the configured tag.
    #[error("inbound tag {tag} not found in config")]
    MissingInbound { tag: String },

    /// The tagged inbound has no settings object to hold clients.
    #[error("inbound {tag} has no settings object")]
    MalformedInbound { tag: String },

    /// The candidate config failed the proxy's own check.
    #[error("candidate config rejected: {0}")]
    Validation(#[source] ProxyError),

    /// Writing the candidate or swapping it into place failed.
    #[error("swapping config into place: {0}")]
    Swap(#[source] std::io::Error),

    /// The file swap succeeded but the service reload did not.
    #[error("reloading proxy service: {0}")]
    Reload(#[source] ProxyError),

    /// A live admin API call failed.
    #[error("admin api: {0}")]
    Admin(#[from] ProxyError),
}
