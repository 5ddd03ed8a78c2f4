//! Process-level control of the proxy service: config validation with
//! the proxy's own parser, and reloads through the service manager or
//! an operator-supplied command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use relay_core::ProxyConfig;

use crate::error::ProxyError;

/// Bound on any single control command, so a wedged binary cannot
/// stall the sync loop forever.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Validate-and-reload seam over the proxy process.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Check a candidate config file before it replaces the live one.
    async fn validate_config(&self, path: &Path) -> Result<(), ProxyError>;

    /// One reload attempt. Callers own any retry policy.
    async fn reload(&self) -> Result<(), ProxyError>;
}

/// Drives the real proxy binary and the service manager.
pub struct ProcessControl {
    binary: PathBuf,
    service: String,
    reload_cmd: Option<String>,
}

impl ProcessControl {
    pub fn new(cfg: &ProxyConfig) -> Self {
        Self {
            binary: cfg.binary.clone(),
            service: cfg.service.clone(),
            reload_cmd: cfg.reload_cmd.clone(),
        }
    }
}

#[async_trait]
impl ServiceControl for ProcessControl {
    async fn validate_config(&self, path: &Path) -> Result<(), ProxyError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-test").arg("-config").arg(path);
        run(cmd).await
    }

    /// An explicit `reload_cmd` wins. Otherwise ask the service manager
    /// for a reload, and if the unit does not support that, restart it.
    async fn reload(&self) -> Result<(), ProxyError> {
        if let Some(reload_cmd) = &self.reload_cmd {
            debug!(cmd = %reload_cmd, "reloading via configured command");
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(reload_cmd);
            return run(cmd).await;
        }

        let mut reload = Command::new("systemctl");
        reload.arg("reload").arg(&self.service);
        match run(reload).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(service = %self.service, %err, "reload failed, restarting");
                let mut restart = Command::new("systemctl");
                restart.arg("restart").arg(&self.service);
                run(restart).await
            }
        }
    }
}

/// Run to completion, capturing output. Non-zero exit becomes an error
/// carrying whatever the command printed.
async fn run(mut cmd: Command) -> Result<(), ProxyError> {
    let rendered = render(cmd.as_std());
    cmd.kill_on_drop(true);

    let output = tokio::time::timeout(COMMAND_TIMEOUT, cmd.output())
        .await
        .map_err(|_| ProxyError::CommandTimeout {
            cmd: rendered.clone(),
        })?
        .map_err(|source| ProxyError::Spawn {
            cmd: rendered.clone(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }

    let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if detail.is_empty() {
        detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
    }
    Err(ProxyError::CommandFailed {
        cmd: rendered,
        status: output.status,
        detail,
    })
}

fn render(cmd: &std::process::Command) -> String {
    let mut rendered = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
