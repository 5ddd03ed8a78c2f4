//! relayd: the relaygrid node agent.
//!
//! Single binary that assembles the agent: control-plane client, the
//! apply strategy picked by config, telemetry collectors, and the four
//! periodic loops.
//!
//! # Usage
//!
//! ```text
//! relayd run --config /etc/relaygrid/agent.toml
//! relayd sync --config /etc/relaygrid/agent.toml
//! relayd check-config --config /etc/relaygrid/agent.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use relay_core::{AgentConfig, ApplyMode, DEFAULT_CONFIG_PATH};
use relaygrid_agent::Agent;
use relaygrid_apply::{Applier, ConfigPatchApplier, LiveApplier};
use relaygrid_control::ControlClient;
use relaygrid_proxy::{HttpAdmin, ProcessControl};
use relaygrid_state::StateStore;
use relaygrid_telemetry::{HostSampler, StatsCollector};

#[derive(Parser)]
#[command(name = "relayd", about = "Relaygrid node agent", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent loops until SIGINT or SIGTERM.
    Run {
        /// Path to the agent configuration.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Perform exactly one reconciliation cycle, then exit.
    Sync {
        /// Path to the agent configuration.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Load and validate the configuration, then print a summary.
    CheckConfig {
        /// Path to the agent configuration.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => {
            let cfg = load(&config)?;
            init_tracing(&cfg.log.level);
            run(cfg).await
        }
        Command::Sync { config } => {
            let cfg = load(&config)?;
            init_tracing(&cfg.log.level);
            sync(cfg).await
        }
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn load(path: &Path) -> anyhow::Result<AgentConfig> {
    AgentConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

/// Assemble the agent from a validated config.
fn build_agent(cfg: &AgentConfig) -> anyhow::Result<Arc<Agent>> {
    let control = Arc::new(ControlClient::new(&cfg.control)?);
    let admin = Arc::new(HttpAdmin::new(&cfg.proxy)?);

    let applier: Arc<dyn Applier> = match cfg.proxy.mode {
        ApplyMode::Api => Arc::new(LiveApplier::new(admin.clone(), cfg.proxy.inbounds.clone())),
        ApplyMode::File => {
            let config_path = cfg
                .proxy
                .config_path
                .clone()
                .context("proxy.config_path is required in file mode")?;
            let lock_path = cfg
                .proxy
                .lock_path()
                .context("proxy.config_path is required in file mode")?;
            Arc::new(ConfigPatchApplier::new(
                config_path,
                lock_path,
                cfg.proxy.inbounds.clone(),
                Arc::new(ProcessControl::new(&cfg.proxy)),
            ))
        }
    };

    // Counters are read through the admin API in both modes; only the
    // mutation path differs.
    let stats = StatsCollector::new(admin, cfg.proxy.stats_reset);

    Ok(Arc::new(Agent::new(
        control,
        applier,
        Arc::new(StateStore::new()),
        stats,
        HostSampler::new(),
        cfg.intervals.clone(),
    )))
}

async fn run(cfg: AgentConfig) -> anyhow::Result<()> {
    info!(
        node = %cfg.control.node,
        mode = cfg.proxy.mode.as_str(),
        "relayd starting"
    );

    let agent = build_agent(&cfg)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loops = tokio::spawn(agent.run(shutdown_rx));

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = loops.await;
    info!("relayd stopped");
    Ok(())
}

async fn sync(cfg: AgentConfig) -> anyhow::Result<()> {
    info!(
        node = %cfg.control.node,
        mode = cfg.proxy.mode.as_str(),
        "one-shot sync"
    );

    let agent = build_agent(&cfg)?;
    agent.sync_once().await?;

    info!("sync complete");
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let cfg = load(path)?;
    println!(
        "{}: ok (node {}, {} mode)",
        path.display(),
        cfg.control.node,
        cfg.proxy.mode.as_str()
    );
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}
