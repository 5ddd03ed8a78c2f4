//! The agent's loops and the single-cycle bodies behind them.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use relay_core::{Intervals, StatsPush, unix_now};
use relaygrid_apply::Applier;
use relaygrid_control::ControlApi;
use relaygrid_state::StateStore;
use relaygrid_telemetry::{HostSampler, StatsCollector};

use crate::error::CycleError;

/// Wires the control plane, the applier, and the telemetry sources
/// into the agent's four loops. Construct once, wrap in [`Arc`], and
/// hand to [`Agent::run`].
pub struct Agent {
    control: Arc<dyn ControlApi>,
    applier: Arc<dyn Applier>,
    store: Arc<StateStore>,
    stats: StatsCollector,
    sampler: Mutex<HostSampler>,
    intervals: Intervals,
}

impl Agent {
    pub fn new(
        control: Arc<dyn ControlApi>,
        applier: Arc<dyn Applier>,
        store: Arc<StateStore>,
        stats: StatsCollector,
        sampler: HostSampler,
        intervals: Intervals,
    ) -> Self {
        Self {
            control,
            applier,
            store,
            stats,
            sampler: Mutex::new(sampler),
            intervals,
        }
    }

    /// Run every loop until `shutdown` flips. Each loop fires one
    /// cycle immediately, so a fresh node converges without waiting
    /// out the first interval.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let state = tokio::spawn(self.clone().state_loop(shutdown.clone()));
        let stats = tokio::spawn(self.clone().stats_loop(shutdown.clone()));
        let metrics = tokio::spawn(self.clone().metrics_loop(shutdown.clone()));
        let heartbeat = tokio::spawn(self.clone().heartbeat_loop(shutdown));
        let _ = tokio::join!(state, stats, metrics, heartbeat);
        info!("agent stopped");
    }

    // ── State loop ─────────────────────────────────────────────────

    async fn state_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let every = self.intervals.state();
        info!(interval = ?every, "state loop started");
        if let Err(e) = self.sync_once().await {
            warn!(error = %e, "state sync failed");
        }
        loop {
            tokio::select! {
                _ = sleep(every) => {
                    if let Err(e) = self.sync_once().await {
                        warn!(error = %e, "state sync failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("state loop shutting down");
                    break;
                }
            }
        }
    }

    /// One reconciliation cycle. The snapshot is recorded only after
    /// the apply held, and also on the no-op path so a bare version
    /// bump stops re-diffing.
    pub async fn sync_once(&self) -> Result<(), CycleError> {
        let desired = self.control.fetch_state().await?;
        if self
            .store
            .is_unchanged(desired.config_version, &desired.clients, &desired.routes)
            .await
        {
            debug!(version = desired.config_version, "desired state unchanged");
            return Ok(());
        }

        let current_clients = self.store.clients_snapshot().await;
        let current_routes = self.store.routes_snapshot().await;
        let changed = self
            .applier
            .apply(
                &current_clients,
                &desired.clients,
                &current_routes,
                &desired.routes,
            )
            .await?;
        if changed {
            info!(
                version = desired.config_version,
                clients = desired.clients.len(),
                routes = desired.routes.len(),
                "applied desired state"
            );
        }
        self.store
            .update(desired.config_version, &desired.clients, &desired.routes)
            .await;
        Ok(())
    }

    // ── Stats loop ─────────────────────────────────────────────────

    async fn stats_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let every = self.intervals.stats();
        info!(interval = ?every, "stats loop started");
        if let Err(e) = self.push_stats_once().await {
            warn!(error = %e, "stats push failed");
        }
        loop {
            tokio::select! {
                _ = sleep(every) => {
                    if let Err(e) = self.push_stats_once().await {
                        warn!(error = %e, "stats push failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("stats loop shutting down");
                    break;
                }
            }
        }
    }

    /// Read every provisioned identity's counters and push the batch.
    /// An empty roster produces no push at all.
    async fn push_stats_once(&self) -> Result<(), CycleError> {
        let mut emails = self.store.emails().await;
        if emails.is_empty() {
            return Ok(());
        }
        emails.sort();
        let users = self.stats.query_user_bytes(&emails).await?;
        let push = StatsPush {
            server_time: unix_now(),
            users,
        };
        self.control.push_stats(&push).await?;
        debug!(users = push.users.len(), "stats pushed");
        Ok(())
    }

    // ── Metrics loop ───────────────────────────────────────────────

    async fn metrics_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let every = self.intervals.metrics();
        info!(interval = ?every, "metrics loop started");
        if let Err(e) = self.push_metrics_once().await {
            warn!(error = %e, "metrics push failed");
        }
        loop {
            tokio::select! {
                _ = sleep(every) => {
                    if let Err(e) = self.push_metrics_once().await {
                        warn!(error = %e, "metrics push failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("metrics loop shutting down");
                    break;
                }
            }
        }
    }

    /// Sample the host and push, unless nothing was obtainable.
    async fn push_metrics_once(&self) -> Result<(), CycleError> {
        let sample = self.sampler.lock().await.sample();
        if sample.is_empty() {
            debug!("host sample empty, skipping push");
            return Ok(());
        }
        self.control.push_metrics(&sample).await?;
        Ok(())
    }

    // ── Heartbeat loop ─────────────────────────────────────────────

    async fn heartbeat_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let every = self.intervals.heartbeat();
        info!(interval = ?every, "heartbeat loop started");
        self.beat().await;
        loop {
            tokio::select! {
                _ = sleep(every) => self.beat().await,
                _ = shutdown.changed() => {
                    info!("heartbeat loop shutting down");
                    break;
                }
            }
        }
    }

    /// One liveness ping. Failures log at debug only; the other loops
    /// already report control-plane trouble.
    async fn beat(&self) {
        if let Err(e) = self.control.heartbeat().await {
            debug!(error = %e, "heartbeat failed");
        }
    }
}
