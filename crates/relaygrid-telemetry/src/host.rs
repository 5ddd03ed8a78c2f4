//! Host resource sampling for the metrics loop.
//!
//! Bandwidth is derived from interface byte totals, so the sampler is
//! stateful: the first call only records a baseline and reports no
//! bandwidth. Fields that cannot be obtained are left unset rather
//! than pushed as zero.

use std::time::Instant;

use sysinfo::{Networks, System};

use relay_core::{MetricPush, unix_now};

/// Byte totals across every interface at one instant.
struct NetTotals {
    at: Instant,
    sent: u64,
    received: u64,
}

/// Samples cpu, memory, and network throughput for the host.
pub struct HostSampler {
    sys: System,
    networks: Networks,
    last: Option<NetTotals>,
}

impl HostSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        // Prime the cpu meter so the first sample has a window to
        // measure against.
        sys.refresh_cpu();
        Self {
            sys,
            networks: Networks::new_with_refreshed_list(),
            last: None,
        }
    }

    /// Take one sample. Cpu usage covers the span since the previous
    /// call; bandwidth needs two observations and is absent from the
    /// first sample.
    pub fn sample(&mut self) -> MetricPush {
        let mut push = MetricPush {
            server_time: unix_now(),
            ..MetricPush::default()
        };

        self.sys.refresh_cpu();
        let cpu = self.sys.global_cpu_info().cpu_usage();
        if cpu.is_finite() {
            push.cpu_percent = Some(f64::from(cpu));
        }

        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total > 0 {
            push.memory_percent = Some(self.sys.used_memory() as f64 / total as f64 * 100.0);
        }

        if let Some((up, down)) = self.net_throughput() {
            push.bandwidth_up_mbps = Some(up);
            push.bandwidth_down_mbps = Some(down);
        }

        push
    }

    /// Megabits per second in each direction since the previous sample.
    fn net_throughput(&mut self) -> Option<(f64, f64)> {
        self.networks.refresh();
        let mut sent = 0u64;
        let mut received = 0u64;
        for (_, data) in &self.networks {
            sent += data.total_transmitted();
            received += data.total_received();
        }

        let now = Instant::now();
        let last = self.last.replace(NetTotals { at: now, sent, received })?;

        let elapsed = now.duration_since(last.at).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }

        let up = delta_mbps(last.sent, sent, elapsed);
        let down = delta_mbps(last.received, received, elapsed);
        Some((up, down))
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Throughput between two cumulative readings. A counter that moved
/// backwards (interface reset) counts as a zero delta, not a wrapped one.
fn delta_mbps(previous: u64, current: u64, seconds: f64) -> f64 {
    (current.saturating_sub(previous) as f64 * 8.0) / (seconds * 1_000_000.0)
}
