//! Process resource sampling.
//!
//! A [`MetricsCollector`] is a short-lived accumulator bound to one child
//! process at a time. It samples CPU, memory, and disk counters at a
//! bounded rate and snapshots finished phases into the shared
//! [`MetricsStore`]. The collector never owns snapshots: stopping it,
//! rebinding it to a new pid, or dropping it entirely leaves the store's
//! contents intact.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

use super::store::{MetricsStore, PhaseStats};

/// Minimum interval between process samples.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// A point-in-time reading of the bound process.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhaseMetrics {
    /// Instantaneous CPU usage percentage.
    pub cpu_percent: f32,
    /// Current resident set size in bytes.
    pub rss_bytes: u64,
    /// Highest resident set size seen since binding.
    pub peak_rss_bytes: u64,
    /// CPU time consumed since the baseline sample.
    pub cpu_time: Duration,
    /// Bytes read from disk since the baseline sample.
    pub disk_read_bytes: u64,
    /// Bytes written to disk since the baseline sample.
    pub disk_written_bytes: u64,
    /// Estimated time remaining, when the caller has supplied one.
    pub eta: Option<Duration>,
    /// Set when the process can no longer be sampled.
    pub error_message: Option<String>,
}

/// Per-phase accumulation state while the phase is in flight.
#[derive(Clone, Debug, Default)]
struct PendingPhase {
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    cpu_time: Duration,
    data_bytes: u64,
    peak_memory_bytes: u64,
    packages: u64,
}

/// Samples one child process and writes phase snapshots into the store.
#[derive(Debug)]
pub struct MetricsCollector {
    store: Arc<MetricsStore>,
    system: System,
    pid: Option<u32>,
    running: bool,
    baseline_cpu: Duration,
    baseline_disk_read: u64,
    baseline_disk_written: u64,
    peak_rss: u64,
    last_sample_at: Option<Instant>,
    cached: PhaseMetrics,
    pending: BTreeMap<String, PendingPhase>,
    eta: Option<Duration>,
}

impl MetricsCollector {
    /// Create a collector writing into `store`.
    pub fn new(store: Arc<MetricsStore>) -> Self {
        Self {
            store,
            system: System::new(),
            pid: None,
            running: false,
            baseline_cpu: Duration::ZERO,
            baseline_disk_read: 0,
            baseline_disk_written: 0,
            peak_rss: 0,
            last_sample_at: None,
            cached: PhaseMetrics::default(),
            pending: BTreeMap::new(),
            eta: None,
        }
    }

    /// The store this collector writes into.
    pub fn store(&self) -> Arc<MetricsStore> {
        Arc::clone(&self.store)
    }

    /// Begin sampling: records baseline CPU and disk counters for the
    /// bound process.
    pub fn start(&mut self) {
        self.running = true;
        self.take_baseline();
    }

    /// Stop sampling. The store is deliberately left untouched; completed
    /// phase snapshots survive collector shutdown.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Whether the collector is currently sampling.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Rebind to a new child process without losing accumulated
    /// snapshots. Phase state in flight is kept; only the sampling
    /// baselines move to the new pid.
    pub fn update_pid(&mut self, pid: u32) {
        debug!(pid, "collector rebound to new child");
        self.pid = Some(pid);
        self.take_baseline();
    }

    /// Supply an ETA estimate to be echoed from [`collect`].
    ///
    /// [`collect`]: MetricsCollector::collect
    pub fn set_eta(&mut self, eta: Option<Duration>) {
        self.eta = eta;
    }

    /// Mark a phase as running in the store and begin accumulating its
    /// stats.
    pub fn start_phase(&mut self, name: &str) {
        self.store.start_phase(name);
        self.pending.insert(
            name.to_string(),
            PendingPhase {
                started: Some(Instant::now()),
                started_at: Some(Utc::now()),
                ..PendingPhase::default()
            },
        );
    }

    /// Raise the in-flight stats for a phase. Values only ever increase;
    /// live counters in the store follow along.
    pub fn update_phase_stats(
        &mut self,
        name: &str,
        cpu_time: Option<Duration>,
        data_bytes: Option<u64>,
        peak_memory_bytes: Option<u64>,
        packages: Option<u64>,
    ) {
        let entry = self.pending.entry(name.to_string()).or_default();
        if let Some(cpu) = cpu_time {
            entry.cpu_time = entry.cpu_time.max(cpu);
        }
        if let Some(bytes) = data_bytes {
            entry.data_bytes = entry.data_bytes.max(bytes);
        }
        if let Some(mem) = peak_memory_bytes {
            entry.peak_memory_bytes = entry.peak_memory_bytes.max(mem);
        }
        if let Some(pkgs) = packages {
            entry.packages = entry.packages.max(pkgs);
        }
        self.store.update_live(cpu_time, data_bytes, peak_memory_bytes);
    }

    /// Snapshot a finished phase into the store.
    ///
    /// The snapshot is keyed by `name` and overwrites any previous
    /// snapshot for the same phase (retry semantics); snapshots of other
    /// phases are untouched.
    pub fn complete_phase(&mut self, name: &str, success: bool) {
        let pending = self.pending.remove(name).unwrap_or_default();
        let stats = PhaseStats {
            wall_time: pending
                .started
                .map(|s| s.elapsed())
                .unwrap_or(Duration::ZERO),
            cpu_time: pending.cpu_time,
            data_bytes: pending.data_bytes,
            packages: pending.packages,
            peak_memory_bytes: pending.peak_memory_bytes,
            started_at: pending.started_at,
            ended_at: Some(Utc::now()),
        };
        self.store.snapshot_phase(name, &stats, success);
    }

    /// Read current live values for the bound process.
    ///
    /// Samples at most once per [`SAMPLE_INTERVAL`]; earlier calls return
    /// the cached reading. When the process has exited or cannot be
    /// inspected, the reading carries an error message instead of
    /// failing.
    pub fn collect(&mut self) -> PhaseMetrics {
        if let Some(last) = self.last_sample_at {
            if last.elapsed() < SAMPLE_INTERVAL {
                let mut cached = self.cached.clone();
                cached.eta = self.eta;
                return cached;
            }
        }
        self.last_sample_at = Some(Instant::now());

        let Some(pid) = self.pid else {
            self.cached = PhaseMetrics {
                eta: self.eta,
                error_message: Some("no process bound".into()),
                ..PhaseMetrics::default()
            };
            return self.cached.clone();
        };

        let sys_pid = Pid::from_u32(pid);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

        let Some(process) = self.system.process(sys_pid) else {
            self.cached = PhaseMetrics {
                peak_rss_bytes: self.peak_rss,
                eta: self.eta,
                error_message: Some("process not accessible".into()),
                ..PhaseMetrics::default()
            };
            return self.cached.clone();
        };

        let rss = process.memory();
        self.peak_rss = self.peak_rss.max(rss);
        let total_cpu = Duration::from_millis(process.accumulated_cpu_time());
        let cpu_time = total_cpu.saturating_sub(self.baseline_cpu);
        let disk = process.disk_usage();

        let metrics = PhaseMetrics {
            cpu_percent: process.cpu_usage(),
            rss_bytes: rss,
            peak_rss_bytes: self.peak_rss,
            cpu_time,
            disk_read_bytes: disk.total_read_bytes.saturating_sub(self.baseline_disk_read),
            disk_written_bytes: disk
                .total_written_bytes
                .saturating_sub(self.baseline_disk_written),
            eta: self.eta,
            error_message: None,
        };

        self.store
            .update_live(Some(cpu_time), None, Some(self.peak_rss));

        self.cached = metrics.clone();
        metrics
    }

    fn take_baseline(&mut self) {
        self.last_sample_at = None;
        let Some(pid) = self.pid else {
            self.baseline_cpu = Duration::ZERO;
            self.baseline_disk_read = 0;
            self.baseline_disk_written = 0;
            return;
        };
        let sys_pid = Pid::from_u32(pid);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        if let Some(process) = self.system.process(sys_pid) {
            self.baseline_cpu = Duration::from_millis(process.accumulated_cpu_time());
            let disk = process.disk_usage();
            self.baseline_disk_read = disk.total_read_bytes;
            self.baseline_disk_written = disk.total_written_bytes;
        } else {
            self.baseline_cpu = Duration::ZERO;
            self.baseline_disk_read = 0;
            self.baseline_disk_written = 0;
        }
    }
}
