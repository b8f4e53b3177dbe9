//! Phase metrics storage.
//!
//! The store owns every completed phase snapshot for one tab. Collectors
//! are short-lived accumulators that write into the store on phase
//! completion; recreating a collector, or restarting the PTY underneath
//! it, leaves the store untouched. The only clearing path is an explicit
//! [`MetricsStore::reset`].

use std::collections::BTreeMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Inputs for one phase snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhaseStats {
    /// Wall-clock duration of the phase.
    pub wall_time: Duration,
    /// CPU time consumed by the child.
    pub cpu_time: Duration,
    /// Bytes processed (downloaded or written).
    pub data_bytes: u64,
    /// Packages handled in the phase.
    pub packages: u64,
    /// Peak resident set size in bytes.
    pub peak_memory_bytes: u64,
    /// When the phase started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the phase ended.
    pub ended_at: Option<DateTime<Utc>>,
}

/// An immutable record of one completed phase.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseSnapshot {
    /// Display name of the phase ("Update", "Download", "Upgrade").
    pub phase_name: String,
    /// Wall-clock duration.
    pub wall_time: Duration,
    /// CPU time consumed.
    pub cpu_time: Duration,
    /// Bytes processed.
    pub data_bytes: u64,
    /// Packages handled.
    pub packages: u64,
    /// Peak resident set size in bytes.
    pub peak_memory_bytes: u64,
    /// When the phase started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the phase ended.
    pub ended_at: Option<DateTime<Utc>>,
    /// Whether the phase succeeded.
    pub success: bool,
}

/// Totals across all completed phases, merged with live counters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccumulatedMetrics {
    /// Sum of CPU time across phases.
    pub cpu_time: Duration,
    /// Sum of bytes processed.
    pub data_bytes: u64,
    /// Sum of wall time.
    pub wall_time: Duration,
    /// Sum of packages handled.
    pub packages: u64,
    /// Maximum resident set size seen.
    pub peak_memory_bytes: u64,
}

/// Live counters updated while a phase is still running. Each value is
/// monotonically non-decreasing until the next reset.
#[derive(Clone, Debug, Default, PartialEq)]
struct LiveMetrics {
    cpu_time: Duration,
    data_bytes: u64,
    peak_memory_bytes: u64,
}

#[derive(Debug, Default)]
struct Inner {
    snapshots: BTreeMap<String, PhaseSnapshot>,
    current_phase: Option<String>,
    has_completed_phases: bool,
    live: LiveMetrics,
}

/// Snapshot-owning metrics storage for one tab.
///
/// Thread-safe; share it behind an `Arc`. Lock scope is a handful of map
/// operations, so contention is negligible.
#[derive(Debug, Default)]
pub struct MetricsStore {
    inner: StdMutex<Inner>,
}

impl MetricsStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        match self.inner.lock() {
            Ok(mut inner) => f(&mut inner),
            // A poisoned store would lose metrics but must not take the
            // run down with it.
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Record that a phase is now running. No snapshot is taken.
    pub fn start_phase(&self, name: &str) {
        self.with_inner(|inner| {
            inner.current_phase = Some(name.to_string());
        });
    }

    /// The phase currently marked as running, if any.
    pub fn current_phase(&self) -> Option<String> {
        self.with_inner(|inner| inner.current_phase.clone())
    }

    /// Whether any phase has completed since the last reset.
    pub fn has_completed_phases(&self) -> bool {
        self.with_inner(|inner| inner.has_completed_phases)
    }

    /// Write (or overwrite) the snapshot for a phase and clear the
    /// current-phase marker.
    pub fn snapshot_phase(&self, name: &str, stats: &PhaseStats, success: bool) -> PhaseSnapshot {
        let snapshot = PhaseSnapshot {
            phase_name: name.to_string(),
            wall_time: stats.wall_time,
            cpu_time: stats.cpu_time,
            data_bytes: stats.data_bytes,
            packages: stats.packages,
            peak_memory_bytes: stats.peak_memory_bytes,
            started_at: stats.started_at,
            ended_at: stats.ended_at,
            success,
        };
        self.with_inner(|inner| {
            inner.snapshots.insert(name.to_string(), snapshot.clone());
            if inner.current_phase.as_deref() == Some(name) {
                inner.current_phase = None;
            }
            inner.has_completed_phases = true;
        });
        snapshot
    }

    /// The snapshot for one phase, if it has completed.
    pub fn get_phase_snapshot(&self, name: &str) -> Option<PhaseSnapshot> {
        self.with_inner(|inner| inner.snapshots.get(name).cloned())
    }

    /// All completed snapshots keyed by phase name.
    pub fn all_snapshots(&self) -> BTreeMap<String, PhaseSnapshot> {
        self.with_inner(|inner| inner.snapshots.clone())
    }

    /// Raise live counters. Each argument, when present, only ever
    /// increases the stored value.
    pub fn update_live(
        &self,
        cpu_time: Option<Duration>,
        data_bytes: Option<u64>,
        peak_memory_bytes: Option<u64>,
    ) {
        self.with_inner(|inner| {
            if let Some(cpu) = cpu_time {
                inner.live.cpu_time = inner.live.cpu_time.max(cpu);
            }
            if let Some(bytes) = data_bytes {
                inner.live.data_bytes = inner.live.data_bytes.max(bytes);
            }
            if let Some(mem) = peak_memory_bytes {
                inner.live.peak_memory_bytes = inner.live.peak_memory_bytes.max(mem);
            }
        });
    }

    /// Totals across all snapshots, merged with live counters.
    ///
    /// When a live counter has run ahead of the snapshot sum (a phase is
    /// still in flight) the live value wins, so the result never
    /// decreases mid-phase.
    pub fn accumulated(&self) -> AccumulatedMetrics {
        self.with_inner(|inner| {
            let mut acc = AccumulatedMetrics::default();
            for snapshot in inner.snapshots.values() {
                acc.cpu_time += snapshot.cpu_time;
                acc.data_bytes += snapshot.data_bytes;
                acc.wall_time += snapshot.wall_time;
                acc.packages += snapshot.packages;
                acc.peak_memory_bytes = acc.peak_memory_bytes.max(snapshot.peak_memory_bytes);
            }
            acc.cpu_time = acc.cpu_time.max(inner.live.cpu_time);
            acc.data_bytes = acc.data_bytes.max(inner.live.data_bytes);
            acc.peak_memory_bytes = acc.peak_memory_bytes.max(inner.live.peak_memory_bytes);
            acc
        })
    }

    /// Clear all snapshots, markers, and live counters.
    pub fn reset(&self) {
        self.with_inner(|inner| {
            *inner = Inner::default();
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn stats(wall_ms: u64, cpu_ms: u64, bytes: u64, packages: u64, mem: u64) -> PhaseStats {
        PhaseStats {
            wall_time: Duration::from_millis(wall_ms),
            cpu_time: Duration::from_millis(cpu_ms),
            data_bytes: bytes,
            packages,
            peak_memory_bytes: mem,
            started_at: None,
            ended_at: None,
        }
    }

    #[test]
    fn empty_store() {
        let store = MetricsStore::new();
        assert!(store.all_snapshots().is_empty());
        assert!(store.current_phase().is_none());
        assert!(!store.has_completed_phases());
        assert_eq!(store.accumulated(), AccumulatedMetrics::default());
    }

    #[test]
    fn start_phase_sets_marker_without_snapshot() {
        let store = MetricsStore::new();
        store.start_phase("Update");
        assert_eq!(store.current_phase().as_deref(), Some("Update"));
        assert!(store.all_snapshots().is_empty());
    }

    #[test]
    fn snapshot_clears_marker_and_records() {
        let store = MetricsStore::new();
        store.start_phase("Update");
        let snap = store.snapshot_phase("Update", &stats(1000, 500, 2048, 3, 64), true);
        assert_eq!(snap.phase_name, "Update");
        assert!(store.current_phase().is_none());
        assert!(store.has_completed_phases());
        assert_eq!(store.get_phase_snapshot("Update"), Some(snap));
    }

    #[test]
    fn starting_a_new_phase_preserves_existing_snapshots() {
        let store = MetricsStore::new();
        store.start_phase("Update");
        let first = store.snapshot_phase("Update", &stats(1000, 500, 2048, 3, 64), true);

        // The bug this store exists to fix: entering the next phase (or
        // recreating a collector) must not mutate completed snapshots.
        store.start_phase("Download");
        assert_eq!(store.get_phase_snapshot("Update"), Some(first.clone()));

        store.snapshot_phase("Download", &stats(2000, 100, 9000, 0, 32), true);
        assert_eq!(store.get_phase_snapshot("Update"), Some(first));
        assert_eq!(store.all_snapshots().len(), 2);
    }

    #[test]
    fn snapshot_overwrite_replaces_only_that_phase() {
        let store = MetricsStore::new();
        store.snapshot_phase("Update", &stats(1000, 1, 1, 1, 1), false);
        store.snapshot_phase("Upgrade", &stats(500, 2, 2, 2, 2), true);
        store.snapshot_phase("Update", &stats(3000, 3, 3, 3, 3), true);
        let update = store.get_phase_snapshot("Update").unwrap();
        assert_eq!(update.wall_time, Duration::from_secs(3));
        assert!(update.success);
        let upgrade = store.get_phase_snapshot("Upgrade").unwrap();
        assert_eq!(upgrade.wall_time, Duration::from_millis(500));
    }

    #[test]
    fn accumulated_sums_fields_and_maxes_memory() {
        let store = MetricsStore::new();
        store.snapshot_phase("Update", &stats(1000, 500, 100, 2, 64), true);
        store.snapshot_phase("Download", &stats(2000, 250, 900, 0, 128), true);
        store.snapshot_phase("Upgrade", &stats(3000, 750, 50, 7, 96), true);
        let acc = store.accumulated();
        assert_eq!(acc.wall_time, Duration::from_secs(6));
        assert_eq!(acc.cpu_time, Duration::from_millis(1500));
        assert_eq!(acc.data_bytes, 1050);
        assert_eq!(acc.packages, 9);
        assert_eq!(acc.peak_memory_bytes, 128);
    }

    #[test]
    fn live_values_are_monotonic() {
        let store = MetricsStore::new();
        store.update_live(Some(Duration::from_secs(2)), Some(100), Some(64));
        // Lower values must not regress the counters.
        store.update_live(Some(Duration::from_secs(1)), Some(50), Some(32));
        let acc = store.accumulated();
        assert_eq!(acc.cpu_time, Duration::from_secs(2));
        assert_eq!(acc.data_bytes, 100);
        assert_eq!(acc.peak_memory_bytes, 64);
    }

    #[test]
    fn live_values_ahead_of_snapshots_win() {
        let store = MetricsStore::new();
        store.snapshot_phase("Update", &stats(1000, 500, 100, 1, 64), true);
        store.update_live(Some(Duration::from_secs(3)), Some(1000), None);
        let acc = store.accumulated();
        assert_eq!(acc.cpu_time, Duration::from_secs(3));
        assert_eq!(acc.data_bytes, 1000);
        // Wall time and packages come from snapshots only.
        assert_eq!(acc.wall_time, Duration::from_secs(1));
        assert_eq!(acc.packages, 1);
    }

    #[test]
    fn reset_clears_everything() {
        let store = MetricsStore::new();
        store.start_phase("Update");
        store.snapshot_phase("Update", &stats(1000, 500, 100, 1, 64), true);
        store.update_live(None, Some(10), None);
        store.reset();
        assert!(store.all_snapshots().is_empty());
        assert!(store.current_phase().is_none());
        assert!(!store.has_completed_phases());
        assert_eq!(store.accumulated(), AccumulatedMetrics::default());
    }
}
