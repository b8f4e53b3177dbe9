//! Per-plugin tab state.
//!
//! A tab owns the terminal screen for one job, the progress/ETA model fed
//! by its events, and the metrics store + collector pair. The store lives
//! as long as the tab; collectors come and go with PTY children without
//! disturbing completed snapshots.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use upkeep_core::{Phase, StreamEvent};
use upkeep_runner::{MetricsCollector, MetricsStore};

use crate::screen::TerminalScreen;

/// Progress state published to the status line.
#[derive(Clone, Debug, Default)]
pub struct ProgressState {
    /// Phase the latest progress applies to.
    pub phase: Option<Phase>,
    /// Completion percentage, 0..=100.
    pub percent: Option<f64>,
    /// Latest progress message.
    pub message: Option<String>,
    /// Bytes downloaded so far.
    pub bytes_downloaded: Option<u64>,
    /// Total bytes to download.
    pub bytes_total: Option<u64>,
    /// Items completed so far.
    pub items_done: Option<u64>,
    /// Total items.
    pub items_total: Option<u64>,
    /// When the current phase started.
    pub phase_started: Option<Instant>,
}

impl ProgressState {
    /// Estimated time remaining, derived from the percent rate.
    pub fn eta(&self) -> Option<Duration> {
        let percent = self.percent.filter(|p| *p > 0.0 && *p <= 100.0)?;
        let elapsed = self.phase_started?.elapsed();
        let total = elapsed.as_secs_f64() * 100.0 / percent;
        let remaining = total - elapsed.as_secs_f64();
        if remaining.is_finite() && remaining >= 0.0 {
            Some(Duration::from_secs_f64(remaining))
        } else {
            None
        }
    }

    /// Elapsed time in the current phase.
    pub fn elapsed(&self) -> Option<Duration> {
        self.phase_started.map(|s| s.elapsed())
    }

    fn start_phase(&mut self, phase: Phase) {
        *self = Self {
            phase: Some(phase),
            phase_started: Some(Instant::now()),
            ..Self::default()
        };
    }
}

/// Completion state shown in the tab title and status line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TabStatus {
    /// No phase has started yet.
    #[default]
    Pending,
    /// A phase is running.
    Running(Phase),
    /// Held between phases waiting for the continue signal.
    Paused,
    /// The job finished successfully.
    Succeeded,
    /// The job failed; carries the error message.
    Failed(String),
}

/// Everything the renderer needs for one plugin's tab.
#[derive(Debug)]
pub struct TabState {
    /// Plugin name; also the tab title.
    pub plugin: String,
    /// The tab's terminal screen.
    pub screen: TerminalScreen,
    /// Progress published by the latest events.
    pub progress: ProgressState,
    /// Current status.
    pub status: TabStatus,
    /// Packages updated, from the completion event.
    pub packages_updated: u64,
    /// Whether the tab changed since the renderer last drew it.
    pub dirty: bool,
    metrics: Arc<MetricsStore>,
    collector: MetricsCollector,
    bound_pid: Option<u32>,
}

impl TabState {
    /// Create a tab with the given screen dimensions.
    pub fn new(plugin: impl Into<String>, cols: usize, rows: usize) -> Self {
        let metrics = Arc::new(MetricsStore::new());
        let collector = MetricsCollector::new(Arc::clone(&metrics));
        Self {
            plugin: plugin.into(),
            screen: TerminalScreen::new(cols, rows),
            progress: ProgressState::default(),
            status: TabStatus::Pending,
            packages_updated: 0,
            dirty: true,
            metrics,
            collector,
            bound_pid: None,
        }
    }

    /// The tab's metrics store. Snapshots here survive PTY restarts and
    /// collector replacement.
    pub fn metrics(&self) -> Arc<MetricsStore> {
        Arc::clone(&self.metrics)
    }

    /// The tab's active collector.
    pub fn collector_mut(&mut self) -> &mut MetricsCollector {
        &mut self.collector
    }

    /// Replace the collector, rebinding to a new child without touching
    /// the store.
    pub fn replace_collector(&mut self) {
        self.collector = MetricsCollector::new(Arc::clone(&self.metrics));
    }

    /// Apply one event to the tab.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Output { line, .. } => {
                self.screen.feed(line.as_bytes());
                self.screen.feed(b"\r\n");
            }
            StreamEvent::Progress {
                phase,
                percent,
                message,
                bytes_downloaded,
                bytes_total,
                items_done,
                items_total,
                ..
            } => {
                self.progress.phase = Some(*phase);
                if percent.is_some() {
                    self.progress.percent = *percent;
                }
                if message.is_some() {
                    self.progress.message = message.clone();
                }
                if bytes_downloaded.is_some() {
                    self.progress.bytes_downloaded = *bytes_downloaded;
                }
                if bytes_total.is_some() {
                    self.progress.bytes_total = *bytes_total;
                }
                if items_done.is_some() {
                    self.progress.items_done = *items_done;
                }
                if items_total.is_some() {
                    self.progress.items_total = *items_total;
                }
                self.collector.update_phase_stats(
                    phase.display_name(),
                    None,
                    *bytes_downloaded,
                    None,
                    *items_done,
                );
                if message.as_deref() == Some("paused") {
                    self.status = TabStatus::Paused;
                }
            }
            StreamEvent::PhaseStart { phase, .. } => {
                self.progress.start_phase(*phase);
                self.status = TabStatus::Running(*phase);
                self.collector.start();
                self.collector.start_phase(phase.display_name());
            }
            StreamEvent::PhaseEnd {
                phase,
                success,
                error,
                ..
            } => {
                self.collector.complete_phase(phase.display_name(), *success);
                if !success {
                    self.status = TabStatus::Failed(
                        error.clone().unwrap_or_else(|| "phase failed".into()),
                    );
                }
            }
            StreamEvent::Completion {
                success,
                packages_updated,
                error,
                ..
            } => {
                self.packages_updated = *packages_updated;
                self.status = if *success {
                    TabStatus::Succeeded
                } else {
                    TabStatus::Failed(error.clone().unwrap_or_else(|| "failed".into()))
                };
                self.collector.stop();
            }
        }
        self.dirty = true;
    }

    /// Rebind the collector when the job's live child changes. Completed
    /// snapshots are unaffected; only the sampling baselines move.
    pub fn bind_pid(&mut self, pid: Option<u32>) {
        if pid == self.bound_pid {
            return;
        }
        self.bound_pid = pid;
        if let Some(pid) = pid {
            self.collector.update_pid(pid);
        }
    }

    /// Sample process metrics; the collector enforces its own rate
    /// limit, so this is safe to call every flush tick.
    pub fn sample_metrics(&mut self) {
        let _ = self.collector.collect();
    }

    /// One-line status summary for the status bar.
    pub fn status_line(&self) -> String {
        let mut line = String::new();
        match &self.status {
            TabStatus::Pending => line.push_str("waiting"),
            TabStatus::Running(phase) => {
                let _ = write!(line, "{}", phase.display_name());
                if let Some(percent) = self.progress.percent {
                    let _ = write!(line, " {percent:.0}%");
                }
                if let Some(eta) = self.progress.eta() {
                    let _ = write!(line, " eta {}s", eta.as_secs());
                }
                if let Some(message) = &self.progress.message {
                    let _ = write!(line, " - {message}");
                }
            }
            TabStatus::Paused => line.push_str("paused"),
            TabStatus::Succeeded => {
                let _ = write!(line, "done ({} packages)", self.packages_updated);
            }
            TabStatus::Failed(error) => {
                let _ = write!(line, "failed: {error}");
            }
        }
        line
    }

    /// The full tab contents (scrollback plus live screen) as text, used
    /// by the save-logs action.
    pub fn dump_text(&self) -> String {
        let mut out = String::new();
        for i in 0..self.screen.scrollback_len() {
            if let Some(line) = self.screen.history_line(i) {
                out.push_str(line.trim_end());
                out.push('\n');
            }
        }
        for row in self.screen.display() {
            out.push_str(row.trim_end());
            out.push('\n');
        }
        out
    }
}

/// Totals across all tabs, for the summary footer.
pub fn aggregate_packages(tabs: &BTreeMap<String, TabState>) -> u64 {
    tabs.values().map(|t| t.packages_updated).sum()
}

/// Tab set shared between the event flusher and the render loop.
#[derive(Clone, Debug, Default)]
pub struct TabRegistry {
    inner: Arc<std::sync::Mutex<BTreeMap<String, TabState>>>,
}

impl TabRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tab for a plugin.
    pub fn insert(&self, tab: TabState) {
        if let Ok(mut tabs) = self.inner.lock() {
            tabs.insert(tab.plugin.clone(), tab);
        }
    }

    /// Plugin names in tab order.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|tabs| tabs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Run a closure over one tab.
    pub fn with_tab<T>(&self, plugin: &str, f: impl FnOnce(&mut TabState) -> T) -> Option<T> {
        let mut tabs = self.inner.lock().ok()?;
        tabs.get_mut(plugin).map(f)
    }

    /// Run a closure over every tab.
    pub fn for_each(&self, mut f: impl FnMut(&mut TabState)) {
        if let Ok(mut tabs) = self.inner.lock() {
            for tab in tabs.values_mut() {
                f(tab);
            }
        }
    }
}

#[async_trait::async_trait]
impl crate::handler::EventSink for TabRegistry {
    async fn process_batch(&mut self, plugin: &str, events: Vec<StreamEvent>) {
        if let Ok(mut tabs) = self.inner.lock() {
            let Some(tab) = tabs.get_mut(plugin) else {
                return;
            };
            for event in &events {
                tab.apply(event);
            }
            tab.sample_metrics();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use upkeep_core::OutputStream;

    fn tab() -> TabState {
        TabState::new("apt", 80, 24)
    }

    #[test]
    fn output_reaches_the_screen() {
        let mut tab = tab();
        tab.apply(&StreamEvent::output("apt", "hello", OutputStream::Stdout));
        assert!(tab.screen.display()[0].starts_with("hello"));
        assert!(tab.dirty);
    }

    #[test]
    fn phase_start_resets_progress() {
        let mut tab = tab();
        tab.apply(&StreamEvent::phase_start("apt", Phase::Check));
        assert_eq!(tab.status, TabStatus::Running(Phase::Check));
        assert!(tab.progress.phase_started.is_some());
        assert_eq!(tab.metrics().current_phase().as_deref(), Some("Update"));
    }

    #[test]
    fn progress_updates_state_and_metrics() {
        let mut tab = tab();
        tab.apply(&StreamEvent::phase_start("apt", Phase::Download));
        tab.apply(&StreamEvent::Progress {
            plugin: "apt".into(),
            timestamp: chrono::Utc::now(),
            phase: Phase::Download,
            percent: Some(25.0),
            message: Some("fetching".into()),
            bytes_downloaded: Some(2048),
            bytes_total: Some(8192),
            items_done: None,
            items_total: None,
        });
        assert_eq!(tab.progress.percent, Some(25.0));
        assert_eq!(tab.progress.bytes_downloaded, Some(2048));

        tab.apply(&StreamEvent::phase_end("apt", Phase::Download, true, None));
        let snapshot = tab.metrics().get_phase_snapshot("Download").unwrap();
        assert_eq!(snapshot.data_bytes, 2048);
        assert!(snapshot.success);
    }

    #[test]
    fn phase_snapshots_survive_collector_replacement() {
        let mut tab = tab();
        tab.apply(&StreamEvent::phase_start("apt", Phase::Check));
        tab.apply(&StreamEvent::phase_end("apt", Phase::Check, true, None));
        let before = tab.metrics().get_phase_snapshot("Update").unwrap();

        tab.replace_collector();
        tab.apply(&StreamEvent::phase_start("apt", Phase::Execute));
        tab.apply(&StreamEvent::phase_end("apt", Phase::Execute, true, None));

        assert_eq!(tab.metrics().get_phase_snapshot("Update"), Some(before));
        assert_eq!(tab.metrics().all_snapshots().len(), 2);
    }

    #[test]
    fn pid_rebinding_does_not_touch_snapshots() {
        let mut tab = tab();
        tab.apply(&StreamEvent::phase_start("apt", Phase::Check));
        tab.apply(&StreamEvent::phase_end("apt", Phase::Check, true, None));
        let before = tab.metrics().get_phase_snapshot("Update").unwrap();

        tab.bind_pid(Some(std::process::id()));
        tab.sample_metrics();
        tab.bind_pid(None);

        assert_eq!(tab.metrics().get_phase_snapshot("Update"), Some(before));
    }

    #[test]
    fn completion_sets_final_status() {
        let mut tab = tab();
        tab.apply(&StreamEvent::completion("apt", true, 0, 12, None));
        assert_eq!(tab.status, TabStatus::Succeeded);
        assert_eq!(tab.packages_updated, 12);
        assert!(tab.status_line().contains("12 packages"));
    }

    #[test]
    fn failure_keeps_the_error() {
        let mut tab = tab();
        tab.apply(&StreamEvent::completion(
            "apt",
            false,
            100,
            0,
            Some("boom".into()),
        ));
        assert_eq!(tab.status, TabStatus::Failed("boom".into()));
        assert!(tab.status_line().contains("boom"));
    }

    #[test]
    fn eta_comes_from_percent_rate() {
        let mut progress = ProgressState::default();
        progress.phase_started = Some(Instant::now() - Duration::from_secs(10));
        progress.percent = Some(50.0);
        let eta = progress.eta().unwrap();
        // 50% in 10s: about 10s remain.
        assert!((9..=11).contains(&eta.as_secs()));
    }

    #[test]
    fn eta_absent_without_percent() {
        let progress = ProgressState::default();
        assert!(progress.eta().is_none());
    }
}
