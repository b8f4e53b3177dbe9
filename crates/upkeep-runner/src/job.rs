//! Runtime job records.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{Notify, mpsc, watch};
use upkeep_core::{Phase, PhaseStatus, PluginSpec};

/// High-level lifecycle state of one job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobState {
    /// Created but not yet admitted to the run.
    #[default]
    Pending,
    /// Admitted; waiting for dependencies, a slot, and mutexes.
    Waiting,
    /// A phase runner is executing it.
    Running,
    /// All non-skipped phases succeeded.
    Done,
    /// At least one phase failed or timed out.
    Failed,
    /// Filtered out, or blocked forever by a failed dependency.
    Skipped,
    /// Interrupted by run cancellation.
    Cancelled,
}

impl JobState {
    /// Whether the job will make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Done | JobState::Failed | JobState::Skipped | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Waiting => "waiting",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Skipped => "skipped",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The runtime instance of one plugin for one orchestrator run.
///
/// A job is mutated only by its phase runner and, for cancellation, by
/// the orchestrator; it lives from admission until the run ends.
#[derive(Debug)]
pub struct Job {
    /// The plugin this job executes.
    pub spec: PluginSpec,
    /// Lifecycle state.
    pub state: JobState,
    /// The phase currently executing, if any.
    pub current_phase: Option<Phase>,
    /// Status per phase the plugin declares.
    pub phase_status: BTreeMap<Phase, PhaseStatus>,
    /// Exit code of the last phase that ran.
    pub exit_code: Option<i32>,
    /// Retained error message from the most recent failure.
    pub error: Option<String>,
    /// Number of packages this job updated.
    pub packages_updated: u64,
    /// Pid of the live PTY child, if one exists right now.
    pub pty_pid: Option<u32>,
    /// Shared pid cell (0 = no live child) read by metrics collectors
    /// while the job owns its PTY.
    pub pid_cell: Arc<AtomicU32>,
    /// Gate released by the UI when `pause_between_phases` is active.
    pub continue_gate: Arc<Notify>,
    /// Sender for keystrokes routed to the job's live PTY.
    pub input_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Receiver side of the input channel, drained by the phase runner.
    pub input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Sender for terminal-size changes (cols, rows).
    pub resize_tx: watch::Sender<(u16, u16)>,
    /// Receiver side of the resize channel, applied by the phase runner.
    pub resize_rx: watch::Receiver<(u16, u16)>,
}

impl Job {
    /// Create a pending job for a plugin.
    pub fn new(spec: PluginSpec) -> Self {
        let phase_status = spec
            .phases
            .keys()
            .map(|p| (*p, PhaseStatus::Pending))
            .collect();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (resize_tx, resize_rx) = watch::channel((80, 24));
        Self {
            spec,
            state: JobState::Pending,
            current_phase: None,
            phase_status,
            exit_code: None,
            error: None,
            packages_updated: 0,
            pty_pid: None,
            pid_cell: Arc::new(AtomicU32::new(0)),
            continue_gate: Arc::new(Notify::new()),
            input_tx,
            input_rx,
            resize_tx,
            resize_rx,
        }
    }

    /// The plugin name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Record the pid of a newly opened PTY child (`None` clears it).
    pub fn set_live_pid(&mut self, pid: Option<u32>) {
        self.pty_pid = pid;
        self.pid_cell.store(pid.unwrap_or(0), Ordering::Relaxed);
    }

    /// Record a phase status transition.
    pub fn set_phase_status(&mut self, phase: Phase, status: PhaseStatus) {
        self.phase_status.insert(phase, status);
    }

    /// Status of one phase; Pending when the phase was never recorded.
    pub fn phase_status(&self, phase: Phase) -> PhaseStatus {
        self.phase_status.get(&phase).copied().unwrap_or_default()
    }

    /// The first phase whose status is Failed or TimedOut, if any. This
    /// is where a retry re-enters the sequence.
    pub fn failed_phase(&self) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| {
            matches!(
                self.phase_status(*p),
                PhaseStatus::Failed | PhaseStatus::TimedOut
            )
        })
    }

    /// Whether every recorded phase status counts as successful.
    pub fn all_phases_ok(&self) -> bool {
        self.phase_status.values().all(|s| s.is_ok())
    }
}
