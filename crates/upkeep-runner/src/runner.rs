//! Phase execution over PTY sessions.
//!
//! A [`PhaseRunner`] drives one job through its Check / Download /
//! Execute sequence, opening a fresh PTY per phase, assembling lines out
//! of the byte stream, recognising progress sentinels, and emitting
//! [`StreamEvent`]s for every observable transition.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;
use upkeep_core::{
    EventSender, OutputStream, Phase, PhaseStatus, RunOptions, StreamEvent, parse_sentinel,
};

use crate::error::RunnerError;
use crate::job::{Job, JobState};
use crate::pty::{PtySession, SessionOptions};

/// How long a single read waits before the loop re-checks deadlines.
const READ_POLL: Duration = Duration::from_millis(200);

/// Silence threshold after which a stalled-progress event is emitted.
const DEFAULT_STALL_AFTER: Duration = Duration::from_secs(30);

/// Outcome of one phase attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
enum PhaseOutcome {
    /// Exit code zero. `no_updates` is set when a Check reported an
    /// empty update set.
    Succeeded {
        /// The check found nothing to do.
        no_updates: bool,
    },
    /// Non-zero exit or spawn failure.
    Failed {
        /// Exit code when the child ran at all.
        exit_code: i32,
        /// Failure description.
        error: String,
    },
    /// The phase ran past its timeout and was killed.
    TimedOut {
        /// The configured timeout in seconds.
        seconds: u64,
    },
    /// The run was cancelled mid-phase.
    Cancelled,
}

/// Executes the phase sequence of one job and produces its event stream.
#[derive(Clone, Debug)]
pub struct PhaseRunner {
    options: RunOptions,
    events: EventSender,
    cancel: CancellationToken,
    pty_cols: u16,
    pty_rows: u16,
    stall_after: Duration,
}

impl PhaseRunner {
    /// Create a runner.
    pub fn new(options: RunOptions, events: EventSender, cancel: CancellationToken) -> Self {
        Self {
            options,
            events,
            cancel,
            pty_cols: 80,
            pty_rows: 24,
            stall_after: DEFAULT_STALL_AFTER,
        }
    }

    /// Set the PTY dimensions used for spawned phases.
    #[must_use]
    pub fn pty_size(mut self, cols: u16, rows: u16) -> Self {
        self.pty_cols = cols;
        self.pty_rows = rows;
        self
    }

    /// Override the silence threshold for stalled-progress events.
    #[must_use]
    pub fn stall_after(mut self, after: Duration) -> Self {
        self.stall_after = after;
        self
    }

    /// Run the job's full phase sequence.
    pub async fn run(&self, job: &mut Job) -> JobState {
        let phases = job.spec.active_phases();
        self.run_phases(job, &phases).await
    }

    /// Re-enter the sequence at the job's failed phase.
    ///
    /// Allowed only when a phase has failed or timed out; the retried
    /// phase's earlier outcome is overwritten.
    pub async fn retry(&self, job: &mut Job) -> Result<JobState, RunnerError> {
        let Some(from) = job.failed_phase() else {
            return Err(RunnerError::Core(upkeep_core::UpkeepCoreError::InvalidPlugin {
                plugin: job.name().to_string(),
                reason: "retry requested but no phase has failed".into(),
            }));
        };
        let phases: Vec<Phase> = job
            .spec
            .active_phases()
            .into_iter()
            .filter(|p| *p >= from)
            .collect();
        for phase in &phases {
            job.set_phase_status(*phase, PhaseStatus::Pending);
        }
        job.error = None;
        Ok(self.run_phases(job, &phases).await)
    }

    async fn run_phases(&self, job: &mut Job, phases: &[Phase]) -> JobState {
        job.state = JobState::Running;
        let mut skip_rest = false;

        for (index, phase) in phases.iter().copied().enumerate() {
            if skip_rest && job.spec.skippable.contains(&phase) {
                job.set_phase_status(phase, PhaseStatus::Skipped);
                continue;
            }

            let Some(cmd) = job.spec.phases.get(&phase).cloned() else {
                job.set_phase_status(phase, PhaseStatus::Skipped);
                continue;
            };

            job.current_phase = Some(phase);
            job.set_phase_status(phase, PhaseStatus::Running);
            self.emit(StreamEvent::phase_start(job.name(), phase)).await;

            let outcome = if self.options.dry_run && phase != Phase::Check {
                self.emit(StreamEvent::output(job.name(), "dry-run", OutputStream::Stdout))
                    .await;
                PhaseOutcome::Succeeded { no_updates: false }
            } else {
                self.run_phase(job, phase, &cmd).await
            };

            job.current_phase = None;
            job.set_live_pid(None);

            match outcome {
                PhaseOutcome::Succeeded { no_updates } => {
                    job.set_phase_status(phase, PhaseStatus::Succeeded);
                    job.exit_code = Some(0);
                    self.emit(StreamEvent::phase_end(job.name(), phase, true, None))
                        .await;
                    if phase == Phase::Check && no_updates {
                        skip_rest = true;
                    }
                }
                PhaseOutcome::Failed { exit_code, error } => {
                    job.set_phase_status(phase, PhaseStatus::Failed);
                    job.exit_code = Some(exit_code);
                    job.error = Some(error.clone());
                    self.emit(StreamEvent::phase_end(job.name(), phase, false, Some(error.clone())))
                        .await;
                    job.state = JobState::Failed;
                    self.emit(StreamEvent::completion(
                        job.name(),
                        false,
                        exit_code,
                        job.packages_updated,
                        Some(error),
                    ))
                    .await;
                    return job.state;
                }
                PhaseOutcome::TimedOut { seconds } => {
                    let error = format!("phase timed out after {seconds}s");
                    job.set_phase_status(phase, PhaseStatus::TimedOut);
                    job.error = Some(error.clone());
                    self.emit(StreamEvent::phase_end(job.name(), phase, false, Some(error.clone())))
                        .await;
                    job.state = JobState::Failed;
                    self.emit(StreamEvent::completion(
                        job.name(),
                        false,
                        job.exit_code.unwrap_or(-1),
                        job.packages_updated,
                        Some(error),
                    ))
                    .await;
                    return job.state;
                }
                PhaseOutcome::Cancelled => {
                    return self.finish_cancelled(job, phase).await;
                }
            }

            // Hold between phases when the run is paused; a UI action
            // releases the gate.
            let more_phases = index + 1 < phases.len();
            if self.options.pause_between_phases && more_phases && !skip_rest {
                self.emit(StreamEvent::Progress {
                    plugin: job.name().to_string(),
                    timestamp: chrono::Utc::now(),
                    phase,
                    percent: None,
                    message: Some("paused".into()),
                    bytes_downloaded: None,
                    bytes_total: None,
                    items_done: None,
                    items_total: None,
                })
                .await;
                let gate = job.continue_gate.clone();
                tokio::select! {
                    _ = gate.notified() => {}
                    _ = self.cancel.cancelled() => {
                        return self.finish_cancelled(job, phase).await;
                    }
                }
            }
        }

        job.state = if job.all_phases_ok() {
            JobState::Done
        } else {
            JobState::Failed
        };
        let success = job.state == JobState::Done;
        self.emit(StreamEvent::completion(
            job.name(),
            success,
            job.exit_code.unwrap_or(0),
            job.packages_updated,
            job.error.clone(),
        ))
        .await;
        job.state
    }

    /// Run one phase to completion on a fresh PTY.
    async fn run_phase(&self, job: &mut Job, phase: Phase, cmd: &upkeep_core::PhaseCommand) -> PhaseOutcome {
        let timeout = cmd.effective_timeout();
        let deadline = Instant::now() + timeout;

        // The UI's latest terminal size wins over the runner default.
        let (cols, rows) = *job.resize_rx.borrow();
        let (cols, rows) = if cols == 0 || rows == 0 {
            (self.pty_cols, self.pty_rows)
        } else {
            (cols, rows)
        };
        let mut session = match PtySession::open(
            &cmd.command,
            &SessionOptions::with_size(cols, rows),
        ) {
            Ok(session) => session,
            Err(e) => {
                return PhaseOutcome::Failed {
                    exit_code: -1,
                    error: e.to_string(),
                };
            }
        };
        job.set_live_pid(session.pid());
        debug!(plugin = job.name(), %phase, pid = job.pty_pid, "phase started");

        let mut lines = LineAssembler::default();
        let mut last_data = Instant::now();
        let mut no_updates = false;
        let mut items_seen: u64 = 0;

        loop {
            if Instant::now() >= deadline {
                let _ = session.close().await;
                return PhaseOutcome::TimedOut {
                    seconds: timeout.as_secs(),
                };
            }

            let read = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = session.close().await;
                    return PhaseOutcome::Cancelled;
                }
                input = job.input_rx.recv() => {
                    if let Some(bytes) = input {
                        let _ = session.write(&bytes).await;
                    }
                    continue;
                }
                changed = job.resize_rx.changed() => {
                    if changed.is_ok() {
                        let (cols, rows) = *job.resize_rx.borrow_and_update();
                        let _ = session.resize(cols, rows);
                    }
                    continue;
                }
                read = session.read(READ_POLL) => read,
            };

            match read {
                Ok(bytes) => {
                    last_data = Instant::now();
                    for line in lines.push(&bytes) {
                        self.handle_line(job, phase, &line, &mut no_updates, &mut items_seen)
                            .await;
                    }
                }
                Err(RunnerError::ReadTimedOut) => {
                    if last_data.elapsed() >= self.stall_after {
                        last_data = Instant::now();
                        self.emit(StreamEvent::Progress {
                            plugin: job.name().to_string(),
                            timestamp: chrono::Utc::now(),
                            phase,
                            percent: None,
                            message: Some("stalled".into()),
                            bytes_downloaded: None,
                            bytes_total: None,
                            items_done: None,
                            items_total: None,
                        })
                        .await;
                    }
                }
                Err(RunnerError::Eof) => break,
                Err(e) => {
                    let _ = session.close().await;
                    return PhaseOutcome::Failed {
                        exit_code: -1,
                        error: e.to_string(),
                    };
                }
            }
        }

        if let Some(line) = lines.flush() {
            self.handle_line(job, phase, &line, &mut no_updates, &mut items_seen)
                .await;
        }

        let exit_code = match session.wait(Some(Duration::from_secs(5))).await {
            Ok(code) => code,
            Err(_) => {
                let _ = session.close().await;
                return PhaseOutcome::Failed {
                    exit_code: -1,
                    error: "child did not exit after closing its terminal".into(),
                };
            }
        };
        let _ = session.close().await;

        if phase == Phase::Execute {
            job.packages_updated = job.packages_updated.max(items_seen);
        }

        if exit_code == 0 {
            PhaseOutcome::Succeeded { no_updates }
        } else {
            PhaseOutcome::Failed {
                exit_code,
                error: format!("exited with code {exit_code}"),
            }
        }
    }

    /// Emit the Progress or Output event for one assembled line.
    async fn handle_line(
        &self,
        job: &Job,
        phase: Phase,
        line: &str,
        no_updates: &mut bool,
        items_seen: &mut u64,
    ) {
        if let Some(update) = parse_sentinel(line) {
            if phase == Phase::Check && update.items_total == Some(0) {
                *no_updates = true;
            }
            if let Some(done) = update.items_completed {
                *items_seen = (*items_seen).max(done);
            }
            self.emit(StreamEvent::Progress {
                plugin: job.name().to_string(),
                timestamp: chrono::Utc::now(),
                phase: update.phase.unwrap_or(phase),
                percent: update.percent,
                message: update.message,
                bytes_downloaded: update.bytes_downloaded,
                bytes_total: update.bytes_total,
                items_done: update.items_completed,
                items_total: update.items_total,
            })
            .await;
        } else {
            self.emit(StreamEvent::output(job.name(), line, OutputStream::Stdout))
                .await;
        }
    }

    async fn finish_cancelled(&self, job: &mut Job, phase: Phase) -> JobState {
        job.set_phase_status(phase, PhaseStatus::Cancelled);
        job.error = Some("cancelled".into());
        job.state = JobState::Cancelled;
        self.emit(StreamEvent::phase_end(
            job.name(),
            phase,
            false,
            Some("cancelled".into()),
        ))
        .await;
        self.emit(StreamEvent::completion(
            job.name(),
            false,
            job.exit_code.unwrap_or(-1),
            job.packages_updated,
            Some("cancelled".into()),
        ))
        .await;
        job.state
    }

    async fn emit(&self, event: StreamEvent) {
        // A closed receiver means the run is shutting down; events are
        // ephemeral, so the loss is acceptable.
        let _ = self.events.send(event).await;
    }
}

/// Splits a byte stream into complete lines, tolerating chunks that cut
/// through UTF-8 sequences or line endings.
#[derive(Debug, Default)]
struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    /// Append a chunk and return the lines it completed.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Return the trailing partial line, if any.
    fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(line)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use upkeep_core::{PhaseCommand, PluginSpec, event_channel};

    fn sh_plugin(name: &str, check: &str, execute: &str) -> PluginSpec {
        PluginSpec::new(name)
            .phase(
                Phase::Check,
                PhaseCommand::new(["/bin/sh", "-c", check]),
            )
            .phase(
                Phase::Execute,
                PhaseCommand::new(["/bin/sh", "-c", execute]),
            )
    }

    fn runner(options: RunOptions) -> (PhaseRunner, upkeep_core::EventReceiver) {
        let (tx, rx) = event_channel(256);
        (
            PhaseRunner::new(options, tx, CancellationToken::new()),
            rx,
        )
    }

    async fn drain(mut rx: upkeep_core::EventReceiver) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) =
            tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
        {
            match event {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    #[test]
    fn line_assembler_splits_chunks() {
        let mut lines = LineAssembler::default();
        assert!(lines.push(b"hel").is_empty());
        assert_eq!(lines.push(b"lo\nwor"), vec!["hello".to_string()]);
        assert_eq!(lines.push(b"ld\r\n"), vec!["world".to_string()]);
        assert_eq!(lines.flush(), None);
    }

    #[test]
    fn line_assembler_flushes_partial_tail() {
        let mut lines = LineAssembler::default();
        lines.push(b"no newline");
        assert_eq!(lines.flush(), Some("no newline".to_string()));
    }

    #[tokio::test]
    async fn successful_two_phase_run() {
        let (runner, rx) = runner(RunOptions::default());
        let mut job = Job::new(sh_plugin("apt", "echo checking", "echo upgrading"));

        let state = runner.run(&mut job).await;
        assert_eq!(state, JobState::Done);
        assert_eq!(job.phase_status(Phase::Check), PhaseStatus::Succeeded);
        assert_eq!(job.phase_status(Phase::Execute), PhaseStatus::Succeeded);

        let events = drain(rx).await;
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                StreamEvent::PhaseStart { .. } => "start",
                StreamEvent::PhaseEnd { .. } => "end",
                StreamEvent::Output { .. } => "out",
                StreamEvent::Progress { .. } => "progress",
                StreamEvent::Completion { .. } => "done",
            })
            .collect();
        assert_eq!(kinds, vec!["start", "out", "end", "start", "out", "end", "done"]);
    }

    #[tokio::test]
    async fn failed_check_stops_the_sequence() {
        let (runner, rx) = runner(RunOptions::default());
        let mut job = Job::new(sh_plugin("apt", "exit 7", "echo never"));

        let state = runner.run(&mut job).await;
        assert_eq!(state, JobState::Failed);
        assert_eq!(job.phase_status(Phase::Check), PhaseStatus::Failed);
        assert_eq!(job.phase_status(Phase::Execute), PhaseStatus::Pending);
        assert_eq!(job.exit_code, Some(7));

        let events = drain(rx).await;
        let completion = events.last().unwrap();
        assert!(matches!(
            completion,
            StreamEvent::Completion {
                success: false,
                exit_code: 7,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn check_reporting_no_updates_skips_remaining_phases() {
        let (runner, _rx) = runner(RunOptions::default());
        let mut spec = sh_plugin(
            "snap",
            r#"echo 'PROGRESS:{"phase":"check","items_total":0}'"#,
            "echo never",
        );
        spec.skippable = vec![Phase::Download, Phase::Execute];
        let mut job = Job::new(spec);

        let state = runner.run(&mut job).await;
        assert_eq!(state, JobState::Done);
        assert_eq!(job.phase_status(Phase::Check), PhaseStatus::Succeeded);
        assert_eq!(job.phase_status(Phase::Execute), PhaseStatus::Skipped);
    }

    #[tokio::test]
    async fn progress_sentinels_become_progress_events() {
        let (runner, rx) = runner(RunOptions::default());
        let mut job = Job::new(sh_plugin(
            "apt",
            "echo ok",
            r#"echo 'PROGRESS:{"phase":"execute","percent":50,"items_completed":4,"items_total":8}'"#,
        ));

        let state = runner.run(&mut job).await;
        assert_eq!(state, JobState::Done);
        assert_eq!(job.packages_updated, 4);

        let events = drain(rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::Progress {
                percent: Some(p),
                items_done: Some(4),
                ..
            } if (*p - 50.0).abs() < f64::EPSILON
        )));
    }

    #[tokio::test]
    async fn dry_run_fabricates_execute_output() {
        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let (runner, rx) = runner(options);
        let mut job = Job::new(sh_plugin("apt", "echo checking", "echo real-upgrade"));

        let state = runner.run(&mut job).await;
        assert_eq!(state, JobState::Done);

        let events = drain(rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::Output { line, .. } if line == "dry-run"
        )));
        assert!(!events.iter().any(|e| matches!(
            e,
            StreamEvent::Output { line, .. } if line.contains("real-upgrade")
        )));
    }

    #[tokio::test]
    async fn phase_timeout_kills_the_child() {
        let (tx, rx) = event_channel(256);
        let runner = PhaseRunner::new(RunOptions::default(), tx, CancellationToken::new());
        let spec = PluginSpec::new("slow").phase(
            Phase::Check,
            PhaseCommand::new(["/bin/sh", "-c", "sleep 30"]).timeout(Duration::from_secs(1)),
        );
        let mut job = Job::new(spec);

        let started = Instant::now();
        let state = runner.run(&mut job).await;
        assert_eq!(state, JobState::Failed);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(job.phase_status(Phase::Check), PhaseStatus::TimedOut);
        assert_eq!(job.error.as_deref(), Some("phase timed out after 1s"));

        let events = drain(rx).await;
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::Completion { success: false, .. }
        ));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_running_phase() {
        let (tx, rx) = event_channel(256);
        let cancel = CancellationToken::new();
        let runner = PhaseRunner::new(RunOptions::default(), tx, cancel.clone());
        let mut job = Job::new(sh_plugin("slow", "sleep 30", "echo never"));

        let handle = tokio::spawn(async move {
            let state = runner.run(&mut job).await;
            (state, job)
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let (state, job) = handle.await.unwrap();

        assert_eq!(state, JobState::Cancelled);
        assert_eq!(job.phase_status(Phase::Check), PhaseStatus::Cancelled);
        assert_eq!(job.error.as_deref(), Some("cancelled"));

        let events = drain(rx).await;
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::Completion {
                success: false,
                error: Some(e),
                ..
            } if e == "cancelled"
        ));
    }

    #[tokio::test]
    async fn retry_reenters_at_the_failed_phase() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ready");
        let script = format!(
            "test -e {} && echo recovered || exit 9",
            marker.display()
        );
        let (runner, _rx) = runner(RunOptions::default());
        let mut job = Job::new(sh_plugin("flaky", "echo ok", &script));

        let state = runner.run(&mut job).await;
        assert_eq!(state, JobState::Failed);
        assert_eq!(job.failed_phase(), Some(Phase::Execute));

        std::fs::write(&marker, b"").unwrap();
        let state = runner.retry(&mut job).await.unwrap();
        assert_eq!(state, JobState::Done);
        assert_eq!(job.phase_status(Phase::Execute), PhaseStatus::Succeeded);
    }

    #[tokio::test]
    async fn pause_between_phases_waits_for_the_gate() {
        let options = RunOptions {
            pause_between_phases: true,
            ..RunOptions::default()
        };
        let (runner, rx) = runner(options);
        let mut job = Job::new(sh_plugin("apt", "echo one", "echo two"));
        let gate = job.continue_gate.clone();

        let handle = tokio::spawn(async move {
            let state = runner.run(&mut job).await;
            (state, job)
        });

        // The runner must be holding at the gate, not finishing.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!handle.is_finished());

        gate.notify_one();
        let (state, job) = handle.await.unwrap();
        assert_eq!(state, JobState::Done);
        assert_eq!(job.phase_status(Phase::Execute), PhaseStatus::Succeeded);

        let events = drain(rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::Progress { message: Some(m), .. } if m == "paused"
        )));
    }

    #[tokio::test]
    async fn retry_without_failure_is_rejected() {
        let (runner, _rx) = runner(RunOptions::default());
        let mut job = Job::new(sh_plugin("apt", "echo ok", "echo ok"));
        let state = runner.run(&mut job).await;
        assert_eq!(state, JobState::Done);
        assert!(runner.retry(&mut job).await.is_err());
    }
}
