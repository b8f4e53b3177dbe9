//! Run orchestration.
//!
//! The orchestrator turns a set of plugin descriptors into a controlled
//! concurrent execution: it validates the dependency graph up front, then
//! repeatedly offers slots to the longest-waiting ready jobs, gates each
//! admission on its mutex set, and observes every completion before the
//! next dispatch round so no dependent starts ahead of its predecessor's
//! terminal state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use upkeep_core::{DependencyGraph, EventSender, MutexRegistry, PluginSpec, RunOptions};

use crate::error::{Result, RunnerError};
use crate::job::{Job, JobState};
use crate::runner::PhaseRunner;

/// Final record for one plugin after the run.
#[derive(Clone, Debug)]
pub struct PluginOutcome {
    /// Plugin name.
    pub name: String,
    /// Terminal job state.
    pub state: JobState,
    /// Packages the job updated.
    pub packages_updated: u64,
    /// Wall time from dispatch to completion; zero for jobs that never
    /// ran.
    pub wall_time: Duration,
    /// Exit code of the last phase that ran.
    pub exit_code: Option<i32>,
    /// Retained error message.
    pub error: Option<String>,
}

/// Aggregate result of one orchestrator run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    /// Per-plugin outcomes in admission order.
    pub outcomes: Vec<PluginOutcome>,
    /// Jobs that finished with every phase ok.
    pub successful: usize,
    /// Jobs that failed or timed out.
    pub failed: usize,
    /// Jobs skipped (filtered out or blocked by a failed dependency).
    pub skipped: usize,
    /// Jobs interrupted by cancellation.
    pub cancelled: usize,
    /// Total run wall time.
    pub wall_time: Duration,
}

impl RunSummary {
    /// Whether every admitted job succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

/// Message sent by a finished runner task.
struct JobDone {
    job: Job,
    wall_time: Duration,
}

/// A UI request handled inside the scheduling loop.
enum Command {
    /// Re-admit a failed job, resuming at its failed phase.
    Retry(String),
}

/// Admission control, scheduling, and lifecycle for one run.
pub struct Orchestrator {
    specs: Vec<PluginSpec>,
    options: RunOptions,
    registry: Arc<MutexRegistry>,
    cancel: CancellationToken,
    gates: Arc<StdMutex<HashMap<String, Arc<Notify>>>>,
    inputs: Arc<StdMutex<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>>,
    resizes: Arc<StdMutex<HashMap<String, watch::Sender<(u16, u16)>>>>,
    pids: Arc<StdMutex<HashMap<String, Arc<AtomicU32>>>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: StdMutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl Orchestrator {
    /// Create an orchestrator for a plugin set.
    pub fn new(specs: Vec<PluginSpec>, options: RunOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            specs,
            options: options.normalized(),
            registry: Arc::new(MutexRegistry::new()),
            cancel: CancellationToken::new(),
            gates: Arc::new(StdMutex::new(HashMap::new())),
            inputs: Arc::new(StdMutex::new(HashMap::new())),
            resizes: Arc::new(StdMutex::new(HashMap::new())),
            pids: Arc::new(StdMutex::new(HashMap::new())),
            cmd_tx,
            cmd_rx: StdMutex::new(Some(cmd_rx)),
        }
    }

    /// The token that cancels the whole run. Cancelling it propagates to
    /// every runner, which terminates its PTY and reports a cancelled
    /// completion.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The shared mutex registry, exposed for inspection in tests.
    pub fn registry(&self) -> Arc<MutexRegistry> {
        Arc::clone(&self.registry)
    }

    /// Release the pause gate of one job so its runner starts the next
    /// phase. No-op for unknown names.
    pub fn release_pause(&self, plugin: &str) {
        if let Ok(gates) = self.gates.lock() {
            if let Some(gate) = gates.get(plugin) {
                gate.notify_one();
            }
        }
    }

    /// Forward keystrokes to a job's live PTY. Bytes sent while the job
    /// has no open session are delivered when the next phase starts.
    pub fn write_input(&self, plugin: &str, bytes: Vec<u8>) {
        if let Ok(inputs) = self.inputs.lock() {
            if let Some(tx) = inputs.get(plugin) {
                let _ = tx.send(bytes);
            }
        }
    }

    /// Ask the scheduler to retry a failed job from its failed phase.
    /// Ignored for jobs that are not in the Failed state.
    pub fn retry(&self, plugin: &str) {
        let _ = self.cmd_tx.send(Command::Retry(plugin.to_string()));
    }

    /// Pid of a job's live PTY child, if one is open right now. The UI
    /// uses this to rebind the tab's metrics collector across phase
    /// transitions.
    pub fn pty_pid(&self, plugin: &str) -> Option<u32> {
        let pids = self.pids.lock().ok()?;
        let pid = pids.get(plugin)?.load(Ordering::Relaxed);
        (pid != 0).then_some(pid)
    }

    /// Propagate a terminal resize to every job. Live PTYs change size
    /// immediately (the kernel raises SIGWINCH in the child); future
    /// phases open at the new size.
    pub fn resize_all(&self, cols: u16, rows: u16) {
        if let Ok(resizes) = self.resizes.lock() {
            for tx in resizes.values() {
                let _ = tx.send((cols, rows));
            }
        }
    }

    /// Execute the run to completion.
    ///
    /// Dependency validation runs first; a graph error aborts before any
    /// job starts. Events from all runners are interleaved onto `events`
    /// with per-job production order preserved.
    ///
    /// # Errors
    ///
    /// Returns a [`RunnerError::Graph`] (configuration error) when the
    /// dependency DAG is invalid, or [`RunnerError::Mutex`] if the lock
    /// registry is poisoned.
    pub async fn run(&self, events: EventSender) -> Result<RunSummary> {
        let started = Instant::now();
        let graph = DependencyGraph::new(
            self.specs
                .iter()
                .map(|s| (s.name.clone(), s.depends_on.clone())),
        )
        .map_err(RunnerError::Graph)?;

        let mut jobs: BTreeMap<String, Job> = BTreeMap::new();
        let mut waiting: Vec<String> = Vec::new();
        if let Ok(mut gates) = self.gates.lock() {
            gates.clear();
        }
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.clear();
        }
        for spec in &self.specs {
            let mut job = Job::new(spec.clone());
            job.state = JobState::Waiting;
            if let Ok(mut gates) = self.gates.lock() {
                gates.insert(spec.name.clone(), job.continue_gate.clone());
            }
            if let Ok(mut inputs) = self.inputs.lock() {
                inputs.insert(spec.name.clone(), job.input_tx.clone());
            }
            if let Ok(mut resizes) = self.resizes.lock() {
                resizes.insert(spec.name.clone(), job.resize_tx.clone());
            }
            if let Ok(mut pids) = self.pids.lock() {
                pids.insert(spec.name.clone(), Arc::clone(&job.pid_cell));
            }
            waiting.push(spec.name.clone());
            jobs.insert(spec.name.clone(), job);
        }

        let mut cmd_rx = self
            .cmd_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .unwrap_or_else(|| mpsc::unbounded_channel().1);

        let (done_tx, mut done_rx) = mpsc::channel::<JobDone>(self.specs.len().max(1));
        let mut running = 0usize;
        let mut done_for_deps: BTreeSet<String> = BTreeSet::new();
        let mut wall_times: BTreeMap<String, Duration> = BTreeMap::new();

        loop {
            if self.cancel.is_cancelled() {
                // Stop admitting; everything still waiting is cancelled.
                for name in waiting.drain(..) {
                    if let Some(job) = jobs.get_mut(&name) {
                        job.state = JobState::Cancelled;
                        job.error = Some("cancelled".into());
                    }
                }
            } else {
                self.mark_blocked(&graph, &mut jobs, &mut waiting, &done_for_deps);
                self.dispatch(
                    &graph,
                    &mut jobs,
                    &mut waiting,
                    &done_for_deps,
                    &mut running,
                    &events,
                    &done_tx,
                )?;
            }

            if running == 0 {
                if waiting.is_empty() {
                    break;
                }
                // Nothing is running yet jobs are still waiting: they are
                // all blocked or the run was cancelled; the next iteration
                // resolves them.
                continue;
            }

            tokio::select! {
                done = done_rx.recv() => {
                    let Some(JobDone { job, wall_time }) = done else { break };
                    running -= 1;
                    let name = job.name().to_string();
                    debug!(plugin = %name, state = %job.state, "job completed");

                    let counts_as_done = job.state == JobState::Done
                        || (self.options.continue_on_error && job.state == JobState::Failed);
                    if counts_as_done {
                        done_for_deps.insert(name.clone());
                    }
                    wall_times.insert(name.clone(), wall_time);
                    jobs.insert(name, job);
                }
                Some(command) = cmd_rx.recv() => match command {
                    Command::Retry(name) => {
                        let retryable = jobs
                            .get(&name)
                            .map(|j| j.state == JobState::Failed && j.failed_phase().is_some())
                            .unwrap_or(false);
                        if retryable && !waiting.contains(&name) {
                            debug!(plugin = %name, "retry requested");
                            if let Some(job) = jobs.get_mut(&name) {
                                job.state = JobState::Waiting;
                            }
                            done_for_deps.remove(&name);
                            waiting.push(name);
                        }
                    }
                },
            }
        }

        Ok(self.summarize(jobs, wall_times, started.elapsed()))
    }

    /// Mark waiting jobs that can never become ready as skipped.
    ///
    /// A job is permanently blocked once any dependency reached a
    /// terminal state that does not count as done. Blocking cascades, so
    /// this iterates to a fixpoint.
    fn mark_blocked(
        &self,
        graph: &DependencyGraph,
        jobs: &mut BTreeMap<String, Job>,
        waiting: &mut Vec<String>,
        done_for_deps: &BTreeSet<String>,
    ) {
        loop {
            let mut blocked: Option<(String, String)> = None;
            'scan: for name in waiting.iter() {
                for dep in graph.deps_of(name) {
                    let dep_terminal = jobs
                        .get(dep)
                        .map(|j| j.state.is_terminal())
                        .unwrap_or(false);
                    if dep_terminal && !done_for_deps.contains(dep) {
                        blocked = Some((name.clone(), dep.to_string()));
                        break 'scan;
                    }
                }
            }
            let Some((name, dep)) = blocked else { break };
            warn!(plugin = %name, dependency = %dep, "skipping job: dependency did not succeed");
            waiting.retain(|n| n != &name);
            if let Some(job) = jobs.get_mut(&name) {
                job.state = JobState::Skipped;
                job.error = Some(format!("dependency '{dep}' did not succeed"));
            }
        }
    }

    /// Offer slots to ready jobs, longest-waiting first.
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        graph: &DependencyGraph,
        jobs: &mut BTreeMap<String, Job>,
        waiting: &mut Vec<String>,
        done_for_deps: &BTreeSet<String>,
        running: &mut usize,
        events: &EventSender,
        done_tx: &mpsc::Sender<JobDone>,
    ) -> Result<()> {
        let mut admitted = Vec::new();
        for name in waiting.iter() {
            if *running + admitted.len() >= self.options.max_concurrent {
                break;
            }
            let deps_met = graph.deps_of(name).all(|d| done_for_deps.contains(d));
            if !deps_met {
                continue;
            }
            let Some(job) = jobs.get(name) else { continue };
            let Some(guard) = self.registry.try_acquire(&job.spec.all_mutexes())? else {
                // Mutex contention: stays waiting, keeps its queue slot.
                continue;
            };
            admitted.push((name.clone(), guard));
        }

        for (name, guard) in admitted {
            waiting.retain(|n| n != &name);
            let Some(mut job) = jobs.remove(&name) else { continue };
            // A failed job re-admitted by a retry resumes at its failed
            // phase; everything else starts from the top.
            let is_retry = job.failed_phase().is_some();
            job.state = JobState::Running;
            *running += 1;
            debug!(plugin = %name, retry = is_retry, "job dispatched");

            let runner = PhaseRunner::new(
                self.options.clone(),
                events.clone(),
                self.cancel.child_token(),
            );
            let done_tx = done_tx.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let _guard = guard;
                if is_retry {
                    let _ = runner.retry(&mut job).await;
                } else {
                    runner.run(&mut job).await;
                }
                let _ = done_tx
                    .send(JobDone {
                        job,
                        wall_time: started.elapsed(),
                    })
                    .await;
            });
        }
        Ok(())
    }

    fn summarize(
        &self,
        jobs: BTreeMap<String, Job>,
        wall_times: BTreeMap<String, Duration>,
        wall_time: Duration,
    ) -> RunSummary {
        let mut summary = RunSummary {
            wall_time,
            ..RunSummary::default()
        };
        for spec in &self.specs {
            let Some(job) = jobs.get(&spec.name) else { continue };
            match job.state {
                JobState::Done => summary.successful += 1,
                JobState::Failed => summary.failed += 1,
                JobState::Skipped => summary.skipped += 1,
                JobState::Cancelled => summary.cancelled += 1,
                _ => {}
            }
            summary.outcomes.push(PluginOutcome {
                name: spec.name.clone(),
                state: job.state,
                packages_updated: job.packages_updated,
                wall_time: wall_times.get(&spec.name).copied().unwrap_or_default(),
                exit_code: job.exit_code,
                error: job.error.clone(),
            });
        }
        summary
    }
}
