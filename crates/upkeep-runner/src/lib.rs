//! upkeep-runner: PTY-backed job execution for the upkeep orchestrator.
//!
//! This crate owns the asynchronous runtime pieces: PTY sessions and
//! their child processes, the multi-phase runner that drives one plugin
//! and emits its event stream, the orchestrator that schedules jobs under
//! a concurrency budget with mutex and dependency gating, and the metrics
//! store/collector pair whose snapshots outlive any single PTY.

pub mod error;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod pty;
pub mod runner;

pub use error::{Result, RunnerError};
pub use job::{Job, JobState};
pub use metrics::{
    AccumulatedMetrics, MetricsCollector, MetricsStore, PhaseMetrics, PhaseSnapshot, PhaseStats,
};
pub use orchestrator::{Orchestrator, PluginOutcome, RunSummary};
pub use pty::{PtySession, SessionOptions, TERM_GRACE};
pub use runner::PhaseRunner;
