//! Error types for upkeep-runner.

use std::io;

use upkeep_core::{GraphError, MutexError, Phase, UpkeepCoreError};

/// Error type for runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The child process could not be spawned.
    #[error("spawn failed: {reason}")]
    SpawnFailed {
        /// OS-level failure description.
        reason: String,
    },

    /// A PTY read deadline elapsed with no data.
    #[error("read timed out")]
    ReadTimedOut,

    /// The child closed its side of the PTY.
    #[error("end of PTY stream")]
    Eof,

    /// A wait deadline elapsed before the child exited.
    #[error("wait timed out")]
    WaitTimedOut,

    /// A phase exceeded its configured timeout.
    #[error("phase timed out after {seconds}s")]
    PhaseTimeout {
        /// The phase that timed out.
        phase: Phase,
        /// The configured timeout in seconds.
        seconds: u64,
    },

    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The session is already closed.
    #[error("session closed")]
    SessionClosed,

    /// Signal delivery failed.
    #[error("signal delivery failed: {0}")]
    Signal(String),

    /// Dependency graph validation failed; aborts the run before any job
    /// starts.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The mutex registry is unusable; fatal.
    #[error(transparent)]
    Mutex(#[from] MutexError),

    /// Core domain error.
    #[error(transparent)]
    Core(#[from] UpkeepCoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A background task failed to join.
    #[error("task join error: {0}")]
    Join(String),
}

impl RunnerError {
    /// Whether this error is a configuration problem that should abort
    /// the run with exit code 2.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RunnerError::Graph(_)
                | RunnerError::Core(UpkeepCoreError::Graph(_))
                | RunnerError::Core(UpkeepCoreError::UnknownPlugin(_))
                | RunnerError::Core(UpkeepCoreError::InvalidPlugin { .. })
        )
    }
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_timeout_display() {
        let err = RunnerError::PhaseTimeout {
            phase: Phase::Execute,
            seconds: 30,
        };
        assert_eq!(err.to_string(), "phase timed out after 30s");
    }

    #[test]
    fn graph_error_is_config_error() {
        let err = RunnerError::Graph(GraphError::SelfDep("apt".into()));
        assert!(err.is_config_error());
        assert!(!RunnerError::ReadTimedOut.is_config_error());
    }
}
