//! Update phases and per-phase status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One phase of a plugin's update sequence.
///
/// Plugins are driven at phase granularity: a cheap check for available
/// updates, an optional separate download, and the upgrade itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Query the package manager for pending updates.
    Check,
    /// Fetch packages without applying them.
    Download,
    /// Apply the updates.
    Execute,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 3] = [Phase::Check, Phase::Download, Phase::Execute];

    /// The label shown in tabs and used as the metrics-store key.
    pub fn display_name(self) -> &'static str {
        match self {
            Phase::Check => "Update",
            Phase::Download => "Download",
            Phase::Execute => "Upgrade",
        }
    }

    /// The wire name used in progress sentinels and event logs.
    pub fn wire_name(self) -> &'static str {
        match self {
            Phase::Check => "check",
            Phase::Download => "download",
            Phase::Execute => "execute",
        }
    }

    /// The phase that follows this one, if any.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Check => Some(Phase::Download),
            Phase::Download => Some(Phase::Execute),
            Phase::Execute => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Error returned when parsing an invalid phase name.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid phase: '{0}' (expected check, download, execute)")]
pub struct ParsePhaseError(String);

impl FromStr for Phase {
    type Err = ParsePhaseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "check" | "update" => Ok(Phase::Check),
            "download" => Ok(Phase::Download),
            "execute" | "upgrade" => Ok(Phase::Execute),
            other => Err(ParsePhaseError(other.to_string())),
        }
    }
}

/// Outcome status of one phase of one job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Completed with a zero exit code.
    Succeeded,
    /// Completed with a non-zero exit code or spawn failure.
    Failed,
    /// Not run because the check found nothing to do, or the plugin
    /// does not declare the phase.
    Skipped,
    /// Killed after exceeding its configured timeout.
    TimedOut,
    /// Interrupted by run cancellation.
    Cancelled,
}

impl PhaseStatus {
    /// Whether this status is terminal (the phase will not run again
    /// without an explicit retry).
    pub fn is_terminal(self) -> bool {
        !matches!(self, PhaseStatus::Pending | PhaseStatus::Running)
    }

    /// Whether this status counts as successful for completion purposes.
    /// Skipped phases do not fail a job.
    pub fn is_ok(self) -> bool {
        matches!(self, PhaseStatus::Succeeded | PhaseStatus::Skipped)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Succeeded => "succeeded",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::TimedOut => "timed out",
            PhaseStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names() {
        assert_eq!(Phase::Check.display_name(), "Update");
        assert_eq!(Phase::Download.display_name(), "Download");
        assert_eq!(Phase::Execute.display_name(), "Upgrade");
    }

    #[test]
    fn wire_names_round_trip() {
        for phase in Phase::ALL {
            assert_eq!(phase.wire_name().parse::<Phase>().ok(), Some(phase));
        }
    }

    #[test]
    fn parse_display_aliases() {
        assert_eq!("Upgrade".parse::<Phase>().ok(), Some(Phase::Execute));
        assert_eq!("update".parse::<Phase>().ok(), Some(Phase::Check));
    }

    #[test]
    fn parse_invalid() {
        assert!("install".parse::<Phase>().is_err());
    }

    #[test]
    fn phase_order() {
        assert_eq!(Phase::Check.next(), Some(Phase::Download));
        assert_eq!(Phase::Download.next(), Some(Phase::Execute));
        assert_eq!(Phase::Execute.next(), None);
    }

    #[test]
    fn status_terminality() {
        assert!(!PhaseStatus::Pending.is_terminal());
        assert!(!PhaseStatus::Running.is_terminal());
        assert!(PhaseStatus::Succeeded.is_terminal());
        assert!(PhaseStatus::TimedOut.is_terminal());
    }

    #[test]
    fn skipped_counts_as_ok() {
        assert!(PhaseStatus::Skipped.is_ok());
        assert!(PhaseStatus::Succeeded.is_ok());
        assert!(!PhaseStatus::Failed.is_ok());
        assert!(!PhaseStatus::Cancelled.is_ok());
    }

    #[test]
    fn serde_wire_format() {
        let json = serde_json::to_string(&Phase::Check).unwrap_or_default();
        assert_eq!(json, "\"check\"");
    }
}
