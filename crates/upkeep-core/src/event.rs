//! Stream events emitted by running jobs.
//!
//! Every event carries the plugin name and a UTC timestamp so downstream
//! consumers (tabs, metrics, the persisted log) can route and order events
//! without extra context. The serialized form is stable and omits unset
//! optional fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// An event produced by a job's phase runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A line of child-process output.
    Output {
        /// Plugin that produced the line.
        plugin: String,
        /// When the line was read.
        timestamp: DateTime<Utc>,
        /// The output line, without its trailing newline.
        line: String,
        /// Which stream the line came from.
        stream: OutputStream,
    },

    /// A structured progress update parsed from a sentinel line.
    Progress {
        /// Plugin reporting progress.
        plugin: String,
        /// When the update was parsed.
        timestamp: DateTime<Utc>,
        /// Phase the progress applies to.
        phase: Phase,
        /// Completion percentage, 0..=100.
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f64>,
        /// Human-readable progress message.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Bytes downloaded so far.
        #[serde(skip_serializing_if = "Option::is_none")]
        bytes_downloaded: Option<u64>,
        /// Total bytes to download.
        #[serde(skip_serializing_if = "Option::is_none")]
        bytes_total: Option<u64>,
        /// Items completed so far.
        #[serde(skip_serializing_if = "Option::is_none")]
        items_done: Option<u64>,
        /// Total items.
        #[serde(skip_serializing_if = "Option::is_none")]
        items_total: Option<u64>,
    },

    /// A phase has started.
    PhaseStart {
        /// Plugin entering the phase.
        plugin: String,
        /// When the phase started.
        timestamp: DateTime<Utc>,
        /// The phase that started.
        phase: Phase,
    },

    /// A phase has ended.
    PhaseEnd {
        /// Plugin leaving the phase.
        plugin: String,
        /// When the phase ended.
        timestamp: DateTime<Utc>,
        /// The phase that ended.
        phase: Phase,
        /// Whether the phase succeeded.
        success: bool,
        /// Error message when the phase failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The job has finished all phases (or aborted).
    Completion {
        /// Plugin that completed.
        plugin: String,
        /// When the job completed.
        timestamp: DateTime<Utc>,
        /// Whether every non-skipped phase succeeded.
        success: bool,
        /// Exit code of the last phase that ran.
        exit_code: i32,
        /// Number of packages the job updated.
        packages_updated: u64,
        /// Error message when the job failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl StreamEvent {
    /// The plugin this event belongs to.
    pub fn plugin(&self) -> &str {
        match self {
            StreamEvent::Output { plugin, .. }
            | StreamEvent::Progress { plugin, .. }
            | StreamEvent::PhaseStart { plugin, .. }
            | StreamEvent::PhaseEnd { plugin, .. }
            | StreamEvent::Completion { plugin, .. } => plugin,
        }
    }

    /// When the event was produced.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            StreamEvent::Output { timestamp, .. }
            | StreamEvent::Progress { timestamp, .. }
            | StreamEvent::PhaseStart { timestamp, .. }
            | StreamEvent::PhaseEnd { timestamp, .. }
            | StreamEvent::Completion { timestamp, .. } => *timestamp,
        }
    }

    /// Build an output event stamped with the current time.
    pub fn output(plugin: impl Into<String>, line: impl Into<String>, stream: OutputStream) -> Self {
        StreamEvent::Output {
            plugin: plugin.into(),
            timestamp: Utc::now(),
            line: line.into(),
            stream,
        }
    }

    /// Build a phase-start event stamped with the current time.
    pub fn phase_start(plugin: impl Into<String>, phase: Phase) -> Self {
        StreamEvent::PhaseStart {
            plugin: plugin.into(),
            timestamp: Utc::now(),
            phase,
        }
    }

    /// Build a phase-end event stamped with the current time.
    pub fn phase_end(
        plugin: impl Into<String>,
        phase: Phase,
        success: bool,
        error: Option<String>,
    ) -> Self {
        StreamEvent::PhaseEnd {
            plugin: plugin.into(),
            timestamp: Utc::now(),
            phase,
            success,
            error,
        }
    }

    /// Build a completion event stamped with the current time.
    pub fn completion(
        plugin: impl Into<String>,
        success: bool,
        exit_code: i32,
        packages_updated: u64,
        error: Option<String>,
    ) -> Self {
        StreamEvent::Completion {
            plugin: plugin.into(),
            timestamp: Utc::now(),
            success,
            exit_code,
            packages_updated,
            error,
        }
    }
}

/// Which child stream an output line came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Standard output (the PTY merges both streams; stderr is only seen
    /// when a plugin pipes it separately).
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
}

/// Sender half of a job event channel.
pub type EventSender = tokio::sync::mpsc::Sender<StreamEvent>;

/// Receiver half of a job event channel.
pub type EventReceiver = tokio::sync::mpsc::Receiver<StreamEvent>;

/// Create a new event channel with the given buffer size.
pub fn event_channel(buffer: usize) -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::channel(buffer)
}
