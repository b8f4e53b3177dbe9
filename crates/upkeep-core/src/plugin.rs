//! Plugin descriptors and run options.
//!
//! A plugin is described entirely by data: the commands to run per phase,
//! the mutexes each phase needs, timeouts, and dependencies on other
//! plugins. The orchestrator never calls into plugin-specific code.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Default per-phase timeout when neither the descriptor nor the config
/// overrides it.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(1800);

/// The command a plugin runs for one phase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCommand {
    /// Argument vector; the first element is the program.
    pub command: Vec<String>,
    /// Named mutexes that must be held while the phase runs.
    #[serde(default)]
    pub mutexes: Vec<String>,
    /// Timeout in seconds; falls back to [`DEFAULT_PHASE_TIMEOUT`].
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl PhaseCommand {
    /// Create a phase command from an argument vector.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            mutexes: Vec::new(),
            timeout_secs: None,
        }
    }

    /// Add a required mutex name.
    #[must_use]
    pub fn mutex(mut self, name: impl Into<String>) -> Self {
        self.mutexes.push(name.into());
        self
    }

    /// Set the phase timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    /// The effective timeout for this phase.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PHASE_TIMEOUT)
    }
}

/// A data-only description of one updatable component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Stable plugin name; used as the job key and tab title.
    pub name: String,
    /// Commands per phase, in execution order. A phase without an entry
    /// is skipped.
    pub phases: BTreeMap<Phase, PhaseCommand>,
    /// Names of plugins that must complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Phases that may be skipped when the check finds nothing to do.
    #[serde(default)]
    pub skippable: Vec<Phase>,
    /// Whether the plugin downloads packages in a separate phase before
    /// executing.
    #[serde(default)]
    pub separate_download: bool,
}

impl PluginSpec {
    /// Create a descriptor with no phases.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phases: BTreeMap::new(),
            depends_on: Vec::new(),
            skippable: Vec::new(),
            separate_download: false,
        }
    }

    /// Attach a phase command.
    #[must_use]
    pub fn phase(mut self, phase: Phase, command: PhaseCommand) -> Self {
        self.phases.insert(phase, command);
        self
    }

    /// Declare a dependency on another plugin.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// Enable the separate download phase.
    #[must_use]
    pub fn with_separate_download(mut self) -> Self {
        self.separate_download = true;
        self
    }

    /// Phases this plugin will actually run, in order. Download is only
    /// included when the plugin declares separate download support.
    pub fn active_phases(&self) -> Vec<Phase> {
        Phase::ALL
            .into_iter()
            .filter(|p| self.phases.contains_key(p))
            .filter(|p| *p != Phase::Download || self.separate_download)
            .collect()
    }

    /// Union of all mutex names across the plugin's phases.
    pub fn all_mutexes(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .phases
            .values()
            .flat_map(|c| c.mutexes.iter().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Global options for one orchestrator run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Maximum number of jobs in the Running state at once.
    pub max_concurrent: usize,
    /// When true, a failed plugin counts as done for dependency purposes
    /// instead of blocking its dependents.
    pub continue_on_error: bool,
    /// When true, Download/Execute are replaced by no-ops.
    pub dry_run: bool,
    /// When true, runners wait for a per-job continue signal between
    /// phases.
    pub pause_between_phases: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            continue_on_error: false,
            dry_run: false,
            pause_between_phases: false,
        }
    }
}

impl RunOptions {
    /// Clamp options into valid ranges; `max_concurrent` is at least 1.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_concurrent = self.max_concurrent.max(1);
        self
    }
}
