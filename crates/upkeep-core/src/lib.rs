//! upkeep-core: shared domain model for the upkeep update orchestrator.
//!
//! This crate holds the types shared between the execution runtime and the
//! terminal UI: update phases, the stream-event model, plugin descriptors,
//! the progress sentinel parser, the named mutex registry, the dependency
//! graph, and the run configuration file.

pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod mutex;
pub mod phase;
pub mod plugin;
pub mod progress;

pub use config::{Config, PluginConfig};
pub use error::{Result, UpkeepCoreError};
pub use event::{EventReceiver, EventSender, OutputStream, StreamEvent, event_channel};
pub use graph::{DependencyGraph, GraphError};
pub use mutex::{MutexError, MutexRegistry, NamedGuard};
pub use phase::{Phase, PhaseStatus};
pub use plugin::{DEFAULT_PHASE_TIMEOUT, PhaseCommand, PluginSpec, RunOptions};
pub use progress::{ProgressUpdate, parse_sentinel};
