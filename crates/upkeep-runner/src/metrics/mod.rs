//! Metrics pipeline: a snapshot-owning store and short-lived process
//! collectors that feed it.

pub mod collector;
pub mod store;

pub use collector::{MetricsCollector, PhaseMetrics};
pub use store::{AccumulatedMetrics, MetricsStore, PhaseSnapshot, PhaseStats};
