//! upkeep: concurrent package-manager updates under a tabbed terminal UI.
//!
//! The binary wires the pieces together: configuration and CLI parsing,
//! the orchestrator run, the batched event fan-out into per-plugin tabs,
//! keystroke routing, and the end-of-run summary.

pub mod app;
pub mod cli;
pub mod summary;
pub mod ui;

pub use app::{App, AppFlow};
pub use cli::Cli;
