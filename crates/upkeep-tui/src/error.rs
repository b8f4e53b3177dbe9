//! Error types for upkeep-tui.

use std::io;

/// Error type for terminal-UI operations.
#[derive(Debug, thiserror::Error)]
pub enum TuiError {
    /// Key-binding file or key string problem. Callers fall back to the
    /// default bindings.
    #[error("key binding error: {0}")]
    Binding(String),

    /// Terminal backend failure.
    #[error("terminal error: {0}")]
    Terminal(String),

    /// The event handler was used after shutdown.
    #[error("event handler stopped")]
    HandlerStopped,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for terminal-UI operations.
pub type Result<T> = std::result::Result<T, TuiError>;
