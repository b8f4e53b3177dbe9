//! Error types for upkeep-core.

use std::io;

use crate::graph::GraphError;

/// Error type for core domain operations.
#[derive(Debug, thiserror::Error)]
pub enum UpkeepCoreError {
    /// Dependency graph validation failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Configuration file I/O error.
    #[error("config I/O error: {0}")]
    ConfigIo(io::Error),

    /// Configuration file parse error.
    #[error("config parse error: {0}")]
    ConfigParse(toml::de::Error),

    /// A plugin named in the configuration or on the command line does
    /// not exist.
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    /// A plugin descriptor is malformed.
    #[error("invalid plugin '{plugin}': {reason}")]
    InvalidPlugin {
        /// The plugin in question.
        plugin: String,
        /// Why it was rejected.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, UpkeepCoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_plugin_display() {
        let err = UpkeepCoreError::UnknownPlugin("texlive".into());
        assert_eq!(err.to_string(), "unknown plugin: texlive");
    }

    #[test]
    fn io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: UpkeepCoreError = io_err.into();
        assert!(matches!(err, UpkeepCoreError::Io(_)));
    }
}
