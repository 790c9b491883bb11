//! Error types for the bucket mirror library

use std::path::PathBuf;

/// Result type alias for mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Comprehensive error type for mirror and prune passes
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Bad destination or configuration, raised before any work starts
    #[error("Configuration error at '{path}': {message}")]
    Configuration { path: PathBuf, message: String },

    /// Remote listing failed
    #[error("Listing error after marker '{marker}': {message}")]
    Listing { marker: String, message: String },

    /// Fetching one object failed
    #[error("Transfer error for '{key}' -> '{path}': {message}")]
    Transfer {
        key: String,
        path: PathBuf,
        message: String,
    },

    /// Object key that cannot be mapped below the mirror root
    #[error("Invalid object key '{key}': {message}")]
    InvalidKey { key: String, message: String },

    /// Walking the local tree failed
    #[error("Prune walk error at '{path}': {message}")]
    PruneWalk { path: PathBuf, message: String },

    /// Deleting a stray local file failed
    #[error("Prune delete error at '{path}': {message}")]
    PruneDelete { path: PathBuf, message: String },

    /// A fetch worker panicked or its queue went away
    #[error("Fetch worker error: {0}")]
    Worker(String),

    /// Engine driven out of order
    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    /// Encoding a report as JSON failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("Error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl MirrorError {
    /// Create a new configuration error
    pub fn configuration_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Configuration {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new listing error
    pub fn listing_error(marker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Listing {
            marker: marker.into(),
            message: message.into(),
        }
    }

    /// Create a new transfer error
    pub fn transfer_error(
        key: impl Into<String>,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transfer {
            key: key.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new invalid key error
    pub fn invalid_key(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new prune walk error
    pub fn walk_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PruneWalk {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new prune delete error
    pub fn deletion_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PruneDelete {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Short category name, used as a structured logging field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Listing { .. } => "listing",
            Self::Transfer { .. } => "transfer",
            Self::InvalidKey { .. } => "invalid_key",
            Self::PruneWalk { .. } => "prune_walk",
            Self::PruneDelete { .. } => "prune_delete",
            Self::Worker(_) => "worker",
            Self::InvalidState(_) => "invalid_state",
            Self::Serialization(_) => "serialization",
            Self::Generic(_) => "generic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_display() {
        let err = MirrorError::transfer_error("a/b.txt", "/mirror/a/b.txt", "connection reset");
        assert_eq!(
            err.to_string(),
            "Transfer error for 'a/b.txt' -> '/mirror/a/b.txt': connection reset"
        );
        assert_eq!(err.kind(), "transfer");
    }

    #[test]
    fn test_serialization_conversion() {
        let json = serde_json::from_str::<u64>("not a number").unwrap_err();
        let err: MirrorError = json.into();
        assert_eq!(err.kind(), "serialization");
    }
}
