//! Error types for hardware model operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for hardware model operations
pub type Result<T> = std::result::Result<T, ChipError>;

/// Errors that can occur while loading or validating a hardware description
#[derive(Debug, Error)]
pub enum ChipError {
    /// Configuration file not found
    #[error("Hardware configuration not found: {path}")]
    FileNotFound {
        /// Path that was attempted
        path: PathBuf,
    },

    /// I/O error while reading the configuration
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// TOML syntax or schema error
    #[error("Invalid hardware configuration TOML: {reason}")]
    Parse {
        /// Parser message
        reason: String,
    },

    /// Configuration parsed but is not a usable hierarchy
    #[error("Hardware configuration validation failed:\n{reason}")]
    Validation {
        /// All validation failures, one per line
        reason: String,
    },
}

impl ChipError {
    /// Create a parse error
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Create a validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for ChipError {
    fn from(err: toml::de::Error) -> Self {
        Self::parse(err.to_string())
    }
}
