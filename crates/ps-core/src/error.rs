//! Error types for the ps-core crate.
//!
//! This module provides [`ConfigError`] for configuration loading and
//! validation, and [`TransitionError`] for illegal result lifecycle moves.

use camino::Utf8PathBuf;

use crate::types::ScanStatus;

/// Errors that can occur during configuration loading and validation.
///
/// # Examples
///
/// ```
/// use ps_core::ConfigError;
///
/// let error = ConfigError::invalid_option("scan.max_attempts", "must be at least 1");
/// assert!(error.to_string().contains("max_attempts"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {0}")]
    NotFound(Utf8PathBuf),

    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// An I/O error occurred while reading configuration.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a new [`ConfigError::InvalidOption`] error.
    #[inline]
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}

/// A lifecycle transition that the result state machine does not allow.
///
/// Results move strictly `Pending -> Scanning -> terminal`; anything else,
/// including every move out of a terminal state, is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal scan status transition {from:?} -> {to:?}")]
pub struct TransitionError {
    /// Status the result was in.
    pub from: ScanStatus,
    /// Status that was requested.
    pub to: ScanStatus,
}
