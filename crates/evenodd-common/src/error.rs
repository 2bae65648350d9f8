//! Error types for the EVENODD engine
//!
//! Data corruption is never reported through these errors: the engine
//! classifies it on the error board and returns an outcome. `Error` covers
//! broken caller contracts, malformed wire data and configuration problems.

use thiserror::Error;

/// Common result type
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type
#[derive(Debug, Error)]
pub enum Error {
    // Caller contract errors
    #[error("invalid precondition: {0}")]
    InvalidPrecondition(String),

    #[error("invalid stripe width {width}: must be between {min} and {max}")]
    InvalidWidth { width: usize, min: usize, max: usize },

    #[error("position {position} out of range for stripe width {width}")]
    InvalidPosition { position: usize, width: usize },

    // Wire format errors
    #[error("sector size mismatch: expected {expected} bytes, got {actual}")]
    SectorSize { expected: usize, actual: usize },

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an invalid-precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::InvalidPrecondition(msg.into())
    }

    /// Check if this error is a broken caller contract
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidPrecondition(_) | Self::InvalidWidth { .. } | Self::InvalidPosition { .. }
        )
    }
}
