//! Error types for `SegScan`.
//!
//! This module provides a unified error type for every engine operation:
//! segment I/O, filter binding, scans, write sessions and queries.

use thiserror::Error;

/// Result type alias for `SegScan` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `SegScan` operations.
///
/// Each variant includes a descriptive error message suitable for end-users.
/// Error codes follow the pattern `SEGSCAN-XXX` for easy debugging.
#[derive(Error, Debug)]
pub enum Error {
    /// Header or encoding mismatch (SEGSCAN-001).
    ///
    /// The segment file is corrupt or was written for another dataset.
    #[error("[SEGSCAN-001] Format error: {0}")]
    Format(String),

    /// Out-of-bounds position or range (SEGSCAN-002).
    #[error("[SEGSCAN-002] Range error: {0}")]
    Range(String),

    /// Filter operand does not match the column encoding (SEGSCAN-003).
    #[error("[SEGSCAN-003] Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Encoding family of the column.
        expected: String,
        /// Operand type that was supplied.
        actual: String,
    },

    /// Position held by another write session (SEGSCAN-004).
    #[error("[SEGSCAN-004] Position {position} is locked by session {holder}")]
    Locked {
        /// 1-based record position.
        position: u32,
        /// Session currently holding the lock.
        holder: u64,
    },

    /// Retry budget exhausted (SEGSCAN-005).
    #[error("[SEGSCAN-005] Timed out waiting for locks on positions {positions:?}")]
    Timeout {
        /// Positions still locked when the retry window closed.
        positions: Vec<u32>,
    },

    /// IO error (SEGSCAN-006).
    #[error("[SEGSCAN-006] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Value not representable in the column encoding (SEGSCAN-007).
    #[error("[SEGSCAN-007] Invalid value: {0}")]
    InvalidValue(String),

    /// Malformed call arguments (SEGSCAN-008).
    #[error("[SEGSCAN-008] Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not allowed in the session's current state (SEGSCAN-009).
    #[error("[SEGSCAN-009] Session state error: {0}")]
    SessionState(String),

    /// Configuration error (SEGSCAN-010).
    #[error("[SEGSCAN-010] Configuration error: {0}")]
    Config(String),

    /// Segment already exists (SEGSCAN-011).
    #[error("[SEGSCAN-011] Segment '{0}' already exists")]
    SegmentExists(String),

    /// Segment not found (SEGSCAN-012).
    #[error("[SEGSCAN-012] Segment '{0}' not found")]
    SegmentNotFound(String),

    /// Worker task panicked or could not be joined (SEGSCAN-013).
    #[error("[SEGSCAN-013] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code (e.g., "SEGSCAN-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Format(_) => "SEGSCAN-001",
            Self::Range(_) => "SEGSCAN-002",
            Self::TypeMismatch { .. } => "SEGSCAN-003",
            Self::Locked { .. } => "SEGSCAN-004",
            Self::Timeout { .. } => "SEGSCAN-005",
            Self::Io(_) => "SEGSCAN-006",
            Self::InvalidValue(_) => "SEGSCAN-007",
            Self::InvalidArgument(_) => "SEGSCAN-008",
            Self::SessionState(_) => "SEGSCAN-009",
            Self::Config(_) => "SEGSCAN-010",
            Self::SegmentExists(_) => "SEGSCAN-011",
            Self::SegmentNotFound(_) => "SEGSCAN-012",
            Self::Internal(_) => "SEGSCAN-013",
        }
    }

    /// Returns true if this error is recoverable.
    ///
    /// Format errors mean the file cannot be trusted and are never retried.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Format(_))
    }

    /// Returns true if retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked { .. } | Self::Timeout { .. })
    }

    pub(crate) fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
