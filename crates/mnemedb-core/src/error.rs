//! Error types for `MnemeDB`.
//!
//! This module provides a unified error type for all index and ingestion
//! operations. Error codes follow the pattern `MNEME-XXX` for easy debugging.

use thiserror::Error;

/// Result type alias for `MnemeDB` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `MnemeDB` operations.
///
/// Each variant includes a descriptive message suitable for end-users.
/// The index never panics on caller input: every condition below is
/// surfaced through this type and leaves the index unchanged.
#[derive(Error, Debug)]
pub enum Error {
    /// Vector dimension mismatch (MNEME-001).
    #[error("[MNEME-001] Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Invalid vector (MNEME-002).
    ///
    /// The vector is empty or contains non-finite values (NaN, ±∞).
    #[error("[MNEME-002] Invalid vector: {0}")]
    InvalidVector(String),

    /// Capacity exceeded (MNEME-003).
    #[error("[MNEME-003] Capacity exceeded: index is limited to {max_elements} elements")]
    CapacityExceeded {
        /// Configured hard cap.
        max_elements: usize,
    },

    /// Search canceled (MNEME-004).
    ///
    /// The search hit its deadline or cancellation signal mid-flight.
    #[error("[MNEME-004] Search canceled before completion")]
    Canceled,

    /// Per-query timeout in a batch search (MNEME-005).
    ///
    /// Only the affected slot fails; sibling queries are unaffected.
    #[error("[MNEME-005] Search timed out after {elapsed_ms} ms")]
    Timeout {
        /// Time spent before the deadline tripped.
        elapsed_ms: u64,
    },

    /// Snapshot already in progress (MNEME-006).
    #[error("[MNEME-006] Persist already in progress")]
    PersistInProgress,

    /// IO error (MNEME-007).
    #[error("[MNEME-007] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot version not supported (MNEME-008).
    #[error("[MNEME-008] Snapshot version {found} not supported (max {supported})")]
    VersionMismatch {
        /// Version found in the file.
        found: u16,
        /// Highest version this build can load.
        supported: u16,
    },

    /// Snapshot corrupted (MNEME-009).
    #[error("[MNEME-009] Snapshot corrupted: {0}")]
    Corrupt(String),

    /// Configuration error (MNEME-010).
    #[error("[MNEME-010] Configuration error: {0}")]
    Config(String),

    /// Internal error (MNEME-011).
    ///
    /// Indicates a broken graph invariant. Please report if encountered.
    #[error("[MNEME-011] Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the stable error code (e.g., "MNEME-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "MNEME-001",
            Self::InvalidVector(_) => "MNEME-002",
            Self::CapacityExceeded { .. } => "MNEME-003",
            Self::Canceled => "MNEME-004",
            Self::Timeout { .. } => "MNEME-005",
            Self::PersistInProgress => "MNEME-006",
            Self::Io(_) => "MNEME-007",
            Self::VersionMismatch { .. } => "MNEME-008",
            Self::Corrupt(_) => "MNEME-009",
            Self::Config(_) => "MNEME-010",
            Self::Internal(_) => "MNEME-011",
        }
    }

    /// Returns true if this error is recoverable by retrying the call.
    ///
    /// Corruption and internal invariant violations are not recoverable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Corrupt(_) | Self::Internal(_))
    }
}
