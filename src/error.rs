//! Error types for aiopq.

use thiserror::Error;

/// Result type for aiopq operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The failure of a single connection attempt, paired with a description of
/// the target it was aimed at.
#[derive(Debug)]
pub struct AttemptFailure {
    /// Human-readable description of the attempt target.
    pub target: String,
    /// The error that attempt produced.
    pub error: Error,
}

/// Collected failures of a multi-target connection attempt.
///
/// Produced only when more than one target was tried; a single failed
/// attempt is re-raised verbatim instead.
#[derive(Debug, Default)]
pub struct AttemptFailures(pub Vec<AttemptFailure>);

impl std::fmt::Display for AttemptFailures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for failure in &self.0 {
            write!(f, "\n  {}: {}", failure.target, failure.error)?;
        }
        Ok(())
    }
}

/// Error type for aiopq.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid connection configuration (host/port count mismatch, bad
    /// parameter values). Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single connection attempt failed (includes per-attempt timeouts).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Every resolved attempt target failed.
    #[error("all connection attempts failed:{0}")]
    AllAttemptsFailed(AttemptFailures),

    /// An in-flight operation failed (the handle raised mid-poll, or the
    /// worker pool dropped the job). Fatal to that operation only.
    #[error("Operation error: {0}")]
    Operation(String),

    /// The server reported a statement failure.
    #[error("Database error: {0}")]
    Database(String),

    /// The operation was cancelled. Always reported as cancellation, never
    /// masked as a generic failure.
    #[error("operation cancelled")]
    Cancelled,

    /// API misuse: mutating session parameters inside an open transaction,
    /// or using a closed session.
    #[error("Programming error: {0}")]
    Programming(String),

    /// I/O error from descriptor-interest registration or the runtime.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this error reports cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns true if this error is a configuration problem that no amount
    /// of retrying will fix.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Programming(_))
    }
}
