// crates/mctech-worker/src/error.rs
// ============================================================================
// Module: Worker Errors
// Description: Failures raised by policy workers and their executors.
// Purpose: Give reload, heartbeat and lifecycle failures one error type.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Reload and heartbeat failures are logged by the scheduler and retried on
//! the next tick; they never reach a statement. Lifecycle failures
//! ([`WorkerError::Timeout`], [`WorkerError::Panicked`]) surface to the
//! caller of `wait_stopped`.

use thiserror::Error;

/// Policy worker failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// The SQL executor failed.
    #[error("sql executor error: {0}")]
    Executor(String),
    /// A row column had an unexpected shape.
    #[error("column {column} cannot be decoded: {reason}")]
    Decode {
        /// Zero-based column index.
        column: usize,
        /// Decoding failure description.
        reason: String,
    },
    /// The worker loop panicked.
    #[error("worker {name} panicked: {message}")]
    Panicked {
        /// Worker name.
        name: &'static str,
        /// Panic payload, when it was a string.
        message: String,
    },
    /// The worker did not stop before the deadline.
    #[error("worker {0} did not stop in time")]
    Timeout(&'static str),
}

impl From<rusqlite::Error> for WorkerError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Executor(error.to_string())
    }
}

/// Result alias for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;
