// crates/mctech-largequery/src/error.rs
// ============================================================================
// Module: Large Query Errors
// Description: Failures raised while writing or retrieving large queries.
// Purpose: Separate fatal retrieval errors from per-line warnings.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Only failures that stop a retrieval are errors. Malformed fields and
//! unreadable rotated files are collected as warnings on the retriever and
//! never abort it.

use std::io;
use std::path::Path;

use thiserror::Error;

/// Large query failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LargeQueryError {
    /// Filesystem access failed.
    #[error("large query log io error on {path}: {message}")]
    Io {
        /// File or directory involved.
        path: String,
        /// Underlying error text.
        message: String,
    },
    /// A compressed statement could not be decoded.
    #[error("large query sql cannot be decoded: {0}")]
    Decode(String),
    /// A timestamp could not be parsed.
    #[error("invalid large query time '{0}'")]
    InvalidTime(String),
    /// No `# TIME:` header was found where one was required.
    #[error("malformed large query file {0}")]
    Malformed(String),
    /// A stanza batch failed to parse.
    #[error("large query parse failed: {0}")]
    Parse(String),
    /// The retrieval was closed.
    #[error("large query retrieval cancelled")]
    Cancelled,
    /// A background thread could not be started.
    #[error("large query worker thread failed: {0}")]
    Thread(String),
}

impl LargeQueryError {
    /// Wraps an I/O error with its path.
    pub(crate) fn io(path: &Path, err: &io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result alias for large query operations.
pub type LargeQueryResult<T> = Result<T, LargeQueryError>;
