// crates/mctech-udf/src/error.rs
// ============================================================================
// Module: UDF Errors
// Description: Failures of the sequence, crypto and full SQL backends.
// Purpose: Give SQL functions one error type to surface.
// Dependencies: mctech-core, thiserror
// ============================================================================

//! ## Overview
//! Failures of the sequence, crypto and full SQL backends.

use mctech_core::RpcError;
use thiserror::Error;

/// UDF backend failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UdfError {
    /// Service call failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// Service answered with an unreadable payload.
    #[error("invalid service response: {0}")]
    Response(String),
    /// Every cached sequence value was handed out.
    #[error("returned sequence values are exhausted")]
    SequenceExhausted,
    /// Key and IV have not been loaded yet.
    #[error("mctech aes crypto key/iv is not loaded")]
    CryptoNotReady,
    /// Key or IV is unusable.
    #[error("mctech aes crypto key/iv is invalid: {0}")]
    CryptoParams(String),
    /// Ciphertext could not be decrypted.
    #[error("mctech decrypt failure. '{0}'")]
    Decrypt(String),
    /// `metrics.sql-trace.full-sql-dir` is not configured.
    #[error("mctech.metrics.sql-trace.full-sql-dir is not set")]
    FullSqlDirUnset,
    /// Archived SQL could not be read.
    #[error("load full sql error, [{at}, {tx_id}, {group}]: {message}")]
    FullSql {
        /// Requested instant.
        at: String,
        /// Requested transaction id.
        tx_id: i64,
        /// Archive group.
        group: String,
        /// Underlying error text.
        message: String,
    },
}

/// Result alias for UDF backends.
pub type UdfResult<T> = Result<T, UdfError>;
