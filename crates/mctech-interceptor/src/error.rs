// crates/mctech-interceptor/src/error.rs
// ============================================================================
// Module: Interceptor Errors
// Description: Failures surfaced by the statement hooks and the Domain.
// Purpose: Fold every lower crate's error into one statement-facing type.
// Dependencies: mctech-core, mctech-largequery, mctech-udf, mctech-visitor,
//               mctech-worker, thiserror
// ============================================================================

//! ## Overview
//! Policy and rewrite errors fail the statement and keep their message
//! verbatim, so the client sees exactly what the lower crate reported. Trace
//! failures never reach here; they are logged where they happen.

use mctech_core::McTechError;
use mctech_largequery::LargeQueryError;
use mctech_udf::UdfError;
use mctech_visitor::VisitorError;
use mctech_worker::WorkerError;
use thiserror::Error;

/// Interceptor and Domain failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterceptError {
    /// Preparation, mapping or policy rejection.
    #[error(transparent)]
    Policy(#[from] McTechError),
    /// Statement rewrite failure.
    #[error(transparent)]
    Visitor(#[from] VisitorError),
    /// UDF backend failure.
    #[error(transparent)]
    Udf(#[from] UdfError),
    /// Background worker failure.
    #[error(transparent)]
    Worker(#[from] WorkerError),
    /// Large query log failure.
    #[error(transparent)]
    LargeQuery(#[from] LargeQueryError),
    /// `PREPARE` is disabled by `tenant.forbidden-prepare`.
    #[error("[mctech] PREPARE not allowed")]
    PrepareForbidden,
    /// A hook ran without the context its predecessor creates.
    #[error("mctech context is missing; before_parse_sql was not called")]
    MissingContext,
    /// A trace or log file could not be opened.
    #[error("cannot open {path}: {message}")]
    Io {
        /// File path.
        path: String,
        /// Failure description.
        message: String,
    },
}

/// Result alias for interceptor operations.
pub type InterceptResult<T> = Result<T, InterceptError>;
