// crates/mctech-visitor/src/error.rs
// ============================================================================
// Module: Visitor Errors
// Description: Failures raised while parsing or rewriting statements.
// Purpose: Separate AST-level failures from preparation policy errors.
// Dependencies: mctech-core, sqlparser, thiserror
// ============================================================================

//! ## Overview
//! [`VisitorError`] covers parse failures, write statements that cannot be
//! rewritten because they omit their column list, and DDL changes that
//! touch the reserved version column. Policy failures raised by the mapper or
//! the validator pass through unchanged as [`VisitorError::Policy`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use mctech_core::McTechError;
use sqlparser::parser::ParserError;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Statement rewrite failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VisitorError {
    /// The SQL text could not be parsed.
    #[error("sql parse error: {0}")]
    Parse(String),
    /// A write statement has no explicit column list.
    #[error("{0} statement must list its columns explicitly")]
    MissingColumns(&'static str),
    /// A DDL statement conflicts with the version column rules.
    #[error("{0}")]
    Ddl(String),
    /// Preparation, mapping or validation failure.
    #[error(transparent)]
    Policy(#[from] McTechError),
}

impl From<ParserError> for VisitorError {
    fn from(error: ParserError) -> Self {
        Self::Parse(error.to_string())
    }
}

/// Result alias for visitor operations.
pub type VisitorResult<T> = Result<T, VisitorError>;
