// crates/mctech-interceptor/src/lib.rs
// ============================================================================
// Module: MCTech Interceptor
// Description: Statement hooks, cross-database checker and the Domain.
// Purpose: Wire preparation, rewriting, policy and tracing into one
//          per-statement pipeline the host calls.
// Dependencies: mctech-config, mctech-core, mctech-largequery, mctech-udf,
//               mctech-visitor, mctech-worker
// ============================================================================

//! ## Overview
//! [`Interceptor`] is the per-statement pipeline; [`Session`] is the host
//! state it reads and writes; [`Domain`] owns the interceptor together with
//! the background workers and UDF backends. [`CrossDbChecker`] enforces the
//! mutually exclusive database groups and [`TraceRecord`] is the full SQL
//! trace line.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod checker;
pub mod domain;
pub mod error;
pub mod interceptor;
pub mod mpp;
pub mod session;
pub mod trace;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use checker::CrossDbChecker;
pub use domain::Domain;
pub use domain::DomainOptions;
pub use error::InterceptError;
pub use error::InterceptResult;
pub use interceptor::Interceptor;
pub use interceptor::InterceptorParts;
pub use mpp::MppOverride;
pub use session::ExecStats;
pub use session::Session;
pub use trace::TraceRecord;
pub use trace::statement_digest;
