// crates/mctech-worker/src/lib.rs
// ============================================================================
// Module: MCTech Worker
// Description: Background policy workers backed by system tables.
// Purpose: Keep deny-digest and cross-database rules cached in process.
// Dependencies: async-trait, mctech-core, rusqlite, serde, thiserror, time, tokio
// ============================================================================

//! ## Overview
//! Two caches feed the statement pipeline: [`DenyDigestWorker`] blocks
//! statements by digest until an expiry and writes request times back on a
//! heartbeat, and [`CrossDbWorker`] holds the invoker rules the cross-db
//! checker consults. Both implement [`PolicyWorker`] and are driven by a
//! [`Scheduler`] over any [`SqlExecutor`]; [`SqliteExecutor`] serves tests
//! and offline tooling.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod crossdb;
pub mod digest;
pub mod error;
pub mod executor;
pub mod scheduler;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crossdb::CROSS_DB_TABLE;
pub use crossdb::CrossDbGroup;
pub use crossdb::CrossDbInfo;
pub use crossdb::CrossDbWorker;
pub use crossdb::InvokerPattern;
pub use crossdb::InvokerType;
pub use crossdb::LoadedRuleResult;
pub use crossdb::MATCH_ANY;
pub use crossdb::RuleDetail;
pub use crossdb::RuleState;
pub use digest::DENY_DIGEST_TABLE;
pub use digest::DenyDigestEntry;
pub use digest::DenyDigestWorker;
pub use error::WorkerError;
pub use error::WorkerResult;
pub use executor::SqlExecutor;
pub use executor::SqlRow;
pub use executor::SqlValue;
pub use executor::SqliteExecutor;
pub use scheduler::Intervals;
pub use scheduler::PolicyWorker;
pub use scheduler::Scheduler;
pub use scheduler::WorkerStatus;
