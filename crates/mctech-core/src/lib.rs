// crates/mctech-core/src/lib.rs
// ============================================================================
// Module: MCTech Core
// Description: Hint pipeline, identity resolution and database mapping.
// Purpose: Turn raw SQL plus session roles into a validated prepare result.
// Dependencies: regex, reqwest, serde, serde_json, thiserror, url
// ============================================================================

//! ## Overview
//! `mctech-core` holds the request-path pieces that run before the SQL is
//! parsed: the hint/comment scanner, role resolver, parameter formatter,
//! action executor and [`PrepareResult`] assembly. It also owns database name
//! mapping, name filters, the per-statement [`McTechContext`], the shared RPC
//! client and the structured log sinks used across the workspace.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod action;
pub mod context;
pub mod dw_index;
pub mod error;
pub mod filter;
pub mod format;
pub mod hint;
pub mod log;
pub mod mapper;
pub mod prepare;
pub mod roles;
pub mod rpc;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use action::apply_actions;
pub use context::McTechContext;
pub use context::SessionFacts;
pub use dw_index::DbIndex;
pub use dw_index::DbIndexRequest;
pub use dw_index::DbIndexSelector;
pub use dw_index::FixedDbIndexSelector;
pub use dw_index::HttpDbIndexSelector;
pub use error::McTechError;
pub use error::McTechResult;
pub use filter::Filter;
pub use format::AcrossSpec;
pub use format::GlobalValue;
pub use format::MppMode;
pub use format::ParamValue;
pub use hint::Comments;
pub use hint::ServiceComment;
pub use log::LogLevel;
pub use log::LogRecord;
pub use log::LogSink;
pub use log::TraceSink;
pub use prepare::PrepareResult;
pub use prepare::PreparedSql;
pub use prepare::SessionIdentity;
pub use prepare::TenantInfo;
pub use prepare::prepare_sql;
pub use roles::FlagRoles;
pub use rpc::RpcClient;
pub use rpc::RpcError;
