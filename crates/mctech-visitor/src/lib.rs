// crates/mctech-visitor/src/lib.rs
// ============================================================================
// Module: MCTech Visitor
// Description: Statement parsing and AST rewriting.
// Purpose: Inject tenant isolation, map database names and guard the
//          version column on parsed statements.
// Dependencies: mctech-core, regex, sqlparser, thiserror
// ============================================================================

//! ## Overview
//! `mctech-visitor` is the half of the statement pipeline that runs after
//! parsing. [`parse_statements`] turns SQL into [`Stmt`] values (the MySQL
//! dialect plus `LOAD DATA` and `IMPORT INTO`), and [`Extensions`] runs the
//! DDL, misc and tenant isolation extensions over each one. The same walk
//! yields [`StmtSchemaInfo`] for the cross-database checker.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod ddl;
pub mod error;
pub mod isolation;
pub mod misc;
pub mod resolve;
pub mod schema;
pub mod stmt;
pub mod walker;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use ddl::VersionColumn;
pub use error::VisitorError;
pub use error::VisitorResult;
pub use isolation::TENANT_SLOT;
pub use isolation::TenantRewrite;
pub use isolation::bind_tenant_slots;
pub use misc::apply_misc;
pub use resolve::Extensions;
pub use resolve::Handled;
pub use resolve::ResolvedStmt;
pub use resolve::resolve_stmt;
pub use resolve::validate;
pub use schema::StmtSchemaInfo;
pub use schema::TableRef;
pub use schema::collect_schema_info;
pub use stmt::Stmt;
pub use stmt::StmtKind;
pub use stmt::parse_statement;
pub use stmt::parse_statements;
pub use walker::StmtWalker;
