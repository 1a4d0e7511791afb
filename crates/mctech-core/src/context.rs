// crates/mctech-core/src/context.rs
// ============================================================================
// Module: MCTech Session Context
// Description: Per-statement state owned by the session.
// Purpose: Carry the prepare result, mapping helpers and rewrite flags
//          between parsing, rewriting and validation.
// Dependencies: none
// ============================================================================

//! ## Overview
//! A [`McTechContext`] is built from a [`PrepareResult`] when a statement
//! enters the pipeline and dropped when it leaves. It owns the DW slot for the
//! statement (resolved lazily, at most once) and two flags the validator
//! reads: whether the SQL was rewritten and whether it touched a global
//! database. [`McTechContext::reset`] clears both between the statements of a
//! multi-statement request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::OnceLock;

use crate::dw_index::DbIndex;
use crate::dw_index::DbIndexRequest;
use crate::dw_index::DbIndexSelector;
use crate::error::McTechResult;
use crate::mapper;
use crate::prepare::PrepareResult;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Session facts captured at statement entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFacts {
    /// Current user.
    pub user: String,
    /// Current database, possibly empty.
    pub current_db: String,
    /// Emit the tenant slot instead of a literal tenant code.
    pub using_tenant_param: bool,
    /// Statement is being prepared (`PREPARE` / binary protocol).
    pub in_prepare_stmt: bool,
}

/// Per-statement context.
pub struct McTechContext {
    /// Preparation record.
    result: PrepareResult,
    /// Session facts.
    facts: SessionFacts,
    /// DW slot resolver.
    selector: Arc<dyn DbIndexSelector>,
    /// DW slot resolved for this statement.
    dw_index: OnceLock<DbIndex>,
    /// The statement was rewritten with tenant conditions.
    sql_rewritten: bool,
    /// The statement referenced a global database.
    sql_has_global_db: bool,
}

impl McTechContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        result: PrepareResult,
        facts: SessionFacts,
        selector: Arc<dyn DbIndexSelector>,
    ) -> Self {
        Self {
            result,
            facts,
            selector,
            dw_index: OnceLock::new(),
            sql_rewritten: false,
            sql_has_global_db: false,
        }
    }

    /// Preparation record.
    #[must_use]
    pub const fn prepare_result(&self) -> &PrepareResult {
        &self.result
    }

    /// Current user.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.facts.user
    }

    /// Current database, possibly empty.
    #[must_use]
    pub fn current_db(&self) -> &str {
        &self.facts.current_db
    }

    /// Replaces the current database (after `USE` mapping).
    pub fn set_current_db(&mut self, db: impl Into<String>) {
        self.facts.current_db = db.into();
    }

    /// Whether tenant conditions use the tenant slot.
    #[must_use]
    pub const fn using_tenant_param(&self) -> bool {
        self.facts.using_tenant_param
    }

    /// Sets whether tenant conditions use the tenant slot.
    pub const fn set_using_tenant_param(&mut self, value: bool) {
        self.facts.using_tenant_param = value;
    }

    /// Whether the statement is being prepared.
    #[must_use]
    pub const fn in_prepare_stmt(&self) -> bool {
        self.facts.in_prepare_stmt
    }

    /// Whether the statement was rewritten.
    #[must_use]
    pub const fn sql_rewritten(&self) -> bool {
        self.sql_rewritten
    }

    /// Records whether the statement was rewritten.
    pub const fn set_sql_rewritten(&mut self, value: bool) {
        self.sql_rewritten = value;
    }

    /// Whether the statement referenced a global database.
    #[must_use]
    pub const fn sql_has_global_db(&self) -> bool {
        self.sql_has_global_db
    }

    /// Records whether the statement referenced a global database.
    pub const fn set_sql_has_global_db(&mut self, value: bool) {
        self.sql_has_global_db = value;
    }

    /// Clears the per-statement flags.
    pub const fn reset(&mut self) {
        self.sql_rewritten = false;
        self.sql_has_global_db = false;
    }

    /// Returns the DW slot, resolving it on first use.
    ///
    /// # Errors
    ///
    /// Returns the selector's error when the lookup fails.
    pub fn db_index(&self) -> McTechResult<DbIndex> {
        if let Some(index) = self.dw_index.get() {
            return Ok(*index);
        }
        let request = DbIndexRequest {
            env: self.result.db_prefix().to_string(),
            request_id: self.result.request_id().map(str::to_string),
            background: self.result.background(),
        };
        let index = self.selector.db_index(&request)?;
        Ok(*self.dw_index.get_or_init(|| index))
    }

    /// Maps a logical database name to its physical name.
    ///
    /// # Errors
    ///
    /// Returns the selector's error for `*_dw` databases.
    pub fn to_physical(&self, db: &str) -> McTechResult<String> {
        mapper::to_physical(db, self.result.db_prefix(), || self.db_index())
    }

    /// Maps a physical database name to its logical name.
    #[must_use]
    pub fn to_logical(&self, db: &str) -> String {
        mapper::to_logical(db, self.result.db_prefix())
    }

    /// Whether `db` is a global database.
    #[must_use]
    pub fn is_global_db(&self, db: &str) -> bool {
        mapper::is_global_db(db, self.result.db_prefix())
    }
}
