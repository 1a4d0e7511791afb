// crates/mctech-visitor/src/resolve.rs
// ============================================================================
// Module: Statement Resolution
// Description: Runs the extensions over one parsed statement.
// Purpose: Decide which extension owns a statement and apply tenant
//          isolation to the rest.
// Dependencies: mctech-core, sqlparser
// ============================================================================

//! ## Overview
//! [`resolve_stmt`] applies tenant isolation to one statement and records on
//! the context whether a global database was seen and whether the statement
//! was rewritten. [`validate`] turns "global database, no tenant" into an
//! error. [`Extensions`] chains the DDL, misc and isolation extensions in
//! that order; the first one that claims a statement wins.

// ============================================================================
// SECTION: Imports
// ============================================================================

use mctech_core::McTechContext;
use mctech_core::McTechError;
use mctech_core::McTechResult;
use sqlparser::ast::Statement;

use crate::ddl::VersionColumn;
use crate::error::VisitorResult;
use crate::isolation::TenantRewrite;
use crate::misc::apply_misc;
use crate::misc::use_database;
use crate::schema::StmtSchemaInfo;
use crate::stmt::Stmt;
use crate::walker::StmtWalker;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome of resolving one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedStmt {
    /// Physical databases to report, empty when nothing was rewritten.
    pub dbs: Vec<String>,
    /// Tables referenced by the statement.
    pub schema: StmtSchemaInfo,
    /// The statement kind is not subject to isolation.
    pub skipped: bool,
}

// ============================================================================
// SECTION: Isolation
// ============================================================================

/// Applies tenant isolation to one statement.
///
/// Statements that neither read nor write rows are returned with `skipped`
/// set. For the rest, the context records whether a global database was
/// referenced and, when a tenant predicate or column was injected, that the
/// statement was rewritten.
///
/// # Errors
///
/// Returns mapping failures and write statements without a column list.
pub fn resolve_stmt(ctx: &mut McTechContext, stmt: &mut Stmt) -> VisitorResult<ResolvedStmt> {
    if !is_isolated(stmt) {
        return Ok(ResolvedStmt {
            skipped: true,
            ..ResolvedStmt::default()
        });
    }
    let rewrite = TenantRewrite::from_context(ctx);
    let schema = {
        let mut walker = StmtWalker::new(ctx, Some(&rewrite));
        walker.walk(stmt)?;
        walker.into_schema()
    };
    let dbs = schema.databases(ctx.current_db());
    let has_global = dbs.iter().any(|db| ctx.is_global_db(db));
    let mut resolved = ResolvedStmt {
        dbs: Vec::new(),
        schema,
        skipped: false,
    };
    if !has_global {
        return Ok(resolved);
    }
    ctx.set_sql_has_global_db(true);
    if ctx.prepare_result().global().set {
        return Ok(resolved);
    }
    if rewrite.tenant.is_empty() && !rewrite.using_param {
        return Ok(resolved);
    }
    ctx.set_sql_rewritten(true);
    resolved.dbs = dbs;
    Ok(resolved)
}

/// Fails when a global database was read without a tenant.
///
/// # Errors
///
/// Returns [`McTechError::TenantRequired`] when the statement referenced a
/// global database, was not rewritten and carries no `global` hint.
pub fn validate(ctx: &McTechContext) -> McTechResult<()> {
    if !ctx.sql_rewritten() && ctx.sql_has_global_db() && !ctx.prepare_result().global().set {
        return Err(McTechError::TenantRequired(ctx.user().to_string()));
    }
    Ok(())
}

/// Whether tenant isolation applies to the statement kind.
const fn is_isolated(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::LoadData(_) | Stmt::ImportInto(_) => true,
        Stmt::Sql(statement) => matches!(
            statement,
            Statement::Query(_)
                | Statement::Insert(_)
                | Statement::Update { .. }
                | Statement::Delete(_)
                | Statement::Explain { .. }
        ),
    }
}

// ============================================================================
// SECTION: Extension Chain
// ============================================================================

/// Which extension claimed a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Version column rules.
    Ddl,
    /// Database mapping for session statements.
    Misc,
    /// Tenant isolation ran.
    Isolation,
    /// Nothing applied.
    None,
}

/// The ordered set of statement extensions.
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    /// Version column rules, when enabled.
    version: Option<VersionColumn>,
    /// Whether tenant isolation is enabled.
    tenant_enabled: bool,
}

impl Extensions {
    /// Creates the chain.
    #[must_use]
    pub const fn new(version: Option<VersionColumn>, tenant_enabled: bool) -> Self {
        Self {
            version,
            tenant_enabled,
        }
    }

    /// Runs the extensions over one statement.
    ///
    /// A mapped `USE` also updates the context's current database so the
    /// following statements resolve against it.
    ///
    /// # Errors
    ///
    /// Returns the first extension error.
    pub fn apply(&self, ctx: &mut McTechContext, stmt: &mut Stmt) -> VisitorResult<(Handled, ResolvedStmt)> {
        if let Some(version) = &self.version
            && version.apply(ctx, stmt)?
        {
            return Ok((Handled::Ddl, ResolvedStmt::default()));
        }
        if apply_misc(ctx, stmt)? {
            if let Some(db) = use_database(stmt) {
                ctx.set_current_db(db.to_string());
            }
            return Ok((Handled::Misc, ResolvedStmt::default()));
        }
        if !self.tenant_enabled {
            return Ok((Handled::None, ResolvedStmt::default()));
        }
        ctx.reset();
        let resolved = resolve_stmt(ctx, stmt)?;
        let handled = if resolved.skipped {
            Handled::None
        } else {
            Handled::Isolation
        };
        Ok((handled, resolved))
    }
}
