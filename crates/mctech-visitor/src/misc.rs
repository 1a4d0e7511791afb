// crates/mctech-visitor/src/misc.rs
// ============================================================================
// Module: Misc Extension
// Description: Database mapping for USE, SHOW and ANALYZE statements.
// Purpose: Let clients name logical databases in session statements.
// Dependencies: mctech-core, sqlparser
// ============================================================================

//! ## Overview
//! `USE db`, `SHOW ... FROM db` and `ANALYZE TABLE db.t` carry database names
//! the tenant walker never sees. [`apply_misc`] maps them to physical names
//! and reports the statement as handled so the isolation pass skips it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use mctech_core::McTechContext;
use sqlparser::ast::ObjectName;
use sqlparser::ast::ShowStatementIn;
use sqlparser::ast::ShowStatementOptions;
use sqlparser::ast::Statement;
use sqlparser::ast::Use;

use crate::error::VisitorResult;
use crate::stmt::Stmt;

// ============================================================================
// SECTION: Extension
// ============================================================================

/// Maps database names in session statements.
///
/// Returns `true` when the statement is a `USE`, `SHOW` or `ANALYZE`.
///
/// # Errors
///
/// Returns mapping failures from the DW index selector.
pub fn apply_misc(ctx: &McTechContext, stmt: &mut Stmt) -> VisitorResult<bool> {
    let Stmt::Sql(statement) = stmt else {
        return Ok(false);
    };
    match statement {
        Statement::Use(Use::Object(name) | Use::Database(name) | Use::Schema(name)) => {
            map_database(ctx, name)?;
        }
        Statement::ShowTables {
            show_options,
            ..
        }
        | Statement::ShowViews {
            show_options,
            ..
        } => map_show_in(ctx, show_options, map_database)?,
        Statement::ShowColumns {
            show_options,
            ..
        } => map_show_in(ctx, show_options, map_schema)?,
        Statement::ShowCreate {
            obj_name,
            ..
        } => map_schema(ctx, obj_name)?,
        Statement::ShowDatabases {
            ..
        }
        | Statement::ShowVariables {
            ..
        } => {}
        Statement::Analyze {
            table_name,
            ..
        } => map_schema(ctx, table_name)?,
        _ => return Ok(false),
    }
    Ok(true)
}

/// Current database named by a `USE` statement.
#[must_use]
pub fn use_database(stmt: &Stmt) -> Option<&str> {
    match stmt {
        Stmt::Sql(Statement::Use(Use::Object(name) | Use::Database(name) | Use::Schema(name))) => {
            name.0.last().map(|ident| ident.value.as_str())
        }
        _ => None,
    }
}

/// Maps the `FROM`/`IN` target of a `SHOW` statement.
fn map_show_in(
    ctx: &McTechContext,
    options: &mut ShowStatementOptions,
    map: fn(&McTechContext, &mut ObjectName) -> VisitorResult<()>,
) -> VisitorResult<()> {
    if let Some(ShowStatementIn {
        parent_name: Some(name),
        ..
    }) = options.show_in.as_mut()
    {
        map(ctx, name)?;
    }
    Ok(())
}

/// Maps a name that is itself a database.
fn map_database(ctx: &McTechContext, name: &mut ObjectName) -> VisitorResult<()> {
    if let Some(db) = name.0.last_mut() {
        db.value = ctx.to_physical(&db.value)?;
    }
    Ok(())
}

/// Maps the schema part of `db.table`.
fn map_schema(ctx: &McTechContext, name: &mut ObjectName) -> VisitorResult<()> {
    let len = name.0.len();
    if len >= 2
        && let Some(db) = name.0.get_mut(len - 2)
    {
        db.value = ctx.to_physical(&db.value)?;
    }
    Ok(())
}
