// crates/mctech-visitor/src/schema.rs
// ============================================================================
// Module: Schema Info
// Description: Databases and tables referenced by a statement.
// Purpose: Feed the cross-database checker and trace records.
// Dependencies: mctech-core
// ============================================================================

//! ## Overview
//! [`StmtSchemaInfo`] is the side product of walking a statement: every real
//! table reference (CTE references excluded) with its physical database.
//! [`collect_schema_info`] runs the walk without tenant rewriting, mapping
//! database names in place exactly as the isolation pass does.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use mctech_core::McTechContext;

use crate::error::VisitorResult;
use crate::stmt::Stmt;
use crate::walker::StmtWalker;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A referenced table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Physical database name.
    pub database: String,
    /// Lower-cased table name.
    pub table: String,
    /// Alias used in the statement.
    pub alias: Option<String>,
}

/// Tables referenced by one statement, keyed by `database|table`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StmtSchemaInfo {
    /// Referenced tables.
    tables: BTreeMap<String, TableRef>,
}

impl StmtSchemaInfo {
    /// Records a table reference; the first alias seen wins.
    pub fn add(&mut self, table: TableRef) {
        let key = format!("{}|{}", table.database, table.table);
        self.tables.entry(key).or_insert(table);
    }

    /// Referenced tables in key order.
    pub fn tables(&self) -> impl Iterator<Item = &TableRef> {
        self.tables.values()
    }

    /// `database|table` keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Distinct databases, sorted. Empty names resolve to `current_db`.
    #[must_use]
    pub fn databases(&self, current_db: &str) -> Vec<String> {
        let set: BTreeSet<String> = self
            .tables
            .values()
            .map(|table| {
                if table.database.is_empty() {
                    current_db.to_string()
                } else {
                    table.database.clone()
                }
            })
            .filter(|db| !db.is_empty())
            .collect();
        set.into_iter().collect()
    }

    /// Whether nothing was referenced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

// ============================================================================
// SECTION: Collection
// ============================================================================

/// Maps database names in `stmt` and collects its table references.
///
/// # Errors
///
/// Returns mapping failures from the DW index selector.
pub fn collect_schema_info(ctx: &McTechContext, stmt: &mut Stmt) -> VisitorResult<StmtSchemaInfo> {
    let mut walker = StmtWalker::new(ctx, None);
    walker.walk(stmt)?;
    Ok(walker.into_schema())
}
