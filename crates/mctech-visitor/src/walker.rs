// crates/mctech-visitor/src/walker.rs
// ============================================================================
// Module: Statement Walker
// Description: Recursive AST walk with CTE and column-modified scopes.
// Purpose: Map database names, collect table references and inject tenant
//          predicates and columns in one pass.
// Dependencies: mctech-core, sqlparser
// ============================================================================

//! ## Overview
//! [`StmtWalker`] walks a statement depth first, keeping two stacks:
//!
//! - CTE scope: one list of CTE names per query. An unqualified table whose
//!   name is in any enclosing list is a CTE reference and is left alone.
//! - Column-modified scope: whether the enclosing write statement added a
//!   `tenant` column, so a `SELECT` feeding it must project one. Subqueries
//!   and derived tables push `false`.
//!
//! Table names are mapped to physical databases on the way down (unqualified
//! names gain the current database). Tenant predicates are built after a
//! `SELECT`'s children have been walked, so they see mapped names. Without a
//! [`TenantRewrite`] the walk only maps names and collects references.
//!
//! Expressions are scanned with sqlparser's [`VisitorMut`]: every nested
//! query found in any expression position (`ANY`/`ALL`, `ORDER BY`,
//! `GROUP BY`, `LIMIT`, `ON DUPLICATE KEY UPDATE` and so on) is handed back
//! to the walker as a subquery with its own scopes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ops::ControlFlow;

use mctech_core::McTechContext;
use sqlparser::ast::Delete;
use sqlparser::ast::Expr;
use sqlparser::ast::FromTable;
use sqlparser::ast::Ident;
use sqlparser::ast::Insert;
use sqlparser::ast::JoinConstraint;
use sqlparser::ast::JoinOperator;
use sqlparser::ast::ObjectName;
use sqlparser::ast::Query;
use sqlparser::ast::Select;
use sqlparser::ast::SetExpr;
use sqlparser::ast::Statement;
use sqlparser::ast::TableAlias;
use sqlparser::ast::TableFactor;
use sqlparser::ast::TableWithJoins;
use sqlparser::ast::VisitMut;
use sqlparser::ast::VisitorMut;

use crate::error::VisitorError;
use crate::error::VisitorResult;
use crate::isolation::TenantRewrite;
use crate::isolation::append_import_tenant;
use crate::isolation::append_insert_tenant;
use crate::isolation::append_load_tenant;
use crate::isolation::append_tenant_item;
use crate::isolation::conjoin;
use crate::isolation::conjoin_into;
use crate::isolation::tenant_column;
use crate::schema::StmtSchemaInfo;
use crate::schema::TableRef;
use crate::stmt::ImportIntoStmt;
use crate::stmt::ImportSource;
use crate::stmt::LoadDataStmt;
use crate::stmt::Stmt;

// ============================================================================
// SECTION: Walker
// ============================================================================

/// Depth-first statement walker.
pub struct StmtWalker<'a> {
    /// Statement context.
    ctx: &'a McTechContext,
    /// Tenant rewrite, when isolation is active.
    rewrite: Option<&'a TenantRewrite>,
    /// CTE names per enclosing query, lower-cased.
    cte_scopes: Vec<Vec<String>>,
    /// Whether the enclosing write statement added a tenant column.
    column_modified: Vec<bool>,
    /// Collected table references.
    schema: StmtSchemaInfo,
}

impl<'a> StmtWalker<'a> {
    /// Creates a walker.
    #[must_use]
    pub fn new(ctx: &'a McTechContext, rewrite: Option<&'a TenantRewrite>) -> Self {
        Self {
            ctx,
            rewrite,
            cte_scopes: Vec::new(),
            column_modified: Vec::new(),
            schema: StmtSchemaInfo::default(),
        }
    }

    /// Consumes the walker, returning the collected references.
    #[must_use]
    pub fn into_schema(self) -> StmtSchemaInfo {
        self.schema
    }

    /// Walks a statement.
    ///
    /// # Errors
    ///
    /// Returns mapping failures and missing write column lists.
    pub fn walk(&mut self, stmt: &mut Stmt) -> VisitorResult<()> {
        match stmt {
            Stmt::Sql(statement) => self.walk_statement(statement),
            Stmt::LoadData(load) => self.walk_load(load),
            Stmt::ImportInto(import) => self.walk_import(import),
        }
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    /// Walks a parser statement.
    fn walk_statement(&mut self, statement: &mut Statement) -> VisitorResult<()> {
        match statement {
            Statement::Query(query) => self.walk_query(query),
            Statement::Insert(insert) => self.walk_insert(insert),
            Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                self.walk_table_with_joins(table)?;
                self.scan(assignments)?;
                self.scan(selection)?;
                if let Some(rewrite) = self.rewrite {
                    let conditions = self.from_conditions(rewrite, std::slice::from_mut(table));
                    *selection = conjoin(conditions, selection.take());
                }
                Ok(())
            }
            Statement::Delete(delete) => self.walk_delete(delete),
            Statement::Explain {
                statement,
                ..
            } => self.walk_statement(statement),
            _ => Ok(()),
        }
    }

    /// Walks `INSERT` / `REPLACE`.
    fn walk_insert(&mut self, insert: &mut Insert) -> VisitorResult<()> {
        let modified = match self.rewrite {
            Some(rewrite) if self.rewrites_write_target(rewrite, &insert.table_name) => {
                append_insert_tenant(rewrite, insert)?
            }
            _ => false,
        };
        self.visit_table_name(&mut insert.table_name, None)?;
        self.column_modified.push(modified);
        if let Some(source) = insert.source.as_mut() {
            self.walk_query(source)?;
        }
        self.column_modified.pop();
        self.scan(&mut insert.on)?;
        self.scan(&mut insert.returning)
    }

    /// Walks `DELETE`.
    fn walk_delete(&mut self, delete: &mut Delete) -> VisitorResult<()> {
        for name in &mut delete.tables {
            self.map_qualified(name)?;
        }
        let tables = match &mut delete.from {
            FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
        };
        for table in tables.iter_mut() {
            self.walk_table_with_joins(table)?;
        }
        if let Some(using) = delete.using.as_mut() {
            for table in using.iter_mut() {
                self.walk_table_with_joins(table)?;
            }
        }
        self.scan(&mut delete.selection)?;
        self.scan(&mut delete.order_by)?;
        self.scan(&mut delete.limit)?;
        if let Some(rewrite) = self.rewrite {
            let mut conditions = self.from_conditions(rewrite, tables);
            if let Some(using) = delete.using.as_mut() {
                conditions.extend(self.from_conditions(rewrite, using));
            }
            delete.selection = conjoin(conditions, delete.selection.take());
        }
        Ok(())
    }

    /// Walks `LOAD DATA`.
    fn walk_load(&mut self, load: &mut LoadDataStmt) -> VisitorResult<()> {
        if let Some(rewrite) = self.rewrite
            && self.rewrites_write_target(rewrite, &load.table)
        {
            append_load_tenant(rewrite, load)?;
        }
        self.visit_table_name(&mut load.table, None)?;
        for assignment in &mut load.assignments {
            self.scan(&mut assignment.value)?;
        }
        Ok(())
    }

    /// Walks `IMPORT INTO`.
    fn walk_import(&mut self, import: &mut ImportIntoStmt) -> VisitorResult<()> {
        let modified = match self.rewrite {
            Some(rewrite) if self.rewrites_write_target(rewrite, &import.table) => {
                append_import_tenant(rewrite, import)?
            }
            _ => false,
        };
        self.visit_table_name(&mut import.table, None)?;
        for assignment in &mut import.assignments {
            self.scan(&mut assignment.value)?;
        }
        if let ImportSource::Query(query) = &mut import.source {
            self.column_modified.push(modified);
            self.walk_query(query)?;
            self.column_modified.pop();
        }
        Ok(())
    }

    /// Whether a write target receives the tenant column.
    fn rewrites_write_target(&self, rewrite: &TenantRewrite, name: &ObjectName) -> bool {
        if rewrite.tenant_omit {
            return false;
        }
        let db = match name.0.as_slice() {
            [.., schema, _] => schema.value.clone(),
            _ => self.ctx.current_db().to_string(),
        };
        self.ctx.is_global_db(&db)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Walks a query inside its own CTE scope.
    fn walk_query(&mut self, query: &mut Query) -> VisitorResult<()> {
        self.cte_scopes.push(Vec::new());
        if let Some(with) = query.with.as_mut() {
            for cte in &mut with.cte_tables {
                if let Some(scope) = self.cte_scopes.last_mut() {
                    scope.push(cte.alias.name.value.to_lowercase());
                }
                self.walk_subquery(&mut cte.query)?;
            }
        }
        self.walk_set_expr(&mut query.body)?;
        self.scan(&mut query.order_by)?;
        self.scan(&mut query.limit)?;
        self.scan(&mut query.limit_by)?;
        self.scan(&mut query.offset)?;
        self.scan(&mut query.fetch)?;
        self.cte_scopes.pop();
        Ok(())
    }

    /// Walks a query that never feeds a write target.
    fn walk_subquery(&mut self, query: &mut Query) -> VisitorResult<()> {
        self.column_modified.push(false);
        self.walk_query(query)?;
        self.column_modified.pop();
        Ok(())
    }

    /// Walks a query body.
    fn walk_set_expr(&mut self, body: &mut SetExpr) -> VisitorResult<()> {
        match body {
            SetExpr::Select(select) => self.walk_select(select),
            SetExpr::Query(query) => self.walk_query(query),
            SetExpr::SetOperation {
                left,
                right,
                ..
            } => {
                self.walk_set_expr(left)?;
                self.walk_set_expr(right)
            }
            SetExpr::Values(values) => self.scan(values),
            SetExpr::Insert(statement) | SetExpr::Update(statement) => self.walk_statement(statement),
            SetExpr::Table(_) => Ok(()),
        }
    }

    /// Walks a `SELECT`, then injects its tenant items and predicates.
    fn walk_select(&mut self, select: &mut Select) -> VisitorResult<()> {
        for table in &mut select.from {
            self.walk_table_with_joins(table)?;
        }
        // FROM is walked above; the scan covers the rest of the SELECT.
        let from = std::mem::take(&mut select.from);
        let scanned = self.scan(select);
        select.from = from;
        scanned?;
        if let Some(rewrite) = self.rewrite {
            if self.column_modified.last().copied().unwrap_or(false) {
                append_tenant_item(rewrite, &mut select.projection);
            }
            let conditions = self.from_conditions(rewrite, &mut select.from);
            select.selection = conjoin(conditions, select.selection.take());
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Table sources
    // ------------------------------------------------------------------------

    /// Walks a FROM item.
    fn walk_table_with_joins(&mut self, table: &mut TableWithJoins) -> VisitorResult<()> {
        self.walk_table_factor(&mut table.relation)?;
        for join in &mut table.joins {
            self.walk_table_factor(&mut join.relation)?;
            if let Some(JoinConstraint::On(on)) = join_constraint_mut(&mut join.join_operator) {
                self.scan(on)?;
            }
        }
        Ok(())
    }

    /// Walks a table factor.
    fn walk_table_factor(&mut self, factor: &mut TableFactor) -> VisitorResult<()> {
        match factor {
            TableFactor::Table {
                name,
                alias,
                ..
            } => self.visit_table_name(name, alias.as_ref()),
            TableFactor::Derived {
                subquery,
                ..
            } => self.walk_subquery(subquery),
            TableFactor::NestedJoin {
                table_with_joins,
                ..
            } => self.walk_table_with_joins(table_with_joins),
            other => self.scan(other),
        }
    }

    /// Maps a table's database and records the reference.
    fn visit_table_name(&mut self, name: &mut ObjectName, alias: Option<&TableAlias>) -> VisitorResult<()> {
        let Some(db) = self.table_db(name) else {
            return Ok(());
        };
        if db.is_empty() {
            return Ok(());
        }
        let physical = self.ctx.to_physical(&db)?;
        if schema_of(name) != Some(physical.as_str()) {
            set_schema(name, &physical);
        }
        let table = name.0.last().map(|ident| ident.value.to_lowercase()).unwrap_or_default();
        self.schema.add(TableRef {
            database: physical,
            table,
            alias: alias.map(|alias| alias.name.value.clone()),
        });
        Ok(())
    }

    /// Maps the schema of an already qualified name.
    fn map_qualified(&self, name: &mut ObjectName) -> VisitorResult<()> {
        if let Some(schema) = schema_of(name) {
            let physical = self.ctx.to_physical(schema)?;
            set_schema(name, &physical);
        }
        Ok(())
    }

    /// Database of a table name; `None` for CTE references.
    fn table_db(&self, name: &ObjectName) -> Option<String> {
        match name.0.as_slice() {
            [.., schema, _] => Some(schema.value.clone()),
            [table] if self.is_cte(&table.value) => None,
            [_] => Some(self.ctx.current_db().to_string()),
            [] => None,
        }
    }

    /// Whether `name` is a CTE visible from the current scope.
    fn is_cte(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.cte_scopes.iter().rev().any(|scope| scope.contains(&name))
    }

    // ------------------------------------------------------------------------
    // Tenant predicates
    // ------------------------------------------------------------------------

    /// Predicates for the FROM items that belong in `WHERE`.
    ///
    /// Tables joined with `ON` get their predicate conjoined into the `ON`
    /// clause; the leading table and joins without `ON` report theirs here.
    fn from_conditions(&self, rewrite: &TenantRewrite, tables: &mut [TableWithJoins]) -> Vec<Expr> {
        let shared = shared_table_names(tables);
        self.join_conditions(rewrite, tables, &shared)
    }

    /// Predicates for FROM items, given the bare names used more than once.
    fn join_conditions(
        &self,
        rewrite: &TenantRewrite,
        tables: &mut [TableWithJoins],
        shared: &[String],
    ) -> Vec<Expr> {
        let mut conditions = Vec::new();
        for table in tables {
            conditions.extend(self.factor_conditions(rewrite, &mut table.relation, shared));
            for join in &mut table.joins {
                let own = self.factor_conditions(rewrite, &mut join.relation, shared);
                match join_constraint_mut(&mut join.join_operator) {
                    Some(JoinConstraint::On(on)) => conjoin_into(own, on),
                    _ => conditions.extend(own),
                }
            }
        }
        conditions
    }

    /// Predicates for one table factor.
    fn factor_conditions(&self, rewrite: &TenantRewrite, factor: &mut TableFactor, shared: &[String]) -> Vec<Expr> {
        match factor {
            TableFactor::Table {
                name,
                alias,
                ..
            } => self.table_conditions(rewrite, name, alias.as_ref(), shared),
            TableFactor::NestedJoin {
                table_with_joins,
                ..
            } => self.join_conditions(rewrite, std::slice::from_mut(table_with_joins.as_mut()), shared),
            _ => Vec::new(),
        }
    }

    /// Predicates for a table living in a global database.
    ///
    /// The column is qualified by the alias, else by the bare table name,
    /// else by `schema.table` when another unaliased table in the same FROM
    /// shares the bare name.
    fn table_conditions(
        &self,
        rewrite: &TenantRewrite,
        name: &ObjectName,
        alias: Option<&TableAlias>,
        shared: &[String],
    ) -> Vec<Expr> {
        let Some(db) = self.table_db(name) else {
            return Vec::new();
        };
        if !self.ctx.is_global_db(&db) {
            return Vec::new();
        }
        let qualifier = match (alias, name.0.last()) {
            (Some(alias), _) => vec![alias.name.clone()],
            (None, Some(table)) if shared.contains(&table.value.to_lowercase()) => {
                name.0.iter().rev().take(2).rev().cloned().collect()
            }
            (None, Some(table)) => vec![table.clone()],
            (None, None) => return Vec::new(),
        };
        rewrite.conditions(&tenant_column(&qualifier))
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    /// Scans any AST node: maps `db.table.col` identifiers and walks every
    /// outermost nested query as a subquery.
    fn scan<N: VisitMut>(&mut self, node: &mut N) -> VisitorResult<()> {
        let mut scan = ExprScan {
            walker: self,
            depth: 0,
        };
        match node.visit(&mut scan) {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(err) => Err(err),
        }
    }
}

// ============================================================================
// SECTION: Expression Scan
// ============================================================================

/// Generic AST visitor driven by [`StmtWalker::scan`].
///
/// Nodes below a nested query are left to the walker, which re-enters the
/// query once the visitor has finished with it.
struct ExprScan<'w, 'a> {
    /// Walker receiving nested queries.
    walker: &'w mut StmtWalker<'a>,
    /// Number of nested queries enclosing the current node.
    depth: usize,
}

impl VisitorMut for ExprScan<'_, '_> {
    type Break = VisitorError;

    fn pre_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        self.depth = self.depth.saturating_sub(1);
        if self.depth > 0 {
            return ControlFlow::Continue(());
        }
        match self.walker.walk_subquery(query) {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err),
        }
    }

    fn pre_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        if self.depth > 0 {
            return ControlFlow::Continue(());
        }
        if let Expr::CompoundIdentifier(idents) = expr
            && idents.len() == 3
            && let Some(schema) = idents.first_mut()
        {
            match self.walker.ctx.to_physical(&schema.value) {
                Ok(physical) => schema.value = physical,
                Err(err) => return ControlFlow::Break(VisitorError::from(err)),
            }
        }
        ControlFlow::Continue(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Join constraint of an operator, when it has one.
fn join_constraint_mut(operator: &mut JoinOperator) -> Option<&mut JoinConstraint> {
    match operator {
        JoinOperator::Inner(constraint)
        | JoinOperator::LeftOuter(constraint)
        | JoinOperator::RightOuter(constraint)
        | JoinOperator::FullOuter(constraint)
        | JoinOperator::Semi(constraint)
        | JoinOperator::LeftSemi(constraint)
        | JoinOperator::RightSemi(constraint)
        | JoinOperator::Anti(constraint)
        | JoinOperator::LeftAnti(constraint)
        | JoinOperator::RightAnti(constraint)
        | JoinOperator::AsOf {
            constraint,
            ..
        } => Some(constraint),
        JoinOperator::CrossJoin | JoinOperator::CrossApply | JoinOperator::OuterApply => None,
    }
}

/// Lower-cased bare names of unaliased tables appearing more than once.
fn shared_table_names(tables: &[TableWithJoins]) -> Vec<String> {
    let mut names = Vec::new();
    collect_unaliased(tables, &mut names);
    names.sort();
    let mut shared: Vec<String> = names.windows(2).filter(|pair| pair[0] == pair[1]).map(|pair| pair[0].clone()).collect();
    shared.dedup();
    shared
}

/// Collects bare names of unaliased tables, entering nested joins.
fn collect_unaliased(tables: &[TableWithJoins], names: &mut Vec<String>) {
    for table in tables {
        for factor in std::iter::once(&table.relation).chain(table.joins.iter().map(|join| &join.relation)) {
            match factor {
                TableFactor::Table {
                    name,
                    alias: None,
                    ..
                } => names.extend(name.0.last().map(|ident| ident.value.to_lowercase())),
                TableFactor::NestedJoin {
                    table_with_joins,
                    ..
                } => collect_unaliased(std::slice::from_ref(table_with_joins.as_ref()), names),
                _ => {}
            }
        }
    }
}

/// Schema part of a table name.
fn schema_of(name: &ObjectName) -> Option<&str> {
    match name.0.as_slice() {
        [.., schema, _] => Some(schema.value.as_str()),
        _ => None,
    }
}

/// Sets or inserts the schema part of a table name.
fn set_schema(name: &mut ObjectName, db: &str) {
    let len = name.0.len();
    if len >= 2 {
        if let Some(schema) = name.0.get_mut(len - 2) {
            schema.value = db.to_string();
        }
    } else {
        name.0.insert(0, Ident::new(db));
    }
}
