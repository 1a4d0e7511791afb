// crates/mctech-visitor/src/isolation.rs
// ============================================================================
// Module: Tenant Isolation
// Description: Tenant predicates, tenant columns and the tenant slot.
// Purpose: Build the AST fragments the walker injects into statements.
// Dependencies: mctech-core, sqlparser
// ============================================================================

//! ## Overview
//! [`TenantRewrite`] captures what a statement is rewritten with: a literal
//! tenant code, the tenant slot (for prepared statements), or the
//! include/exclude lists of a `global` hint. The helpers here build the
//! predicates (`t.tenant = 'x'`, `t.tenant NOT IN (...)`), conjoin them into
//! existing `WHERE`/`ON` clauses without duplicating a predicate that is
//! already present, and append the `tenant` column to write statements.
//!
//! The tenant slot is a named placeholder ([`TENANT_SLOT`]) that
//! [`bind_tenant_slots`] replaces with the tenant literal at execute time.
//!
//! # Invariants
//! - A predicate already present as a conjunct is never added again.
//! - Every VALUES row grows by exactly one expression when the column list
//!   grows by `tenant`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ops::ControlFlow;

use mctech_core::McTechContext;
use sqlparser::ast::Assignment;
use sqlparser::ast::AssignmentTarget;
use sqlparser::ast::BinaryOperator;
use sqlparser::ast::Expr;
use sqlparser::ast::Ident;
use sqlparser::ast::Insert;
use sqlparser::ast::ObjectName;
use sqlparser::ast::SelectItem;
use sqlparser::ast::SetExpr;
use sqlparser::ast::Value;
use sqlparser::ast::visit_expressions_mut;

use crate::error::VisitorError;
use crate::error::VisitorResult;
use crate::stmt::ImportIntoStmt;
use crate::stmt::ImportSource;
use crate::stmt::LoadDataStmt;
use crate::stmt::Stmt;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Tenant column name.
pub const TENANT_COLUMN: &str = "tenant";

/// Placeholder text of the tenant slot.
pub const TENANT_SLOT: &str = ":mctech_tenant";

// ============================================================================
// SECTION: Types
// ============================================================================

/// What a statement is rewritten with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantRewrite {
    /// Emit the tenant slot instead of the literal.
    pub using_param: bool,
    /// Tenant code, possibly empty.
    pub tenant: String,
    /// Replace equality with include/exclude lists.
    pub tenant_omit: bool,
    /// Tenants excluded by the `global` hint.
    pub excludes: Vec<String>,
    /// Tenants included by the `global` hint.
    pub includes: Vec<String>,
}

impl TenantRewrite {
    /// Captures the rewrite inputs of a statement context.
    #[must_use]
    pub fn from_context(ctx: &McTechContext) -> Self {
        let result = ctx.prepare_result();
        Self {
            using_param: ctx.using_tenant_param(),
            tenant: result.tenant_code().to_string(),
            tenant_omit: result.tenant_omit(),
            excludes: result.global().excludes.clone(),
            includes: result.global().includes.clone(),
        }
    }

    /// Whether the rewrite produces any predicate.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.using_param
            || !self.tenant.is_empty()
            || !self.excludes.is_empty()
            || !self.includes.is_empty()
    }

    /// Value written into tenant columns, when one exists.
    #[must_use]
    pub fn tenant_expr(&self) -> Option<Expr> {
        if self.using_param {
            Some(tenant_slot())
        } else if self.tenant.is_empty() {
            None
        } else {
            Some(Expr::Value(Value::SingleQuotedString(self.tenant.clone())))
        }
    }

    /// Predicates restricting `column` to the visible tenants.
    #[must_use]
    pub fn conditions(&self, column: &Expr) -> Vec<Expr> {
        if self.tenant_omit {
            let mut conditions = Vec::new();
            if !self.excludes.is_empty() {
                conditions.push(in_list(column, &self.excludes, true));
            }
            if !self.includes.is_empty() {
                conditions.push(in_list(column, &self.includes, false));
            }
            return conditions;
        }
        self.tenant_expr()
            .map(|value| {
                Expr::Nested(Box::new(Expr::BinaryOp {
                    left: Box::new(column.clone()),
                    op: BinaryOperator::Eq,
                    right: Box::new(value),
                }))
            })
            .into_iter()
            .collect()
    }
}

// ============================================================================
// SECTION: Conditions
// ============================================================================

/// Builds `qualifier.tenant`, where the qualifier is an alias, a table or
/// `schema.table`.
pub(crate) fn tenant_column(qualifier: &[Ident]) -> Expr {
    let mut idents = qualifier.to_vec();
    idents.push(Ident::new(TENANT_COLUMN));
    Expr::CompoundIdentifier(idents)
}

/// Builds `(column [NOT] IN ('a', 'b'))`.
fn in_list(column: &Expr, values: &[String], negated: bool) -> Expr {
    Expr::Nested(Box::new(Expr::InList {
        expr: Box::new(column.clone()),
        list: values.iter().map(|value| Expr::Value(Value::SingleQuotedString(value.clone()))).collect(),
        negated,
    }))
}

/// Parenthesises an expression unless it already is.
fn nest(expr: Expr) -> Expr {
    match expr {
        Expr::Nested(_) => expr,
        other => Expr::Nested(Box::new(other)),
    }
}

/// Builds `(left) AND (right)`.
fn and(left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(nest(left)),
        op: BinaryOperator::And,
        right: Box::new(nest(right)),
    }
}

/// Strips parentheses.
fn unwrap_nested(expr: &Expr) -> &Expr {
    match expr {
        Expr::Nested(inner) => unwrap_nested(inner),
        other => other,
    }
}

/// Collects the top-level conjuncts of an expression.
fn conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match unwrap_nested(expr) {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            conjuncts(left, out);
            conjuncts(right, out);
        }
        other => out.push(other),
    }
}

/// Conjoins `conditions` in front of `existing`, skipping duplicates.
///
/// Conditions fold left to right, `((a AND b) AND c)`, and the fold is
/// placed before the existing expression.
pub(crate) fn conjoin(conditions: Vec<Expr>, existing: Option<Expr>) -> Option<Expr> {
    let mut present = Vec::new();
    if let Some(existing) = &existing {
        conjuncts(existing, &mut present);
    }
    let mut fresh: Vec<Expr> = Vec::new();
    for condition in conditions {
        let bare = unwrap_nested(&condition);
        let seen = present.contains(&bare) || fresh.iter().any(|other| unwrap_nested(other) == bare);
        if !seen {
            fresh.push(condition);
        }
    }
    let folded = fresh.into_iter().reduce(and);
    match (folded, existing) {
        (Some(condition), Some(existing)) => Some(and(condition, existing)),
        (condition, existing) => condition.or(existing),
    }
}

/// Conjoins `conditions` into a required expression such as a join `ON`.
pub(crate) fn conjoin_into(conditions: Vec<Expr>, target: &mut Expr) {
    if conditions.is_empty() {
        return;
    }
    let existing = std::mem::replace(target, Expr::Value(Value::Null));
    if let Some(combined) = conjoin(conditions, Some(existing)) {
        *target = combined;
    }
}

// ============================================================================
// SECTION: Projections and Columns
// ============================================================================

/// Appends `<tenant> AS tenant` unless a tenant item is projected.
pub(crate) fn append_tenant_item(rewrite: &TenantRewrite, projection: &mut Vec<SelectItem>) {
    let has_tenant = projection.iter().any(|item| match item {
        SelectItem::ExprWithAlias {
            alias,
            ..
        } => is_tenant(alias),
        SelectItem::UnnamedExpr(Expr::Identifier(ident)) => is_tenant(ident),
        SelectItem::UnnamedExpr(Expr::CompoundIdentifier(idents)) => idents.last().is_some_and(is_tenant),
        _ => false,
    });
    if has_tenant {
        return;
    }
    if let Some(expr) = rewrite.tenant_expr() {
        projection.push(SelectItem::ExprWithAlias {
            expr,
            alias: Ident::new(TENANT_COLUMN),
        });
    }
}

/// Appends the tenant column and a tenant value to every VALUES row.
///
/// # Errors
///
/// Returns [`VisitorError::MissingColumns`] when the INSERT has no column list.
pub(crate) fn append_insert_tenant(rewrite: &TenantRewrite, insert: &mut Insert) -> VisitorResult<bool> {
    if insert.columns.is_empty() {
        return Err(VisitorError::MissingColumns("insert"));
    }
    if insert.columns.iter().any(is_tenant) {
        return Ok(false);
    }
    let Some(expr) = rewrite.tenant_expr() else {
        return Ok(false);
    };
    insert.columns.push(Ident::new(TENANT_COLUMN));
    if let Some(source) = &mut insert.source
        && let SetExpr::Values(values) = source.body.as_mut()
    {
        for row in &mut values.rows {
            row.push(expr.clone());
        }
    }
    Ok(true)
}

/// Adds `SET tenant = <tenant>` to a LOAD DATA statement.
///
/// # Errors
///
/// Returns [`VisitorError::MissingColumns`] when the statement has no column list.
pub(crate) fn append_load_tenant(rewrite: &TenantRewrite, load: &mut LoadDataStmt) -> VisitorResult<bool> {
    if load.columns.is_empty() {
        return Err(VisitorError::MissingColumns("load data"));
    }
    if load.columns.iter().any(is_tenant) || assigns_tenant(&load.assignments) {
        return Ok(false);
    }
    let Some(expr) = rewrite.tenant_expr() else {
        return Ok(false);
    };
    load.assignments.push(tenant_assignment(expr));
    Ok(true)
}

/// Adds the tenant to an IMPORT INTO statement.
///
/// File sources gain a `SET tenant = <tenant>` assignment; query sources gain
/// a trailing `tenant` column that the query's projection fills.
///
/// # Errors
///
/// Returns [`VisitorError::MissingColumns`] when the statement has no column list.
pub(crate) fn append_import_tenant(
    rewrite: &TenantRewrite,
    import: &mut ImportIntoStmt,
) -> VisitorResult<bool> {
    let has_column = import.columns.iter().any(|column| !column.value.starts_with('@'));
    if !has_column {
        return Err(VisitorError::MissingColumns("import"));
    }
    if import.columns.iter().any(is_tenant) || assigns_tenant(&import.assignments) {
        return Ok(false);
    }
    let Some(expr) = rewrite.tenant_expr() else {
        return Ok(false);
    };
    match import.source {
        ImportSource::File {
            ..
        } => import.assignments.push(tenant_assignment(expr)),
        ImportSource::Query(_) => import.columns.push(Ident::new(TENANT_COLUMN)),
    }
    Ok(true)
}

/// Builds `tenant = <expr>`.
fn tenant_assignment(expr: Expr) -> Assignment {
    Assignment {
        target: AssignmentTarget::ColumnName(ObjectName(vec![Ident::new(TENANT_COLUMN)])),
        value: expr,
    }
}

/// Whether any assignment targets the tenant column.
fn assigns_tenant(assignments: &[Assignment]) -> bool {
    assignments.iter().any(|assignment| match &assignment.target {
        AssignmentTarget::ColumnName(name) => name.0.last().is_some_and(is_tenant),
        AssignmentTarget::Tuple(names) => names.iter().any(|name| name.0.last().is_some_and(is_tenant)),
    })
}

/// Case-insensitive tenant column test.
fn is_tenant(ident: &Ident) -> bool {
    ident.value.eq_ignore_ascii_case(TENANT_COLUMN)
}

// ============================================================================
// SECTION: Tenant Slot
// ============================================================================

/// The tenant slot expression.
#[must_use]
pub fn tenant_slot() -> Expr {
    Expr::Value(Value::Placeholder(TENANT_SLOT.to_string()))
}

/// Whether an expression is the tenant slot.
#[must_use]
pub fn is_tenant_slot(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(Value::Placeholder(name)) if name == TENANT_SLOT)
}

/// Replaces every tenant slot with the tenant literal, returning the count.
pub fn bind_tenant_slots(stmt: &mut Stmt, tenant: &str) -> usize {
    let mut bound = 0_usize;
    let mut bind = |expr: &mut Expr| {
        if is_tenant_slot(expr) {
            *expr = Expr::Value(Value::SingleQuotedString(tenant.to_string()));
            bound += 1;
        }
        ControlFlow::<()>::Continue(())
    };
    match stmt {
        Stmt::Sql(statement) => {
            let _ = visit_expressions_mut(statement, &mut bind);
        }
        Stmt::LoadData(load) => {
            for assignment in &mut load.assignments {
                let _ = visit_expressions_mut(&mut assignment.value, &mut bind);
            }
        }
        Stmt::ImportInto(import) => {
            for assignment in &mut import.assignments {
                let _ = visit_expressions_mut(&mut assignment.value, &mut bind);
            }
            if let ImportSource::Query(query) = &mut import.source {
                let _ = visit_expressions_mut(query.as_mut(), &mut bind);
            }
        }
    }
    bound
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use super::*;

    fn literal(tenant: &str) -> TenantRewrite {
        TenantRewrite {
            tenant: tenant.to_string(),
            ..TenantRewrite::default()
        }
    }

    #[test]
    fn equality_condition_is_parenthesised() {
        let column = tenant_column(&[Ident::new("c")]);
        let conditions = literal("gslq").conditions(&column);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].to_string(), "(c.tenant = 'gslq')");
    }

    #[test]
    fn omit_conditions_use_lists() {
        let rewrite = TenantRewrite {
            tenant_omit: true,
            excludes: vec!["a".to_string()],
            includes: vec!["b".to_string(), "c".to_string()],
            ..TenantRewrite::default()
        };
        let column = tenant_column(&[Ident::new("t")]);
        let rendered: Vec<String> = rewrite.conditions(&column).iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["(t.tenant NOT IN ('a'))", "(t.tenant IN ('b', 'c'))"]);
    }

    #[test]
    fn conjoin_skips_present_predicates() {
        let column = tenant_column(&[Ident::new("t")]);
        let condition = literal("x").conditions(&column);
        let first = conjoin(condition.clone(), None).unwrap();
        let second = conjoin(condition, Some(first.clone())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn disabled_without_identity() {
        assert!(!TenantRewrite::default().enabled());
        assert!(literal("x").enabled());
        assert!(
            TenantRewrite {
                using_param: true,
                ..TenantRewrite::default()
            }
            .enabled()
        );
    }
}
