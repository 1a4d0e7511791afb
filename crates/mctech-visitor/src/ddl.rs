// crates/mctech-visitor/src/ddl.rs
// ============================================================================
// Module: DDL Version Column
// Description: Adds and protects the row version column on tracked tables.
// Purpose: Keep `__version` present and unchanged in matching databases.
// Dependencies: mctech-core, sqlparser
// ============================================================================

//! ## Overview
//! Tables in databases matched by `ddl.version.db-matches` carry a version
//! column defined as
//! `<name> BIGINT NOT NULL DEFAULT MCTECH_SEQUENCE() ON UPDATE MCTECH_SEQUENCE()`.
//! `CREATE TABLE` gains the column (declaring it yourself is an error) and
//! `ALTER TABLE` may not drop it, rename it, rename another column to it or
//! give it any other definition. A `COMMENT` on the column is allowed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use mctech_core::Filter;
use mctech_core::McTechContext;
use mctech_core::filter::matches_any;
use sqlparser::ast::AlterColumnOperation;
use sqlparser::ast::AlterTableOperation;
use sqlparser::ast::ColumnDef;
use sqlparser::ast::ColumnOption;
use sqlparser::ast::DataType;
use sqlparser::ast::Expr;
use sqlparser::ast::FunctionArguments;
use sqlparser::ast::Ident;
use sqlparser::ast::ObjectName;
use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use crate::error::VisitorError;
use crate::error::VisitorResult;
use crate::stmt::Stmt;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Function that issues version values.
const SEQUENCE_FUNCTION: &str = "mctech_sequence";

/// Database assumed when neither the statement nor the session names one.
const FALLBACK_DB: &str = "test";

/// Column template; the name is replaced after parsing.
const VERSION_TEMPLATE: &str =
    "CREATE TABLE t (v BIGINT NOT NULL DEFAULT MCTECH_SEQUENCE() ON UPDATE MCTECH_SEQUENCE())";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Version column rules.
#[derive(Debug, Clone)]
pub struct VersionColumn {
    /// Column name, lower-cased.
    name: String,
    /// Canonical definition appended on `CREATE TABLE`.
    definition: ColumnDef,
    /// Databases the rules apply to.
    filters: Vec<Filter>,
}

impl VersionColumn {
    /// Builds the rules for `name` over databases matching `db_matches`.
    ///
    /// # Errors
    ///
    /// Returns an error when a filter does not compile.
    pub fn new<S: AsRef<str>>(name: &str, db_matches: &[S]) -> VisitorResult<Self> {
        let filters = Filter::parse_all(db_matches)?;
        let mut definition = template_column()?;
        definition.name = Ident::new(name);
        Ok(Self {
            name: name.to_lowercase(),
            definition,
            filters,
        })
    }

    /// Canonical column definition.
    #[must_use]
    pub const fn definition(&self) -> &ColumnDef {
        &self.definition
    }

    /// Applies the rules to a DDL statement.
    ///
    /// Returns `true` for `CREATE TABLE` and `ALTER TABLE`, whether or not the
    /// target database is tracked.
    ///
    /// # Errors
    ///
    /// Returns [`VisitorError::Ddl`] when the statement breaks a rule.
    pub fn apply(&self, ctx: &McTechContext, stmt: &mut Stmt) -> VisitorResult<bool> {
        let Stmt::Sql(statement) = stmt else {
            return Ok(false);
        };
        match statement {
            Statement::CreateTable(create) => {
                if self.tracks(ctx, &create.name) {
                    if create.columns.iter().any(|column| self.is_version(&column.name)) {
                        return Err(VisitorError::Ddl(format!(
                            "'{}' is reserved column name",
                            self.definition.name
                        )));
                    }
                    create.columns.push(self.definition.clone());
                }
                Ok(true)
            }
            Statement::AlterTable {
                name,
                operations,
                ..
            } => {
                if self.tracks(ctx, name) {
                    for operation in operations.iter() {
                        self.check_operation(operation)?;
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Whether the table's database is tracked.
    fn tracks(&self, ctx: &McTechContext, table: &ObjectName) -> bool {
        let db = match table.0.as_slice() {
            [.., schema, _] => schema.value.to_lowercase(),
            _ if !ctx.current_db().is_empty() => ctx.current_db().to_lowercase(),
            _ => FALLBACK_DB.to_string(),
        };
        matches_any(&self.filters, &db) || matches_any(&self.filters, &ctx.to_logical(&db))
    }

    /// Checks one `ALTER TABLE` operation.
    fn check_operation(&self, operation: &AlterTableOperation) -> VisitorResult<()> {
        match operation {
            AlterTableOperation::AddColumn {
                column_def,
                ..
            } if self.is_version(&column_def.name) => {
                let options: Vec<&ColumnOption> = column_def.options.iter().map(|def| &def.option).collect();
                self.check_definition(&column_def.data_type, &options)
            }
            AlterTableOperation::ModifyColumn {
                col_name,
                data_type,
                options,
                ..
            } if self.is_version(col_name) => {
                self.check_definition(data_type, &options.iter().collect::<Vec<_>>())
            }
            AlterTableOperation::RenameColumn {
                old_column_name,
                new_column_name,
            } => {
                if self.is_version(old_column_name) {
                    Err(self.cannot_rename())
                } else if self.is_version(new_column_name) {
                    Err(self.cannot_rename_to())
                } else {
                    Ok(())
                }
            }
            AlterTableOperation::DropColumn {
                column_name,
                ..
            } if self.is_version(column_name) => {
                Err(VisitorError::Ddl(format!("'{}' column cannot be dropped", self.definition.name)))
            }
            AlterTableOperation::ChangeColumn {
                old_name,
                new_name,
                data_type,
                options,
                ..
            } => {
                if self.is_version(old_name) {
                    if !self.is_version(new_name) {
                        return Err(self.cannot_rename());
                    }
                    self.check_definition(data_type, &options.iter().collect::<Vec<_>>())
                } else if self.is_version(new_name) {
                    Err(self.cannot_rename_to())
                } else {
                    Ok(())
                }
            }
            AlterTableOperation::AlterColumn {
                column_name,
                op,
            } if self.is_version(column_name) => match op {
                AlterColumnOperation::DropDefault => Err(VisitorError::Ddl(format!(
                    "'{}' column default cannot be dropped",
                    self.definition.name
                ))),
                AlterColumnOperation::SetDefault {
                    value,
                } if !is_sequence_call(value) => Err(VisitorError::Ddl(format!(
                    "'{}' column default cannot be changed",
                    self.definition.name
                ))),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Checks a definition against the canonical one.
    fn check_definition(&self, data_type: &DataType, options: &[&ColumnOption]) -> VisitorResult<()> {
        if is_version_spec(data_type, options) {
            Ok(())
        } else {
            Err(VisitorError::Ddl(format!(
                "'{}' column definition is invalid, the allowed definition is -> {}",
                self.definition.name, self.definition
            )))
        }
    }

    /// Whether `ident` names the version column.
    fn is_version(&self, ident: &Ident) -> bool {
        ident.value.to_lowercase() == self.name
    }

    /// Error for renaming the version column.
    fn cannot_rename(&self) -> VisitorError {
        VisitorError::Ddl(format!("'{}' column cannot be renamed", self.definition.name))
    }

    /// Error for renaming another column to the version column.
    fn cannot_rename_to(&self) -> VisitorError {
        VisitorError::Ddl(format!(
            "renaming another column to '{}' is not supported",
            self.definition.name
        ))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses the column template.
fn template_column() -> VisitorResult<ColumnDef> {
    let statements = Parser::parse_sql(&MySqlDialect {}, VERSION_TEMPLATE)?;
    match statements.into_iter().next() {
        Some(Statement::CreateTable(create)) => create
            .columns
            .into_iter()
            .next()
            .ok_or_else(|| VisitorError::Ddl("version column template has no column".to_string())),
        _ => Err(VisitorError::Ddl("version column template is not a CREATE TABLE".to_string())),
    }
}

/// Whether a type and option list match the version column.
fn is_version_spec(data_type: &DataType, options: &[&ColumnOption]) -> bool {
    if !matches!(data_type, DataType::BigInt(_) | DataType::UnsignedBigInt(_)) {
        return false;
    }
    let mut count = 0_usize;
    for option in options {
        match option {
            ColumnOption::Comment(_) => {}
            ColumnOption::NotNull => count += 1,
            ColumnOption::Default(expr) | ColumnOption::OnUpdate(expr) if is_sequence_call(expr) => {
                count += 1;
            }
            _ => return false,
        }
    }
    count == 3
}

/// Whether `expr` is `mctech_sequence()` with no arguments.
fn is_sequence_call(expr: &Expr) -> bool {
    let Expr::Function(function) = expr else {
        return false;
    };
    let named = function
        .name
        .0
        .last()
        .is_some_and(|ident| ident.value.eq_ignore_ascii_case(SEQUENCE_FUNCTION));
    let no_args = match &function.args {
        FunctionArguments::None => true,
        FunctionArguments::List(list) => list.args.is_empty(),
        FunctionArguments::Subquery(_) => false,
    };
    named && no_args
}
