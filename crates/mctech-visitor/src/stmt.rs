// crates/mctech-visitor/src/stmt.rs
// ============================================================================
// Module: Statements
// Description: Parsed statement wrapper covering LOAD DATA and IMPORT INTO.
// Purpose: Give the visitors one statement type to walk and restore.
// Dependencies: regex, sqlparser
// ============================================================================

//! ## Overview
//! Most statements parse straight into a [`sqlparser`] [`Statement`] with the
//! MySQL dialect. Two write statements the rewrite must understand have no
//! parser support in that dialect: `LOAD DATA ... INFILE` with a column list
//! and `SET` assignments, and `IMPORT INTO`. Those are recognised by their
//! leading keywords and parsed into [`LoadDataStmt`] and [`ImportIntoStmt`];
//! their column lists, assignments and `SELECT` sources still go through the
//! sqlparser expression parser so the visitors see ordinary AST nodes.
//!
//! Every variant restores to SQL through [`std::fmt::Display`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sqlparser::ast::Assignment;
use sqlparser::ast::Ident;
use sqlparser::ast::ObjectName;
use sqlparser::ast::Query;
use sqlparser::ast::SetExpr;
use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use crate::error::VisitorError;
use crate::error::VisitorResult;

// ============================================================================
// SECTION: Patterns
// ============================================================================

/// `LOAD DATA [LOCAL] INFILE 'path' [REPLACE|IGNORE] INTO TABLE t <rest>`.
static LOAD_DATA: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*LOAD\s+DATA\s+(?P<local>LOCAL\s+)?INFILE\s+'(?P<path>[^']*)'\s+(?:(?P<dup>REPLACE|IGNORE)\s+)?INTO\s+TABLE\s+(?P<table>[\w.`]+)(?P<rest>.*?)\s*;?\s*$",
    )
    .ok()
});

/// `IMPORT INTO t [(cols)] [SET ...] FROM <source>`.
static IMPORT_INTO: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*IMPORT\s+INTO\s+(?P<table>[\w.`]+)\s*(?:\((?P<cols>[^()]*)\))?\s*(?:SET\s+(?P<set>.*?))?\s*FROM\s+(?P<src>.*?)\s*;?\s*$",
    )
    .ok()
});

/// Start of a `SET col = ...` clause inside a LOAD DATA tail.
static SET_CLAUSE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)(?:^|[\s)])SET\s+[`\w]+\s*=").ok());

/// Quoted file path at the start of an IMPORT source.
static FILE_SOURCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)^'(?P<path>[^']*)'(?P<tail>.*)$").ok());

// ============================================================================
// SECTION: Types
// ============================================================================

/// Coarse statement classification used by tracing and MPP handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtKind {
    /// `SELECT` or set operation.
    Select,
    /// `INSERT` / `REPLACE`.
    Insert,
    /// `UPDATE`.
    Update,
    /// `DELETE`.
    Delete,
    /// `LOAD DATA`.
    Load,
    /// `IMPORT INTO`.
    Import,
    /// `SET ...`.
    Set,
    /// `TRUNCATE`.
    Truncate,
    /// `PREPARE`.
    Prepare,
    /// `EXECUTE`.
    Execute,
    /// `BEGIN` / `START TRANSACTION` / `COMMIT` / `ROLLBACK`.
    Transaction,
    /// `USE` / `SHOW` / `EXPLAIN` / `ANALYZE`.
    Misc,
    /// DDL.
    Ddl,
    /// Anything else.
    Other,
}

impl StmtKind {
    /// Lower-case name used in trace and log records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Load => "load",
            Self::Import => "import",
            Self::Set => "set",
            Self::Truncate => "truncate",
            Self::Prepare => "prepare",
            Self::Execute => "exec",
            Self::Transaction => "tx",
            Self::Misc => "misc",
            Self::Ddl => "ddl",
            Self::Other => "other",
        }
    }
}

/// `LOAD DATA` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadDataStmt {
    /// `LOCAL` keyword present.
    pub local: bool,
    /// Input file path.
    pub path: String,
    /// `REPLACE` or `IGNORE`, upper-cased.
    pub duplicate: Option<String>,
    /// Target table.
    pub table: ObjectName,
    /// Field/line options kept verbatim.
    pub options: String,
    /// Column list.
    pub columns: Vec<Ident>,
    /// `SET` assignments.
    pub assignments: Vec<Assignment>,
}

/// Source of an `IMPORT INTO` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportSource {
    /// File path plus trailing `FORMAT` / `WITH` text kept verbatim.
    File {
        /// Input file path.
        path: String,
        /// Text after the path.
        tail: String,
    },
    /// `FROM SELECT ...`.
    Query(Box<Query>),
}

/// `IMPORT INTO` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportIntoStmt {
    /// Target table.
    pub table: ObjectName,
    /// Column list.
    pub columns: Vec<Ident>,
    /// `SET` assignments.
    pub assignments: Vec<Assignment>,
    /// Data source.
    pub source: ImportSource,
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Statement understood by the SQL parser.
    Sql(Statement),
    /// `LOAD DATA`.
    LoadData(LoadDataStmt),
    /// `IMPORT INTO`.
    ImportInto(ImportIntoStmt),
}

impl Stmt {
    /// Classifies the statement.
    #[must_use]
    pub fn kind(&self) -> StmtKind {
        match self {
            Self::LoadData(_) => StmtKind::Load,
            Self::ImportInto(_) => StmtKind::Import,
            Self::Sql(statement) => statement_kind(statement),
        }
    }

    /// Whether the statement is a query (`SELECT` / set operation).
    #[must_use]
    pub fn is_query(&self) -> bool {
        self.kind() == StmtKind::Select
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(statement) => write!(f, "{statement}"),
            Self::LoadData(load) => write!(f, "{load}"),
            Self::ImportInto(import) => write!(f, "{import}"),
        }
    }
}

impl fmt::Display for LoadDataStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LOAD DATA ")?;
        if self.local {
            f.write_str("LOCAL ")?;
        }
        write!(f, "INFILE '{}' ", self.path)?;
        if let Some(duplicate) = &self.duplicate {
            write!(f, "{duplicate} ")?;
        }
        write!(f, "INTO TABLE {}", self.table)?;
        if !self.options.is_empty() {
            write!(f, " {}", self.options)?;
        }
        if !self.columns.is_empty() {
            write!(f, " ({})", join(&self.columns))?;
        }
        if !self.assignments.is_empty() {
            write!(f, " SET {}", join(&self.assignments))?;
        }
        Ok(())
    }
}

impl fmt::Display for ImportIntoStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IMPORT INTO {}", self.table)?;
        if !self.columns.is_empty() {
            write!(f, " ({})", join(&self.columns))?;
        }
        if !self.assignments.is_empty() {
            write!(f, " SET {}", join(&self.assignments))?;
        }
        match &self.source {
            ImportSource::File {
                path,
                tail,
            } => write!(f, " FROM '{path}'{tail}"),
            ImportSource::Query(query) => write!(f, " FROM {query}"),
        }
    }
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses one or more statements.
///
/// # Errors
///
/// Returns [`VisitorError::Parse`] when the SQL cannot be parsed.
pub fn parse_statements(sql: &str) -> VisitorResult<Vec<Stmt>> {
    if let Some(load) = parse_load_data(sql)? {
        return Ok(vec![Stmt::LoadData(load)]);
    }
    if let Some(import) = parse_import_into(sql)? {
        return Ok(vec![Stmt::ImportInto(import)]);
    }
    let statements = Parser::parse_sql(&MySqlDialect {}, sql)?;
    Ok(statements.into_iter().map(Stmt::Sql).collect())
}

/// Parses a single statement.
///
/// # Errors
///
/// Returns [`VisitorError::Parse`] for unparseable SQL or when the text holds
/// more or fewer than one statement.
pub fn parse_statement(sql: &str) -> VisitorResult<Stmt> {
    let mut statements = parse_statements(sql)?;
    if statements.len() != 1 {
        return Err(VisitorError::Parse(format!(
            "expected one statement, found {}",
            statements.len()
        )));
    }
    statements.pop().ok_or_else(|| VisitorError::Parse("empty statement".to_string()))
}

/// Recognises `LOAD DATA ... INFILE`.
fn parse_load_data(sql: &str) -> VisitorResult<Option<LoadDataStmt>> {
    let Some(captures) = pattern(&LOAD_DATA)?.captures(sql) else {
        return Ok(None);
    };
    let text = |name: &str| captures.name(name).map_or("", |m| m.as_str());
    let (head, set_text) = split_set_clause(text("rest"))?;
    let (options, columns) = split_column_list(head);
    Ok(Some(LoadDataStmt {
        local: captures.name("local").is_some(),
        path: text("path").to_string(),
        duplicate: captures.name("dup").map(|m| m.as_str().to_ascii_uppercase()),
        table: object_name(text("table")),
        options: options.trim().to_string(),
        columns: columns.map(parse_columns).unwrap_or_default(),
        assignments: set_text.map(parse_assignments).transpose()?.unwrap_or_default(),
    }))
}

/// Recognises `IMPORT INTO`.
fn parse_import_into(sql: &str) -> VisitorResult<Option<ImportIntoStmt>> {
    let Some(captures) = pattern(&IMPORT_INTO)?.captures(sql) else {
        return Ok(None);
    };
    let text = |name: &str| captures.name(name).map_or("", |m| m.as_str());
    let source = match pattern(&FILE_SOURCE)?.captures(text("src")) {
        Some(file) => ImportSource::File {
            path: file.name("path").map_or("", |m| m.as_str()).to_string(),
            tail: file.name("tail").map_or("", |m| m.as_str()).to_string(),
        },
        None => ImportSource::Query(parse_query(text("src"))?),
    };
    Ok(Some(ImportIntoStmt {
        table: object_name(text("table")),
        columns: captures.name("cols").map(|m| parse_columns(m.as_str())).unwrap_or_default(),
        assignments: captures
            .name("set")
            .map(|m| parse_assignments(m.as_str()))
            .transpose()?
            .unwrap_or_default(),
        source,
    }))
}

/// Parses a standalone query.
fn parse_query(sql: &str) -> VisitorResult<Box<Query>> {
    let dialect = MySqlDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(sql)?;
    Ok(parser.parse_query()?)
}

/// Parses `a = expr, b = expr`.
fn parse_assignments(sql: &str) -> VisitorResult<Vec<Assignment>> {
    let dialect = MySqlDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(sql)?;
    Ok(parser.parse_comma_separated(Parser::parse_assignment)?)
}

/// Splits a LOAD DATA tail at its `SET` clause.
fn split_set_clause(rest: &str) -> VisitorResult<(&str, Option<&str>)> {
    let Some(found) = pattern(&SET_CLAUSE)?.find(rest) else {
        return Ok((rest, None));
    };
    let clause = &rest[found.start() ..];
    let offset = clause.to_ascii_uppercase().find("SET").unwrap_or(0) + 3;
    Ok((&rest[.. found.start()], Some(clause[offset ..].trim())))
}

/// Splits a trailing `(col, ...)` list off the options text.
fn split_column_list(head: &str) -> (&str, Option<&str>) {
    let trimmed = head.trim_end();
    if !trimmed.ends_with(')') {
        return (head, None);
    }
    let mut depth = 0_usize;
    for (index, ch) in trimmed.char_indices().rev() {
        match ch {
            ')' => depth += 1,
            '(' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return (&trimmed[.. index], Some(&trimmed[index + 1 .. trimmed.len() - 1]));
                }
            }
            _ => {}
        }
    }
    (head, None)
}

/// Splits a comma-separated column list.
fn parse_columns(text: &str) -> Vec<Ident> {
    text.split(',').map(str::trim).filter(|name| !name.is_empty()).map(ident).collect()
}

/// Builds an object name from `a.b` text.
fn object_name(text: &str) -> ObjectName {
    ObjectName(text.split('.').map(ident).collect())
}

/// Builds an identifier, honouring backquotes.
fn ident(raw: &str) -> Ident {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('`') && raw.ends_with('`') {
        Ident::with_quote('`', &raw[1 .. raw.len() - 1])
    } else {
        Ident::new(raw)
    }
}

/// Comma-joins displayable items.
fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Resolves a lazily compiled pattern.
fn pattern(cell: &'static LazyLock<Option<Regex>>) -> VisitorResult<&'static Regex> {
    cell.as_ref().ok_or_else(|| VisitorError::Parse("statement pattern unavailable".to_string()))
}

/// Classifies a parser statement.
fn statement_kind(statement: &Statement) -> StmtKind {
    match statement {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Insert(_) => StmtKind::Insert,
            SetExpr::Update(_) => StmtKind::Update,
            _ => StmtKind::Select,
        },
        Statement::Insert(_) => StmtKind::Insert,
        Statement::Update {
            ..
        } => StmtKind::Update,
        Statement::Delete(_) => StmtKind::Delete,
        Statement::SetVariable {
            ..
        }
        | Statement::SetNames {
            ..
        }
        | Statement::SetNamesDefault {}
        | Statement::SetRole {
            ..
        }
        | Statement::SetTimeZone {
            ..
        }
        | Statement::SetTransaction {
            ..
        } => StmtKind::Set,
        Statement::Truncate {
            ..
        } => StmtKind::Truncate,
        Statement::Prepare {
            ..
        } => StmtKind::Prepare,
        Statement::Execute {
            ..
        } => StmtKind::Execute,
        Statement::StartTransaction {
            ..
        }
        | Statement::Commit {
            ..
        }
        | Statement::Rollback {
            ..
        } => StmtKind::Transaction,
        Statement::Use(_)
        | Statement::ShowTables {
            ..
        }
        | Statement::ShowColumns {
            ..
        }
        | Statement::ShowDatabases {
            ..
        }
        | Statement::ShowVariables {
            ..
        }
        | Statement::ShowCreate {
            ..
        }
        | Statement::Explain {
            ..
        }
        | Statement::ExplainTable {
            ..
        }
        | Statement::Analyze {
            ..
        } => StmtKind::Misc,
        Statement::CreateTable(_)
        | Statement::AlterTable {
            ..
        }
        | Statement::CreateIndex(_)
        | Statement::CreateView {
            ..
        }
        | Statement::CreateDatabase {
            ..
        }
        | Statement::Drop {
            ..
        } => StmtKind::Ddl,
        _ => StmtKind::Other,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
