// crates/mctech-largequery/src/stanza.rs
// ============================================================================
// Module: Large Query Stanza
// Description: Slow-log style stanza format shared by writer and reader.
// Purpose: Render statements that exceed the size threshold as log stanzas.
// Dependencies: base64, flate2, mctech-core, time
// ============================================================================

//! ## Overview
//! A stanza is a run of `# FIELD: value` lines opened by `# TIME:` and closed
//! by the statement line ending in `;`:
//!
//! ```text
//! # TIME: 2024-05-01T10:00:00.5+08:00
//! # USER@HOST: root[root] @ localhost [127.0.0.1]
//! # QUERY_TIME: 1.527627037
//! # COP_TIME: 0.17 PROCESS_TIME: 0.07 WRITE_KEYS: 131072
//! # DB: test
//! # SUCC: true
//! # SQL_TYPE: insert
//! use test;
//! {gzip}H4sIAAAAAAAA/8rMKy...;
//! ```
//!
//! Statements are always written gzip-compressed and base64-encoded behind
//! the `{gzip}` marker; plain statement lines are still accepted on read.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use mctech_core::TraceSink;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::LargeQueryError;
use crate::error::LargeQueryResult;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix of every field line.
pub const ROW_PREFIX: &str = "# ";
/// Separator between a field name and its value.
pub const SPACE_MARK: &str = ": ";
/// Terminator of the statement line.
pub const SQL_SUFFIX: &str = ";";
/// Marker of a compressed statement.
pub const GZIP_PREFIX: &str = "{gzip}";
/// Opening line prefix of a stanza.
pub const START_PREFIX: &str = "# TIME: ";
/// Combined user and host field.
pub const USER_AND_HOST: &str = "USER@HOST";

/// Field names.
pub mod field {
    /// Stanza timestamp.
    pub const TIME: &str = "TIME";
    /// Session user.
    pub const USER: &str = "USER";
    /// Client host.
    pub const HOST: &str = "HOST";
    /// Total statement time in seconds.
    pub const QUERY_TIME: &str = "QUERY_TIME";
    /// Parse time in seconds.
    pub const PARSE_TIME: &str = "PARSE_TIME";
    /// Compile time in seconds.
    pub const COMPILE_TIME: &str = "COMPILE_TIME";
    /// Rewrite time in seconds.
    pub const REWRITE_TIME: &str = "REWRITE_TIME";
    /// Optimize time in seconds.
    pub const OPTIMIZE_TIME: &str = "OPTIMIZE_TIME";
    /// Coprocessor time in seconds.
    pub const COP_TIME: &str = "COP_TIME";
    /// Coprocessor process time in seconds.
    pub const PROCESS_TIME: &str = "PROCESS_TIME";
    /// Coprocessor wait time in seconds.
    pub const WAIT_TIME: &str = "WAIT_TIME";
    /// Keys written by the transaction.
    pub const WRITE_KEYS: &str = "WRITE_KEYS";
    /// Bytes written by the transaction.
    pub const WRITE_SIZE: &str = "WRITE_SIZE";
    /// Keys scanned.
    pub const TOTAL_KEYS: &str = "TOTAL_KEYS";
    /// Current database.
    pub const DB: &str = "DB";
    /// Statement digest.
    pub const DIGEST: &str = "DIGEST";
    /// Peak memory in bytes.
    pub const MEM_MAX: &str = "MEM_MAX";
    /// Peak disk in bytes.
    pub const DISK_MAX: &str = "DISK_MAX";
    /// Rows returned.
    pub const RESULT_ROWS: &str = "RESULT_ROWS";
    /// Whether the statement succeeded.
    pub const SUCC: &str = "SUCC";
    /// Statement length in bytes.
    pub const SQL_LENGTH: &str = "SQL_LENGTH";
    /// Statement kind.
    pub const SQL_TYPE: &str = "SQL_TYPE";
    /// Calling application.
    pub const APP_NAME: &str = "APP_NAME";
    /// Calling product line.
    pub const PRODUCT_LINE: &str = "PRODUCT_LINE";
    /// Calling package.
    pub const PACKAGE: &str = "PACKAGE";
    /// Encoded plan.
    pub const PLAN: &str = "PLAN";
    /// Statement text (reader column only).
    pub const QUERY: &str = "Query";
}

// ============================================================================
// SECTION: Statement Kinds
// ============================================================================

/// Statement kind recorded in `SQL_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// `SELECT` and set operations.
    Select,
    /// `INSERT` and `REPLACE`.
    Insert,
    /// `UPDATE`.
    Update,
    /// `DELETE`.
    Delete,
    /// Anything else.
    Other,
}

impl SqlType {
    /// Logged name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other => "other",
        }
    }

    /// Parses a logged or configured name.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "select" => Some(Self::Select),
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Time And Statement Codecs
// ============================================================================

/// Parses a stanza timestamp (RFC 3339).
///
/// # Errors
///
/// Returns [`LargeQueryError::InvalidTime`] when the text is not RFC 3339.
pub fn parse_time(text: &str) -> LargeQueryResult<OffsetDateTime> {
    OffsetDateTime::parse(text.trim(), &Rfc3339).map_err(|_| LargeQueryError::InvalidTime(text.to_string()))
}

/// Formats a stanza timestamp (RFC 3339).
///
/// # Errors
///
/// Returns [`LargeQueryError::InvalidTime`] for instants RFC 3339 cannot hold.
pub fn format_time(at: OffsetDateTime) -> LargeQueryResult<String> {
    at.format(&Rfc3339).map_err(|err| LargeQueryError::InvalidTime(err.to_string()))
}

/// Gzip-compresses and base64-encodes a statement.
///
/// # Errors
///
/// Returns [`LargeQueryError::Decode`] when compression fails.
pub fn encode_sql(sql: &str) -> LargeQueryResult<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(sql.as_bytes()).map_err(|err| LargeQueryError::Decode(err.to_string()))?;
    let compressed = encoder.finish().map_err(|err| LargeQueryError::Decode(err.to_string()))?;
    Ok(STANDARD.encode(compressed))
}

/// Reverses [`encode_sql`].
///
/// # Errors
///
/// Returns [`LargeQueryError::Decode`] for invalid base64, gzip or UTF-8.
pub fn decode_sql(payload: &str) -> LargeQueryResult<String> {
    let compressed = STANDARD.decode(payload.trim()).map_err(|err| LargeQueryError::Decode(err.to_string()))?;
    let mut sql = String::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_string(&mut sql)
        .map_err(|err| LargeQueryError::Decode(err.to_string()))?;
    Ok(sql)
}

/// Extracts the statement from a terminated statement line.
///
/// # Errors
///
/// Returns [`LargeQueryError::Decode`] when a `{gzip}` payload is corrupt.
pub fn statement_from_line(line: &str) -> LargeQueryResult<String> {
    match line.strip_prefix(GZIP_PREFIX) {
        Some(payload) => decode_sql(payload.strip_suffix(SQL_SUFFIX).unwrap_or(payload)),
        None => Ok(line.to_string()),
    }
}

// ============================================================================
// SECTION: Writer
// ============================================================================

/// Execution details written on a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecDetail {
    /// Coprocessor time.
    pub cop_time: Duration,
    /// Coprocessor process time.
    pub process_time: Duration,
    /// Coprocessor wait time.
    pub wait_time: Duration,
    /// Keys written.
    pub write_keys: u64,
    /// Bytes written.
    pub write_size: u64,
    /// Keys scanned.
    pub total_keys: u64,
}

impl ExecDetail {
    /// Renders the non-zero parts, or an empty string.
    #[must_use]
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(6);
        for (name, value) in [
            (field::COP_TIME, self.cop_time),
            (field::PROCESS_TIME, self.process_time),
            (field::WAIT_TIME, self.wait_time),
        ] {
            if !value.is_zero() {
                parts.push(format!("{name}{SPACE_MARK}{}", value.as_secs_f64()));
            }
        }
        for (name, value) in [
            (field::WRITE_KEYS, self.write_keys),
            (field::WRITE_SIZE, self.write_size),
            (field::TOTAL_KEYS, self.total_keys),
        ] {
            if value > 0 {
                parts.push(format!("{name}{SPACE_MARK}{value}"));
            }
        }
        parts.join(" ")
    }
}

/// Everything a large query stanza records.
#[derive(Debug, Clone, PartialEq)]
pub struct LargeQueryLogItems {
    /// Statement end time.
    pub time: OffsetDateTime,
    /// Session user, when authenticated.
    pub user: Option<String>,
    /// User host.
    pub host: String,
    /// Client address, when known.
    pub client_ip: Option<String>,
    /// Total time including parse.
    pub time_total: Duration,
    /// Parse time.
    pub time_parse: Duration,
    /// Compile time.
    pub time_compile: Duration,
    /// Rewrite time.
    pub time_rewrite: Duration,
    /// Optimize time.
    pub time_optimize: Duration,
    /// Execution details.
    pub exec_detail: ExecDetail,
    /// Current database.
    pub db: String,
    /// The current database changed with this statement.
    pub db_changed: bool,
    /// Statement digest.
    pub digest: String,
    /// Peak memory in bytes.
    pub mem_max: i64,
    /// Peak disk in bytes.
    pub disk_max: i64,
    /// Rows returned.
    pub result_rows: i64,
    /// Statement succeeded.
    pub succ: bool,
    /// Statement kind.
    pub sql_type: SqlType,
    /// Calling application.
    pub app_name: String,
    /// Calling product line.
    pub product_line: String,
    /// Calling package.
    pub package: String,
    /// Encoded plan.
    pub plan: String,
    /// Statement text.
    pub sql: String,
}

/// Writes one `# NAME: value` line.
fn write_item(buf: &mut String, name: &str, value: &str) {
    let _ = writeln!(buf, "{ROW_PREFIX}{name}{SPACE_MARK}{value}");
}

/// Renders `items` as one stanza.
///
/// # Errors
///
/// Returns an error when the time cannot be formatted or the statement
/// cannot be compressed.
pub fn format_stanza(items: &LargeQueryLogItems) -> LargeQueryResult<String> {
    let mut buf = String::with_capacity(512 + items.sql.len() / 2);
    write_item(&mut buf, field::TIME, &format_time(items.time)?);
    if let Some(user) = &items.user {
        let address = items.client_ip.as_deref().unwrap_or(&items.host);
        write_item(&mut buf, USER_AND_HOST, &format!("{user}[{user}] @ {} [{address}]", items.host));
    }
    write_item(&mut buf, field::QUERY_TIME, &items.time_total.as_secs_f64().to_string());
    write_item(&mut buf, field::PARSE_TIME, &items.time_parse.as_secs_f64().to_string());
    write_item(&mut buf, field::COMPILE_TIME, &items.time_compile.as_secs_f64().to_string());
    write_item(&mut buf, field::REWRITE_TIME, &items.time_rewrite.as_secs_f64().to_string());
    write_item(&mut buf, field::OPTIMIZE_TIME, &items.time_optimize.as_secs_f64().to_string());
    let detail = items.exec_detail.render();
    if !detail.is_empty() {
        let _ = writeln!(buf, "{ROW_PREFIX}{detail}");
    }
    if !items.db.is_empty() {
        write_item(&mut buf, field::DB, &items.db.to_lowercase());
    }
    if !items.digest.is_empty() {
        write_item(&mut buf, field::DIGEST, &items.digest);
    }
    if items.mem_max > 0 {
        write_item(&mut buf, field::MEM_MAX, &items.mem_max.to_string());
    }
    if items.disk_max > 0 {
        write_item(&mut buf, field::DISK_MAX, &items.disk_max.to_string());
    }
    write_item(&mut buf, field::RESULT_ROWS, &items.result_rows.to_string());
    write_item(&mut buf, field::SUCC, if items.succ { "true" } else { "false" });
    write_item(&mut buf, field::SQL_LENGTH, &items.sql.len().to_string());
    write_item(&mut buf, field::SQL_TYPE, items.sql_type.as_str());
    for (name, value) in [
        (field::APP_NAME, &items.app_name),
        (field::PRODUCT_LINE, &items.product_line),
        (field::PACKAGE, &items.package),
        (field::PLAN, &items.plan),
    ] {
        if !value.is_empty() {
            write_item(&mut buf, name, value);
        }
    }
    if items.db_changed && !items.db.is_empty() {
        let _ = writeln!(buf, "use {};", items.db.to_lowercase());
    }
    let _ = writeln!(buf, "{GZIP_PREFIX}{}{SQL_SUFFIX}", encode_sql(&items.sql)?);
    Ok(buf)
}

/// When a statement is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeQueryPolicy {
    /// Writing is on.
    pub enabled: bool,
    /// Minimum statement length in bytes.
    pub threshold: usize,
    /// Kinds that are written.
    pub types: Vec<SqlType>,
}

impl LargeQueryPolicy {
    /// True when a statement of `len` bytes and kind `sql_type` is written.
    #[must_use]
    pub fn accepts(&self, len: usize, sql_type: SqlType) -> bool {
        self.enabled && len >= self.threshold && self.types.contains(&sql_type)
    }
}

/// Writes large query stanzas to a trace sink.
pub struct LargeQueryWriter {
    /// Write policy.
    policy: LargeQueryPolicy,
    /// Destination.
    sink: Arc<dyn TraceSink>,
}

impl LargeQueryWriter {
    /// Creates a writer.
    #[must_use]
    pub fn new(policy: LargeQueryPolicy, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            policy,
            sink,
        }
    }

    /// Active policy.
    #[must_use]
    pub const fn policy(&self) -> &LargeQueryPolicy {
        &self.policy
    }

    /// Writes `items` when the policy accepts them; returns whether it did.
    ///
    /// # Errors
    ///
    /// Returns an error when the stanza cannot be rendered.
    pub fn record(&self, items: &LargeQueryLogItems) -> LargeQueryResult<bool> {
        if !self.policy.accepts(items.sql.len(), items.sql_type) {
            return Ok(false);
        }
        self.sink.write_entry(&format_stanza(items)?);
        Ok(true)
    }
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

    use mctech_core::log::MemoryTraceSink;
    use proptest::prelude::*;

    use super::*;

    fn items(sql: &str) -> LargeQueryLogItems {
        LargeQueryLogItems {
            time: parse_time("2024-05-01T10:00:00.5+08:00").unwrap(),
            user: Some("root".to_string()),
            host: "localhost".to_string(),
            client_ip: Some("127.0.0.1".to_string()),
            time_total: Duration::from_millis(1500),
            time_parse: Duration::ZERO,
            time_compile: Duration::from_micros(250),
            time_rewrite: Duration::ZERO,
            time_optimize: Duration::ZERO,
            exec_detail: ExecDetail {
                cop_time: Duration::from_millis(170),
                write_keys: 12,
                ..ExecDetail::default()
            },
            db: "Test".to_string(),
            db_changed: true,
            digest: "abc".to_string(),
            mem_max: 4096,
            disk_max: 0,
            result_rows: 1,
            succ: true,
            sql_type: SqlType::Insert,
            app_name: "org-service".to_string(),
            product_line: String::new(),
            package: String::new(),
            plan: String::new(),
            sql: sql.to_string(),
        }
    }

    #[test]
    fn stanza_lists_fields_in_order() {
        let stanza = format_stanza(&items("insert into t select * from t")).unwrap();
        let lines: Vec<&str> = stanza.lines().collect();
        assert_eq!(lines[0], "# TIME: 2024-05-01T10:00:00.5+08:00");
        assert_eq!(lines[1], "# USER@HOST: root[root] @ localhost [127.0.0.1]");
        assert_eq!(lines[2], "# QUERY_TIME: 1.5");
        assert_eq!(lines[3], "# PARSE_TIME: 0");
        assert_eq!(lines[4], "# COMPILE_TIME: 0.00025");
        assert_eq!(lines[7], "# COP_TIME: 0.17 WRITE_KEYS: 12");
        assert_eq!(lines[8], "# DB: test");
        assert!(lines.contains(&"# SQL_LENGTH: 29"));
        assert!(lines.contains(&"# APP_NAME: org-service"));
        assert!(!stanza.contains("# DISK_MAX"));
        assert!(!stanza.contains("# PACKAGE"));
        assert_eq!(lines[lines.len() - 2], "use test;");
        let last = lines[lines.len() - 1];
        assert_eq!(statement_from_line(last).unwrap(), "insert into t select * from t");
    }

    #[test]
    fn policy_filters_by_length_and_kind() {
        let sink = Arc::new(MemoryTraceSink::new());
        let writer = LargeQueryWriter::new(
            LargeQueryPolicy {
                enabled: true,
                threshold: 10,
                types: vec![SqlType::Insert],
            },
            sink.clone(),
        );
        assert!(!writer.record(&items("insert")).unwrap());
        let mut select = items("select * from a_big_table");
        select.sql_type = SqlType::Select;
        assert!(!writer.record(&select).unwrap());
        assert!(writer.record(&items("insert into t values (1)")).unwrap());
        assert_eq!(sink.entries().len(), 1);
    }

    #[test]
    fn plain_statement_lines_pass_through() {
        assert_eq!(statement_from_line("select 1;").unwrap(), "select 1;");
        assert!(statement_from_line("{gzip}not-base64;").is_err());
    }

    proptest! {
        #[test]
        fn gzip_payload_round_trips(sql in ".{0,512}") {
            let line = format!("{GZIP_PREFIX}{}{SQL_SUFFIX}", encode_sql(&sql).unwrap());
            prop_assert_eq!(statement_from_line(&line).unwrap(), sql);
        }
    }
}
