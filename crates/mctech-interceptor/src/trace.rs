// crates/mctech-interceptor/src/trace.rs
// ============================================================================
// Module: Full SQL Trace
// Description: One JSON record per successful traceable statement.
// Purpose: Feed the full-SQL audit trail with timings, sizes and text.
// Dependencies: base64, flate2, serde, sha2, time
// ============================================================================

//! ## Overview
//! A [`TraceRecord`] serializes to one JSON line on the trace sink. Long
//! statements keep only a 256-byte prefix in `sql`, suffixed with
//! `...len(N)`, and carry the whole text gzip-compressed and
//! base64-encoded in `zip`. Durations are rendered the way Go prints them
//! (`3.315821ms`, `1m30.5s`) so existing trace consumers keep parsing them.
//! Connection ids are base62-encoded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::io::Write;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;
use mctech_core::log::truncate_utf8;
use mctech_visitor::StmtKind;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::session::ExecStats;
use crate::session::Session;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Bytes of SQL kept next to a compressed payload.
pub const COMPRESSED_SQL_PREFIX: usize = 256;

/// `at` format, millisecond precision.
const AT_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

/// Base62 alphabet.
const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

// ============================================================================
// SECTION: Record
// ============================================================================

/// Timing breakdown of a traced statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceTimes {
    /// Total time including parse.
    pub all: String,
    /// Parse time.
    pub parse: String,
    /// Plan build time.
    pub plan: String,
    /// Coprocessor time.
    pub cop: String,
    /// Time until the first row was ready.
    pub ready: String,
    /// Time spent sending results.
    pub send: String,
}

/// One full SQL trace line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceRecord {
    /// Current database.
    pub db: String,
    /// Referenced physical databases, comma separated.
    pub dbs: String,
    /// Session user.
    pub usr: String,
    /// Tenant code, possibly empty.
    pub tenant: String,
    /// Base62 connection id.
    pub conn: String,
    /// Trace kind.
    pub tp: &'static str,
    /// Execution start.
    pub at: String,
    /// Timings.
    pub time: TraceTimes,
    /// Statement digest.
    pub digest: String,
    /// Peak memory in bytes.
    pub mem: i64,
    /// Peak disk in bytes.
    pub disk: i64,
    /// Keys written.
    pub keys: u64,
    /// Rows affected.
    pub affected: u64,
    /// Rows returned.
    pub rows: i64,
    /// Statement text, truncated when `zip` is present.
    pub sql: String,
    /// Base64 gzip of the whole statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
}

impl TraceRecord {
    /// Builds the record of a finished statement.
    ///
    /// Statements longer than `compress_threshold` bytes are compressed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when compression fails.
    pub fn build(
        session: &Session,
        tenant: &str,
        tp: &'static str,
        stats: &ExecStats,
        sql: &str,
        compress_threshold: usize,
    ) -> io::Result<Self> {
        let all = stats.total();
        let (text, zip) = if sql.len() > compress_threshold {
            let zip = compress(sql)?;
            (format!("{}...len({})", truncate_utf8(sql, COMPRESSED_SQL_PREFIX), sql.len()), Some(zip))
        } else {
            (sql.to_string(), None)
        };
        Ok(Self {
            db: session.current_db.clone(),
            dbs: session.statement_dbs().join(","),
            usr: session.user.clone(),
            tenant: tenant.to_string(),
            conn: base62(session.connection_id),
            tp,
            at: format_at(stats.started_at),
            time: TraceTimes {
                all: go_duration(all),
                parse: go_duration(stats.parse),
                plan: go_duration(stats.compile),
                cop: go_duration(stats.cop),
                ready: go_duration(all.saturating_sub(stats.send)),
                send: go_duration(stats.send),
            },
            digest: stats.digest.clone().unwrap_or_else(|| statement_digest(sql)),
            mem: stats.mem_max,
            disk: stats.disk_max,
            keys: stats.write_keys,
            affected: stats.affected_rows,
            rows: stats.result_rows,
            sql: text,
            zip,
        })
    }
}

/// Trace kind of a statement, `None` when it is not traced.
#[must_use]
pub const fn trace_kind(kind: StmtKind) -> Option<&'static str> {
    match kind {
        StmtKind::Select
        | StmtKind::Insert
        | StmtKind::Update
        | StmtKind::Delete
        | StmtKind::Load
        | StmtKind::Set
        | StmtKind::Truncate
        | StmtKind::Misc => Some(kind.as_str()),
        StmtKind::Prepare | StmtKind::Execute => Some("exec"),
        StmtKind::Transaction => Some("tx"),
        StmtKind::Import | StmtKind::Ddl | StmtKind::Other => None,
    }
}

// ============================================================================
// SECTION: Encodings
// ============================================================================

/// Gzip-compresses and base64-encodes `sql`.
fn compress(sql: &str) -> io::Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(sql.as_bytes())?;
    Ok(STANDARD.encode(encoder.finish()?))
}

/// Formats the execution start.
fn format_at(at: OffsetDateTime) -> String {
    at.format(AT_FORMAT).unwrap_or_else(|_| at.to_string())
}

/// Base62 encoding of a connection id; `0` encodes as `"0"`.
#[must_use]
pub fn base62(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE62[usize::try_from(value % 62).unwrap_or_default()]);
        value /= 62;
    }
    digits.iter().rev().map(|digit| char::from(*digit)).collect()
}

/// SHA-256 over the lower-cased, whitespace-collapsed statement.
#[must_use]
pub fn statement_digest(sql: &str) -> String {
    let normalized = sql.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ");
    hex_encode(&Sha256::digest(normalized.as_bytes()))
}

/// Lower-case hex.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

/// Renders a duration as Go's `time.Duration` prints it.
#[must_use]
pub fn go_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return with_fraction(nanos, 1_000, 3, "µs");
    }
    if nanos < 1_000_000_000 {
        return with_fraction(nanos, 1_000_000, 6, "ms");
    }
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs / 60) % 60;
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h{minutes}m"));
    } else if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    let seconds = u128::from(secs % 60) * 1_000_000_000 + u128::from(duration.subsec_nanos());
    out.push_str(&with_fraction(seconds, 1_000_000_000, 9, "s"));
    out
}

/// `value / unit` with trailing fractional zeros trimmed.
fn with_fraction(value: u128, unit: u128, width: usize, suffix: &str) -> String {
    let whole = value / unit;
    let fraction = value % unit;
    if fraction == 0 {
        return format!("{whole}{suffix}");
    }
    let digits = format!("{fraction:0width$}");
    format!("{whole}.{}{suffix}", digits.trim_end_matches('0'))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
