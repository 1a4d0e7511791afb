// crates/mctech-worker/src/digest.rs
// ============================================================================
// Module: Deny Digest Worker
// Description: Cache of denied statement digests with request write-back.
// Purpose: Reject statements whose digest is blocked until an expiry time.
// Dependencies: async-trait, mctech-core, time
// ============================================================================

//! ## Overview
//! [`DenyDigestWorker`] mirrors the unexpired rows of `mctech_deny_digest`.
//! A reload builds a fresh map and swaps it in whole, carrying entries that
//! survive the reload (and their pending request times) over by identity.
//! [`DenyDigestWorker::check`] is the execute-time gate: a hit records the
//! request time, and rejects while `now < expired_at`. The heartbeat writes
//! recorded request times back and clears each one only after its `UPDATE`
//! succeeded.
//!
//! Datetimes in the system table are read and written as UTC wall-clock text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::RwLock;

use async_trait::async_trait;
use mctech_core::McTechError;
use mctech_core::McTechResult;
use time::Date;
use time::OffsetDateTime;
use time::PrimitiveDateTime;
use time::Time;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::error::WorkerError;
use crate::error::WorkerResult;
use crate::executor::SqlExecutor;
use crate::executor::SqlValue;
use crate::scheduler::PolicyWorker;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default system table.
pub const DENY_DIGEST_TABLE: &str = "mysql.mctech_deny_digest";

/// Storage format for datetimes.
const DATETIME: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Storage format with fractional seconds.
const DATETIME_FRACTION: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");

/// Date-only storage format.
const DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Format used in rejection messages.
const RESUMED_AT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:4]");

// ============================================================================
// SECTION: Types
// ============================================================================

/// One denied digest.
#[derive(Debug)]
pub struct DenyDigestEntry {
    /// Instant the digest is allowed again.
    expired_at: Mutex<PrimitiveDateTime>,
    /// Last rejected or checked request, pending write-back.
    last_request_time: Mutex<Option<PrimitiveDateTime>>,
}

impl DenyDigestEntry {
    /// Creates an entry with no pending request.
    #[must_use]
    pub const fn new(expired_at: PrimitiveDateTime) -> Self {
        Self {
            expired_at: Mutex::new(expired_at),
            last_request_time: Mutex::new(None),
        }
    }

    /// Instant the digest is allowed again.
    #[must_use]
    pub fn expired_at(&self) -> PrimitiveDateTime {
        *self.expired_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pending request time.
    #[must_use]
    pub fn last_request_time(&self) -> Option<PrimitiveDateTime> {
        *self.last_request_time.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a request.
    pub fn set_last_request_time(&self, at: PrimitiveDateTime) {
        *self.last_request_time.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    /// Clears the pending request if it is still `at`.
    fn clear_last_request_time(&self, at: PrimitiveDateTime) {
        let mut pending = self.last_request_time.lock().unwrap_or_else(PoisonError::into_inner);
        if *pending == Some(at) {
            *pending = None;
        }
    }

    /// Updates the expiry in place.
    fn set_expired_at(&self, at: PrimitiveDateTime) {
        *self.expired_at.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

/// Snapshot type shared with readers.
type DigestMap = HashMap<String, Arc<DenyDigestEntry>>;

/// Deny digest cache.
pub struct DenyDigestWorker {
    /// Qualified system table name.
    table: String,
    /// Current snapshot.
    digests: RwLock<Arc<DigestMap>>,
}

impl DenyDigestWorker {
    /// Creates an empty cache reading `table`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            digests: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Entry for `digest`.
    #[must_use]
    pub fn get(&self, digest: &str) -> Option<Arc<DenyDigestEntry>> {
        self.snapshot().get(digest).cloned()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<DigestMap> {
        Arc::clone(&self.digests.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the snapshot (tests and offline seeding).
    pub fn set_all(&self, digests: DigestMap) {
        *self.digests.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(digests);
    }

    /// Execute-time gate for `digest` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`McTechError::DenyDigestHit`] while the digest is blocked.
    pub fn check(&self, digest: &str, now: PrimitiveDateTime) -> McTechResult<()> {
        let Some(entry) = self.get(digest) else {
            return Ok(());
        };
        entry.set_last_request_time(now);
        let expired_at = entry.expired_at();
        if now < expired_at {
            return Err(McTechError::DenyDigestHit {
                resumed_at: expired_at.format(RESUMED_AT).unwrap_or_else(|_| expired_at.to_string()),
                digest: digest.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyWorker for DenyDigestWorker {
    fn name(&self) -> &'static str {
        "deny-digest"
    }

    async fn reload(&self, executor: &dyn SqlExecutor) -> WorkerResult<()> {
        let sql = format!("SELECT digest, expired_at FROM {} WHERE expired_at >= ?1", self.table);
        let rows = executor.query(&sql, &[SqlValue::Text(format_datetime(now_utc()))]).await?;
        let previous = self.snapshot();
        let mut fresh = HashMap::with_capacity(rows.len());
        for row in rows {
            let digest = row.text(0)?;
            let expired_at = parse_datetime(&row.text(1)?).ok_or_else(|| WorkerError::Decode {
                column: 1,
                reason: "expired_at is not a datetime".to_string(),
            })?;
            let entry = match previous.get(&digest) {
                Some(entry) => {
                    entry.set_expired_at(expired_at);
                    Arc::clone(entry)
                }
                None => Arc::new(DenyDigestEntry::new(expired_at)),
            };
            fresh.insert(digest, entry);
        }
        self.set_all(fresh);
        Ok(())
    }

    async fn heartbeat(&self, executor: &dyn SqlExecutor) -> WorkerResult<()> {
        let sql = format!("UPDATE {} SET last_request_time = ?1 WHERE digest = ?2", self.table);
        for (digest, entry) in self.snapshot().iter() {
            let Some(at) = entry.last_request_time() else {
                continue;
            };
            executor.execute(&sql, &[SqlValue::Text(format_datetime(at)), SqlValue::from(digest.as_str())]).await?;
            entry.clear_last_request_time(at);
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Datetimes
// ============================================================================

/// Current UTC wall-clock time.
#[must_use]
pub fn now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// Formats a datetime for storage.
#[must_use]
pub fn format_datetime(at: PrimitiveDateTime) -> String {
    at.format(DATETIME).unwrap_or_else(|_| at.to_string())
}

/// Parses a stored datetime; date-only values mean midnight.
#[must_use]
pub fn parse_datetime(text: &str) -> Option<PrimitiveDateTime> {
    let text = text.trim();
    PrimitiveDateTime::parse(text, DATETIME)
        .or_else(|_| PrimitiveDateTime::parse(text, DATETIME_FRACTION))
        .ok()
        .or_else(|| Date::parse(text, DATE).ok().map(|date| PrimitiveDateTime::new(date, Time::MIDNIGHT)))
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

    #[test]
    fn datetimes_parse_in_all_stored_shapes() {
        assert!(parse_datetime("2024-05-01 10:11:12").is_some());
        assert!(parse_datetime("2024-05-01 10:11:12.345").is_some());
        assert_eq!(parse_datetime("9999-10-01"), Some(time::macros::datetime!(9999-10-01 0:00)));
        assert!(parse_datetime("tomorrow").is_none());
    }

    #[test]
    fn check_records_request_and_rejects_until_expiry() {
        let worker = DenyDigestWorker::new("t");
        let expiry = parse_datetime("2030-01-01 00:00:00").unwrap();
        let mut map = HashMap::new();
        map.insert("d2".to_string(), Arc::new(DenyDigestEntry::new(expiry)));
        worker.set_all(map);

        let before = parse_datetime("2029-12-31 23:59:59").unwrap();
        let err = worker.check("d2", before).unwrap_err();
        assert_eq!(
            err.to_string(),
            "current sql is rejected and resumed at '2030-01-01 00:00:00.0000' . digest: d2"
        );
        assert_eq!(worker.get("d2").unwrap().last_request_time(), Some(before));

        let after = parse_datetime("2030-01-02 00:00:00").unwrap();
        assert!(worker.check("d2", after).is_ok());
        assert!(worker.check("d1", before).is_ok());
    }

    #[test]
    fn clearing_keeps_newer_requests() {
        let entry = DenyDigestEntry::new(now_utc());
        let first = parse_datetime("2024-01-01 00:00:00").unwrap();
        let second = parse_datetime("2024-01-01 00:00:01").unwrap();
        entry.set_last_request_time(second);
        entry.clear_last_request_time(first);
        assert_eq!(entry.last_request_time(), Some(second));
    }
}
