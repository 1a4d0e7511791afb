// crates/mctech-udf/src/full_sql.rs
// ============================================================================
// Module: Full SQL Archive
// Description: Lookup of archived, gzip-compressed statement text.
// Purpose: Back `MCTECH_GET_FULL_SQL(at, tx_id, group)`.
// Dependencies: flate2, mctech-config, time
// ============================================================================

//! ## Overview
//! Statements too long for the trace log are archived per transaction at
//! `{full-sql-dir}/{group}/{YYYY-MM-DD}/{hour}/{unix_ms}-{tx_id}.gz`. The
//! date and hour are taken from `at` in its own offset, so callers pass the
//! instant in the archive's local offset. A missing file is SQL `NULL`.

use std::fs::File;
use std::io;
use std::io::Read;
use std::path::PathBuf;

use flate2::read::GzDecoder;
use mctech_config::SqlTraceConfig;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::error::UdfError;
use crate::error::UdfResult;

/// Date directory format.
const DATE_DIR: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Archived full SQL reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullSqlStore {
    /// Archive root, when configured.
    dir: Option<PathBuf>,
    /// Group used when the caller passes none.
    default_group: String,
}

impl FullSqlStore {
    /// Creates a store rooted at `dir`.
    #[must_use]
    pub fn new(dir: Option<PathBuf>, default_group: impl Into<String>) -> Self {
        Self {
            dir,
            default_group: default_group.into(),
        }
    }

    /// Creates a store from `[metrics.sql-trace]`.
    #[must_use]
    pub fn from_config(config: &SqlTraceConfig) -> Self {
        Self::new(
            config.full_sql_dir.as_deref().filter(|dir| !dir.is_empty()).map(PathBuf::from),
            config.group.clone(),
        )
    }

    /// Path of the archive for `at` and `tx_id`.
    ///
    /// # Errors
    ///
    /// Returns [`UdfError::FullSqlDirUnset`] when no archive root is set.
    pub fn archive_path(&self, at: OffsetDateTime, tx_id: i64, group: &str) -> UdfResult<PathBuf> {
        let mut path = self.dir.clone().ok_or(UdfError::FullSqlDirUnset)?;
        let group = if group.is_empty() { self.default_group.as_str() } else { group };
        if !group.is_empty() {
            path.push(group);
        }
        let date = at.format(DATE_DIR).map_err(|err| full_sql_error(at, tx_id, group, &err.to_string()))?;
        path.push(date);
        path.push(at.hour().to_string());
        path.push(format!("{}-{tx_id}.gz", at.unix_timestamp_nanos() / 1_000_000));
        Ok(path)
    }

    /// Reads the archived statement; `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`UdfError::FullSqlDirUnset`] when no archive root is set and
    /// [`UdfError::FullSql`] when the archive cannot be read.
    pub fn get_full_sql(&self, at: OffsetDateTime, tx_id: i64, group: &str) -> UdfResult<Option<String>> {
        let path = self.archive_path(at, tx_id, group)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(full_sql_error(at, tx_id, group, &err.to_string())),
        };
        let mut sql = String::new();
        GzDecoder::new(file)
            .read_to_string(&mut sql)
            .map_err(|err| full_sql_error(at, tx_id, group, &err.to_string()))?;
        Ok(Some(sql))
    }
}

/// Builds a read failure.
fn full_sql_error(at: OffsetDateTime, tx_id: i64, group: &str, message: &str) -> UdfError {
    UdfError::FullSql {
        at: at.to_string(),
        tx_id,
        group: group.to_string(),
        message: message.to_string(),
    }
}
