// crates/mctech-largequery/src/row.rs
// ============================================================================
// Module: Large Query Rows
// Description: Typed row assembled from one parsed stanza.
// Purpose: Convert `# FIELD: value` pairs into typed columns.
// Dependencies: time
// ============================================================================

//! ## Overview
//! [`LargeQueryRow::set_field`] applies one field. Unknown field names are
//! ignored so newer writers stay readable; values that fail to parse are
//! reported to the caller, who turns them into warnings.

use time::OffsetDateTime;

use crate::stanza::field;
use crate::stanza::parse_time;

/// One retrieved large query.
#[derive(Debug, Clone, PartialEq)]
pub struct LargeQueryRow {
    /// Stanza time.
    pub time: OffsetDateTime,
    /// Session user.
    pub user: String,
    /// Client host.
    pub host: String,
    /// Total time in seconds.
    pub query_time: f64,
    /// Parse time in seconds.
    pub parse_time: f64,
    /// Compile time in seconds.
    pub compile_time: f64,
    /// Rewrite time in seconds.
    pub rewrite_time: f64,
    /// Optimize time in seconds.
    pub optimize_time: f64,
    /// Coprocessor time in seconds.
    pub cop_time: f64,
    /// Coprocessor process time in seconds.
    pub process_time: f64,
    /// Coprocessor wait time in seconds.
    pub wait_time: f64,
    /// Keys written.
    pub write_keys: u64,
    /// Bytes written.
    pub write_size: u64,
    /// Keys scanned.
    pub total_keys: u64,
    /// Current database.
    pub db: String,
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
    /// Statement length in bytes.
    pub sql_length: i64,
    /// Statement kind.
    pub sql_type: String,
    /// Calling application.
    pub app_name: String,
    /// Calling product line.
    pub product_line: String,
    /// Calling package.
    pub package: String,
    /// Encoded plan.
    pub plan: String,
    /// Statement text.
    pub query: String,
}

impl LargeQueryRow {
    /// Creates an empty row stamped `time`.
    #[must_use]
    pub fn new(time: OffsetDateTime) -> Self {
        Self {
            time,
            user: String::new(),
            host: String::new(),
            query_time: 0.0,
            parse_time: 0.0,
            compile_time: 0.0,
            rewrite_time: 0.0,
            optimize_time: 0.0,
            cop_time: 0.0,
            process_time: 0.0,
            wait_time: 0.0,
            write_keys: 0,
            write_size: 0,
            total_keys: 0,
            db: String::new(),
            digest: String::new(),
            mem_max: 0,
            disk_max: 0,
            result_rows: 0,
            succ: false,
            sql_length: 0,
            sql_type: String::new(),
            app_name: String::new(),
            product_line: String::new(),
            package: String::new(),
            plan: String::new(),
            query: String::new(),
        }
    }

    /// Applies one field.
    ///
    /// # Errors
    ///
    /// Returns the parse failure text when `value` does not fit the field.
    pub fn set_field(&mut self, name: &str, value: &str) -> Result<(), String> {
        match name {
            field::TIME => self.time = parse_time(value).map_err(|err| err.to_string())?,
            field::USER => value.clone_into(&mut self.user),
            field::HOST => value.clone_into(&mut self.host),
            field::QUERY_TIME => self.query_time = parse_f64(value)?,
            field::PARSE_TIME => self.parse_time = parse_f64(value)?,
            field::COMPILE_TIME => self.compile_time = parse_f64(value)?,
            field::REWRITE_TIME => self.rewrite_time = parse_f64(value)?,
            field::OPTIMIZE_TIME => self.optimize_time = parse_f64(value)?,
            field::COP_TIME => self.cop_time = parse_f64(value)?,
            field::PROCESS_TIME => self.process_time = parse_f64(value)?,
            field::WAIT_TIME => self.wait_time = parse_f64(value)?,
            field::WRITE_KEYS => self.write_keys = value.parse().map_err(|err| format!("{err}"))?,
            field::WRITE_SIZE => self.write_size = value.parse().map_err(|err| format!("{err}"))?,
            field::TOTAL_KEYS => self.total_keys = value.parse().map_err(|err| format!("{err}"))?,
            field::DB => value.clone_into(&mut self.db),
            field::DIGEST => value.clone_into(&mut self.digest),
            field::MEM_MAX => self.mem_max = parse_i64(value)?,
            field::DISK_MAX => self.disk_max = parse_i64(value)?,
            field::RESULT_ROWS => self.result_rows = parse_i64(value)?,
            field::SQL_LENGTH => self.sql_length = parse_i64(value)?,
            field::SUCC => self.succ = value.parse().map_err(|err| format!("{err}"))?,
            field::SQL_TYPE => value.clone_into(&mut self.sql_type),
            field::APP_NAME => value.clone_into(&mut self.app_name),
            field::PRODUCT_LINE => value.clone_into(&mut self.product_line),
            field::PACKAGE => value.clone_into(&mut self.package),
            field::PLAN => value.clone_into(&mut self.plan),
            field::QUERY => value.clone_into(&mut self.query),
            _ => {}
        }
        Ok(())
    }
}

/// Parses a float column.
fn parse_f64(value: &str) -> Result<f64, String> {
    value.parse().map_err(|err| format!("{err}"))
}

/// Parses an integer column.
fn parse_i64(value: &str) -> Result<i64, String> {
    value.parse().map_err(|err| format!("{err}"))
}
