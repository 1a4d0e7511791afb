// crates/mctech-interceptor/src/session.rs
// ============================================================================
// Module: Session State
// Description: The host session facts and per-statement state the hooks use.
// Purpose: Own the statement context on the session instead of a typed key.
// Dependencies: mctech-core, time
// ============================================================================

//! ## Overview
//! A [`Session`] is what the host hands to every hook. The statement context
//! is an owned field: [`crate::Interceptor::before_parse_sql`] populates it,
//! [`crate::Interceptor::after_handle_stmt`] takes it back out, and nothing
//! carries over to the next statement except the session variables.
//! [`ExecStats`] is the execution summary the host reports when a statement
//! finishes.

use std::collections::BTreeMap;
use std::time::Duration;

use mctech_core::McTechContext;
use mctech_core::SessionFacts;
use mctech_core::SessionIdentity;
use time::OffsetDateTime;

use crate::mpp::MppOverride;

// ============================================================================
// SECTION: Session
// ============================================================================

/// Connection-level state seen by the hooks.
#[derive(Default)]
pub struct Session {
    /// Authenticated user.
    pub user: String,
    /// User host.
    pub host: String,
    /// Client address, when known.
    pub client_ip: Option<String>,
    /// Active roles.
    pub roles: Vec<String>,
    /// Current database, possibly empty.
    pub current_db: String,
    /// Connection id.
    pub connection_id: u64,
    /// Emit tenant slots instead of literal tenant codes.
    pub using_tenant_param: bool,
    /// The current statement is being prepared.
    pub in_prepare_stmt: bool,
    /// Internal statement issued by the server itself.
    pub restricted: bool,
    /// Session variables.
    pub vars: BTreeMap<String, String>,
    /// Context of the statement in flight.
    context: Option<McTechContext>,
    /// MPP variables replaced for the statement in flight.
    mpp: Option<MppOverride>,
    /// Text of the statement in flight, as the client sent it.
    sql: String,
    /// Physical databases the statement in flight referenced.
    dbs: Vec<String>,
    /// The current database changed during the statement in flight.
    db_changed: bool,
}

impl Session {
    /// Creates a session for `user` holding `roles`.
    #[must_use]
    pub fn new(user: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user: user.into(),
            host: "localhost".to_string(),
            roles,
            ..Self::default()
        }
    }

    /// Sets the current database.
    #[must_use]
    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.current_db = db.into();
        self
    }

    /// Identity used by preparation.
    #[must_use]
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            user: self.user.clone(),
            roles: self.roles.clone(),
        }
    }

    /// Facts captured into a new statement context.
    #[must_use]
    pub fn facts(&self) -> SessionFacts {
        SessionFacts {
            user: self.user.clone(),
            current_db: self.current_db.clone(),
            using_tenant_param: self.using_tenant_param,
            in_prepare_stmt: self.in_prepare_stmt,
        }
    }

    /// Context of the statement in flight.
    #[must_use]
    pub const fn context(&self) -> Option<&McTechContext> {
        self.context.as_ref()
    }

    /// Mutable context of the statement in flight.
    pub const fn context_mut(&mut self) -> Option<&mut McTechContext> {
        self.context.as_mut()
    }

    /// Databases referenced by the statement in flight.
    #[must_use]
    pub fn statement_dbs(&self) -> &[String] {
        &self.dbs
    }

    /// Text of the statement in flight.
    #[must_use]
    pub fn statement_sql(&self) -> &str {
        &self.sql
    }

    /// Starts a statement with a fresh context.
    pub(crate) fn begin_statement(&mut self, context: McTechContext, sql: &str) {
        self.context = Some(context);
        sql.clone_into(&mut self.sql);
        self.dbs.clear();
        self.db_changed = false;
    }

    /// Records the databases a statement referenced.
    pub(crate) fn set_statement_dbs(&mut self, dbs: Vec<String>) {
        self.dbs = dbs;
    }

    /// Moves to `db` after a mapped `USE`.
    pub(crate) fn change_db(&mut self, db: String) {
        if db != self.current_db {
            self.current_db = db;
            self.db_changed = true;
        }
    }

    /// Whether the statement in flight changed the current database.
    #[must_use]
    pub const fn db_changed(&self) -> bool {
        self.db_changed
    }

    /// Keeps the MPP variables to restore.
    pub(crate) fn save_mpp(&mut self, saved: MppOverride) {
        self.mpp = Some(saved);
    }

    /// Ends the statement: restores MPP variables and hands back the context.
    pub(crate) fn end_statement(&mut self) -> Option<McTechContext> {
        if let Some(saved) = self.mpp.take() {
            saved.restore(&mut self.vars);
        }
        self.context.take()
    }
}

// ============================================================================
// SECTION: Execution Summary
// ============================================================================

/// Execution summary of one finished statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecStats {
    /// Execution start (after parsing).
    pub started_at: OffsetDateTime,
    /// Execution time, excluding parse.
    pub query: Duration,
    /// Parse time.
    pub parse: Duration,
    /// Plan build time.
    pub compile: Duration,
    /// Rewrite time.
    pub rewrite: Duration,
    /// Optimize time.
    pub optimize: Duration,
    /// Coprocessor time.
    pub cop: Duration,
    /// Coprocessor process time.
    pub process: Duration,
    /// Coprocessor wait time.
    pub wait: Duration,
    /// Time spent sending results.
    pub send: Duration,
    /// Normalized statement digest, computed from the SQL when absent.
    pub digest: Option<String>,
    /// Peak memory in bytes.
    pub mem_max: i64,
    /// Peak disk in bytes.
    pub disk_max: i64,
    /// Keys written.
    pub write_keys: u64,
    /// Bytes written.
    pub write_size: u64,
    /// Keys scanned.
    pub total_keys: u64,
    /// Rows affected.
    pub affected_rows: u64,
    /// Rows returned.
    pub result_rows: i64,
    /// Encoded plan.
    pub plan: String,
}

impl Default for ExecStats {
    fn default() -> Self {
        Self {
            started_at: OffsetDateTime::UNIX_EPOCH,
            query: Duration::ZERO,
            parse: Duration::ZERO,
            compile: Duration::ZERO,
            rewrite: Duration::ZERO,
            optimize: Duration::ZERO,
            cop: Duration::ZERO,
            process: Duration::ZERO,
            wait: Duration::ZERO,
            send: Duration::ZERO,
            digest: None,
            mem_max: 0,
            disk_max: 0,
            write_keys: 0,
            write_size: 0,
            total_keys: 0,
            affected_rows: 0,
            result_rows: 0,
            plan: String::new(),
        }
    }
}

impl ExecStats {
    /// Total time including parse.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.query + self.parse
    }
}
