// crates/mctech-interceptor/src/interceptor.rs
// ============================================================================
// Module: Statement Interceptor
// Description: Hooks the host calls around parsing and execution.
// Purpose: Run preparation, rewriting, policy checks and tracing in order.
// Dependencies: mctech-config, mctech-core, mctech-largequery, mctech-visitor,
//               mctech-worker, serde_json, time
// ============================================================================

//! ## Overview
//! The host drives one statement through these hooks:
//! 1. [`Interceptor::before_parse_sql`] prepares the raw SQL and stores the
//!    statement context on the [`Session`]; the returned text is parsed.
//! 2. [`Interceptor::after_parse_sql`] applies MPP overrides to queries, runs
//!    the DDL, misc and isolation extensions, the cross-database checker and
//!    the final tenant validation.
//! 3. [`Interceptor::check_deny_digest`] gates execution by digest.
//! 4. [`Interceptor::after_handle_stmt`] restores session variables and
//!    writes the large query and full SQL trace records.
//!
//! `PREPARE` bodies go through [`Interceptor::prepare_statement`], which
//! rewrites with tenant slots; [`Interceptor::bind_prepared`] fills the
//! slots when the prepared statement executes.
//!
//! Trace and log failures never fail a statement; they are logged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use mctech_config::McTechConfig;
use mctech_core::DbIndexSelector;
use mctech_core::LogLevel;
use mctech_core::LogRecord;
use mctech_core::LogSink;
use mctech_core::McTechContext;
use mctech_core::McTechError;
use mctech_core::TraceSink;
use mctech_core::log::truncate_utf8;
use mctech_core::prepare_sql;
use mctech_largequery::ExecDetail;
use mctech_largequery::LargeQueryLogItems;
use mctech_largequery::LargeQueryPolicy;
use mctech_largequery::LargeQueryWriter;
use mctech_largequery::SqlType;
use mctech_visitor::Extensions;
use mctech_visitor::Handled;
use mctech_visitor::Stmt;
use mctech_visitor::StmtKind;
use mctech_visitor::VersionColumn;
use mctech_visitor::bind_tenant_slots;
use mctech_visitor::parse_statement;
use mctech_visitor::validate;
use mctech_worker::CrossDbWorker;
use mctech_worker::DenyDigestWorker;
use mctech_worker::digest::now_utc;
use time::OffsetDateTime;

use crate::checker::CrossDbChecker;
use crate::error::InterceptError;
use crate::error::InterceptResult;
use crate::mpp::MppOverride;
use crate::session::ExecStats;
use crate::session::Session;
use crate::trace::TraceRecord;
use crate::trace::statement_digest;
use crate::trace::trace_kind;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Log target for interceptor records.
const LOG_TARGET: &str = "mctech_interceptor";

// ============================================================================
// SECTION: Parts
// ============================================================================

/// Shared services the interceptor consults.
#[derive(Clone)]
pub struct InterceptorParts {
    /// DW slot resolver for `*_dw` databases.
    pub selector: Arc<dyn DbIndexSelector>,
    /// Deny-digest cache.
    pub deny_digests: Arc<DenyDigestWorker>,
    /// Cross-db rule cache.
    pub cross_db: Arc<CrossDbWorker>,
    /// Large query stanza destination.
    pub large_query_sink: Arc<dyn TraceSink>,
    /// Full SQL trace destination.
    pub trace_sink: Arc<dyn TraceSink>,
    /// Structured log.
    pub log: Arc<dyn LogSink>,
}

// ============================================================================
// SECTION: Interceptor
// ============================================================================

/// Per-statement hooks.
pub struct Interceptor {
    /// Active configuration.
    config: Arc<McTechConfig>,
    /// DDL, misc and isolation extensions.
    extensions: Extensions,
    /// Cross-database checker.
    checker: CrossDbChecker,
    /// Large query stanza writer.
    large_query: LargeQueryWriter,
    /// Shared services.
    parts: InterceptorParts,
}

impl Interceptor {
    /// Builds the hooks for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error when a configured filter does not parse.
    pub fn new(config: Arc<McTechConfig>, parts: InterceptorParts) -> InterceptResult<Self> {
        let version = &config.ddl.version;
        let version = if version.enabled {
            Some(VersionColumn::new(&version.name, &version.db_matches)?)
        } else {
            None
        };
        let extensions = Extensions::new(version, config.tenant.enabled);
        let checker = CrossDbChecker::new(&config.db_checker, Arc::clone(&parts.log))?;
        let large = &config.metrics.large_query;
        let policy = LargeQueryPolicy {
            enabled: large.enabled,
            threshold: large.threshold,
            types: large.types.iter().filter_map(|kind| SqlType::parse(kind)).collect(),
        };
        let large_query = LargeQueryWriter::new(policy, Arc::clone(&parts.large_query_sink));
        Ok(Self {
            config,
            extensions,
            checker,
            large_query,
            parts,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &McTechConfig {
        &self.config
    }

    /// Shared services.
    #[must_use]
    pub const fn parts(&self) -> &InterceptorParts {
        &self.parts
    }

    // ------------------------------------------------------------------------
    // Parsing hooks
    // ------------------------------------------------------------------------

    /// Prepares `sql` and stores the statement context on the session.
    ///
    /// Returns the SQL to hand to the parser.
    ///
    /// # Errors
    ///
    /// Returns hint, action and role resolution failures.
    pub fn before_parse_sql(&self, session: &mut Session, sql: &str) -> InterceptResult<String> {
        session.end_statement();
        let prepared = prepare_sql(sql, &session.identity(), self.config.mpp.default_value)
            .inspect_err(|err| self.log_failure(session, sql, &err.to_string()))?;
        let context = McTechContext::new(prepared.result, session.facts(), Arc::clone(&self.parts.selector));
        session.begin_statement(context, sql);
        Ok(prepared.sql)
    }

    /// Rewrites and checks one parsed statement.
    ///
    /// `PREPARE` statements pass untouched; their body is handled by
    /// [`Self::prepare_statement`].
    ///
    /// # Errors
    ///
    /// Returns [`InterceptError::MissingContext`] without a prior
    /// [`Self::before_parse_sql`], and rewrite or policy failures.
    pub fn after_parse_sql(&self, session: &mut Session, stmt: &mut Stmt) -> InterceptResult<()> {
        let kind = stmt.kind();
        if kind == StmtKind::Prepare {
            return Ok(());
        }
        if stmt.is_query() {
            let mode = session.context().ok_or(InterceptError::MissingContext)?.prepare_result().mpp();
            if let Some(saved) = MppOverride::apply(mode, &mut session.vars) {
                session.save_mpp(saved);
            }
        }
        let sql = session.statement_sql().to_string();
        self.apply_and_check(session, stmt).inspect_err(|err| self.log_failure(session, &sql, &err.to_string()))?;
        self.log_query(session, kind, &sql);
        Ok(())
    }

    /// Parses and rewrites the body of a `PREPARE`, emitting tenant slots.
    ///
    /// # Errors
    ///
    /// Returns [`InterceptError::PrepareForbidden`] when `tenant.forbidden-prepare`
    /// is set, and parse, rewrite or policy failures.
    pub fn prepare_statement(&self, session: &mut Session, body: &str) -> InterceptResult<Stmt> {
        if self.config.tenant.forbidden_prepare {
            return Err(InterceptError::PrepareForbidden);
        }
        let mut stmt = parse_statement(body)?;
        let sql = session.statement_sql().to_string();
        session.context_mut().ok_or(InterceptError::MissingContext)?.set_using_tenant_param(true);
        self.apply_and_check(session, &mut stmt).inspect_err(|err| self.log_failure(session, body, &err.to_string()))?;
        self.log_query(session, StmtKind::Prepare, &sql);
        Ok(stmt)
    }

    /// Fills the tenant slots of a prepared statement; returns how many.
    ///
    /// # Errors
    ///
    /// Returns [`McTechError::TenantRequired`] when slots exist but the
    /// executing statement resolved no tenant.
    pub fn bind_prepared(&self, session: &Session, stmt: &mut Stmt) -> InterceptResult<usize> {
        let context = session.context().ok_or(InterceptError::MissingContext)?;
        let tenant = context.prepare_result().tenant_code();
        let bound = bind_tenant_slots(stmt, tenant);
        if bound > 0 && tenant.is_empty() {
            return Err(McTechError::TenantRequired(session.user.clone()).into());
        }
        Ok(bound)
    }

    /// Runs the extension chain, the checker and validation.
    fn apply_and_check(&self, session: &mut Session, stmt: &mut Stmt) -> InterceptResult<()> {
        let sql = session.statement_sql().to_string();
        let context = session.context_mut().ok_or(InterceptError::MissingContext)?;
        let (handled, resolved) = self.extensions.apply(context, stmt)?;
        match handled {
            Handled::Misc => {
                let db = context.current_db().to_string();
                session.change_db(db);
            }
            Handled::Isolation => {
                let dbs = resolved.schema.databases(context.current_db());
                if self.config.db_checker.enabled {
                    self.checker.check(context, &self.parts.cross_db, &sql, &dbs)?;
                }
                validate(context)?;
                session.set_statement_dbs(dbs);
            }
            Handled::Ddl | Handled::None => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Execution hooks
    // ------------------------------------------------------------------------

    /// Execute-time deny-digest gate.
    ///
    /// # Errors
    ///
    /// Returns [`McTechError::DenyDigestHit`] while `digest` is blocked.
    pub fn check_deny_digest(&self, session: &Session, digest: &str) -> InterceptResult<()> {
        if !self.config.sql_checker.enabled || session.restricted {
            return Ok(());
        }
        self.parts.deny_digests.check(digest, now_utc())?;
        Ok(())
    }

    /// Ends the statement: restores session variables and writes traces.
    ///
    /// Large query stanzas are written for failed statements too; the full
    /// SQL trace only records statements that succeeded.
    pub fn after_handle_stmt(&self, session: &mut Session, stmt: &Stmt, stats: &ExecStats, succeeded: bool) {
        let context = session.end_statement();
        if session.restricted {
            return;
        }
        let metrics = &self.config.metrics;
        if !metrics.large_query.enabled && !metrics.sql_trace.enabled {
            return;
        }
        if self.is_trace_ignored(session, context.as_ref()) {
            return;
        }
        let kind = stmt.kind();
        let sql = session.statement_sql();
        let digest = stats.digest.clone().unwrap_or_else(|| statement_digest(sql));
        if metrics.large_query.enabled {
            let items = self.large_query_items(session, context.as_ref(), kind, stats, &digest, succeeded);
            if let Err(err) = self.large_query.record(&items) {
                self.log_trace_error("large query log", &err.to_string());
            }
        }
        if !succeeded || !metrics.sql_trace.enabled {
            return;
        }
        let Some(tp) = trace_kind(kind) else {
            return;
        };
        let tenant = context.as_ref().map_or("", |context| context.prepare_result().tenant_code());
        let line = TraceRecord::build(session, tenant, tp, stats, sql, metrics.sql_trace.compress_threshold)
            .map_err(|err| err.to_string())
            .and_then(|record| serde_json::to_string(&record).map_err(|err| err.to_string()));
        match line {
            Ok(line) => self.parts.trace_sink.write_entry(&line),
            Err(err) => self.log_trace_error("sql trace", &err),
        }
    }

    /// Whether the statement's databases or the user's roles are excluded
    /// from tracing.
    fn is_trace_ignored(&self, session: &Session, context: Option<&McTechContext>) -> bool {
        let ignore = &self.config.metrics.sql_trace.ignore;
        if session.roles.iter().any(|role| ignore.by_roles.contains(role)) {
            return true;
        }
        let ignored = |db: &str| {
            ignore.by_databases.iter().any(|name| name.eq_ignore_ascii_case(db))
                || context.is_some_and(|context| {
                    let logical = context.to_logical(db);
                    ignore.by_databases.iter().any(|name| name.eq_ignore_ascii_case(&logical))
                })
        };
        ignored(&session.current_db) || session.statement_dbs().iter().any(|db| ignored(db))
    }

    /// Collects the large query stanza of a finished statement.
    fn large_query_items(
        &self,
        session: &Session,
        context: Option<&McTechContext>,
        kind: StmtKind,
        stats: &ExecStats,
        digest: &str,
        succeeded: bool,
    ) -> LargeQueryLogItems {
        let comments = context.map(|context| context.prepare_result().comments());
        let service = comments.and_then(|comments| comments.service.as_ref());
        LargeQueryLogItems {
            time: OffsetDateTime::now_utc(),
            user: (!session.user.is_empty()).then(|| session.user.clone()),
            host: session.host.clone(),
            client_ip: session.client_ip.clone(),
            time_total: stats.total(),
            time_parse: stats.parse,
            time_compile: stats.compile,
            time_rewrite: stats.rewrite,
            time_optimize: stats.optimize,
            exec_detail: ExecDetail {
                cop_time: stats.cop,
                process_time: stats.process,
                wait_time: stats.wait,
                write_keys: stats.write_keys,
                write_size: stats.write_size,
                total_keys: stats.total_keys,
            },
            db: session.current_db.clone(),
            db_changed: session.db_changed(),
            digest: digest.to_string(),
            mem_max: stats.mem_max,
            disk_max: stats.disk_max,
            result_rows: stats.result_rows,
            succ: succeeded,
            sql_type: sql_type(kind),
            app_name: service.map(|service| service.app_name.clone()).unwrap_or_default(),
            product_line: service.map(|service| service.product_line.clone()).unwrap_or_default(),
            package: comments.map(|comments| comments.package_name().to_string()).unwrap_or_default(),
            plan: stats.plan.clone(),
            sql: session.statement_sql().to_string(),
        }
    }

    // ------------------------------------------------------------------------
    // Logging
    // ------------------------------------------------------------------------

    /// Logs a statement the pipeline rejected.
    fn log_failure(&self, session: &Session, sql: &str, error: &str) {
        self.parts.log.record(
            &LogRecord::new(LogLevel::Warn, LOG_TARGET, "mctech SQL failed")
                .with_field("error", error)
                .with_field("user", session.user.as_str())
                .with_field("db", session.current_db.as_str())
                .with_field("conn", session.connection_id)
                .with_field("SQL", sql),
        );
    }

    /// Writes the query log record of an accepted statement.
    fn log_query(&self, session: &Session, kind: StmtKind, sql: &str) {
        let query_log = &self.config.metrics.query_log;
        if !query_log.enabled || session.restricted {
            return;
        }
        let logged = matches!(
            kind,
            StmtKind::Select
                | StmtKind::Insert
                | StmtKind::Update
                | StmtKind::Delete
                | StmtKind::Prepare
                | StmtKind::Execute
        );
        if !logged || self.is_trace_ignored(session, session.context()) {
            return;
        }
        self.parts.log.record(
            &LogRecord::new(LogLevel::Info, LOG_TARGET, "mctech SQL query log")
                .with_field("user", session.user.as_str())
                .with_field("db", session.current_db.as_str())
                .with_field("conn", session.connection_id)
                .with_field("SQL", truncate_utf8(sql, query_log.max_length)),
        );
    }

    /// Logs a trace write failure.
    fn log_trace_error(&self, what: &'static str, error: &str) {
        self.parts.log.record(
            &LogRecord::new(LogLevel::Warn, LOG_TARGET, "mctech trace failed")
                .with_field("trace", what)
                .with_field("error", error),
        );
    }
}

/// Large query statement type.
const fn sql_type(kind: StmtKind) -> SqlType {
    match kind {
        StmtKind::Select => SqlType::Select,
        StmtKind::Insert => SqlType::Insert,
        StmtKind::Update => SqlType::Update,
        StmtKind::Delete => SqlType::Delete,
        _ => SqlType::Other,
    }
}
