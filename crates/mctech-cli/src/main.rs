// crates/mctech-cli/src/main.rs
// ============================================================================
// Module: MCTech CLI Entry Point
// Description: Command dispatcher for operator tasks.
// Purpose: Check configuration, rewrite statements offline and read large
//          query logs without a running server.
// Dependencies: clap, mctech-config, mctech-interceptor, mctech-largequery,
//               serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! `mctech` exposes the extension pipeline to operators:
//! - `config check` / `config example`: validate or print `mctech.toml`.
//! - `rewrite`: run one statement through the interceptor for a given user,
//!   role set and database and print the rewritten SQL.
//! - `digest`: print the fallback statement digest used by tracing.
//! - `large-query`: retrieve large query stanzas in a time window as JSON
//!   lines, oldest or newest first.
//!
//! No background workers run: deny digests and cross-db rules are empty, and
//! `*_dw` databases resolve to the slot given by `--dw-index`.

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use mctech_config::McTechConfig;
use mctech_config::config_toml_example;
use mctech_core::DbIndex;
use mctech_core::FixedDbIndexSelector;
use mctech_core::log::NoopLogSink;
use mctech_core::log::NoopTraceSink;
use mctech_interceptor::Interceptor;
use mctech_interceptor::InterceptorParts;
use mctech_interceptor::Session;
use mctech_interceptor::statement_digest;
use mctech_largequery::Checker;
use mctech_largequery::Direction;
use mctech_largequery::LargeQueryRetriever;
use mctech_largequery::LargeQueryRow;
use mctech_largequery::RetrieverOptions;
use mctech_largequery::TimeRange;
use mctech_visitor::Stmt;
use mctech_visitor::parse_statement;
use mctech_worker::CROSS_DB_TABLE;
use mctech_worker::CrossDbWorker;
use mctech_worker::DENY_DIGEST_TABLE;
use mctech_worker::DenyDigestWorker;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;
use time::PrimitiveDateTime;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Configuration used by `rewrite` when no file is given.
const DEFAULT_REWRITE_CONFIG: &str = "[tenant]\nenabled = true\n";

/// Plain datetime accepted for time bounds, read as UTC.
const PLAIN_DATETIME: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "mctech", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Rewrite one statement the way the server would.
    Rewrite(RewriteCommand),
    /// Print the fallback digest of a statement.
    Digest {
        /// Statement text.
        #[arg(long)]
        sql: String,
    },
    /// Read large query stanzas in a time window.
    LargeQuery(LargeQueryCommand),
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load, normalise and validate a configuration file.
    Check {
        /// Config file; `MCTECH_CONFIG` or `mctech.toml` when omitted.
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Print the canonical example configuration.
    Example,
}

/// Arguments for `rewrite`.
#[derive(Args, Debug)]
struct RewriteCommand {
    /// Statement text, hints included.
    #[arg(long)]
    sql: String,
    /// Session user.
    #[arg(long, default_value = "mctech")]
    user: String,
    /// Active role; repeat for several.
    #[arg(long = "role", value_name = "ROLE")]
    roles: Vec<String>,
    /// Current database.
    #[arg(long, default_value = "")]
    db: String,
    /// Config file; tenant isolation alone when omitted.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// DW slot for `*_dw` databases.
    #[arg(long, default_value_t = 1)]
    dw_index: i64,
    /// Treat the statement as a `PREPARE` body and keep tenant slots.
    #[arg(long)]
    prepare: bool,
    /// Print a JSON object with the tenant and databases.
    #[arg(long)]
    json: bool,
}

/// Arguments for `large-query`.
#[derive(Args, Debug)]
struct LargeQueryCommand {
    /// Current large query log; rotated files are read from its directory.
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
    /// Window start (RFC 3339, or `YYYY-MM-DD HH:MM:SS` in UTC).
    #[arg(long)]
    start: String,
    /// Window end; now when omitted.
    #[arg(long)]
    end: Option<String>,
    /// Newest first.
    #[arg(long)]
    desc: bool,
    /// Stop after this many rows.
    #[arg(long)]
    limit: Option<usize>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Commands::Config {
            command,
        } => command_config(command),
        Commands::Rewrite(command) => command_rewrite(&command),
        Commands::Digest {
            sql,
        } => {
            write_stdout(&statement_digest(&sql))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::LargeQuery(command) => command_large_query(&command),
    }
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Runs a config subcommand.
fn command_config(command: ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Check {
            config,
        } => {
            let config = McTechConfig::load(config.as_deref())
                .map_err(|err| CliError::new(format!("config check failed: {err}")))?;
            write_stdout(&config_summary(&config).to_string())?;
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommand::Example => {
            write_stdout(config_toml_example().trim_end())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// The normalised values an operator usually wants to confirm.
fn config_summary(config: &McTechConfig) -> Value {
    let checker = &config.db_checker;
    let ignore = &config.metrics.sql_trace.ignore;
    json!({
        "status": "ok",
        "tenant": config.tenant.enabled,
        "db_checker": {
            "enabled": checker.enabled,
            "mutex": checker.mutex,
            "exclude": checker.exclude,
            "across": checker.across_groups(),
            "excepts": checker.excepts,
        },
        "sql_checker": config.sql_checker.enabled,
        "large_query": config.metrics.large_query.enabled,
        "sql_trace": {
            "enabled": config.metrics.sql_trace.enabled,
            "ignore_databases": ignore.by_databases,
            "ignore_roles": ignore.by_roles,
        },
    })
}

// ============================================================================
// SECTION: Rewrite
// ============================================================================

/// Runs `rewrite`.
fn command_rewrite(command: &RewriteCommand) -> CliResult<ExitCode> {
    let config = match &command.config {
        Some(path) => McTechConfig::load(Some(path.as_path())),
        None => McTechConfig::from_toml_str(DEFAULT_REWRITE_CONFIG),
    }
    .map_err(|err| CliError::new(err.to_string()))?;
    let interceptor = offline_interceptor(config, command.dw_index)?;
    let mut session = Session::new(command.user.clone(), command.roles.clone()).with_db(command.db.clone());
    let stmt = rewrite(&interceptor, &mut session, &command.sql, command.prepare)?;
    if command.json {
        let tenant = session.context().map_or("", |context| context.prepare_result().tenant_code());
        let output = json!({
            "sql": stmt.to_string(),
            "tenant": tenant,
            "dbs": session.statement_dbs(),
            "current_db": session.current_db,
        });
        write_stdout(&output.to_string())?;
    } else {
        write_stdout(&stmt.to_string())?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Interceptor with empty policy caches and discarded traces.
fn offline_interceptor(config: McTechConfig, dw_index: i64) -> CliResult<Interceptor> {
    let index = DbIndex::new(dw_index).map_err(|err| CliError::new(err.to_string()))?;
    let parts = InterceptorParts {
        selector: Arc::new(FixedDbIndexSelector::new(index)),
        deny_digests: Arc::new(DenyDigestWorker::new(DENY_DIGEST_TABLE)),
        cross_db: Arc::new(CrossDbWorker::new(CROSS_DB_TABLE)),
        large_query_sink: Arc::new(NoopTraceSink),
        trace_sink: Arc::new(NoopTraceSink),
        log: Arc::new(NoopLogSink),
    };
    Interceptor::new(Arc::new(config), parts).map_err(|err| CliError::new(err.to_string()))
}

/// Drives `sql` through the parsing hooks.
fn rewrite(interceptor: &Interceptor, session: &mut Session, sql: &str, prepare: bool) -> CliResult<Stmt> {
    let failed = |err: &dyn std::fmt::Display| CliError::new(format!("rewrite failed: {err}"));
    let prepared = interceptor.before_parse_sql(session, sql).map_err(|err| failed(&err))?;
    if prepare {
        return interceptor.prepare_statement(session, &prepared).map_err(|err| failed(&err));
    }
    let mut stmt = parse_statement(&prepared).map_err(|err| failed(&err))?;
    interceptor.after_parse_sql(session, &mut stmt).map_err(|err| failed(&err))?;
    Ok(stmt)
}

// ============================================================================
// SECTION: Large Query
// ============================================================================

/// Runs `large-query`.
fn command_large_query(command: &LargeQueryCommand) -> CliResult<ExitCode> {
    let start = parse_time(&command.start)?;
    let end = match &command.end {
        Some(end) => parse_time(end)?,
        None => OffsetDateTime::now_utc(),
    };
    if end < start {
        return Err(CliError::new("large-query: --end is before --start".to_string()));
    }
    let direction = if command.desc { Direction::Reverse } else { Direction::Forward };
    let options = RetrieverOptions::new(&command.file, Checker::with_ranges(vec![TimeRange::new(start, end)]))
        .with_direction(direction);
    let mut retriever = LargeQueryRetriever::open(options).map_err(|err| CliError::new(err.to_string()))?;
    let limit = command.limit.unwrap_or(usize::MAX);
    let mut written = 0_usize;
    while written < limit {
        let Some(batch) = retriever.next_batch().map_err(|err| CliError::new(err.to_string()))? else {
            break;
        };
        for row in batch.iter().take(limit - written) {
            write_stdout(&row_json(row)?.to_string())?;
            written += 1;
        }
    }
    retriever.close();
    for warning in retriever.warnings() {
        write_stderr(&format!("warning: {warning}"))?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Reads a time bound as RFC 3339 or a plain UTC datetime.
fn parse_time(text: &str) -> CliResult<OffsetDateTime> {
    let text = text.trim();
    if let Ok(at) = OffsetDateTime::parse(text, &Rfc3339) {
        return Ok(at);
    }
    PrimitiveDateTime::parse(text, PLAIN_DATETIME)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|err| CliError::new(format!("invalid time `{text}`: {err}")))
}

/// One row as a JSON object.
fn row_json(row: &LargeQueryRow) -> CliResult<Value> {
    let time = row.time.format(&Rfc3339).map_err(|err| CliError::new(err.to_string()))?;
    Ok(json!({
        "time": time,
        "user": row.user,
        "host": row.host,
        "query_time": row.query_time,
        "parse_time": row.parse_time,
        "compile_time": row.compile_time,
        "rewrite_time": row.rewrite_time,
        "optimize_time": row.optimize_time,
        "cop_time": row.cop_time,
        "process_time": row.process_time,
        "wait_time": row.wait_time,
        "write_keys": row.write_keys,
        "write_size": row.write_size,
        "total_keys": row.total_keys,
        "db": row.db,
        "digest": row.digest,
        "mem_max": row.mem_max,
        "disk_max": row.disk_max,
        "result_rows": row.result_rows,
        "succ": row.succ,
        "sql_length": row.sql_length,
        "sql_type": row.sql_type,
        "app_name": row.app_name,
        "product_line": row.product_line,
        "package": row.package,
        "plan": row.plan,
        "query": row.query,
    }))
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a single line to stderr.
fn write_stderr(message: &str) -> CliResult<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}").map_err(|err| CliError::new(format!("failed to write stderr: {err}")))
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr(message);
    ExitCode::FAILURE
}
