// crates/mctech-interceptor/src/domain.rs
// ============================================================================
// Module: Domain
// Description: Owner of every process-wide MCTech service.
// Purpose: Start and stop the background workers and hand out the shared
//          interceptor, sequence supplier and crypto client.
// Dependencies: mctech-config, mctech-core, mctech-udf, mctech-worker, tokio
// ============================================================================

//! ## Overview
//! A [`Domain`] replaces hidden module-level singletons with one owned
//! object. It holds the deny-digest and cross-db schedulers, the sequence
//! supplier, the crypto client, the full SQL archive and the
//! [`Interceptor`]. [`Domain::start`] spawns the worker loops on the current
//! tokio runtime; [`Domain::stop`] signals them and stops the crypto key
//! loader, and [`Domain::wait_stopped`] waits for both loops.
//!
//! The `set_*` methods swap a service in place for tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

use mctech_config::McTechConfig;
use mctech_core::DbIndexSelector;
use mctech_core::HttpDbIndexSelector;
use mctech_core::LogSink;
use mctech_core::RpcClient;
use mctech_core::TraceSink;
use mctech_udf::CryptoClient;
use mctech_udf::FullSqlStore;
use mctech_udf::SequenceSupplier;
use mctech_udf::UdfError;
use mctech_udf::crypto_client;
use mctech_udf::sequence_supplier;
use mctech_worker::CROSS_DB_TABLE;
use mctech_worker::CrossDbWorker;
use mctech_worker::DENY_DIGEST_TABLE;
use mctech_worker::DenyDigestWorker;
use mctech_worker::Intervals;
use mctech_worker::Scheduler;
use mctech_worker::SqlExecutor;
use mctech_worker::WorkerResult;

use crate::error::InterceptResult;
use crate::interceptor::Interceptor;
use crate::interceptor::InterceptorParts;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Deny-digest reload and heartbeat period.
pub const DENY_DIGEST_INTERVAL: Duration = Duration::from_secs(10);

/// Cross-db rule reload period.
pub const CROSS_DB_INTERVAL: Duration = Duration::from_secs(30);

/// Everything a [`Domain`] needs besides configuration.
#[derive(Clone)]
pub struct DomainOptions {
    /// Internal SQL access for the workers.
    pub executor: Arc<dyn SqlExecutor>,
    /// Structured log.
    pub log: Arc<dyn LogSink>,
    /// Large query stanza destination.
    pub large_query_sink: Arc<dyn TraceSink>,
    /// Full SQL trace destination.
    pub trace_sink: Arc<dyn TraceSink>,
    /// DW slot resolver; the DW index service when `None`.
    pub selector: Option<Arc<dyn DbIndexSelector>>,
    /// Deny-digest system table.
    pub deny_digest_table: String,
    /// Cross-db system table.
    pub cross_db_table: String,
    /// Deny-digest period.
    pub deny_digest_interval: Duration,
    /// Cross-db period.
    pub cross_db_interval: Duration,
}

impl DomainOptions {
    /// Options with the default tables and periods.
    #[must_use]
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        log: Arc<dyn LogSink>,
        large_query_sink: Arc<dyn TraceSink>,
        trace_sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            executor,
            log,
            large_query_sink,
            trace_sink,
            selector: None,
            deny_digest_table: DENY_DIGEST_TABLE.to_string(),
            cross_db_table: CROSS_DB_TABLE.to_string(),
            deny_digest_interval: DENY_DIGEST_INTERVAL,
            cross_db_interval: CROSS_DB_INTERVAL,
        }
    }
}

// ============================================================================
// SECTION: Domain
// ============================================================================

/// Lifecycle owner of the MCTech services.
pub struct Domain {
    /// Active configuration.
    config: Arc<McTechConfig>,
    /// Deny-digest loop.
    deny_digests: Scheduler<DenyDigestWorker>,
    /// Cross-db rule loop.
    cross_db: Scheduler<CrossDbWorker>,
    /// Sequence supplier.
    sequence: RwLock<Arc<dyn SequenceSupplier>>,
    /// Crypto client.
    crypto: RwLock<Arc<dyn CryptoClient>>,
    /// Statement hooks.
    interceptor: RwLock<Arc<Interceptor>>,
    /// Full SQL archive.
    full_sql: FullSqlStore,
}

impl Domain {
    /// Builds every service for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error when a filter does not parse or a service client
    /// cannot be built.
    pub fn new(config: Arc<McTechConfig>, options: DomainOptions) -> InterceptResult<Self> {
        let deny_digests = Scheduler::new(
            DenyDigestWorker::new(options.deny_digest_table),
            Arc::clone(&options.executor),
            Arc::clone(&options.log),
            Intervals::every(options.deny_digest_interval),
        );
        let cross_db = Scheduler::new(
            CrossDbWorker::new(options.cross_db_table),
            Arc::clone(&options.executor),
            Arc::clone(&options.log),
            Intervals::every(options.cross_db_interval),
        );
        let selector = match options.selector {
            Some(selector) => selector,
            None => {
                let client = RpcClient::new().map_err(UdfError::from)?;
                Arc::new(HttpDbIndexSelector::new(config.db_checker.api_prefix.clone(), client))
            }
        };
        let parts = InterceptorParts {
            selector,
            deny_digests: Arc::clone(deny_digests.worker()),
            cross_db: Arc::clone(cross_db.worker()),
            large_query_sink: options.large_query_sink,
            trace_sink: options.trace_sink,
            log: Arc::clone(&options.log),
        };
        let interceptor = Interceptor::new(Arc::clone(&config), parts)?;
        let sequence = sequence_supplier(&config.sequence, Arc::clone(&options.log))?;
        let crypto = crypto_client(&config.encryption, options.log)?;
        let full_sql = FullSqlStore::from_config(&config.metrics.sql_trace);
        Ok(Self {
            config,
            deny_digests,
            cross_db,
            sequence: RwLock::new(sequence),
            crypto: RwLock::new(crypto),
            interceptor: RwLock::new(Arc::new(interceptor)),
            full_sql,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &McTechConfig {
        &self.config
    }

    /// Starts both worker loops. Must run inside a tokio runtime.
    pub fn start(&self) {
        self.deny_digests.start();
        self.cross_db.start();
    }

    /// Signals both loops and stops the crypto key loader.
    pub fn stop(&self) {
        self.deny_digests.stop();
        self.cross_db.stop();
        self.crypto().stop();
    }

    /// Waits for both loops to stop.
    ///
    /// # Errors
    ///
    /// Returns the first loop that missed the deadline.
    pub async fn wait_stopped(&self, timeout: Duration) -> WorkerResult<()> {
        self.deny_digests.wait_stopped(timeout).await?;
        self.cross_db.wait_stopped(timeout).await
    }

    /// Reloads both caches once on the caller's task.
    ///
    /// # Errors
    ///
    /// Returns the first reload failure.
    pub async fn reload_now(&self) -> WorkerResult<()> {
        self.deny_digests.reload_now().await?;
        self.cross_db.reload_now().await
    }

    /// Deny-digest loop.
    #[must_use]
    pub const fn deny_digests(&self) -> &Scheduler<DenyDigestWorker> {
        &self.deny_digests
    }

    /// Cross-db rule loop.
    #[must_use]
    pub const fn cross_db(&self) -> &Scheduler<CrossDbWorker> {
        &self.cross_db
    }

    /// Statement hooks.
    #[must_use]
    pub fn interceptor(&self) -> Arc<Interceptor> {
        Arc::clone(&self.interceptor.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Sequence supplier behind `MCTECH_SEQUENCE()`.
    #[must_use]
    pub fn sequence(&self) -> Arc<dyn SequenceSupplier> {
        Arc::clone(&self.sequence.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Crypto client behind `MCTECH_ENCRYPT` / `MCTECH_DECRYPT`.
    #[must_use]
    pub fn crypto(&self) -> Arc<dyn CryptoClient> {
        Arc::clone(&self.crypto.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Full SQL archive behind `MCTECH_GET_FULL_SQL`.
    #[must_use]
    pub const fn full_sql(&self) -> &FullSqlStore {
        &self.full_sql
    }

    /// Replaces the sequence supplier (tests).
    pub fn set_sequence(&self, sequence: Arc<dyn SequenceSupplier>) {
        *self.sequence.write().unwrap_or_else(PoisonError::into_inner) = sequence;
    }

    /// Replaces the crypto client (tests).
    pub fn set_crypto(&self, crypto: Arc<dyn CryptoClient>) {
        *self.crypto.write().unwrap_or_else(PoisonError::into_inner) = crypto;
    }

    /// Replaces the interceptor (tests).
    pub fn set_interceptor(&self, interceptor: Arc<Interceptor>) {
        *self.interceptor.write().unwrap_or_else(PoisonError::into_inner) = interceptor;
    }
}
