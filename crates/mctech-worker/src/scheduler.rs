// crates/mctech-worker/src/scheduler.rs
// ============================================================================
// Module: Worker Scheduler
// Description: Lifecycle and tick loop shared by the policy workers.
// Purpose: Run reload and heartbeat ticks until stopped, surviving failures.
// Dependencies: async-trait, mctech-core, tokio
// ============================================================================

//! ## Overview
//! [`Scheduler`] owns one [`PolicyWorker`] and drives it from a background
//! tokio task:
//!
//! ```text
//! Created --start--> Running --stop--> Stopping --loop exit--> Stopped
//!    \------------------------stop-------------------------------^
//! ```
//!
//! The loop selects between cancellation, the reload ticker and the
//! heartbeat ticker. Reload and heartbeat failures are logged at `warn` and
//! retried on the next tick. A panic inside the loop is caught by a
//! supervising task, logged at `error` and kept as the scheduler's final
//! error; the status still reaches `Stopped`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use mctech_core::LogLevel;
use mctech_core::LogRecord;
use mctech_core::LogSink;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::WorkerError;
use crate::error::WorkerResult;
use crate::executor::SqlExecutor;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Log target for scheduler records.
const LOG_TARGET: &str = "mctech_worker";

/// Upper bound for one heartbeat pass.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// SECTION: Types
// ============================================================================

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Constructed, not started.
    Created,
    /// Loop running.
    Running,
    /// Stop requested; loop still finishing.
    Stopping,
    /// Loop finished (or never started).
    Stopped,
}

/// Tick intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    /// Period between reloads.
    pub reload: Duration,
    /// Period between heartbeat passes.
    pub heartbeat: Duration,
}

impl Intervals {
    /// Same period for reload and heartbeat.
    #[must_use]
    pub const fn every(period: Duration) -> Self {
        Self {
            reload: period,
            heartbeat: period,
        }
    }
}

/// A cache refreshed from system tables.
#[async_trait]
pub trait PolicyWorker: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Replaces the cached snapshot with fresh rows.
    async fn reload(&self, executor: &dyn SqlExecutor) -> WorkerResult<()>;

    /// Writes usage metadata back.
    async fn heartbeat(&self, _executor: &dyn SqlExecutor) -> WorkerResult<()> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Scheduler
// ============================================================================

/// Drives a [`PolicyWorker`] from a background task.
pub struct Scheduler<W: PolicyWorker> {
    /// Driven worker.
    worker: Arc<W>,
    /// System table access.
    executor: Arc<dyn SqlExecutor>,
    /// Log sink.
    logger: Arc<dyn LogSink>,
    /// Tick periods.
    intervals: Intervals,
    /// Lifecycle state.
    status: Arc<watch::Sender<WorkerStatus>>,
    /// Cancellation flag observed by the loop.
    cancel: watch::Sender<bool>,
    /// Failure that ended the loop.
    error: Arc<Mutex<Option<WorkerError>>>,
}

impl<W: PolicyWorker> Scheduler<W> {
    /// Creates a scheduler in the `Created` state.
    #[must_use]
    pub fn new(
        worker: W,
        executor: Arc<dyn SqlExecutor>,
        logger: Arc<dyn LogSink>,
        intervals: Intervals,
    ) -> Self {
        let (status, _) = watch::channel(WorkerStatus::Created);
        let (cancel, _) = watch::channel(false);
        Self {
            worker: Arc::new(worker),
            executor,
            logger,
            intervals,
            status: Arc::new(status),
            cancel,
            error: Arc::new(Mutex::new(None)),
        }
    }

    /// The driven worker.
    #[must_use]
    pub const fn worker(&self) -> &Arc<W> {
        &self.worker
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        *self.status.borrow()
    }

    /// Failure that ended the loop, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<WorkerError> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Reloads once on the caller's task.
    ///
    /// # Errors
    ///
    /// Returns the worker's reload failure.
    pub async fn reload_now(&self) -> WorkerResult<()> {
        self.worker.reload(self.executor.as_ref()).await
    }

    /// Starts the loop. Only the first call from `Created` has an effect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let started = self.status.send_if_modified(|status| {
            if *status == WorkerStatus::Created {
                *status = WorkerStatus::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return;
        }
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.worker),
            Arc::clone(&self.executor),
            Arc::clone(&self.logger),
            self.intervals,
            self.cancel.subscribe(),
        ));
        let status = Arc::clone(&self.status);
        let error = Arc::clone(&self.error);
        let logger = Arc::clone(&self.logger);
        let name = self.worker.name();
        tokio::spawn(async move {
            if let Err(join) = task.await
                && join.is_panic()
            {
                let message = panic_message(join.into_panic().as_ref());
                logger.record(
                    &LogRecord::new(LogLevel::Error, LOG_TARGET, "scheduler worker panic")
                        .with_field("worker", name)
                        .with_field("recover", message.clone()),
                );
                *error.lock().unwrap_or_else(PoisonError::into_inner) = Some(WorkerError::Panicked {
                    name,
                    message,
                });
            }
            status.send_replace(WorkerStatus::Stopped);
        });
    }

    /// Requests the loop to stop.
    pub fn stop(&self) {
        self.status.send_if_modified(|status| match *status {
            WorkerStatus::Created => {
                *status = WorkerStatus::Stopped;
                true
            }
            WorkerStatus::Running => {
                *status = WorkerStatus::Stopping;
                true
            }
            WorkerStatus::Stopping | WorkerStatus::Stopped => false,
        });
        self.cancel.send_replace(true);
    }

    /// Waits until the loop has stopped or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Timeout`] when the deadline passes first. The
    /// loop is left to finish on its own.
    pub async fn wait_stopped(&self, timeout: Duration) -> WorkerResult<()> {
        let mut receiver = self.status.subscribe();
        let stopped = async move {
            receiver.wait_for(|status| *status == WorkerStatus::Stopped).await.map(|_| ())
        };
        match tokio::time::timeout(timeout, stopped).await {
            Ok(_) => Ok(()),
            Err(_) => Err(WorkerError::Timeout(self.worker.name())),
        }
    }
}

impl<W: PolicyWorker> Drop for Scheduler<W> {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

// ============================================================================
// SECTION: Loop
// ============================================================================

/// Tick loop; returns when cancelled.
async fn run_loop<W: PolicyWorker>(
    worker: Arc<W>,
    executor: Arc<dyn SqlExecutor>,
    logger: Arc<dyn LogSink>,
    intervals: Intervals,
    mut cancel: watch::Receiver<bool>,
) {
    let mut reload = tokio::time::interval(intervals.reload);
    reload.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat = tokio::time::interval(intervals.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        if *cancel.borrow() {
            return;
        }
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = reload.tick() => {
                if let Err(err) = worker.reload(executor.as_ref()).await {
                    warn(logger.as_ref(), worker.name(), "fail to reload data", &err);
                }
            }
            _ = heartbeat.tick() => {
                match tokio::time::timeout(HEARTBEAT_TIMEOUT, worker.heartbeat(executor.as_ref())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn(logger.as_ref(), worker.name(), "fail to update heart beat", &err),
                    Err(_) => warn(
                        logger.as_ref(),
                        worker.name(),
                        "fail to update heart beat",
                        &WorkerError::Timeout(worker.name()),
                    ),
                }
            }
        }
    }
}

/// Logs a recoverable tick failure.
fn warn(logger: &dyn LogSink, worker: &'static str, message: &str, err: &WorkerError) {
    logger.record(
        &LogRecord::new(LogLevel::Warn, LOG_TARGET, message)
            .with_field("worker", worker)
            .with_field("error", err.to_string()),
    );
}

/// Renders a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
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

    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use mctech_core::log::MemoryLogSink;

    use super::*;
    use crate::executor::SqliteExecutor;

    struct Counting {
        reloads: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PolicyWorker for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn reload(&self, _executor: &dyn SqlExecutor) -> WorkerResult<()> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WorkerError::Executor("boom".to_string()));
            }
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl PolicyWorker for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn reload(&self, _executor: &dyn SqlExecutor) -> WorkerResult<()> {
            panic!("reload exploded");
        }
    }

    fn scheduler<W: PolicyWorker>(worker: W, logger: Arc<MemoryLogSink>) -> Scheduler<W> {
        let executor: Arc<dyn SqlExecutor> = Arc::new(SqliteExecutor::open_in_memory().unwrap());
        Scheduler::new(worker, executor, logger, Intervals::every(Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn lifecycle_reaches_stopped() {
        let logger = Arc::new(MemoryLogSink::new());
        let scheduler = scheduler(
            Counting {
                reloads: AtomicUsize::new(0),
                fail: false,
            },
            logger,
        );
        assert_eq!(scheduler.status(), WorkerStatus::Created);
        scheduler.start();
        assert_eq!(scheduler.status(), WorkerStatus::Running);
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop();
        scheduler.wait_stopped(Duration::from_secs(5)).await.unwrap();
        assert_eq!(scheduler.status(), WorkerStatus::Stopped);
        assert!(scheduler.worker().reloads.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn stop_before_start_is_immediate() {
        let scheduler = scheduler(
            Counting {
                reloads: AtomicUsize::new(0),
                fail: false,
            },
            Arc::new(MemoryLogSink::new()),
        );
        scheduler.stop();
        assert_eq!(scheduler.status(), WorkerStatus::Stopped);
        scheduler.start();
        assert_eq!(scheduler.status(), WorkerStatus::Stopped);
        scheduler.wait_stopped(Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn reload_failures_are_logged_and_retried() {
        let logger = Arc::new(MemoryLogSink::new());
        let scheduler = scheduler(
            Counting {
                reloads: AtomicUsize::new(0),
                fail: true,
            },
            Arc::clone(&logger),
        );
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop();
        scheduler.wait_stopped(Duration::from_secs(5)).await.unwrap();
        assert!(scheduler.worker().reloads.load(Ordering::SeqCst) >= 2);
        assert!(logger.records().iter().any(|record| record.message == "fail to reload data"));
        assert!(scheduler.last_error().is_none());
    }

    #[tokio::test]
    async fn panics_are_caught_and_recorded() {
        let logger = Arc::new(MemoryLogSink::new());
        let scheduler = scheduler(Panicking, Arc::clone(&logger));
        scheduler.start();
        scheduler.wait_stopped(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(scheduler.last_error(), Some(WorkerError::Panicked { name: "panicking", .. })));
        assert!(logger.records().iter().any(|record| record.level == LogLevel::Error));
    }
}
