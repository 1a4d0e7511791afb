// crates/mctech-largequery/src/retriever.rs
// ============================================================================
// Module: Large Query Retriever
// Description: Concurrent, ordered reader over rotated large query logs.
// Purpose: Stream typed rows filtered by time ranges and caller privilege.
// Dependencies: std threads, time
// ============================================================================

//! ## Overview
//! [`LargeQueryRetriever::open`] lists the files to read and starts a reader
//! thread. The reader splits each file into stanzas and hands batches to
//! parse threads, at most `concurrency` at once. Every batch gets its own
//! one-shot result channel; the receivers are queued in read order, so
//! [`LargeQueryRetriever::next_batch`] yields rows in file order however the
//! parse threads finish. In reverse mode the file list and each file's
//! stanzas are reversed before batching.
//!
//! Closing (or dropping) the retriever cancels outstanding work and joins
//! the reader, which in turn joins its parse threads.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use crate::checker::Checker;
use crate::error::LargeQueryError;
use crate::error::LargeQueryResult;
use crate::files::LogFile;
use crate::files::collect_log_files;
use crate::files::read_line;
use crate::row::LargeQueryRow;
use crate::stanza::ROW_PREFIX;
use crate::stanza::SPACE_MARK;
use crate::stanza::SQL_SUFFIX;
use crate::stanza::START_PREFIX;
use crate::stanza::USER_AND_HOST;
use crate::stanza::field;
use crate::stanza::parse_time;
use crate::stanza::statement_from_line;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Stanzas per parse batch.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Parse threads running at once.
pub const DEFAULT_CONCURRENCY: usize = 15;

/// Read order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Oldest first.
    #[default]
    Forward,
    /// Newest first.
    Reverse,
}

/// Retrieval settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieverOptions {
    /// Current log file; rotated files are found next to it.
    pub path: PathBuf,
    /// Read order.
    pub direction: Direction,
    /// Visibility rules.
    pub checker: Checker,
    /// Parse threads running at once.
    pub concurrency: usize,
    /// Stanzas per parse batch.
    pub batch_size: usize,
}

impl RetrieverOptions {
    /// Forward retrieval of `path` with default batching.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, checker: Checker) -> Self {
        Self {
            path: path.into(),
            direction: Direction::Forward,
            checker,
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets the read order.
    #[must_use]
    pub const fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

// ============================================================================
// SECTION: Memory And Stats
// ============================================================================

/// Bytes held by in-flight batches and the last fetched rows.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    /// Current usage.
    current: AtomicI64,
    /// Peak usage.
    max: AtomicI64,
}

impl MemoryTracker {
    /// Adds `bytes` (negative to release).
    pub fn consume(&self, bytes: i64) {
        let now = self.current.fetch_add(bytes, Ordering::Relaxed).saturating_add(bytes);
        self.max.fetch_max(now, Ordering::Relaxed);
    }

    /// Current usage.
    #[must_use]
    pub fn consumed(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Peak usage.
    #[must_use]
    pub fn max_consumed(&self) -> i64 {
        self.max.load(Ordering::Relaxed)
    }
}

/// Runtime statistics of one retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieverStats {
    /// File discovery time.
    pub initialize: Duration,
    /// Time spent reading files.
    pub read_file: Duration,
    /// Summed parse time across threads.
    pub parse_log: Duration,
    /// Parse thread limit.
    pub concurrency: usize,
    /// Files selected.
    pub total_files: usize,
    /// Files read so far.
    pub read_files: usize,
    /// Bytes read so far.
    pub read_size: u64,
}

impl fmt::Display for RetrieverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "initialize: {}, read_file: {}, parse_log: {{time:{}, concurrency:{}}}, total_file: {}, read_file: {}, \
             read_size: {}",
            format_duration(self.initialize),
            format_duration(self.read_file),
            format_duration(self.parse_log),
            self.concurrency,
            self.total_files,
            self.read_files,
            format_bytes(self.read_size)
        )
    }
}

/// Formats a duration with two decimals in its largest unit.
fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros < 1_000 {
        format!("{micros}µs")
    } else if micros < 1_000_000 {
        format!("{}.{:02}ms", micros / 1_000, (micros % 1_000) / 10)
    } else {
        format!("{}.{:02}s", micros / 1_000_000, (micros % 1_000_000) / 10_000)
    }
}

/// Formats a byte count with two decimals in its largest unit.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} Bytes");
    }
    let mut scale = 1024_u64;
    let mut unit = UNITS[0];
    for next in &UNITS[1 ..] {
        if bytes < scale.saturating_mul(1024) {
            break;
        }
        scale = scale.saturating_mul(1024);
        unit = next;
    }
    format!("{}.{:02} {unit}", bytes / scale, (bytes % scale) * 100 / scale)
}

/// State shared by the reader, the parse threads and the consumer.
#[derive(Debug, Default)]
struct Shared {
    /// Set once the retrieval is closed.
    cancelled: AtomicBool,
    /// Accumulated warnings.
    warnings: Mutex<Vec<String>>,
    /// Memory accounting.
    memory: MemoryTracker,
    /// Summed parse nanoseconds.
    parse_nanos: AtomicU64,
    /// Summed read nanoseconds.
    read_nanos: AtomicU64,
    /// Files read.
    read_files: AtomicUsize,
    /// Bytes read.
    read_bytes: AtomicU64,
}

impl Shared {
    /// True once the retrieval is closed.
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Appends warnings.
    fn warn(&self, warnings: Vec<String>) {
        if !warnings.is_empty() {
            self.warnings.lock().unwrap_or_else(PoisonError::into_inner).extend(warnings);
        }
    }
}

/// Saturating nanoseconds of `duration`.
fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: Retriever
// ============================================================================

/// Rows of one parse batch.
type BatchResult = LargeQueryResult<Vec<LargeQueryRow>>;

/// One stanza with the file line it starts on.
#[derive(Debug, Clone)]
struct Stanza {
    /// One-based line number of the `# TIME:` line.
    first_line: usize,
    /// Raw lines.
    lines: Vec<String>,
}

/// Streaming large query reader.
pub struct LargeQueryRetriever {
    /// State shared with background threads.
    shared: Arc<Shared>,
    /// Result receivers in read order.
    tasks: Option<mpsc::Receiver<mpsc::Receiver<BatchResult>>>,
    /// Reader thread.
    reader: Option<JoinHandle<()>>,
    /// File discovery time.
    initialize: Duration,
    /// Files selected.
    total_files: usize,
    /// Parse thread limit.
    concurrency: usize,
    /// Bytes accounted for the last returned batch.
    last_fetch: i64,
}

impl LargeQueryRetriever {
    /// Lists the files and starts reading.
    ///
    /// # Errors
    ///
    /// Returns an error when the log directory cannot be listed or the
    /// reader thread cannot start.
    pub fn open(options: RetrieverOptions) -> LargeQueryResult<Self> {
        let started = Instant::now();
        let mut warnings = Vec::new();
        let mut files = collect_log_files(&options.path, &options.checker, &mut warnings)?;
        if options.direction == Direction::Reverse {
            files.reverse();
        }
        let initialize = started.elapsed();

        let shared = Arc::new(Shared::default());
        shared.warn(warnings);
        let concurrency = options.concurrency.max(1);
        let batch_size = options.batch_size.max(1);
        let total_files = files.len();
        let (task_tx, task_rx) = mpsc::sync_channel(concurrency);
        let reader_shared = Arc::clone(&shared);
        let checker = Arc::new(options.checker);
        let direction = options.direction;
        let reader = thread::Builder::new()
            .name("mctech-large-query-reader".to_string())
            .spawn(move || {
                read_loop(files, direction, batch_size, concurrency, &checker, &reader_shared, &task_tx);
            })
            .map_err(|err| LargeQueryError::Thread(format!("failed to spawn large query reader: {err}")))?;

        Ok(Self {
            shared,
            tasks: Some(task_rx),
            reader: Some(reader),
            initialize,
            total_files,
            concurrency,
            last_fetch: 0,
        })
    }

    /// Next non-empty batch of rows; `None` once every file is read.
    ///
    /// # Errors
    ///
    /// Returns the first read or parse failure.
    pub fn next_batch(&mut self) -> LargeQueryResult<Option<Vec<LargeQueryRow>>> {
        self.shared.memory.consume(-self.last_fetch);
        self.last_fetch = 0;
        let Some(tasks) = &self.tasks else {
            return Ok(None);
        };
        loop {
            let Ok(task) = tasks.recv() else {
                return Ok(None);
            };
            let rows =
                task.recv().map_err(|_| LargeQueryError::Thread("large query parse thread exited".to_string()))??;
            if rows.is_empty() {
                continue;
            }
            self.last_fetch = estimated_size(&rows);
            self.shared.memory.consume(self.last_fetch);
            return Ok(Some(rows));
        }
    }

    /// Drains every remaining row.
    ///
    /// # Errors
    ///
    /// Returns the first read or parse failure.
    pub fn collect_all(&mut self) -> LargeQueryResult<Vec<LargeQueryRow>> {
        let mut rows = Vec::new();
        while let Some(batch) = self.next_batch()? {
            rows.extend(batch);
        }
        Ok(rows)
    }

    /// Warnings collected so far.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.shared.warnings.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Memory accounting.
    #[must_use]
    pub fn memory(&self) -> &MemoryTracker {
        &self.shared.memory
    }

    /// Runtime statistics so far.
    #[must_use]
    pub fn stats(&self) -> RetrieverStats {
        RetrieverStats {
            initialize: self.initialize,
            read_file: Duration::from_nanos(self.shared.read_nanos.load(Ordering::Relaxed)),
            parse_log: Duration::from_nanos(self.shared.parse_nanos.load(Ordering::Relaxed)),
            concurrency: self.concurrency,
            total_files: self.total_files,
            read_files: self.shared.read_files.load(Ordering::Relaxed),
            read_size: self.shared.read_bytes.load(Ordering::Relaxed),
        }
    }

    /// Cancels outstanding work and waits for the background threads.
    pub fn close(&mut self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
        self.tasks = None;
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.shared.memory.consume(-self.last_fetch);
        self.last_fetch = 0;
    }
}

impl Drop for LargeQueryRetriever {
    fn drop(&mut self) {
        self.close();
    }
}

/// Approximate heap size of `rows`.
fn estimated_size(rows: &[LargeQueryRow]) -> i64 {
    let bytes: usize = rows
        .iter()
        .map(|row| {
            size_of::<LargeQueryRow>()
                + row.user.len()
                + row.host.len()
                + row.db.len()
                + row.digest.len()
                + row.sql_type.len()
                + row.app_name.len()
                + row.product_line.len()
                + row.package.len()
                + row.plan.len()
                + row.query.len()
        })
        .sum();
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

// ============================================================================
// SECTION: Reader Thread
// ============================================================================

/// Reads files in order and dispatches parse batches.
///
/// Forward reads hand a batch to a parse thread as soon as it fills, so at
/// most one batch per file is buffered. Reverse reads buffer the whole file
/// before dispatching newest first. Buffered stanzas are charged to the
/// memory tracker until their parse thread finishes.
fn read_loop(
    files: Vec<LogFile>,
    direction: Direction,
    batch_size: usize,
    concurrency: usize,
    checker: &Arc<Checker>,
    shared: &Arc<Shared>,
    tasks: &mpsc::SyncSender<mpsc::Receiver<BatchResult>>,
) {
    let mut dispatcher = Dispatcher::new(concurrency, checker, shared, tasks);

    for file in files {
        if shared.is_cancelled() {
            break;
        }
        let started = Instant::now();
        let waited_before = dispatcher.waited;
        let mut pending = Pending::new(shared);
        let mut open = true;
        let read = read_stanzas(&file, shared, |stanza| {
            pending.push(stanza);
            if direction == Direction::Forward && pending.len() >= batch_size {
                open = dispatcher.send(pending.take());
            }
            open
        });
        let waited = dispatcher.waited.saturating_sub(waited_before);
        shared.read_nanos.fetch_add(nanos(started.elapsed().saturating_sub(waited)), Ordering::Relaxed);
        if let Err(err) = read {
            dispatcher.fail(err);
            break;
        }
        if !open {
            break;
        }

        match direction {
            Direction::Forward => {
                if !pending.is_empty() && !dispatcher.send(pending.take()) {
                    break;
                }
            }
            Direction::Reverse => {
                while let Some(batch) = pending.take_newest(batch_size) {
                    open = dispatcher.send(batch);
                    if !open {
                        break;
                    }
                }
                if !open {
                    break;
                }
            }
        }
    }

    dispatcher.join();
}

/// Approximate heap size of a stanza's lines.
fn stanza_bytes(stanza: &Stanza) -> i64 {
    let bytes: usize = stanza.lines.iter().map(String::len).sum();
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

/// Approximate heap size of a batch.
fn batch_bytes(batch: &[Stanza]) -> i64 {
    batch.iter().map(stanza_bytes).fold(0, i64::saturating_add)
}

/// Stanzas read from one file and not yet handed to a parse thread.
///
/// Dropping it releases whatever is still buffered.
struct Pending<'s> {
    /// Memory accounting.
    shared: &'s Shared,
    /// Buffered stanzas in file order.
    stanzas: Vec<Stanza>,
    /// Bytes charged for `stanzas`.
    bytes: i64,
}

impl<'s> Pending<'s> {
    /// Empty buffer.
    const fn new(shared: &'s Shared) -> Self {
        Self {
            shared,
            stanzas: Vec::new(),
            bytes: 0,
        }
    }

    /// Buffers a stanza and charges its bytes.
    fn push(&mut self, stanza: Stanza) {
        let size = stanza_bytes(&stanza);
        self.shared.memory.consume(size);
        self.bytes = self.bytes.saturating_add(size);
        self.stanzas.push(stanza);
    }

    /// Number of buffered stanzas.
    const fn len(&self) -> usize {
        self.stanzas.len()
    }

    /// True when nothing is buffered.
    const fn is_empty(&self) -> bool {
        self.stanzas.is_empty()
    }

    /// Takes every buffered stanza; the charge moves with the batch.
    fn take(&mut self) -> Vec<Stanza> {
        self.bytes = 0;
        std::mem::take(&mut self.stanzas)
    }

    /// Takes up to `size` of the newest stanzas, newest first.
    fn take_newest(&mut self, size: usize) -> Option<Vec<Stanza>> {
        if self.stanzas.is_empty() {
            return None;
        }
        let start = self.stanzas.len().saturating_sub(size);
        let mut batch = self.stanzas.split_off(start);
        batch.reverse();
        self.bytes = self.bytes.saturating_sub(batch_bytes(&batch));
        Some(batch)
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        self.shared.memory.consume(-self.bytes);
    }
}

/// Hands batches to parse threads, at most `concurrency` at once.
struct Dispatcher<'r> {
    /// Permit slots; a send blocks while every slot is taken.
    permit_tx: mpsc::SyncSender<()>,
    /// Permits released by finishing parse threads.
    permit_rx: Arc<Mutex<mpsc::Receiver<()>>>,
    /// Visibility rules.
    checker: &'r Arc<Checker>,
    /// Shared state.
    shared: &'r Arc<Shared>,
    /// Result receivers in read order.
    tasks: &'r mpsc::SyncSender<mpsc::Receiver<BatchResult>>,
    /// Spawned parse threads.
    workers: Vec<JoinHandle<()>>,
    /// Time spent waiting for permits or the consumer.
    waited: Duration,
}

impl<'r> Dispatcher<'r> {
    /// Dispatcher with `concurrency` permits.
    fn new(
        concurrency: usize,
        checker: &'r Arc<Checker>,
        shared: &'r Arc<Shared>,
        tasks: &'r mpsc::SyncSender<mpsc::Receiver<BatchResult>>,
    ) -> Self {
        let (permit_tx, permit_rx) = mpsc::sync_channel::<()>(concurrency);
        Self {
            permit_tx,
            permit_rx: Arc::new(Mutex::new(permit_rx)),
            checker,
            shared,
            tasks,
            workers: Vec::new(),
            waited: Duration::ZERO,
        }
    }

    /// Frees one permit slot.
    fn release_permit(&self) {
        let _ = self.permit_rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
    }

    /// Starts a parse thread for `batch`; false once reading must stop.
    ///
    /// The batch's memory charge is released by the parse thread, or here
    /// when no thread takes it.
    fn send(&mut self, batch: Vec<Stanza>) -> bool {
        let size = batch_bytes(&batch);
        let started = Instant::now();
        let admitted = !self.shared.is_cancelled() && self.permit_tx.send(()).is_ok();
        if !admitted {
            self.waited += started.elapsed();
            self.shared.memory.consume(-size);
            return false;
        }
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let queued = self.tasks.send(result_rx).is_ok();
        self.waited += started.elapsed();
        if !queued {
            self.release_permit();
            self.shared.memory.consume(-size);
            return false;
        }
        let worker_checker = Arc::clone(self.checker);
        let worker_shared = Arc::clone(self.shared);
        let worker_permits = Arc::clone(&self.permit_rx);
        let spawned = thread::Builder::new().name("mctech-large-query-parser".to_string()).spawn(move || {
            let result = parse_batch(&batch, &worker_checker, &worker_shared);
            let _ = result_tx.send(result);
            let _ = worker_permits.lock().unwrap_or_else(PoisonError::into_inner).recv();
        });
        match spawned {
            Ok(handle) => {
                self.workers.push(handle);
                true
            }
            Err(_) => {
                self.release_permit();
                self.shared.memory.consume(-size);
                false
            }
        }
    }

    /// Queues a failed task so the consumer sees `err` in read order.
    fn fail(&self, err: LargeQueryError) {
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let _ = result_tx.send(Err(err));
        let _ = self.tasks.send(result_rx);
    }

    /// Waits for every parse thread.
    fn join(self) {
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

/// True when `line` closes a stanza.
fn ends_stanza(line: &str) -> bool {
    line.ends_with(SQL_SUFFIX) && !line.starts_with("use") && !line.starts_with(ROW_PREFIX)
}

/// Streams one file's stanzas to `emit`; lines outside a stanza are dropped.
///
/// Reading stops early when `emit` returns false. A stanza still open at the
/// end of the file is dropped with a warning.
fn read_stanzas(file: &LogFile, shared: &Shared, mut emit: impl FnMut(Stanza) -> bool) -> LargeQueryResult<()> {
    let mut reader = file.open()?;
    shared.read_files.fetch_add(1, Ordering::Relaxed);
    shared.read_bytes.fetch_add(file.size(), Ordering::Relaxed);

    let mut current: Option<Stanza> = None;
    let mut buf = Vec::new();
    let mut line_no = 0_usize;
    while let Some(line) =
        read_line(reader.as_mut(), &mut buf).map_err(|err| LargeQueryError::io(&file.path, &err))?
    {
        line_no += 1;
        if line.starts_with(START_PREFIX) {
            if shared.is_cancelled() {
                return Err(LargeQueryError::Cancelled);
            }
            current = Some(Stanza {
                first_line: line_no,
                lines: Vec::with_capacity(16),
            });
        }
        let Some(stanza) = current.as_mut() else {
            continue;
        };
        let closes = ends_stanza(&line);
        stanza.lines.push(line);
        if closes
            && let Some(stanza) = current.take()
            && !emit(stanza)
        {
            return Ok(());
        }
    }
    if let Some(stanza) = current {
        shared.warn(vec![unterminated_warning(&file.path, stanza.first_line)]);
    }
    Ok(())
}

/// Warning text for a stanza cut off by the end of its file.
fn unterminated_warning(path: &Path, line: usize) -> String {
    format!("Parse slow log at line {line}, stanza has no terminating `;` before the end of {}", path.display())
}

// ============================================================================
// SECTION: Stanza Parsing
// ============================================================================

/// Parses one batch, then releases its memory charge.
fn parse_batch(batch: &[Stanza], checker: &Checker, shared: &Shared) -> BatchResult {
    let started = Instant::now();

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    let mut outcome = Ok(());
    for stanza in batch {
        if shared.is_cancelled() {
            outcome = Err(LargeQueryError::Cancelled);
            break;
        }
        if let Some(row) = parse_stanza(stanza, checker, &mut warnings) {
            rows.push(row);
        }
    }

    shared.memory.consume(-batch_bytes(batch));
    shared.parse_nanos.fetch_add(nanos(started.elapsed()), Ordering::Relaxed);
    shared.warn(warnings);
    outcome.map(|()| rows)
}

/// Warning text for a field that failed to parse.
fn field_warning(line: usize, name: &str, value: &str, error: &str) -> String {
    format!("Parse slow log at line {line}, failed field is {name}, failed value is {value}, error is {error}")
}

/// Text before the bracketed part of a `USER@HOST` half.
fn user_or_host(text: &str) -> String {
    text.split('[').next().unwrap_or_default().trim().to_string()
}

/// True for upper-case field names.
fn is_field_name(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|byte| byte.is_ascii_uppercase() || byte.is_ascii_digit() || byte == b'_')
}

/// Splits `A: 1 B: 2` into name and value pairs.
fn split_by_colon(line: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let Some((mut name, mut rest)) = line.split_once(SPACE_MARK) else {
        return pairs;
    };
    loop {
        match next_field(rest) {
            Some((value_end, next_name, next_rest)) => {
                pairs.push((name, &rest[.. value_end]));
                name = next_name;
                rest = next_rest;
            }
            None => {
                pairs.push((name, rest));
                return pairs;
            }
        }
    }
}

/// Finds the next ` NAME: ` inside `text`.
fn next_field(text: &str) -> Option<(usize, &str, &str)> {
    let mut from = 0;
    while let Some(offset) = text[from ..].find(SPACE_MARK) {
        let colon = from + offset;
        if let Some(space) = text[.. colon].rfind(' ') {
            let candidate = &text[space + 1 .. colon];
            if is_field_name(candidate) {
                return Some((space, candidate, &text[colon + SPACE_MARK.len() ..]));
            }
        }
        from = colon + SPACE_MARK.len();
    }
    None
}

/// Parses one stanza into a row, or `None` when it is filtered out.
fn parse_stanza(stanza: &Stanza, checker: &Checker, warnings: &mut Vec<String>) -> Option<LargeQueryRow> {
    let mut lines = stanza.lines.iter().enumerate();
    let time_text = lines.next()?.1.strip_prefix(START_PREFIX)?;
    let time = match parse_time(time_text) {
        Ok(time) => time,
        Err(err) => {
            warnings.push(field_warning(stanza.first_line, field::TIME, time_text, &err.to_string()));
            return None;
        }
    };
    if !checker.is_time_valid(time) {
        return None;
    }

    let mut row = LargeQueryRow::new(time);
    let mut user = String::new();
    for (index, line) in lines {
        let line_no = stanza.first_line + index;
        if let Some(body) = line.strip_prefix(ROW_PREFIX) {
            if let Some(value) = body.strip_prefix(USER_AND_HOST).and_then(|rest| rest.strip_prefix(SPACE_MARK)) {
                let Some((user_part, host_part)) = value.split_once('@') else {
                    continue;
                };
                user = user_or_host(user_part);
                if !checker.has_privilege(&user) {
                    return None;
                }
                row.user.clone_from(&user);
                row.host = user_or_host(host_part);
                continue;
            }
            for (name, value) in split_by_colon(body) {
                if let Err(err) = row.set_field(name, value) {
                    warnings.push(field_warning(line_no, name, value, &err));
                }
            }
        } else if line.ends_with(SQL_SUFFIX) {
            if line.starts_with("use") {
                continue;
            }
            if !checker.has_privilege(&user) {
                return None;
            }
            row.query = match statement_from_line(line) {
                Ok(sql) => sql,
                Err(err) => {
                    warnings.push(field_warning(line_no, field::QUERY, line, &err.to_string()));
                    line.clone()
                }
            };
            return Some(row);
        } else {
            return None;
        }
    }
    None
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

    use time::macros::datetime;

    use super::*;

    fn stanza(lines: &[&str]) -> Stanza {
        Stanza {
            first_line: 10,
            lines: lines.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn exec_detail_line_splits_into_fields() {
        assert_eq!(split_by_colon("COP_TIME: 0.17 PROCESS_TIME: 0.07 WRITE_KEYS: 3"), vec![
            ("COP_TIME", "0.17"),
            ("PROCESS_TIME", "0.07"),
            ("WRITE_KEYS", "3"),
        ]);
        assert_eq!(split_by_colon("PLAN: a b: c"), vec![("PLAN", "a b: c")]);
        assert!(split_by_colon("no separator").is_empty());
    }

    #[test]
    fn stanza_parses_user_fields_and_statement() {
        let mut warnings = Vec::new();
        let row = parse_stanza(
            &stanza(&[
                "# TIME: 2024-05-01T10:00:00Z",
                "# USER@HOST: root[root] @ localhost [127.0.0.1]",
                "# COP_TIME: 0.5 TOTAL_KEYS: 9",
                "# MEM_MAX: nope",
                "use test;",
                "select 1;",
            ]),
            &Checker::default(),
            &mut warnings,
        )
        .unwrap();
        assert_eq!(row.time, datetime!(2024-05-01 10:00 UTC));
        assert_eq!(row.user, "root");
        assert_eq!(row.host, "localhost");
        assert_eq!(row.total_keys, 9);
        assert_eq!(row.query, "select 1;");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Parse slow log at line 13, failed field is MEM_MAX, failed value is nope"));
    }

    #[test]
    fn foreign_users_and_bad_times_are_dropped() {
        let checker = Checker {
            user: Some("alice".to_string()),
            ..Checker::default()
        };
        let mut warnings = Vec::new();
        let lines = ["# TIME: 2024-05-01T10:00:00Z", "# USER@HOST: bob[bob] @ h [h]", "select 1;"];
        assert!(parse_stanza(&stanza(&lines), &checker, &mut warnings).is_none());
        assert!(parse_stanza(&stanza(&["# TIME: yesterday", "select 1;"]), &checker, &mut warnings).is_none());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn pending_charges_buffer_and_hands_out_newest_first() {
        let shared = Shared::default();
        {
            let mut pending = Pending::new(&shared);
            for first_line in 0 .. 5 {
                pending.push(Stanza {
                    first_line,
                    lines: vec!["select 1;".to_string()],
                });
            }
            assert_eq!(shared.memory.consumed(), 45);
            let newest = pending.take_newest(2).unwrap();
            let lines: Vec<usize> = newest.iter().map(|stanza| stanza.first_line).collect();
            assert_eq!(lines, [4, 3]);
            shared.memory.consume(-batch_bytes(&newest));
            assert_eq!(pending.len(), 3);
        }
        assert_eq!(shared.memory.consumed(), 0);
        assert_eq!(shared.memory.max_consumed(), 45);
    }

    #[test]
    fn stats_render_without_debug_formatting() {
        let stats = RetrieverStats {
            initialize: Duration::from_micros(1_500),
            read_file: Duration::from_micros(20),
            parse_log: Duration::from_secs(2),
            concurrency: 15,
            total_files: 2,
            read_files: 1,
            read_size: 1536,
        };
        assert_eq!(
            stats.to_string(),
            "initialize: 1.50ms, read_file: 20µs, parse_log: {time:2.00s, concurrency:15}, total_file: 2, \
             read_file: 1, read_size: 1.50 KB"
        );
    }

    #[test]
    fn memory_tracker_keeps_peak() {
        let tracker = MemoryTracker::default();
        tracker.consume(100);
        tracker.consume(-60);
        tracker.consume(20);
        assert_eq!(tracker.consumed(), 60);
        assert_eq!(tracker.max_consumed(), 100);
    }
}
