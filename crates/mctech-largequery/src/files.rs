// crates/mctech-largequery/src/files.rs
// ============================================================================
// Module: Large Query Files
// Description: Discovery of the current and rotated large query logs.
// Purpose: Pick the files whose time span overlaps the requested ranges.
// Dependencies: flate2, time
// ============================================================================

//! ## Overview
//! Rotated files share the current file's path minus its extension as a
//! prefix (`mctech_large_query_log.log` rotates into
//! `mctech_large_query_log-2024-05-01T10-00-00.000.log`, optionally
//! gzip-compressed). Each candidate's span is read from its first and last
//! `# TIME:` lines; files that cannot be read or carry no header are skipped
//! with a warning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;

use flate2::read::GzDecoder;
use time::OffsetDateTime;

use crate::checker::Checker;
use crate::error::LargeQueryError;
use crate::error::LargeQueryResult;
use crate::stanza::START_PREFIX;
use crate::stanza::parse_time;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lines scanned for a `# TIME:` header at either end of a file.
const MAX_SCAN_LINES: usize = 128;

/// First block size of the backward scan.
const TAIL_BLOCK: usize = 4096;

// ============================================================================
// SECTION: Types
// ============================================================================

/// One log file selected for reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    /// File path.
    pub path: PathBuf,
    /// First stanza time, when the span was checked.
    pub start: Option<OffsetDateTime>,
    /// Last stanza time, when the span was checked.
    pub end: Option<OffsetDateTime>,
}

impl LogFile {
    /// True when the file is gzip-compressed.
    #[must_use]
    pub fn is_gzip(&self) -> bool {
        is_gzip(&self.path)
    }

    /// Opens the file for line reading.
    ///
    /// # Errors
    ///
    /// Returns [`LargeQueryError::Io`] when the file cannot be opened.
    pub fn open(&self) -> LargeQueryResult<Box<dyn BufRead + Send>> {
        open_lines(&self.path)
    }

    /// On-disk size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map_or(0, |meta| meta.len())
    }
}

/// True when `path` names a gzip file.
fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Opens `path` as a line reader, decompressing gzip files.
fn open_lines(path: &Path) -> LargeQueryResult<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|err| LargeQueryError::io(path, &err))?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Reads one line without its terminator; `None` at end of input.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn read_line(reader: &mut dyn BufRead, buf: &mut Vec<u8>) -> io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    while buf.last().is_some_and(|byte| *byte == b'\n' || *byte == b'\r') {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

// ============================================================================
// SECTION: Discovery
// ============================================================================

/// Lists the files a retrieval reads, sorted by start time.
///
/// Without a time check only the current file is read, and a missing file
/// means there is nothing to read.
///
/// # Errors
///
/// Returns [`LargeQueryError::Io`] when the log directory cannot be listed.
pub fn collect_log_files(
    path: &Path,
    checker: &Checker,
    warnings: &mut Vec<String>,
) -> LargeQueryResult<Vec<LogFile>> {
    if !checker.enable_time_check {
        if !path.is_file() {
            return Ok(Vec::new());
        }
        return Ok(vec![LogFile {
            path: path.to_path_buf(),
            start: None,
            end: None,
        }]);
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = path.with_extension("").to_string_lossy().into_owned();
    let entries = fs::read_dir(&dir).map_err(|err| LargeQueryError::io(&dir, &err))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warnings.push(err.to_string());
                continue;
            }
        };
        let candidate = dir.join(entry.file_name());
        if !candidate.is_file() || !candidate.to_string_lossy().starts_with(&prefix) {
            continue;
        }
        match file_span(&candidate, checker) {
            Ok(Some(file)) => files.push(file),
            Ok(None) => {}
            Err(err) => warnings.push(err.to_string()),
        }
    }
    files.sort_by_key(|file| file.start);
    Ok(files)
}

/// Reads the span of `path`; `None` when it lies outside every range.
fn file_span(path: &Path, checker: &Checker) -> LargeQueryResult<Option<LogFile>> {
    let Some(start) = start_time(path)? else {
        return Ok(None);
    };
    if checker.starts_after_all(start) {
        return Ok(None);
    }
    let end = if is_gzip(path) { gzip_end_time(path)? } else { plain_end_time(path)? };
    if !checker.overlaps(start, end) {
        return Ok(None);
    }
    Ok(Some(LogFile {
        path: path.to_path_buf(),
        start: Some(start),
        end: Some(end),
    }))
}

/// First `# TIME:` within the leading lines; `None` for an empty file.
fn start_time(path: &Path) -> LargeQueryResult<Option<OffsetDateTime>> {
    let mut reader = open_lines(path)?;
    let mut buf = Vec::new();
    for index in 0 .. MAX_SCAN_LINES {
        let line = read_line(reader.as_mut(), &mut buf).map_err(|err| LargeQueryError::io(path, &err))?;
        let Some(line) = line else {
            if index == 0 {
                return Ok(None);
            }
            break;
        };
        if let Some(value) = line.strip_prefix(START_PREFIX) {
            return parse_time(value).map(Some);
        }
    }
    Err(LargeQueryError::Malformed(path.display().to_string()))
}

/// Last `# TIME:` of a compressed file, found by streaming it.
fn gzip_end_time(path: &Path) -> LargeQueryResult<OffsetDateTime> {
    let mut reader = open_lines(path)?;
    let mut buf = Vec::new();
    let mut last = None;
    while let Some(line) = read_line(reader.as_mut(), &mut buf).map_err(|err| LargeQueryError::io(path, &err))? {
        if let Some(value) = line.strip_prefix(START_PREFIX) {
            last = Some(value.to_string());
        }
    }
    match last {
        Some(value) => parse_time(&value),
        None => Err(LargeQueryError::Malformed(path.display().to_string())),
    }
}

/// Last `# TIME:` within the trailing lines of a plain file.
fn plain_end_time(path: &Path) -> LargeQueryResult<OffsetDateTime> {
    let io_err = |err: io::Error| LargeQueryError::io(path, &err);
    let mut file = File::open(path).map_err(io_err)?;
    let mut cursor = file.metadata().map_err(io_err)?.len();
    let mut tail: Vec<u8> = Vec::new();
    let mut block = TAIL_BLOCK;
    while cursor > 0 {
        let step = usize::try_from(cursor).map_or(block, |left| left.min(block));
        cursor -= step as u64;
        file.seek(SeekFrom::Start(cursor)).map_err(io_err)?;
        let mut chunk = vec![0_u8; step];
        file.read_exact(&mut chunk).map_err(io_err)?;
        chunk.extend_from_slice(&tail);
        tail = chunk;

        let text = String::from_utf8_lossy(&tail);
        let mut lines: Vec<&str> = text.lines().collect();
        if cursor > 0 && !lines.is_empty() {
            lines.remove(0);
        }
        for line in lines.iter().rev() {
            if let Some(value) = line.strip_prefix(START_PREFIX) {
                return parse_time(value);
            }
        }
        if lines.len() >= MAX_SCAN_LINES {
            break;
        }
        block = block.saturating_mul(2);
    }
    Err(LargeQueryError::Malformed(path.display().to_string()))
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

    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use time::macros::datetime;

    use super::*;
    use crate::checker::TimeRange;

    fn stanza(time: &str) -> String {
        format!("# TIME: {time}\n# DB: test\nselect 1;\n")
    }

    #[test]
    fn disabled_time_check_reads_current_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.log");
        let mut warnings = Vec::new();
        assert!(collect_log_files(&path, &Checker::default(), &mut warnings).unwrap().is_empty());

        fs::write(&path, stanza("2024-05-01T10:00:00Z")).unwrap();
        fs::write(dir.path().join("large-1.log"), stanza("2024-05-01T09:00:00Z")).unwrap();
        let files = collect_log_files(&path, &Checker::default(), &mut warnings).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, path);
    }

    #[test]
    fn spans_select_and_order_rotated_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.log");
        fs::write(&path, [stanza("2024-05-01T12:00:00Z"), stanza("2024-05-01T13:00:00Z")].concat()).unwrap();
        fs::write(dir.path().join("large-a.log"), stanza("2024-05-01T08:00:00Z")).unwrap();
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all([stanza("2024-05-01T10:00:00Z"), stanza("2024-05-01T11:00:00Z")].concat().as_bytes()).unwrap();
        fs::write(dir.path().join("large-b.log.gz"), gz.finish().unwrap()).unwrap();
        fs::write(dir.path().join("large-c.log"), "no header\n").unwrap();
        fs::write(dir.path().join("other.log"), stanza("2024-05-01T10:30:00Z")).unwrap();

        let checker = Checker::with_ranges(vec![TimeRange::new(
            datetime!(2024-05-01 10:30 UTC),
            datetime!(2024-05-01 12:30 UTC),
        )]);
        let mut warnings = Vec::new();
        let files = collect_log_files(&path, &checker, &mut warnings).unwrap();
        let names: Vec<String> =
            files.iter().map(|file| file.path.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, ["large-b.log.gz", "large.log"]);
        assert_eq!(files[0].end, Some(datetime!(2024-05-01 11:00 UTC)));
        assert_eq!(files[1].end, Some(datetime!(2024-05-01 13:00 UTC)));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn backward_scan_crosses_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.log");
        let long = "x".repeat(TAIL_BLOCK * 3);
        fs::write(&path, format!("# TIME: 2024-05-01T10:00:00Z\n# PLAN: {long}\nselect 1;\n")).unwrap();
        assert_eq!(plain_end_time(&path).unwrap(), datetime!(2024-05-01 10:00 UTC));
    }
}
