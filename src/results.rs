use std::path::PathBuf;
use std::time::Duration;

use crate::error::IndexerError;

/// One file matching a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// Canonical absolute path of the file.
    pub file: PathBuf,

    /// The query words that hit this file, in query order.
    ///
    /// Only words from the query appear here, never other terms of the file.
    /// Empty on a `watch_for_word` update means the file stopped matching.
    pub matches: Vec<String>,
}

/// The output of the initial scan run by [`FileIndexer::start`](crate::FileIndexer::start).
///
/// `errors` is opt-in: enable it on the builder with `.collect_errors(true)`.
#[derive(Debug)]
pub struct ScanReport {
    /// Scan performance statistics.
    pub stats: ScanStats,

    /// Non-fatal errors encountered during the scan (permission denied,
    /// vanished files, binary content). Only populated if
    /// `.collect_errors(true)` was set on the builder.
    pub errors: Vec<IndexerError>,
}

/// Statistics for a completed scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    /// Regular files encountered (accepted by the filter or not).
    pub files: usize,

    /// Directories encountered.
    pub dirs: usize,

    /// Files added to the index.
    pub indexed: usize,

    /// Accepted files that could not be read or were not text.
    pub skipped: usize,

    /// Wall-clock time from scan start to completion.
    pub duration: Duration,

    /// Indexed files per second, clamped to 0 on zero-duration runs.
    pub files_per_sec: usize,
}

impl ScanStats {
    /// Compute `files_per_sec` from raw counts and duration.
    pub(crate) fn compute(files: usize, dirs: usize, indexed: usize, skipped: usize, duration: Duration) -> Self {
        let fps = if duration.as_secs_f64() > 0.0 {
            (indexed as f64 / duration.as_secs_f64()) as usize
        } else {
            0
        };
        Self {
            files,
            dirs,
            indexed,
            skipped,
            duration,
            files_per_sec: fps,
        }
    }
}
