use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::IndexerError;
use crate::indexer::{FileIndexer, IndexerOptions};
use crate::scanner::WalkConfig;
use crate::tokenizer::DefaultTokenizer;
use crate::traits::{PathFilter, Tokenizer};

/// Default coalescing window for rapid changes to the same file.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Default per-subscriber buffer size.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default time the reconciler waits on a full subscriber buffer.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// FileIndexerBuilder
// ---------------------------------------------------------------------------

/// Entry point for configuring a [`FileIndexer`].
///
/// Created via [`filedex::builder()`](fn@crate::builder). Configure with chained
/// builder methods, then call [`build()`](FileIndexerBuilder::build). Building
/// never touches the filesystem; roots are checked by
/// [`FileIndexer::start`].
///
/// # Example
///
/// ```rust,ignore
/// let indexer = filedex::builder()
///     .add_path("./docs")
///     .file_filter(|p| p.extension().is_some_and(|e| e == "md"))
///     .debounce(Duration::from_millis(200))
///     .build()?;
/// ```
pub struct FileIndexerBuilder {
    roots:                Vec<PathBuf>,
    tokenizer:            Option<Arc<dyn Tokenizer>>,
    filter:               Option<Arc<dyn PathFilter>>,
    threads:              usize,
    max_depth:            Option<usize>,
    collect_errors:       bool,
    debounce:             Duration,
    channel_capacity:     usize,
    backpressure_timeout: Duration,
}

impl Default for FileIndexerBuilder {
    fn default() -> Self {
        Self {
            roots:                Vec::new(),
            tokenizer:            None,
            filter:               None,
            threads:              num_cpus(),
            max_depth:            None,
            collect_errors:       false,
            debounce:             DEFAULT_DEBOUNCE,
            channel_capacity:     DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

impl FileIndexerBuilder {
    // ── Roots ─────────────────────────────────────────────────────────────

    /// Add a directory (indexed recursively) or a single file to index.
    pub fn add_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.roots.push(path.into());
        self
    }

    /// Add several roots at once.
    pub fn add_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.roots.extend(paths.into_iter().map(Into::into));
        self
    }

    // ── Tokenizer ─────────────────────────────────────────────────────────

    /// Set a custom tokenizer.
    ///
    /// Defaults to [`DefaultTokenizer`]: split on non-alphanumerics, lowercase.
    pub fn tokenizer(mut self, t: impl Tokenizer + 'static) -> Self {
        self.tokenizer = Some(Arc::new(t));
        self
    }

    // ── Filter ────────────────────────────────────────────────────────────

    /// Set a custom path filter.
    ///
    /// Any type implementing [`PathFilter`] is accepted. For the common case of
    /// a closure, prefer `.file_filter()`.
    pub fn path_filter(mut self, f: impl PathFilter + 'static) -> Self {
        self.filter = Some(Arc::new(f));
        self
    }

    /// Index only files for which `f` returns `true`.
    pub fn file_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }

    /// Shorthand for extension filtering.
    ///
    /// Equivalent to `.path_filter(ExtensionFilter::new(extensions))`.
    /// Matching is case-insensitive; a leading dot is optional.
    pub fn extensions<I, S>(self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.path_filter(ExtensionFilter::new(extensions))
    }

    // ── Options ───────────────────────────────────────────────────────────

    /// Number of threads used by the initial scan.
    ///
    /// Defaults to the number of logical CPU cores.
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }

    /// Maximum traversal depth. `0` means the root only, `1` means one
    /// level of children, and so on. Unlimited by default.
    pub fn max_depth(mut self, d: usize) -> Self {
        self.max_depth = Some(d);
        self
    }

    /// Collect non-fatal scan errors into [`ScanReport::errors`](crate::ScanReport::errors).
    ///
    /// Disabled by default. Skipped files are counted either way.
    pub fn collect_errors(mut self, yes: bool) -> Self {
        self.collect_errors = yes;
        self
    }

    /// Coalescing window for rapid changes to the same file.
    ///
    /// Defaults to [`DEFAULT_DEBOUNCE`] (100 ms). A burst of writes is
    /// reported once, `window` after the last write, and never later than ten
    /// windows after the first.
    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Buffer size of each `watch_for_changes`/`watch_for_word` subscription.
    pub fn channel_capacity(mut self, n: usize) -> Self {
        self.channel_capacity = n;
        self
    }

    /// How long indexing waits for a full subscriber buffer before cancelling
    /// that subscription.
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.backpressure_timeout = timeout;
        self
    }

    // ── Build ─────────────────────────────────────────────────────────────

    /// Validate the configuration and create the indexer.
    ///
    /// # Errors
    ///
    /// [`IndexerError::NoRoots`] if no path was added, and
    /// [`IndexerError::InvalidConfig`] for a zero thread count or zero
    /// channel capacity.
    pub fn build(self) -> Result<FileIndexer, IndexerError> {
        if self.roots.is_empty() {
            return Err(IndexerError::NoRoots);
        }
        if self.threads == 0 {
            return Err(IndexerError::InvalidConfig("thread count must be at least 1".into()));
        }
        if self.channel_capacity == 0 {
            return Err(IndexerError::InvalidConfig("channel capacity must be at least 1".into()));
        }

        let mut roots: Vec<PathBuf> = Vec::with_capacity(self.roots.len());
        for root in self.roots {
            if !roots.contains(&root) {
                roots.push(root);
            }
        }

        // Defaults: split on non-alphanumerics, index every regular file
        let tokenizer: Arc<dyn Tokenizer> = match self.tokenizer {
            Some(t) => t,
            None    => Arc::new(DefaultTokenizer),
        };
        let filter: Arc<dyn PathFilter> = match self.filter {
            Some(f) => f,
            None    => Arc::new(AcceptAll),
        };

        Ok(FileIndexer::new(IndexerOptions {
            roots,
            tokenizer,
            filter,
            walk: WalkConfig {
                threads:   self.threads,
                max_depth: self.max_depth,
            },
            collect_errors:       self.collect_errors,
            debounce:             self.debounce,
            channel_capacity:     self.channel_capacity,
            backpressure_timeout: self.backpressure_timeout,
        }))
    }
}

// ---------------------------------------------------------------------------
// Built-in filters (filedex ships these as conveniences)
// ---------------------------------------------------------------------------

/// Accepts every regular file. Used when no filter is specified.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl PathFilter for AcceptAll {
    fn accepts(&self, _path: &Path) -> bool {
        true
    }
}

/// Accepts files whose extension is in a fixed list (case-insensitive).
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    extensions: Vec<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }
}

impl PathFilter for ExtensionFilter {
    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Get the logical CPU count, with a safe fallback.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
