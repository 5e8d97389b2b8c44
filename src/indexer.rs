use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::error::IndexerError;
use crate::event::FileEvent;
use crate::hub::SubscriptionHub;
use crate::index::{InvertedIndex, SharedIndex};
use crate::query::Query;
use crate::reconciler::{self, Reconciler};
use crate::results::{ScanReport, SearchResult};
use crate::scanner::{resolve_roots, FileScanner, Root, WalkConfig};
use crate::stream::LiveStream;
use crate::traits::{PathFilter, Tokenizer};
use crate::watcher::{self, ChangeWatcher};

/// Changes buffered between the debouncer and the reconciler.
const CHANGE_QUEUE: usize = 1024;

const IDLE:     u8 = 0;
const STARTING: u8 = 1;
const RUNNING:  u8 = 2;
const CLOSED:   u8 = 3;

// ---------------------------------------------------------------------------
// IndexerOptions
// ---------------------------------------------------------------------------

/// Validated configuration handed over by the builder.
pub(crate) struct IndexerOptions {
    pub roots:                Vec<PathBuf>,
    pub tokenizer:            Arc<dyn Tokenizer>,
    pub filter:               Arc<dyn PathFilter>,
    pub walk:                 WalkConfig,
    pub collect_errors:       bool,
    pub debounce:             Duration,
    pub channel_capacity:     usize,
    pub backpressure_timeout: Duration,
}

// ---------------------------------------------------------------------------
// FileIndexer
// ---------------------------------------------------------------------------

/// A live inverted index over a set of files and directories.
///
/// Created with [`filedex::builder()`](fn@crate::builder). Nothing happens until
/// [`start`](FileIndexer::start) scans the roots and begins watching them;
/// from then on the index follows the filesystem until
/// [`close`](FileIndexer::close).
///
/// All query and subscription methods take `&self` and may be called from any
/// thread. Searches run concurrently with each other and with indexing.
pub struct FileIndexer {
    options:     IndexerOptions,
    index:       SharedIndex,
    hub:         Arc<SubscriptionHub>,
    diagnostics: Arc<Diagnostics>,
    phase:       AtomicU8,
    running:     Mutex<Option<Running>>,
    // Held by `start` for its whole run so `close` can wait it out
    lifecycle:   tokio::sync::Mutex<()>,
    // Parent of every started indexer's token; fired by `close` and on drop
    closing:     CancellationToken,
}

/// Everything owned by a started indexer.
struct Running {
    roots:   Vec<Root>,
    watcher: ChangeWatcher,
    cancel:  CancellationToken,
    tasks:   Vec<JoinHandle<()>>,
}

impl Running {
    async fn shutdown(self) {
        self.cancel.cancel();
        drop(self.watcher);
        for task in self.tasks {
            if let Err(err) = task.await {
                log::warn!("background task failed during shutdown: {err}");
            }
        }
    }
}

impl FileIndexer {
    pub(crate) fn new(options: IndexerOptions) -> Self {
        let index: SharedIndex = Arc::new(RwLock::new(InvertedIndex::new()));
        let diagnostics = Arc::new(Diagnostics::default());
        let hub = Arc::new(SubscriptionHub::new(
            Arc::clone(&index),
            options.channel_capacity,
            options.backpressure_timeout,
            Arc::clone(&diagnostics),
        ));
        Self {
            options,
            index,
            hub,
            diagnostics,
            phase:       AtomicU8::new(IDLE),
            running:     Mutex::new(None),
            lifecycle:   tokio::sync::Mutex::new(()),
            closing:     CancellationToken::new(),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Scan every root, then keep the index in sync with the filesystem.
    ///
    /// Returns once the initial scan is complete; searches issued after that
    /// see every accepted file. Filesystem monitoring is armed before the
    /// scan, so changes made while scanning are applied afterwards rather than
    /// lost.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`IndexerError::AlreadyStarted`] if called twice.
    /// - [`IndexerError::Closed`] after [`close`](FileIndexer::close).
    /// - `NotFound`/`PermissionDenied`/`Io` if a root cannot be read, and
    ///   [`IndexerError::Watch`] if it cannot be monitored. The indexer is
    ///   left unstarted and `start` may be retried.
    pub async fn start(&self) -> Result<ScanReport, IndexerError> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.phase.compare_exchange(IDLE, STARTING, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {}
            Err(CLOSED) => return Err(IndexerError::Closed),
            Err(_) => return Err(IndexerError::AlreadyStarted),
        }

        let (running, report) = match self.launch().await {
            Ok(started) => started,
            Err(err) => {
                self.index.write().clear();
                // A concurrent close wins; otherwise allow a retry.
                let _ = self.phase.compare_exchange(
                    STARTING,
                    IDLE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                return Err(err);
            }
        };

        *self.running.lock() = Some(running);
        if self
            .phase
            .compare_exchange(STARTING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Closed while scanning. Whatever `close` did not reach is torn down here.
            let leftover = self.running.lock().take();
            if let Some(running) = leftover {
                running.shutdown().await;
            }
            self.index.write().clear();
            return Err(IndexerError::Closed);
        }

        log::info!(
            "indexed {} file(s) under {} root(s) in {:.2?}",
            report.stats.indexed,
            self.options.roots.len(),
            report.stats.duration,
        );
        Ok(report)
    }

    async fn launch(&self) -> Result<(Running, ScanReport), IndexerError> {
        let roots = resolve_roots(&self.options.roots)?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let change_watcher = ChangeWatcher::arm(&roots, raw_tx)?;

        let cancel = self.closing.child_token();
        let (changes_tx, changes_rx) = mpsc::channel(CHANGE_QUEUE);
        let debouncer = tokio::spawn(watcher::debounce(
            raw_rx,
            changes_tx,
            roots.clone(),
            self.options.debounce,
            Arc::clone(&self.diagnostics),
            cancel.clone(),
        ));

        let scanner = self.scanner();
        let index = Arc::clone(&self.index);
        let scan_roots = roots.clone();
        let scan_cancel = cancel.clone();
        let scanned =
            tokio::task::spawn_blocking(move || scanner.scan(&scan_roots, &index, &scan_cancel))
                .await;

        let scanned = match scanned {
            Err(err) => Err(IndexerError::TaskFailed(err.to_string())),
            // Interrupted by `close`; the index holds a partial scan
            Ok(_) if cancel.is_cancelled() => Err(IndexerError::Closed),
            Ok(report) => Ok(report),
        };
        let report = match scanned {
            Ok(report) => report,
            Err(err) => {
                cancel.cancel();
                let _ = debouncer.await;
                return Err(err);
            }
        };

        let worker = Arc::new(Reconciler::new(
            self.scanner(),
            Arc::clone(&self.index),
            roots.clone(),
        ));
        let reconcile = tokio::spawn(reconciler::run(
            worker,
            changes_rx,
            Arc::clone(&self.hub),
            cancel.clone(),
        ));

        Ok((
            Running {
                roots,
                watcher: change_watcher,
                cancel,
                tasks: vec![debouncer, reconcile],
            },
            report,
        ))
    }

    /// Stop monitoring, end every subscription and release the index.
    ///
    /// Waits for background work to finish, including a `start` still in
    /// progress, which is interrupted and fails with [`IndexerError::Closed`].
    /// Idempotent; calling it on an indexer that was never started simply
    /// marks it closed.
    pub async fn close(&self) {
        if self.phase.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return;
        }
        self.closing.cancel();
        let _lifecycle = self.lifecycle.lock().await;

        let running = self.running.lock().take();
        if let Some(running) = running {
            running.shutdown().await;
        }
        self.hub.close();
        self.index.write().clear();

        log::info!("indexer closed");
    }

    /// Whether [`start`](FileIndexer::start) completed and
    /// [`close`](FileIndexer::close) has not been called.
    pub fn is_running(&self) -> bool {
        self.phase.load(Ordering::Acquire) == RUNNING
    }

    // ── Queries ───────────────────────────────────────────────────────────

    /// Files containing at least one of the query's words, sorted by path.
    ///
    /// Each result lists the words that matched, in query order and as the
    /// caller spelled them. A word the tokenizer reduces to nothing matches
    /// nothing.
    ///
    /// ```rust,ignore
    /// let hits = indexer.search("kotlin")?;
    /// let either = indexer.search(["foo", "bar"])?;
    /// ```
    ///
    /// # Errors
    ///
    /// [`IndexerError::InvalidQuery`] for an empty query, and
    /// `NotStarted`/`Closed` outside the running state.
    pub fn search(&self, query: impl Into<Query>) -> Result<Vec<SearchResult>, IndexerError> {
        self.ensure_running()?;
        let query = query.into().compile(self.options.tokenizer.as_ref())?;
        Ok(query.search(&self.index.read()))
    }

    /// Number of files currently indexed.
    pub fn indexed_files(&self) -> usize {
        self.index.read().file_count()
    }

    /// Canonical roots being watched. Empty until started.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.running
            .lock()
            .as_ref()
            .map(|r| r.roots.iter().map(|root| root.path.clone()).collect())
            .unwrap_or_default()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Subscriptions ─────────────────────────────────────────────────────

    /// Every create, modify and delete applied to the index from now on.
    pub fn watch_for_changes(&self) -> Result<LiveStream<FileEvent>, IndexerError> {
        self.ensure_running()?;
        self.hub.watch_changes()
    }

    /// Files starting or ceasing to contain `word`.
    ///
    /// A file that starts matching yields a result with `matches` set to
    /// `[word]`; a file that stops matching (edited or deleted) yields a
    /// result with empty `matches`. Files that already match when the
    /// subscription is created are not replayed.
    ///
    /// # Errors
    ///
    /// [`IndexerError::InvalidQuery`] if `word` is empty.
    pub fn watch_for_word(&self, word: &str) -> Result<LiveStream<SearchResult>, IndexerError> {
        self.ensure_running()?;
        let query = Query::from(word).compile(self.options.tokenizer.as_ref())?;
        self.hub.watch_word(query)
    }

    /// The full result list for `query`, re-sent whenever it changes.
    ///
    /// Only the latest list is kept for a slow consumer, so intermediate
    /// states may be skipped but the stream never falls behind.
    pub fn watch_for_words(
        &self,
        query: impl Into<Query>,
    ) -> Result<LiveStream<Vec<SearchResult>>, IndexerError> {
        self.ensure_running()?;
        let query = query.into().compile(self.options.tokenizer.as_ref())?;
        self.hub.watch_words(query)
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    fn ensure_running(&self) -> Result<(), IndexerError> {
        match self.phase.load(Ordering::Acquire) {
            RUNNING => Ok(()),
            CLOSED => Err(IndexerError::Closed),
            _ => Err(IndexerError::NotStarted),
        }
    }

    fn scanner(&self) -> FileScanner {
        FileScanner {
            config:         self.options.walk,
            tokenizer:      Arc::clone(&self.options.tokenizer),
            filter:         Arc::clone(&self.options.filter),
            collect_errors: self.options.collect_errors,
            diagnostics:    Arc::clone(&self.diagnostics),
        }
    }
}

impl Drop for FileIndexer {
    fn drop(&mut self) {
        if *self.phase.get_mut() == CLOSED {
            return;
        }
        // Cannot await here; cancelled tasks wind down on their own.
        self.closing.cancel();
        self.hub.close();
    }
}

impl std::fmt::Debug for FileIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIndexer")
            .field("roots", &self.options.roots)
            .field("running", &self.is_running())
            .field("indexed_files", &self.indexed_files())
            .finish_non_exhaustive()
    }
}
