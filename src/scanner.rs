use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ignore::{DirEntry, WalkBuilder, WalkState};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::Diagnostics;
use crate::error::IndexerError;
use crate::index::{SharedIndex, TermSet};
use crate::results::{ScanReport, ScanStats};
use crate::traits::{terms_for, PathFilter, Tokenizer};

/// How much of a file is inspected for NUL bytes before it is treated as text.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// WalkConfig
// ---------------------------------------------------------------------------

/// Traversal parameters passed from the builder to the scanner.
///
/// `pub(crate)`, not part of the public API. Callers configure these
/// via the builder methods (`.threads()`, `.max_depth()`).
#[derive(Debug, Clone, Copy)]
pub(crate) struct WalkConfig {
    pub threads:   usize,
    pub max_depth: Option<usize>,
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// A canonicalized search root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Root {
    pub path:   PathBuf,
    pub is_dir: bool,
}

impl Root {
    /// Canonicalize `path` and check that it can be read.
    pub(crate) fn resolve(path: &Path) -> Result<Self, IndexerError> {
        let canonical = fs::canonicalize(path)
            .map_err(|e| IndexerError::from_io(path.to_path_buf(), e))?;
        let meta = fs::metadata(&canonical)
            .map_err(|e| IndexerError::from_io(canonical.clone(), e))?;

        if meta.is_dir() {
            fs::read_dir(&canonical).map_err(|e| IndexerError::from_io(canonical.clone(), e))?;
        } else if meta.is_file() {
            fs::File::open(&canonical).map_err(|e| IndexerError::from_io(canonical.clone(), e))?;
        } else {
            return Err(IndexerError::InvalidConfig(format!(
                "root is neither a file nor a directory: {}",
                canonical.display()
            )));
        }

        Ok(Self {
            path:   canonical,
            is_dir: meta.is_dir(),
        })
    }

    /// Whether `candidate` lies within this root's scope.
    pub(crate) fn contains(&self, candidate: &Path) -> bool {
        if self.is_dir {
            candidate.starts_with(&self.path)
        } else {
            candidate == self.path
        }
    }

    /// Walk depth of `candidate` below this root, counted like the scanner
    /// counts it: the root is `0`, its children `1`.
    pub(crate) fn depth_of(&self, candidate: &Path) -> Option<usize> {
        if !self.contains(candidate) {
            return None;
        }
        candidate
            .strip_prefix(&self.path)
            .ok()
            .map(|rest| rest.components().count())
    }
}

/// Resolve every configured path, collapsing ones that canonicalize to the same root.
pub(crate) fn resolve_roots(paths: &[PathBuf]) -> Result<Vec<Root>, IndexerError> {
    let mut roots: Vec<Root> = Vec::with_capacity(paths.len());
    for path in paths {
        let root = Root::resolve(path)?;
        if !roots.contains(&root) {
            roots.push(root);
        }
    }
    Ok(roots)
}

// ---------------------------------------------------------------------------
// FileScanner
// ---------------------------------------------------------------------------

/// Walks roots, reads accepted files and tokenizes them.
///
/// Cheap to clone; everything shared lives behind an `Arc`. The reconciler
/// keeps its own clone to read single files and walk newly created directories
/// with exactly the rules the initial scan used.
#[derive(Clone)]
pub(crate) struct FileScanner {
    pub config:         WalkConfig,
    pub tokenizer:      Arc<dyn Tokenizer>,
    pub filter:         Arc<dyn PathFilter>,
    pub collect_errors: bool,
    pub diagnostics:    Arc<Diagnostics>,
}

impl FileScanner {
    /// Read `path` and turn its content into terms.
    ///
    /// # Errors
    ///
    /// I/O failures (mapped to `NotFound`/`PermissionDenied`/`Io`) and
    /// [`IndexerError::NotText`] for content with NUL bytes near the start.
    pub(crate) fn read_terms(&self, path: &Path) -> Result<TermSet, IndexerError> {
        let bytes = fs::read(path).map_err(|e| IndexerError::from_io(path.to_path_buf(), e))?;

        let head = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
        if memchr::memchr(0, head).is_some() {
            return Err(IndexerError::NotText(path.to_path_buf()));
        }

        let content = String::from_utf8_lossy(&bytes);
        Ok(terms_for(self.tokenizer.as_ref(), &content))
    }

    /// Whether `path` is shallow enough to be indexed from at least one root.
    pub(crate) fn within_depth(&self, roots: &[Root], path: &Path) -> bool {
        match self.config.max_depth {
            None => true,
            Some(limit) => roots
                .iter()
                .filter_map(|root| root.depth_of(path))
                .any(|depth| depth <= limit),
        }
    }

    /// Regular files under `dir` accepted by the filter, sorted.
    ///
    /// Sequential. Used for directories that appear while the indexer runs.
    /// The depth limit is measured from the shallowest root holding `dir`, so
    /// the result matches what the initial scan would have indexed.
    /// Traversal errors are skipped.
    pub(crate) fn accepted_files(&self, roots: &[Root], dir: &Path) -> Vec<PathBuf> {
        let max_depth = match self.config.max_depth {
            None => None,
            Some(limit) => {
                let Some(depth) = roots.iter().filter_map(|root| root.depth_of(dir)).min() else {
                    return Vec::new();
                };
                let Some(left) = limit.checked_sub(depth) else {
                    return Vec::new();
                };
                Some(left)
            }
        };

        let mut files: Vec<PathBuf> = walk_builder(dir, 1, max_depth)
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(DirEntry::into_path)
            .filter(|path| self.filter.accepts(path))
            .collect();
        files.sort();
        files
    }

    /// Populate `index` from every root in parallel.
    ///
    /// This is the core of `start()`: all scan parallelism lives here.
    /// Unreadable files are skipped and counted; they never fail the scan.
    /// Once `cancel` fires every worker stops at its next entry.
    pub(crate) fn scan(
        &self,
        roots: &[Root],
        index: &SharedIndex,
        cancel: &CancellationToken,
    ) -> ScanReport {
        let files   = Arc::new(AtomicUsize::new(0));
        let dirs    = Arc::new(AtomicUsize::new(0));
        let indexed = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicUsize::new(0));
        let errors  = Arc::new(Mutex::new(Vec::<IndexerError>::new()));

        let start = Instant::now();

        for root in roots {
            if cancel.is_cancelled() {
                break;
            }
            let walker = walk_builder(&root.path, self.config.threads, self.config.max_depth)
                .build_parallel();

            walker.run(|| {
                let scanner = self.clone();
                let index   = Arc::clone(index);
                let files   = Arc::clone(&files);
                let dirs    = Arc::clone(&dirs);
                let indexed = Arc::clone(&indexed);
                let skipped = Arc::clone(&skipped);
                let errors  = Arc::clone(&errors);
                let cancel  = cancel.clone();

                Box::new(move |res: Result<DirEntry, ignore::Error>| -> WalkState {
                    if cancel.is_cancelled() {
                        return WalkState::Quit;
                    }

                    let entry = match res {
                        Ok(e) => e,
                        Err(e) => {
                            let err = map_ignore_error(e);
                            log::debug!("scan: {err}");
                            if scanner.collect_errors {
                                errors.lock().push(err);
                            }
                            return WalkState::Continue;
                        }
                    };

                    let ft = match entry.file_type() {
                        Some(ft) => ft,
                        None     => return WalkState::Continue,
                    };

                    if ft.is_dir() {
                        // The root itself is not counted
                        if entry.depth() > 0 {
                            dirs.fetch_add(1, Ordering::Relaxed);
                        }
                        return WalkState::Continue;
                    }
                    if !ft.is_file() {
                        return WalkState::Continue;
                    }
                    files.fetch_add(1, Ordering::Relaxed);

                    let path = entry.into_path();
                    if !scanner.filter.accepts(&path) {
                        return WalkState::Continue;
                    }

                    let terms = match scanner.read_terms(&path) {
                        Ok(terms) => terms,
                        Err(err) => {
                            skipped.fetch_add(1, Ordering::Relaxed);
                            scanner.diagnostics.files_skipped();
                            log::debug!("scan: skipped {}: {err}", path.display());
                            if scanner.collect_errors {
                                errors.lock().push(err);
                            }
                            return WalkState::Continue;
                        }
                    };

                    match index.write().add_file(path, terms) {
                        Ok(()) => {
                            indexed.fetch_add(1, Ordering::Relaxed);
                        }
                        // Reached through an overlapping root
                        Err(err) => log::debug!("scan: {err}"),
                    }

                    WalkState::Continue
                })
            });
        }

        let duration = start.elapsed();

        let stats = ScanStats::compute(
            files.load(Ordering::Relaxed),
            dirs.load(Ordering::Relaxed),
            indexed.load(Ordering::Relaxed),
            skipped.load(Ordering::Relaxed),
            duration,
        );
        let errors = std::mem::take(&mut *errors.lock());

        ScanReport { stats, errors }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A walker that sees everything: hidden files included, ignore files and
/// symlinks not followed.
fn walk_builder(root: &Path, threads: usize, max_depth: Option<usize>) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .ignore(false)
        .parents(false)
        .hidden(false)
        .follow_links(false)
        .same_file_system(false)
        .threads(threads)
        .max_depth(max_depth);
    builder
}

fn map_ignore_error(e: ignore::Error) -> IndexerError {
    match e {
        ignore::Error::WithPath { path, err } => match *err {
            ignore::Error::Io(io_err) => IndexerError::from_io(path, io_err),
            other => IndexerError::Io {
                path,
                source: std::io::Error::other(other.to_string()),
            },
        },
        ignore::Error::WithDepth { err, .. } => map_ignore_error(*err),
        ignore::Error::Loop { child, .. } => IndexerError::Io {
            path:   child,
            source: std::io::Error::other("symlink loop"),
        },
        ignore::Error::Io(io_err) => IndexerError::Io {
            path:   PathBuf::new(),
            source: io_err,
        },
        other => IndexerError::Io {
            path:   PathBuf::new(),
            source: std::io::Error::other(other.to_string()),
        },
    }
}
