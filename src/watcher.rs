use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::Diagnostics;
use crate::error::IndexerError;
use crate::event::{ChangeKind, RawChange};
use crate::scanner::Root;

/// A path is released at most this many debounce windows after its first event,
/// even if it keeps changing.
const MAX_HOLD_WINDOWS: u32 = 10;

// ---------------------------------------------------------------------------
// ChangeWatcher
// ---------------------------------------------------------------------------

/// Keeps the platform watchers for every root alive.
///
/// Raw `notify` events go into an unbounded channel so the OS callback thread
/// never blocks; [`debounce`] drains it. Dropping the `ChangeWatcher` stops
/// monitoring and closes that channel.
pub(crate) struct ChangeWatcher {
    _watchers: Vec<RecommendedWatcher>,
}

impl ChangeWatcher {
    /// Start watching every root.
    ///
    /// Directory roots are watched recursively. A file root is watched through
    /// its parent directory, non-recursively, and scoped to the file later by
    /// [`classify`].
    ///
    /// # Errors
    ///
    /// [`IndexerError::Watch`] if monitoring cannot be established for a root.
    pub(crate) fn arm(
        roots: &[Root],
        raw_tx: mpsc::UnboundedSender<notify::Result<Event>>,
    ) -> Result<Self, IndexerError> {
        let mut watchers = Vec::with_capacity(roots.len());

        for root in roots {
            let tx = raw_tx.clone();
            let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
                // Receiver gone means the indexer is shutting down.
                let _ = tx.send(res);
            })
            .map_err(|source| IndexerError::Watch {
                path: root.path.clone(),
                source,
            })?;

            let (target, mode) = if root.is_dir {
                (root.path.clone(), RecursiveMode::Recursive)
            } else {
                (
                    root.path
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.path.clone()),
                    RecursiveMode::NonRecursive,
                )
            };

            watcher
                .watch(&target, mode)
                .map_err(|source| IndexerError::Watch { path: target, source })?;

            log::debug!("watching {} ({mode:?})", root.path.display());
            watchers.push(watcher);
        }

        Ok(Self { _watchers: watchers })
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Turn one `notify` event into changes the reconciler understands.
///
/// Access and metadata-only events are dropped. Renames become a deletion of
/// the old path and a creation of the new one. Paths outside every root are
/// dropped. Events that don't say what happened become modifications.
///
/// Never touches the filesystem: the reconciler stats every path anyway, so
/// whether a path still exists, is a directory, or passes the filter is
/// decided there.
pub(crate) fn classify(event: &Event, roots: &[Root]) -> Vec<RawChange> {
    if event.need_rescan() {
        return roots
            .iter()
            .filter(|root| {
                event.paths.is_empty()
                    || event.paths.iter().any(|p| root.contains(p) || root.path.starts_with(p))
            })
            .map(|root| RawChange::new(root.path.clone(), ChangeKind::Rescan))
            .collect();
    }

    let mut changes: Vec<RawChange> = match &event.kind {
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Create(_) => with_kind(&event.paths, ChangeKind::Created),
        EventKind::Remove(_) => with_kind(&event.paths, ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => with_kind(&event.paths, ChangeKind::Deleted),
            RenameMode::To => with_kind(&event.paths, ChangeKind::Created),
            RenameMode::Both if event.paths.len() == 2 => vec![
                RawChange::new(event.paths[0].clone(), ChangeKind::Deleted),
                RawChange::new(event.paths[1].clone(), ChangeKind::Created),
            ],
            // Either side of a rename; a missing path reconciles to a deletion
            _ => with_kind(&event.paths, ChangeKind::Created),
        },
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            with_kind(&event.paths, ChangeKind::Modified)
        }
    };

    changes.retain(|change| roots.iter().any(|root| root.contains(&change.path)));
    changes
}

fn with_kind(paths: &[PathBuf], kind: ChangeKind) -> Vec<RawChange> {
    paths.iter().map(|p| RawChange::new(p.clone(), kind)).collect()
}

// ---------------------------------------------------------------------------
// Coalescer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Pending {
    kind:       ChangeKind,
    seq:        u64,
    first_seen: Instant,
    deadline:   Instant,
}

/// Collapses bursts of changes on the same path into one.
///
/// A change is held for `window` after the most recent event on its path
/// (capped at [`MAX_HOLD_WINDOWS`] windows after the first). While held:
///
/// | pending  | incoming | result                                |
/// |----------|----------|---------------------------------------|
/// | created  | modified | still `created`                        |
/// | same     | same     | one change                             |
/// | anything | other    | pending released now, incoming held    |
///
/// The last rule keeps delete→create (and create→delete) as two changes in
/// their original order instead of folding them into a modification.
#[derive(Debug)]
pub(crate) struct Coalescer {
    window:  Duration,
    pending: HashMap<PathBuf, Pending>,
    seq:     u64,
}

impl Coalescer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            seq: 0,
        }
    }

    /// Register `change` observed at `now`.
    ///
    /// Returns changes that must be released immediately (a pending change
    /// superseded by one of a different kind), and whether `change` was folded
    /// into an already pending one.
    pub(crate) fn register(&mut self, change: RawChange, now: Instant) -> (Vec<RawChange>, bool) {
        let window = self.window;
        let cap = window * MAX_HOLD_WINDOWS;

        if let Some(pending) = self.pending.get_mut(&change.path) {
            let merged = match (pending.kind, change.kind) {
                (ChangeKind::Created, ChangeKind::Modified) => Some(ChangeKind::Created),
                (held, incoming) if held == incoming => Some(held),
                _ => None,
            };
            if let Some(kind) = merged {
                pending.kind = kind;
                pending.deadline = (now + window).min(pending.first_seen + cap);
                return (Vec::new(), true);
            }
        }

        let released = self
            .pending
            .remove(&change.path)
            .map(|held| RawChange::new(change.path.clone(), held.kind))
            .into_iter()
            .collect();

        self.seq += 1;
        self.pending.insert(
            change.path,
            Pending {
                kind:       change.kind,
                seq:        self.seq,
                first_seen: now,
                deadline:   now + window,
            },
        );
        (released, false)
    }

    /// Release every change whose deadline has passed, in arrival order.
    pub(crate) fn flush_ready(&mut self, now: Instant) -> Vec<RawChange> {
        let mut ready: Vec<(u64, PathBuf, ChangeKind)> = Vec::new();
        self.pending.retain(|path, pending| {
            if pending.deadline <= now {
                ready.push((pending.seq, path.clone(), pending.kind));
                false
            } else {
                true
            }
        });
        ready.sort_unstable_by_key(|(seq, _, _)| *seq);
        ready
            .into_iter()
            .map(|(_, path, kind)| RawChange::new(path, kind))
            .collect()
    }

    /// The earliest deadline among held changes.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ---------------------------------------------------------------------------
// debounce()
// ---------------------------------------------------------------------------

/// Drain raw watcher events, coalesce them and forward them to the reconciler.
///
/// Runs until `cancel` fires, the watcher side closes, or the reconciler goes
/// away. Sending to the reconciler awaits, so a slow reconciler holds changes
/// here rather than dropping them.
pub(crate) async fn debounce(
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    changes_tx: mpsc::Sender<RawChange>,
    roots: Vec<Root>,
    window: Duration,
    diagnostics: Arc<Diagnostics>,
    cancel: CancellationToken,
) {
    let mut coalescer = Coalescer::new(window);

    loop {
        let deadline = coalescer
            .next_deadline()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        let ready = tokio::select! {
            _ = cancel.cancelled() => break,
            raw = raw_rx.recv() => match raw {
                Some(Ok(event)) => {
                    let now = Instant::now();
                    let mut released = Vec::new();
                    for change in classify(&event, &roots) {
                        if change.kind == ChangeKind::Rescan {
                            diagnostics.rescans();
                        }
                        let (flushed, folded) = coalescer.register(change, now);
                        if folded {
                            diagnostics.events_coalesced();
                        }
                        released.extend(flushed);
                    }
                    released
                }
                Some(Err(err)) => {
                    diagnostics.watch_errors();
                    log::warn!("watcher error: {err}");
                    continue;
                }
                None => break,
            },
            _ = tokio::time::sleep_until(deadline.into()), if !coalescer.is_empty() => {
                coalescer.flush_ready(Instant::now())
            }
        };

        for change in ready {
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = changes_tx.send(change) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    log::debug!("debounce loop stopped");
}
