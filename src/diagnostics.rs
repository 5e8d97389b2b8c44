use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for events the indexer recovers from without reporting an error.
///
/// Shared by the scanner, watcher, reconciler and subscription hub. All
/// updates are relaxed; a [`snapshot`](Diagnostics::snapshot) is a best-effort
/// view, not a consistent cut.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    files_skipped:       AtomicU64,
    read_failures:       AtomicU64,
    events_reconciled:   AtomicU64,
    events_coalesced:    AtomicU64,
    watch_errors:        AtomicU64,
    rescans:             AtomicU64,
    subscribers_dropped: AtomicU64,
}

macro_rules! counter {
    ($($name:ident),* $(,)?) => {
        impl Diagnostics {
            $(
                pub(crate) fn $name(&self) {
                    self.$name.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

// Each counter gets an incrementing method of the same name.
counter!(
    files_skipped,
    read_failures,
    events_reconciled,
    events_coalesced,
    watch_errors,
    rescans,
    subscribers_dropped,
);

impl Diagnostics {
    pub(crate) fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            files_skipped:       self.files_skipped.load(Ordering::Relaxed),
            read_failures:       self.read_failures.load(Ordering::Relaxed),
            events_reconciled:   self.events_reconciled.load(Ordering::Relaxed),
            events_coalesced:    self.events_coalesced.load(Ordering::Relaxed),
            watch_errors:        self.watch_errors.load(Ordering::Relaxed),
            rescans:             self.rescans.load(Ordering::Relaxed),
            subscribers_dropped: self.subscribers_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the indexer's diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    /// Files skipped during the initial scan (unreadable or not text).
    pub files_skipped: u64,

    /// Files that could not be read at reconcile time and were treated as deleted.
    pub read_failures: u64,

    /// Raw changes processed by the reconciler.
    pub events_reconciled: u64,

    /// Raw watcher notifications folded into an already pending change.
    pub events_coalesced: u64,

    /// Errors reported by the platform watcher.
    pub watch_errors: u64,

    /// Root re-walks triggered by watcher overflow.
    pub rescans: u64,

    /// Subscriptions cancelled because their consumer fell behind.
    pub subscribers_dropped: u64,
}
