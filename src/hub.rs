use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::{ReceiverStream, WatchStream};

use crate::diagnostics::Diagnostics;
use crate::error::IndexerError;
use crate::event::FileEvent;
use crate::index::{InvertedIndex, SharedIndex};
use crate::query::CompiledQuery;
use crate::results::SearchResult;
use crate::stream::LiveStream;

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

/// One live query and the state needed to tell whether an event changed it.
enum Subscriber {
    /// Every reconciled event, verbatim. Never coalesced.
    Changes {
        tx:     mpsc::Sender<FileEvent>,
        lagged: Arc<AtomicBool>,
    },

    /// Per-file membership deltas for a single word.
    Word {
        query:    CompiledQuery,
        tx:       mpsc::Sender<SearchResult>,
        lagged:   Arc<AtomicBool>,
        matching: HashSet<PathBuf>,
    },

    /// The full result list for several words, latest state wins.
    Words {
        query:   CompiledQuery,
        tx:      watch::Sender<Vec<SearchResult>>,
        current: BTreeMap<PathBuf, Vec<String>>,
    },
}

/// A value that must reach a bounded subscriber channel.
enum Delivery {
    Event {
        id:     u64,
        tx:     mpsc::Sender<FileEvent>,
        lagged: Arc<AtomicBool>,
        event:  FileEvent,
    },
    Result {
        id:     u64,
        tx:     mpsc::Sender<SearchResult>,
        lagged: Arc<AtomicBool>,
        result: SearchResult,
    },
}

// ---------------------------------------------------------------------------
// SubscriptionHub
// ---------------------------------------------------------------------------

/// Fans reconciled events out to live subscriptions.
///
/// On each event only the affected file's terms are consulted; word queries
/// keep their own view of which files match, so no subscription re-scans the
/// index.
///
/// Back-pressure: `Changes` and `Word` subscribers get a bounded buffer and
/// the reconciler waits for room, up to `send_timeout`. A subscriber still
/// full after that is cancelled and its stream ends with
/// [`IndexerError::SubscriberLagged`]; nobody else is affected. `Words`
/// subscribers hold only the latest list, so they never block.
pub(crate) struct SubscriptionHub {
    index:        SharedIndex,
    subscribers:  Mutex<HashMap<u64, Subscriber>>,
    next_id:      AtomicU64,
    closed:       AtomicBool,
    capacity:     usize,
    send_timeout: Duration,
    diagnostics:  Arc<Diagnostics>,
}

impl SubscriptionHub {
    pub(crate) fn new(
        index: SharedIndex,
        capacity: usize,
        send_timeout: Duration,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            index,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            capacity,
            send_timeout,
            diagnostics,
        }
    }

    // ── Subscribe ─────────────────────────────────────────────────────────

    pub(crate) fn watch_changes(self: &Arc<Self>) -> Result<LiveStream<FileEvent>, IndexerError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let lagged = Arc::new(AtomicBool::new(false));
        let sub_lagged = Arc::clone(&lagged);
        let id = self.insert(move |_| Subscriber::Changes { tx, lagged: sub_lagged })?;
        Ok(LiveStream::new(ReceiverStream::new(rx), id, Arc::downgrade(self), lagged))
    }

    pub(crate) fn watch_word(
        self: &Arc<Self>,
        query: CompiledQuery,
    ) -> Result<LiveStream<SearchResult>, IndexerError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let lagged = Arc::new(AtomicBool::new(false));
        let sub_lagged = Arc::clone(&lagged);
        let id = self.insert(move |index| {
            let matching = query.search(index).into_iter().map(|r| r.file).collect();
            Subscriber::Word { query, tx, lagged: sub_lagged, matching }
        })?;
        Ok(LiveStream::new(ReceiverStream::new(rx), id, Arc::downgrade(self), lagged))
    }

    pub(crate) fn watch_words(
        self: &Arc<Self>,
        query: CompiledQuery,
    ) -> Result<LiveStream<Vec<SearchResult>>, IndexerError> {
        let mut rx_slot = None;
        let id = self.insert(|index| {
            let initial = query.search(index);
            let current = initial
                .iter()
                .map(|r| (r.file.clone(), r.matches.clone()))
                .collect();
            let (tx, rx) = watch::channel(initial);
            rx_slot = Some(rx);
            Subscriber::Words { query, tx, current }
        })?;
        let rx = rx_slot.ok_or(IndexerError::Closed)?;
        Ok(LiveStream::new(
            WatchStream::from_changes(rx),
            id,
            Arc::downgrade(self),
            Arc::new(AtomicBool::new(false)),
        ))
    }

    /// Register a subscriber built from a consistent view of the index.
    ///
    /// The hub lock is held while the index is read, so an event is either
    /// already reflected in the subscriber's starting state or is evaluated
    /// against it by a later `publish`, never both and never neither.
    fn insert(&self, make: impl FnOnce(&InvertedIndex) -> Subscriber) -> Result<u64, IndexerError> {
        let mut subscribers = self.subscribers.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexerError::Closed);
        }
        let subscriber = make(&self.index.read());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        subscribers.insert(id, subscriber);
        log::debug!("subscription {id} opened");
        Ok(id)
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        if self.subscribers.lock().remove(&id).is_some() {
            log::debug!("subscription {id} cancelled");
        }
    }

    /// Cancel every subscription and refuse new ones.
    pub(crate) fn close(&self) {
        let mut subscribers = self.subscribers.lock();
        self.closed.store(true, Ordering::Release);
        let count = subscribers.len();
        subscribers.clear();
        if count > 0 {
            log::debug!("closed {count} subscription(s)");
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    // ── Publish ───────────────────────────────────────────────────────────

    /// Deliver `event`, which the index already reflects, to every subscriber.
    ///
    /// Must be called by the single writer, before its next mutation, so the
    /// terms read here are exactly the post-event state of the file.
    pub(crate) async fn publish(&self, event: &FileEvent) {
        let deliveries = self.evaluate(event);
        for delivery in deliveries {
            match delivery {
                Delivery::Event { id, tx, lagged, event } => {
                    self.deliver(id, tx, lagged, event).await;
                }
                Delivery::Result { id, tx, lagged, result } => {
                    self.deliver(id, tx, lagged, result).await;
                }
            }
        }
    }

    fn evaluate(&self, event: &FileEvent) -> Vec<Delivery> {
        let path = event.path();
        let mut subscribers = self.subscribers.lock();
        let index = self.index.read();
        let terms = index.terms_of(path);

        let mut deliveries = Vec::new();
        let mut gone = Vec::new();

        for (&id, subscriber) in subscribers.iter_mut() {
            match subscriber {
                Subscriber::Changes { tx, lagged } => deliveries.push(Delivery::Event {
                    id,
                    tx:     tx.clone(),
                    lagged: Arc::clone(lagged),
                    event:  event.clone(),
                }),

                Subscriber::Word { query, tx, lagged, matching } => {
                    let matches = terms.map(|t| query.matches_in(t)).unwrap_or_default();
                    let was = matching.contains(path);
                    let now = !matches.is_empty();
                    if was == now {
                        continue;
                    }
                    if now {
                        matching.insert(path.to_path_buf());
                    } else {
                        matching.remove(path);
                    }
                    deliveries.push(Delivery::Result {
                        id,
                        tx:     tx.clone(),
                        lagged: Arc::clone(lagged),
                        result: SearchResult { file: path.to_path_buf(), matches },
                    });
                }

                Subscriber::Words { query, tx, current } => {
                    let matches = terms.map(|t| query.matches_in(t)).unwrap_or_default();
                    let changed = if matches.is_empty() {
                        current.remove(path).is_some()
                    } else if current.get(path) != Some(&matches) {
                        current.insert(path.to_path_buf(), matches);
                        true
                    } else {
                        false
                    };
                    if !changed {
                        continue;
                    }
                    let list = current
                        .iter()
                        .map(|(file, matches)| SearchResult {
                            file:    file.clone(),
                            matches: matches.clone(),
                        })
                        .collect();
                    if tx.send(list).is_err() {
                        gone.push(id);
                    }
                }
            }
        }

        for id in gone {
            subscribers.remove(&id);
        }
        deliveries
    }

    async fn deliver<T: Send>(&self, id: u64, tx: mpsc::Sender<T>, lagged: Arc<AtomicBool>, value: T) {
        match tokio::time::timeout(self.send_timeout, tx.send(value)).await {
            Ok(Ok(())) => {}
            // Receiver dropped; its guard may not have run yet.
            Ok(Err(_)) => self.unsubscribe(id),
            Err(_) => {
                lagged.store(true, Ordering::Release);
                self.diagnostics.subscribers_dropped();
                log::warn!(
                    "subscription {id} did not drain its buffer within {:?}; cancelling it",
                    self.send_timeout
                );
                self.unsubscribe(id);
            }
        }
    }
}
