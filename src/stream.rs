use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use tokio_stream::Stream;

use crate::error::IndexerError;
use crate::hub::SubscriptionHub;

/// A live, cancellable sequence of updates from a running [`FileIndexer`](crate::FileIndexer).
///
/// Starts from "now": nothing that happened before the subscription was
/// created is replayed. Values are yielded as `Ok(value)`.
///
/// The stream ends (`None`) when the indexer is closed, after every value
/// already queued has been yielded. If the subscription was cancelled because
/// its consumer fell behind, the last item before `None` is
/// `Err(IndexerError::SubscriberLagged)`.
///
/// Dropping the stream cancels the subscription: its buffer is released and
/// the indexer stops evaluating it.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_stream::StreamExt;
///
/// let mut todos = indexer.watch_for_word("TODO")?;
/// while let Some(update) = todos.next().await {
///     let result = update?;
///     println!("TODO found in {}", result.file.display());
/// }
/// ```
pub struct LiveStream<T> {
    inner:    Pin<Box<dyn Stream<Item = T> + Send>>,
    lagged:   Arc<AtomicBool>,
    finished: bool,
    guard:    SubscriptionGuard,
}

impl<T> LiveStream<T> {
    pub(crate) fn new(
        inner: impl Stream<Item = T> + Send + 'static,
        id: u64,
        hub: Weak<SubscriptionHub>,
        lagged: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
            lagged,
            finished: false,
            guard: SubscriptionGuard { id, hub },
        }
    }

    /// Identifier of the underlying subscription, unique per indexer.
    pub fn id(&self) -> u64 {
        self.guard.id
    }

    /// Cancel the subscription. Equivalent to dropping the stream.
    pub fn cancel(self) {}
}

impl<T> Stream for LiveStream<T> {
    type Item = Result<T, IndexerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(value)) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(None) => {
                self.finished = true;
                if self.lagged.load(Ordering::Acquire) {
                    Poll::Ready(Some(Err(IndexerError::SubscriberLagged)))
                } else {
                    Poll::Ready(None)
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for LiveStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveStream")
            .field("id", &self.guard.id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Removes the subscription from the hub when the stream goes away.
struct SubscriptionGuard {
    id:  u64,
    hub: Weak<SubscriptionHub>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
