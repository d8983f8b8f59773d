// ── Reactive status stream ──
//
// Subscription type for consuming status summaries as they change.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::status::StatusSummary;

/// A subscription to the session's status summary.
///
/// Provides point-in-time access and change notification via
/// [`changed`](Self::changed) or by converting into a `Stream`.
pub struct StatusStream {
    current: Arc<StatusSummary>,
    receiver: watch::Receiver<Arc<StatusSummary>>,
}

impl StatusStream {
    pub(crate) fn new(mut receiver: watch::Receiver<Arc<StatusSummary>>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    /// The summary captured at creation (or at the last `changed`).
    pub fn current(&self) -> &Arc<StatusSummary> {
        &self.current
    }

    /// The latest summary, without waiting.
    pub fn latest(&self) -> Arc<StatusSummary> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the monitor is gone.
    pub async fn changed(&mut self) -> Option<Arc<StatusSummary>> {
        self.receiver.changed().await.ok()?;
        let summary = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&summary);
        Some(summary)
    }

    /// Convert into a `Stream` that yields the current summary first.
    pub fn into_stream(self) -> StatusWatchStream {
        StatusWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter over the status `watch` channel.
pub struct StatusWatchStream {
    inner: WatchStream<Arc<StatusSummary>>,
}

impl Stream for StatusWatchStream {
    type Item = Arc<StatusSummary>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
