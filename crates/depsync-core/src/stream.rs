// ── Reactive slice streams ──
//
// Subscription types for consuming slice changes from the ClientCache.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::store::SliceState;

/// A subscription to one tracked slice.
///
/// Provides both point-in-time access and change notification via
/// [`changed`](Self::changed), [`wait_for`](Self::wait_for), or by
/// converting to a `Stream`.
pub struct SliceStream<T: Clone + Send + Sync + 'static> {
    current: SliceState<T>,
    receiver: watch::Receiver<SliceState<T>>,
}

impl<T: Clone + Send + Sync + 'static> SliceStream<T> {
    pub(crate) fn new(mut receiver: watch::Receiver<SliceState<T>>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    /// The state captured at creation or at the last [`changed`](Self::changed).
    pub fn current(&self) -> &SliceState<T> {
        &self.current
    }

    /// The latest state (may have changed since creation).
    pub fn latest(&self) -> SliceState<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new state.
    /// Returns `None` if the cache has been dropped.
    pub async fn changed(&mut self) -> Option<SliceState<T>> {
        self.receiver.changed().await.ok()?;
        let state = self.receiver.borrow_and_update().clone();
        self.current = state.clone();
        Some(state)
    }

    /// Wait until the state satisfies `predicate`, checking the latest
    /// state first.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&SliceState<T>) -> bool,
    ) -> Option<SliceState<T>> {
        let state = self.receiver.wait_for(|s| predicate(s)).await.ok()?.clone();
        self.current = state.clone();
        Some(state)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    /// The first item is the state at conversion time.
    pub fn into_stream(self) -> SliceWatchStream<T> {
        SliceWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
///
/// Yields a new [`SliceState`] each time the slice is written.
pub struct SliceWatchStream<T: Clone + Send + Sync + 'static> {
    inner: WatchStream<SliceState<T>>,
}

impl<T: Clone + Send + Sync + 'static> Stream for SliceWatchStream<T> {
    type Item = SliceState<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // WatchStream is Unpin, so projecting through `&mut` is fine.
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;
    use crate::model::UvDependencies;
    use crate::store::Origin;
    use crate::store::SliceCell;

    #[test]
    fn changed_waits_for_next_write() {
        let cell = SliceCell::<UvDependencies>::new();
        let mut stream = SliceStream::new(cell.subscribe());
        assert!(!stream.current().loaded);

        let mut changed = task::spawn(stream.changed());
        assert_pending!(changed.poll());

        cell.reset(4);
        assert!(changed.is_woken());
        let state = assert_ready!(changed.poll()).unwrap();
        assert_eq!(state.epoch, 4);
        drop(changed);

        assert_eq!(stream.current().epoch, 4);
    }

    #[test]
    fn latest_sees_writes_before_changed() {
        let cell = SliceCell::<UvDependencies>::new();
        let stream = SliceStream::new(cell.subscribe());

        cell.reset(1);
        cell.replace(1, None, Origin::Broadcast);

        assert!(!stream.current().loaded);
        assert!(stream.latest().loaded);
    }
}
