//! Bounded queue that favours recency: a full queue evicts its oldest item
//! instead of blocking the producer or growing.
//!
//! Built on `tokio::sync::broadcast` with a single subscriber. The ring
//! underneath is rounded up to a power of two, so the receiver also skips
//! anything older than the newest `capacity` items before handing it out.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Producer half. Cloneable; the queue closes when the last sender drops.
#[derive(Clone)]
pub struct RecentSender<T> {
    tx: broadcast::Sender<T>,
    capacity: usize,
}

/// Consumer half.
pub struct RecentReceiver<T> {
    rx: broadcast::Receiver<T>,
    capacity: usize,
}

/// Create a queue holding at most `capacity` items.
///
/// # Panics
/// Panics if `capacity` is zero.
pub fn recent_channel<T: Clone>(capacity: usize) -> (RecentSender<T>, RecentReceiver<T>) {
    assert!(capacity > 0, "recent_channel capacity must be > 0");
    let (tx, rx) = broadcast::channel(capacity);
    (RecentSender { tx, capacity }, RecentReceiver { rx, capacity })
}

impl<T: Clone> RecentSender<T> {
    /// Enqueue `item`. Returns true if the queue was full and its oldest item
    /// was displaced.
    pub fn push(&self, item: T) -> bool {
        let displaced = self.tx.len() >= self.capacity;
        // No receiver left means nobody cares about the item.
        let _ = self.tx.send(item);
        displaced
    }
}

impl<T: Clone> RecentReceiver<T> {
    /// Wait for the oldest retained item. Returns `None` once every sender is
    /// gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(item) => {
                    if self.is_stale() {
                        continue;
                    }
                    return Some(item);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Recent queue overran, skipped {} items", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the oldest retained item without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(item) => {
                    if self.is_stale() {
                        continue;
                    }
                    return Some(item);
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!("Recent queue overran, skipped {} items", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// An item just taken is stale when `capacity` newer ones follow it.
    fn is_stale(&self) -> bool {
        self.rx.len() >= self.capacity
    }
}
