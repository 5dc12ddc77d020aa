//! Best-effort pub/sub hub
//!
//! Every `publish` fans a value out to all registered subscribers
//! independently. Each delivery waits at most `publish_timeout` for the
//! subscriber to have room; a subscriber that is not ready loses that value
//! and the drop is logged. A stalled subscriber therefore never holds up the
//! others, and `publish` always returns within one timeout.

use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Default per-subscriber delivery budget
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(50);

struct Listener<T> {
    id: u64,
    tx: mpsc::Sender<T>,
}

struct Inner<T> {
    listeners: RwLock<Vec<Listener<T>>>,
    next_id: AtomicU64,
    publish_timeout: Duration,
}

/// Fan-out hub, cheap to clone (clones share the listener set)
pub struct Broadcaster<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Handle returned by [`Broadcaster::register`]; removes the subscriber when invoked
pub struct Unregister<T> {
    id: u64,
    hub: Weak<Inner<T>>,
}

impl<T> Unregister<T> {
    /// Remove the subscriber and close its channel
    ///
    /// Returns `false` if the subscriber was already gone (or the hub dropped).
    pub fn unregister(self) -> bool {
        let Some(hub) = self.hub.upgrade() else {
            return false;
        };
        let mut listeners = hub
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match listeners.iter().position(|l| l.id == self.id) {
            Some(index) => {
                // Dropping the sender closes the receiver once buffered values drain
                listeners.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_PUBLISH_TIMEOUT)
    }

    pub fn with_timeout(publish_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
                publish_timeout,
            }),
        }
    }

    /// Subscribe to published values
    pub fn register(&self) -> (mpsc::Receiver<T>, Unregister<T>) {
        // Capacity 1: a subscriber can hold at most one undelivered value
        let (tx, rx) = mpsc::channel(1);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Listener { id, tx });

        log::debug!("📡 Subscriber {} registered", id);

        (
            rx,
            Unregister {
                id,
                hub: Arc::downgrade(&self.inner),
            },
        )
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Deliver `value` to every current subscriber
    ///
    /// Sends run concurrently, each bounded by the publish timeout. The call
    /// resolves once every send has either completed or timed out, so
    /// successive publishes from one producer arrive in order.
    pub async fn publish(&self, value: T) {
        // Snapshot under the read lock; never hold it across an await
        let senders: Vec<(u64, mpsc::Sender<T>)> = {
            let listeners = self
                .inner
                .listeners
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            listeners.iter().map(|l| (l.id, l.tx.clone())).collect()
        };

        if senders.is_empty() {
            log::debug!("📡 Publish with no subscribers, value dropped");
            return;
        }

        let budget = self.inner.publish_timeout;
        let deliveries = senders.into_iter().map(|(id, tx)| {
            let value = value.clone();
            async move {
                match timeout(budget, tx.send(value)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        log::debug!("Subscriber {} closed its channel, delivery skipped", id);
                    }
                    Err(_) => {
                        log::warn!("⚠️  Publish to subscriber {} timed out after {:?}", id, budget);
                    }
                }
            }
        });

        join_all(deliveries).await;
    }
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}
