//! In-flight deduplication of notification messages
//!
//! A `(user, watchlist)` key is held from the moment its message is accepted
//! until the downstream consumer receives it. Duplicates arriving in between
//! are dropped. Once received, the next change for the pair goes through.

use super::{DedupKey, NotificationMessage};
use futures::Stream;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

type KeySet = Arc<Mutex<HashSet<DedupKey>>>;

fn release(keys: &KeySet, msg: &NotificationMessage) {
    keys.lock()
        .unwrap_or_else(|p| p.into_inner())
        .remove(&msg.dedup_key());
}

#[derive(Default, Clone)]
pub struct DedupQueue {
    in_flight: KeySet,
}

impl DedupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Forward every message whose key is not already in flight
    ///
    /// The output closes after `input` closes and every accepted message
    /// has been handed off (or its consumer has gone).
    pub fn enqueue(&self, mut input: mpsc::Receiver<NotificationMessage>) -> Deduped {
        let (tx, rx) = mpsc::channel(1);
        let keys = Arc::clone(&self.in_flight);

        tokio::spawn({
            let keys = Arc::clone(&keys);
            async move {
                let mut forwards = JoinSet::new();

                loop {
                    tokio::select! {
                        msg = input.recv() => {
                            let Some(msg) = msg else { break };
                            let inserted = keys
                                .lock()
                                .unwrap_or_else(|p| p.into_inner())
                                .insert(msg.dedup_key());
                            if !inserted {
                                log::debug!("Dropping duplicate in-flight notification {}", msg.dedup_key());
                                continue;
                            }

                            let tx = tx.clone();
                            let keys = Arc::clone(&keys);
                            forwards.spawn(async move {
                                if let Err(mpsc::error::SendError(msg)) = tx.send(msg).await {
                                    release(&keys, &msg);
                                }
                            });
                        }
                        Some(joined) = forwards.join_next(), if !forwards.is_empty() => {
                            if let Err(e) = joined {
                                log::error!("❌ Notification forward task failed: {}", e);
                            }
                        }
                    }
                }

                drop(tx);
                while let Some(joined) = forwards.join_next().await {
                    if let Err(e) = joined {
                        log::error!("❌ Notification forward task failed: {}", e);
                    }
                }
            }
        });

        Deduped { rx, keys }
    }
}

/// Receiving side of a [`DedupQueue`]; receiving a message releases its key
pub struct Deduped {
    rx: mpsc::Receiver<NotificationMessage>,
    keys: KeySet,
}

impl Deduped {
    pub async fn recv(&mut self) -> Option<NotificationMessage> {
        let msg = self.rx.recv().await?;
        release(&self.keys, &msg);
        Some(msg)
    }
}

impl Stream for Deduped {
    type Item = NotificationMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(msg)) => {
                release(&this.keys, &msg);
                Poll::Ready(Some(msg))
            }
            other => other,
        }
    }
}
