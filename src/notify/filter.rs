//! Predicate fan-in over any number of message streams

use super::NotificationMessage;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Predicate = Arc<dyn Fn(&NotificationMessage) -> bool + Send + Sync>;

/// Default predicate: only users who verified their email
pub fn verified_only(msg: &NotificationMessage) -> bool {
    msg.user.verified
}

#[derive(Clone)]
pub struct MessageFilter {
    predicate: Predicate,
    buffer: usize,
}

impl MessageFilter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&NotificationMessage) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            buffer: 1,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Merge `inputs`, keeping messages the predicate accepts
    ///
    /// One draining task per input. Once `cancel` fires, pending forwards are
    /// abandoned and the tasks exit. The output closes when every task has
    /// ended.
    pub fn filter<S>(&self, cancel: CancellationToken, inputs: Vec<S>) -> mpsc::Receiver<NotificationMessage>
    where
        S: Stream<Item = NotificationMessage> + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.buffer);

        for mut input in inputs {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let predicate = Arc::clone(&self.predicate);

            tokio::spawn(async move {
                loop {
                    let msg = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        next = input.next() => match next {
                            Some(msg) => msg,
                            None => break,
                        },
                    };

                    if !predicate(&msg) {
                        log::debug!("Filtered out notification {}", msg.dedup_key());
                        continue;
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = tx.send(msg) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        rx
    }
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self::new(verified_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{User, WatchlistId};
    use std::time::Duration;
    use tokio_stream::wrappers::ReceiverStream;

    fn msg(user: &str, verified: bool) -> NotificationMessage {
        NotificationMessage::new(
            Arc::new(User {
                id: user.to_string(),
                verified,
                ..Default::default()
            }),
            WatchlistId::new("wl1"),
        )
    }

    #[tokio::test]
    async fn test_fan_in_keeps_verified_users() {
        let (tx1, rx1) = mpsc::channel(4);
        let (tx2, rx2) = mpsc::channel(4);
        let mut out = MessageFilter::default().filter(
            CancellationToken::new(),
            vec![ReceiverStream::new(rx1), ReceiverStream::new(rx2)],
        );

        tx1.send(msg("alice", true)).await.unwrap();
        tx1.send(msg("mallory", false)).await.unwrap();
        tx2.send(msg("bob", true)).await.unwrap();
        drop(tx1);
        drop(tx2);

        let mut users = Vec::new();
        while let Some(m) = out.recv().await {
            users.push(m.user.id.clone());
        }
        users.sort();
        assert_eq!(users, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_closes_output_with_open_inputs() {
        let (tx, rx) = mpsc::channel::<NotificationMessage>(4);
        let cancel = CancellationToken::new();
        let mut out = MessageFilter::new(|_| true).filter(cancel.clone(), vec![ReceiverStream::new(rx)]);

        cancel.cancel();
        let closed = tokio::time::timeout(Duration::from_secs(1), out.recv()).await.unwrap();
        assert!(closed.is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn test_no_inputs_closes_immediately() {
        let mut out = MessageFilter::default()
            .filter::<ReceiverStream<NotificationMessage>>(CancellationToken::new(), Vec::new());
        assert!(out.recv().await.is_none());
    }
}
