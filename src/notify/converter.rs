//! Changed watchlist id → one message per subscribed user

use super::NotificationMessage;
use crate::pipeline::UserDirectory;
use crate::types::{User, WatchlistId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub const DEFAULT_USER_INDEX_TTL: Duration = Duration::from_secs(350);

type SubscriberIndex = HashMap<WatchlistId, Vec<Arc<User>>>;

/// Resolves subscribers through an in-memory index rebuilt every `ttl`
pub struct WatchlistConverter {
    directory: Arc<dyn UserDirectory>,
    ttl: Duration,
    index: SubscriberIndex,
    built_at: Option<Instant>,
}

impl WatchlistConverter {
    pub fn new(directory: Arc<dyn UserDirectory>, ttl: Duration) -> Self {
        Self {
            directory,
            ttl,
            index: HashMap::new(),
            built_at: None,
        }
    }

    async fn refresh_if_stale(&mut self) {
        let fresh = self.built_at.map(|at| at.elapsed() <= self.ttl).unwrap_or(false);
        if fresh {
            return;
        }

        match self.directory.list_users().await {
            Ok(users) => {
                self.index = build_index(users);
                self.built_at = Some(Instant::now());
                log::info!("👥 User index rebuilt: {} watchlists with subscribers", self.index.len());
            }
            Err(e) => {
                // Timestamp untouched so the next lookup retries
                log::warn!("⚠️  User index rebuild failed, keeping previous index: {}", e);
            }
        }
    }

    /// Users subscribed to `id`, each at most once
    pub async fn subscribers(&mut self, id: &WatchlistId) -> Vec<Arc<User>> {
        self.refresh_if_stale().await;
        self.index.get(id).cloned().unwrap_or_default()
    }

    /// Spawn the conversion task; the output closes when `changes` closes
    pub fn convert(mut self, mut changes: mpsc::Receiver<WatchlistId>, buffer: usize) -> mpsc::Receiver<NotificationMessage> {
        let (tx, rx) = mpsc::channel(buffer.max(1));

        tokio::spawn(async move {
            while let Some(id) = changes.recv().await {
                let users = self.subscribers(&id).await;
                if users.is_empty() {
                    log::debug!("No subscribers for changed watchlist {}", id);
                    continue;
                }
                for user in users {
                    log::info!("📨 Notification for {} about watchlist {}", user, id);
                    if tx.send(NotificationMessage::new(user, id.clone())).await.is_err() {
                        log::warn!("⚠️  Notification consumer gone, stopping converter");
                        return;
                    }
                }
            }
            log::debug!("Change feed closed, converter finished");
        });

        rx
    }
}

fn build_index(users: Vec<User>) -> SubscriberIndex {
    let mut index: SubscriberIndex = HashMap::new();
    for user in users {
        let user = Arc::new(user);
        for (_, id) in user.subscriptions() {
            let subscribers = index.entry(id).or_default();
            if !subscribers.iter().any(|u| u.id == user.id) {
                subscribers.push(Arc::clone(&user));
            }
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeDirectory {
        users: Mutex<Vec<User>>,
        fail: Mutex<bool>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UserDirectory for FakeDirectory {
        async fn list_users(&self) -> Result<Vec<User>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock().unwrap() {
                return Err(StoreError::Database("unavailable".to_string()));
            }
            Ok(self.users.lock().unwrap().clone())
        }
    }

    fn user(id: &str, lists: &[(&str, &str)]) -> User {
        User {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{}@example.com", id),
            verified: true,
            watchlists: lists.iter().map(|(n, ids)| (n.to_string(), ids.to_string())).collect(),
        }
    }

    fn directory(users: Vec<User>) -> Arc<FakeDirectory> {
        Arc::new(FakeDirectory {
            users: Mutex::new(users),
            fail: Mutex::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_index_maps_watchlists_to_unique_users() {
        let dir = directory(vec![
            user("alice", &[("games", "wl1,wl2"), ("retro", "wl1")]),
            user("bob", &[("tools", "wl3")]),
        ]);
        let mut converter = WatchlistConverter::new(dir.clone(), DEFAULT_USER_INDEX_TTL);

        let wl1 = converter.subscribers(&WatchlistId::new("wl1")).await;
        assert_eq!(wl1.len(), 1);
        assert_eq!(wl1[0].id, "alice");
        assert!(converter.subscribers(&WatchlistId::new("nope")).await.is_empty());
        assert_eq!(dir.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_index_rebuilt_after_ttl_and_kept_on_failure() {
        let dir = directory(vec![user("alice", &[("games", "wl1")])]);
        let mut converter = WatchlistConverter::new(dir.clone(), Duration::from_millis(10));
        assert_eq!(converter.subscribers(&WatchlistId::new("wl1")).await.len(), 1);

        *dir.fail.lock().unwrap() = true;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(converter.subscribers(&WatchlistId::new("wl1")).await.len(), 1);

        *dir.fail.lock().unwrap() = false;
        dir.users.lock().unwrap().push(user("bob", &[("x", "wl1")]));
        assert_eq!(converter.subscribers(&WatchlistId::new("wl1")).await.len(), 2);
        assert_eq!(dir.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_convert_fans_out_per_user() {
        let dir = directory(vec![
            user("alice", &[("games", "wl1")]),
            user("bob", &[("games", "wl1")]),
            user("carol", &[("other", "wl2")]),
        ]);
        let converter = WatchlistConverter::new(dir, DEFAULT_USER_INDEX_TTL);
        let (tx, rx) = mpsc::channel(4);
        let mut out = converter.convert(rx, 8);

        tx.send(WatchlistId::new("wl1")).await.unwrap();
        drop(tx);

        let mut users = Vec::new();
        while let Some(msg) = out.recv().await {
            assert_eq!(msg.watchlist_id, WatchlistId::new("wl1"));
            users.push(msg.user.id.clone());
        }
        users.sort();
        assert_eq!(users, vec!["alice".to_string(), "bob".to_string()]);
    }
}
