//! Delivery sinks
//!
//! `LogNotifier` renders the plain-text summary an email would carry and
//! writes it to the log. A mail sink implements the same [`Notifier`] trait.

use super::NotificationMessage;
use crate::pipeline::{StoreError, WatchlistStore};
use crate::types::{User, WatchlistContent, WatchlistId};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::sync::Arc;

#[derive(Debug)]
pub enum NotifyError {
    Store(StoreError),
    /// The user no longer lists the watchlist that changed
    NotSubscribed { user: String, watchlist: WatchlistId },
    Delivery(String),
}

impl From<StoreError> for NotifyError {
    fn from(err: StoreError) -> Self {
        NotifyError::Store(err)
    }
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Store(e) => write!(f, "Store error: {}", e),
            NotifyError::NotSubscribed { user, watchlist } => {
                write!(f, "User {} is not subscribed to watchlist {}", user, watchlist)
            }
            NotifyError::Delivery(e) => write!(f, "Delivery failed: {}", e),
        }
    }
}

impl std::error::Error for NotifyError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &NotificationMessage) -> Result<(), NotifyError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: usize,
    pub failed: usize,
}

/// Hand every message to every notifier until `messages` ends
///
/// Failures are logged and counted; nothing is retried.
pub async fn deliver_all<S>(mut messages: S, notifiers: &[Arc<dyn Notifier>]) -> DeliveryStats
where
    S: Stream<Item = NotificationMessage> + Unpin,
{
    let mut stats = DeliveryStats::default();

    while let Some(message) = messages.next().await {
        for notifier in notifiers {
            match notifier.notify(&message).await {
                Ok(()) => stats.delivered += 1,
                Err(e) => {
                    stats.failed += 1;
                    log::error!("❌ Notification {} failed: {}", message.dedup_key(), e);
                }
            }
        }
    }

    log::info!(
        "📬 Delivery finished: {} delivered, {} failed",
        stats.delivered,
        stats.failed
    );
    stats
}

/// Anchor for a watchlist on the view page: CSS-safe `name_id`
pub fn watchlist_anchor(name: &str, id: &WatchlistId) -> String {
    let raw = format!("{}_{}", name, id);
    let safe: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    // CSS identifiers may not start with a digit or hyphen
    safe.trim_start_matches(|c: char| c.is_ascii_digit() || c == '-')
        .to_string()
}

pub fn watchlist_link(server_url: &str, user: &User, name: &str, id: &WatchlistId) -> String {
    let user_id: String = url::form_urlencoded::byte_serialize(user.id.as_bytes()).collect();
    format!(
        "{}/viewwatchlists.html?id={}#{}",
        server_url.trim_end_matches('/'),
        user_id,
        watchlist_anchor(name, id)
    )
}

pub fn render_summary(name: &str, link: &str, content: &WatchlistContent) -> String {
    let mut body = format!(
        "Your watch list has updates '{}'\n{} matching items\n",
        name,
        content.items.len()
    );
    for item in &content.items {
        body.push_str(&format!("  - [{}] {}", item.parent_auction_id, item.name));
        if item.current_bid_amount > 0 {
            body.push_str(&format!(" (bid {})", item.current_bid_amount));
        }
        if let Some(url) = &item.item_url {
            body.push_str(&format!(" {}", url));
        }
        body.push('\n');
    }
    body.push_str(&format!("View: {}\n", link));
    body
}

pub struct LogNotifier {
    store: Arc<dyn WatchlistStore>,
    server_url: String,
}

impl LogNotifier {
    pub fn new(store: Arc<dyn WatchlistStore>, server_url: impl Into<String>) -> Self {
        Self {
            store,
            server_url: server_url.into(),
        }
    }

    /// Subject line and body for a message
    pub async fn compose(&self, message: &NotificationMessage) -> Result<(String, String), NotifyError> {
        let name = message
            .user
            .subscriptions()
            .find(|(_, id)| *id == message.watchlist_id)
            .map(|(name, _)| name.to_string())
            .ok_or_else(|| NotifyError::NotSubscribed {
                user: message.user.id.clone(),
                watchlist: message.watchlist_id.clone(),
            })?;

        let content = match self.store.load_watchlist_content(&message.watchlist_id).await? {
            Some(content) => content,
            None => {
                log::warn!("⚠️  No stored content for watchlist {}", message.watchlist_id);
                WatchlistContent::new(message.watchlist_id.clone(), Vec::new(), 0)
            }
        };

        let link = watchlist_link(&self.server_url, &message.user, &name, &message.watchlist_id);
        let subject = format!("Your watch list has updates '{}'", name);
        Ok((subject, render_summary(&name, &link, &content)))
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let (subject, body) = self.compose(message).await?;
        log::info!("✉️  To: {} | {}\n{}", message.user.email, subject, body);
        Ok(())
    }
}
