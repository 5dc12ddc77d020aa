//! Notification fan-out
//!
//! ```text
//! change hub ─► WatchlistConverter ─► DedupQueue ─► MessageFilter ─► deliver_all ─► Notifier(s)
//!  (ids)         (one msg per user)    (in-flight     (verified       (log/email
//!                                       coalescing)    users only)     sinks)
//! ```

pub mod converter;
pub mod dedup;
pub mod filter;
pub mod sink;

pub use converter::WatchlistConverter;
pub use dedup::{DedupQueue, Deduped};
pub use filter::{verified_only, MessageFilter};
pub use sink::{deliver_all, DeliveryStats, LogNotifier, Notifier, NotifyError};

use crate::types::{User, WatchlistId};
use std::sync::Arc;

/// One user to tell about one changed watchlist
#[derive(Debug, Clone)]
pub struct NotificationMessage {
    pub user: Arc<User>,
    pub watchlist_id: WatchlistId,
}

impl NotificationMessage {
    pub fn new(user: Arc<User>, watchlist_id: WatchlistId) -> Self {
        Self { user, watchlist_id }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            user_id: self.user.id.clone(),
            watchlist_id: self.watchlist_id.clone(),
        }
    }
}

/// `(user, watchlist)` identity used for in-flight coalescing
///
/// Kept as separate fields so ids containing `:` cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub user_id: String,
    pub watchlist_id: WatchlistId,
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.user_id, self.watchlist_id)
    }
}
