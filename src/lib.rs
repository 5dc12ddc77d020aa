//! auctionwatch - watchlist change detection and notification for auction listings
//!
//! Discovery feed → [`pipeline::Updater`] (search, fingerprint, compare) →
//! [`broadcast::Broadcaster`] → [`notify`] (fan-out, dedup, filter) → sinks.

pub mod broadcast;
pub mod config;
pub mod error_handler;
pub mod notify;
pub mod pipeline;
pub mod search_core;
pub mod types;

pub use broadcast::Broadcaster;
pub use config::{ConfigError, WatchConfig};
pub use types::{AuctionItem, Fingerprint, KeywordSet, SearchResult, SearchTask, User, WatchlistContent, WatchlistId};
