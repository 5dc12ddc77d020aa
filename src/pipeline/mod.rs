//! # Change-detection pipeline
//!
//! Turns a feed of watchlist ids into change events:
//!
//! 1. `db` - watchlist, content and user persistence (SQLite)
//! 2. `keyword_filter` - whole-word matching of extracted items
//! 3. `updater` - search, fingerprint, compare, persist, publish
//!
//! Content is never kept as history; only the latest snapshot and its
//! fingerprint are stored.

pub mod db;
pub mod keyword_filter;
pub mod updater;

pub use db::{run_schema_migrations, SqliteWatchStore, StoreError, UserDirectory, WatchlistStore};
pub use keyword_filter::KeywordFilter;
pub use updater::{UpdateError, UpdateOutcome, Updater};
