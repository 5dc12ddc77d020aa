//! Auction search: open-auction listing cache, protocol variants, throttled
//! search engine and structured item extraction
//!
//! ## Flow
//!
//! ```text
//! AuctionCache::get_auctions()      KeywordSet
//!            \                       /
//!        SearchProtocol::tasks()  (auction × keyword cross-product)
//!                    ↓
//!     ThrottledSearch (semaphore-gated workers, SiteClient::fetch)
//!                    ↓
//!     SearchProtocol::result_fragments()  (links absolutised, dynamic markup removed)
//!                    ↓
//!          mpsc::Receiver<SearchResult>
//!                    ↓
//!        ItemExtractor::extract() → AuctionItem
//! ```

pub mod auctions;
pub mod client;
pub mod engine;
pub mod extractor;
pub mod protocol;

pub use auctions::{AuctionCache, AuctionLister, HttpAuctionLister};
pub use client::{HttpSiteClient, SiteClient};
pub use engine::{AuctionSearcher, SearchSettings, ThrottledSearch};
pub use extractor::{HtmlItemExtractor, ItemExtractor};
pub use protocol::{ProtocolVersion, SearchProtocol, SiteProtocol};

use std::time::Duration;

/// Failure of a single fetch or page parse
#[derive(Debug)]
pub enum SearchError {
    Http(reqwest::Error),
    Status(u16),
    Timeout(Duration),
    Parse(String),
    EmptyListing,
}

impl SearchError {
    /// Worth retrying: transport failures, timeouts, throttling and server errors
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SearchError::Status(code) => *code == 429 || *code >= 500,
            SearchError::Timeout(_) => true,
            SearchError::Parse(_) | SearchError::EmptyListing => false,
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        SearchError::Http(err)
    }
}

impl From<url::ParseError> for SearchError {
    fn from(err: url::ParseError) -> Self {
        SearchError::Parse(err.to_string())
    }
}

impl std::fmt::Display for SearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchError::Http(e) => write!(f, "HTTP error: {}", e),
            SearchError::Status(code) => write!(f, "Unexpected status code: {}", code),
            SearchError::Timeout(d) => write!(f, "Request timed out after {:?}", d),
            SearchError::Parse(e) => write!(f, "Parse error: {}", e),
            SearchError::EmptyListing => write!(f, "No open auctions found on listing page"),
        }
    }
}

impl std::error::Error for SearchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SearchError::Http(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SearchError::Status(503).is_transient());
        assert!(SearchError::Status(429).is_transient());
        assert!(!SearchError::Status(404).is_transient());
        assert!(SearchError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(!SearchError::Parse("bad".into()).is_transient());
        assert!(!SearchError::EmptyListing.is_transient());
    }
}
