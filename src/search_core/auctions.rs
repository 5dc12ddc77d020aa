//! Open-auction listing with a lazily refreshed TTL cache

use super::protocol::SearchProtocol;
use super::SearchError;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

pub const DEFAULT_AUCTION_TTL: Duration = Duration::from_secs(600);

/// Source of the currently open auction identifiers
#[async_trait]
pub trait AuctionLister: Send + Sync {
    async fn list_open_auctions(&self) -> Result<Vec<String>, SearchError>;
}

pub struct HttpAuctionLister {
    client: reqwest::Client,
    protocol: SearchProtocol,
}

impl HttpAuctionLister {
    pub fn new(client: reqwest::Client, protocol: SearchProtocol) -> Self {
        Self { client, protocol }
    }
}

#[async_trait]
impl AuctionLister for HttpAuctionLister {
    async fn list_open_auctions(&self) -> Result<Vec<String>, SearchError> {
        let url = self.protocol.open_auctions_url()?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SearchError::Status(status.as_u16()));
        }

        let page = response.text().await?;
        self.protocol.parse_open_auctions(&page)
    }
}

/// Items site: auction ids from `span.label.label-warning` elements with ids of the form `label_<auction>`
pub fn parse_auction_labels(page: &str) -> Result<Vec<String>, SearchError> {
    let labels = Selector::parse("span.label.label-warning[id]")
        .map_err(|e| SearchError::Parse(format!("label selector: {:?}", e)))?;
    let document = Html::parse_document(page);

    let mut auctions = Vec::new();
    for label in document.select(&labels) {
        let Some(id) = label.value().attr("id") else {
            continue;
        };
        match auction_from_label(id) {
            Some(auction) => push_unique(&mut auctions, auction),
            None => log::debug!("Skipping auction label with unexpected id '{}'", id),
        }
    }

    non_empty(auctions)
}

/// Exactly two `_`-separated parts, the second non-empty
fn auction_from_label(id: &str) -> Option<&str> {
    let mut parts = id.split('_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(auction), None) if !auction.is_empty() => Some(auction),
        _ => None,
    }
}

/// Legacy site: auction ids from the current-sales widget on the sale-events page
///
/// Each auction is linked as `.../mmlist.cgi?<auction>`; the id is the first
/// query key. Relative links resolve against `base`.
pub fn parse_sale_events(page: &str, base: &Url) -> Result<Vec<String>, SearchError> {
    let links = Selector::parse("div.widget_ebid_current_widget div.widgetOuter > a[href]")
        .map_err(|e| SearchError::Parse(format!("sale event selector: {:?}", e)))?;
    let document = Html::parse_document(page);

    let mut auctions = Vec::new();
    for link in document.select(&links) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let auction = base
            .join(href)
            .ok()
            .and_then(|url| url.query_pairs().next().map(|(key, _)| key.into_owned()));
        match auction {
            Some(auction) if !auction.is_empty() => push_unique(&mut auctions, &auction),
            _ => log::debug!("Skipping sale event link without auction id '{}'", href),
        }
    }

    non_empty(auctions)
}

fn push_unique(auctions: &mut Vec<String>, auction: &str) {
    if !auctions.iter().any(|a| a == auction) {
        auctions.push(auction.to_string());
    }
}

fn non_empty(auctions: Vec<String>) -> Result<Vec<String>, SearchError> {
    if auctions.is_empty() {
        return Err(SearchError::EmptyListing);
    }
    Ok(auctions)
}

struct CacheState {
    auctions: Arc<Vec<String>>,
    last_refresh: Option<Instant>,
}

/// TTL cache over an [`AuctionLister`]
///
/// A read past the TTL triggers a refresh first. The fetch runs without the
/// state lock held; the write lock only covers the swap. Concurrent stale
/// readers queue on `refreshing` and re-check staleness once they get it, so
/// one fetch serves them all. A failed refresh keeps the old list and
/// timestamp, so the next read tries again.
pub struct AuctionCache {
    lister: Arc<dyn AuctionLister>,
    ttl: Duration,
    state: RwLock<CacheState>,
    refreshing: Mutex<()>,
}

impl AuctionCache {
    pub fn new(lister: Arc<dyn AuctionLister>, ttl: Duration) -> Self {
        Self {
            lister,
            ttl,
            state: RwLock::new(CacheState {
                auctions: Arc::new(Vec::new()),
                last_refresh: None,
            }),
            refreshing: Mutex::new(()),
        }
    }

    fn is_stale(&self) -> bool {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        match state.last_refresh {
            Some(at) => at.elapsed() > self.ttl,
            None => true,
        }
    }

    fn snapshot(&self) -> Arc<Vec<String>> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&state.auctions)
    }

    pub async fn get_auctions(&self) -> Arc<Vec<String>> {
        if self.is_stale() {
            let _refreshing = self.refreshing.lock().await;
            // Another reader may have refreshed while we queued
            if self.is_stale() {
                self.refresh().await;
            }
        }
        self.snapshot()
    }

    /// Re-fetch the listing now; returns whether the cache was replaced
    pub async fn refresh(&self) -> bool {
        match self.lister.list_open_auctions().await {
            Ok(auctions) => {
                log::info!("🏷️  Refreshed open auctions: {} listed", auctions.len());
                let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
                state.auctions = Arc::new(auctions);
                state.last_refresh = Some(Instant::now());
                true
            }
            Err(e) => {
                let stale = self.snapshot().len();
                log::warn!(
                    "⚠️  Auction listing refresh failed, keeping {} cached auctions: {}",
                    stale,
                    e
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedLister {
        responses: Mutex<VecDeque<Result<Vec<String>, SearchError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedLister {
        fn new(responses: Vec<Result<Vec<String>, SearchError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AuctionLister for ScriptedLister {
        async fn list_open_auctions(&self) -> Result<Vec<String>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(SearchError::EmptyListing))
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_cache_serves_within_ttl() {
        let lister = ScriptedLister::new(vec![Ok(ids(&["100", "200"])), Ok(ids(&["300"]))]);
        let cache = AuctionCache::new(lister.clone(), Duration::from_secs(600));

        assert_eq!(*cache.get_auctions().await, ids(&["100", "200"]));
        assert_eq!(*cache.get_auctions().await, ids(&["100", "200"]));
        assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_refreshes_after_ttl() {
        let lister = ScriptedLister::new(vec![Ok(ids(&["100"])), Ok(ids(&["300"]))]);
        let cache = AuctionCache::new(lister.clone(), Duration::from_millis(10));

        assert_eq!(*cache.get_auctions().await, ids(&["100"]));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*cache.get_auctions().await, ids(&["300"]));
        assert_eq!(lister.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_list() {
        let lister = ScriptedLister::new(vec![
            Ok(ids(&["100"])),
            Err(SearchError::Status(503)),
            Ok(ids(&["400"])),
        ]);
        let cache = AuctionCache::new(lister.clone(), Duration::from_millis(10));

        assert_eq!(*cache.get_auctions().await, ids(&["100"]));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*cache.get_auctions().await, ids(&["100"]));
        // Timestamp untouched by the failure, so the next read retries
        assert_eq!(*cache.get_auctions().await, ids(&["400"]));
        assert_eq!(lister.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_refresh_failure_yields_empty_list() {
        let lister = ScriptedLister::new(vec![Err(SearchError::Status(500))]);
        let cache = AuctionCache::new(lister, DEFAULT_AUCTION_TTL);
        assert!(cache.get_auctions().await.is_empty());
    }

    struct SlowLister {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuctionLister for SlowLister {
        async fn list_open_auctions(&self) -> Result<Vec<String>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(ids(&["100"]))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stale_reads_share_one_refresh() {
        let lister = Arc::new(SlowLister {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(AuctionCache::new(lister.clone(), DEFAULT_AUCTION_TTL));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_auctions().await })
            })
            .collect();
        for reader in readers {
            assert_eq!(*reader.await.unwrap(), ids(&["100"]));
        }

        assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_auction_labels() {
        let page = r#"<html><body>
            <span class="label label-warning" id="label_74691">Open</span>
            <span class="label label-warning" id="label_74700">Open</span>
            <span class="label label-success" id="label_99999">Closed</span>
            <span class="label label-warning" id="label_74691">Open</span>
        </body></html>"#;
        assert_eq!(parse_auction_labels(page).unwrap(), ids(&["74691", "74700"]));
    }

    #[test]
    fn test_parse_auction_labels_without_labels_is_an_error() {
        assert!(matches!(
            parse_auction_labels("<html><body>maintenance</body></html>"),
            Err(SearchError::EmptyListing)
        ));
    }

    #[test]
    fn test_auction_label_needs_exactly_two_parts() {
        let page = r#"<html><body>
            <span class="label label-warning" id="label_1_2">Open</span>
            <span class="label label-warning" id="label_">Open</span>
            <span class="label label-warning" id="label74800">Open</span>
            <span class="label label-warning" id="label_74801">Open</span>
        </body></html>"#;
        assert_eq!(parse_auction_labels(page).unwrap(), ids(&["74801"]));
        assert_eq!(auction_from_label("label_1_2"), None);
    }

    #[test]
    fn test_parse_sale_events() {
        let base = Url::parse("https://www.ebidlocal.com/im-bidding/sale-events/").unwrap();
        let page = r#"<html><body>
            <div class="widget_ebid_current_widget">
              <div class="widgetOuter"><a href="https://auction.ebidlocal.com/cgi-bin/mmlist.cgi?denver123">Denver</a></div>
              <div class="widgetOuter"><a href="/cgi-bin/mmlist.cgi?boston7">Boston</a></div>
              <div class="widgetOuter"><a href="https://auction.ebidlocal.com/cgi-bin/mmlist.cgi">No id</a></div>
              <div class="widgetOuter"><a href="https://auction.ebidlocal.com/cgi-bin/mmlist.cgi?denver123">Again</a></div>
            </div>
            <div class="widget_ebid_past_widget">
              <div class="widgetOuter"><a href="https://auction.ebidlocal.com/cgi-bin/mmlist.cgi?closed1">Closed</a></div>
            </div>
        </body></html>"#;

        assert_eq!(parse_sale_events(page, &base).unwrap(), ids(&["denver123", "boston7"]));
        assert!(matches!(
            parse_sale_events("<html><body></body></html>", &base),
            Err(SearchError::EmptyListing)
        ));
    }
}
