//! Change detection per watchlist
//!
//! One run: load keywords → search every open auction → extract and
//! keyword-filter items → fingerprint → compare with the stored fingerprint.
//! Only a differing fingerprint persists the new content and publishes the
//! watchlist id on the change hub.

use super::db::{StoreError, WatchlistStore};
use super::keyword_filter::KeywordFilter;
use crate::broadcast::{Broadcaster, Unregister};
use crate::search_core::{AuctionCache, AuctionSearcher, ItemExtractor};
use crate::types::{AuctionItem, Fingerprint, WatchlistContent, WatchlistId};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    NoChange,
    Changed(Fingerprint),
}

#[derive(Debug)]
pub enum UpdateError {
    Store(StoreError),
    /// No open auctions known yet; a run now would look like every item vanished
    NoAuctions,
}

impl From<StoreError> for UpdateError {
    fn from(err: StoreError) -> Self {
        UpdateError::Store(err)
    }
}

impl std::fmt::Display for UpdateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateError::Store(e) => write!(f, "Store error: {}", e),
            UpdateError::NoAuctions => write!(f, "No open auctions available"),
        }
    }
}

impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UpdateError::Store(e) => Some(e),
            UpdateError::NoAuctions => None,
        }
    }
}

pub struct Updater {
    store: Arc<dyn WatchlistStore>,
    auctions: Arc<AuctionCache>,
    searcher: Arc<dyn AuctionSearcher>,
    extractor: Arc<dyn ItemExtractor>,
    changes: Broadcaster<WatchlistId>,
}

impl Updater {
    pub fn new(
        store: Arc<dyn WatchlistStore>,
        auctions: Arc<AuctionCache>,
        searcher: Arc<dyn AuctionSearcher>,
        extractor: Arc<dyn ItemExtractor>,
        changes: Broadcaster<WatchlistId>,
    ) -> Self {
        Self {
            store,
            auctions,
            searcher,
            extractor,
            changes,
        }
    }

    /// Listen for ids of watchlists whose content changed
    pub fn subscribe(&self) -> (mpsc::Receiver<WatchlistId>, Unregister<WatchlistId>) {
        self.changes.register()
    }

    pub async fn update_watchlist(&self, id: &WatchlistId) -> Result<UpdateOutcome, UpdateError> {
        let keywords = self.store.load_watchlist(id).await?;
        let auctions = self.auctions.get_auctions().await;
        if auctions.is_empty() {
            return Err(UpdateError::NoAuctions);
        }

        let filter = KeywordFilter::new(&keywords);
        let mut results = self.searcher.search(&keywords, &auctions);

        // Keyed by item id: the items protocol can return one item per matching keyword
        let mut items: BTreeMap<String, AuctionItem> = BTreeMap::new();
        while let Some(result) = results.recv().await {
            for mut item in self.extractor.extract(&result) {
                // Legacy rows arrive tagged with every keyword searched; keep what the text holds
                let matched = filter.matched(&item);
                if matched.is_empty() {
                    continue;
                }
                item.keywords = matched;
                match items.get_mut(&item.id) {
                    Some(existing) => {
                        for keyword in item.keywords {
                            if !existing.keywords.contains(&keyword) {
                                existing.keywords.push(keyword);
                            }
                        }
                    }
                    None => {
                        items.insert(item.id.clone(), item);
                    }
                }
            }
        }

        let content = WatchlistContent::new(
            id.clone(),
            items.into_values().collect(),
            chrono::Utc::now().timestamp(),
        );

        let previous = self.store.load_fingerprint(id).await?;
        if previous.as_ref() == Some(&content.fingerprint) {
            log::debug!("Watchlist {} unchanged ({} items)", id, content.items.len());
            return Ok(UpdateOutcome::NoChange);
        }

        self.store.save_watchlist_content(&content).await?;
        log::info!(
            "🔔 Watchlist {} changed: {} items, fingerprint {}",
            id,
            content.items.len(),
            content.fingerprint
        );
        self.changes.publish(id.clone()).await;

        Ok(UpdateOutcome::Changed(content.fingerprint))
    }

    async fn process(&self, id: &WatchlistId) {
        if let Err(e) = self.update_watchlist(id).await {
            match e {
                UpdateError::Store(StoreError::NotFound(_)) => {
                    log::warn!("⚠️  Skipping unknown watchlist {}", id)
                }
                e => log::error!("❌ Update of watchlist {} failed: {}", id, e),
            }
        }
    }

    /// Process discovered ids one at a time until the feed closes or `cancel` fires
    pub async fn run(&self, mut feed: mpsc::Receiver<WatchlistId>, cancel: CancellationToken) {
        log::info!("🚀 Updater started (sequential)");

        loop {
            let id = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                id = feed.recv() => match id {
                    Some(id) => id,
                    None => break,
                },
            };
            self.process(&id).await;
        }

        log::info!("✅ Updater stopped");
    }

    /// Process up to `batch_size` ids concurrently per `interval`
    ///
    /// The batch is awaited as a whole; the remainder of the interval is then
    /// slept so a burst of discoveries cannot flood the auction site.
    pub async fn run_batched(
        &self,
        mut feed: mpsc::Receiver<WatchlistId>,
        batch_size: usize,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let batch_size = batch_size.max(1);
        log::info!("🚀 Updater started (batched)");
        log::info!("   ├─ Batch size: {}", batch_size);
        log::info!("   └─ Interval: {:?}", interval);

        loop {
            let first = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                id = feed.recv() => match id {
                    Some(id) => id,
                    None => break,
                },
            };
            let started = Instant::now();

            let mut batch = vec![first];
            while batch.len() < batch_size {
                match feed.try_recv() {
                    Ok(id) => batch.push(id),
                    Err(_) => break,
                }
            }

            log::debug!("Processing batch of {} watchlists", batch.len());
            join_all(batch.iter().map(|id| self.process(id))).await;

            if let Some(remaining) = interval.checked_sub(started.elapsed()) {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(remaining) => {}
                }
            }
        }

        log::info!("✅ Updater stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_core::{AuctionLister, HtmlItemExtractor, SearchError};
    use crate::types::{KeywordSet, SearchResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        watchlists: Mutex<HashMap<WatchlistId, KeywordSet>>,
        contents: Mutex<HashMap<WatchlistId, WatchlistContent>>,
        fail_fingerprint: bool,
        /// Start time of every `load_watchlist` call
        loads: Mutex<Vec<Instant>>,
        load_delay: Duration,
    }

    #[async_trait]
    impl WatchlistStore for MemoryStore {
        async fn load_watchlist(&self, id: &WatchlistId) -> Result<KeywordSet, StoreError> {
            self.loads.lock().unwrap().push(Instant::now());
            if !self.load_delay.is_zero() {
                tokio::time::sleep(self.load_delay).await;
            }
            self.watchlists
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.clone()))
        }

        async fn save_watchlist(&self, keywords: &KeywordSet) -> Result<WatchlistId, StoreError> {
            let id = keywords.id();
            self.watchlists.lock().unwrap().insert(id.clone(), keywords.clone());
            Ok(id)
        }

        async fn save_watchlist_content(&self, content: &WatchlistContent) -> Result<WatchlistId, StoreError> {
            self.contents
                .lock()
                .unwrap()
                .insert(content.watchlist_id.clone(), content.clone());
            Ok(content.watchlist_id.clone())
        }

        async fn load_watchlist_content(&self, id: &WatchlistId) -> Result<Option<WatchlistContent>, StoreError> {
            Ok(self.contents.lock().unwrap().get(id).cloned())
        }

        async fn delete_watchlist_content(&self, id: &WatchlistId) -> Result<(), StoreError> {
            self.contents.lock().unwrap().remove(id);
            Ok(())
        }

        async fn load_fingerprint(&self, id: &WatchlistId) -> Result<Option<Fingerprint>, StoreError> {
            if self.fail_fingerprint {
                return Err(StoreError::Database("disk I/O error".to_string()));
            }
            Ok(self.contents.lock().unwrap().get(id).map(|c| c.fingerprint.clone()))
        }

        async fn list_watchlists(&self) -> Result<Vec<WatchlistId>, StoreError> {
            Ok(self.watchlists.lock().unwrap().keys().cloned().collect())
        }
    }

    struct FixedLister(Vec<String>);

    #[async_trait]
    impl AuctionLister for FixedLister {
        async fn list_open_auctions(&self) -> Result<Vec<String>, SearchError> {
            if self.0.is_empty() {
                return Err(SearchError::EmptyListing);
            }
            Ok(self.0.clone())
        }
    }

    /// Replays whatever rows are currently scripted
    struct ScriptedSearch {
        rows: Mutex<Vec<(String, &'static str)>>,
    }

    impl AuctionSearcher for ScriptedSearch {
        fn search(&self, keywords: &KeywordSet, _auctions: &[String]) -> mpsc::Receiver<SearchResult> {
            let rows = self.rows.lock().unwrap().clone();
            let keyword = keywords.joined(",");
            let (tx, rx) = mpsc::channel(rows.len().max(1));
            for (id, name) in rows {
                let content = format!(
                    r#"<div class="row"><div class="AuctionItem-listInfo"><input name="AuctionItemId" value="{}"><input name="ItemName" value="{}"></div></div>"#,
                    id, name
                );
                tx.try_send(SearchResult {
                    auction_id: "74691".to_string(),
                    keyword: keyword.clone(),
                    content,
                })
                .unwrap();
            }
            rx
        }
    }

    fn rows(list: &[(&str, &'static str)]) -> Vec<(String, &'static str)> {
        list.iter().map(|(id, name)| (id.to_string(), *name)).collect()
    }

    struct Harness {
        store: Arc<MemoryStore>,
        search: Arc<ScriptedSearch>,
        updater: Updater,
        id: WatchlistId,
    }

    async fn harness(store: MemoryStore, auctions: &[&str]) -> Harness {
        let store = Arc::new(store);
        let id = store.save_watchlist(&KeywordSet::new(["nintendo"])).await.unwrap();
        let search = Arc::new(ScriptedSearch {
            rows: Mutex::new(Vec::new()),
        });
        let lister = Arc::new(FixedLister(auctions.iter().map(|s| s.to_string()).collect()));
        let updater = Updater::new(
            store.clone(),
            Arc::new(AuctionCache::new(lister, Duration::from_secs(600))),
            search.clone(),
            Arc::new(HtmlItemExtractor::new()),
            Broadcaster::new(),
        );
        Harness {
            store,
            search,
            updater,
            id,
        }
    }

    #[tokio::test]
    async fn test_first_run_changes_then_stable() {
        let h = harness(MemoryStore::default(), &["74691"]).await;
        let (mut changes, _u) = h.updater.subscribe();
        *h.search.rows.lock().unwrap() = rows(&[("1", "Nintendo 64"), ("2", "Nintendo DS")]);

        let first = h.updater.update_watchlist(&h.id).await.unwrap();
        assert!(matches!(first, UpdateOutcome::Changed(_)));
        assert_eq!(changes.recv().await, Some(h.id.clone()));

        // Reordered rows, same ids
        *h.search.rows.lock().unwrap() = rows(&[("2", "Nintendo DS"), ("1", "Nintendo 64")]);
        assert_eq!(h.updater.update_watchlist(&h.id).await.unwrap(), UpdateOutcome::NoChange);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_matching_items_are_filtered_out() {
        let h = harness(MemoryStore::default(), &["74691"]).await;
        *h.search.rows.lock().unwrap() = rows(&[("1", "Nintendo 64"), ("9", "Nintendogs plush")]);

        h.updater.update_watchlist(&h.id).await.unwrap();
        let content = h.store.load_watchlist_content(&h.id).await.unwrap().unwrap();
        assert_eq!(content.items.len(), 1);
        assert_eq!(content.items[0].id, "1");
    }

    #[tokio::test]
    async fn test_drop_to_zero_is_a_change() {
        let h = harness(MemoryStore::default(), &["74691"]).await;
        *h.search.rows.lock().unwrap() = rows(&[("1", "Nintendo 64")]);
        h.updater.update_watchlist(&h.id).await.unwrap();

        h.search.rows.lock().unwrap().clear();
        let outcome = h.updater.update_watchlist(&h.id).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Changed(Fingerprint::of_items(&[])));
    }

    #[tokio::test]
    async fn test_fingerprint_load_failure_aborts_without_publishing() {
        let store = MemoryStore {
            fail_fingerprint: true,
            ..Default::default()
        };
        let h = harness(store, &["74691"]).await;
        let (mut changes, _u) = h.updater.subscribe();
        *h.search.rows.lock().unwrap() = rows(&[("1", "Nintendo 64")]);

        assert!(matches!(
            h.updater.update_watchlist(&h.id).await,
            Err(UpdateError::Store(_))
        ));
        assert!(changes.try_recv().is_err());
        assert!(h.store.contents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_auctions_is_an_error() {
        let h = harness(MemoryStore::default(), &[]).await;
        assert!(matches!(
            h.updater.update_watchlist(&h.id).await,
            Err(UpdateError::NoAuctions)
        ));
    }

    #[tokio::test]
    async fn test_run_stops_when_feed_closes() {
        let h = harness(MemoryStore::default(), &["74691"]).await;
        *h.search.rows.lock().unwrap() = rows(&[("1", "Nintendo 64")]);
        let (tx, rx) = mpsc::channel(4);
        tx.send(h.id.clone()).await.unwrap();
        tx.send(WatchlistId::new("unknown")).await.unwrap();
        drop(tx);

        h.updater.run(rx, CancellationToken::new()).await;
        assert!(h.store.contents.lock().unwrap().contains_key(&h.id));
    }

    #[tokio::test]
    async fn test_run_batched_stops_on_cancel() {
        let h = harness(MemoryStore::default(), &["74691"]).await;
        *h.search.rows.lock().unwrap() = rows(&[("1", "Nintendo 64")]);
        let (tx, rx) = mpsc::channel(4);
        tx.send(h.id.clone()).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        // Feed stays open; only cancellation ends the loop
        tokio::time::timeout(
            Duration::from_secs(5),
            h.updater.run_batched(rx, 2, Duration::from_secs(60), cancel),
        )
        .await
        .unwrap();
        assert!(h.store.contents.lock().unwrap().contains_key(&h.id));
        drop(tx);
    }

    #[tokio::test]
    async fn test_run_batched_paces_batches() {
        let store = MemoryStore {
            load_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let h = harness(store, &["74691"]).await;
        *h.search.rows.lock().unwrap() = rows(&[("1", "Nintendo 64")]);

        let (tx, rx) = mpsc::channel(8);
        for n in 0..5 {
            tx.send(WatchlistId::new(format!("wl{}", n))).await.unwrap();
        }
        drop(tx);

        let interval = Duration::from_millis(300);
        tokio::time::timeout(
            Duration::from_secs(5),
            h.updater.run_batched(rx, 2, interval, CancellationToken::new()),
        )
        .await
        .unwrap();

        let mut loads = h.store.loads.lock().unwrap().clone();
        loads.sort();
        assert_eq!(loads.len(), 5);

        // Batches of 2, 2, 1: members start together even though each load takes 100ms
        assert!(loads[1] - loads[0] < Duration::from_millis(50));
        assert!(loads[3] - loads[2] < Duration::from_millis(50));

        // Next batch waits out the rest of the interval
        assert!(loads[2] - loads[0] >= Duration::from_millis(280));
        assert!(loads[4] - loads[2] >= Duration::from_millis(280));
    }
}
