//! Throttled search engine
//!
//! A dispatch task walks the protocol's task list, acquiring an owned
//! semaphore permit before spawning each worker. The caller never waits on
//! the semaphore; it just receives results as they arrive. Workers drop their
//! permit when they finish, however they finish.

use super::client::SiteClient;
use super::protocol::{SearchProtocol, SiteProtocol};
use super::SearchError;
use crate::error_handler::ExponentialBackoff;
use crate::types::{KeywordSet, SearchResult, SearchTask};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Streams search results for a keyword set across a set of auctions
///
/// The returned channel closes once every task has finished.
pub trait AuctionSearcher: Send + Sync {
    fn search(&self, keywords: &KeywordSet, auctions: &[String]) -> mpsc::Receiver<SearchResult>;
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub max_concurrent: usize,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_initial: Duration,
    pub retry_max: Duration,
    pub channel_buffer: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            request_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_initial: Duration::from_millis(500),
            retry_max: Duration::from_secs(5),
            channel_buffer: 100,
        }
    }
}

pub struct ThrottledSearch {
    client: Arc<dyn SiteClient>,
    protocol: Arc<SearchProtocol>,
    limiter: Arc<Semaphore>,
    settings: SearchSettings,
}

impl ThrottledSearch {
    pub fn new(client: Arc<dyn SiteClient>, protocol: SearchProtocol, settings: SearchSettings) -> Self {
        let limiter = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            client,
            protocol: Arc::new(protocol),
            limiter,
            settings,
        }
    }
}

impl AuctionSearcher for ThrottledSearch {
    fn search(&self, keywords: &KeywordSet, auctions: &[String]) -> mpsc::Receiver<SearchResult> {
        let tasks = self.protocol.tasks(keywords, auctions);
        let (tx, rx) = mpsc::channel(self.settings.channel_buffer.max(1));

        log::debug!(
            "🔍 Dispatching {} search tasks ({} auctions × {} keywords)",
            tasks.len(),
            auctions.len(),
            keywords.len()
        );

        let client = Arc::clone(&self.client);
        let protocol = Arc::clone(&self.protocol);
        let limiter = Arc::clone(&self.limiter);
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let mut workers = JoinSet::new();

            for task in tasks {
                if tx.is_closed() {
                    log::debug!("Search consumer gone, skipping remaining tasks");
                    break;
                }

                let permit = match Arc::clone(&limiter).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        log::error!("❌ Search limiter closed, abandoning dispatch");
                        break;
                    }
                };

                let client = Arc::clone(&client);
                let protocol = Arc::clone(&protocol);
                let settings = settings.clone();
                let tx = tx.clone();

                workers.spawn(async move {
                    let _permit = permit;
                    run_task(client.as_ref(), protocol.as_ref(), &settings, task, &tx).await;
                });
            }

            // Our own sender goes first; the channel closes when the last worker ends
            drop(tx);

            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    log::error!("❌ Search worker panicked: {}", e);
                }
            }
        });

        rx
    }
}

async fn run_task(
    client: &dyn SiteClient,
    protocol: &SearchProtocol,
    settings: &SearchSettings,
    task: SearchTask,
    tx: &mpsc::Sender<SearchResult>,
) {
    let body = match fetch_with_retry(client, settings, &task).await {
        Ok(body) => body,
        Err(e) => {
            log::error!(
                "💀 Dead-lettered search auction={} keywords={:?}: {}",
                task.auction_id,
                task.keywords,
                e
            );
            return;
        }
    };

    let fragments = match protocol.result_fragments(&body) {
        Ok(fragments) => fragments,
        Err(e) => {
            log::warn!("⚠️  Malformed result page for auction {}: {}", task.auction_id, e);
            return;
        }
    };

    let keyword = task.keywords.join(",");
    for content in fragments {
        let result = SearchResult {
            auction_id: task.auction_id.clone(),
            keyword: keyword.clone(),
            content,
        };
        if tx.send(result).await.is_err() {
            return;
        }
    }
}

async fn fetch_with_retry(
    client: &dyn SiteClient,
    settings: &SearchSettings,
    task: &SearchTask,
) -> Result<String, SearchError> {
    let mut backoff = ExponentialBackoff::new(settings.retry_initial, settings.retry_max, settings.max_retries);

    loop {
        let attempt = match timeout(settings.request_timeout, client.fetch(task)).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout(settings.request_timeout)),
        };

        match attempt {
            Ok(body) => return Ok(body),
            Err(e) if e.is_transient() => {
                log::warn!("⚠️  Search auction={} failed: {}", task.auction_id, e);
                if backoff.sleep().await.is_err() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}
