//! Watch Runtime - watchlist change detection + notification
//!
//! This binary wires the whole pipeline:
//! - Opens the SQLite store and applies the schema
//! - Builds the listing cache, throttled search engine and updater
//! - Runs the discovery loop that re-feeds every stored watchlist
//! - Chains change events through converter → dedup → filter → notifiers
//!
//! Usage:
//!   cargo run --release --bin watch_runtime
//!
//! Environment variables: see `WatchConfig::from_env`.

use auctionwatch::config::WatchConfig;
use auctionwatch::notify::{deliver_all, DedupQueue, LogNotifier, MessageFilter, Notifier, WatchlistConverter};
use auctionwatch::pipeline::{SqliteWatchStore, UserDirectory, Updater, WatchlistStore};
use auctionwatch::search_core::{
    AuctionCache, HtmlItemExtractor, HttpAuctionLister, HttpSiteClient, SearchProtocol, ThrottledSearch,
};
use auctionwatch::{Broadcaster, WatchlistId};
use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = WatchConfig::from_env()?;

    info!("🚀 Watch Runtime");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Protocol: {}", config.protocol);
    info!("   ├─ Max concurrent requests: {}", config.max_concurrent_requests);
    info!("   ├─ Auction cache TTL: {:?}", config.auction_cache_ttl);
    info!("   ├─ User index TTL: {:?}", config.user_index_ttl);
    info!("   ├─ Update batch: {} every {:?}", config.update_batch_size, config.update_batch_interval);
    info!("   └─ Scan interval: {:?}", config.scan_interval);

    info!("🔧 Initializing database...");
    let sqlite = Arc::new(SqliteWatchStore::open(&config.db_path, &config.schema_dir)?);
    let store: Arc<dyn WatchlistStore> = sqlite.clone();
    let users: Arc<dyn UserDirectory> = sqlite;
    info!("✅ Database initialized");

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;
    let protocol = SearchProtocol::new(config.protocol);

    let cache = Arc::new(AuctionCache::new(
        Arc::new(HttpAuctionLister::new(http.clone(), protocol.clone())),
        config.auction_cache_ttl,
    ));
    let searcher = ThrottledSearch::new(
        Arc::new(HttpSiteClient::with_client(http, protocol.clone())),
        protocol,
        config.search_settings(),
    );

    let changes = Broadcaster::<WatchlistId>::with_timeout(config.publish_timeout);
    let updater = Arc::new(Updater::new(
        store.clone(),
        cache,
        Arc::new(searcher),
        Arc::new(HtmlItemExtractor::new()),
        changes,
    ));
    info!("✅ Updater created");

    let cancel = CancellationToken::new();

    // Notification chain
    let (change_rx, unregister) = updater.subscribe();
    let messages = WatchlistConverter::new(users, config.user_index_ttl).convert(change_rx, config.channel_buffer);
    let deduped = DedupQueue::new().enqueue(messages);
    let filtered = MessageFilter::default()
        .with_buffer(config.channel_buffer)
        .filter(cancel.clone(), vec![deduped]);
    let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier::new(store.clone(), config.server_url.clone()))];
    let delivery = tokio::spawn(async move { deliver_all(ReceiverStream::new(filtered), &notifiers).await });
    info!("   ├─ ✅ Notification chain running");

    // Updater
    let (feed_tx, feed_rx) = mpsc::channel::<WatchlistId>(config.channel_buffer);
    let updater_task = {
        let updater = Arc::clone(&updater);
        let cancel = cancel.clone();
        let batch_size = config.update_batch_size;
        let interval = config.update_batch_interval;
        tokio::spawn(async move {
            if batch_size > 1 {
                updater.run_batched(feed_rx, batch_size, interval, cancel).await;
            } else {
                updater.run(feed_rx, cancel).await;
            }
        })
    };
    info!("   ├─ ✅ Updater task spawned");

    // Discovery: re-feed every stored watchlist each scan interval
    let discovery = {
        let store = store.clone();
        let cancel = cancel.clone();
        let scan_interval = config.scan_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scan_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let ids = match store.list_watchlists().await {
                    Ok(ids) => ids,
                    Err(e) => {
                        warn!("⚠️  Watchlist discovery failed: {}", e);
                        continue;
                    }
                };
                info!("🔎 Discovered {} watchlists", ids.len());

                for id in ids {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = feed_tx.send(id) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        })
    };
    info!("   └─ ✅ Discovery loop spawned");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    cancel.cancel();
    if let Err(e) = discovery.await {
        error!("❌ Discovery task failed: {}", e);
    }
    if let Err(e) = updater_task.await {
        error!("❌ Updater task failed: {}", e);
    }

    // Closing the change subscription drains the notification chain
    unregister.unregister();
    match tokio::time::timeout(Duration::from_secs(5), delivery).await {
        Ok(Ok(stats)) => info!("📬 Delivered {} notifications ({} failed)", stats.delivered, stats.failed),
        Ok(Err(e)) => error!("❌ Delivery task failed: {}", e),
        Err(_) => warn!("⚠️  Delivery did not drain within 5s"),
    }

    info!("✅ Watch runtime stopped");
    Ok(())
}
