//! Runtime configuration from environment variables
//!
//! Unset variables fall back to defaults. A variable that is set but does not
//! parse is an error; the runtime refuses to start rather than silently
//! running with a default.

use crate::search_core::{ProtocolVersion, SearchSettings};
use std::env;
use std::time::Duration;

#[derive(Debug)]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid {}='{}': {}", self.key, self.value, self.reason)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// SQLite database file
    pub db_path: String,

    /// Directory of `*.sql` schema files
    pub schema_dir: String,

    pub protocol: ProtocolVersion,

    /// Global cap on simultaneous search requests
    pub max_concurrent_requests: usize,

    pub request_timeout: Duration,

    /// Retries after the first attempt for transient search failures
    pub search_max_retries: u32,

    pub auction_cache_ttl: Duration,

    pub user_index_ttl: Duration,

    /// Per-subscriber delivery budget on the change hub
    pub publish_timeout: Duration,

    pub update_batch_size: usize,

    pub update_batch_interval: Duration,

    /// How often the discovery loop re-feeds every stored watchlist
    pub scan_interval: Duration,

    pub channel_buffer: usize,

    /// Base URL used in notification links
    pub server_url: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            db_path: "auctionwatch.db".to_string(),
            schema_dir: "sql".to_string(),
            protocol: ProtocolVersion::Items,
            max_concurrent_requests: 5,
            request_timeout: Duration::from_secs(30),
            search_max_retries: 2,
            auction_cache_ttl: Duration::from_secs(600),
            user_index_ttl: Duration::from_secs(350),
            publish_timeout: Duration::from_millis(50),
            update_batch_size: 1,
            update_batch_interval: Duration::from_secs(10),
            scan_interval: Duration::from_secs(300),
            channel_buffer: 100,
            server_url: "http://localhost:8282".to_string(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `AUCTIONWATCH_DB_PATH` (default: auctionwatch.db)
    /// - `AUCTIONWATCH_SCHEMA_DIR` (default: sql)
    /// - `SEARCH_PROTOCOL` legacy|v1|items|v2 (default: items)
    /// - `MAX_CONCURRENT_REQUESTS` (default: 5)
    /// - `REQUEST_TIMEOUT_SECS` (default: 30)
    /// - `SEARCH_MAX_RETRIES` (default: 2)
    /// - `AUCTION_CACHE_TTL_SECS` (default: 600)
    /// - `USER_INDEX_TTL_SECS` (default: 350)
    /// - `PUBLISH_TIMEOUT_MS` (default: 50)
    /// - `UPDATE_BATCH_SIZE` (default: 1)
    /// - `UPDATE_BATCH_INTERVAL_SECS` (default: 10)
    /// - `SCAN_INTERVAL_SECS` (default: 300)
    /// - `CHANNEL_BUFFER` (default: 100)
    /// - `SERVER_URL` (default: http://localhost:8282)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        // Zero durations would panic tokio intervals or time out every request
        let secs = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse_or(&lookup, key, Some(1))?.map(Duration::from_secs).unwrap_or(default))
        };

        let protocol = match lookup("SEARCH_PROTOCOL") {
            Some(raw) => raw.parse::<ProtocolVersion>().map_err(|reason| ConfigError {
                key: "SEARCH_PROTOCOL",
                value: raw.clone(),
                reason,
            })?,
            None => defaults.protocol,
        };

        Ok(Self {
            db_path: lookup("AUCTIONWATCH_DB_PATH").unwrap_or(defaults.db_path),
            schema_dir: lookup("AUCTIONWATCH_SCHEMA_DIR").unwrap_or(defaults.schema_dir),
            protocol,
            max_concurrent_requests: parse_or(&lookup, "MAX_CONCURRENT_REQUESTS", Some(1))?
                .unwrap_or(defaults.max_concurrent_requests),
            request_timeout: secs("REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            search_max_retries: parse_or(&lookup, "SEARCH_MAX_RETRIES", None)?
                .unwrap_or(defaults.search_max_retries),
            auction_cache_ttl: secs("AUCTION_CACHE_TTL_SECS", defaults.auction_cache_ttl)?,
            user_index_ttl: secs("USER_INDEX_TTL_SECS", defaults.user_index_ttl)?,
            publish_timeout: parse_or(&lookup, "PUBLISH_TIMEOUT_MS", Some(1))?
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish_timeout),
            update_batch_size: parse_or(&lookup, "UPDATE_BATCH_SIZE", Some(1))?
                .unwrap_or(defaults.update_batch_size),
            update_batch_interval: secs("UPDATE_BATCH_INTERVAL_SECS", defaults.update_batch_interval)?,
            scan_interval: secs("SCAN_INTERVAL_SECS", defaults.scan_interval)?,
            channel_buffer: parse_or(&lookup, "CHANNEL_BUFFER", Some(1))?.unwrap_or(defaults.channel_buffer),
            server_url: lookup("SERVER_URL").unwrap_or(defaults.server_url),
        })
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            max_concurrent: self.max_concurrent_requests,
            request_timeout: self.request_timeout,
            max_retries: self.search_max_retries,
            channel_buffer: self.channel_buffer,
            ..SearchSettings::default()
        }
    }
}

/// Parse `key` if present; `min` rejects values below a floor
fn parse_or<F, T>(lookup: &F, key: &'static str, min: Option<T>) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let value: T = raw.trim().parse().map_err(|e: T::Err| ConfigError {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if let Some(min) = min {
        if value < min {
            return Err(ConfigError {
                key,
                value: raw,
                reason: format!("must be at least {}", min),
            });
        }
    }
    Ok(Some(value))
}
