//! HTTP access to the auction site
//!
//! `SiteClient` is the seam the search engine fetches through; tests swap in
//! fakes, production uses `HttpSiteClient` over a shared `reqwest::Client`.

use super::protocol::{SearchProtocol, SiteProtocol};
use super::SearchError;
use crate::types::SearchTask;
use async_trait::async_trait;

/// Fetches the raw page body for one search task
#[async_trait]
pub trait SiteClient: Send + Sync {
    async fn fetch(&self, task: &SearchTask) -> Result<String, SearchError>;
}

pub struct HttpSiteClient {
    client: reqwest::Client,
    protocol: SearchProtocol,
}

impl HttpSiteClient {
    /// Reuse an existing client (connection pool shared with the listing cache)
    pub fn with_client(client: reqwest::Client, protocol: SearchProtocol) -> Self {
        Self { client, protocol }
    }
}

#[async_trait]
impl SiteClient for HttpSiteClient {
    async fn fetch(&self, task: &SearchTask) -> Result<String, SearchError> {
        let response = self.protocol.request(&self.client, task)?.send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SearchError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }
}
