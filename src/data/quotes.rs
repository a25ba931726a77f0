//! Quotable API client
//!
//! Serves a space-themed quote, probing the service with a HEAD request first.
//! When the service is down the offline catalogue supplies a quote of the day.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use reqwest::Client;

use super::{Catalog, Quote};
use crate::fetch::{DataSource, SourceError};

/// Base URL for the Quotable API
const QUOTABLE_BASE_URL: &str = "https://api.quotable.io";

/// Client for fetching quotes from the Quotable API
#[derive(Debug, Clone)]
pub struct QuoteSource {
    client: Client,
    base_url: String,
    catalog: Arc<Catalog>,
    /// Never contact the API
    offline: bool,
}

impl QuoteSource {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            client: Client::new(),
            base_url: QUOTABLE_BASE_URL.to_string(),
            catalog,
            offline: false,
        }
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Overrides the API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn random_url(&self) -> String {
        format!("{}/random", self.base_url)
    }

    /// Quote of the day from the offline catalogue
    ///
    /// An empty catalogue is a broken fallback, not a missing record.
    pub fn offline_quote(&self, date: NaiveDate) -> Result<Quote, SourceError> {
        self.catalog
            .quote_for(date)
            .cloned()
            .ok_or_else(|| SourceError::Unavailable("offline catalogue has no quotes".to_string()))
    }
}

#[async_trait]
impl DataSource for QuoteSource {
    type Query = ();
    type Output = Quote;

    fn name(&self) -> &str {
        "quotes"
    }

    async fn probe(&self) -> Result<(), SourceError> {
        if self.offline {
            return Err(SourceError::Unavailable("offline mode".to_string()));
        }
        let response = self.client.head(self.random_url()).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SourceError::Upstream {
                status: status.as_u16(),
                message: "health check failed".to_string(),
            })
        }
    }

    async fn fetch(&self, _query: &()) -> Result<Quote, SourceError> {
        let response = self
            .client
            .get(self.random_url())
            .query(&[("tags", "space")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Upstream {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    fn fallback(&self, _query: &()) -> Result<Quote, SourceError> {
        self.offline_quote(Local::now().date_naive())
    }
}
