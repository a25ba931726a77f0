//! Primary-then-fallback fetch with bounded waiting

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::source::{DataSource, SourceError};
use crate::config::Config;

/// Result of a fetch, tagged with the path that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    /// The value returned to the caller
    pub value: T,
    /// True when the value came from the fallback path
    pub degraded: bool,
}

impl<T> Fetched<T> {
    /// Value from the live source
    pub fn live(value: T) -> Self {
        Self {
            value,
            degraded: false,
        }
    }

    /// Value from the local fallback
    pub fn degraded(value: T) -> Self {
        Self {
            value,
            degraded: true,
        }
    }

    /// Transforms the value, keeping the degraded flag
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            value: f(self.value),
            degraded: self.degraded,
        }
    }
}

/// Failure of both the primary and the fallback path
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Only reachable when the fallback itself cannot produce data
    #[error("{source_name} unavailable: {primary}; fallback failed: {fallback}")]
    TotalFailure {
        source_name: String,
        primary: String,
        fallback: String,
    },

    /// The record exists in neither path
    #[error("{0}")]
    NotFound(String),
}

/// Runs a primary call under a timeout and falls back on any failure
///
/// Primary errors are logged and swallowed. An empty but well-formed primary
/// answer is a success and never triggers the fallback.
#[derive(Debug, Clone)]
pub struct FallbackFetcher {
    /// Upper bound for the primary call
    request_timeout: Duration,
    /// Upper bound for the availability probe
    probe_timeout: Duration,
}

impl FallbackFetcher {
    /// Creates a fetcher with explicit time budgets
    ///
    /// # Arguments
    ///
    /// * `request_timeout` - Upper bound for each primary call
    /// * `probe_timeout` - Upper bound for the availability probe
    pub fn new(request_timeout: Duration, probe_timeout: Duration) -> Self {
        Self {
            request_timeout,
            probe_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.request_timeout, config.probe_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Calls `primary`, answering with `fallback` if it errors or times out
    ///
    /// # Arguments
    ///
    /// * `source` - Name used in log lines and error messages
    /// * `primary` - Produces the live call; bounded by the request timeout
    /// * `fallback` - Local answer used when the primary fails
    ///
    /// # Returns
    ///
    /// The live value, or the fallback value marked degraded. Errs only when
    /// the fallback fails too.
    pub async fn fetch<T, P, Fut, F>(
        &self,
        source: &str,
        primary: P,
        fallback: F,
    ) -> Result<Fetched<T>, FetchError>
    where
        P: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
        F: FnOnce() -> Result<T, SourceError>,
    {
        let outcome = self.call_primary(primary).await;
        settle(source, outcome, fallback)
    }

    /// Like `fetch`, but skips the primary entirely when `probe` fails
    pub async fn fetch_with_probe<T, R, RFut, P, Fut, F>(
        &self,
        source: &str,
        probe: R,
        primary: P,
        fallback: F,
    ) -> Result<Fetched<T>, FetchError>
    where
        R: FnOnce() -> RFut,
        RFut: Future<Output = Result<(), SourceError>>,
        P: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
        F: FnOnce() -> Result<T, SourceError>,
    {
        let outcome = match timeout(self.probe_timeout, probe()).await {
            Ok(Ok(())) => self.call_primary(primary).await,
            Ok(Err(err)) => {
                debug!(source, error = %err, "availability probe failed");
                Err(err)
            }
            Err(_) => Err(SourceError::Timeout(self.probe_timeout)),
        };
        settle(source, outcome, fallback)
    }

    /// Probes, fetches and falls back through a `DataSource`
    pub async fn fetch_source<S>(
        &self,
        source: &S,
        query: &S::Query,
    ) -> Result<Fetched<S::Output>, FetchError>
    where
        S: DataSource + ?Sized,
    {
        self.fetch_with_probe(
            source.name(),
            || source.probe(),
            || source.fetch(query),
            || source.fallback(query),
        )
        .await
    }

    async fn call_primary<T, P, Fut>(&self, primary: P) -> Result<T, SourceError>
    where
        P: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        match timeout(self.request_timeout, primary()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.request_timeout)),
        }
    }
}

fn settle<T, F>(
    source: &str,
    outcome: Result<T, SourceError>,
    fallback: F,
) -> Result<Fetched<T>, FetchError>
where
    F: FnOnce() -> Result<T, SourceError>,
{
    let primary_err = match outcome {
        Ok(value) => return Ok(Fetched::live(value)),
        Err(err) => err,
    };

    if primary_err.is_unavailable() {
        debug!(source, error = %primary_err, "primary source skipped, serving fallback data");
    } else {
        warn!(source, error = %primary_err, "primary source failed, serving fallback data");
    }

    match fallback() {
        Ok(value) => Ok(Fetched::degraded(value)),
        Err(SourceError::NotFound(message)) => {
            debug!(source, %message, "record missing from fallback source");
            Err(FetchError::NotFound(message))
        }
        Err(fallback_err) => {
            error!(source, error = %fallback_err, "fallback source failed");
            Err(FetchError::TotalFailure {
                source_name: source.to_string(),
                primary: primary_err.to_string(),
                fallback: fallback_err.to_string(),
            })
        }
    }
}
