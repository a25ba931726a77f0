//! Upstream source abstraction and its error taxonomy

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::data::extract::ParseError;

/// Errors produced by a primary source
///
/// Every variant is recoverable: the fetcher answers any of them with the
/// source's fallback.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Network unreachable, DNS failure or connection reset
    #[error("Network request failed: {0}")]
    Transport(String),

    /// The call did not finish within its time budget
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Non-2xx response
    #[error("Upstream returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Well-formed transport but unusable payload
    #[error("Malformed payload: {0}")]
    Parse(String),

    /// The source is known to be unusable (failed probe, missing credentials)
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Requested record does not exist in this source
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            SourceError::Upstream {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            SourceError::Parse(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

impl SourceError {
    /// Whether the source was skipped rather than tried and broken
    ///
    /// Offline mode and missing credentials end up here; they are expected
    /// and not worth a warning.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(err.to_string())
    }
}

impl From<ParseError> for SourceError {
    fn from(err: ParseError) -> Self {
        SourceError::Parse(err.to_string())
    }
}

/// A primary upstream paired with its local fallback
///
/// `fetch` may touch the network; `fallback` must not. The default `probe`
/// reports the source as available, so sources without a cheap health check
/// go straight to `fetch`.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Parameters a single request is issued for
    type Query: Send + Sync;
    /// Value produced by both paths
    type Output: Send;

    /// Short name used in logs
    fn name(&self) -> &str;

    /// Cheap availability check run before `fetch`
    async fn probe(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Calls the live upstream
    async fn fetch(&self, query: &Self::Query) -> Result<Self::Output, SourceError>;

    /// Produces local data for `query` without any network dependency
    fn fallback(&self, query: &Self::Query) -> Result<Self::Output, SourceError>;
}
