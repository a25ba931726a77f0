//! Debounced, cache-first query coordination
//!
//! A `QueryCoordinator` backs one consumer view. Every call to `query` issues
//! a request token; after the debounce window only the request holding the
//! latest token may fetch, and only the latest token may commit to the
//! visible state. Results therefore land in request order regardless of the
//! order responses arrive in.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;

use crate::cache::ExpiringCache;
use crate::fetch::{DataSource, FallbackFetcher};

/// Default quiescence window before a query is issued
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Default freshness of cached results
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Parameters a coordinator can be queried with
pub trait QueryParams: Clone + PartialEq + Send + Sync + 'static {
    /// Deterministic key; logically identical parameters produce the same key
    fn cache_key(&self) -> String;
}

impl QueryParams for () {
    fn cache_key(&self) -> String {
        "all".to_string()
    }
}

/// Lifecycle of the visible state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Ready,
    /// Both the primary and the fallback path failed
    Failed(String),
}

/// What a consumer renders
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<P, T> {
    /// Parameters of the most recent request
    pub params: Option<P>,
    /// Results of the most recent committed request
    ///
    /// Kept across a failure, so a view can keep showing the last good data.
    pub results: Option<T>,
    pub status: QueryStatus,
    /// True when `results` came from the fallback path
    pub degraded: bool,
}

impl<P, T> Default for QueryState<P, T> {
    fn default() -> Self {
        Self {
            params: None,
            results: None,
            status: QueryStatus::Idle,
            degraded: false,
        }
    }
}

impl<P, T> QueryState<P, T> {
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    /// Message of a failed request
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            QueryStatus::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Cache-first, debounced access to one `DataSource`
pub struct QueryCoordinator<S>
where
    S: DataSource,
    S::Query: QueryParams,
    S::Output: Clone + Send + Sync + 'static,
{
    /// Prefix for cache keys; separates domains sharing a cache
    domain: String,
    source: Arc<S>,
    cache: Arc<ExpiringCache<S::Output>>,
    ttl: Duration,
    fetcher: FallbackFetcher,
    debounce: Duration,
    /// Token of the most recently issued request
    latest: AtomicU64,
    closed: AtomicBool,
    state: watch::Sender<QueryState<S::Query, S::Output>>,
}

impl<S> QueryCoordinator<S>
where
    S: DataSource,
    S::Query: QueryParams,
    S::Output: Clone + Send + Sync + 'static,
{
    pub fn new(
        domain: impl Into<String>,
        source: Arc<S>,
        cache: Arc<ExpiringCache<S::Output>>,
        fetcher: FallbackFetcher,
    ) -> Self {
        let (state, _) = watch::channel(QueryState::default());
        Self {
            domain: domain.into(),
            source,
            cache,
            ttl: DEFAULT_TTL,
            fetcher,
            debounce: DEFAULT_DEBOUNCE,
            latest: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            state,
        }
    }

    /// Sets how long fetched results stay fresh in the cache
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the quiet period before a query is issued; zero disables debouncing
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Current visible state
    pub fn state(&self) -> QueryState<S::Query, S::Output> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every committed state change
    pub fn subscribe(&self) -> watch::Receiver<QueryState<S::Query, S::Output>> {
        self.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Requests results for `params` once input has been quiet for the debounce window
    ///
    /// # Arguments
    ///
    /// * `params` - Query parameters; their cache key decides cache hits
    ///
    /// # Returns
    ///
    /// The visible state once this request settles. A request superseded by a
    /// later call returns without fetching, and a closed coordinator returns
    /// its state unchanged.
    pub async fn query(&self, params: S::Query) -> QueryState<S::Query, S::Output> {
        let Some(token) = self.issue(&params) else {
            return self.state();
        };

        sleep(self.debounce).await;
        if !self.is_current(token) {
            debug!(domain = %self.domain, token, "query superseded during debounce");
            return self.state();
        }

        self.run(token, params, false).await
    }

    /// Drops cached results and re-runs the current query without debounce
    pub async fn refresh(&self) -> QueryState<S::Query, S::Output> {
        let params = self.state.borrow().params.clone();
        let Some(params) = params else {
            debug!(domain = %self.domain, "refresh without a prior query");
            return self.state();
        };

        self.cache.clear();
        let Some(token) = self.issue(&params) else {
            return self.state();
        };
        self.run(token, params, true).await
    }

    /// Detaches the coordinator; in-flight requests no longer touch the state
    pub fn close(&self) {
        self.state.send_if_modified(|_| {
            self.closed.store(true, Ordering::SeqCst);
            false
        });
    }

    fn cache_key(&self, params: &S::Query) -> String {
        format!("{}_{}", self.domain, params.cache_key())
    }

    fn is_current(&self, token: u64) -> bool {
        !self.is_closed() && self.latest.load(Ordering::SeqCst) == token
    }

    /// Issues a new token and marks the state as loading
    fn issue(&self, params: &S::Query) -> Option<u64> {
        let mut issued = None;
        self.state.send_if_modified(|state| {
            if self.is_closed() {
                return false;
            }
            let token = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
            issued = Some(token);
            state.params = Some(params.clone());
            state.status = QueryStatus::Loading;
            true
        });
        issued
    }

    /// Applies `update` only if `token` is still the latest request
    ///
    /// Runs under the watch channel's write lock, so no newer token can be
    /// issued between the check and the write.
    fn commit(&self, token: u64, update: impl FnOnce(&mut QueryState<S::Query, S::Output>)) -> bool {
        let committed = self.state.send_if_modified(|state| {
            if !self.is_current(token) {
                return false;
            }
            update(state);
            true
        });
        if !committed {
            debug!(domain = %self.domain, token, "discarding stale response");
        }
        committed
    }

    async fn run(
        &self,
        token: u64,
        params: S::Query,
        bypass_cache: bool,
    ) -> QueryState<S::Query, S::Output> {
        let key = self.cache_key(&params);

        if !bypass_cache {
            if let Some(value) = self.cache.get(&key) {
                debug!(domain = %self.domain, key = %key, "cache hit");
                self.commit(token, |state| {
                    state.results = Some(value);
                    state.status = QueryStatus::Ready;
                    state.degraded = false;
                });
                return self.state();
            }
        }

        match self.fetcher.fetch_source(self.source.as_ref(), &params).await {
            Ok(fetched) => {
                // Cached only while the token is current, so a superseded
                // response cannot overwrite a fresher entry. Degraded answers
                // are never cached so the next query retries the live source.
                self.commit(token, |state| {
                    if !fetched.degraded {
                        self.cache.set(key, fetched.value.clone(), self.ttl);
                    }
                    state.results = Some(fetched.value);
                    state.status = QueryStatus::Ready;
                    state.degraded = fetched.degraded;
                });
            }
            Err(err) => {
                self.commit(token, |state| {
                    state.status = QueryStatus::Failed(err.to_string());
                });
            }
        }

        self.state()
    }
}

impl<S> Drop for QueryCoordinator<S>
where
    S: DataSource,
    S::Query: QueryParams,
    S::Output: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
