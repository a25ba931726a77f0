//! The data layer service object
//!
//! `DataLayer` owns everything consumers share: one cache per data domain,
//! the favorites store, the fetcher and the upstream sources. Views get their
//! own `QueryCoordinator` from it and never touch module-level state, so tests
//! can build isolated instances.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::ExpiringCache;
use crate::config::Config;
use crate::data::{
    recently_viewed, Catalog, ChatSession, DataIntegration, DataIntegrationSource, GeminiClient,
    KnowledgeGap, KnowledgeGapSource, Publication, PublicationDetailsSource, PublicationQuery,
    PublicationSource, Quote, QuoteSource,
};
use crate::favorites::{ChangeBroadcaster, EventBus, Favorites, StorageSignal};
use crate::fetch::{FallbackFetcher, SourceError};
use crate::query::{QueryCoordinator, QueryState};
use crate::storage::{FileStorage, KeyValueStorage, StorageWatcher, WatchConfig};

/// Number of entries shown in the recently viewed list
pub const RECENTLY_VIEWED_LIMIT: usize = 5;

/// Errors that can occur while setting up the data layer
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The bundled catalogue could not be loaded
    #[error("Failed to load offline catalogue: {0}")]
    Catalog(#[from] SourceError),

    /// No directory for durable storage could be determined
    #[error("No data directory available; set SPACEBIO_DATA_DIR")]
    NoDataDir,
}

/// One cache per data domain
#[derive(Default)]
struct Caches {
    publications: Arc<ExpiringCache<Vec<Publication>>>,
    publication_details: Arc<ExpiringCache<Publication>>,
    knowledge_gaps: Arc<ExpiringCache<Vec<KnowledgeGap>>>,
    data_integrations: Arc<ExpiringCache<Vec<DataIntegration>>>,
    quotes: Arc<ExpiringCache<Quote>>,
}

impl Caches {
    fn clear(&self) {
        self.publications.clear();
        self.publication_details.clear();
        self.knowledge_gaps.clear();
        self.data_integrations.clear();
        self.quotes.clear();
    }
}

/// Overview assembled from every domain at once
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub recently_viewed: Vec<Publication>,
    pub knowledge_gaps: QueryState<(), Vec<KnowledgeGap>>,
    pub data_integrations: QueryState<(), Vec<DataIntegration>>,
    pub quote: QueryState<(), Quote>,
}

impl Dashboard {
    /// Whether any part was served from local data
    pub fn degraded(&self) -> bool {
        self.knowledge_gaps.degraded || self.data_integrations.degraded || self.quote.degraded
    }
}

/// Shared caches, sources and favorites for one process
pub struct DataLayer {
    config: Config,
    fetcher: FallbackFetcher,
    client: GeminiClient,
    caches: Caches,
    publications: Arc<PublicationSource>,
    publication_details: Arc<PublicationDetailsSource>,
    knowledge_gaps: Arc<KnowledgeGapSource>,
    data_integrations: Arc<DataIntegrationSource>,
    quotes: Arc<QuoteSource>,
    favorites: Arc<Favorites>,
    bus: EventBus,
    watcher: Option<StorageWatcher>,
}

impl DataLayer {
    /// Builds the data layer over `storage`
    ///
    /// Must be called within a tokio runtime; the favorites store starts its
    /// change listeners here.
    pub fn init(config: Config, storage: Arc<dyn KeyValueStorage>) -> Result<Self, ServiceError> {
        let catalog = Arc::new(Catalog::load()?);
        let client = GeminiClient::from_config(&config);
        let fetcher = FallbackFetcher::from_config(&config);

        let bus = EventBus::new();
        let broadcasters: Vec<Arc<dyn ChangeBroadcaster>> = vec![
            Arc::new(StorageSignal::new(storage.clone())),
            Arc::new(bus.clone()),
        ];
        let favorites = Arc::new(Favorites::new(storage, broadcasters));

        info!(
            live = client.has_api_key(),
            offline = config.offline,
            model = %config.gemini_model,
            "data layer initialized"
        );

        Ok(Self {
            publications: Arc::new(PublicationSource::new(
                client.clone(),
                catalog.clone(),
                config.publication_limit,
            )),
            publication_details: Arc::new(PublicationDetailsSource::new(
                client.clone(),
                catalog.clone(),
            )),
            knowledge_gaps: Arc::new(KnowledgeGapSource::new(client.clone(), catalog.clone())),
            data_integrations: Arc::new(DataIntegrationSource::new(
                client.clone(),
                catalog.clone(),
            )),
            quotes: Arc::new(QuoteSource::new(catalog).with_offline(config.offline)),
            caches: Caches::default(),
            client,
            fetcher,
            favorites,
            bus,
            config,
            watcher: None,
        })
    }

    /// Builds the data layer over on-disk storage and watches it for foreign writes
    pub fn open(config: Config) -> Result<Self, ServiceError> {
        let storage = match &config.data_dir {
            Some(dir) => FileStorage::with_dir(dir.clone()),
            None => FileStorage::new().ok_or(ServiceError::NoDataDir)?,
        };
        debug!(dir = %storage.dir().display(), "using file storage");

        let watcher = match StorageWatcher::spawn(&storage, WatchConfig::default()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(error = %err, "storage watcher unavailable, external changes will not sync");
                None
            }
        };
        let mut layer = Self::init(config, Arc::new(storage))?;
        layer.watcher = watcher;
        Ok(layer)
    }

    /// Drops every cached result
    pub fn reset(&self) {
        self.caches.clear();
        info!("data layer caches reset");
    }

    /// Stops background tasks
    pub async fn shutdown(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.shutdown().await;
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fetcher(&self) -> &FallbackFetcher {
        &self.fetcher
    }

    pub fn favorites(&self) -> Arc<Favorites> {
        self.favorites.clone()
    }

    /// In-process bus other same-context subscribers can join
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Coordinator for debounced publication searches
    pub fn publication_search(&self) -> QueryCoordinator<PublicationSource> {
        QueryCoordinator::new(
            "publications",
            self.publications.clone(),
            self.caches.publications.clone(),
            self.fetcher.clone(),
        )
        .with_ttl(self.config.ttls.publications)
        .with_debounce(self.config.debounce)
    }

    /// Coordinator for single publication lookups
    ///
    /// Lookups are not typed input, so they run without debounce.
    pub fn publication_details(&self) -> QueryCoordinator<PublicationDetailsSource> {
        QueryCoordinator::new(
            "publication",
            self.publication_details.clone(),
            self.caches.publication_details.clone(),
            self.fetcher.clone(),
        )
        .with_ttl(self.config.ttls.publications)
        .with_debounce(Duration::ZERO)
    }

    pub fn knowledge_gaps(&self) -> QueryCoordinator<KnowledgeGapSource> {
        QueryCoordinator::new(
            "knowledge_gaps",
            self.knowledge_gaps.clone(),
            self.caches.knowledge_gaps.clone(),
            self.fetcher.clone(),
        )
        .with_ttl(self.config.ttls.knowledge_gaps)
        .with_debounce(Duration::ZERO)
    }

    pub fn data_integrations(&self) -> QueryCoordinator<DataIntegrationSource> {
        QueryCoordinator::new(
            "data_integrations",
            self.data_integrations.clone(),
            self.caches.data_integrations.clone(),
            self.fetcher.clone(),
        )
        .with_ttl(self.config.ttls.data_integrations)
        .with_debounce(Duration::ZERO)
    }

    pub fn quotes(&self) -> QueryCoordinator<QuoteSource> {
        QueryCoordinator::new(
            "quotes",
            self.quotes.clone(),
            self.caches.quotes.clone(),
            self.fetcher.clone(),
        )
        .with_ttl(self.config.ttls.quotes)
        .with_debounce(Duration::ZERO)
    }

    /// Open-ended chat session
    pub fn chat(&self) -> ChatSession {
        ChatSession::general(self.client.clone(), self.config.max_chat_history)
    }

    /// Chat session about one publication
    pub fn chat_about(&self, publication: &Publication) -> ChatSession {
        ChatSession::for_publication(self.client.clone(), publication, self.config.max_chat_history)
    }

    /// Loads every dashboard panel concurrently
    pub async fn dashboard(&self) -> Dashboard {
        let search = self.publication_search().with_debounce(Duration::ZERO);
        let gaps = self.knowledge_gaps();
        let integrations = self.data_integrations();
        let quotes = self.quotes();

        let (publications, knowledge_gaps, data_integrations, quote) = futures::join!(
            search.query(PublicationQuery::default()),
            gaps.query(()),
            integrations.query(()),
            quotes.query(()),
        );

        Dashboard {
            recently_viewed: recently_viewed(
                publications.results.as_deref().unwrap_or_default(),
                RECENTLY_VIEWED_LIMIT,
            ),
            knowledge_gaps,
            data_integrations,
            quote,
        }
    }
}
