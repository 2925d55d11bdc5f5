//! Application state shared across handlers.
//!
//! Configuration is copy-on-reload: handlers read an immutable snapshot
//! captured at request entry, and SIGHUP swaps the snapshot without
//! touching running connections.

use crate::bootstrap;
use crate::cache::RequestCache;
use crate::error::ApiResult;
use crate::oauth::OAuthStore;
use parking_lot::RwLock;
use postbox_core::{Actor, AppConfig, Iri};
use postbox_processing::{NullDelivery, Processor, QueuedDelivery};
use postbox_storage::FullStore;
use std::sync::Arc;
use tokio::sync::watch;

/// Bound on the outbound delivery queue.
const DELIVERY_QUEUE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    config: Arc<RwLock<Arc<AppConfig>>>,
    pub store: Arc<dyn FullStore>,
    pub processor: Arc<Processor>,
    pub cache: Arc<RequestCache>,
    pub oauth: Option<Arc<dyn OAuthStore>>,
    pub self_actor: Arc<RwLock<Actor>>,
    /// Flipping this to true stops background workers.
    pub shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Assemble the full state: open storage, bootstrap the self service
    /// actor, spawn the delivery worker, wire the processor.
    pub async fn build(
        config: AppConfig,
        oauth: Option<Arc<dyn OAuthStore>>,
    ) -> ApiResult<AppState> {
        let store = postbox_storage::open(&config)?;
        Self::with_store(config, store, oauth).await
    }

    /// Like [`AppState::build`] but over an already opened store.
    pub async fn with_store(
        config: AppConfig,
        store: Arc<dyn FullStore>,
        oauth: Option<Arc<dyn OAuthStore>>,
    ) -> ApiResult<AppState> {
        let base = config.base_iri();
        let self_actor = bootstrap::ensure_self_service(&store, &base).await?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let delivery = Arc::new(QueuedDelivery::spawn(
            DELIVERY_QUEUE_CAPACITY,
            Arc::new(NullDelivery),
            shutdown_rx,
        ));
        let processor = Arc::new(Processor::new(store.clone(), base, delivery));
        let cache = Arc::new(RequestCache::new(config.request_cache));

        Ok(AppState {
            config: Arc::new(RwLock::new(Arc::new(config))),
            store,
            processor,
            cache,
            oauth,
            self_actor: Arc::new(RwLock::new(self_actor)),
            shutdown,
        })
    }

    /// The configuration snapshot for this request.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.read().clone()
    }

    /// The instance base IRI.
    pub fn base(&self) -> Iri {
        self.config().base_iri()
    }

    /// Swap in a reloaded configuration and drop the request cache.
    /// Running connections are not interrupted.
    pub fn reload(&self, config: AppConfig) {
        self.cache.set_enabled(config.request_cache);
        self.cache.clear();
        *self.config.write() = Arc::new(config);
        tracing::info!("configuration reloaded, request cache dropped");
    }

    /// The bootstrapped self service actor.
    pub fn self_actor(&self) -> Actor {
        self.self_actor.read().clone()
    }
}
