//! The storage port: the contract every backend satisfies.

use crate::error::{StorageError, StorageResult};
use crate::kv::KvStore;
use crate::metadata::Metadata;
use async_trait::async_trait;
use postbox_core::{Actor, AppConfig, Filter, Iri, Item};
use postbox_keys::{KeyType, PrivateKey};
use std::sync::Arc;
use std::time::Duration;

/// Backoff before the single retry of an idempotent read.
const TRANSIENT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// The result of a load: one item, or an ordered page plus a total count.
#[derive(Clone, Debug)]
pub enum Loaded {
    Item(Item),
    Page { items: Vec<Item>, total: usize },
}

impl Loaded {
    pub fn into_item(self) -> Option<Item> {
        match self {
            Loaded::Item(it) => Some(it),
            Loaded::Page { .. } => None,
        }
    }
}

/// Object and collection operations.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load by filter. Item-scoped filters return one item; collection
    /// scoped filters return an ordered page plus the total match count.
    async fn load(&self, filter: &Filter) -> StorageResult<Loaded>;

    /// Create or update the item stored at its IRI.
    ///
    /// Creating materializes the item's owned collections. Saving over a
    /// tombstone fails with `Conflict`.
    async fn save(&self, item: Item) -> StorageResult<Item>;

    /// Replace the item with a tombstone of the same IRI. Idempotent
    /// beyond the first call; the IRI is never reused.
    async fn delete(&self, iri: &Iri) -> StorageResult<()>;

    /// Materialize an empty collection at the given IRI.
    async fn create_collection(&self, iri: &Iri) -> StorageResult<()>;

    /// Add an item reference to a collection; set semantics, lazily
    /// ensuring the collection exists on the host item.
    async fn add_to(&self, collection: &Iri, item: &Iri) -> StorageResult<()>;

    /// Remove an item reference from a collection; removing an absent
    /// member is a no-op success.
    async fn remove_from(&self, collection: &Iri, item: &Iri) -> StorageResult<()>;

    /// Whether the IRI belongs to this instance.
    fn is_local_iri(&self, iri: &Iri) -> bool;
}

/// Credential and metadata operations.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn password_set(&self, iri: &Iri, plaintext: &str) -> StorageResult<()>;

    /// Check a password; fails `Unauthorized` on mismatch or when no
    /// password is stored.
    async fn password_check(&self, iri: &Iri, plaintext: &str) -> StorageResult<()>;

    async fn save_metadata(&self, iri: &Iri, metadata: Metadata) -> StorageResult<()>;

    async fn load_metadata(&self, iri: &Iri) -> StorageResult<Metadata>;

    /// Load and decode the private key for a locally generated actor.
    async fn load_key(&self, iri: &Iri) -> StorageResult<PrivateKey>;
}

/// Optional capability: the backend can bootstrap the instance's self
/// service actor.
#[async_trait]
pub trait CanBootstrap: Send + Sync {
    /// Create the self service actor. Idempotent.
    async fn create_service(&self, service: Actor) -> StorageResult<Actor>;
}

/// Optional capability: the backend knows which key algorithm new local
/// actors receive. Absent this, no keys are generated.
pub trait MetadataTyper: Send + Sync {
    fn key_type(&self) -> KeyType;
}

/// The full storage surface the server composes. Optional capabilities are
/// feature-detected through the accessors; the server degrades gracefully
/// when they return `None`.
pub trait FullStore: Store + CredentialStore {
    fn as_bootstrap(&self) -> Option<&dyn CanBootstrap> {
        None
    }

    fn as_metadata_typer(&self) -> Option<&dyn MetadataTyper> {
        None
    }
}

/// Open the backend selected by configuration.
///
/// Backends are keyed by the `storage` selector; unknown selectors fail
/// fast naming the available set.
pub fn open(config: &AppConfig) -> StorageResult<Arc<dyn FullStore>> {
    match config.storage.as_str() {
        "sled" | "kv" => {
            let key_type = if config.mastodon_compatible {
                KeyType::Rsa
            } else {
                KeyType::Ed25519
            };
            let store = KvStore::open(
                &config.storage_path,
                &config.storage_root,
                config.base_iri(),
                key_type,
            )?;
            Ok(Arc::new(store))
        }
        other => Err(StorageError::Config(format!(
            "unknown storage backend '{other}' (available: sled)"
        ))),
    }
}

/// Load with the transient-retry policy: one retry after a short backoff,
/// reads only. Writes are never retried.
pub async fn load_retrying(store: &dyn Store, filter: &Filter) -> StorageResult<Loaded> {
    match store.load(filter).await {
        Err(e) if e.is_transient() => {
            tracing::debug!(iri = %filter.iri, error = %e, "transient load failure, retrying once");
            tokio::time::sleep(TRANSIENT_RETRY_BACKOFF).await;
            store.load(filter).await
        }
        other => other,
    }
}
