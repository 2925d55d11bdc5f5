//! The reference KV backend: an embedded key/value database organised as a
//! path-prefixed bucket tree.
//!
//! One database lives at `<storage_path>/storage.bdb`, holding a single
//! root tree named by configuration (default `":"`). Below the root the
//! bucket tree mirrors IRI path components: the item at
//! `https://host/actors/alice` lives under the `host/actors/alice` bucket.
//! A leaf bucket holds two well-known keys: `__raw`, the JSON serialization
//! of the item (or the JSON array of member IRIs for a collection bucket),
//! and `__meta_data`, the out-of-band metadata record.
//!
//! All writes run inside a serializable tree transaction; the engine
//! serializes writers and readers do not block them.

use crate::error::{StorageError, StorageResult};
use crate::metadata::Metadata;
use crate::port::{CanBootstrap, CredentialStore, FullStore, Loaded, MetadataTyper, Store};
use async_trait::async_trait;
use postbox_core::filter::{CollectionPath, MAX_ITEMS_DEFAULT};
use postbox_core::{Actor, Filter, Iri, Item};
use postbox_keys::{KeyType, PrivateKey};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;
use time::OffsetDateTime;

const OBJECT_KEY: &str = "__raw";
const METADATA_KEY: &str = "__meta_data";
const DB_NAME: &str = "storage.bdb";
const EMPTY_COLLECTION: &[u8] = b"[]";

/// The sled-backed reference store.
pub struct KvStore {
    #[allow(dead_code)] // owns the database; trees borrow from it
    db: sled::Db,
    tree: sled::Tree,
    base: Iri,
    key_type: KeyType,
}

/// Result of a bucket descent: the deepest existing bucket and, when the
/// walk stopped early on a hidden collection, the unwalked remainder.
#[derive(Debug)]
struct Descent {
    bucket: String,
    remainder: Option<String>,
}

impl KvStore {
    /// Open (creating if necessary) the database under `storage_path`.
    pub fn open(
        storage_path: &Path,
        root: &str,
        base: Iri,
        key_type: KeyType,
    ) -> StorageResult<Self> {
        std::fs::create_dir_all(storage_path)?;
        let db_path = storage_path.join(DB_NAME);
        let db = sled::open(&db_path)?;
        let tree = db.open_tree(root.as_bytes())?;
        restrict_permissions(storage_path).unwrap_or_else(|e| {
            tracing::warn!(path = %storage_path.display(), error = %e, "could not restrict permissions");
        });
        tracing::info!(path = %db_path.display(), root = %root, "opened KV store");
        Ok(KvStore {
            db,
            tree,
            base,
            key_type,
        })
    }

    /// The bucket path for an IRI: host followed by the path components.
    fn bucket_path(&self, iri: &Iri) -> StorageResult<String> {
        let url = iri
            .url()
            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| StorageError::InvalidInput(format!("IRI without host: {iri}")))?;
        let path = url.path().trim_matches('/');
        if path.is_empty() {
            Ok(host.to_string())
        } else {
            Ok(format!("{host}/{path}"))
        }
    }

    fn raw_key(bucket: &str) -> Vec<u8> {
        format!("{bucket}/{OBJECT_KEY}").into_bytes()
    }

    fn meta_key(bucket: &str) -> Vec<u8> {
        format!("{bucket}/{METADATA_KEY}").into_bytes()
    }

    /// A bucket exists when any key lives under it.
    fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self
            .tree
            .scan_prefix(format!("{bucket}/").as_bytes())
            .next()
            .transpose()?
            .is_some())
    }

    /// Walk the bucket tree along `path`, returning the deepest existing
    /// bucket. A non-empty remainder is only tolerated when it names a
    /// hidden collection; anything else is `NotFound`.
    fn descend(&self, path: &str) -> StorageResult<Descent> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let mut bucket = String::new();
        let mut walked = 0;
        for component in &components {
            let candidate = if bucket.is_empty() {
                (*component).to_string()
            } else {
                format!("{bucket}/{component}")
            };
            if !self.bucket_exists(&candidate)? {
                break;
            }
            bucket = candidate;
            walked += 1;
        }
        if walked == components.len() {
            return Ok(Descent {
                bucket,
                remainder: None,
            });
        }
        let remainder = components[walked..].join("/");
        let hidden = CollectionPath::from_segment(&remainder)
            .map(|c| c.is_hidden())
            .unwrap_or(false);
        if hidden {
            Ok(Descent {
                bucket,
                remainder: Some(remainder),
            })
        } else {
            Err(StorageError::NotFound(format!(
                "{} not found under {path}",
                components[walked]
            )))
        }
    }

    /// Map a bucket path back to its IRI under the instance base.
    fn iri_for_bucket(&self, bucket: &str) -> Iri {
        match bucket.split_once('/') {
            Some((_host, path)) => self.base.add_path(path),
            None => self.base.clone(),
        }
    }

    /// Read and decode the raw item stored in a bucket, without resolving
    /// any references. Collection buckets (bare IRI arrays) yield `None`.
    fn read_raw(&self, bucket: &str) -> StorageResult<Option<Item>> {
        let Some(raw) = self.tree.get(Self::raw_key(bucket))? else {
            return Ok(None);
        };
        let value: serde_json::Value = serde_json::from_slice(&raw)?;
        if value.is_array() {
            return Ok(None);
        }
        let item: Item = serde_json::from_value(value)?;
        Ok(Some(item))
    }

    /// Load one item by IRI; depth-0, used when expanding references.
    fn load_one(&self, iri: &Iri) -> StorageResult<Option<Item>> {
        if !self.is_local_iri(iri) {
            return Ok(None);
        }
        let path = self.bucket_path(iri)?;
        if !self.bucket_exists(&path)? {
            return Ok(None);
        }
        self.read_raw(&path)
    }

    /// Resolve IRI-valued sub-properties one level deep: tags always,
    /// activity actor/object/target when the filter carries a sub-filter
    /// for them. References returned from a resolve are not themselves
    /// expanded, which guarantees termination.
    fn resolve_references(&self, item: &mut Item, filter: &Filter) -> StorageResult<()> {
        if let Some(base) = item.object_base_mut() {
            for tag in base.tag.iter_mut() {
                let reference = match tag {
                    Item::Iri(iri) => iri.clone(),
                    _ => continue,
                };
                if let Some(loaded) = self.load_one(&reference)? {
                    *tag = loaded;
                }
            }
        }
        if let Item::Activity(activity) = item {
            let subs = [
                (filter.actor_filter(), &mut activity.actor),
                (filter.object_filter(), &mut activity.object),
                (filter.target_filter(), &mut activity.target),
            ];
            for (sub, prop) in subs {
                let Some(sub) = sub else { continue };
                let Some(boxed) = prop else { continue };
                let reference = match boxed.as_ref() {
                    Item::Iri(iri) => iri.clone(),
                    _ => continue,
                };
                if let Some(loaded) = self.load_one(&reference)? {
                    if sub.matches(&loaded) {
                        *boxed = Box::new(loaded);
                    }
                }
            }
        }
        Ok(())
    }

    /// Expand a collection bucket's membership into loaded items.
    fn load_members(&self, members: &[Iri], filter: &Filter) -> StorageResult<Vec<Item>> {
        let mut items = Vec::new();
        for iri in members {
            let Some(mut item) = self.load_one(iri)? else {
                // Foreign or vanished references stay as bare IRIs so the
                // collection membership remains visible.
                let reference = Item::Iri(iri.clone());
                if filter.matches(&reference) {
                    items.push(reference);
                }
                continue;
            };
            self.resolve_references(&mut item, filter)?;
            if filter.matches(&item) {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Direct child buckets of a top-level collection, in key order.
    fn child_buckets(&self, path: &str) -> StorageResult<Vec<Iri>> {
        let prefix = format!("{path}/");
        let mut children: Vec<String> = Vec::new();
        for entry in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let key = String::from_utf8_lossy(&key);
            let rest = &key[prefix.len()..];
            let Some(child) = rest.split('/').next() else {
                continue;
            };
            if child.starts_with("__") || child.is_empty() {
                continue;
            }
            if children.last().map(String::as_str) != Some(child) {
                children.push(child.to_string());
            }
        }
        children.dedup();
        Ok(children
            .into_iter()
            .map(|c| self.iri_for_bucket(&format!("{path}/{c}")))
            .collect())
    }

    fn load_item_scoped(&self, filter: &Filter) -> StorageResult<Loaded> {
        let path = self.bucket_path(&filter.iri)?;
        let descent = self.descend(&path)?;
        if descent.remainder.is_some() {
            return Err(StorageError::NotFound(filter.iri.to_string()));
        }
        let raw = self
            .tree
            .get(Self::raw_key(&descent.bucket))?
            .ok_or_else(|| StorageError::NotFound(filter.iri.to_string()))?;

        // A collection bucket stores a bare IRI array; expand it.
        if let Ok(members) = serde_json::from_slice::<Vec<Iri>>(&raw) {
            let items = self.load_members(&members, filter)?;
            let total = items.len();
            return Ok(Loaded::Page {
                items: paginate(items, filter),
                total,
            });
        }

        let mut item: Item = serde_json::from_slice(&raw)?;
        self.resolve_references(&mut item, filter)?;
        if !filter.matches(&item) {
            return Err(StorageError::NotFound(filter.iri.to_string()));
        }
        Ok(Loaded::Item(item))
    }

    fn load_collection_scoped(
        &self,
        filter: &Filter,
        collection: CollectionPath,
    ) -> StorageResult<Loaded> {
        let path = self.bucket_path(&filter.iri)?;
        let members: Vec<Iri> = if collection.is_top_level() {
            // Top-level collections iterate child buckets; never written
            // means empty, not missing.
            self.child_buckets(&path)?
        } else {
            let descent = self.descend(&path)?;
            if descent.remainder.is_some() {
                // Hidden collection that was never written:
                // indistinguishable from empty.
                return Ok(Loaded::Page {
                    items: Vec::new(),
                    total: 0,
                });
            }
            match self.tree.get(Self::raw_key(&path))? {
                Some(raw) => serde_json::from_slice(&raw)?,
                None => Vec::new(),
            }
        };
        let items = self.load_members(&members, filter)?;
        let total = items.len();
        Ok(Loaded::Page {
            items: paginate(items, filter),
            total,
        })
    }

    /// The owned-collection buckets a newly created item receives.
    fn owned_collections(item: &Item) -> Vec<Iri> {
        let Some(id) = item.iri() else {
            return Vec::new();
        };
        match item.kind() {
            Some(k) if k.is_actor() => ["inbox", "outbox", "followers", "following", "liked"]
                .iter()
                .map(|c| id.add_path(c))
                .collect(),
            Some(k) if k.is_activity() || k.is_collection() => Vec::new(),
            _ => ["replies", "likes", "shares"]
                .iter()
                .map(|c| id.add_path(c))
                .collect(),
        }
    }

    /// Set the owned-collection references on a freshly created item.
    fn attach_collection_refs(item: &mut Item) {
        let Some(id) = item.iri() else { return };
        match item {
            Item::Actor(actor) => {
                if actor.inbox.is_none() {
                    actor.inbox = Some(id.add_path("inbox"));
                }
                if actor.outbox.is_none() {
                    actor.outbox = Some(id.add_path("outbox"));
                }
                if actor.followers.is_none() {
                    actor.followers = Some(id.add_path("followers"));
                }
                if actor.following.is_none() {
                    actor.following = Some(id.add_path("following"));
                }
                if actor.liked.is_none() {
                    actor.liked = Some(id.add_path("liked"));
                }
            }
            Item::Object(object) if !object.kind.is_activity() => {
                if object.replies.is_none() {
                    object.replies = Some(id.add_path("replies"));
                }
                if object.likes.is_none() {
                    object.likes = Some(id.add_path("likes"));
                }
                if object.shares.is_none() {
                    object.shares = Some(id.add_path("shares"));
                }
            }
            _ => {}
        }
    }

    /// Run a read-modify-write cycle on a collection's membership inside a
    /// serializable transaction. The closure returns `None` for a no-op.
    fn mutate_collection(
        &self,
        collection: &Iri,
        apply: impl Fn(Vec<Iri>) -> Option<Vec<Iri>>,
    ) -> StorageResult<()> {
        if !self.is_local_iri(collection) {
            return Err(StorageError::InvalidInput(format!(
                "cannot mutate non-local collection {collection}"
            )));
        }
        let bucket = self.bucket_path(collection)?;
        let key = Self::raw_key(&bucket);
        let owner_key = match collection.parent() {
            Some(parent) => Some(Self::raw_key(&self.bucket_path(&parent)?)),
            None => None,
        };
        let result = self.tree.transaction(|tx| {
            if let Some(owner_key) = &owner_key {
                if let Some(owner_raw) = tx.get(owner_key.as_slice())? {
                    if raw_is_tombstone(&owner_raw) {
                        return Err(ConflictableTransactionError::Abort(StorageError::Conflict(
                            format!("collections of deleted item are immutable: {collection}"),
                        )));
                    }
                }
            }
            let members: Vec<Iri> = match tx.get(key.as_slice())? {
                Some(raw) => serde_json::from_slice(&raw)
                    .map_err(|e| ConflictableTransactionError::Abort(StorageError::Json(e)))?,
                None => Vec::new(),
            };
            if let Some(updated) = apply(members) {
                let encoded = serde_json::to_vec(&updated)
                    .map_err(|e| ConflictableTransactionError::Abort(StorageError::Json(e)))?;
                tx.insert(key.as_slice(), encoded)?;
            }
            Ok(())
        });
        map_tx(result)
    }

    /// Lazily ensure the collection reference is present on its host item.
    fn ensure_collection_on_host(&self, collection: &Iri) -> StorageResult<()> {
        let Some(segment) = collection.last_segment() else {
            return Ok(());
        };
        let Some(col) = CollectionPath::from_segment(segment) else {
            return Ok(());
        };
        if col.is_top_level() || col.is_hidden() {
            return Ok(());
        }
        let Some(owner) = collection.parent() else {
            return Ok(());
        };
        let Some(mut item) = self.load_one(&owner)? else {
            return Ok(());
        };
        if item.is_tombstone() {
            return Err(StorageError::Conflict(format!(
                "collections of deleted item are immutable: {collection}"
            )));
        }
        let already = match (&item, col) {
            (Item::Actor(a), CollectionPath::Inbox) => a.inbox.is_some(),
            (Item::Actor(a), CollectionPath::Outbox) => a.outbox.is_some(),
            (Item::Actor(a), CollectionPath::Followers) => a.followers.is_some(),
            (Item::Actor(a), CollectionPath::Following) => a.following.is_some(),
            (Item::Actor(a), CollectionPath::Liked) => a.liked.is_some(),
            (Item::Object(o), CollectionPath::Replies) => o.replies.is_some(),
            (Item::Object(o), CollectionPath::Likes) => o.likes.is_some(),
            (Item::Object(o), CollectionPath::Shares) => o.shares.is_some(),
            _ => true,
        };
        if already {
            return Ok(());
        }
        match (&mut item, col) {
            (Item::Actor(a), CollectionPath::Inbox) => a.inbox = Some(collection.clone()),
            (Item::Actor(a), CollectionPath::Outbox) => a.outbox = Some(collection.clone()),
            (Item::Actor(a), CollectionPath::Followers) => a.followers = Some(collection.clone()),
            (Item::Actor(a), CollectionPath::Following) => a.following = Some(collection.clone()),
            (Item::Actor(a), CollectionPath::Liked) => a.liked = Some(collection.clone()),
            (Item::Object(o), CollectionPath::Replies) => o.replies = Some(collection.clone()),
            (Item::Object(o), CollectionPath::Likes) => o.likes = Some(collection.clone()),
            (Item::Object(o), CollectionPath::Shares) => o.shares = Some(collection.clone()),
            _ => {}
        }
        let bucket = self.bucket_path(&owner)?;
        self.tree
            .insert(Self::raw_key(&bucket), serde_json::to_vec(&item)?)?;
        Ok(())
    }
}

#[async_trait]
impl Store for KvStore {
    async fn load(&self, filter: &Filter) -> StorageResult<Loaded> {
        match filter.collection() {
            Some(collection) => self.load_collection_scoped(filter, collection),
            None => self.load_item_scoped(filter),
        }
    }

    async fn save(&self, mut item: Item) -> StorageResult<Item> {
        let iri = item
            .iri()
            .ok_or_else(|| StorageError::InvalidInput("item without an id".to_string()))?;
        if !self.is_local_iri(&iri) {
            return Err(StorageError::InvalidInput(format!(
                "refusing to store foreign IRI {iri}"
            )));
        }
        let bucket = self.bucket_path(&iri)?;
        let key = Self::raw_key(&bucket);
        let is_new = self.tree.get(&key)?.is_none();
        if is_new {
            Self::attach_collection_refs(&mut item);
        }
        let collection_keys: Vec<Vec<u8>> = if is_new {
            Self::owned_collections(&item)
                .iter()
                .map(|c| self.bucket_path(c).map(|b| Self::raw_key(&b)))
                .collect::<StorageResult<_>>()?
        } else {
            Vec::new()
        };
        let incoming_tombstone = item.is_tombstone();
        let encoded = serde_json::to_vec(&item)?;

        let result = self.tree.transaction(|tx| {
            if let Some(existing) = tx.get(key.as_slice())? {
                if raw_is_tombstone(&existing) && !incoming_tombstone {
                    return Err(ConflictableTransactionError::Abort(StorageError::Conflict(
                        format!("{iri} is deleted and its IRI is never reused"),
                    )));
                }
            } else {
                for collection_key in &collection_keys {
                    if tx.get(collection_key.as_slice())?.is_none() {
                        tx.insert(collection_key.as_slice(), EMPTY_COLLECTION)?;
                    }
                }
            }
            tx.insert(key.as_slice(), encoded.as_slice())?;
            Ok(())
        });
        map_tx(result)?;
        tracing::debug!(iri = %iri, new = is_new, "saved item");
        Ok(item)
    }

    async fn delete(&self, iri: &Iri) -> StorageResult<()> {
        let bucket = self.bucket_path(iri)?;
        let key = Self::raw_key(&bucket);
        let raw = self
            .tree
            .get(&key)?
            .ok_or_else(|| StorageError::NotFound(iri.to_string()))?;
        if serde_json::from_slice::<Vec<Iri>>(&raw).is_ok() {
            return Err(StorageError::InvalidInput(format!(
                "{iri} is a collection, not a deletable item"
            )));
        }
        let item: Item = serde_json::from_slice(&raw)?;
        if item.is_tombstone() {
            return Ok(());
        }
        let tombstone = item
            .object_base()
            .map(|b| b.tombstone(OffsetDateTime::now_utc()))
            .ok_or_else(|| StorageError::InvalidInput(format!("{iri} cannot be tombstoned")))?;
        self.tree
            .insert(key, serde_json::to_vec(&Item::from(tombstone))?)?;
        tracing::debug!(iri = %iri, "tombstoned item");
        Ok(())
    }

    async fn create_collection(&self, iri: &Iri) -> StorageResult<()> {
        if !self.is_local_iri(iri) {
            return Err(StorageError::InvalidInput(format!(
                "cannot create non-local collection {iri}"
            )));
        }
        let bucket = self.bucket_path(iri)?;
        let key = Self::raw_key(&bucket);
        // Creating an existing collection is a no-op.
        let _ = self
            .tree
            .compare_and_swap(key, None::<&[u8]>, Some(EMPTY_COLLECTION))?;
        Ok(())
    }

    async fn add_to(&self, collection: &Iri, item: &Iri) -> StorageResult<()> {
        self.ensure_collection_on_host(collection)?;
        self.mutate_collection(collection, |mut members| {
            if members.iter().any(|m| m.equals(item, false)) {
                return None;
            }
            members.push(item.clone());
            Some(members)
        })
    }

    async fn remove_from(&self, collection: &Iri, item: &Iri) -> StorageResult<()> {
        self.mutate_collection(collection, |mut members| {
            let before = members.len();
            members.retain(|m| !m.equals(item, false));
            if members.len() == before {
                None
            } else {
                Some(members)
            }
        })
    }

    fn is_local_iri(&self, iri: &Iri) -> bool {
        self.base.contains(iri, false)
    }
}

#[async_trait]
impl CredentialStore for KvStore {
    async fn password_set(&self, iri: &Iri, plaintext: &str) -> StorageResult<()> {
        let plaintext = plaintext.to_string();
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, bcrypt::DEFAULT_COST))
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let mut metadata = match self.load_metadata(iri).await {
            Ok(m) => m,
            Err(StorageError::NotFound(_)) => Metadata::default(),
            Err(e) => return Err(e),
        };
        metadata.pw = Some(hash);
        self.save_metadata(iri, metadata).await
    }

    async fn password_check(&self, iri: &Iri, plaintext: &str) -> StorageResult<()> {
        let metadata = match self.load_metadata(iri).await {
            Ok(m) => m,
            Err(StorageError::NotFound(_)) => {
                return Err(StorageError::Unauthorized("no password set".to_string()));
            }
            Err(e) => return Err(e),
        };
        let Some(hash) = metadata.pw else {
            return Err(StorageError::Unauthorized("no password set".to_string()));
        };
        let plaintext = plaintext.to_string();
        let valid = tokio::task::spawn_blocking(move || bcrypt::verify(plaintext, &hash))
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        if valid {
            Ok(())
        } else {
            Err(StorageError::Unauthorized("invalid password".to_string()))
        }
    }

    async fn save_metadata(&self, iri: &Iri, metadata: Metadata) -> StorageResult<()> {
        let bucket = self.bucket_path(iri)?;
        self.tree
            .insert(Self::meta_key(&bucket), serde_json::to_vec(&metadata)?)?;
        Ok(())
    }

    async fn load_metadata(&self, iri: &Iri) -> StorageResult<Metadata> {
        let bucket = self.bucket_path(iri)?;
        let raw = self
            .tree
            .get(Self::meta_key(&bucket))?
            .ok_or_else(|| StorageError::NotFound(format!("no metadata for {iri}")))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn load_key(&self, iri: &Iri) -> StorageResult<PrivateKey> {
        let metadata = self.load_metadata(iri).await?;
        let pem = metadata
            .private_key
            .ok_or_else(|| StorageError::NotFound(format!("no private key for {iri}")))?;
        PrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| StorageError::Internal(format!("undecodable private key: {e}")))
    }
}

#[async_trait]
impl CanBootstrap for KvStore {
    async fn create_service(&self, service: Actor) -> StorageResult<Actor> {
        let iri = service
            .id()
            .cloned()
            .ok_or_else(|| StorageError::InvalidInput("service without an id".to_string()))?;
        if let Some(existing) = self.load_one(&iri)? {
            if let Item::Actor(actor) = existing {
                return Ok(*actor);
            }
            return Err(StorageError::Conflict(format!(
                "{iri} exists and is not an actor"
            )));
        }
        let saved = self.save(Item::from(service)).await?;
        match saved {
            Item::Actor(actor) => Ok(*actor),
            _ => Err(StorageError::Internal("service did not round-trip".to_string())),
        }
    }
}

impl MetadataTyper for KvStore {
    fn key_type(&self) -> KeyType {
        self.key_type
    }
}

impl FullStore for KvStore {
    fn as_bootstrap(&self) -> Option<&dyn CanBootstrap> {
        Some(self)
    }

    fn as_metadata_typer(&self) -> Option<&dyn MetadataTyper> {
        Some(self)
    }
}

fn raw_is_tombstone(raw: &[u8]) -> bool {
    serde_json::from_slice::<Item>(raw)
        .map(|it| it.is_tombstone())
        .unwrap_or(false)
}

fn map_tx<T>(result: Result<T, TransactionError<StorageError>>) -> StorageResult<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    })
}

/// Apply the before/after cursors and the page size to an ordered member
/// list. The total count is taken before pagination.
fn paginate(items: Vec<Item>, filter: &Filter) -> Vec<Item> {
    let mut items = items;
    if let Some(after) = &filter.after {
        if let Some(pos) = items
            .iter()
            .position(|it| it.iri().map(|i| i.equals(after, false)).unwrap_or(false))
        {
            items.drain(..=pos);
        }
    }
    if let Some(before) = &filter.before {
        if let Some(pos) = items
            .iter()
            .position(|it| it.iri().map(|i| i.equals(before, false)).unwrap_or(false))
        {
            items.truncate(pos);
        }
    }
    let max = if filter.max_items == 0 {
        MAX_ITEMS_DEFAULT
    } else {
        filter.max_items
    };
    items.truncate(max);
    items
}

fn restrict_permissions(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    let db_dir = dir.join(DB_NAME);
    if db_dir.is_dir() {
        std::fs::set_permissions(&db_dir, std::fs::Permissions::from_mode(0o700))?;
        for entry in std::fs::read_dir(&db_dir)? {
            let entry = entry?;
            let mode = if entry.file_type()?.is_dir() { 0o700 } else { 0o600 };
            std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, KvStore) {
        let dir = tempdir().unwrap();
        let kv = KvStore::open(
            dir.path(),
            ":",
            Iri::new("https://postbox.test"),
            KeyType::Ed25519,
        )
        .unwrap();
        (dir, kv)
    }

    #[test]
    fn bucket_path_mirrors_iri_components() {
        let (_dir, kv) = store();
        assert_eq!(
            kv.bucket_path(&Iri::new("https://postbox.test/actors/alice/inbox"))
                .unwrap(),
            "postbox.test/actors/alice/inbox"
        );
        assert_eq!(
            kv.bucket_path(&Iri::new("https://postbox.test/")).unwrap(),
            "postbox.test"
        );
        assert!(kv.bucket_path(&Iri::new("not-an-iri")).is_err());
    }

    #[test]
    fn descend_reports_missing_segment() {
        let (_dir, kv) = store();
        kv.tree
            .insert(KvStore::raw_key("postbox.test/actors/alice"), b"{}".to_vec())
            .unwrap();
        let d = kv.descend("postbox.test/actors/alice").unwrap();
        assert_eq!(d.bucket, "postbox.test/actors/alice");
        assert!(d.remainder.is_none());

        let err = kv.descend("postbox.test/actors/bob").unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn descend_tolerates_hidden_collections() {
        let (_dir, kv) = store();
        kv.tree
            .insert(KvStore::raw_key("postbox.test/actors/alice"), b"{}".to_vec())
            .unwrap();
        let d = kv.descend("postbox.test/actors/alice/blocked").unwrap();
        assert_eq!(d.remainder.as_deref(), Some("blocked"));
    }

    #[test]
    fn is_local_iri_uses_base_prefix() {
        let (_dir, kv) = store();
        assert!(kv.is_local_iri(&Iri::new("https://postbox.test/objects/1")));
        assert!(kv.is_local_iri(&Iri::new("http://postbox.test/objects/1")));
        assert!(!kv.is_local_iri(&Iri::new("https://elsewhere.example/objects/1")));
    }
}
