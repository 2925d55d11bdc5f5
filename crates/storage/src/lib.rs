//! Storage port and reference backend for postbox.
//!
//! The port abstracts an object store, a collection store, a metadata store,
//! and a credential store over a content-addressed IRI space. The reference
//! backend is an embedded key/value database organised as a path-prefixed
//! bucket tree. Backends register by selector name and are chosen at runtime
//! from configuration.

pub mod error;
pub mod kv;
pub mod metadata;
pub mod port;

pub use error::{StorageError, StorageResult};
pub use kv::KvStore;
pub use metadata::Metadata;
pub use port::{
    CanBootstrap, CredentialStore, FullStore, Loaded, MetadataTyper, Store, load_retrying, open,
};
