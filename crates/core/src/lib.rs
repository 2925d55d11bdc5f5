//! Core domain types for the postbox ActivityPub server.
//!
//! This crate defines the canonical data model used across all other crates:
//! - IRIs and their containment/equality rules
//! - The polymorphic ActivityStreams item model
//! - Request-derived load filters
//! - Application configuration

pub mod config;
pub mod error;
pub mod filter;
pub mod iri;
pub mod item;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use filter::{CollectionPath, Filter};
pub use iri::Iri;
pub use item::{Activity, Actor, Collection, Item, Kind, Object, PublicKey};

/// The ActivityStreams public audience collection.
pub const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Content type for plain ActivityPub JSON.
pub const CONTENT_TYPE_ACTIVITY: &str = "application/activity+json";

/// Content type for JSON-LD with the ActivityStreams profile.
pub const CONTENT_TYPE_LD: &str =
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// The JSON-LD context served on every item.
pub const ACTIVITYSTREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
