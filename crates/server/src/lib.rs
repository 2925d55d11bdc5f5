//! HTTP server for the postbox ActivityPub instance.
//!
//! This crate provides the transport plane:
//! - ActivityPub URL shapes mapped to load/create operations
//! - Content negotiation and pagination
//! - Bearer / HTTP-signature authentication with anonymous fallback
//! - The per-IRI request cache
//! - Listener selection, signal handling, and graceful shutdown

pub mod auth;
pub mod bootstrap;
pub mod cache;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod oauth;
pub mod routes;
pub mod state;

pub use auth::RequestActor;
pub use cache::RequestCache;
pub use error::{ApiError, ApiResult};
pub use oauth::OAuthStore;
pub use routes::create_router;
pub use state::AppState;
