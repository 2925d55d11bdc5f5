//! The OAuth2 storage port.
//!
//! The core does not implement OAuth2; it composes an external authorization
//! server through this trait. Bearer tokens resolve through `load_access`
//! to an actor IRI, which the auth service then loads from storage.

use async_trait::async_trait;
use postbox_core::Iri;
use postbox_storage::StorageResult;
use time::OffsetDateTime;

/// A registered OAuth2 client.
#[derive(Clone, Debug)]
pub struct ClientData {
    pub id: String,
    pub secret: String,
    pub redirect_uri: String,
}

/// An authorization grant awaiting exchange.
#[derive(Clone, Debug)]
pub struct AuthorizeData {
    pub client_id: String,
    pub code: String,
    pub scope: String,
    pub redirect_uri: String,
    pub created_at: OffsetDateTime,
    pub expires_in: u64,
    /// The actor this grant authenticates.
    pub actor: Iri,
}

/// An issued access token.
#[derive(Clone, Debug)]
pub struct AccessData {
    pub client_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scope: String,
    pub created_at: OffsetDateTime,
    pub expires_in: u64,
    /// The actor this token authenticates.
    pub actor: Iri,
}

impl AccessData {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        let age = now - self.created_at;
        age.whole_seconds() < 0 || age.whole_seconds() as u64 > self.expires_in
    }
}

/// Storage surface required from the external OAuth2 authorization server.
#[async_trait]
pub trait OAuthStore: Send + Sync {
    async fn load_client(&self, id: &str) -> StorageResult<ClientData>;

    async fn save_authorize(&self, data: AuthorizeData) -> StorageResult<()>;
    async fn load_authorize(&self, code: &str) -> StorageResult<AuthorizeData>;
    async fn remove_authorize(&self, code: &str) -> StorageResult<()>;

    async fn save_access(&self, data: AccessData) -> StorageResult<()>;
    async fn load_access(&self, token: &str) -> StorageResult<AccessData>;
    async fn remove_access(&self, token: &str) -> StorageResult<()>;

    async fn save_refresh(&self, token: &str, access_token: &str) -> StorageResult<()>;
    async fn load_refresh(&self, token: &str) -> StorageResult<AccessData>;
    async fn remove_refresh(&self, token: &str) -> StorageResult<()>;

    /// Release any resources held by the authorization server glue.
    fn close(&self);
}
