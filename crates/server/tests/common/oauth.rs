//! In-memory OAuth2 storage for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use postbox_core::Iri;
use postbox_server::oauth::{AccessData, AuthorizeData, ClientData, OAuthStore};
use postbox_storage::{StorageError, StorageResult};
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// The OAuth2 port backed by maps, standing in for the external
/// authorization server.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[derive(Default)]
pub struct MemOAuthStore {
    clients: Mutex<HashMap<String, ClientData>>,
    authorizations: Mutex<HashMap<String, AuthorizeData>>,
    accesses: Mutex<HashMap<String, AccessData>>,
    refreshes: Mutex<HashMap<String, String>>,
}

#[allow(dead_code)]
impl MemOAuthStore {
    /// Issue a bearer token authenticating the given actor.
    pub fn issue(&self, actor: &Iri) -> String {
        let token = format!("test-token-{}", Uuid::new_v4());
        let access = AccessData {
            client_id: "test-client".to_string(),
            access_token: token.clone(),
            refresh_token: None,
            scope: "activitypub".to_string(),
            created_at: OffsetDateTime::now_utc(),
            expires_in: 3600,
            actor: actor.clone(),
        };
        self.accesses.lock().insert(token.clone(), access);
        token
    }

    pub fn register_client(&self, client: ClientData) {
        self.clients.lock().insert(client.id.clone(), client);
    }
}

#[async_trait]
impl OAuthStore for MemOAuthStore {
    async fn load_client(&self, id: &str) -> StorageResult<ClientData> {
        self.clients
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("client {id}")))
    }

    async fn save_authorize(&self, data: AuthorizeData) -> StorageResult<()> {
        self.authorizations.lock().insert(data.code.clone(), data);
        Ok(())
    }

    async fn load_authorize(&self, code: &str) -> StorageResult<AuthorizeData> {
        self.authorizations
            .lock()
            .get(code)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("authorization {code}")))
    }

    async fn remove_authorize(&self, code: &str) -> StorageResult<()> {
        self.authorizations.lock().remove(code);
        Ok(())
    }

    async fn save_access(&self, data: AccessData) -> StorageResult<()> {
        self.accesses
            .lock()
            .insert(data.access_token.clone(), data);
        Ok(())
    }

    async fn load_access(&self, token: &str) -> StorageResult<AccessData> {
        self.accesses
            .lock()
            .get(token)
            .cloned()
            .ok_or_else(|| StorageError::NotFound("access token".to_string()))
    }

    async fn remove_access(&self, token: &str) -> StorageResult<()> {
        self.accesses.lock().remove(token);
        Ok(())
    }

    async fn save_refresh(&self, token: &str, access_token: &str) -> StorageResult<()> {
        self.refreshes
            .lock()
            .insert(token.to_string(), access_token.to_string());
        Ok(())
    }

    async fn load_refresh(&self, token: &str) -> StorageResult<AccessData> {
        let access_token = self
            .refreshes
            .lock()
            .get(token)
            .cloned()
            .ok_or_else(|| StorageError::NotFound("refresh token".to_string()))?;
        self.load_access(&access_token).await
    }

    async fn remove_refresh(&self, token: &str) -> StorageResult<()> {
        self.refreshes.lock().remove(token);
        Ok(())
    }

    fn close(&self) {}
}
