//! The test server fixture.

use super::MemOAuthStore;
use postbox_core::{Actor, AppConfig};
use postbox_server::oauth::OAuthStore;
use postbox_server::{AppState, bootstrap, create_router};
use std::sync::Arc;
use tempfile::TempDir;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub oauth: Arc<MemOAuthStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server over a scratch store, with the in-memory
    /// OAuth2 port wired in.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Like [`TestServer::new`] with configuration modifications applied
    /// before the state is built.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path().join("storage"));
        modifier(&mut config);

        let oauth = Arc::new(MemOAuthStore::default());
        let state = AppState::build(config, Some(oauth.clone() as Arc<dyn OAuthStore>))
            .await
            .expect("failed to build app state");
        let router = create_router(state.clone());

        TestServer {
            router,
            state,
            oauth,
            _temp_dir: temp_dir,
        }
    }

    /// Create a local actor and a bearer token authenticating it.
    pub async fn make_actor(&self, name: &str) -> (Actor, String) {
        let actor = bootstrap::add_actor(
            &self.state.store,
            &self.state.base(),
            name,
            Some("test-password"),
        )
        .await
        .expect("failed to create actor");
        let token = self.oauth.issue(actor.id().expect("actor has an id"));
        (actor, token)
    }

    /// The URL path of an actor's sub-collection.
    pub fn actor_path(actor: &Actor, sub: &str) -> String {
        let id = actor.id().expect("actor has an id");
        let path = id
            .as_str()
            .strip_prefix("https://postbox.test")
            .expect("local actor IRI");
        format!("{path}/{sub}")
    }
}
