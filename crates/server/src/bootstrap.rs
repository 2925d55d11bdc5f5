//! Instance bootstrap: the self service actor and locally created actors.
//!
//! On startup the self Service actor at the base IRI is loaded or, when the
//! backend can bootstrap, created. When the backend exposes a metadata
//! typer a key pair is generated for it; otherwise the actor is served
//! without keys.

use crate::error::{ApiError, ApiResult};
use postbox_core::{Actor, Filter, Iri, Item, Kind};
use postbox_processing::{generate_id, provision_actor_keys};
use postbox_storage::{CredentialStore, FullStore, Loaded, StorageError, Store};
use std::sync::Arc;

/// The distinguished self Service actor for a base IRI.
pub fn self_service(base: &Iri) -> Actor {
    let mut actor = Actor::new(Kind::Service, base.clone()).with_collections();
    actor.preferred_username = Some("self".to_string());
    actor.base.name = Some("postbox".to_string());
    actor.base.url = Some(base.clone());
    actor
}

/// Load the self service actor, creating it when absent and the backend
/// supports bootstrap. Idempotent.
pub async fn ensure_self_service(store: &Arc<dyn FullStore>, base: &Iri) -> ApiResult<Actor> {
    match store.load(&Filter::item(base.clone())).await {
        Ok(Loaded::Item(Item::Actor(actor))) => return Ok(*actor),
        Ok(_) => {
            return Err(ApiError::Internal(format!(
                "{base} resolves to something that is not the self actor"
            )));
        }
        Err(StorageError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let Some(bootstrapper) = store.as_bootstrap() else {
        return Err(ApiError::Internal(
            "storage backend cannot bootstrap the self service actor".to_string(),
        ));
    };
    tracing::info!(base = %base, "bootstrapping the instance's self service actor");
    let mut actor = bootstrapper.create_service(self_service(base)).await?;
    if let Some(with_key) = provision_actor_keys(store, actor.clone()).await? {
        actor = with_key;
    }
    Ok(actor)
}

/// Create a local Person actor with a password, for the control surface.
pub async fn add_actor(
    store: &Arc<dyn FullStore>,
    base: &Iri,
    name: &str,
    password: Option<&str>,
) -> ApiResult<Actor> {
    let iri = generate_id(&base.add_path("actors"));
    let mut actor = Actor::new(Kind::Person, iri.clone()).with_collections();
    actor.preferred_username = Some(name.to_string());
    actor.base.published = Some(time::OffsetDateTime::now_utc());

    let saved = store.save(Item::from(actor)).await?;
    let Item::Actor(mut actor) = saved else {
        return Err(ApiError::Internal("actor did not round-trip".to_string()));
    };
    if let Some(with_key) = provision_actor_keys(store, (*actor).clone()).await? {
        actor = Box::new(with_key);
    }
    if let Some(password) = password {
        store.password_set(&iri, password).await?;
    }
    tracing::info!(iri = %iri, name = %name, "created local actor");
    Ok(*actor)
}
