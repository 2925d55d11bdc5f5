//! Request authentication.
//!
//! Bearer tokens resolve through the OAuth2 storage to an actor IRI; HTTP
//! signatures resolve through public-key lookup on the signing actor. On
//! success the request carries the authenticated actor; on failure it
//! carries the distinguished anonymous actor and authorization is left to
//! each handler.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use postbox_core::{Actor, Filter, Iri, Item, Kind};
use postbox_keys::httpsig;
use postbox_keys::PublicKey;
use postbox_storage::{Loaded, Store, load_retrying};
use std::sync::Arc;
use std::time::Duration;

/// The fixed identity carried by unauthenticated requests.
pub const ANONYMOUS_ACTOR_IRI: &str = "https://postbox/anonymous";

/// Maximum tolerated clock skew on the `Date` header of signed requests.
const MAX_DATE_SKEW: Duration = Duration::from_secs(300);

/// The actor resolved for a request.
#[derive(Clone)]
pub struct RequestActor(pub Arc<Actor>);

impl RequestActor {
    pub fn anonymous() -> Self {
        RequestActor(Arc::new(anonymous_actor()))
    }

    pub fn is_anonymous(&self) -> bool {
        self.iri().as_str() == ANONYMOUS_ACTOR_IRI
    }

    /// The actor IRI; the anonymous IRI when unauthenticated.
    pub fn iri(&self) -> Iri {
        self.0
            .id()
            .cloned()
            .unwrap_or_else(|| Iri::new(ANONYMOUS_ACTOR_IRI))
    }
}

/// The distinguished anonymous actor.
pub fn anonymous_actor() -> Actor {
    let mut actor = Actor::new(Kind::Person, Iri::new(ANONYMOUS_ACTOR_IRI));
    actor.preferred_username = Some("anonymous".to_string());
    actor
}

/// Extract the bearer token, if any. The scheme is case-insensitive.
fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
}

/// Authentication middleware: resolve the caller and stash it in request
/// extensions. Never rejects; failure degrades to the anonymous actor.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let actor = resolve_actor(&state, req.headers(), req.method(), req.uri()).await;
    match &actor {
        Some(actor) => {
            tracing::debug!(actor = %actor.id().map(|i| i.as_str()).unwrap_or("?"), "request authenticated");
            req.extensions_mut()
                .insert(RequestActor(Arc::new(actor.clone())));
        }
        None => {
            req.extensions_mut().insert(RequestActor::anonymous());
        }
    }
    Ok(next.run(req).await)
}

async fn resolve_actor(
    state: &AppState,
    headers: &axum::http::HeaderMap,
    method: &axum::http::Method,
    uri: &axum::http::Uri,
) -> Option<Actor> {
    if let Some(token) = bearer_token(headers) {
        if let Some(actor) = resolve_bearer(state, token).await {
            return Some(actor);
        }
    }
    if let Some(actor) = resolve_signature(state, headers, method, uri).await {
        return Some(actor);
    }
    None
}

/// Bearer: OAuth2 access record, then the actor it names.
async fn resolve_bearer(state: &AppState, token: &str) -> Option<Actor> {
    let oauth = state.oauth.as_ref()?;
    let access = match oauth.load_access(token).await {
        Ok(access) => access,
        Err(e) => {
            tracing::debug!(error = %e, "bearer token did not resolve");
            return None;
        }
    };
    if access.is_expired(time::OffsetDateTime::now_utc()) {
        tracing::debug!(actor = %access.actor, "bearer token expired");
        return None;
    }
    load_local_actor(state, &access.actor).await
}

/// HTTP signature: key id names a local actor whose public key verifies
/// the signed headers. Remote key fetching is the federation client's
/// concern, not the core's.
async fn resolve_signature(
    state: &AppState,
    headers: &axum::http::HeaderMap,
    method: &axum::http::Method,
    uri: &axum::http::Uri,
) -> Option<Actor> {
    let header = headers.get("signature")?.to_str().ok()?;
    let params = match httpsig::parse_signature_header(header) {
        Ok(params) => params,
        Err(e) => {
            tracing::debug!(error = %e, "malformed Signature header");
            return None;
        }
    };
    let actor_iri = Iri::new(params.actor_iri());
    if !state.store.is_local_iri(&actor_iri) {
        tracing::debug!(key_id = %params.key_id, "signature from non-local key, treating as anonymous");
        return None;
    }
    let actor = load_local_actor(state, &actor_iri).await?;
    let pem = &actor.public_key.as_ref()?.public_key_pem;
    let public_key = match PublicKey::from_public_key_pem(pem) {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(actor = %actor_iri, error = %e, "stored public key is undecodable");
            return None;
        }
    };
    if let Err(e) = httpsig::verify_date(headers, MAX_DATE_SKEW) {
        tracing::debug!(error = %e, "signature date check failed");
        return None;
    }
    match httpsig::verify_request(&public_key, &params, method, uri, headers) {
        Ok(()) => Some(actor),
        Err(e) => {
            tracing::debug!(actor = %actor_iri, error = %e, "signature verification failed");
            None
        }
    }
}

async fn load_local_actor(state: &AppState, iri: &Iri) -> Option<Actor> {
    let filter = Filter::item(iri.clone());
    match load_retrying(state.store.as_ref(), &filter).await {
        Ok(Loaded::Item(Item::Actor(actor))) => Some(*actor),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(iri = %iri, error = %e, "could not load actor");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_actor_has_the_fixed_identity() {
        let anon = RequestActor::anonymous();
        assert!(anon.is_anonymous());
        assert_eq!(anon.iri().as_str(), ANONYMOUS_ACTOR_IRI);
    }
}
