//! Write path: inbox (server-to-server) and outbox (client-to-server)
//! activity submission.

use super::read::{build_response, serialize_item};
use crate::auth::RequestActor;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Extension;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use postbox_core::filter::CollectionPath;
use postbox_core::{Activity, Actor, Filter, Item};
use postbox_keys::httpsig;
use postbox_processing::Outcome;
use postbox_storage::{Loaded, load_retrying};

/// POST `/{collection}/{id}/{sub}` - accept an activity on an actor's
/// inbox or outbox. Anything else is the wrong verb for the URL.
pub async fn post_sub_collection(
    State(state): State<AppState>,
    Path((collection, id, sub)): Path<(String, String, String)>,
    Extension(caller): Extension<RequestActor>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    match CollectionPath::from_segment(&collection) {
        Some(c) if c.is_top_level() => {}
        _ => {
            return Err(ApiError::NotFound(format!(
                "no top-level collection named {collection}"
            )));
        }
    }
    let owner_iri = state.base().add_path(&collection).add_path(&id);
    let owner = load_owner(&state, &owner_iri).await?;
    let activity = decode_activity(&body)?;

    let outcome = match sub.as_str() {
        "outbox" => {
            if caller.is_anonymous() {
                return Err(ApiError::Unauthorized(
                    "posting to an outbox requires authentication".to_string(),
                ));
            }
            if !caller.iri().equals(&owner_iri, false) {
                return Err(ApiError::Forbidden(
                    "actors may only post to their own outbox".to_string(),
                ));
            }
            state.processor.process_outbox(&owner, activity).await?
        }
        "inbox" => {
            if caller.is_anonymous() {
                return Err(ApiError::Unauthorized(
                    "inbox delivery requires a valid HTTP signature".to_string(),
                ));
            }
            httpsig::verify_digest_if_present(&headers, &body)
                .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
            state.processor.process_inbox(&owner, activity).await?
        }
        other => {
            return Err(ApiError::MethodNotAllowed(format!(
                "cannot POST to {other}"
            )));
        }
    };

    respond(&state, outcome)
}

async fn load_owner(state: &AppState, iri: &postbox_core::Iri) -> ApiResult<Actor> {
    let filter = Filter::item(iri.clone());
    match load_retrying(state.store.as_ref(), &filter).await? {
        Loaded::Item(Item::Actor(actor)) => Ok(*actor),
        Loaded::Item(item) if item.is_tombstone() => {
            Err(ApiError::NotFound(format!("{iri} is deleted")))
        }
        _ => Err(ApiError::NotFound(format!("{iri} is not an actor"))),
    }
}

fn decode_activity(body: &[u8]) -> ApiResult<Activity> {
    let item: Item = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("undecodable body: {e}")))?;
    match item {
        Item::Activity(activity) => Ok(*activity),
        other => Err(ApiError::BadRequest(format!(
            "body is not an activity (got {})",
            other
                .kind()
                .map(|k| k.as_str().to_string())
                .unwrap_or_else(|| "an IRI".to_string())
        ))),
    }
}

fn respond(state: &AppState, outcome: Outcome) -> ApiResult<Response> {
    for touched in &outcome.touched {
        state.cache.invalidate(touched);
    }
    // 202 signals completion pending out-of-band finalization (Follow).
    let status = if outcome.completed {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };
    let location = outcome.location.clone();
    let self_iri = outcome
        .activity
        .id()
        .cloned()
        .unwrap_or_else(|| location.clone());
    let body = serialize_item(Item::from(outcome.activity))?;
    let mut response = build_response(status, &self_iri, body)?;
    response.headers_mut().insert(
        LOCATION,
        location
            .as_str()
            .parse()
            .map_err(|_| ApiError::Internal("unrepresentable Location".to_string()))?,
    );
    Ok(response)
}
