//! Read path: build a filter from path and query, load, marshal, emit.

use super::{Negotiated, negotiate};
use crate::auth::RequestActor;
use crate::cache::{CacheKey, CachedResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Extension;
use axum::extract::{Path, RawQuery, State};
use axum::http::header::{CONTENT_TYPE, LINK, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use postbox_core::filter::CollectionPath;
use postbox_core::{
    ACTIVITYSTREAMS_CONTEXT, CONTENT_TYPE_ACTIVITY, Collection, Filter, Iri, Item,
};
use postbox_storage::{Loaded, load_retrying};

/// GET `/` - the instance's self Service actor.
pub async fn get_service(
    State(state): State<AppState>,
    Extension(caller): Extension<RequestActor>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let base = state.base();
    serve_get(state, caller, base, query, headers).await
}

/// GET `/{collection}` - a top-level storage collection.
pub async fn get_collection(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(caller): Extension<RequestActor>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Response> {
    require_top_level(&collection)?;
    let iri = state.base().add_path(&collection);
    serve_get(state, caller, iri, query, headers).await
}

/// GET `/{collection}/{id}` - a single item.
pub async fn get_item(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Extension(caller): Extension<RequestActor>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Response> {
    require_top_level(&collection)?;
    let iri = state.base().add_path(&collection).add_path(&id);
    serve_get(state, caller, iri, query, headers).await
}

/// GET `/{collection}/{id}/{sub}` - an owned collection.
pub async fn get_sub_collection(
    State(state): State<AppState>,
    Path((collection, id, sub)): Path<(String, String, String)>,
    Extension(caller): Extension<RequestActor>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult<Response> {
    require_top_level(&collection)?;
    let owned = CollectionPath::from_segment(&sub)
        .filter(|c| !c.is_top_level() && !c.is_hidden())
        .ok_or_else(|| ApiError::NotFound(format!("no collection named {sub}")))?;
    let iri = state
        .base()
        .add_path(&collection)
        .add_path(&id)
        .add_path(owned.as_str());
    serve_get(state, caller, iri, query, headers).await
}

fn require_top_level(collection: &str) -> ApiResult<()> {
    match CollectionPath::from_segment(collection) {
        Some(c) if c.is_top_level() => Ok(()),
        _ => Err(ApiError::NotFound(format!(
            "no top-level collection named {collection}"
        ))),
    }
}

async fn serve_get(
    state: AppState,
    caller: RequestActor,
    iri: Iri,
    query: Option<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let config = state.config();
    if let Negotiated::Html = negotiate(&headers)? {
        return match &config.frontend_url {
            Some(frontend) => {
                let target = format!("{}{}", frontend.trim_end_matches('/'), path_of(&iri));
                Response::builder()
                    .status(StatusCode::SEE_OTHER)
                    .header(LOCATION, target)
                    .body(axum::body::Body::empty())
                    .map_err(|e| ApiError::Internal(e.to_string()))
            }
            None => Err(ApiError::NotAcceptable(
                "no presentation layer configured".to_string(),
            )),
        };
    }

    let query = query.unwrap_or_default();
    let cache_key = CacheKey::get(&iri, &query, caller.iri().as_str());
    if let Some(hit) = state.cache.get(&cache_key) {
        return build_response(
            StatusCode::from_u16(hit.status).unwrap_or(StatusCode::OK),
            &iri,
            hit.body,
        );
    }

    let full = if query.is_empty() {
        iri.clone()
    } else {
        Iri::new(format!("{iri}?{query}"))
    };
    let filter = Filter::from_iri(&full)?;
    let loaded = load_retrying(state.store.as_ref(), &filter).await?;

    let (status, item) = match loaded {
        Loaded::Item(item) if item.is_tombstone() => (StatusCode::GONE, item),
        Loaded::Item(item) => (StatusCode::OK, item),
        Loaded::Page { items, total } => (
            StatusCode::OK,
            Item::from(collection_page(&iri, &filter, items, total)),
        ),
    };

    let body = serialize_item(item)?;
    if status == StatusCode::OK {
        state.cache.put(
            cache_key,
            CachedResponse {
                content_type: CONTENT_TYPE_ACTIVITY.to_string(),
                status: status.as_u16(),
                body: body.clone(),
            },
        );
    }
    build_response(status, &iri, body)
}

/// Strip the blind audience, attach the JSON-LD context, serialize.
pub(crate) fn serialize_item(mut item: Item) -> ApiResult<Vec<u8>> {
    item.strip_blind_audience();
    if let Some(base) = item.object_base_mut() {
        if base.context.is_none() {
            base.context = Some(serde_json::Value::String(
                ACTIVITYSTREAMS_CONTEXT.to_string(),
            ));
        }
    }
    serde_json::to_vec(&item).map_err(|e| ApiError::Internal(e.to_string()))
}

pub(crate) fn build_response(status: StatusCode, self_iri: &Iri, body: Vec<u8>) -> ApiResult<Response> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, CONTENT_TYPE_ACTIVITY)
        .header(LINK, format!("<{self_iri}>; rel=\"self\""))
        .body(body.into())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Assemble a served collection page: total, members, and paging links
/// derived from the cursor position. The links keep the request's
/// predicates so a filtered collection stays filtered across pages.
fn collection_page(iri: &Iri, filter: &Filter, items: Vec<Item>, total: usize) -> Collection {
    let mut page = Collection::ordered(iri.clone());
    page.total_items = total as u64;
    let max = filter.max_items.max(1);
    let query = filter.predicate_query();

    page.first = Some(Iri::new(format!("{iri}?{query}")));
    let full_page = items.len() == max && total > max;
    if full_page {
        if let Some(last_item) = items.last().and_then(Item::iri) {
            page.next = Some(Iri::new(format!("{iri}?{query}&after={last_item}")));
        }
    } else {
        // The final page doubles as the last-page link.
        page.last = Some(iri.clone());
    }
    if filter.after.is_some() || filter.before.is_some() {
        page.prev = page.first.clone();
    }

    let mut members = items;
    for member in members.iter_mut() {
        member.strip_blind_audience();
    }
    page.items = members;
    page
}

fn path_of(iri: &Iri) -> String {
    iri.url()
        .ok()
        .map(|u| u.path().to_string())
        .unwrap_or_else(|| "/".to_string())
}
