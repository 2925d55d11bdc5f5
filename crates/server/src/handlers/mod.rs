//! HTTP handlers for the ActivityPub URL shapes.

pub mod read;
pub mod write;

pub use read::{get_collection, get_item, get_service, get_sub_collection};
pub use write::post_sub_collection;

use crate::error::{ApiError, ApiResult};
use axum::http::HeaderMap;
use axum::http::header::ACCEPT;

/// What the client negotiated for.
pub(crate) enum Negotiated {
    /// Any of the ActivityPub JSON flavours.
    Activity,
    /// A browser; redirect to the presentation layer when configured.
    Html,
}

/// Content negotiation over the `Accept` header.
///
/// `application/activity+json` and `application/ld+json` (with the
/// ActivityStreams profile) are both accepted and produced.
pub(crate) fn negotiate(headers: &HeaderMap) -> ApiResult<Negotiated> {
    let accept = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("*/*");
    if accept.contains("text/html") {
        return Ok(Negotiated::Html);
    }
    let acceptable = [
        "application/activity+json",
        "application/ld+json",
        "application/json",
        "application/*",
        "*/*",
    ];
    if acceptable.iter().any(|t| accept.contains(t)) || accept.trim().is_empty() {
        Ok(Negotiated::Activity)
    } else {
        Err(ApiError::NotAcceptable(format!("cannot produce {accept}")))
    }
}
