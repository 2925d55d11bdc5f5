//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// URL shapes:
/// ```text
/// GET  /                              self Service actor
/// GET  /{collection}                  top-level collection
/// GET  /{collection}/{id}             item
/// GET  /{collection}/{id}/{sub}       owned collection
/// POST /{collection}/{id}/inbox       inbound activity (server-to-server)
/// POST /{collection}/{id}/outbox      outbound activity (client-to-server)
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::get_service))
        .route("/{collection}", get(handlers::get_collection))
        .route("/{collection}/{id}", get(handlers::get_item))
        .route(
            "/{collection}/{id}/{sub}",
            get(handlers::get_sub_collection).post(handlers::post_sub_collection),
        )
        // Auth resolves the caller (or the anonymous actor) before any
        // handler runs; authorization stays per-handler.
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
