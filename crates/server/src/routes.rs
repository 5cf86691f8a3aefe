//! Route configuration.

use crate::context::request_context_middleware;
use crate::metrics::metrics_handler;
use crate::scope::scope_middleware;
use crate::state::AppState;
use crate::tree::{dispatch, feeds_handler};
use axum::Router;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut repository_routes = Router::new()
        .route(&state.config.repository.feeds_path, get(feeds_handler))
        .fallback(dispatch);

    if state.config.client_map.is_some() {
        repository_routes = repository_routes.layer(middleware::from_fn_with_state(
            state.clone(),
            scope_middleware,
        ));
    }

    let mut router = repository_routes.with_state(state.clone());

    // Metrics sit outside client scoping; restrict them at the network level.
    if state.config.server.metrics_enabled {
        router = router.merge(Router::new().route("/metrics", get(metrics_handler)));
    }

    // Order of execution: TraceLayer -> request context -> scope -> handler
    router
        .layer(middleware::from_fn(request_context_middleware))
        .layer(TraceLayer::new_for_http())
}
