use crate::handlers::{fills, orders, replica};
use crate::middleware::request_id;
use crate::state::AppState;
use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "Hello, World!" }))
        .route("/orders/post", post(orders::post_order))
        .route("/orders/cancel", post(orders::cancel_order))
        .route("/orders/:user_id", get(orders::open_orders))
        .route("/fills/:user_id", get(fills::fills_for_user))
        .route("/internal/replica/prepare", post(replica::prepare))
        .route("/internal/replica/commit", post(replica::commit))
        .route("/internal/replica/state", get(replica::replica_state))
        .route("/internal/replica/sync", get(replica::replica_sync))
        .layer(from_fn(request_id))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
