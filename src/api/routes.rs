use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};

use super::dispatch::{dispatch, slugify_topic};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // Health, stats & metrics
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Push endpoints, guarded by X-API-Key when api.key is set
        .nest(
            "/api/v1/push",
            Router::new()
                .route("/dispatch", post(dispatch))
                .route("/topics/slugify", post(slugify_topic))
                .route_layer(middleware::from_fn_with_state(state.clone(), api_key_auth)),
        )
}
