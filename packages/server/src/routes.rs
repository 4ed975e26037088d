use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers;
use crate::state::AppState;

/// Bearer-protected routes mounted under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/{vendor}/cotizar",
            post(handlers::cotizaciones::crear_cotizacion),
        )
        .route(
            "/cotizar/batch",
            post(handlers::cotizaciones::crear_cotizaciones_batch),
        )
        .route("/dlq", get(handlers::dlq::list_dlq))
        .route("/dlq/{vendor}", get(handlers::dlq::list_dlq_by_vendor))
        .route("/dlq/{job_id}/retry", post(handlers::dlq::retry_dlq))
}

/// Open routes mounted at the root.
pub fn open_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::get_metrics))
}
