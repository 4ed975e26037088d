use axum::{Json, extract::State};
use common::envelope::now_iso;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Service liveness plus cached broker connectivity. Open endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "healthCheck",
    summary = "Health check",
    responses((status = 200, description = "Estado del servicio", body = HealthResponse)),
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let alive = state.health.is_alive().await;
    Json(HealthResponse {
        status: if alive { "healthy" } else { "degraded" },
        service: "cotizador-api",
        version: env!("CARGO_PKG_VERSION"),
        mqtt_connected: alive,
        timestamp: now_iso(),
    })
}
