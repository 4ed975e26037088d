use axum::{Json, extract::State};

use crate::metrics::SystemMetrics;
use crate::state::AppState;

/// Aggregated system metrics, cached for 30 seconds. Open endpoint.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Metrics",
    operation_id = "getMetrics",
    summary = "Métricas del sistema",
    description = "Estado de servicios, profundidad de cola, actividad de las \
                   últimas 24 h, recursos del host y conteo de errores.",
    responses((status = 200, description = "Métricas agregadas")),
)]
pub async fn get_metrics(State(state): State<AppState>) -> Json<SystemMetrics> {
    Json(state.metrics.collect().await)
}
