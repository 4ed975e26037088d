use axum::{
    Json,
    extract::{Path, State},
};
use tracing::{error, instrument};

use crate::auth::AuthToken;
use crate::error::{AppError, ErrorBody};
use crate::models::{DlqListResponse, DlqRetryResponse, DlqVendorResponse};
use crate::state::AppState;

/// List every message in the dead-letter queue.
#[utoipa::path(
    get,
    path = "/dlq",
    tag = "DLQ",
    operation_id = "listDlqMessages",
    summary = "Listar mensajes en DLQ",
    responses(
        (status = 200, description = "Mensajes en DLQ", body = DlqListResponse),
        (status = 401, description = "Token inválido", body = ErrorBody),
        (status = 403, description = "Credenciales ausentes", body = ErrorBody),
    ),
    security(("bearer" = [])),
)]
#[instrument(skip(state, _auth))]
pub async fn list_dlq(
    State(state): State<AppState>,
    _auth: AuthToken,
) -> Result<Json<DlqListResponse>, AppError> {
    let messages: Vec<serde_json::Value> = state
        .dlq
        .list_all()
        .await
        .iter()
        .filter_map(|envelope| serde_json::to_value(envelope).ok())
        .collect();

    Ok(Json(DlqListResponse {
        count: messages.len(),
        messages,
    }))
}

/// List dead-lettered messages of one vendor.
#[utoipa::path(
    get,
    path = "/dlq/{vendor}",
    tag = "DLQ",
    operation_id = "listDlqByVendor",
    summary = "Listar mensajes en DLQ por aseguradora",
    params(("vendor" = String, Path, description = "Aseguradora, ej. hdi")),
    responses(
        (status = 200, description = "Mensajes en DLQ de la aseguradora", body = DlqVendorResponse),
        (status = 401, description = "Token inválido", body = ErrorBody),
        (status = 403, description = "Credenciales ausentes", body = ErrorBody),
    ),
    security(("bearer" = [])),
)]
#[instrument(skip(state, _auth))]
pub async fn list_dlq_by_vendor(
    State(state): State<AppState>,
    _auth: AuthToken,
    Path(vendor): Path<String>,
) -> Result<Json<DlqVendorResponse>, AppError> {
    let vendor = vendor.to_lowercase();
    let messages: Vec<serde_json::Value> = state
        .dlq
        .list_by_vendor(&vendor)
        .await
        .iter()
        .filter_map(|envelope| serde_json::to_value(envelope).ok())
        .collect();

    Ok(Json(DlqVendorResponse {
        vendor,
        count: messages.len(),
        messages,
    }))
}

/// Re-inject a dead-lettered job into its origin queue.
#[utoipa::path(
    post,
    path = "/dlq/{job_id}/retry",
    tag = "DLQ",
    operation_id = "retryDlqMessage",
    summary = "Reintentar mensaje de la DLQ",
    description = "Republica el mensaje en `bots/queue/{vendor}` con \
                   `retry_count` en 0 y el historial de errores vacío.",
    params(("job_id" = String, Path, description = "Job a reintentar")),
    responses(
        (status = 200, description = "Mensaje reencolado", body = DlqRetryResponse),
        (status = 401, description = "Token inválido", body = ErrorBody),
        (status = 403, description = "Credenciales ausentes", body = ErrorBody),
        (status = 404, description = "Job no encontrado en DLQ", body = ErrorBody),
        (status = 500, description = "Error reencolando", body = ErrorBody),
    ),
    security(("bearer" = [])),
)]
#[instrument(skip(state, _auth))]
pub async fn retry_dlq(
    State(state): State<AppState>,
    _auth: AuthToken,
    Path(job_id): Path<String>,
) -> Result<Json<DlqRetryResponse>, AppError> {
    match state.dlq.retry(&job_id).await {
        Ok(true) => Ok(Json(DlqRetryResponse {
            status: "requeued",
            message: format!("Job {} reencolado para reintento", job_id),
            job_id,
        })),
        Ok(false) => Err(AppError::NotFound(format!(
            "Job {} no encontrado en DLQ",
            job_id
        ))),
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Error reintentando mensaje DLQ");
            Err(AppError::Internal(e.to_string()))
        }
    }
}
