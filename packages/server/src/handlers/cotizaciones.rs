use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use common::Vendor;
use common::envelope::{JobEnvelope, now_iso};
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::AuthToken;
use crate::error::{AppError, ErrorBody};
use crate::extract::AppJson;
use crate::models::{ApiResponse, BatchJobItem, JobResponse, JobStatus};
use crate::schemas::{fold_request_body, validate_payload};
use crate::state::AppState;

/// Queue one quotation job for a vendor.
#[utoipa::path(
    post,
    path = "/{vendor}/cotizar",
    tag = "Cotizaciones",
    operation_id = "crearCotizacion",
    summary = "Encolar tarea de cotización",
    description = "Valida el payload y publica la tarea en `bots/queue/{vendor}`. \
                   Acepta tanto el payload anidado como el formato plano del \
                   documento de integración.",
    params(("vendor" = String, Path, description = "Aseguradora, ej. hdi")),
    responses(
        (status = 202, description = "Tarea encolada", body = ApiResponse<JobResponse>),
        (status = 400, description = "Aseguradora no soportada", body = ErrorBody),
        (status = 401, description = "Token inválido", body = ErrorBody),
        (status = 403, description = "Credenciales ausentes", body = ErrorBody),
        (status = 422, description = "Payload inválido", body = ErrorBody),
        (status = 503, description = "Broker no disponible", body = ErrorBody),
    ),
    security(("bearer" = [])),
)]
#[instrument(skip(state, _auth, body), fields(vendor = %vendor_token))]
pub async fn crear_cotizacion(
    State(state): State<AppState>,
    Path(vendor_token): Path<String>,
    _auth: AuthToken,
    AppJson(body): AppJson<Value>,
) -> Result<(StatusCode, Json<ApiResponse<JobResponse>>), AppError> {
    let vendor: Vendor = vendor_token
        .parse()
        .map_err(|_| AppError::UnknownVendor(vendor_token.clone()))?;

    let payload = fold_request_body(body).map_err(AppError::SchemaValidation)?;
    validate_payload(vendor, &payload).map_err(AppError::SchemaValidation)?;

    let envelope = JobEnvelope::new(Uuid::new_v4().to_string(), payload)
        .with_max_retries(state.config.retry.max_retries);

    state
        .publisher
        .publish_job(vendor.as_str(), &envelope)
        .await
        .map_err(|e| {
            error!(error = %e, "Error publicando en MQTT");
            AppError::PublishFailed(e.to_string())
        })?;

    info!(
        job_id = %envelope.job_id,
        "[{}] Job encolado",
        vendor.as_str().to_uppercase()
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(
            format!("Tarea encolada para {}", vendor.as_str().to_uppercase()),
            JobResponse {
                job_id: envelope.job_id,
                vendor: vendor.to_string(),
                status: JobStatus::Pending,
                message: "Tarea encolada exitosamente. Será procesada por un worker disponible."
                    .to_string(),
                queued_at: now_iso(),
            },
        )),
    ))
}

/// Queue quotation jobs for several vendors in one call.
#[utoipa::path(
    post,
    path = "/cotizar/batch",
    tag = "Cotizaciones",
    operation_id = "crearCotizacionesBatch",
    summary = "Encolar múltiples cotizaciones",
    request_body = Vec<BatchJobItem>,
    responses(
        (status = 202, description = "Resultado por tarea", body = ApiResponse<Vec<JobResponse>>),
        (status = 401, description = "Token inválido", body = ErrorBody),
        (status = 403, description = "Credenciales ausentes", body = ErrorBody),
    ),
    security(("bearer" = [])),
)]
#[instrument(skip(state, _auth, items))]
pub async fn crear_cotizaciones_batch(
    State(state): State<AppState>,
    _auth: AuthToken,
    AppJson(items): AppJson<Vec<BatchJobItem>>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<JobResponse>>>), AppError> {
    let mut results = Vec::new();
    let mut errors = Vec::new();

    for item in items {
        let Ok(vendor) = item.aseguradora.parse::<Vendor>() else {
            errors.push(format!("Aseguradora '{}' no válida", item.aseguradora));
            continue;
        };

        let mut payload = item.payload;
        for (key, value) in item.extra {
            payload.insert(key, value);
        }
        if let Err(problems) = validate_payload(vendor, &payload) {
            errors.push(format!("{}: {}", vendor, problems));
            continue;
        }

        let envelope = JobEnvelope::new(Uuid::new_v4().to_string(), payload)
            .with_max_retries(state.config.retry.max_retries);

        match state.publisher.publish_job(vendor.as_str(), &envelope).await {
            Ok(()) => results.push(JobResponse {
                job_id: envelope.job_id,
                vendor: vendor.to_string(),
                status: JobStatus::Pending,
                message: "Encolado".to_string(),
                queued_at: now_iso(),
            }),
            Err(e) => {
                warn!(vendor = %vendor, error = %e, "Error encolando tarea del batch");
                errors.push(format!("{}: {}", vendor, e));
            }
        }
    }

    let mut message = format!("{} tareas encoladas", results.len());
    if !errors.is_empty() {
        message.push_str(&format!(", {} errores: {}", errors.len(), errors.join("; ")));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::partial(!results.is_empty(), message, results)),
    ))
}
