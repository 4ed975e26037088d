use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::Vendor;
use common::envelope::now_iso;
use serde::Serialize;

/// Structured error response body.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    /// Vendor token outside the supported set.
    UnknownVendor(String),
    /// Authorization header absent.
    TokenMissing,
    /// Bearer token malformed or wrong.
    TokenInvalid,
    /// Payload failed the per-vendor schema check.
    SchemaValidation(String),
    NotFound(String),
    /// Broker publish failed; the job was not queued.
    PublishFailed(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        let (status, error, detail) = match self {
            AppError::UnknownVendor(vendor) => (
                StatusCode::BAD_REQUEST,
                format!("Aseguradora '{}' no soportada", vendor),
                Some(format!("Aseguradoras válidas: {}", Vendor::supported())),
            ),
            AppError::TokenMissing => (
                StatusCode::FORBIDDEN,
                "Credenciales de autenticación no proporcionadas".to_string(),
                None,
            ),
            AppError::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                "Token de autenticación inválido".to_string(),
                None,
            ),
            AppError::SchemaValidation(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Error de validación del payload".to_string(),
                Some(detail),
            ),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message, None),
            AppError::PublishFailed(detail) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Error al encolar tarea en MQTT".to_string(),
                Some(detail),
            ),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error interno inesperado".to_string(),
                    None,
                )
            }
        };
        (
            status,
            ErrorBody {
                success: false,
                error,
                detail,
                timestamp: now_iso(),
            },
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}
