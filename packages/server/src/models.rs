use common::envelope::now_iso;
use serde::{Deserialize, Serialize};

/// Generic success envelope for ingress responses.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    pub timestamp: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            timestamp: now_iso(),
        }
    }

    pub fn partial(success: bool, message: impl Into<String>, data: T) -> Self {
        Self {
            success,
            message: message.into(),
            data: Some(data),
            timestamp: now_iso(),
        }
    }
}

/// Lifecycle states of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Payload returned after queueing a quotation job.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub job_id: String,
    #[schema(example = "hdi")]
    pub vendor: String,
    pub status: JobStatus,
    #[schema(example = "Tarea encolada exitosamente")]
    pub message: String,
    pub queued_at: String,
}

/// Response of the health check.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: &'static str,
    #[schema(example = "cotizador-api")]
    pub service: &'static str,
    pub version: &'static str,
    pub mqtt_connected: bool,
    pub timestamp: String,
}

/// All DLQ messages across vendors.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DlqListResponse {
    pub count: usize,
    /// Full job envelopes, replayable as-is.
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<serde_json::Value>,
}

/// DLQ messages of one vendor.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DlqVendorResponse {
    #[schema(example = "hdi")]
    pub vendor: String,
    pub count: usize,
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<serde_json::Value>,
}

/// Result of re-injecting a DLQ message into its origin queue.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DlqRetryResponse {
    #[schema(example = "requeued")]
    pub status: &'static str,
    pub job_id: String,
    pub message: String,
}

/// One item of a batch quotation request.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BatchJobItem {
    /// Vendor token, e.g. "hdi".
    pub aseguradora: String,
    /// Nested payload; flat extra keys are folded into it.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
