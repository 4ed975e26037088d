use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::ErrorType;

/// Default retry budget for envelopes that do not carry one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Top-level keys that belong to the envelope itself. Anything else found at
/// the root of a legacy message is folded into `payload` on decode.
const KNOWN_FIELDS: [&str; 8] = [
    "job_id",
    "payload",
    "retry_count",
    "max_retries",
    "first_attempt_at",
    "last_error",
    "error_history",
    "timestamp",
];

/// Current UTC instant as an ISO-8601 string, the envelope timestamp format.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A single error occurrence attached to an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub timestamp: String,
    pub error_type: ErrorType,
    pub error_code: String,
    pub message: String,
    /// Off by default to keep wire messages small.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl ErrorDetail {
    pub fn new(
        error_type: ErrorType,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: now_iso(),
            error_type,
            error_code: error_code.into(),
            message: message.into(),
            stack_trace: None,
        }
    }
}

/// The on-wire job message: opaque vendor payload plus retry metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: String,
    pub payload: Map<String, Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub first_attempt_at: String,
    pub last_error: Option<ErrorDetail>,
    pub error_history: Vec<ErrorDetail>,
}

/// Envelope decode failure. Only malformed input fails; unknown extra fields
/// never do.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope must be a JSON object")]
    NotAnObject,
}

impl JobEnvelope {
    /// Fresh envelope as produced at ingress.
    pub fn new(job_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            job_id: job_id.into(),
            payload,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            first_attempt_at: now_iso(),
            last_error: None,
            error_history: Vec::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Decode an envelope from raw JSON bytes.
    ///
    /// Backward compatible with the legacy flat message shape: unknown
    /// top-level keys move into `payload` (unless already present there) and
    /// missing retry metadata gets defaults.
    pub fn from_json(raw: &[u8]) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_slice(raw)?;
        Self::from_value(value)
    }

    /// Decode an envelope from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let Value::Object(mut root) = value else {
            return Err(CodecError::NotAnObject);
        };

        let job_id = match root.remove("job_id") {
            Some(Value::String(s)) => s,
            _ => "unknown".to_string(),
        };

        let mut payload = match root.remove("payload") {
            Some(Value::Object(m)) => m,
            _ => Map::new(),
        };

        let retry_count = root
            .remove("retry_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        let max_retries = root
            .remove("max_retries")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_RETRIES as u64) as u32;

        let first_attempt_at = match root.remove("first_attempt_at") {
            Some(Value::String(s)) => s,
            _ => now_iso(),
        };

        let last_error = root
            .remove("last_error")
            .and_then(|v| serde_json::from_value::<ErrorDetail>(v).ok());

        let error_history = match root.remove("error_history") {
            Some(Value::Array(entries)) => entries
                .into_iter()
                .filter_map(|e| serde_json::from_value::<ErrorDetail>(e).ok())
                .collect(),
            _ => Vec::new(),
        };

        // `timestamp` is a legacy envelope field, not payload data.
        root.remove("timestamp");

        for (key, value) in root {
            if !payload.contains_key(&key) {
                payload.insert(key, value);
            }
        }

        Ok(Self {
            job_id,
            payload,
            retry_count,
            max_retries,
            first_attempt_at,
            last_error,
            error_history,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization is infallible")
    }

    /// Record a failure: appended to the history and set as the last error.
    pub fn add_error(&mut self, detail: ErrorDetail) {
        self.error_history.push(detail.clone());
        self.last_error = Some(detail);
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Reset for manual re-injection from the DLQ: the retry chain restarts
    /// while `job_id` and `payload` are preserved.
    pub fn reset_for_retry(&mut self) {
        self.retry_count = 0;
        self.last_error = None;
        self.error_history.clear();
    }

    pub fn is_max_retries_exceeded(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_full_envelope() {
        let raw = json!({
            "job_id": "abc-123",
            "payload": {"in_strPlaca": "ABC123"},
            "retry_count": 2,
            "max_retries": 5,
            "first_attempt_at": "2026-01-23T10:30:00Z",
            "last_error": null,
            "error_history": []
        });
        let env = JobEnvelope::from_value(raw).unwrap();
        assert_eq!(env.job_id, "abc-123");
        assert_eq!(env.retry_count, 2);
        assert_eq!(env.max_retries, 5);
        assert_eq!(env.payload["in_strPlaca"], "ABC123");
    }

    #[test]
    fn test_decode_defaults_missing_retry_metadata() {
        let raw = json!({"job_id": "j1", "payload": {}});
        let env = JobEnvelope::from_value(raw).unwrap();
        assert_eq!(env.retry_count, 0);
        assert_eq!(env.max_retries, DEFAULT_MAX_RETRIES);
        assert!(env.last_error.is_none());
        assert!(env.error_history.is_empty());
        assert!(!env.first_attempt_at.is_empty());
    }

    #[test]
    fn test_legacy_flat_keys_fold_into_payload() {
        let raw = json!({
            "job_id": "j1",
            "timestamp": "2026-01-23T10:30:00Z",
            "in_strIDSolicitudAseguradora": "abc123",
            "in_strPlaca": "XYZ987"
        });
        let env = JobEnvelope::from_value(raw).unwrap();
        assert_eq!(env.payload["in_strIDSolicitudAseguradora"], "abc123");
        assert_eq!(env.payload["in_strPlaca"], "XYZ987");
        // The legacy timestamp is envelope metadata, never payload data.
        assert!(!env.payload.contains_key("timestamp"));
    }

    #[test]
    fn test_folding_does_not_overwrite_payload_keys() {
        let raw = json!({
            "job_id": "j1",
            "payload": {"in_strPlaca": "KEEP"},
            "in_strPlaca": "DROP"
        });
        let env = JobEnvelope::from_value(raw).unwrap();
        assert_eq!(env.payload["in_strPlaca"], "KEEP");
    }

    #[test]
    fn test_missing_job_id_becomes_unknown() {
        let env = JobEnvelope::from_value(json!({"payload": {}})).unwrap();
        assert_eq!(env.job_id, "unknown");
    }

    #[test]
    fn test_malformed_json_fails() {
        assert!(JobEnvelope::from_json(b"{not json").is_err());
        assert!(matches!(
            JobEnvelope::from_value(json!(42)),
            Err(CodecError::NotAnObject)
        ));
    }

    #[test]
    fn test_roundtrip_preserves_error_history() {
        let mut env = JobEnvelope::new("j1", Map::new());
        env.add_error(ErrorDetail::new(
            ErrorType::Retriable,
            "CAPTCHA_001",
            "captcha timeout",
        ));
        env.increment_retry();

        let back = JobEnvelope::from_json(env.to_json().as_bytes()).unwrap();
        assert_eq!(back.retry_count, 1);
        assert_eq!(back.error_history.len(), 1);
        assert_eq!(back.error_history[0].error_code, "CAPTCHA_001");
        assert_eq!(
            back.last_error.as_ref().unwrap().error_type,
            ErrorType::Retriable
        );
    }

    #[test]
    fn test_add_error_is_append_only() {
        let mut env = JobEnvelope::new("j1", Map::new());
        env.add_error(ErrorDetail::new(ErrorType::Transient, "TIMEOUT", "t1"));
        env.add_error(ErrorDetail::new(ErrorType::Retriable, "UNKNOWN", "t2"));
        assert_eq!(env.error_history.len(), 2);
        assert_eq!(env.error_history[0].error_code, "TIMEOUT");
        assert_eq!(env.last_error.as_ref().unwrap().error_code, "UNKNOWN");
    }

    #[test]
    fn test_reset_for_retry_clears_chain_but_keeps_identity() {
        let mut env = JobEnvelope::new("j1", Map::new());
        env.payload.insert("k".into(), json!("v"));
        env.add_error(ErrorDetail::new(ErrorType::Permanent, "AUTHENTICATION", "x"));
        env.retry_count = 3;

        env.reset_for_retry();
        assert_eq!(env.job_id, "j1");
        assert_eq!(env.payload["k"], "v");
        assert_eq!(env.retry_count, 0);
        assert!(env.last_error.is_none());
        assert!(env.error_history.is_empty());
    }

    #[test]
    fn test_max_retries_boundary() {
        let mut env = JobEnvelope::new("j1", Map::new()).with_max_retries(2);
        assert!(!env.is_max_retries_exceeded());
        env.retry_count = 2;
        assert!(env.is_max_retries_exceeded());
    }

    #[test]
    fn test_stack_trace_omitted_from_wire_when_absent() {
        let detail = ErrorDetail::new(ErrorType::Transient, "TIMEOUT", "slow");
        let json = serde_json::to_string(&detail).unwrap();
        assert!(!json.contains("stack_trace"));
    }

    #[test]
    fn test_known_fields_cover_folding_set() {
        // Guards against accidentally folding a real envelope field.
        for field in KNOWN_FIELDS {
            let mut raw = Map::new();
            raw.insert("job_id".to_string(), json!("j1"));
            raw.insert(field.to_string(), json!("x"));
            let env = JobEnvelope::from_value(Value::Object(raw)).unwrap();
            assert!(
                !env.payload.contains_key(field),
                "field {field} must not fold into payload"
            );
        }
    }
}
