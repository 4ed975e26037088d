use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::derive_error_code;

/// Failure classification driving the retry pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// May succeed on an immediate in-place retry (timeouts, stale references).
    Transient,
    /// Needs a backoff delay before retrying (rate limits, captcha, exhaustion).
    Retriable,
    /// Will never succeed; goes straight to the DLQ (credentials, validation).
    Permanent,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT",
            Self::Retriable => "RETRIABLE",
            Self::Permanent => "PERMANENT",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tagged handler failure carrying its classification and a machine code.
///
/// Vendor handlers raise these directly when they know the failure class;
/// foreign errors are wrapped via [`HandlerError::from_kind`] or classified
/// after the fact by [`crate::classify::classify`].
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("{message}")]
    Transient { code: String, message: String },
    #[error("{message}")]
    Retriable { code: String, message: String },
    #[error("{message}")]
    Permanent { code: String, message: String },
}

impl HandlerError {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn retriable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Retriable {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Rate limit hit upstream; needs a cooldown before retrying.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::retriable("RATE_LIMIT", message)
    }

    /// Host resources exhausted (CPU, RAM, slots).
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::retriable("RESOURCE_EXHAUSTED", message)
    }

    /// Login rejected by the vendor portal.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::permanent("AUTHENTICATION", message)
    }

    /// Credentials are invalid or expired.
    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::permanent("INVALID_CREDENTIALS", message)
    }

    /// No handler exists for the requested vendor.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::permanent("BOT_NOT_IMPLEMENTED", message)
    }

    /// Payload failed structural validation inside the handler.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::permanent("VALIDATION", message)
    }

    /// Wrap a foreign error by its exception-style type name, applying the
    /// name-substring classification rules. The code is derived from the name
    /// (CamelCase to UPPER_SNAKE_CASE, `_EXCEPTION`/`_ERROR` suffix stripped).
    pub fn from_kind(kind: &str, message: impl Into<String>) -> Self {
        let lower = kind.to_lowercase();
        let code = derive_error_code(kind);
        if lower.contains("auth") || lower.contains("credential") {
            Self::permanent(code, message)
        } else if lower.contains("notimplemented") || lower.contains("validation") {
            Self::permanent(code, message)
        } else if lower.contains("ratelimit") || lower.contains("resource") {
            Self::retriable(code, message)
        } else {
            Self::retriable(code, message)
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Transient { .. } => ErrorType::Transient,
            Self::Retriable { .. } => ErrorType::Retriable,
            Self::Permanent { .. } => ErrorType::Permanent,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Transient { code, .. }
            | Self::Retriable { code, .. }
            | Self::Permanent { code, .. } => code,
        }
    }
}
