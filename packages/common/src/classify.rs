use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::{ErrorType, HandlerError};

/// Patterns that mark a stale DOM reference inside a browser-driver error.
static STALE_ELEMENT_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)stale element|element is not attached|element reference is stale")
        .expect("stale element regex")
});

/// Outcome of classifying a handler failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub error_type: ErrorType,
    pub error_code: String,
}

impl Classification {
    fn new(error_type: ErrorType, error_code: impl Into<String>) -> Self {
        Self {
            error_type,
            error_code: error_code.into(),
        }
    }
}

/// Classify a handler failure into a retry tier and machine code.
///
/// Order of precedence:
/// 1. A tagged [`HandlerError`] anywhere in the chain carries its own class.
/// 2. Timeouts (`tokio` elapsed, IO timed-out/not-found) are transient.
/// 3. Stale-reference messages are transient.
/// 4. Name-substring rules on the rendered message.
/// 5. Anything else is retriable, the safe default.
pub fn classify(error: &anyhow::Error) -> Classification {
    if let Some(tagged) = error.downcast_ref::<HandlerError>() {
        return Classification::new(tagged.error_type(), tagged.code());
    }

    if error.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return Classification::new(ErrorType::Transient, "TIMEOUT");
    }

    if let Some(io) = error.downcast_ref::<std::io::Error>() {
        match io.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::NotFound => {
                return Classification::new(ErrorType::Transient, "TIMEOUT");
            }
            _ => {}
        }
    }

    let message = error.to_string();

    if STALE_ELEMENT_PATTERNS.is_match(&message) {
        return Classification::new(ErrorType::Transient, "STALE_ELEMENT");
    }

    let lower = message.to_lowercase();
    if lower.contains("auth") || lower.contains("credential") {
        return Classification::new(ErrorType::Permanent, "AUTHENTICATION");
    }
    if lower.contains("notimplemented") || lower.contains("validation") {
        return Classification::new(ErrorType::Permanent, "VALIDATION");
    }
    if lower.contains("ratelimit") || lower.contains("rate limit") {
        return Classification::new(ErrorType::Retriable, "RATE_LIMIT");
    }
    if lower.contains("resource") {
        return Classification::new(ErrorType::Retriable, "RESOURCE_EXHAUSTED");
    }

    debug!(error = %message, "Unclassified failure, defaulting to RETRIABLE");
    Classification::new(ErrorType::Retriable, "UNKNOWN")
}

/// Derive a machine error code from an exception-style type name:
/// CamelCase becomes UPPER_SNAKE_CASE and a trailing `_EXCEPTION` or
/// `_ERROR` is stripped.
pub fn derive_error_code(name: &str) -> String {
    let mut code = String::with_capacity(name.len() + 8);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() && i != 0 {
            code.push('_');
        }
        code.push(ch.to_ascii_uppercase());
    }
    if let Some(stripped) = code.strip_suffix("_EXCEPTION") {
        return stripped.to_string();
    }
    if let Some(stripped) = code.strip_suffix("_ERROR") {
        return stripped.to_string();
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_error_uses_its_own_class() {
        let err = anyhow::Error::new(HandlerError::permanent("CAPTCHA_001", "captcha rejected"));
        let c = classify(&err);
        assert_eq!(c.error_type, ErrorType::Permanent);
        assert_eq!(c.error_code, "CAPTCHA_001");
    }

    #[test]
    fn test_stale_element_messages_are_transient() {
        for msg in [
            "Stale Element reference in frame",
            "the element is not attached to the page document",
            "element reference is stale; element no longer exists",
        ] {
            let c = classify(&anyhow::anyhow!("{}", msg));
            assert_eq!(c.error_type, ErrorType::Transient, "message: {msg}");
            assert_eq!(c.error_code, "STALE_ELEMENT");
        }
    }

    #[test]
    fn test_io_timeout_is_transient() {
        let err = anyhow::Error::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timed out",
        ));
        assert_eq!(classify(&err).error_type, ErrorType::Transient);
    }

    #[test]
    fn test_auth_message_is_permanent() {
        let c = classify(&anyhow::anyhow!("invalid credentials for portal user"));
        assert_eq!(c.error_type, ErrorType::Permanent);
        assert_eq!(c.error_code, "AUTHENTICATION");
    }

    #[test]
    fn test_resource_exhaustion_is_retriable_with_code() {
        let c = classify(&anyhow::anyhow!("resource pool exhausted, no browser slots"));
        assert_eq!(c.error_type, ErrorType::Retriable);
        assert_eq!(c.error_code, "RESOURCE_EXHAUSTED");
    }

    #[test]
    fn test_unknown_defaults_to_retriable() {
        let c = classify(&anyhow::anyhow!("something odd happened"));
        assert_eq!(c.error_type, ErrorType::Retriable);
        assert_eq!(c.error_code, "UNKNOWN");
    }

    #[test]
    fn test_derive_error_code_conversion() {
        assert_eq!(
            derive_error_code("StaleElementReferenceException"),
            "STALE_ELEMENT_REFERENCE"
        );
        assert_eq!(derive_error_code("AuthenticationError"), "AUTHENTICATION");
        assert_eq!(derive_error_code("Timeout"), "TIMEOUT");
        assert_eq!(derive_error_code("RateLimitError"), "RATE_LIMIT");
    }
}
