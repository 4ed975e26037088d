use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::state::AppState;

/// Validated bearer token extracted from `Authorization: Bearer <token>`.
///
/// Add this as a handler parameter to require authentication. A missing
/// header rejects with 403, a malformed or wrong token with 401.
pub struct AuthToken;

impl<S> FromRequestParts<S> for AuthToken
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::TokenMissing)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AppError::TokenInvalid)?;

        let app_state = AppState::from_ref(state);
        if !constant_time_eq(token, &app_state.config.api.bearer_token) {
            return Err(AppError::TokenInvalid);
        }

        Ok(AuthToken)
    }
}

/// Compare via fixed-size SHA-256 digests so the comparison leaks neither
/// length nor content timing.
fn constant_time_eq(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}
