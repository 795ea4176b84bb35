//! Authentication error types.
//!
//! The gate keeps the precise rejection reason for logging; the
//! `IntoResponse` impl is the one place it gets reduced to what a client may
//! see.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::identity::ResolveError;
use crate::jwt::TokenError;

pub const NOT_AUTHORIZED_MESSAGE: &str = "Not authorized to access this route";
pub const INVALID_CREDENTIAL_MESSAGE: &str = "Not authorized, token invalid or expired";
pub const BAD_LOGIN_MESSAGE: &str = "Invalid credentials";
pub const RATE_LIMITED_MESSAGE: &str =
    "Too many authentication attempts, please try again later";
pub const ACCESS_DENIED_MESSAGE: &str = "Access denied: insufficient permissions";

/// Internal auth error kind used by the core authentication logic.
#[derive(Debug)]
pub enum AuthErrorKind {
    /// No bearer header and no access cookie
    MissingCredential,
    /// Token failed verification
    InvalidToken(TokenError),
    /// Token verified but its identity is gone, suspended, or outdated
    Unresolved(ResolveError),
    /// Wrong email or password at login
    BadCredentials,
    /// Attempt limiter refused the client
    RateLimited { retry_after: Duration },
    /// Admitted identity lacks the required role
    InsufficientRole,
    /// Client address could not be determined
    ClientUnknown,
    /// Operational fault (store down, signing failure)
    Internal(String),
}

impl From<ResolveError> for AuthErrorKind {
    fn from(e: ResolveError) -> Self {
        if e.is_operational() {
            AuthErrorKind::Internal(e.to_string())
        } else {
            AuthErrorKind::Unresolved(e)
        }
    }
}

/// API authentication error (returns JSON).
#[derive(Debug)]
pub struct AuthError {
    kind: AuthErrorKind,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &AuthErrorKind {
        &self.kind
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            AuthErrorKind::MissingCredential
            | AuthErrorKind::InvalidToken(_)
            | AuthErrorKind::Unresolved(_)
            | AuthErrorKind::BadCredentials => StatusCode::UNAUTHORIZED,
            AuthErrorKind::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthErrorKind::InsufficientRole | AuthErrorKind::ClientUnknown => {
                StatusCode::FORBIDDEN
            }
            AuthErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::MissingCredential => NOT_AUTHORIZED_MESSAGE,
            AuthErrorKind::InvalidToken(_) | AuthErrorKind::Unresolved(_) => {
                INVALID_CREDENTIAL_MESSAGE
            }
            AuthErrorKind::BadCredentials => BAD_LOGIN_MESSAGE,
            AuthErrorKind::RateLimited { .. } => RATE_LIMITED_MESSAGE,
            AuthErrorKind::InsufficientRole => ACCESS_DENIED_MESSAGE,
            AuthErrorKind::ClientUnknown => "Unable to determine client IP",
            AuthErrorKind::Internal(_) => "Internal server error",
        }
    }
}

impl From<AuthErrorKind> for AuthError {
    fn from(kind: AuthErrorKind) -> Self {
        Self::new(kind)
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            AuthErrorKind::InvalidToken(reason) => write!(f, "invalid token: {}", reason),
            AuthErrorKind::Unresolved(reason) => write!(f, "unresolved identity: {}", reason),
            AuthErrorKind::Internal(detail) => write!(f, "internal error: {}", detail),
            _ => f.write_str(self.message()),
        }
    }
}

impl std::error::Error for AuthError {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    success: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let retry_after = match self.kind {
            AuthErrorKind::RateLimited { retry_after } => Some(retry_after.as_secs()),
            _ => None,
        };

        let mut response = (
            self.status_code(),
            Json(ErrorResponse {
                success: false,
                message: self.message(),
                retry_after,
            }),
        )
            .into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_token_and_identity_failures_look_identical() {
        let kinds = [
            AuthErrorKind::InvalidToken(TokenError::Expired),
            AuthErrorKind::InvalidToken(TokenError::SignatureInvalid),
            AuthErrorKind::InvalidToken(TokenError::TypeMismatch),
            AuthErrorKind::Unresolved(ResolveError::NotFound),
            AuthErrorKind::Unresolved(ResolveError::Deactivated),
            AuthErrorKind::Unresolved(ResolveError::StaleToken),
        ];

        for kind in kinds {
            let response = AuthError::new(kind).into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                body_json(response).await,
                serde_json::json!({ "success": false, "message": INVALID_CREDENTIAL_MESSAGE })
            );
        }
    }

    #[tokio::test]
    async fn test_rate_limited_carries_retry_hint() {
        let response = AuthError::new(AuthErrorKind::RateLimited {
            retry_after: Duration::from_secs(900),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "900");
        let body = body_json(response).await;
        assert_eq!(body["retryAfter"], 900);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_operational_resolution_failure_is_500() {
        let kind = AuthErrorKind::from(ResolveError::Timeout);
        let response = AuthError::new(kind).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let kind = AuthErrorKind::from(ResolveError::Deactivated);
        assert!(matches!(kind, AuthErrorKind::Unresolved(_)));
    }

    #[tokio::test]
    async fn test_missing_credential_and_role_messages() {
        let response = AuthError::new(AuthErrorKind::MissingCredential).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["message"], NOT_AUTHORIZED_MESSAGE);

        let response = AuthError::new(AuthErrorKind::InsufficientRole).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["message"], ACCESS_DENIED_MESSAGE);
    }
}
