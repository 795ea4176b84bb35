//! Session API endpoints.
//!
//! - POST `/login` - Exchange email and password for a token pair
//! - POST `/refresh` - Exchange a refresh token for a new token pair
//! - POST `/logout` - Clear the access cookie
//! - GET `/me` - Current identity
//! - PUT `/password` - Change password, invalidating every earlier token

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{
        HeaderName, StatusCode,
        header::{CACHE_CONTROL, PRAGMA, SET_COOKIE},
    },
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use super::error::{ApiError, ResultExt};
use crate::auth::{
    Auth, AuthBackend, AuthErrorKind, ClientIp, access_cookie, charge_failed_attempt,
    clear_access_cookie,
};
use crate::db::Database;
use crate::identity::{Identity, ResolveError};
use crate::impl_has_auth_backend;
use crate::jwt::{TokenPair, TokenType, unix_now};
use crate::password::{MIN_PASSWORD_LENGTH, hash_password, verify_password};
use crate::rate_limit::{EndpointLimiter, RateLimitConfig, rate_limit};

#[derive(Clone)]
pub struct SessionState {
    pub backend: AuthBackend,
    pub db: Database,
    pub bcrypt_cost: u32,
    pub secure_cookies: bool,
}

impl_has_auth_backend!(SessionState);

pub fn router(state: SessionState, rate_limits: &RateLimitConfig) -> Router {
    let ip_extractor = state.backend.ip_extractor.clone();

    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            EndpointLimiter::new(rate_limits.login, ip_extractor.clone()),
            rate_limit,
        ));

    let refresh_router = Router::new()
        .route("/refresh", post(refresh))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            EndpointLimiter::new(rate_limits.refresh, ip_extractor),
            rate_limit,
        ));

    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/password", put(change_password))
        .with_state(state)
        .merge(login_router)
        .merge(refresh_router)
}

#[derive(Deserialize)]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    current_password: Option<String>,
    new_password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    success: bool,
    token: String,
    refresh_token: String,
    expires_in: u64,
    user: Identity,
}

/// Token pair in the body, access token in a cookie, caching disabled.
fn session_response(
    pair: TokenPair,
    user: Identity,
    secure_cookies: bool,
) -> impl IntoResponse {
    let cookie = access_cookie(&pair.access.token, pair.access.duration, secure_cookies);
    let headers: [(HeaderName, String); 3] = [
        (SET_COOKIE, cookie),
        (CACHE_CONTROL, "no-store".to_string()),
        (PRAGMA, "no-cache".to_string()),
    ];

    (
        StatusCode::OK,
        headers,
        Json(SessionResponse {
            success: true,
            token: pair.access.token,
            refresh_token: pair.refresh.token,
            expires_in: pair.access.duration,
            user,
        }),
    )
}

/// Non-empty string field, trimmed when `trim` is set.
fn required(value: Option<String>, trim: bool) -> Option<String> {
    let value = value?;
    let value = if trim { value.trim().to_string() } else { value };
    (!value.is_empty()).then_some(value)
}

/// Account lookup bounded like identity resolution. Timing out is a 500.
async fn bounded_lookup<T, E: std::fmt::Display>(
    timeout: Duration,
    lookup: impl Future<Output = Result<T, E>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(timeout, lookup).await {
        Ok(result) => result.db_err("Failed to look up account"),
        Err(_) => {
            error!(
                timeout_ms = timeout.as_millis() as u64,
                "Account lookup timed out"
            );
            Err(ApiError::Internal)
        }
    }
}

async fn login(
    State(state): State<SessionState>,
    ClientIp(client): ClientIp,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) =
        payload.map_err(|_| ApiError::bad_request("Please provide an email and password"))?;
    let (Some(email), Some(password)) = (
        required(payload.email, true),
        required(payload.password, false),
    ) else {
        return Err(ApiError::bad_request("Please provide an email and password"));
    };

    let client = client.ok_or(AuthErrorKind::ClientUnknown)?;
    let limiter = &state.backend.attempt_limiter;

    // Checked before the password so a throttled client learns nothing.
    if limiter.is_blocked(&client).await {
        warn!(client = %client, "Login attempt from throttled client");
        return Err(AuthErrorKind::RateLimited {
            retry_after: limiter.window(),
        }
        .into());
    }

    let account = bounded_lookup(
        state.backend.resolver.lookup_timeout(),
        state.db.users().get_by_email(&email),
    )
    .await?;

    let verified = match &account {
        Some(account) if account.active => verify_password(&password, &account.password_hash)
            .await
            .internal_err("Failed to verify password")?,
        _ => false,
    };

    let Some(account) = account.filter(|_| verified) else {
        return Err(
            charge_failed_attempt(Some(&client), &state.backend, AuthErrorKind::BadCredentials)
                .await
                .into(),
        );
    };

    let pair = state
        .backend
        .jwt
        .issue_pair(&account.uuid)
        .internal_err("Failed to issue tokens")?;

    info!(subject = %account.uuid, client = %client, "Login succeeded");

    Ok(session_response(
        pair,
        Identity::from(account),
        state.secure_cookies,
    ))
}

async fn refresh(
    State(state): State<SessionState>,
    ClientIp(client): ClientIp,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let token = payload
        .ok()
        .and_then(|Json(payload)| required(payload.refresh_token, true))
        .ok_or(AuthErrorKind::MissingCredential)?;

    let backend = &state.backend;
    let claims = match backend.jwt.verify(&token, TokenType::Refresh) {
        Ok(claims) => claims,
        Err(reason) => {
            return Err(charge_failed_attempt(
                client.as_deref(),
                backend,
                AuthErrorKind::InvalidToken(reason),
            )
            .await
            .into());
        }
    };

    let identity = backend
        .resolver
        .resolve(&claims.sub, claims.iat)
        .await
        .map_err(|e| {
            warn!(subject = %claims.sub, reason = %e, "Refresh rejected");
            AuthErrorKind::from(e)
        })?;

    let pair = backend
        .jwt
        .issue_pair(&identity.id)
        .internal_err("Failed to issue tokens")?;

    Ok(session_response(pair, identity, state.secure_cookies))
}

async fn logout(State(state): State<SessionState>) -> impl IntoResponse {
    let headers: [(HeaderName, String); 3] = [
        (SET_COOKIE, clear_access_cookie(state.secure_cookies)),
        (CACHE_CONTROL, "no-store".to_string()),
        (PRAGMA, "no-cache".to_string()),
    ];
    (
        StatusCode::OK,
        headers,
        Json(serde_json::json!({ "success": true })),
    )
}

async fn me(auth: Auth) -> impl IntoResponse {
    Json(serde_json::json!({ "success": true, "user": auth.identity }))
}

async fn change_password(
    State(state): State<SessionState>,
    ClientIp(client): ClientIp,
    auth: Auth,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload
        .map_err(|_| ApiError::bad_request("Please provide the current and new password"))?;
    let (Some(current), Some(new_password)) = (
        required(payload.current_password, false),
        required(payload.new_password, false),
    ) else {
        return Err(ApiError::bad_request(
            "Please provide the current and new password",
        ));
    };

    if new_password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let users = state.db.users();
    let account = bounded_lookup(
        state.backend.resolver.lookup_timeout(),
        users.get_by_uuid(&auth.identity.id),
    )
    .await?
    .ok_or(AuthErrorKind::Unresolved(ResolveError::NotFound))?;

    let verified = verify_password(&current, &account.password_hash)
        .await
        .internal_err("Failed to verify password")?;
    if !verified {
        return Err(charge_failed_attempt(
            client.as_deref(),
            &state.backend,
            AuthErrorKind::BadCredentials,
        )
        .await
        .into());
    }

    let password_hash = hash_password(&new_password, state.bcrypt_cost)
        .await
        .internal_err("Failed to hash password")?;
    let changed_at = unix_now().internal_err("Failed to read clock")?;

    users
        .set_password(&account.uuid, &password_hash, changed_at)
        .await
        .db_err("Failed to update password")?;

    let pair = state
        .backend
        .jwt
        .issue_pair(&account.uuid)
        .internal_err("Failed to issue tokens")?;

    info!(subject = %account.uuid, "Password changed");

    let mut identity = Identity::from(account);
    identity.last_password_change = Some(changed_at);
    Ok(session_response(pair, identity, state.secure_cookies))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stalled_lookup_is_internal_error() {
        let stalled = std::future::pending::<Result<(), sqlx::Error>>();
        let result = bounded_lookup(Duration::from_millis(50), stalled).await;
        assert!(matches!(result, Err(ApiError::Internal)));
    }

    #[tokio::test]
    async fn test_lookup_errors_are_internal() {
        let failed = async { Err::<(), _>("disk I/O error") };
        let result = bounded_lookup(Duration::from_secs(1), failed).await;
        assert!(matches!(result, Err(ApiError::Internal)));

        let found = async { Ok::<_, String>(Some("uuid-1")) };
        let result = bounded_lookup(Duration::from_secs(1), found).await;
        assert!(matches!(result, Ok(Some("uuid-1"))));
    }
}
