//! Admin API endpoints.
//!
//! All endpoints require admin role.

use axum::{
    Json, Router,
    extract::{Path, State},
    middleware,
    response::IntoResponse,
    routing::{get, patch},
};
use serde::Deserialize;
use tracing::info;

use super::error::{ApiError, ResultExt, validate_uuid};
use crate::auth::{AdminOnly, Auth, AuthBackend, require_auth};
use crate::db::Database;
use crate::identity::Identity;
use crate::impl_has_auth_backend;

/// State for admin endpoints.
#[derive(Clone)]
pub struct AdminState {
    pub backend: AuthBackend,
    pub db: Database,
}

impl_has_auth_backend!(AdminState);

pub fn router(state: AdminState) -> Router {
    let backend = state.backend.clone();
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}", patch(update_user))
        .with_state(state)
        .layer(middleware::from_fn_with_state(backend, require_auth))
}

/// List all accounts.
async fn list_users(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .users()
        .list()
        .await
        .db_err("Failed to list users")?;

    Ok(Json(serde_json::json!({ "success": true, "users": users })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUserRequest {
    is_active: bool,
}

/// Suspend or reactivate an account.
async fn update_user(
    State(state): State<AdminState>,
    auth: Auth<AdminOnly>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_uuid(&id)?;

    if id == auth.identity.id && !payload.is_active {
        return Err(ApiError::bad_request("Cannot deactivate your own account"));
    }

    let users = state.db.users();
    let updated = users
        .set_active(&id, payload.is_active)
        .await
        .db_err("Failed to update user")?;
    if !updated {
        return Err(ApiError::not_found("User not found"));
    }

    let user = users
        .get_by_uuid(&id)
        .await
        .db_err("Failed to get user")?
        .map(Identity::from)
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!(
        admin = %auth.identity.id,
        subject = %user.id,
        active = user.is_active,
        "Account status changed"
    );

    Ok(Json(serde_json::json!({ "success": true, "user": user })))
}
