mod admin;
mod error;
mod session;

use axum::Router;

use crate::auth::AuthBackend;
use crate::db::Database;
use crate::rate_limit::RateLimitConfig;

pub use admin::AdminState;
pub use error::{ApiError, ResultExt};
pub use session::SessionState;

/// Create the API router.
pub fn create_api_router(
    backend: AuthBackend,
    db: Database,
    bcrypt_cost: u32,
    secure_cookies: bool,
    rate_limits: &RateLimitConfig,
) -> Router {
    let session_state = session::SessionState {
        backend: backend.clone(),
        db: db.clone(),
        bcrypt_cost,
        secure_cookies,
    };

    let admin_state = admin::AdminState { backend, db };

    Router::new()
        .nest("/auth", session::router(session_state, rate_limits))
        .nest("/admin", admin::router(admin_state))
}
