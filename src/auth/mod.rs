//! JWT authentication with role-based access control.
//!
//! Dual-token system: short-lived access tokens checked by the gate on every
//! protected request, and long-lived refresh tokens only accepted by the
//! refresh endpoint. Both die when the account's password changes.

mod cookie;
mod errors;
mod extractors;
mod gate;
mod ip;
mod state;

pub use cookie::{
    ACCESS_COOKIE_NAME, access_cookie, bearer_token, clear_access_cookie,
    credential_from_headers, get_cookie,
};
pub use errors::{
    ACCESS_DENIED_MESSAGE, AuthError, AuthErrorKind, BAD_LOGIN_MESSAGE,
    INVALID_CREDENTIAL_MESSAGE, NOT_AUTHORIZED_MESSAGE, RATE_LIMITED_MESSAGE,
};
pub use extractors::{AdminOnly, AnyRole, Auth, ClientIp, RoleConstraint};
pub use gate::{
    PresentedCredential, UNIDENTIFIED_CLIENT, authenticate, charge_failed_attempt, require_auth,
};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use state::{AuthBackend, HasAuthBackend};
