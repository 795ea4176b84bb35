//! Axum extractors for authentication.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use super::errors::{AuthError, AuthErrorKind};
use super::gate::{PresentedCredential, authenticate};
use super::ip::extract_client_ip;
use super::state::HasAuthBackend;
use crate::identity::{Identity, Role};

/// Compile-time role requirement for [`Auth`].
pub trait RoleConstraint {
    fn permits(role: Role) -> bool;
}

/// Any admitted identity.
pub struct AnyRole;

impl RoleConstraint for AnyRole {
    fn permits(_role: Role) -> bool {
        true
    }
}

/// Admins only.
pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    fn permits(role: Role) -> bool {
        role == Role::Admin
    }
}

/// Extractor for endpoints that require an admitted identity.
///
/// Reuses the identity attached by the `require_auth` middleware when present,
/// otherwise runs the gate itself. Then applies the role constraint `R`.
pub struct Auth<R: RoleConstraint = AnyRole> {
    pub identity: Identity,
    _role: PhantomData<fn() -> R>,
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let identity = match parts.extensions.get::<Identity>() {
            Some(identity) => identity.clone(),
            None => {
                let backend = state.auth_backend();
                let presented =
                    PresentedCredential::from_request(&*parts, backend.ip_extractor.as_ref());
                let identity = authenticate(&presented, backend).await?;
                parts.extensions.insert(identity.clone());
                identity
            }
        };

        if !R::permits(identity.role) {
            warn!(subject = %identity.id, role = identity.role.as_str(), "Insufficient role");
            return Err(AuthErrorKind::InsufficientRole.into());
        }

        Ok(Auth {
            identity,
            _role: PhantomData,
        })
    }
}

/// Client address per the configured strategy; `None` when it cannot be determined.
pub struct ClientIp(pub Option<String>);

impl<S> FromRequestParts<S> for ClientIp
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ip_extractor = state.auth_backend().ip_extractor.as_ref();
        Ok(ClientIp(extract_client_ip(&*parts, ip_extractor).ok()))
    }
}
