//! The auth gate run in front of every protected request.
//!
//! A request moves through `NoCredential → CredentialPresent → Verified →
//! Resolved → Admitted`; any step after the first may reject it. Only a
//! failed token verification charges the attempt limiter: a request without
//! any credential is not an attack signal.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

use super::cookie::credential_from_headers;
use super::errors::{AuthError, AuthErrorKind};
use super::ip::{HasHeadersAndExtensions, extract_client_ip};
use super::state::AuthBackend;
use crate::cli::IpExtractor;
use crate::identity::Identity;
use crate::jwt::TokenType;

/// Limiter key shared by every client whose address cannot be determined.
pub const UNIDENTIFIED_CLIENT: &str = "unidentified";

/// What the gate needs from a request, captured before any `.await` so the
/// request itself is never held across one.
#[derive(Debug, Clone)]
pub struct PresentedCredential {
    token: Option<String>,
    client: Option<String>,
}

impl PresentedCredential {
    pub fn from_request<T: HasHeadersAndExtensions>(
        source: &T,
        ip_extractor: Option<&IpExtractor>,
    ) -> Self {
        let client = match extract_client_ip(source, ip_extractor) {
            Ok(client) => Some(client),
            Err(e) => {
                debug!(error = e, "Client IP unavailable");
                None
            }
        };

        Self {
            token: credential_from_headers(source.headers()).map(str::to_owned),
            client,
        }
    }

    pub fn client(&self) -> Option<&str> {
        self.client.as_deref()
    }
}

/// Admit or reject a request, returning the resolved identity on success.
pub async fn authenticate(
    presented: &PresentedCredential,
    backend: &AuthBackend,
) -> Result<Identity, AuthError> {
    let Some(token) = presented.token.as_deref() else {
        debug!("Request without credential");
        return Err(AuthErrorKind::MissingCredential.into());
    };

    let claims = match backend.jwt.verify(token, TokenType::Access) {
        Ok(claims) => claims,
        Err(reason) => {
            return Err(charge_failed_attempt(
                presented.client(),
                backend,
                AuthErrorKind::InvalidToken(reason),
            )
            .await);
        }
    };

    match backend.resolver.resolve(&claims.sub, claims.iat).await {
        Ok(identity) => Ok(identity),
        Err(e) if e.is_operational() => {
            error!(subject = %claims.sub, error = %e, "Identity resolution failed");
            Err(AuthErrorKind::from(e).into())
        }
        Err(e) => {
            warn!(subject = %claims.sub, reason = %e, "Rejected verified token");
            Err(AuthErrorKind::from(e).into())
        }
    }
}

/// Record a failed attempt for `client`.
///
/// Returns `rejection` while the client is under the threshold and a
/// `RateLimited` error once the limiter refuses it. Clients without a known
/// address all draw on the [`UNIDENTIFIED_CLIENT`] bucket.
pub async fn charge_failed_attempt(
    client: Option<&str>,
    backend: &AuthBackend,
    rejection: AuthErrorKind,
) -> AuthError {
    let client = client.unwrap_or_else(|| {
        debug!("Charging failed attempt to the shared unidentified bucket");
        UNIDENTIFIED_CLIENT
    });

    if backend.attempt_limiter.permit(client).await {
        warn!(client = %client, ?rejection, "Rejected authentication attempt");
        rejection.into()
    } else {
        let retry_after = backend.attempt_limiter.window();
        warn!(
            client = %client,
            ?rejection,
            retry_after_secs = retry_after.as_secs(),
            "Client throttled after repeated failed attempts"
        );
        AuthErrorKind::RateLimited { retry_after }.into()
    }
}

/// Middleware that admits the request and attaches the identity to it.
pub async fn require_auth(
    State(backend): State<AuthBackend>,
    mut request: Request,
    next: Next,
) -> Response {
    let presented = PresentedCredential::from_request(&request, backend.ip_extractor.as_ref());
    match authenticate(&presented, &backend).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
