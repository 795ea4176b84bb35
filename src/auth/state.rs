//! Authentication backend shared by the gate, extractors and handlers.

use std::sync::Arc;

use crate::attempts::AttemptLimiter;
use crate::cli::IpExtractor;
use crate::identity::IdentityResolver;
use crate::jwt::JwtConfig;

/// Everything needed to admit or reject a request.
/// Built once at startup; cloning shares the underlying components.
#[derive(Clone)]
pub struct AuthBackend {
    pub jwt: Arc<JwtConfig>,
    pub resolver: IdentityResolver,
    pub attempt_limiter: Arc<dyn AttemptLimiter>,
    pub ip_extractor: Option<IpExtractor>,
}

/// Trait for state types that can authenticate requests.
pub trait HasAuthBackend {
    fn auth_backend(&self) -> &AuthBackend;
}

impl HasAuthBackend for AuthBackend {
    fn auth_backend(&self) -> &AuthBackend {
        self
    }
}

/// Macro to implement `HasAuthBackend` for state structs with a `backend: AuthBackend` field.
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// pub struct MyState {
///     pub backend: AuthBackend,
///     // ... other fields
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn auth_backend(&self) -> &$crate::auth::AuthBackend {
                &self.backend
            }
        }
    };
}
