//! Identity resolution for verified tokens.
//!
//! A signature alone does not keep a session alive: the account behind the
//! token must still exist, still be active, and must not have changed its
//! password after the token was issued.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single identity lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Role tag used for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// The authenticated principal. Never carries secret fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    /// Unix seconds of the last password change, if any.
    pub last_password_change: Option<u64>,
}

/// Failure reported by an identity store.
#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError(e.to_string())
    }
}

/// Account store collaborator. Only lookups by id are needed here.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError>;
}

/// Why a verified token did not resolve to an admissible identity.
#[derive(Debug, Clone)]
pub enum ResolveError {
    NotFound,
    Deactivated,
    /// Password changed after the token was issued
    StaleToken,
    /// The store failed (operational, not an auth failure)
    Store(StoreError),
    /// The store did not answer in time (operational, not an auth failure)
    Timeout,
}

impl ResolveError {
    /// Whether this is an infrastructure fault rather than a rejected identity.
    pub fn is_operational(&self) -> bool {
        matches!(self, ResolveError::Store(_) | ResolveError::Timeout)
    }
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::NotFound => write!(f, "identity not found"),
            ResolveError::Deactivated => write!(f, "identity deactivated"),
            ResolveError::StaleToken => write!(f, "token issued before last password change"),
            ResolveError::Store(e) => write!(f, "{}", e),
            ResolveError::Timeout => write!(f, "identity lookup timed out"),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Loads identities and decides whether a token may still speak for them.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
    lookup_timeout: Duration,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self {
            store,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    /// Bound applied to every account lookup.
    pub fn lookup_timeout(&self) -> Duration {
        self.lookup_timeout
    }

    /// Resolve `subject` for a token issued at `token_issued_at` (Unix seconds).
    pub async fn resolve(
        &self,
        subject: &str,
        token_issued_at: u64,
    ) -> Result<Identity, ResolveError> {
        let identity = tokio::time::timeout(self.lookup_timeout, self.store.find_by_id(subject))
            .await
            .map_err(|_| ResolveError::Timeout)?
            .map_err(ResolveError::Store)?
            .ok_or(ResolveError::NotFound)?;

        if !identity.is_active {
            return Err(ResolveError::Deactivated);
        }

        if identity
            .last_password_change
            .is_some_and(|changed_at| changed_at > token_issued_at)
        {
            return Err(ResolveError::StaleToken);
        }

        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[test]
    fn test_role_parse() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("user".parse::<Role>(), Ok(Role::User));
        assert!("root".parse::<Role>().is_err());
        assert!("Admin".parse::<Role>().is_err());
    }

    #[derive(Default)]
    struct MemoryStore {
        identities: Mutex<HashMap<String, Identity>>,
    }

    impl MemoryStore {
        fn insert(&self, identity: Identity) {
            self.identities.lock().insert(identity.id.clone(), identity);
        }
    }

    #[async_trait]
    impl IdentityStore for MemoryStore {
        async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError> {
            Ok(self.identities.lock().get(id).cloned())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl IdentityStore for FailingStore {
        async fn find_by_id(&self, _id: &str) -> Result<Option<Identity>, StoreError> {
            Err(StoreError("connection refused".into()))
        }
    }

    struct HangingStore;

    #[async_trait]
    impl IdentityStore for HangingStore {
        async fn find_by_id(&self, _id: &str) -> Result<Option<Identity>, StoreError> {
            std::future::pending().await
        }
    }

    fn alice() -> Identity {
        Identity {
            id: "uuid-alice".to_string(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            role: Role::User,
            is_active: true,
            last_password_change: None,
        }
    }

    fn resolver_with(identity: Identity) -> (Arc<MemoryStore>, IdentityResolver) {
        let store = Arc::new(MemoryStore::default());
        store.insert(identity);
        let resolver = IdentityResolver::new(store.clone());
        (store, resolver)
    }

    #[tokio::test]
    async fn test_resolves_active_identity() {
        let (_store, resolver) = resolver_with(alice());
        let identity = resolver.resolve("uuid-alice", 1_000).await.unwrap();
        assert_eq!(identity, alice());
    }

    #[tokio::test]
    async fn test_unknown_identity() {
        let (_store, resolver) = resolver_with(alice());
        let result = resolver.resolve("uuid-bob", 1_000).await;
        assert!(matches!(result, Err(ResolveError::NotFound)));
    }

    #[tokio::test]
    async fn test_deactivated_identity() {
        let (_store, resolver) = resolver_with(Identity {
            is_active: false,
            ..alice()
        });
        let result = resolver.resolve("uuid-alice", 1_000).await;
        assert!(matches!(result, Err(ResolveError::Deactivated)));
    }

    #[tokio::test]
    async fn test_password_change_invalidates_older_tokens() {
        let (store, resolver) = resolver_with(alice());
        let issued_at = 1_000;
        assert!(resolver.resolve("uuid-alice", issued_at).await.is_ok());

        store.insert(Identity {
            last_password_change: Some(issued_at + 1),
            ..alice()
        });

        let result = resolver.resolve("uuid-alice", issued_at).await;
        assert!(matches!(result, Err(ResolveError::StaleToken)));

        // Tokens issued at or after the change stay valid.
        assert!(resolver.resolve("uuid-alice", issued_at + 1).await.is_ok());
        assert!(resolver.resolve("uuid-alice", issued_at + 60).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_is_operational() {
        let resolver = IdentityResolver::new(Arc::new(FailingStore));
        let err = resolver.resolve("uuid-alice", 1_000).await.unwrap_err();
        assert!(matches!(err, ResolveError::Store(_)));
        assert!(err.is_operational());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_is_bounded() {
        let resolver = IdentityResolver::new(Arc::new(HangingStore))
            .with_lookup_timeout(Duration::from_millis(50));
        let err = resolver.resolve("uuid-alice", 1_000).await.unwrap_err();
        assert!(matches!(err, ResolveError::Timeout));
        assert!(err.is_operational());
    }
}
