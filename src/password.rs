//! Password hashing for the bundled account store.
//!
//! bcrypt is CPU-bound, so both operations run on the blocking pool.

/// Shortest password accepted for a new or changed password.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Hash a password with the given bcrypt cost.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|_| PasswordError::TaskFailed)?
        .map_err(PasswordError::Bcrypt)
}

/// Check a password against a stored bcrypt hash.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|_| PasswordError::TaskFailed)?
        .map_err(PasswordError::Bcrypt)
}

#[derive(Debug)]
pub enum PasswordError {
    Bcrypt(bcrypt::BcryptError),
    TaskFailed,
}

impl std::fmt::Display for PasswordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordError::Bcrypt(e) => write!(f, "Password hashing failed: {}", e),
            PasswordError::TaskFailed => write!(f, "Password hashing task failed"),
        }
    }
}

impl std::error::Error for PasswordError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hash = hash_password("correct horse", 4).await.unwrap();
        assert!(verify_password("correct horse", &hash).await.unwrap());
        assert!(!verify_password("battery staple", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-hash").await.is_err());
    }
}
