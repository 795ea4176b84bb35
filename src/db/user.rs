use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use crate::identity::{Identity, IdentityStore, Role, StoreError};

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// Stored account, including the password hash. Only login and password
/// change ever see this; everything else works with [`Identity`].
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    pub password_changed_at: Option<u64>,
}

impl From<Account> for Identity {
    fn from(account: Account) -> Self {
        Self {
            id: account.uuid,
            name: account.name,
            email: account.email,
            role: account.role,
            is_active: account.active,
            last_password_change: account.password_changed_at,
        }
    }
}

/// Fields for creating an account.
pub struct NewAccount<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    uuid: String,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    active: i32,
    password_changed_at: Option<i64>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role.parse().unwrap_or(Role::User),
            active: row.active != 0,
            password_changed_at: row.password_changed_at.map(|t| t.max(0) as u64),
        }
    }
}

/// `SELECT` over every account column followed by the given clause.
macro_rules! select_accounts {
    ($clause:literal) => {
        concat!(
            "SELECT id, uuid, name, email, password_hash, role, active, password_changed_at FROM users ",
            $clause
        )
    };
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an active account. Returns the new account's UUID.
    pub async fn create(&self, account: NewAccount<'_>) -> Result<String, sqlx::Error> {
        let uuid = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO users (uuid, name, email, password_hash, role) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid.as_str())
        .bind(account.name)
        .bind(account.email)
        .bind(account.password_hash)
        .bind(account.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(uuid)
    }

    /// Get an account by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<Account>, sqlx::Error> {
        let row: Option<AccountRow> = sqlx::query_as(select_accounts!("WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    /// Get an account by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Account>, sqlx::Error> {
        let row: Option<AccountRow> = sqlx::query_as(select_accounts!("WHERE uuid = ?"))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Account::from))
    }

    /// Suspend or reactivate an account.
    pub async fn set_active(&self, uuid: &str, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET active = ? WHERE uuid = ?")
            .bind(active as i32)
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the password hash and record when it changed (Unix seconds).
    pub async fn set_password(
        &self,
        uuid: &str,
        password_hash: &str,
        changed_at: u64,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE users SET password_hash = ?, password_changed_at = ? WHERE uuid = ?")
                .bind(password_hash)
                .bind(changed_at as i64)
                .bind(uuid)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the role for an account.
    pub async fn set_role(&self, uuid: &str, role: Role) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE uuid = ?")
            .bind(role.as_str())
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List all accounts (for the admin dashboard), oldest first.
    pub async fn list(&self) -> Result<Vec<Identity>, sqlx::Error> {
        let rows: Vec<AccountRow> = sqlx::query_as(select_accounts!("ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Identity::from(Account::from(row)))
            .collect())
    }
}

#[async_trait]
impl IdentityStore for UserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.get_by_uuid(id).await?.map(Identity::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn store() -> UserStore {
        Database::open(":memory:").await.unwrap().users()
    }

    fn new_account<'a>(email: &'a str) -> NewAccount<'a> {
        NewAccount {
            name: "Alice",
            email,
            password_hash: "hash",
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let users = store().await;
        let uuid = users.create(new_account("alice@example.com")).await.unwrap();

        let by_email = users.get_by_email("ALICE@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.uuid, uuid);
        assert!(by_email.active);
        assert_eq!(by_email.password_changed_at, None);

        let identity = users.find_by_id(&uuid).await.unwrap().unwrap();
        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(identity.role, Role::User);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let users = store().await;
        users.create(new_account("alice@example.com")).await.unwrap();
        assert!(users.create(new_account("alice@example.com")).await.is_err());
    }

    #[tokio::test]
    async fn test_set_active_and_password() {
        let users = store().await;
        let uuid = users.create(new_account("alice@example.com")).await.unwrap();

        assert!(users.set_active(&uuid, false).await.unwrap());
        assert!(!users.find_by_id(&uuid).await.unwrap().unwrap().is_active);

        assert!(users.set_password(&uuid, "new-hash", 1_700_000_000).await.unwrap());
        let account = users.get_by_uuid(&uuid).await.unwrap().unwrap();
        assert_eq!(account.password_hash, "new-hash");
        assert_eq!(account.password_changed_at, Some(1_700_000_000));

        assert!(!users.set_active("missing", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_identity() {
        let users = store().await;
        assert!(users.find_by_id("missing").await.unwrap().is_none());
    }
}
