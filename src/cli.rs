//! CLI argument parsing, validation, and startup helpers.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use url::Url;

use crate::ServerConfig;
use crate::attempts::InMemoryAttemptLimiter;
use crate::db::{Database, NewAccount};
use crate::identity::Role;
use crate::password::{MIN_PASSWORD_LENGTH, PasswordError, hash_password};
use crate::rate_limit::RateLimitConfig;

const MIN_SECRET_LENGTH: usize = 32;

const ACCESS_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
const REFRESH_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";
const ADMIN_PASSWORD_ENV: &str = "ADMIN_PASSWORD";

const ADMIN_DISPLAY_NAME: &str = "Administrator";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Proxy header carrying the client address.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    XForwardedFor,
    XRealIp,
    CfConnectingIp,
}

impl ClientIpHeader {
    pub fn header_name(&self) -> &'static str {
        match self {
            ClientIpHeader::XForwardedFor => "x-forwarded-for",
            ClientIpHeader::XRealIp => "x-real-ip",
            ClientIpHeader::CfConnectingIp => "cf-connecting-ip",
        }
    }
}

/// Strategy for reading the client IP from a trusted proxy header.
#[derive(Clone, Debug)]
pub struct IpExtractor {
    pub header: ClientIpHeader,
}

impl From<ClientIpHeader> for IpExtractor {
    fn from(header: ClientIpHeader) -> Self {
        Self { header }
    }
}

impl IpExtractor {
    pub fn header_name(&self) -> &'static str {
        self.header.header_name()
    }

    /// Parse the client IP out of the configured header's value.
    /// For `X-Forwarded-For` the last hop is used: it is the one our proxy appended.
    pub fn extract(&self, value: &str) -> Result<String, &'static str> {
        let candidate = match self.header {
            ClientIpHeader::XForwardedFor => value.rsplit(',').next().unwrap_or_default(),
            ClientIpHeader::XRealIp | ClientIpHeader::CfConnectingIp => value,
        }
        .trim();

        if candidate.is_empty() {
            return Err("IP header is empty");
        }

        candidate
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header does not contain a valid address")
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "portfolio-auth",
    about = "Session authentication and attempt throttling service"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "portfolio.db")]
    pub database: String,

    /// Public origin of the service (https enables Secure cookies)
    #[arg(long, default_value = "http://localhost:7291")]
    pub public_origin: String,

    /// Path to file containing the access token secret. Prefer ACCESS_TOKEN_SECRET
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer REFRESH_TOKEN_SECRET
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = crate::jwt::ACCESS_TOKEN_DURATION_SECS,
        value_parser = clap::value_parser!(u64).range(1..))]
    pub access_token_ttl: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, default_value_t = crate::jwt::REFRESH_TOKEN_DURATION_SECS,
        value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_token_ttl: u64,

    /// Upper bound on a single identity lookup, in milliseconds
    #[arg(long, default_value = "2000",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub lookup_timeout_ms: u64,

    /// bcrypt cost used when hashing new passwords
    #[arg(long, default_value_t = bcrypt::DEFAULT_COST,
        value_parser = clap::value_parser!(u32).range(4..=31))]
    pub bcrypt_cost: u32,

    /// Read the client IP from this proxy header instead of the socket address
    #[arg(long, value_enum)]
    pub ip_header: Option<ClientIpHeader>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Create an admin account with this email (password from ADMIN_PASSWORD),
    /// or promote the existing account, then keep serving
    #[arg(long, value_name = "EMAIL")]
    pub create_admin: Option<String>,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load one secret from an environment variable or a file.
/// Returns None and logs an error if the secret cannot be loaded.
fn load_secret(env_var: &str, file: Option<&str>, file_flag: &str) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            "{} is required. Set the environment variable (recommended) or use {}",
            env_var, file_flag
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "{} is shorter than {} characters. Use a longer secret",
            env_var, MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Load the access and refresh signing secrets.
/// The two must differ so a leaked refresh secret cannot mint access tokens.
pub fn load_signing_secrets(
    access_secret_file: Option<&str>,
    refresh_secret_file: Option<&str>,
) -> Option<(String, String)> {
    let access = load_secret(ACCESS_SECRET_ENV, access_secret_file, "--access-secret-file")?;
    let refresh = load_secret(
        REFRESH_SECRET_ENV,
        refresh_secret_file,
        "--refresh-secret-file",
    )?;

    if access == refresh {
        error!(
            "{} and {} must differ",
            ACCESS_SECRET_ENV, REFRESH_SECRET_ENV
        );
        return None;
    }

    Some((access, refresh))
}

/// Parse and validate the public origin URL.
/// Returns None and logs an error if validation fails.
pub fn validate_public_origin(public_origin: &str) -> Option<Url> {
    let url = match Url::parse(public_origin) {
        Ok(url) => url,
        Err(e) => {
            error!(origin = %public_origin, error = %e, "Invalid public-origin URL");
            return None;
        }
    };

    let is_https = url.scheme() == "https";
    let is_localhost = url.host_str() == Some("localhost");

    if !is_https && !is_localhost {
        error!("public-origin must use HTTPS for non-localhost deployments");
        return None;
    }

    Some(url)
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    public_origin: &Url,
    secrets: (String, String),
) -> ServerConfig {
    let (access_secret, refresh_secret) = secrets;

    ServerConfig {
        db,
        access_secret: access_secret.into_bytes(),
        refresh_secret: refresh_secret.into_bytes(),
        access_token_ttl: Duration::from_secs(args.access_token_ttl),
        refresh_token_ttl: Duration::from_secs(args.refresh_token_ttl),
        lookup_timeout: Duration::from_millis(args.lookup_timeout_ms),
        bcrypt_cost: args.bcrypt_cost,
        secure_cookies: public_origin.scheme() == "https",
        ip_extractor: args.ip_header.map(IpExtractor::from),
        attempt_limiter: Arc::new(InMemoryAttemptLimiter::default()),
        rate_limits: RateLimitConfig::default(),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

/// What [`provision_admin`] did to the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminProvisioned {
    Created { uuid: String },
    Promoted { uuid: String },
}

#[derive(Debug)]
pub enum ProvisionError {
    InvalidEmail,
    MissingPassword,
    PasswordTooShort,
    Hash(PasswordError),
    Database(sqlx::Error),
}

impl std::fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionError::InvalidEmail => write!(f, "Admin email is not a valid address"),
            ProvisionError::MissingPassword => write!(
                f,
                "{} is required to create a new admin account",
                ADMIN_PASSWORD_ENV
            ),
            ProvisionError::PasswordTooShort => write!(
                f,
                "{} must be at least {} characters",
                ADMIN_PASSWORD_ENV, MIN_PASSWORD_LENGTH
            ),
            ProvisionError::Hash(e) => write!(f, "{}", e),
            ProvisionError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for ProvisionError {}

impl From<sqlx::Error> for ProvisionError {
    fn from(e: sqlx::Error) -> Self {
        ProvisionError::Database(e)
    }
}

/// Make `email` an active admin.
///
/// An existing account is promoted and reactivated with its password kept;
/// otherwise a new account is created and `password` is required.
pub async fn provision_admin(
    db: &Database,
    email: &str,
    password: Option<&str>,
    bcrypt_cost: u32,
) -> Result<AdminProvisioned, ProvisionError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ProvisionError::InvalidEmail);
    }

    let users = db.users();
    if let Some(account) = users.get_by_email(email).await? {
        users.set_role(&account.uuid, Role::Admin).await?;
        users.set_active(&account.uuid, true).await?;
        return Ok(AdminProvisioned::Promoted { uuid: account.uuid });
    }

    let password = password.ok_or(ProvisionError::MissingPassword)?;
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ProvisionError::PasswordTooShort);
    }

    let password_hash = hash_password(password, bcrypt_cost)
        .await
        .map_err(ProvisionError::Hash)?;
    let uuid = users
        .create(NewAccount {
            name: ADMIN_DISPLAY_NAME,
            email,
            password_hash: &password_hash,
            role: Role::Admin,
        })
        .await?;

    Ok(AdminProvisioned::Created { uuid })
}

/// Handle `--create-admin`: read ADMIN_PASSWORD and provision the account.
/// Returns false and logs an error if provisioning fails.
pub async fn handle_create_admin(db: &Database, email: &str, bcrypt_cost: u32) -> bool {
    let password = std::env::var(ADMIN_PASSWORD_ENV).ok();
    if password.is_some() {
        // SAFETY: Still single-threaded startup; nothing else reads this variable.
        unsafe { std::env::remove_var(ADMIN_PASSWORD_ENV) };
    }

    match provision_admin(db, email, password.as_deref(), bcrypt_cost).await {
        Ok(AdminProvisioned::Created { uuid }) => {
            info!(email = %email.trim(), uuid = %uuid, "Admin account created");
            true
        }
        Ok(AdminProvisioned::Promoted { uuid }) => {
            info!(email = %email.trim(), uuid = %uuid, "Existing account promoted to admin");
            true
        }
        Err(e) => {
            error!(error = %e, "Failed to create admin user");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_uses_last_hop() {
        let extractor = IpExtractor::from(ClientIpHeader::XForwardedFor);
        assert_eq!(
            extractor.extract("203.0.113.7, 10.0.0.1, 198.51.100.2").unwrap(),
            "198.51.100.2"
        );
        assert_eq!(extractor.extract(" 2001:db8::1 ").unwrap(), "2001:db8::1");
    }

    #[test]
    fn test_single_value_headers() {
        let extractor = IpExtractor::from(ClientIpHeader::XRealIp);
        assert_eq!(extractor.extract("203.0.113.7").unwrap(), "203.0.113.7");
        assert_eq!(extractor.header_name(), "x-real-ip");
    }

    #[test]
    fn test_invalid_header_values() {
        let extractor = IpExtractor::from(ClientIpHeader::CfConnectingIp);
        assert!(extractor.extract("").is_err());
        assert!(extractor.extract("not-an-ip").is_err());

        let extractor = IpExtractor::from(ClientIpHeader::XForwardedFor);
        assert!(extractor.extract("203.0.113.7, ").is_err());
    }

    #[test]
    fn test_public_origin_validation() {
        assert!(validate_public_origin("https://example.com").is_some());
        assert!(validate_public_origin("http://localhost:7291").is_some());
        assert!(validate_public_origin("http://example.com").is_none());
        assert!(validate_public_origin("not a url").is_none());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["portfolio-auth"]);
        assert_eq!(args.port, 7291);
        assert_eq!(args.access_token_ttl, crate::jwt::ACCESS_TOKEN_DURATION_SECS);
        assert_eq!(args.refresh_token_ttl, crate::jwt::REFRESH_TOKEN_DURATION_SECS);
        assert!(args.ip_header.is_none());

        let args = Args::parse_from(["portfolio-auth", "--ip-header", "x-forwarded-for"]);
        assert_eq!(args.ip_header, Some(ClientIpHeader::XForwardedFor));
    }

    #[test]
    fn test_zero_ttl_rejected_at_parse_time() {
        assert!(Args::try_parse_from(["portfolio-auth", "--access-token-ttl", "0"]).is_err());
        assert!(Args::try_parse_from(["portfolio-auth", "--lookup-timeout-ms", "0"]).is_err());

        let args = Args::parse_from(["portfolio-auth", "--lookup-timeout-ms", "1"]);
        assert_eq!(args.lookup_timeout_ms, 1);
    }

    #[test]
    fn test_create_admin_flag() {
        let args = Args::parse_from(["portfolio-auth"]);
        assert!(args.create_admin.is_none());

        let args = Args::parse_from(["portfolio-auth", "--create-admin", "root@example.com"]);
        assert_eq!(args.create_admin.as_deref(), Some("root@example.com"));
    }

    #[tokio::test]
    async fn test_provision_admin_creates_account() {
        let db = Database::open(":memory:").await.unwrap();

        let provisioned = provision_admin(&db, "root@example.com", Some("long enough"), 4)
            .await
            .unwrap();
        let uuid = match provisioned {
            AdminProvisioned::Created { uuid } => uuid,
            other => panic!("Expected a new account, got {:?}", other),
        };

        let account = db.users().get_by_uuid(&uuid).await.unwrap().unwrap();
        assert_eq!(account.email, "root@example.com");
        assert_eq!(account.role, Role::Admin);
        assert!(account.active);
        assert!(
            crate::password::verify_password("long enough", &account.password_hash)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_provision_admin_promotes_existing_account() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();
        let uuid = users
            .create(NewAccount {
                name: "Alice",
                email: "alice@example.com",
                password_hash: "existing-hash",
                role: Role::User,
            })
            .await
            .unwrap();
        users.set_active(&uuid, false).await.unwrap();

        let provisioned = provision_admin(&db, "alice@example.com", None, 4)
            .await
            .unwrap();
        assert_eq!(provisioned, AdminProvisioned::Promoted { uuid: uuid.clone() });

        let account = users.get_by_uuid(&uuid).await.unwrap().unwrap();
        assert_eq!(account.role, Role::Admin);
        assert!(account.active);
        assert_eq!(account.password_hash, "existing-hash");
        assert_eq!(users.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provision_admin_rejects_bad_input() {
        let db = Database::open(":memory:").await.unwrap();

        let err = provision_admin(&db, "root@example.com", None, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MissingPassword));

        let err = provision_admin(&db, "root@example.com", Some("short"), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PasswordTooShort));

        let err = provision_admin(&db, "not-an-email", Some("long enough"), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidEmail));

        assert!(db.users().list().await.unwrap().is_empty());
    }
}
