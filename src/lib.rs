pub mod api;
pub mod attempts;
pub mod auth;
pub mod cli;
pub mod db;
pub mod identity;
pub mod jwt;
pub mod password;
pub mod rate_limit;

use api::create_api_router;
use attempts::AttemptLimiter;
use auth::AuthBackend;
use axum::Router;
use db::Database;
use identity::IdentityResolver;
use jwt::JwtConfig;
use rate_limit::RateLimitConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Secret for signing access tokens
    pub access_secret: Vec<u8>,
    /// Secret for signing refresh tokens (must differ from the access secret)
    pub refresh_secret: Vec<u8>,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Upper bound on a single identity lookup
    pub lookup_timeout: Duration,
    /// bcrypt cost for new password hashes
    pub bcrypt_cost: u32,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    /// IP extraction strategy (requires running behind a proxy)
    pub ip_extractor: Option<cli::IpExtractor>,
    /// Failed-attempt limiter, shared by every instance of the gate
    pub attempt_limiter: Arc<dyn AttemptLimiter>,
    /// Request-rate quotas for the session endpoints
    pub rate_limits: RateLimitConfig,
}

/// Build the authentication backend described by the configuration.
pub fn create_auth_backend(config: &ServerConfig) -> AuthBackend {
    let jwt = JwtConfig::new(&config.access_secret, &config.refresh_secret)
        .with_ttls(config.access_token_ttl, config.refresh_token_ttl);
    let resolver = IdentityResolver::new(Arc::new(config.db.users()))
        .with_lookup_timeout(config.lookup_timeout);

    AuthBackend {
        jwt: Arc::new(jwt),
        resolver,
        attempt_limiter: config.attempt_limiter.clone(),
        ip_extractor: config.ip_extractor.clone(),
    }
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let api_router = create_api_router(
        create_auth_backend(config),
        config.db.clone(),
        config.bcrypt_cost,
        config.secure_cookies,
        &config.rate_limits,
    );

    Router::new().nest("/api", api_router)
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
