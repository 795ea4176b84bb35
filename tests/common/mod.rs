#![allow(dead_code)]

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, Response, header};
use governor::Quota;
use portfolio_auth::attempts::InMemoryAttemptLimiter;
use portfolio_auth::cli::{ClientIpHeader, IpExtractor};
use portfolio_auth::db::{Database, NewAccount};
use portfolio_auth::identity::Role;
use portfolio_auth::password::hash_password;
use portfolio_auth::rate_limit::RateLimitConfig;
use portfolio_auth::{ServerConfig, create_app};
use serde_json::Value;
use tower::ServiceExt;

pub const ACCESS_SECRET: &[u8] = b"integration-access-secret-0123456789";
pub const REFRESH_SECRET: &[u8] = b"integration-refresh-secret-0123456789";
pub const PASSWORD: &str = "correct horse battery";
pub const DEFAULT_IP: &str = "203.0.113.10";

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub limiter: Arc<InMemoryAttemptLimiter>,
}

/// Builder for test setup with various options
pub struct TestSetup {
    secure_cookies: bool,
    rate_limits: RateLimitConfig,
}

impl TestSetup {
    pub fn new() -> Self {
        // Request-rate limits out of the way unless a test asks for them
        let generous = Quota::per_second(NonZeroU32::new(10_000).unwrap());
        Self {
            secure_cookies: false,
            rate_limits: RateLimitConfig {
                login: generous,
                refresh: generous,
            },
        }
    }

    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    pub fn with_rate_limits(mut self, rate_limits: RateLimitConfig) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    pub async fn build(self) -> TestApp {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open database");
        let limiter = Arc::new(InMemoryAttemptLimiter::default());

        let config = ServerConfig {
            db: db.clone(),
            access_secret: ACCESS_SECRET.to_vec(),
            refresh_secret: REFRESH_SECRET.to_vec(),
            access_token_ttl: Duration::from_secs(900),
            refresh_token_ttl: Duration::from_secs(604_800),
            lookup_timeout: Duration::from_secs(2),
            bcrypt_cost: 4,
            secure_cookies: self.secure_cookies,
            ip_extractor: Some(IpExtractor::from(ClientIpHeader::XForwardedFor)),
            attempt_limiter: limiter.clone(),
            rate_limits: self.rate_limits,
        };

        TestApp {
            app: create_app(&config),
            db,
            limiter,
        }
    }
}

pub async fn setup() -> TestApp {
    TestSetup::new().build().await
}

impl TestApp {
    /// Create an active account with [`PASSWORD`]. Returns its UUID.
    pub async fn create_user(&self, email: &str, role: Role) -> String {
        let password_hash = hash_password(PASSWORD, 4).await.unwrap();
        self.db
            .users()
            .create(NewAccount {
                name: "Test User",
                email,
                password_hash: &password_hash,
                role,
            })
            .await
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn login(&self, email: &str, password: &str, ip: &str) -> Response<Body> {
        self.send(json_request(
            Method::POST,
            "/api/auth/login",
            ip,
            None,
            serde_json::json!({ "email": email, "password": password }),
        ))
        .await
    }

    /// Log in with [`PASSWORD`] and return the session body.
    pub async fn login_ok(&self, email: &str) -> Value {
        let response = self.login(email, PASSWORD, DEFAULT_IP).await;
        assert_eq!(response.status(), 200, "login failed for {}", email);
        body_json(response).await
    }

    pub async fn me(&self, token: Option<&str>, ip: &str) -> Response<Body> {
        self.send(get_request("/api/auth/me", ip, token)).await
    }
}

pub fn get_request(uri: &str, ip: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("x-forwarded-for", ip);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn json_request(
    method: Method,
    uri: &str,
    ip: &str,
    token: Option<&str>,
    body: Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", ip)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn set_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .expect("Set-Cookie missing")
        .to_str()
        .unwrap()
        .to_string()
}
