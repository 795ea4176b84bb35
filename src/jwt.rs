//! JWT token generation and validation.
//!
//! Access and refresh tokens are signed with separate secrets so that a
//! leaked refresh secret cannot mint access tokens. Every token carries the
//! same claim set; the `typ` claim and the key slot together decide which
//! kind a token is.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Issuer claim stamped on every token.
pub const ISSUER: &str = "portfolio";

/// Audience claim stamped on every token.
pub const AUDIENCE: &str = "portfolio-users";

/// The only algorithm tokens are signed and accepted with.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Access token duration: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Refresh token duration: 7 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived token presented on every protected request
    Access,
    /// Long-lived token only accepted by the refresh endpoint
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// JWT claims shared by access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity UUID)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT token string
    pub token: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

/// Access and refresh token issued together at login or refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Signing and verification keys for one token type.
#[derive(Clone)]
struct KeySlot {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeySlot {
    fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    access: KeySlot,
    refresh: KeySlot,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtConfig {
    /// Create a JWT configuration with one secret per token type and the
    /// default lifetimes.
    pub fn new(access_secret: &[u8], refresh_secret: &[u8]) -> Self {
        Self {
            access: KeySlot::from_secret(access_secret),
            refresh: KeySlot::from_secret(refresh_secret),
            access_ttl: Duration::from_secs(ACCESS_TOKEN_DURATION_SECS),
            refresh_ttl: Duration::from_secs(REFRESH_TOKEN_DURATION_SECS),
        }
    }

    /// Override the lifetimes used by [`JwtConfig::issue_pair`].
    pub fn with_ttls(mut self, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        self.access_ttl = access_ttl;
        self.refresh_ttl = refresh_ttl;
        self
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn slot(&self, token_type: TokenType) -> &KeySlot {
        match token_type {
            TokenType::Access => &self.access,
            TokenType::Refresh => &self.refresh,
        }
    }

    /// Sign a token of the given type for `subject`, valid for `ttl`.
    pub fn issue(
        &self,
        subject: &str,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<IssuedToken, JwtError> {
        let duration = ttl.as_secs();
        if duration == 0 {
            return Err(JwtError::InvalidTtl);
        }

        let now = unix_now()?;
        let exp = now + duration;

        let claims = Claims {
            sub: subject.to_string(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            token_type,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(
            &Header::new(ALGORITHM),
            &claims,
            &self.slot(token_type).encoding,
        )
        .map_err(JwtError::Encoding)?;

        Ok(IssuedToken {
            token,
            issued_at: now,
            expires_at: exp,
            duration,
        })
    }

    /// Issue an access and a refresh token for `subject` with the configured
    /// lifetimes.
    pub fn issue_pair(&self, subject: &str) -> Result<TokenPair, JwtError> {
        Ok(TokenPair {
            access: self.issue(subject, TokenType::Access, self.access_ttl)?,
            refresh: self.issue(subject, TokenType::Refresh, self.refresh_ttl)?,
        })
    }

    /// Validate and decode a token that must be of `expected` type.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let token_data =
            jsonwebtoken::decode::<Claims>(token, &self.slot(expected).decoding, &validation)
                .map_err(TokenError::from)?;

        if token_data.claims.token_type != expected {
            return Err(TokenError::TypeMismatch);
        }

        Ok(token_data.claims)
    }
}

/// Current Unix time in whole seconds.
pub(crate) fn unix_now() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

/// Errors that can occur while issuing a token.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
    /// Requested lifetime is shorter than one second
    InvalidTtl,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::TimeError => write!(f, "System time error"),
            JwtError::InvalidTtl => write!(f, "Token lifetime must be at least one second"),
        }
    }
}

impl std::error::Error for JwtError {}

/// Why a presented token was rejected. For logs only, never sent to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    SignatureInvalid,
    AlgorithmMismatch,
    Expired,
    IssuerMismatch,
    AudienceMismatch,
    TypeMismatch,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                TokenError::AlgorithmMismatch
            }
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidIssuer => TokenError::IssuerMismatch,
            ErrorKind::InvalidAudience => TokenError::AudienceMismatch,
            _ => TokenError::Malformed,
        }
    }
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            TokenError::Malformed => "malformed token",
            TokenError::SignatureInvalid => "bad signature",
            TokenError::AlgorithmMismatch => "unexpected algorithm",
            TokenError::Expired => "expired",
            TokenError::IssuerMismatch => "wrong issuer",
            TokenError::AudienceMismatch => "wrong audience",
            TokenError::TypeMismatch => "wrong token type",
        };
        f.write_str(reason)
    }
}

impl std::error::Error for TokenError {}
