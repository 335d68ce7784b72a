//! Password hashing, JWT issuance and the authenticated-user extractor.
//!
//! # Passwords
//!
//! PBKDF2-HMAC-SHA256 with a 16-byte random salt, stored as
//!
//! ```text
//! pbkdf2_sha256$<iterations>$<salt hex>$<hash hex>
//! ```
//!
//! The iteration count travels with the hash, so raising
//! `auth.password_iterations` only affects newly set passwords.
//!
//! # Tokens
//!
//! HS256 JWTs carrying `sub` (user id), `token_type`, `iat` and `exp`. Access
//! tokens authenticate requests; refresh tokens can only be traded for a new
//! access token.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::User;
use crate::server::AppState;
use crate::users;

const HASH_SCHEME: &str = "pbkdf2_sha256";
const SALT_LEN: usize = 16;

// ============ Passwords ============

/// Hash a password for storage.
pub fn hash_password(password: &str, iterations: u32) -> String {
    let salt: [u8; SALT_LEN] = rand::random();
    let hash = pbkdf2_sha256(password.as_bytes(), &salt, iterations);
    format!(
        "{}${}${}${}",
        HASH_SCHEME,
        iterations,
        hex::encode(salt),
        hex::encode(hash)
    )
}

/// Check a password against a stored hash. Unparseable hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
        return false;
    };
    if iterations == 0 {
        return false;
    }

    let actual = pbkdf2_sha256(password.as_bytes(), &salt, iterations);
    constant_time_eq(&actual, &expected)
}

fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    pbkdf2::pbkdf2_hmac_array::<Sha256, 32>(password, salt, iterations)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============ Tokens ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Signs and verifies JWTs with the configured secret.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl_secs: config.access_ttl_secs,
            refresh_ttl_secs: config.refresh_ttl_secs,
        }
    }

    pub fn issue(&self, user_id: &str, token_type: TokenType) -> anyhow::Result<String> {
        self.issue_at(user_id, token_type, chrono::Utc::now().timestamp())
    }

    fn issue_at(&self, user_id: &str, token_type: TokenType, now: i64) -> anyhow::Result<String> {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl_secs,
            TokenType::Refresh => self.refresh_ttl_secs,
        };
        let claims = Claims {
            sub: user_id.to_string(),
            token_type,
            iat: now,
            exp: now + ttl,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn issue_pair(&self, user_id: &str) -> anyhow::Result<TokenPair> {
        Ok(TokenPair {
            access: self.issue(user_id, TokenType::Access)?,
            refresh: self.issue(user_id, TokenType::Refresh)?,
        })
    }

    /// Decode a token, checking signature, expiry and type.
    pub fn verify(&self, token: &str, expected: TokenType) -> ApiResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| {
                debug!(error = %e, "token rejected");
                ApiError::unauthorized("Token is invalid or expired")
            })?
            .claims;

        if claims.token_type != expected {
            return Err(ApiError::unauthorized("Token has the wrong type"));
        }
        Ok(claims)
    }
}

// ============ Login / refresh ============

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access: String,
}

pub async fn login(
    pool: &SqlitePool,
    tokens: &TokenIssuer,
    email: Option<&str>,
    password: Option<&str>,
) -> ApiResult<LoginResponse> {
    let (Some(email), Some(password)) = (
        email.filter(|e| !e.trim().is_empty()),
        password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Email and password are required"));
    };

    let user = users::find_by_email(pool, email)
        .await?
        .filter(|u| u.is_active && verify_password(password, &u.password_hash))
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    let pair = tokens.issue_pair(&user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok(LoginResponse {
        access: pair.access,
        refresh: pair.refresh,
        user,
    })
}

pub async fn refresh(
    pool: &SqlitePool,
    tokens: &TokenIssuer,
    refresh_token: Option<&str>,
) -> ApiResult<RefreshResponse> {
    let refresh_token =
        refresh_token.ok_or_else(|| ApiError::bad_request("Refresh token is required"))?;
    let claims = tokens.verify(refresh_token, TokenType::Refresh)?;

    let user = users::get_user(pool, &claims.sub)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::unauthorized("User not found or inactive"))?;

    Ok(RefreshResponse {
        access: tokens.issue(&user.id, TokenType::Access)?,
    })
}

// ============ Extractor ============

/// The user behind a valid `Authorization: Bearer <access token>` header.
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Authentication credentials were not provided"))?;

        let claims = state.tokens.verify(token, TokenType::Access)?;
        let user = users::get_user(&state.pool, &claims.sub)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| ApiError::unauthorized("User not found or inactive"))?;

        Ok(AuthUser(user))
    }
}
