//! Authentication: password hashing, JWT issuance and validation.
//!
//! Tokens are self-contained HS256 JWTs carrying `user_id` and `exp`;
//! validation never requires a storage round-trip. Passwords are hashed
//! with bcrypt, whose `verify` is relied on for constant-time comparison
//! rather than re-implementing one on top.

pub mod store;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub use store::{UserRecord, UserStore};

/// 30-day token lifetime, fixed per the data model.
pub const TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

/// Signed bearer token returned to clients.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

pub fn is_strong_password(password: &str) -> bool {
    password.len() >= MIN_PASSWORD_LEN
}

pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost)
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Issue a signed token bound to `user_id`, expiring `TOKEN_TTL_SECS` from now.
pub fn issue_token(user_id: &str, secret: &str) -> Result<IssuedToken> {
    let now = chrono::Utc::now().timestamp();
    let exp = now + TOKEN_TTL_SECS;
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
        iat: now,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))?;
    Ok(IssuedToken {
        token,
        expires_at: exp,
    })
}

/// Validate a signed token, returning the `user_id` it was issued for.
///
/// `jsonwebtoken`'s default `Validation` rejects an expired `exp` before
/// this function ever inspects the claims, so an expired token surfaces as
/// `AppError::Expired` rather than reaching the signature-only path.
pub fn validate_token(token: &str, secret: &str) -> Result<String> {
    let validation = Validation::default();
    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => Ok(data.claims.sub),
        Err(e) => match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AppError::Expired),
            _ => Err(AppError::Malformed),
        },
    }
}
