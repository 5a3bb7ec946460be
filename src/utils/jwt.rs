// src/utils/jwt.rs

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{config::Config, error::AppError};

/// Lifetime of activation and password-reset links.
pub const ACTION_TOKEN_TTL_SECS: u64 = 3 * 24 * 60 * 60;

/// Bearer token claims.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// User ID as string.
    pub sub: String,
    /// 'user' or 'admin'.
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AppError> {
        self.sub
            .parse()
            .map_err(|_| AppError::AuthError("Invalid token subject".to_string()))
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// What a single-purpose link token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Activation,
    PasswordReset,
}

/// Claims of an e-mailed link token.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ActionClaims {
    pub sub: String,
    pub purpose: TokenPurpose,
    /// Tail of the password hash at issue time; a changed password voids the token.
    pub fp: String,
    pub exp: usize,
}

fn expires_in(seconds: u64) -> Result<usize, AppError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .as_secs();
    Ok((now + seconds) as usize)
}

pub fn sign_jwt(id: i64, role: &str, secret: &str, expiration_seconds: u64) -> Result<String, AppError> {
    let claims = Claims {
        sub: id.to_string(),
        role: role.to_owned(),
        exp: expires_in(expiration_seconds)?,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;

    Ok(token_data.claims)
}

/// Short fingerprint of a password hash, embedded in link tokens.
pub fn password_fingerprint(password_hash: &str) -> String {
    let start = password_hash.len().saturating_sub(16);
    password_hash.get(start..).unwrap_or_default().to_string()
}

pub fn sign_action_token(
    user_id: i64,
    purpose: TokenPurpose,
    password_hash: &str,
    secret: &str,
) -> Result<String, AppError> {
    let claims = ActionClaims {
        sub: user_id.to_string(),
        purpose,
        fp: password_fingerprint(password_hash),
        exp: expires_in(ACTION_TOKEN_TTL_SECS)?,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Decodes a link token and checks its purpose. Returns the user id and fingerprint.
pub fn verify_action_token(
    token: &str,
    purpose: TokenPurpose,
    secret: &str,
) -> Result<(i64, String), AppError> {
    let invalid = || AppError::BadRequest("The link is invalid or has expired.".to_string());

    let data = decode::<ActionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| invalid())?;

    if data.claims.purpose != purpose {
        return Err(invalid());
    }
    let user_id = data.claims.sub.parse().map_err(|_| invalid())?;
    Ok((user_id, data.claims.fp))
}

/// Validates `Authorization: Bearer <token>` and stores the `Claims` in the
/// request extensions.
pub async fn auth_middleware(
    State(config): State<Config>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    match verify_jwt(token, &config.jwt_secret) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Must run after `auth_middleware`.
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !claims.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn bearer_token_round_trip() {
        let token = sign_jwt(42, "admin", SECRET, 60).unwrap();
        let claims = verify_jwt(&token, SECRET).unwrap();
        assert_eq!(claims.user_id().unwrap(), 42);
        assert!(claims.is_admin());
        assert!(verify_jwt(&token, "other-secret").is_err());
    }

    #[test]
    fn action_token_checks_purpose() {
        let token = sign_action_token(7, TokenPurpose::PasswordReset, "$argon2id$v=19$abcdefghijklmnopqrstuvwxyz", SECRET).unwrap();
        let (user_id, fp) = verify_action_token(&token, TokenPurpose::PasswordReset, SECRET).unwrap();
        assert_eq!(user_id, 7);
        assert_eq!(fp, "klmnopqrstuvwxyz");
        assert!(verify_action_token(&token, TokenPurpose::Activation, SECRET).is_err());
    }

    #[test]
    fn fingerprint_of_short_hash_is_whole_hash() {
        assert_eq!(password_fingerprint("abc"), "abc");
    }
}
