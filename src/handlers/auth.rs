// src/handlers/auth.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::{AppError, is_foreign_key_violation, is_unique_violation},
    models::user::{
        College, LoginRequest, PasswordResetConfirm, PasswordResetRequest, RegisterRequest,
        USER_COLUMNS, User,
    },
    services::mail::messages,
    state::AppState,
    utils::{
        hash::{hash_password, verify_password},
        jwt::{TokenPurpose, password_fingerprint, sign_action_token, sign_jwt, verify_action_token},
    },
};

/// Registers a new, inactive account and e-mails the activation link.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let email = payload.email.trim().to_lowercase();
    let taken: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE LOWER(email) = $1")
        .bind(&email)
        .fetch_optional(&state.pool)
        .await?;
    if taken.is_some() {
        return Err(AppError::Conflict("An account with this email already exists.".to_string()));
    }

    let hashed_password = hash_password(&payload.password)?;

    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (username, email, password, first_name, last_name, college_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(payload.username.trim())
    .bind(&email)
    .bind(&hashed_password)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(payload.college_id)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Username '{}' already exists", payload.username.trim()))
        } else if is_foreign_key_violation(&e) {
            AppError::BadRequest("Unknown college".to_string())
        } else {
            tracing::error!("Failed to register user: {:?}", e);
            AppError::from(e)
        }
    })?;

    let token = sign_action_token(user.id, TokenPurpose::Activation, &user.password, &state.config.jwt_secret)?;
    let link = format!("{}/api/auth/activate/{}", state.config.site_url, token);
    state
        .mailer
        .send_in_background(messages::activation(&user.email, user.greeting_name(), &link));

    tracing::info!(user_id = user.id, "User registered, activation pending");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user": user,
            "message": "Please confirm your email address to complete the registration."
        })),
    ))
}

/// Activates the account named by the token and logs the user in.
pub async fn activate(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (user_id, _) = verify_action_token(&token, TokenPurpose::Activation, &state.config.jwt_secret)?;

    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET is_active = TRUE WHERE id = $1 RETURNING {USER_COLUMNS}"
    ))
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::BadRequest("The link is invalid or has expired.".to_string()))?;

    let dashboard = format!("{}/api/dashboard", state.config.site_url);
    state
        .mailer
        .send_in_background(messages::welcome(&user.email, user.greeting_name(), &dashboard));

    let token = sign_jwt(user.id, &user.role, &state.config.jwt_secret, state.config.jwt_expiration)?;

    Ok(Json(json!({
        "message": "Thank you for your email confirmation. Your account is now active.",
        "token": token,
        "type": "Bearer"
    })))
}

/// Authenticates a user and returns a bearer token.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
    ))
    .bind(payload.username.trim())
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!("Login DB error: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let invalid = || AppError::AuthError("Invalid username or password".to_string());
    let user = user.ok_or_else(invalid)?;

    if !verify_password(&payload.password, &user.password)? {
        return Err(invalid());
    }

    if !user.is_active {
        return Err(AppError::Forbidden(
            "Account is not activated. Please check your email.".to_string(),
        ));
    }

    let token = sign_jwt(user.id, &user.role, &state.config.jwt_secret, state.config.jwt_expiration)?;

    Ok(Json(json!({
        "token": token,
        "type": "Bearer",
        "role": user.role
    })))
}

/// Always answers 200 so the endpoint cannot be used to enumerate addresses.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = $1 AND is_active"
    ))
    .bind(payload.email.trim().to_lowercase())
    .fetch_optional(&state.pool)
    .await?;

    if let Some(user) = user {
        let token = sign_action_token(user.id, TokenPurpose::PasswordReset, &user.password, &state.config.jwt_secret)?;
        let link = format!("{}/api/auth/password-reset/confirm?token={}", state.config.site_url, token);
        state
            .mailer
            .send_in_background(messages::password_reset(&user.email, user.greeting_name(), &link));
    } else {
        tracing::debug!("Password reset requested for unknown address");
    }

    Ok(Json(json!({
        "message": "If an account exists for that email, a reset link has been sent."
    })))
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let (user_id, fingerprint) =
        verify_action_token(&payload.token, TokenPurpose::PasswordReset, &state.config.jwt_secret)?;

    let current: Option<(String,)> = sqlx::query_as("SELECT password FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?;

    // A used token no longer matches the new hash.
    match current {
        Some((hash,)) if password_fingerprint(&hash) == fingerprint => {}
        _ => return Err(AppError::BadRequest("The link is invalid or has expired.".to_string())),
    }

    let hashed = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password = $2 WHERE id = $1")
        .bind(user_id)
        .bind(hashed)
        .execute(&state.pool)
        .await?;

    tracing::info!(user_id, "Password reset completed");
    Ok(Json(json!({ "message": "Your password has been set. You may log in now." })))
}

pub async fn list_colleges(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let colleges = sqlx::query_as::<_, College>("SELECT id, name FROM colleges ORDER BY name")
        .fetch_all(&pool)
        .await?;
    Ok(Json(colleges))
}
