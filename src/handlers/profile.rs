// src/handlers/profile.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::{AppError, is_foreign_key_violation, is_unique_violation},
    models::user::{
        PasswordChangeRequest, ProfileResponse, USER_COLUMNS, UpdateProfileRequest, User,
    },
    services::mail::messages,
    state::AppState,
    utils::{
        hash::{hash_password, verify_password},
        jwt::Claims,
    },
};

async fn fetch_profile(pool: &PgPool, user_id: i64) -> Result<ProfileResponse, AppError> {
    sqlx::query_as::<_, ProfileResponse>(
        r#"
        SELECT u.id, u.username, u.email, u.role, u.first_name, u.last_name, u.bio,
               u.college_id, c.name AS college_name, u.created_at
        FROM users u
        LEFT JOIN colleges c ON c.id = u.college_id
        WHERE u.id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// Get current user's profile.
pub async fn get_profile(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    Ok(Json(fetch_profile(&pool, user_id).await?))
}

/// Partial profile update. Sends a security notice to the (new) address.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    let email = payload.email.as_deref().map(|e| e.trim().to_lowercase());
    if let Some(email) = &email {
        let taken: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM users WHERE LOWER(email) = $1 AND id <> $2")
                .bind(email)
                .bind(user_id)
                .fetch_optional(&state.pool)
                .await?;
        if taken.is_some() {
            return Err(AppError::Conflict("This email is already in use.".to_string()));
        }
    }

    let bio = payload.bio.as_deref().map(crate::utils::html::clean_plain_text);

    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users SET
            email = COALESCE($2, email),
            first_name = COALESCE($3, first_name),
            last_name = COALESCE($4, last_name),
            bio = COALESCE($5, bio),
            college_id = COALESCE($6, college_id)
        WHERE id = $1
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(email)
    .bind(payload.first_name.as_deref().map(str::trim))
    .bind(payload.last_name.as_deref().map(str::trim))
    .bind(bio)
    .bind(payload.college_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("This email is already in use.".to_string())
        } else if is_foreign_key_violation(&e) {
            AppError::BadRequest("Unknown college".to_string())
        } else {
            AppError::from(e)
        }
    })?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    state
        .mailer
        .send_in_background(messages::profile_updated(&user.email, user.greeting_name(), Utc::now()));

    tracing::info!(user_id, "Profile updated");
    Ok(Json(fetch_profile(&state.pool, user_id).await?))
}

pub async fn change_password(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<PasswordChangeRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    let (current,): (String,) = sqlx::query_as("SELECT password FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if !verify_password(&payload.old_password, &current)? {
        return Err(AppError::BadRequest("Your old password was entered incorrectly.".to_string()));
    }

    let hashed = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password = $2 WHERE id = $1")
        .bind(user_id)
        .bind(hashed)
        .execute(&pool)
        .await?;

    Ok(Json(json!({ "message": "Password updated successfully" })))
}
