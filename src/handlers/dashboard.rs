// src/handlers/dashboard.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::Utc;
use sqlx::PgPool;

use crate::{error::AppError, services::leaderboard, utils::jwt::Claims};

async fn college_of(pool: &PgPool, user_id: i64) -> Result<Option<i64>, AppError> {
    let row: Option<(Option<i64>,)> = sqlx::query_as("SELECT college_id FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    let (college_id,) = row.ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(college_id)
}

/// Stats, streak, badges, active attempt and leaderboards of the caller.
pub async fn get_dashboard(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let college_id = college_of(&pool, user_id).await?;

    let dashboard = leaderboard::dashboard(&pool, user_id, college_id, Utc::now()).await?;
    Ok(Json(dashboard))
}

/// Every leaderboard table visible to the caller.
pub async fn list_leaderboards(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let college_id = college_of(&pool, user_id).await?;

    let boards = leaderboard::all_leaderboards(&pool, college_id, Utc::now()).await?;
    Ok(Json(boards))
}
