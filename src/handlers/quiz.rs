// src/handlers/quiz.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    config::{AI_CATEGORY_NAME, QUIZ_PAGE_SIZE},
    error::AppError,
    models::{
        attempt::{ATTEMPT_COLUMNS, Attempt},
        quiz::{
            Category, QUIZ_COLUMNS, Quiz, QuizListItem, QuizListParams, QuizType,
            RedeemQuizCouponRequest,
        },
    },
    services::{
        access::{self, WindowState},
        attempt as attempts,
        leaderboard::page_count,
    },
    utils::jwt::Claims,
};

/// Visibility predicate over `quizzes q LEFT JOIN categories c`, caller in `$1`.
///
/// Active quizzes created by the caller or an admin are visible; quizzes
/// without an owner are visible unless they sit in the generated category.
fn visibility_clause() -> String {
    format!(
        r#"q.is_active AND (
            q.created_by = $1
            OR EXISTS (SELECT 1 FROM users owner WHERE owner.id = q.created_by AND owner.role = 'admin')
            OR (q.created_by IS NULL AND c.name IS DISTINCT FROM '{AI_CATEGORY_NAME}'))"#
    )
}

/// Loads a quiz the caller may see. Hidden quizzes are reported as missing.
pub async fn fetch_visible_quiz(pool: &PgPool, user_id: i64, quiz_id: i64) -> Result<Quiz, AppError> {
    let columns = QUIZ_COLUMNS
        .split(',')
        .map(|c| format!("q.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");

    sqlx::query_as::<_, Quiz>(&format!(
        "SELECT {columns} FROM quizzes q LEFT JOIN categories c ON c.id = q.category_id \
         WHERE q.id = $2 AND {}",
        visibility_clause()
    ))
    .bind(user_id)
    .bind(quiz_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))
}

/// List all categories.
pub async fn list_categories(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let categories = sqlx::query_as::<_, Category>(
        "SELECT id, name, description FROM categories ORDER BY name",
    )
    .fetch_all(&pool)
    .await?;

    Ok(Json(categories))
}

/// Paginated catalogue with an `unlocked` flag per quiz.
pub async fn list_quizzes(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<QuizListParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let filter = match params.filter.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(other) => Some(
            QuizType::parse(other)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown filter '{other}'")))?,
        ),
    };
    let filter = filter.map(|t| t.as_str());

    let (total,): (i64,) = sqlx::query_as(&format!(
        r#"
        SELECT COUNT(*)
        FROM quizzes q
        LEFT JOIN categories c ON c.id = q.category_id
        WHERE {}
          AND ($2::BIGINT IS NULL OR q.category_id = $2)
          AND ($3::TEXT IS NULL OR q.quiz_type = $3)
        "#,
        visibility_clause()
    ))
    .bind(user_id)
    .bind(params.category_id)
    .bind(filter)
    .fetch_one(&pool)
    .await?;

    let total_pages = page_count(total, QUIZ_PAGE_SIZE);
    let page = params.page.unwrap_or(1).clamp(1, total_pages);

    let quizzes = sqlx::query_as::<_, QuizListItem>(&format!(
        r#"
        SELECT q.id, q.title, q.description, q.quiz_type, q.difficulty, q.duration_minutes,
               q.passing_percentage, q.category_id, c.name AS category_name,
               q.start_time, q.end_time,
               (SELECT COUNT(*) FROM questions qq WHERE qq.quiz_id = q.id) AS question_count,
               (q.quiz_type <> 'hackathon' OR EXISTS (
                    SELECT 1 FROM quiz_access_grants g WHERE g.quiz_id = q.id AND g.user_id = $1
               )) AS unlocked
        FROM quizzes q
        LEFT JOIN categories c ON c.id = q.category_id
        WHERE {}
          AND ($2::BIGINT IS NULL OR q.category_id = $2)
          AND ($3::TEXT IS NULL OR q.quiz_type = $3)
        ORDER BY q.created_at DESC, q.id DESC
        LIMIT $4 OFFSET $5
        "#,
        visibility_clause()
    ))
    .bind(user_id)
    .bind(params.category_id)
    .bind(filter)
    .bind(QUIZ_PAGE_SIZE)
    .bind((page - 1) * QUIZ_PAGE_SIZE)
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({
        "quizzes": quizzes,
        "page": page,
        "total_pages": total_pages,
        "total": total,
        "filter": filter.unwrap_or("all"),
    })))
}

/// Quiz detail with the caller's window, access and attempt state.
pub async fn get_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let quiz = fetch_visible_quiz(&pool, user_id, quiz_id).await?;
    let now = Utc::now();

    let question_count = attempts::question_ids(&pool, quiz.id).await?.len();
    let has_access = access::has_quiz_access(&pool, user_id, &quiz).await?;
    let window = access::quiz_window(&quiz, now);

    let existing = sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE user_id = $1 AND quiz_id = $2 \
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(user_id)
    .bind(quiz.id)
    .fetch_optional(&pool)
    .await?;

    Ok(Json(json!({
        "quiz": quiz,
        "question_count": question_count,
        "has_access": has_access,
        "needs_coupon": quiz.is_hackathon() && !has_access,
        "window": window,
        "can_start": has_access && window == WindowState::Open && question_count > 0,
        "existing_attempt": existing,
    })))
}

/// Unlocks a hackathon quiz for the caller with its coupon code.
pub async fn redeem_quiz_coupon(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<RedeemQuizCouponRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;
    let quiz = fetch_visible_quiz(&pool, user_id, quiz_id).await?;

    if !quiz.is_hackathon() {
        return Err(AppError::BadRequest("This quiz does not need a coupon.".to_string()));
    }

    if !access::coupon_matches(&payload.coupon_code, quiz.coupon_code.as_deref()) {
        tracing::debug!(user_id, quiz_id, "Rejected hackathon coupon");
        return Err(AppError::BadRequest("Invalid coupon code.".to_string()));
    }

    access::grant_quiz_access(&pool, user_id, quiz.id).await?;
    tracing::info!(user_id, quiz_id, "Hackathon unlocked");

    Ok(Json(json!({
        "message": "Access granted! You can now start the quiz.",
        "quiz_id": quiz.id,
    })))
}

/// Starts (or resumes) an attempt and names the question to open.
pub async fn start_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let quiz = fetch_visible_quiz(&pool, user_id, quiz_id).await?;

    let next = attempts::start_attempt(&pool, user_id, &quiz, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(next)))
}
