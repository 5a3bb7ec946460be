// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::{AppError, is_foreign_key_violation, is_unique_violation},
    models::{
        quiz::{
            Category, CreateCategoryRequest, CreateQuestionRequest, CreateQuizRequest, QUIZ_COLUMNS,
            Quiz, QuizType, UpdateQuizRequest,
        },
        training::{
            Batch, CLASS_COLUMNS, COUPON_COLUMNS, ClassSchedule, Coupon, CreateBatchRequest,
            CreateClassRequest, CreateCouponRequest, CreateWorkshopRequest, UpdateClassRequest,
            UpdateCouponRequest, Workshop,
        },
    },
    services::{access, enrollment},
    utils::{
        html::{clean_html, clean_plain_text},
        jwt::Claims,
    },
};

fn reference_error(what: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| {
        if is_foreign_key_violation(&e) {
            AppError::BadRequest(format!("Unknown {what}"))
        } else {
            tracing::error!("Admin write failed: {:?}", e);
            AppError::from(e)
        }
    }
}

fn check_window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<(), AppError> {
    match (start, end) {
        (Some(s), Some(e)) if e <= s => Err(AppError::BadRequest(
            "End time must be after start time.".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Empty codes clear the coupon.
fn normalized_quiz_coupon(code: Option<&str>) -> Option<String> {
    code.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string)
}

#[derive(Debug, Serialize, FromRow)]
pub struct AdminUserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub college_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lists all users in the system.
/// Admin only.
pub async fn list_users(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let users = sqlx::query_as::<_, AdminUserRow>(
        r#"
        SELECT u.id, u.username, u.email, u.role, u.is_active, c.name AS college_name, u.created_at
        FROM users u
        LEFT JOIN colleges c ON c.id = u.college_id
        ORDER BY u.id DESC
        "#,
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list users: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(users))
}

pub async fn create_category(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateCategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let category = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (name, description) VALUES ($1, $2) RETURNING id, name, description",
    )
    .bind(payload.name.trim())
    .bind(payload.description.as_deref().map(clean_plain_text))
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Category '{}' already exists", payload.name.trim()))
        } else {
            AppError::from(e)
        }
    })?;

    Ok((StatusCode::CREATED, Json(category)))
}

/// Quiz as admins see it, coupon code included.
fn admin_view(quiz: &Quiz) -> Result<serde_json::Value, AppError> {
    let mut value = serde_json::to_value(quiz)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("coupon_code".to_string(), json!(quiz.coupon_code));
    }
    Ok(value)
}

/// All quizzes, inactive and generated ones included.
/// Admin only.
pub async fn list_quizzes(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let quizzes = sqlx::query_as::<_, Quiz>(&format!(
        "SELECT {QUIZ_COLUMNS} FROM quizzes ORDER BY created_at DESC, id DESC"
    ))
    .fetch_all(&pool)
    .await?;

    let body = quizzes.iter().map(admin_view).collect::<Result<Vec<_>, _>>()?;
    Ok(Json(body))
}

/// Creates a quiz owned by the calling admin.
/// Admin only.
pub async fn create_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    check_window(payload.start_time, payload.end_time)?;
    let admin_id = claims.user_id()?;

    let coupon = normalized_quiz_coupon(payload.coupon_code.as_deref());
    if payload.quiz_type == QuizType::Hackathon && coupon.is_none() {
        tracing::warn!("Hackathon created without a coupon code; nobody can unlock it yet");
    }

    let quiz = sqlx::query_as::<_, Quiz>(&format!(
        r#"
        INSERT INTO quizzes
            (title, description, category_id, quiz_type, duration_minutes, passing_percentage,
             is_active, difficulty, coupon_code, start_time, end_time, generate_certificate, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING {QUIZ_COLUMNS}
        "#
    ))
    .bind(payload.title.trim())
    .bind(clean_html(&payload.description))
    .bind(payload.category_id)
    .bind(payload.quiz_type.as_str())
    .bind(payload.duration_minutes.unwrap_or(10))
    .bind(payload.passing_percentage.unwrap_or(50))
    .bind(payload.is_active.unwrap_or(true))
    .bind(payload.difficulty.as_deref().unwrap_or("Beginner"))
    .bind(coupon)
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(payload.generate_certificate.unwrap_or(true))
    .bind(admin_id)
    .fetch_one(&pool)
    .await
    .map_err(reference_error("category"))?;

    tracing::info!(quiz_id = quiz.id, admin_id, "Quiz created");
    Ok((StatusCode::CREATED, Json(admin_view(&quiz)?)))
}

/// Updates a quiz. A changed coupon code revokes every existing unlock
/// in the same transaction.
/// Admin only.
pub async fn update_quiz(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, Quiz>(&format!(
        "SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))?;

    check_window(
        payload.start_time.or(current.start_time),
        payload.end_time.or(current.end_time),
    )?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE quizzes SET ");
    let mut separated = builder.separated(", ");

    if let Some(title) = &payload.title {
        separated.push("title = ");
        separated.push_bind_unseparated(title.trim().to_string());
    }
    if let Some(description) = &payload.description {
        separated.push("description = ");
        separated.push_bind_unseparated(clean_html(description));
    }
    if let Some(category_id) = payload.category_id {
        separated.push("category_id = ");
        separated.push_bind_unseparated(category_id);
    }
    if let Some(quiz_type) = payload.quiz_type {
        separated.push("quiz_type = ");
        separated.push_bind_unseparated(quiz_type.as_str());
    }
    if let Some(duration) = payload.duration_minutes {
        separated.push("duration_minutes = ");
        separated.push_bind_unseparated(duration);
    }
    if let Some(passing) = payload.passing_percentage {
        separated.push("passing_percentage = ");
        separated.push_bind_unseparated(passing);
    }
    if let Some(difficulty) = &payload.difficulty {
        separated.push("difficulty = ");
        separated.push_bind_unseparated(difficulty.clone());
    }
    if let Some(start) = payload.start_time {
        separated.push("start_time = ");
        separated.push_bind_unseparated(start);
    }
    if let Some(end) = payload.end_time {
        separated.push("end_time = ");
        separated.push_bind_unseparated(end);
    }
    if let Some(flag) = payload.generate_certificate {
        separated.push("generate_certificate = ");
        separated.push_bind_unseparated(flag);
    }
    if let Some(active) = payload.is_active {
        separated.push("is_active = ");
        separated.push_bind_unseparated(active);
    }

    let new_coupon = payload
        .coupon_code
        .as_deref()
        .map(|c| normalized_quiz_coupon(Some(c)));
    if let Some(code) = &new_coupon {
        separated.push("coupon_code = ");
        separated.push_bind_unseparated(code.clone());
    }
    // Keeps the statement valid when nothing else changed.
    separated.push("id = id");

    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(format!(" RETURNING {QUIZ_COLUMNS}"));

    let updated = builder
        .build_query_as::<Quiz>()
        .fetch_one(&mut *tx)
        .await
        .map_err(reference_error("category"))?;

    let mut revoked = 0;
    if let Some(code) = &new_coupon {
        if access::coupon_changed(current.coupon_code.as_deref(), code.as_deref()) {
            revoked = access::revoke_quiz_grants(&mut tx, id).await?;
        }
    }

    tx.commit().await?;

    if revoked > 0 {
        tracing::info!(quiz_id = id, revoked, "Coupon changed, quiz unlocks revoked");
    }

    let mut body = admin_view(&updated)?;
    if let Some(map) = body.as_object_mut() {
        map.insert("revoked_grants".to_string(), json!(revoked));
    }
    Ok(Json(body))
}

/// Deletes a quiz with its questions and attempts.
/// Admin only.
pub async fn delete_quiz(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM quizzes WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete quiz: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Quiz not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Adds a question with its choices to a quiz.
/// Admin only.
pub async fn create_question(
    State(pool): State<PgPool>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut tx = pool.begin().await?;

    let (question_id,): (i64,) =
        sqlx::query_as("INSERT INTO questions (quiz_id, text) VALUES ($1, $2) RETURNING id")
            .bind(quiz_id)
            .bind(clean_plain_text(&payload.text))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    AppError::NotFound("Quiz not found".to_string())
                } else {
                    AppError::from(e)
                }
            })?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO choices (question_id, text, is_correct) ");
    builder.push_values(&payload.choices, |mut row, choice| {
        row.push_bind(question_id)
            .push_bind(clean_plain_text(&choice.text))
            .push_bind(choice.is_correct);
    });
    builder.build().execute(&mut *tx).await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": question_id }))))
}

/// Deletes a question by ID.
/// Admin only.
pub async fn delete_question(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM questions WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, FromRow)]
pub struct HackathonResultRow {
    pub attempt_id: i64,
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub score: i32,
    pub passed: bool,
    pub finished_at: Option<DateTime<Utc>>,
    pub auto_submit_reason: Option<String>,
}

/// Finished attempts of a quiz, best score first, earliest finish on ties.
/// Admin only.
pub async fn hackathon_results(
    State(pool): State<PgPool>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let quiz = sqlx::query_as::<_, Quiz>(&format!("SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = $1"))
        .bind(quiz_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))?;

    let rows = sqlx::query_as::<_, HackathonResultRow>(
        r#"
        SELECT a.id AS attempt_id, u.id AS user_id, u.username, u.first_name, u.last_name, u.email,
               a.score, a.passed, a.finished_at, a.auto_submit_reason
        FROM attempts a
        JOIN users u ON u.id = a.user_id
        WHERE a.quiz_id = $1 AND a.finished_at IS NOT NULL
        ORDER BY a.score DESC, a.finished_at ASC
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(json!({
        "quiz_id": quiz.id,
        "title": quiz.title,
        "quiz_type": quiz.quiz_type,
        "results": rows,
    })))
}

pub async fn create_workshop(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateWorkshopRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let workshop = sqlx::query_as::<_, Workshop>(
        "INSERT INTO workshops (title, description) VALUES ($1, $2) \
         RETURNING id, title, description, created_at",
    )
    .bind(payload.title.trim())
    .bind(clean_html(&payload.description))
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(workshop)))
}

pub async fn create_batch(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateBatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    if let (Some(start), Some(end)) = (payload.start_date, payload.end_date) {
        if end < start {
            return Err(AppError::BadRequest("End date must not precede start date.".to_string()));
        }
    }

    let batch = sqlx::query_as::<_, Batch>(
        r#"
        INSERT INTO batches (workshop_id, name, start_date, end_date)
        VALUES ($1, $2, $3, $4)
        RETURNING id, workshop_id, name, start_date, end_date, created_at
        "#,
    )
    .bind(payload.workshop_id)
    .bind(payload.name.trim())
    .bind(payload.start_date)
    .bind(payload.end_date)
    .fetch_one(&pool)
    .await
    .map_err(reference_error("workshop"))?;

    Ok((StatusCode::CREATED, Json(batch)))
}

pub async fn create_class(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateClassRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    check_window(payload.start_time, payload.end_time)?;

    let class = sqlx::query_as::<_, ClassSchedule>(&format!(
        r#"
        INSERT INTO class_schedules (batch_id, topic, description, start_time, end_time, meeting_link)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {CLASS_COLUMNS}
        "#
    ))
    .bind(payload.batch_id)
    .bind(payload.topic.trim())
    .bind(payload.description.as_deref().map(clean_html))
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(payload.meeting_link.as_deref().map(str::trim))
    .fetch_one(&pool)
    .await
    .map_err(reference_error("batch"))?;

    Ok((StatusCode::CREATED, Json(class)))
}

/// Updates a class. Moving the start time re-arms both reminders.
/// Admin only.
pub async fn update_class(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateClassRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let current = sqlx::query_as::<_, ClassSchedule>(&format!(
        "SELECT {CLASS_COLUMNS} FROM class_schedules WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Class not found".to_string()))?;

    check_window(
        payload.start_time.or(current.start_time),
        payload.end_time.or(current.end_time),
    )?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE class_schedules SET ");
    let mut separated = builder.separated(", ");

    if let Some(topic) = &payload.topic {
        separated.push("topic = ");
        separated.push_bind_unseparated(topic.trim().to_string());
    }
    if let Some(description) = &payload.description {
        separated.push("description = ");
        separated.push_bind_unseparated(clean_html(description));
    }
    if let Some(end) = payload.end_time {
        separated.push("end_time = ");
        separated.push_bind_unseparated(end);
    }
    if let Some(link) = &payload.meeting_link {
        separated.push("meeting_link = ");
        separated.push_bind_unseparated(link.trim().to_string());
    }
    if let Some(start) = payload.start_time {
        separated.push("start_time = ");
        separated.push_bind_unseparated(start);
        if current.start_time != Some(start) {
            separated.push("reminder_3hr_sent = FALSE");
            separated.push("reminder_30min_sent = FALSE");
        }
    }
    separated.push("id = id");

    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(format!(" RETURNING {CLASS_COLUMNS}"));

    let class = builder.build_query_as::<ClassSchedule>().fetch_one(&pool).await?;

    Ok(Json(class))
}

/// Re-syncs the enrollment expiry of the coupon's assignee.
async fn sync_assignee(pool: &PgPool, coupon: &Coupon) -> Result<(), AppError> {
    let Some(user_id) = coupon.assigned_to else {
        return Ok(());
    };
    let mut conn = pool.acquire().await?;
    enrollment::sync_enrollment_expiry(&mut conn, user_id, coupon.batch_id).await?;
    Ok(())
}

/// All coupons, newest first.
/// Admin only.
pub async fn list_coupons(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let coupons = sqlx::query_as::<_, Coupon>(&format!(
        "SELECT {COUPON_COLUMNS} FROM coupons ORDER BY created_at DESC"
    ))
    .fetch_all(&pool)
    .await?;

    Ok(Json(coupons))
}

/// Issues a coupon with a generated code.
/// Admin only.
pub async fn create_coupon(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateCouponRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let coupon = sqlx::query_as::<_, Coupon>(&format!(
        r#"
        INSERT INTO coupons
            (code, batch_id, assigned_to, valid_days, enrollment_valid_from, enrollment_valid_until,
             payment_amount, payment_date, next_payment_date)
        VALUES ($1, $2, $3, COALESCE($4, 30), $5, $6, $7, $8, $9)
        RETURNING {COUPON_COLUMNS}
        "#
    ))
    .bind(enrollment::generate_coupon_code())
    .bind(payload.batch_id)
    .bind(payload.assigned_to)
    .bind(payload.valid_days)
    .bind(payload.enrollment_valid_from)
    .bind(payload.enrollment_valid_until)
    .bind(payload.payment_amount)
    .bind(payload.payment_date)
    .bind(payload.next_payment_date)
    .fetch_one(&pool)
    .await
    .map_err(reference_error("batch or user"))?;

    sync_assignee(&pool, &coupon).await?;

    tracing::info!(coupon_id = coupon.id, batch_id = coupon.batch_id, "Coupon issued");
    Ok((StatusCode::CREATED, Json(coupon)))
}

/// Updates a coupon and reconciles the affected enrollments.
/// Admin only.
pub async fn update_coupon(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCouponRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let previous = sqlx::query_as::<_, Coupon>(&format!(
        "SELECT {COUPON_COLUMNS} FROM coupons WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE coupons SET ");
    let mut separated = builder.separated(", ");

    if let Some(user_id) = payload.assigned_to {
        separated.push("assigned_to = ");
        separated.push_bind_unseparated(user_id);
    }
    if let Some(days) = payload.valid_days {
        separated.push("valid_days = ");
        separated.push_bind_unseparated(days);
    }
    if let Some(from) = payload.enrollment_valid_from {
        separated.push("enrollment_valid_from = ");
        separated.push_bind_unseparated(from);
    }
    if let Some(until) = payload.enrollment_valid_until {
        separated.push("enrollment_valid_until = ");
        separated.push_bind_unseparated(until);
    }
    if let Some(amount) = payload.payment_amount {
        separated.push("payment_amount = ");
        separated.push_bind_unseparated(amount);
    }
    if let Some(date) = payload.payment_date {
        separated.push("payment_date = ");
        separated.push_bind_unseparated(date);
    }
    if let Some(date) = payload.next_payment_date {
        separated.push("next_payment_date = ");
        separated.push_bind_unseparated(date);
    }
    separated.push("id = id");

    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(format!(" RETURNING {COUPON_COLUMNS}"));

    let coupon = builder
        .build_query_as::<Coupon>()
        .fetch_one(&pool)
        .await
        .map_err(reference_error("user"))?;

    sync_assignee(&pool, &coupon).await?;
    if previous.assigned_to.is_some() && previous.assigned_to != coupon.assigned_to {
        sync_assignee(&pool, &previous).await?;
    }

    Ok(Json(coupon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn window_end_must_follow_start() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        assert!(check_window(Some(start), Some(start + Duration::hours(1))).is_ok());
        assert!(check_window(Some(start), Some(start)).is_err());
        assert!(check_window(None, Some(start)).is_ok());
    }

    #[test]
    fn blank_quiz_coupon_clears_it() {
        assert_eq!(normalized_quiz_coupon(Some("  ")), None);
        assert_eq!(normalized_quiz_coupon(Some(" HACK24 ")), Some("HACK24".to_string()));
        assert_eq!(normalized_quiz_coupon(None), None);
    }
}
