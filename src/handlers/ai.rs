// src/handlers/ai.rs

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::FromRow;
use validator::Validate;

use crate::{
    config::PROGRESS_ANALYSIS_ATTEMPTS,
    error::AppError,
    models::{
        attempt::AskTutorRequest,
        quiz::GenerateQuizRequest,
    },
    services::{
        ai_quiz,
        attempt as attempts,
        llm::GeneratedQuizReply,
        mail::messages,
    },
    state::AppState,
    utils::jwt::Claims,
};

fn require_model(state: &AppState) -> Result<(), AppError> {
    if state.llm.is_available() {
        Ok(())
    } else {
        Err(AppError::ServiceUnavailable("model API key not configured".to_string()))
    }
}

/// Tutor explanation of one answer in a finished attempt.
pub async fn ask_tutor(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<AskTutorRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let attempt = attempts::fetch_owned_attempt(&state.pool, payload.attempt_id, user_id).await?;
    if !attempt.is_finished() {
        return Err(AppError::BadRequest(
            "Explanations are available once the attempt is finished.".to_string(),
        ));
    }

    let row: Option<(String, String, Option<String>)> = sqlx::query_as(
        r#"
        SELECT q.text, c.text,
               (SELECT cc.text FROM choices cc
                WHERE cc.question_id = q.id AND cc.is_correct
                ORDER BY cc.id LIMIT 1)
        FROM answers a
        JOIN questions q ON q.id = a.question_id
        JOIN choices c ON c.id = a.selected_choice_id
        WHERE a.attempt_id = $1 AND a.question_id = $2
        "#,
    )
    .bind(attempt.id)
    .bind(payload.question_id)
    .fetch_optional(&state.pool)
    .await?;

    let (question, user_answer, correct_answer) =
        row.ok_or_else(|| AppError::NotFound("Answer not found".to_string()))?;

    require_model(&state)?;
    let explanation = state
        .llm
        .explain_answer(&question, &user_answer, correct_answer.as_deref().unwrap_or(""))
        .await?;

    Ok(Json(json!({ "explanation": explanation.trim() })))
}

#[derive(Debug, FromRow)]
struct RecentAttempt {
    quiz_title: String,
    category_name: Option<String>,
    score: i32,
    total_questions: i64,
    created_at: DateTime<Utc>,
}

fn progress_history(rows: &[RecentAttempt]) -> String {
    rows.iter()
        .map(|r| {
            let pct = if r.total_questions > 0 {
                r.score as f64 / r.total_questions as f64 * 100.0
            } else {
                0.0
            };
            format!(
                "- Quiz: '{}' (Category: {}) | Score: {:.0}% | Date: {}\n",
                r.quiz_title,
                r.category_name.as_deref().unwrap_or("General"),
                pct,
                r.created_at.format("%Y-%m-%d"),
            )
        })
        .collect()
}

/// Mentor feedback on the caller's recent attempts.
pub async fn analyze_progress(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let rows = sqlx::query_as::<_, RecentAttempt>(
        r#"
        SELECT q.title AS quiz_title, c.name AS category_name, a.score,
               (SELECT COUNT(*) FROM questions qq WHERE qq.quiz_id = q.id) AS total_questions,
               a.created_at
        FROM attempts a
        JOIN quizzes q ON q.id = a.quiz_id
        LEFT JOIN categories c ON c.id = q.category_id
        WHERE a.user_id = $1 AND a.finished_at IS NOT NULL
        ORDER BY a.created_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(PROGRESS_ANALYSIS_ATTEMPTS)
    .fetch_all(&state.pool)
    .await?;

    if rows.is_empty() {
        return Ok(Json(json!({
            "analysis": "You haven't taken any quizzes yet! Take a few quizzes so I can analyze your performance."
        })));
    }

    require_model(&state)?;
    let analysis = state.llm.analyze_progress(&progress_history(&rows)).await?;

    Ok(Json(json!({ "analysis": analysis.trim() })))
}

/// Generates a practice quiz, subject to the monthly quota.
pub async fn generate_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<GenerateQuizRequest>,
) -> Result<Response, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;
    let topic = payload.topic.trim();
    if topic.is_empty() {
        return Err(AppError::BadRequest("Topic is required".to_string()));
    }

    let limit = state.config.ai_quiz_monthly_limit;
    let used = ai_quiz::monthly_count(&state.pool, user_id, Utc::now()).await?;
    if used >= limit {
        let body = json!({
            "error": format!(
                "You have reached your limit of {limit} AI quizzes this month. Please try again next month!"
            ),
            "limit_reached": true,
        });
        return Ok((StatusCode::FORBIDDEN, Json(body)).into_response());
    }

    require_model(&state)?;
    let generated = match state.llm.generate_quiz(topic, payload.limit, &payload.difficulty).await? {
        GeneratedQuizReply::Quiz(quiz) => quiz,
        GeneratedQuizReply::Refused(reason) => {
            tracing::info!(user_id, "Model refused quiz topic");
            return Err(AppError::BadRequest(reason));
        }
    };

    let title = ai_quiz::final_title(topic, generated.title.as_deref(), &payload.difficulty);
    let (quiz_id, saved) = ai_quiz::save_generated_quiz(
        &state.pool,
        user_id,
        topic,
        &title,
        &payload.difficulty,
        payload.limit,
        &generated,
    )
    .await?;

    tracing::info!(user_id, quiz_id, questions = saved, "Generated quiz saved");

    let recipient: Option<(String, String, String)> =
        sqlx::query_as("SELECT email, username, first_name FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&state.pool)
            .await?;
    if let Some((email, username, first_name)) = recipient {
        let name = if first_name.trim().is_empty() { username } else { first_name };
        let link = format!("{}/api/quizzes/{}", state.config.site_url, quiz_id);
        state
            .mailer
            .send_in_background(messages::ai_quiz_ready(&email, &name, &title, saved, &link));
    }

    let body = json!({
        "success": true,
        "quiz_id": quiz_id,
        "title": title,
        "question_count": saved,
        "remaining_this_month": (limit - used - 1).max(0),
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}
