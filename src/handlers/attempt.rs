// src/handlers/attempt.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;

use crate::{
    config::DEFAULT_VIOLATION_REASON,
    error::AppError,
    models::{
        attempt::{AnswerQuestionRequest, Attempt, CertificateParams, HistoryParams, NavAction, NextStep},
        quiz::{Choice, PublicChoice, Question, Quiz, QuizType},
    },
    services::{
        attempt::{self as attempts, TIME_EXPIRED_REASON},
        certificate::{self, CertificateData},
        leaderboard::{self, HistoryFilter},
    },
    state::AppState,
    utils::jwt::Claims,
};

async fn fetch_question(pool: &sqlx::PgPool, quiz_id: i64, question_id: i64) -> Result<Question, AppError> {
    sqlx::query_as::<_, Question>("SELECT id, quiz_id, text FROM questions WHERE id = $1 AND quiz_id = $2")
        .bind(question_id)
        .bind(quiz_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Question not found".to_string()))
}

pub(crate) async fn fetch_choices(pool: &sqlx::PgPool, question_id: i64) -> Result<Vec<Choice>, AppError> {
    let choices = sqlx::query_as::<_, Choice>(
        "SELECT id, question_id, text, is_correct FROM choices WHERE question_id = $1 ORDER BY id",
    )
    .bind(question_id)
    .fetch_all(pool)
    .await?;
    Ok(choices)
}

fn finished(attempt_id: i64) -> serde_json::Value {
    json!({
        "finished": true,
        "next": NextStep::Result { attempt_id },
    })
}

/// Shows one question of a running attempt. An overdue attempt is closed here.
pub async fn show_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((attempt_id, question_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let now = Utc::now();

    let attempt = attempts::fetch_owned_attempt(&state.pool, attempt_id, user_id).await?;
    let quiz = attempts::fetch_quiz(&state.pool, attempt.quiz_id).await?;

    if attempts::expire_if_overdue(&state, &attempt, &quiz, now).await? {
        return Ok(Json(finished(attempt.id)));
    }

    let question = fetch_question(&state.pool, quiz.id, question_id).await?;
    let ids = attempts::question_ids(&state.pool, quiz.id).await?;
    let position = attempts::position(&ids, question.id)
        .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    let choices: Vec<PublicChoice> = fetch_choices(&state.pool, question.id)
        .await?
        .iter()
        .map(PublicChoice::from)
        .collect();
    let selected = attempts::selected_choice(&state.pool, attempt.id, question.id).await?;

    Ok(Json(json!({
        "finished": false,
        "attempt_id": attempt.id,
        "quiz": {
            "id": quiz.id,
            "title": quiz.title,
            "quiz_type": quiz.quiz_type,
        },
        "question": {
            "id": question.id,
            "text": question.text,
        },
        "choices": choices,
        "selected_choice_id": selected,
        "position": position,
        "remaining_seconds": attempts::remaining_seconds(attempt.created_at, quiz.duration_minutes, now),
        "lifelines_used": attempt.lifelines_used.0,
    })))
}

/// Saves an answer and moves according to the requested action.
pub async fn answer_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((attempt_id, question_id)): Path<(i64, i64)>,
    Json(payload): Json<AnswerQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let now = Utc::now();

    let attempt = attempts::fetch_owned_attempt(&state.pool, attempt_id, user_id).await?;
    let quiz = attempts::fetch_quiz(&state.pool, attempt.quiz_id).await?;

    if attempts::expire_if_overdue(&state, &attempt, &quiz, now).await? {
        return Ok(Json(finished(attempt.id)));
    }

    if payload.force_submit {
        let reason = payload
            .violation_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_VIOLATION_REASON);
        tracing::warn!(attempt_id, user_id, reason, "Attempt force-submitted");
        attempts::finish_attempt(&state, &attempt, &quiz, Some(reason), now).await?;
        return Ok(Json(finished(attempt.id)));
    }

    let question = fetch_question(&state.pool, quiz.id, question_id).await?;
    if let Some(choice_id) = payload.choice_id {
        attempts::record_answer(&state.pool, attempt.id, question.id, choice_id).await?;
    }

    let ids = attempts::question_ids(&state.pool, quiz.id).await?;
    let position = attempts::position(&ids, question.id)
        .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    let action = payload.action.unwrap_or(NavAction::Next);
    match attempts::navigate(action, &position, attempt.id, question.id) {
        Some(next) => Ok(Json(json!({ "finished": false, "next": next }))),
        None => {
            attempts::finish_attempt(&state, &attempt, &quiz, None, now).await?;
            Ok(Json(finished(attempt.id)))
        }
    }
}

/// Re-reads a finished attempt so the score matches its answers.
async fn load_finished(state: &AppState, attempt_id: i64, user_id: i64) -> Result<(Attempt, Quiz), AppError> {
    let attempt = attempts::fetch_owned_attempt(&state.pool, attempt_id, user_id).await?;
    let quiz = attempts::fetch_quiz(&state.pool, attempt.quiz_id).await?;

    if attempt.is_finished() {
        return Ok((attempt, quiz));
    }
    if !attempts::expire_if_overdue(state, &attempt, &quiz, Utc::now()).await? {
        return Err(AppError::Conflict("This attempt is still in progress.".to_string()));
    }
    let attempt = attempts::fetch_owned_attempt(&state.pool, attempt_id, user_id).await?;
    Ok((attempt, quiz))
}

pub async fn get_result(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let (attempt, quiz) = load_finished(&state, attempt_id, user_id).await?;

    let eval = attempts::refresh_score(&state.pool, &attempt, &quiz).await?;
    let review = attempts::review(&state.pool, attempt.id).await?;

    let certificate_available = quiz.is_hackathon() && quiz.generate_certificate && eval.passed;

    Ok(Json(json!({
        "attempt_id": attempt.id,
        "quiz": {
            "id": quiz.id,
            "title": quiz.title,
            "quiz_type": quiz.quiz_type,
            "passing_percentage": quiz.passing_percentage,
        },
        "score": eval.score,
        "total": eval.total,
        "percentage": eval.percentage,
        "passed": eval.passed,
        "finished_at": attempt.finished_at,
        "auto_submit_reason": attempt.auto_submit_reason,
        "time_expired": attempt.auto_submit_reason.as_deref() == Some(TIME_EXPIRED_REASON),
        "certificate_available": certificate_available,
        "review": review,
    })))
}

/// PDF certificate of a passed hackathon attempt.
pub async fn download_certificate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
    Query(params): Query<CertificateParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let (attempt, quiz) = load_finished(&state, attempt_id, user_id).await?;

    if !quiz.is_hackathon() || !quiz.generate_certificate {
        return Err(AppError::Forbidden("Certificates are only available for hackathons.".to_string()));
    }

    let eval = attempts::refresh_score(&state.pool, &attempt, &quiz).await?;
    if !eval.passed {
        return Err(AppError::Forbidden(
            "You did not pass this hackathon, so no certificate is available.".to_string(),
        ));
    }

    let (first_name, last_name, username, college): (String, String, String, Option<String>) = sqlx::query_as(
        r#"
        SELECT u.first_name, u.last_name, u.username, c.name
        FROM users u
        LEFT JOIN colleges c ON c.id = u.college_id
        WHERE u.id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(&state.pool)
    .await?;

    let data = CertificateData {
        recipient: certificate::recipient_name(&first_name, &last_name, &username),
        college,
        quiz_title: quiz.title.clone(),
        quiz_type: QuizType::Hackathon,
        percentage: certificate::integer_percentage(eval.score, eval.total),
        finished_at: attempt.finished_at.unwrap_or_else(Utc::now),
    };
    let pdf = certificate::render(&data)?;

    let disposition = match params.download.as_deref() {
        Some("1") | Some("true") => "attachment",
        _ => "inline",
    };
    let content_disposition = format!("{}; filename=\"{}\"", disposition, certificate::file_name(&quiz.title));

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition),
        ],
        pdf,
    ))
}

/// The caller's attempts, newest first.
pub async fn list_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let filter = HistoryFilter {
        query: params.q,
        quiz_type: params.quiz_type.as_deref().and_then(QuizType::parse),
    };
    let page = leaderboard::history(&state.pool, user_id, &filter, params.page.unwrap_or(1)).await?;

    Ok(Json(page))
}
