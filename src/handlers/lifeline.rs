// src/handlers/lifeline.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::Utc;
use serde_json::json;

use crate::{
    error::AppError,
    handlers::attempt::fetch_choices,
    models::attempt::LifelineRequest,
    services::{
        attempt as attempts,
        lifeline::{self, LifelineKind},
    },
    state::AppState,
    utils::jwt::Claims,
};

/// Uses one lifeline on the current question of a running attempt.
pub async fn use_lifeline(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<LifelineRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let kind = payload.lifeline_type;

    let attempt = attempts::fetch_owned_attempt(&state.pool, payload.attempt_id, user_id).await?;
    let quiz = attempts::fetch_quiz(&state.pool, attempt.quiz_id).await?;

    if attempts::expire_if_overdue(&state, &attempt, &quiz, Utc::now()).await? {
        return Err(AppError::BadRequest("This attempt is already finished.".to_string()));
    }
    if lifeline::already_used(&attempt.lifelines_used, kind) {
        return Err(AppError::BadRequest("Lifeline already used".to_string()));
    }

    let question: Option<(String,)> =
        sqlx::query_as("SELECT text FROM questions WHERE id = $1 AND quiz_id = $2")
            .bind(payload.question_id)
            .bind(quiz.id)
            .fetch_optional(&state.pool)
            .await?;
    let (question_text,) =
        question.ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    let choices = fetch_choices(&state.pool, payload.question_id).await?;

    // The hint is fetched first so an unreachable model leaves the lifeline unused.
    let body = match kind {
        LifelineKind::FiftyFifty => {
            let removed = lifeline::fifty_fifty(&choices, &mut rand::thread_rng());
            json!({ "type": kind, "remove_ids": removed })
        }
        LifelineKind::Poll => {
            let poll = lifeline::simulated_poll(&choices, &mut rand::thread_rng());
            json!({ "type": kind, "poll": poll })
        }
        LifelineKind::AskAi => {
            if !state.llm.is_available() {
                return Err(AppError::ServiceUnavailable("model API key not configured".to_string()));
            }
            let hint = state
                .llm
                .lifeline_hint(&lifeline::hint_prompt(&question_text, &choices))
                .await?;
            json!({ "type": kind, "hint": hint.trim() })
        }
    };

    attempts::mark_lifeline_used(&state.pool, attempt.id, kind.key()).await?;
    tracing::info!(attempt_id = attempt.id, user_id, lifeline = kind.key(), "Lifeline used");

    Ok(Json(body))
}
