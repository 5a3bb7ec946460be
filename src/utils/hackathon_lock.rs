// src/utils/hackathon_lock.rs

use axum::{
    Json,
    body::Body,
    extract::{OriginalUri, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;

use crate::{error::AppError, services::attempt as attempts, state::AppState, utils::jwt::Claims};

/// Paths a user may reach while locked into attempt `attempt_id`.
pub fn is_allowed_path(path: &str, attempt_id: i64) -> bool {
    let own_attempt = format!("/api/attempts/{attempt_id}/");
    path.starts_with(&own_attempt)
        || path == "/api/lifelines"
        || path.starts_with("/api/ai/")
}

/// Keeps a user with a running hackathon inside it.
///
/// Must run after `auth_middleware`. Requests outside the attempt get 409
/// with the question to resume; an attempt whose timer ran out is closed
/// and the lock lifted.
pub async fn hackathon_lock(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(claims) = req.extensions().get::<Claims>() else {
        return Ok(next.run(req).await);
    };
    let user_id = claims.user_id()?;

    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let Some(active) = attempts::active_hackathon_attempt(&state.pool, user_id).await? else {
        return Ok(next.run(req).await);
    };

    if is_allowed_path(&path, active.id) {
        return Ok(next.run(req).await);
    }

    let quiz = attempts::fetch_quiz(&state.pool, active.quiz_id).await?;
    if attempts::expire_if_overdue(&state, &active, &quiz, Utc::now()).await? {
        return Ok(next.run(req).await);
    }

    let question_id = attempts::resume_question_for(&state.pool, &active).await?;
    tracing::debug!(user_id, attempt_id = active.id, path = %path, "Request blocked by hackathon lock");

    let body = Json(json!({
        "error": "Finish your hackathon before doing anything else.",
        "attempt_id": active.id,
        "question_id": question_id,
    }));
    Ok((StatusCode::CONFLICT, body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_running_attempt_is_reachable() {
        assert!(is_allowed_path("/api/attempts/12/questions/3", 12));
        assert!(is_allowed_path("/api/attempts/12/result", 12));
        assert!(!is_allowed_path("/api/attempts/123/result", 12));
        assert!(!is_allowed_path("/api/attempts/history", 12));
        assert!(!is_allowed_path("/api/quizzes", 12));
    }

    #[test]
    fn lifelines_and_ai_stay_open() {
        assert!(is_allowed_path("/api/lifelines", 5));
        assert!(is_allowed_path("/api/ai/ask", 5));
        assert!(!is_allowed_path("/api/dashboard", 5));
    }
}
