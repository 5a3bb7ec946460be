//! Quiz attempt lifecycle: start, answer, navigate, finish, score.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{PgPool, types::Json};
use std::collections::BTreeMap;

use crate::{
    error::AppError,
    models::{
        attempt::{ATTEMPT_COLUMNS, AnswerReview, Attempt, NavAction, NextStep},
        quiz::{QUIZ_COLUMNS, Quiz},
    },
    services::{
        access::{self, WindowState},
        mail::messages,
    },
    state::AppState,
};

/// Reason recorded when the timer ran out.
pub const TIME_EXPIRED_REASON: &str = "Time Expired";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub score: i32,
    pub total: i64,
    pub percentage: f64,
    pub passed: bool,
}

/// Scores `correct` out of `total`. A quiz without questions never passes.
pub fn evaluate(correct: i64, total: i64, passing_percentage: i32) -> Evaluation {
    if total <= 0 {
        return Evaluation {
            score: correct as i32,
            total: 0,
            percentage: 0.0,
            passed: false,
        };
    }
    let raw = correct as f64 / total as f64 * 100.0;
    Evaluation {
        score: correct as i32,
        total,
        percentage: (raw * 100.0).round() / 100.0,
        passed: raw >= passing_percentage as f64,
    }
}

pub fn remaining_seconds(created_at: DateTime<Utc>, duration_minutes: i32, now: DateTime<Utc>) -> i64 {
    let deadline = created_at + Duration::minutes(duration_minutes as i64);
    (deadline - now).num_seconds().max(0)
}

/// Position of a question within the quiz, ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub index: usize,
    pub total: usize,
    pub prev: Option<i64>,
    pub next: Option<i64>,
}

/// `question_ids` must be sorted ascending.
pub fn position(question_ids: &[i64], current: i64) -> Option<Position> {
    let idx = question_ids.iter().position(|&id| id == current)?;
    Some(Position {
        index: idx + 1,
        total: question_ids.len(),
        prev: idx.checked_sub(1).map(|i| question_ids[i]),
        next: question_ids.get(idx + 1).copied(),
    })
}

/// First question after the highest answered one, else the first question.
pub fn resume_question(question_ids: &[i64], last_answered: Option<i64>) -> Option<i64> {
    let first = question_ids.first().copied();
    match last_answered {
        Some(last) => question_ids.iter().copied().find(|&id| id > last).or(first),
        None => first,
    }
}

/// Where a navigation action leads. `None` means the attempt should be finished.
pub fn navigate(action: NavAction, pos: &Position, attempt_id: i64, current: i64) -> Option<NextStep> {
    let stay = NextStep::Question {
        attempt_id,
        question_id: current,
    };
    match action {
        NavAction::Submit => None,
        NavAction::Next => Some(pos.next.map_or(stay, |question_id| NextStep::Question {
            attempt_id,
            question_id,
        })),
        NavAction::Prev => Some(pos.prev.map_or(stay, |question_id| NextStep::Question {
            attempt_id,
            question_id,
        })),
        NavAction::Stay => Some(stay),
    }
}

pub async fn fetch_quiz(pool: &PgPool, quiz_id: i64) -> Result<Quiz, AppError> {
    sqlx::query_as::<_, Quiz>(&format!("SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = $1"))
        .bind(quiz_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))
}

/// Loads an attempt owned by `user_id`. Someone else's attempt is reported as missing.
pub async fn fetch_owned_attempt(pool: &PgPool, attempt_id: i64, user_id: i64) -> Result<Attempt, AppError> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = $1 AND user_id = $2"
    ))
    .bind(attempt_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))
}

pub async fn question_ids(pool: &PgPool, quiz_id: i64) -> Result<Vec<i64>, AppError> {
    let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM questions WHERE quiz_id = $1 ORDER BY id")
        .bind(quiz_id)
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}

async fn count_questions(pool: &PgPool, quiz_id: i64) -> Result<i64, AppError> {
    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM questions WHERE quiz_id = $1")
        .bind(quiz_id)
        .fetch_one(pool)
        .await?;
    Ok(total)
}

async fn count_correct(pool: &PgPool, attempt_id: i64) -> Result<i64, AppError> {
    let (correct,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM answers WHERE attempt_id = $1 AND is_correct")
            .bind(attempt_id)
            .fetch_one(pool)
            .await?;
    Ok(correct)
}

pub async fn evaluate_attempt(pool: &PgPool, attempt: &Attempt, quiz: &Quiz) -> Result<Evaluation, AppError> {
    let correct = count_correct(pool, attempt.id).await?;
    let total = count_questions(pool, quiz.id).await?;
    Ok(evaluate(correct, total, quiz.passing_percentage))
}

pub async fn resume_question_for(pool: &PgPool, attempt: &Attempt) -> Result<Option<i64>, AppError> {
    let ids = question_ids(pool, attempt.quiz_id).await?;
    let (last,): (Option<i64>,) =
        sqlx::query_as("SELECT MAX(question_id) FROM answers WHERE attempt_id = $1")
            .bind(attempt.id)
            .fetch_one(pool)
            .await?;
    Ok(resume_question(&ids, last))
}

/// Closes the attempt with a freshly computed score.
///
/// Only the first caller wins: the update is conditional on the attempt still
/// being open. Returns the evaluation when this call finished it.
pub async fn finish_attempt(
    state: &AppState,
    attempt: &Attempt,
    quiz: &Quiz,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<Evaluation>, AppError> {
    let eval = evaluate_attempt(&state.pool, attempt, quiz).await?;

    let updated = sqlx::query(
        r#"
        UPDATE attempts
        SET score = $2, passed = $3, finished_at = $4, auto_submit_reason = $5
        WHERE id = $1 AND finished_at IS NULL
        "#,
    )
    .bind(attempt.id)
    .bind(eval.score)
    .bind(eval.passed)
    .bind(now)
    .bind(reason)
    .execute(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to finish attempt {}: {:?}", attempt.id, e);
        AppError::InternalServerError(e.to_string())
    })?;

    if updated.rows_affected() == 0 {
        return Ok(None);
    }

    tracing::info!(
        attempt_id = attempt.id,
        user_id = attempt.user_id,
        score = eval.score,
        passed = eval.passed,
        reason = reason.unwrap_or("submitted"),
        "Attempt finished"
    );

    if quiz.is_hackathon() {
        notify_hackathon_result(state, attempt, quiz, &eval).await;
    }

    Ok(Some(eval))
}

/// Best-effort result e-mail. Lookup failures are logged and swallowed.
async fn notify_hackathon_result(state: &AppState, attempt: &Attempt, quiz: &Quiz, eval: &Evaluation) {
    let recipient: Result<Option<(String, String, String)>, sqlx::Error> =
        sqlx::query_as("SELECT email, username, first_name FROM users WHERE id = $1")
            .bind(attempt.user_id)
            .fetch_optional(&state.pool)
            .await;

    let (email, username, first_name) = match recipient {
        Ok(Some(row)) => row,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Could not load recipient for hackathon result: {:?}", e);
            return;
        }
    };

    let name = if first_name.trim().is_empty() { username } else { first_name };
    let result_link = format!("{}/api/attempts/{}/result", state.config.site_url, attempt.id);
    let mail = messages::hackathon_result(&messages::HackathonResult {
        to: &email,
        name: &name,
        quiz_title: &quiz.title,
        score: eval.score,
        total: eval.total,
        percentage: eval.percentage,
        passed: eval.passed,
        result_link: &result_link,
    });
    state.mailer.send_in_background(mail);
}

/// Finishes the attempt with "Time Expired" when its timer has run out.
/// Returns true when the attempt is (now) finished.
pub async fn expire_if_overdue(
    state: &AppState,
    attempt: &Attempt,
    quiz: &Quiz,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    if attempt.is_finished() {
        return Ok(true);
    }
    if remaining_seconds(attempt.created_at, quiz.duration_minutes, now) > 0 {
        return Ok(false);
    }
    finish_attempt(state, attempt, quiz, Some(TIME_EXPIRED_REASON), now).await?;
    Ok(true)
}

/// Upserts the answer to a question. The choice must belong to the question.
pub async fn record_answer(
    pool: &PgPool,
    attempt_id: i64,
    question_id: i64,
    choice_id: i64,
) -> Result<bool, AppError> {
    let choice: Option<(bool,)> =
        sqlx::query_as("SELECT is_correct FROM choices WHERE id = $1 AND question_id = $2")
            .bind(choice_id)
            .bind(question_id)
            .fetch_optional(pool)
            .await?;

    let (is_correct,) =
        choice.ok_or_else(|| AppError::BadRequest("Choice does not belong to this question".to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO answers (attempt_id, question_id, selected_choice_id, is_correct)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (attempt_id, question_id) DO UPDATE SET
            selected_choice_id = EXCLUDED.selected_choice_id,
            is_correct = EXCLUDED.is_correct
        "#,
    )
    .bind(attempt_id)
    .bind(question_id)
    .bind(choice_id)
    .bind(is_correct)
    .execute(pool)
    .await?;

    Ok(is_correct)
}

pub async fn selected_choice(pool: &PgPool, attempt_id: i64, question_id: i64) -> Result<Option<i64>, AppError> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT selected_choice_id FROM answers WHERE attempt_id = $1 AND question_id = $2",
    )
    .bind(attempt_id)
    .bind(question_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(id,)| id))
}

/// Where a user with a hackathon attempt already on record must go.
async fn existing_hackathon_step(pool: &PgPool, user_id: i64, quiz_id: i64) -> Result<Option<NextStep>, AppError> {
    let existing = sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE user_id = $1 AND quiz_id = $2 \
         ORDER BY created_at LIMIT 1"
    ))
    .bind(user_id)
    .bind(quiz_id)
    .fetch_optional(pool)
    .await?;

    let Some(existing) = existing else { return Ok(None) };
    if existing.is_finished() {
        return Ok(Some(NextStep::Result { attempt_id: existing.id }));
    }
    let question_id = resume_question_for(pool, &existing)
        .await?
        .ok_or_else(|| AppError::BadRequest("No questions are available in this quiz yet.".to_string()))?;
    Ok(Some(NextStep::Question {
        attempt_id: existing.id,
        question_id,
    }))
}

/// Opens a new attempt or points at the one the user must continue.
///
/// Hackathon attempts carry `single_attempt`, which a partial unique index
/// keeps to one row per user and quiz even under concurrent starts.
pub async fn start_attempt(
    pool: &PgPool,
    user_id: i64,
    quiz: &Quiz,
    now: DateTime<Utc>,
) -> Result<NextStep, AppError> {
    if !access::has_quiz_access(pool, user_id, quiz).await? {
        return Err(AppError::Forbidden(
            "Access revoked or invalid. Please re-enter the coupon.".to_string(),
        ));
    }

    let single_attempt = quiz.is_hackathon();
    if single_attempt {
        if access::quiz_window(quiz, now) != WindowState::Open {
            return Err(AppError::Forbidden("This Hackathon is currently not active.".to_string()));
        }
        if let Some(step) = existing_hackathon_step(pool, user_id, quiz.id).await? {
            return Ok(step);
        }
    }

    let first_question = question_ids(pool, quiz.id)
        .await?
        .first()
        .copied()
        .ok_or_else(|| AppError::BadRequest("No questions are available in this quiz yet.".to_string()))?;

    let inserted: Option<(i64,)> = sqlx::query_as(
        "INSERT INTO attempts (user_id, quiz_id, created_at, single_attempt) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (user_id, quiz_id) WHERE single_attempt DO NOTHING \
         RETURNING id",
    )
    .bind(user_id)
    .bind(quiz.id)
    .bind(now)
    .bind(single_attempt)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create attempt: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let Some((attempt_id,)) = inserted else {
        // Lost the race to a concurrent start of the same hackathon.
        tracing::debug!(user_id, quiz_id = quiz.id, "Hackathon attempt already created");
        return existing_hackathon_step(pool, user_id, quiz.id)
            .await?
            .ok_or_else(|| AppError::Conflict("Attempt is already being created.".to_string()));
    };

    tracing::info!(attempt_id, user_id, quiz_id = quiz.id, "Attempt started");

    Ok(NextStep::Question {
        attempt_id,
        question_id: first_question,
    })
}

/// Rewrites the stored score from the answers. Returns the fresh evaluation.
pub async fn refresh_score(pool: &PgPool, attempt: &Attempt, quiz: &Quiz) -> Result<Evaluation, AppError> {
    let eval = evaluate_attempt(pool, attempt, quiz).await?;
    if eval.score != attempt.score || eval.passed != attempt.passed {
        sqlx::query("UPDATE attempts SET score = $2, passed = $3 WHERE id = $1")
            .bind(attempt.id)
            .bind(eval.score)
            .bind(eval.passed)
            .execute(pool)
            .await?;
    }
    Ok(eval)
}

pub async fn review(pool: &PgPool, attempt_id: i64) -> Result<Vec<AnswerReview>, AppError> {
    let rows = sqlx::query_as::<_, AnswerReview>(
        r#"
        SELECT a.question_id, q.text AS question_text, a.selected_choice_id,
               c.text AS selected_choice_text, a.is_correct,
               (SELECT cc.text FROM choices cc
                WHERE cc.question_id = a.question_id AND cc.is_correct
                ORDER BY cc.id LIMIT 1) AS correct_choice_text
        FROM answers a
        JOIN questions q ON q.id = a.question_id
        JOIN choices c ON c.id = a.selected_choice_id
        WHERE a.attempt_id = $1
        ORDER BY a.question_id
        "#,
    )
    .bind(attempt_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// The user's unfinished hackathon attempt, if any.
pub async fn active_hackathon_attempt(pool: &PgPool, user_id: i64) -> Result<Option<Attempt>, AppError> {
    let attempt = sqlx::query_as::<_, Attempt>(
        r#"
        SELECT a.id, a.user_id, a.quiz_id, a.score, a.passed, a.finished_at, a.created_at,
               a.auto_submit_reason, a.lifelines_used
        FROM attempts a
        JOIN quizzes q ON q.id = a.quiz_id
        WHERE a.user_id = $1 AND q.quiz_type = 'hackathon' AND a.finished_at IS NULL
        ORDER BY a.created_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(attempt)
}

/// Marks a lifeline as used. Fails when it was already used or the attempt closed.
pub async fn mark_lifeline_used(pool: &PgPool, attempt_id: i64, key: &str) -> Result<(), AppError> {
    let mut used = BTreeMap::new();
    used.insert(key.to_string(), true);

    let updated = sqlx::query(
        r#"
        UPDATE attempts
        SET lifelines_used = COALESCE(lifelines_used, '{}'::jsonb) || $2
        WHERE id = $1
          AND finished_at IS NULL
          AND NOT COALESCE((lifelines_used ->> $3)::boolean, FALSE)
        "#,
    )
    .bind(attempt_id)
    .bind(Json(used))
    .bind(key)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::BadRequest("Lifeline already used".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn evaluate_compares_against_threshold() {
        let e = evaluate(3, 4, 75);
        assert_eq!(e.score, 3);
        assert_eq!(e.percentage, 75.0);
        assert!(e.passed);

        assert!(!evaluate(2, 4, 75).passed);
    }

    #[test]
    fn evaluate_rounds_to_two_places() {
        assert_eq!(evaluate(1, 3, 50).percentage, 33.33);
        assert_eq!(evaluate(2, 3, 50).percentage, 66.67);
    }

    #[test]
    fn empty_quiz_never_passes() {
        let e = evaluate(0, 0, 0);
        assert!(!e.passed);
        assert_eq!(e.percentage, 0.0);
    }

    #[test]
    fn remaining_time_never_negative() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(remaining_seconds(start, 10, start + Duration::minutes(4)), 360);
        assert_eq!(remaining_seconds(start, 10, start + Duration::minutes(11)), 0);
    }

    #[test]
    fn position_reports_neighbours() {
        let ids = [4, 9, 12];
        let first = position(&ids, 4).unwrap();
        assert_eq!((first.index, first.total, first.prev, first.next), (1, 3, None, Some(9)));

        let last = position(&ids, 12).unwrap();
        assert_eq!((last.index, last.prev, last.next), (3, Some(9), None));

        assert!(position(&ids, 5).is_none());
    }

    #[test]
    fn resume_goes_past_last_answer() {
        let ids = [4, 9, 12];
        assert_eq!(resume_question(&ids, None), Some(4));
        assert_eq!(resume_question(&ids, Some(4)), Some(9));
        assert_eq!(resume_question(&ids, Some(12)), Some(4));
        assert_eq!(resume_question(&[], None), None);
    }

    #[test]
    fn navigation_stays_at_edges() {
        let ids = [4, 9];
        let pos = position(&ids, 9).unwrap();
        assert_eq!(
            navigate(NavAction::Next, &pos, 1, 9),
            Some(NextStep::Question { attempt_id: 1, question_id: 9 })
        );
        assert_eq!(
            navigate(NavAction::Prev, &pos, 1, 9),
            Some(NextStep::Question { attempt_id: 1, question_id: 4 })
        );
        assert_eq!(navigate(NavAction::Submit, &pos, 1, 9), None);
    }
}
