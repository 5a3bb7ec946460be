// src/models/attempt.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::collections::BTreeMap;

/// Represents the 'attempts' table in the database.
/// One user's run through a quiz.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub user_id: i64,
    pub quiz_id: i64,

    /// Count of correct answers. Recomputed whenever the result is read.
    pub score: i32,
    pub passed: bool,

    /// `None` while in progress.
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,

    /// Why the attempt was closed without an explicit submit.
    pub auto_submit_reason: Option<String>,

    /// Lifeline key -> used flag.
    pub lifelines_used: Json<BTreeMap<String, bool>>,
}

impl Attempt {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

pub const ATTEMPT_COLUMNS: &str = "id, user_id, quiz_id, score, passed, finished_at, created_at, \
     auto_submit_reason, lifelines_used";

/// Represents the 'answers' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: i64,
    pub selected_choice_id: i64,
    pub is_correct: bool,
}

/// One reviewed answer on the result page.
#[derive(Debug, Serialize, FromRow)]
pub struct AnswerReview {
    pub question_id: i64,
    pub question_text: String,
    pub selected_choice_id: i64,
    pub selected_choice_text: String,
    pub is_correct: bool,
    pub correct_choice_text: Option<String>,
}

/// Navigation action sent with an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavAction {
    Next,
    Prev,
    Submit,
    Stay,
}

/// DTO for answering the current question.
#[derive(Debug, Deserialize)]
pub struct AnswerQuestionRequest {
    pub choice_id: Option<i64>,
    pub action: Option<NavAction>,
    /// Proctoring violation: finishes the attempt immediately.
    #[serde(default)]
    pub force_submit: bool,
    pub violation_reason: Option<String>,
}

/// Where the client should go next.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "next", rename_all = "snake_case")]
pub enum NextStep {
    Question { attempt_id: i64, question_id: i64 },
    Result { attempt_id: i64 },
}

/// Query parameters for the history page.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub q: Option<String>,
    #[serde(rename = "type")]
    pub quiz_type: Option<String>,
    pub page: Option<i64>,
}

/// History row joined with the quiz.
#[derive(Debug, Serialize, FromRow)]
pub struct HistoryEntry {
    pub attempt_id: i64,
    pub quiz_id: i64,
    pub quiz_title: String,
    pub quiz_type: String,
    pub category_name: Option<String>,
    pub score: i32,
    pub total_questions: i64,
    pub passed: bool,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CertificateParams {
    pub download: Option<String>,
}

/// DTO for using a lifeline on the current question.
#[derive(Debug, Deserialize)]
pub struct LifelineRequest {
    pub attempt_id: i64,
    pub question_id: i64,
    pub lifeline_type: crate::services::lifeline::LifelineKind,
}

/// DTO for asking the tutor about a reviewed answer.
#[derive(Debug, Deserialize)]
pub struct AskTutorRequest {
    pub attempt_id: i64,
    pub question_id: i64,
}
