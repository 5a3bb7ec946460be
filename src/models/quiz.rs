// src/models/quiz.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Quiz flavour. Stored as lowercase text in `quizzes.quiz_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizType {
    Practice,
    Hackathon,
}

impl QuizType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "practice" => Some(QuizType::Practice),
            "hackathon" => Some(QuizType::Hackathon),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuizType::Practice => "practice",
            QuizType::Hackathon => "hackathon",
        }
    }
}

impl fmt::Display for QuizType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents the 'categories' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// Represents the 'quizzes' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category_id: Option<i64>,

    /// 'practice' or 'hackathon'.
    pub quiz_type: String,

    pub duration_minutes: i32,
    pub passing_percentage: i32,
    pub is_active: bool,

    /// 'Beginner', 'Intermediate' or 'Advanced'.
    pub difficulty: String,

    /// Unlock code for hackathon quizzes. Never serialized to players.
    #[serde(skip_serializing)]
    pub coupon_code: Option<String>,

    /// Hackathon timing window. Either bound may be open.
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    pub generate_certificate: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Quiz {
    /// Unknown values fall back to practice, mirroring the column default.
    pub fn kind(&self) -> QuizType {
        QuizType::parse(&self.quiz_type).unwrap_or(QuizType::Practice)
    }

    pub fn is_hackathon(&self) -> bool {
        self.kind() == QuizType::Hackathon
    }
}

pub const QUIZ_COLUMNS: &str = "id, title, description, category_id, quiz_type, duration_minutes, \
     passing_percentage, is_active, difficulty, coupon_code, start_time, end_time, \
     generate_certificate, created_by, created_at";

/// Quiz row joined with its category for the catalogue.
#[derive(Debug, Serialize, FromRow)]
pub struct QuizListItem {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub quiz_type: String,
    pub difficulty: String,
    pub duration_minutes: i32,
    pub passing_percentage: i32,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub question_count: i64,
    #[sqlx(default)]
    pub unlocked: bool,
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    pub text: String,
}

/// Represents the 'choices' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Choice {
    pub id: i64,
    pub question_id: i64,
    pub text: String,
    pub is_correct: bool,
}

/// DTO for sending a choice to a player (excludes correctness).
#[derive(Debug, Serialize)]
pub struct PublicChoice {
    pub id: i64,
    pub text: String,
}

impl From<&Choice> for PublicChoice {
    fn from(choice: &Choice) -> Self {
        Self {
            id: choice.id,
            text: choice.text.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

/// DTO for creating a quiz (admin).
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub description: String,
    pub category_id: Option<i64>,
    pub quiz_type: QuizType,
    #[validate(range(min = 1, max = 600))]
    pub duration_minutes: Option<i32>,
    #[validate(range(min = 0, max = 100))]
    pub passing_percentage: Option<i32>,
    #[validate(custom(function = validate_difficulty))]
    pub difficulty: Option<String>,
    #[validate(length(max = 50))]
    pub coupon_code: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub generate_certificate: Option<bool>,
    pub is_active: Option<bool>,
}

/// DTO for updating a quiz (admin). Fields are optional.
///
/// `coupon_code` distinguishes "absent" from "cleared": send `""` to remove it.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuizRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub quiz_type: Option<QuizType>,
    #[validate(range(min = 1, max = 600))]
    pub duration_minutes: Option<i32>,
    #[validate(range(min = 0, max = 100))]
    pub passing_percentage: Option<i32>,
    #[validate(custom(function = validate_difficulty))]
    pub difficulty: Option<String>,
    #[validate(length(max = 50))]
    pub coupon_code: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub generate_certificate: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateChoiceRequest {
    #[validate(length(min = 1, max = 255))]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// DTO for creating a question with its choices.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 5000))]
    pub text: String,
    #[validate(length(min = 2, max = 10), nested, custom(function = validate_single_correct))]
    pub choices: Vec<CreateChoiceRequest>,
}

pub const DIFFICULTIES: [&str; 3] = ["Beginner", "Intermediate", "Advanced"];

fn validate_difficulty(value: &str) -> Result<(), validator::ValidationError> {
    if !DIFFICULTIES.contains(&value) {
        return Err(validator::ValidationError::new("invalid_difficulty"));
    }
    Ok(())
}

/// One correct choice per question.
fn validate_single_correct(choices: &[CreateChoiceRequest]) -> Result<(), validator::ValidationError> {
    if choices.iter().filter(|c| c.is_correct).count() != 1 {
        return Err(validator::ValidationError::new("exactly_one_correct_choice"));
    }
    Ok(())
}

/// Query parameters for the quiz catalogue.
#[derive(Debug, Deserialize)]
pub struct QuizListParams {
    pub category_id: Option<i64>,
    /// 'all' (default), 'practice' or 'hackathon'.
    pub filter: Option<String>,
    pub page: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RedeemQuizCouponRequest {
    #[validate(length(min = 1, max = 50))]
    pub coupon_code: String,
}

fn default_question_limit() -> u32 {
    5
}

fn default_difficulty() -> String {
    "Beginner".to_string()
}

/// DTO for generating a practice quiz with the model.
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateQuizRequest {
    #[validate(length(min = 1, max = 200, message = "Topic is required"))]
    pub topic: String,
    #[validate(range(min = 1, max = 20))]
    #[serde(default = "default_question_limit")]
    pub limit: u32,
    #[validate(custom(function = validate_difficulty))]
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiz_type_parses_case_insensitively() {
        assert_eq!(QuizType::parse("Hackathon"), Some(QuizType::Hackathon));
        assert_eq!(QuizType::parse(" practice "), Some(QuizType::Practice));
        assert_eq!(QuizType::parse("exam"), None);
    }

    #[test]
    fn question_needs_exactly_one_correct_choice() {
        let req = CreateQuestionRequest {
            text: "2 + 2?".to_string(),
            choices: vec![
                CreateChoiceRequest { text: "4".to_string(), is_correct: true },
                CreateChoiceRequest { text: "5".to_string(), is_correct: true },
            ],
        };
        assert!(req.validate().is_err());

        let req = CreateQuestionRequest {
            text: "2 + 2?".to_string(),
            choices: vec![
                CreateChoiceRequest { text: "4".to_string(), is_correct: true },
                CreateChoiceRequest { text: "5".to_string(), is_correct: false },
            ],
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn question_choice_count_is_bounded() {
        let choice = |text: &str, is_correct| CreateChoiceRequest { text: text.to_string(), is_correct };

        let req = CreateQuestionRequest {
            text: "Pick one".to_string(),
            choices: vec![choice("only", true)],
        };
        let err = req.validate().unwrap_err();
        assert!(err.field_errors().contains_key("choices"));

        let req = CreateQuestionRequest {
            text: "Pick one".to_string(),
            choices: (0..11).map(|i| choice(&i.to_string(), i == 0)).collect(),
        };
        assert!(req.validate().is_err());

        let req = CreateQuestionRequest {
            text: "Pick one".to_string(),
            choices: vec![choice("a", true), choice("", false)],
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn generate_request_defaults() {
        let req: GenerateQuizRequest = serde_json::from_str(r#"{"topic":"rust"}"#).unwrap();
        assert_eq!(req.limit, 5);
        assert_eq!(req.difficulty, "Beginner");
        assert!(req.validate().is_ok());

        let req: GenerateQuizRequest =
            serde_json::from_str(r#"{"topic":"rust","limit":50,"difficulty":"Expert"}"#).unwrap();
        assert!(req.validate().is_err());
    }
}
