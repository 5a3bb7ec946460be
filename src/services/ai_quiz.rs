//! Persisting quizzes produced by the model, and the monthly quota.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::PgPool;

use crate::{
    config::{AI_CATEGORY_NAME, AI_QUIZ_PASSING_PERCENTAGE},
    error::AppError,
    services::llm::GeneratedQuiz,
    utils::html::clean_plain_text,
};

/// Topics of up to this many words are used as the title directly.
const SHORT_TOPIC_WORDS: usize = 6;

pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Short topics become the title; long ones defer to the model's title.
/// Non-beginner difficulties are appended in parentheses.
pub fn final_title(topic: &str, model_title: Option<&str>, difficulty: &str) -> String {
    let base = if topic.split_whitespace().count() <= SHORT_TOPIC_WORDS {
        title_case(topic)
    } else {
        let fallback: String = topic.chars().take(50).collect();
        title_case(model_title.filter(|t| !t.trim().is_empty()).unwrap_or(&fallback))
    };
    if difficulty == "Beginner" {
        base
    } else {
        format!("{base} ({difficulty})")
    }
}

/// 1.5 minutes per question, never under 5 minutes.
pub fn generated_duration(limit: u32) -> i32 {
    ((limit as f64 * 1.5) as i32).max(5)
}

pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

/// Generated practice quizzes the user created since the first of the month.
pub async fn monthly_count(pool: &PgPool, user_id: i64, now: DateTime<Utc>) -> Result<i64, AppError> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM quizzes q
        JOIN categories c ON c.id = q.category_id
        WHERE q.created_by = $1
          AND q.quiz_type = 'practice'
          AND c.name = $2
          AND q.created_at >= $3
        "#,
    )
    .bind(user_id)
    .bind(AI_CATEGORY_NAME)
    .bind(month_start(now))
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Stores the quiz with its questions in one transaction. Questions without
/// exactly one correct choice are skipped. Returns (quiz id, questions saved).
pub async fn save_generated_quiz(
    pool: &PgPool,
    user_id: i64,
    topic: &str,
    title: &str,
    difficulty: &str,
    limit: u32,
    quiz: &GeneratedQuiz,
) -> Result<(i64, usize), AppError> {
    let mut tx = pool.begin().await?;

    let (category_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO categories (name) VALUES ($1)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(AI_CATEGORY_NAME)
    .fetch_one(&mut *tx)
    .await?;

    let (quiz_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO quizzes
            (title, description, category_id, quiz_type, duration_minutes,
             passing_percentage, difficulty, created_by)
        VALUES ($1, $2, $3, 'practice', $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(title)
    .bind(format!("An AI-generated quiz on {}. Challenge yourself!", clean_plain_text(topic)))
    .bind(category_id)
    .bind(generated_duration(limit))
    .bind(AI_QUIZ_PASSING_PERCENTAGE)
    .bind(difficulty)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut saved = 0;
    for question in &quiz.questions {
        let correct = question.choices.iter().filter(|c| c.is_correct).count();
        if question.text.trim().is_empty() || question.choices.len() < 2 || correct != 1 {
            tracing::warn!(quiz_id, "Skipping malformed generated question");
            continue;
        }

        let (question_id,): (i64,) =
            sqlx::query_as("INSERT INTO questions (quiz_id, text) VALUES ($1, $2) RETURNING id")
                .bind(quiz_id)
                .bind(clean_plain_text(&question.text))
                .fetch_one(&mut *tx)
                .await?;

        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO choices (question_id, text, is_correct) ",
        );
        builder.push_values(&question.choices, |mut row, choice| {
            row.push_bind(question_id)
                .push_bind(clean_plain_text(&choice.text))
                .push_bind(choice.is_correct);
        });
        builder.build().execute(&mut *tx).await?;
        saved += 1;
    }

    if saved == 0 {
        return Err(AppError::ServiceUnavailable(
            "Model returned no usable questions".to_string(),
        ));
    }

    tx.commit().await?;
    Ok((quiz_id, saved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn short_topic_is_title_cased() {
        assert_eq!(final_title("rust ownership", Some("Ignored"), "Beginner"), "Rust Ownership");
    }

    #[test]
    fn long_topic_uses_model_title_and_difficulty() {
        let topic = "the history of the roman empire from augustus to constantine";
        assert_eq!(
            final_title(topic, Some("roman empire"), "Advanced"),
            "Roman Empire (Advanced)"
        );
    }

    #[test]
    fn duration_has_a_floor() {
        assert_eq!(generated_duration(1), 5);
        assert_eq!(generated_duration(5), 7);
        assert_eq!(generated_duration(20), 30);
    }

    #[test]
    fn month_start_is_first_midnight() {
        let now = Utc.with_ymd_and_hms(2025, 2, 17, 13, 45, 0).unwrap();
        assert_eq!(month_start(now), Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
    }
}
