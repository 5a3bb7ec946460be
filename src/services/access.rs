//! Who may open which quiz or training batch.
//!
//! The pure rules live at the top so they can be unit tested; the async
//! functions below them load the rows the rules need.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::AppError,
    models::{
        quiz::{Quiz, QuizType},
        training::Coupon,
    },
};

/// Where `now` falls relative to a hackathon's timing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    Upcoming,
    Open,
    Closed,
}

/// Practice quizzes are open to everyone; hackathons need a grant.
pub fn quiz_accessible(kind: QuizType, has_grant: bool) -> bool {
    match kind {
        QuizType::Practice => true,
        QuizType::Hackathon => has_grant,
    }
}

pub fn hackathon_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> WindowState {
    if start.is_some_and(|s| now < s) {
        return WindowState::Upcoming;
    }
    if end.is_some_and(|e| now > e) {
        return WindowState::Closed;
    }
    WindowState::Open
}

/// Window state of a quiz; practice quizzes are always open.
pub fn quiz_window(quiz: &Quiz, now: DateTime<Utc>) -> WindowState {
    if quiz.is_hackathon() {
        hackathon_window(quiz.start_time, quiz.end_time, now)
    } else {
        WindowState::Open
    }
}

fn normalize_code(code: Option<&str>) -> String {
    code.unwrap_or_default().trim().to_lowercase()
}

/// Entered code matches the quiz's configured code. An unset code never matches.
pub fn coupon_matches(entered: &str, configured: Option<&str>) -> bool {
    let entered = normalize_code(Some(entered));
    let configured = normalize_code(configured);
    !entered.is_empty() && !configured.is_empty() && entered == configured
}

/// True when saving `new` over `old` must revoke existing grants.
pub fn coupon_changed(old: Option<&str>, new: Option<&str>) -> bool {
    normalize_code(old) != normalize_code(new)
}

/// Training access rule for one enrollment.
///
/// The enrollment must be unexpired. When coupons exist for the user/batch,
/// at least one of them must still be valid today (or be open-ended). If
/// every coupon has lapsed, an enrollment that runs past the latest coupon
/// date is treated as a manual extension and stays valid.
pub fn enrollment_valid(expires_at: DateTime<Utc>, coupons: &[Coupon], now: DateTime<Utc>) -> bool {
    if expires_at <= now {
        return false;
    }
    if coupons.is_empty() {
        return true;
    }

    let today = now.date_naive();
    let any_coupon_live = coupons
        .iter()
        .any(|c| c.enrollment_valid_until.is_none_or(|until| today <= until));
    if any_coupon_live {
        return true;
    }

    match latest_coupon_date(coupons) {
        Some(latest) => expires_at.date_naive() > latest,
        None => false,
    }
}

fn latest_coupon_date(coupons: &[Coupon]) -> Option<NaiveDate> {
    coupons.iter().filter_map(|c| c.enrollment_valid_until).max()
}

pub async fn has_grant(pool: &PgPool, user_id: i64, quiz_id: i64) -> Result<bool, AppError> {
    let found: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM quiz_access_grants WHERE user_id = $1 AND quiz_id = $2")
            .bind(user_id)
            .bind(quiz_id)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

/// Re-evaluated on every call so a revoked grant takes effect immediately.
pub async fn has_quiz_access(pool: &PgPool, user_id: i64, quiz: &Quiz) -> Result<bool, AppError> {
    if quiz.kind() == QuizType::Practice {
        return Ok(true);
    }
    let granted = has_grant(pool, user_id, quiz.id).await?;
    Ok(quiz_accessible(quiz.kind(), granted))
}

/// Records a permanent unlock. Idempotent.
pub async fn grant_quiz_access(pool: &PgPool, user_id: i64, quiz_id: i64) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO quiz_access_grants (quiz_id, user_id)
        VALUES ($1, $2)
        ON CONFLICT (quiz_id, user_id) DO NOTHING
        "#,
    )
    .bind(quiz_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Deletes every grant of a quiz. Returns how many were revoked.
pub async fn revoke_quiz_grants(
    tx: &mut Transaction<'_, Postgres>,
    quiz_id: i64,
) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM quiz_access_grants WHERE quiz_id = $1")
        .bind(quiz_id)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

pub async fn coupons_for(pool: &PgPool, user_id: i64, batch_id: i64) -> Result<Vec<Coupon>, AppError> {
    let coupons = sqlx::query_as::<_, Coupon>(&format!(
        "SELECT {} FROM coupons WHERE assigned_to = $1 AND batch_id = $2 ORDER BY created_at DESC",
        crate::models::training::COUPON_COLUMNS
    ))
    .bind(user_id)
    .bind(batch_id)
    .fetch_all(pool)
    .await?;
    Ok(coupons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn coupon(until: Option<NaiveDate>) -> Coupon {
        Coupon {
            id: 1,
            code: "ABC".to_string(),
            batch_id: 1,
            assigned_to: Some(1),
            valid_days: Some(30),
            enrollment_valid_from: None,
            enrollment_valid_until: until,
            payment_amount: None,
            payment_date: None,
            next_payment_date: None,
            is_used: true,
            created_at: now(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn practice_is_open_hackathon_needs_grant() {
        assert!(quiz_accessible(QuizType::Practice, false));
        assert!(!quiz_accessible(QuizType::Hackathon, false));
        assert!(quiz_accessible(QuizType::Hackathon, true));
    }

    #[test]
    fn window_states() {
        let start = Some(now() + Duration::hours(1));
        let end = Some(now() + Duration::hours(2));
        assert_eq!(hackathon_window(start, end, now()), WindowState::Upcoming);
        assert_eq!(hackathon_window(None, end, now()), WindowState::Open);
        assert_eq!(
            hackathon_window(None, Some(now() - Duration::seconds(1)), now()),
            WindowState::Closed
        );
        assert_eq!(hackathon_window(None, None, now()), WindowState::Open);
    }

    #[test]
    fn coupon_matching_ignores_case_and_whitespace() {
        assert!(coupon_matches("  Hack2025 ", Some("hack2025")));
        assert!(!coupon_matches("hack2024", Some("hack2025")));
        assert!(!coupon_matches("", Some("")));
        assert!(!coupon_matches("anything", None));
    }

    #[test]
    fn coupon_change_detection() {
        assert!(!coupon_changed(Some("ABC"), Some(" abc ")));
        assert!(!coupon_changed(None, Some("")));
        assert!(coupon_changed(Some("ABC"), Some("XYZ")));
        assert!(coupon_changed(Some("ABC"), None));
    }

    #[test]
    fn expired_enrollment_is_invalid() {
        assert!(!enrollment_valid(now() - Duration::days(1), &[], now()));
    }

    #[test]
    fn enrollment_without_coupons_is_valid() {
        assert!(enrollment_valid(now() + Duration::days(3), &[], now()));
    }

    #[test]
    fn any_live_coupon_keeps_access() {
        let coupons = vec![coupon(Some(date(2025, 1, 1))), coupon(Some(date(2025, 3, 10)))];
        assert!(enrollment_valid(now() + Duration::days(3), &coupons, now()));

        let open_ended = vec![coupon(Some(date(2025, 1, 1))), coupon(None)];
        assert!(enrollment_valid(now() + Duration::days(3), &open_ended, now()));
    }

    #[test]
    fn lapsed_coupons_with_extended_enrollment_keep_access() {
        let coupons = vec![coupon(Some(date(2025, 3, 1))), coupon(Some(date(2025, 2, 1)))];
        let extended = now() + Duration::days(20);
        assert!(enrollment_valid(extended, &coupons, now()));
    }

    #[test]
    fn coupon_valid_through_today_counts_as_live() {
        let coupons = vec![coupon(Some(date(2025, 3, 10)))];
        assert!(enrollment_valid(now() + Duration::hours(2), &coupons, now()));
    }

    #[test]
    fn lapsed_coupon_does_not_revive_expired_enrollment() {
        let lapsed = vec![coupon(Some(date(2025, 3, 9)))];
        let expired = Utc.with_ymd_and_hms(2025, 3, 9, 23, 0, 0).unwrap();
        assert!(!enrollment_valid(expired, &lapsed, now()));
    }
}
