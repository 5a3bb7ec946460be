//! Class reminder e-mails at two lead times, each sent at most once per class.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::{
    config::{EARLY_REMINDER_CUTOFF, EARLY_REMINDER_LEAD, LATE_REMINDER_LEAD},
    error::AppError,
    models::training::{CLASS_COLUMNS, ClassSchedule},
    services::mail::{Mailer, messages},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    ThreeHour,
    ThirtyMinute,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 2] = [ReminderKind::ThreeHour, ReminderKind::ThirtyMinute];

    /// Column holding the one-shot flag.
    fn flag_column(&self) -> &'static str {
        match self {
            ReminderKind::ThreeHour => "reminder_3hr_sent",
            ReminderKind::ThirtyMinute => "reminder_30min_sent",
        }
    }

    /// Inclusive range of start times this reminder covers at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let span = |d: std::time::Duration| Duration::from_std(d).unwrap_or_else(|_| Duration::zero());
        match self {
            ReminderKind::ThreeHour => (now + span(EARLY_REMINDER_CUTOFF), now + span(EARLY_REMINDER_LEAD)),
            ReminderKind::ThirtyMinute => (now, now + span(LATE_REMINDER_LEAD)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReminderKind::ThreeHour => "3hr",
            ReminderKind::ThirtyMinute => "30min",
        }
    }
}

pub fn in_window(kind: ReminderKind, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let (from, to) = kind.window(now);
    from <= start && start <= to
}

/// Subject line and "starting in about …" text.
pub fn reminder_text(kind: ReminderKind, topic: &str, start: DateTime<Utc>, now: DateTime<Utc>) -> (String, String) {
    let minutes_left = (start - now).num_minutes();
    if minutes_left <= 0 {
        return (format!("Class Starting Now: {topic}"), "now".to_string());
    }
    match kind {
        ReminderKind::ThreeHour => (
            format!("Reminder: Class in 3 Hours - {topic}"),
            "3 hours".to_string(),
        ),
        ReminderKind::ThirtyMinute => (
            format!("Class Starting in {minutes_left} Mins: {topic}"),
            format!("{minutes_left} minutes"),
        ),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderReport {
    pub classes: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(sqlx::FromRow)]
struct Recipient {
    email: String,
    username: String,
    first_name: String,
}

async fn due_classes(pool: &PgPool, kind: ReminderKind, now: DateTime<Utc>) -> Result<Vec<ClassSchedule>, AppError> {
    let (from, to) = kind.window(now);
    let rows = sqlx::query_as::<_, ClassSchedule>(&format!(
        "SELECT {CLASS_COLUMNS} FROM class_schedules \
         WHERE start_time >= $1 AND start_time <= $2 AND {} = FALSE \
         ORDER BY start_time",
        kind.flag_column()
    ))
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Flips the flag if nobody else has. Only the caller that flips it sends.
async fn claim(pool: &PgPool, kind: ReminderKind, class_id: i64) -> Result<bool, AppError> {
    let col = kind.flag_column();
    let claimed = sqlx::query(&format!(
        "UPDATE class_schedules SET {col} = TRUE WHERE id = $1 AND {col} = FALSE"
    ))
    .bind(class_id)
    .execute(pool)
    .await?;
    Ok(claimed.rows_affected() == 1)
}

async fn recipients(pool: &PgPool, batch_id: i64, now: DateTime<Utc>) -> Result<Vec<Recipient>, AppError> {
    let rows = sqlx::query_as::<_, Recipient>(
        r#"
        SELECT DISTINCT u.email, u.username, u.first_name
        FROM enrollments e
        JOIN users u ON u.id = e.user_id
        WHERE e.batch_id = $1 AND e.expires_at >= $2 AND u.email <> ''
        "#,
    )
    .bind(batch_id)
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// One stateless pass over both reminder windows.
pub async fn run_reminder_check(
    pool: &PgPool,
    mailer: &Mailer,
    site_url: &str,
    now: DateTime<Utc>,
) -> Result<ReminderReport, AppError> {
    let mut report = ReminderReport::default();
    let dashboard_link = format!("{site_url}/api/training/program");

    for kind in ReminderKind::ALL {
        for class in due_classes(pool, kind, now).await? {
            let Some(start) = class.start_time else { continue };

            // Recipients are loaded before the flag flips so a failed query
            // leaves the reminder for the next pass.
            let users = match recipients(pool, class.batch_id, now).await {
                Ok(users) => users,
                Err(e) => {
                    tracing::error!(class_id = class.id, kind = kind.label(), "Failed to load recipients: {:?}", e);
                    continue;
                }
            };
            match claim(pool, kind, class.id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(class_id = class.id, kind = kind.label(), "Reminder already claimed");
                    continue;
                }
                Err(e) => {
                    tracing::error!(class_id = class.id, kind = kind.label(), "Failed to claim reminder: {:?}", e);
                    continue;
                }
            }
            report.classes += 1;

            if users.is_empty() {
                tracing::info!(class_id = class.id, "No active students for class");
                continue;
            }

            let (subject, time_str) = reminder_text(kind, &class.topic, start, now);
            for user in &users {
                let name = if user.first_name.trim().is_empty() { &user.username } else { &user.first_name };
                let email = messages::class_reminder(&messages::ClassReminder {
                    to: &user.email,
                    name,
                    subject: &subject,
                    time_str: &time_str,
                    topic: &class.topic,
                    start_time: start,
                    dashboard_link: &dashboard_link,
                });
                match mailer.send(&email).await {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::error!(class_id = class.id, to = %user.email, "Failed to send reminder: {}", e);
                    }
                }
            }

            tracing::info!(
                class_id = class.id,
                kind = kind.label(),
                recipients = users.len(),
                "Class reminders sent"
            );
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn three_hour_window_skips_imminent_classes() {
        assert!(in_window(ReminderKind::ThreeHour, now() + Duration::hours(3), now()));
        assert!(in_window(ReminderKind::ThreeHour, now() + Duration::hours(1), now()));
        assert!(!in_window(ReminderKind::ThreeHour, now() + Duration::minutes(59), now()));
        assert!(!in_window(ReminderKind::ThreeHour, now() + Duration::minutes(181), now()));
    }

    #[test]
    fn thirty_minute_window() {
        assert!(in_window(ReminderKind::ThirtyMinute, now(), now()));
        assert!(in_window(ReminderKind::ThirtyMinute, now() + Duration::minutes(30), now()));
        assert!(!in_window(ReminderKind::ThirtyMinute, now() - Duration::seconds(1), now()));
        assert!(!in_window(ReminderKind::ThirtyMinute, now() + Duration::minutes(31), now()));
    }

    #[test]
    fn windows_do_not_overlap() {
        let (early_from, _) = ReminderKind::ThreeHour.window(now());
        let (_, late_to) = ReminderKind::ThirtyMinute.window(now());
        assert!(late_to < early_from);
    }

    #[test]
    fn subjects() {
        let start = now() + Duration::minutes(25);
        assert_eq!(
            reminder_text(ReminderKind::ThirtyMinute, "Traits", start, now()),
            ("Class Starting in 25 Mins: Traits".to_string(), "25 minutes".to_string())
        );
        assert_eq!(
            reminder_text(ReminderKind::ThreeHour, "Traits", now() + Duration::hours(2), now()).0,
            "Reminder: Class in 3 Hours - Traits"
        );
        assert_eq!(
            reminder_text(ReminderKind::ThirtyMinute, "Traits", now(), now()),
            ("Class Starting Now: Traits".to_string(), "now".to_string())
        );
    }
}
