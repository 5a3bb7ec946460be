//! Leaderboards, dashboard statistics and attempt history.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::{
    config::{HISTORY_PAGE_SIZE, LEADERBOARD_SIZE},
    error::AppError,
    models::{
        attempt::HistoryEntry,
        quiz::QuizType,
    },
    services::attempt::{self, evaluate},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    College,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    All,
    Weekly,
    Today,
}

impl Scope {
    fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::College => "college",
        }
    }
}

impl Period {
    pub const ALL: [Period; 3] = [Period::All, Period::Weekly, Period::Today];

    fn as_str(&self) -> &'static str {
        match self {
            Period::All => "all",
            Period::Weekly => "weekly",
            Period::Today => "today",
        }
    }

    /// Earliest finish time counted, `None` for all time.
    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Period::All => None,
            Period::Weekly => Some(now - Duration::days(7)),
            Period::Today => now.date_naive().and_hms_opt(0, 0, 0).map(|d| d.and_utc()),
        }
    }
}

/// `None` stands for both quiz types.
pub const TYPE_FILTERS: [Option<QuizType>; 3] = [None, Some(QuizType::Hackathon), Some(QuizType::Practice)];

pub fn leaderboard_key(scope: Scope, period: Period, quiz_type: Option<QuizType>) -> String {
    let kind = quiz_type.map_or("all", |t| t.as_str());
    format!("{}_{}_{}", scope.as_str(), period.as_str(), kind)
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub college_name: Option<String>,
    pub xp: i64,
    pub last_played: Option<DateTime<Utc>>,
}

/// Top players by xp (sum of passed scores), earliest finisher first on ties.
pub async fn leaderboard(
    pool: &PgPool,
    college_id: Option<i64>,
    period: Period,
    quiz_type: Option<QuizType>,
    now: DateTime<Utc>,
) -> Result<Vec<LeaderboardEntry>, AppError> {
    let rows = sqlx::query_as::<_, LeaderboardEntry>(
        r#"
        SELECT u.id AS user_id, u.username, u.first_name, u.last_name,
               c.name AS college_name,
               SUM(a.score)::BIGINT AS xp,
               MAX(a.finished_at) AS last_played
        FROM users u
        JOIN attempts a ON a.user_id = u.id AND a.passed
        JOIN quizzes q ON q.id = a.quiz_id
        LEFT JOIN colleges c ON c.id = u.college_id
        WHERE u.role <> 'admin'
          AND ($1::BIGINT IS NULL OR u.college_id = $1)
          AND ($2::TIMESTAMPTZ IS NULL OR a.finished_at >= $2)
          AND ($3::TEXT IS NULL OR q.quiz_type = $3)
        GROUP BY u.id, u.username, u.first_name, u.last_name, c.name
        HAVING SUM(a.score) > 0
        ORDER BY xp DESC, last_played ASC
        LIMIT $4
        "#,
    )
    .bind(college_id)
    .bind(period.start(now))
    .bind(quiz_type.map(|t| t.as_str()))
    .bind(LEADERBOARD_SIZE)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Every scope/period/type combination, keyed `"{scope}_{period}_{type}"`.
/// The college scope is present only when the user belongs to one.
pub async fn all_leaderboards(
    pool: &PgPool,
    college_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, Vec<LeaderboardEntry>>, AppError> {
    let mut scopes = vec![(Scope::Global, None)];
    if let Some(id) = college_id {
        scopes.push((Scope::College, Some(id)));
    }

    let mut boards = BTreeMap::new();
    for (scope, college) in scopes {
        for period in Period::ALL {
            for quiz_type in TYPE_FILTERS {
                let rows = leaderboard(pool, college, period, quiz_type, now).await?;
                boards.insert(leaderboard_key(scope, period, quiz_type), rows);
            }
        }
    }
    Ok(boards)
}

/// Consecutive days with a passed attempt, ending today or yesterday.
/// `dates` must be distinct and sorted newest first.
pub fn streak(dates: &[NaiveDate], today: NaiveDate) -> u32 {
    let Some(&latest) = dates.first() else {
        return 0;
    };
    let yesterday = today - Duration::days(1);
    if latest != today && latest != yesterday {
        return 0;
    }

    let mut expected = latest;
    let mut count = 0;
    for &date in dates {
        if date != expected {
            break;
        }
        count += 1;
        expected -= Duration::days(1);
    }
    count
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub icon: &'static str,
    pub name: &'static str,
    pub desc: &'static str,
}

pub fn badges(has_perfect: bool, quizzes_passed: i64, streak: u32, total_score: i64) -> Vec<Badge> {
    let mut earned = Vec::new();
    if has_perfect {
        earned.push(Badge { icon: "🎯", name: "Sharpshooter", desc: "Scored 100% on a quiz" });
    }
    if quizzes_passed >= 10 {
        earned.push(Badge { icon: "🎓", name: "Scholar", desc: "Passed 10+ quizzes" });
    }
    if streak >= 7 {
        earned.push(Badge { icon: "🔥", name: "Unstoppable", desc: "7 Day Learning Streak" });
    }
    if total_score >= 1000 {
        earned.push(Badge { icon: "👑", name: "Grandmaster", desc: "Earned 1000+ XP" });
    }
    earned
}

#[derive(Debug, Serialize, PartialEq)]
pub struct PerformancePoint {
    pub label: String,
    pub percentage: f64,
}

/// Graph label: the first ten characters of the title.
pub fn graph_label(title: &str) -> String {
    let short: String = title.chars().take(10).collect();
    format!("{short}...")
}

#[derive(FromRow)]
struct PerformanceRow {
    title: String,
    score: i32,
    total: i64,
}

/// Last ten finished attempts, oldest first.
async fn performance(pool: &PgPool, user_id: i64, quiz_type: Option<QuizType>) -> Result<Vec<PerformancePoint>, AppError> {
    let rows = sqlx::query_as::<_, PerformanceRow>(
        r#"
        SELECT q.title, a.score,
               (SELECT COUNT(*) FROM questions qq WHERE qq.quiz_id = q.id) AS total
        FROM attempts a
        JOIN quizzes q ON q.id = a.quiz_id
        WHERE a.user_id = $1 AND a.finished_at IS NOT NULL
          AND ($2::TEXT IS NULL OR q.quiz_type = $2)
        ORDER BY a.finished_at DESC
        LIMIT 10
        "#,
    )
    .bind(user_id)
    .bind(quiz_type.map(|t| t.as_str()))
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .rev()
        .map(|r| {
            let pct = evaluate(r.score as i64, r.total, 0).percentage;
            PerformancePoint {
                label: graph_label(&r.title),
                percentage: (pct * 10.0).round() / 10.0,
            }
        })
        .collect())
}

#[derive(Debug, Serialize)]
pub struct Performance {
    pub all: Vec<PerformancePoint>,
    pub hackathon: Vec<PerformancePoint>,
    pub practice: Vec<PerformancePoint>,
}

#[derive(Debug, Serialize)]
pub struct ActiveAttempt {
    pub attempt_id: i64,
    pub quiz_id: i64,
    pub quiz_title: String,
    pub resume_question_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub total_score: i64,
    pub quizzes_passed: i64,
    pub streak: u32,
    pub active_attempt: Option<ActiveAttempt>,
    pub latest_attempts: Vec<HistoryEntry>,
    pub performance: Performance,
    pub badges: Vec<Badge>,
    pub leaderboards: BTreeMap<String, Vec<LeaderboardEntry>>,
    pub has_college: bool,
}

pub async fn dashboard(
    pool: &PgPool,
    user_id: i64,
    college_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Dashboard, AppError> {
    let (total_score, quizzes_passed): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(score), 0)::BIGINT, COUNT(*) FILTER (WHERE passed)
        FROM attempts WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let dates: Vec<(NaiveDate,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT (finished_at AT TIME ZONE 'UTC')::DATE AS day
        FROM attempts
        WHERE user_id = $1 AND passed AND finished_at IS NOT NULL
        ORDER BY day DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    let dates: Vec<NaiveDate> = dates.into_iter().map(|(d,)| d).collect();
    let streak = streak(&dates, now.date_naive());

    let active: Option<(i64, i64, String)> = sqlx::query_as(
        r#"
        SELECT a.id, q.id, q.title
        FROM attempts a JOIN quizzes q ON q.id = a.quiz_id
        WHERE a.user_id = $1 AND a.finished_at IS NULL
        ORDER BY a.created_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let active_attempt = match active {
        Some((attempt_id, quiz_id, quiz_title)) => {
            let question_ids = attempt::question_ids(pool, quiz_id).await?;
            let (last,): (Option<i64>,) =
                sqlx::query_as("SELECT MAX(question_id) FROM answers WHERE attempt_id = $1")
                    .bind(attempt_id)
                    .fetch_one(pool)
                    .await?;
            Some(ActiveAttempt {
                attempt_id,
                quiz_id,
                quiz_title,
                resume_question_id: attempt::resume_question(&question_ids, last),
            })
        }
        None => None,
    };

    let (has_perfect,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM attempts a
            WHERE a.user_id = $1 AND a.finished_at IS NOT NULL AND a.score > 0
              AND a.score = (SELECT COUNT(*) FROM questions q WHERE q.quiz_id = a.quiz_id)
        )
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let filter = HistoryFilter::default();
    let latest_attempts = history_rows(pool, user_id, &filter, 3, 0).await?;

    let performance = Performance {
        all: performance(pool, user_id, None).await?,
        hackathon: performance(pool, user_id, Some(QuizType::Hackathon)).await?,
        practice: performance(pool, user_id, Some(QuizType::Practice)).await?,
    };

    Ok(Dashboard {
        total_score,
        quizzes_passed,
        streak,
        active_attempt,
        latest_attempts,
        performance,
        badges: badges(has_perfect, quizzes_passed, streak, total_score),
        leaderboards: all_leaderboards(pool, college_id, now).await?,
        has_college: college_id.is_some(),
    })
}

#[derive(Debug, Default, Clone)]
pub struct HistoryFilter {
    pub query: Option<String>,
    pub quiz_type: Option<QuizType>,
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub page: i64,
    pub total_pages: i64,
    pub total: i64,
}

fn search_pattern(filter: &HistoryFilter) -> Option<String> {
    filter
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{}%", q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")))
}

async fn history_rows(
    pool: &PgPool,
    user_id: i64,
    filter: &HistoryFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<HistoryEntry>, AppError> {
    let rows = sqlx::query_as::<_, HistoryEntry>(
        r#"
        SELECT a.id AS attempt_id, q.id AS quiz_id, q.title AS quiz_title, q.quiz_type,
               c.name AS category_name, a.score,
               (SELECT COUNT(*) FROM questions qq WHERE qq.quiz_id = q.id) AS total_questions,
               a.passed, a.finished_at, a.created_at
        FROM attempts a
        JOIN quizzes q ON q.id = a.quiz_id
        LEFT JOIN categories c ON c.id = q.category_id
        WHERE a.user_id = $1
          AND ($2::TEXT IS NULL OR q.title ILIKE $2 OR c.name ILIKE $2)
          AND ($3::TEXT IS NULL OR q.quiz_type = $3)
        ORDER BY a.created_at DESC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(user_id)
    .bind(search_pattern(filter))
    .bind(filter.quiz_type.map(|t| t.as_str()))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn history(
    pool: &PgPool,
    user_id: i64,
    filter: &HistoryFilter,
    page: i64,
) -> Result<HistoryPage, AppError> {
    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM attempts a
        JOIN quizzes q ON q.id = a.quiz_id
        LEFT JOIN categories c ON c.id = q.category_id
        WHERE a.user_id = $1
          AND ($2::TEXT IS NULL OR q.title ILIKE $2 OR c.name ILIKE $2)
          AND ($3::TEXT IS NULL OR q.quiz_type = $3)
        "#,
    )
    .bind(user_id)
    .bind(search_pattern(filter))
    .bind(filter.quiz_type.map(|t| t.as_str()))
    .fetch_one(pool)
    .await?;

    let total_pages = page_count(total, HISTORY_PAGE_SIZE);
    let page = page.clamp(1, total_pages);
    let entries = history_rows(pool, user_id, filter, HISTORY_PAGE_SIZE, (page - 1) * HISTORY_PAGE_SIZE).await?;

    Ok(HistoryPage {
        entries,
        page,
        total_pages,
        total,
    })
}

/// Number of pages, at least one.
pub fn page_count(total: i64, page_size: i64) -> i64 {
    ((total + page_size - 1) / page_size).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, day).unwrap()
    }

    #[test]
    fn streak_counts_back_from_today() {
        assert_eq!(streak(&[d(10), d(9), d(8), d(6)], d(10)), 3);
    }

    #[test]
    fn streak_counts_from_yesterday_when_nothing_today() {
        assert_eq!(streak(&[d(9), d(8)], d(10)), 2);
    }

    #[test]
    fn streak_broken_by_gap_before_yesterday() {
        assert_eq!(streak(&[d(8), d(7)], d(10)), 0);
        assert_eq!(streak(&[], d(10)), 0);
    }

    #[test]
    fn leaderboard_keys() {
        assert_eq!(leaderboard_key(Scope::Global, Period::All, None), "global_all_all");
        assert_eq!(
            leaderboard_key(Scope::College, Period::Weekly, Some(QuizType::Hackathon)),
            "college_weekly_hackathon"
        );
    }

    #[test]
    fn period_starts() {
        let now = Utc.with_ymd_and_hms(2025, 5, 10, 15, 30, 0).unwrap();
        assert_eq!(Period::All.start(now), None);
        assert_eq!(Period::Weekly.start(now), Some(now - Duration::days(7)));
        assert_eq!(Period::Today.start(now), Some(Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap()));
    }

    #[test]
    fn badge_thresholds() {
        assert!(badges(false, 9, 6, 999).is_empty());
        let names: Vec<_> = badges(true, 10, 7, 1000).iter().map(|b| b.name).collect();
        assert_eq!(names, ["Sharpshooter", "Scholar", "Unstoppable", "Grandmaster"]);
    }

    #[test]
    fn labels_and_pages() {
        assert_eq!(graph_label("Ownership and Borrowing"), "Ownership ...");
        assert_eq!(page_count(0, 10), 1);
        assert_eq!(page_count(21, 10), 3);
    }

    #[test]
    fn search_escapes_wildcards() {
        let filter = HistoryFilter { query: Some(" 100%_sure ".to_string()), quiz_type: None };
        assert_eq!(search_pattern(&filter).as_deref(), Some("%100\\%\\_sure%"));
        assert_eq!(search_pattern(&HistoryFilter::default()), None);
    }
}
