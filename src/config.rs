// src/config.rs

use std::env;
use std::time::Duration;

use dotenvy::dotenv;

/// Quizzes shown per page in the catalogue.
pub const QUIZ_PAGE_SIZE: i64 = 9;

/// Attempts shown per page in the user's history.
pub const HISTORY_PAGE_SIZE: i64 = 10;

/// Entries returned per leaderboard table.
pub const LEADERBOARD_SIZE: i64 = 3;

/// Attempts sent to the model for progress analysis.
pub const PROGRESS_ANALYSIS_ATTEMPTS: i64 = 15;

/// Category that holds quizzes produced by the generator.
pub const AI_CATEGORY_NAME: &str = "AI Generated";

/// Passing threshold of generated quizzes.
pub const AI_QUIZ_PASSING_PERCENTAGE: i32 = 60;

/// Coupon lifetime when neither fixed dates nor `valid_days` are set.
pub const DEFAULT_COUPON_VALID_DAYS: i32 = 30;

/// Lead time of the early class reminder.
pub const EARLY_REMINDER_LEAD: Duration = Duration::from_secs(3 * 60 * 60);

/// Classes closer than this are skipped by the early reminder.
pub const EARLY_REMINDER_CUTOFF: Duration = Duration::from_secs(60 * 60);

/// Lead time of the late class reminder.
pub const LATE_REMINDER_LEAD: Duration = Duration::from_secs(30 * 60);

/// Default reason recorded on a proctoring submit.
pub const DEFAULT_VIOLATION_REASON: &str = "You exceeded the warning limit.";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub bind_addr: String,
    pub site_url: String,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub admin_email: Option<String>,
    pub smtp: Option<SmtpConfig>,
    pub email_from: String,
    pub llm: LlmConfig,
    pub reminder_interval_secs: u64,
    pub run_reminder_scheduler: bool,
    pub ai_quiz_monthly_limit: i64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_endpoint: String,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o".to_string(),
            api_endpoint: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_millis(60_000),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let smtp = env_string("SMTP_HOST").map(|host| SmtpConfig {
            host,
            port: env_parse("SMTP_PORT").unwrap_or(587),
            username: env_string("SMTP_USER"),
            password: env_string("SMTP_PASSWORD"),
        });

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            api_key: env_string("LLM_API_KEY").or_else(|| env_string("OPENAI_API_KEY")),
            model: env_string("LLM_MODEL").unwrap_or(llm_defaults.model),
            api_endpoint: env_string("LLM_API_ENDPOINT").unwrap_or(llm_defaults.api_endpoint),
            timeout: env_parse("LLM_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(llm_defaults.timeout),
        };

        Self {
            database_url,
            jwt_secret,
            jwt_expiration: env_parse("JWT_EXPIRATION").unwrap_or(86_400),
            rust_log,
            bind_addr: env_string("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            site_url: env_string("SITE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            admin_username: env_string("ADMIN_USERNAME"),
            admin_password: env_string("ADMIN_PASSWORD"),
            admin_email: env_string("ADMIN_EMAIL"),
            smtp,
            email_from: env_string("EMAIL_FROM")
                .unwrap_or_else(|| "no-reply@quizmaster.local".to_string()),
            llm,
            reminder_interval_secs: env_parse("REMINDER_INTERVAL_SECS").unwrap_or(60),
            run_reminder_scheduler: env_flag("RUN_REMINDER_SCHEDULER").unwrap_or(true),
            ai_quiz_monthly_limit: env_parse("AI_QUIZ_MONTHLY_LIMIT").unwrap_or(3),
        }
    }

    /// Configuration for tests and tools that never touch SMTP or the model.
    pub fn for_tests(database_url: &str, jwt_secret: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            jwt_secret: jwt_secret.to_string(),
            jwt_expiration: 600,
            rust_log: "error".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            site_url: "http://127.0.0.1:3000".to_string(),
            admin_username: None,
            admin_password: None,
            admin_email: None,
            smtp: None,
            email_from: "no-reply@quizmaster.local".to_string(),
            llm: LlmConfig::default(),
            reminder_interval_secs: 60,
            run_reminder_scheduler: false,
            ai_quiz_monthly_limit: 3,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key)?.trim().parse().ok()
}

fn env_flag(key: &str) -> Option<bool> {
    env_string(key).map(|v| !matches!(v.trim(), "0" | "false" | "no" | "off"))
}
