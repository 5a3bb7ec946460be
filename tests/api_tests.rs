// tests/api_tests.rs
//
// End-to-end flows against a real Postgres. Each test returns early when
// DATABASE_URL is not set.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use quizmaster::{
    config::Config,
    db,
    models::{
        attempt::NextStep,
        quiz::{QUIZ_COLUMNS, Quiz},
    },
    routes,
    services::{
        attempt::start_attempt,
        enrollment::end_of_day,
        mail::{Email, MailError, MailTransport, Mailer},
        reminder::run_reminder_check,
    },
    state::AppState,
};
use serde_json::{Value, json};
use sqlx::{PgPool, postgres::PgPoolOptions};

const SECRET: &str = "test_secret_for_integration_tests";

struct TestApp {
    address: String,
    pool: PgPool,
    client: reqwest::Client,
}

/// Spawns the app on a random port. `None` when no database is configured.
async fn spawn_app() -> Option<TestApp> {
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    db::run_migrations(&pool).await.expect("Failed to migrate database");

    let state = AppState::new(
        pool.clone(),
        Config::for_tests(&database_url, SECRET),
        Mailer::log_only("test@quizmaster.local"),
    );
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Some(TestApp {
        address: format!("http://127.0.0.1:{}", port),
        pool,
        client: reqwest::Client::new(),
    })
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..10])
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    async fn get(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn put(&self, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .put(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn register(&self, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/auth/register"))
            .json(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": password,
                "first_name": "Test",
            }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Registers, activates directly in the database and logs in.
    async fn active_user(&self) -> (i64, String) {
        self.user_with_role("user").await
    }

    async fn admin_user(&self) -> (i64, String) {
        self.user_with_role("admin").await
    }

    async fn user_with_role(&self, role: &str) -> (i64, String) {
        let username = unique("u");
        let password = "password123";
        assert_eq!(self.register(&username, password).await.status().as_u16(), 201);

        let (id,): (i64,) =
            sqlx::query_as("UPDATE users SET is_active = TRUE, role = $2 WHERE username = $1 RETURNING id")
                .bind(&username)
                .bind(role)
                .fetch_one(&self.pool)
                .await
                .unwrap();

        let body: Value = self.login(&username, password).await.json().await.unwrap();
        (id, body["token"].as_str().expect("token").to_string())
    }

    async fn email_of(&self, user_id: i64) -> String {
        let (email,): (String,) = sqlx::query_as("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .unwrap();
        email
    }

    async fn seed_batch(&self) -> i64 {
        let (workshop_id,): (i64,) = sqlx::query_as("INSERT INTO workshops (title) VALUES ($1) RETURNING id")
            .bind(unique("Workshop"))
            .fetch_one(&self.pool)
            .await
            .unwrap();
        let (batch_id,): (i64,) =
            sqlx::query_as("INSERT INTO batches (workshop_id, name) VALUES ($1, 'Evening') RETURNING id")
                .bind(workshop_id)
                .fetch_one(&self.pool)
                .await
                .unwrap();
        batch_id
    }

    /// Inserts a fixed-date enrollment coupon assigned to the user.
    async fn seed_fixed_coupon(&self, batch_id: i64, user_id: i64, valid_until: chrono::NaiveDate) -> String {
        let code = unique("FIX").to_uppercase();
        sqlx::query(
            "INSERT INTO coupons (code, batch_id, assigned_to, enrollment_valid_until, payment_amount) \
             VALUES ($1, $2, $3, $4, 1500.5)",
        )
        .bind(&code)
        .bind(batch_id)
        .bind(user_id)
        .bind(valid_until)
        .execute(&self.pool)
        .await
        .unwrap();
        code
    }

    async fn seed_class(&self, batch_id: i64, topic: &str, start: DateTime<Utc>) -> i64 {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO class_schedules (batch_id, topic, start_time, end_time) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(batch_id)
        .bind(topic)
        .bind(start)
        .bind(start + Duration::hours(1))
        .fetch_one(&self.pool)
        .await
        .unwrap();
        id
    }

    async fn quiz(&self, quiz_id: i64) -> Quiz {
        sqlx::query_as::<_, Quiz>(&format!("SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = $1"))
            .bind(quiz_id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    /// Inserts a quiz whose questions each have the first choice correct.
    async fn seed_quiz(&self, quiz_type: &str, coupon: Option<&str>, questions: usize) -> (i64, Vec<(i64, i64, i64)>) {
        let (quiz_id,): (i64,) = sqlx::query_as(
            "INSERT INTO quizzes (title, quiz_type, coupon_code, duration_minutes) \
             VALUES ($1, $2, $3, 30) RETURNING id",
        )
        .bind(unique("Quiz"))
        .bind(quiz_type)
        .bind(coupon)
        .fetch_one(&self.pool)
        .await
        .unwrap();

        let mut seeded = Vec::new();
        for i in 0..questions {
            let (question_id,): (i64,) =
                sqlx::query_as("INSERT INTO questions (quiz_id, text) VALUES ($1, $2) RETURNING id")
                    .bind(quiz_id)
                    .bind(format!("Question {i}"))
                    .fetch_one(&self.pool)
                    .await
                    .unwrap();
            let (right,): (i64,) = sqlx::query_as(
                "INSERT INTO choices (question_id, text, is_correct) VALUES ($1, 'Right', TRUE) RETURNING id",
            )
            .bind(question_id)
            .fetch_one(&self.pool)
            .await
            .unwrap();
            let (wrong,): (i64,) = sqlx::query_as(
                "INSERT INTO choices (question_id, text, is_correct) VALUES ($1, 'Wrong', FALSE) RETURNING id",
            )
            .bind(question_id)
            .fetch_one(&self.pool)
            .await
            .unwrap();
            seeded.push((question_id, right, wrong));
        }
        (quiz_id, seeded)
    }
}

#[tokio::test]
async fn register_login_and_profile() {
    let Some(app) = spawn_app().await else { return };
    let username = unique("u");
    let password = "password123";

    let response = app.register(&username, password).await;
    assert_eq!(response.status().as_u16(), 201);

    // Same username again
    let response = app.register(&username, password).await;
    assert_eq!(response.status().as_u16(), 409);

    // Not activated yet
    assert_eq!(app.login(&username, password).await.status().as_u16(), 403);

    sqlx::query("UPDATE users SET is_active = TRUE WHERE username = $1")
        .bind(&username)
        .execute(&app.pool)
        .await
        .unwrap();

    assert_eq!(app.login(&username, "wrong-password").await.status().as_u16(), 401);

    let login: Value = app.login(&username, password).await.json().await.unwrap();
    assert_eq!(login["type"], "Bearer");
    let token = login["token"].as_str().unwrap();

    let profile = app.get(token, "/api/profile").await;
    assert_eq!(profile.status().as_u16(), 200);
    let profile: Value = profile.json().await.unwrap();
    assert_eq!(profile["username"], username.as_str());
}

#[tokio::test]
async fn practice_quiz_attempt_is_scored() {
    let Some(app) = spawn_app().await else { return };
    let (_, token) = app.active_user().await;
    let (quiz_id, questions) = app.seed_quiz("practice", None, 2).await;

    let start = app.post(&token, &format!("/api/quizzes/{quiz_id}/start"), json!({})).await;
    assert_eq!(start.status().as_u16(), 201);
    let start: Value = start.json().await.unwrap();
    assert_eq!(start["next"], "question");
    assert_eq!(start["question_id"].as_i64(), Some(questions[0].0));
    let attempt_id = start["attempt_id"].as_i64().unwrap();

    let (q1, right1, _) = questions[0];
    let (q2, _, wrong2) = questions[1];

    let shown: Value = app
        .get(&token, &format!("/api/attempts/{attempt_id}/questions/{q1}"))
        .await
        .json()
        .await
        .unwrap();
    assert!(shown.to_string().contains("Right"));

    // Result is not available while the attempt runs
    let early = app.get(&token, &format!("/api/attempts/{attempt_id}/result")).await;
    assert_eq!(early.status().as_u16(), 409);

    let step: Value = app
        .post(
            &token,
            &format!("/api/attempts/{attempt_id}/questions/{q1}"),
            json!({ "choice_id": right1, "action": "next" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(step["finished"], false);
    assert_eq!(step["next"]["question_id"].as_i64(), Some(q2));

    let done: Value = app
        .post(
            &token,
            &format!("/api/attempts/{attempt_id}/questions/{q2}"),
            json!({ "choice_id": wrong2, "action": "submit" }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(done["finished"], true);

    let result: Value = app
        .get(&token, &format!("/api/attempts/{attempt_id}/result"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(result["score"], 1);
    assert_eq!(result["total"], 2);
    assert_eq!(result["passed"], true);
    assert_eq!(result["review"].as_array().map(Vec::len), Some(2));

    let history: Value = app.get(&token, "/api/attempts/history").await.json().await.unwrap();
    assert!(history.to_string().contains(&attempt_id.to_string()));
}

#[tokio::test]
async fn hackathon_needs_coupon_and_locks_the_user_in() {
    let Some(app) = spawn_app().await else { return };
    let (_, token) = app.active_user().await;
    let coupon = unique("HACK").to_uppercase();
    let (quiz_id, questions) = app.seed_quiz("hackathon", Some(&coupon), 1).await;

    let detail: Value = app.get(&token, &format!("/api/quizzes/{quiz_id}")).await.json().await.unwrap();
    assert_eq!(detail["needs_coupon"], true);

    let start = app.post(&token, &format!("/api/quizzes/{quiz_id}/start"), json!({})).await;
    assert_eq!(start.status().as_u16(), 403);

    let wrong = app
        .post(&token, &format!("/api/quizzes/{quiz_id}/redeem"), json!({ "coupon_code": "NOPE" }))
        .await;
    assert_eq!(wrong.status().as_u16(), 400);

    let redeemed = app
        .post(&token, &format!("/api/quizzes/{quiz_id}/redeem"), json!({ "coupon_code": coupon }))
        .await;
    assert_eq!(redeemed.status().as_u16(), 200);

    let start: Value = app
        .post(&token, &format!("/api/quizzes/{quiz_id}/start"), json!({}))
        .await
        .json()
        .await
        .unwrap();
    let attempt_id = start["attempt_id"].as_i64().unwrap();

    // Everything outside the attempt is locked
    let locked = app.get(&token, "/api/dashboard").await;
    assert_eq!(locked.status().as_u16(), 409);
    let locked: Value = locked.json().await.unwrap();
    assert_eq!(locked["attempt_id"].as_i64(), Some(attempt_id));

    let (q1, right, _) = questions[0];
    let own = app.get(&token, &format!("/api/attempts/{attempt_id}/questions/{q1}")).await;
    assert_eq!(own.status().as_u16(), 200);

    app.post(
        &token,
        &format!("/api/attempts/{attempt_id}/questions/{q1}"),
        json!({ "choice_id": right, "action": "submit" }),
    )
    .await;

    assert_eq!(app.get(&token, "/api/dashboard").await.status().as_u16(), 200);

    // A hackathon is attempted once
    let again: Value = app
        .post(&token, &format!("/api/quizzes/{quiz_id}/start"), json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(again["next"], "result");
    assert_eq!(again["attempt_id"].as_i64(), Some(attempt_id));
}

#[tokio::test]
async fn enrollment_coupon_unlocks_the_program() {
    let Some(app) = spawn_app().await else { return };
    let (user_id, token) = app.active_user().await;

    let gate: Value = app.get(&token, "/api/training/program").await.json().await.unwrap();
    assert_eq!(gate["enrolled"], false);

    let (workshop_id,): (i64,) = sqlx::query_as("INSERT INTO workshops (title) VALUES ('Rust Bootcamp') RETURNING id")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    let (batch_id,): (i64,) =
        sqlx::query_as("INSERT INTO batches (workshop_id, name) VALUES ($1, 'Evening') RETURNING id")
            .bind(workshop_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    let code = unique("ENR").to_uppercase();
    sqlx::query("INSERT INTO coupons (code, batch_id, assigned_to, valid_days) VALUES ($1, $2, $3, 30)")
        .bind(&code)
        .bind(batch_id)
        .bind(user_id)
        .execute(&app.pool)
        .await
        .unwrap();

    let redeemed = app.post(&token, "/api/training/redeem", json!({ "coupon_code": code })).await;
    assert_eq!(redeemed.status().as_u16(), 200);

    let twice = app.post(&token, "/api/training/redeem", json!({ "coupon_code": code })).await;
    assert_eq!(twice.status().as_u16(), 400);

    let program: Value = app.get(&token, "/api/training/program").await.json().await.unwrap();
    assert_eq!(program["enrolled"], true);

    let payments = app.get(&token, "/api/training/payments").await;
    assert_eq!(payments.status().as_u16(), 200);
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn deliver(&self, _from: &str, email: &Email) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

#[tokio::test]
async fn changing_hackathon_coupon_revokes_access() {
    let Some(app) = spawn_app().await else { return };
    let (_, admin) = app.admin_user().await;
    let (_, token) = app.active_user().await;
    let coupon = unique("HACK").to_uppercase();
    let (quiz_id, _) = app.seed_quiz("hackathon", Some(&coupon), 1).await;

    let redeemed = app
        .post(&token, &format!("/api/quizzes/{quiz_id}/redeem"), json!({ "coupon_code": coupon }))
        .await;
    assert_eq!(redeemed.status().as_u16(), 200);
    let detail: Value = app.get(&token, &format!("/api/quizzes/{quiz_id}")).await.json().await.unwrap();
    assert_eq!(detail["has_access"], true);

    let updated = app
        .put(
            &admin,
            &format!("/api/admin/quizzes/{quiz_id}"),
            json!({ "coupon_code": unique("NEW").to_uppercase() }),
        )
        .await;
    assert_eq!(updated.status().as_u16(), 200);

    let detail: Value = app.get(&token, &format!("/api/quizzes/{quiz_id}")).await.json().await.unwrap();
    assert_eq!(detail["has_access"], false);
    assert_eq!(detail["needs_coupon"], true);

    let start = app.post(&token, &format!("/api/quizzes/{quiz_id}/start"), json!({})).await;
    assert_eq!(start.status().as_u16(), 403);
}

#[tokio::test]
async fn result_recomputes_stale_score() {
    let Some(app) = spawn_app().await else { return };
    let (_, token) = app.active_user().await;
    let (quiz_id, questions) = app.seed_quiz("practice", None, 2).await;
    let (q1, right1, _) = questions[0];
    let (q2, _, wrong2) = questions[1];

    let start: Value = app
        .post(&token, &format!("/api/quizzes/{quiz_id}/start"), json!({}))
        .await
        .json()
        .await
        .unwrap();
    let attempt_id = start["attempt_id"].as_i64().unwrap();

    app.post(
        &token,
        &format!("/api/attempts/{attempt_id}/questions/{q1}"),
        json!({ "choice_id": right1, "action": "next" }),
    )
    .await;
    app.post(
        &token,
        &format!("/api/attempts/{attempt_id}/questions/{q2}"),
        json!({ "choice_id": wrong2, "action": "submit" }),
    )
    .await;

    sqlx::query("UPDATE attempts SET score = 99 WHERE id = $1")
        .bind(attempt_id)
        .execute(&app.pool)
        .await
        .unwrap();

    let result: Value = app
        .get(&token, &format!("/api/attempts/{attempt_id}/result"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(result["score"], 1);

    let (stored,): (i32,) = sqlx::query_as("SELECT score FROM attempts WHERE id = $1")
        .bind(attempt_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(stored, 1);
}

#[tokio::test]
async fn concurrent_hackathon_starts_share_one_attempt() {
    let Some(app) = spawn_app().await else { return };
    let (user_id, _) = app.active_user().await;
    let (quiz_id, _) = app.seed_quiz("hackathon", Some("RACE"), 1).await;
    sqlx::query("INSERT INTO quiz_access_grants (quiz_id, user_id) VALUES ($1, $2)")
        .bind(quiz_id)
        .bind(user_id)
        .execute(&app.pool)
        .await
        .unwrap();
    let quiz = app.quiz(quiz_id).await;

    let now = Utc::now();
    let starts = start_concurrently(&app.pool, user_id, &quiz, now).await;

    let ids: Vec<i64> = starts
        .into_iter()
        .map(|step| match step.expect("start should succeed") {
            NextStep::Question { attempt_id, .. } | NextStep::Result { attempt_id } => attempt_id,
        })
        .collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]), "starts diverged: {ids:?}");

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attempts WHERE user_id = $1 AND quiz_id = $2")
        .bind(user_id)
        .bind(quiz_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

async fn start_concurrently(
    pool: &PgPool,
    user_id: i64,
    quiz: &Quiz,
    now: DateTime<Utc>,
) -> Vec<Result<NextStep, quizmaster::error::AppError>> {
    let (a, b, c, d) = tokio::join!(
        start_attempt(pool, user_id, quiz, now),
        start_attempt(pool, user_id, quiz, now),
        start_attempt(pool, user_id, quiz, now),
        start_attempt(pool, user_id, quiz, now),
    );
    vec![a, b, c, d]
}

#[tokio::test]
async fn class_reminders_go_out_once_per_threshold() {
    let Some(app) = spawn_app().await else { return };
    let (user_id, _) = app.active_user().await;
    let email = app.email_of(user_id).await;
    let batch_id = app.seed_batch().await;
    sqlx::query("INSERT INTO enrollments (user_id, batch_id, expires_at) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(batch_id)
        .bind(Utc::now() + Duration::days(30))
        .execute(&app.pool)
        .await
        .unwrap();

    let now = Utc::now();
    let early_topic = unique("Ownership");
    let late_topic = unique("Lifetimes");
    let early_class = app.seed_class(batch_id, &early_topic, now + Duration::hours(2)).await;
    let late_class = app.seed_class(batch_id, &late_topic, now + Duration::minutes(20)).await;

    let transport = Arc::new(RecordingTransport::default());
    let mailer = Mailer::new(transport.clone(), "test@quizmaster.local");
    let site = "http://localhost";

    let (a, b, c) = tokio::join!(
        run_reminder_check(&app.pool, &mailer, site, now),
        run_reminder_check(&app.pool, &mailer, site, now),
        run_reminder_check(&app.pool, &mailer, site, now),
    );
    for report in [a, b, c] {
        report.expect("reminder pass should succeed");
    }
    run_reminder_check(&app.pool, &mailer, site, now).await.unwrap();

    let sent = transport.sent.lock().unwrap();
    let mine: Vec<&Email> = sent.iter().filter(|e| e.to == email).collect();
    assert_eq!(mine.iter().filter(|e| e.subject.contains(&early_topic)).count(), 1);
    assert_eq!(mine.iter().filter(|e| e.subject.contains(&late_topic)).count(), 1);
    assert!(mine.iter().any(|e| e.subject.starts_with("Reminder: Class in 3 Hours")));
    drop(sent);

    let flags: Vec<(i64, bool, bool)> = sqlx::query_as(
        "SELECT id, reminder_3hr_sent, reminder_30min_sent FROM class_schedules WHERE id = ANY($1) ORDER BY id",
    )
    .bind(vec![early_class, late_class])
    .fetch_all(&app.pool)
    .await
    .unwrap();
    assert_eq!(flags, vec![(early_class, true, false), (late_class, false, true)]);
}

#[tokio::test]
async fn enrollment_expiry_follows_latest_fixed_coupon() {
    let Some(app) = spawn_app().await else { return };
    let (user_id, token) = app.active_user().await;
    let batch_id = app.seed_batch().await;
    let today = Utc::now().date_naive();

    let past = app.seed_fixed_coupon(batch_id, user_id, today - Duration::days(1)).await;
    let rejected = app.post(&token, "/api/training/redeem", json!({ "coupon_code": past })).await;
    assert_eq!(rejected.status().as_u16(), 400);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM enrollments WHERE user_id = $1 AND batch_id = $2")
        .bind(user_id)
        .bind(batch_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(count, 0);

    let long = app.seed_fixed_coupon(batch_id, user_id, today + Duration::days(40)).await;
    let short = app.seed_fixed_coupon(batch_id, user_id, today + Duration::days(10)).await;
    for code in [long, short] {
        let redeemed = app.post(&token, "/api/training/redeem", json!({ "coupon_code": code })).await;
        assert_eq!(redeemed.status().as_u16(), 200);
    }

    let (expires_at,): (DateTime<Utc>,) =
        sqlx::query_as("SELECT expires_at FROM enrollments WHERE user_id = $1 AND batch_id = $2")
            .bind(user_id)
            .bind(batch_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(expires_at, end_of_day(today + Duration::days(40)));

    // Amounts keep their two decimals
    let payments = app.get(&token, "/api/training/payments").await.text().await.unwrap();
    assert!(payments.contains("1500.5"), "{payments}");
}
