// src/db.rs

use std::time::Duration;

use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{config::Config, error::AppError, utils::hash::hash_password};

const CONNECT_RETRIES: u32 = 5;

/// Connects to Postgres, retrying while the database is still starting.
/// Panics once the retries are exhausted, since nothing works without it.
pub async fn connect_with_retry(database_url: &str) -> PgPool {
    let mut retry_count = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                tracing::info!("Database connected...");
                return pool;
            }
            Err(e) => {
                retry_count += 1;
                if retry_count > CONNECT_RETRIES {
                    panic!("Failed to connect to database after {CONNECT_RETRIES} retries: {e}");
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Migrations applied successfully.");
    Ok(())
}

/// Creates the configured admin account if it does not exist yet.
pub async fn seed_admin_user(pool: &PgPool, config: &Config) -> Result<(), AppError> {
    let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) else {
        return Ok(());
    };

    let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    if exists.is_none() {
        tracing::info!("Seeding admin user: {}", username);
        let hashed_password = hash_password(password)?;
        let email = config.admin_email.clone().unwrap_or_default();

        sqlx::query(
            "INSERT INTO users (username, email, password, role, is_active) \
             VALUES ($1, $2, $3, 'admin', TRUE)",
        )
        .bind(username)
        .bind(email)
        .bind(hashed_password)
        .execute(pool)
        .await?;
        tracing::info!("Admin user created successfully.");
    }
    Ok(())
}
