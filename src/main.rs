// src/main.rs

use std::time::Duration;

use quizmaster::config::Config;
use quizmaster::scheduler::ReminderScheduler;
use quizmaster::services::mail::Mailer;
use quizmaster::state::AppState;
use quizmaster::{db, routes};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load configuration from environment (.env included)
    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let pool = db::connect_with_retry(&config.database_url).await;

    // Run Migrations Automatically
    db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    if let Err(e) = db::seed_admin_user(&pool, &config).await {
        tracing::error!("Failed to seed admin user: {:?}", e);
    }

    let mailer = Mailer::from_config(&config).expect("Invalid SMTP configuration");

    let scheduler = config.run_reminder_scheduler.then(|| {
        ReminderScheduler::spawn(
            pool.clone(),
            mailer.clone(),
            config.site_url.clone(),
            Duration::from_secs(config.reminder_interval_secs.max(1)),
        )
    });

    let state = AppState::new(pool, config.clone(), mailer);
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listening address");
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
