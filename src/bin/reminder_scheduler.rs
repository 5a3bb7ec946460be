// src/bin/reminder_scheduler.rs
//
// Standalone class-reminder loop, for deployments that run the web server
// with RUN_REMINDER_SCHEDULER=false. `--once` runs a single check and exits.

use std::time::Duration;

use quizmaster::{config::Config, db, scheduler, services::mail::Mailer};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::new(&config.rust_log))
        .with(fmt::layer().with_target(false))
        .init();

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    let pool = db::connect_with_retry(&config.database_url).await;

    let mailer = match Mailer::from_config(&config) {
        Ok(mailer) => mailer,
        Err(e) => {
            tracing::error!("Invalid SMTP configuration: {}", e);
            std::process::exit(1);
        }
    };

    if once {
        scheduler::run_once(&pool, &mailer, &config.site_url).await;
        return;
    }

    let period = Duration::from_secs(config.reminder_interval_secs.max(1));
    let task = scheduler::ReminderScheduler::spawn(pool, mailer, config.site_url.clone(), period);

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    task.shutdown().await;
}
