// src/scheduler.rs

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};

use crate::services::{mail::Mailer, reminder};

/// Periodic class-reminder loop.
///
/// Every tick runs one `run_reminder_check`; the one-shot flags in the
/// database make repeated or overlapping ticks harmless.
pub struct ReminderScheduler {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl ReminderScheduler {
    pub fn spawn(pool: PgPool, mailer: Mailer, site_url: String, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            tracing::info!("Class reminder scheduler started (every {:?})", period);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Class reminder scheduler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        run_once(&pool, &mailer, &site_url).await;
                    }
                }
            }
        });

        Self { shutdown_tx, handle }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            tracing::error!("Reminder scheduler task failed: {}", e);
        }
    }
}

/// Runs a single check and logs the outcome. Never fails.
pub async fn run_once(pool: &PgPool, mailer: &Mailer, site_url: &str) {
    let now = Utc::now();
    tracing::debug!("Running class reminder check at {}", now);
    match reminder::run_reminder_check(pool, mailer, site_url, now).await {
        Ok(report) if report.classes > 0 => {
            tracing::info!(
                classes = report.classes,
                sent = report.sent,
                failed = report.failed,
                "Reminder check finished"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Reminder check failed: {:?}", e),
    }
}
