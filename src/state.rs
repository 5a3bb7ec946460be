// src/state.rs

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    config::Config,
    services::{llm::LlmClient, mail::Mailer},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub mailer: Mailer,
    pub llm: LlmClient,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, mailer: Mailer) -> Self {
        let llm = LlmClient::new(config.llm.clone());
        Self {
            pool,
            config,
            mailer,
            llm,
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Mailer {
    fn from_ref(state: &AppState) -> Self {
        state.mailer.clone()
    }
}

impl FromRef<AppState> for LlmClient {
    fn from_ref(state: &AppState) -> Self {
        state.llm.clone()
    }
}
