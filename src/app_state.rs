use sqlx::SqlitePool;
use crate::{config::AppConfig, llm::ChatClient};

/// Estado compartido por todos los handlers: sólo el pool y el cliente de Claude.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pool: SqlitePool,
    pub chat: ChatClient,
}

impl AppState {
    pub fn new(config: AppConfig, pool: SqlitePool) -> Self {
        let chat = ChatClient::from_config(&config);
        Self { config, pool, chat }
    }
}
