//! Carga y gestión de configuración de la aplicación (SQLite + Claude).

use std::env;
use anyhow::{anyhow, Result};
use url::Url;

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub server_addr: String,

    /// `None` si no hay clave: el chat queda deshabilitado (503), el resto del API funciona.
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub claude_model: String,
    pub claude_max_tokens: u32,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://moo.db".to_string());
        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 5)?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());

        let anthropic_api_key = env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let anthropic_base_url = env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_ANTHROPIC_BASE_URL.to_string());
        let anthropic_base_url = normalize_base_url(&anthropic_base_url)?;

        let claude_model =
            env::var("CLAUDE_MODEL").unwrap_or_else(|_| DEFAULT_CLAUDE_MODEL.to_string());
        let claude_max_tokens = parse_var("CLAUDE_MAX_TOKENS", 4096)?;

        Ok(Self {
            database_url,
            database_max_connections,
            server_addr,
            anthropic_api_key,
            anthropic_base_url,
            claude_model,
            claude_max_tokens,
        })
    }

    /// Configuración para tests: base en memoria y sin clave de Anthropic.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 1,
            server_addr: "127.0.0.1:0".to_string(),
            anthropic_api_key: None,
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            claude_model: DEFAULT_CLAUDE_MODEL.to_string(),
            claude_max_tokens: 4096,
        }
    }
}

fn parse_var(name: &str, default: u32) -> Result<u32> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Valor inválido para {name} ('{raw}'): {e}")),
        Err(_) => Ok(default),
    }
}

/// Valida la URL base del API y elimina la barra final.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw).map_err(|e| anyhow!("ANTHROPIC_BASE_URL inválida ('{raw}'): {e}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(anyhow!("ANTHROPIC_BASE_URL debe ser http(s): {raw}"));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}
