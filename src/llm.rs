//! Cliente de Claude (API Messages de Anthropic) para el chat de Moo.
//!
//! `ChatClient` se construye una sola vez al arrancar y guarda si el servicio
//! está disponible; cada petición de chat lo consulta antes de llamar a la red.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    errors::{ServiceError, ServiceResult},
    models::MessageInput,
    prompts::build_system_prompt,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Entrada de una petición de chat. El historial se reenvía tal cual.
#[derive(Debug, Clone)]
pub struct ChatInput {
    pub message: String,
    pub discipline: String,
    pub mode: String,
    pub history: Vec<MessageInput>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// Respuesta de Claude con sus metadatos.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    pub model: String,
    pub tokens_used: TokenUsage,
    pub stop_reason: Option<String>,
}

// --- Formato del API Messages ---

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: String,
    messages: Vec<ClaudeMessage<'a>>,
}

#[derive(Serialize)]
struct ClaudeMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ClaudeUsage,
}

#[derive(Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ClaudeUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct ClaudeErrorBody {
    error: ClaudeErrorDetail,
}

#[derive(Deserialize)]
struct ClaudeErrorDetail {
    message: String,
}

/// Cliente HTTP ya configurado contra el API de Anthropic.
#[derive(Debug)]
pub struct ClaudeService {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeService {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        max_tokens: u32,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Una única llamada a Claude: prompt de sistema + historial + mensaje nuevo.
    /// Cualquier fallo se devuelve como `RemoteService`, sin reintentos.
    pub async fn chat(&self, input: &ChatInput) -> ServiceResult<ChatOutcome> {
        let system = build_system_prompt(&input.discipline, &input.mode);

        let messages = input
            .history
            .iter()
            .map(|m| ClaudeMessage {
                role: &m.role,
                content: &m.content,
            })
            .chain(std::iter::once(ClaudeMessage {
                role: "user",
                content: &input.message,
            }))
            .collect();

        let body = ClaudeRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages,
        };

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::RemoteService(format!("Claude API error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ClaudeErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            return Err(ServiceError::RemoteService(format!(
                "Claude API error ({status}): {message}"
            )));
        }

        let data: ClaudeResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::RemoteService(format!("Unexpected error: {e}")))?;

        let response = data
            .content
            .into_iter()
            .find(|c| c.kind == "text")
            .and_then(|c| c.text)
            .ok_or_else(|| {
                ServiceError::RemoteService("Unexpected error: respuesta sin bloque de texto".to_string())
            })?;

        info!(
            "Respuesta de Claude: {} tokens de entrada, {} de salida.",
            data.usage.input_tokens, data.usage.output_tokens
        );

        Ok(ChatOutcome {
            response,
            model: data.model.unwrap_or_else(|| self.model.clone()),
            tokens_used: TokenUsage {
                input: data.usage.input_tokens,
                output: data.usage.output_tokens,
            },
            stop_reason: data.stop_reason,
        })
    }
}

/// Manejador del cliente de Claude, inicializado una vez y compartido por el estado.
#[derive(Debug, Clone)]
pub struct ChatClient {
    inner: Result<Arc<ClaudeService>, String>,
}

impl ChatClient {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let Some(api_key) = cfg.anthropic_api_key.clone() else {
            warn!("ANTHROPIC_API_KEY no configurada: el chat responderá 503.");
            return Self::unavailable("Servicio de IA no disponible: falta ANTHROPIC_API_KEY.");
        };

        match ClaudeService::new(
            api_key,
            cfg.anthropic_base_url.clone(),
            cfg.claude_model.clone(),
            cfg.claude_max_tokens,
        ) {
            Ok(service) => {
                info!("Cliente de Claude listo (modelo {}).", service.model());
                Self {
                    inner: Ok(Arc::new(service)),
                }
            }
            Err(e) => {
                warn!("No se pudo inicializar el cliente de Claude: {e}");
                Self::unavailable(format!("Servicio de IA no disponible: {e}"))
            }
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            inner: Err(reason.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.is_ok()
    }

    /// El servicio, o `ServiceUnavailable` sin tocar la red.
    pub fn service(&self) -> ServiceResult<&ClaudeService> {
        match &self.inner {
            Ok(service) => Ok(service),
            Err(reason) => Err(ServiceError::ServiceUnavailable(reason.clone())),
        }
    }
}
