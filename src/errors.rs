//! Errores de los servicios y su traducción a respuestas HTTP.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Etiqueta (modo, disciplina, rol...) o campo obligatorio inválido.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    /// Cualquier fallo de la llamada a Claude; conserva el mensaje original.
    #[error("Error del servicio de IA: {0}")]
    RemoteService(String),
    /// El cliente de Claude no pudo inicializarse (p. ej. falta la clave).
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("Error de base de datos: {0}")]
    Database(#[from] sqlx::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::RemoteService(_) => StatusCode::BAD_GATEWAY,
            ServiceError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

// Cuerpos, rutas y query strings mal formados responden con el mismo
// `{"error": ...}` que el resto de validaciones.
impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ServiceError {
    fn from(rejection: PathRejection) -> Self {
        ServiceError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        ServiceError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ServiceError::Database(e) => {
                error!("Error de base de datos: {e}");
                "Error interno del servidor.".to_string()
            }
            ServiceError::RemoteService(msg) => {
                error!("Fallo en la llamada a Claude: {msg}");
                self.to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
