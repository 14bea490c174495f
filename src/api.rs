use axum::{
    extract::{FromRequest, FromRequestParts, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{
    app_state::AppState,
    conversations,
    errors::{ServiceError, ServiceResult},
    llm::{ChatInput, ChatOutcome},
    models::{
        ConversationDetail, ConversationFile, ConversationSummary, ListConversations, Message,
        MessageInput, NewConversation, NewConversationFile, NewProject, Project, ProjectUpdate,
    },
    projects,
    prompts::{build_system_prompt, estimate_tokens},
};

// --- Extractores ---
// Igual que los de axum, pero sus rechazos pasan por `ServiceError`.

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ServiceError))]
struct JsonBody<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ServiceError))]
struct Path<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ServiceError))]
struct Query<T>(T);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ListProjectsQuery {
    owner_id: String,
}

#[derive(Deserialize)]
pub struct AppendMessagePayload {
    role: String,
    content: String,
}

const DEFAULT_DISCIPLINE: &str = "all";
const DEFAULT_MODE: &str = "learning";

#[derive(Deserialize)]
pub struct ChatPayload {
    message: String,
    /// Si falta, se toma de la conversación indicada o, sin ella, `all`.
    #[serde(default)]
    discipline: Option<String>,
    /// Si falta, se toma de la conversación indicada o, sin ella, `learning`.
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    conversation_history: Vec<MessageInput>,
    /// Si viene, la pregunta y la respuesta se guardan en esa conversación.
    #[serde(default)]
    conversation_id: Option<i64>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    #[serde(flatten)]
    outcome: ChatOutcome,
    estimated_prompt_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<i64>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/projects", post(create_project_handler).get(list_projects_handler))
        .route(
            "/api/projects/:id",
            get(get_project_handler)
                .patch(update_project_handler)
                .delete(delete_project_handler),
        )
        .route(
            "/api/conversations",
            post(create_conversation_handler).get(list_conversations_handler),
        )
        .route(
            "/api/conversations/:id",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .route("/api/conversations/:id/messages", post(append_message_handler))
        .route("/api/conversations/:id/files", post(attach_file_handler))
        .route("/api/chat", post(chat_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => true,
        Err(e) => {
            error!("Error en el health check de SQLite: {}", e);
            false
        }
    };
    let (status, label) = if database_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(json!({
            "status": label,
            "database": database_ok,
            "claude_available": state.chat.is_available(),
            "model": state.config.claude_model,
        })),
    )
}

#[axum::debug_handler]
async fn create_project_handler(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<NewProject>,
) -> ServiceResult<(StatusCode, Json<Project>)> {
    let project = projects::create(&state.pool, payload).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

#[axum::debug_handler]
async fn list_projects_handler(
    State(state): State<AppState>,
    Query(query): Query<ListProjectsQuery>,
) -> ServiceResult<Json<Vec<Project>>> {
    Ok(Json(projects::list(&state.pool, &query.owner_id).await?))
}

#[axum::debug_handler]
async fn get_project_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ServiceResult<Json<Project>> {
    Ok(Json(projects::get(&state.pool, id).await?))
}

#[axum::debug_handler]
async fn update_project_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    JsonBody(payload): JsonBody<ProjectUpdate>,
) -> ServiceResult<Json<Project>> {
    Ok(Json(projects::update(&state.pool, id, payload).await?))
}

#[axum::debug_handler]
async fn delete_project_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ServiceResult<StatusCode> {
    projects::delete(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn create_conversation_handler(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<NewConversation>,
) -> ServiceResult<(StatusCode, Json<ConversationDetail>)> {
    let conversation = conversations::create(&state.pool, payload).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

#[axum::debug_handler]
async fn list_conversations_handler(
    State(state): State<AppState>,
    Query(query): Query<ListConversations>,
) -> ServiceResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(conversations::list(&state.pool, query).await?))
}

#[axum::debug_handler]
async fn get_conversation_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ServiceResult<Json<ConversationDetail>> {
    Ok(Json(conversations::get(&state.pool, id).await?))
}

#[axum::debug_handler]
async fn delete_conversation_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ServiceResult<StatusCode> {
    conversations::delete(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn append_message_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    JsonBody(payload): JsonBody<AppendMessagePayload>,
) -> ServiceResult<(StatusCode, Json<Message>)> {
    let message =
        conversations::append_message(&state.pool, id, &payload.role, &payload.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[axum::debug_handler]
async fn attach_file_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    JsonBody(payload): JsonBody<NewConversationFile>,
) -> ServiceResult<(StatusCode, Json<ConversationFile>)> {
    let file = conversations::attach_file(&state.pool, id, payload).await?;
    Ok((StatusCode::CREATED, Json(file)))
}

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ChatPayload>,
) -> ServiceResult<Json<ChatResponse>> {
    // Sin cliente no se hace nada más: 503 antes de cualquier llamada remota.
    let service = state.chat.service()?;

    if payload.message.trim().is_empty() {
        return Err(ServiceError::Validation(
            "El mensaje no puede estar vacío.".to_string(),
        ));
    }

    // Las etiquetas omitidas se heredan de la conversación guardada.
    let stored = match payload.conversation_id {
        Some(conversation_id) => Some(conversations::find(&state.pool, conversation_id).await?),
        None => None,
    };
    let discipline = payload.discipline.unwrap_or_else(|| {
        stored
            .as_ref()
            .map_or(DEFAULT_DISCIPLINE, |c| c.discipline.as_str())
            .to_string()
    });
    let mode = payload.mode.unwrap_or_else(|| {
        stored
            .as_ref()
            .map_or(DEFAULT_MODE, |c| c.mode.as_str())
            .to_string()
    });

    let estimated_prompt_tokens =
        estimate_tokens(&build_system_prompt(&discipline, &mode)) + estimate_tokens(&payload.message);

    let input = ChatInput {
        message: payload.message,
        discipline,
        mode,
        history: payload.conversation_history,
    };
    let outcome = service.chat(&input).await?;

    if let Some(conversation_id) = payload.conversation_id {
        conversations::append_exchange(&state.pool, conversation_id, &input.message, &outcome.response)
            .await?;
        info!("Intercambio de chat guardado en la conversación {conversation_id}.");
    }

    Ok(Json(ChatResponse {
        outcome,
        estimated_prompt_tokens,
        conversation_id: payload.conversation_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, db::test_pool, llm::tests::{ok_reply, spawn_stub}};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn app_with(config: AppConfig) -> (Router, sqlx::SqlitePool) {
        let pool = test_pool().await;
        let state = AppState::new(config, pool.clone());
        (create_router(state), pool)
    }

    async fn app() -> (Router, sqlx::SqlitePool) {
        app_with(AppConfig::for_tests()).await
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        send_raw(app, method, uri, body.map(|json| json.to_string())).await
    }

    async fn send_raw(app: &Router, method: Method, uri: &str, body: Option<String>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(text) => {
                builder = builder.header("content-type", "application/json");
                Body::from(text)
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_chat_availability() {
        let (app, _) = app().await;
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], true);
        assert_eq!(body["claude_available"], false);
    }

    #[tokio::test]
    async fn project_lifecycle_over_http() {
        let (app, _) = app().await;

        let (status, project) = send(
            &app,
            Method::POST,
            "/api/projects",
            Some(json!({ "owner_id": "u1", "name": "Presupuesto" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(project["discipline"], "all");
        let id = project["id"].as_i64().unwrap();

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/conversations",
            Some(json!({
                "owner_id": "u1",
                "project_id": id,
                "mode": "project",
                "discipline": "management_accounting",
                "messages": [{ "role": "user", "content": "Break-even para 3 productos" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, fetched) = send(&app, Method::GET, &format!("/api/projects/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["conversation_count"], 1);

        let (status, updated) = send(
            &app,
            Method::PATCH,
            &format!("/api/projects/{id}"),
            Some(json!({ "description": "FY2025" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "Presupuesto");
        assert_eq!(updated["description"], "FY2025");

        let (status, listed) = send(&app, Method::GET, "/api/projects?owner_id=u1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, Method::DELETE, &format!("/api/projects/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, Method::GET, &format!("/api/projects/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().is_some());

        let (_, conversations) = send(&app, Method::GET, "/api/conversations?owner_id=u1", None).await;
        assert!(conversations.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversation_routes_map_errors() {
        let (app, _) = app().await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/conversations",
            Some(json!({ "mode": "exam", "discipline": "all" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("exam"));

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/conversations/404/messages",
            Some(json!({ "role": "user", "content": "hola" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::DELETE, "/api/conversations/404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_requests_answer_with_json_errors() {
        let (app, _) = app().await;

        let (status, body) = send_raw(
            &app,
            Method::POST,
            "/api/projects",
            Some(r#"{"owner_id": "u1", "name": "#.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some());

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/conversations",
            Some(json!({ "mode": "learning" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("discipline"));

        let (status, body) = send(&app, Method::GET, "/api/projects/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some());

        let (status, body) = send(&app, Method::GET, "/api/projects", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("owner_id"));

        let (status, body) = send(&app, Method::GET, "/api/conversations?limit=many", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn conversation_lifecycle_over_http() {
        let (app, _) = app().await;

        let (status, created) = send(
            &app,
            Method::POST,
            "/api/conversations",
            Some(json!({ "mode": "learning", "discipline": "cost_accounting" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["is_anonymous"], true);
        assert_eq!(created["title"], conversations::PLACEHOLDER_TITLE);
        let id = created["id"].as_i64().unwrap();

        let (status, message) = send(
            &app,
            Method::POST,
            &format!("/api/conversations/{id}/messages"),
            Some(json!({ "role": "user", "content": "¿Qué es el método FIFO?" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message["role"], "user");

        let (status, file) = send(
            &app,
            Method::POST,
            &format!("/api/conversations/{id}/files"),
            Some(json!({ "filename": "inventario.csv", "file_path": "uploads/inventario.csv", "file_size": 4096 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(file["file_type"], "csv");

        let (status, detail) = send(&app, Method::GET, &format!("/api/conversations/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["messages"].as_array().unwrap().len(), 1);
        assert_eq!(detail["files"].as_array().unwrap().len(), 1);

        let (status, listed) = send(&app, Method::GET, "/api/conversations?limit=10", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["message_count"], 1);

        let (status, _) = send(&app, Method::DELETE, &format!("/api/conversations/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn chat_without_credentials_is_unavailable() {
        let (app, _) = app().await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({ "message": "Explain NPV", "discipline": "financial_management" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("ANTHROPIC_API_KEY"));
    }

    #[tokio::test]
    async fn chat_calls_claude_and_stores_the_exchange() {
        let (base_url, captured) = spawn_stub(StatusCode::OK, ok_reply()).await;
        let mut config = AppConfig::for_tests();
        config.anthropic_api_key = Some("sk-test".to_string());
        config.anthropic_base_url = base_url;
        let (app, pool) = app_with(config).await;

        let created = conversations::create(
            &pool,
            NewConversation {
                owner_id: Some("u1".to_string()),
                project_id: None,
                mode: "learning".to_string(),
                discipline: "financial_management".to_string(),
                messages: vec![],
            },
        )
        .await
        .unwrap();
        let id = created.conversation.id;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({
                "message": "Explain NPV",
                "discipline": "financial_management",
                "mode": "learning",
                "conversation_id": id
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "NPV discounts future cash flows.");
        assert_eq!(body["tokens_used"]["input"], 321);
        assert_eq!(body["stop_reason"], "end_turn");
        assert_eq!(body["conversation_id"], id);
        assert_eq!(captured.lock().unwrap().len(), 1);

        let detail = conversations::get(&pool, id).await.unwrap();
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[1].content, "NPV discounts future cash flows.");

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({ "message": "hola", "conversation_id": 999 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(captured.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_inherits_tags_from_the_stored_conversation() {
        let (base_url, captured) = spawn_stub(StatusCode::OK, ok_reply()).await;
        let mut config = AppConfig::for_tests();
        config.anthropic_api_key = Some("sk-test".to_string());
        config.anthropic_base_url = base_url;
        let (app, pool) = app_with(config).await;

        let created = conversations::create(
            &pool,
            NewConversation {
                owner_id: Some("u1".to_string()),
                project_id: None,
                mode: "project".to_string(),
                discipline: "cost_accounting".to_string(),
                messages: vec![],
            },
        )
        .await
        .unwrap();
        let id = created.conversation.id;

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({ "message": "Costeo ABC para dos líneas", "conversation_id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Un valor explícito en la petición tiene prioridad sobre la conversación.
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({ "message": "¿Y el FIFO?", "mode": "learning", "conversation_id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, Method::POST, "/api/chat", Some(json!({ "message": "hola" }))).await;
        assert_eq!(status, StatusCode::OK);

        let calls = captured.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1["system"], build_system_prompt("cost_accounting", "project"));
        assert_eq!(calls[1].1["system"], build_system_prompt("cost_accounting", "learning"));
        assert_eq!(calls[2].1["system"], build_system_prompt("all", "learning"));
    }

    #[tokio::test]
    async fn chat_maps_remote_failures_to_bad_gateway() {
        let (base_url, _) = spawn_stub(
            StatusCode::TOO_MANY_REQUESTS,
            json!({ "type": "error", "error": { "type": "rate_limit_error", "message": "slow down" } }),
        )
        .await;
        let mut config = AppConfig::for_tests();
        config.anthropic_api_key = Some("sk-test".to_string());
        config.anthropic_base_url = base_url;
        let (app, _) = app_with(config).await;

        let (status, body) = send(&app, Method::POST, "/api/chat", Some(json!({ "message": "hola" }))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("slow down"));
    }
}
