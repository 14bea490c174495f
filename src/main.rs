// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod conversations;
mod db;
mod errors;
mod llm;
mod models;
mod projects;
mod prompts;

use crate::app_state::AppState;
use anyhow::Result;
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env()?;

    // 3. Conectar a SQLite y asegurar el esquema
    let pool = db::connect_from_config(&cfg).await?;
    db::ensure_schema(&pool).await?;

    // 4. Estado compartido (el cliente de Claude se inicializa una sola vez aquí)
    let app_state = AppState::new(cfg, pool);

    // 5. Router de la API
    let server_addr = app_state.config.server_addr.clone();
    let app = Router::new()
        .merge(api::create_router(app_state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 6. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&server_addr).await?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
