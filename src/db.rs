use std::str::FromStr;

use crate::{config::AppConfig, errors::ServiceError};
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

pub async fn connect_from_config(cfg: &AppConfig) -> Result<SqlitePool> {
    connect(&cfg.database_url, cfg.database_max_connections).await
}

/// Abre el pool con claves foráneas activadas en cada conexión.
///
/// Con `sqlite::memory:` cada conexión tendría su propia base, así que el
/// pool se limita a una conexión que nunca se recicla.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let in_memory = database_url.contains(":memory:");
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let mut pool_options = SqlitePoolOptions::new();
    pool_options = if in_memory {
        pool_options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        pool_options.max_connections(max_connections.max(1))
    };

    info!("Conectando a SQLite en {database_url}...");
    let pool = pool_options.connect_with(options).await?;
    info!("Conexión a SQLite OK");
    Ok(pool)
}

/// Crea las tablas si no existen:
/// projects → conversations → messages / conversation_files, con borrado en cascada.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            discipline TEXT NOT NULL DEFAULT 'all' CHECK (discipline IN (
                'financial_accounting', 'cost_accounting', 'management_accounting',
                'financial_management', 'all')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT,
            project_id INTEGER REFERENCES projects(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            mode TEXT NOT NULL CHECK (mode IN ('learning', 'project')),
            discipline TEXT NOT NULL CHECK (discipline IN (
                'financial_accounting', 'cost_accounting', 'management_accounting',
                'financial_management', 'all')),
            is_anonymous INTEGER NOT NULL CHECK (is_anonymous = (owner_id IS NULL)),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS conversation_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            filename TEXT NOT NULL,
            file_type TEXT NOT NULL CHECK (file_type IN (
                'pdf', 'spreadsheet', 'csv', 'image', 'text', 'other')),
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL CHECK (file_size >= 0),
            uploaded_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner_id, updated_at)",
        "CREATE INDEX IF NOT EXISTS idx_conversations_owner ON conversations(owner_id, updated_at)",
        "CREATE INDEX IF NOT EXISTS idx_conversations_project ON conversations(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_files_conversation ON conversation_files(conversation_id)",
    ];

    for stmt in statements {
        sqlx::query(stmt).execute(pool).await?;
    }

    info!("Esquema de SQLite asegurado (tablas, claves foráneas e índices).");
    Ok(())
}

/// Lee una columna TEXT con una etiqueta cerrada (modo, disciplina, rol...).
pub fn decode_tag<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = ServiceError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: ServiceError| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// Pool en memoria con el esquema creado, para los tests de los servicios.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = connect("sqlite::memory:", 1).await.expect("pool en memoria");
    ensure_schema(&pool).await.expect("esquema");
    pool
}
