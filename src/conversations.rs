//! Servicio de conversaciones: alta (con mensajes iniciales), lectura,
//! listado paginado, mensajes nuevos, ficheros adjuntos y borrado.
//!
//! Las relaciones se recorren siempre con consultas explícitas por clave
//! foránea; las escrituras de varias filas van dentro de una transacción.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use tracing::info;

use crate::{
    db::decode_tag,
    errors::{ServiceError, ServiceResult},
    models::{
        Conversation, ConversationDetail, ConversationFile, ConversationSummary, Discipline,
        FileKind, ListConversations, Message, MessageInput, Mode, NewConversation,
        NewConversationFile, Role,
    },
};

pub const PLACEHOLDER_TITLE: &str = "New Conversation";
pub const TITLE_MAX_CHARS: usize = 50;
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Título a partir del primer mensaje: 50 caracteres y "..." si se recorta.
pub fn derive_title(messages: &[MessageInput]) -> String {
    let Some(first) = messages.first() else {
        return PLACEHOLDER_TITLE.to_string();
    };
    // El recorte se aplica al contenido tal cual se guarda; trim sólo decide si está vacío.
    if first.content.trim().is_empty() {
        return PLACEHOLDER_TITLE.to_string();
    }

    let mut chars = first.content.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn normalize_owner(owner_id: Option<String>) -> Option<String> {
    owner_id
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
}

fn validate_content(content: &str) -> ServiceResult<()> {
    if content.trim().is_empty() {
        return Err(ServiceError::Validation(
            "El contenido del mensaje no puede estar vacío.".to_string(),
        ));
    }
    Ok(())
}

fn not_found(id: i64) -> ServiceError {
    ServiceError::NotFound(format!("Conversación {id} no encontrada."))
}

/// Crea la conversación y sus mensajes iniciales en una sola transacción.
pub async fn create(pool: &SqlitePool, input: NewConversation) -> ServiceResult<ConversationDetail> {
    let mode: Mode = input.mode.parse()?;
    let discipline: Discipline = input.discipline.parse()?;
    let mut messages = Vec::with_capacity(input.messages.len());
    for m in &input.messages {
        let role: Role = m.role.parse()?;
        validate_content(&m.content)?;
        messages.push((role, m.content.as_str()));
    }

    let owner_id = normalize_owner(input.owner_id);
    let title = derive_title(&input.messages);
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    if let Some(project_id) = input.project_id {
        let exists = sqlx::query("SELECT 1 FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(ServiceError::NotFound(format!(
                "Proyecto {project_id} no encontrado."
            )));
        }
    }

    let id = sqlx::query(
        r"
        INSERT INTO conversations (owner_id, project_id, title, mode, discipline, is_anonymous, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
        ",
    )
    .bind(owner_id.as_deref())
    .bind(input.project_id)
    .bind(&title)
    .bind(mode.as_str())
    .bind(discipline.as_str())
    .bind(owner_id.is_none())
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for (role, content) in &messages {
        insert_message(&mut tx, id, *role, content, now).await?;
    }

    tx.commit().await?;
    info!(
        "Conversación {id} creada ({mode}/{discipline}) con {} mensajes.",
        messages.len()
    );

    get(pool, id).await
}

/// Sólo la fila de la conversación, sin mensajes ni ficheros.
pub async fn find(pool: &SqlitePool, id: i64) -> ServiceResult<Conversation> {
    let row = sqlx::query(
        r"
        SELECT id, owner_id, project_id, title, mode, discipline, is_anonymous, created_at, updated_at
        FROM conversations
        WHERE id = $1
        ",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| not_found(id))?;
    Ok(conversation_from_row(&row)?)
}

/// Conversación con sus mensajes en orden de creación y sus ficheros.
pub async fn get(pool: &SqlitePool, id: i64) -> ServiceResult<ConversationDetail> {
    let conversation = find(pool, id).await?;

    let messages = sqlx::query(
        r"
        SELECT id, conversation_id, role, content, created_at
        FROM messages
        WHERE conversation_id = $1
        ORDER BY created_at ASC, id ASC
        ",
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(message_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    let files = sqlx::query(
        r"
        SELECT id, conversation_id, filename, file_type, file_path, file_size, uploaded_at
        FROM conversation_files
        WHERE conversation_id = $1
        ORDER BY uploaded_at ASC, id ASC
        ",
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(file_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    Ok(ConversationDetail {
        conversation,
        messages,
        files,
    })
}

/// Listado paginado, las más recientes primero. Con `owner_id` sólo devuelve
/// las de ese propietario (nunca anónimas ni ajenas).
pub async fn list(pool: &SqlitePool, query: ListConversations) -> ServiceResult<Vec<ConversationSummary>> {
    let owner_id = normalize_owner(query.owner_id);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let rows = sqlx::query(
        r"
        SELECT c.id, c.owner_id, c.project_id, c.title, c.mode, c.discipline, c.is_anonymous,
               c.created_at, c.updated_at,
               (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS message_count
        FROM conversations c
        WHERE ($1 IS NULL OR c.owner_id = $1)
        ORDER BY c.updated_at DESC, c.id DESC
        LIMIT $2 OFFSET $3
        ",
    )
    .bind(owner_id.as_deref())
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let summaries = rows
        .iter()
        .map(|r| -> Result<ConversationSummary, sqlx::Error> {
            Ok(ConversationSummary {
                conversation: conversation_from_row(r)?,
                message_count: r.try_get("message_count")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(summaries)
}

/// Añade un mensaje y actualiza `updated_at` de la conversación.
/// Si la conversación no existe no se escribe nada.
pub async fn append_message(
    pool: &SqlitePool,
    conversation_id: i64,
    role: &str,
    content: &str,
) -> ServiceResult<Message> {
    let role: Role = role.parse()?;
    validate_content(content)?;

    let mut tx = pool.begin().await?;
    let message = append_in_tx(&mut tx, conversation_id, role, content, Utc::now()).await?;
    tx.commit().await?;

    Ok(message)
}

/// Guarda el intercambio de un chat (pregunta y respuesta) en una transacción.
pub async fn append_exchange(
    pool: &SqlitePool,
    conversation_id: i64,
    user_content: &str,
    assistant_content: &str,
) -> ServiceResult<(Message, Message)> {
    let mut tx = pool.begin().await?;
    let user = append_in_tx(&mut tx, conversation_id, Role::User, user_content, Utc::now()).await?;
    let assistant = append_in_tx(
        &mut tx,
        conversation_id,
        Role::Assistant,
        assistant_content,
        Utc::now(),
    )
    .await?;
    tx.commit().await?;

    Ok((user, assistant))
}

/// Falla con `NotFound` si la conversación no existe.
pub async fn ensure_exists(pool: &SqlitePool, id: i64) -> ServiceResult<()> {
    sqlx::query("SELECT 1 FROM conversations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(|_| ())
        .ok_or_else(|| not_found(id))
}

/// Borra la conversación; mensajes y ficheros caen en cascada.
pub async fn delete(pool: &SqlitePool, id: i64) -> ServiceResult<()> {
    let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(not_found(id));
    }
    info!("Conversación {id} eliminada.");
    Ok(())
}

/// Registra los metadatos de un fichero subido a la conversación.
pub async fn attach_file(
    pool: &SqlitePool,
    conversation_id: i64,
    input: NewConversationFile,
) -> ServiceResult<ConversationFile> {
    let filename = input.filename.trim();
    let file_path = input.file_path.trim();
    if filename.is_empty() || file_path.is_empty() {
        return Err(ServiceError::Validation(
            "El nombre y la ruta del fichero son obligatorios.".to_string(),
        ));
    }
    if input.file_size < 0 {
        return Err(ServiceError::Validation(
            "El tamaño del fichero no puede ser negativo.".to_string(),
        ));
    }
    let file_type = match input.file_type.as_deref() {
        Some(kind) => kind.parse()?,
        None => FileKind::from_filename(filename),
    };

    ensure_exists(pool, conversation_id).await?;

    let now = Utc::now();
    let id = sqlx::query(
        r"
        INSERT INTO conversation_files (conversation_id, filename, file_type, file_path, file_size, uploaded_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(conversation_id)
    .bind(filename)
    .bind(file_type.as_str())
    .bind(file_path)
    .bind(input.file_size)
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    info!("Fichero '{filename}' ({file_type}) adjuntado a la conversación {conversation_id}.");

    Ok(ConversationFile {
        id,
        conversation_id,
        filename: filename.to_string(),
        file_type,
        file_path: file_path.to_string(),
        file_size: input.file_size,
        uploaded_at: now,
    })
}

// --- Helpers de escritura ---

async fn append_in_tx(
    conn: &mut SqliteConnection,
    conversation_id: i64,
    role: Role,
    content: &str,
    now: DateTime<Utc>,
) -> ServiceResult<Message> {
    let touched = sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
        .bind(now)
        .bind(conversation_id)
        .execute(&mut *conn)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(not_found(conversation_id));
    }

    Ok(insert_message(conn, conversation_id, role, content, now).await?)
}

async fn insert_message(
    conn: &mut SqliteConnection,
    conversation_id: i64,
    role: Role,
    content: &str,
    now: DateTime<Utc>,
) -> Result<Message, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO messages (conversation_id, role, content, created_at) VALUES ($1, $2, $3, $4)",
    )
    .bind(conversation_id)
    .bind(role.as_str())
    .bind(content)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(Message {
        id,
        conversation_id,
        role,
        content: content.to_string(),
        created_at: now,
    })
}

// --- Mapeo de filas ---

fn conversation_from_row(r: &SqliteRow) -> Result<Conversation, sqlx::Error> {
    Ok(Conversation {
        id: r.try_get("id")?,
        owner_id: r.try_get("owner_id")?,
        project_id: r.try_get("project_id")?,
        title: r.try_get("title")?,
        mode: decode_tag(r, "mode")?,
        discipline: decode_tag(r, "discipline")?,
        is_anonymous: r.try_get("is_anonymous")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn message_from_row(r: &SqliteRow) -> Result<Message, sqlx::Error> {
    Ok(Message {
        id: r.try_get("id")?,
        conversation_id: r.try_get("conversation_id")?,
        role: decode_tag(r, "role")?,
        content: r.try_get("content")?,
        created_at: r.try_get("created_at")?,
    })
}

fn file_from_row(r: &SqliteRow) -> Result<ConversationFile, sqlx::Error> {
    Ok(ConversationFile {
        id: r.try_get("id")?,
        conversation_id: r.try_get("conversation_id")?,
        filename: r.try_get("filename")?,
        file_type: decode_tag(r, "file_type")?,
        file_path: r.try_get("file_path")?,
        file_size: r.try_get("file_size")?,
        uploaded_at: r.try_get("uploaded_at")?,
    })
}
