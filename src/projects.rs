//! Servicio de proyectos. El número de conversaciones se calcula al leer.

use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::info;

use crate::{
    db::decode_tag,
    errors::{ServiceError, ServiceResult},
    models::{Discipline, NewProject, Project, ProjectUpdate},
};

const PROJECT_COLUMNS: &str = r"
    p.id, p.owner_id, p.name, p.description, p.discipline, p.created_at, p.updated_at,
    (SELECT COUNT(*) FROM conversations c WHERE c.project_id = p.id) AS conversation_count
";

fn not_found(id: i64) -> ServiceError {
    ServiceError::NotFound(format!("Proyecto {id} no encontrado."))
}

fn required(field: &str, value: &str) -> ServiceResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ServiceError::Validation(format!("El campo '{field}' es obligatorio.")));
    }
    Ok(value.to_string())
}

pub async fn create(pool: &SqlitePool, input: NewProject) -> ServiceResult<Project> {
    let owner_id = required("owner_id", &input.owner_id)?;
    let name = required("name", &input.name)?;
    let discipline = match input.discipline.as_deref() {
        Some(tag) => tag.parse()?,
        None => Discipline::All,
    };
    let now = Utc::now();

    let id = sqlx::query(
        r"
        INSERT INTO projects (owner_id, name, description, discipline, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $5)
        ",
    )
    .bind(&owner_id)
    .bind(&name)
    .bind(input.description.as_deref())
    .bind(discipline.as_str())
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    info!("Proyecto {id} ('{name}') creado para {owner_id}.");

    Ok(Project {
        id,
        owner_id,
        name,
        description: input.description,
        discipline,
        conversation_count: 0,
        created_at: now,
        updated_at: now,
    })
}

pub async fn get(pool: &SqlitePool, id: i64) -> ServiceResult<Project> {
    let row = sqlx::query(&format!("SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| not_found(id))?;

    Ok(project_from_row(&row)?)
}

/// Proyectos del propietario, los actualizados más recientemente primero.
pub async fn list(pool: &SqlitePool, owner_id: &str) -> ServiceResult<Vec<Project>> {
    let rows = sqlx::query(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.owner_id = $1 ORDER BY p.updated_at DESC, p.id DESC"
    ))
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    let projects = rows
        .iter()
        .map(project_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(projects)
}

/// Actualización parcial: sólo se tocan los campos presentes.
pub async fn update(pool: &SqlitePool, id: i64, changes: ProjectUpdate) -> ServiceResult<Project> {
    let name = changes
        .name
        .as_deref()
        .map(|n| required("name", n))
        .transpose()?;

    let result = sqlx::query(
        r"
        UPDATE projects
        SET name = COALESCE($1, name),
            description = COALESCE($2, description),
            updated_at = $3
        WHERE id = $4
        ",
    )
    .bind(name.as_deref())
    .bind(changes.description.as_deref())
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(not_found(id));
    }
    info!("Proyecto {id} actualizado.");
    get(pool, id).await
}

/// Borra el proyecto y, en cascada, sus conversaciones con sus mensajes y ficheros.
pub async fn delete(pool: &SqlitePool, id: i64) -> ServiceResult<()> {
    let result = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(not_found(id));
    }
    info!("Proyecto {id} eliminado.");
    Ok(())
}

fn project_from_row(r: &SqliteRow) -> Result<Project, sqlx::Error> {
    Ok(Project {
        id: r.try_get("id")?,
        owner_id: r.try_get("owner_id")?,
        name: r.try_get("name")?,
        description: r.try_get("description")?,
        discipline: decode_tag(r, "discipline")?,
        conversation_count: r.try_get("conversation_count")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}
