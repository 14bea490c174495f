//! Modelos de dominio: filas de SQLite (proyectos, conversaciones, mensajes,
//! ficheros) y las etiquetas cerradas que se guardan como columnas TEXT.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Disciplina contable de un proyecto o conversación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    FinancialAccounting,
    CostAccounting,
    ManagementAccounting,
    FinancialManagement,
    All,
}

impl Discipline {
    pub const ALL_TAGS: [Discipline; 5] = [
        Discipline::FinancialAccounting,
        Discipline::CostAccounting,
        Discipline::ManagementAccounting,
        Discipline::FinancialManagement,
        Discipline::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Discipline::FinancialAccounting => "financial_accounting",
            Discipline::CostAccounting => "cost_accounting",
            Discipline::ManagementAccounting => "management_accounting",
            Discipline::FinancialManagement => "financial_management",
            Discipline::All => "all",
        }
    }
}

impl FromStr for Discipline {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Discipline::ALL_TAGS
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| ServiceError::Validation(format!("Disciplina no reconocida: '{s}'")))
    }
}

/// Estilo de interacción: sólo afecta al texto del prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Learning,
    Project,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Learning => "learning",
            Mode::Project => "project",
        }
    }
}

impl FromStr for Mode {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "learning" => Ok(Mode::Learning),
            "project" => Ok(Mode::Project),
            other => Err(ServiceError::Validation(format!("Modo no reconocido: '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ServiceError::Validation(format!("Rol no reconocido: '{other}'"))),
        }
    }
}

/// Tipo de fichero adjunto, deducido del MIME del nombre si el cliente no lo indica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Pdf,
    Spreadsheet,
    Csv,
    Image,
    Text,
    Other,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Spreadsheet => "spreadsheet",
            FileKind::Csv => "csv",
            FileKind::Image => "image",
            FileKind::Text => "text",
            FileKind::Other => "other",
        }
    }

    pub fn from_filename(filename: &str) -> Self {
        let Some(mime) = mime_guess::from_path(filename).first() else {
            return FileKind::Other;
        };
        match (mime.type_().as_str(), mime.subtype().as_str()) {
            ("application", "pdf") => FileKind::Pdf,
            ("text", "csv") => FileKind::Csv,
            ("image", _) => FileKind::Image,
            ("application", sub)
                if sub == "vnd.ms-excel"
                    || sub.starts_with("vnd.openxmlformats-officedocument.spreadsheetml")
                    || sub == "vnd.oasis.opendocument.spreadsheet" =>
            {
                FileKind::Spreadsheet
            }
            ("text", _) => FileKind::Text,
            _ => FileKind::Other,
        }
    }
}

impl FromStr for FileKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(FileKind::Pdf),
            "spreadsheet" => Ok(FileKind::Spreadsheet),
            "csv" => Ok(FileKind::Csv),
            "image" => Ok(FileKind::Image),
            "text" => Ok(FileKind::Text),
            "other" => Ok(FileKind::Other),
            other => Err(ServiceError::Validation(format!(
                "Tipo de fichero no reconocido: '{other}'"
            ))),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(Discipline, Mode, Role, FileKind);

// --- Entidades ---

/// Fila de `projects` más el número de conversaciones (calculado al leer).
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub discipline: Discipline,
    pub conversation_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub owner_id: Option<String>,
    pub project_id: Option<i64>,
    pub title: String,
    pub mode: Mode,
    pub discipline: Discipline,
    /// Siempre igual a `owner_id.is_none()`.
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Conversación para listados, con su número de mensajes.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub message_count: i64,
}

/// Conversación completa: mensajes en orden de creación y ficheros adjuntos.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    pub files: Vec<ConversationFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationFile {
    pub id: i64,
    pub conversation_id: i64,
    pub filename: String,
    pub file_type: FileKind,
    pub file_path: String,
    pub file_size: i64,
    pub uploaded_at: DateTime<Utc>,
}

// --- Payloads de entrada de los servicios ---

/// Mensaje sin validar tal y como llega del cliente.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageInput {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewConversation {
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
    pub mode: String,
    pub discipline: String,
    #[serde(default)]
    pub messages: Vec<MessageInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListConversations {
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewConversationFile {
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    #[serde(default)]
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub discipline: Option<String>,
}

/// Actualización parcial: `None` deja el campo como está.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_only_known_values() {
        for d in Discipline::ALL_TAGS {
            assert_eq!(d.as_str().parse::<Discipline>().unwrap(), d);
        }
        assert!(matches!(
            "tax_accounting".parse::<Discipline>(),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!("Learning".parse::<Mode>(), Err(ServiceError::Validation(_))));
        assert!(matches!("system".parse::<Role>(), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn file_kind_follows_mime_type() {
        assert_eq!(FileKind::from_filename("balance.pdf"), FileKind::Pdf);
        assert_eq!(FileKind::from_filename("ledger.xlsx"), FileKind::Spreadsheet);
        assert_eq!(FileKind::from_filename("ledger.csv"), FileKind::Csv);
        assert_eq!(FileKind::from_filename("chart.png"), FileKind::Image);
        assert_eq!(FileKind::from_filename("notes.txt"), FileKind::Text);
        assert_eq!(FileKind::from_filename("sin_extension"), FileKind::Other);
    }

    #[test]
    fn enums_serialize_as_snake_case_tags() {
        let json = serde_json::to_string(&Discipline::ManagementAccounting).unwrap();
        assert_eq!(json, "\"management_accounting\"");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }
}
