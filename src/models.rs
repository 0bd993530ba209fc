//! Modelos de dominio (conocimiento aprendido, análisis registrados y chat).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origen de una entrada de conocimiento. Puramente descriptivo:
/// no cambia cómo se almacena ni cómo se usa el contenido.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    Uploaded,
    #[default]
    Pasted,
}

/// Una entrada de la base de conocimiento: un bloque de texto titulado
/// que el usuario aporta para reutilizarlo después en los prompts.
/// La clave (el título) vive en el mapa que la contiene.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeEntry {
    pub text: String,
    pub source: ContentSource,
    pub created_at: DateTime<Utc>,
}

/// Categoría de análisis solicitada por el usuario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Technical,
    EntryExit,
    Risk,
    Full,
}

impl AnalysisKind {
    /// Etiqueta legible que se interpola en el prompt de análisis.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Technical => "análisis técnico",
            Self::EntryExit => "análisis de puntos de entrada y salida",
            Self::Risk => "evaluación de riesgo",
            Self::Full => "análisis completo",
        }
    }
}

/// Un análisis registrado: la petición del usuario y su desenlace.
/// `ai_text` solo está presente si la llamada al proveedor tuvo éxito.
/// `risk_label` y `confidence` son campos de presentación opcionales que
/// aporta el llamante; nunca se calculan aquí.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRecord {
    pub subject_description: String,
    pub analysis_kind: AnalysisKind,
    pub requested_at: DateTime<Utc>,
    pub ai_text: Option<String>,
    pub risk_label: Option<String>,
    pub confidence: Option<f32>,
}

/// Rol de un mensaje dentro de la conversación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    /// Nombre del rol tal y como lo espera la API de chat del proveedor.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Un mensaje del historial de chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}
