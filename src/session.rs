//! Coordinador de sesión: enlaza la base de conocimiento, el registro de
//! análisis y el historial de chat de una sesión con el adaptador de
//! completions, una acción cada vez.
//!
//! Política de degradación: ninguna acción se pierde por un fallo del
//! proveedor. Un análisis fallido se registra sin texto de IA y un turno de
//! chat fallido registra el texto de error como respuesta del asistente.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;
use uuid::Uuid;

use crate::analysis::{AnalysisLog, AnalysisLogError};
use crate::chat::ChatHistory;
use crate::knowledge::{self, KnowledgeStore};
use crate::llm::LlmManager;
use crate::models::{AnalysisKind, AnalysisRecord, ContentSource};

/// Prompt de sistema para el chat.
const CHAT_SYSTEM_PROMPT: &str = "Eres un coach profesional de trading. Ofreces \
formación sobre psicología del trading, análisis técnico y gestión del riesgo. \
Recuerda siempre que tus respuestas son material educativo, no asesoramiento financiero.";

/// Prompt de sistema para los análisis de gráficos o escenarios.
const ANALYSIS_SYSTEM_PROMPT: &str = "Eres un analista de trading profesional que \
ofrece observaciones con fines educativos.";

/// Caracteres de cada entrada de conocimiento que se incluyen en el
/// contexto de un prompt.
const CONTEXT_ENTRY_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum ActionError {
    /// Entrada del usuario inválida; se recupera pidiendo que la corrija.
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Log(#[from] AnalysisLogError),
}

/// Desenlace de una acción de análisis: el registro añadido, su posición y,
/// si el proveedor falló, el texto de error para que la interfaz lo muestre.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub index: usize,
    pub record: AnalysisRecord,
    pub error: Option<String>,
}

/// Estado de una sesión interactiva. Vive solo en memoria y muere con la
/// sesión; nunca se comparte entre sesiones.
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    api_key: Option<String>,
    pub knowledge: KnowledgeStore,
    pub analyses: AnalysisLog,
    pub chat: ChatHistory,
}

impl Session {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            api_key,
            knowledge: KnowledgeStore::new(),
            analyses: AnalysisLog::new(),
            chat: ChatHistory::new(),
        }
    }

    /// Fija (o reemplaza) la credencial de la sesión. Solo se mantiene en
    /// memoria; nunca se persiste.
    pub fn set_api_key(&mut self, key: String) {
        self.api_key = Some(key);
    }

    /// La clave efectiva: la de la sesión, o la del entorno si no hay una.
    fn resolve_key<'a>(&'a self, ambient: Option<&'a str>) -> Option<&'a str> {
        self.api_key.as_deref().or(ambient)
    }

    /// Acción LearnContent: valida la entrada y la guarda en la base de
    /// conocimiento (truncada y con fecha, ver `KnowledgeStore::put`).
    pub fn learn_content(
        &mut self,
        title: &str,
        text: &str,
        source: ContentSource,
    ) -> Result<(), ActionError> {
        if title.trim().is_empty() {
            return Err(ActionError::Validation("El título no puede estar vacío".to_string()));
        }
        if text.trim().is_empty() {
            return Err(ActionError::Validation("El contenido no puede estar vacío".to_string()));
        }
        self.knowledge.put(title, text, source);
        Ok(())
    }

    /// Acción LearnContent desde una plantilla rápida predefinida.
    pub fn learn_template(&mut self, name: &str) -> Result<&'static str, ActionError> {
        let (title, text) = knowledge::templates()
            .iter()
            .find(|(t, _)| *t == name)
            .ok_or_else(|| ActionError::Validation(format!("No existe la plantilla '{name}'")))?;
        self.knowledge.put(title, text, ContentSource::Pasted);
        Ok(title)
    }

    /// Acción AnalyzeChart / AnalyzeText: monta el prompt a partir del
    /// asunto y del contexto de conocimiento, llama al adaptador y registra
    /// el desenlace. El registro se añade también cuando el proveedor falla.
    pub async fn analyze(
        &mut self,
        llm: &LlmManager,
        ambient_key: Option<&str>,
        subject: &str,
        kind: AnalysisKind,
        focus_areas: &[String],
        risk_label: Option<String>,
        confidence: Option<f32>,
    ) -> Result<AnalysisOutcome, ActionError> {
        if subject.trim().is_empty() {
            return Err(ActionError::Validation(
                "Describe el gráfico o indica el nombre del activo".to_string(),
            ));
        }

        let context = self.knowledge.build_context_summary(CONTEXT_ENTRY_CHARS);
        let prompt = build_analysis_prompt(subject, kind, focus_areas);

        let result = llm
            .complete(
                self.resolve_key(ambient_key),
                ANALYSIS_SYSTEM_PROMPT,
                &prompt,
                (!context.is_empty()).then_some(context.as_str()),
                &[],
                llm.max_tokens_analysis,
                llm.temperature,
            )
            .await;

        let (ai_text, error) = match result {
            Ok(text) => (Some(text), None),
            Err(err) => {
                warn!("Fallo del proveedor durante un análisis: {err}");
                (None, Some(err.to_string()))
            }
        };

        let record = AnalysisRecord {
            subject_description: subject.to_string(),
            analysis_kind: kind,
            requested_at: Utc::now(),
            ai_text,
            risk_label,
            confidence,
        };
        let index = self.analyses.append(record.clone());

        Ok(AnalysisOutcome { index, record, error })
    }

    /// Acción ChatTurn: registra el mensaje del usuario, consulta al
    /// proveedor con el historial previo y el contexto de conocimiento, y
    /// registra la respuesta. Si el proveedor falla, la respuesta del
    /// asistente es el texto de error formateado; el turno queda registrado
    /// igualmente.
    pub async fn chat_turn(
        &mut self,
        llm: &LlmManager,
        ambient_key: Option<&str>,
        message: &str,
    ) -> Result<String, ActionError> {
        if message.trim().is_empty() {
            return Err(ActionError::Validation("El mensaje no puede estar vacío".to_string()));
        }

        // El historial previo se captura antes de registrar el turno actual:
        // el mensaje en curso viaja aparte, como último de la secuencia.
        let prior = self.chat.all().to_vec();
        self.chat.push_user(message);

        let context = self.knowledge.build_context_summary(CONTEXT_ENTRY_CHARS);

        let reply = match llm
            .complete(
                self.resolve_key(ambient_key),
                CHAT_SYSTEM_PROMPT,
                message,
                (!context.is_empty()).then_some(context.as_str()),
                &prior,
                llm.max_tokens_chat,
                llm.temperature,
            )
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!("Fallo del proveedor durante un turno de chat: {err}");
                format!("Error: {err}")
            }
        };

        self.chat.push_assistant(reply.clone());
        Ok(reply)
    }

    /// Acción ClearChat: vacía la conversación. Idempotente.
    pub fn clear_chat(&mut self) {
        self.chat.clear();
    }

    /// Acción RemoveAnalysis: elimina un análisis por posición.
    pub fn remove_analysis(&mut self, index: usize) -> Result<AnalysisRecord, ActionError> {
        Ok(self.analyses.remove_at(index)?)
    }
}

/// Monta el prompt de usuario de una acción de análisis.
fn build_analysis_prompt(subject: &str, kind: AnalysisKind, focus_areas: &[String]) -> String {
    let mut prompt = format!(
        "Analiza este escenario de trading:\n\n{subject}\n\nOfrece un {} centrado en:\n\
         1. Observaciones clave\n2. Consideraciones de trading\n3. Gestión del riesgo\n\
         4. Conclusiones educativas\n",
        kind.label()
    );
    if !focus_areas.is_empty() {
        prompt.push_str(&format!("\nPresta especial atención a: {}.\n", focus_areas.join(", ")));
    }
    prompt.push_str(
        "\nFormatea la respuesta como puntos claros y accionables. \
         Recuerda: esto es material educativo, no asesoramiento financiero.",
    );
    prompt
}

/// Registro de sesiones activas: una entrada por sesión interactiva.
///
/// El mapa va detrás de un `Mutex` síncrono porque solo se toca para buscar,
/// crear o contar. Cada sesión va detrás de su propio `Mutex` asíncrono, que
/// el llamante mantiene durante toda la acción (incluida la llamada al
/// proveedor), de modo que las acciones de una misma sesión se procesan en
/// orden de llegada sin bloquear al resto de sesiones.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, Arc<AsyncMutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crea una sesión nueva (con credencial opcional) y devuelve su id.
    pub fn create(&self, api_key: Option<String>) -> Uuid {
        let session = Session::new(api_key);
        let id = session.id;
        self.sessions.lock().unwrap().insert(id, Arc::new(AsyncMutex::new(session)));
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<AsyncMutex<Session>>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}
