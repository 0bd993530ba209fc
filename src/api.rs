use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    models::{AnalysisKind, ChatMessage, ContentSource},
    session::{ActionError, AnalysisOutcome, Session},
};

/// Caracteres de texto que se muestran como vista previa de cada entrada
/// de conocimiento en los listados.
const PREVIEW_CHARS: usize = 200;

/// Número de análisis que se devuelven por defecto en el listado.
const DEFAULT_RECENT_ANALYSES: usize = 5;

/// Preguntas de ejemplo para orientar al usuario en el chat.
const EXAMPLE_QUESTIONS: &[&str] = &[
    "¿Qué es la regla del 1% de riesgo?",
    "¿Cómo identificar soportes y resistencias?",
    "Explica las estrategias de seguimiento de tendencia",
    "¿Qué es la psicología del trading?",
    "¿Cómo crear un plan de trading?",
];

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct CreateSessionPayload {
    api_key: Option<String>,
}

#[derive(Deserialize)]
pub struct SetApiKeyPayload {
    session_id: Uuid,
    api_key: String,
}

#[derive(Deserialize)]
pub struct LearnPayload {
    session_id: Uuid,
    title: String,
    text: String,
    #[serde(default)]
    source: ContentSource,
}

#[derive(Deserialize)]
pub struct LearnTemplatePayload {
    session_id: Uuid,
    name: String,
}

#[derive(Deserialize)]
pub struct SessionQuery {
    session_id: Uuid,
}

#[derive(Deserialize)]
pub struct AnalysesQuery {
    session_id: Uuid,
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct AnalysisViewQuery {
    session_id: Uuid,
    index: usize,
}

#[derive(Deserialize)]
pub struct AnalyzePayload {
    session_id: Uuid,
    /// Descripción libre del gráfico o escenario.
    subject: Option<String>,
    /// Nombre del fichero/activo subido, si no hay descripción.
    asset_name: Option<String>,
    kind: AnalysisKind,
    #[serde(default)]
    focus_areas: Vec<String>,
    risk_label: Option<String>,
    confidence: Option<f32>,
}

#[derive(Deserialize)]
pub struct RemoveAnalysisPayload {
    session_id: Uuid,
    index: usize,
}

#[derive(Deserialize)]
pub struct ChatPayload {
    session_id: Uuid,
    message: String,
}

#[derive(Deserialize)]
pub struct ClearChatPayload {
    session_id: Uuid,
}

#[derive(Serialize)]
pub struct KnowledgePreview {
    title: String,
    source: ContentSource,
    created_at: DateTime<Utc>,
    preview: String,
}

#[derive(Serialize)]
pub struct ChatTurnResponse {
    reply: String,
    history: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    message: String,
    active_sessions: usize,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/session", post(create_session_handler))
        .route("/api/session/key", post(set_api_key_handler))
        .route("/api/learn", post(learn_handler))
        .route("/api/learn/template", post(learn_template_handler))
        .route("/api/knowledge", get(knowledge_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/analyses", get(analyses_handler))
        .route("/api/analyses/view", get(view_analysis_handler))
        .route("/api/analyses/remove", post(remove_analysis_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/clear", post(clear_chat_handler))
        .route("/api/chat/examples", get(chat_examples_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Utilidades de los handlers ---

type ApiError = (StatusCode, Json<serde_json::Value>);

/// Busca la sesión o responde 404.
fn lookup_session(state: &AppState, id: &Uuid) -> Result<Arc<AsyncMutex<Session>>, ApiError> {
    state.sessions.get(id).ok_or((
        StatusCode::NOT_FOUND,
        Json(json!({"error": "No existe la sesión indicada."})),
    ))
}

/// Convierte un error de acción en la respuesta HTTP correspondiente.
/// Los fallos del proveedor no pasan por aquí: degradan dentro de la acción.
fn action_error(err: ActionError) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": err.to_string()})))
}

fn preview_of(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

// --- Handlers ---

#[axum::debug_handler]
async fn create_session_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionPayload>,
) -> Json<serde_json::Value> {
    let id = state.sessions.create(payload.api_key);
    info!("Sesión creada: {id}");
    Json(json!({ "session_id": id }))
}

#[axum::debug_handler]
async fn set_api_key_handler(
    State(state): State<AppState>,
    Json(payload): Json<SetApiKeyPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.api_key.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "La clave de API no puede estar vacía."})),
        ));
    }

    let session = lookup_session(&state, &payload.session_id)?;
    session.lock().await.set_api_key(payload.api_key);
    Ok((StatusCode::OK, Json(json!({ "message": "Clave de API guardada para esta sesión." }))))
}

#[axum::debug_handler]
async fn learn_handler(
    State(state): State<AppState>,
    Json(payload): Json<LearnPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = lookup_session(&state, &payload.session_id)?;
    let mut session = session.lock().await;

    session
        .learn_content(&payload.title, &payload.text, payload.source)
        .map_err(action_error)?;

    Ok(Json(json!({
        "message": format!("Contenido '{}' guardado en la base de conocimiento.", payload.title),
        "entries": session.knowledge.len(),
    })))
}

#[axum::debug_handler]
async fn learn_template_handler(
    State(state): State<AppState>,
    Json(payload): Json<LearnTemplatePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = lookup_session(&state, &payload.session_id)?;
    let mut session = session.lock().await;

    let title = session.learn_template(&payload.name).map_err(action_error)?;

    Ok(Json(json!({
        "message": format!("Plantilla '{title}' cargada en la base de conocimiento."),
        "entries": session.knowledge.len(),
    })))
}

#[axum::debug_handler]
async fn knowledge_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = lookup_session(&state, &query.session_id)?;
    let session = session.lock().await;

    let entries: Vec<KnowledgePreview> = session
        .knowledge
        .list_all()
        .map(|(title, entry)| KnowledgePreview {
            title: title.clone(),
            source: entry.source,
            created_at: entry.created_at,
            preview: preview_of(&entry.text),
        })
        .collect();

    Ok(Json(json!({ "count": entries.len(), "entries": entries })))
}

#[axum::debug_handler]
async fn analyze_handler(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzePayload>,
) -> Result<Json<AnalysisOutcome>, ApiError> {
    let session = lookup_session(&state, &payload.session_id)?;
    let mut session = session.lock().await;

    // Como en la interfaz original: descripción libre, o la referencia al
    // activo subido si no hay descripción.
    let subject = match (&payload.subject, &payload.asset_name) {
        (Some(desc), _) if !desc.trim().is_empty() => desc.clone(),
        (_, Some(name)) if !name.trim().is_empty() => format!("Imagen de gráfico: {name}"),
        _ => String::new(),
    };

    let outcome = session
        .analyze(
            &state.llm_manager,
            state.config.openai_api_key.as_deref(),
            &subject,
            payload.kind,
            &payload.focus_areas,
            payload.risk_label,
            payload.confidence,
        )
        .await
        .map_err(action_error)?;

    Ok(Json(outcome))
}

#[axum::debug_handler]
async fn analyses_handler(
    State(state): State<AppState>,
    Query(query): Query<AnalysesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = lookup_session(&state, &query.session_id)?;
    let session = session.lock().await;

    let limit = query.limit.unwrap_or(DEFAULT_RECENT_ANALYSES);
    let recent = session.analyses.recent(limit);

    Ok(Json(json!({ "total": session.analyses.len(), "analyses": recent })))
}

#[axum::debug_handler]
async fn view_analysis_handler(
    State(state): State<AppState>,
    Query(query): Query<AnalysisViewQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = lookup_session(&state, &query.session_id)?;
    let session = session.lock().await;

    match session.analyses.get(query.index) {
        Some(record) => Ok(Json(json!({ "analysis": record }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No existe un análisis en esa posición."})),
        )),
    }
}

#[axum::debug_handler]
async fn remove_analysis_handler(
    State(state): State<AppState>,
    Json(payload): Json<RemoveAnalysisPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = lookup_session(&state, &payload.session_id)?;
    let mut session = session.lock().await;

    session.remove_analysis(payload.index).map_err(action_error)?;

    Ok(Json(json!({
        "message": "Análisis eliminado.",
        "remaining": session.analyses.len(),
    })))
}

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatTurnResponse>, ApiError> {
    let session = lookup_session(&state, &payload.session_id)?;
    let mut session = session.lock().await;

    let reply = session
        .chat_turn(
            &state.llm_manager,
            state.config.openai_api_key.as_deref(),
            &payload.message,
        )
        .await
        .map_err(action_error)?;

    Ok(Json(ChatTurnResponse { reply, history: session.chat.all().to_vec() }))
}

#[axum::debug_handler]
async fn clear_chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ClearChatPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let session = lookup_session(&state, &payload.session_id)?;
    session.lock().await.clear_chat();
    Ok((StatusCode::OK, Json(json!({ "message": "Conversación vaciada." }))))
}

#[axum::debug_handler]
async fn chat_examples_handler() -> Json<serde_json::Value> {
    Json(json!({ "examples": EXAMPLE_QUESTIONS }))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "Servidor listo.".to_string(),
        active_sessions: state.sessions.active_count(),
    })
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, LlmProvider};
    use crate::llm::{CompletionBackend, CompletionError, CompletionRequest, LlmManager};
    use crate::session::SessionRegistry;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Backend de prueba que devuelve el último mensaje con un prefijo.
    struct Eco;

    #[async_trait]
    impl CompletionBackend for Eco {
        async fn execute(
            &self,
            _api_key: &str,
            request: &CompletionRequest,
        ) -> Result<String, CompletionError> {
            let ultimo = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(format!("eco: {ultimo}"))
        }
    }

    fn estado_de_prueba() -> AppState {
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        AppState {
            config: AppConfig {
                server_addr: "127.0.0.1:0".to_string(),
                llm_provider: LlmProvider::OpenAI,
                llm_chat_model: "modelo-de-prueba".to_string(),
                openai_api_key: Some("sk-prueba".to_string()),
                openai_base_url: "http://127.0.0.1:0".to_string(),
                max_tokens_chat: 500,
                max_tokens_analysis: 400,
                temperature: 0.7,
                request_timeout_secs: 30,
            },
            llm_manager: LlmManager::with_backend(Arc::new(Eco), "modelo-de-prueba"),
            sessions: Arc::new(SessionRegistry::new()),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
        }
    }

    #[tokio::test]
    async fn una_sesion_desconocida_devuelve_404() {
        let state = estado_de_prueba();

        let resultado = learn_handler(
            State(state),
            Json(LearnPayload {
                session_id: Uuid::new_v4(),
                title: "Notas".to_string(),
                text: "contenido".to_string(),
                source: ContentSource::Pasted,
            }),
        )
        .await;

        let (status, _) = resultado.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn un_titulo_vacio_devuelve_400() {
        let state = estado_de_prueba();
        let session_id = state.sessions.create(None);

        let resultado = learn_handler(
            State(state),
            Json(LearnPayload {
                session_id,
                title: "   ".to_string(),
                text: "contenido".to_string(),
                source: ContentSource::Pasted,
            }),
        )
        .await;

        let (status, _) = resultado.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn aprender_y_listar_por_http() {
        let state = estado_de_prueba();
        let session_id = state.sessions.create(None);

        learn_handler(
            State(state.clone()),
            Json(LearnPayload {
                session_id,
                title: "Risk_Rules".to_string(),
                text: "Risk only 1-2% per trade".to_string(),
                source: ContentSource::Pasted,
            }),
        )
        .await
        .unwrap();

        let Json(listado) =
            knowledge_handler(State(state), Query(SessionQuery { session_id })).await.unwrap();

        assert_eq!(listado["count"], 1);
        assert_eq!(listado["entries"][0]["title"], "Risk_Rules");
    }

    #[tokio::test]
    async fn un_turno_de_chat_por_http_actualiza_el_historial() {
        let state = estado_de_prueba();
        let session_id = state.sessions.create(None);

        let Json(respuesta) = chat_handler(
            State(state),
            Json(ChatPayload { session_id, message: "¿Qué es un soporte?".to_string() }),
        )
        .await
        .unwrap();

        assert_eq!(respuesta.reply, "eco: ¿Qué es un soporte?");
        assert_eq!(respuesta.history.len(), 2);
    }
}
