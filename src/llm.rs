//! Adaptador de completions sobre distintos proveedores de LLM.
//! De momento se implementa OpenAI (API REST de chat completions);
//! Gemini/Ollama quedan preparados para el futuro.
//!
//! Contrato del adaptador: monta la secuencia ordenada de mensajes
//! (sistema + historial acotado + mensaje actual), la envía de forma
//! síncrona desde el punto de vista del llamante y convierte cualquier
//! fallo en un `CompletionError`; por aquí nunca escapa un panic ni un
//! error crudo del cliente HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{AppConfig, LlmProvider};
use crate::models::ChatMessage;

/// Número máximo de mensajes previos del historial que se reenvían al
/// proveedor en cada petición.
pub const HISTORY_WINDOW: usize = 3;

/// Fallos del adaptador, clasificados para que el coordinador decida cómo
/// degradar. Sin reintentos: un fallo es un fallo.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("No hay clave de API configurada para esta sesión")]
    MissingApiKey,
    #[error("Error de red al contactar con el proveedor: {0}")]
    Network(String),
    #[error("Tiempo de espera agotado ({0}s) esperando al proveedor")]
    Timeout(u64),
    #[error("Fallo de autenticación con el proveedor ({status}): {message}")]
    Auth { status: u16, message: String },
    #[error("El proveedor devolvió un error ({status}): {message}")]
    Provider { status: u16, message: String },
    #[error("Respuesta del proveedor malformada: {0}")]
    Malformed(String),
}

/// Petición ya montada: secuencia ordenada de mensajes más los parámetros
/// de muestreo. Se serializa tal cual al formato de chat del proveedor.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

// --- Estructuras de respuesta del proveedor (formato OpenAI) ---

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Backend que ejecuta una petición ya montada contra un proveedor concreto.
/// El seam existe para poder sustituir el proveedor real por uno de prueba.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn execute(
        &self,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<String, CompletionError>;
}

/// Backend OpenAI: llamada directa a la API REST de chat completions,
/// con tiempo de espera acotado.
pub struct OpenAiBackend {
    http: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

impl OpenAiBackend {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| anyhow!("No se pudo construir el cliente HTTP: {e}"))?;

        Ok(Self {
            http,
            base_url: cfg.openai_base_url.clone(),
            timeout_secs: cfg.request_timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn execute(
        &self,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<String, CompletionError> {
        let response = self
            .http
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CompletionError::Timeout(self.timeout_secs)
                } else {
                    CompletionError::Network(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "(cuerpo de error ilegible)".to_string());
            // El cuerpo de error de OpenAI trae un mensaje legible; si no
            // parsea, se devuelve el cuerpo bruto.
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|wrapper| wrapper.error.message)
                .unwrap_or(body);

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    CompletionError::Auth { status: status.as_u16(), message }
                }
                _ => CompletionError::Provider { status: status.as_u16(), message },
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| CompletionError::Malformed(err.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                CompletionError::Malformed("el proveedor no devolvió contenido".to_string())
            })
    }
}

/// Gestor de completions: guarda el modelo y los parámetros de muestreo por
/// defecto, monta cada petición y delega la ejecución en el backend activo.
#[derive(Clone)]
pub struct LlmManager {
    backend: Arc<dyn CompletionBackend>,
    pub chat_model: String,
    pub max_tokens_chat: u32,
    pub max_tokens_analysis: u32,
    pub temperature: f32,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let backend: Arc<dyn CompletionBackend> = match cfg.llm_provider {
            LlmProvider::OpenAI => Arc::new(OpenAiBackend::from_config(cfg)?),
            ref other => {
                return Err(anyhow!("Proveedor LLM {:?} aún no implementado para completions", other))
            }
        };

        Ok(Self {
            backend,
            chat_model: cfg.llm_chat_model.clone(),
            max_tokens_chat: cfg.max_tokens_chat,
            max_tokens_analysis: cfg.max_tokens_analysis,
            temperature: cfg.temperature,
        })
    }

    /// Construye el manager sobre un backend arbitrario (pruebas).
    pub fn with_backend(backend: Arc<dyn CompletionBackend>, chat_model: &str) -> Self {
        Self {
            backend,
            chat_model: chat_model.to_string(),
            max_tokens_chat: 500,
            max_tokens_analysis: 400,
            temperature: 0.7,
        }
    }

    /// Monta la secuencia de mensajes y la envía al proveedor. Bloqueante
    /// desde el punto de vista del llamante; la capa de presentación es la
    /// responsable de señalar el estado pendiente.
    ///
    /// En éxito devuelve el texto del asistente sin modificar; cualquier
    /// fallo llega como `CompletionError`.
    pub async fn complete(
        &self,
        api_key: Option<&str>,
        system_prompt: &str,
        user_prompt: &str,
        context: Option<&str>,
        history: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, CompletionError> {
        let key = api_key.ok_or(CompletionError::MissingApiKey)?;
        let request = build_request(
            &self.chat_model,
            system_prompt,
            user_prompt,
            context,
            history,
            max_tokens,
            temperature,
        );
        self.backend.execute(key, &request).await
    }
}

/// Construye la secuencia ordenada de mensajes: un único mensaje de sistema
/// (instrucciones, con el contexto opcional de la base de conocimiento
/// añadido al final), como mucho los `HISTORY_WINDOW` mensajes previos del
/// historial, y por último el mensaje actual del usuario.
fn build_request(
    model: &str,
    system_prompt: &str,
    user_prompt: &str,
    context: Option<&str>,
    history: &[ChatMessage],
    max_tokens: u32,
    temperature: f32,
) -> CompletionRequest {
    let system = match context {
        Some(ctx) if !ctx.is_empty() => format!("{system_prompt}\n\n{ctx}"),
        _ => system_prompt.to_string(),
    };

    let mut messages = vec![PromptMessage { role: "system".to_string(), content: system }];

    let start = history.len().saturating_sub(HISTORY_WINDOW);
    for msg in &history[start..] {
        messages.push(PromptMessage {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        });
    }

    messages.push(PromptMessage { role: "user".to_string(), content: user_prompt.to_string() });

    CompletionRequest { model: model.to_string(), messages, max_tokens, temperature }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn la_secuencia_va_de_sistema_a_usuario() {
        let historial = vec![
            ChatMessage::user("primera pregunta"),
            ChatMessage::assistant("primera respuesta"),
        ];

        let req = build_request(
            "modelo-x",
            "Eres un coach de trading.",
            "¿Qué es un stop loss?",
            Some("Conocimiento de referencia: Notas: riesgo 1-2%"),
            &historial,
            500,
            0.7,
        );

        assert_eq!(req.messages.len(), 4);
        assert_eq!(req.messages[0].role, "system");
        assert!(req.messages[0].content.starts_with("Eres un coach de trading."));
        assert!(req.messages[0].content.contains("Conocimiento de referencia"));
        assert_eq!(req.messages[1].role, "user");
        assert_eq!(req.messages[2].role, "assistant");
        assert_eq!(req.messages[3].role, "user");
        assert_eq!(req.messages[3].content, "¿Qué es un stop loss?");
    }

    #[test]
    fn el_historial_se_acota_a_la_ventana() {
        let historial: Vec<ChatMessage> =
            (0..10).map(|i| ChatMessage::user(format!("mensaje {i}"))).collect();

        let req = build_request("modelo-x", "sistema", "actual", None, &historial, 500, 0.7);

        // sistema + HISTORY_WINDOW previos + usuario actual
        assert_eq!(req.messages.len(), 1 + HISTORY_WINDOW + 1);
        // Se conservan los más recientes del historial.
        assert_eq!(req.messages[1].content, "mensaje 7");
        assert_eq!(req.messages[HISTORY_WINDOW].content, "mensaje 9");
    }

    #[test]
    fn sin_contexto_el_sistema_queda_limpio() {
        let req = build_request("modelo-x", "sistema", "hola", None, &[], 400, 0.7);

        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].content, "sistema");
        assert_eq!(req.max_tokens, 400);
    }

    #[test]
    fn sin_clave_el_adaptador_falla_antes_de_llamar_al_backend() {
        struct NuncaLlamado;

        #[async_trait]
        impl CompletionBackend for NuncaLlamado {
            async fn execute(
                &self,
                _api_key: &str,
                _request: &CompletionRequest,
            ) -> Result<String, CompletionError> {
                panic!("el backend no debe ejecutarse sin clave de API");
            }
        }

        let llm = LlmManager::with_backend(Arc::new(NuncaLlamado), "modelo-x");
        let resultado = tokio_test::block_on(llm.complete(
            None,
            "sistema",
            "hola",
            None,
            &[],
            500,
            0.7,
        ));

        assert!(matches!(resultado, Err(CompletionError::MissingApiKey)));
    }
}
