//! Carga y gestión de configuración de la aplicación (servidor + LLM).

use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    /// Clave ambiental opcional; cada sesión puede aportar la suya propia,
    /// que tiene prioridad sobre esta.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,

    pub max_tokens_chat: u32,
    pub max_tokens_analysis: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    /// Todas las variables tienen valores por defecto razonables; la clave de
    /// API es opcional porque puede llegar por sesión desde la interfaz.
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3344".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let openai_api_key = env::var("OPENAI_API_KEY").ok();
        let openai_base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());

        Ok(Self {
            server_addr,
            llm_provider,
            llm_chat_model,
            openai_api_key,
            openai_base_url,
            max_tokens_chat: env_parse("LLM_MAX_TOKENS_CHAT", 500)?,
            max_tokens_analysis: env_parse("LLM_MAX_TOKENS_ANALYSIS", 400)?,
            temperature: env_parse("LLM_TEMPERATURE", 0.7)?,
            request_timeout_secs: env_parse("LLM_REQUEST_TIMEOUT_SECS", 30)?,
        })
    }
}

/// Lee una variable de entorno numérica con valor por defecto.
fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow!("Valor inválido para {name}: '{raw}'")),
        Err(_) => Ok(default),
    }
}
