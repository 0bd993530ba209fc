use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, llm::LlmManager, session::SessionRegistry};

/// Estado compartido por todos los handlers. El estado global ad hoc de la
/// aplicación original se sustituye por esta estructura explícita, inyectada
/// en cada petición.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub llm_manager: LlmManager,
    pub sessions: Arc<SessionRegistry>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
