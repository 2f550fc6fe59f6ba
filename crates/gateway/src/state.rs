//! Shared application state passed to all API handlers.

use std::sync::Arc;

use kestrel_agents::{CancelMap, CoderAgent, ManagerAgent, Summarizer};
use kestrel_domain::config::Config;
use kestrel_domain::error::Result;
use kestrel_providers::ChatProvider;
use kestrel_sessions::SessionStore;

use crate::stt::Transcriber;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub manager: ManagerAgent,
    pub summarizer: Arc<Summarizer>,
    pub cancel_map: Arc<CancelMap>,
    /// STT engine; `None` means `/session/{id}/audio` answers 503.
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn ChatProvider>,
        transcriber: Option<Arc<dyn Transcriber>>,
    ) -> Result<Self> {
        let sessions = Arc::new(SessionStore::new(&config.workdir_root)?);
        let coder = CoderAgent::new(provider.clone(), kestrel_agents::coder::DEFAULT_MAX_STEPS);
        let manager = ManagerAgent::new(
            provider.clone(),
            coder,
            kestrel_agents::manager::DEFAULT_MAX_RETRIES,
            Some(config.llm.manager_model.clone()),
        );
        let summarizer = Arc::new(Summarizer::new(
            provider,
            Some(config.llm.summarizer_model.clone()),
        ));

        Ok(Self {
            config,
            sessions,
            manager,
            summarizer,
            cancel_map: Arc::new(CancelMap::new()),
            transcriber,
        })
    }
}
