use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::llm_client::{ChatModel, OpenAiChatClient};
use crate::proactive::{ProactiveScheduler, SchedulerHandle};
use crate::rng::{RandomSource, ThreadRandom};
use crate::transport::Transport;

pub struct EngineRuntime {
    pub config: EngineConfig,
    pub engine: Arc<Engine>,
}

pub struct EngineRuntimeBuilder {
    config: EngineConfig,
    model: Option<Arc<dyn ChatModel>>,
    rng: Option<Arc<dyn RandomSource>>,
}

impl EngineRuntimeBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            model: None,
            rng: None,
        }
    }

    /// Use `model` instead of an HTTP client built from `config.llm`.
    pub fn with_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_rng(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn build(self, transport: Arc<dyn Transport>) -> Result<EngineRuntime> {
        let config = self.config.normalized();
        if !config.enabled {
            return Err(EngineError::Configuration(
                "humanlike engine is disabled".to_string(),
            ));
        }

        let model = match self.model {
            Some(model) => model,
            None => {
                let client = OpenAiChatClient::new(&config.llm)?;
                tracing::info!(
                    "LLM backend: {} (model {})",
                    config.llm.base_url,
                    client.model()
                );
                Arc::new(client)
            }
        };
        let rng = self
            .rng
            .unwrap_or_else(|| Arc::new(ThreadRandom::new()) as Arc<dyn RandomSource>);

        if config.behavior.whitelist_enabled && !config.behavior.whitelist.is_empty() {
            tracing::info!("Whitelisted channels: {:?}", config.behavior.whitelist);
        } else {
            tracing::info!("No channel whitelist, acting in every channel");
        }

        let engine = Arc::new(Engine::new(config.clone(), model, transport, rng));
        Ok(EngineRuntime { config, engine })
    }
}

impl EngineRuntime {
    pub fn bootstrap(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        EngineRuntimeBuilder::new(config).build(transport)
    }

    /// Start the proactive scheduler, unless it is switched off.
    pub fn spawn_scheduler(&self) -> Option<SchedulerHandle> {
        if !self.config.proactive.enabled {
            tracing::info!("Proactive speaking disabled");
            return None;
        }
        Some(ProactiveScheduler::spawn(self.engine.clone()))
    }
}
