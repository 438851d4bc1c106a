use crate::config::{Config, ConfigError};
use crate::core::{DecoderSet, FlowListener, ListenerManager, LogConsumer, ManagerError};
use std::sync::Arc;
use tracing::info;

/// Builds receivers that share one set of decoders and one log consumer
pub struct ReceiverFactory {
    decoders: DecoderSet,
    consumer: Arc<dyn LogConsumer>,
}

impl ReceiverFactory {
    pub fn new(decoders: DecoderSet, consumer: Arc<dyn LogConsumer>) -> Self {
        Self { decoders, consumer }
    }

    /// Single NetFlow listener on port 2055
    pub fn default_config() -> Config {
        Config::default()
    }

    /// Validate `config` and build a receiver named `name`.
    pub fn create_receiver(&self, name: &str, mut config: Config) -> Result<FlowReceiver, ReceiverError> {
        config.apply_defaults();
        config.validate()?;

        Ok(FlowReceiver {
            name: name.to_string(),
            config,
            decoders: self.decoders.clone(),
            consumer: Arc::clone(&self.consumer),
            manager: ListenerManager::new(),
            started: false,
        })
    }
}

pub struct FlowReceiver {
    name: String,
    config: Config,
    decoders: DecoderSet,
    consumer: Arc<dyn LogConsumer>,
    manager: ListenerManager,
    started: bool,
}

impl FlowReceiver {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn listeners(&self) -> &[FlowListener] {
        self.manager.listeners()
    }

    /// Start every configured listener.
    ///
    /// Each listener processes one flow protocol on one address. On failure
    /// the listeners already running are kept; call `shutdown` either way.
    pub async fn start(&mut self) -> Result<(), ReceiverError> {
        if self.started {
            return Err(ReceiverError::AlreadyStarted);
        }
        self.started = true;

        info!(
            receiver = %self.name,
            listeners = self.config.listeners.len(),
            "Starting NetFlow receiver"
        );
        self.manager
            .start_all(&self.config.listeners, &self.decoders, Arc::clone(&self.consumer))
            .await?;

        info!(receiver = %self.name, "NetFlow receiver started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ReceiverError> {
        info!(receiver = %self.name, "NetFlow receiver is shutting down");
        self.manager.shutdown_all().await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error("Receiver already started")]
    AlreadyStarted,
}
