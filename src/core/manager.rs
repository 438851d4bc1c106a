use super::consumer::LogConsumer;
use super::decoder::DecoderSet;
use super::listener::{FlowListener, ListenerError};
use super::pool::DropCallback;
use crate::config::ListenerConfig;
use std::sync::Arc;
use tracing::{error, info};

/// Owns every started listener of a receiver
#[derive(Default)]
pub struct ListenerManager {
    listeners: Vec<FlowListener>,
    drop_callback: Option<Arc<dyn DropCallback>>,
}

impl ListenerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe datagrams dropped on a full queue, for every listener started afterwards
    pub fn with_drop_callback(mut self, drop_callback: Arc<dyn DropCallback>) -> Self {
        self.drop_callback = Some(drop_callback);
        self
    }

    /// Start one listener per config, in order, stopping at the first failure.
    ///
    /// Listeners started before the failure keep running and stay owned by
    /// the manager; `shutdown_all` must still be called.
    pub async fn start_all(
        &mut self,
        configs: &[ListenerConfig],
        decoders: &DecoderSet,
        consumer: Arc<dyn LogConsumer>,
    ) -> Result<(), ManagerError> {
        for (index, config) in configs.iter().enumerate() {
            let mut listener =
                FlowListener::new(config.clone(), decoders.clone(), Arc::clone(&consumer));
            if let Some(drop_callback) = &self.drop_callback {
                listener = listener.with_drop_callback(Arc::clone(drop_callback));
            }
            listener
                .start()
                .await
                .map_err(|source| ManagerError::StartFailed {
                    index,
                    address: config.endpoint(),
                    source,
                })?;
            self.listeners.push(listener);
        }

        info!(listeners = self.listeners.len(), "All listeners started");
        Ok(())
    }

    /// Shut every listener down, continuing past failures.
    pub async fn shutdown_all(&mut self) -> Result<(), ManagerError> {
        let total = self.listeners.len();
        let mut failed = 0;

        for listener in &mut self.listeners {
            if let Err(e) = listener.shutdown().await {
                error!(
                    address = %listener.config().endpoint(),
                    error = %e,
                    "Error shutting down listener"
                );
                failed += 1;
            }
        }
        self.listeners.clear();

        if failed > 0 {
            return Err(ManagerError::ShutdownFailed { failed, total });
        }
        Ok(())
    }

    pub fn listeners(&self) -> &[FlowListener] {
        &self.listeners
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Listener {index} ({address}) failed to start: {source}")]
    StartFailed {
        index: usize,
        address: String,
        #[source]
        source: ListenerError,
    },
    #[error("{failed} of {total} listeners failed to shut down")]
    ShutdownFailed { failed: usize, total: usize },
}
