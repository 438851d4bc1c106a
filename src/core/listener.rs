use super::consumer::LogConsumer;
use super::decoder::DecoderSet;
use super::pipeline::FlowPipeline;
use super::pool::{
    DropCallback, ErrorClass, NoopDropCallback, PoolError, WorkerPool, WorkerPoolConfig,
};
use super::producer::RecordProducer;
use crate::config::{ConfigError, ListenerConfig, Scheme, DEFAULT_QUEUE_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Started,
    ShuttingDown,
    Stopped,
}

/// One configured UDP endpoint: a worker pool bound to a decode pipeline
pub struct FlowListener {
    config: ListenerConfig,
    decoders: DecoderSet,
    consumer: Arc<dyn LogConsumer>,
    drop_callback: Arc<dyn DropCallback>,
    state: ListenerState,
    pool: Option<WorkerPool>,
    drain: Option<JoinHandle<()>>,
}

impl FlowListener {
    pub fn new(config: ListenerConfig, decoders: DecoderSet, consumer: Arc<dyn LogConsumer>) -> Self {
        Self {
            config,
            decoders,
            consumer,
            drop_callback: Arc::new(NoopDropCallback),
            state: ListenerState::Created,
            pool: None,
            drain: None,
        }
    }

    pub fn with_drop_callback(mut self, drop_callback: Arc<dyn DropCallback>) -> Self {
        self.drop_callback = drop_callback;
        self
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Addresses the sockets are bound to while started
    pub fn local_addrs(&self) -> &[SocketAddr] {
        self.pool.as_ref().map(|p| p.local_addrs()).unwrap_or(&[])
    }

    /// Bind the sockets and start decoding.
    ///
    /// The decode pipeline is chosen before anything is bound, so a failed
    /// start leaves no socket or task behind.
    pub async fn start(&mut self) -> Result<(), ListenerError> {
        if self.state != ListenerState::Created {
            return Err(ListenerError::InvalidState(self.state));
        }

        info!(
            scheme = %self.config.scheme,
            address = %self.config.endpoint(),
            sockets = self.config.sockets,
            workers = self.config.workers,
            queue_size = self.config.queue_size,
            "Setting up receivers for listener"
        );

        let scheme = self.config.scheme()?;
        let port = u16::try_from(self.config.port).map_err(|_| {
            ConfigError::ValidationError(format!("port must be at most {}", u16::MAX))
        })?;
        let sockets = positive(self.config.sockets, "sockets")?;
        let workers = positive(self.config.workers, "workers")?;
        let queue_size = if self.config.queue_size > 0 {
            self.config.queue_size as usize
        } else {
            DEFAULT_QUEUE_SIZE as usize
        };

        let decoder = self
            .decoders
            .resolve(scheme)
            .ok_or(ListenerError::NoDecoder(scheme))?;
        let endpoint = self.config.endpoint();
        let producer = RecordProducer::new(Arc::clone(&self.consumer), scheme, endpoint.clone());
        let pipeline = Arc::new(FlowPipeline::new(decoder, producer));

        let pool_config = WorkerPoolConfig::new(sockets, workers, queue_size)
            .with_drop_callback(Arc::clone(&self.drop_callback));
        let mut pool = WorkerPool::new(pool_config);
        pool.start(self.config.bind_host(), port, pipeline).await?;

        if let Some(errors) = pool.take_errors() {
            self.drain = Some(tokio::spawn(
                drain_errors(errors, scheme, endpoint.clone()).in_current_span(),
            ));
        }
        self.pool = Some(pool);
        self.state = ListenerState::Started;

        info!(%scheme, address = %endpoint, "Start listening for flows");
        Ok(())
    }

    /// Stop the pool and wait for the error stream to drain.
    ///
    /// Only the first call does any work; later calls return `Ok(())`.
    pub async fn shutdown(&mut self) -> Result<(), ListenerError> {
        match self.state {
            ListenerState::Started => {}
            ListenerState::Created => {
                self.state = ListenerState::Stopped;
                return Ok(());
            }
            ListenerState::ShuttingDown | ListenerState::Stopped => return Ok(()),
        }

        self.state = ListenerState::ShuttingDown;
        debug!(address = %self.config.endpoint(), "Shutting down listener");

        let result = match self.pool.as_mut() {
            Some(pool) => pool.stop().await,
            None => Ok(()),
        };
        self.pool = None;

        if let Some(drain) = self.drain.take() {
            if let Err(e) = drain.await {
                warn!(error = %e, "Error drain task failed");
            }
        }

        self.state = ListenerState::Stopped;
        result.map_err(ListenerError::from)
    }
}

fn positive(value: i64, field: &str) -> Result<usize, ConfigError> {
    usize::try_from(value)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ConfigError::ValidationError(format!("{} must be greater than 0", field)))
}

/// Log every pool error until the stream closes; never exits early
async fn drain_errors(
    mut errors: mpsc::UnboundedReceiver<PoolError>,
    scheme: Scheme,
    address: String,
) {
    while let Some(err) = errors.recv().await {
        match err.classify() {
            ErrorClass::Closed => info!(%scheme, %address, "Receiver closed"),
            ErrorClass::TemplateNotFound => {
                debug!(%scheme, %address, error = %err, "Template not found, dropping flow")
            }
            ErrorClass::Panic(message) => {
                error!(%scheme, %address, panic = %message, "Receiver panic")
            }
            ErrorClass::Other => error!(%scheme, %address, error = %err, "Receiver error"),
        }
    }
    debug!(%scheme, %address, "Error stream closed");
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Invalid listener configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("No decoder registered for scheme '{0}'")]
    NoDecoder(Scheme),
    #[error("Listener cannot start in state {0:?}")]
    InvalidState(ListenerState),
    #[error(transparent)]
    Pool(#[from] PoolError),
}
