use super::consumer::ConsumerError;
use super::decoder::DecodeError;
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use socket2::{Domain, Protocol, Socket, Type};
use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Largest datagram read from a socket; longer ones are truncated
pub const MAX_DATAGRAM_SIZE: usize = 9000;

const RECV_ERROR_BACKOFF_MIN: Duration = Duration::from_millis(5);
const RECV_ERROR_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// One received UDP payload
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: SocketAddr,
    /// Wall-clock time the datagram was read off the socket
    pub received_at: SystemTime,
}

/// Per-datagram work run by pool workers
#[async_trait]
pub trait DatagramHandler: Send + Sync {
    async fn handle(&self, datagram: Datagram) -> Result<(), PoolError>;
}

/// Notified for every datagram discarded because the queue was full
pub trait DropCallback: Send + Sync {
    fn dropped(&self, datagram: &Datagram);
}

#[derive(Debug, Default)]
pub struct NoopDropCallback;

impl DropCallback for NoopDropCallback {
    fn dropped(&self, _datagram: &Datagram) {}
}

#[derive(Clone)]
pub struct WorkerPoolConfig {
    pub sockets: usize,
    pub workers: usize,
    pub queue_size: usize,
    pub drop_callback: Arc<dyn DropCallback>,
}

impl WorkerPoolConfig {
    pub fn new(sockets: usize, workers: usize, queue_size: usize) -> Self {
        Self {
            sockets: sockets.max(1),
            workers: workers.max(1),
            queue_size: queue_size.max(1),
            drop_callback: Arc::new(NoopDropCallback),
        }
    }

    pub fn with_drop_callback(mut self, drop_callback: Arc<dyn DropCallback>) -> Self {
        self.drop_callback = drop_callback;
        self
    }
}

/// UDP sockets feeding a fixed set of workers through a bounded, drop-on-full queue
pub struct WorkerPool {
    config: WorkerPoolConfig,
    running: Option<RunningPool>,
    errors: Option<mpsc::UnboundedReceiver<PoolError>>,
    local_addrs: Vec<SocketAddr>,
}

struct RunningPool {
    cancel: CancellationToken,
    receivers: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            running: None,
            errors: None,
            local_addrs: Vec::new(),
        }
    }

    /// Bind all sockets on `host:port` and start receiving.
    ///
    /// Binding is all-or-nothing: if any socket fails, the ones already bound
    /// are closed and no task is spawned.
    pub async fn start(
        &mut self,
        host: &str,
        port: u16,
        handler: Arc<dyn DatagramHandler>,
    ) -> Result<(), PoolError> {
        if self.running.is_some() {
            return Err(PoolError::AlreadyStarted);
        }

        let address = format!("{}:{}", host, port);
        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| PoolError::BindFailed {
                address: address.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| PoolError::BindFailed {
                address: address.clone(),
                source: io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved"),
            })?;

        let sockets = bind_sockets(addr, self.config.sockets)
            .map_err(|source| PoolError::BindFailed { address, source })?;
        let local_addrs = sockets
            .iter()
            .map(|s| s.local_addr())
            .collect::<io::Result<Vec<_>>>()
            .map_err(PoolError::Socket)?;

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_size);
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let receivers = sockets
            .into_iter()
            .map(|socket| {
                tokio::spawn(receive_loop(
                    socket,
                    queue_tx.clone(),
                    error_tx.clone(),
                    cancel.clone(),
                    Arc::clone(&self.config.drop_callback),
                ))
            })
            .collect();
        drop(queue_tx);

        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let workers = (0..self.config.workers)
            .map(|_| {
                tokio::spawn(worker_loop(
                    Arc::clone(&queue_rx),
                    Arc::clone(&handler),
                    error_tx.clone(),
                ))
            })
            .collect();

        debug!(
            address = ?local_addrs,
            sockets = self.config.sockets,
            workers = self.config.workers,
            queue_size = self.config.queue_size,
            "Worker pool started"
        );

        self.local_addrs = local_addrs;
        self.errors = Some(error_rx);
        self.running = Some(RunningPool {
            cancel,
            receivers,
            workers,
        });
        Ok(())
    }

    /// Hand out the error stream; available once per start.
    ///
    /// The stream ends after `stop` once every socket loop and worker exited.
    pub fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<PoolError>> {
        self.errors.take()
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Close the sockets and wait for workers to drain the queue.
    ///
    /// Returns once every socket is released. Calling it again, or before
    /// `start`, is a no-op.
    pub async fn stop(&mut self) -> Result<(), PoolError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        running.cancel.cancel();

        let mut failures = Vec::new();
        for result in join_all(running.receivers).await {
            if let Err(e) = result {
                failures.push(e.to_string());
            }
        }
        // Receive loops held the only queue senders, so workers now see the
        // queue close once it is empty
        for result in join_all(running.workers).await {
            if let Err(e) = result {
                failures.push(e.to_string());
            }
        }

        self.local_addrs.clear();
        debug!("Worker pool stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PoolError::TaskFailed(failures.join("; ")))
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}

fn bind_sockets(addr: SocketAddr, count: usize) -> io::Result<Vec<UdpSocket>> {
    let shared = count > 1;
    let first = bind_socket(addr, shared)?;
    // Port 0 resolves on the first bind; the rest share that port
    let addr = first.local_addr()?;

    let mut sockets = Vec::with_capacity(count);
    sockets.push(first);
    for _ in 1..count {
        sockets.push(bind_socket(addr, shared)?);
    }
    Ok(sockets)
}

/// Sockets of one pool share their port; a lone socket claims it exclusively
fn bind_socket(addr: SocketAddr, shared: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if shared {
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

async fn receive_loop(
    socket: UdpSocket,
    queue: mpsc::Sender<Datagram>,
    errors: mpsc::UnboundedSender<PoolError>,
    cancel: CancellationToken,
    drop_callback: Arc<dyn DropCallback>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut consecutive_errors = 0u32;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, source)) => {
                    consecutive_errors = 0;
                    let datagram = Datagram {
                        payload: buf[..len].to_vec(),
                        source,
                        received_at: SystemTime::now(),
                    };
                    match queue.try_send(datagram) {
                        Ok(()) => {}
                        Err(TrySendError::Full(datagram)) => {
                            trace!(source = %datagram.source, "Queue full, dropping datagram");
                            drop_callback.dropped(&datagram);
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                Err(e) => {
                    let _ = errors.send(PoolError::Socket(e));
                    let delay = error_backoff(consecutive_errors);
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
    let _ = errors.send(PoolError::Closed);
}

/// Delay before reading again after `consecutive` failed reads in a row
fn error_backoff(consecutive: u32) -> Duration {
    RECV_ERROR_BACKOFF_MIN
        .saturating_mul(1 << consecutive.min(16))
        .min(RECV_ERROR_BACKOFF_MAX)
}

async fn worker_loop(
    queue: Arc<Mutex<mpsc::Receiver<Datagram>>>,
    handler: Arc<dyn DatagramHandler>,
    errors: mpsc::UnboundedSender<PoolError>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(datagram) = next else {
            break;
        };
        let result = AssertUnwindSafe(handler.handle(datagram))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(PoolError::HandlerPanic {
                    message: panic_message(payload.as_ref()),
                })
            });
        if let Err(e) = result {
            let _ = errors.send(e);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// How the error-draining task treats an error from the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Socket closed during shutdown
    Closed,
    /// Exporter template not learned yet
    TemplateNotFound,
    /// Decoder or handler panicked; carries the panic message
    Panic(String),
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Bind failed on {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("Worker pool already started")]
    AlreadyStarted,
    #[error("Socket error: {0}")]
    Socket(#[source] io::Error),
    #[error("Receiver closed")]
    Closed,
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Decoder panicked: {message}")]
    DecodePanic { message: String },
    #[error("Datagram handler panicked: {message}")]
    HandlerPanic { message: String },
    #[error("Log consumer error: {0}")]
    Consumer(#[from] ConsumerError),
    #[error("Pool task failed: {0}")]
    TaskFailed(String),
}

impl PoolError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            PoolError::Closed => ErrorClass::Closed,
            PoolError::Decode(DecodeError::TemplateNotFound { .. }) => ErrorClass::TemplateNotFound,
            PoolError::DecodePanic { message } | PoolError::HandlerPanic { message } => {
                ErrorClass::Panic(message.clone())
            }
            _ => ErrorClass::Other,
        }
    }
}
