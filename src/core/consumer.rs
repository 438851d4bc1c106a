use async_trait::async_trait;
use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

/// Normalized log record emitted for one flow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    #[serde(serialize_with = "serialize_unix_nanos")]
    pub observed_timestamp: SystemTime,
    #[serde(serialize_with = "serialize_unix_nanos")]
    pub timestamp: SystemTime,
    pub resource_attributes: BTreeMap<String, String>,
    pub scope_name: String,
    pub scope_version: String,
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// Unix nanoseconds, saturating at `u64::MAX`; times before the epoch fail
fn serialize_unix_nanos<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let since_epoch = time
        .duration_since(UNIX_EPOCH)
        .map_err(|_| S::Error::custom("timestamp before unix epoch"))?;
    serializer.serialize_u64(u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX))
}

/// Downstream sink for log batches
///
/// Called concurrently from every worker of every listener.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Accept the events produced from one datagram
    async fn consume(&self, batch: Vec<LogEvent>) -> Result<(), ConsumerError>;
}

/// Writes each event as one JSON line on standard output
#[derive(Debug, Default)]
pub struct StdoutConsumer;

impl StdoutConsumer {
    pub fn new() -> Self {
        Self
    }

    fn render(batch: &[LogEvent]) -> Result<Vec<u8>, ConsumerError> {
        let mut out = Vec::new();
        for event in batch {
            serde_json::to_writer(&mut out, event)
                .map_err(|e| ConsumerError::Serialization(e.to_string()))?;
            out.push(b'\n');
        }
        Ok(out)
    }
}

#[async_trait]
impl LogConsumer for StdoutConsumer {
    async fn consume(&self, batch: Vec<LogEvent>) -> Result<(), ConsumerError> {
        let out = Self::render(&batch)?;
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(&out)
            .await
            .map_err(|e| ConsumerError::IoError(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| ConsumerError::IoError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Serialization failed: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Batch rejected: {0}")]
    Rejected(String),
}
