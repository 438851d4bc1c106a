//! Turns decoded flow records into log events and hands them to the consumer.
//!
//! The event body is a serde projection of the record: nested `flow`,
//! `source`, `destination`, `network` and `io` groups, with zero values and
//! absent addresses left out.

use super::consumer::{ConsumerError, LogConsumer, LogEvent};
use super::flow::FlowRecord;
use super::lookup;
use crate::config::Scheme;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const SCOPE_NAME: &str = "netflow-receiver";
pub const SCOPE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const RECEIVER_TYPE: &str = "netflow";

pub struct RecordProducer {
    consumer: Arc<dyn LogConsumer>,
    resource_attributes: BTreeMap<String, String>,
}

impl RecordProducer {
    pub fn new(consumer: Arc<dyn LogConsumer>, scheme: Scheme, endpoint: String) -> Self {
        let resource_attributes = BTreeMap::from([
            ("receiver.type".to_string(), RECEIVER_TYPE.to_string()),
            ("listener.scheme".to_string(), scheme.as_str().to_string()),
            ("listener.address".to_string(), endpoint),
        ]);

        Self {
            consumer,
            resource_attributes,
        }
    }

    /// Convert the records of one datagram and submit them as a single batch.
    ///
    /// Records that cannot be converted are skipped. Nothing is submitted when
    /// no record converts. Returns the number of events delivered.
    pub async fn produce(&self, records: &[Box<dyn FlowRecord>]) -> Result<usize, ConsumerError> {
        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            match self.build_event(record.as_ref()) {
                Ok(event) => batch.push(event),
                Err(e) => debug!(error = %e, "Skipping flow record"),
            }
        }

        if batch.is_empty() {
            return Ok(0);
        }

        let delivered = batch.len();
        self.consumer.consume(batch).await?;
        Ok(delivered)
    }

    pub fn build_event(&self, record: &dyn FlowRecord) -> Result<LogEvent, ProduceError> {
        let document = FlowDocument::from_record(record)?;
        let encoded = serde_json::to_vec(&document)
            .map_err(|e| ProduceError::Serialization(e.to_string()))?;
        let body = serde_json::from_slice(&encoded)
            .map_err(|e| ProduceError::Serialization(e.to_string()))?;

        Ok(LogEvent {
            observed_timestamp: unix_nanos(record.time_received_ns()),
            timestamp: unix_nanos(record.time_flow_start_ns()),
            resource_attributes: self.resource_attributes.clone(),
            scope_name: SCOPE_NAME.to_string(),
            scope_version: SCOPE_VERSION.to_string(),
            body,
        })
    }
}

fn unix_nanos(nanos: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos)
}

/// Render raw address bytes; empty means the exporter did not report one
fn render_addr(field: &'static str, raw: &[u8]) -> Result<Option<IpAddr>, ProduceError> {
    match raw.len() {
        0 => Ok(None),
        4 => {
            let octets: [u8; 4] = raw.try_into().map_err(|_| ProduceError::InvalidAddress {
                field,
                len: raw.len(),
            })?;
            Ok(Some(IpAddr::V4(Ipv4Addr::from(octets))))
        }
        16 => {
            let octets: [u8; 16] = raw.try_into().map_err(|_| ProduceError::InvalidAddress {
                field,
                len: raw.len(),
            })?;
            Ok(Some(IpAddr::V6(Ipv6Addr::from(octets))))
        }
        len => Err(ProduceError::InvalidAddress { field, len }),
    }
}

fn is_zero<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

#[derive(Debug, Serialize)]
struct FlowDocument {
    flow: FlowGroup,
    #[serde(skip_serializing_if = "EndpointGroup::is_empty")]
    source: EndpointGroup,
    #[serde(skip_serializing_if = "EndpointGroup::is_empty")]
    destination: EndpointGroup,
    network: NetworkGroup,
    io: IoGroup,
}

#[derive(Debug, Serialize)]
struct FlowGroup {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "is_zero")]
    sequence_num: u32,
    #[serde(skip_serializing_if = "is_zero")]
    sampling_rate: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sampler_address: Option<IpAddr>,
    #[serde(skip_serializing_if = "is_zero")]
    time_received: u64,
    #[serde(skip_serializing_if = "is_zero")]
    start: u64,
    #[serde(skip_serializing_if = "is_zero")]
    end: u64,
}

#[derive(Debug, Serialize)]
struct EndpointGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<IpAddr>,
    #[serde(skip_serializing_if = "is_zero")]
    port: u16,
}

impl EndpointGroup {
    fn is_empty(&self) -> bool {
        self.address.is_none() && self.port == 0
    }
}

#[derive(Debug, Serialize)]
struct NetworkGroup {
    transport: &'static str,
    #[serde(skip_serializing_if = "is_zero")]
    iana_number: u32,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "is_zero")]
    ether_type: u32,
}

#[derive(Debug, Serialize)]
struct IoGroup {
    bytes: u64,
    packets: u64,
}

impl FlowDocument {
    fn from_record(record: &dyn FlowRecord) -> Result<Self, ProduceError> {
        Ok(Self {
            flow: FlowGroup {
                kind: record.flow_type().name(),
                sequence_num: record.sequence_num(),
                sampling_rate: record.sampling_rate(),
                sampler_address: render_addr("sampler_address", record.sampler_addr())?,
                time_received: record.time_received_ns(),
                start: record.time_flow_start_ns(),
                end: record.time_flow_end_ns(),
            },
            source: EndpointGroup {
                address: render_addr("source.address", record.src_addr())?,
                port: record.src_port(),
            },
            destination: EndpointGroup {
                address: render_addr("destination.address", record.dst_addr())?,
                port: record.dst_port(),
            },
            network: NetworkGroup {
                transport: lookup::protocol_name(record.l4_protocol()),
                iana_number: record.l4_protocol(),
                kind: lookup::ether_type_name(record.ether_type()),
                ether_type: record.ether_type(),
            },
            io: IoGroup {
                bytes: record.bytes(),
                packets: record.packets(),
            },
        })
    }
}

/// Reasons a single record is left out of its batch
#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    #[error("Invalid {field}: {len} bytes")]
    InvalidAddress { field: &'static str, len: usize },
    #[error("Serialization failed: {0}")]
    Serialization(String),
}
