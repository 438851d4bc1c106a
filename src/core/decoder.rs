use super::flow::FlowRecord;
use super::pool::Datagram;
use crate::config::Scheme;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Core trait for wire-format decoders (NetFlow v5/v9, IPFIX, sFlow)
///
/// Implementations may keep per-exporter state such as learned templates, so
/// they are shared across workers and must tolerate concurrent calls. Callers
/// do not assume `decode` is panic-free.
pub trait FlowDecoder: Send + Sync {
    /// Decode one datagram into zero or more flow records, in packet order
    fn decode(&self, datagram: &Datagram) -> Result<Vec<Box<dyn FlowRecord>>, DecodeError>;

    /// Decoder name
    fn name(&self) -> &str;
}

/// Scheme to decoder registry used when listeners start
#[derive(Clone, Default)]
pub struct DecoderSet {
    decoders: HashMap<Scheme, Arc<dyn FlowDecoder>>,
}

impl DecoderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, scheme: Scheme, decoder: Arc<dyn FlowDecoder>) -> Self {
        self.insert(scheme, decoder);
        self
    }

    pub fn insert(&mut self, scheme: Scheme, decoder: Arc<dyn FlowDecoder>) {
        self.decoders.insert(scheme, decoder);
    }

    /// Pick the decode pipeline for a scheme.
    ///
    /// `flow` prefers an explicitly registered decoder and otherwise detects
    /// the protocol per datagram using the netflow and sflow decoders.
    pub fn resolve(&self, scheme: Scheme) -> Option<Arc<dyn FlowDecoder>> {
        if let Some(decoder) = self.decoders.get(&scheme) {
            return Some(Arc::clone(decoder));
        }

        if scheme != Scheme::Flow {
            return None;
        }

        let netflow = self.decoders.get(&Scheme::Netflow).cloned();
        let sflow = self.decoders.get(&Scheme::Sflow).cloned();
        if netflow.is_none() && sflow.is_none() {
            return None;
        }

        Some(Arc::new(DetectingDecoder { netflow, sflow }))
    }
}

impl fmt::Debug for DecoderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<&str> = self.decoders.keys().map(|s| s.as_str()).collect();
        schemes.sort_unstable();
        f.debug_struct("DecoderSet").field("schemes", &schemes).finish()
    }
}

/// Routes each datagram to the netflow or sflow decoder by its version header
struct DetectingDecoder {
    netflow: Option<Arc<dyn FlowDecoder>>,
    sflow: Option<Arc<dyn FlowDecoder>>,
}

/// Protocol family a datagram header announces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedProtocol {
    Netflow,
    Sflow,
}

/// Inspect the leading version field of a flow export datagram.
///
/// NetFlow v5, v9 and IPFIX start with a 16-bit version (5, 9, 10); sFlow v5
/// starts with a 32-bit version of 5.
pub fn detect_protocol(payload: &[u8]) -> Result<DetectedProtocol, DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::Truncated {
            expected: 2,
            actual: payload.len(),
        });
    }

    let short = u16::from_be_bytes([payload[0], payload[1]]);
    if matches!(short, 5 | 9 | 10) {
        return Ok(DetectedProtocol::Netflow);
    }

    if payload.len() >= 4 {
        let long = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if long == 5 {
            return Ok(DetectedProtocol::Sflow);
        }
        return Err(DecodeError::UnsupportedVersion(long));
    }

    Err(DecodeError::UnsupportedVersion(u32::from(short)))
}

impl FlowDecoder for DetectingDecoder {
    fn decode(&self, datagram: &Datagram) -> Result<Vec<Box<dyn FlowRecord>>, DecodeError> {
        let (decoder, protocol) = match detect_protocol(&datagram.payload)? {
            DetectedProtocol::Netflow => (&self.netflow, "netflow"),
            DetectedProtocol::Sflow => (&self.sflow, "sflow"),
        };

        match decoder {
            Some(decoder) => decoder.decode(datagram),
            None => Err(DecodeError::NoDecoder(protocol)),
        }
    }

    fn name(&self) -> &str {
        "flow"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Template {template_id} not found")]
    TemplateNotFound { template_id: u16 },
    #[error("Unsupported flow version: {0}")]
    UnsupportedVersion(u32),
    #[error("Datagram truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Malformed datagram: {0}")]
    Malformed(String),
    #[error("No {0} decoder registered")]
    NoDecoder(&'static str),
}
