use super::decoder::FlowDecoder;
use super::flow::FlowRecord;
use super::pool::{panic_message, Datagram, DatagramHandler, PoolError};
use super::producer::RecordProducer;
use async_trait::async_trait;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::trace;

/// Decode one datagram, turning a decoder panic into [`PoolError::DecodePanic`]
pub fn decode_guarded(
    decoder: &dyn FlowDecoder,
    datagram: &Datagram,
) -> Result<Vec<Box<dyn FlowRecord>>, PoolError> {
    match catch_unwind(AssertUnwindSafe(|| decoder.decode(datagram))) {
        Ok(result) => result.map_err(PoolError::from),
        Err(payload) => Err(PoolError::DecodePanic {
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Decode then produce, for one listener
pub struct FlowPipeline {
    decoder: Arc<dyn FlowDecoder>,
    producer: RecordProducer,
}

impl FlowPipeline {
    pub fn new(decoder: Arc<dyn FlowDecoder>, producer: RecordProducer) -> Self {
        Self { decoder, producer }
    }
}

#[async_trait]
impl DatagramHandler for FlowPipeline {
    async fn handle(&self, datagram: Datagram) -> Result<(), PoolError> {
        let records = decode_guarded(self.decoder.as_ref(), &datagram)?;
        let delivered = self.producer.produce(&records).await?;
        trace!(
            source = %datagram.source,
            decoded = records.len(),
            delivered,
            "Datagram processed"
        );
        Ok(())
    }
}
