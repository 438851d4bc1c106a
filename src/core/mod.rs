pub mod consumer;
pub mod decoder;
pub mod flow;
pub mod listener;
pub mod lookup;
pub mod manager;
pub mod pipeline;
pub mod pool;
pub mod producer;

// Re-export core traits
pub use consumer::{ConsumerError, LogConsumer, LogEvent, StdoutConsumer};
pub use decoder::{DecodeError, DecoderSet, FlowDecoder};
pub use flow::{FlowMessage, FlowRecord, FlowType};
pub use listener::{FlowListener, ListenerError, ListenerState};
pub use manager::{ListenerManager, ManagerError};
pub use pipeline::FlowPipeline;
pub use pool::{
    Datagram, DatagramHandler, DropCallback, ErrorClass, NoopDropCallback, PoolError, WorkerPool,
    WorkerPoolConfig,
};
pub use producer::RecordProducer;
