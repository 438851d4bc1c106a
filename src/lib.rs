pub mod config;
pub mod core;
pub mod receiver;

// Re-export main components for easy access
pub use config::{Config, ListenerConfig, Scheme};
pub use core::*;
pub use receiver::{FlowReceiver, ReceiverError, ReceiverFactory};
