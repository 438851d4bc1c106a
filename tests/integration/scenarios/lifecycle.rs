//! Receiver and listener lifecycle tests
//!
//! Start ordering, partial start failures and port release on shutdown

use crate::integration::{CollectingConsumer, NetflowV5Decoder};
use netflow_receiver::{
    Config, DecoderSet, FlowListener, ListenerConfig, ListenerError, ListenerManager,
    ListenerState, ManagerError, PoolError, ReceiverError, ReceiverFactory, Scheme,
};
use std::sync::Arc;

fn decoders() -> DecoderSet {
    DecoderSet::new().with(Scheme::Netflow, Arc::new(NetflowV5Decoder))
}

fn free_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn listener(port: i64) -> ListenerConfig {
    ListenerConfig {
        hostname: "127.0.0.1".to_string(),
        port,
        workers: 1,
        queue_size: 10,
        ..ListenerConfig::default()
    }
}

#[tokio::test]
async fn test_shutdown_releases_ports() {
    let ports = [free_port(), free_port()];
    let config = Config {
        listeners: ports.iter().map(|p| listener(i64::from(*p))).collect(),
    };
    let factory = ReceiverFactory::new(decoders(), Arc::new(CollectingConsumer::new()));
    let mut receiver = factory.create_receiver("netflow/ports", config).unwrap();

    receiver.start().await.unwrap();
    assert_eq!(receiver.listeners().len(), 2);
    for port in ports {
        assert!(
            std::net::UdpSocket::bind(("127.0.0.1", port)).is_err(),
            "Port {} should be held while running",
            port
        );
    }

    receiver.shutdown().await.unwrap();
    for port in ports {
        assert!(
            std::net::UdpSocket::bind(("127.0.0.1", port)).is_ok(),
            "Port {} should be released after shutdown",
            port
        );
    }
}

#[tokio::test]
async fn test_start_stops_at_first_bind_failure() {
    let held = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let held_port = held.local_addr().unwrap().port();

    let configs = [
        listener(0),
        listener(i64::from(held_port)),
        listener(0),
    ];
    let mut manager = ListenerManager::new();
    let err = manager
        .start_all(&configs, &decoders(), Arc::new(CollectingConsumer::new()))
        .await
        .unwrap_err();

    match err {
        ManagerError::StartFailed {
            index,
            address,
            source,
        } => {
            assert_eq!(index, 1);
            assert_eq!(address, format!("127.0.0.1:{}", held_port));
            assert!(matches!(
                source,
                ListenerError::Pool(PoolError::BindFailed { .. })
            ));
        }
        other => panic!("Expected start failure, got {:?}", other),
    }

    // The listener before the failure keeps running, the one after never starts
    assert_eq!(manager.listeners().len(), 1);
    assert_eq!(manager.listeners()[0].state(), ListenerState::Started);

    manager.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_receiver_surfaces_start_failure() {
    let held = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = held.local_addr().unwrap().port();
    let config = Config {
        listeners: vec![listener(i64::from(port))],
    };
    let factory = ReceiverFactory::new(decoders(), Arc::new(CollectingConsumer::new()));
    let mut receiver = factory.create_receiver("netflow/busy", config).unwrap();

    let err = receiver.start().await.unwrap_err();
    assert!(matches!(
        err,
        ReceiverError::Manager(ManagerError::StartFailed { index: 0, .. })
    ));
    assert!(receiver.listeners().is_empty());
    receiver.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_listener_state_transitions() {
    let mut listener = FlowListener::new(
        listener(0),
        decoders(),
        Arc::new(CollectingConsumer::new()),
    );
    assert_eq!(listener.state(), ListenerState::Created);
    assert!(listener.local_addrs().is_empty());

    listener.start().await.unwrap();
    assert_eq!(listener.state(), ListenerState::Started);
    assert_eq!(listener.local_addrs().len(), 1);
    assert_ne!(listener.local_addrs()[0].port(), 0);

    assert!(matches!(
        listener.start().await,
        Err(ListenerError::InvalidState(ListenerState::Started))
    ));

    listener.shutdown().await.unwrap();
    assert_eq!(listener.state(), ListenerState::Stopped);
    listener.shutdown().await.unwrap();
    assert_eq!(listener.state(), ListenerState::Stopped);
}

#[tokio::test]
async fn test_missing_decoder_fails_before_binding() {
    let port = free_port();
    let config = ListenerConfig {
        scheme: "sflow".to_string(),
        ..listener(i64::from(port))
    };
    let mut listener = FlowListener::new(config, decoders(), Arc::new(CollectingConsumer::new()));

    assert!(matches!(
        listener.start().await,
        Err(ListenerError::NoDecoder(Scheme::Sflow))
    ));
    assert!(std::net::UdpSocket::bind(("127.0.0.1", port)).is_ok());
}
