//! Datagram to log event tests
//!
//! Real UDP traffic through listeners, checked at the consumer

use crate::integration::{CollectingConsumer, NetflowV5Decoder, NetflowV5Packet, V5Record};
use netflow_receiver::{
    Config, DecoderSet, ListenerConfig, ListenerManager, ReceiverFactory, Scheme,
};
use rstest::rstest;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::net::UdpSocket;

const WAIT: Duration = Duration::from_secs(5);

fn netflow_decoders() -> DecoderSet {
    DecoderSet::new().with(Scheme::Netflow, Arc::new(NetflowV5Decoder))
}

fn listener(scheme: &str, port: i64) -> ListenerConfig {
    ListenerConfig {
        scheme: scheme.to_string(),
        hostname: "127.0.0.1".to_string(),
        port,
        sockets: 1,
        workers: 2,
        queue_size: 100,
    }
}

async fn send(target: SocketAddr, payload: &[u8]) {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(payload, target).await.unwrap();
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_netflow_v5_end_to_end_on_default_port() {
    let consumer = Arc::new(CollectingConsumer::new());
    let factory = ReceiverFactory::new(netflow_decoders(), consumer.clone());
    let config = Config {
        listeners: vec![ListenerConfig {
            workers: 1,
            queue_size: 1000,
            ..listener("netflow", 2055)
        }],
    };
    let mut receiver = factory.create_receiver("netflow/e2e", config).unwrap();
    receiver.start().await.unwrap();

    let packet = NetflowV5Packet::new()
        .sequence(100)
        .record(V5Record::tcp([10, 0, 0, 1], [10, 0, 0, 2], 1500, 10))
        .record(V5Record::tcp([10, 0, 0, 3], [192, 168, 1, 1], 64, 1).with_protocol(17));
    send("127.0.0.1:2055".parse().unwrap(), &packet.encode()).await;

    let events = consumer.wait_for(2, WAIT).await;
    assert_eq!(events.len(), 2, "Both records should be delivered");
    assert_eq!(consumer.batches(), 1, "One datagram is one batch");

    let first = &events[0].body;
    assert_eq!(first["io"]["bytes"], 1500);
    assert_eq!(first["io"]["packets"], 10);
    assert_eq!(first["network"]["transport"], "TCP");
    assert_eq!(first["network"]["iana_number"], 6);
    assert_eq!(first["network"]["type"], "IPv4");
    assert_eq!(first["source"]["address"], "10.0.0.1");
    assert_eq!(first["source"]["port"], 49152);
    assert_eq!(first["destination"]["address"], "10.0.0.2");
    assert_eq!(first["destination"]["port"], 443);
    assert_eq!(first["flow"]["type"], "NETFLOW_V5");
    assert_eq!(first["flow"]["sequence_num"], 100);
    assert_eq!(first["flow"]["sampler_address"], "127.0.0.1");

    let second = &events[1].body;
    assert_eq!(second["io"]["bytes"], 64);
    assert_eq!(second["io"]["packets"], 1);
    assert_eq!(second["network"]["transport"], "UDP");
    assert_eq!(second["flow"]["sequence_num"], 101);

    let event = &events[0];
    assert_eq!(event.scope_name, "netflow-receiver");
    assert_eq!(event.resource_attributes["receiver.type"], "netflow");
    assert_eq!(event.resource_attributes["listener.scheme"], "netflow");
    assert_eq!(event.resource_attributes["listener.address"], "127.0.0.1:2055");

    let start_ns = event.timestamp.duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64;
    assert_eq!(start_ns, packet.boot_ns() + 1_000 * 1_000_000);
    assert!(event.observed_timestamp > event.timestamp);

    receiver.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_generic_flow_listener_detects_netflow() {
    let consumer = Arc::new(CollectingConsumer::new());
    let mut manager = ListenerManager::new();
    manager
        .start_all(&[listener("flow", 0)], &netflow_decoders(), consumer.clone())
        .await
        .unwrap();
    let target = manager.listeners()[0].local_addrs()[0];

    // sFlow header with no sFlow decoder registered: reported, not delivered
    send(target, &[0, 0, 0, 5, 0, 0, 0, 1]).await;
    let packet = NetflowV5Packet::new().record(V5Record::tcp([10, 1, 1, 1], [10, 2, 2, 2], 800, 4));
    send(target, &packet.encode()).await;

    let events = consumer.wait_for(1, WAIT).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].resource_attributes["listener.scheme"], "flow");
    assert_eq!(events[0].body["io"]["bytes"], 800);

    manager.shutdown_all().await.unwrap();
}

// ============================================================================
// Listener isolation
// ============================================================================

#[tokio::test]
async fn test_each_listener_labels_its_own_events() {
    let consumer = Arc::new(CollectingConsumer::new());
    let mut manager = ListenerManager::new();
    manager
        .start_all(
            &[listener("netflow", 0), listener("netflow", 0)],
            &netflow_decoders(),
            consumer.clone(),
        )
        .await
        .unwrap();

    for (i, l) in manager.listeners().iter().enumerate() {
        let packet = NetflowV5Packet::new()
            .record(V5Record::tcp([10, 0, 0, i as u8 + 1], [10, 9, 9, 9], 100, 1));
        send(l.local_addrs()[0], &packet.encode()).await;
    }

    let events = consumer.wait_for(2, WAIT).await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.resource_attributes["listener.address"] == "127.0.0.1:0"));

    let mut sources: Vec<String> = events
        .iter()
        .map(|e| e.body["source"]["address"].as_str().unwrap().to_string())
        .collect();
    sources.sort();
    assert_eq!(sources, vec!["10.0.0.1", "10.0.0.2"]);

    manager.shutdown_all().await.unwrap();
}

#[rstest]
#[case(1, 1)]
#[case(1, 4)]
#[case(2, 2)]
#[tokio::test]
async fn test_every_datagram_delivered(#[case] sockets: i64, #[case] workers: i64) {
    let consumer = Arc::new(CollectingConsumer::new());
    let mut manager = ListenerManager::new();
    let config = ListenerConfig {
        sockets,
        workers,
        ..listener("netflow", 0)
    };
    manager
        .start_all(&[config], &netflow_decoders(), consumer.clone())
        .await
        .unwrap();

    let addrs = manager.listeners()[0].local_addrs().to_vec();
    assert_eq!(addrs.len(), sockets as usize);
    assert!(addrs.iter().all(|a| a.port() == addrs[0].port()));

    for seq in 0..20u32 {
        let packet = NetflowV5Packet::new()
            .sequence(seq)
            .record(V5Record::tcp([10, 0, 0, 1], [10, 0, 0, 2], 40, 1));
        send(addrs[0], &packet.encode()).await;
    }

    let events = consumer.wait_for(20, WAIT).await;
    assert_eq!(events.len(), 20);

    let mut sequences: Vec<u64> = events
        .iter()
        .map(|e| e.body["flow"]["sequence_num"].as_u64().unwrap_or(0))
        .collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (0..20).collect::<Vec<u64>>());

    manager.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_undecodable_datagrams_do_not_stop_listener() {
    let consumer = Arc::new(CollectingConsumer::new());
    let mut manager = ListenerManager::new();
    manager
        .start_all(&[listener("netflow", 0)], &netflow_decoders(), consumer.clone())
        .await
        .unwrap();
    let target = manager.listeners()[0].local_addrs()[0];

    send(target, b"garbage").await;
    send(target, &[0, 9, 0, 1]).await;
    let packet = NetflowV5Packet::new().record(V5Record::tcp([10, 0, 0, 1], [10, 0, 0, 2], 1, 1));
    send(target, &packet.encode()).await;

    let events = consumer.wait_for(1, WAIT).await;
    assert_eq!(events.len(), 1);

    manager.shutdown_all().await.unwrap();
}
