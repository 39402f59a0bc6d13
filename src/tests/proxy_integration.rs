use super::common::*;
use crate::app::config::{ProducerConfig, ProxyConfig, SubscriberConfig};
use crate::app::{roles, AppError};
use crate::core::message::{Message, RawMessage};
use crate::core::socket::{InwardSocket, OpFlag, OutwardSocket, Socket, SocketError};
use crate::core::transport::{TransportFactory, TransportMethod};
use crate::core::util::thread::Shutdown;
use crate::model::pubsub::{PublisherSocket, SubscriberSocket};
use crate::model::reqrep::RequestSocket;
use crate::proxy::ProxyStatistics;
use crate::transport::memory::{MemoryNetwork, MemoryTransport};
use crate::transport::network::tcp::TcpTransportFactory;

use std::collections::HashMap;
use std::thread::{self, JoinHandle};

fn memory_config(name: &str) -> ProxyConfig {
    ProxyConfig {
        frontend: format!("inproc://{}-frontend", name),
        backend: format!("inproc://{}-backend", name),
        ..ProxyConfig::default()
    }
}

fn spawn_proxy<F>(
    factory: F,
    config: ProxyConfig,
    shutdown: &Shutdown,
) -> JoinHandle<Result<ProxyStatistics, AppError>>
where
    F: TransportFactory + Send + 'static,
{
    let shutdown = shutdown.clone();
    thread::spawn(move || roles::run_proxy(&factory, &config, &shutdown))
}

/// Connects to an endpoint the proxy thread may not have bound yet
fn connect_when_bound<S: Socket>(socket: &mut S, endpoint: &str) {
    let target: TransportMethod = endpoint.parse().unwrap();
    assert!(wait_until(|| socket.connect(target.clone()).is_ok()));
}

fn memory_producer(network: &MemoryNetwork, config: &ProxyConfig) -> PublisherSocket<MemoryTransport> {
    let mut producer = PublisherSocket::new(network.transport());
    connect_when_bound(&mut producer, &config.backend);
    producer
}

fn memory_subscriber(network: &MemoryNetwork, config: &ProxyConfig) -> SubscriberSocket<MemoryTransport> {
    let mut subscriber = SubscriberSocket::new(network.transport());
    connect_when_bound(&mut subscriber, &config.frontend);
    subscriber.subscribe(b"").unwrap();
    subscriber
}

#[test]
fn producer_frame_is_delivered_exactly_once() {
    let network = MemoryNetwork::new();
    let config = memory_config("once");
    let shutdown = Shutdown::new();
    let proxy = spawn_proxy(network.clone(), config.clone(), &shutdown);
    let mut subscriber = memory_subscriber(&network, &config);
    let mut producer = memory_producer(&network, &config);
    assert!(wait_until(|| producer.subscribed_peer_count().unwrap() == 1));

    producer
        .send(RawMessage::from("1 1690000000 Hello from producer!"), OpFlag::NoWait)
        .unwrap();

    let frame = subscriber.receive(RECEIVE_TIMEOUT).unwrap();
    assert_eq!(frame.payload(), b"1 1690000000 Hello from producer!");
    assert_eq!(subscriber.receive(SILENCE), Err(SocketError::Timeout));

    shutdown.signal();
    let statistics = proxy.join().unwrap().unwrap();
    assert_eq!(statistics.downstream, 1);
    assert_eq!(statistics.upstream, 1);
}

#[test]
fn frames_of_two_producers_keep_their_order() {
    const FRAMES: usize = 50;
    let network = MemoryNetwork::new();
    let config = memory_config("fifo");
    let shutdown = Shutdown::new();
    let proxy = spawn_proxy(network.clone(), config.clone(), &shutdown);
    let mut subscriber = memory_subscriber(&network, &config);
    let mut first = memory_producer(&network, &config);
    let mut second = memory_producer(&network, &config);
    assert!(wait_until(|| first.subscribed_peer_count().unwrap() == 1
        && second.subscribed_peer_count().unwrap() == 1));

    for index in 0..FRAMES {
        first
            .send(RawMessage::from(format!("a {}", index)), OpFlag::NoWait)
            .unwrap();
        second
            .send(RawMessage::from(format!("b {}", index)), OpFlag::NoWait)
            .unwrap();
    }

    let mut received: HashMap<String, Vec<usize>> = HashMap::new();
    for _ in 0..2 * FRAMES {
        let frame = subscriber.receive(RECEIVE_TIMEOUT).unwrap();
        let text = frame.payload_lossy();
        let (producer, index) = text.split_once(' ').unwrap();
        received
            .entry(producer.to_string())
            .or_default()
            .push(index.parse().unwrap());
    }
    let expected: Vec<usize> = (0..FRAMES).collect();
    assert_eq!(received["a"], expected);
    assert_eq!(received["b"], expected);
    assert_eq!(subscriber.receive(SILENCE), Err(SocketError::Timeout));

    shutdown.signal();
    proxy.join().unwrap().unwrap();
}

#[test]
fn reconnecting_subscriber_gets_no_backlog() {
    let network = MemoryNetwork::new();
    let config = memory_config("backlog");
    let shutdown = Shutdown::new();
    let proxy = spawn_proxy(network.clone(), config.clone(), &shutdown);
    let mut producer = memory_producer(&network, &config);

    let mut subscriber = memory_subscriber(&network, &config);
    assert!(wait_until(|| producer.subscribed_peer_count().unwrap() == 1));
    producer.send(RawMessage::from("before"), OpFlag::NoWait).unwrap();
    assert_eq!(subscriber.receive(RECEIVE_TIMEOUT).unwrap().payload(), b"before");

    drop(subscriber);
    assert!(wait_until(|| producer.subscribed_peer_count().unwrap() == 0));
    producer.send(RawMessage::from("while away"), OpFlag::NoWait).unwrap();

    let mut subscriber = memory_subscriber(&network, &config);
    assert!(wait_until(|| producer.subscribed_peer_count().unwrap() == 1));
    producer.send(RawMessage::from("after"), OpFlag::NoWait).unwrap();
    assert_eq!(subscriber.receive(RECEIVE_TIMEOUT).unwrap().payload(), b"after");
    assert_eq!(subscriber.receive(SILENCE), Err(SocketError::Timeout));

    shutdown.signal();
    proxy.join().unwrap().unwrap();
}

#[test]
fn shutdown_signaled_before_start_returns_after_binding() {
    let network = MemoryNetwork::new();
    let shutdown = Shutdown::new();
    shutdown.signal();
    let statistics = roles::run_proxy(&network, &memory_config("stopped"), &shutdown).unwrap();
    assert_eq!(statistics, ProxyStatistics::default());
}

#[test]
fn backend_bind_failure_is_reported_before_forwarding() {
    let network = MemoryNetwork::new();
    let config = memory_config("taken");
    let mut squatter = PublisherSocket::new(network.transport());
    squatter.bind(config.backend.parse().unwrap()).unwrap();

    let result = roles::run_proxy(&network, &config, &Shutdown::new());

    match result {
        Err(AppError::Bind { endpoint, source }) => {
            assert_eq!(endpoint, config.backend);
            assert_eq!(source, SocketError::TransportMethodAlreadyInUse);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn tcp_backend_bind_failure_is_reported_before_forwarding() {
    let squatter = std::net::TcpListener::bind("0.0.0.0:47011").unwrap();
    let config = ProxyConfig {
        frontend: "tcp://*:47010".to_string(),
        backend: "tcp://*:47011".to_string(),
        ..ProxyConfig::default()
    };

    let result = roles::run_proxy(&TcpTransportFactory::default(), &config, &Shutdown::new());

    assert!(matches!(
        result,
        Err(AppError::Bind {
            source: SocketError::TransportMethodAlreadyInUse,
            ..
        })
    ));
    drop(squatter);
}

#[test]
fn tcp_relay_delivers_frames_exactly_once() {
    let factory = TcpTransportFactory::default();
    let config = ProxyConfig {
        frontend: "tcp://*:47020".to_string(),
        backend: "tcp://*:47021".to_string(),
        ..ProxyConfig::default()
    };
    let shutdown = Shutdown::new();
    let proxy = spawn_proxy(factory.clone(), config.clone(), &shutdown);

    let mut subscriber = SubscriberSocket::new(factory.create());
    connect_when_bound(&mut subscriber, "tcp://localhost:47020");
    subscriber.subscribe(b"").unwrap();
    let mut producer = PublisherSocket::new(factory.create());
    connect_when_bound(&mut producer, "tcp://localhost:47021");
    assert!(wait_until(|| {
        pump(&mut subscriber);
        producer.subscribed_peer_count().unwrap() == 1
    }));

    for index in 1..=3 {
        let frame = format!("{} 1690000000 Hello from producer!", index);
        producer.send(RawMessage::from(frame), OpFlag::NoWait).unwrap();
    }

    for index in 1..=3 {
        let frame = subscriber.receive(RECEIVE_TIMEOUT).unwrap();
        assert_eq!(
            frame.payload_lossy(),
            format!("{} 1690000000 Hello from producer!", index)
        );
    }
    assert_eq!(subscriber.receive(SILENCE), Err(SocketError::Timeout));

    shutdown.signal();
    let statistics = proxy.join().unwrap().unwrap();
    assert_eq!(statistics.downstream, 3);
}

#[test]
fn producer_and_subscriber_roles_relay_through_the_proxy() {
    let network = MemoryNetwork::new();
    let config = memory_config("roles");
    let shutdown = Shutdown::new();
    let proxy = spawn_proxy(network.clone(), config.clone(), &shutdown);

    let mut subscriber_config = SubscriberConfig {
        endpoint: config.frontend.clone(),
        ..SubscriberConfig::default()
    };
    subscriber_config.receive.count = Some(3);
    let subscriber_network = network.clone();
    let subscriber_shutdown = shutdown.clone();
    let subscriber = thread::spawn(move || {
        roles::run_subscriber(&subscriber_network, &subscriber_config, &subscriber_shutdown)
    });

    let mut producer_config = ProducerConfig {
        endpoint: config.backend.clone(),
        ..ProducerConfig::default()
    };
    producer_config.periodic.interval_ms = 10;
    let producer_network = network.clone();
    let producer_shutdown = shutdown.clone();
    let producer = thread::spawn(move || {
        roles::run_producer(&producer_network, &producer_config, &producer_shutdown)
    });

    assert_eq!(subscriber.join().unwrap().unwrap(), 3);
    shutdown.signal();
    assert!(producer.join().unwrap().unwrap() >= 3);
    assert!(proxy.join().unwrap().unwrap().downstream >= 3);
}

#[test]
fn relay_forwards_while_the_capture_endpoint_is_absent() {
    let network = MemoryNetwork::new();
    let config = ProxyConfig {
        capture: Some("inproc://absent-capture".to_string()),
        ..memory_config("uncaptured")
    };
    let shutdown = Shutdown::new();
    let proxy = spawn_proxy(network.clone(), config.clone(), &shutdown);
    let mut subscriber = memory_subscriber(&network, &config);
    let mut producer = memory_producer(&network, &config);
    assert!(wait_until(|| producer.subscribed_peer_count().unwrap() == 1));

    producer
        .send(RawMessage::from("1 1690000000 Hello from producer!"), OpFlag::NoWait)
        .unwrap();

    let frame = subscriber.receive(RECEIVE_TIMEOUT).unwrap();
    assert_eq!(frame.payload(), b"1 1690000000 Hello from producer!");

    shutdown.signal();
    let statistics = proxy.join().unwrap().unwrap();
    assert_eq!(statistics.downstream, 1);
}

#[test]
fn incompatible_peer_is_counted_and_forwarding_goes_on() {
    let network = MemoryNetwork::new();
    let config = memory_config("mismatch");
    let shutdown = Shutdown::new();
    let proxy = spawn_proxy(network.clone(), config.clone(), &shutdown);

    let mut stray = RequestSocket::new(network.transport());
    connect_when_bound(&mut stray, &config.frontend);
    let mut subscriber = memory_subscriber(&network, &config);
    let mut producer = memory_producer(&network, &config);
    assert!(wait_until(|| producer.subscribed_peer_count().unwrap() == 1));

    producer.send(RawMessage::from("still relayed"), OpFlag::NoWait).unwrap();
    assert_eq!(
        subscriber.receive(RECEIVE_TIMEOUT).unwrap().payload(),
        b"still relayed"
    );

    shutdown.signal();
    let statistics = proxy.join().unwrap().unwrap();
    assert!(statistics.errors >= 1);
    assert_eq!(statistics.downstream, 1);
    assert_eq!(statistics.upstream, 1);
}
