//! # Relay proxy
//! Forwards frames between two sockets on a single thread: whatever the backend receives is
//! sent through the frontend, whatever the frontend receives is sent through the backend.
//! With an XPUB frontend and an XSUB backend this relays publications downstream and
//! subscriptions upstream.

use crate::core::message::RawMessage;
use crate::core::socket::{BidirectionalSocket, OpFlag, OutwardSocket, SocketError};
use crate::core::transport::TransportMethod;
use crate::core::util::thread::{Shutdown, Sleeper};
use crate::core::util::time;

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

pub const DEFAULT_BATCH_SIZE: usize = 64;
/// Delay between two connection attempts of a capture socket
pub const CAPTURE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// One of the two sockets of a [`Proxy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Frontend,
    Backend,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Frontend => write!(f, "frontend"),
            Side::Backend => write!(f, "backend"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("receiving on the {side} socket failed")]
    Receive {
        side: Side,
        #[source]
        source: SocketError,
    },
    #[error("sending on the {side} socket failed")]
    Send {
        side: Side,
        #[source]
        source: SocketError,
    },
}

/// Frames forwarded by a finished [`Proxy::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStatistics {
    /// Backend to frontend
    pub downstream: u64,
    /// Frontend to backend
    pub upstream: u64,
    /// Transient errors that were logged and skipped
    pub errors: u64,
}

pub struct Proxy<F, B>
where
    F: BidirectionalSocket,
    B: BidirectionalSocket,
{
    frontend: F,
    backend: B,
    capture: Option<Capture>,
    batch_size: usize,
}

/// Socket receiving a copy of every forwarded frame. While `pending` is set the socket is not
/// connected yet and frames are not copied.
struct Capture {
    socket: Box<dyn OutwardSocket>,
    pending: Option<TransportMethod>,
    next_attempt: Instant,
}

impl Capture {
    fn is_connected(&self) -> bool {
        self.pending.is_none()
    }

    /// Connect attempt once the retry interval passed. Returns `false` when the capture has to
    /// be given up.
    fn try_connect(&mut self) -> bool {
        let target = match &self.pending {
            Some(target) if Instant::now() >= self.next_attempt => target.clone(),
            _ => return true,
        };
        match self.socket.connect(target.clone()) {
            Ok(_) => {
                info!(endpoint = %target, "capture connected");
                self.pending = None;
                true
            }
            Err(err) if err.is_fatal() => {
                warn!(endpoint = %target, error = %err, "capture disabled");
                false
            }
            Err(err) => {
                debug!(endpoint = %target, error = %err, "capture not reachable yet");
                self.next_attempt = Instant::now() + CAPTURE_RETRY_INTERVAL;
                true
            }
        }
    }
}

impl<F, B> Proxy<F, B>
where
    F: BidirectionalSocket,
    B: BidirectionalSocket,
{
    /// Takes both sockets already bound or connected
    pub fn new(frontend: F, backend: B) -> Self {
        Self {
            frontend,
            backend,
            capture: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Every forwarded frame is also sent to the already connected `capture`
    pub fn with_capture(mut self, capture: Box<dyn OutwardSocket>) -> Self {
        self.capture = Some(Capture {
            socket: capture,
            pending: None,
            next_attempt: Instant::now(),
        });
        self
    }

    /// Like [`Proxy::with_capture`], but `capture` connects to `endpoint` while the proxy
    /// runs. Frames forwarded before it is connected are not captured.
    pub fn with_capture_at(
        mut self,
        capture: Box<dyn OutwardSocket>,
        endpoint: TransportMethod,
    ) -> Self {
        self.capture = Some(Capture {
            socket: capture,
            pending: Some(endpoint),
            next_attempt: Instant::now(),
        });
        self
    }

    /// Most frames forwarded in one direction before turning to the other one
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Forward until `shutdown` is signaled or a socket fails for good
    pub fn run(&mut self, shutdown: &Shutdown) -> Result<ProxyStatistics, ProxyError> {
        let mut statistics = ProxyStatistics::default();
        let mut sleeper = Sleeper::new(time::polling_backoff());
        info!(batch_size = self.batch_size, "proxy running");
        while !shutdown.is_signaled() {
            if let Some(capture) = self.capture.as_mut() {
                if !capture.try_connect() {
                    self.capture = None;
                }
            }
            let mut pump = Pump {
                capture: &mut self.capture,
                batch_size: self.batch_size,
                errors: &mut statistics.errors,
            };
            let downstream =
                pump.forward(&mut self.backend, Side::Backend, &mut self.frontend, Side::Frontend)?;
            let upstream =
                pump.forward(&mut self.frontend, Side::Frontend, &mut self.backend, Side::Backend)?;
            statistics.downstream += downstream;
            statistics.upstream += upstream;
            if downstream + upstream == 0 {
                sleeper.sleep();
            } else {
                sleeper.reset();
            }
        }
        info!(
            downstream = statistics.downstream,
            upstream = statistics.upstream,
            errors = statistics.errors,
            "proxy stopped"
        );
        Ok(statistics)
    }

    pub fn close(self) -> Result<(), SocketError> {
        let frontend = self.frontend.close();
        let backend = self.backend.close();
        frontend.and(backend)
    }
}

struct Pump<'a> {
    capture: &'a mut Option<Capture>,
    batch_size: usize,
    errors: &'a mut u64,
}

impl<'a> Pump<'a> {
    /// Forwards at most one batch of frames, returning how many were sent
    fn forward<I, O>(
        &mut self,
        source: &mut I,
        from: Side,
        sink: &mut O,
        to: Side,
    ) -> Result<u64, ProxyError>
    where
        I: BidirectionalSocket,
        O: BidirectionalSocket,
    {
        let mut forwarded = 0;
        for _ in 0..self.batch_size {
            let frame = match source.receive(OpFlag::NoWait) {
                Ok(frame) => frame,
                Err(SocketError::Timeout) => break,
                Err(err) if err.is_fatal() => {
                    return Err(ProxyError::Receive {
                        side: from,
                        source: err,
                    })
                }
                Err(err) => {
                    warn!(side = %from, error = %err, "receive failed");
                    *self.errors += 1;
                    continue;
                }
            };
            self.capture(&frame);
            match sink.send(frame, OpFlag::NoWait) {
                Ok(_) => {
                    trace!(from = %from, to = %to, "frame forwarded");
                    forwarded += 1;
                }
                Err(err) if err.is_fatal() => {
                    return Err(ProxyError::Send {
                        side: to,
                        source: err,
                    })
                }
                Err(err) => {
                    warn!(side = %to, error = %err, "send failed");
                    *self.errors += 1;
                }
            }
        }
        Ok(forwarded)
    }

    fn capture(&mut self, frame: &RawMessage) {
        if let Some(capture) = self.capture.as_mut().filter(|capture| capture.is_connected()) {
            if let Err(err) = capture.socket.send(frame.clone(), OpFlag::NoWait) {
                debug!(error = %err, "capture failed");
                *self.errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Message;
    use crate::core::socket::{InwardSocket, Socket};
    use crate::core::transport::TransportMethod;
    use crate::model::pair::PairSocket;
    use crate::model::pubsub::{PublisherSocket, XPublisherSocket, XSubscriberSocket};
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};

    use std::thread;
    use std::time::Duration;

    fn memory(name: &str) -> TransportMethod {
        TransportMethod::Memory(name.to_string())
    }

    fn relay(
        network: &MemoryNetwork,
        prefix: &str,
    ) -> Proxy<XPublisherSocket<MemoryTransport>, XSubscriberSocket<MemoryTransport>> {
        let mut frontend = XPublisherSocket::new(network.transport());
        frontend.bind(memory(&format!("{}-frontend", prefix))).unwrap();
        let mut backend = XSubscriberSocket::new(network.transport());
        backend.bind(memory(&format!("{}-backend", prefix))).unwrap();
        Proxy::new(frontend, backend)
    }

    #[test]
    fn signaled_shutdown_stops_before_forwarding() {
        let network = MemoryNetwork::new();
        let mut proxy = relay(&network, "stopped");
        let shutdown = Shutdown::new();
        shutdown.signal();
        assert_eq!(proxy.run(&shutdown).unwrap(), ProxyStatistics::default());
        proxy.close().unwrap();
    }

    #[test]
    fn forwarded_frames_are_captured() {
        let network = MemoryNetwork::new();
        let mut capture_server = PairSocket::new(network.transport());
        capture_server.bind(memory("capture")).unwrap();
        let mut capture = PairSocket::new(network.transport());
        capture.connect(memory("capture")).unwrap();

        let mut frontend = XPublisherSocket::new(network.transport());
        frontend.bind(memory("captured-frontend")).unwrap();
        let mut backend = XSubscriberSocket::new(network.transport());
        backend.bind(memory("captured-backend")).unwrap();
        let mut subscriber = XSubscriberSocket::new(network.transport());
        subscriber.connect(memory("captured-frontend")).unwrap();
        subscriber
            .send(RawMessage::from(&[1u8][..]), OpFlag::NoWait)
            .unwrap();

        let shutdown = Shutdown::new();
        let stop = shutdown.clone();
        let proxy = thread::spawn(move || {
            let mut proxy = Proxy::new(frontend, backend)
                .with_capture(Box::new(capture))
                .with_batch_size(4);
            proxy.run(&stop)
        });

        let frame = capture_server
            .receive(OpFlag::Timeout(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(frame.payload(), &vec![1u8]);
        shutdown.signal();
        let statistics = proxy.join().unwrap().unwrap();
        assert_eq!(statistics.upstream, 1);
        assert_eq!(statistics.downstream, 0);
    }

    #[test]
    fn forwarding_does_not_wait_for_the_capture() {
        let network = MemoryNetwork::new();
        let relay = relay(&network, "late");
        let capture = PairSocket::new(network.transport());
        let mut subscriber = XSubscriberSocket::new(network.transport());
        subscriber.connect(memory("late-frontend")).unwrap();
        let mut publisher = PublisherSocket::new(network.transport());
        publisher.connect(memory("late-backend")).unwrap();

        let shutdown = Shutdown::new();
        let stop = shutdown.clone();
        let proxy = thread::spawn(move || {
            let mut proxy = relay.with_capture_at(Box::new(capture), memory("late-capture"));
            proxy.run(&stop)
        });

        subscriber
            .send(RawMessage::from(&[1u8][..]), OpFlag::NoWait)
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while publisher.subscribed_peer_count().unwrap() == 0 {
            assert!(Instant::now() < deadline, "subscription was not relayed");
            thread::sleep(Duration::from_millis(5));
        }

        let mut capture_server = PairSocket::new(network.transport());
        capture_server.bind(memory("late-capture")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let captured = loop {
            assert!(Instant::now() < deadline, "capture never connected");
            publisher
                .send(RawMessage::from("after"), OpFlag::NoWait)
                .unwrap();
            if let Ok(frame) = capture_server.receive(OpFlag::Timeout(Duration::from_millis(20))) {
                break frame;
            }
        };
        assert_eq!(captured.payload_lossy(), "after");

        shutdown.signal();
        let statistics = proxy.join().unwrap().unwrap();
        assert_eq!(statistics.upstream, 1);
        assert!(statistics.downstream >= 1);
    }
}
