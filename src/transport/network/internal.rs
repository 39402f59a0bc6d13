//! # Internal helper module for network connections
//! This module contains functionality to establish stream based connectons through network

use crate::core::config::TransportConfiguration;
use crate::core::message::PeerId;
use crate::core::queue::InwardQueue;
use crate::core::socket::{OpFlag, PeerIdentification, SocketError};
use crate::core::stream::{HeadedOperation, State, StreamOperationWriter, StreamSerializableReader};
use crate::core::transport::{
    AcceptorTransport, InitiatorTransport, Inward, ModelId, NetworkAddress, Operation, PeerEvent,
    Transport, TransportMethod,
};
use crate::core::util::thread::{Semaphore, Sleeper};
use crate::core::util::time::{DurationBackoffWithDebounce, LinearDurationBackoff};
use crate::transport::peers::{Connection, PeerTable};

use std::collections::HashSet;
use std::io;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

const READ_BATCH_SIZE: usize = 8 * 1024;

fn query_acceptor_thread_default_duration_backoff(
) -> DurationBackoffWithDebounce<LinearDurationBackoff> {
    DurationBackoffWithDebounce::new(
        LinearDurationBackoff::new(Duration::from_millis(0), Duration::from_millis(50), 10),
        100,
    )
}

pub trait NetworkStream: Read + Write + Send + Sync + Sized + 'static {
    fn try_clone_stream(&self) -> io::Result<Self>;
    /// Shut both directions down, waking up a reader blocked on another handle
    fn shutdown_stream(&self);
}

pub trait NetworkListener: Send + Sync + Sized + 'static {
    type Stream: NetworkStream;

    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;
}

pub trait NetworkListenerBuilder: Send + Sync + Sized + Clone + 'static {
    type Listener: NetworkListener;
    /// Bind a listener whose `accept` does not block
    fn bind(&self, addr: &NetworkAddress) -> io::Result<Self::Listener>;
}

pub trait NetworkStreamConnectionBuilder: Send + Sync + Sized + Clone + 'static {
    type Stream: NetworkStream;

    fn connect(
        &self,
        config: &TransportConfiguration,
        addr: &NetworkAddress,
    ) -> Result<Self::Stream, SocketError>;

    fn accept_connection(
        &self,
        config: &TransportConfiguration,
        stream: Self::Stream,
    ) -> Result<Self::Stream, SocketError>;
}

/// An established stream. Operations go through a bounded queue to a writer thread, so a
/// peer that stops reading only ever stalls its own writer.
struct StreamConnection<Stream: NetworkStream> {
    stream: Stream,
    outbound: Option<SyncSender<Operation>>,
    stop_semaphore: Semaphore,
    reader_thread: Option<thread::JoinHandle<()>>,
    writer_thread: Option<thread::JoinHandle<()>>,
}

impl<Stream: NetworkStream> Connection for StreamConnection<Stream> {
    /// Queue `operation` for the writer thread. A full queue reports [`SocketError::Timeout`]
    fn send(&mut self, operation: Operation) -> Result<(), SocketError> {
        let outbound = self.outbound.as_ref().ok_or(SocketError::Disconnected)?;
        outbound.try_send(operation).map_err(|err| match err {
            TrySendError::Full(_) => SocketError::Timeout,
            TrySendError::Disconnected(_) => SocketError::Disconnected,
        })
    }

    /// Queued operations are written out before the stream is shut down
    fn close(mut self) {
        drop(self.outbound.take());
        if let Some(writer_thread) = self.writer_thread.take() {
            let _ = writer_thread.join();
        }
        self.stop_semaphore.signal();
        self.stream.shutdown_stream();
        if let Some(reader_thread) = self.reader_thread.take() {
            let _ = reader_thread.join();
        }
    }
}

fn writer_loop<Stream: NetworkStream>(
    mut stream: Stream,
    peer_id: PeerId,
    outbound: Receiver<Operation>,
) {
    let mut writer = StreamOperationWriter::new();
    for operation in outbound {
        if let Err(err) = writer.write_into(&mut stream, operation) {
            debug!(peer = %peer_id, error = %err, "write failed, shutting connection down");
            stream.shutdown_stream();
            return;
        }
    }
}

fn reader_loop<Stream: NetworkStream>(
    mut stream: Stream,
    peer_id: PeerId,
    queue: InwardQueue,
    stop_semaphore: Semaphore,
    max_frame_size: usize,
) {
    let mut reader = StreamSerializableReader::new(READ_BATCH_SIZE, max_frame_size);
    while !stop_semaphore.is_signaled() {
        match reader.read_into::<HeadedOperation, _>(&mut stream) {
            Ok(frames) => {
                for frame in frames {
                    let (header, operation) = frame.into_parts();
                    if !header.compatible() {
                        warn!(peer = %peer_id, "incompatible stream header version");
                        return finish_reader(&stream, peer_id, &queue, &stop_semaphore);
                    }
                    trace!(peer = %peer_id, sequence = header.sequence(), "operation received");
                    if queue.push(Inward::received(peer_id, operation)).is_err() {
                        return;
                    }
                }
            }
            Err(State::Empty) | Err(State::Remainder) => (),
            Err(State::Closed) => {
                debug!(peer = %peer_id, "peer closed the connection");
                break;
            }
            Err(State::Stream(err)) => {
                debug!(peer = %peer_id, error = %err, "connection failed");
                break;
            }
        }
    }
    finish_reader(&stream, peer_id, &queue, &stop_semaphore)
}

fn finish_reader<Stream: NetworkStream>(
    stream: &Stream,
    peer_id: PeerId,
    queue: &InwardQueue,
    stop_semaphore: &Semaphore,
) {
    if !stop_semaphore.is_signaled() {
        stream.shutdown_stream();
        let _ = queue.push(Inward::disconnected(peer_id));
    }
}

struct NetworkShared<Stream: NetworkStream> {
    peers: Mutex<PeerTable<StreamConnection<Stream>>>,
    queue: InwardQueue,
    model: Mutex<Option<ModelId>>,
    config: TransportConfiguration,
}

impl<Stream: NetworkStream> NetworkShared<Stream> {
    fn new(config: TransportConfiguration) -> Self {
        Self {
            peers: Mutex::new(PeerTable::new()),
            queue: InwardQueue::new(config.queue_policy),
            model: Mutex::new(None),
            config,
        }
    }

    /// Register a freshly opened stream: send the handshake, start its reader and make it
    /// reachable. The table stays locked until the connection is registered so a disconnect
    /// event of the new peer cannot be processed before it.
    fn establish(
        &self,
        stream: Stream,
        address: Option<TransportMethod>,
    ) -> Result<PeerId, SocketError> {
        let peer_id = PeerId::new_random();
        let reader_stream = stream.try_clone_stream()?;
        let writer_stream = stream.try_clone_stream()?;
        let (outbound, pending) = sync_channel(self.config.send_queue_size.max(1));
        let writer_thread = thread::Builder::new()
            .name(format!("patternmq-writer-{}", peer_id))
            .spawn(move || writer_loop(writer_stream, peer_id, pending))
            .map_err(|err| SocketError::Internal(err.to_string()))?;
        let mut connection = StreamConnection {
            stream,
            outbound: Some(outbound),
            stop_semaphore: Semaphore::new(),
            reader_thread: None,
            writer_thread: Some(writer_thread),
        };
        let model = *self.model.lock().map_err(SocketError::poisoned)?;
        if let Some(model_id) = model {
            connection.send(Operation::Handshake(model_id))?;
        }

        let mut peers = self.peers.lock().map_err(SocketError::poisoned)?;
        let queue = self.queue.clone();
        let stop_semaphore = connection.stop_semaphore.clone();
        let max_frame_size = self.config.max_frame_size;
        connection.reader_thread = Some(
            thread::Builder::new()
                .name(format!("patternmq-reader-{}", peer_id))
                .spawn(move || {
                    reader_loop(reader_stream, peer_id, queue, stop_semaphore, max_frame_size)
                })
                .map_err(|err| SocketError::Internal(err.to_string()))?,
        );
        peers.insert(peer_id, address, connection);
        Ok(peer_id)
    }
}

struct ListenerHandle {
    address: SocketAddr,
    stop_semaphore: Semaphore,
    thread: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    fn stop(mut self) {
        self.stop_semaphore.signal();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub struct NetworkConnectionListener<Listener, ConnectionBuilder>
where
    Listener: NetworkListener,
    ConnectionBuilder: NetworkStreamConnectionBuilder<Stream = Listener::Stream>,
{
    shared: Arc<NetworkShared<Listener::Stream>>,
    listener: Listener,
    connection_builder: ConnectionBuilder,
}

impl<Listener, ConnectionBuilder> NetworkConnectionListener<Listener, ConnectionBuilder>
where
    Listener: NetworkListener,
    ConnectionBuilder: NetworkStreamConnectionBuilder<Stream = Listener::Stream>,
{
    fn accept_one(&self, stream: Listener::Stream, incoming_addr: SocketAddr) {
        let address = TransportMethod::Network(NetworkAddress::from_socket_addr(incoming_addr));
        match self
            .connection_builder
            .accept_connection(&self.shared.config, stream)
            .and_then(|stream| self.shared.establish(stream, Some(address)))
        {
            Ok(peer_id) => debug!(peer = %peer_id, remote = %incoming_addr, "connection accepted"),
            Err(err) => warn!(remote = %incoming_addr, error = %err, "could not accept connection"),
        }
    }

    pub fn main_loop(self, stop_semaphore: Semaphore) {
        let mut sleeper = Sleeper::new(query_acceptor_thread_default_duration_backoff());
        while !stop_semaphore.is_signaled() {
            match self.listener.accept() {
                Ok((stream, incoming_addr)) => {
                    self.accept_one(stream, incoming_addr);
                    sleeper.reset();
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => sleeper.sleep(),
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    sleeper.sleep();
                }
            }
        }
    }
}

/// Stream transport able to both bind listeners and connect to remote listeners
pub struct NetworkTransport<ListenerBuilder, ConnectionBuilder>
where
    ListenerBuilder: NetworkListenerBuilder,
    ConnectionBuilder: NetworkStreamConnectionBuilder<
        Stream = <ListenerBuilder::Listener as NetworkListener>::Stream,
    >,
{
    shared: Arc<NetworkShared<ConnectionBuilder::Stream>>,
    listeners: Vec<ListenerHandle>,
    listener_builder: ListenerBuilder,
    connection_builder: ConnectionBuilder,
}

impl<ListenerBuilder, ConnectionBuilder> NetworkTransport<ListenerBuilder, ConnectionBuilder>
where
    ListenerBuilder: NetworkListenerBuilder,
    ConnectionBuilder: NetworkStreamConnectionBuilder<
        Stream = <ListenerBuilder::Listener as NetworkListener>::Stream,
    >,
{
    pub fn new(connection_builder: ConnectionBuilder, listener_builder: ListenerBuilder) -> Self {
        Self::with_configuration(
            connection_builder,
            listener_builder,
            TransportConfiguration::new(),
        )
    }

    pub fn with_configuration(
        connection_builder: ConnectionBuilder,
        listener_builder: ListenerBuilder,
        config: TransportConfiguration,
    ) -> Self {
        Self {
            shared: Arc::new(NetworkShared::new(config)),
            listeners: Vec::new(),
            listener_builder,
            connection_builder,
        }
    }

    /// Addresses of the listeners, useful after binding port 0
    pub fn local_addresses(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|handle| handle.address).collect()
    }

    fn shutdown(&mut self) {
        for listener in self.listeners.drain(..) {
            listener.stop();
        }
        let connections = match self.shared.peers.lock() {
            Ok(mut peers) => peers.drain(),
            Err(_) => Vec::new(),
        };
        for connection in connections {
            connection.close();
        }
    }
}

impl<ListenerBuilder, ConnectionBuilder> Transport
    for NetworkTransport<ListenerBuilder, ConnectionBuilder>
where
    ListenerBuilder: NetworkListenerBuilder,
    ConnectionBuilder: NetworkStreamConnectionBuilder<
        Stream = <ListenerBuilder::Listener as NetworkListener>::Stream,
    >,
{
    fn announce_model(&mut self, model_id: ModelId) {
        if let Ok(mut model) = self.shared.model.lock() {
            *model = Some(model_id);
        }
    }

    fn send(&mut self, peer_id: PeerId, operation: Operation) -> Result<(), SocketError> {
        self.shared
            .peers
            .lock()
            .map_err(SocketError::poisoned)?
            .send(peer_id, operation)
    }

    fn receive(&mut self, flags: OpFlag) -> Result<Inward, SocketError> {
        let inward = self.shared.queue.pop(flags)?;
        if inward.event == PeerEvent::Disconnected {
            let connection = self
                .shared
                .peers
                .lock()
                .map_err(SocketError::poisoned)?
                .remove_peer(&inward.peer_id);
            if let Some(connection) = connection {
                connection.close();
            }
        }
        Ok(inward)
    }

    fn close_connection(
        &mut self,
        peer_identification: PeerIdentification,
    ) -> Result<Option<PeerId>, SocketError> {
        let (peer_id, connection) = self
            .shared
            .peers
            .lock()
            .map_err(SocketError::poisoned)?
            .remove(&peer_identification)?;
        connection.close();
        debug!(peer = %peer_id, "connection closed");
        Ok(Some(peer_id))
    }

    fn query_connected_peers(&self) -> HashSet<PeerId> {
        self.shared
            .peers
            .lock()
            .map(|peers| peers.peers())
            .unwrap_or_default()
    }

    fn close(mut self) -> Result<(), SocketError> {
        self.shutdown();
        Ok(())
    }
}

impl<ListenerBuilder, ConnectionBuilder> InitiatorTransport
    for NetworkTransport<ListenerBuilder, ConnectionBuilder>
where
    ListenerBuilder: NetworkListenerBuilder,
    ConnectionBuilder: NetworkStreamConnectionBuilder<
        Stream = <ListenerBuilder::Listener as NetworkListener>::Stream,
    >,
{
    fn connect(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
        let address = match &target {
            TransportMethod::Network(address) => address.clone(),
            _ => return Err(SocketError::InvalidTransportMethod),
        };
        let already_connected = self
            .shared
            .peers
            .lock()
            .map_err(SocketError::poisoned)?
            .is_connected(&target);
        if already_connected {
            return Err(SocketError::AlreadyConnected);
        }

        let stream = self
            .connection_builder
            .connect(&self.shared.config, &address)?;
        let peer_id = self.shared.establish(stream, Some(target.clone()))?;
        debug!(peer = %peer_id, endpoint = %target, "connected");
        Ok(Some(peer_id))
    }
}

impl<ListenerBuilder, ConnectionBuilder> AcceptorTransport
    for NetworkTransport<ListenerBuilder, ConnectionBuilder>
where
    ListenerBuilder: NetworkListenerBuilder,
    ConnectionBuilder: NetworkStreamConnectionBuilder<
        Stream = <ListenerBuilder::Listener as NetworkListener>::Stream,
    >,
{
    fn bind(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
        let address = match &target {
            TransportMethod::Network(address) => address,
            _ => return Err(SocketError::InvalidTransportMethod),
        };
        let listener = self.listener_builder.bind(address)?;
        let local_address = listener.local_addr()?;
        let connection_listener = NetworkConnectionListener {
            shared: self.shared.clone(),
            listener,
            connection_builder: self.connection_builder.clone(),
        };
        let stop_semaphore = Semaphore::new();
        let thread_semaphore = stop_semaphore.clone();
        let thread = thread::Builder::new()
            .name(format!("patternmq-listener-{}", local_address))
            .spawn(move || connection_listener.main_loop(thread_semaphore))
            .map_err(|err| SocketError::Internal(err.to_string()))?;
        self.listeners.push(ListenerHandle {
            address: local_address,
            stop_semaphore,
            thread: Some(thread),
        });
        info!(endpoint = %target, local = %local_address, "listening");
        Ok(None)
    }
}

impl<ListenerBuilder, ConnectionBuilder> Drop
    for NetworkTransport<ListenerBuilder, ConnectionBuilder>
where
    ListenerBuilder: NetworkListenerBuilder,
    ConnectionBuilder: NetworkStreamConnectionBuilder<
        Stream = <ListenerBuilder::Listener as NetworkListener>::Stream,
    >,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
