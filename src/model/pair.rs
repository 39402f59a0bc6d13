//! # Exclusive pair socket
//! Connects exactly two endpoints. A pair socket talks to the first compatible peer that
//! completes its handshake; later peers are disconnected until that one leaves.

use super::common::{reject_peer, InwardProcessor, PeerTracker};
use super::PAIR_MODELID;
use crate::core::message::{Message, MessageMetadata, PeerId, RawMessage};
use crate::core::socket::{
    BidirectionalSocket, InwardSocket, OpFlag, OutwardSocket, PeerIdentification, Socket,
    SocketError,
};
use crate::core::transport::{
    BidirectionalTransport, Inward, Operation, PeerEvent, TransportMethod,
};

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

pub struct PairSocket<T: BidirectionalTransport> {
    channel: T,
    tracker: PeerTracker,
    deliverable: VecDeque<RawMessage>,
}

impl<T> PairSocket<T>
where
    T: BidirectionalTransport,
{
    pub fn new(mut transport: T) -> Self {
        transport.announce_model(PAIR_MODELID);
        Self {
            channel: transport,
            tracker: PeerTracker::new(&[PAIR_MODELID]),
            deliverable: VecDeque::new(),
        }
    }

    /// The peer currently paired with
    pub fn peer(&self) -> Option<PeerId> {
        self.tracker.ready_peers().first().copied()
    }
}

impl<T> InwardProcessor for PairSocket<T>
where
    T: BidirectionalTransport,
{
    type Channel = T;

    fn channel(&mut self) -> &mut T {
        &mut self.channel
    }

    fn deliverable(&mut self) -> &mut VecDeque<RawMessage> {
        &mut self.deliverable
    }

    fn handle(&mut self, inward: Inward) -> Result<(), SocketError> {
        let Inward { peer_id, event } = inward;
        match event {
            PeerEvent::Received(Operation::Handshake(model_id)) => {
                if !self.tracker.is_compatible(model_id) {
                    return Err(reject_peer(&mut self.channel, peer_id, model_id));
                }
                match self.peer() {
                    Some(paired) if paired != peer_id => {
                        warn!(peer = %peer_id, paired = %paired, "already paired, closing connection");
                        if let Err(err) = self
                            .channel
                            .close_connection(PeerIdentification::PeerId(peer_id))
                        {
                            debug!(peer = %peer_id, error = %err, "closing refused peer failed");
                        }
                    }
                    _ => {
                        if self.tracker.accept(peer_id) {
                            debug!(peer = %peer_id, "paired");
                        }
                    }
                }
            }
            PeerEvent::Received(Operation::Payload(message)) => {
                if self.tracker.is_ready(&peer_id) {
                    self.deliverable.push_back(message.apply_peer_id(peer_id));
                } else {
                    trace!(peer = %peer_id, "frame from unpaired peer dropped");
                }
            }
            PeerEvent::Received(_) => trace!(peer = %peer_id, "operation ignored"),
            PeerEvent::Disconnected => {
                if self.tracker.remove(&peer_id) {
                    debug!(peer = %peer_id, "pair peer gone");
                }
            }
        }
        Ok(())
    }
}

impl<T> Socket for PairSocket<T>
where
    T: BidirectionalTransport,
{
    fn connect(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
        self.process_queued_events()?;
        if self.peer().is_some() {
            return Err(SocketError::AlreadyConnected);
        }
        self.channel.connect(target)
    }

    fn bind(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
        self.channel.bind(target)
    }

    fn close_connection(
        &mut self,
        peer_identification: PeerIdentification,
    ) -> Result<(), SocketError> {
        if let Some(peer_id) = self.channel.close_connection(peer_identification)? {
            self.tracker.remove(&peer_id);
        }
        Ok(())
    }

    fn close(self) -> Result<(), SocketError> {
        self.channel.close()
    }
}

impl<T> OutwardSocket for PairSocket<T>
where
    T: BidirectionalTransport,
{
    /// Send to the paired peer. `Wait` and `Timeout` wait for a peer to complete its
    /// handshake, `NoWait` reports [`SocketError::UnknownPeer`] when there is none.
    fn send(&mut self, message: RawMessage, flags: OpFlag) -> Result<MessageMetadata, SocketError> {
        match self.process_until(flags, |socket| socket.peer().is_some()) {
            Err(SocketError::Timeout) if flags == OpFlag::NoWait => {
                return Err(SocketError::UnknownPeer)
            }
            result => result?,
        }
        let peer_id = self.peer().ok_or(SocketError::UnknownPeer)?;
        self.channel
            .send(peer_id, Operation::Payload(message.clone()))?;
        trace!(peer = %peer_id, "frame sent");
        Ok(message.apply_peer_id(peer_id).into_metadata())
    }
}

impl<T> InwardSocket for PairSocket<T>
where
    T: BidirectionalTransport,
{
    fn receive(&mut self, flags: OpFlag) -> Result<RawMessage, SocketError> {
        self.next_deliverable(flags)
    }
}

impl<T> BidirectionalSocket for PairSocket<T> where T: BidirectionalTransport {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::reqrep::RequestSocket;
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};

    use std::thread;
    use std::time::Duration;

    fn memory(name: &str) -> TransportMethod {
        TransportMethod::Memory(name.to_string())
    }

    fn server(network: &MemoryNetwork, name: &str) -> PairSocket<MemoryTransport> {
        let mut server = PairSocket::new(network.transport());
        server.bind(memory(name)).unwrap();
        server
    }

    #[test]
    fn pair_exchanges_frames_both_ways() {
        let network = MemoryNetwork::new();
        let mut server = server(&network, "pair");
        let mut client = PairSocket::new(network.transport());
        client.connect(memory("pair")).unwrap();

        server
            .send(RawMessage::from("Hello from server!"), OpFlag::NoWait)
            .unwrap();
        let received = client.receive(OpFlag::NoWait).unwrap();
        assert_eq!(received.payload_lossy(), "Hello from server!");

        client.send(RawMessage::from("back"), OpFlag::NoWait).unwrap();
        assert_eq!(server.receive(OpFlag::NoWait).unwrap().payload_lossy(), "back");
    }

    #[test]
    fn send_without_peer() {
        let network = MemoryNetwork::new();
        let mut server = server(&network, "lonely");
        assert_eq!(
            server.send(RawMessage::from("x"), OpFlag::NoWait),
            Err(SocketError::UnknownPeer)
        );
        assert_eq!(
            server.send(
                RawMessage::from("x"),
                OpFlag::Timeout(Duration::from_millis(20))
            ),
            Err(SocketError::Timeout)
        );
    }

    #[test]
    fn waiting_send_completes_once_a_peer_arrives() {
        let network = MemoryNetwork::new();
        let mut server = server(&network, "late");
        let client_network = network.clone();
        let client = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let mut client = PairSocket::new(client_network.transport());
            client.connect(memory("late")).unwrap();
            client.receive(OpFlag::Timeout(Duration::from_secs(5)))
        });

        server.send(RawMessage::from("finally"), OpFlag::Wait).unwrap();

        let received = client.join().unwrap().unwrap();
        assert_eq!(received.payload_lossy(), "finally");
    }

    #[test]
    fn second_peer_is_refused() {
        let network = MemoryNetwork::new();
        let mut server = server(&network, "exclusive");
        let mut first = PairSocket::new(network.transport());
        first.connect(memory("exclusive")).unwrap();
        let mut second = PairSocket::new(network.transport());
        second.connect(memory("exclusive")).unwrap();

        server.send(RawMessage::from("only you"), OpFlag::NoWait).unwrap();

        assert_eq!(first.receive(OpFlag::NoWait).unwrap().payload_lossy(), "only you");
        assert_eq!(second.receive(OpFlag::NoWait), Err(SocketError::Timeout));
        assert_eq!(second.peer(), None);
        assert_eq!(
            first.connect(memory("exclusive")),
            Err(SocketError::AlreadyConnected)
        );
    }

    #[test]
    fn incompatible_peer_is_reported() {
        let network = MemoryNetwork::new();
        let mut server = server(&network, "mismatch");
        let mut requester = RequestSocket::new(network.transport());
        requester.connect(memory("mismatch")).unwrap();
        assert_eq!(
            server.receive(OpFlag::NoWait),
            Err(SocketError::IncompatiblePeer)
        );
    }
}
