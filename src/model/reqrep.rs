//! # Request/reply sockets
//! Both sides strictly alternate between sending and receiving. Requests are spread over the
//! connected reply sockets in turn, replies travel back within the conversation of their
//! request.

use super::common::{reject_peer, InwardProcessor, PeerTracker};
use super::{REPLY_MODELID, REQUEST_MODELID};
use crate::core::message::{ConversationId, Message, MessageMetadata, PeerId, RawMessage};
use crate::core::socket::{
    BidirectionalSocket, InwardSocket, OpFlag, OutwardSocket, PeerIdentification, Socket,
    SocketError,
};
use crate::core::transport::{
    BidirectionalTransport, Inward, Operation, PeerEvent, TransportMethod,
};

use std::collections::VecDeque;

use tracing::{debug, trace};

pub struct RequestSocket<T: BidirectionalTransport> {
    channel: T,
    tracker: PeerTracker,
    outstanding: Option<(PeerId, ConversationId)>,
    deliverable: VecDeque<RawMessage>,
    next_peer: usize,
}

impl<T> RequestSocket<T>
where
    T: BidirectionalTransport,
{
    pub fn new(mut transport: T) -> Self {
        transport.announce_model(REQUEST_MODELID);
        Self {
            channel: transport,
            tracker: PeerTracker::new(&[REPLY_MODELID]),
            outstanding: None,
            deliverable: VecDeque::new(),
            next_peer: 0,
        }
    }

    fn select_peer(&mut self) -> Option<PeerId> {
        let peers = self.tracker.ready_peers();
        if peers.is_empty() {
            return None;
        }
        let index = self.next_peer % peers.len();
        self.next_peer = index + 1;
        Some(peers[index])
    }
}

impl<T> InwardProcessor for RequestSocket<T>
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
                if self.tracker.accept(peer_id) {
                    debug!(peer = %peer_id, "replier ready");
                }
            }
            PeerEvent::Received(Operation::Payload(message)) => {
                let expected = self
                    .outstanding
                    .map(|(peer, conversation)| {
                        peer == peer_id && conversation == *message.conversation_id()
                    })
                    .unwrap_or(false);
                if expected {
                    self.outstanding = None;
                    self.deliverable.push_back(message.apply_peer_id(peer_id));
                } else {
                    trace!(peer = %peer_id, "unexpected reply dropped");
                }
            }
            PeerEvent::Received(_) => trace!(peer = %peer_id, "operation ignored"),
            PeerEvent::Disconnected => {
                self.tracker.remove(&peer_id);
                if matches!(self.outstanding, Some((peer, _)) if peer == peer_id) {
                    self.outstanding = None;
                    debug!(peer = %peer_id, "replier gone before answering");
                    return Err(SocketError::Disconnected);
                }
            }
        }
        Ok(())
    }
}

impl<T> Socket for RequestSocket<T>
where
    T: BidirectionalTransport,
{
    fn connect(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
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
            if matches!(self.outstanding, Some((peer, _)) if peer == peer_id) {
                self.outstanding = None;
            }
        }
        Ok(())
    }

    fn close(self) -> Result<(), SocketError> {
        self.channel.close()
    }
}

impl<T> OutwardSocket for RequestSocket<T>
where
    T: BidirectionalTransport,
{
    /// Send a request to the next replier. `Wait` and `Timeout` wait for a replier to
    /// connect, `NoWait` reports [`SocketError::UnknownPeer`] when there is none.
    fn send(&mut self, message: RawMessage, flags: OpFlag) -> Result<MessageMetadata, SocketError> {
        if self.outstanding.is_some() || !self.deliverable.is_empty() {
            return Err(SocketError::IncorrectStateError);
        }
        match self.process_until(flags, |socket| !socket.tracker.is_empty()) {
            Err(SocketError::Timeout) if flags == OpFlag::NoWait => {
                return Err(SocketError::UnknownPeer)
            }
            result => result?,
        }
        let peer_id = self.select_peer().ok_or(SocketError::UnknownPeer)?;
        let conversation_id = *message.conversation_id();
        self.channel
            .send(peer_id, Operation::Payload(message.clone()))?;
        self.outstanding = Some((peer_id, conversation_id));
        trace!(peer = %peer_id, "request sent");
        Ok(message.apply_peer_id(peer_id).into_metadata())
    }
}

impl<T> InwardSocket for RequestSocket<T>
where
    T: BidirectionalTransport,
{
    /// Receive the reply to the last request
    fn receive(&mut self, flags: OpFlag) -> Result<RawMessage, SocketError> {
        if self.outstanding.is_none() && self.deliverable.is_empty() {
            return Err(SocketError::IncorrectStateError);
        }
        self.next_deliverable(flags)
    }
}

impl<T> BidirectionalSocket for RequestSocket<T> where T: BidirectionalTransport {}

pub struct ReplySocket<T: BidirectionalTransport> {
    channel: T,
    tracker: PeerTracker,
    current: Option<MessageMetadata>,
    deliverable: VecDeque<RawMessage>,
}

impl<T> ReplySocket<T>
where
    T: BidirectionalTransport,
{
    pub fn new(mut transport: T) -> Self {
        transport.announce_model(REPLY_MODELID);
        Self {
            channel: transport,
            tracker: PeerTracker::new(&[REQUEST_MODELID]),
            current: None,
            deliverable: VecDeque::new(),
        }
    }

    fn forget_peer(&mut self, peer_id: &PeerId) {
        if self.tracker.remove(peer_id) {
            debug!(peer = %peer_id, "requester gone");
        }
        self.deliverable
            .retain(|request| request.peer_id() != &Some(*peer_id));
    }
}

impl<T> InwardProcessor for ReplySocket<T>
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
                if self.tracker.accept(peer_id) {
                    debug!(peer = %peer_id, "requester ready");
                }
            }
            PeerEvent::Received(Operation::Payload(message)) => {
                if self.tracker.is_ready(&peer_id) {
                    self.deliverable.push_back(message.apply_peer_id(peer_id));
                } else {
                    trace!(peer = %peer_id, "request before handshake dropped");
                }
            }
            PeerEvent::Received(_) => trace!(peer = %peer_id, "operation ignored"),
            PeerEvent::Disconnected => self.forget_peer(&peer_id),
        }
        Ok(())
    }
}

impl<T> Socket for ReplySocket<T>
where
    T: BidirectionalTransport,
{
    fn connect(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
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
            self.forget_peer(&peer_id);
        }
        Ok(())
    }

    fn close(self) -> Result<(), SocketError> {
        self.channel.close()
    }
}

impl<T> InwardSocket for ReplySocket<T>
where
    T: BidirectionalTransport,
{
    /// Receive the next request. The reply has to be sent before another request is taken.
    fn receive(&mut self, flags: OpFlag) -> Result<RawMessage, SocketError> {
        if self.current.is_some() {
            return Err(SocketError::IncorrectStateError);
        }
        let request = self.next_deliverable(flags)?;
        self.current = Some(request.metadata().clone());
        Ok(request)
    }
}

impl<T> OutwardSocket for ReplySocket<T>
where
    T: BidirectionalTransport,
{
    /// Reply to the last received request, in its conversation
    fn send(&mut self, message: RawMessage, _flags: OpFlag) -> Result<MessageMetadata, SocketError> {
        let request = self
            .current
            .take()
            .ok_or(SocketError::IncorrectStateError)?;
        let peer_id = (*request.peer_id()).ok_or(SocketError::UnknownPeer)?;
        let reply = RawMessage::with_metadata(request.continue_exchange(), message.into_payload());
        let metadata = reply.metadata().clone();
        match self.channel.send(peer_id, Operation::Payload(reply)) {
            Ok(()) => {
                trace!(peer = %peer_id, "reply sent");
                Ok(metadata)
            }
            Err(SocketError::UnknownPeer) => Err(SocketError::Disconnected),
            Err(err) => Err(err),
        }
    }
}

impl<T> BidirectionalSocket for ReplySocket<T> where T: BidirectionalTransport {}
