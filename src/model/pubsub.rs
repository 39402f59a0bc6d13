//! # Publish/subscribe sockets
//! Publishers fan frames out to the peers whose subscriptions match them. Subscribers tell
//! every connected publisher which prefixes they want. The extended variants expose the
//! subscription traffic to the user so it can be relayed.

use super::common::{reject_peer, InwardProcessor, PeerTracker};
use super::subscription::{SubscriptionFrame, SubscriptionTable, Unsubscribed};
use super::{PUBLISHER_MODELID, SUBSCRIBER_MODELID};
use crate::core::message::{Buffer, Message, MessageMetadata, PeerId, RawMessage};
use crate::core::socket::{
    BidirectionalSocket, InwardSocket, OpFlag, OutwardSocket, PeerIdentification, Socket,
    SocketError,
};
use crate::core::transport::{
    BidirectionalTransport, Inward, Operation, PeerEvent, TransportMethod,
};

use std::collections::{HashMap, VecDeque};

use tracing::{debug, trace};

struct PublisherCore<T: BidirectionalTransport> {
    channel: T,
    tracker: PeerTracker,
    subscriptions: HashMap<PeerId, SubscriptionTable>,
    totals: SubscriptionTable,
    deliverable: VecDeque<RawMessage>,
    report_control: bool,
    verbose: bool,
}

impl<T> PublisherCore<T>
where
    T: BidirectionalTransport,
{
    fn new(mut transport: T, report_control: bool) -> Self {
        transport.announce_model(PUBLISHER_MODELID);
        Self {
            channel: transport,
            tracker: PeerTracker::new(&[SUBSCRIBER_MODELID]),
            subscriptions: HashMap::new(),
            totals: SubscriptionTable::new(),
            deliverable: VecDeque::new(),
            report_control,
            verbose: false,
        }
    }

    fn report(&mut self, frame: SubscriptionFrame) {
        if self.report_control {
            self.deliverable.push_back(frame.into_message());
        }
    }

    fn apply_subscribe(&mut self, peer_id: PeerId, prefix: Buffer) {
        let table = match self.subscriptions.get_mut(&peer_id) {
            Some(table) => table,
            None => {
                trace!(peer = %peer_id, "subscription before handshake ignored");
                return;
            }
        };
        table.subscribe(&prefix);
        let first = self.totals.subscribe(&prefix);
        trace!(peer = %peer_id, prefix = %String::from_utf8_lossy(&prefix), "subscribed");
        if first || self.verbose {
            self.report(SubscriptionFrame::Subscribe(prefix));
        }
    }

    fn apply_unsubscribe(&mut self, peer_id: PeerId, prefix: Buffer) {
        let unsubscribed = self
            .subscriptions
            .get_mut(&peer_id)
            .map(|table| table.unsubscribe(&prefix))
            .unwrap_or(Unsubscribed::NotSubscribed);
        if unsubscribed == Unsubscribed::NotSubscribed {
            return;
        }
        trace!(peer = %peer_id, prefix = %String::from_utf8_lossy(&prefix), "unsubscribed");
        if self.totals.unsubscribe(&prefix) == Unsubscribed::Removed {
            self.report(SubscriptionFrame::Unsubscribe(prefix));
        }
    }

    fn forget_peer(&mut self, peer_id: &PeerId) {
        if self.tracker.remove(peer_id) {
            debug!(peer = %peer_id, "subscriber gone");
        }
        if let Some(table) = self.subscriptions.remove(peer_id) {
            for prefix in self.totals.release(table) {
                self.report(SubscriptionFrame::Unsubscribe(prefix));
            }
        }
    }

    fn publish(&mut self, message: RawMessage) -> Result<MessageMetadata, SocketError> {
        self.process_queued_events()?;
        for peer_id in self.tracker.ready_peers() {
            let subscribed = self
                .subscriptions
                .get(peer_id)
                .map(|table| table.matches(message.payload()))
                .unwrap_or(false);
            if !subscribed {
                continue;
            }
            match self
                .channel
                .send(*peer_id, Operation::Payload(message.clone()))
            {
                Ok(()) => trace!(peer = %peer_id, "frame published"),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => debug!(peer = %peer_id, error = %err, "skipping subscriber"),
            }
        }
        Ok(message.into_metadata())
    }

    fn subscribed_peer_count(&mut self) -> Result<usize, SocketError> {
        self.process_queued_events()?;
        Ok(self
            .tracker
            .ready_peers()
            .iter()
            .filter(|peer_id| {
                self.subscriptions
                    .get(*peer_id)
                    .map(|table| !table.is_empty())
                    .unwrap_or(false)
            })
            .count())
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
}

impl<T> InwardProcessor for PublisherCore<T>
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
                    debug!(peer = %peer_id, "subscriber ready");
                    self.subscriptions.entry(peer_id).or_default();
                }
            }
            PeerEvent::Received(Operation::Subscribe(prefix)) => {
                self.apply_subscribe(peer_id, prefix)
            }
            PeerEvent::Received(Operation::Unsubscribe(prefix)) => {
                self.apply_unsubscribe(peer_id, prefix)
            }
            PeerEvent::Received(Operation::Payload(_)) => {
                trace!(peer = %peer_id, "payload sent to a publisher ignored")
            }
            PeerEvent::Disconnected => self.forget_peer(&peer_id),
        }
        Ok(())
    }
}

/// Send-only socket delivering each frame to the peers subscribed to one of its prefixes
pub struct PublisherSocket<T: BidirectionalTransport> {
    core: PublisherCore<T>,
}

impl<T> PublisherSocket<T>
where
    T: BidirectionalTransport,
{
    pub fn new(transport: T) -> Self {
        Self {
            core: PublisherCore::new(transport, false),
        }
    }

    /// Number of peers holding at least one subscription
    pub fn subscribed_peer_count(&mut self) -> Result<usize, SocketError> {
        self.core.subscribed_peer_count()
    }
}

/// Publisher whose [`InwardSocket::receive`] returns the subscription control frames of its
/// peers. Only the first subscription and the last unsubscription of a prefix are reported
/// unless the socket is verbose.
pub struct XPublisherSocket<T: BidirectionalTransport> {
    core: PublisherCore<T>,
}

impl<T> XPublisherSocket<T>
where
    T: BidirectionalTransport,
{
    pub fn new(transport: T) -> Self {
        Self {
            core: PublisherCore::new(transport, true),
        }
    }

    /// Report every subscription instead of the first one per prefix
    pub fn set_verbose(&mut self, verbose: bool) {
        self.core.verbose = verbose;
    }

    pub fn subscribed_peer_count(&mut self) -> Result<usize, SocketError> {
        self.core.subscribed_peer_count()
    }
}

struct SubscriberCore<T: BidirectionalTransport> {
    channel: T,
    tracker: PeerTracker,
    subscriptions: SubscriptionTable,
    deliverable: VecDeque<RawMessage>,
    filter_locally: bool,
}

impl<T> SubscriberCore<T>
where
    T: BidirectionalTransport,
{
    fn new(mut transport: T, filter_locally: bool) -> Self {
        transport.announce_model(SUBSCRIBER_MODELID);
        Self {
            channel: transport,
            tracker: PeerTracker::new(&[PUBLISHER_MODELID]),
            subscriptions: SubscriptionTable::new(),
            deliverable: VecDeque::new(),
            filter_locally,
        }
    }

    fn broadcast(&mut self, operation: Operation) -> Result<(), SocketError> {
        for peer_id in self.tracker.ready_peers() {
            match self.channel.send(*peer_id, operation.clone()) {
                Ok(()) => (),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => debug!(peer = %peer_id, error = %err, "subscription not delivered"),
            }
        }
        Ok(())
    }

    fn subscribe(&mut self, prefix: &[u8]) -> Result<(), SocketError> {
        self.process_queued_events()?;
        if self.subscriptions.subscribe(prefix) {
            self.broadcast(Operation::Subscribe(prefix.to_vec()))?;
        }
        Ok(())
    }

    fn unsubscribe(&mut self, prefix: &[u8]) -> Result<(), SocketError> {
        self.process_queued_events()?;
        if self.subscriptions.unsubscribe(prefix) == Unsubscribed::Removed {
            self.broadcast(Operation::Unsubscribe(prefix.to_vec()))?;
        }
        Ok(())
    }

    /// Publishers that complete their handshake get every current subscription
    fn replay_subscriptions(&mut self, peer_id: PeerId) -> Result<(), SocketError> {
        for prefix in self.subscriptions.prefixes() {
            match self
                .channel
                .send(peer_id, Operation::Subscribe(prefix.clone()))
            {
                Ok(()) => (),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    debug!(peer = %peer_id, error = %err, "subscription replay interrupted");
                    break;
                }
            }
        }
        Ok(())
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
}

impl<T> InwardProcessor for SubscriberCore<T>
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
                    debug!(peer = %peer_id, "publisher ready");
                    self.replay_subscriptions(peer_id)?;
                }
            }
            PeerEvent::Received(Operation::Payload(message)) => {
                let wanted = self.tracker.is_ready(&peer_id)
                    && (!self.filter_locally || self.subscriptions.matches(message.payload()));
                if wanted {
                    self.deliverable.push_back(message.apply_peer_id(peer_id));
                } else {
                    trace!(peer = %peer_id, "unsubscribed frame dropped");
                }
            }
            PeerEvent::Received(Operation::Subscribe(_))
            | PeerEvent::Received(Operation::Unsubscribe(_)) => {
                trace!(peer = %peer_id, "subscription sent to a subscriber ignored")
            }
            PeerEvent::Disconnected => {
                if self.tracker.remove(&peer_id) {
                    debug!(peer = %peer_id, "publisher gone");
                }
            }
        }
        Ok(())
    }
}

/// Receive-only socket getting the frames matching its subscriptions
pub struct SubscriberSocket<T: BidirectionalTransport> {
    core: SubscriberCore<T>,
}

impl<T> SubscriberSocket<T>
where
    T: BidirectionalTransport,
{
    pub fn new(transport: T) -> Self {
        Self {
            core: SubscriberCore::new(transport, true),
        }
    }

    /// Receive frames starting with `prefix`. The empty prefix matches every frame.
    pub fn subscribe(&mut self, prefix: &[u8]) -> Result<(), SocketError> {
        self.core.subscribe(prefix)
    }

    pub fn unsubscribe(&mut self, prefix: &[u8]) -> Result<(), SocketError> {
        self.core.unsubscribe(prefix)
    }
}

/// Subscriber managed through control frames passed to [`OutwardSocket::send`]. Received
/// frames are not filtered again.
pub struct XSubscriberSocket<T: BidirectionalTransport> {
    core: SubscriberCore<T>,
}

impl<T> XSubscriberSocket<T>
where
    T: BidirectionalTransport,
{
    pub fn new(transport: T) -> Self {
        Self {
            core: SubscriberCore::new(transport, false),
        }
    }
}

macro_rules! impl_socket {
    ($socket:ident) => {
        impl<T> Socket for $socket<T>
        where
            T: BidirectionalTransport,
        {
            fn connect(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
                self.core.channel.connect(target)
            }

            fn bind(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
                self.core.channel.bind(target)
            }

            fn close_connection(
                &mut self,
                peer_identification: PeerIdentification,
            ) -> Result<(), SocketError> {
                self.core.close_connection(peer_identification)
            }

            fn close(self) -> Result<(), SocketError> {
                self.core.channel.close()
            }
        }
    };
}

impl_socket!(PublisherSocket);
impl_socket!(XPublisherSocket);
impl_socket!(SubscriberSocket);
impl_socket!(XSubscriberSocket);

impl<T> OutwardSocket for PublisherSocket<T>
where
    T: BidirectionalTransport,
{
    fn send(&mut self, message: RawMessage, _flags: OpFlag) -> Result<MessageMetadata, SocketError> {
        self.core.publish(message)
    }
}

impl<T> OutwardSocket for XPublisherSocket<T>
where
    T: BidirectionalTransport,
{
    fn send(&mut self, message: RawMessage, _flags: OpFlag) -> Result<MessageMetadata, SocketError> {
        self.core.publish(message)
    }
}

impl<T> InwardSocket for XPublisherSocket<T>
where
    T: BidirectionalTransport,
{
    fn receive(&mut self, flags: OpFlag) -> Result<RawMessage, SocketError> {
        self.core.next_deliverable(flags)
    }
}

impl<T> BidirectionalSocket for XPublisherSocket<T> where T: BidirectionalTransport {}

impl<T> InwardSocket for SubscriberSocket<T>
where
    T: BidirectionalTransport,
{
    fn receive(&mut self, flags: OpFlag) -> Result<RawMessage, SocketError> {
        self.core.next_deliverable(flags)
    }
}

impl<T> OutwardSocket for XSubscriberSocket<T>
where
    T: BidirectionalTransport,
{
    fn send(&mut self, message: RawMessage, _flags: OpFlag) -> Result<MessageMetadata, SocketError> {
        match SubscriptionFrame::decode(message.payload())? {
            SubscriptionFrame::Subscribe(prefix) => self.core.subscribe(&prefix)?,
            SubscriptionFrame::Unsubscribe(prefix) => self.core.unsubscribe(&prefix)?,
        }
        Ok(message.into_metadata())
    }
}

impl<T> InwardSocket for XSubscriberSocket<T>
where
    T: BidirectionalTransport,
{
    fn receive(&mut self, flags: OpFlag) -> Result<RawMessage, SocketError> {
        self.core.next_deliverable(flags)
    }
}

impl<T> BidirectionalSocket for XSubscriberSocket<T> where T: BidirectionalTransport {}
