//! Bookkeeping shared by the communication models

use crate::core::message::{PeerId, RawMessage};
use crate::core::socket::{OpFlag, PeerIdentification, SocketError};
use crate::core::transport::{Inward, ModelId, Transport};

use std::collections::VecDeque;

use tracing::{debug, warn};

/// Peers that completed a compatible handshake, in handshake order
pub(crate) struct PeerTracker {
    accepted_models: &'static [ModelId],
    ready: Vec<PeerId>,
}

impl PeerTracker {
    pub fn new(accepted_models: &'static [ModelId]) -> Self {
        Self {
            accepted_models,
            ready: Vec::new(),
        }
    }

    pub fn is_compatible(&self, model_id: ModelId) -> bool {
        self.accepted_models.contains(&model_id)
    }

    /// Marks the peer ready. Returns `false` if it already was.
    pub fn accept(&mut self, peer_id: PeerId) -> bool {
        if self.is_ready(&peer_id) {
            false
        } else {
            self.ready.push(peer_id);
            true
        }
    }

    pub fn is_ready(&self, peer_id: &PeerId) -> bool {
        self.ready.contains(peer_id)
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> bool {
        let before = self.ready.len();
        self.ready.retain(|ready| ready != peer_id);
        before != self.ready.len()
    }

    pub fn ready_peers(&self) -> &[PeerId] {
        &self.ready
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }
}

/// Closes the connection of a peer whose handshake announced an unusable model
pub(crate) fn reject_peer<T: Transport>(
    channel: &mut T,
    peer_id: PeerId,
    model_id: ModelId,
) -> SocketError {
    warn!(peer = %peer_id, model = model_id, "incompatible peer, closing connection");
    if let Err(err) = channel.close_connection(PeerIdentification::PeerId(peer_id)) {
        debug!(peer = %peer_id, error = %err, "closing incompatible peer failed");
    }
    SocketError::IncompatiblePeer
}

/// Socket driven by the inward events of its transport. Handling an event may queue
/// messages for the user in [`InwardProcessor::deliverable`].
pub(crate) trait InwardProcessor {
    type Channel: Transport;

    fn channel(&mut self) -> &mut Self::Channel;
    fn deliverable(&mut self) -> &mut VecDeque<RawMessage>;
    fn handle(&mut self, inward: Inward) -> Result<(), SocketError>;

    /// Next message for the user, handling events until one is queued or `flags` expire
    fn next_deliverable(&mut self, flags: OpFlag) -> Result<RawMessage, SocketError> {
        let deadline = flags.deadline();
        loop {
            if let Some(message) = self.deliverable().pop_front() {
                return Ok(message);
            }
            let inward = self.channel().receive(deadline.step_flag())?;
            self.handle(inward)?;
        }
    }

    /// Handle every event already queued by the transport without blocking. Errors about
    /// single peers are logged where they happen and do not stop the processing.
    fn process_queued_events(&mut self) -> Result<(), SocketError> {
        loop {
            match self.channel().receive(OpFlag::NoWait) {
                Ok(inward) => match self.handle(inward) {
                    Err(err) if err.is_fatal() => return Err(err),
                    _ => (),
                },
                Err(SocketError::Timeout) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Handle events until `condition` holds. Reports [`SocketError::Timeout`] once `flags`
    /// expire.
    fn process_until<F>(&mut self, flags: OpFlag, mut condition: F) -> Result<(), SocketError>
    where
        F: FnMut(&Self) -> bool,
        Self: Sized,
    {
        let deadline = flags.deadline();
        loop {
            self.process_queued_events()?;
            if condition(&*self) {
                return Ok(());
            }
            let inward = self.channel().receive(deadline.step_flag())?;
            match self.handle(inward) {
                Err(err) if err.is_fatal() => return Err(err),
                _ => (),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_keeps_handshake_order() {
        let mut tracker = PeerTracker::new(&[1, 2]);
        let (first, second) = (PeerId::new(10), PeerId::new(5));
        assert!(tracker.is_compatible(2));
        assert!(!tracker.is_compatible(3));
        assert!(tracker.accept(first));
        assert!(tracker.accept(second));
        assert!(!tracker.accept(first));
        assert_eq!(tracker.ready_peers(), &[first, second]);

        assert!(tracker.remove(&first));
        assert!(!tracker.remove(&first));
        assert_eq!(tracker.ready_peers(), &[second]);
        assert!(!tracker.is_empty());
    }
}
