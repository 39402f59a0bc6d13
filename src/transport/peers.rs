use crate::core::message::PeerId;
use crate::core::socket::{PeerIdentification, SocketError};
use crate::core::transport::{Operation, TransportMethod};

use std::collections::{HashMap, HashSet};

/// A live connection to one peer
pub(crate) trait Connection: Send {
    fn send(&mut self, operation: Operation) -> Result<(), SocketError>;
    /// Tear the connection down without reporting a disconnect to the local socket
    fn close(self);
}

/// Connections of a transport indexed by peer identifier and, for connections this side
/// initiated or accepted from a known address, by [`TransportMethod`]
pub(crate) struct PeerTable<C: Connection> {
    peer_table: HashMap<PeerId, C>,
    addresses: HashMap<TransportMethod, PeerId>,
    peers: HashMap<PeerId, TransportMethod>,
}

impl<C: Connection> PeerTable<C> {
    pub fn new() -> Self {
        Self {
            peer_table: HashMap::new(),
            addresses: HashMap::new(),
            peers: HashMap::new(),
        }
    }

    pub fn insert(&mut self, peer_id: PeerId, address: Option<TransportMethod>, connection: C) {
        self.peer_table.insert(peer_id, connection);
        if let Some(address) = address {
            self.addresses.insert(address.clone(), peer_id);
            self.peers.insert(peer_id, address);
        }
    }

    pub fn is_connected(&self, address: &TransportMethod) -> bool {
        self.addresses.contains_key(address)
    }

    pub fn send(&mut self, peer_id: PeerId, operation: Operation) -> Result<(), SocketError> {
        self.peer_table
            .get_mut(&peer_id)
            .ok_or(SocketError::UnknownPeer)?
            .send(operation)
    }

    pub fn remove_peer(&mut self, peer_id: &PeerId) -> Option<C> {
        if let Some(address) = self.peers.remove(peer_id) {
            self.addresses.remove(&address);
        }
        self.peer_table.remove(peer_id)
    }

    pub fn remove(
        &mut self,
        peer_identification: &PeerIdentification,
    ) -> Result<(PeerId, C), SocketError> {
        let peer_id = match peer_identification {
            PeerIdentification::PeerId(peer_id) => *peer_id,
            PeerIdentification::TransportMethod(address) => *self
                .addresses
                .get(address)
                .ok_or(SocketError::UnknownPeer)?,
        };
        let connection = self.remove_peer(&peer_id).ok_or(SocketError::UnknownPeer)?;
        Ok((peer_id, connection))
    }

    pub fn peers(&self) -> HashSet<PeerId> {
        self.peer_table.keys().copied().collect()
    }

    pub fn drain(&mut self) -> Vec<C> {
        self.addresses.clear();
        self.peers.clear();
        self.peer_table.drain().map(|(_, connection)| connection).collect()
    }
}
