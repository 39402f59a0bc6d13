//! # Transport traits
//! The layer below the communication models: moving [`Operation`]s between this process and
//! its connected peers

pub mod network;

pub use self::network::NetworkAddress;

use crate::core::message::{Buffer, PeerId, RawMessage};
use crate::core::socket::{OpFlag, PeerIdentification, SocketError};

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Where to bind or connect to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransportMethod {
    /// `tcp://host:port`, host `*` meaning every IPv4 interface
    Network(NetworkAddress),
    /// `inproc://name` within a [`crate::transport::memory::MemoryNetwork`]
    Memory(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint `{0}` has no transport scheme, expected tcp:// or inproc://")]
    MissingScheme(String),
    #[error("transport scheme `{0}` is not supported")]
    UnsupportedScheme(String),
    #[error("endpoint `{0}` is missing its name")]
    EmptyName(String),
    #[error("endpoint `{endpoint}` cannot be resolved")]
    Unresolvable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

impl FromStr for TransportMethod {
    type Err = EndpointError;

    fn from_str(endpoint: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = endpoint
            .split_once("://")
            .ok_or_else(|| EndpointError::MissingScheme(endpoint.to_string()))?;
        if rest.is_empty() {
            return Err(EndpointError::EmptyName(endpoint.to_string()));
        }
        match scheme {
            "tcp" => {
                let address = match rest.strip_prefix("*:") {
                    Some(port) => format!("0.0.0.0:{}", port),
                    None => rest.to_string(),
                };
                NetworkAddress::from_dns(address)
                    .map(TransportMethod::Network)
                    .map_err(|source| EndpointError::Unresolvable {
                        endpoint: endpoint.to_string(),
                        source,
                    })
            }
            "inproc" => Ok(TransportMethod::Memory(rest.to_string())),
            other => Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for TransportMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMethod::Network(address) => match address.get_dns() {
                Some(dns) => write!(f, "tcp://{}", dns),
                None => write!(f, "tcp://{}", address.get_address()),
            },
            TransportMethod::Memory(name) => write!(f, "inproc://{}", name),
        }
    }
}

/// Identifies the communication model of a socket during the handshake
pub type ModelId = u16;

/// Unit of exchange between two connected transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// First operation on every connection, announcing the model of the sending socket
    Handshake(ModelId),
    /// Application frame
    Payload(RawMessage),
    /// Subscription to frames starting with the prefix
    Subscribe(Buffer),
    /// Removal of one subscription to the prefix
    Unsubscribe(Buffer),
}

/// What happened on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Received(Operation),
    /// The connection is gone; no further events follow for the peer
    Disconnected,
}

/// Event of a connected peer, in arrival order per peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inward {
    pub peer_id: PeerId,
    pub event: PeerEvent,
}

impl Inward {
    pub fn received(peer_id: PeerId, operation: Operation) -> Self {
        Self {
            peer_id,
            event: PeerEvent::Received(operation),
        }
    }

    pub fn disconnected(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            event: PeerEvent::Disconnected,
        }
    }
}

pub trait Transport: Send + Sync {
    /// Model sent as the handshake on every connection made after the call
    fn announce_model(&mut self, model_id: ModelId);
    fn send(&mut self, peer_id: PeerId, operation: Operation) -> Result<(), SocketError>;
    fn receive(&mut self, flags: OpFlag) -> Result<Inward, SocketError>;
    fn close_connection(
        &mut self,
        peer_identification: PeerIdentification,
    ) -> Result<Option<PeerId>, SocketError>;
    fn query_connected_peers(&self) -> HashSet<PeerId>;
    fn close(self) -> Result<(), SocketError>
    where
        Self: Sized;
}

pub trait InitiatorTransport: Transport {
    fn connect(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError>;
}

pub trait AcceptorTransport: Transport {
    fn bind(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError>;
}

pub trait BidirectionalTransport: InitiatorTransport + AcceptorTransport {}

impl<T: InitiatorTransport + AcceptorTransport> BidirectionalTransport for T {}

/// Creates the transports of sockets that should reach each other
pub trait TransportFactory {
    type Transport: BidirectionalTransport + 'static;
    fn create(&self) -> Self::Transport;
}
