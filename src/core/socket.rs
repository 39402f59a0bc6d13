//! # Socket module
//! This module contains the traits serving as the main interaction point for patternmq

use crate::core::message::{Message, MessageMetadata, PeerId, RawMessage};
use crate::core::transport::TransportMethod;
use crate::core::util::thread::Sleeper;
use crate::core::util::time;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// # Operation flags
/// Configuration for individual send and receive calls on [`InwardSocket`]s and [`OutwardSocket`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpFlag {
    /// Wait for operation to finish
    Wait,
    /// Do not wait for operation to finish. Asychronous mode
    NoWait,
    /// Wait at most the given duration for the operation to finish
    Timeout(Duration),
}

impl OpFlag {
    /// Fix the point in time the operation has to finish by
    pub fn deadline(&self) -> Deadline {
        Deadline {
            expiry: match self {
                OpFlag::Wait => Expiry::Never,
                OpFlag::NoWait => Expiry::Immediate,
                OpFlag::Timeout(duration) => Expiry::At(Instant::now() + *duration),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Expiry {
    Never,
    Immediate,
    At(Instant),
}

/// Point in time an operation started with an [`OpFlag`] has to finish by. Operations composed
/// of several blocking steps use it to derive the flag of each step.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expiry: Expiry,
}

impl Deadline {
    /// Flag for the next step. An expired deadline still allows a non-blocking attempt.
    pub fn step_flag(&self) -> OpFlag {
        match self.expiry {
            Expiry::Never => OpFlag::Wait,
            Expiry::Immediate => OpFlag::NoWait,
            Expiry::At(instant) => match time::remaining(instant) {
                Some(remaining) => OpFlag::Timeout(remaining),
                None => OpFlag::NoWait,
            },
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Expiry::Never => false,
            Expiry::Immediate => true,
            Expiry::At(instant) => time::remaining(instant).is_none(),
        }
    }
}

/// # [`Socket`] errors
/// Contains the possible errors for a socket that may need to be handled on the user side
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    /// The socket is not in the correct state to process the requested operation
    #[error("socket is not in the correct state for this operation")]
    IncorrectStateError,
    /// The target peer is unknown or cannot be inferred
    #[error("unknown peer")]
    UnknownPeer,
    /// The specific [`TransportMethod`] is already used
    #[error("transport method is already in use")]
    TransportMethodAlreadyInUse,
    /// The specific [`TransportMethod`] cannot be found or cannot be connected to
    #[error("transport target is unreachable")]
    TransportTargetUnreachable,
    /// The target peer disconnected
    #[error("peer disconnected")]
    Disconnected,
    /// The target given in [`TransportMethod`] refused the connection
    #[error("connection refused")]
    ConnectionRefused,
    /// The operation timed out
    #[error("operation timed out")]
    Timeout,
    /// The connected peer has an incompatible version or communication model
    #[error("peer uses an incompatible communication model")]
    IncompatiblePeer,
    /// The [`TransportMethod`] is not supported by the transport
    #[error("transport method is not supported by the transport")]
    InvalidTransportMethod,
    /// The connection already exists
    #[error("already connected")]
    AlreadyConnected,
    /// Could not connect to address provided by [`TransportMethod`]
    #[error("could not connect")]
    CouldNotConnect,
    /// A frame sent to a subscription socket is not a subscription control frame
    #[error("frame is not a subscription control frame")]
    InvalidSubscriptionFrame,
    /// Data received from a peer could not be decoded
    #[error("unknown data format received")]
    UnknownDataFormatReceived,
    /// Internal failure, such as a poisoned lock or a failed thread spawn
    #[error("internal error: {0}")]
    Internal(String),
}

impl SocketError {
    /// Errors after which the socket or transport is no longer usable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SocketError::TransportMethodAlreadyInUse
                | SocketError::InvalidTransportMethod
                | SocketError::Internal(_)
        )
    }

    pub(crate) fn poisoned<T>(_: T) -> Self {
        SocketError::Internal("lock poisoned".to_string())
    }
}

/// Identifier for a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerIdentification {
    /// Identify by the peer identifier in [`MessageMetadata`]
    PeerId(PeerId),
    /// Identify by the [`TransportMethod`] the connection was made to
    TransportMethod(TransportMethod),
}

/// # General **Socket** trait
/// The main interface for the user to interact with during operaton
/// There can be several implementations of it depending on communication model
pub trait Socket: Send + Sync {
    /// Connect to a new peer specified by the parameter. The result can contain the PeerId which
    /// identifies the peer in [`MessageMetadata`] of future transactions
    fn connect(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError>;
    /// Bind to an interface to listen for connections given by the parameter
    fn bind(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError>;
    /// Close connection to a peer specified by [`PeerIdentification`]
    fn close_connection(
        &mut self,
        peer_identification: PeerIdentification,
    ) -> Result<(), SocketError>;
    /// Close the socket with all its connections
    fn close(self) -> Result<(), SocketError>
    where
        Self: Sized;
}

/// # Outward **Socket** trait
/// The main interface for the user to send messages through an opened socket
pub trait OutwardSocket: Socket {
    /// Send a raw message
    fn send(&mut self, message: RawMessage, flags: OpFlag) -> Result<MessageMetadata, SocketError>;
}

/// # Inward **Socket** trait
/// The main interface for the user to receive messages through an opened socket
pub trait InwardSocket: Socket {
    /// Receive a raw message. `NoWait` and expired `Timeout` flags report
    /// [`SocketError::Timeout`] when nothing is available
    fn receive(&mut self, flags: OpFlag) -> Result<RawMessage, SocketError>;
}

/// # Bidirectional **Socket** trait
/// The main interface for the user to send and receive messages through the same opened socket
pub trait BidirectionalSocket: OutwardSocket + InwardSocket {
    /// Execute a query (send and then receive) with a raw message
    fn query(
        &mut self,
        message: RawMessage,
        send_flags: OpFlag,
        receive_flags: OpFlag,
    ) -> Result<RawMessage, SocketError> {
        self.send(message, send_flags)?;
        self.receive(receive_flags)
    }

    /// Respond to a query (receive and then reply) with a raw message
    fn respond<T: FnOnce(RawMessage) -> RawMessage>(
        &mut self,
        receive_flags: OpFlag,
        send_flags: OpFlag,
        processor: T,
    ) -> Result<MessageMetadata, SocketError> {
        let query = self.receive(receive_flags)?;
        let query_metadata = query.metadata().clone();
        let response = processor(query).continue_exchange_metadata(query_metadata);
        self.send(response, send_flags)
    }
}

/// # ArcSocket
/// Wrapper around a [`Socket`] that allows for easier sharing between threads
pub struct ArcSocket<T>
where
    T: Socket,
{
    socket: Arc<Mutex<T>>,
}

impl<T> Clone for ArcSocket<T>
where
    T: Socket,
{
    fn clone(&self) -> Self {
        Self {
            socket: self.socket.clone(),
        }
    }
}

impl<T> ArcSocket<T>
where
    T: Socket,
{
    /// Create a new ArcSocket with an already constructed socket
    pub fn new(socket: T) -> Self {
        Self {
            socket: Arc::new(Mutex::new(socket)),
        }
    }

    /// Get a mutex guard for the internal socket
    pub fn lock_ref(&self) -> Result<MutexGuard<'_, T>, SocketError> {
        self.socket.lock().map_err(SocketError::poisoned)
    }

    /// Perform operations on internal socket directly through a closure
    pub fn direct<U, F: FnOnce(&mut T) -> U>(&self, func: F) -> Result<U, SocketError> {
        Ok(func(&mut *self.lock_ref()?))
    }

    /// Repeat a non-blocking operation until it stops timing out or `flags` expire, releasing
    /// the lock between attempts so other holders can progress
    fn poll<U, F>(&self, flags: OpFlag, mut operation: F) -> Result<U, SocketError>
    where
        F: FnMut(&mut T) -> Result<U, SocketError>,
    {
        let deadline = flags.deadline();
        let mut sleeper = Sleeper::new(time::polling_backoff());
        loop {
            match operation(&mut *self.lock_ref()?) {
                Err(SocketError::Timeout) if !deadline.is_expired() => sleeper.sleep(),
                result => break result,
            }
        }
    }
}

impl<T> Socket for ArcSocket<T>
where
    T: Socket,
{
    fn connect(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
        self.lock_ref()?.connect(target)
    }

    fn bind(&mut self, target: TransportMethod) -> Result<Option<PeerId>, SocketError> {
        self.lock_ref()?.bind(target)
    }

    fn close_connection(
        &mut self,
        peer_identification: PeerIdentification,
    ) -> Result<(), SocketError> {
        self.lock_ref()?.close_connection(peer_identification)
    }

    /// The wrapped socket closes once the last clone is dropped
    fn close(self) -> Result<(), SocketError> {
        Ok(())
    }
}

impl<T> InwardSocket for ArcSocket<T>
where
    T: InwardSocket,
{
    fn receive(&mut self, flags: OpFlag) -> Result<RawMessage, SocketError> {
        self.poll(flags, |socket| socket.receive(OpFlag::NoWait))
    }
}

impl<T> OutwardSocket for ArcSocket<T>
where
    T: OutwardSocket,
{
    fn send(&mut self, message: RawMessage, flags: OpFlag) -> Result<MessageMetadata, SocketError> {
        match flags {
            OpFlag::NoWait => self.lock_ref()?.send(message, OpFlag::NoWait),
            flags => self.poll(flags, |socket| socket.send(message.clone(), OpFlag::NoWait)),
        }
    }
}

impl<T> BidirectionalSocket for ArcSocket<T> where T: BidirectionalSocket {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_wait_deadline_is_immediately_expired() {
        let deadline = OpFlag::NoWait.deadline();
        assert!(deadline.is_expired());
        assert_eq!(deadline.step_flag(), OpFlag::NoWait);
    }

    #[test]
    fn wait_deadline_never_expires() {
        let deadline = OpFlag::Wait.deadline();
        assert!(!deadline.is_expired());
        assert_eq!(deadline.step_flag(), OpFlag::Wait);
    }

    #[test]
    fn timeout_deadline_degrades_to_no_wait() {
        let deadline = OpFlag::Timeout(Duration::from_millis(5)).deadline();
        assert!(matches!(deadline.step_flag(), OpFlag::Timeout(_)));
        std::thread::sleep(Duration::from_millis(10));
        assert!(deadline.is_expired());
        assert_eq!(deadline.step_flag(), OpFlag::NoWait);
    }

    #[test]
    fn fatal_errors() {
        assert!(SocketError::TransportMethodAlreadyInUse.is_fatal());
        assert!(SocketError::Internal("x".to_string()).is_fatal());
        assert!(!SocketError::Timeout.is_fatal());
        assert!(!SocketError::Disconnected.is_fatal());
        assert!(!SocketError::IncompatiblePeer.is_fatal());
        assert!(SocketError::InvalidTransportMethod.is_fatal());
    }
}
