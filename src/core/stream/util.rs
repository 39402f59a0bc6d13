use crate::core::socket::SocketError;
use std::io;

/// Outcome of a stream read that produced no complete operation
#[derive(Debug)]
pub enum State {
    /// Nothing was buffered and the stream had no data
    Empty,
    /// Part of an operation is buffered, more data is needed
    Remainder,
    /// The stream reached its end
    Closed,
    /// The stream or the received data failed
    Stream(SocketError),
}

impl From<io::Error> for SocketError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::AddrInUse => SocketError::TransportMethodAlreadyInUse,
            io::ErrorKind::AddrNotAvailable => SocketError::TransportTargetUnreachable,
            io::ErrorKind::AlreadyExists => SocketError::TransportMethodAlreadyInUse,
            io::ErrorKind::BrokenPipe => SocketError::Disconnected,
            io::ErrorKind::ConnectionAborted => SocketError::Disconnected,
            io::ErrorKind::ConnectionRefused => SocketError::ConnectionRefused,
            io::ErrorKind::ConnectionReset => SocketError::Disconnected,
            io::ErrorKind::NotConnected => SocketError::Disconnected,
            io::ErrorKind::UnexpectedEof => SocketError::Disconnected,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => SocketError::Timeout,
            io::ErrorKind::InvalidData => SocketError::UnknownDataFormatReceived,
            _ => SocketError::Internal(error.to_string()),
        }
    }
}

impl From<io::Error> for State {
    fn from(error: io::Error) -> Self {
        State::Stream(SocketError::from(error))
    }
}

impl From<SocketError> for State {
    fn from(error: SocketError) -> Self {
        State::Stream(error)
    }
}
