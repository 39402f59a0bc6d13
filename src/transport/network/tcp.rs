use super::internal::*;
use crate::core::config::TransportConfiguration;
use crate::core::socket::SocketError;
use crate::core::transport::{NetworkAddress, TransportFactory};

use std::io;
use std::net;

impl NetworkStream for net::TcpStream {
    #[inline]
    fn try_clone_stream(&self) -> io::Result<Self> {
        self.try_clone()
    }

    #[inline]
    fn shutdown_stream(&self) {
        let _ = self.shutdown(net::Shutdown::Both);
    }
}

impl NetworkListener for net::TcpListener {
    type Stream = net::TcpStream;

    #[inline]
    fn local_addr(&self) -> io::Result<net::SocketAddr> {
        self.local_addr()
    }

    #[inline]
    fn accept(&self) -> io::Result<(Self::Stream, net::SocketAddr)> {
        self.accept()
    }
}

#[derive(Clone, Default)]
pub struct StreamListenerBuilder {}

impl StreamListenerBuilder {
    pub fn new() -> Self {
        Self {}
    }
}

impl NetworkListenerBuilder for StreamListenerBuilder {
    type Listener = net::TcpListener;

    fn bind(&self, addr: &NetworkAddress) -> io::Result<Self::Listener> {
        let listener = net::TcpListener::bind(addr.get_address())?;
        listener.set_nonblocking(true)?;
        Ok(listener)
    }
}

#[derive(Clone, Default)]
pub struct StreamConnectionBuilder {}

impl StreamConnectionBuilder {
    pub fn new() -> Self {
        Self {}
    }

    fn prepare(
        config: &TransportConfiguration,
        stream: net::TcpStream,
    ) -> Result<net::TcpStream, SocketError> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(config.write_timeout)?;
        stream.set_read_timeout(Some(config.read_timeout))?;
        Ok(stream)
    }
}

impl NetworkStreamConnectionBuilder for StreamConnectionBuilder {
    type Stream = net::TcpStream;

    fn connect(
        &self,
        config: &TransportConfiguration,
        addr: &NetworkAddress,
    ) -> Result<net::TcpStream, SocketError> {
        let stream = net::TcpStream::connect(addr.get_address()).map_err(|err| {
            match SocketError::from(err) {
                SocketError::Internal(_) => SocketError::CouldNotConnect,
                other => other,
            }
        })?;
        Self::prepare(config, stream)
    }

    fn accept_connection(
        &self,
        config: &TransportConfiguration,
        stream: net::TcpStream,
    ) -> Result<net::TcpStream, SocketError> {
        Self::prepare(config, stream)
    }
}

pub type Transport = NetworkTransport<StreamListenerBuilder, StreamConnectionBuilder>;

impl Transport {
    pub fn tcp() -> Self {
        Self::new(StreamConnectionBuilder::new(), StreamListenerBuilder::new())
    }
}

/// Creates TCP transports sharing one configuration
#[derive(Clone, Default)]
pub struct TcpTransportFactory {
    config: TransportConfiguration,
}

impl TcpTransportFactory {
    pub fn new(config: TransportConfiguration) -> Self {
        Self { config }
    }
}

impl TransportFactory for TcpTransportFactory {
    type Transport = Transport;

    fn create(&self) -> Self::Transport {
        Transport::with_configuration(
            StreamConnectionBuilder::new(),
            StreamListenerBuilder::new(),
            self.config.clone(),
        )
    }
}
