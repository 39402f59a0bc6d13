//! # patternmq
//!
//! # Introduction
//! patternmq is a small brokerless messaging library together with the example processes
//! built on it: an exclusive pair, publish/subscribe, request/reply and a publish/subscribe
//! relay proxy.
//!
//! ## Features
//! * Communication module (OSI 5 session layer) implementation for the following communication models:
//!   * Exclusive pair
//!   * Publisher-Subscriber, with the extended XPUB/XSUB variants used for relaying
//!   * Request-Reply (client-server) model
//! * Transports:
//!   * TCP (`tcp://host:port`, IPv4 and IPv6)
//!   * In-memory (`inproc://name`) between sockets of the same process
//! * A relay [`proxy::Proxy`] forwarding between two sockets
//!
//! ## Example usage
//! ```rust
//! use patternmq::model::reqrep::{ReplySocket, RequestSocket};
//! use patternmq::transport::memory::MemoryNetwork;
//! use patternmq::core::{BidirectionalSocket, InwardSocket, Message, OpFlag, OutwardSocket,
//!                       RawMessage, Socket};
//!
//! let network = MemoryNetwork::new();
//! let mut replier = ReplySocket::new(network.transport());
//! let mut requester = RequestSocket::new(network.transport());
//!
//! replier.bind("inproc://greeter".parse().unwrap()).unwrap();
//! requester.connect("inproc://greeter".parse().unwrap()).unwrap();
//!
//! let payload: Vec<u8> = vec![0u8, 5u8];
//! requester.send(RawMessage::new(payload.clone()), OpFlag::NoWait).unwrap();
//!
//! replier.respond(OpFlag::NoWait, OpFlag::NoWait, |request: RawMessage| {
//!     RawMessage::new(request.payload().clone())
//! }).unwrap();
//!
//! assert_eq!(payload, requester.receive(OpFlag::NoWait).unwrap().into_payload());
//! ```

pub mod app;
pub mod core;
pub mod model;
pub mod proxy;
pub mod transport;

#[cfg(test)]
mod tests;
