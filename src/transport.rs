//! # Transport module
//! Contains the transport layers patternmq natively supports: TCP streams and an in-memory
//! network for wiring sockets inside one process

pub mod memory;
pub mod network;

mod peers;
