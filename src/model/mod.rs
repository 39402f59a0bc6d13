//! # Model module
//! This module contains sockets that implement a session layer (OSI layer 5) for a given
//! communication model. Every socket announces its model id through the handshake and
//! disconnects peers whose model it cannot talk to.

mod common;
pub mod pair;
pub mod pubsub;
pub mod reqrep;
pub mod subscription;

use crate::core::transport::ModelId;

pub const PAIR_MODELID: ModelId = 0xFFD0;
pub const SUBSCRIBER_MODELID: ModelId = 0xFFE0;
pub const PUBLISHER_MODELID: ModelId = 0xFFE1;
pub const REQUEST_MODELID: ModelId = 0xFFF0;
pub const REPLY_MODELID: ModelId = 0xFFF1;
