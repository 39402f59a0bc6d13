//! # Network transport module
//! This module contains built-in implementations of patternmq for transport over TCP/IP networks.
//! Custom implementations can also be used instead of build in ones

pub mod internal;
pub mod tcp;
