//! # Stream module
//! Helper functionality for implementing [`crate::core::transport::Transport`]s on top of
//! [`std::io::Read`] and [`std::io::Write`] capable streams

mod header;
mod reader;
mod util;
mod writer;

pub use self::header::*;
pub use self::reader::*;
pub use self::util::*;
pub use self::writer::*;
