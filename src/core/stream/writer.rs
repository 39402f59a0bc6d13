use super::{HeadedOperation, Header};
use crate::core::message::Buffer;
use crate::core::serializer::{FlatSerializer, Serializer};
use crate::core::socket::SocketError;
use crate::core::transport::Operation;

use std::io::Write;

/// Frames operations for a stream connection, numbering them in sending order
#[derive(Debug, Default)]
pub struct StreamOperationWriter {
    sequence: u32,
}

impl StreamOperationWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, operation: Operation) -> Buffer {
        let mut serializer = FlatSerializer::new();
        serializer.serialize(&HeadedOperation::new(Header::new(self.sequence), operation));
        self.sequence = self.sequence.wrapping_add(1);
        serializer.finalize()
    }

    /// Write the whole frame of `operation` or fail
    pub fn write_into<F: Write>(
        &mut self,
        writer: &mut F,
        operation: Operation,
    ) -> Result<(), SocketError> {
        let buffer = self.encode(operation);
        writer.write_all(&buffer)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::RawMessage;
    use crate::core::stream::{State, StreamSerializableReader};
    use std::io::Cursor;

    #[test]
    fn frames_are_numbered_in_order() {
        let mut writer = StreamOperationWriter::new();
        let mut stream = Vec::new();
        writer
            .write_into(&mut stream, Operation::Handshake(0xFFE1))
            .unwrap();
        writer
            .write_into(&mut stream, Operation::Payload(RawMessage::from("frame")))
            .unwrap();

        let mut reader = StreamSerializableReader::new(4096, 4096);
        let frames: Vec<HeadedOperation> = reader.read_into(&mut Cursor::new(stream)).unwrap();
        let sequences: Vec<u32> = frames.iter().map(|frame| frame.header().sequence()).collect();
        assert_eq!(sequences, vec![0, 1]);
        assert_eq!(
            frames[0].clone().into_parts().1,
            Operation::Handshake(0xFFE1)
        );
        assert!(matches!(
            reader.read_into::<HeadedOperation, _>(&mut Cursor::new(Vec::new())),
            Err(State::Closed)
        ));
    }
}
