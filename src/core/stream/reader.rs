use super::State;
use crate::core::message::Buffer;
use crate::core::serializer;
use crate::core::serializer::{Deserializer, FlatDeserializer, Serializable, HEADER_SIZE};
use crate::core::socket::SocketError;

use std::io::{ErrorKind, Read};

/// Reassembles flat serialized values from a byte stream: frames split across reads are
/// buffered until complete and several frames arriving in one read are all returned
pub struct StreamSerializableReader {
    buffer: Buffer,
    chunk: Buffer,
    max_frame_size: usize,
}

impl StreamSerializableReader {
    pub fn new(batch_size: usize, max_frame_size: usize) -> Self {
        Self {
            buffer: Buffer::with_capacity(batch_size),
            chunk: vec![0u8; batch_size.max(1)],
            max_frame_size,
        }
    }

    /// Size of the first buffered frame once its header is available
    fn frame_size(&self) -> Result<Option<usize>, SocketError> {
        let announced = match FlatDeserializer::new(&self.buffer) {
            Ok(_) => self.buffer.len() as u64,
            Err(serializer::Error::IncorrectBufferSize(announced)) => announced,
            Err(serializer::Error::EndOfBuffer) => return Ok(None),
            Err(_) => return Err(SocketError::UnknownDataFormatReceived),
        };
        match usize::try_from(announced) {
            Ok(size) if (HEADER_SIZE..=self.max_frame_size).contains(&size) => Ok(Some(size)),
            _ => Err(SocketError::UnknownDataFormatReceived),
        }
    }

    fn try_parse_frame<T: Serializable>(&mut self) -> Result<Option<T>, SocketError> {
        let size = match self.frame_size()? {
            Some(size) if size <= self.buffer.len() => size,
            _ => return Ok(None),
        };
        let value = FlatDeserializer::new(&self.buffer[..size])
            .and_then(|mut deserializer| deserializer.deserialize::<T>())
            .map_err(|_| SocketError::UnknownDataFormatReceived)?;
        self.buffer.drain(..size);
        Ok(Some(value))
    }

    fn try_parse_buffer<T: Serializable>(&mut self) -> Result<Vec<T>, State> {
        let mut outputs = Vec::new();
        while let Some(value) = self.try_parse_frame()? {
            outputs.push(value);
        }
        if !outputs.is_empty() {
            Ok(outputs)
        } else if self.buffer.is_empty() {
            Err(State::Empty)
        } else {
            Err(State::Remainder)
        }
    }

    /// Read once from `reader` and return every value completed by the read
    pub fn read_into<T: Serializable, F: Read>(&mut self, reader: &mut F) -> Result<Vec<T>, State> {
        match reader.read(&mut self.chunk) {
            Ok(0) => match self.try_parse_buffer() {
                Ok(outputs) => Ok(outputs),
                Err(State::Empty) => Err(State::Closed),
                Err(State::Remainder) => Err(State::Stream(SocketError::Disconnected)),
                Err(other) => Err(other),
            },
            Ok(amount) => {
                self.buffer.extend_from_slice(&self.chunk[..amount]);
                self.try_parse_buffer()
            }
            Err(err) => match err.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
                    self.try_parse_buffer()
                }
                _ => Err(State::from(err)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{Message, RawMessage};
    use crate::core::serializer::{FlatSerializer, Serializer};
    use std::io::Cursor;

    fn encode(message: &RawMessage) -> Buffer {
        let mut ser = FlatSerializer::new();
        ser.serialize(message);
        ser.finalize()
    }

    fn read_all_messages(
        mut cursor: Cursor<Buffer>,
        mut reader: StreamSerializableReader,
    ) -> Vec<RawMessage> {
        let mut results = Vec::new();
        loop {
            match reader.read_into(&mut cursor) {
                Ok(message) => results.extend(message.into_iter()),
                Err(State::Closed) => break results,
                Err(State::Remainder) | Err(State::Empty) => (),
                Err(State::Stream(err)) => panic!("stream error {:?}", err),
            }
        }
    }

    #[test]
    fn test_single_message_read_2048_batch_size() {
        let original_message = RawMessage::new(vec![0xAA, 0x01, 0x02, 0x03, 0x34]);
        let mut cursor: Cursor<Buffer> = Cursor::new(encode(&original_message));
        let mut reader = StreamSerializableReader::new(2048, 1024);
        let result: Vec<RawMessage> = reader.read_into(&mut cursor).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0], original_message);
    }

    #[test]
    fn test_single_message_read_8_batch_size() {
        let original_message = RawMessage::new(vec![0xAA, 0x01, 0x02, 0x03, 0x34]);
        let cursor: Cursor<Buffer> = Cursor::new(encode(&original_message));
        let reader = StreamSerializableReader::new(8, 1024);
        let result = read_all_messages(cursor, reader);
        assert_eq!(result, vec![original_message]);
    }

    #[test]
    fn test_two_message_read_2048_batch_size() {
        let original_message = RawMessage::new(vec![0xAA, 0x01, 0x02, 0x03, 0x34]);
        let mut buffer: Buffer = encode(&original_message);
        buffer.append(&mut encode(&original_message));

        let mut cursor: Cursor<Buffer> = Cursor::new(buffer);
        let mut reader = StreamSerializableReader::new(2048, 1024);
        let result: Vec<RawMessage> = reader.read_into(&mut cursor).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0], original_message);
        assert_eq!(result[1], original_message);
    }

    #[test]
    fn test_two_message_read_8_batch_size() {
        let first = RawMessage::from("1 1690000000 Hello from producer!");
        let second = RawMessage::from("2 1690000001 Hello from producer!");
        let mut buffer: Buffer = encode(&first);
        buffer.append(&mut encode(&second));

        let cursor: Cursor<Buffer> = Cursor::new(buffer);
        let reader = StreamSerializableReader::new(8, 1024);
        let result = read_all_messages(cursor, reader);
        assert_eq!(result, vec![first, second]);
    }

    #[test]
    fn truncated_stream_reports_disconnect() {
        let mut buffer = encode(&RawMessage::from("cut short"));
        buffer.truncate(buffer.len() - 3);
        let mut cursor: Cursor<Buffer> = Cursor::new(buffer);
        let mut reader = StreamSerializableReader::new(2048, 1024);

        assert!(matches!(
            reader.read_into::<RawMessage, _>(&mut cursor),
            Err(State::Remainder)
        ));
        assert!(matches!(
            reader.read_into::<RawMessage, _>(&mut cursor),
            Err(State::Stream(SocketError::Disconnected))
        ));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let buffer = encode(&RawMessage::new(vec![0u8; 512]));
        let mut cursor: Cursor<Buffer> = Cursor::new(buffer);
        let mut reader = StreamSerializableReader::new(2048, 128);

        assert!(matches!(
            reader.read_into::<RawMessage, _>(&mut cursor),
            Err(State::Stream(SocketError::UnknownDataFormatReceived))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let mut cursor: Cursor<Buffer> = Cursor::new(vec![0x11; 32]);
        let mut reader = StreamSerializableReader::new(2048, 1024);

        assert!(matches!(
            reader.read_into::<RawMessage, _>(&mut cursor),
            Err(State::Stream(SocketError::UnknownDataFormatReceived))
        ));
    }
}
