use crate::core::message::RawMessage;
use crate::core::serializer;
use crate::core::serializer::{Deserializer, Serializable, Serializer};
use crate::core::transport::Operation;

const STREAM_HEADER_VERSION: u8 = 1u8;

impl Serializable for Operation {
    fn serialize<T: Serializer>(&self, serializer: &mut T) {
        match self {
            Operation::Handshake(model_id) => {
                serializer.serialize(&0u8);
                serializer.serialize(model_id);
            }
            Operation::Payload(message) => {
                serializer.serialize(&1u8);
                serializer.serialize(message);
            }
            Operation::Subscribe(prefix) => {
                serializer.serialize(&2u8);
                serializer.serialize_bytes(prefix);
            }
            Operation::Unsubscribe(prefix) => {
                serializer.serialize(&3u8);
                serializer.serialize_bytes(prefix);
            }
        }
    }

    fn deserialize<T: Deserializer>(deserializer: &mut T) -> Result<Self, serializer::Error> {
        match deserializer.deserialize::<u8>()? {
            0u8 => Ok(Operation::Handshake(deserializer.deserialize()?)),
            1u8 => Ok(Operation::Payload(deserializer.deserialize::<RawMessage>()?)),
            2u8 => Ok(Operation::Subscribe(deserializer.deserialize_bytes()?)),
            3u8 => Ok(Operation::Unsubscribe(deserializer.deserialize_bytes()?)),
            _ => Err(serializer::Error::DemarshallingFailed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    version: u8,
    sequence: u32,
}

impl Header {
    pub fn new(sequence: u32) -> Self {
        Self {
            version: STREAM_HEADER_VERSION,
            sequence,
        }
    }

    pub fn compatible(&self) -> bool {
        self.version == STREAM_HEADER_VERSION
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl Serializable for Header {
    fn serialize<T: Serializer>(&self, serializer: &mut T) {
        serializer.serialize(&self.version);
        serializer.serialize(&self.sequence);
    }

    fn deserialize<T: Deserializer>(deserializer: &mut T) -> Result<Self, serializer::Error> {
        Ok(Self {
            version: deserializer.deserialize()?,
            sequence: deserializer.deserialize()?,
        })
    }
}

/// One frame on a stream connection: a [`Header`] followed by the [`Operation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadedOperation {
    header: Header,
    operation: Operation,
}

impl HeadedOperation {
    pub fn new(header: Header, operation: Operation) -> Self {
        Self { header, operation }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn into_parts(self) -> (Header, Operation) {
        (self.header, self.operation)
    }
}

impl Serializable for HeadedOperation {
    fn serialize<T: Serializer>(&self, serializer: &mut T) {
        serializer.serialize(&self.header);
        serializer.serialize(&self.operation);
    }

    fn deserialize<T: Deserializer>(deserializer: &mut T) -> Result<Self, serializer::Error> {
        Ok(Self {
            header: deserializer.deserialize()?,
            operation: deserializer.deserialize()?,
        })
    }
}
