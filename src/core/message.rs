use crate::core::serializer;
use crate::core::serializer::{Deserializer, Serializable, Serializer};

use crate::core::util::Identifier;
pub use crate::core::serializer::Buffer;

pub type MessageId = Identifier;
pub type ConversationId = Identifier;
pub type PeerId = Identifier;

/// Identification of a message: its own identifier, the exchange it belongs to and the
/// locally assigned identifier of the peer it came from or goes to
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MessageMetadata {
    messageid: MessageId,
    conversationid: ConversationId,
    peerid: Option<PeerId>,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageMetadata {
    pub fn new() -> Self {
        Self {
            messageid: MessageId::new_random(),
            conversationid: ConversationId::new_random(),
            peerid: None,
        }
    }

    pub fn applied_peer_id(self, id: PeerId) -> Self {
        Self {
            peerid: Some(id),
            ..self
        }
    }

    /// Metadata for the next message of the same exchange with the same peer
    pub fn continue_exchange(self) -> Self {
        Self {
            messageid: MessageId::new_random(),
            ..self
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.messageid
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversationid
    }

    pub fn peer_id(&self) -> &Option<PeerId> {
        &self.peerid
    }
}

pub trait Message: Sized {
    type Payload;

    fn new(payload: Self::Payload) -> Self;
    fn with_metadata(meta: MessageMetadata, payload: Self::Payload) -> Self;

    fn metadata(&self) -> &MessageMetadata;
    fn into_metadata(self) -> MessageMetadata;
    fn mutated_metadata<Mutator: FnOnce(MessageMetadata) -> MessageMetadata>(
        self,
        mutator: Mutator,
    ) -> Self {
        let (meta, payload) = self.into_parts();
        Self::with_metadata(mutator(meta), payload)
    }

    fn apply_peer_id(self, peer_id: PeerId) -> Self {
        self.mutated_metadata(|x| x.applied_peer_id(peer_id))
    }

    fn message_id(&self) -> &MessageId {
        self.metadata().message_id()
    }

    fn conversation_id(&self) -> &ConversationId {
        self.metadata().conversation_id()
    }

    fn peer_id(&self) -> &Option<PeerId> {
        self.metadata().peer_id()
    }

    fn payload(&self) -> &Self::Payload;
    fn into_payload(self) -> Self::Payload;

    fn into_parts(self) -> (MessageMetadata, Self::Payload);

    fn continue_exchange(&self, payload: Self::Payload) -> Self {
        Self::with_metadata(self.metadata().clone().continue_exchange(), payload)
    }

    fn continue_exchange_metadata(self, meta: MessageMetadata) -> Self {
        Self::with_metadata(meta.continue_exchange(), self.into_payload())
    }
}

/// A single opaque frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    meta: MessageMetadata,
    payload: Buffer,
}

impl RawMessage {
    /// Payload decoded as UTF-8, invalid sequences replaced
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl Message for RawMessage {
    type Payload = Buffer;

    fn new(payload: Self::Payload) -> Self {
        Self {
            meta: MessageMetadata::new(),
            payload,
        }
    }

    fn with_metadata(meta: MessageMetadata, payload: Self::Payload) -> Self {
        Self { meta, payload }
    }

    fn metadata(&self) -> &MessageMetadata {
        &self.meta
    }

    fn into_metadata(self) -> MessageMetadata {
        self.meta
    }

    fn payload(&self) -> &Buffer {
        &self.payload
    }

    fn into_payload(self) -> Buffer {
        self.payload
    }

    fn into_parts(self) -> (MessageMetadata, Buffer) {
        (self.meta, self.payload)
    }
}

impl From<&str> for RawMessage {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes().to_vec())
    }
}

impl From<String> for RawMessage {
    fn from(text: String) -> Self {
        Self::new(text.into_bytes())
    }
}

impl From<&[u8]> for RawMessage {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

/// Only the message and conversation identifiers travel, the peer identifier is local
impl Serializable for MessageMetadata {
    fn serialize<T: Serializer>(&self, serializer: &mut T) {
        serializer.serialize(&self.messageid);
        serializer.serialize(&self.conversationid);
    }

    fn deserialize<T: Deserializer>(deserializer: &mut T) -> Result<Self, serializer::Error> {
        Ok(Self {
            messageid: deserializer.deserialize()?,
            conversationid: deserializer.deserialize()?,
            peerid: None,
        })
    }
}

impl Serializable for RawMessage {
    fn serialize<T: Serializer>(&self, serializer: &mut T) {
        serializer.serialize(&self.meta);
        serializer.serialize_bytes(self.payload.as_slice());
    }

    fn deserialize<T: Deserializer>(deserializer: &mut T) -> Result<Self, serializer::Error> {
        Ok(Self {
            meta: deserializer.deserialize()?,
            payload: deserializer.deserialize_bytes()?,
        })
    }
}
