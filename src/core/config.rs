use crate::core::queue::MessageQueueingPolicy;

use std::time::Duration;

/// Largest frame a stream connection accepts unless configured otherwise
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;
/// Operations a stream connection holds for a peer that is not reading
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct TransportConfiguration {
    pub queue_policy: Option<MessageQueueingPolicy>,
    /// How often stream readers wake up to check whether they should stop
    pub read_timeout: Duration,
    /// Upper bound of a blocked write before the peer is treated as gone
    pub write_timeout: Option<Duration>,
    pub max_frame_size: usize,
    /// Sends to a peer with this many unwritten operations fail with a timeout
    pub send_queue_size: usize,
}

impl Default for TransportConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfiguration {
    pub fn new() -> Self {
        Self {
            queue_policy: None,
            read_timeout: Duration::from_millis(16),
            write_timeout: Some(Duration::from_secs(5)),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
        }
    }

    pub fn with_queue_policy(self, policy: Option<MessageQueueingPolicy>) -> Self {
        Self {
            queue_policy: policy,
            ..self
        }
    }

    pub fn with_write_timeout(self, write_timeout: Option<Duration>) -> Self {
        Self {
            write_timeout,
            ..self
        }
    }

    pub fn with_max_frame_size(self, max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            ..self
        }
    }

    pub fn with_send_queue_size(self, send_queue_size: usize) -> Self {
        Self {
            send_queue_size,
            ..self
        }
    }
}
