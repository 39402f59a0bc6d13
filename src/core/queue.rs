//! Inward event queue shared between the connection workers of a transport and its socket

use crate::core::socket::{OpFlag, SocketError};
use crate::core::transport::{Inward, Operation, PeerEvent};
use crate::core::util::thread::ChgNtfMutex;

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::warn;

/// What happens to a payload arriving at a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageQueueOverflowHandling {
    /// Discard the arriving payload
    Drop,
    /// Discard the oldest queued payload to make room
    DropOldest,
}

/// Overflow handling and the maximum number of queued payloads
pub type MessageQueueingPolicy = (MessageQueueOverflowHandling, usize);

struct QueueState {
    events: VecDeque<Inward>,
    payloads: usize,
    dropped: u64,
}

/// Multi-producer event queue with blocking, non-blocking and timed pops.
///
/// Only payloads count against the policy limit; handshakes, subscriptions and disconnects
/// are always queued so the socket state stays consistent.
#[derive(Clone)]
pub struct InwardQueue {
    state: Arc<ChgNtfMutex<QueueState>>,
    policy: Option<MessageQueueingPolicy>,
}

fn is_payload(inward: &Inward) -> bool {
    matches!(inward.event, PeerEvent::Received(Operation::Payload(_)))
}

impl InwardQueue {
    pub fn new(policy: Option<MessageQueueingPolicy>) -> Self {
        Self {
            state: Arc::new(ChgNtfMutex::new(QueueState {
                events: VecDeque::new(),
                payloads: 0,
                dropped: 0,
            })),
            policy,
        }
    }

    pub fn push(&self, inward: Inward) -> Result<(), SocketError> {
        let mut state = self.state.lock_notify().map_err(SocketError::poisoned)?;
        if is_payload(&inward) {
            if let Some((handling, limit)) = self.policy {
                if state.payloads >= limit {
                    state.dropped += 1;
                    match handling {
                        MessageQueueOverflowHandling::Drop => {
                            warn!(peer = %inward.peer_id, limit, "inward queue full, dropping payload");
                            return Ok(());
                        }
                        MessageQueueOverflowHandling::DropOldest => {
                            if let Some(position) = state.events.iter().position(is_payload) {
                                state.events.remove(position);
                                state.payloads -= 1;
                            }
                            warn!(limit, "inward queue full, dropping oldest payload");
                        }
                    }
                }
            }
            state.payloads += 1;
        }
        state.events.push_back(inward);
        Ok(())
    }

    pub fn pop(&self, flags: OpFlag) -> Result<Inward, SocketError> {
        let deadline = flags.deadline();
        let mut state = self.state.lock().map_err(SocketError::poisoned)?;
        loop {
            if let Some(inward) = state.events.pop_front() {
                if is_payload(&inward) {
                    state.payloads -= 1;
                }
                return Ok(inward);
            }
            state = match deadline.step_flag() {
                OpFlag::NoWait => return Err(SocketError::Timeout),
                OpFlag::Wait => self
                    .state
                    .wait_on_locked(state)
                    .map_err(SocketError::poisoned)?,
                OpFlag::Timeout(remaining) => {
                    self.state
                        .wait_timeout_on_locked(state, remaining)
                        .map_err(SocketError::poisoned)?
                        .0
                }
            };
        }
    }

    /// Number of payloads discarded because of the queueing policy
    pub fn dropped(&self) -> u64 {
        self.state.lock().map(|state| state.dropped).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{PeerId, RawMessage};
    use std::time::{Duration, Instant};

    fn payload(text: &str) -> Inward {
        Inward::received(PeerId::new(1), Operation::Payload(RawMessage::from(text)))
    }

    fn payload_text(inward: Inward) -> String {
        match inward.event {
            PeerEvent::Received(Operation::Payload(message)) => message.payload_lossy().into_owned(),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn pops_in_push_order() {
        let queue = InwardQueue::new(None);
        queue.push(payload("a")).unwrap();
        queue.push(payload("b")).unwrap();
        assert_eq!(payload_text(queue.pop(OpFlag::NoWait).unwrap()), "a");
        assert_eq!(payload_text(queue.pop(OpFlag::NoWait).unwrap()), "b");
        assert_eq!(queue.pop(OpFlag::NoWait), Err(SocketError::Timeout));
    }

    #[test]
    fn timed_pop_expires() {
        let queue = InwardQueue::new(None);
        let started = Instant::now();
        assert_eq!(
            queue.pop(OpFlag::Timeout(Duration::from_millis(20))),
            Err(SocketError::Timeout)
        );
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn blocking_pop_wakes_on_push() {
        let queue = InwardQueue::new(None);
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(payload("late")).unwrap();
        });
        assert_eq!(payload_text(queue.pop(OpFlag::Wait).unwrap()), "late");
        handle.join().unwrap();
    }

    #[test]
    fn overflow_drops_newest_payload() {
        let queue = InwardQueue::new(Some((MessageQueueOverflowHandling::Drop, 1)));
        queue.push(payload("kept")).unwrap();
        queue.push(payload("dropped")).unwrap();
        queue.push(Inward::disconnected(PeerId::new(1))).unwrap();

        assert_eq!(payload_text(queue.pop(OpFlag::NoWait).unwrap()), "kept");
        assert_eq!(
            queue.pop(OpFlag::NoWait).unwrap().event,
            PeerEvent::Disconnected
        );
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn overflow_drops_oldest_payload() {
        let queue = InwardQueue::new(Some((MessageQueueOverflowHandling::DropOldest, 1)));
        queue.push(payload("old")).unwrap();
        queue.push(payload("new")).unwrap();
        assert_eq!(payload_text(queue.pop(OpFlag::NoWait).unwrap()), "new");
        assert_eq!(queue.pop(OpFlag::NoWait), Err(SocketError::Timeout));
    }
}
