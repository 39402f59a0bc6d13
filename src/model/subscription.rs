//! # Subscriptions
//! Prefix subscriptions with reference counts and the control frames XPUB and XSUB sockets
//! exchange with their users

use crate::core::message::{Buffer, Message, RawMessage};
use crate::core::socket::SocketError;

use std::collections::HashMap;

const SUBSCRIBE_TAG: u8 = 1;
const UNSUBSCRIBE_TAG: u8 = 0;

/// Outcome of removing one subscription to a prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsubscribed {
    /// There was no subscription to the prefix
    NotSubscribed,
    /// Other subscriptions to the prefix remain
    StillSubscribed,
    /// The last subscription to the prefix was removed
    Removed,
}

/// Counted set of subscribed prefixes. The empty prefix matches every frame.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTable {
    counts: HashMap<Buffer, usize>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this is the first subscription to the prefix
    pub fn subscribe(&mut self, prefix: &[u8]) -> bool {
        let count = self.counts.entry(prefix.to_vec()).or_insert(0);
        *count += 1;
        *count == 1
    }

    pub fn unsubscribe(&mut self, prefix: &[u8]) -> Unsubscribed {
        match self.counts.get_mut(prefix) {
            None => Unsubscribed::NotSubscribed,
            Some(count) if *count > 1 => {
                *count -= 1;
                Unsubscribed::StillSubscribed
            }
            Some(_) => {
                self.counts.remove(prefix);
                Unsubscribed::Removed
            }
        }
    }

    pub fn matches(&self, payload: &[u8]) -> bool {
        self.counts.keys().any(|prefix| payload.starts_with(prefix))
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &Buffer> {
        self.counts.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Removes every subscription held in `other`, returning the prefixes that are no longer
    /// subscribed at all
    pub fn release(&mut self, other: SubscriptionTable) -> Vec<Buffer> {
        let mut removed = Vec::new();
        for (prefix, released) in other.counts {
            if let Some(count) = self.counts.get_mut(&prefix) {
                if *count > released {
                    *count -= released;
                } else {
                    self.counts.remove(&prefix);
                    removed.push(prefix);
                }
            }
        }
        removed
    }
}

/// Subscription control frame: `1` followed by the prefix subscribes, `0` followed by the
/// prefix unsubscribes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFrame {
    Subscribe(Buffer),
    Unsubscribe(Buffer),
}

impl SubscriptionFrame {
    pub fn decode(frame: &[u8]) -> Result<Self, SocketError> {
        match frame.split_first() {
            Some((&SUBSCRIBE_TAG, prefix)) => Ok(SubscriptionFrame::Subscribe(prefix.to_vec())),
            Some((&UNSUBSCRIBE_TAG, prefix)) => {
                Ok(SubscriptionFrame::Unsubscribe(prefix.to_vec()))
            }
            _ => Err(SocketError::InvalidSubscriptionFrame),
        }
    }

    pub fn encode(&self) -> Buffer {
        let (tag, prefix) = match self {
            SubscriptionFrame::Subscribe(prefix) => (SUBSCRIBE_TAG, prefix),
            SubscriptionFrame::Unsubscribe(prefix) => (UNSUBSCRIBE_TAG, prefix),
        };
        let mut frame = Vec::with_capacity(prefix.len() + 1);
        frame.push(tag);
        frame.extend_from_slice(prefix);
        frame
    }

    pub fn prefix(&self) -> &[u8] {
        match self {
            SubscriptionFrame::Subscribe(prefix) | SubscriptionFrame::Unsubscribe(prefix) => {
                prefix
            }
        }
    }

    pub fn into_message(self) -> RawMessage {
        RawMessage::new(self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_subscriptions_per_prefix() {
        let mut table = SubscriptionTable::new();
        assert!(table.subscribe(b"news"));
        assert!(!table.subscribe(b"news"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.unsubscribe(b"news"), Unsubscribed::StillSubscribed);
        assert_eq!(table.unsubscribe(b"news"), Unsubscribed::Removed);
        assert_eq!(table.unsubscribe(b"news"), Unsubscribed::NotSubscribed);
        assert!(table.is_empty());
    }

    #[test]
    fn prefix_matching() {
        let mut table = SubscriptionTable::new();
        assert!(!table.matches(b"anything"));
        table.subscribe(b"wea");
        assert!(table.matches(b"weather 21C"));
        assert!(!table.matches(b"news"));
        assert!(!table.matches(b"we"));
        table.subscribe(b"");
        assert!(table.matches(b"news"));
        assert!(table.matches(b""));
    }

    #[test]
    fn release_reports_prefixes_without_subscribers() {
        let mut total = SubscriptionTable::new();
        let mut peer = SubscriptionTable::new();
        for prefix in [&b"a"[..], &b"b"[..], &b"b"[..]] {
            total.subscribe(prefix);
            peer.subscribe(prefix);
        }
        total.subscribe(b"a");

        let removed = total.release(peer);

        assert_eq!(removed, vec![b"b".to_vec()]);
        assert!(total.matches(b"a"));
        assert!(!total.matches(b"b"));
    }

    #[test]
    fn control_frames() {
        assert_eq!(
            SubscriptionFrame::decode(&[1, b'x']).unwrap(),
            SubscriptionFrame::Subscribe(b"x".to_vec())
        );
        assert_eq!(
            SubscriptionFrame::decode(&[0]).unwrap(),
            SubscriptionFrame::Unsubscribe(Vec::new())
        );
        assert_eq!(
            SubscriptionFrame::Unsubscribe(b"abc".to_vec()).encode(),
            vec![0, b'a', b'b', b'c']
        );
        assert_eq!(
            SubscriptionFrame::decode(&[]),
            Err(SocketError::InvalidSubscriptionFrame)
        );
        assert_eq!(
            SubscriptionFrame::decode(b"hello"),
            Err(SocketError::InvalidSubscriptionFrame)
        );
    }
}
