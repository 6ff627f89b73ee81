//! Inbound message queue between a node's receiver and its event loop.

use crate::message::Message;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Unbounded FIFO of messages waiting to be applied to a node's clock.
///
/// The receiver task pushes, the node loop pops. Clones share the same
/// underlying queue, so a node hands one clone to its receiver and keeps the
/// other.
#[derive(Debug, Clone, Default)]
pub struct InboundQueue {
    inner: Arc<Mutex<VecDeque<Message>>>,
}

impl InboundQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message at the back.
    pub fn push(&self, message: Message) {
        self.lock().push_back(message);
    }

    /// Removes the oldest message, returning it together with the number of
    /// messages still waiting.
    pub fn pop(&self) -> Option<(Message, usize)> {
        let mut queue = self.lock();
        queue.pop_front().map(|message| (message, queue.len()))
    }

    /// Number of waiting messages.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every waiting message and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    // A poisoned lock only means a panicking holder; the deque itself is
    // never left half-updated by push/pop.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    fn msg(t: u64) -> Message {
        Message::new(NodeId(0), NodeId(1), t)
    }

    #[test]
    fn test_fifo_order() {
        let queue = InboundQueue::new();
        queue.push(msg(1));
        queue.push(msg(2));
        queue.push(msg(3));

        assert_eq!(queue.pop(), Some((msg(1), 2)));
        assert_eq!(queue.pop(), Some((msg(2), 1)));
        assert_eq!(queue.pop(), Some((msg(3), 0)));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clones_share_queue() {
        let producer = InboundQueue::new();
        let consumer = producer.clone();

        producer.push(msg(5));
        assert_eq!(consumer.len(), 1);
        assert_eq!(consumer.clear(), 1);
        assert!(producer.is_empty());
    }

    #[test]
    fn test_fifo_under_concurrent_producer() {
        let queue = InboundQueue::new();
        let producer = queue.clone();

        let handle = std::thread::spawn(move || {
            for t in 0..1000 {
                producer.push(msg(t));
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 1000 {
            if let Some((m, _)) = queue.pop() {
                seen.push(m.logical_time);
            } else {
                std::thread::yield_now();
            }
        }
        handle.join().unwrap();

        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }
}
