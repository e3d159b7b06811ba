//! Outgoing packet queue.
//!
//! A fixed-capacity circular queue of [`Message`] handles awaiting
//! transmission. Producers enqueue under the shared-state lock; the
//! transmit pump dequeues from the link-owner context.

use crate::error::LinkError;
use crate::message::Message;

/// Circular queue of staged datagrams.
#[derive(Debug)]
pub struct OutgoingQueue {
    slots: Vec<Option<Message>>,
    head: usize,
    tail: usize,
}

impl OutgoingQueue {
    /// Create a queue with the given depth.
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "queue depth must be non-zero");
        OutgoingQueue {
            slots: (0..depth).map(|_| None).collect(),
            head: 0,
            tail: 0,
        }
    }

    fn advance(&self, index: usize) -> usize {
        if index + 1 == self.slots.len() {
            0
        } else {
            index + 1
        }
    }

    /// Enqueue a message. Fails with [`LinkError::QueueFull`] when the
    /// head slot is occupied; the message is handed back so the caller
    /// can free it.
    pub fn enqueue(&mut self, message: Message) -> Result<(), (Message, LinkError)> {
        if self.slots[self.head].is_some() {
            return Err((message, LinkError::QueueFull));
        }

        self.slots[self.head] = Some(message);
        self.head = self.advance(self.head);
        Ok(())
    }

    /// Dequeue the oldest message, if any.
    pub fn dequeue(&mut self) -> Option<Message> {
        let message = self.slots[self.tail].take()?;
        self.tail = self.advance(self.tail);
        Some(message)
    }

    /// Whether the queue holds no messages.
    pub fn is_empty(&self) -> bool {
        self.slots[self.tail].is_none()
    }
}
