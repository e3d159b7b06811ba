//! Transmit message ring allocator.
//!
//! Outbound datagrams are staged in one fixed backing buffer managed as
//! a variable-length ring. Allocation grows from `head`; when an
//! allocation does not fit before the physical end but space is free at
//! the start (the tail has wrapped past the head), the allocation wraps
//! and the unused tail segment is recorded as the `end_gap` so the tail
//! skips it instead of reading garbage.
//!
//! A [`Message`] is an index handle into the ring (not a pointer), owned
//! by exactly one holder at a time: the allocator hands it out, the
//! outgoing queue carries it, and the transmit pump frees it. Freeing is
//! only legal for the oldest or the newest live allocation; anything
//! else is a broken ownership chain and asserts.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::LinkError;

/// Message flag: payload must be sent on the secured stream.
pub const MESSAGE_FLAG_SECURE: u8 = 0x02;
/// Message flag: payload targets the secondary legacy interface.
pub const MESSAGE_FLAG_LEGACY: u8 = 0x04;

const ALIGN: usize = 4;

fn align_up(len: usize) -> usize {
    (len + ALIGN - 1) & !(ALIGN - 1)
}

/// Handle to one staged datagram in the ring.
#[derive(Debug)]
#[must_use = "a Message owns ring space until freed"]
pub struct Message {
    start: usize,
    total_len: usize,
    len: usize,
    offset: usize,
    flags: u8,
}

impl Message {
    /// Bytes appended so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether any bytes have been appended.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the payload goes out on the secured stream.
    pub fn is_secure(&self) -> bool {
        self.flags & MESSAGE_FLAG_SECURE != 0
    }

    /// Mark the payload secured or unsecured.
    pub fn set_secure(&mut self, secure: bool) {
        if secure {
            self.flags |= MESSAGE_FLAG_SECURE;
        } else {
            self.flags &= !MESSAGE_FLAG_SECURE;
        }
    }

    /// Whether the payload targets the legacy interface.
    pub fn is_legacy(&self) -> bool {
        self.flags & MESSAGE_FLAG_LEGACY != 0
    }

    /// Mark the payload as legacy-interface traffic.
    pub fn set_legacy(&mut self, legacy: bool) {
        if legacy {
            self.flags |= MESSAGE_FLAG_LEGACY;
        } else {
            self.flags &= !MESSAGE_FLAG_LEGACY;
        }
    }

    /// Rewind the read cursor to the start of the payload. Used to read
    /// the IP header for port inspection and then hand the full payload
    /// to the frame writer.
    pub fn rewind(&mut self) {
        self.offset = 0;
    }
}

struct RingInner {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
    end_gap: usize,
}

/// The transmit ring allocator.
pub struct MessageRing {
    inner: Mutex<RingInner>,
    space_freed: Condvar,
}

impl MessageRing {
    /// Create a ring over `capacity` bytes of backing store.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= ALIGN * 2, "ring capacity too small");
        MessageRing {
            inner: Mutex::new(RingInner {
                buf: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                end_gap: 0,
            }),
            space_freed: Condvar::new(),
        }
    }

    /// Allocate space for a message of up to `len` payload bytes,
    /// waiting up to `wait` for space to be freed. Fails with
    /// [`LinkError::NoBuffers`] when the wait expires; the caller must
    /// drop its send rather than queue indefinitely.
    pub fn allocate(
        &self,
        secure: bool,
        len: usize,
        wait: Duration,
    ) -> Result<Message, LinkError> {
        let deadline = Instant::now() + wait;
        let mut inner = self.inner.lock();

        loop {
            if let Some(mut message) = Self::try_allocate(&mut inner, len) {
                message.set_secure(secure);
                return Ok(message);
            }

            let now = Instant::now();
            if now >= deadline {
                log::error!("wait for free message space timed out ({len} bytes)");
                return Err(LinkError::NoBuffers);
            }

            if self
                .space_freed
                .wait_for(&mut inner, deadline - now)
                .timed_out()
            {
                log::error!("wait for free message space timed out ({len} bytes)");
                return Err(LinkError::NoBuffers);
            }
        }
    }

    fn try_allocate(inner: &mut RingInner, len: usize) -> Option<Message> {
        let capacity = inner.buf.len();

        if inner.head == inner.tail {
            // Resetting both cursors whenever the ring drains keeps the
            // fit checks below simple.
            inner.head = 0;
            inner.tail = 0;
        }

        let total_len = align_up(len.max(1));

        // Where forward allocation must stop, and whether wrapped
        // allocation is possible.
        let term_end = if inner.head < inner.tail {
            inner.tail
        } else {
            capacity
        };
        let term_start = (inner.head > inner.tail).then_some(inner.tail);

        if inner.head + total_len < term_end {
            let start = inner.head;
            inner.head += total_len;
            Some(Message {
                start,
                total_len,
                len: 0,
                offset: 0,
                flags: 0,
            })
        } else if term_start.is_some_and(|limit| total_len < limit) {
            // Wrap to the start; remember the unused tail segment so the
            // tail can skip it later.
            inner.end_gap = capacity - inner.head;
            inner.head = total_len;
            Some(Message {
                start: 0,
                total_len,
                len: 0,
                offset: 0,
                flags: 0,
            })
        } else {
            None
        }
    }

    /// Append bytes to a message. Fails when the write would exceed the
    /// allocation.
    pub fn append(&self, message: &mut Message, bytes: &[u8]) -> Result<(), LinkError> {
        if message.len + bytes.len() > message.total_len {
            return Err(LinkError::TooLarge {
                len: message.len + bytes.len(),
                mtu: message.total_len,
            });
        }

        let mut inner = self.inner.lock();
        let dst = message.start + message.len;
        inner.buf[dst..dst + bytes.len()].copy_from_slice(bytes);
        message.len += bytes.len();
        Ok(())
    }

    /// Read sequentially from the message's cursor into `out`, returning
    /// the number of bytes copied.
    pub fn read(&self, message: &mut Message, out: &mut [u8]) -> usize {
        let available = message.len - message.offset;
        let count = available.min(out.len());
        if count > 0 {
            let inner = self.inner.lock();
            let src = message.start + message.offset;
            out[..count].copy_from_slice(&inner.buf[src..src + count]);
            message.offset += count;
        }
        count
    }

    /// Copy the full payload of a message out of the ring.
    pub fn payload(&self, message: &Message) -> Vec<u8> {
        let inner = self.inner.lock();
        inner.buf[message.start..message.start + message.len].to_vec()
    }

    /// Return a message's span to the ring.
    ///
    /// The message must be the oldest live allocation (at the tail) or
    /// the newest (ending at the head). Freeing from the middle breaks
    /// the ring invariants and asserts.
    pub fn free(&self, message: Message) {
        let mut inner = self.inner.lock();
        let capacity = inner.buf.len();

        let is_oldest = message.start == inner.tail;
        let is_newest = message.start + message.total_len == inner.head;
        assert!(
            is_oldest || is_newest,
            "freed message does not align with ring head or tail \
             (start={}, tail={}, head={})",
            message.start,
            inner.tail,
            inner.head,
        );

        if is_oldest {
            inner.tail += message.total_len;

            if inner.end_gap != 0 && inner.tail + inner.end_gap >= capacity {
                // Skip the unused segment left by a wrapped allocation.
                inner.tail = 0;
                inner.end_gap = 0;
            }
        } else {
            inner.head = message.start;

            if inner.head == 0 && inner.end_gap != 0 {
                // Undoing a wrapped allocation restores the pre-wrap head.
                inner.head = capacity - inner.end_gap;
                inner.end_gap = 0;
            }
        }

        self.space_freed.notify_all();
    }

    /// Whether the ring is fully reclaimed.
    pub fn is_fully_free(&self) -> bool {
        let inner = self.inner.lock();
        inner.head == inner.tail
    }

    #[cfg(test)]
    fn snapshot(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock();
        (inner.head, inner.tail, inner.end_gap)
    }
}
