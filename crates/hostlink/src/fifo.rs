//! Receive byte FIFO.
//!
//! A bounded single-producer single-consumer ring of raw bytes. The
//! producer is the serial receive interrupt (or the thread standing in
//! for it); the consumer is the link-owner context. `push` never blocks
//! and never allocates; backpressure is applied by gating the receive
//! interrupt when the ring nears full (see
//! [`LineIngress`](crate::driver::LineIngress)).

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// The FIFO is full; the byte was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoOverflow;

/// Lock-free SPSC byte ring.
///
/// One slot is sacrificed to distinguish full from empty, so a FIFO of
/// capacity `n` holds at most `n - 1` bytes.
#[derive(Debug)]
pub struct RxFifo {
    buf: Box<[AtomicU8]>,
    /// Producer cursor; only the interrupt side advances it.
    head: AtomicUsize,
    /// Consumer cursor; only the owner context advances it.
    tail: AtomicUsize,
}

impl RxFifo {
    /// Create a FIFO with the given slot count.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "FIFO needs at least two slots");
        let buf = (0..capacity).map(|_| AtomicU8::new(0)).collect();
        RxFifo {
            buf,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn next(&self, index: usize) -> usize {
        if index + 1 == self.buf.len() {
            0
        } else {
            index + 1
        }
    }

    /// Push a byte from the producer side. Fails without blocking when
    /// the ring is full.
    pub fn push(&self, byte: u8) -> Result<(), FifoOverflow> {
        let head = self.head.load(Ordering::Relaxed);
        let next = self.next(head);

        if next == self.tail.load(Ordering::Acquire) {
            return Err(FifoOverflow);
        }

        self.buf[head].store(byte, Ordering::Relaxed);
        self.head.store(next, Ordering::Release);
        Ok(())
    }

    /// Pop a byte from the consumer side.
    pub fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }

        let byte = self.buf[tail].load(Ordering::Relaxed);
        self.tail.store(self.next(tail), Ordering::Release);
        Some(byte)
    }

    /// Whether the ring currently holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + self.buf.len() - tail) % self.buf.len()
    }

    /// Whether fewer than `threshold` free slots remain.
    pub fn near_full(&self, threshold: usize) -> bool {
        let free = self.buf.len() - 1 - self.len();
        free < threshold
    }

    /// Drop all buffered bytes. Consumer side only; used when the
    /// framing layer is reset during recovery.
    pub fn clear(&self) {
        while self.pop().is_some() {}
    }
}
