//! Deduplicated wake signals.

use std::sync::atomic::{AtomicBool, Ordering};

/// A one-shot wake flag shared between producers and a single consumer.
///
/// Multiple producers may race to wake the consumer; only the first
/// raise between two consumer clears reports `true`, so at most one
/// wake is ever pending. This is the sole mechanism keeping concurrent
/// "work available" posts from piling up.
#[derive(Debug, Default)]
pub struct WakeFlag {
    raised: AtomicBool,
}

impl WakeFlag {
    /// Create a lowered flag.
    pub fn new() -> Self {
        WakeFlag {
            raised: AtomicBool::new(false),
        }
    }

    /// Raise the flag. Returns `true` if this call transitioned it from
    /// lowered to raised, i.e. the caller owns delivering the wake.
    pub fn raise(&self) -> bool {
        !self.raised.swap(true, Ordering::AcqRel)
    }

    /// Lower the flag. Consumer side, called before draining work so a
    /// concurrent raise is not lost.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::Release);
    }

    /// Whether a wake is pending.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}
