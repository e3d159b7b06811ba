//! Transaction ID allocation and reply matching.

use spinel_wire::constants::PROP_LAST_STATUS;

/// Transaction ID 0 is reserved by the wire protocol.
pub const TID_EMPTY: u8 = 0;
/// Transaction ID used for expectations matched by command and property
/// instead of ID (notifications with no initiating request).
pub const TID_DONT_CARE: u8 = 1;
/// Lowest allocatable transaction ID.
pub const TID_MIN: u8 = TID_DONT_CARE + 1;
/// Wraparound boundary of the allocator; IDs 2..=14 are handed out.
pub const TID_MAX: u8 = 0x0F;

/// Monotonically advancing transaction ID counter.
///
/// The serialized one-request-at-a-time model means an ID can never be
/// reissued while a transaction bearing it is outstanding.
#[derive(Debug, Default)]
pub struct TidCounter {
    last: u8,
}

impl TidCounter {
    /// Create a counter that will hand out [`TID_MIN`] first.
    pub fn new() -> Self {
        TidCounter { last: 0 }
    }

    /// Allocate the next transaction ID.
    pub fn next(&mut self) -> u8 {
        let mut id = self.last + 1;
        if id >= TID_MAX {
            id = TID_MIN;
        }
        if id < TID_MIN {
            id = TID_MIN;
        }
        self.last = id;
        id
    }
}

/// What the transaction engine is currently waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    /// Transaction ID of the request, or [`TID_DONT_CARE`].
    pub tid: u8,
    /// Reply command expected.
    pub command: u32,
    /// Reply property key expected.
    pub key: u32,
}

/// How an incoming frame relates to the pending expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The frame is unrelated; route it to the unsolicited path.
    Unrelated,
    /// The frame answers the expectation.
    Reply {
        /// Whether command and key both matched. A header-ID match with
        /// a different command/key is an NCP-reported failure (the
        /// payload is usually a last-status value).
        success: bool,
        /// Whether the mismatched reply carries a last-status payload.
        is_last_status: bool,
    },
}

impl Expectation {
    /// Classify an incoming frame against this expectation.
    pub fn classify(&self, tid: u8, command: u32, key: u32) -> MatchOutcome {
        if self.tid != TID_DONT_CARE {
            if tid != self.tid {
                return MatchOutcome::Unrelated;
            }
            MatchOutcome::Reply {
                success: self.command == command && self.key == key,
                is_last_status: key == PROP_LAST_STATUS,
            }
        } else if self.command == command && self.key == key {
            MatchOutcome::Reply {
                success: true,
                is_last_status: key == PROP_LAST_STATUS,
            }
        } else {
            MatchOutcome::Unrelated
        }
    }
}
