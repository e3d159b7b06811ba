//! Cross-context safe-call marshaling.
//!
//! Most of the link assumes a single owning execution context. Callers
//! on other threads go through [`SafeApi`]: one marshaled call at a
//! time is stashed on a channel, the owner executes the real operation
//! during its poll tick, and the result comes back on a private reply
//! channel.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::error::LinkError;
use crate::event::DeviceRole;
use crate::shared::Shared;

/// Operations exposed across contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeCommand {
    /// Read the RLOC16 address.
    Rloc16,
    /// Read the partition identifier.
    PartitionId,
    /// Read the extended MAC address.
    ExtendedAddress,
    /// Read the NCP version string.
    VersionString,
    /// Read the instantaneous RSSI.
    InstantRssi,
    /// Read the leader weight.
    LeaderWeight,
    /// Read the network data version.
    NetworkDataVersion,
    /// Physically reset the NCP without recovery bookkeeping.
    HardReset,
}

/// Result payload of a marshaled call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeValue {
    /// No payload.
    None,
    /// Unsigned 8-bit value.
    U8(u8),
    /// Unsigned 16-bit value.
    U16(u16),
    /// Unsigned 32-bit value.
    U32(u32),
    /// Signed 8-bit value.
    I8(i8),
    /// EUI-64 value.
    Eui64([u8; 8]),
    /// String value.
    Text(String),
}

/// One marshaled call in flight.
pub(crate) struct SafeRequest {
    pub(crate) command: SafeCommand,
    pub(crate) reply: Sender<Result<SafeValue, LinkError>>,
}

/// Handle for issuing link operations from outside the owner context.
///
/// A mutex serializes callers; each call blocks until the owner has
/// executed the operation and replied. Never use this from the owner
/// context itself: the owner cannot serve the request it is blocked on.
pub struct SafeApi {
    lock: Mutex<()>,
    requests: Sender<SafeRequest>,
    notify: Sender<()>,
    shared: Arc<Shared>,
}

impl SafeApi {
    pub(crate) fn new(
        shared: Arc<Shared>,
        requests: Sender<SafeRequest>,
        notify: Sender<()>,
    ) -> Self {
        SafeApi {
            lock: Mutex::new(()),
            requests,
            notify,
            shared,
        }
    }

    fn issue(&self, command: SafeCommand) -> Result<SafeValue, LinkError> {
        let _guard = self.lock.lock();

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.requests
            .send(SafeRequest {
                command,
                reply: reply_tx,
            })
            .map_err(|_| LinkError::InvalidState)?;

        // Full channel means a wake is already pending.
        let _ = self.notify.try_send(());

        reply_rx.recv().map_err(|_| LinkError::InvalidState)?
    }

    /// Read the RLOC16 address.
    pub fn rloc16(&self) -> Result<u16, LinkError> {
        match self.issue(SafeCommand::Rloc16)? {
            SafeValue::U16(value) => Ok(value),
            _ => Err(LinkError::InvalidState),
        }
    }

    /// Read the partition identifier.
    pub fn partition_id(&self) -> Result<u32, LinkError> {
        match self.issue(SafeCommand::PartitionId)? {
            SafeValue::U32(value) => Ok(value),
            _ => Err(LinkError::InvalidState),
        }
    }

    /// Read the extended MAC address.
    pub fn extended_address(&self) -> Result<[u8; 8], LinkError> {
        match self.issue(SafeCommand::ExtendedAddress)? {
            SafeValue::Eui64(value) => Ok(value),
            _ => Err(LinkError::InvalidState),
        }
    }

    /// Read the NCP firmware version string.
    pub fn version_string(&self) -> Result<String, LinkError> {
        match self.issue(SafeCommand::VersionString)? {
            SafeValue::Text(value) => Ok(value),
            _ => Err(LinkError::InvalidState),
        }
    }

    /// Read the instantaneous RSSI.
    pub fn instant_rssi(&self) -> Result<i8, LinkError> {
        match self.issue(SafeCommand::InstantRssi)? {
            SafeValue::I8(value) => Ok(value),
            _ => Err(LinkError::InvalidState),
        }
    }

    /// Read the leader weight.
    pub fn leader_weight(&self) -> Result<u8, LinkError> {
        match self.issue(SafeCommand::LeaderWeight)? {
            SafeValue::U8(value) => Ok(value),
            _ => Err(LinkError::InvalidState),
        }
    }

    /// Read the network data version.
    pub fn network_data_version(&self) -> Result<u8, LinkError> {
        match self.issue(SafeCommand::NetworkDataVersion)? {
            SafeValue::U8(value) => Ok(value),
            _ => Err(LinkError::InvalidState),
        }
    }

    /// Physically reset the NCP.
    pub fn hard_reset(&self) -> Result<(), LinkError> {
        self.issue(SafeCommand::HardReset).map(|_| ())
    }

    /// Device role, served from the cache the owner keeps current.
    pub fn device_role(&self) -> DeviceRole {
        self.shared.cached_role()
    }

    /// Ask the owner to run NCP recovery. Deduplicated; safe to call
    /// from any context.
    pub fn request_recovery(&self) {
        self.shared.recovery_requested.store(true, Ordering::Release);
        let _ = self.notify.try_send(());
    }
}
