//! Upward-facing notifications.
//!
//! Unsolicited control frames are not delivered to the client from the
//! byte-draining path; their payloads are parked in a small tagged
//! buffer pool and handed to the [`LinkObserver`] on the owner's next
//! poll tick. Data frames (inbound datagrams) are delivered inline.

use spinel_wire::constants::{
    BEACON_FLAG_JOINABLE, NET_ROLE_CHILD, NET_ROLE_DETACHED, NET_ROLE_LEADER, NET_ROLE_ROUTER,
};
use spinel_wire::{pack, WireError};

/// Size of a legacy ULA prefix in bytes.
pub const LEGACY_ULA_PREFIX_LEN: usize = 8;

/// Number of slots carrying payloads from frame handling to deferred
/// callback dispatch.
pub const NUM_CALLBACK_BUFFERS: usize = 4;

// ============================================================================
// State change flags
// ============================================================================

/// Device role changed.
pub const CHANGED_ROLE: u32 = 0x01;
/// IPv6 unicast address table changed.
pub const CHANGED_IP6_ADDRESS: u32 = 0x02;
/// IPv6 multicast subscription table changed.
pub const CHANGED_IP6_MULTICAST: u32 = 0x04;

// ============================================================================
// Device role
// ============================================================================

/// Role of this device within the mesh, as last reported by the NCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceRole {
    /// Not attached to a network.
    #[default]
    Detached,
    /// Attached as a child.
    Child,
    /// Attached as a router.
    Router,
    /// Acting as the partition leader.
    Leader,
}

impl DeviceRole {
    /// Decode a wire role value; unknown values read as detached.
    pub fn from_wire(value: u8) -> Self {
        match value {
            NET_ROLE_CHILD => DeviceRole::Child,
            NET_ROLE_ROUTER => DeviceRole::Router,
            NET_ROLE_LEADER => DeviceRole::Leader,
            _ => DeviceRole::Detached,
        }
    }

    /// Encode this role as its wire value.
    pub fn to_wire(self) -> u8 {
        match self {
            DeviceRole::Detached => NET_ROLE_DETACHED,
            DeviceRole::Child => NET_ROLE_CHILD,
            DeviceRole::Router => NET_ROLE_ROUTER,
            DeviceRole::Leader => NET_ROLE_LEADER,
        }
    }
}

// ============================================================================
// Scan results
// ============================================================================

/// One network discovered by an active scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanResult {
    /// Channel the beacon was heard on.
    pub channel: u8,
    /// Received signal strength in dBm.
    pub rssi: i8,
    /// Extended address of the beaconing device.
    pub ext_address: [u8; 8],
    /// PAN identifier.
    pub pan_id: u16,
    /// Link quality indicator.
    pub lqi: u8,
    /// Whether the network advertises itself as joinable.
    pub joinable: bool,
    /// Advertised network name.
    pub network_name: String,
}

impl ScanResult {
    /// Parse a scan beacon property payload.
    ///
    /// Layout: `channel u8 | rssi i8 | ext addr eui64 | pan id u16 |
    /// lqi u8 | flags u8 | network name utf8`.
    pub fn parse_beacon(args: &[u8]) -> Result<Self, WireError> {
        let mut offset = 0;

        let (channel, used) = pack::unpack_u8(&args[offset..])?;
        offset += used;
        let (rssi, used) = pack::unpack_i8(&args[offset..])?;
        offset += used;
        let (ext_address, used) = pack::unpack_eui64(&args[offset..])?;
        offset += used;
        let (pan_id, used) = pack::unpack_u16(&args[offset..])?;
        offset += used;
        let (lqi, used) = pack::unpack_u8(&args[offset..])?;
        offset += used;
        let (flags, used) = pack::unpack_u8(&args[offset..])?;
        offset += used;
        let (network_name, _) = pack::unpack_utf8(&args[offset..])?;

        Ok(ScanResult {
            channel,
            rssi,
            ext_address,
            pan_id,
            lqi,
            joinable: flags & BEACON_FLAG_JOINABLE != 0,
            network_name: network_name.to_string(),
        })
    }

    /// Pack this result as a scan beacon payload (the inverse of
    /// [`ScanResult::parse_beacon`], used by NCP simulators).
    pub fn pack_beacon(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.network_name.len());
        pack::pack_u8(&mut buf, self.channel);
        pack::pack_i8(&mut buf, self.rssi);
        pack::pack_eui64(&mut buf, &self.ext_address);
        pack::pack_u16(&mut buf, self.pan_id);
        pack::pack_u8(&mut buf, self.lqi);
        pack::pack_u8(&mut buf, if self.joinable { BEACON_FLAG_JOINABLE } else { 0 });
        pack::pack_utf8(&mut buf, &self.network_name);
        buf
    }
}

// ============================================================================
// Observer
// ============================================================================

/// Callbacks the client registers with the link.
///
/// Control notifications arrive from the owner's poll tick.
/// [`LinkObserver::on_datagram`] is invoked from frame handling and must
/// not call back into the link.
pub trait LinkObserver {
    /// Accumulated state-change flags (`CHANGED_*`).
    fn on_state_changed(&mut self, _flags: u32) {}

    /// A scan result arrived; `None` marks scan completion.
    fn on_scan_result(&mut self, _result: Option<&ScanResult>) {}

    /// The legacy ULA prefix was announced or changed.
    fn on_legacy_ula(&mut self, _prefix: &[u8; LEGACY_ULA_PREFIX_LEN]) {}

    /// NCP recovery completed; cached NCP state (addresses, routes,
    /// subscriptions) must be re-established.
    fn on_recovered(&mut self) {}

    /// An inbound IP datagram was reconstructed from the NCP.
    fn on_datagram(&mut self, _payload: &[u8], _secure: bool, _legacy: bool) {}

    /// A log line forwarded from the NCP's debug stream.
    fn on_ncp_log(&mut self, _line: &str) {}
}

/// Observer that discards every notification.
pub struct NullObserver;

impl LinkObserver for NullObserver {}

// ============================================================================
// Callback buffer pool
// ============================================================================

/// One pool slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum CallbackSlot {
    /// Available for claiming.
    #[default]
    Free,
    /// Holds a parked scan result.
    ScanResult(ScanResult),
    /// Holds a parked legacy ULA prefix.
    LegacyUla([u8; LEGACY_ULA_PREFIX_LEN]),
}

/// Fixed pool carrying payloads from frame handling to deferred
/// dispatch without allocation at claim time.
#[derive(Debug, Default)]
pub(crate) struct CallbackPool {
    slots: [CallbackSlot; NUM_CALLBACK_BUFFERS],
}

impl CallbackPool {
    pub(crate) fn new() -> Self {
        CallbackPool::default()
    }

    fn claim(&mut self, value: CallbackSlot) -> bool {
        for slot in &mut self.slots {
            if *slot == CallbackSlot::Free {
                *slot = value;
                return true;
            }
        }
        false
    }

    /// Park a scan result; fails when all slots are busy.
    pub(crate) fn park_scan_result(&mut self, result: ScanResult) -> bool {
        let ok = self.claim(CallbackSlot::ScanResult(result));
        if !ok {
            log::error!("failed to allocate callback buffer for scan result");
        }
        ok
    }

    /// Park a legacy ULA prefix; fails when all slots are busy.
    pub(crate) fn park_legacy_ula(&mut self, prefix: [u8; LEGACY_ULA_PREFIX_LEN]) -> bool {
        let ok = self.claim(CallbackSlot::LegacyUla(prefix));
        if !ok {
            log::error!("failed to allocate callback buffer for legacy ULA");
        }
        ok
    }

    /// Whether every slot is free.
    pub(crate) fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| *slot == CallbackSlot::Free)
    }

    /// Release every parked payload to `consume`, freeing the slots.
    pub(crate) fn drain(&mut self, mut consume: impl FnMut(CallbackSlot)) {
        for slot in &mut self.slots {
            if *slot != CallbackSlot::Free {
                consume(std::mem::take(slot));
            }
        }
    }

    #[cfg(test)]
    fn busy(&self) -> usize {
        self.slots.iter().filter(|s| **s != CallbackSlot::Free).count()
    }
}
