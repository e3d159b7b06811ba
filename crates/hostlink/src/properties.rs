//! Typed property operations.
//!
//! Each operation follows the same shape: allocate a transaction ID,
//! send the command, wait for the matching reply, unpack the value, and
//! where the NCP echoes the written value, verify the echo. All of them
//! fail fast with [`LinkError::InvalidState`] unless the link is
//! initialized.

use spinel_wire::constants::*;
use spinel_wire::pack;

use crate::driver::SerialDriver;
use crate::error::LinkError;
use crate::event::LinkObserver;
use crate::link::Link;
use crate::security::SECURITY_FLAG_INSECURE_PORTS_ENABLED;
use crate::security::SECURITY_FLAG_THREAD_STARTED;

/// An IPv6 unicast address registration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnicastAddress {
    /// Address bytes in network order.
    pub address: [u8; 16],
    /// Prefix length in bits.
    pub prefix_len: u8,
    /// Whether the address is preferred.
    pub preferred: bool,
    /// Whether the address is valid.
    pub valid: bool,
}

impl<D: SerialDriver, O: LinkObserver> Link<D, O> {
    // ========================================================================
    // Raw property access
    // ========================================================================

    /// Read a property's raw value bytes.
    pub fn get_property(&mut self, key: u32) -> Result<Vec<u8>, LinkError> {
        self.ensure_ready()?;
        self.transact(CMD_PROP_VALUE_GET, key, &[], CMD_PROP_VALUE_IS, key)
    }

    /// Write a property's raw value bytes, returning the echoed value.
    pub fn set_property(&mut self, key: u32, args: &[u8]) -> Result<Vec<u8>, LinkError> {
        self.ensure_ready()?;
        self.transact(CMD_PROP_VALUE_SET, key, args, CMD_PROP_VALUE_IS, key)
    }

    /// Insert into a list-valued property.
    pub fn insert_property(&mut self, key: u32, args: &[u8]) -> Result<Vec<u8>, LinkError> {
        self.ensure_ready()?;
        self.transact(
            CMD_PROP_VALUE_INSERT,
            key,
            args,
            CMD_PROP_VALUE_INSERTED,
            key,
        )
    }

    /// Remove from a list-valued property.
    pub fn remove_property(&mut self, key: u32, args: &[u8]) -> Result<Vec<u8>, LinkError> {
        self.ensure_ready()?;
        self.transact(
            CMD_PROP_VALUE_REMOVE,
            key,
            args,
            CMD_PROP_VALUE_REMOVED,
            key,
        )
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    fn get_bool(&mut self, key: u32) -> Result<bool, LinkError> {
        let payload = self.get_property(key)?;
        Ok(pack::unpack_bool(&payload)?.0)
    }

    fn get_u8(&mut self, key: u32) -> Result<u8, LinkError> {
        let payload = self.get_property(key)?;
        Ok(pack::unpack_u8(&payload)?.0)
    }

    fn get_i8(&mut self, key: u32) -> Result<i8, LinkError> {
        let payload = self.get_property(key)?;
        Ok(pack::unpack_i8(&payload)?.0)
    }

    fn get_u16(&mut self, key: u32) -> Result<u16, LinkError> {
        let payload = self.get_property(key)?;
        Ok(pack::unpack_u16(&payload)?.0)
    }

    fn get_u32(&mut self, key: u32) -> Result<u32, LinkError> {
        let payload = self.get_property(key)?;
        Ok(pack::unpack_u32(&payload)?.0)
    }

    fn get_utf8(&mut self, key: u32) -> Result<String, LinkError> {
        let payload = self.get_property(key)?;
        Ok(pack::unpack_utf8(&payload)?.0.to_string())
    }

    /// Write a boolean property and verify the NCP echoed the value.
    fn set_bool_checked(&mut self, key: u32, value: bool) -> Result<(), LinkError> {
        let mut args = Vec::new();
        pack::pack_bool(&mut args, value);
        let reply = self.set_property(key, &args)?;
        let (echoed, _) = pack::unpack_bool(&reply)?;
        if echoed != value {
            return Err(LinkError::Failed(STATUS_FAILURE));
        }
        Ok(())
    }

    /// Write a `u8` property and verify the echo.
    fn set_u8_checked(&mut self, key: u32, value: u8) -> Result<(), LinkError> {
        let mut args = Vec::new();
        pack::pack_u8(&mut args, value);
        let reply = self.set_property(key, &args)?;
        let (echoed, _) = pack::unpack_u8(&reply)?;
        if echoed != value {
            return Err(LinkError::Failed(STATUS_FAILURE));
        }
        Ok(())
    }

    /// Write a `u16` property and verify the echo.
    fn set_u16_checked(&mut self, key: u32, value: u16) -> Result<(), LinkError> {
        let mut args = Vec::new();
        pack::pack_u16(&mut args, value);
        let reply = self.set_property(key, &args)?;
        let (echoed, _) = pack::unpack_u16(&reply)?;
        if echoed != value {
            return Err(LinkError::Failed(STATUS_FAILURE));
        }
        Ok(())
    }

    pub(crate) fn set_host_power_state(&mut self, state: u8) -> Result<(), LinkError> {
        let mut args = Vec::new();
        pack::pack_u8(&mut args, state);
        let reply = self.transact(
            CMD_PROP_VALUE_SET,
            PROP_HOST_POWER_STATE,
            &args,
            CMD_PROP_VALUE_IS,
            PROP_HOST_POWER_STATE,
        )?;
        let (echoed, _) = pack::unpack_u8(&reply)?;
        if echoed != state {
            return Err(LinkError::Failed(STATUS_FAILURE));
        }
        Ok(())
    }

    // ========================================================================
    // Stack lifecycle
    // ========================================================================

    /// Start the mesh protocol. Outgoing data packets are secured from
    /// here on.
    pub fn thread_start(&mut self) -> Result<(), LinkError> {
        self.thread_enabled(true)
    }

    /// Stop the mesh protocol.
    pub fn thread_stop(&mut self) -> Result<(), LinkError> {
        self.thread_enabled(false)
    }

    fn thread_enabled(&mut self, enabled: bool) -> Result<(), LinkError> {
        self.set_bool_checked(PROP_NET_STACK_UP, enabled)?;
        self.shared()
            .security
            .set_flag(SECURITY_FLAG_THREAD_STARTED, enabled);
        Ok(())
    }

    /// Bring the network interface up.
    pub fn interface_up(&mut self) -> Result<(), LinkError> {
        self.set_bool_checked(PROP_NET_IF_UP, true)
    }

    /// Take the network interface down.
    pub fn interface_down(&mut self) -> Result<(), LinkError> {
        self.set_bool_checked(PROP_NET_IF_UP, false)
    }

    /// Whether the network interface is up.
    pub fn is_interface_enabled(&mut self) -> Result<bool, LinkError> {
        self.get_bool(PROP_NET_IF_UP)
    }

    /// Whether the NCP holds persisted network parameters.
    pub fn is_node_commissioned(&mut self) -> Result<bool, LinkError> {
        self.get_bool(PROP_NET_SAVED)
    }

    /// Erase the NCP's persisted network parameters.
    pub fn persistent_info_erase(&mut self) -> Result<(), LinkError> {
        self.ensure_ready()?;
        let reply = self.transact(
            CMD_NET_CLEAR,
            PROP_LAST_STATUS,
            &[],
            CMD_PROP_VALUE_IS,
            PROP_LAST_STATUS,
        )?;
        let (status, _) = pack::unpack_uint(&reply)?;
        if status != STATUS_OK {
            return Err(LinkError::Failed(status));
        }
        Ok(())
    }

    // ========================================================================
    // Network parameters
    // ========================================================================

    /// Set the radio channel.
    pub fn set_channel(&mut self, channel: u8) -> Result<(), LinkError> {
        self.set_u8_checked(PROP_PHY_CHAN, channel)
    }

    /// Set the PAN identifier.
    pub fn set_pan_id(&mut self, pan_id: u16) -> Result<(), LinkError> {
        self.set_u16_checked(PROP_MAC_15_4_PANID, pan_id)
    }

    /// Set the extended PAN identifier.
    pub fn set_extended_pan_id(&mut self, xpanid: &[u8; 8]) -> Result<(), LinkError> {
        self.set_property(PROP_NET_XPANID, xpanid)?;
        Ok(())
    }

    /// Set the network name and verify the echo.
    pub fn set_network_name(&mut self, name: &str) -> Result<(), LinkError> {
        let mut args = Vec::new();
        pack::pack_utf8(&mut args, name);
        let reply = self.set_property(PROP_NET_NETWORK_NAME, &args)?;
        let (echoed, _) = pack::unpack_utf8(&reply)?;
        if echoed != name {
            return Err(LinkError::Failed(STATUS_FAILURE));
        }
        Ok(())
    }

    /// Set the network master key.
    pub fn set_master_key(&mut self, key: &[u8]) -> Result<(), LinkError> {
        self.set_property(PROP_NET_MASTER_KEY, key)?;
        Ok(())
    }

    /// Set the radio transmit power.
    pub fn set_tx_power(&mut self, power: i8) -> Result<(), LinkError> {
        let mut args = Vec::new();
        pack::pack_i8(&mut args, power);
        self.set_property(PROP_PHY_TX_POWER, &args)?;
        Ok(())
    }

    /// Enable or disable ICMP echo offload on the NCP.
    pub fn set_icmp_echo_enabled(&mut self, enabled: bool) -> Result<(), LinkError> {
        self.set_bool_checked(PROP_IPV6_ICMP_PING_OFFLOAD, enabled)
    }

    /// Enable or disable inbound datagram filtering. The wire property
    /// is the debug passthrough, whose sense is inverted.
    pub fn set_datagram_filter_enabled(&mut self, enabled: bool) -> Result<(), LinkError> {
        self.set_bool_checked(PROP_THREAD_RLOC16_DEBUG_PASSTHRU, !enabled)
    }

    /// Unlock or lock local network data changes. Bracket insertions
    /// into the on-mesh and off-mesh tables with this.
    pub fn allow_local_network_data_change(&mut self, unlock: bool) -> Result<(), LinkError> {
        self.set_bool_checked(PROP_THREAD_ALLOW_LOCAL_NET_DATA_CHANGE, unlock)
    }

    /// Register an IPv6 unicast address on the NCP.
    pub fn add_unicast_address(&mut self, address: &UnicastAddress) -> Result<(), LinkError> {
        let mut args = Vec::new();
        pack::pack_ipv6(&mut args, &address.address);
        pack::pack_u8(&mut args, address.prefix_len);
        pack::pack_u32(&mut args, if address.preferred { u32::MAX } else { 0 });
        pack::pack_u32(&mut args, if address.valid { u32::MAX } else { 0 });
        self.insert_property(PROP_IPV6_ADDRESS_TABLE, &args)?;
        Ok(())
    }

    // ========================================================================
    // Insecure ports
    // ========================================================================

    /// Exempt a port from link-layer security filtering.
    pub fn add_unsecure_port(&mut self, port: u16) -> Result<(), LinkError> {
        let mut args = Vec::new();
        pack::pack_u16(&mut args, port);
        self.insert_property(PROP_THREAD_ASSISTING_PORTS, &args)?;
        self.shared()
            .security
            .set_flag(SECURITY_FLAG_INSECURE_PORTS_ENABLED, true);
        log::debug!("added unsecure port {port}");
        Ok(())
    }

    /// Remove a port's security exemption and clear the derived
    /// provisional-join state.
    pub fn remove_unsecure_port(&mut self, port: u16) -> Result<(), LinkError> {
        let mut args = Vec::new();
        pack::pack_u16(&mut args, port);
        self.remove_property(PROP_THREAD_ASSISTING_PORTS, &args)?;
        self.shared().security.clear_insecure_ports();
        log::debug!("removed unsecure port {port}");
        Ok(())
    }

    // ========================================================================
    // Scanning
    // ========================================================================

    /// Start an active scan over the channels set in `channel_mask`
    /// (bit `n` selects channel `n`). Results arrive through
    /// [`LinkObserver::on_scan_result`]; `None` marks completion.
    pub fn active_scan(&mut self, channel_mask: u32, period_ms: u16) -> Result<(), LinkError> {
        self.ensure_ready()?;

        let mut channels = Vec::new();
        for channel in MIN_SCAN_CHANNEL..=MAX_SCAN_CHANNEL {
            if channel_mask & (1 << channel) != 0 {
                channels.push(channel);
            }
        }

        self.set_property(PROP_MAC_SCAN_MASK, &channels)?;
        self.set_u16_checked(PROP_MAC_SCAN_PERIOD, period_ms)?;
        self.set_u8_checked(PROP_MAC_SCAN_STATE, SCAN_STATE_BEACON)
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// Extended (EUI-64) MAC address.
    pub fn extended_address(&mut self) -> Result<[u8; 8], LinkError> {
        let payload = self.get_property(PROP_MAC_15_4_LADDR)?;
        Ok(pack::unpack_eui64(&payload)?.0)
    }

    /// Mesh-local RLOC16 address.
    pub fn rloc16(&mut self) -> Result<u16, LinkError> {
        self.get_u16(PROP_THREAD_RLOC16)
    }

    /// Network partition identifier.
    pub fn partition_id(&mut self) -> Result<u32, LinkError> {
        self.get_u32(PROP_NET_PARTITION_ID)
    }

    /// Leader weight.
    pub fn leader_weight(&mut self) -> Result<u8, LinkError> {
        self.get_u8(PROP_THREAD_LEADER_WEIGHT)
    }

    /// Local leader weight.
    pub fn local_leader_weight(&mut self) -> Result<u8, LinkError> {
        self.get_u8(PROP_THREAD_LOCAL_LEADER_WEIGHT)
    }

    /// Network data version.
    pub fn network_data_version(&mut self) -> Result<u8, LinkError> {
        self.get_u8(PROP_THREAD_NETWORK_DATA_VERSION)
    }

    /// Instantaneous RSSI.
    pub fn instant_rssi(&mut self) -> Result<i8, LinkError> {
        self.get_i8(PROP_PHY_RSSI)
    }

    /// NCP firmware version string.
    pub fn ncp_version(&mut self) -> Result<String, LinkError> {
        self.get_utf8(PROP_NCP_VERSION)
    }
}
