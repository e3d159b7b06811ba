//! The link owner.
//!
//! [`Link`] is the single execution context allowed to drive the serial
//! driver, frame decoder, transaction engine, and transmit pump. Other
//! contexts reach it through the handles returned by [`Link::new`]:
//! [`LineIngress`](crate::driver::LineIngress) for the receive
//! interrupt, [`DatagramSender`](crate::outbound::DatagramSender) for
//! outbound IP traffic, and [`SafeApi`](crate::marshal::SafeApi) for
//! marshaled property calls.
//!
//! The owner advances by cooperative ticks: [`Link::poll`] drains
//! received bytes, services recovery, marshaled calls, and the transmit
//! pump, then dispatches deferred notifications. Transaction waits keep
//! draining the receive FIFO themselves, so a reply can always arrive
//! while the owner is blocked on it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use spinel_wire::constants::*;
use spinel_wire::hdlc::{self, Decoded};
use spinel_wire::pack;
use spinel_wire::{Frame, WireError};

use crate::config::LinkConfig;
use crate::driver::{LineIngress, SerialDriver};
use crate::error::LinkError;
use crate::event::{
    CallbackPool, CallbackSlot, DeviceRole, LinkObserver, CHANGED_IP6_ADDRESS,
    CHANGED_IP6_MULTICAST, CHANGED_ROLE, LEGACY_ULA_PREFIX_LEN,
};
use crate::marshal::{SafeApi, SafeRequest};
use crate::outbound::DatagramSender;
use crate::security::{self, SECURITY_FLAG_SECURE_MSG_ON_INSECURE_PORT};
use crate::shared::Shared;
use crate::transaction::{Expectation, MatchOutcome, TidCounter, TID_DONT_CARE};

/// Lifecycle state of the link module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Not yet initialized, or finalized.
    Uninitialized,
    /// Serial link up, NCP handshake completed.
    Initialized,
    /// Synchronization with the NCP was lost; recovery is in progress
    /// or has repeatedly failed.
    ResetRecovery,
    /// The host announced low power and quiesced the line.
    HostSleep,
}

/// A captured reply frame.
#[derive(Debug)]
struct ResponseSlot {
    success: bool,
    failure_status: u32,
    payload: Vec<u8>,
}

/// Everything [`Link::new`] hands back.
pub struct LinkParts<D: SerialDriver, O: LinkObserver> {
    /// The owner-context link object.
    pub link: Link<D, O>,
    /// Interrupt-side receive facade.
    pub ingress: LineIngress,
    /// Producer-side datagram submission handle.
    pub sender: DatagramSender,
    /// Cross-context marshaled call handle.
    pub safe: SafeApi,
}

/// The NCP link owner.
pub struct Link<D: SerialDriver, O: LinkObserver> {
    driver: D,
    observer: O,
    config: LinkConfig,
    shared: Arc<Shared>,
    notify_rx: Receiver<()>,
    safe_rx: Receiver<SafeRequest>,
    decoder: hdlc::Decoder,
    tid: TidCounter,
    expectation: Option<Expectation>,
    response: Option<ResponseSlot>,
    /// Reason for the sticky decode failure, if one is latched.
    corrupt: Option<WireError>,
    state: ModuleState,
    last_status: u32,
    state_change_flags: u32,
    pool: CallbackPool,
    scan_complete_pending: bool,
    recovery_pending: bool,
}

impl<D: SerialDriver, O: LinkObserver> Link<D, O> {
    /// Create a link and its cross-context handles. The link starts
    /// uninitialized; call [`Link::initialize`] before issuing
    /// operations.
    pub fn new(driver: D, observer: O, config: LinkConfig) -> LinkParts<D, O> {
        let shared = Arc::new(Shared::new(&config));
        let (notify_tx, notify_rx) = crossbeam_channel::bounded(1);
        let (safe_tx, safe_rx) = crossbeam_channel::unbounded();

        let ingress = LineIngress::new(
            Arc::clone(&shared),
            notify_tx.clone(),
            config.rx_near_full_threshold,
        );
        let sender = DatagramSender::new(Arc::clone(&shared), notify_tx.clone(), &config);
        let safe = SafeApi::new(Arc::clone(&shared), safe_tx, notify_tx);

        let link = Link {
            driver,
            observer,
            config,
            shared,
            notify_rx,
            safe_rx,
            decoder: hdlc::Decoder::new(),
            tid: TidCounter::new(),
            expectation: None,
            response: None,
            corrupt: None,
            state: ModuleState::Uninitialized,
            last_status: STATUS_OK,
            state_change_flags: 0,
            pool: CallbackPool::new(),
            scan_complete_pending: false,
            recovery_pending: false,
        };

        LinkParts {
            link,
            ingress,
            sender,
            safe,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Most recent last-status value reported by the NCP.
    pub fn last_status(&self) -> u32 {
        self.last_status
    }

    /// Device role as last reported by the NCP. Served from cache; the
    /// NCP pushes role changes unsolicited.
    pub fn device_role(&self) -> DeviceRole {
        self.shared.cached_role()
    }

    /// Borrow the observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Mutably borrow the observer.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), LinkError> {
        if self.state == ModuleState::Initialized {
            Ok(())
        } else {
            Err(LinkError::InvalidState)
        }
    }

    // ========================================================================
    // Initialization, finalization, recovery
    // ========================================================================

    /// Bring up the serial link and synchronize with the NCP.
    ///
    /// With `mandatory_reset` the NCP is hard-reset and the handshake
    /// verified; otherwise a warm re-establish probe is attempted first
    /// and the reset path is the fallback.
    pub fn initialize(&mut self, mandatory_reset: bool) -> Result<(), LinkError> {
        if self.state != ModuleState::Uninitialized {
            return Err(LinkError::InvalidState);
        }

        let result = if mandatory_reset {
            self.reset_with_verify()
        } else {
            self.re_establish().or_else(|_| self.reset_with_verify())
        };

        match result {
            Ok(()) => {
                self.state_change_flags = 0;
                self.state = ModuleState::Initialized;
                log::info!("NCP link initialized");
                Ok(())
            }
            Err(err) => {
                log::error!("NCP link initialization failed: {err}");
                self.disable_line();
                Err(err)
            }
        }
    }

    /// Shut the link down. The NCP is asked to go offline (best effort)
    /// and the line is disabled either way so a later
    /// [`Link::initialize`] can recover the interface.
    pub fn finalize(&mut self) -> Result<(), LinkError> {
        let tid = self.tid.next();
        let mut args = Vec::new();
        pack::pack_u8(&mut args, POWER_STATE_OFFLINE);

        let result = self
            .frame_send(tid, CMD_PROP_VALUE_SET, PROP_POWER_STATE, &args)
            .and_then(|()| {
                self.wait_for_response_internal(tid, CMD_PROP_VALUE_IS, PROP_LAST_STATUS, true)
            });

        if let Err(LinkError::Failed(_)) = result {
            log::debug!("NCP answered the offline power state request");
        }

        self.disable_line();
        self.state = ModuleState::Uninitialized;
        Ok(())
    }

    /// Request NCP recovery. Idempotent: a request while recovery is
    /// already pending or running is ignored.
    pub fn initiate_recovery(&mut self) {
        self.note_recovery_needed();
    }

    fn note_recovery_needed(&mut self) {
        if self.state == ModuleState::Initialized {
            self.state = ModuleState::ResetRecovery;
            self.recovery_pending = true;
            log::warn!("NCP recovery initiated");
        }
    }

    fn run_recovery(&mut self) -> Result<(), LinkError> {
        if self.state != ModuleState::ResetRecovery {
            return Ok(());
        }

        match self.reset_with_verify() {
            Ok(()) => {
                self.state = ModuleState::Initialized;
                log::info!("NCP recovery complete");
                self.observer.on_recovered();

                // Datagrams queued before the reset still need the pump.
                if !self.shared.queue.lock().is_empty() {
                    self.shared.pump_wake.raise();
                }
                Ok(())
            }
            Err(err) => {
                log::error!("NCP recovery failed: {err}");
                Err(err)
            }
        }
    }

    /// Hard-reset the NCP and wait for its reset-status announcement,
    /// retrying the handshake a bounded number of times.
    fn reset_with_verify(&mut self) -> Result<(), LinkError> {
        let mut result = Err(LinkError::Timeout);

        for attempt in 1..=self.config.reset_attempts {
            self.disable_line();
            self.driver.hard_reset();
            self.enable_line();

            result = self.wait_for_response_internal(
                TID_DONT_CARE,
                CMD_PROP_VALUE_IS,
                PROP_LAST_STATUS,
                true,
            );

            match &result {
                Ok(_) => break,
                Err(err) => {
                    log::warn!(
                        "NCP reset handshake attempt {attempt}/{} failed: {err}",
                        self.config.reset_attempts
                    );
                }
            }
        }

        let payload = result?;
        let (status, _) = pack::unpack_uint(&payload)?;
        if !is_reset_status(status) {
            return Err(LinkError::Failed(status));
        }
        Ok(())
    }

    /// Probe whether the NCP is already responsive without resetting
    /// it, so a warm host boot keeps the mesh session alive.
    fn re_establish(&mut self) -> Result<(), LinkError> {
        self.disable_line();
        self.enable_line();

        let tid = self.tid.next();
        self.frame_send(tid, CMD_PROP_VALUE_GET, PROP_NET_ROLE, &[])?;
        let payload =
            self.wait_for_response_internal(tid, CMD_PROP_VALUE_IS, PROP_NET_ROLE, true)?;

        let (role, _) = pack::unpack_u8(&payload)?;
        self.shared.cache_role(DeviceRole::from_wire(role));
        log::info!("re-established NCP comm without reset");
        Ok(())
    }

    fn enable_line(&mut self) {
        self.decoder.reset();
        self.corrupt = None;
        self.shared.decode_failed.store(false, Ordering::Release);
        self.shared.fifo.clear();
        self.shared.rx_gated.store(false, Ordering::Release);
        self.driver.enable();
        self.driver.set_rx_enabled(true);
    }

    fn disable_line(&mut self) {
        self.driver.disable();
        self.decoder.reset();
        self.corrupt = None;
        self.shared.decode_failed.store(false, Ordering::Release);
        self.shared.fifo.clear();
    }

    // ========================================================================
    // Host sleep
    // ========================================================================

    /// Announce low power to the NCP and quiesce the receive path. The
    /// line is only disabled once the FIFO is empty and no partial
    /// frame is buffered; otherwise the drain is retried.
    pub fn host_sleep(&mut self) -> Result<(), LinkError> {
        self.ensure_ready()?;

        loop {
            self.set_host_power_state(HOST_POWER_STATE_LOW_POWER)?;

            self.driver.set_rx_enabled(false);
            if self.shared.fifo.is_empty() && self.decoder.pending_len() == 0 {
                self.driver.disable();
                self.state = ModuleState::HostSleep;
                return Ok(());
            }

            // Bytes are still in flight; keep draining and ask again.
            self.driver.set_rx_enabled(true);
            self.process_rx_fifo();
        }
    }

    /// Reverse [`Link::host_sleep`] unconditionally.
    pub fn host_wake(&mut self) -> Result<(), LinkError> {
        if self.state != ModuleState::HostSleep {
            return Err(LinkError::InvalidState);
        }

        self.enable_line();
        self.state = ModuleState::Initialized;
        Ok(())
    }

    // ========================================================================
    // Poll tick
    // ========================================================================

    /// One cooperative owner tick: wait up to `timeout` for work, then
    /// drain received bytes, run pending recovery, serve marshaled
    /// calls, pump outgoing datagrams, and dispatch deferred
    /// notifications.
    pub fn poll(&mut self, timeout: Duration) {
        if !self.work_pending() {
            let _ = self.notify_rx.recv_timeout(timeout);
        }

        self.process_rx_fifo();

        if self.shared.recovery_requested.swap(false, Ordering::AcqRel) {
            self.note_recovery_needed();
        }
        if self.recovery_pending {
            self.recovery_pending = false;
            let _ = self.run_recovery();
        }

        self.service_safe_requests();

        if self.shared.pump_wake.is_raised()
            && self.state == ModuleState::Initialized
        {
            self.pump_outgoing();
        }

        self.dispatch_events();
    }

    fn work_pending(&self) -> bool {
        !self.shared.fifo.is_empty()
            || self.recovery_pending
            || self.shared.recovery_requested.load(Ordering::Acquire)
            || !self.safe_rx.is_empty()
            || (self.shared.pump_wake.is_raised() && self.state == ModuleState::Initialized)
            || self.state_change_flags != 0
            || self.scan_complete_pending
            || !self.pool.is_empty()
    }

    /// Deliver deferred notifications collected during frame handling.
    fn dispatch_events(&mut self) {
        if self.state_change_flags != 0 {
            let flags = std::mem::take(&mut self.state_change_flags);
            self.observer.on_state_changed(flags);
        }

        let mut parked = Vec::new();
        self.pool.drain(|slot| parked.push(slot));
        for slot in parked {
            match slot {
                CallbackSlot::ScanResult(result) => {
                    self.observer.on_scan_result(Some(&result));
                }
                CallbackSlot::LegacyUla(prefix) => self.observer.on_legacy_ula(&prefix),
                CallbackSlot::Free => {}
            }
        }

        if std::mem::take(&mut self.scan_complete_pending) {
            self.observer.on_scan_result(None);
        }
    }

    // ========================================================================
    // Receive path
    // ========================================================================

    /// Drain the receive FIFO into the decoder.
    ///
    /// Stops once the awaited response arrives or a decode failure
    /// latches; reading further could destroy the reply or compound the
    /// corruption. Re-opens the receive interrupt once the FIFO has
    /// drained sufficiently.
    pub(crate) fn process_rx_fifo(&mut self) {
        while self.corrupt.is_none() && self.response.is_none() {
            let Some(byte) = self.shared.fifo.pop() else {
                break;
            };

            match self.decoder.decode(byte) {
                Decoded::Incomplete => {}
                Decoded::Frame(frame) => self.handle_frame(&frame),
                Decoded::Error(reason) => {
                    log::error!("serial frame decode failed: {reason}");
                    self.corrupt = Some(reason);
                    self.shared.decode_failed.store(true, Ordering::Release);
                    self.note_recovery_needed();
                }
            }

            if self.shared.rx_gated.load(Ordering::Acquire)
                && !self
                    .shared
                    .fifo
                    .near_full(2 * self.config.rx_near_full_threshold)
            {
                self.shared.rx_gated.store(false, Ordering::Release);
                self.driver.set_rx_enabled(true);
            }
        }
    }

    fn handle_frame(&mut self, payload: &[u8]) {
        let frame = match Frame::parse(payload) {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("failed to parse incoming frame: {err}");
                return;
            }
        };

        if let Some(expectation) = self.expectation {
            if let MatchOutcome::Reply {
                success,
                is_last_status,
            } = expectation.classify(frame.tid(), frame.command, frame.key)
            {
                let failure_status = if !success && is_last_status {
                    // The status explains why the request failed, and
                    // can also report that the NCP reset underneath us.
                    self.handle_last_status(frame.args)
                        .unwrap_or(STATUS_FAILURE)
                } else {
                    STATUS_FAILURE
                };

                self.response = Some(ResponseSlot {
                    success,
                    failure_status,
                    payload: frame.args.to_vec(),
                });
                return;
            }
        }

        if frame.key == PROP_STREAM_NET || frame.key == PROP_STREAM_NET_INSECURE {
            self.handle_data_frame(&frame);
        } else {
            self.handle_control_frame(&frame);
        }
    }

    fn handle_data_frame(&mut self, frame: &Frame<'_>) {
        let secure = frame.key != PROP_STREAM_NET_INSECURE;
        let legacy = frame.command == CMD_VENDOR_LEGACY_IS;

        if secure && self.shared.security.answer_insecurely() {
            if let (Some(dst_port), Some(open_port)) = (
                security::tcp_dest_port(frame.args),
                self.shared.security.insecure_source_port(),
            ) {
                if dst_port == open_port {
                    // The far side switched to secured traffic on the
                    // provisional port; stop answering insecurely.
                    self.shared
                        .security
                        .set_flag(SECURITY_FLAG_SECURE_MSG_ON_INSECURE_PORT, true);
                    log::debug!("received secure message on insecure port {dst_port}");
                }
            }
        }

        log::debug!(
            "IP RX len: {} secure: {} legacy: {}",
            frame.args.len(),
            secure,
            legacy
        );
        self.observer.on_datagram(frame.args, secure, legacy);
    }

    fn handle_control_frame(&mut self, frame: &Frame<'_>) {
        match frame.command {
            CMD_PROP_VALUE_IS => match frame.key {
                PROP_LAST_STATUS => {
                    self.handle_last_status(frame.args);
                }
                PROP_NET_ROLE => match pack::unpack_u8(frame.args) {
                    Ok((role, _)) => {
                        self.shared.cache_role(DeviceRole::from_wire(role));
                        self.state_change_flags |= CHANGED_ROLE;
                    }
                    Err(err) => log::error!("failed to parse role update: {err}"),
                },
                PROP_VENDOR_LEGACY_ULA_PREFIX => {
                    if frame.args.len() >= LEGACY_ULA_PREFIX_LEN {
                        let mut prefix = [0u8; LEGACY_ULA_PREFIX_LEN];
                        prefix.copy_from_slice(&frame.args[..LEGACY_ULA_PREFIX_LEN]);
                        self.pool.park_legacy_ula(prefix);
                    } else {
                        log::error!("failed to parse legacy ULA update");
                    }
                }
                PROP_MAC_SCAN_STATE => {
                    self.scan_complete_pending = true;
                }
                PROP_IPV6_ADDRESS_TABLE => {
                    self.state_change_flags |= CHANGED_IP6_ADDRESS;
                }
                PROP_IPV6_MULTICAST_ADDRESS_TABLE => {
                    self.state_change_flags |= CHANGED_IP6_MULTICAST;
                }
                PROP_STREAM_DEBUG => self.handle_debug_stream(frame.args),
                _ => {}
            },
            CMD_PROP_VALUE_INSERTED => {
                if frame.key == PROP_MAC_SCAN_BEACON {
                    match crate::event::ScanResult::parse_beacon(frame.args) {
                        Ok(result) => {
                            self.pool.park_scan_result(result);
                        }
                        Err(err) => log::error!("failed to parse scan beacon: {err}"),
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_last_status(&mut self, args: &[u8]) -> Option<u32> {
        match pack::unpack_uint(args) {
            Ok((status, _)) => {
                self.last_status = status;
                log::debug!("NCP last status: {status}");

                if is_reset_status(status) {
                    // The NCP rebooted out from under us.
                    log::warn!("NCP reported unexpected reset (status {status})");
                    self.note_recovery_needed();
                }
                Some(status)
            }
            Err(err) => {
                log::error!("failed to parse last status: {err}");
                None
            }
        }
    }

    fn handle_debug_stream(&mut self, args: &[u8]) {
        for chunk in args.split(|b| *b == b'\n' || *b == b'\r') {
            if chunk.is_empty() {
                continue;
            }
            let line = String::from_utf8_lossy(chunk);
            log::debug!("NCP => {line}");
            self.observer.on_ncp_log(&line);
        }
    }

    // ========================================================================
    // Transmit path
    // ========================================================================

    /// Pack and send one command frame.
    pub(crate) fn frame_send(
        &mut self,
        tid: u8,
        command: u32,
        key: u32,
        args: &[u8],
    ) -> Result<(), LinkError> {
        let body = pack::encode_frame_body(tid, command, key, args);
        let wire = hdlc::encode_frame(&body);
        self.write_bytes(&wire)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut last_progress = Instant::now();
        let mut index = 0;

        while index < bytes.len() {
            if self.driver.try_write(bytes[index]) {
                index += 1;
                last_progress = Instant::now();
            } else if self.shared.rx_gated.load(Ordering::Acquire) {
                // The NCP may itself be blocked sending to us while our
                // receive interrupt is gated; drain to break the tie.
                self.process_rx_fifo();
            } else if last_progress.elapsed() >= self.config.write_timeout {
                log::error!("serial transmitter stalled after {index} bytes");
                return Err(LinkError::Busy);
            } else {
                std::thread::yield_now();
            }
        }

        Ok(())
    }

    /// Send a request and wait for its matching reply.
    pub(crate) fn transact(
        &mut self,
        command: u32,
        key: u32,
        args: &[u8],
        expect_command: u32,
        expect_key: u32,
    ) -> Result<Vec<u8>, LinkError> {
        let tid = self.tid.next();
        self.frame_send(tid, command, key, args)?;
        self.wait_for_response(tid, expect_command, expect_key)
    }

    /// Wait for a frame matching `(tid, command, key)`; a timeout
    /// triggers recovery.
    pub(crate) fn wait_for_response(
        &mut self,
        tid: u8,
        command: u32,
        key: u32,
    ) -> Result<Vec<u8>, LinkError> {
        self.wait_for_response_internal(tid, command, key, false)
    }

    fn wait_for_response_internal(
        &mut self,
        tid: u8,
        command: u32,
        key: u32,
        suppress_recovery: bool,
    ) -> Result<Vec<u8>, LinkError> {
        if let Some(reason) = &self.corrupt {
            return Err(LinkError::Corrupt(reason.clone()));
        }

        self.expectation = Some(Expectation { tid, command, key });
        self.response = None;

        let deadline = Instant::now() + self.config.response_timeout;
        let result = loop {
            self.process_rx_fifo();

            if let Some(slot) = self.response.take() {
                break if slot.success {
                    Ok(slot.payload)
                } else {
                    Err(LinkError::Failed(slot.failure_status))
                };
            }

            if let Some(reason) = &self.corrupt {
                break Err(LinkError::Corrupt(reason.clone()));
            }

            let now = Instant::now();
            if now >= deadline {
                log::error!(
                    "wait for NCP response timed out ({} ms)",
                    self.config.response_timeout.as_millis()
                );
                if !suppress_recovery {
                    self.note_recovery_needed();
                }
                break Err(LinkError::Timeout);
            }

            if self.shared.fifo.is_empty() {
                let _ = self.notify_rx.recv_timeout(deadline - now);
            }
        };

        // A reply arriving after this point no longer matches anything
        // and is routed to the unsolicited path.
        self.expectation = None;
        self.response = None;

        result
    }

    // ========================================================================
    // Outgoing datagram pump
    // ========================================================================

    /// Pause or resume the outgoing datagram flow without discarding
    /// queued traffic. Resuming re-arms the pump if work is queued.
    pub fn set_stall(&mut self, enable: bool) {
        if self.shared.stall.swap(enable, Ordering::AcqRel) != enable
            && !enable
            && !self.shared.queue.lock().is_empty()
        {
            self.shared.pump_wake.raise();
        }
    }

    /// Drain the outgoing packet queue.
    ///
    /// Each datagram may first register its TCP source port as insecure
    /// (provisional join), is then sent on the stream matching its
    /// security and legacy tags, and is freed whether or not the NCP
    /// accepted it. If the queue is left non-empty, exactly one wake is
    /// re-armed so the flow cannot silently stall.
    pub fn pump_outgoing(&mut self) {
        self.shared.pump_wake.clear();

        if self.shared.stall.load(Ordering::Acquire) {
            // Stalled: the unstall path re-arms the wake.
            return;
        }

        let mut error: Option<LinkError> = None;

        if self.state == ModuleState::Initialized {
            while error.is_none() {
                let Some(mut message) = self.shared.queue.lock().dequeue() else {
                    break;
                };

                if self.shared.security.must_open_insecure_source_port() {
                    self.open_source_port(&mut message);
                }

                let (command, key) = if message.is_legacy() {
                    (CMD_VENDOR_LEGACY_SET, PROP_STREAM_NET)
                } else if message.is_secure() {
                    (CMD_PROP_VALUE_SET, PROP_STREAM_NET)
                } else {
                    (CMD_PROP_VALUE_SET, PROP_STREAM_NET_INSECURE)
                };

                let payload = self.shared.ring.payload(&message);
                let mut args = Vec::with_capacity(payload.len() + 2);
                if let Err(err) = pack::pack_data_with_len(&mut args, &payload) {
                    self.shared.ring.free(message);
                    error = Some(err.into());
                    break;
                }

                let tid = self.tid.next();
                let send_result = self.frame_send(tid, command, key, &args);
                self.shared.ring.free(message);

                if let Err(err) = send_result {
                    error = Some(err);
                    break;
                }

                match self.wait_for_response(tid, CMD_PROP_VALUE_IS, PROP_LAST_STATUS) {
                    Ok(reply) => match pack::unpack_uint(&reply) {
                        Ok((status, _)) if status == STATUS_OK => {}
                        Ok((status, _)) => {
                            log::error!("IP packet NCP rejected: {status:#X} {key:#X}");
                        }
                        Err(err) => error = Some(err.into()),
                    },
                    Err(err) => error = Some(err),
                }
            }
        }

        if let Some(err) = error {
            log::error!("outgoing packet pump stopped: {err}");
        }

        if !self.shared.queue.lock().is_empty() {
            // Re-arm so the producer-consumer flow does not stall; the
            // dedup flag guarantees at most one pending wake.
            self.shared.pump_wake.raise();
        }
    }

    /// Register the datagram's TCP source port as insecure so replies
    /// to the provisional join are not filtered out.
    fn open_source_port(&mut self, message: &mut crate::message::Message) {
        let mut header = [0u8; 44];
        message.rewind();
        let read = self.shared.ring.read(message, &mut header);
        message.rewind();

        let Some(port) = security::tcp_source_port(&header[..read]) else {
            log::debug!("open source port: datagram is not TCP");
            return;
        };

        match self.add_unsecure_port(port) {
            Ok(()) => {
                self.shared.security.record_insecure_source_port(port);
            }
            Err(err) => {
                log::error!("open source port {port} failed: {err}");
            }
        }
    }

    // ========================================================================
    // Marshaled calls
    // ========================================================================

    fn service_safe_requests(&mut self) {
        while let Ok(request) = self.safe_rx.try_recv() {
            let result = self.execute_safe(&request.command);
            let _ = request.reply.send(result);
        }
    }

    fn execute_safe(
        &mut self,
        command: &crate::marshal::SafeCommand,
    ) -> Result<crate::marshal::SafeValue, LinkError> {
        use crate::marshal::{SafeCommand, SafeValue};

        match command {
            SafeCommand::Rloc16 => self.rloc16().map(SafeValue::U16),
            SafeCommand::PartitionId => self.partition_id().map(SafeValue::U32),
            SafeCommand::ExtendedAddress => self.extended_address().map(SafeValue::Eui64),
            SafeCommand::VersionString => self.ncp_version().map(SafeValue::Text),
            SafeCommand::InstantRssi => self.instant_rssi().map(SafeValue::I8),
            SafeCommand::LeaderWeight => self.leader_weight().map(SafeValue::U8),
            SafeCommand::NetworkDataVersion => {
                self.network_data_version().map(SafeValue::U8)
            }
            SafeCommand::HardReset => {
                self.driver.hard_reset();
                Ok(SafeValue::None)
            }
        }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}
