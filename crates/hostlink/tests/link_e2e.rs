//! End-to-end link tests against a scripted mock serial device.
//!
//! The mock captures every byte the link writes and injects NCP frames
//! through the interrupt-side ingress, so each test drives the full
//! path: property packing, HDLC framing, FIFO, decoder, transaction
//! matching, pump, and recovery. With auto-acknowledge enabled the mock
//! behaves like a well-behaved NCP: property writes are echoed, list
//! inserts confirmed, and stream writes answered with an OK status.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use hostlink::{
    DatagramSender, DeviceRole, LineIngress, Link, LinkConfig, LinkError, LinkObserver,
    LinkParts, ModuleState, SafeApi, ScanResult, SerialDriver,
};
use spinel_wire::constants::*;
use spinel_wire::{hdlc, pack, Frame};

// ============================================================================
// Mock serial device
// ============================================================================

#[derive(Clone, Default)]
struct MockState {
    tx: Arc<Mutex<Vec<u8>>>,
    resets: Arc<AtomicU32>,
    enabled: Arc<AtomicBool>,
    rx_enabled: Arc<AtomicBool>,
    pending_reset: Arc<AtomicBool>,
    /// Reply to the reset handshake only once this many resets have
    /// happened (lets tests fail the first handshake attempts).
    reply_after_resets: Arc<AtomicU32>,
    /// Frame injected on enable when no reset is pending (warm start).
    warm_frame: Arc<Mutex<Option<Vec<u8>>>>,
    /// Header transaction ID used on injected reset frames.
    reset_tid: Arc<AtomicU32>,
    /// Acknowledge writes like a live NCP.
    auto_ack: Arc<AtomicBool>,
    /// Scripted replies to property reads, by key.
    get_responses: Arc<Mutex<HashMap<u32, Vec<u8>>>>,
    ingress: Arc<OnceLock<LineIngress>>,
}

struct MockSerial {
    state: MockState,
    rx_decoder: hdlc::Decoder,
}

impl MockState {
    fn feed(&self, bytes: &[u8]) {
        let ingress = self.ingress.get().expect("ingress not wired");
        for &byte in bytes {
            ingress.push_byte(byte);
        }
    }

    fn script_get(&self, key: u32, args: &[u8]) {
        self.get_responses.lock().unwrap().insert(key, args.to_vec());
    }

    fn tx_frames(&self) -> Vec<(u8, u32, u32, Vec<u8>)> {
        let bytes = self.tx.lock().unwrap().clone();
        let mut decoder = hdlc::Decoder::new();
        let mut frames = Vec::new();
        for byte in bytes {
            if let hdlc::Decoded::Frame(frame) = decoder.decode(byte) {
                let parsed = Frame::parse(&frame).expect("link sent unparseable frame");
                frames.push((parsed.tid(), parsed.command, parsed.key, parsed.args.to_vec()));
            }
        }
        frames
    }

    fn stream_writes(&self) -> Vec<(u32, u32)> {
        self.tx_frames()
            .into_iter()
            .filter(|(_, _, key, _)| *key == PROP_STREAM_NET || *key == PROP_STREAM_NET_INSECURE)
            .map(|(_, command, key, _)| (command, key))
            .collect()
    }
}

impl MockSerial {
    fn new(state: MockState) -> Self {
        MockSerial {
            state,
            rx_decoder: hdlc::Decoder::new(),
        }
    }

    /// Behave like a live NCP for the frame the host just finished
    /// sending.
    fn auto_ack(&mut self, frame_bytes: &[u8]) {
        let Ok(frame) = Frame::parse(frame_bytes) else {
            return;
        };
        let tid = frame.tid();

        match frame.command {
            CMD_PROP_VALUE_SET => {
                if frame.key == PROP_STREAM_NET || frame.key == PROP_STREAM_NET_INSECURE {
                    let mut args = Vec::new();
                    pack::pack_uint(&mut args, STATUS_OK);
                    self.state
                        .feed(&reply(tid, CMD_PROP_VALUE_IS, PROP_LAST_STATUS, &args));
                } else {
                    self.state
                        .feed(&reply(tid, CMD_PROP_VALUE_IS, frame.key, frame.args));
                }
            }
            CMD_PROP_VALUE_INSERT => {
                self.state
                    .feed(&reply(tid, CMD_PROP_VALUE_INSERTED, frame.key, &[]));
            }
            CMD_PROP_VALUE_REMOVE => {
                self.state
                    .feed(&reply(tid, CMD_PROP_VALUE_REMOVED, frame.key, &[]));
            }
            CMD_PROP_VALUE_GET => {
                let scripted = self.state.get_responses.lock().unwrap().get(&frame.key).cloned();
                if let Some(args) = scripted {
                    self.state
                        .feed(&reply(tid, CMD_PROP_VALUE_IS, frame.key, &args));
                }
            }
            _ => {}
        }
    }
}

impl SerialDriver for MockSerial {
    fn enable(&mut self) {
        self.state.enabled.store(true, Ordering::SeqCst);

        if self.state.pending_reset.swap(false, Ordering::SeqCst) {
            let resets = self.state.resets.load(Ordering::SeqCst);
            if resets >= self.state.reply_after_resets.load(Ordering::SeqCst) {
                let tid = self.state.reset_tid.load(Ordering::SeqCst) as u8;
                let mut args = Vec::new();
                pack::pack_uint(&mut args, STATUS_RESET_SOFTWARE);
                self.state
                    .feed(&reply(tid, CMD_PROP_VALUE_IS, PROP_LAST_STATUS, &args));
            }
        } else if let Some(frame) = self.state.warm_frame.lock().unwrap().take() {
            self.state.feed(&frame);
        }
    }

    fn disable(&mut self) {
        self.state.enabled.store(false, Ordering::SeqCst);
    }

    fn try_write(&mut self, byte: u8) -> bool {
        self.state.tx.lock().unwrap().push(byte);

        if let hdlc::Decoded::Frame(frame) = self.rx_decoder.decode(byte) {
            if self.state.auto_ack.load(Ordering::SeqCst) {
                self.auto_ack(&frame);
            }
        }
        true
    }

    fn set_rx_enabled(&mut self, enabled: bool) {
        self.state.rx_enabled.store(enabled, Ordering::SeqCst);
    }

    fn hard_reset(&mut self) {
        self.state.resets.fetch_add(1, Ordering::SeqCst);
        self.state.pending_reset.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Recording observer
// ============================================================================

#[derive(Default)]
struct Recorder {
    state_changes: Vec<u32>,
    scans: Vec<Option<ScanResult>>,
    ulas: Vec<[u8; 8]>,
    recovered: u32,
    datagrams: Vec<(Vec<u8>, bool, bool)>,
    logs: Vec<String>,
}

impl LinkObserver for Recorder {
    fn on_state_changed(&mut self, flags: u32) {
        self.state_changes.push(flags);
    }

    fn on_scan_result(&mut self, result: Option<&ScanResult>) {
        self.scans.push(result.cloned());
    }

    fn on_legacy_ula(&mut self, prefix: &[u8; 8]) {
        self.ulas.push(*prefix);
    }

    fn on_recovered(&mut self) {
        self.recovered += 1;
    }

    fn on_datagram(&mut self, payload: &[u8], secure: bool, legacy: bool) {
        self.datagrams.push((payload.to_vec(), secure, legacy));
    }

    fn on_ncp_log(&mut self, line: &str) {
        self.logs.push(line.to_string());
    }
}

// ============================================================================
// Helpers
// ============================================================================

const TICK: Duration = Duration::from_millis(0);

type TestLink = Link<MockSerial, Recorder>;

fn reply(tid: u8, command: u32, key: u32, args: &[u8]) -> Vec<u8> {
    hdlc::encode_frame(&pack::encode_frame_body(tid, command, key, args))
}

fn uint_args(value: u32) -> Vec<u8> {
    let mut args = Vec::new();
    pack::pack_uint(&mut args, value);
    args
}

fn tcp_datagram(src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 60];
    packet[0] = 0x60;
    packet[6] = 6; // next header: TCP
    packet[40..42].copy_from_slice(&src_port.to_be_bytes());
    packet[42..44].copy_from_slice(&dst_port.to_be_bytes());
    packet
}

fn udp_datagram() -> Vec<u8> {
    let mut packet = vec![0u8; 52];
    packet[0] = 0x60;
    packet[6] = 17; // next header: UDP
    packet
}

fn test_config() -> LinkConfig {
    LinkConfig {
        response_timeout: Duration::from_millis(50),
        allocator_wait: Duration::from_millis(50),
        ..LinkConfig::default()
    }
}

fn new_link() -> (TestLink, MockState, DatagramSender, SafeApi) {
    let state = MockState::default();
    let driver = MockSerial::new(state.clone());

    let LinkParts {
        link,
        ingress,
        sender,
        safe,
    } = Link::new(driver, Recorder::default(), test_config());
    state.ingress.set(ingress).ok().expect("ingress wired twice");
    (link, state, sender, safe)
}

fn initialized_link() -> (TestLink, MockState, DatagramSender, SafeApi) {
    let (mut link, state, sender, safe) = new_link();
    link.initialize(true).expect("initialize failed");
    (link, state, sender, safe)
}

// ============================================================================
// Initialization and handshake
// ============================================================================

#[test]
fn test_initialize_with_reset_handshake() {
    let (mut link, state, _sender, _safe) = new_link();

    link.initialize(true).unwrap();

    assert_eq!(link.state(), ModuleState::Initialized);
    assert_eq!(state.resets.load(Ordering::SeqCst), 1);
    assert!(state.rx_enabled.load(Ordering::SeqCst));
}

#[test]
fn test_reset_handshake_matches_any_transaction_id() {
    // The reset announcement is matched by command and property alone.
    let (mut link, state, _sender, _safe) = new_link();
    state.reset_tid.store(7, Ordering::SeqCst);

    link.initialize(true).unwrap();
    assert_eq!(link.state(), ModuleState::Initialized);
}

#[test]
fn test_reset_handshake_retries_until_reply() {
    let (mut link, state, _sender, _safe) = new_link();
    // First attempt gets no reply; the second one does.
    state.reply_after_resets.store(2, Ordering::SeqCst);

    link.initialize(true).unwrap();
    assert_eq!(state.resets.load(Ordering::SeqCst), 2);
    assert_eq!(link.state(), ModuleState::Initialized);
}

#[test]
fn test_initialize_fails_after_exhausted_attempts() {
    let (mut link, state, _sender, _safe) = new_link();
    state.reply_after_resets.store(99, Ordering::SeqCst);

    assert!(link.initialize(true).is_err());
    assert_eq!(state.resets.load(Ordering::SeqCst), 3);
    assert_eq!(link.state(), ModuleState::Uninitialized);

    // The NCP comes back; initialization succeeds afterwards.
    state.reply_after_resets.store(0, Ordering::SeqCst);
    link.initialize(true).unwrap();
    assert_eq!(link.state(), ModuleState::Initialized);
}

#[test]
fn test_initialize_warm_reestablish_skips_reset() {
    let (mut link, state, _sender, _safe) = new_link();

    let mut args = Vec::new();
    pack::pack_u8(&mut args, NET_ROLE_ROUTER);
    // First allocated transaction ID is 2.
    *state.warm_frame.lock().unwrap() = Some(reply(2, CMD_PROP_VALUE_IS, PROP_NET_ROLE, &args));

    link.initialize(false).unwrap();

    assert_eq!(link.state(), ModuleState::Initialized);
    assert_eq!(state.resets.load(Ordering::SeqCst), 0);
    assert_eq!(link.device_role(), DeviceRole::Router);
}

#[test]
fn test_operations_require_initialization() {
    let (mut link, _state, _sender, _safe) = new_link();
    assert_eq!(link.rloc16().unwrap_err(), LinkError::InvalidState);
}

#[test]
fn test_finalize_disables_line() {
    let (mut link, state, _sender, _safe) = initialized_link();

    link.finalize().unwrap();

    assert_eq!(link.state(), ModuleState::Uninitialized);
    assert!(!state.enabled.load(Ordering::SeqCst));

    // The offline request went out before the line dropped.
    let frames = state.tx_frames();
    assert!(frames
        .iter()
        .any(|(_, cmd, key, _)| *cmd == CMD_PROP_VALUE_SET && *key == PROP_POWER_STATE));
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn test_property_set_round_trip() {
    let (mut link, state, _sender, _safe) = initialized_link();

    // Reply for the first allocated transaction ID (2), echoing the
    // value.
    state.feed(&reply(2, CMD_PROP_VALUE_IS, PROP_PHY_CHAN, &[0x01]));

    let echoed = link.set_property(PROP_PHY_CHAN, &[0x01]).unwrap();
    assert_eq!(echoed, vec![0x01]);

    let frames = state.tx_frames();
    let (tid, command, key, args) = frames.last().unwrap();
    assert_eq!((*tid, *command, *key), (2, CMD_PROP_VALUE_SET, PROP_PHY_CHAN));
    assert_eq!(args, &[0x01]);
}

#[test]
fn test_mismatched_reply_is_operation_failure() {
    let (mut link, state, _sender, _safe) = initialized_link();

    // Same transaction ID, but a last-status report instead of the
    // expected property echo.
    state.feed(&reply(
        2,
        CMD_PROP_VALUE_IS,
        PROP_LAST_STATUS,
        &uint_args(STATUS_INVALID_ARGUMENT),
    ));

    let err = link.set_channel(11).unwrap_err();
    assert_eq!(err, LinkError::Failed(STATUS_INVALID_ARGUMENT));

    // An NCP-reported failure is not a link failure.
    assert_eq!(link.state(), ModuleState::Initialized);
}

#[test]
fn test_unrelated_tid_reply_is_ignored() {
    let (mut link, state, _sender, _safe) = initialized_link();

    state.feed(&reply(9, CMD_PROP_VALUE_IS, PROP_PHY_CHAN, &[0x0B]));
    state.feed(&reply(2, CMD_PROP_VALUE_IS, PROP_PHY_CHAN, &[0x0B]));

    link.set_channel(11).unwrap();
}

#[test]
fn test_timeout_enters_recovery_then_heals() {
    let (mut link, state, _sender, _safe) = initialized_link();

    // No reply: the wait times out and recovery is initiated.
    assert_eq!(link.rloc16().unwrap_err(), LinkError::Timeout);
    assert_eq!(link.state(), ModuleState::ResetRecovery);

    // Engine calls fail fast while recovery is pending.
    assert_eq!(link.rloc16().unwrap_err(), LinkError::InvalidState);

    // The poll tick runs recovery; the mock answers the handshake.
    link.poll(TICK);
    assert_eq!(link.state(), ModuleState::Initialized);
    assert_eq!(link.observer().recovered, 1);
    assert_eq!(state.resets.load(Ordering::SeqCst), 2);

    // A late reply to the timed-out transaction is dropped.
    let mut args = Vec::new();
    pack::pack_u16(&mut args, 0x1234);
    state.feed(&reply(2, CMD_PROP_VALUE_IS, PROP_THREAD_RLOC16, &args));
    link.poll(TICK);

    // And the link keeps working.
    let mut args = Vec::new();
    pack::pack_u16(&mut args, 0x5678);
    state.feed(&reply(3, CMD_PROP_VALUE_IS, PROP_THREAD_RLOC16, &args));
    assert_eq!(link.rloc16().unwrap(), 0x5678);
}

#[test]
fn test_decode_corruption_is_sticky_until_recovery() {
    let (mut link, state, _sender, _safe) = initialized_link();

    // Garbage terminated by a flag byte fails the frame check.
    state.feed(&[0x41, 0x42, 0x43, hdlc::FLAG]);

    let err = link.rloc16().unwrap_err();
    assert!(matches!(err, LinkError::Corrupt(_)));
    assert_eq!(link.state(), ModuleState::ResetRecovery);

    // A well-formed frame arriving now is dropped at the ingress; it
    // must not resurrect the link behind recovery's back.
    let mut args = Vec::new();
    pack::pack_u16(&mut args, 0x1111);
    state.feed(&reply(3, CMD_PROP_VALUE_IS, PROP_THREAD_RLOC16, &args));
    assert_eq!(link.rloc16().unwrap_err(), LinkError::InvalidState);

    // Recovery resets the framing layer and the link resumes.
    link.poll(TICK);
    assert_eq!(link.state(), ModuleState::Initialized);
    assert_eq!(link.observer().recovered, 1);

    let mut args = Vec::new();
    pack::pack_u16(&mut args, 0x2222);
    state.feed(&reply(3, CMD_PROP_VALUE_IS, PROP_THREAD_RLOC16, &args));
    assert_eq!(link.rloc16().unwrap(), 0x2222);
}

// ============================================================================
// Outgoing datagram pump
// ============================================================================

#[test]
fn test_pump_round_trip() {
    let (mut link, state, sender, _safe) = initialized_link();
    state.auto_ack.store(true, Ordering::SeqCst);

    let datagram = udp_datagram();
    sender.send(&datagram, false).unwrap();
    link.poll(TICK);

    let frames = state.tx_frames();
    let (_, command, key, args) = frames.last().unwrap();
    // Thread is not started, so the datagram rides the insecure stream.
    assert_eq!(*command, CMD_PROP_VALUE_SET);
    assert_eq!(*key, PROP_STREAM_NET_INSECURE);

    let (sent, _) = pack::unpack_data_with_len(args).unwrap();
    assert_eq!(sent, datagram.as_slice());
}

#[test]
fn test_pump_opens_tcp_source_port_for_provisional_join() {
    let (mut link, state, sender, _safe) = initialized_link();
    state.auto_ack.store(true, Ordering::SeqCst);

    // Joining provisionally: the commissioning port is insecure.
    link.add_unsecure_port(19779).unwrap();

    sender.send(&tcp_datagram(49152, 19779), false).unwrap();
    link.poll(TICK);

    // The datagram's own source port was registered before the send.
    let frames = state.tx_frames();
    let mut expected_port = Vec::new();
    pack::pack_u16(&mut expected_port, 49152);
    assert!(frames.iter().any(|(_, cmd, key, args)| {
        *cmd == CMD_PROP_VALUE_INSERT
            && *key == PROP_THREAD_ASSISTING_PORTS
            && args == &expected_port
    }));

    // The datagram itself followed on the insecure stream.
    assert_eq!(
        state.stream_writes().last().unwrap(),
        &(CMD_PROP_VALUE_SET, PROP_STREAM_NET_INSECURE)
    );
}

#[test]
fn test_pump_never_opens_port_for_non_tcp() {
    let (mut link, state, sender, _safe) = initialized_link();
    state.auto_ack.store(true, Ordering::SeqCst);

    link.add_unsecure_port(19779).unwrap();
    sender.send(&udp_datagram(), false).unwrap();
    link.poll(TICK);

    // Exactly one insert: the explicit one. The UDP datagram never
    // triggers source-port registration.
    let inserts = state
        .tx_frames()
        .iter()
        .filter(|(_, cmd, key, _)| {
            *cmd == CMD_PROP_VALUE_INSERT && *key == PROP_THREAD_ASSISTING_PORTS
        })
        .count();
    assert_eq!(inserts, 1);
    assert_eq!(state.stream_writes().len(), 1);
}

#[test]
fn test_pump_recovers_and_resumes_after_error() {
    let (mut link, state, sender, _safe) = initialized_link();

    sender.send(&udp_datagram(), false).unwrap();
    sender.send(&udp_datagram(), false).unwrap();

    // No replies: the first send times out and recovery kicks in. The
    // second datagram must not be lost.
    link.poll(TICK);
    assert_eq!(link.state(), ModuleState::ResetRecovery);
    assert_eq!(state.stream_writes().len(), 1);

    // The NCP behaves again: recovery heals the link and the re-armed
    // pump drains the remaining datagram.
    state.auto_ack.store(true, Ordering::SeqCst);
    link.poll(TICK);

    assert_eq!(link.state(), ModuleState::Initialized);
    assert_eq!(link.observer().recovered, 1);
    assert_eq!(state.stream_writes().len(), 2);
}

#[test]
fn test_stall_pauses_pump_without_dropping() {
    let (mut link, state, sender, _safe) = initialized_link();
    state.auto_ack.store(true, Ordering::SeqCst);

    link.set_stall(true);
    sender.send(&udp_datagram(), false).unwrap();
    link.poll(TICK);

    // Nothing went out while stalled.
    assert!(state.stream_writes().is_empty());

    // Unstalling re-arms the pump.
    link.set_stall(false);
    link.poll(TICK);
    assert_eq!(state.stream_writes().len(), 1);
}

// ============================================================================
// Inbound traffic and notifications
// ============================================================================

#[test]
fn test_inbound_datagrams_reach_observer() {
    let (mut link, state, _sender, _safe) = initialized_link();

    state.feed(&reply(0, CMD_PROP_VALUE_IS, PROP_STREAM_NET, b"secured bytes"));
    state.feed(&reply(
        0,
        CMD_PROP_VALUE_IS,
        PROP_STREAM_NET_INSECURE,
        b"insecure bytes",
    ));
    link.poll(TICK);

    let datagrams = &link.observer().datagrams;
    assert_eq!(datagrams.len(), 2);
    assert_eq!(datagrams[0], (b"secured bytes".to_vec(), true, false));
    assert_eq!(datagrams[1], (b"insecure bytes".to_vec(), false, false));
}

#[test]
fn test_secure_message_on_insecure_port_restores_security() {
    let (mut link, state, sender, _safe) = initialized_link();
    state.auto_ack.store(true, Ordering::SeqCst);

    // Assist a provisional joiner: insecure port enabled, source port
    // opened through the pump while the stack is still down.
    link.add_unsecure_port(19779).unwrap();
    sender.send(&tcp_datagram(49152, 19779), false).unwrap();
    link.poll(TICK);

    // The mesh comes up; outgoing traffic is secured by default now,
    // except replies on the provisional port.
    link.thread_start().unwrap();

    sender.send(&tcp_datagram(49152, 19779), false).unwrap();
    link.poll(TICK);
    assert_eq!(
        state.stream_writes().last().unwrap(),
        &(CMD_PROP_VALUE_SET, PROP_STREAM_NET_INSECURE)
    );

    // A secured inbound message lands on the provisional port: the
    // exception ends.
    state.feed(&reply(
        0,
        CMD_PROP_VALUE_IS,
        PROP_STREAM_NET,
        &tcp_datagram(19779, 49152),
    ));
    link.poll(TICK);

    // Traffic from the provisional port now stays secured.
    sender.send(&tcp_datagram(49152, 19779), false).unwrap();
    link.poll(TICK);
    assert_eq!(
        state.stream_writes().last().unwrap(),
        &(CMD_PROP_VALUE_SET, PROP_STREAM_NET)
    );
}

#[test]
fn test_role_change_updates_cache_and_notifies() {
    let (mut link, state, _sender, safe) = initialized_link();

    let mut args = Vec::new();
    pack::pack_u8(&mut args, NET_ROLE_LEADER);
    state.feed(&reply(0, CMD_PROP_VALUE_IS, PROP_NET_ROLE, &args));
    link.poll(TICK);

    assert_eq!(link.device_role(), DeviceRole::Leader);
    assert_eq!(safe.device_role(), DeviceRole::Leader);
    assert!(link
        .observer()
        .state_changes
        .iter()
        .any(|flags| flags & hostlink::event::CHANGED_ROLE != 0));
}

#[test]
fn test_scan_results_then_completion() {
    let (mut link, state, _sender, _safe) = initialized_link();

    let result = ScanResult {
        channel: 15,
        rssi: -70,
        ext_address: [9, 8, 7, 6, 5, 4, 3, 2],
        pan_id: 0xBEEF,
        lqi: 180,
        joinable: true,
        network_name: "mesh".to_string(),
    };
    state.feed(&reply(
        0,
        CMD_PROP_VALUE_INSERTED,
        PROP_MAC_SCAN_BEACON,
        &result.pack_beacon(),
    ));

    let mut args = Vec::new();
    pack::pack_u8(&mut args, SCAN_STATE_IDLE);
    state.feed(&reply(0, CMD_PROP_VALUE_IS, PROP_MAC_SCAN_STATE, &args));

    link.poll(TICK);

    let scans = &link.observer().scans;
    assert_eq!(scans.len(), 2);
    assert_eq!(scans[0].as_ref().unwrap(), &result);
    assert!(scans[1].is_none());
}

#[test]
fn test_legacy_ula_notification() {
    let (mut link, state, _sender, _safe) = initialized_link();

    let prefix = [0xFD, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
    state.feed(&reply(0, CMD_PROP_VALUE_IS, PROP_VENDOR_LEGACY_ULA_PREFIX, &prefix));
    link.poll(TICK);

    assert_eq!(link.observer().ulas, vec![prefix]);
}

#[test]
fn test_ncp_debug_stream_forwarded() {
    let (mut link, state, _sender, _safe) = initialized_link();

    state.feed(&reply(
        0,
        CMD_PROP_VALUE_IS,
        PROP_STREAM_DEBUG,
        b"line one\nline two\n",
    ));
    link.poll(TICK);

    assert_eq!(link.observer().logs, vec!["line one", "line two"]);
}

#[test]
fn test_unexpected_reset_status_triggers_recovery() {
    let (mut link, state, _sender, _safe) = initialized_link();

    state.feed(&reply(
        0,
        CMD_PROP_VALUE_IS,
        PROP_LAST_STATUS,
        &uint_args(STATUS_RESET_WATCHDOG),
    ));
    link.poll(TICK);
    link.poll(TICK);

    // Recovery ran and completed against the mock's handshake.
    assert_eq!(link.state(), ModuleState::Initialized);
    assert_eq!(link.observer().recovered, 1);
    assert_eq!(state.resets.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Marshaled calls and sleep
// ============================================================================

#[test]
fn test_safe_api_marshals_to_owner() {
    let (mut link, state, _sender, safe) = initialized_link();
    state.auto_ack.store(true, Ordering::SeqCst);

    let mut args = Vec::new();
    pack::pack_u16(&mut args, 0xA5A5);
    state.script_get(PROP_THREAD_RLOC16, &args);

    let caller = std::thread::spawn(move || safe.rloc16());

    let start = Instant::now();
    while !caller.is_finished() && start.elapsed() < Duration::from_secs(2) {
        link.poll(Duration::from_millis(5));
    }

    assert_eq!(caller.join().unwrap().unwrap(), 0xA5A5);
}

#[test]
fn test_safe_api_hard_reset_is_direct() {
    let (mut link, state, _sender, safe) = initialized_link();

    let caller = std::thread::spawn(move || safe.hard_reset());

    let start = Instant::now();
    while !caller.is_finished() && start.elapsed() < Duration::from_secs(2) {
        link.poll(Duration::from_millis(5));
    }

    caller.join().unwrap().unwrap();
    assert_eq!(state.resets.load(Ordering::SeqCst), 2);
}

#[test]
fn test_host_sleep_and_wake() {
    let (mut link, state, _sender, _safe) = initialized_link();

    let mut args = Vec::new();
    pack::pack_u8(&mut args, HOST_POWER_STATE_LOW_POWER);
    state.feed(&reply(2, CMD_PROP_VALUE_IS, PROP_HOST_POWER_STATE, &args));

    link.host_sleep().unwrap();
    assert_eq!(link.state(), ModuleState::HostSleep);
    assert!(!state.enabled.load(Ordering::SeqCst));

    // Engine calls are rejected while asleep.
    assert_eq!(link.rloc16().unwrap_err(), LinkError::InvalidState);

    link.host_wake().unwrap();
    assert_eq!(link.state(), ModuleState::Initialized);
    assert!(state.enabled.load(Ordering::SeqCst));
}
