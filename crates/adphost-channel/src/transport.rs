use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use adphost_device::{
    DevChan, DevSwitch, Device, DeviceError, IoctlReply, IoctlRequest, DEFAULT_MAX_PACKET,
};

use crate::channels::{ChannelId, CHANNEL_COUNT};
use crate::codec::{
    decode_packet, encode_packet, ChannelHeader, Packet, CHANNEL_HEADER_SIZE, FLAG_HEARTBEAT,
    FLAG_RELIABLE, FLAG_RESEND,
};
use crate::error::{ChannelError, Result};
use crate::wirelog::{Direction, WireLog};

/// Default silence threshold before a heartbeat is emitted.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Handler for packets arriving on one logical channel.
pub type ChannelCallback = Box<dyn FnMut(ChannelId, Bytes)>;

/// Handler for the unsequenced application packet stream.
pub type ApplicationCallback = Box<dyn FnMut(Bytes)>;

/// Link-level configuration, fixed for the session.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Sequence/acknowledgement bookkeeping on this link.
    pub reliable: bool,
    /// Whether this session uses heartbeats at all.
    pub heartbeat: bool,
    /// Silence threshold between heartbeats.
    pub heartbeat_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reliable: true,
            heartbeat: true,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Running counters kept by the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub sent: u64,
    pub received: u64,
    pub delivered: u64,
    pub retransmitted: u64,
    pub resend_requests_sent: u64,
    pub resend_requests_honoured: u64,
    pub duplicates_dropped: u64,
    pub gaps_detected: u64,
    pub heartbeats_sent: u64,
}

enum Handler {
    /// Default handler: drop the packet and warn.
    Unclaimed,
    Callback(ChannelCallback),
    /// One-shot capture slot backing a blocking read.
    Capture(Option<Bytes>),
}

struct SentPacket {
    seq: u8,
    wire: Bytes,
}

/// Reliable, ordered, multiplexed logical channels over one device.
///
/// All state for one link lives here; independent links are independent
/// values. Nothing happens outside the processing loop: registering
/// handlers or queueing writes only takes effect once the loop runs
/// (see the pump methods).
pub struct ChannelTransport {
    switch: DevSwitch,
    handlers: Vec<Handler>,
    app_handler: Option<ApplicationCallback>,
    pub(crate) idle_hooks: Vec<Box<dyn FnMut()>>,
    config: ChannelConfig,

    /// Last sequence number stamped onto an outgoing reliable packet.
    home_seq: u8,
    /// Last in-order sequence accepted from the peer.
    oppo_seq: u8,
    /// Packets queued for their first transmission.
    fresh: VecDeque<(ChannelId, Bytes)>,
    /// Transmitted packets awaiting acknowledgement, ascending sequence.
    unacked: VecDeque<SentPacket>,
    resending: bool,
    resend_pos: usize,

    heartbeat_on: bool,
    last_rx: Instant,
    last_heartbeat: Option<Instant>,

    log: WireLog,
    stats: TransportStats,
}

impl ChannelTransport {
    /// Open the named device and build the channel layer over it.
    ///
    /// Both the debug and application packet classes are opened; the
    /// handler table starts with every channel unclaimed and the
    /// sequence counters at zero.
    pub fn open(
        device: Box<dyn Device>,
        name: &str,
        arg: Option<&str>,
        config: ChannelConfig,
    ) -> Result<Self> {
        let mut switch = DevSwitch::open(device, name, arg, DevChan::Debug)?;
        switch.open_chan(DevChan::Application)?;

        Ok(Self {
            switch,
            handlers: (0..CHANNEL_COUNT).map(|_| Handler::Unclaimed).collect(),
            app_handler: None,
            idle_hooks: Vec::new(),
            config,
            home_seq: 0,
            oppo_seq: 0,
            fresh: VecDeque::new(),
            unacked: VecDeque::new(),
            resending: false,
            resend_pos: 0,
            heartbeat_on: false,
            last_rx: Instant::now(),
            last_heartbeat: None,
            log: WireLog::default(),
            stats: TransportStats::default(),
        })
    }

    /// Release both packet classes; the device closes with the last one.
    pub fn close(mut self) -> Result<()> {
        self.switch.close_chan(DevChan::Application)?;
        self.switch.close_chan(DevChan::Debug)?;
        Ok(())
    }

    /// Install `callback` as the handler for `chan`, replacing the
    /// default or any previous handler.
    pub fn register_callback(
        &mut self,
        chan: ChannelId,
        callback: impl FnMut(ChannelId, Bytes) + 'static,
    ) {
        self.handlers[chan.index()] = Handler::Callback(Box::new(callback));
    }

    /// Restore the default drop-and-warn handler for `chan`.
    pub fn unregister_callback(&mut self, chan: ChannelId) {
        self.handlers[chan.index()] = Handler::Unclaimed;
    }

    /// Install the handler for the application packet stream.
    pub fn register_application_handler(&mut self, callback: impl FnMut(Bytes) + 'static) {
        self.app_handler = Some(Box::new(callback));
    }

    /// Add an every-round hook (GUI pumping and the like). The table has
    /// a small fixed capacity.
    pub fn add_idle_hook(&mut self, hook: impl FnMut() + 'static) -> Result<()> {
        if self.idle_hooks.len() >= crate::pump::MAX_IDLE_HOOKS {
            return Err(ChannelError::HooksFull);
        }
        self.idle_hooks.push(Box::new(hook));
        Ok(())
    }

    /// Block until one packet arrives on `chan` and return its payload.
    ///
    /// Usage error if a callback is registered on the channel. A link
    /// that never produces a packet polls forever.
    pub fn read(&mut self, chan: ChannelId) -> Result<Bytes> {
        if let Handler::Callback(_) = self.handlers[chan.index()] {
            return Err(ChannelError::HandlerRegistered(chan));
        }
        self.handlers[chan.index()] = Handler::Capture(None);
        loop {
            self.round(crate::pump::Goal::Read);
            if let Handler::Capture(slot) = &mut self.handlers[chan.index()] {
                if let Some(payload) = slot.take() {
                    self.handlers[chan.index()] = Handler::Unclaimed;
                    return Ok(payload);
                }
            }
        }
    }

    /// Queue a packet on `chan` and drive the loop until the write
    /// queues have fully drained.
    pub fn write(&mut self, chan: ChannelId, payload: Bytes) -> Result<()> {
        self.check_payload(&payload)?;
        self.fresh.push_back((chan, payload));
        self.pump_until_write_drained();
        Ok(())
    }

    /// Queue a packet on `chan` without driving the loop (fire and
    /// forget); it goes out on a later round.
    pub fn write_async(&mut self, chan: ChannelId, payload: Bytes) -> Result<()> {
        self.check_payload(&payload)?;
        self.fresh.push_back((chan, payload));
        Ok(())
    }

    fn check_payload(&self, payload: &Bytes) -> Result<()> {
        let size = payload.len() + CHANNEL_HEADER_SIZE;
        if size > DEFAULT_MAX_PACKET {
            return Err(DeviceError::PacketTooLarge {
                size,
                max: DEFAULT_MAX_PACKET,
            }
            .into());
        }
        Ok(())
    }

    /// Drain both send queues and zero the sequence counters. Used when
    /// resynchronising after a target reset.
    pub fn reset(&mut self) {
        self.fresh.clear();
        self.unacked.clear();
        self.home_seq = 0;
        self.oppo_seq = 0;
        self.resending = false;
        self.resend_pos = 0;
        self.last_heartbeat = None;
    }

    /// Enable or suppress heartbeats. They start suppressed so boot
    /// negotiation is not disturbed.
    pub fn set_heartbeat_active(&mut self, on: bool) {
        self.heartbeat_on = on;
    }

    /// Start logging packets to `path`; false if the file cannot be
    /// opened (logging stays off, nothing else is affected).
    pub fn enable_wire_log(&mut self, path: &Path) -> bool {
        self.log.enable(path)
    }

    pub fn disable_wire_log(&mut self) {
        self.log.disable();
    }

    /// Out-of-band control pass-through to the device.
    pub fn ioctl(&mut self, req: IoctlRequest) -> Result<IoctlReply> {
        Ok(self.switch.ioctl(req)?)
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Packets transmitted but not yet acknowledged by the peer.
    pub fn outstanding(&self) -> usize {
        self.unacked.len()
    }

    // ---- loop internals, driven from the pump methods ----

    /// One write attempt: flush a parked partial write, or retransmit
    /// the next packet of a resend cycle, or send one fresh packet.
    /// Returns true when nothing is left to send.
    pub(crate) fn service_write(&mut self) -> bool {
        match self.switch.flush_pending_write() {
            Ok(true) => {}
            Ok(false) => return false,
            Err(err) => {
                warn!(%err, "write flush failed");
                return false;
            }
        }

        if self.resending {
            if self.resend_pos < self.unacked.len() {
                let seq = self.unacked[self.resend_pos].seq;
                let wire = self.unacked[self.resend_pos].wire.clone();
                match self.switch.write(DevChan::Debug, wire.clone()) {
                    Ok(()) => {
                        self.resend_pos += 1;
                        self.stats.retransmitted += 1;
                        self.log_wire(Direction::Tx, &wire);
                        debug!(seq, "retransmitted");
                    }
                    Err(err) => warn!(%err, seq, "retransmit failed"),
                }
                return self.write_queues_empty();
            }
            self.resending = false;
            self.resend_pos = 0;
        }

        if let Some((chan, payload)) = self.fresh.pop_front() {
            let sequenced = self.config.reliable && !chan.is_boot();
            let home_seq = if sequenced {
                self.home_seq.wrapping_add(1)
            } else {
                self.home_seq
            };
            let header = ChannelHeader {
                channel: chan,
                home_seq,
                oppo_seq: self.oppo_seq,
                flags: if sequenced { FLAG_RELIABLE } else { 0 },
            };
            let wire = encode_packet(header, &payload);
            match self.switch.write(DevChan::Debug, wire.clone()) {
                Ok(()) => {
                    if sequenced {
                        self.home_seq = home_seq;
                        self.unacked.push_back(SentPacket {
                            seq: home_seq,
                            wire,
                        });
                    }
                    self.stats.sent += 1;
                    self.log_packet(Direction::Tx, header, &payload);
                }
                Err(err) => {
                    warn!(%err, channel = chan.name(), "send failed, packet dropped");
                }
            }
        }

        self.write_queues_empty()
    }

    fn write_queues_empty(&self) -> bool {
        self.fresh.is_empty() && !self.resending && self.switch.write_finished()
    }

    /// One debug-class read attempt, processed fully.
    /// Returns the number of packets delivered to a channel (0 or 1).
    pub(crate) fn service_read(&mut self) -> usize {
        let raw = match self.switch.read(DevChan::Debug, true) {
            Ok(Some(raw)) => raw,
            Ok(None) => return 0,
            Err(DeviceError::BadPacket) => {
                warn!("malformed packet on debug stream");
                if self.config.reliable {
                    self.send_resend_request();
                }
                return 0;
            }
            Err(err) => {
                warn!(%err, "debug read failed");
                return 0;
            }
        };

        let packet = match decode_packet(&raw) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(%err, "dropping undecodable packet");
                return 0;
            }
        };

        self.stats.received += 1;
        self.last_rx = Instant::now();
        self.log.record(Direction::Rx, &packet);
        self.process_packet(packet)
    }

    fn process_packet(&mut self, packet: Packet) -> usize {
        let header = packet.header;

        if header.is_heartbeat() {
            trace!(channel = header.channel.name(), "heartbeat from peer");
            if self.config.reliable {
                self.retire_acknowledged(header.oppo_seq);
            }
            return 0;
        }

        if header.is_resend() {
            self.handle_resend_request(header);
            return 0;
        }

        if self.config.reliable && !header.channel.is_boot() {
            let expected = self.oppo_seq.wrapping_add(1);
            let delta = header.home_seq.wrapping_sub(expected);
            if delta == 0 {
                self.oppo_seq = expected;
                self.retire_acknowledged(header.oppo_seq);
            } else if delta < 0x80 {
                self.stats.gaps_detected += 1;
                warn!(
                    got = header.home_seq,
                    expected, "sequence gap, requesting resend"
                );
                self.send_resend_request();
                return 0;
            } else {
                self.stats.duplicates_dropped += 1;
                trace!(got = header.home_seq, "duplicate packet dropped");
                return 0;
            }
        }

        self.deliver(packet)
    }

    fn deliver(&mut self, packet: Packet) -> usize {
        let chan = packet.header.channel;
        match &mut self.handlers[chan.index()] {
            Handler::Unclaimed => {
                warn!(channel = chan.name(), "no handler registered, dropping packet");
                0
            }
            Handler::Callback(callback) => {
                callback(chan, packet.payload);
                self.stats.delivered += 1;
                1
            }
            Handler::Capture(slot) => {
                *slot = Some(packet.payload);
                self.stats.delivered += 1;
                1
            }
        }
    }

    /// Retire every unacknowledged packet at or before `acked`
    /// (cumulative acknowledgement, serial-number order).
    fn retire_acknowledged(&mut self, acked: u8) {
        let mut popped = false;
        let mut found = false;
        while let Some(front) = self.unacked.front() {
            if acked.wrapping_sub(front.seq) < 0x80 {
                found |= front.seq == acked;
                self.unacked.pop_front();
                popped = true;
                if self.resending {
                    self.resend_pos = self.resend_pos.saturating_sub(1);
                }
            } else {
                break;
            }
        }
        if popped && !found {
            warn!(acked, "peer acknowledged a packet that was not outstanding");
        }
    }

    /// The peer asked for retransmission; its `oppo_seq` names the last
    /// of our packets it holds.
    fn handle_resend_request(&mut self, header: ChannelHeader) {
        let theirs = header.oppo_seq;
        self.stats.resend_requests_honoured += 1;

        if theirs == self.home_seq {
            debug!(theirs, "resend request, peer already has everything");
            return;
        }

        // Everything the peer does hold is implicitly acknowledged.
        self.retire_acknowledged(theirs);

        let want = theirs.wrapping_add(1);
        match self.unacked.front() {
            Some(front) if front.seq == want => {
                self.resending = true;
                self.resend_pos = 0;
                debug!(from = want, count = self.unacked.len(), "retransmitting");
            }
            other => {
                // The peer is missing data this side no longer holds;
                // the send queue can no longer be trusted.
                panic!(
                    "resend requested from sequence {want} but retransmit queue starts at {:?}",
                    other.map(|p| p.seq)
                );
            }
        }
    }

    fn send_resend_request(&mut self) {
        let header = ChannelHeader {
            channel: ChannelId::HostDebug,
            home_seq: self.home_seq,
            oppo_seq: self.oppo_seq,
            flags: FLAG_RESEND,
        };
        let wire = encode_packet(header, b"");
        match self.switch.write(DevChan::Debug, wire.clone()) {
            Ok(()) => {
                self.stats.resend_requests_sent += 1;
                self.log_wire(Direction::Tx, &wire);
            }
            // A busy write slot skips the request this tick; the next
            // gap or bad packet raises it again.
            Err(err) => warn!(%err, "could not send resend request"),
        }
    }

    /// Emit a heartbeat once the link has been silent for a full
    /// interval, at most one per interval.
    pub(crate) fn maybe_heartbeat(&mut self) {
        if !self.config.heartbeat || !self.heartbeat_on {
            return;
        }
        let now = Instant::now();
        if now.duration_since(self.last_rx) < self.config.heartbeat_interval {
            return;
        }
        if let Some(last) = self.last_heartbeat {
            if now.duration_since(last) < self.config.heartbeat_interval {
                return;
            }
        }

        let header = ChannelHeader {
            channel: ChannelId::HostDebug,
            home_seq: self.home_seq,
            oppo_seq: self.oppo_seq,
            flags: FLAG_HEARTBEAT,
        };
        let wire = encode_packet(header, b"");
        match self.switch.write(DevChan::Debug, wire.clone()) {
            Ok(()) => {
                self.last_heartbeat = Some(now);
                self.stats.heartbeats_sent += 1;
                self.log_wire(Direction::Tx, &wire);
                trace!("heartbeat sent");
            }
            Err(err) => warn!(%err, "could not send heartbeat"),
        }
    }

    /// Opportunistically drain one application-class packet.
    pub(crate) fn service_application(&mut self) {
        match self.switch.read(DevChan::Application, false) {
            Ok(Some(raw)) => match &mut self.app_handler {
                Some(handler) => handler(raw),
                None => trace!(len = raw.len(), "application packet discarded, no handler"),
            },
            Ok(None) => {}
            Err(err) => warn!(%err, "application read failed"),
        }
    }

    pub(crate) fn run_idle_hooks(&mut self) {
        for hook in &mut self.idle_hooks {
            hook();
        }
    }

    fn log_packet(&mut self, dir: Direction, header: ChannelHeader, payload: &[u8]) {
        if self.log.is_enabled() {
            let packet = Packet {
                header,
                payload: Bytes::copy_from_slice(payload),
            };
            self.log.record(dir, &packet);
        }
    }

    fn log_wire(&mut self, dir: Direction, wire: &Bytes) {
        if self.log.is_enabled() {
            if let Ok(packet) = decode_packet(wire) {
                self.log.record(dir, &packet);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use adphost_device::{LoopbackDevice, ReadOutcome, ReadRequest, WriteOutcome, WriteRequest};

    use super::*;

    fn open_host(config: ChannelConfig) -> (ChannelTransport, LoopbackDevice) {
        let (host_dev, peer_dev) = LoopbackDevice::pair();
        let transport = ChannelTransport::open(Box::new(host_dev), "loopback", None, config)
            .expect("open should succeed");
        (transport, peer_dev)
    }

    fn peer_send(peer: &mut LoopbackDevice, header: ChannelHeader, payload: &[u8]) {
        let wire = encode_packet(header, payload);
        let mut req = WriteRequest::new(DevChan::Debug, wire);
        assert_eq!(peer.write(&mut req).unwrap(), WriteOutcome::Finished);
    }

    fn peer_send_raw(peer: &mut LoopbackDevice, chan: DevChan, raw: &[u8]) {
        let mut req = WriteRequest::new(chan, Bytes::copy_from_slice(raw));
        assert_eq!(peer.write(&mut req).unwrap(), WriteOutcome::Finished);
    }

    fn peer_recv(peer: &mut LoopbackDevice) -> Option<Packet> {
        let mut req = ReadRequest::new();
        match peer.read(&mut req, false).unwrap() {
            ReadOutcome::Complete => {
                let raw = req.buf.split().freeze();
                Some(decode_packet(&raw).unwrap())
            }
            _ => None,
        }
    }

    fn header(channel: ChannelId, home_seq: u8, oppo_seq: u8, flags: u8) -> ChannelHeader {
        ChannelHeader {
            channel,
            home_seq,
            oppo_seq,
            flags,
        }
    }

    #[test]
    fn write_stamps_header_and_retains_packet() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        host.write(ChannelId::HostDebug, Bytes::from_static(b"hi")).unwrap();

        let packet = peer_recv(&mut peer).expect("packet should cross");
        assert_eq!(packet.header.channel, ChannelId::HostDebug);
        assert_eq!(packet.header.home_seq, 1);
        assert_eq!(packet.header.oppo_seq, 0);
        assert!(packet.header.is_reliable());
        assert_eq!(packet.payload.as_ref(), b"hi");
        assert_eq!(host.outstanding(), 1);
    }

    #[test]
    fn in_order_packet_is_delivered_and_acknowledged() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        let seen: std::rc::Rc<std::cell::RefCell<Vec<Bytes>>> = Default::default();
        let sink = std::rc::Rc::clone(&seen);
        host.register_callback(ChannelId::TargetDebug, move |_, payload| {
            sink.borrow_mut().push(payload);
        });

        peer_send(
            &mut peer,
            header(ChannelId::TargetDebug, 1, 0, FLAG_RELIABLE),
            b"stopped",
        );
        host.pump_once();

        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].as_ref(), b"stopped");

        // The next outgoing packet acknowledges what was accepted.
        host.write(ChannelId::HostDebug, Bytes::from_static(b"go")).unwrap();
        let packet = peer_recv(&mut peer).unwrap();
        assert_eq!(packet.header.oppo_seq, 1);
    }

    #[test]
    fn duplicate_is_dropped_silently() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        let seen: std::rc::Rc<std::cell::RefCell<Vec<Bytes>>> = Default::default();
        let sink = std::rc::Rc::clone(&seen);
        host.register_callback(ChannelId::TargetDebug, move |_, payload| {
            sink.borrow_mut().push(payload);
        });

        let h = header(ChannelId::TargetDebug, 1, 0, FLAG_RELIABLE);
        peer_send(&mut peer, h, b"once");
        peer_send(&mut peer, h, b"once");
        host.pump_once();
        host.pump_once();

        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(host.stats().duplicates_dropped, 1);
        // No resend request was raised for a duplicate.
        assert!(peer_recv(&mut peer).is_none());
    }

    #[test]
    fn gap_requests_resend_once_and_does_not_advance() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        peer_send(
            &mut peer,
            header(ChannelId::TargetDebug, 2, 0, FLAG_RELIABLE),
            b"early",
        );
        host.pump_once();

        assert_eq!(host.stats().gaps_detected, 1);
        let request = peer_recv(&mut peer).expect("resend request should cross");
        assert!(request.header.is_resend());
        assert_eq!(request.header.oppo_seq, 0);
        assert!(request.payload.is_empty());
        assert!(peer_recv(&mut peer).is_none());

        // The in-order packet is still accepted afterwards.
        let seen: std::rc::Rc<std::cell::RefCell<Vec<Bytes>>> = Default::default();
        let sink = std::rc::Rc::clone(&seen);
        host.register_callback(ChannelId::TargetDebug, move |_, payload| {
            sink.borrow_mut().push(payload);
        });
        peer_send(
            &mut peer,
            header(ChannelId::TargetDebug, 1, 0, FLAG_RELIABLE),
            b"first",
        );
        host.pump_once();
        assert_eq!(seen.borrow()[0].as_ref(), b"first");
    }

    #[test]
    fn acknowledgement_retires_sent_packets() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        host.write(ChannelId::HostDebug, Bytes::from_static(b"a")).unwrap();
        host.write(ChannelId::HostDebug, Bytes::from_static(b"b")).unwrap();
        assert_eq!(host.outstanding(), 2);
        while peer_recv(&mut peer).is_some() {}

        // Peer's first packet acknowledges both of ours.
        peer_send(
            &mut peer,
            header(ChannelId::TargetDebug, 1, 2, FLAG_RELIABLE),
            b"ack",
        );
        host.pump_once();
        assert_eq!(host.outstanding(), 0);
    }

    #[test]
    fn ack_for_unknown_sequence_is_non_fatal() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        host.write(ChannelId::HostDebug, Bytes::from_static(b"a")).unwrap();
        while peer_recv(&mut peer).is_some() {}

        // Peer claims to have seen sequence 2; we only ever sent 1.
        peer_send(
            &mut peer,
            header(ChannelId::TargetDebug, 1, 2, FLAG_RELIABLE),
            b"ack",
        );
        host.pump_once();
        assert_eq!(host.outstanding(), 0);
    }

    #[test]
    fn resend_request_retransmits_from_requested_point() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        host.write(ChannelId::HostDebug, Bytes::from_static(b"a")).unwrap();
        host.write(ChannelId::HostDebug, Bytes::from_static(b"b")).unwrap();
        while peer_recv(&mut peer).is_some() {}

        peer_send(
            &mut peer,
            header(ChannelId::TargetDebug, 0, 0, FLAG_RESEND),
            b"",
        );
        host.pump_once(); // processes the request
        host.pump_once(); // retransmits "a"
        host.pump_once(); // retransmits "b"

        let first = peer_recv(&mut peer).unwrap();
        let second = peer_recv(&mut peer).unwrap();
        assert_eq!(
            (first.header.home_seq, first.payload.as_ref()),
            (1, b"a".as_ref())
        );
        assert_eq!(
            (second.header.home_seq, second.payload.as_ref()),
            (2, b"b".as_ref())
        );
        assert_eq!(host.stats().retransmitted, 2);
        // Retransmitted packets stay queued until acknowledged.
        assert_eq!(host.outstanding(), 2);
    }

    #[test]
    fn resend_request_with_everything_received_is_a_no_op() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        host.write(ChannelId::HostDebug, Bytes::from_static(b"a")).unwrap();
        while peer_recv(&mut peer).is_some() {}

        peer_send(
            &mut peer,
            header(ChannelId::TargetDebug, 0, 1, FLAG_RESEND),
            b"",
        );
        host.pump_once();
        host.pump_once();
        assert!(peer_recv(&mut peer).is_none());
        assert_eq!(host.stats().retransmitted, 0);
        // The packet stays queued until a real acknowledgement arrives.
        assert_eq!(host.outstanding(), 1);
    }

    #[test]
    #[should_panic(expected = "resend requested from sequence")]
    fn resend_for_data_no_longer_held_aborts() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        host.write(ChannelId::HostDebug, Bytes::from_static(b"a")).unwrap();

        // Peer claims it holds up to 5 and wants 6 onward; nothing that
        // new was ever queued.
        peer_send(
            &mut peer,
            header(ChannelId::TargetDebug, 0, 5, FLAG_RESEND),
            b"",
        );
        host.pump_once();
    }

    #[test]
    fn blocking_read_captures_one_packet() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        peer_send(
            &mut peer,
            header(ChannelId::TargetBoot, 0, 0, 0),
            b"booted",
        );

        let payload = host.read(ChannelId::TargetBoot).unwrap();
        assert_eq!(payload.as_ref(), b"booted");

        // The capture slot is gone; the next packet hits the default
        // handler and is dropped.
        peer_send(&mut peer, header(ChannelId::TargetBoot, 0, 0, 0), b"again");
        host.pump_once();
        assert_eq!(host.stats().delivered, 1);
    }

    #[test]
    fn blocking_read_conflicts_with_registered_callback() {
        let (mut host, _peer) = open_host(ChannelConfig::default());
        host.register_callback(ChannelId::CLib, |_, _| {});
        let err = host.read(ChannelId::CLib).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::HandlerRegistered(ChannelId::CLib)
        ));
    }

    #[test]
    fn boot_channel_bypasses_sequencing() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        let seen: std::rc::Rc<std::cell::RefCell<Vec<Bytes>>> = Default::default();
        let sink = std::rc::Rc::clone(&seen);
        host.register_callback(ChannelId::TargetBoot, move |_, payload| {
            sink.borrow_mut().push(payload);
        });

        // Wild sequence numbers on a boot packet are ignored.
        peer_send(&mut peer, header(ChannelId::TargetBoot, 77, 13, 0), b"hello");
        host.pump_once();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(host.stats().gaps_detected, 0);

        // Sequencing on the debug channels is unaffected.
        host.write(ChannelId::HostDebug, Bytes::from_static(b"x")).unwrap();
        let packet = peer_recv(&mut peer).unwrap();
        assert_eq!(packet.header.oppo_seq, 0);
    }

    #[test]
    fn unknown_channel_byte_is_dropped_with_warning() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        peer_send_raw(&mut peer, DevChan::Debug, &[42, 1, 0, FLAG_RELIABLE]);
        let result = host.pump_once();
        assert_eq!(result.delivered, 0);
        assert_eq!(host.stats().received, 0);
        // No resend request either: the packet never reached sequencing.
        assert!(peer_recv(&mut peer).is_none());
    }

    #[test]
    fn bad_packet_prompts_resend_request() {
        let (mut host_dev, mut peer) = LoopbackDevice::pair();
        host_dev.inject_bad_inbound();
        let mut host =
            ChannelTransport::open(Box::new(host_dev), "loopback", None, ChannelConfig::default())
                .unwrap();

        host.pump_once();
        let request = peer_recv(&mut peer).expect("resend request should cross");
        assert!(request.header.is_resend());
        assert_eq!(host.stats().resend_requests_sent, 1);
    }

    #[test]
    fn write_async_queues_until_pumped() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        host.write_async(ChannelId::HostUser, Bytes::from_static(b"later"))
            .unwrap();
        assert!(peer_recv(&mut peer).is_none());

        host.pump_once();
        let packet = peer_recv(&mut peer).unwrap();
        assert_eq!(packet.header.channel, ChannelId::HostUser);
        assert_eq!(packet.payload.as_ref(), b"later");
    }

    #[test]
    fn oversized_payload_is_refused_up_front() {
        let (mut host, _peer) = open_host(ChannelConfig::default());
        let big = Bytes::from(vec![0u8; DEFAULT_MAX_PACKET]);
        let err = host.write(ChannelId::HostDebug, big).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Device(DeviceError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn reset_rewinds_sequence_numbers() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        host.write(ChannelId::HostDebug, Bytes::from_static(b"a")).unwrap();
        while peer_recv(&mut peer).is_some() {}

        host.reset();
        assert_eq!(host.outstanding(), 0);

        host.write(ChannelId::HostDebug, Bytes::from_static(b"b")).unwrap();
        let packet = peer_recv(&mut peer).unwrap();
        assert_eq!(packet.header.home_seq, 1);
    }

    #[test]
    fn application_stream_reaches_its_handler() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        let seen: std::rc::Rc<std::cell::RefCell<Vec<Bytes>>> = Default::default();
        let sink = std::rc::Rc::clone(&seen);
        host.register_application_handler(move |data| {
            sink.borrow_mut().push(data);
        });

        peer_send_raw(&mut peer, DevChan::Application, b"raw app bytes");
        host.pump_once();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].as_ref(), b"raw app bytes");
    }

    #[test]
    fn application_stream_without_handler_is_discarded() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        peer_send_raw(&mut peer, DevChan::Application, b"nobody home");
        let result = host.pump_once();
        assert_eq!(result.delivered, 0);
    }

    #[test]
    fn unreliable_link_skips_sequencing_entirely() {
        let config = ChannelConfig {
            reliable: false,
            ..ChannelConfig::default()
        };
        let (mut host, mut peer) = open_host(config);

        host.write(ChannelId::HostDebug, Bytes::from_static(b"x")).unwrap();
        let packet = peer_recv(&mut peer).unwrap();
        assert!(!packet.header.is_reliable());
        assert_eq!(packet.header.home_seq, 0);
        assert_eq!(host.outstanding(), 0);

        // Out-of-order arrivals are delivered as-is.
        let seen: std::rc::Rc<std::cell::RefCell<Vec<Bytes>>> = Default::default();
        let sink = std::rc::Rc::clone(&seen);
        host.register_callback(ChannelId::TargetDebug, move |_, payload| {
            sink.borrow_mut().push(payload);
        });
        peer_send(&mut peer, header(ChannelId::TargetDebug, 9, 0, 0), b"any");
        host.pump_once();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn sequence_numbers_wrap_around() {
        let (mut host, mut peer) = open_host(ChannelConfig::default());
        let seen: std::rc::Rc<std::cell::RefCell<Vec<u8>>> = Default::default();

        // Fast-forward the peer's position to the top of the counter.
        for seq in 1..=255u8 {
            peer_send(
                &mut peer,
                header(ChannelId::TargetDebug, seq, 0, FLAG_RELIABLE),
                &[seq],
            );
            host.pump_once();
        }
        let sink = std::rc::Rc::clone(&seen);
        host.register_callback(ChannelId::TargetDebug, move |_, payload| {
            sink.borrow_mut().push(payload[0]);
        });

        // 255 wraps to 0, then 1.
        peer_send(
            &mut peer,
            header(ChannelId::TargetDebug, 0, 0, FLAG_RELIABLE),
            &[0],
        );
        peer_send(
            &mut peer,
            header(ChannelId::TargetDebug, 1, 0, FLAG_RELIABLE),
            &[1],
        );
        host.pump_once();
        host.pump_once();
        assert_eq!(*seen.borrow(), vec![0, 1]);
        assert_eq!(host.stats().gaps_detected, 0);
    }
}
