//! The connection engine.
//!
//! A [`Connection`] is a deterministic state machine owned by the host
//! demultiplexer. It has exactly four inputs: an arriving segment
//! ([`Connection::segment_arrives`]), the passage of time
//! ([`Connection::advance_time`]), user API calls (`write`, `close`,
//! `abort`), and the host draining outbound segments
//! ([`Connection::segments`]). All outward effects besides the returned
//! segments are delivered through single-slot callbacks.
//!
//! A callback slot is moved out of the connection while it runs, so a
//! callback may safely install a replacement for itself; the engine
//! re-reads its own state after every callback returns.

mod recovery;
mod state;

pub use state::{segment_arrives_closed, AdvanceTimeResult, SegmentArrivesResult, State};

use crate::{
    config::Config,
    error::{Disconnect, DropReason, TcpError},
    options::TcpOption,
    payload::Payload,
    read_request::ReadRequest,
    rtt::RttEstimator,
    rtx_queue::{RtxEntry, RtxQueue},
    segment::{Segment, TcpHeaderBuilder},
    socket::{ConnectionId, Socket},
    tcb::Tcb,
    write_queue::WriteQueue,
    Iss,
};
use std::{
    collections::VecDeque,
    fmt::{self, Display},
    time::Duration,
};
use tracing::{debug, trace};

pub type ConnectCallback = Box<dyn FnMut(&mut Connection)>;
pub type ReadCallback = Box<dyn FnMut(&[u8])>;
pub type DisconnectCallback = Box<dyn FnMut(&mut Connection, Disconnect)>;
pub type CloseCallback = Box<dyn FnMut()>;
pub type WriteCallback = Box<dyn FnMut(usize)>;
pub type ErrorCallback = Box<dyn FnMut(&TcpError)>;
pub type PacketDroppedCallback = Box<dyn FnMut(&Segment, DropReason)>;
pub type RtxTimeoutCallback = Box<dyn FnMut(u32, Duration)>;

#[derive(Default)]
struct Callbacks {
    connect: Option<ConnectCallback>,
    read: Option<ReadCallback>,
    disconnect: Option<DisconnectCallback>,
    close: Option<CloseCallback>,
    write: Option<WriteCallback>,
    error: Option<ErrorCallback>,
    packet_dropped: Option<PacketDroppedCallback>,
    rtx_timeout: Option<RtxTimeoutCallback>,
}

/// A connection between two sockets, transiting the RFC 793 states.
pub struct Connection {
    id: ConnectionId,
    config: Config,
    state: State,
    prev_state: State,
    tcb: Tcb,
    rtt: RttEstimator,
    writeq: WriteQueue,
    rtxq: RtxQueue,
    read: ReadRequest,
    outgoing: VecDeque<Segment>,
    callbacks: Callbacks,

    /// Monotonic time, advanced by the host.
    clock: Duration,
    rtx_deadline: Option<Duration>,
    dack_deadline: Option<Duration>,
    persist_deadline: Option<Duration>,
    persist_interval: Duration,
    timewait_deadline: Option<Duration>,

    /// Consecutive retransmissions of the segment at the head of the
    /// retransmission queue.
    rtx_attempt: u32,
    /// Retransmissions of our SYN, counted separately.
    syn_rtx: u32,
    /// Full-sized in-order segments received since the last ACK went out.
    dack: u8,
    /// Sequence number our FIN occupies, once sent.
    fin_seq: Option<u32>,
    /// `close()` was called with data still queued; send FIN when the
    /// write queue drains.
    fin_on_drain: bool,
    /// Fully transmitted write requests waiting for their final byte to
    /// be acknowledged: (sequence number past the request, length).
    pending_writes: VecDeque<(u32, usize)>,
}

const PERSIST_INITIAL: Duration = Duration::from_secs(1);
const PERSIST_MAX: Duration = Duration::from_secs(60);

impl Connection {
    fn new(id: ConnectionId, config: Config, iss: Iss) -> Self {
        let mut tcb = Tcb::new(&config);
        tcb.init(iss.into());
        let read = ReadRequest::new(config.initial_window() as usize);
        Self {
            id,
            config,
            state: State::Closed,
            prev_state: State::Closed,
            tcb,
            rtt: RttEstimator::new(),
            writeq: WriteQueue::new(),
            rtxq: RtxQueue::new(),
            read,
            outgoing: VecDeque::new(),
            callbacks: Callbacks::default(),
            clock: Duration::ZERO,
            rtx_deadline: None,
            dack_deadline: None,
            persist_deadline: None,
            persist_interval: PERSIST_INITIAL,
            timewait_deadline: None,
            rtx_attempt: 0,
            syn_rtx: 0,
            dack: 0,
            fin_seq: None,
            fin_on_drain: false,
            pending_writes: VecDeque::new(),
        }
    }

    /// Active open: emits a SYN and enters SYN-SENT.
    pub fn open(id: ConnectionId, config: Config, iss: Iss) -> Self {
        let mut connection = Self::new(id, config, iss);
        connection.send_syn();
        connection.set_state(State::SynSent);
        connection
    }

    /// Passive open: waits in LISTEN for a peer's SYN.
    pub fn listen(id: ConnectionId, config: Config, iss: Iss) -> Self {
        let mut connection = Self::new(id, config, iss);
        connection.set_state(State::Listen);
        connection
    }

    /// Feeds an arriving segment through the state machine. A return of
    /// [`SegmentArrivesResult::Close`] tells the host to drop the
    /// connection.
    pub fn segment_arrives(&mut self, segment: Segment) -> SegmentArrivesResult {
        trace!(connection = %self, segment = %segment, "segment arrives");
        self.handle_segment(segment)
    }

    /// Drains the segments the engine wants transmitted, in order. The
    /// host hands them to the network layer; transmission neither blocks
    /// nor reports failure upward.
    pub fn segments(&mut self) -> Vec<Segment> {
        self.outgoing.drain(..).collect()
    }

    /// Advances the engine's clock, firing any timer that comes due.
    pub fn advance_time(&mut self, elapsed: Duration) -> AdvanceTimeResult {
        self.clock += elapsed;

        if deadline_passed(self.rtx_deadline, self.clock) {
            self.rtx_deadline = None;
            self.rtx_timeout();
            if self.state == State::Closed {
                return AdvanceTimeResult::CloseConnection;
            }
        }
        if deadline_passed(self.persist_deadline, self.clock) {
            self.persist_deadline = None;
            self.persist_probe();
        }
        if deadline_passed(self.dack_deadline, self.clock) {
            self.dack_deadline = None;
            self.send_ack();
        }
        if deadline_passed(self.timewait_deadline, self.clock) {
            self.timewait_deadline = None;
            debug!(connection = %self, "TIME-WAIT expired");
            self.enter_closed(None);
            return AdvanceTimeResult::CloseConnection;
        }
        AdvanceTimeResult::Ok
    }

    /// Time until the next timer fires, if any timer is armed. The host
    /// can use this to schedule its next `advance_time` call.
    pub fn poll_delay(&self) -> Option<Duration> {
        [
            self.rtx_deadline,
            self.dack_deadline,
            self.persist_deadline,
            self.timewait_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
        .map(|deadline| deadline.saturating_sub(self.clock))
    }

    /// Queues bytes for delivery to the peer, in issue order.
    pub fn write(&mut self, data: impl Into<Payload>) {
        if !self.state.is_writable() && self.state != State::SynSent && self.state != State::SynReceived
        {
            self.signal_error(TcpError::NotWritable);
            return;
        }
        self.writeq.push(data.into());
        if self.state.is_writable() {
            self.writeq_push();
        }
    }

    /// Graceful close: any queued data is flushed, then a FIN is sent.
    pub fn close(&mut self) {
        match self.state {
            State::Established | State::CloseWait => {
                if self.writeq.has_remaining() {
                    self.fin_on_drain = true;
                } else {
                    self.send_fin();
                    self.set_state(match self.state {
                        State::CloseWait => State::LastAck,
                        _ => State::FinWait1,
                    });
                }
            }
            State::SynReceived => {
                // Nothing to flush mid-handshake; FIN right away.
                self.send_fin();
                self.set_state(State::FinWait1);
            }
            State::SynSent | State::Listen => {
                self.enter_closed(None);
            }
            _ => {}
        }
    }

    /// Immediate teardown: a RST goes out, every queue is cleared, and
    /// the disconnect callback fires with [`Disconnect::Reset`].
    pub fn abort(&mut self) {
        if self.state == State::Closed {
            return;
        }
        if self.state.is_synchronized() {
            self.send_rst(self.tcb.snd.nxt);
        }
        self.enter_closed(Some(Disconnect::Reset));
    }

    /// Drops every installed callback.
    pub fn reset_callbacks(&mut self) {
        self.callbacks = Callbacks::default();
    }

    // --- Callback registration. Each slot holds at most one value and
    // assignment replaces. ---

    pub fn on_connect(&mut self, callback: impl FnMut(&mut Connection) + 'static) -> &mut Self {
        self.callbacks.connect = Some(Box::new(callback));
        self
    }

    /// Installs the receive buffer and its callback. The callback fires
    /// with the buffered bytes when a PSH arrives or `capacity` bytes
    /// accumulate.
    pub fn on_read(&mut self, capacity: usize, callback: impl FnMut(&[u8]) + 'static) -> &mut Self {
        self.read = ReadRequest::new(capacity);
        self.tcb.rcv.wnd = capacity as u32;
        self.callbacks.read = Some(Box::new(callback));
        self
    }

    pub fn on_disconnect(
        &mut self,
        callback: impl FnMut(&mut Connection, Disconnect) + 'static,
    ) -> &mut Self {
        self.callbacks.disconnect = Some(Box::new(callback));
        self
    }

    pub fn on_close(&mut self, callback: impl FnMut() + 'static) -> &mut Self {
        self.callbacks.close = Some(Box::new(callback));
        self
    }

    pub fn on_write(&mut self, callback: impl FnMut(usize) + 'static) -> &mut Self {
        self.callbacks.write = Some(Box::new(callback));
        self
    }

    pub fn on_error(&mut self, callback: impl FnMut(&TcpError) + 'static) -> &mut Self {
        self.callbacks.error = Some(Box::new(callback));
        self
    }

    pub fn on_packet_dropped(
        &mut self,
        callback: impl FnMut(&Segment, DropReason) + 'static,
    ) -> &mut Self {
        self.callbacks.packet_dropped = Some(Box::new(callback));
        self
    }

    pub fn on_rtx_timeout(&mut self, callback: impl FnMut(u32, Duration) + 'static) -> &mut Self {
        self.callbacks.rtx_timeout = Some(Box::new(callback));
        self
    }

    // --- Introspection ---

    pub fn state(&self) -> State {
        self.state
    }

    pub fn prev_state(&self) -> State {
        self.prev_state
    }

    pub fn tuple(&self) -> ConnectionId {
        self.id
    }

    pub fn local(&self) -> Socket {
        self.id.local
    }

    pub fn remote(&self) -> Socket {
        self.id.remote
    }

    pub fn is_listening(&self) -> bool {
        self.state == State::Listen
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_writable(&self) -> bool {
        self.state.is_writable()
    }

    pub fn is_readable(&self) -> bool {
        self.state.is_readable()
    }

    pub fn is_closing(&self) -> bool {
        self.state.is_closing()
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Bytes queued for sending, transmitted or not.
    pub fn sendq_size(&self) -> usize {
        self.writeq.bytes_total()
    }

    /// Bytes queued but not yet handed to the network.
    pub fn sendq_remaining(&self) -> usize {
        self.writeq.bytes_remaining()
    }

    /// Bytes buffered for the read callback.
    pub fn readq_size(&self) -> usize {
        self.read.len()
    }

    /// The smoothed round-trip estimate, once a sample exists.
    pub fn srtt(&self) -> Option<Duration> {
        self.rtt.srtt()
    }

    // --- Internal plumbing ---

    fn set_state(&mut self, state: State) {
        debug!(connection = %self.id, from = %self.state, to = %state, "transition");
        self.prev_state = self.state;
        self.state = state;
    }

    fn header(&self, seq: u32) -> TcpHeaderBuilder {
        TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, seq)
    }

    /// The current timestamp clock value, in 100 microsecond ticks.
    fn now_ts(&self) -> u32 {
        (self.clock.as_micros() / crate::config::CLOCK_GRANULARITY.as_micros()) as u32
    }

    fn ts_option(&self) -> Option<TcpOption> {
        self.tcb.snd.ts_ok.then(|| TcpOption::Timestamps {
            tsval: self.now_ts(),
            tsecr: self.tcb.ts_recent,
        })
    }

    /// The window to advertise: the receive window scaled down, clamped
    /// to the 16-bit field.
    fn advertised_window(&mut self) -> u16 {
        let wnd = (self.tcb.rcv.wnd >> self.tcb.rcv.wind_shift).min(u16::MAX as u32) as u16;
        self.tcb.rcv.rwnd = wnd;
        wnd
    }

    /// The raw window carried on SYN segments, which are never scaled.
    fn syn_window(&self) -> u16 {
        self.tcb.rcv.wnd.min(u16::MAX as u32) as u16
    }

    /// Records what a peer's SYN negotiated: its MSS (clamped to our
    /// floor and ceiling), window scaling only if both sides offered it,
    /// and timestamps only if both sides offered them.
    pub(crate) fn parse_syn_options(&mut self, header: &crate::segment::TcpHeader) {
        let mut peer_mss = None;
        let mut peer_ws = None;
        let mut peer_ts = None;
        for option in &header.options {
            match option {
                TcpOption::MaximumSegmentSize(mss) => peer_mss = Some(*mss),
                TcpOption::WindowScale(shift) => peer_ws = Some(*shift),
                TcpOption::Timestamps { tsval, .. } => peer_ts = Some(*tsval),
                // Advertised back to the peer but never used.
                TcpOption::SackPermitted => {}
            }
        }
        self.tcb.snd.mss = peer_mss
            .unwrap_or(self.config.mss_floor)
            .clamp(self.config.mss_floor, self.config.local_mss());
        match (self.config.window_scaling, peer_ws) {
            (Some(ours), Some(peer)) => {
                self.tcb.rcv.wind_shift = ours;
                self.tcb.snd.wind_shift = peer;
            }
            _ => {
                self.tcb.rcv.wind_shift = 0;
                self.tcb.snd.wind_shift = 0;
            }
        }
        self.tcb.snd.ts_ok = self.config.timestamps && peer_ts.is_some();
        if let (true, Some(tsval)) = (self.tcb.snd.ts_ok, peer_ts) {
            self.tcb.ts_recent = tsval;
        }
    }

    fn syn_options(&self) -> Vec<TcpOption> {
        let mut options = vec![TcpOption::MaximumSegmentSize(self.config.local_mss())];
        if let Some(shift) = self.config.window_scaling {
            options.push(TcpOption::WindowScale(shift));
        }
        if self.config.timestamps {
            options.push(TcpOption::Timestamps {
                tsval: self.now_ts(),
                tsecr: 0,
            });
        }
        options.push(TcpOption::SackPermitted);
        options
    }

    fn send_syn(&mut self) {
        let iss = self.tcb.snd.iss;
        let mut builder = self.header(iss).syn().wnd(self.syn_window());
        for option in self.syn_options() {
            builder = builder.option(option);
        }
        self.outgoing
            .push_back(Segment::new(builder.build(), Payload::empty()));
        self.rtxq.push(RtxEntry {
            seq: iss,
            syn: true,
            fin: false,
            psh: false,
            text: Payload::empty(),
            retransmitted: false,
        });
        self.tcb.snd.nxt = iss.wrapping_add(1);
        self.rtt.on_send(self.clock, self.tcb.snd.nxt);
        self.rtx_ensure_started();
    }

    /// Options for a SYN-ACK: only capabilities the peer's SYN also
    /// offered, which `parse_syn_options` has already recorded.
    fn syn_ack_options(&self) -> Vec<TcpOption> {
        let mut options = vec![TcpOption::MaximumSegmentSize(self.config.local_mss())];
        if self.tcb.rcv.wind_shift != 0 {
            options.push(TcpOption::WindowScale(self.tcb.rcv.wind_shift));
        }
        if self.tcb.snd.ts_ok {
            options.push(TcpOption::Timestamps {
                tsval: self.now_ts(),
                tsecr: self.tcb.ts_recent,
            });
        }
        options.push(TcpOption::SackPermitted);
        options
    }

    fn send_syn_ack(&mut self) {
        let iss = self.tcb.snd.iss;
        let mut builder = self
            .header(iss)
            .syn()
            .ack(self.tcb.rcv.nxt)
            .wnd(self.syn_window());
        for option in self.syn_ack_options() {
            builder = builder.option(option);
        }
        self.outgoing
            .push_back(Segment::new(builder.build(), Payload::empty()));
    }

    /// Emits a bare acknowledgement of the current receive state.
    fn send_ack(&mut self) {
        let wnd = self.advertised_window();
        let mut builder = self.header(self.tcb.snd.nxt).ack(self.tcb.rcv.nxt).wnd(wnd);
        if let Some(ts) = self.ts_option() {
            builder = builder.option(ts);
        }
        self.outgoing
            .push_back(Segment::new(builder.build(), Payload::empty()));
        self.dack = 0;
        self.dack_deadline = None;
    }

    /// Emits a reset carrying the given sequence number. Resets are
    /// never queued for retransmission.
    fn send_rst(&mut self, seq: u32) {
        self.outgoing
            .push_back(Segment::new(self.header(seq).rst().build(), Payload::empty()));
    }

    fn send_fin(&mut self) {
        let seq = self.tcb.snd.nxt;
        let wnd = self.advertised_window();
        let mut builder = self.header(seq).fin().ack(self.tcb.rcv.nxt).wnd(wnd);
        if let Some(ts) = self.ts_option() {
            builder = builder.option(ts);
        }
        self.outgoing
            .push_back(Segment::new(builder.build(), Payload::empty()));
        self.rtxq.push(RtxEntry {
            seq,
            syn: false,
            fin: true,
            psh: false,
            text: Payload::empty(),
            retransmitted: false,
        });
        self.tcb.snd.nxt = seq.wrapping_add(1);
        self.fin_seq = Some(seq);
        self.dack = 0;
        self.dack_deadline = None;
        self.rtx_ensure_started();
    }

    /// Places new data on the wire: builds the segment, tracks it for
    /// retransmission, and advances SND.NXT.
    fn transmit_data(&mut self, text: Payload, psh: bool) {
        let seq = self.tcb.snd.nxt;
        let wnd = self.advertised_window();
        let mut builder = self.header(seq).ack(self.tcb.rcv.nxt).wnd(wnd);
        if psh {
            builder = builder.psh();
        }
        if let Some(ts) = self.ts_option() {
            builder = builder.option(ts);
        }
        self.tcb.snd.nxt = seq.wrapping_add(text.len() as u32);
        self.rtt.on_send(self.clock, self.tcb.snd.nxt);
        self.rtxq.push(RtxEntry {
            seq,
            syn: false,
            fin: false,
            psh,
            text: text.clone(),
            retransmitted: false,
        });
        self.outgoing.push_back(Segment::new(builder.build(), text));
        // Data segments carry the current acknowledgement.
        self.dack = 0;
        self.dack_deadline = None;
        self.rtx_ensure_started();
    }

    /// Can a full segment go out right now?
    fn can_send(&self) -> bool {
        self.tcb.usable_window() >= u32::from(self.tcb.snd.mss) && self.writeq.has_remaining()
    }

    /// Consumes up to `max` bytes from the write queue and puts them on
    /// the wire as one segment. Returns whether anything was sent.
    pub(crate) fn send_from_queue(&mut self, max: usize) -> bool {
        let Some(produced) = self.writeq.produce(max) else {
            return false;
        };
        let end = self.tcb.snd.nxt.wrapping_add(produced.text.len() as u32);
        self.transmit_data(produced.text, produced.completed.is_some());
        if let Some(len) = produced.completed {
            self.pending_writes.push_back((end, len));
        }
        true
    }

    /// Sends as much of the write queue as the usable window allows.
    pub(crate) fn writeq_push(&mut self) {
        let smss = usize::from(self.tcb.snd.mss);
        loop {
            if !self.can_send() {
                // The tail of the stream may be smaller than one MSS;
                // let it out as long as the window covers all of it.
                let usable = self.tcb.usable_window() as usize;
                if usable == 0
                    || !self.writeq.has_remaining()
                    || self.writeq.bytes_remaining() > usable.min(smss)
                {
                    break;
                }
            }
            let max = smss.min(self.tcb.usable_window() as usize);
            if !self.send_from_queue(max) {
                break;
            }
        }
        self.after_send();
    }

    /// Shared follow-up for every send path: arm the persist timer when
    /// the peer's window closed with data still queued, and send the FIN
    /// a graceful close deferred.
    fn after_send(&mut self) {
        if self.tcb.snd.wnd == 0 && self.writeq.has_remaining() {
            self.persist_ensure_started();
        }
        if self.fin_on_drain && !self.writeq.has_remaining() {
            self.fin_on_drain = false;
            self.send_fin();
            self.set_state(match self.state {
                State::CloseWait => State::LastAck,
                _ => State::FinWait1,
            });
        }
    }

    // --- Timers ---

    fn rtx_ensure_started(&mut self) {
        if self.rtx_deadline.is_none() {
            self.rtx_deadline = Some(self.clock + self.rtt.rto());
        }
    }

    fn rtx_restart(&mut self) {
        self.rtx_deadline = Some(self.clock + self.rtt.rto());
    }

    fn rtx_stop(&mut self) {
        self.rtx_deadline = None;
        self.rtx_attempt = 0;
    }

    fn dack_start(&mut self) {
        if self.dack_deadline.is_none() {
            self.dack_deadline = Some(self.clock + self.config.dack_timeout);
        }
    }

    fn persist_ensure_started(&mut self) {
        if self.persist_deadline.is_none() {
            self.persist_interval = PERSIST_INITIAL;
            self.persist_deadline = Some(self.clock + self.persist_interval);
        }
    }

    pub(crate) fn persist_stop(&mut self) {
        self.persist_deadline = None;
        self.persist_interval = PERSIST_INITIAL;
    }

    pub(crate) fn timewait_start(&mut self) {
        self.timewait_deadline = Some(self.clock + 2 * self.config.msl);
        // Nothing is in flight any more; the retransmission state is
        // moot.
        self.rtx_stop();
    }

    pub(crate) fn timewait_restart(&mut self) {
        if self.timewait_deadline.is_some() {
            self.timewait_deadline = Some(self.clock + 2 * self.config.msl);
        }
    }

    // --- Signals ---

    fn signal_connect(&mut self) {
        if let Some(mut callback) = self.callbacks.connect.take() {
            callback(self);
            if self.callbacks.connect.is_none() {
                self.callbacks.connect = Some(callback);
            }
        }
    }

    fn signal_read(&mut self, data: &[u8]) {
        if let Some(mut callback) = self.callbacks.read.take() {
            callback(data);
            if self.callbacks.read.is_none() {
                self.callbacks.read = Some(callback);
            }
        }
    }

    fn signal_disconnect(&mut self, reason: Disconnect) {
        debug!(connection = %self, %reason, "disconnect");
        match self.callbacks.disconnect.take() {
            Some(mut callback) => {
                callback(self, reason);
                if self.callbacks.disconnect.is_none() {
                    self.callbacks.disconnect = Some(callback);
                }
            }
            // The default behavior is to close our side as well.
            None => self.close(),
        }
    }

    fn signal_close(&mut self) {
        if let Some(mut callback) = self.callbacks.close.take() {
            callback();
        }
    }

    fn signal_write(&mut self, bytes: usize) {
        if let Some(mut callback) = self.callbacks.write.take() {
            callback(bytes);
            if self.callbacks.write.is_none() {
                self.callbacks.write = Some(callback);
            }
        }
    }

    fn signal_error(&mut self, error: TcpError) {
        debug!(connection = %self, %error, "error");
        if let Some(mut callback) = self.callbacks.error.take() {
            callback(&error);
            if self.callbacks.error.is_none() {
                self.callbacks.error = Some(callback);
            }
        }
    }

    fn signal_rtx_timeout(&mut self, attempts: u32, rto: Duration) {
        if let Some(mut callback) = self.callbacks.rtx_timeout.take() {
            callback(attempts, rto);
            if self.callbacks.rtx_timeout.is_none() {
                self.callbacks.rtx_timeout = Some(callback);
            }
        }
    }

    pub(crate) fn drop_segment(&mut self, segment: &Segment, reason: DropReason) {
        trace!(connection = %self, segment = %segment, %reason, "dropped");
        if let Some(mut callback) = self.callbacks.packet_dropped.take() {
            callback(segment, reason);
            if self.callbacks.packet_dropped.is_none() {
                self.callbacks.packet_dropped = Some(callback);
            }
        }
    }

    /// Terminal entry. Fires the pending write callbacks, the disconnect
    /// callback when a reason is given, and finally `on_close`; after
    /// this the host drops the connection.
    pub(crate) fn enter_closed(&mut self, reason: Option<Disconnect>) {
        self.rtx_deadline = None;
        self.dack_deadline = None;
        self.persist_deadline = None;
        self.timewait_deadline = None;
        self.rtxq.clear();
        self.fin_on_drain = false;
        self.set_state(State::Closed);

        let parked: Vec<usize> = self.pending_writes.drain(..).map(|(_, len)| len).collect();
        let partials = self.writeq.reset();
        for bytes in parked.into_iter().chain(partials) {
            self.signal_write(bytes);
        }
        if !self.read.is_empty() {
            let data = self.read.take();
            self.signal_read(&data);
        }
        if let Some(reason) = reason {
            self.signal_disconnect(reason);
        }
        self.signal_close();
    }
}

impl Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.state)
    }
}

fn deadline_passed(deadline: Option<Duration>, clock: Duration) -> bool {
    deadline.map(|deadline| clock >= deadline).unwrap_or(false)
}
