//! The RFC 793 state machine: one handler per connection state, plus the
//! acceptability checks every synchronized state shares.
//!
//! ```text
//!                             +---------+ ---------\      active OPEN
//!                             |  CLOSED |            \    -----------
//!                             +---------+<---------\   \   create TCB
//!                               |     ^              \   \  snd SYN
//!                  passive OPEN |     |   CLOSE        \   \
//!                  ------------ |     | ----------       \   \
//!                   create TCB  |     | delete TCB         \   \
//!                               V     |                      \   \
//!                             +---------+            CLOSE    |    \
//!                             |  LISTEN |          ---------- |     |
//!                             +---------+          delete TCB |     |
//!                  rcv SYN      |     |     SEND              |     |
//!                 -----------   |     |    -------            |     V
//! +--------+      snd SYN,ACK  /       \   snd SYN          +--------+
//! |        |<-----------------           ------------------>|        |
//! |  SYN   |                    rcv SYN                     |  SYN   |
//! |  RCVD  |<-----------------------------------------------|  SENT  |
//! |        |                  snd SYN,ACK                   |        |
//! |        |------------------           -------------------|        |
//! +--------+   rcv ACK of SYN  \       /  rcv SYN,ACK       +--------+
//!    |         --------------   |     |   -----------
//!    |                x         |     |     snd ACK
//!    |                          V     V
//!    |  CLOSE                 +---------+
//!    | -------                |  ESTAB  |
//!    | snd FIN                +---------+
//!    |                 CLOSE    |     |    rcv FIN
//!    V                -------   |     |    -------
//! +---------+         snd FIN  /       \   snd ACK         +---------+
//! |  FIN    |<----------------          ------------------>|  CLOSE  |
//! | WAIT-1  |------------------                            |   WAIT  |
//! +---------+          rcv FIN  \                          +---------+
//!   | rcv ACK of FIN   -------   |                          CLOSE  |
//!   | --------------   snd ACK   |                         ------- |
//!   V        x                   V                         snd FIN V
//! +---------+               +---------+                    +---------+
//! |FINWAIT-2|               | CLOSING |                    | LAST-ACK|
//! +---------+               +---------+                    +---------+
//!   |              rcv ACK of FIN |                 rcv ACK of FIN |
//!   |  rcv FIN     -------------- |    Timeout=2MSL -------------- |
//!   |  -------            x       V    ------------        x       V
//!    \ snd ACK              +---------+delete TCB          +---------+
//!      -------------------->|TIME-WAIT|------------------->| CLOSED  |
//!                           +---------+                    +---------+
//! ```

use super::Connection;
use crate::{
    error::{Disconnect, DropReason, TcpError},
    payload::Payload,
    rtx_queue::RtxEntry,
    segment::{Segment, TcpHeaderBuilder},
    seq::{in_window, seq_gt, seq_le, seq_lt},
    socket::Socket,
};
use std::fmt::{self, Display};
use tracing::debug;

/// The state a connection is in, per RFC 793 section 3.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// No connection state at all.
    Closed,
    /// Waiting for a connection request from any remote TCP.
    Listen,
    /// Waiting for a matching connection request after having sent a
    /// connection request.
    SynSent,
    /// Waiting for a confirming connection request acknowledgment after
    /// having both received and sent a connection request.
    SynReceived,
    /// An open connection; the normal state for the data transfer phase.
    Established,
    /// Waiting for a connection termination request from the remote TCP,
    /// or an acknowledgment of the termination request previously sent.
    FinWait1,
    /// Waiting for a connection termination request from the remote TCP.
    FinWait2,
    /// Waiting for a connection termination request from the local user.
    CloseWait,
    /// Waiting for a connection termination request acknowledgment from
    /// the remote TCP.
    Closing,
    /// Waiting for an acknowledgment of the connection termination
    /// request previously sent to the remote TCP.
    LastAck,
    /// Waiting for enough time to pass to be sure the remote TCP
    /// received the acknowledgment of its termination request.
    TimeWait,
}

impl State {
    /// Has the three-way handshake completed at some point?
    pub fn is_synchronized(self) -> bool {
        !matches!(self, State::Closed | State::Listen | State::SynSent)
    }

    pub fn is_connected(self) -> bool {
        self == State::Established
    }

    /// May the user queue more data?
    pub fn is_writable(self) -> bool {
        matches!(self, State::Established | State::CloseWait)
    }

    /// May the peer still deliver data?
    pub fn is_readable(self) -> bool {
        matches!(self, State::Established | State::FinWait1 | State::FinWait2)
    }

    pub fn is_closing(self) -> bool {
        matches!(
            self,
            State::FinWait1 | State::FinWait2 | State::Closing | State::LastAck | State::TimeWait
        )
    }
}

impl Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Closed => write!(f, "CLOSED"),
            State::Listen => write!(f, "LISTEN"),
            State::SynSent => write!(f, "SYN-SENT"),
            State::SynReceived => write!(f, "SYN-RECEIVED"),
            State::Established => write!(f, "ESTABLISHED"),
            State::FinWait1 => write!(f, "FIN-WAIT-1"),
            State::FinWait2 => write!(f, "FIN-WAIT-2"),
            State::CloseWait => write!(f, "CLOSE-WAIT"),
            State::Closing => write!(f, "CLOSING"),
            State::LastAck => write!(f, "LAST-ACK"),
            State::TimeWait => write!(f, "TIME-WAIT"),
        }
    }
}

/// What the host must do with the connection after a segment was
/// processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentArrivesResult {
    /// Keep the connection running.
    Ok,
    /// The connection reached a terminal state; drop it.
    Close,
}

/// What the host must do with the connection after time advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceTimeResult {
    Ok,
    CloseConnection,
}

/// Builds the reset mandated for a segment addressed to no connection
/// at all (RFC 793, "SEGMENT ARRIVES", CLOSED). Arriving resets get no
/// reply.
pub fn segment_arrives_closed(segment: &Segment, local: Socket, remote: Socket) -> Option<Segment> {
    let header = &segment.header;
    if header.ctl.rst() {
        return None;
    }
    let builder = if header.ctl.ack() {
        TcpHeaderBuilder::new(local.port, remote.port, header.ack).rst()
    } else {
        TcpHeaderBuilder::new(local.port, remote.port, 0)
            .rst()
            .ack(header.seq.wrapping_add(segment.seg_len() as u32))
    };
    Some(Segment::new(builder.build(), Payload::empty()))
}

impl Connection {
    pub(super) fn handle_segment(&mut self, segment: Segment) -> SegmentArrivesResult {
        match self.state {
            State::Closed => {
                if let Some(reply) = segment_arrives_closed(&segment, self.id.local, self.id.remote)
                {
                    self.outgoing.push_back(reply);
                }
                SegmentArrivesResult::Close
            }
            State::Listen => self.handle_listen(segment),
            State::SynSent => self.handle_syn_sent(segment),
            _ => self.handle_synchronized(segment),
        }
    }

    /// LISTEN (RFC 793 "SEGMENT ARRIVES", first case).
    fn handle_listen(&mut self, segment: Segment) -> SegmentArrivesResult {
        let header = &segment.header;
        if header.ctl.rst() {
            // A reset cannot refer to a connection that does not exist
            // yet.
            return SegmentArrivesResult::Ok;
        }
        if header.ctl.ack() {
            // Whatever this acknowledges, we never sent it.
            self.send_rst(header.ack);
            self.drop_segment(&segment, DropReason::AckOutOfOrder);
            return SegmentArrivesResult::Ok;
        }
        if header.ctl.syn() {
            self.tcb.rcv.irs = header.seq;
            self.tcb.rcv.nxt = header.seq.wrapping_add(1);
            self.parse_syn_options(header);
            // SYN segments carry an unscaled window.
            self.tcb.snd.wnd = u32::from(header.wnd);
            self.tcb.snd.wl1 = header.seq;
            self.tcb.snd.wl2 = header.ack;
            self.set_state(State::SynReceived);
            self.send_syn_ack();
            let iss = self.tcb.snd.iss;
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
            return SegmentArrivesResult::Ok;
        }
        // Anything else cannot legitimately arrive here.
        self.drop_segment(&segment, DropReason::Na);
        SegmentArrivesResult::Ok
    }

    /// SYN-SENT (RFC 793 "SEGMENT ARRIVES", second case).
    fn handle_syn_sent(&mut self, segment: Segment) -> SegmentArrivesResult {
        let header = segment.header.clone();

        // First, the ACK bit.
        let ack_acceptable = if header.ctl.ack() {
            if seq_le(header.ack, self.tcb.snd.iss) || seq_gt(header.ack, self.tcb.snd.nxt) {
                if !header.ctl.rst() {
                    self.send_rst(header.ack);
                }
                self.drop_segment(&segment, DropReason::AckOutOfOrder);
                return SegmentArrivesResult::Ok;
            }
            true
        } else {
            false
        };

        // Second, the RST bit.
        if header.ctl.rst() {
            if ack_acceptable {
                debug!(connection = %self, "SYN answered with RST");
                self.signal_error(TcpError::Refused);
                self.enter_closed(Some(Disconnect::Refused));
                return SegmentArrivesResult::Close;
            }
            self.drop_segment(&segment, DropReason::Rst);
            return SegmentArrivesResult::Ok;
        }

        // Fourth, the SYN bit. (The security check of the third step is
        // not implemented.)
        if header.ctl.syn() {
            self.tcb.rcv.irs = header.seq;
            self.tcb.rcv.nxt = header.seq.wrapping_add(1);
            self.parse_syn_options(&header);
            if ack_acceptable {
                self.take_rtt_measure(&header);
                self.tcb.snd.una = header.ack;
                self.rtxq.acknowledge(header.ack);
            }

            if seq_gt(self.tcb.snd.una, self.tcb.snd.iss) {
                // Our SYN has been acknowledged.
                self.tcb.snd.wnd = u32::from(header.wnd);
                self.tcb.snd.wl1 = header.seq;
                self.tcb.snd.wl2 = header.ack;
                self.set_state(State::Established);
                self.reno_init();
                self.rtx_stop();
                self.syn_rtx = 0;
                self.send_ack();
                self.signal_connect();
                self.writeq_push();
            } else {
                // Simultaneous open: both sides sent SYN.
                self.tcb.snd.wnd = u32::from(header.wnd);
                self.tcb.snd.wl1 = header.seq;
                self.tcb.snd.wl2 = header.ack;
                self.set_state(State::SynReceived);
                self.send_syn_ack();
            }
            return SegmentArrivesResult::Ok;
        }

        self.drop_segment(&segment, DropReason::Na);
        SegmentArrivesResult::Ok
    }

    /// The shared pipeline for every synchronized state (RFC 793
    /// "SEGMENT ARRIVES", "Otherwise" case): sequence check, RST, SYN,
    /// ACK, data, FIN.
    fn handle_synchronized(&mut self, segment: Segment) -> SegmentArrivesResult {
        if self.state == State::TimeWait {
            self.timewait_restart();
        }

        // A simultaneous open crosses SYN-ACKs: the peer's carries the
        // sequence number its SYN already consumed, so the regular
        // acceptability check would discard it. Recognize it and let it
        // complete the handshake.
        if self.state == State::SynReceived
            && segment.header.ctl.syn()
            && segment.header.ctl.ack()
            && segment.header.seq.wrapping_add(1) == self.tcb.rcv.nxt
        {
            let ack = segment.header.ack;
            if seq_lt(self.tcb.snd.una, ack) && seq_le(ack, self.tcb.snd.nxt) {
                self.tcb.snd.una = ack;
                self.rtxq.acknowledge(ack);
                // SYN segments carry an unscaled window.
                self.tcb.snd.wnd = u32::from(segment.header.wnd);
                self.tcb.snd.wl1 = segment.header.seq;
                self.tcb.snd.wl2 = ack;
                self.set_state(State::Established);
                self.reno_init();
                self.rtx_stop();
                self.syn_rtx = 0;
                self.send_ack();
                self.signal_connect();
                self.writeq_push();
            } else {
                self.drop_segment(&segment, DropReason::AckOutOfOrder);
            }
            return SegmentArrivesResult::Ok;
        }

        // First: sequence acceptability.
        if !self.acceptable_seq(&segment) {
            if segment.header.ctl.rst() {
                self.drop_segment(&segment, DropReason::Rst);
            } else {
                self.drop_segment(&segment, DropReason::SeqOutOfOrder);
                self.send_ack();
            }
            return SegmentArrivesResult::Ok;
        }

        // Second: an acceptable RST tears the connection down.
        if segment.header.ctl.rst() {
            debug!(connection = %self, "reset by peer");
            self.signal_error(TcpError::Reset);
            self.enter_closed(Some(Disconnect::Reset));
            return SegmentArrivesResult::Close;
        }

        // Fourth: a SYN in the window is a fatal error. (Third step,
        // security, is not implemented.)
        if segment.header.ctl.syn() {
            self.send_rst(self.tcb.snd.nxt);
            self.signal_error(TcpError::Reset);
            self.enter_closed(Some(Disconnect::Reset));
            return SegmentArrivesResult::Close;
        }

        // Fifth: the ACK field.
        if !segment.header.ctl.ack() {
            self.drop_segment(&segment, DropReason::AckNotSet);
            return SegmentArrivesResult::Ok;
        }

        if self.state == State::SynReceived {
            let ack = segment.header.ack;
            if seq_lt(self.tcb.snd.una, ack) && seq_le(ack, self.tcb.snd.nxt) {
                self.tcb.snd.wnd = u32::from(segment.header.wnd) << self.tcb.snd.wind_shift;
                self.tcb.snd.wl1 = segment.header.seq;
                self.tcb.snd.wl2 = ack;
                self.set_state(State::Established);
                self.reno_init();
                self.syn_rtx = 0;
                self.signal_connect();
            } else {
                self.send_rst(ack);
                self.drop_segment(&segment, DropReason::AckOutOfOrder);
                return SegmentArrivesResult::Ok;
            }
        }

        if !self.process_ack(&segment) {
            return SegmentArrivesResult::Ok;
        }

        // Transitions driven by the acknowledgement of our FIN.
        if self.fin_acked() {
            match self.state {
                State::FinWait1 => self.set_state(State::FinWait2),
                State::Closing => {
                    self.set_state(State::TimeWait);
                    self.timewait_start();
                }
                State::LastAck => {
                    debug!(connection = %self, "our FIN acknowledged; closing");
                    self.enter_closed(None);
                    return SegmentArrivesResult::Close;
                }
                _ => {}
            }
        }

        // Sixth (urgent pointer): not delivered. Seventh: the text.
        if !segment.text.is_empty() {
            if self.state.is_readable() {
                self.process_data(&segment);
            } else {
                // "This should not occur, since a FIN has been received
                // from the remote side. Ignore the segment text."
            }
        }

        // Eighth: the FIN bit.
        if segment.header.ctl.fin() {
            self.process_fin(&segment);
            if self.state == State::Closed {
                return SegmentArrivesResult::Close;
            }
        }

        SegmentArrivesResult::Ok
    }

    /// RFC 793's four-case acceptability test of SEG.SEQ/SEG.LEN against
    /// the receive window.
    fn acceptable_seq(&self, segment: &Segment) -> bool {
        let seq = segment.header.seq;
        let len = segment.seg_len() as u32;
        let nxt = self.tcb.rcv.nxt;
        let wnd = self.tcb.rcv.wnd;
        match (len, wnd) {
            (0, 0) => seq == nxt,
            (0, _) => in_window(seq, nxt, wnd),
            (_, 0) => false,
            (_, _) => {
                in_window(seq, nxt, wnd)
                    || in_window(seq.wrapping_add(len - 1), nxt, wnd)
            }
        }
    }

    /// Seventh step: deliver in-order text to the receive buffer.
    fn process_data(&mut self, segment: &Segment) {
        let header = &segment.header;
        let mut seq = header.seq;
        let mut text = segment.text.clone();

        // Trim the prefix we have already received.
        if seq_lt(seq, self.tcb.rcv.nxt) {
            let skip = self.tcb.rcv.nxt.wrapping_sub(seq) as usize;
            if skip >= text.len() {
                // A duplicate in its entirety; remind the peer where we
                // are.
                self.send_ack();
                return;
            }
            text = text.range(skip, text.len() - skip);
            seq = self.tcb.rcv.nxt;
        }

        if seq_gt(seq, self.tcb.rcv.nxt) {
            // A gap: the bytes in between are still missing. Without a
            // reassembly queue the text cannot be used; the immediate
            // duplicate ACK tells the peer what we still need.
            self.drop_segment(segment, DropReason::SeqOutOfOrder);
            self.send_ack();
            return;
        }

        let data = text.to_vec();
        let taken = self.read.insert(&data);
        self.tcb.rcv.nxt = self.tcb.rcv.nxt.wrapping_add(taken as u32);
        self.tcb.rcv.wnd = self.read.remaining() as u32;

        if taken > 0 {
            if let Some((tsval, _)) = header.timestamps() {
                if self.tcb.snd.ts_ok {
                    self.tcb.ts_recent = tsval;
                }
            }
        }

        let full_sized = taken >= usize::from(self.config.local_mss());
        let buffer_filled = self.read.is_full();
        if header.ctl.psh() || buffer_filled {
            let data = self.read.take();
            self.tcb.rcv.wnd = self.read.remaining() as u32;
            self.signal_read(&data);
        }

        // Acknowledgement policy: PSH and a filled buffer are
        // acknowledged at once, a second full-sized segment likewise;
        // anything else waits for the delayed-ACK timer.
        if header.ctl.psh() || buffer_filled {
            self.send_ack();
        } else if full_sized {
            self.dack += 1;
            if self.dack >= 2 {
                self.send_ack();
            } else {
                self.dack_start();
            }
        } else {
            self.dack_start();
        }
    }

    /// Eighth step: the peer is done sending.
    fn process_fin(&mut self, segment: &Segment) {
        let header = &segment.header;
        let fin_seq = header.seq.wrapping_add(segment.text.len() as u32);
        if self.tcb.rcv.nxt != fin_seq {
            // Data ahead of the FIN is still missing (or the buffer had
            // no room for all of it); the peer will retransmit.
            return;
        }
        if let Some((tsval, _)) = header.timestamps() {
            if self.tcb.snd.ts_ok {
                self.tcb.ts_recent = tsval;
            }
        }
        self.tcb.rcv.nxt = self.tcb.rcv.nxt.wrapping_add(1);
        self.send_ack();
        debug!(connection = %self, "FIN received");

        // No more data will arrive; hand any buffered bytes up now.
        if !self.read.is_empty() {
            let data = self.read.take();
            self.tcb.rcv.wnd = self.read.remaining() as u32;
            self.signal_read(&data);
        }

        match self.state {
            State::SynReceived | State::Established => {
                self.set_state(State::CloseWait);
                self.signal_disconnect(Disconnect::Closing);
            }
            State::FinWait1 => {
                // Our FIN is not yet acknowledged, or this segment would
                // have moved us to FIN-WAIT-2 already.
                self.set_state(State::Closing);
                self.signal_disconnect(Disconnect::Closing);
            }
            State::FinWait2 => {
                self.set_state(State::TimeWait);
                self.timewait_start();
                self.signal_disconnect(Disconnect::Closing);
            }
            // A retransmitted FIN; the ACK above is all that is needed.
            State::CloseWait | State::Closing | State::LastAck => {}
            State::TimeWait => self.timewait_restart(),
            _ => {}
        }
    }

    pub(super) fn fin_acked(&self) -> bool {
        self.fin_seq
            .map(|seq| seq_gt(self.tcb.snd.una, seq))
            .unwrap_or(false)
    }
}
