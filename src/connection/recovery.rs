//! Acknowledgement processing, congestion control, and the timers that
//! repair loss.
//!
//! Congestion control is NewReno: slow start and congestion avoidance
//! per RFC 5681, fast retransmit/fast recovery with the `recover`
//! bookkeeping of RFC 6582, and limited transmit per RFC 3042. The
//! retransmission timeout backs off exponentially and gives up after a
//! bounded number of attempts.

use super::{Connection, State};
use crate::{
    config::{CLOCK_GRANULARITY, MAX_RTX_ATTEMPTS, MAX_SYN_RTX},
    error::{Disconnect, DropReason, TcpError},
    segment::{Segment, TcpHeader},
    seq::{seq_ge, seq_gt, seq_le, seq_lt},
};
use tracing::{debug, trace};

impl Connection {
    /// Fifth-step ACK handling shared by all synchronized states.
    /// Returns false when the segment was consumed (dropped) here.
    pub(super) fn process_ack(&mut self, segment: &Segment) -> bool {
        let header = &segment.header;
        let ack = header.ack;

        if seq_gt(ack, self.tcb.snd.nxt) {
            // Acknowledges data we never sent.
            self.drop_segment(segment, DropReason::AckOutOfOrder);
            self.send_ack();
            return false;
        }

        let win = u32::from(header.wnd) << self.tcb.snd.wind_shift;

        if self.is_dup_ack(segment, win) {
            self.on_dup_ack();
            return true;
        }

        if seq_lt(self.tcb.snd.una, ack) {
            // New data is acknowledged.
            let bytes_acked = ack.wrapping_sub(self.tcb.snd.una);
            self.take_rtt_measure(header);
            self.tcb.snd.una = ack;
            self.rtxq.acknowledge(ack);
            self.flush_acked_writes();
            self.rtx_attempt = 0;

            if self.tcb.cc.fast_recovery {
                // A full acknowledgement covers everything that was
                // outstanding when recovery began.
                if seq_ge(ack, self.tcb.cc.recover) {
                    self.finish_fast_recovery();
                } else {
                    self.partial_ack(bytes_acked);
                }
            } else {
                self.tcb.cc.dup_acks = 0;
                self.reno_ack(bytes_acked);
            }

            self.window_update(header, win);

            if self.rtxq.is_empty() {
                self.rtx_stop();
            } else {
                self.rtx_restart();
            }
            self.writeq_push();
        } else if ack == self.tcb.snd.una {
            // An old acknowledgement without the duplicate-ACK shape;
            // its window information may still be fresh.
            self.window_update(header, win);
        }
        true
    }

    /// RFC 5681 section 2: all five conditions must hold.
    fn is_dup_ack(&self, segment: &Segment, win: u32) -> bool {
        segment.header.ack == self.tcb.snd.una
            && self.tcb.flight_size() > 0
            && segment.text.is_empty()
            && self.tcb.snd.wnd == win
            && !segment.header.ctl.syn()
            && !segment.header.ctl.fin()
    }

    fn on_dup_ack(&mut self) {
        self.tcb.cc.dup_acks += 1;
        trace!(connection = %self, dup_acks = self.tcb.cc.dup_acks, "duplicate ACK");
        match self.tcb.cc.dup_acks {
            1 | 2 => {
                if self.tcb.cc.limited_tx {
                    self.limited_transmit();
                }
            }
            3 if !self.tcb.cc.fast_recovery => self.fast_retransmit(),
            _ => {
                if self.tcb.cc.fast_recovery {
                    // Another segment has left the network; inflate and
                    // maybe send.
                    self.tcb.cc.cwnd += u32::from(self.tcb.snd.mss);
                    let usable = self.tcb.usable_window();
                    if usable > 0 {
                        self.send_from_queue(
                            usize::from(self.tcb.snd.mss).min(usable as usize),
                        );
                    }
                }
            }
        }
    }

    /// RFC 3042: the first two duplicate ACKs may each trigger one new
    /// segment, without touching cwnd, provided the receiver's window
    /// has room.
    fn limited_transmit(&mut self) {
        let flight = self.tcb.flight_size();
        if flight >= self.tcb.snd.wnd {
            return;
        }
        let max = (self.tcb.snd.wnd - flight).min(u32::from(self.tcb.snd.mss)) as usize;
        if self.send_from_queue(max) {
            trace!(connection = %self, "limited transmit");
        }
    }

    /// The third duplicate ACK: one retransmission, halve the pipe,
    /// enter fast recovery.
    fn fast_retransmit(&mut self) {
        debug!(connection = %self, tcb = %self.tcb, "fast retransmit");
        let smss = u32::from(self.tcb.snd.mss);
        self.reduce_ssthresh();
        self.retransmit();
        self.tcb.cc.cwnd = self.tcb.cc.ssthresh + 3 * smss;
        self.tcb.cc.fast_recovery = true;
        self.tcb.cc.fpack_seen = false;
        self.tcb.cc.recover = self.tcb.snd.nxt;
    }

    /// RFC 6582: an ACK that advances but does not reach `recover` means
    /// the segment after it is missing too.
    fn partial_ack(&mut self, bytes_acked: u32) {
        trace!(connection = %self, "partial acknowledgement in fast recovery");
        let smss = u32::from(self.tcb.snd.mss);
        self.retransmit();
        // Deflate by the amount acknowledged, then add back one SMSS
        // for the segment that just left the network.
        let deflate = if bytes_acked >= smss {
            bytes_acked - smss
        } else {
            bytes_acked
        };
        self.tcb.cc.cwnd = self.tcb.cc.cwnd.saturating_sub(deflate).max(smss);
        if !self.tcb.cc.fpack_seen {
            self.tcb.cc.fpack_seen = true;
            self.rtx_restart();
        }
    }

    /// A full acknowledgement ends fast recovery and deflates the
    /// window.
    fn finish_fast_recovery(&mut self) {
        let smss = u32::from(self.tcb.snd.mss);
        self.tcb.cc.fast_recovery = false;
        self.tcb.cc.fpack_seen = false;
        self.tcb.cc.dup_acks = 0;
        self.tcb.cc.cwnd = self
            .tcb
            .cc
            .ssthresh
            .min(self.tcb.flight_size().max(smss) + smss);
        debug!(connection = %self, tcb = %self.tcb, "fast recovery finished");
    }

    /// Slow start or congestion avoidance, depending on where cwnd
    /// stands relative to ssthresh.
    fn reno_ack(&mut self, bytes_acked: u32) {
        let smss = u32::from(self.tcb.snd.mss);
        if self.tcb.slow_start() {
            self.tcb.cc.cwnd += bytes_acked.min(smss);
        } else {
            self.tcb.cc.cwnd += (smss * smss / self.tcb.cc.cwnd).max(1);
        }
    }

    /// Initial congestion state, taken when the connection reaches
    /// ESTABLISHED and the peer's MSS and window are known.
    pub(super) fn reno_init(&mut self) {
        let smss = u32::from(self.tcb.snd.mss);
        self.tcb.cc.cwnd = 3 * smss;
        self.tcb.cc.ssthresh = self.tcb.snd.wnd;
        debug!(connection = %self, tcb = %self.tcb, "congestion control initialized");
    }

    fn reduce_ssthresh(&mut self) {
        let smss = u32::from(self.tcb.snd.mss);
        self.tcb.cc.ssthresh = (self.tcb.flight_size() / 2).max(2 * smss);
    }

    /// Samples the round trip, preferring the timestamp echo when the
    /// option is in use (which Karn's rule then permits even for
    /// retransmitted segments).
    pub(super) fn take_rtt_measure(&mut self, header: &TcpHeader) {
        if self.tcb.snd.ts_ok {
            if let Some((_, tsecr)) = header.timestamps() {
                if tsecr != 0 {
                    let ticks = self.now_ts().wrapping_sub(tsecr);
                    self.rtt.sample(CLOCK_GRANULARITY * ticks);
                    return;
                }
            }
        }
        self.rtt.on_ack(self.clock, header.ack);
    }

    /// RFC 793 window update rule, applied once the acknowledgement was
    /// found acceptable.
    fn window_update(&mut self, header: &TcpHeader, win: u32) {
        if self.tcb.snd.wnd == win || !self.tcb.is_win_update(header.seq, header.ack) {
            return;
        }
        trace!(connection = %self, old = self.tcb.snd.wnd, new = win, "window update");
        self.tcb.snd.wnd = win;
        self.tcb.snd.wl1 = header.seq;
        self.tcb.snd.wl2 = header.ack;
        if win > 0 {
            self.persist_stop();
            self.writeq_push();
        } else if self.writeq.has_remaining() {
            self.persist_ensure_started();
        }
    }

    /// Reports write requests whose final byte SND.UNA has now passed.
    fn flush_acked_writes(&mut self) {
        while let Some(&(end, len)) = self.pending_writes.front() {
            if !seq_le(end, self.tcb.snd.una) {
                break;
            }
            self.pending_writes.pop_front();
            self.signal_write(len);
        }
    }

    /// Puts the earliest unacknowledged segment back on the wire with
    /// current acknowledgement and window information: the queued entry
    /// whose sequence range covers SND.UNA.
    pub(super) fn retransmit(&mut self) {
        let target = self.tcb.snd.una;
        let (seq, syn, fin, psh, text) = {
            let Some(entry) = self.rtxq.entry_at(target) else {
                return;
            };
            entry.retransmitted = true;
            (
                entry.seq,
                entry.syn,
                entry.fin,
                entry.psh,
                entry.text.clone(),
            )
        };
        // Karn: whatever was being timed is now ambiguous.
        self.rtt.on_retransmit();

        let mut builder = self.header(seq);
        if syn {
            builder = builder.syn();
            let options = if self.state == State::SynSent {
                self.syn_options()
            } else {
                self.syn_ack_options()
            };
            for option in options {
                builder = builder.option(option);
            }
        }
        if fin {
            builder = builder.fin();
        }
        if psh {
            builder = builder.psh();
        }
        if self.state == State::SynSent {
            builder = builder.wnd(self.syn_window());
        } else {
            let wnd = if syn {
                self.syn_window()
            } else {
                self.advertised_window()
            };
            builder = builder.ack(self.tcb.rcv.nxt).wnd(wnd);
            self.dack = 0;
            self.dack_deadline = None;
        }
        if !syn {
            if let Some(ts) = self.ts_option() {
                builder = builder.option(ts);
            }
        }
        self.outgoing.push_back(Segment::new(builder.build(), text));
    }

    /// The retransmission timer fired.
    pub(super) fn rtx_timeout(&mut self) {
        if self.rtxq.is_empty() {
            return;
        }
        let rto = self.rtt.rto();
        let front_is_syn = self.rtxq.front().map(|entry| entry.syn).unwrap_or(false);
        if front_is_syn {
            self.syn_rtx += 1;
        } else {
            self.rtx_attempt += 1;
        }
        let attempts = if front_is_syn {
            self.syn_rtx
        } else {
            self.rtx_attempt
        };
        debug!(connection = %self, attempts, ?rto, "retransmission timeout");
        self.signal_rtx_timeout(attempts, rto);

        if self.rtx_attempt >= MAX_RTX_ATTEMPTS || self.syn_rtx >= MAX_SYN_RTX {
            debug!(connection = %self, "retransmission attempts exhausted");
            self.signal_error(TcpError::RetransmitExhausted);
            self.enter_closed(Some(Disconnect::Reset));
            return;
        }

        // RFC 5681 equation 4, then collapse to one segment and back
        // off.
        self.reduce_ssthresh();
        self.tcb.cc.cwnd = u32::from(self.tcb.snd.mss);
        self.tcb.cc.fast_recovery = false;
        self.tcb.cc.fpack_seen = false;
        self.tcb.cc.dup_acks = 0;
        self.retransmit();
        self.rtt.backoff();
        self.rtx_deadline = Some(self.clock + self.rtt.rto());
    }

    /// The persist timer fired: the peer's window has been zero for a
    /// while. One byte goes out to force a fresh acknowledgement.
    pub(super) fn persist_probe(&mut self) {
        if self.tcb.snd.wnd > 0 || !self.writeq.has_remaining() {
            self.persist_stop();
            return;
        }
        debug!(connection = %self, interval = ?self.persist_interval, "zero window probe");
        self.send_from_queue(1);
        self.persist_interval = (self.persist_interval * 2).min(super::PERSIST_MAX);
        self.persist_deadline = Some(self.clock + self.persist_interval);
    }
}
