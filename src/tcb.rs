//! The transmission control block: every sequence, window, and
//! congestion variable a connection keeps.

use crate::{
    config::Config,
    seq::{seq_le, seq_lt},
};
use std::fmt::{self, Display};

//      1         2          3          4
// ----------|----------|----------|----------
//        SND.UNA    SND.NXT    SND.UNA
//                             +SND.WND
//
// 1 - old sequence numbers which have been acknowledged
// 2 - sequence numbers of unacknowledged data
// 3 - sequence numbers allowed for new data transmission (send window)
// 4 - future sequence numbers which are not yet allowed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendSequenceSpace {
    /// Initial send sequence number.
    pub iss: u32,
    /// Oldest unacknowledged sequence number.
    pub una: u32,
    /// Next sequence number to send.
    pub nxt: u32,
    /// The peer's advertised window, already descaled into bytes.
    pub wnd: u32,
    /// Segment sequence number used for the last window update.
    pub wl1: u32,
    /// Segment acknowledgment number used for the last window update.
    pub wl2: u32,
    /// Largest segment the peer is willing to accept.
    pub mss: u16,
    /// Shift applied to windows the peer advertises.
    pub wind_shift: u8,
    /// Both sides negotiated the timestamp option.
    pub ts_ok: bool,
}

//     1          2          3
// ----------|----------|----------
//        RCV.NXT    RCV.NXT
//                  +RCV.WND
//
// 1 - old sequence numbers which have been acknowledged
// 2 - sequence numbers allowed for new reception
// 3 - future sequence numbers which are not yet allowed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveSequenceSpace {
    /// Initial receive sequence number.
    pub irs: u32,
    /// Next sequence number expected from the peer; the lower edge of
    /// the receive window.
    pub nxt: u32,
    /// How many bytes we can buffer, in bytes.
    pub wnd: u32,
    /// The window value most recently advertised on the wire, after
    /// scaling down.
    pub rwnd: u16,
    /// Shift the peer must apply to windows we advertise.
    pub wind_shift: u8,
}

/// NewReno state (RFC 5681, RFC 6582, RFC 3042).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Congestion {
    /// Congestion window, in bytes.
    pub cwnd: u32,
    /// Slow start threshold, in bytes.
    pub ssthresh: u32,
    /// Right edge of the window when loss recovery began; separates
    /// partial from full acknowledgements.
    pub recover: u32,
    /// Duplicate ACKs seen for the current SND.UNA.
    pub dup_acks: u16,
    /// Currently in fast recovery.
    pub fast_recovery: bool,
    /// A partial acknowledgement has already been seen this recovery.
    pub fpack_seen: bool,
    /// Limited transmit (RFC 3042) is enabled.
    pub limited_tx: bool,
}

/// The whole control block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tcb {
    pub snd: SendSequenceSpace,
    pub rcv: ReceiveSequenceSpace,
    pub cc: Congestion,
    /// Latest timestamp value received on a segment that advanced
    /// RCV.NXT; echoed back in our Techo field.
    pub ts_recent: u32,
}

impl Tcb {
    pub fn new(config: &Config) -> Self {
        Self {
            snd: SendSequenceSpace {
                mss: config.mss_floor,
                ..Default::default()
            },
            rcv: ReceiveSequenceSpace {
                wnd: config.initial_window(),
                ..Default::default()
            },
            cc: Congestion {
                limited_tx: true,
                ..Default::default()
            },
            ts_recent: 0,
        }
    }

    /// Seeds the send space with a fresh ISS.
    pub fn init(&mut self, iss: u32) {
        self.snd.iss = iss;
        self.snd.una = iss;
        self.snd.nxt = iss;
        self.cc.recover = iss;
    }

    /// Bytes sent but not yet acknowledged.
    pub fn flight_size(&self) -> u32 {
        self.snd.nxt.wrapping_sub(self.snd.una)
    }

    /// The lesser of the peer's window and the congestion window.
    pub fn send_window(&self) -> u32 {
        self.snd.wnd.min(self.cc.cwnd)
    }

    /// How much more the peer and the congestion window allow in flight.
    pub fn usable_window(&self) -> u32 {
        self.send_window().saturating_sub(self.flight_size())
    }

    /// Still in slow start?
    pub fn slow_start(&self) -> bool {
        self.cc.cwnd < self.cc.ssthresh
    }

    /// Does the incoming segment carry a valid window update?
    pub fn is_win_update(&self, seq: u32, ack: u32) -> bool {
        seq_lt(self.snd.wl1, seq) || (self.snd.wl1 == seq && seq_le(self.snd.wl2, ack))
    }
}

impl Display for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SND[UNA={} NXT={} WND={} MSS={}] RCV[NXT={} WND={}] CC[cwnd={} ssthresh={}]",
            self.snd.una,
            self.snd.nxt,
            self.snd.wnd,
            self.snd.mss,
            self.rcv.nxt,
            self.rcv.wnd,
            self.cc.cwnd,
            self.cc.ssthresh,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_arithmetic() {
        let mut tcb = Tcb::new(&Config::default());
        tcb.init(1000);
        tcb.snd.nxt = 1000 + 500;
        tcb.snd.wnd = 4096;
        tcb.cc.cwnd = 3000;

        assert_eq!(tcb.flight_size(), 500);
        assert_eq!(tcb.send_window(), 3000);
        assert_eq!(tcb.usable_window(), 2500);
    }

    #[test]
    fn usable_window_never_underflows() {
        let mut tcb = Tcb::new(&Config::default());
        tcb.init(0);
        tcb.snd.nxt = 5000;
        tcb.snd.wnd = 1000;
        tcb.cc.cwnd = 1000;
        assert_eq!(tcb.usable_window(), 0);
    }

    #[test]
    fn window_update_rule() {
        let mut tcb = Tcb::new(&Config::default());
        tcb.snd.wl1 = 100;
        tcb.snd.wl2 = 50;
        // Newer sequence number always updates.
        assert!(tcb.is_win_update(101, 0));
        // Same sequence number needs a no-older acknowledgement.
        assert!(tcb.is_win_update(100, 50));
        assert!(tcb.is_win_update(100, 51));
        assert!(!tcb.is_win_update(99, 60));
    }
}
