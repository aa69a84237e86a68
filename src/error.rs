//! Error and event types surfaced to user code.

use std::fmt::{self, Display};

/// Connection-level failures reported through `on_error` and the
/// disconnect path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TcpError {
    #[error("connection refused")]
    Refused,
    #[error("connection reset")]
    Reset,
    #[error("connection closing")]
    Closing,
    #[error("retransmission attempts exhausted")]
    RetransmitExhausted,
    #[error("the connection is not writable")]
    NotWritable,
}

/// Why a connection came apart, delivered with `on_disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The peer sent FIN; a graceful teardown is in progress.
    Closing,
    /// The SYN was answered with RST.
    Refused,
    /// The peer reset the connection, or a local abort did.
    Reset,
}

impl Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::Closing => write!(f, "connection closing"),
            Disconnect::Refused => write!(f, "connection refused"),
            Disconnect::Reset => write!(f, "connection reset"),
        }
    }
}

/// Why an arriving segment was discarded, delivered with
/// `on_packet_dropped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No particular bookkeeping reason.
    Na,
    /// The segment fell outside the receive window.
    SeqOutOfOrder,
    /// A synchronized state received a segment without ACK.
    AckNotSet,
    /// The acknowledgement was beyond anything sent.
    AckOutOfOrder,
    /// An out-of-window RST.
    Rst,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Na => write!(f, "N/A"),
            DropReason::SeqOutOfOrder => write!(f, "sequence number out of order"),
            DropReason::AckNotSet => write!(f, "ACK not set"),
            DropReason::AckOutOfOrder => write!(f, "acknowledgement out of order"),
            DropReason::Rst => write!(f, "out-of-window RST"),
        }
    }
}
