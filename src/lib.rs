//! A per-connection TCP engine for host-driven network stacks.
//!
//! This crate implements the hard half of a user-space TCP: the
//! eleven-state RFC 793 machine with retransmission, NewReno congestion
//! control (RFC 5681, RFC 6582), limited transmit (RFC 3042), window
//! scaling and timestamps (RFC 7323), and delayed acknowledgements. It
//! deliberately implements nothing else: IP, the listener/accept queue,
//! and the demultiplexer that routes `(local, remote)` tuples to
//! connections belong to the host, which owns each [`Connection`]
//! uniquely and drives it with arriving segments, elapsed time, and user
//! API calls.
//!
//! # Organization
//! - [`Connection`] is the engine: feed it segments with
//!   [`Connection::segment_arrives`], time with
//!   [`Connection::advance_time`], and drain its output with
//!   [`Connection::segments`].
//! - [`segment::Segment`] and [`payload::Payload`] carry bytes between
//!   the engine and the host without copying.
//! - [`tcb::Tcb`] holds the sequence and congestion variables; the
//!   remaining modules are its supporting pieces (RTT estimation,
//!   queues, the option codec).
//!
//! # Determinism
//! The engine never reads a clock or an entropy source on its own: time
//! only moves when the host calls `advance_time`, and the initial send
//! sequence comes from the [`Iss`] the host passes in. A seeded `Iss`
//! plus scripted segments reproduces any exchange exactly.

pub mod config;
pub use config::Config;

pub mod payload;
pub use payload::Payload;

pub mod seq;

pub mod socket;
pub use socket::{ConnectionId, Ipv4Address, Socket};

pub mod segment;
pub use segment::Segment;

pub mod options;

pub mod error;
pub use error::{Disconnect, DropReason, TcpError};

pub mod tcb;

pub mod rtt;

pub mod write_queue;

pub mod read_request;

pub mod rtx_queue;

pub mod connection;
pub use connection::{
    segment_arrives_closed, AdvanceTimeResult, Connection, SegmentArrivesResult, State,
};

use rand::{rngs::SmallRng, rngs::StdRng, RngCore, SeedableRng};

/// Where a connection's initial send sequence number comes from.
///
/// Real connections use [`Iss::Random`], drawn from operating system
/// entropy so sequence numbers are unpredictable. Tests use
/// [`Iss::FromSeed`] for reproducible exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Iss {
    #[default]
    Random,
    /// Deterministic but scrambled: the seed goes through a PRNG.
    FromSeed(u64),
    /// The exact value, for transcribing protocol figures in tests.
    Fixed(u32),
}

impl From<Iss> for u32 {
    fn from(iss: Iss) -> Self {
        match iss {
            Iss::Random => StdRng::from_entropy().next_u32(),
            Iss::FromSeed(seed) => SmallRng::seed_from_u64(seed).next_u32(),
            Iss::Fixed(value) => value,
        }
    }
}
