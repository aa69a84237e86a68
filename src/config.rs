//! Per-connection configuration.

use std::time::Duration;

/// Tunables recognized by the engine, with the stack-wide defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Initial receive window when window scaling is off.
    pub window_size: u32,
    /// Advertised window-scale factor. `None` disables the option.
    pub window_scaling: Option<u8>,
    /// Receive window when window scaling is negotiated.
    pub scaled_window_size: u32,
    /// Offer the timestamp option on SYN segments.
    pub timestamps: bool,
    /// Lower clamp applied to the MSS a peer advertises.
    pub mss_floor: u16,
    /// Local link MTU; the local MSS is derived from it.
    pub mtu: u16,
    /// Maximum segment lifetime; TIME-WAIT lasts twice this.
    pub msl: Duration,
    /// Upper bound on how long an acknowledgement may be delayed.
    pub dack_timeout: Duration,
}

/// Tick length of the timestamp value clock.
pub const CLOCK_GRANULARITY: Duration = Duration::from_micros(100);

/// Consecutive data retransmissions tolerated before the connection is
/// torn down.
pub const MAX_RTX_ATTEMPTS: u32 = 15;

/// Consecutive SYN retransmissions tolerated before giving up on the
/// handshake.
pub const MAX_SYN_RTX: u32 = 5;

const DEFAULT_WINDOW_SCALING: u8 = 5;

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: 0xffff,
            window_scaling: Some(DEFAULT_WINDOW_SCALING),
            scaled_window_size: 8192 << DEFAULT_WINDOW_SCALING,
            timestamps: true,
            mss_floor: 536,
            mtu: 1500,
            msl: Duration::from_secs(30),
            dack_timeout: Duration::from_millis(40),
        }
    }
}

impl Config {
    /// The largest segment the local side can carry: the MTU less the
    /// IPv4 and TCP base headers.
    pub fn local_mss(&self) -> u16 {
        self.mtu - 40
    }

    /// The receive window a fresh connection starts with.
    pub fn initial_window(&self) -> u32 {
        match self.window_scaling {
            Some(_) => self.scaled_window_size,
            None => self.window_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stack_constants() {
        let config = Config::default();
        assert_eq!(config.window_size, 65535);
        assert_eq!(config.scaled_window_size, 262144);
        assert_eq!(config.local_mss(), 1460);
        assert_eq!(config.msl, Duration::from_secs(30));
    }
}
