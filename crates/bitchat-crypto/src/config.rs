//! Tunable thresholds, grouped into an explicit configuration type rather
//! than scattered constants.

use std::time::Duration;

/// Thresholds past which a session is considered to need a rekey. Crossing
/// any one of them is sufficient; see [`crate::session::Session::needs_rekey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RekeyPolicy {
    pub max_messages: u64,
    pub max_bytes: u64,
    pub max_age: Duration,
}

impl Default for RekeyPolicy {
    fn default() -> Self {
        Self {
            max_messages: 1 << 20,
            max_bytes: 1 << 32,
            max_age: Duration::from_secs(60 * 60),
        }
    }
}

/// Crate-wide runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub rekey_policy: RekeyPolicy,
    /// Whether a `HandshakeState` retains copies of the messages it sent.
    /// Useful for diagnostics/retransmission; off by default so failed
    /// handshakes don't linger in memory.
    pub retain_handshake_messages: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rekey_policy: RekeyPolicy::default(),
            retain_handshake_messages: false,
        }
    }
}
