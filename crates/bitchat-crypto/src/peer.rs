//! Peer identifiers: the canonical 8-byte short id and its derivation from a
//! 32-byte long-term Curve25519 public key.

use std::fmt;

use crate::primitives::sha256;

pub const SHORT_ID_LEN: usize = 8;
pub const LONG_ID_LEN: usize = 32;

/// The canonical peer identifier used to key sessions: the first 8 bytes of
/// `SHA256(long_term_public_key)`, rendered as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerId([u8; SHORT_ID_LEN]);

impl PeerId {
    pub fn from_bytes(bytes: [u8; SHORT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Derives the short id from a peer's 32-byte long-term public key.
    pub fn from_long_term_key(public_key: &[u8; LONG_ID_LEN]) -> Self {
        let digest = sha256(public_key);
        let mut short = [0u8; SHORT_ID_LEN];
        short.copy_from_slice(&digest[..SHORT_ID_LEN]);
        Self(short)
    }

    pub fn as_bytes(&self) -> &[u8; SHORT_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses either a 16-hex-char short id or a 64-hex-char long id (in
    /// which case it is reduced to the short id via [`Self::from_long_term_key`]).
    pub fn parse(s: &str) -> Option<Self> {
        if !is_valid_peer_string(s) {
            return None;
        }
        match s.len() {
            16 => {
                let bytes = hex::decode(s).ok()?;
                let arr: [u8; SHORT_ID_LEN] = bytes.try_into().ok()?;
                Some(Self(arr))
            }
            64 => {
                let bytes = hex::decode(s).ok()?;
                let arr: [u8; LONG_ID_LEN] = bytes.try_into().ok()?;
                Some(Self::from_long_term_key(&arr))
            }
            _ => None,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// `true` iff `s` matches `[A-Za-z0-9_-]{1,64}`, and when `s` is pure hex its
/// length is 16 or 64.
pub fn is_valid_peer_string(s: &str) -> bool {
    if s.is_empty() || s.len() > 64 {
        return false;
    }
    if !s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
        return false;
    }
    let is_hex = s.bytes().all(|b| b.is_ascii_hexdigit());
    if is_hex {
        return s.len() == 16 || s.len() == 64;
    }
    true
}
