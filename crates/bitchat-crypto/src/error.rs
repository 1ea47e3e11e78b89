//! Error taxonomy for the secure session core.
//!
//! Each component owns the narrowest enum it can actually raise; the session
//! and manager layers aggregate those via `#[from]` rather than re-deriving a
//! parallel error type per call site.

use thiserror::Error;

/// Raised by [`crate::primitives`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveError {
    #[error("AEAD authentication tag mismatch")]
    AuthTag,
    #[error("key agreement produced a degenerate (all-zero) shared secret")]
    KeyAgreementFailure,
}

/// Raised by [`crate::cipher_state::CipherState`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    #[error("nonce space exhausted")]
    NonceExhausted,
    #[error("AEAD authentication tag mismatch")]
    AuthTag,
}

impl From<PrimitiveError> for CipherError {
    fn from(e: PrimitiveError) -> Self {
        match e {
            PrimitiveError::AuthTag => CipherError::AuthTag,
            PrimitiveError::KeyAgreementFailure => {
                // cipher state never performs DH; unreachable in practice.
                CipherError::AuthTag
            }
        }
    }
}

/// Raised by [`crate::handshake::HandshakeState`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("handshake operation invalid in the current step")]
    InvalidState,
    #[error("malformed handshake message ({0})")]
    Malformed(&'static str),
    #[error("AEAD authentication tag mismatch")]
    AuthTag,
    #[error("key agreement failed")]
    KeyAgreementFailure,
}

impl From<PrimitiveError> for HandshakeError {
    fn from(e: PrimitiveError) -> Self {
        match e {
            PrimitiveError::AuthTag => HandshakeError::AuthTag,
            PrimitiveError::KeyAgreementFailure => HandshakeError::KeyAgreementFailure,
        }
    }
}

impl From<CipherError> for HandshakeError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::AuthTag => HandshakeError::AuthTag,
            CipherError::NonceExhausted => HandshakeError::InvalidState,
        }
    }
}

/// The full taxonomy as seen by a single [`crate::session::Session`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("operation invalid in the current session state")]
    InvalidState,
    #[error("session is not established")]
    NotEstablished,
    #[error("AEAD authentication tag mismatch")]
    AuthTag,
    #[error("nonce space exhausted")]
    NonceExhausted,
    #[error("handshake failed: {0}")]
    HandshakeFailed(#[from] HandshakeError),
}

impl From<CipherError> for SessionError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::AuthTag => SessionError::AuthTag,
            CipherError::NonceExhausted => SessionError::NonceExhausted,
        }
    }
}

/// The taxonomy as seen through [`crate::manager::SessionManager`].
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no session for this peer")]
    SessionNotFound,
    #[error("a session is already established with this peer")]
    AlreadyEstablished,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Raised by [`crate::relay`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("invalid token prefix")]
    InvalidPrefix,
    #[error("invalid base64url encoding")]
    InvalidBase64,
    #[error("unknown packet type byte 0x{0:02x}")]
    UnknownPacketType(u8),
    #[error("unknown payload type byte 0x{0:02x}")]
    UnknownPayloadType(u8),
    #[error("declared payload length {declared} does not match remaining {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("field exceeds maximum length: {0}")]
    FieldTooLong(&'static str),
}
