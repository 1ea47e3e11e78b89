//! Per-peer session state machine: `Uninit -> Handshaking -> Established`,
//! with `Failed` and `reset` reachable from any state.

use std::time::Instant;

use tracing::{debug, info, warn};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::cipher_state::CipherState;
use crate::config::RekeyPolicy;
use crate::error::SessionError;
use crate::handshake::{HandshakeState, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninit,
    Handshaking,
    Established,
    Failed,
}

enum Inner {
    Uninit,
    Handshaking(HandshakeState),
    Established {
        send: CipherState,
        recv: CipherState,
        remote_static: PublicKey,
        handshake_hash: [u8; 32],
        self_dial: bool,
        established_at: Instant,
        messages_sent: u64,
        bytes_sent: u64,
    },
    Failed(crate::error::HandshakeError),
}

/// One peer's handshake/transport state. Exclusively owned by whatever holds
/// it (typically [`crate::manager::SessionManager`]); all mutation happens
/// through `&mut self`, so callers are responsible for their own locking if
/// a session is shared.
pub struct Session {
    peer_label: String,
    local_static: StaticSecret,
    retain_handshake_messages: bool,
    role: Role,
    inner: Inner,
}

impl Session {
    pub fn new(
        peer_label: impl Into<String>,
        local_static: StaticSecret,
        retain_handshake_messages: bool,
        role: Role,
    ) -> Self {
        Self {
            peer_label: peer_label.into(),
            local_static,
            retain_handshake_messages,
            role,
            inner: Inner::Uninit,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> SessionStatus {
        match &self.inner {
            Inner::Uninit => SessionStatus::Uninit,
            Inner::Handshaking(_) => SessionStatus::Handshaking,
            Inner::Established { .. } => SessionStatus::Established,
            Inner::Failed(_) => SessionStatus::Failed,
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self.inner, Inner::Established { .. })
    }

    pub fn remote_static(&self) -> Option<PublicKey> {
        match &self.inner {
            Inner::Established { remote_static, .. } => Some(*remote_static),
            _ => None,
        }
    }

    pub fn handshake_hash(&self) -> Option<[u8; 32]> {
        match &self.inner {
            Inner::Established { handshake_hash, .. } => Some(*handshake_hash),
            _ => None,
        }
    }

    /// `true` if the handshake completed but the peer's static key matched
    /// our own.
    pub fn self_dial(&self) -> bool {
        matches!(&self.inner, Inner::Established { self_dial: true, .. })
    }

    /// Begins a handshake according to `self.role()`. Only valid from
    /// `Uninit`. An initiator writes and returns message 1; a responder only
    /// transitions to `Handshaking` and returns an empty reply, since it has
    /// nothing to send until it has read message 1.
    pub fn start_handshake(&mut self) -> Result<Vec<u8>, SessionError> {
        if !matches!(self.inner, Inner::Uninit) {
            return Err(SessionError::InvalidState);
        }
        let mut hs = HandshakeState::new(self.role, self.local_static.clone(), self.retain_handshake_messages);
        let msg1 = match self.role {
            Role::Initiator => {
                let msg1 = hs.write_message(&[])?;
                debug!(peer = %self.peer_label, len = msg1.len(), "sent handshake message 1");
                msg1
            }
            Role::Responder => {
                debug!(peer = %self.peer_label, "awaiting handshake message 1 as responder");
                Vec::new()
            }
        };
        self.inner = Inner::Handshaking(hs);
        Ok(msg1)
    }

    /// Feeds an inbound handshake message. Implicitly creates a handshake in
    /// `self.role()` if the session was `Uninit`. Returns the reply to send,
    /// if any (the final message produces none).
    pub fn process_handshake(&mut self, msg: &[u8]) -> Result<Option<Vec<u8>>, SessionError> {
        let mut hs = match std::mem::replace(&mut self.inner, Inner::Uninit) {
            Inner::Uninit => {
                HandshakeState::new(self.role, self.local_static.clone(), self.retain_handshake_messages)
            }
            Inner::Handshaking(hs) => hs,
            other @ (Inner::Established { .. } | Inner::Failed(_)) => {
                self.inner = other;
                return Err(SessionError::InvalidState);
            }
        };

        if let Err(e) = hs.read_message(msg) {
            warn!(peer = %self.peer_label, error = %e, "handshake failed reading message");
            self.inner = Inner::Failed(e);
            return Err(SessionError::HandshakeFailed(e));
        }
        debug!(peer = %self.peer_label, "received handshake message");

        if hs.is_complete() {
            let self_dial = hs.self_dial();
            let handshake_hash = hs.handshake_hash();
            let remote_static = hs.remote_static().expect("complete handshake always has a remote static key");
            let (send, recv) = match hs.split() {
                Ok(pair) => pair,
                Err(e) => {
                    self.inner = Inner::Failed(e);
                    return Err(SessionError::HandshakeFailed(e));
                }
            };
            info!(peer = %self.peer_label, %self_dial, "handshake established");
            self.inner = Inner::Established {
                send,
                recv,
                remote_static,
                handshake_hash,
                self_dial,
                established_at: Instant::now(),
                messages_sent: 0,
                bytes_sent: 0,
            };
            return Ok(None);
        }

        match hs.write_message(&[]) {
            Ok(reply) => {
                debug!(peer = %self.peer_label, len = reply.len(), "sent handshake reply");
                self.inner = Inner::Handshaking(hs);
                Ok(Some(reply))
            }
            Err(e) => {
                warn!(peer = %self.peer_label, error = %e, "handshake failed writing reply");
                self.inner = Inner::Failed(e);
                Err(SessionError::HandshakeFailed(e))
            }
        }
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        match &mut self.inner {
            Inner::Established { send, messages_sent, bytes_sent, .. } => {
                let ct = send.encrypt_with_ad(&[], plaintext)?;
                *messages_sent += 1;
                *bytes_sent += plaintext.len() as u64;
                Ok(ct)
            }
            _ => Err(SessionError::NotEstablished),
        }
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        match &mut self.inner {
            Inner::Established { recv, .. } => Ok(recv.decrypt_with_ad(&[], ciphertext)?),
            _ => Err(SessionError::NotEstablished),
        }
    }

    /// `true` if any of `policy`'s thresholds have been crossed since the
    /// session was established (or last rekeyed).
    pub fn needs_rekey(&self, policy: &RekeyPolicy) -> bool {
        match &self.inner {
            Inner::Established { established_at, messages_sent, bytes_sent, .. } => {
                *messages_sent >= policy.max_messages
                    || *bytes_sent >= policy.max_bytes
                    || established_at.elapsed() >= policy.max_age
            }
            _ => false,
        }
    }

    /// Unconditionally tears the session down to `Uninit`, zeroizing key
    /// material. Emits a `session_expired` log event iff the session had
    /// been `Established`.
    pub fn reset(&mut self) {
        if let Inner::Established { mut send, mut recv, .. } = std::mem::replace(&mut self.inner, Inner::Uninit) {
            send.clear();
            recv.clear();
            info!(peer = %self.peer_label, "session_expired");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives;

    fn keypair() -> StaticSecret {
        primitives::generate_keypair().0
    }

    fn establish_pair() -> (Session, Session) {
        let mut i = Session::new("initiator", keypair(), false, Role::Initiator);
        let mut r = Session::new("responder", keypair(), false, Role::Responder);

        let msg1 = i.start_handshake().unwrap();
        let msg2 = r.process_handshake(&msg1).unwrap().unwrap();
        let msg3 = i.process_handshake(&msg2).unwrap().unwrap();
        assert!(r.process_handshake(&msg3).unwrap().is_none());

        assert!(i.is_established());
        assert!(r.is_established());
        (i, r)
    }

    #[test]
    fn happy_path_encrypts_both_directions() {
        let (mut i, mut r) = establish_pair();
        let ct = i.encrypt(b"hello").unwrap();
        assert_eq!(r.decrypt(&ct).unwrap(), b"hello");

        let ct = r.encrypt(b"hi").unwrap();
        assert_eq!(i.decrypt(&ct).unwrap(), b"hi");
    }

    #[test]
    fn encrypt_before_established_fails_not_established() {
        let mut s = Session::new("p", keypair(), false, Role::Initiator);
        assert!(matches!(s.encrypt(b"x"), Err(SessionError::NotEstablished)));
    }

    #[test]
    fn reset_returns_to_uninit() {
        let (mut i, _r) = establish_pair();
        i.reset();
        assert_eq!(i.status(), SessionStatus::Uninit);
        assert!(matches!(i.encrypt(b"x"), Err(SessionError::NotEstablished)));
    }

    #[test]
    fn double_start_handshake_is_invalid_state() {
        let mut s = Session::new("p", keypair(), false, Role::Initiator);
        s.start_handshake().unwrap();
        assert!(matches!(s.start_handshake(), Err(SessionError::InvalidState)));
    }

    #[test]
    fn garbled_handshake_message_fails_session() {
        let mut r = Session::new("r", keypair(), false, Role::Responder);
        let err = r.process_handshake(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, SessionError::HandshakeFailed(_)));
        assert_eq!(r.status(), SessionStatus::Failed);
    }

    #[test]
    fn responder_start_handshake_returns_empty_reply_and_awaits_message_1() {
        let mut r = Session::new("r", keypair(), false, Role::Responder);
        let reply = r.start_handshake().unwrap();
        assert!(reply.is_empty());
        assert_eq!(r.status(), SessionStatus::Handshaking);
    }

    #[test]
    fn reset_zeroizes_a_handshake_in_progress() {
        let mut i = Session::new("i", keypair(), true, Role::Initiator);
        i.start_handshake().unwrap();
        assert_eq!(i.status(), SessionStatus::Handshaking);
        i.reset();
        assert_eq!(i.status(), SessionStatus::Uninit);
    }
}
