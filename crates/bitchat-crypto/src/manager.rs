//! Multiplexes handshakes and transport traffic across many peers.
//!
//! The peer table uses [`dashmap`] for the reader-writer discipline the core
//! asks for: observers (`sessions_needing_rekey`, status checks) proceed
//! concurrently with each other, while per-peer mutation is serialized by
//! the shard lock `dashmap` already holds during `entry`/`get_mut`. Nothing
//! here ever calls a callback while holding that lock — results are
//! extracted into local bindings first, then the guard is dropped before
//! `tokio::spawn` dispatches the callback.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::config::SessionConfig;
use crate::contracts::Keychain;
use crate::error::{ManagerError, SessionError};
use crate::handshake::Role;
use crate::peer::PeerId;
use crate::session::{Session, SessionStatus};

/// XX message 1 is always exactly this many bytes; arbitration rule §4.5(2)
/// uses it as the sole discriminant for "this looks like a fresh handshake".
const XX_MESSAGE_1_LEN: usize = 32;

pub type EstablishedCallback = Arc<dyn Fn(PeerId, PublicKey) + Send + Sync>;
pub type FailedCallback = Arc<dyn Fn(PeerId, String) + Send + Sync>;

fn noop_established() -> EstablishedCallback {
    Arc::new(|_, _| {})
}

fn noop_failed() -> FailedCallback {
    Arc::new(|_, _| {})
}

pub struct SessionManager {
    local_static: StaticSecret,
    keychain: Arc<dyn Keychain>,
    config: SessionConfig,
    sessions: DashMap<PeerId, Session>,
    on_established: EstablishedCallback,
    on_failed: FailedCallback,
}

impl SessionManager {
    /// Loads (or creates) the long-term identity key through `keychain`,
    /// rather than taking one directly — key material only ever enters the
    /// session core through this trait, matching the dispose path back
    /// through `Keychain::secure_clear`.
    pub fn new(keychain: Arc<dyn Keychain>, config: SessionConfig) -> Self {
        let local_static = keychain.load_or_create_static();
        Self {
            local_static,
            keychain,
            config,
            sessions: DashMap::new(),
            on_established: noop_established(),
            on_failed: noop_failed(),
        }
    }

    pub fn with_callbacks(mut self, on_established: EstablishedCallback, on_failed: FailedCallback) -> Self {
        self.on_established = on_established;
        self.on_failed = on_failed;
        self
    }

    /// Builds a fresh `Uninit` session for `peer` in the given role. Takes
    /// the fields it needs by reference rather than `&self` so it can be
    /// called while another field of `self` (the peer table) is already
    /// borrowed.
    fn build_session(local_static: &StaticSecret, retain_handshake_messages: bool, peer: PeerId, role: Role) -> Session {
        Session::new(peer.to_hex(), local_static.clone(), retain_handshake_messages, role)
    }

    fn dispatch_established(&self, peer: PeerId, remote_static: PublicKey) {
        let cb = self.on_established.clone();
        tokio::spawn(async move { cb(peer, remote_static) });
    }

    fn dispatch_failed(&self, peer: PeerId, cause: String) {
        let cb = self.on_failed.clone();
        tokio::spawn(async move { cb(peer, cause) });
    }

    /// Starts a handshake as initiator. Fails with `AlreadyEstablished` if
    /// one is already up; evicts any stale partial session first.
    pub fn initiate(&self, peer: PeerId) -> Result<Vec<u8>, ManagerError> {
        if let Some(existing) = self.sessions.get(&peer) {
            if existing.is_established() {
                return Err(ManagerError::AlreadyEstablished);
            }
        }
        self.sessions.remove(&peer);

        let mut session =
            Self::build_session(&self.local_static, self.config.retain_handshake_messages, peer, Role::Initiator);
        let msg1 = session.start_handshake().map_err(ManagerError::Session)?;
        self.sessions.insert(peer, session);
        Ok(msg1)
    }

    /// Routes an inbound message to the matching session, applying the
    /// simultaneous/duplicate-handshake arbitration rules of §4.5.
    pub fn handle_incoming(&self, peer: PeerId, msg: &[u8]) -> Result<Option<Vec<u8>>, ManagerError> {
        enum Outcome {
            Reply(Option<Vec<u8>>),
            Established(PublicKey),
            Failed(SessionError),
        }

        let local_static = &self.local_static;
        let retain = self.config.retain_handshake_messages;

        let outcome = {
            let mut entry = self
                .sessions
                .entry(peer)
                .or_insert_with(|| Self::build_session(local_static, retain, peer, Role::Responder));

            let restart_as_responder = match entry.status() {
                SessionStatus::Established => {
                    debug!(peer = %peer, "handshake message for an established session, restarting");
                    true
                }
                SessionStatus::Handshaking if msg.len() == XX_MESSAGE_1_LEN => {
                    debug!(peer = %peer, "duplicate/competing handshake message 1, restarting as responder");
                    true
                }
                _ => false,
            };

            if restart_as_responder {
                *entry = Self::build_session(local_static, retain, peer, Role::Responder);
            }

            match entry.process_handshake(msg) {
                Ok(reply) => {
                    if entry.is_established() {
                        Outcome::Established(entry.remote_static().expect("just established"))
                    } else {
                        Outcome::Reply(reply)
                    }
                }
                Err(e) => Outcome::Failed(e),
            }
        };

        match outcome {
            Outcome::Reply(reply) => Ok(reply),
            Outcome::Established(remote_static) => {
                self.dispatch_established(peer, remote_static);
                Ok(None)
            }
            Outcome::Failed(e) => {
                self.sessions.remove(&peer);
                warn!(peer = %peer, error = %e, "session failed, evicted");
                self.dispatch_failed(peer, e.to_string());
                Err(ManagerError::Session(e))
            }
        }
    }

    pub fn encrypt(&self, peer: PeerId, plaintext: &[u8]) -> Result<Vec<u8>, ManagerError> {
        let mut session = self.sessions.get_mut(&peer).ok_or(ManagerError::SessionNotFound)?;
        session.encrypt(plaintext).map_err(ManagerError::Session)
    }

    pub fn decrypt(&self, peer: PeerId, ciphertext: &[u8]) -> Result<Vec<u8>, ManagerError> {
        let mut session = self.sessions.get_mut(&peer).ok_or(ManagerError::SessionNotFound)?;
        session.decrypt(ciphertext).map_err(ManagerError::Session)
    }

    pub fn is_established(&self, peer: PeerId) -> bool {
        self.sessions.get(&peer).map(|s| s.is_established()).unwrap_or(false)
    }

    pub fn remove(&self, peer: PeerId) {
        if let Some((_, mut session)) = self.sessions.remove(&peer) {
            session.reset();
        }
    }

    pub fn remove_all(&self) {
        for mut entry in self.sessions.iter_mut() {
            entry.reset();
        }
        self.sessions.clear();
    }

    /// Peers whose established session has crossed a rekey threshold.
    pub fn sessions_needing_rekey(&self) -> Vec<PeerId> {
        self.sessions
            .iter()
            .filter(|entry| entry.needs_rekey(&self.config.rekey_policy))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Tears down the existing session and starts a fresh handshake. There
    /// is no in-band Noise rekey message — a full XX handshake is the rekey.
    pub fn initiate_rekey(&self, peer: PeerId) -> Result<Vec<u8>, ManagerError> {
        self.remove(peer);
        let mut session =
            Self::build_session(&self.local_static, self.config.retain_handshake_messages, peer, Role::Initiator);
        let msg1 = session.start_handshake().map_err(ManagerError::Session)?;
        self.sessions.insert(peer, session);
        Ok(msg1)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let mut bytes = self.local_static.to_bytes();
        self.keychain.secure_clear(&mut bytes);
    }
}
