#![forbid(unsafe_code)]
//! BitChat's secure session core: a from-scratch Noise_XX_25519_ChaChaPoly_SHA256
//! handshake engine, a per-peer session state machine, a session manager that
//! multiplexes handshakes and transport traffic across peers, and the relay
//! framing adapter used when the mesh transport is unavailable.

pub mod cipher_state;
pub mod config;
pub mod contracts;
pub mod error;
pub mod handshake;
pub mod manager;
pub mod peer;
pub mod primitives;
pub mod relay;
pub mod session;

pub use config::{RekeyPolicy, SessionConfig};
pub use contracts::{Keychain, Transport};
pub use manager::SessionManager;
pub use peer::PeerId;
pub use session::{Session, SessionStatus};
