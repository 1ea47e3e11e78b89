//! Abstract collaborators the session core consumes but does not implement:
//! the secure key store and the raw transport. Embedding applications
//! (Bluetooth mesh, relay fallback, or a test harness) provide concrete
//! implementations.

use x25519_dalek::StaticSecret;

/// Secure storage for the long-term identity key. Implementations decide how
/// and where the private key is persisted; this crate only asks to load or
/// create one, and to have sensitive buffers wiped on request.
pub trait Keychain: Send + Sync {
    fn load_or_create_static(&self) -> StaticSecret;

    /// Overwrites `buf` in a way the compiler cannot optimize away.
    fn secure_clear(&self, buf: &mut [u8]) {
        use zeroize::Zeroize;
        buf.zeroize();
    }
}

/// The raw framed-bytes transport underneath the session core. Implementors
/// deliver inbound bytes to `SessionManager::handle_incoming` themselves;
/// this trait only covers the outbound direction and peer self-identification.
pub trait Transport: Send + Sync {
    fn my_peer_id(&self) -> crate::peer::PeerId;

    /// Sends `bytes` to `peer`. Errors are transport-specific and are not
    /// modeled by this crate; failures should simply not be delivered.
    fn send(&self, peer: crate::peer::PeerId, bytes: Vec<u8>);
}
