//! Per-direction AEAD cipher state with a monotone nonce counter and the
//! Noise rekey operation.

use zeroize::Zeroize;

use crate::error::CipherError;
use crate::primitives::{self, KEY_LEN};

/// One direction of an established session: a key and the counter used to
/// derive that direction's next nonce.
pub struct CipherState {
    key: [u8; KEY_LEN],
    n: u64,
}

impl CipherState {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key, n: 0 }
    }

    pub fn nonce(&self) -> u64 {
        self.n
    }

    /// Encrypts `plaintext` under the current key and nonce, then advances
    /// the nonce. Fails if the nonce space is exhausted.
    pub fn encrypt_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if self.n == u64::MAX {
            return Err(CipherError::NonceExhausted);
        }
        let ct = primitives::aead_encrypt(&self.key, self.n, ad, plaintext);
        self.n += 1;
        Ok(ct)
    }

    /// Decrypts `ciphertext`. On failure the nonce is left untouched so a
    /// caller may retry with a differently-ordered message without losing
    /// synchronization.
    pub fn decrypt_with_ad(&mut self, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if self.n == u64::MAX {
            return Err(CipherError::NonceExhausted);
        }
        let pt = primitives::aead_decrypt(&self.key, self.n, ad, ciphertext)
            .map_err(|_| CipherError::AuthTag)?;
        self.n += 1;
        Ok(pt)
    }

    /// Replaces the key without a handshake: `k' = AEAD(k, 2^64-1, "", zeros(32))[0..32]`,
    /// and resets the nonce to 0.
    pub fn rekey(&mut self) {
        let zeros = [0u8; 32];
        let ct = primitives::aead_encrypt(&self.key, u64::MAX, &[], &zeros);
        self.key.copy_from_slice(&ct[..KEY_LEN]);
        self.n = 0;
    }

    pub fn clear(&mut self) {
        self.key.zeroize();
        self.n = 0;
    }
}

impl Drop for CipherState {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let mut send = CipherState::new([1u8; KEY_LEN]);
        let mut recv = CipherState::new([1u8; KEY_LEN]);

        let ct = send.encrypt_with_ad(&[], b"hi").unwrap();
        let pt = recv.decrypt_with_ad(&[], &ct).unwrap();
        assert_eq!(pt, b"hi");
    }

    #[test]
    fn consecutive_encrypts_use_consecutive_nonces() {
        let mut cs = CipherState::new([3u8; KEY_LEN]);
        assert_eq!(cs.nonce(), 0);
        cs.encrypt_with_ad(&[], b"a").unwrap();
        assert_eq!(cs.nonce(), 1);
        cs.encrypt_with_ad(&[], b"b").unwrap();
        assert_eq!(cs.nonce(), 2);
    }

    #[test]
    fn failed_decrypt_does_not_advance_nonce() {
        let mut send = CipherState::new([4u8; KEY_LEN]);
        let mut recv = CipherState::new([4u8; KEY_LEN]);
        let mut ct = send.encrypt_with_ad(&[], b"hi").unwrap();
        *ct.last_mut().unwrap() ^= 1;

        assert!(recv.decrypt_with_ad(&[], &ct).is_err());
        assert_eq!(recv.nonce(), 0);
    }

    #[test]
    fn nonce_exhaustion_is_fatal() {
        let mut cs = CipherState::new([5u8; KEY_LEN]);
        cs.n = u64::MAX;
        assert_eq!(
            cs.encrypt_with_ad(&[], b"x").unwrap_err(),
            CipherError::NonceExhausted
        );
    }

    #[test]
    fn rekey_resets_nonce_and_changes_key() {
        let mut cs = CipherState::new([6u8; KEY_LEN]);
        cs.encrypt_with_ad(&[], b"a").unwrap();
        let key_before = cs.key;
        cs.rekey();
        assert_eq!(cs.nonce(), 0);
        assert_ne!(cs.key, key_before);
    }
}
