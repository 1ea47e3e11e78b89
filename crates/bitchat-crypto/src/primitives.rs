//! Symmetric primitives: hashing, HKDF, AEAD, and Curve25519 Diffie-Hellman.
//!
//! Everything here is a thin, explicit wrapper over RustCrypto crates. No
//! primitive here is itself stateful; nonce/counter management lives in
//! [`crate::cipher_state`].

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::PrimitiveError;

pub const HASH_LEN: usize = 32;
pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;
pub const DH_LEN: usize = 32;

pub fn sha256(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Noise-style HKDF: `HKDF(chaining_key, input_key_material) -> n` 32-byte outputs, `n` in 1..=3.
///
/// This is a single HKDF-Expand with an empty info string over `n * 32`
/// bytes, split into `n` chunks — not `n` separate expand calls, which would
/// fold an extra RFC5869 counter byte into every output and desync from any
/// conformant Noise implementation.
pub fn hkdf(chaining_key: &[u8; HASH_LEN], input_key_material: &[u8], n: usize) -> Vec<[u8; HASH_LEN]> {
    assert!((1..=3).contains(&n), "hkdf only defines 1..=3 outputs");

    let (_, hk) = Hkdf::<Sha256>::extract(Some(chaining_key.as_slice()), input_key_material);

    let mut okm = vec![0u8; n * HASH_LEN];
    hk.expand(&[], &mut okm)
        .expect("HKDF-SHA256 output length is always valid");

    okm.chunks_exact(HASH_LEN)
        .map(|chunk| chunk.try_into().expect("chunk is exactly HASH_LEN"))
        .collect()
}

/// Forms the 12-byte ChaCha20-Poly1305 nonce Noise uses: 4 zero bytes followed
/// by the 64-bit counter, little-endian.
pub fn form_nonce(counter: u64) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[4..].copy_from_slice(&counter.to_le_bytes());
    Nonce::from(bytes)
}

pub fn aead_encrypt(key: &[u8; KEY_LEN], counter: u64, ad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = form_nonce(counter);
    cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad: ad })
        .expect("ChaCha20-Poly1305 encryption is infallible for valid inputs")
}

pub fn aead_decrypt(
    key: &[u8; KEY_LEN],
    counter: u64,
    ad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, PrimitiveError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = form_nonce(counter);
    cipher
        .decrypt(&nonce, Payload { msg: ciphertext, aad: ad })
        .map_err(|_| PrimitiveError::AuthTag)
}

/// Generates a random Curve25519 keypair.
pub fn generate_keypair() -> (StaticSecret, PublicKey) {
    use rand::RngCore;

    let mut private = [0u8; DH_LEN];
    rand::thread_rng().fill_bytes(&mut private);
    let secret = StaticSecret::from(private);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// X25519 Diffie-Hellman. Fails if the result is the all-zero point (the
/// small-subgroup degenerate case Noise explicitly calls out).
pub fn dh(private: &StaticSecret, public: &PublicKey) -> Result<[u8; DH_LEN], PrimitiveError> {
    let shared = private.diffie_hellman(public);
    let bytes = shared.to_bytes();
    if bytes.iter().all(|b| *b == 0) {
        return Err(PrimitiveError::KeyAgreementFailure);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dh_round_trip() {
        let (a, a_pub) = generate_keypair();
        let (b, b_pub) = generate_keypair();

        let shared_a = dh(&a, &b_pub).unwrap();
        let shared_b = dh(&b, &a_pub).unwrap();
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn aead_round_trip() {
        let key = [7u8; KEY_LEN];
        let ct = aead_encrypt(&key, 0, b"ad", b"hello");
        let pt = aead_decrypt(&key, 0, b"ad", &ct).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn aead_tampered_tag_fails() {
        let key = [7u8; KEY_LEN];
        let mut ct = aead_encrypt(&key, 0, b"ad", b"hello");
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert_eq!(aead_decrypt(&key, 0, b"ad", &ct), Err(PrimitiveError::AuthTag));
    }

    #[test]
    fn aead_wrong_nonce_fails() {
        let key = [7u8; KEY_LEN];
        let ct = aead_encrypt(&key, 0, b"ad", b"hello");
        assert_eq!(aead_decrypt(&key, 1, b"ad", &ct), Err(PrimitiveError::AuthTag));
    }

    #[test]
    fn hkdf_produces_requested_output_count() {
        let ck = [1u8; HASH_LEN];
        assert_eq!(hkdf(&ck, b"ikm", 1).len(), 1);
        assert_eq!(hkdf(&ck, b"ikm", 2).len(), 2);
        assert_eq!(hkdf(&ck, b"ikm", 3).len(), 3);
    }

    #[test]
    fn hkdf_is_deterministic() {
        let ck = [2u8; HASH_LEN];
        assert_eq!(hkdf(&ck, b"ikm", 2), hkdf(&ck, b"ikm", 2));
    }
}
