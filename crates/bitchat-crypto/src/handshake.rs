//! Noise_XX_25519_ChaChaPoly_SHA256 handshake executor.
//!
//! This is a from-scratch implementation of the symmetric-state and
//! handshake-state machinery the Noise Protocol Framework specifies for
//! pattern XX, not a wrapper over a general-purpose Noise library: the
//! session layer above needs direct access to `ck`/`h` and to the rekey
//! trapdoor that most Noise crates don't expose.

use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::cipher_state::CipherState;
use crate::error::HandshakeError;
use crate::primitives::{self, DH_LEN, HASH_LEN, KEY_LEN};

const PROTOCOL_NAME: &[u8] = b"Noise_XX_25519_ChaChaPoly_SHA256";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

struct SymmetricState {
    ck: [u8; HASH_LEN],
    h: [u8; HASH_LEN],
    k: Option<[u8; KEY_LEN]>,
    n: u64,
}

impl SymmetricState {
    fn new() -> Self {
        let h = primitives::sha256(PROTOCOL_NAME);
        Self { ck: h, h, k: None, n: 0 }
    }

    fn mix_hash(&mut self, data: &[u8]) {
        let mut input = Vec::with_capacity(HASH_LEN + data.len());
        input.extend_from_slice(&self.h);
        input.extend_from_slice(data);
        self.h = primitives::sha256(&input);
    }

    fn mix_key(&mut self, input_key_material: &[u8]) {
        let outputs = primitives::hkdf(&self.ck, input_key_material, 2);
        self.ck = outputs[0];
        self.k = Some(outputs[1]);
        self.n = 0;
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let ciphertext = match self.k {
            Some(k) => {
                let ct = primitives::aead_encrypt(&k, self.n, &self.h, plaintext);
                self.n += 1;
                ct
            }
            None => plaintext.to_vec(),
        };
        self.mix_hash(&ciphertext);
        ciphertext
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let plaintext = match self.k {
            Some(k) => {
                let pt = primitives::aead_decrypt(&k, self.n, &self.h, ciphertext)
                    .map_err(|_| HandshakeError::AuthTag)?;
                self.n += 1;
                pt
            }
            None => ciphertext.to_vec(),
        };
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Splits the final chaining key into the two transport cipher keys.
    fn split(&self) -> ([u8; KEY_LEN], [u8; KEY_LEN]) {
        let outputs = primitives::hkdf(&self.ck, &[], 2);
        (outputs[0], outputs[1])
    }
}

impl Drop for SymmetricState {
    fn drop(&mut self) {
        self.ck.zeroize();
        if let Some(mut k) = self.k.take() {
            k.zeroize();
        }
    }
}

/// A Noise XX handshake in progress. Owns the ephemeral and (a reference to
/// the) static keypairs, and the retained handshake-message buffer if the
/// embedder opted into it.
pub struct HandshakeState {
    role: Role,
    symmetric: SymmetricState,
    local_static: StaticSecret,
    local_static_pub: PublicKey,
    local_ephemeral: Option<StaticSecret>,
    remote_static: Option<PublicKey>,
    remote_ephemeral: Option<PublicKey>,
    step: u8,
    self_dial: bool,
    retain_messages: bool,
    sent_messages: Vec<Vec<u8>>,
}

impl HandshakeState {
    pub fn new(role: Role, local_static: StaticSecret, retain_messages: bool) -> Self {
        let local_static_pub = PublicKey::from(&local_static);
        Self {
            role,
            symmetric: SymmetricState::new(),
            local_static,
            local_static_pub,
            local_ephemeral: None,
            remote_static: None,
            remote_ephemeral: None,
            step: 0,
            self_dial: false,
            retain_messages,
            sent_messages: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_complete(&self) -> bool {
        self.step == 3
    }

    /// Writes the next message this role owns. `payload` is almost always
    /// empty for the bare handshake; BitChat does not carry application data
    /// inside the handshake itself.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let msg = match (self.role, self.step) {
            (Role::Initiator, 0) => self.write_msg1(payload),
            (Role::Responder, 1) => self.write_msg2(payload),
            (Role::Initiator, 2) => self.write_msg3(payload),
            _ => return Err(HandshakeError::InvalidState),
        }?;

        if self.retain_messages {
            self.sent_messages.push(msg.clone());
        }
        self.step += 1;
        Ok(msg)
    }

    /// Reads the next message this role expects. Returns the payload carried
    /// inside it (empty, for BitChat).
    pub fn read_message(&mut self, msg: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let payload = match (self.role, self.step) {
            (Role::Responder, 0) => self.read_msg1(msg),
            (Role::Initiator, 1) => self.read_msg2(msg),
            (Role::Responder, 2) => self.read_msg3(msg),
            _ => return Err(HandshakeError::InvalidState),
        }?;
        self.step += 1;
        Ok(payload)
    }

    // -- message 1: -> e -----------------------------------------------

    fn write_msg1(&mut self, payload: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let (e, e_pub) = primitives::generate_keypair();
        self.symmetric.mix_hash(e_pub.as_bytes());
        self.local_ephemeral = Some(e);

        let mut out = e_pub.as_bytes().to_vec();
        out.extend(self.symmetric.encrypt_and_hash(payload));
        Ok(out)
    }

    fn read_msg1(&mut self, msg: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        if msg.len() != DH_LEN {
            return Err(HandshakeError::Malformed("message 1 must be exactly one DH key"));
        }
        let (e_bytes, rest) = msg.split_at(DH_LEN);
        let re: [u8; DH_LEN] = e_bytes.try_into().expect("split_at(DH_LEN) guarantees length");
        let re = PublicKey::from(re);
        self.symmetric.mix_hash(re.as_bytes());
        self.remote_ephemeral = Some(re);

        self.symmetric.decrypt_and_hash(rest)
    }

    // -- message 2: <- e, ee, s, es --------------------------------------

    fn write_msg2(&mut self, payload: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let (e, e_pub) = primitives::generate_keypair();
        self.symmetric.mix_hash(e_pub.as_bytes());

        let re = self.remote_ephemeral.expect("message 1 sets remote ephemeral");
        let ee = primitives::dh(&e, &re)?;
        self.symmetric.mix_key(&ee);
        self.local_ephemeral = Some(e);

        let enc_static = self.symmetric.encrypt_and_hash(self.local_static_pub.as_bytes());

        let es = primitives::dh(&self.local_static, &re)?;
        self.symmetric.mix_key(&es);

        let enc_payload = self.symmetric.encrypt_and_hash(payload);

        let mut out = e_pub.as_bytes().to_vec();
        out.extend(enc_static);
        out.extend(enc_payload);
        Ok(out)
    }

    fn read_msg2(&mut self, msg: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        if msg.len() < DH_LEN {
            return Err(HandshakeError::Malformed("message 2 shorter than one DH key"));
        }
        let (e_bytes, rest) = msg.split_at(DH_LEN);
        let re: [u8; DH_LEN] = e_bytes.try_into().expect("split_at(DH_LEN) guarantees length");
        let re = PublicKey::from(re);
        self.symmetric.mix_hash(re.as_bytes());
        self.remote_ephemeral = Some(re);

        let le = self.local_ephemeral.as_ref().expect("message 1 sets local ephemeral");
        let ee = primitives::dh(le, &re)?;
        self.symmetric.mix_key(&ee);

        if rest.len() < DH_LEN + 16 {
            return Err(HandshakeError::Malformed("message 2 missing encrypted static key"));
        }
        let (enc_static, rest) = rest.split_at(DH_LEN + 16);
        let rs_bytes = self.symmetric.decrypt_and_hash(enc_static)?;
        let rs: [u8; DH_LEN] = rs_bytes
            .as_slice()
            .try_into()
            .map_err(|_| HandshakeError::Malformed("decrypted static key has wrong length"))?;
        let rs = PublicKey::from(rs);
        self.check_self_dial(&rs);
        self.remote_static = Some(rs);

        let es = primitives::dh(le, &rs)?;
        self.symmetric.mix_key(&es);

        self.symmetric.decrypt_and_hash(rest)
    }

    // -- message 3: -> s, se ---------------------------------------------

    fn write_msg3(&mut self, payload: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let enc_static = self.symmetric.encrypt_and_hash(self.local_static_pub.as_bytes());

        let re = self.remote_ephemeral.expect("message 2 sets remote ephemeral");
        let se = primitives::dh(&self.local_static, &re)?;
        self.symmetric.mix_key(&se);

        let enc_payload = self.symmetric.encrypt_and_hash(payload);

        let mut out = enc_static;
        out.extend(enc_payload);
        Ok(out)
    }

    fn read_msg3(&mut self, msg: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        if msg.len() < DH_LEN + 16 {
            return Err(HandshakeError::Malformed("message 3 missing encrypted static key"));
        }
        let (enc_static, rest) = msg.split_at(DH_LEN + 16);
        let rs_bytes = self.symmetric.decrypt_and_hash(enc_static)?;
        let rs: [u8; DH_LEN] = rs_bytes
            .as_slice()
            .try_into()
            .map_err(|_| HandshakeError::Malformed("decrypted static key has wrong length"))?;
        let rs = PublicKey::from(rs);
        self.check_self_dial(&rs);
        self.remote_static = Some(rs);

        let le = self.local_ephemeral.as_ref().expect("message 2 sets local ephemeral");
        let se = primitives::dh(le, &rs)?;
        self.symmetric.mix_key(&se);

        self.symmetric.decrypt_and_hash(rest)
    }

    fn check_self_dial(&mut self, remote_static: &PublicKey) {
        if remote_static.as_bytes() == self.local_static_pub.as_bytes() {
            self.self_dial = true;
        }
    }

    /// True if the peer's static key turned out to equal our own. Accepted
    /// cryptographically; the caller decides what, if anything, to do.
    pub fn self_dial(&self) -> bool {
        self.self_dial
    }

    pub fn remote_static(&self) -> Option<PublicKey> {
        self.remote_static
    }

    pub fn handshake_hash(&self) -> [u8; HASH_LEN] {
        self.symmetric.h
    }

    /// Retained handshake messages sent so far, if retention was enabled.
    pub fn sent_messages(&self) -> &[Vec<u8>] {
        &self.sent_messages
    }

    /// Splits into `(send, recv)` cipher states. Consumes `self` — a split
    /// handshake cannot be reused.
    pub fn split(self) -> Result<(CipherState, CipherState), HandshakeError> {
        if !self.is_complete() {
            return Err(HandshakeError::InvalidState);
        }
        let (k1, k2) = self.symmetric.split();
        Ok(match self.role {
            Role::Initiator => (CipherState::new(k1), CipherState::new(k2)),
            Role::Responder => (CipherState::new(k2), CipherState::new(k1)),
        })
    }
}

impl Drop for HandshakeState {
    fn drop(&mut self) {
        // local_static/local_ephemeral zeroize themselves (x25519-dalek's
        // StaticSecret is ZeroizeOnDrop); the retained message buffer isn't
        // covered by that and holds the same key material in encoded form.
        for msg in &mut self.sent_messages {
            msg.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> StaticSecret {
        primitives::generate_keypair().0
    }

    fn run_handshake() -> (HandshakeState, HandshakeState) {
        let mut init = HandshakeState::new(Role::Initiator, keypair(), false);
        let mut resp = HandshakeState::new(Role::Responder, keypair(), false);

        let msg1 = init.write_message(&[]).unwrap();
        assert_eq!(msg1.len(), 32);
        resp.read_message(&msg1).unwrap();

        let msg2 = resp.write_message(&[]).unwrap();
        assert_eq!(msg2.len(), 96);
        init.read_message(&msg2).unwrap();

        let msg3 = init.write_message(&[]).unwrap();
        assert_eq!(msg3.len(), 64);
        resp.read_message(&msg3).unwrap();

        assert!(init.is_complete());
        assert!(resp.is_complete());
        (init, resp)
    }

    #[test]
    fn full_handshake_agrees_on_hash_and_statics() {
        let (init, resp) = run_handshake();
        assert_eq!(init.handshake_hash(), resp.handshake_hash());
        assert_eq!(init.remote_static().unwrap().as_bytes(), resp.local_static_pub.as_bytes());
        assert_eq!(resp.remote_static().unwrap().as_bytes(), init.local_static_pub.as_bytes());
        assert!(!init.self_dial());
        assert!(!resp.self_dial());
    }

    #[test]
    fn split_produces_crossed_cipher_states() {
        let (init, resp) = run_handshake();
        let (mut init_send, mut init_recv) = init.split().unwrap();
        let (mut resp_send, mut resp_recv) = resp.split().unwrap();

        let ct = init_send.encrypt_with_ad(&[], b"ping").unwrap();
        assert_eq!(resp_recv.decrypt_with_ad(&[], &ct).unwrap(), b"ping");

        let ct = resp_send.encrypt_with_ad(&[], b"pong").unwrap();
        assert_eq!(init_recv.decrypt_with_ad(&[], &ct).unwrap(), b"pong");
    }

    #[test]
    fn self_dial_is_flagged_not_rejected() {
        let shared = keypair();
        let shared_bytes = shared.to_bytes();
        let mut init = HandshakeState::new(Role::Initiator, StaticSecret::from(shared_bytes), false);
        let mut resp = HandshakeState::new(Role::Responder, StaticSecret::from(shared_bytes), false);

        let msg1 = init.write_message(&[]).unwrap();
        resp.read_message(&msg1).unwrap();
        let msg2 = resp.write_message(&[]).unwrap();
        init.read_message(&msg2).unwrap();
        let msg3 = init.write_message(&[]).unwrap();
        resp.read_message(&msg3).unwrap();

        assert!(init.self_dial());
        assert!(resp.self_dial());
    }

    #[test]
    fn out_of_turn_write_is_invalid_state() {
        let mut init = HandshakeState::new(Role::Initiator, keypair(), false);
        init.write_message(&[]).unwrap();
        assert!(matches!(init.write_message(&[]), Err(HandshakeError::InvalidState)));
    }

    #[test]
    fn truncated_message_is_malformed() {
        let mut resp = HandshakeState::new(Role::Responder, keypair(), false);
        assert!(matches!(resp.read_message(&[0u8; 4]), Err(HandshakeError::Malformed(_))));
    }

    #[test]
    fn overlong_message_1_is_rejected() {
        let mut init = HandshakeState::new(Role::Initiator, keypair(), false);
        let mut resp = HandshakeState::new(Role::Responder, keypair(), false);
        let mut msg1 = init.write_message(&[]).unwrap();
        msg1.extend_from_slice(b"trailing junk");
        assert!(matches!(resp.read_message(&msg1), Err(HandshakeError::Malformed(_))));
    }

    #[test]
    fn retained_messages_capture_exactly_what_was_sent() {
        let mut init = HandshakeState::new(Role::Initiator, keypair(), true);
        let mut resp = HandshakeState::new(Role::Responder, keypair(), true);

        let msg1 = init.write_message(&[]).unwrap();
        resp.read_message(&msg1).unwrap();
        let msg2 = resp.write_message(&[]).unwrap();
        init.read_message(&msg2).unwrap();
        let msg3 = init.write_message(&[]).unwrap();
        resp.read_message(&msg3).unwrap();

        assert_eq!(init.sent_messages(), &[msg1, msg3]);
        assert_eq!(resp.sent_messages(), &[msg2]);
    }
}
