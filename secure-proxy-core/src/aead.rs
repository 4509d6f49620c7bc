//! AES-256-GCM message codec.
//!
//! Wire form is `nonce(12) || ciphertext || tag(16)`; the tag is whatever
//! `aes_gcm` appends to the ciphertext, not handled separately. Nonces are
//! drawn fresh from the OS RNG per message rather than a counter: uniqueness
//! relies on the birthday bound of a 96-bit random value, which is fine well
//! short of 2^32 messages per key but is not enforced here — a tunnel that
//! outlives that many messages on one key pair is outside this design.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::AeadError;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// Encrypt `plaintext` under `key` with a fresh random nonce, returning
/// `nonce || ciphertext_with_tag`.
pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    // Construction errors here would mean a logic bug (bad key length or
    // RNG failure), not a runtime condition callers can react to.
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .expect("AES-256-GCM encryption with a valid 32-byte key cannot fail");
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    out
}

/// Split `input` into `nonce || ciphertext`, decrypt, and return the
/// plaintext. Fails with `AeadError::AuthFailure` on tag mismatch.
pub fn decrypt(key: &[u8; KEY_LEN], input: &[u8], aad: &[u8]) -> Result<Vec<u8>, AeadError> {
    if input.len() < NONCE_LEN + TAG_LEN {
        return Err(AeadError::Truncated);
    }
    let (nonce_bytes, ciphertext) = input.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| AeadError::AuthFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> [u8; KEY_LEN] {
        [byte; KEY_LEN]
    }

    #[test]
    fn round_trip_empty_aad() {
        let k = key(7);
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let wire = encrypt(&k, plaintext, b"");
        let back = decrypt(&k, &wire, b"").expect("decrypt should succeed");
        assert_eq!(back, plaintext);
    }

    #[test]
    fn round_trip_empty_plaintext() {
        let k = key(1);
        let wire = encrypt(&k, b"", b"");
        let back = decrypt(&k, &wire, b"").expect("decrypt should succeed");
        assert!(back.is_empty());
    }

    #[test]
    fn nonces_are_fresh_each_call() {
        let k = key(9);
        let a = encrypt(&k, b"same message", b"");
        let b = encrypt(&k, b"same message", b"");
        assert_ne!(&a[..NONCE_LEN], &b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn flipping_ciphertext_byte_fails_auth() {
        let k = key(3);
        let mut wire = encrypt(&k, b"payload", b"");
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        assert!(matches!(decrypt(&k, &wire, b""), Err(AeadError::AuthFailure)));
    }

    #[test]
    fn flipping_nonce_byte_fails_auth() {
        let k = key(5);
        let mut wire = encrypt(&k, b"payload", b"");
        wire[0] ^= 0x01;
        assert!(matches!(decrypt(&k, &wire, b""), Err(AeadError::AuthFailure)));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let k = key(2);
        assert!(matches!(decrypt(&k, &[0u8; 4], b""), Err(AeadError::Truncated)));
    }

    #[test]
    fn wrong_key_fails_auth() {
        let a = key(1);
        let b = key(2);
        let wire = encrypt(&a, b"hello", b"");
        assert!(matches!(decrypt(&b, &wire, b""), Err(AeadError::AuthFailure)));
    }
}
