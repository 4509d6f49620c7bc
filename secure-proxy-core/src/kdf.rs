//! HKDF-SHA256 key derivation.
//!
//! Derives a 64-byte expansion from the pre-shared key under a per-session
//! salt (`client_pub || server_pub`, 64 bytes total — see `session.rs`), and
//! splits it into the two directional keys. No Diffie-Hellman is computed:
//! the "public keys" are raw random 32-byte values exchanged purely to give
//! each session a fresh salt. Forward secrecy therefore rests entirely on
//! PSK secrecy plus salt freshness, not on any DH exchange.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::aead::KEY_LEN;

pub const SALT_LEN: usize = 64;
const INFO: &[u8] = b"secure-proxy-v1";

/// Derived directional keys for one tunnel session.
#[derive(Clone)]
pub struct SessionKeys {
    pub send_key: [u8; KEY_LEN],
    pub recv_key: [u8; KEY_LEN],
}

/// Derive `(send_key, recv_key)` from `psk` and a 64-byte `salt`.
///
/// The first 32 expanded bytes become `send_key`, the next 32 become
/// `recv_key`. Callers on the server side of the exchange mirror this by
/// swapping which half they call `send_key`/`recv_key`.
pub fn derive_keys(psk: &[u8], salt: &[u8; SALT_LEN]) -> SessionKeys {
    let hk = Hkdf::<Sha256>::new(Some(salt), psk);
    let mut okm = [0u8; 64];
    hk.expand(INFO, &mut okm)
        .expect("64 is a valid HKDF-SHA256 output length");
    let mut send_key = [0u8; KEY_LEN];
    let mut recv_key = [0u8; KEY_LEN];
    send_key.copy_from_slice(&okm[0..32]);
    recv_key.copy_from_slice(&okm[32..64]);
    SessionKeys { send_key, recv_key }
}
