//! Tunnel session: ephemeral key exchange, HMAC mutual authentication, the
//! in-band CONNECT request, and AEAD-wrapped `send`/`recv`.
//!
//! A session owns exactly one `WsStream` and is never pooled or reused
//! across reconnects — a fresh pair of 32-byte "public" values is exchanged
//! per session purely to salt the KDF (see `kdf.rs`), so session keys never
//! repeat even though the long-term PSK does.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tracing::{debug, trace};

use crate::aead;
use crate::aead::KEY_LEN;
use crate::error::TunnelError;
use crate::kdf::{self, SessionKeys};
use crate::wsclient::{WsDialConfig, WsStream};

type HmacSha256 = Hmac<Sha256>;

const PUB_LEN: usize = 32;

/// Open a tunnel session to `target` (`host:port`), performing the full
/// key-exchange-and-auth handshake, with up to `retry_attempts` retries on
/// transient dial/handshake failures.
pub async fn open(
    psk: &[u8; KEY_LEN],
    ws_cfg: &WsDialConfig,
    target: &str,
    retry_attempts: u8,
) -> Result<Session, TunnelError> {
    let mut last_err = None;
    for attempt in 0..=retry_attempts {
        match open_once(psk, ws_cfg, target).await {
            Ok(session) => return Ok(session),
            Err(e) if e.is_retryable() && attempt < retry_attempts => {
                let backoff = std::time::Duration::from_millis(100 * (1 << attempt));
                debug!(attempt, ?backoff, error = %e, "tunnel open failed, retrying");
                tokio::time::sleep(backoff).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.expect("loop always returns before exhausting without an error"))
}

async fn open_once(
    psk: &[u8; KEY_LEN],
    ws_cfg: &WsDialConfig,
    target: &str,
) -> Result<Session, TunnelError> {
    let mut ws = WsStream::connect(ws_cfg).await?;

    // Step 1: send 32 random bytes as our "public" value.
    let mut client_pub = [0u8; PUB_LEN];
    rand::thread_rng().fill_bytes(&mut client_pub);
    ws.send(&client_pub).await?;

    // Step 2: receive the peer's 32-byte "public" value.
    let server_pub = ws
        .recv()
        .await?
        .ok_or(TunnelError::PeerClosed)?;
    if server_pub.len() != PUB_LEN {
        return Err(TunnelError::HandshakeFailed(format!(
            "expected {PUB_LEN}-byte server_pub, got {} bytes",
            server_pub.len()
        )));
    }

    // Step 3: derive directional keys from psk and the two "public" values.
    let mut salt = [0u8; kdf::SALT_LEN];
    salt[..PUB_LEN].copy_from_slice(&client_pub);
    salt[PUB_LEN..].copy_from_slice(&server_pub);
    let SessionKeys { send_key, recv_key } = kdf::derive_keys(psk, &salt);

    // Step 4: prove knowledge of send_key.
    let mut mac = HmacSha256::new_from_slice(&send_key).expect("HMAC accepts any key length");
    mac.update(b"auth");
    let auth_tag = mac.finalize().into_bytes();
    ws.send(&auth_tag).await?;

    // Step 5: verify the peer's proof of knowledge of recv_key, in constant time.
    let server_auth = ws.recv().await?.ok_or(TunnelError::PeerClosed)?;
    let mut expected = HmacSha256::new_from_slice(&recv_key).expect("HMAC accepts any key length");
    expected.update(b"ok");
    expected
        .verify_slice(&server_auth)
        .map_err(|_| TunnelError::AuthFailure)?;

    trace!(%target, "tunnel authenticated, sending connect");

    // Step 6: request the upstream target under AEAD.
    let connect_msg = format!("CONNECT {target}");
    let ciphertext = aead::encrypt(&send_key, connect_msg.as_bytes(), b"");
    ws.send(&ciphertext).await?;

    // Step 7: require plaintext "OK".
    let reply = ws.recv().await?.ok_or(TunnelError::PeerClosed)?;
    let plaintext = aead::decrypt(&recv_key, &reply, b"")
        .map_err(|_| TunnelError::HandshakeFailed("connect reply failed to decrypt".into()))?;
    if plaintext != b"OK" {
        return Err(TunnelError::ConnectRejected(
            String::from_utf8_lossy(&plaintext).into_owned(),
        ));
    }

    debug!(%target, "tunnel connect acknowledged");
    Ok(Session {
        ws,
        send_key,
        recv_key,
        closed: false,
        bytes_sent: 0,
        bytes_received: 0,
    })
}

/// An open, authenticated tunnel bound to exactly one local client
/// connection.
pub struct Session {
    ws: WsStream,
    send_key: [u8; KEY_LEN],
    recv_key: [u8; KEY_LEN],
    closed: bool,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl Session {
    /// Encrypt `plaintext` under `send_key` and write it as one binary
    /// WebSocket frame.
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<(), TunnelError> {
        let ciphertext = aead::encrypt(&self.send_key, plaintext, b"");
        self.ws.send(&ciphertext).await?;
        self.bytes_sent += plaintext.len() as u64;
        Ok(())
    }

    /// Read one binary WebSocket frame and AEAD-decrypt it with `recv_key`.
    /// Returns `Ok(None)` on end of stream.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, TunnelError> {
        let Some(ciphertext) = self.ws.recv().await? else {
            return Ok(None);
        };
        let plaintext = aead::decrypt(&self.recv_key, &ciphertext, b"")
            .map_err(|_| TunnelError::ProtocolError("AEAD authentication failure on recv".into()))?;
        self.bytes_received += plaintext.len() as u64;
        Ok(Some(plaintext))
    }

    /// Close the underlying WebSocket. Idempotent.
    pub async fn close(&mut self) -> Result<(), TunnelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.ws.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
