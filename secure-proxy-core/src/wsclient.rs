//! Hand-rolled WebSocket client built directly on a TLS byte stream.
//!
//! No WebSocket library is used. This gives frame-level control needed to
//! evade naive proxy auto-detection and to inject identity-masking headers
//! during the HTTP Upgrade.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use rustls::pki_types::ServerName;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

use crate::error::TunnelError;
use crate::frame::{read_frame, write_frame, Frame, Opcode};
use crate::tls;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const DEFAULT_USER_AGENTS: [&str; 2] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Parameters needed to dial and upgrade a connection to the remote gateway.
#[derive(Clone)]
pub struct WsDialConfig {
    pub sni_host: String,
    pub server_port: u16,
    pub path: String,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_frame_size: usize,
}

impl Default for WsDialConfig {
    fn default() -> Self {
        WsDialConfig {
            sni_host: String::new(),
            server_port: 443,
            path: "/".to_string(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
            max_frame_size: 10 << 20,
        }
    }
}

/// A connected, upgraded WebSocket session over TLS.
pub struct WsStream {
    tls: TlsStream<TcpStream>,
    max_frame_size: usize,
    closed: bool,
}

impl WsStream {
    /// Dial `cfg.sni_host:cfg.server_port`, perform the TLS handshake and the
    /// HTTP Upgrade, and return an open WebSocket ready for `send`/`recv`.
    pub async fn connect(cfg: &WsDialConfig) -> Result<Self, TunnelError> {
        let tcp = timeout(
            cfg.connect_timeout,
            dial_tcp(&cfg.sni_host, cfg.server_port),
        )
        .await
        .map_err(|_| TunnelError::DialFailed(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "tcp connect timed out",
        )))??;

        let tls_config = Arc::new(tls::client_config());
        let connector = TlsConnector::from(tls_config);
        let server_name = ServerName::try_from(cfg.sni_host.clone())
            .map_err(|e| TunnelError::DialFailed(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let tls = timeout(cfg.handshake_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| TunnelError::HandshakeFailed("tls handshake timed out".into()))?
            .map_err(TunnelError::DialFailed)?;

        let mut stream = WsStream {
            tls,
            max_frame_size: cfg.max_frame_size,
            closed: false,
        };
        timeout(cfg.handshake_timeout, stream.upgrade(cfg))
            .await
            .map_err(|_| TunnelError::HandshakeFailed("websocket upgrade timed out".into()))??;
        Ok(stream)
    }

    async fn upgrade(&mut self, cfg: &WsDialConfig) -> Result<(), TunnelError> {
        let mut key_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        let key = BASE64.encode(key_bytes);
        let user_agent = DEFAULT_USER_AGENTS[(key_bytes[0] as usize) % DEFAULT_USER_AGENTS.len()];

        let request = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             User-Agent: {ua}\r\n\
             Accept-Language: en-US,en;q=0.9\r\n\
             \r\n",
            path = cfg.path,
            host = cfg.sni_host,
            key = key,
            ua = user_agent,
        );
        self.tls
            .write_all(request.as_bytes())
            .await
            .map_err(TunnelError::Io)?;

        let response = read_http_response(&mut self.tls).await.map_err(TunnelError::Io)?;
        trace!(response = %response, "websocket upgrade response");

        let status_line = response
            .lines()
            .next()
            .ok_or_else(|| TunnelError::HandshakeFailed("empty response".into()))?;
        if !status_line.contains("101") {
            return Err(TunnelError::HandshakeFailed(format!(
                "unexpected status line: {status_line}"
            )));
        }

        let expected_accept = compute_accept_key(&key);
        let accept_ok = response.lines().any(|line| {
            line.split_once(':')
                .map(|(name, value)| {
                    name.trim().eq_ignore_ascii_case("sec-websocket-accept")
                        && value.trim() == expected_accept
                })
                .unwrap_or(false)
        });
        if !accept_ok {
            return Err(TunnelError::HandshakeFailed(
                "Sec-WebSocket-Accept mismatch".into(),
            ));
        }
        debug!("websocket upgrade accepted");
        Ok(())
    }

    /// Write one binary client frame carrying `payload`.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TunnelError> {
        write_frame(&mut self.tls, &Frame::binary(payload.to_vec()), true)
            .await
            .map_err(TunnelError::Io)
    }

    /// Read the next application message, transparently answering pings and
    /// discarding pongs. Returns `Ok(None)` on a clean peer-initiated close.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, TunnelError> {
        if self.closed {
            return Ok(None);
        }
        loop {
            let frame = read_frame(&mut self.tls, self.max_frame_size)
                .await
                .map_err(TunnelError::Io)?;
            match frame.opcode {
                Opcode::Binary | Opcode::Text => return Ok(Some(frame.payload)),
                Opcode::Ping => {
                    write_frame(&mut self.tls, &Frame::pong(frame.payload), true)
                        .await
                        .map_err(TunnelError::Io)?;
                    continue;
                }
                Opcode::Pong => continue,
                Opcode::Close => {
                    self.closed = true;
                    return Ok(None);
                }
                Opcode::Continuation => {
                    return Err(TunnelError::ProtocolError(
                        "unexpected continuation frame".into(),
                    ))
                }
            }
        }
    }

    /// Send a close frame (idempotent) and shut down the TLS stream.
    pub async fn close(&mut self) -> Result<(), TunnelError> {
        if !self.closed {
            self.closed = true;
            let _ = write_frame(&mut self.tls, &Frame::close(Vec::new()), true).await;
        }
        let _ = self.tls.shutdown().await;
        Ok(())
    }
}

async fn dial_tcp(host: &str, port: u16) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    let sock_ref = socket2::SockRef::from(&stream);
    sock_ref.set_keepalive(true)?;
    if let Err(e) = sock_ref.set_send_buffer_size(256 * 1024) {
        warn!(error = %e, "failed to set tunnel socket send buffer size");
    }
    if let Err(e) = sock_ref.set_recv_buffer_size(128 * 1024) {
        warn!(error = %e, "failed to set tunnel socket recv buffer size");
    }
    Ok(stream)
}

fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

async fn read_http_response<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            break;
        }
        if buf.len() > 8192 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "http response header too large",
            ));
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
