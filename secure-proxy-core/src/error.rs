//! Error kinds for the tunnel subsystem.
//!
//! Mirrors the shape of a hand-rolled accept-error enum: one variant per
//! semantically distinct failure, each carrying just enough context to log
//! or answer a front-end request. See `ProxyError` in the `secure-proxy`
//! binary crate for the front-end-facing wrapper.

use std::io;

/// Errors raised while establishing or operating a tunnel session.
#[derive(thiserror::Error, Debug)]
pub enum TunnelError {
    #[error("tls dial failed: {0}")]
    DialFailed(#[source] io::Error),

    #[error("websocket handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("peer authentication failed")]
    AuthFailure,

    #[error("remote rejected connect: {0}")]
    ConnectRejected(String),

    #[error("peer closed the tunnel")]
    PeerClosed,

    #[error("malformed protocol input: {0}")]
    ProtocolError(String),

    #[error("target resolves to this proxy's own listener")]
    LoopRejected,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TunnelError {
    /// Whether the front-end may retry `Tunnel::open` after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TunnelError::DialFailed(_) | TunnelError::HandshakeFailed(_) | TunnelError::Io(_)
        )
    }
}

/// Errors raised by the AEAD codec.
#[derive(thiserror::Error, Debug)]
pub enum AeadError {
    #[error("ciphertext shorter than nonce")]
    Truncated,
    #[error("authentication tag mismatch")]
    AuthFailure,
}

/// Errors raised while parsing a front-end request (SOCKS5 or HTTP CONNECT).
#[derive(thiserror::Error, Debug)]
pub enum FrontEndError {
    #[error("unsupported SOCKS version byte {0:#04x}")]
    BadSocksVersion(u8),
    #[error("unsupported SOCKS command {0:#04x}")]
    UnsupportedCommand(u8),
    #[error("unsupported SOCKS address type {0:#04x}")]
    UnsupportedAddressType(u8),
    #[error("malformed HTTP CONNECT request line")]
    MalformedRequestLine,
    #[error("HTTP method {0} is not CONNECT")]
    NotConnect(String),
    #[error("malformed HTTP header line")]
    MalformedHeader,
    #[error("request exceeded its deadline")]
    Timeout,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
