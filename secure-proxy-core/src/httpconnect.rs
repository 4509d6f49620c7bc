//! HTTP/1.1 CONNECT front-end parser.
//!
//! Unlike the SOCKS5 parser, a method mismatch or malformed header is
//! answered immediately from inside `negotiate` (405/400) because that
//! response does not depend on whether a tunnel can be opened; the 200/502
//! outcome responses remain the caller's job once it knows whether the
//! tunnel opened.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::FrontEndError;

const DEFAULT_PORT: u16 = 443;
const MAX_HEADER_BYTES: usize = 16 * 1024;

async fn read_line<S: AsyncRead + Unpin>(
    stream: &mut S,
    deadline: Duration,
) -> Result<String, FrontEndError> {
    let mut line = Vec::with_capacity(128);
    loop {
        let mut byte = [0u8; 1];
        timeout(deadline, stream.read_exact(&mut byte))
            .await
            .map_err(|_| FrontEndError::Timeout)?
            .map_err(FrontEndError::Io)?;
        if byte[0] == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_HEADER_BYTES {
            return Err(FrontEndError::MalformedHeader);
        }
    }
    String::from_utf8(line).map_err(|_| FrontEndError::MalformedRequestLine)
}

/// Parse one HTTP CONNECT request, returning the requested `host:port`.
/// Writes `405` and returns an error if the method isn't `CONNECT`; writes
/// `400` and returns an error on a malformed header line.
pub async fn negotiate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    deadline: Duration,
) -> Result<String, FrontEndError> {
    let request_line = read_line(stream, deadline).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(FrontEndError::MalformedRequestLine)?;
    let authority = parts.next().ok_or(FrontEndError::MalformedRequestLine)?;

    if !method.eq_ignore_ascii_case("CONNECT") {
        let _ = stream
            .write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n")
            .await;
        return Err(FrontEndError::NotConnect(method.to_string()));
    }

    let target = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| FrontEndError::MalformedRequestLine)?;
            format!("{host}:{port}")
        }
        None => format!("{authority}:{DEFAULT_PORT}"),
    };

    // Drain header lines until the blank line that ends the request.
    loop {
        let line = read_line(stream, deadline).await.map_err(|e| {
            // A timeout or I/O break here is reported as-is; a structurally
            // bad header line gets its own response before propagating.
            e
        })?;
        if line.is_empty() {
            break;
        }
        if !line.contains(':') {
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            return Err(FrontEndError::MalformedHeader);
        }
    }

    Ok(target)
}

/// Write the "tunnel established" response.
pub async fn write_success<S: AsyncWrite + Unpin>(stream: &mut S) -> std::io::Result<()> {
    stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await
}

/// Write the "tunnel could not be opened" response.
pub async fn write_failure<S: AsyncWrite + Unpin>(stream: &mut S) -> std::io::Result<()> {
    stream.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await
}
