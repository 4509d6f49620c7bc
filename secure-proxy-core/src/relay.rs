//! Bidirectional relay between a local TCP client and an open tunnel
//! session.
//!
//! Both directions are driven from a single task with `tokio::select!`
//! rather than two tasks each holding a handle to the other: `Session`
//! owns one `WsStream` and its `send`/`recv` both need `&mut self`, so
//! splitting it across tasks would need its own lock anyway. Selecting
//! in one loop also makes the coupled shutdown free — whichever side
//! hits EOF or an error just breaks the loop, which drops both halves
//! together instead of requiring one task to cancel the other.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::TunnelError;
use crate::session::Session;

/// Bytes moved in each direction, returned once the relay finishes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayStats {
    pub client_to_remote: u64,
    pub remote_to_client: u64,
}

/// Pump bytes between `client` and `session` until either side closes or
/// errors, then close the session and return the byte counts.
pub async fn run(client: &mut TcpStream, session: &mut Session, buffer_size: usize) -> RelayStats {
    let mut stats = RelayStats::default();
    let mut buf = vec![0u8; buffer_size];

    let result = loop {
        tokio::select! {
            biased;

            read = client.read(&mut buf) => {
                match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        if let Err(e) = session.send(&buf[..n]).await {
                            break Err(e);
                        }
                        stats.client_to_remote += n as u64;
                    }
                    Err(e) => break Err(TunnelError::Io(e)),
                }
            }

            recv = session.recv() => {
                match recv {
                    Ok(Some(payload)) => {
                        if let Err(e) = client.write_all(&payload).await {
                            break Err(TunnelError::Io(e));
                        }
                        stats.remote_to_client += payload.len() as u64;
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                }
            }
        }
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "relay terminated");
    }
    let _ = session.close().await;
    let _ = client.shutdown().await;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    // `run` needs a live `Session`, which needs a real WebSocket handshake
    // over TCP+TLS; that end-to-end path is covered in the integration
    // suite with a mock remote. Here we only check the byte-accounting
    // struct behaves as a plain value type.
    #[test]
    fn relay_stats_default_is_zeroed() {
        let stats = RelayStats::default();
        assert_eq!(stats.client_to_remote, 0);
        assert_eq!(stats.remote_to_client, 0);
    }
}
