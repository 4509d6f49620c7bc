//! Protocol implementation for a local encrypted tunneling proxy.
//!
//! Front-ends (`socks5`, `httpconnect`) accept plaintext local connections
//! and hand the requested `host:port` to `session::open`, which dials the
//! remote gateway over a hand-rolled WebSocket-over-TLS transport
//! (`wsclient`, `frame`, `tls`), authenticates with a pre-shared key
//! (`kdf`, `hmac` via `session`), and exchanges AEAD-sealed application
//! data (`aead`) once connected. `relay` couples the local TCP connection
//! and the tunnel session for the lifetime of one client request.

pub mod aead;
pub mod config;
pub mod error;
pub mod frame;
pub mod httpconnect;
pub mod kdf;
pub mod relay;
pub mod session;
pub mod socks5;
pub mod stats;
pub mod tls;
pub mod wsclient;

pub use config::Config;
pub use error::{AeadError, FrontEndError, TunnelError};
pub use session::Session;
pub use stats::Stats;
