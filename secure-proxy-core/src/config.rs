//! Process configuration, loaded once at startup from the
//! `SECURE_PROXY_CONFIG` environment variable (a JSON document). Config
//! file formats and multi-profile switching are out of scope; this crate
//! only needs enough structure to validate one profile's worth of settings.

use serde::Deserialize;

use crate::aead::KEY_LEN;

fn default_max_concurrent_connections() -> usize {
    768
}

fn default_buffer_size() -> usize {
    128 * 1024
}

fn default_max_frame_size() -> usize {
    10 << 20
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_handshake_timeout_ms() -> u64 {
    30_000
}

/// Per-stage deadline for the SOCKS5/HTTP CONNECT front-end parsers. Kept
/// separate from `handshake_timeout_ms`, which bounds the much longer
/// tunnel handshake and is outside the 5-10s range a local front-end
/// parser should use.
fn default_parse_timeout_ms() -> u64 {
    8_000
}

fn default_backlog() -> u32 {
    128
}

fn default_retry_attempts() -> u8 {
    3
}

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub name: String,
    pub sni_host: String,
    pub path: String,
    pub server_port: u16,
    pub socks_port: u16,
    pub http_port: u16,
    pub pre_shared_key: String,

    #[serde(default = "default_max_concurrent_connections")]
    pub max_concurrent_connections: usize,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_parse_timeout_ms")]
    pub parse_timeout_ms: u64,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u8,
}

/// Validated, ready-to-use configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub sni_host: String,
    pub path: String,
    pub server_port: u16,
    pub socks_port: u16,
    pub http_port: u16,
    pub pre_shared_key: [u8; KEY_LEN],
    pub max_concurrent_connections: usize,
    pub buffer_size: usize,
    pub max_frame_size: usize,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub parse_timeout_ms: u64,
    pub backlog: u32,
    pub retry_attempts: u8,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("SECURE_PROXY_CONFIG is not set")]
    Missing,
    #[error("SECURE_PROXY_CONFIG is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("pre_shared_key is not valid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
    #[error("pre_shared_key must decode to exactly {KEY_LEN} bytes, got {0}")]
    WrongKeyLength(usize),
    #[error("sni_host must not be empty")]
    EmptySniHost,
    #[error("path must begin with '/', got {0:?}")]
    InvalidPath(String),
}

impl Config {
    /// Load and validate configuration from `SECURE_PROXY_CONFIG`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = std::env::var("SECURE_PROXY_CONFIG").map_err(|_| ConfigError::Missing)?;
        Self::from_json(&raw)
    }

    /// Parse and validate configuration from a raw JSON string, split out
    /// from `from_env` so tests don't need process-wide env mutation.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let parsed: RawConfig = serde_json::from_str(raw)?;
        let key_bytes = hex::decode(&parsed.pre_shared_key)?;
        if key_bytes.len() != KEY_LEN {
            return Err(ConfigError::WrongKeyLength(key_bytes.len()));
        }
        let mut pre_shared_key = [0u8; KEY_LEN];
        pre_shared_key.copy_from_slice(&key_bytes);

        if parsed.sni_host.is_empty() {
            return Err(ConfigError::EmptySniHost);
        }
        if !parsed.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(parsed.path));
        }

        Ok(Config {
            name: parsed.name,
            sni_host: parsed.sni_host,
            path: parsed.path,
            server_port: parsed.server_port,
            socks_port: parsed.socks_port,
            http_port: parsed.http_port,
            pre_shared_key,
            max_concurrent_connections: parsed.max_concurrent_connections,
            buffer_size: parsed.buffer_size,
            max_frame_size: parsed.max_frame_size,
            connect_timeout_ms: parsed.connect_timeout_ms,
            handshake_timeout_ms: parsed.handshake_timeout_ms,
            parse_timeout_ms: parsed.parse_timeout_ms,
            backlog: parsed.backlog,
            retry_attempts: parsed.retry_attempts,
        })
    }
}
