//! RFC 6455 WebSocket frame wire format: building and parsing only.
//!
//! This module knows nothing about handshakes, ping/pong semantics, or
//! fragmentation reassembly — see `wsclient.rs` for the I/O loop that drives
//! it. Frames sent by a client MUST be masked; frames accepted from a server
//! SHOULD NOT be masked but the parser tolerates a masked inbound frame
//! (some misbehaving peers mask anyway) as permitted by spec.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use std::io;

pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn to_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    fn from_u8(v: u8) -> io::Result<Self> {
        Ok(match v & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported websocket opcode {other:#x}"),
                ))
            }
        })
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn binary(payload: Vec<u8>) -> Self {
        Frame {
            fin: true,
            opcode: Opcode::Binary,
            payload,
        }
    }

    pub fn close(payload: Vec<u8>) -> Self {
        Frame {
            fin: true,
            opcode: Opcode::Close,
            payload,
        }
    }

    pub fn ping(payload: Vec<u8>) -> Self {
        Frame {
            fin: true,
            opcode: Opcode::Ping,
            payload,
        }
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Frame {
            fin: true,
            opcode: Opcode::Pong,
            payload,
        }
    }
}

fn build_header(fin: bool, opcode: Opcode, masked: bool, len: usize) -> Vec<u8> {
    let mut header = Vec::with_capacity(14);
    let first = (if fin { 0x80 } else { 0x00 }) | opcode.to_u8();
    header.push(first);

    let mask_bit = if masked { 0x80 } else { 0x00 };
    if len < 126 {
        header.push(mask_bit | len as u8);
    } else if len < 65536 {
        header.push(mask_bit | 126);
        header.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        header.push(mask_bit | 127);
        header.extend_from_slice(&(len as u64).to_be_bytes());
    }
    header
}

/// Encode `frame` as a client frame: MASK bit set, payload XORed with a
/// fresh random 4-byte key that is prepended after the length field.
pub fn encode_masked(frame: &Frame) -> Vec<u8> {
    use rand::RngCore;

    let mut mask = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask);

    let mut out = build_header(frame.fin, frame.opcode, true, frame.payload.len());
    out.extend_from_slice(&mask);
    out.reserve(frame.payload.len());
    out.extend(
        frame
            .payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4]),
    );
    out
}

/// Encode `frame` as a server frame: MASK bit clear, payload sent as-is.
/// Used by tests standing in for the remote gateway.
pub fn encode_unmasked(frame: &Frame) -> Vec<u8> {
    let mut out = build_header(frame.fin, frame.opcode, false, frame.payload.len());
    out.extend_from_slice(&frame.payload);
    out
}

/// Encode a frame honoring the RFC 6455 rule that clients mask and servers
/// don't.
pub fn encode(frame: &Frame, is_client: bool) -> Vec<u8> {
    if is_client {
        encode_masked(frame)
    } else {
        encode_unmasked(frame)
    }
}

/// Write `frame` to `writer`, masked iff `is_client`.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
    is_client: bool,
) -> io::Result<()> {
    let bytes = encode(frame, is_client);
    writer.write_all(&bytes).await
}

/// Read and decode a single frame from `reader`.
///
/// Enforces: control-frame payloads `<= 125` bytes, data payloads
/// `<= max_frame_size`, and rejects fragmentation (`FIN == 0`) as a
/// `ProtocolError`-equivalent `io::Error` — this system never sends
/// fragmented application messages and does not attempt reassembly.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: usize,
) -> io::Result<Frame> {
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    let fin = header[0] & 0x80 != 0;
    let opcode = Opcode::from_u8(header[0])?;
    let masked = header[1] & 0x80 != 0;
    let len7 = header[1] & 0x7F;

    let len: u64 = if len7 == 126 {
        let mut ext = [0u8; 2];
        reader.read_exact(&mut ext).await?;
        u16::from_be_bytes(ext) as u64
    } else if len7 == 127 {
        let mut ext = [0u8; 8];
        reader.read_exact(&mut ext).await?;
        u64::from_be_bytes(ext)
    } else {
        len7 as u64
    };

    if opcode.is_control() && len as usize > MAX_CONTROL_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "control frame payload exceeds 125 bytes",
        ));
    }
    if !opcode.is_control() && len as usize > max_frame_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "data frame payload exceeds configured maximum",
        ));
    }
    if !fin {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "fragmented websocket frames are not supported",
        ));
    }

    let mask = if masked {
        let mut m = [0u8; 4];
        reader.read_exact(&mut m).await?;
        Some(m)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(mask) = mask {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= mask[i % 4];
        }
    }

    Ok(Frame { fin, opcode, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_small_client_frame() {
        let frame = Frame::binary(b"hello".to_vec());
        let bytes = encode_masked(&frame);
        assert_eq!(bytes[1] & 0x80, 0x80, "client frames must set MASK");
        let mut cursor = std::io::Cursor::new(bytes);
        let parsed = read_frame(&mut cursor, 1 << 20).await.unwrap();
        assert_eq!(parsed.payload, b"hello");
        assert_eq!(parsed.opcode, Opcode::Binary);
    }

    #[tokio::test]
    async fn round_trip_server_frame_has_no_mask_bit() {
        let frame = Frame::binary(b"world".to_vec());
        let bytes = encode_unmasked(&frame);
        assert_eq!(bytes[1] & 0x80, 0, "server frames must not set MASK");
        let mut cursor = std::io::Cursor::new(bytes);
        let parsed = read_frame(&mut cursor, 1 << 20).await.unwrap();
        assert_eq!(parsed.payload, b"world");
    }

    #[tokio::test]
    async fn round_trip_extended_16_bit_length() {
        let payload = vec![0xAB; 5000];
        let frame = Frame::binary(payload.clone());
        let bytes = encode_masked(&frame);
        assert_eq!(bytes[1] & 0x7F, 126);
        let mut cursor = std::io::Cursor::new(bytes);
        let parsed = read_frame(&mut cursor, 1 << 20).await.unwrap();
        assert_eq!(parsed.payload, payload);
    }

    #[tokio::test]
    async fn round_trip_extended_64_bit_length() {
        let payload = vec![0x5A; 70_000];
        let frame = Frame::binary(payload.clone());
        let bytes = encode_masked(&frame);
        assert_eq!(bytes[1] & 0x7F, 127);
        let mut cursor = std::io::Cursor::new(bytes);
        let parsed = read_frame(&mut cursor, 1 << 20).await.unwrap();
        assert_eq!(parsed.payload, payload);
    }

    #[tokio::test]
    async fn oversized_control_frame_is_rejected() {
        let bytes = build_header(true, Opcode::Ping, false, 126);
        let mut cursor = std::io::Cursor::new(bytes);
        let err = read_frame(&mut cursor, 1 << 20).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn fragmented_frame_is_rejected() {
        let mut bytes = build_header(false, Opcode::Binary, false, 3);
        bytes.extend_from_slice(b"abc");
        let mut cursor = std::io::Cursor::new(bytes);
        let err = read_frame(&mut cursor, 1 << 20).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
