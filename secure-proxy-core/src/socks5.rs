//! SOCKS5 front-end parser (RFC 1928 subset): CONNECT only, no
//! authentication, IPv4 and domain address types. IPv6 is out of scope.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::FrontEndError;

const SOCKS_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

async fn read_exact_deadline<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut [u8],
    deadline: Duration,
) -> Result<(), FrontEndError> {
    timeout(deadline, stream.read_exact(buf))
        .await
        .map_err(|_| FrontEndError::Timeout)?
        .map_err(FrontEndError::Io)?;
    Ok(())
}

/// Run the SOCKS5 negotiation up through the CONNECT request, returning the
/// requested `host:port`. The caller is responsible for writing the final
/// reply (`write_success`/`write_failure`) once it knows whether the tunnel
/// opened.
pub async fn negotiate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    deadline: Duration,
) -> Result<String, FrontEndError> {
    // S0: version + method count.
    let mut greeting = [0u8; 2];
    read_exact_deadline(stream, &mut greeting, deadline).await?;
    if greeting[0] != SOCKS_VERSION {
        return Err(FrontEndError::BadSocksVersion(greeting[0]));
    }

    // S1: drain offered methods, always reply "no auth".
    let n_methods = greeting[1] as usize;
    let mut methods = vec![0u8; n_methods];
    read_exact_deadline(stream, &mut methods, deadline).await?;
    timeout(deadline, stream.write_all(&[SOCKS_VERSION, 0x00]))
        .await
        .map_err(|_| FrontEndError::Timeout)?
        .map_err(FrontEndError::Io)?;

    // S2: version + command + reserved + address type.
    let mut head = [0u8; 4];
    read_exact_deadline(stream, &mut head, deadline).await?;
    if head[0] != SOCKS_VERSION {
        return Err(FrontEndError::BadSocksVersion(head[0]));
    }
    if head[1] != CMD_CONNECT {
        return Err(FrontEndError::UnsupportedCommand(head[1]));
    }
    let atyp = head[3];

    // S3: address, by type.
    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            read_exact_deadline(stream, &mut octets, deadline).await?;
            format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
        }
        ATYP_DOMAIN => {
            let mut len_byte = [0u8; 1];
            read_exact_deadline(stream, &mut len_byte, deadline).await?;
            let mut domain = vec![0u8; len_byte[0] as usize];
            read_exact_deadline(stream, &mut domain, deadline).await?;
            String::from_utf8(domain).map_err(|_| FrontEndError::UnsupportedAddressType(atyp))?
        }
        ATYP_IPV6 => return Err(FrontEndError::UnsupportedAddressType(ATYP_IPV6)),
        other => return Err(FrontEndError::UnsupportedAddressType(other)),
    };

    let mut port_bytes = [0u8; 2];
    read_exact_deadline(stream, &mut port_bytes, deadline).await?;
    let port = u16::from_be_bytes(port_bytes);

    Ok(format!("{host}:{port}"))
}

/// Write the "succeeded" SOCKS5 reply with a dummy bound address.
pub async fn write_success<S: AsyncWrite + Unpin>(stream: &mut S) -> std::io::Result<()> {
    stream
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
}

/// Write a "general SOCKS server failure" reply with a dummy bound address.
pub async fn write_failure<S: AsyncWrite + Unpin>(stream: &mut S) -> std::io::Result<()> {
    stream
        .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
}
