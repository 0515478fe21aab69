//! SOCKS5 client handshake (RFC 1928), "no authentication" method only.

use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Asks the proxy on `stream` to connect to `host:port`.
///
/// On success the stream is tunneled to the target.
///
/// # Errors
///
/// Returns [`Error::Proxy`] if the proxy refuses or answers malformed data,
/// and [`Error::Transport`] on I/O failure.
pub async fn connect<S>(stream: &mut S, host: &str, port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = connect_request(host, port)?;

    stream
        .write_all(&[VERSION, 1, METHOD_NO_AUTH])
        .await
        .map_err(Error::Transport)?;
    let mut choice = [0u8; 2];
    stream
        .read_exact(&mut choice)
        .await
        .map_err(Error::Transport)?;
    if choice[0] != VERSION {
        return Err(Error::Proxy(format!(
            "unexpected protocol version {:#04x}",
            choice[0]
        )));
    }
    match choice[1] {
        METHOD_NO_AUTH => {}
        METHOD_NONE_ACCEPTABLE => {
            return Err(Error::Proxy("no acceptable authentication methods".into()));
        }
        other => {
            return Err(Error::Proxy(format!(
                "unsupported authentication method {other:#04x}"
            )));
        }
    }

    stream.write_all(&request).await.map_err(Error::Transport)?;
    stream.flush().await.map_err(Error::Transport)?;

    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(Error::Transport)?;
    if header[0] != VERSION {
        return Err(Error::Proxy(format!(
            "unexpected protocol version {:#04x}",
            header[0]
        )));
    }
    if header[1] != 0 {
        return Err(Error::Proxy(reply_reason(header[1]).into()));
    }

    // BND.ADDR and BND.PORT are not needed for CONNECT.
    let remaining = match header[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .map_err(Error::Transport)?;
            usize::from(len[0]) + 2
        }
        other => {
            return Err(Error::Proxy(format!("unknown address type {other:#04x}")));
        }
    };
    let mut bound = vec![0u8; remaining];
    stream
        .read_exact(&mut bound)
        .await
        .map_err(Error::Transport)?;

    tracing::debug!(host, port, "SOCKS5 tunnel established");
    Ok(())
}

fn connect_request(host: &str, port: u16) -> Result<Vec<u8>> {
    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    match host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let len = u8::try_from(host.len())
                .map_err(|_| Error::Proxy(format!("host name too long: {} bytes", host.len())))?;
            request.push(ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

const fn reply_reason(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown reply code",
    }
}
