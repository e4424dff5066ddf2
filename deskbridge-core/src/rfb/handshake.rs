//! Connection setup: version exchange, security, client/server init.
//!
//! ```text
//! server ── "RFB 003.008\n" ──────────────► client
//! client ── "RFB 003.008\n" ──────────────► server
//! 3.7+:   server ── u8 n, u8 × n types ──► client ── u8 type ──► server
//! 3.3:    server ── u32 type ────────────► client
//! 3.8:    server ── u32 SecurityResult ──► client
//! client ── ClientInit(u8 shared) ────────► server
//! server ── ServerInit ───────────────────► client
//! ```

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::BridgeError;
use crate::rfb::wire::{
    ProtocolVersion, SECURITY_INVALID, SECURITY_NONE, SECURITY_VNC_AUTH, ServerInit, VERSION_LEN,
};

/// Upper bound on server-supplied strings (reasons, desktop name).
const MAX_STRING_LEN: usize = 64 * 1024;

/// Read the server version line and answer with ours.
pub async fn exchange_version<S>(stream: &mut S) -> Result<ProtocolVersion, BridgeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = [0u8; VERSION_LEN];
    stream.read_exact(&mut line).await?;
    let version = ProtocolVersion::negotiate(&line)?;
    debug!(
        server = %String::from_utf8_lossy(&line).trim_end(),
        client = %version,
        "RFB version negotiated"
    );
    stream.write_all(version.as_bytes()).await?;
    stream.flush().await?;
    Ok(version)
}

/// Negotiate security type None. VNC authentication is refused.
pub async fn negotiate_security<S>(
    stream: &mut S,
    version: ProtocolVersion,
) -> Result<(), BridgeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if version == ProtocolVersion::V3_3 {
        return match stream.read_u32().await? {
            t if t == u32::from(SECURITY_NONE) => Ok(()),
            t if t == u32::from(SECURITY_INVALID) => Err(read_failure(stream).await),
            t if t == u32::from(SECURITY_VNC_AUTH) => Err(BridgeError::Protocol(
                "server requires VNC authentication, which is not supported".into(),
            )),
            t => Err(BridgeError::Protocol(format!("unknown security type {t}"))),
        };
    }

    let count = stream.read_u8().await?;
    if count == 0 {
        return Err(read_failure(stream).await);
    }
    let mut types = vec![0u8; usize::from(count)];
    stream.read_exact(&mut types).await?;
    debug!(?types, "security types offered");

    if !types.contains(&SECURITY_NONE) {
        return Err(BridgeError::Protocol(format!(
            "no supported security type offered (got {types:?})"
        )));
    }
    stream.write_u8(SECURITY_NONE).await?;
    stream.flush().await?;

    // 3.7 skips SecurityResult for type None.
    if version == ProtocolVersion::V3_8 {
        match stream.read_u32().await? {
            0 => {}
            _ => return Err(read_failure(stream).await),
        }
    }
    Ok(())
}

/// Send ClientInit and read ServerInit.
pub async fn initialise<S>(stream: &mut S, shared: bool) -> Result<ServerInit, BridgeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_u8(shared as u8).await?;
    stream.flush().await?;

    let mut header = [0u8; ServerInit::HEADER_SIZE];
    stream.read_exact(&mut header).await?;
    let (mut init, name_len) = ServerInit::decode_header(&header)?;
    init.name = read_string(stream, name_len).await?;
    debug!(
        width = init.width,
        height = init.height,
        name = %init.name,
        "ServerInit"
    );
    Ok(init)
}

/// Read a `u32 len, len × u8` failure reason and wrap it.
async fn read_failure<S>(stream: &mut S) -> BridgeError
where
    S: AsyncRead + Unpin,
{
    let reason = match stream.read_u32().await {
        Ok(len) => read_string(stream, len as usize)
            .await
            .unwrap_or_else(|e| e.to_string()),
        Err(e) => e.to_string(),
    };
    BridgeError::Protocol(format!("server refused connection: {reason}"))
}

async fn read_string<S>(stream: &mut S, len: usize) -> Result<String, BridgeError>
where
    S: AsyncRead + Unpin,
{
    if len > MAX_STRING_LEN {
        return Err(BridgeError::Protocol(format!("string too long: {len}")));
    }
    let mut buf = BytesMut::zeroed(len);
    stream.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(buf.chunk()).into_owned())
}
