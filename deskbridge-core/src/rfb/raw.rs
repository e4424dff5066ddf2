//! Fallback RFB client over a bare TCP stream.
//!
//! Only the version exchange is performed; input events are then
//! written straight to the socket. There is no framebuffer, so
//! [`RawRfbClient::screenshot`] always fails and the caller serves a
//! placeholder instead.

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::registry::Endpoint;
use crate::rfb::handshake;
use crate::rfb::input::{self, InputTiming, Step};
use crate::rfb::screenshot::Screenshot;
use crate::rfb::wire::ProtocolVersion;
use crate::rfb::{ClientOptions, ClientVariant, ProtocolClient};

/// State of one open raw connection.
pub struct WireConnection {
    pub version: ProtocolVersion,
    stream: TcpStream,
    /// Encoded events not yet written.
    buffered: BytesMut,
    pointer: (u16, u16),
}

impl WireConnection {
    /// Write all buffered events.
    async fn flush(&mut self) -> Result<(), BridgeError> {
        if !self.buffered.is_empty() {
            self.stream.write_all(&self.buffered).await?;
            self.buffered.clear();
        }
        self.stream.flush().await?;
        Ok(())
    }
}

/// Open a TCP connection within `timeout`.
pub(crate) async fn dial(
    endpoint: &Endpoint,
    timeout: std::time::Duration,
) -> Result<TcpStream, BridgeError> {
    let stream = tokio::time::timeout(
        timeout,
        TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
    )
    .await
    .map_err(|_| BridgeError::Timeout(timeout))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

pub struct RawRfbClient {
    endpoint: Endpoint,
    options: ClientOptions,
    conn: Option<WireConnection>,
}

impl RawRfbClient {
    pub fn new(endpoint: Endpoint, options: ClientOptions) -> Self {
        Self {
            endpoint,
            options,
            conn: None,
        }
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.conn.as_ref().map(|c| c.version)
    }

    fn conn(&mut self) -> Result<&mut WireConnection, BridgeError> {
        self.conn.as_mut().ok_or(BridgeError::NotConnected)
    }
}

#[async_trait]
impl ProtocolClient for RawRfbClient {
    fn variant(&self) -> ClientVariant {
        ClientVariant::Raw
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn pointer(&self) -> (u16, u16) {
        self.conn.as_ref().map_or((0, 0), |c| c.pointer)
    }

    fn timing(&self) -> &InputTiming {
        &self.options.timing
    }

    async fn connect(&mut self) -> Result<(), BridgeError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let timeout = self.options.connect_timeout;
        let mut stream = dial(&self.endpoint, timeout).await?;
        let version = tokio::time::timeout(timeout, handshake::exchange_version(&mut stream))
            .await
            .map_err(|_| BridgeError::Timeout(timeout))??;

        info!(endpoint = %self.endpoint, %version, "raw RFB connection established");
        self.conn = Some(WireConnection {
            version,
            stream,
            buffered: BytesMut::with_capacity(64),
            pointer: (0, 0),
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BridgeError> {
        if let Some(mut conn) = self.conn.take() {
            debug!(endpoint = %self.endpoint, "closing raw RFB connection");
            let _ = conn.stream.shutdown().await;
        }
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Screenshot, BridgeError> {
        self.conn()?;
        Err(BridgeError::CaptureUnavailable(
            "the raw RFB client keeps no framebuffer".into(),
        ))
    }

    async fn send_input(&mut self, steps: Vec<Step>) -> Result<(), BridgeError> {
        let conn = self.conn()?;
        if let Some(p) = input::final_pointer(&steps) {
            conn.pointer = p;
        }
        for step in steps {
            match step {
                Step::Send(msg) => msg.encode(&mut conn.buffered),
                Step::Pause(d) => {
                    conn.flush().await?;
                    tokio::time::sleep(d).await;
                }
            }
        }
        conn.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::MouseButton;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn options() -> ClientOptions {
        ClientOptions {
            variant: ClientVariant::Raw,
            connect_timeout: std::time::Duration::from_secs(2),
            timing: InputTiming::immediate(),
            ..ClientOptions::default()
        }
    }

    #[tokio::test]
    async fn not_connected_before_connect() {
        let mut client = RawRfbClient::new(Endpoint::new("127.0.0.1", 1), options());
        assert!(matches!(
            client.click(1, 1, MouseButton::Left).await,
            Err(BridgeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn malformed_version_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"SSH-2.0-xyz\n").await.unwrap();
            let mut sink = Vec::new();
            let _ = sock.read_to_end(&mut sink).await;
        });

        let mut client = RawRfbClient::new(Endpoint::new("127.0.0.1", port), options());
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn screenshot_is_unsupported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"RFB 003.008\n").await.unwrap();
            let mut sink = Vec::new();
            let _ = sock.read_to_end(&mut sink).await;
        });

        let mut client = RawRfbClient::new(Endpoint::new("127.0.0.1", port), options());
        client.connect().await.unwrap();
        assert_eq!(client.version(), Some(ProtocolVersion::V3_8));
        assert!(matches!(
            client.screenshot().await,
            Err(BridgeError::CaptureUnavailable(_))
        ));
        client.disconnect().await.unwrap();
    }
}
