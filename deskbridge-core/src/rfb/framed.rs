//! Full RFB session on a `Framed<TcpStream, RfbCodec>`.
//!
//! After the handshake the client asks for 32bpp true colour with Raw
//! and DesktopSize encodings, keeps a local [`Framebuffer`] up to date
//! from the updates it receives, and renders it to PNG on demand.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::registry::Endpoint;
use crate::rfb::codec::{RectBody, RfbCodec, ServerMessage};
use crate::rfb::handshake;
use crate::rfb::input::{self, InputTiming, Step};
use crate::rfb::raw::dial;
use crate::rfb::screenshot::{Framebuffer, Screenshot};
use crate::rfb::wire::{
    ClientMessage, ENCODING_DESKTOP_SIZE, ENCODING_RAW, PixelFormat, ProtocolVersion, ServerInit,
};
use crate::rfb::{ClientOptions, ClientVariant, ProtocolClient};

struct Session {
    framed: Framed<TcpStream, RfbCodec>,
    version: ProtocolVersion,
    format: PixelFormat,
    framebuffer: Framebuffer,
    pointer: (u16, u16),
}

impl Session {
    fn apply(&mut self, msg: ServerMessage) -> Result<bool, BridgeError> {
        match msg {
            ServerMessage::FramebufferUpdate(rects) => {
                for rect in rects {
                    match rect.body {
                        RectBody::DesktopSize => {
                            debug!(width = rect.width, height = rect.height, "desktop resized");
                            self.framebuffer.resize(rect.width, rect.height);
                        }
                        RectBody::Raw(pixels) => self.framebuffer.apply_raw(
                            rect.x,
                            rect.y,
                            rect.width,
                            rect.height,
                            &pixels,
                            &self.format,
                        )?,
                    }
                }
                Ok(true)
            }
            ServerMessage::SetColourMapEntries { first, count } => {
                debug!(first, count, "ignoring colour map entries");
                Ok(false)
            }
            ServerMessage::Bell => Ok(false),
            ServerMessage::ServerCutText(text) => {
                debug!(len = text.len(), "server cut text");
                Ok(false)
            }
        }
    }
}

pub struct FramedRfbClient {
    endpoint: Endpoint,
    options: ClientOptions,
    session: Option<Session>,
}

impl FramedRfbClient {
    pub fn new(endpoint: Endpoint, options: ClientOptions) -> Self {
        Self {
            endpoint,
            options,
            session: None,
        }
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.session.as_ref().map(|s| s.version)
    }

    fn session(&mut self) -> Result<&mut Session, BridgeError> {
        self.session.as_mut().ok_or(BridgeError::NotConnected)
    }

    async fn open(&self) -> Result<Session, BridgeError> {
        let mut stream = dial(&self.endpoint, self.options.connect_timeout).await?;
        let version = handshake::exchange_version(&mut stream).await?;
        handshake::negotiate_security(&mut stream, version).await?;
        let ServerInit {
            width,
            height,
            name,
            ..
        } = handshake::initialise(&mut stream, true).await?;
        info!(
            endpoint = %self.endpoint,
            %version,
            width,
            height,
            desktop = %name,
            "RFB session established"
        );

        let format = PixelFormat::rgb888();
        let mut framed = Framed::new(stream, RfbCodec::new(format.bytes_per_pixel()));
        framed.feed(ClientMessage::SetPixelFormat(format)).await?;
        framed
            .feed(ClientMessage::SetEncodings(vec![
                ENCODING_RAW,
                ENCODING_DESKTOP_SIZE,
            ]))
            .await?;
        framed.flush().await?;

        Ok(Session {
            framed,
            version,
            format,
            framebuffer: Framebuffer::new(width, height),
            pointer: (0, 0),
        })
    }
}

#[async_trait]
impl ProtocolClient for FramedRfbClient {
    fn variant(&self) -> ClientVariant {
        ClientVariant::Framed
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn pointer(&self) -> (u16, u16) {
        self.session.as_ref().map_or((0, 0), |s| s.pointer)
    }

    fn timing(&self) -> &InputTiming {
        &self.options.timing
    }

    async fn connect(&mut self) -> Result<(), BridgeError> {
        if self.session.is_some() {
            return Ok(());
        }
        let timeout = self.options.connect_timeout;
        let session = tokio::time::timeout(timeout, self.open())
            .await
            .map_err(|_| BridgeError::Timeout(timeout))??;
        self.session = Some(session);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BridgeError> {
        if let Some(mut session) = self.session.take() {
            debug!(endpoint = %self.endpoint, "closing RFB session");
            let _ = session.framed.close().await;
        }
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Screenshot, BridgeError> {
        let timeout = self.options.capture_timeout;
        let session = self.session()?;
        let (width, height) = (session.framebuffer.width(), session.framebuffer.height());
        session
            .framed
            .send(ClientMessage::FramebufferUpdateRequest {
                incremental: false,
                x: 0,
                y: 0,
                width,
                height,
            })
            .await?;

        let capture = async {
            loop {
                match session.framed.next().await {
                    Some(msg) => {
                        if session.apply(msg?)? {
                            return session.framebuffer.to_png();
                        }
                    }
                    None => {
                        return Err(BridgeError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "backend closed the RFB session",
                        )));
                    }
                }
            }
        };
        tokio::time::timeout(timeout, capture)
            .await
            .map_err(|_| BridgeError::Timeout(timeout))?
    }

    async fn send_input(&mut self, steps: Vec<Step>) -> Result<(), BridgeError> {
        let session = self.session()?;
        if let Some(p) = input::final_pointer(&steps) {
            session.pointer = p;
        }
        for step in steps {
            match step {
                Step::Send(msg) => session.framed.feed(msg).await?,
                Step::Pause(d) => {
                    session.framed.flush().await?;
                    tokio::time::sleep(d).await;
                }
            }
        }
        session.framed.flush().await
    }
}
