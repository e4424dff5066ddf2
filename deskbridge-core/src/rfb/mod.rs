//! RFB protocol clients.
//!
//! [`ProtocolClient`] is the one interface the bridge drives. Three
//! implementations exist and the choice between them is made once, by
//! [`ClientFactory`], when the process starts:
//!
//! - [`FramedRfbClient`]: full RFB session over a `tokio_util` `Framed`
//!   stream, including framebuffer capture (cargo feature
//!   `framed-client`).
//! - [`RawRfbClient`]: minimal fallback that only exchanges versions and
//!   writes input events straight to the socket. Cannot capture.
//! - [`MockClient`]: in-memory double for tests.

pub mod codec;
#[cfg(feature = "framed-client")]
pub mod framed;
pub mod handshake;
pub mod input;
pub mod keysym;
pub mod mock;
pub mod placeholder;
pub mod raw;
pub mod screenshot;
pub mod wire;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::action::{ActionRequest, Key, KeyCombination, MouseButton};
use crate::error::BridgeError;
use crate::registry::Endpoint;

#[cfg(feature = "framed-client")]
pub use framed::FramedRfbClient;
pub use input::{InputTiming, Step};
pub use mock::{MockBackend, MockClient};
pub use raw::RawRfbClient;
pub use screenshot::Screenshot;

// ── ClientVariant ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientVariant {
    #[default]
    Framed,
    Raw,
    Mock,
}

impl std::fmt::Display for ClientVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Framed => write!(f, "framed"),
            Self::Raw => write!(f, "raw"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

// ── ProtocolClient ───────────────────────────────────────────────

/// A connection to one backend desktop.
///
/// Implementors provide the transport (`connect`, `send_input`,
/// `screenshot`); the high-level actions are built on top as input
/// scripts and behave identically across variants.
#[async_trait]
pub trait ProtocolClient: Send {
    fn variant(&self) -> ClientVariant;

    fn is_connected(&self) -> bool;

    /// Last pointer position sent to the backend.
    fn pointer(&self) -> (u16, u16);

    fn timing(&self) -> &InputTiming;

    async fn connect(&mut self) -> Result<(), BridgeError>;

    /// Close the connection. Idempotent.
    async fn disconnect(&mut self) -> Result<(), BridgeError>;

    async fn screenshot(&mut self) -> Result<Screenshot, BridgeError>;

    /// Replay an input script in order.
    async fn send_input(&mut self, steps: Vec<Step>) -> Result<(), BridgeError>;

    async fn click(&mut self, x: u16, y: u16, button: MouseButton) -> Result<(), BridgeError> {
        let steps = input::click(x, y, button, self.timing());
        self.send_input(steps).await
    }

    async fn move_pointer(&mut self, x: u16, y: u16, duration: Duration) -> Result<(), BridgeError> {
        let steps = input::move_pointer(self.pointer(), (x, y), duration);
        self.send_input(steps).await
    }

    async fn type_text(&mut self, text: &str) -> Result<(), BridgeError> {
        let steps = input::type_text(text, self.timing());
        self.send_input(steps).await
    }

    async fn key_combination(&mut self, combo: &KeyCombination) -> Result<(), BridgeError> {
        self.send_input(input::key_combination(combo)).await
    }

    /// Press and release a named key (or single character).
    async fn key_press(&mut self, name: &str) -> Result<(), BridgeError> {
        let key = Key::parse(name)?;
        self.send_input(input::key_press(key)).await
    }

    /// Run a validated action. Returns the capture for `Screenshot`.
    async fn execute(&mut self, action: &ActionRequest) -> Result<Option<Screenshot>, BridgeError> {
        match action {
            ActionRequest::Click { x, y, button } => self.click(*x, *y, *button).await?,
            ActionRequest::Type { text } => self.type_text(text).await?,
            ActionRequest::KeyCombination(combo) => self.key_combination(combo).await?,
            ActionRequest::KeyPress(key) => self.send_input(input::key_press(*key)).await?,
            ActionRequest::Move { x, y, duration } => self.move_pointer(*x, *y, *duration).await?,
            ActionRequest::Screenshot => return self.screenshot().await.map(Some),
        }
        Ok(None)
    }
}

// ── ClientOptions / ClientFactory ────────────────────────────────

/// Settings shared by every client the factory builds.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub variant: ClientVariant,
    pub connect_timeout: Duration,
    /// Deadline for a single framebuffer capture.
    pub capture_timeout: Duration,
    pub timing: InputTiming,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            variant: ClientVariant::default(),
            connect_timeout: Duration::from_secs(10),
            capture_timeout: Duration::from_secs(5),
            timing: InputTiming::default(),
        }
    }
}

/// Builds protocol clients of one fixed variant.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    variant: ClientVariant,
    options: ClientOptions,
    mock: Option<MockBackend>,
}

impl ClientFactory {
    /// Resolve the configured variant against what this build supports.
    pub fn new(options: ClientOptions) -> Self {
        let variant = match options.variant {
            ClientVariant::Framed if !cfg!(feature = "framed-client") => {
                warn!("framed RFB client not compiled in, using raw fallback");
                ClientVariant::Raw
            }
            ClientVariant::Mock => {
                warn!("mock client requested without a backend, using raw fallback");
                ClientVariant::Raw
            }
            v => v,
        };
        info!(%variant, "protocol client variant selected");
        Self {
            variant,
            options,
            mock: None,
        }
    }

    /// Factory whose clients all talk to `backend`.
    pub fn mock(backend: MockBackend, timing: InputTiming) -> Self {
        Self {
            variant: ClientVariant::Mock,
            options: ClientOptions {
                variant: ClientVariant::Mock,
                timing,
                ..ClientOptions::default()
            },
            mock: Some(backend),
        }
    }

    pub fn variant(&self) -> ClientVariant {
        self.variant
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// A new, unconnected client for `endpoint`.
    pub fn create(&self, endpoint: &Endpoint) -> Box<dyn ProtocolClient> {
        match (self.variant, &self.mock) {
            (ClientVariant::Mock, Some(backend)) => {
                Box::new(MockClient::new(backend.clone(), self.options.timing))
            }
            #[cfg(feature = "framed-client")]
            (ClientVariant::Framed, _) => {
                Box::new(FramedRfbClient::new(endpoint.clone(), self.options.clone()))
            }
            _ => Box::new(RawRfbClient::new(endpoint.clone(), self.options.clone())),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
