//! In-memory protocol client.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::BridgeError;
use crate::rfb::input::{self, InputTiming, Step};
use crate::rfb::screenshot::{Framebuffer, Screenshot};
use crate::rfb::wire::ClientMessage;
use crate::rfb::{ClientVariant, ProtocolClient};

#[derive(Debug, Default)]
struct MockState {
    events: Vec<ClientMessage>,
    connects: u32,
    disconnects: u32,
    /// Connect attempts still to fail before one succeeds.
    failing_connects: u32,
    fail_screenshots: bool,
    screen: (u16, u16),
}

/// Shared view of everything the mock clients did.
#[derive(Debug, Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                screen: (32, 24),
                ..MockState::default()
            })),
        }
    }

    /// Fail the next `n` connect attempts with a refused connection.
    pub fn fail_connects(&self, n: u32) {
        self.state.lock().failing_connects = n;
    }

    pub fn fail_screenshots(&self, fail: bool) {
        self.state.lock().fail_screenshots = fail;
    }

    pub fn events(&self) -> Vec<ClientMessage> {
        self.state.lock().events.clone()
    }

    pub fn pointer_events(&self) -> Vec<(u8, u16, u16)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                ClientMessage::PointerEvent { mask, x, y } => Some((mask.bits(), *x, *y)),
                _ => None,
            })
            .collect()
    }

    pub fn key_events(&self) -> Vec<(bool, u32)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                ClientMessage::KeyEvent { down, keysym } => Some((*down, *keysym)),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().connects
    }

    pub fn disconnects(&self) -> u32 {
        self.state.lock().disconnects
    }
}

/// Client that records into a [`MockBackend`] instead of a socket.
pub struct MockClient {
    backend: MockBackend,
    timing: InputTiming,
    connected: bool,
    pointer: (u16, u16),
}

impl MockClient {
    pub fn new(backend: MockBackend, timing: InputTiming) -> Self {
        Self {
            backend,
            timing,
            connected: false,
            pointer: (0, 0),
        }
    }

    fn ensure_connected(&self) -> Result<(), BridgeError> {
        if self.connected {
            Ok(())
        } else {
            Err(BridgeError::NotConnected)
        }
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    fn variant(&self) -> ClientVariant {
        ClientVariant::Mock
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn pointer(&self) -> (u16, u16) {
        self.pointer
    }

    fn timing(&self) -> &InputTiming {
        &self.timing
    }

    async fn connect(&mut self) -> Result<(), BridgeError> {
        let mut state = self.backend.state.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock backend refused",
            )
            .into());
        }
        state.connects += 1;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BridgeError> {
        if self.connected {
            self.connected = false;
            self.backend.state.lock().disconnects += 1;
        }
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Screenshot, BridgeError> {
        self.ensure_connected()?;
        let (fail, (w, h)) = {
            let state = self.backend.state.lock();
            (state.fail_screenshots, state.screen)
        };
        if fail {
            return Err(BridgeError::CaptureUnavailable("mock capture failure".into()));
        }
        Framebuffer::new(w, h).to_png()
    }

    async fn send_input(&mut self, steps: Vec<Step>) -> Result<(), BridgeError> {
        self.ensure_connected()?;
        if let Some(p) = input::final_pointer(&steps) {
            self.pointer = p;
        }
        let mut state = self.backend.state.lock();
        state.events.extend(steps.into_iter().filter_map(|s| match s {
            Step::Send(m) => Some(m),
            Step::Pause(_) => None,
        }));
        Ok(())
    }
}
