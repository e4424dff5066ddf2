//! JSON messages exchanged with structured streaming clients.
//!
//! Inbound (tagged by `type`):
//! ```text
//! {"type":"click","x":500,"y":425,"button":"left"}
//! {"type":"type","text":"hello"}
//! {"type":"key_combination","keys":"ctrl+c"}
//! {"type":"key_press","key":"enter"}
//! {"type":"move","x":10,"y":20,"duration":0.5}
//! {"type":"screenshot"}
//! ```
//!
//! Outbound: `screenshot`, `action_result`, `error`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::action::ActionRequest;
use crate::error::{BridgeError, ErrorKind};
use crate::rfb::Screenshot;

/// Default `move` duration in seconds.
pub const DEFAULT_MOVE_DURATION: f64 = 0.5;

// ── Transport frames ─────────────────────────────────────────────

/// A frame received from the client transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Binary(Bytes),
    Close,
}

/// A frame to send on the client transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Text(String),
    Binary(Bytes),
    Close,
}

// ── Inbound ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Click {
        x: i64,
        y: i64,
        #[serde(default)]
        button: Option<String>,
    },
    Type {
        text: String,
    },
    KeyCombination {
        keys: String,
    },
    KeyPress {
        key: String,
    },
    Move {
        x: i64,
        y: i64,
        #[serde(default)]
        duration: Option<f64>,
    },
    Screenshot,
}

impl InboundMessage {
    /// Validate into an [`ActionRequest`].
    pub fn into_action(self) -> Result<ActionRequest, BridgeError> {
        match self {
            Self::Click { x, y, button } => {
                ActionRequest::click(x, y, button.as_deref().unwrap_or("left"))
            }
            Self::Type { text } => ActionRequest::type_text(text),
            Self::KeyCombination { keys } => ActionRequest::key_combination(&keys),
            Self::KeyPress { key } => ActionRequest::key_press(&key),
            Self::Move { x, y, duration } => {
                ActionRequest::move_to(x, y, duration.unwrap_or(DEFAULT_MOVE_DURATION))
            }
            Self::Screenshot => Ok(ActionRequest::Screenshot),
        }
    }
}

/// Parse one text frame. On failure returns the action name (when the
/// `type` tag was readable) together with the validation error.
pub fn parse_action(text: &str) -> Result<ActionRequest, (String, BridgeError)> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        (
            "unknown".to_string(),
            BridgeError::InvalidActionRequest(format!("malformed JSON: {e}")),
        )
    })?;
    let action = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let msg = InboundMessage::deserialize(value).map_err(|e| {
        (
            action.clone(),
            BridgeError::InvalidActionRequest(e.to_string()),
        )
    })?;
    msg.into_action().map_err(|e| (action, e))
}

// ── Outbound ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Screenshot {
        /// Base64 PNG.
        data: String,
        /// RFC 3339.
        timestamp: String,
        width: u32,
        height: u32,
        degraded: bool,
    },
    ActionResult {
        action: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl OutboundMessage {
    pub fn screenshot(shot: &Screenshot) -> Self {
        Self::Screenshot {
            data: STANDARD.encode(&shot.png),
            timestamp: chrono::Utc::now().to_rfc3339(),
            width: shot.width,
            height: shot.height,
            degraded: shot.degraded,
        }
    }

    pub fn action_ok(action: &str) -> Self {
        Self::ActionResult {
            action: action.to_string(),
            success: true,
            error: None,
        }
    }

    pub fn action_failed(action: &str, err: &BridgeError) -> Self {
        Self::ActionResult {
            action: action.to_string(),
            success: false,
            error: Some(err.to_string()),
        }
    }

    pub fn error(err: &BridgeError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn to_frame(&self) -> Result<ServerFrame, BridgeError> {
        Ok(ServerFrame::Text(serde_json::to_string(self)?))
    }
}

// ── Tests ────────────────────────────────────────────────────────
