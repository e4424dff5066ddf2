//! RFB (RFC 6143) client-to-server message encoding.
//!
//! All multi-byte fields are big-endian.
//!
//! ```text
//! ProtocolVersion:          "RFB xxx.yyy\n"                     (12)
//! SetPixelFormat:           u8 0, pad[3], PixelFormat           (20)
//! SetEncodings:             u8 2, pad, u16 n, i32 × n       (4 + 4n)
//! FramebufferUpdateRequest: u8 3, u8 incr, u16 x, y, w, h       (10)
//! KeyEvent:                 u8 4, u8 down, pad[2], u32 keysym    (8)
//! PointerEvent:             u8 5, u8 mask, u16 x, u16 y          (6)
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};

use crate::action::MouseButton;
use crate::error::BridgeError;

// ── Constants ────────────────────────────────────────────────────

/// Length of the version handshake line.
pub const VERSION_LEN: usize = 12;

pub const SECURITY_INVALID: u8 = 0;
pub const SECURITY_NONE: u8 = 1;
pub const SECURITY_VNC_AUTH: u8 = 2;

pub const ENCODING_RAW: i32 = 0;
pub const ENCODING_DESKTOP_SIZE: i32 = -223;

// ── ProtocolVersion ──────────────────────────────────────────────

/// Protocol versions this client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V3_3,
    V3_7,
    V3_8,
}

impl ProtocolVersion {
    /// Parse the server's version line and pick the version to answer
    /// with: the highest we support that does not exceed the server's.
    pub fn negotiate(line: &[u8]) -> Result<Self, BridgeError> {
        let (major, minor) = parse_version_line(line)?;
        Ok(match (major, minor) {
            (3, m) if m >= 8 => Self::V3_8,
            (3, 7) => Self::V3_7,
            (3, _) => Self::V3_3,
            (m, _) if m > 3 => Self::V3_8,
            _ => {
                return Err(BridgeError::Protocol(format!(
                    "unsupported RFB version {major}.{minor}"
                )));
            }
        })
    }

    pub fn as_bytes(&self) -> &'static [u8; VERSION_LEN] {
        match self {
            Self::V3_3 => b"RFB 003.003\n",
            Self::V3_7 => b"RFB 003.007\n",
            Self::V3_8 => b"RFB 003.008\n",
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V3_3 => write!(f, "3.3"),
            Self::V3_7 => write!(f, "3.7"),
            Self::V3_8 => write!(f, "3.8"),
        }
    }
}

fn parse_version_line(line: &[u8]) -> Result<(u32, u32), BridgeError> {
    let malformed = || {
        BridgeError::Protocol(format!(
            "malformed version line {:?}",
            String::from_utf8_lossy(line)
        ))
    };
    if line.len() != VERSION_LEN || &line[..4] != b"RFB " || line[7] != b'.' || line[11] != b'\n'
    {
        return Err(malformed());
    }
    let digits = |s: &[u8]| -> Option<u32> {
        if !s.iter().all(u8::is_ascii_digit) {
            return None;
        }
        std::str::from_utf8(s).ok()?.parse().ok()
    };
    let major = digits(&line[4..7]).ok_or_else(malformed)?;
    let minor = digits(&line[8..11]).ok_or_else(malformed)?;
    Ok((major, minor))
}

// ── ButtonMask ───────────────────────────────────────────────────

bitflags! {
    /// Pointer button state carried by a PointerEvent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ButtonMask: u8 {
        const LEFT = 0b0000_0001;
        const MIDDLE = 0b0000_0010;
        const RIGHT = 0b0000_0100;
        const WHEEL_UP = 0b0000_1000;
        const WHEEL_DOWN = 0b0001_0000;
    }
}

impl From<MouseButton> for ButtonMask {
    fn from(button: MouseButton) -> Self {
        match button {
            MouseButton::Left => Self::LEFT,
            MouseButton::Middle => Self::MIDDLE,
            MouseButton::Right => Self::RIGHT,
        }
    }
}

// ── PixelFormat ──────────────────────────────────────────────────

/// Server/client pixel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_colour: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    pub const SIZE: usize = 16;

    /// 32bpp little-endian true colour, one byte per channel (`BGRX`).
    pub const fn rgb888() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_colour: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        usize::from(self.bits_per_pixel / 8)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.bits_per_pixel);
        dst.put_u8(self.depth);
        dst.put_u8(self.big_endian as u8);
        dst.put_u8(self.true_colour as u8);
        dst.put_u16(self.red_max);
        dst.put_u16(self.green_max);
        dst.put_u16(self.blue_max);
        dst.put_u8(self.red_shift);
        dst.put_u8(self.green_shift);
        dst.put_u8(self.blue_shift);
        dst.put_bytes(0, 3);
    }

    pub fn decode(mut src: &[u8]) -> Result<Self, BridgeError> {
        if src.len() < Self::SIZE {
            return Err(BridgeError::Protocol(format!(
                "PixelFormat too short: {} < {}",
                src.len(),
                Self::SIZE
            )));
        }
        Ok(Self {
            bits_per_pixel: src.get_u8(),
            depth: src.get_u8(),
            big_endian: src.get_u8() != 0,
            true_colour: src.get_u8() != 0,
            red_max: src.get_u16(),
            green_max: src.get_u16(),
            blue_max: src.get_u16(),
            red_shift: src.get_u8(),
            green_shift: src.get_u8(),
            blue_shift: src.get_u8(),
        })
    }
}

// ── ServerInit ───────────────────────────────────────────────────

/// Framebuffer geometry and desktop name sent after ClientInit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

impl ServerInit {
    /// Fixed part before the name bytes.
    pub const HEADER_SIZE: usize = 24;

    /// Decode the fixed header; returns the init (with an empty name)
    /// and the length of the name that follows.
    pub fn decode_header(src: &[u8]) -> Result<(Self, usize), BridgeError> {
        if src.len() < Self::HEADER_SIZE {
            return Err(BridgeError::Protocol("ServerInit too short".into()));
        }
        let mut buf = src;
        let width = buf.get_u16();
        let height = buf.get_u16();
        let pixel_format = PixelFormat::decode(&buf[..PixelFormat::SIZE])?;
        buf.advance(PixelFormat::SIZE);
        let name_len = buf.get_u32() as usize;
        Ok((
            Self {
                width,
                height,
                pixel_format,
                name: String::new(),
            },
            name_len,
        ))
    }
}

// ── ClientMessage ────────────────────────────────────────────────

/// Messages the client sends once the session is initialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SetPixelFormat(PixelFormat),
    SetEncodings(Vec<i32>),
    FramebufferUpdateRequest {
        incremental: bool,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    },
    KeyEvent {
        down: bool,
        keysym: u32,
    },
    PointerEvent {
        mask: ButtonMask,
        x: u16,
        y: u16,
    },
}

impl ClientMessage {
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Self::SetPixelFormat(pf) => {
                dst.reserve(4 + PixelFormat::SIZE);
                dst.put_u8(0);
                dst.put_bytes(0, 3);
                pf.encode(dst);
            }
            Self::SetEncodings(encodings) => {
                dst.reserve(4 + 4 * encodings.len());
                dst.put_u8(2);
                dst.put_u8(0);
                dst.put_u16(encodings.len() as u16);
                for e in encodings {
                    dst.put_i32(*e);
                }
            }
            Self::FramebufferUpdateRequest {
                incremental,
                x,
                y,
                width,
                height,
            } => {
                dst.reserve(10);
                dst.put_u8(3);
                dst.put_u8(*incremental as u8);
                dst.put_u16(*x);
                dst.put_u16(*y);
                dst.put_u16(*width);
                dst.put_u16(*height);
            }
            Self::KeyEvent { down, keysym } => {
                dst.reserve(8);
                dst.put_u8(4);
                dst.put_u8(*down as u8);
                dst.put_u16(0);
                dst.put_u32(*keysym);
            }
            Self::PointerEvent { mask, x, y } => {
                dst.reserve(6);
                dst.put_u8(5);
                dst.put_u8(mask.bits());
                dst.put_u16(*x);
                dst.put_u16(*y);
            }
        }
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf
    }
}

// ── Tests ────────────────────────────────────────────────────────
