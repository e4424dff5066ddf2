//! `tokio_util` codec for an initialised RFB session.
//!
//! Decodes server-to-client messages and encodes [`ClientMessage`]s. The
//! handshake (version, security, init) happens before the stream is
//! wrapped in a `Framed`.
//!
//! ```text
//! FramebufferUpdate:    u8 0, pad, u16 n, n × rect
//!   rect:               u16 x, y, w, h, i32 encoding, body
//! SetColourMapEntries:  u8 1, pad, u16 first, u16 n, n × (u16 r, g, b)
//! Bell:                 u8 2
//! ServerCutText:        u8 3, pad[3], u32 len, len × u8
//! ```

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::BridgeError;
use crate::rfb::wire::{ClientMessage, ENCODING_DESKTOP_SIZE, ENCODING_RAW};

/// Upper bound on a single server message.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

const RECT_HEADER: usize = 12;

// ── ServerMessage ────────────────────────────────────────────────

/// Body of one framebuffer update rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RectBody {
    /// Pixels in the negotiated pixel format, row-major.
    Raw(Bytes),
    /// The framebuffer now has the rectangle's width and height.
    DesktopSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rectangle {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub body: RectBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    FramebufferUpdate(Vec<Rectangle>),
    SetColourMapEntries { first: u16, count: u16 },
    Bell,
    ServerCutText(String),
}

// ── RfbCodec ─────────────────────────────────────────────────────

/// Codec for one session; `bytes_per_pixel` comes from the pixel
/// format the client asked for.
#[derive(Debug, Clone)]
pub struct RfbCodec {
    bytes_per_pixel: usize,
}

impl RfbCodec {
    pub fn new(bytes_per_pixel: usize) -> Self {
        Self { bytes_per_pixel }
    }

    /// Total length of the message at the front of `src`, or `None`
    /// while more bytes are needed.
    fn message_len(&self, src: &[u8]) -> Result<Option<usize>, BridgeError> {
        let Some(&kind) = src.first() else {
            return Ok(None);
        };
        let len = match kind {
            0 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                let count = usize::from(u16::from_be_bytes([src[2], src[3]]));
                let mut offset = 4;
                for _ in 0..count {
                    if src.len() < offset + RECT_HEADER {
                        return Ok(None);
                    }
                    let mut hdr = &src[offset..offset + RECT_HEADER];
                    let _x = hdr.get_u16();
                    let _y = hdr.get_u16();
                    let w = usize::from(hdr.get_u16());
                    let h = usize::from(hdr.get_u16());
                    let encoding = hdr.get_i32();
                    offset += RECT_HEADER;
                    offset += match encoding {
                        ENCODING_RAW => w * h * self.bytes_per_pixel,
                        ENCODING_DESKTOP_SIZE => 0,
                        other => {
                            return Err(BridgeError::Protocol(format!(
                                "unsupported rectangle encoding {other}"
                            )));
                        }
                    };
                    if offset > MAX_MESSAGE_SIZE {
                        return Err(BridgeError::Protocol("framebuffer update too large".into()));
                    }
                }
                offset
            }
            1 => {
                if src.len() < 6 {
                    return Ok(None);
                }
                6 + 6 * usize::from(u16::from_be_bytes([src[4], src[5]]))
            }
            2 => 1,
            3 => {
                if src.len() < 8 {
                    return Ok(None);
                }
                let text_len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
                if text_len > MAX_MESSAGE_SIZE {
                    return Err(BridgeError::Protocol("cut text too large".into()));
                }
                8 + text_len
            }
            other => {
                return Err(BridgeError::Protocol(format!(
                    "unknown server message type {other}"
                )));
            }
        };
        Ok((src.len() >= len).then_some(len))
    }
}

impl Decoder for RfbCodec {
    type Item = ServerMessage;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(len) = self.message_len(&src[..])? else {
            return Ok(None);
        };
        let mut msg = src.split_to(len);

        let kind = msg.get_u8();
        let decoded = match kind {
            0 => {
                msg.advance(1);
                let count = msg.get_u16();
                let mut rects = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let x = msg.get_u16();
                    let y = msg.get_u16();
                    let width = msg.get_u16();
                    let height = msg.get_u16();
                    let body = match msg.get_i32() {
                        ENCODING_RAW => {
                            let n = usize::from(width) * usize::from(height) * self.bytes_per_pixel;
                            RectBody::Raw(msg.split_to(n).freeze())
                        }
                        _ => RectBody::DesktopSize,
                    };
                    rects.push(Rectangle {
                        x,
                        y,
                        width,
                        height,
                        body,
                    });
                }
                ServerMessage::FramebufferUpdate(rects)
            }
            1 => {
                msg.advance(1);
                ServerMessage::SetColourMapEntries {
                    first: msg.get_u16(),
                    count: msg.get_u16(),
                }
            }
            2 => ServerMessage::Bell,
            _ => {
                msg.advance(7);
                // Cut text is Latin-1.
                ServerMessage::ServerCutText(msg.iter().map(|&b| b as char).collect())
            }
        };
        Ok(Some(decoded))
    }
}

impl Encoder<ClientMessage> for RfbCodec {
    type Error = BridgeError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn raw_update(x: u16, y: u16, w: u16, h: u16, pixel: [u8; 4]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u16(1);
        buf.put_u16(x);
        buf.put_u16(y);
        buf.put_u16(w);
        buf.put_u16(h);
        buf.put_i32(ENCODING_RAW);
        for _ in 0..(w as usize * h as usize) {
            buf.put_slice(&pixel);
        }
        buf
    }

    #[test]
    fn decodes_raw_rectangle() {
        let mut codec = RfbCodec::new(4);
        let mut src = raw_update(1, 2, 3, 2, [0x10, 0x20, 0x30, 0]);
        let msg = codec.decode(&mut src).unwrap().unwrap();
        let ServerMessage::FramebufferUpdate(rects) = msg else {
            panic!("expected framebuffer update");
        };
        assert_eq!(rects.len(), 1);
        assert_eq!((rects[0].x, rects[0].y, rects[0].width, rects[0].height), (1, 2, 3, 2));
        let RectBody::Raw(pixels) = &rects[0].body else {
            panic!("expected raw body");
        };
        assert_eq!(pixels.len(), 24);
        assert!(src.is_empty());
    }

    #[test]
    fn waits_for_partial_update() {
        let mut codec = RfbCodec::new(4);
        let full = raw_update(0, 0, 4, 4, [1, 2, 3, 0]);
        let mut src = BytesMut::from(&full[..full.len() - 5]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert_eq!(src.len(), full.len() - 5);

        src.extend_from_slice(&full[full.len() - 5..]);
        assert!(codec.decode(&mut src).unwrap().is_some());
    }

    #[test]
    fn decodes_small_messages_back_to_back() {
        let mut codec = RfbCodec::new(4);
        let mut src = BytesMut::new();
        src.put_u8(2);
        src.put_u8(3);
        src.put_bytes(0, 3);
        src.put_u32(5);
        src.put_slice(b"hello");

        assert_eq!(codec.decode(&mut src).unwrap(), Some(ServerMessage::Bell));
        assert_eq!(
            codec.decode(&mut src).unwrap(),
            Some(ServerMessage::ServerCutText("hello".into()))
        );
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_encoding() {
        let mut codec = RfbCodec::new(4);
        let mut src = BytesMut::new();
        src.put_u8(0);
        src.put_u8(0);
        src.put_u16(1);
        src.put_bytes(0, 8);
        src.put_i32(16); // ZRLE
        assert!(matches!(codec.decode(&mut src), Err(BridgeError::Protocol(_))));
    }

    #[test]
    fn rejects_unknown_message_type() {
        let mut codec = RfbCodec::new(4);
        let mut src = BytesMut::from(&[0xfeu8, 0, 0][..]);
        assert!(matches!(codec.decode(&mut src), Err(BridgeError::Protocol(_))));
    }
}
