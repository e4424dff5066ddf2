//! Local framebuffer and PNG rendering.

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};

use crate::error::BridgeError;
use crate::rfb::wire::PixelFormat;

/// One captured frame, PNG-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// `true` when this is a placeholder rather than a real capture.
    pub degraded: bool,
}

// ── Framebuffer ──────────────────────────────────────────────────

/// RGB copy of the remote framebuffer, updated rectangle by rectangle.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u16,
    height: u16,
    rgb: Vec<u8>,
}

impl Framebuffer {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            rgb: vec![0; usize::from(width) * usize::from(height) * 3],
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Reallocate for a DesktopSize change; contents are cleared.
    pub fn resize(&mut self, width: u16, height: u16) {
        *self = Self::new(width, height);
    }

    /// Copy a Raw-encoded rectangle in `format` into the buffer.
    /// Pixels falling outside the framebuffer are clipped.
    pub fn apply_raw(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        pixels: &[u8],
        format: &PixelFormat,
    ) -> Result<(), BridgeError> {
        let bpp = format.bytes_per_pixel();
        let expected = usize::from(width) * usize::from(height) * bpp;
        if pixels.len() != expected || bpp == 0 {
            return Err(BridgeError::Protocol(format!(
                "raw rectangle has {} bytes, expected {expected}",
                pixels.len()
            )));
        }
        if expected == 0 {
            return Ok(());
        }

        let fb_w = usize::from(self.width);
        let fb_h = usize::from(self.height);
        for (row, line) in pixels.chunks_exact(usize::from(width) * bpp).enumerate() {
            let py = usize::from(y) + row;
            if py >= fb_h {
                break;
            }
            for (col, px) in line.chunks_exact(bpp).enumerate() {
                let px_x = usize::from(x) + col;
                if px_x >= fb_w {
                    break;
                }
                let [r, g, b] = decode_pixel(px, format);
                let at = (py * fb_w + px_x) * 3;
                self.rgb[at..at + 3].copy_from_slice(&[r, g, b]);
            }
        }
        Ok(())
    }

    pub fn to_png(&self) -> Result<Screenshot, BridgeError> {
        encode_png(
            &self.rgb,
            u32::from(self.width),
            u32::from(self.height),
            false,
        )
    }
}

fn decode_pixel(px: &[u8], format: &PixelFormat) -> [u8; 3] {
    let raw = match (px.len(), format.big_endian) {
        (4, false) => u32::from_le_bytes([px[0], px[1], px[2], px[3]]),
        (4, true) => u32::from_be_bytes([px[0], px[1], px[2], px[3]]),
        (2, false) => u32::from(u16::from_le_bytes([px[0], px[1]])),
        (2, true) => u32::from(u16::from_be_bytes([px[0], px[1]])),
        _ => u32::from(px[0]),
    };
    let channel = |shift: u8, max: u16| -> u8 {
        if max == 0 {
            return 0;
        }
        let v = (raw >> shift) & u32::from(max);
        (v * 255 / u32::from(max)) as u8
    };
    [
        channel(format.red_shift, format.red_max),
        channel(format.green_shift, format.green_max),
        channel(format.blue_shift, format.blue_max),
    ]
}

/// PNG-encode an RGB8 buffer.
pub fn encode_png(
    rgb: &[u8],
    width: u32,
    height: u32,
    degraded: bool,
) -> Result<Screenshot, BridgeError> {
    let mut png = Vec::with_capacity(rgb.len() / 4);
    PngEncoder::new(&mut png).write_image(rgb, width, height, ColorType::Rgb8)?;
    Ok(Screenshot {
        png,
        width,
        height,
        degraded,
    })
}
