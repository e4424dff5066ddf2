//! Synthetic frame served when no real capture is available.

use crate::error::BridgeError;
use crate::rfb::screenshot::{Screenshot, encode_png};

pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;

const BACKGROUND: [u8; 3] = [0xff, 0xff, 0xff];
const BANNER: [u8; 3] = [0xdd, 0xdd, 0xdd];
const BANNER_HEIGHT: u32 = 32;

/// White frame with a grey banner along the top, marked degraded.
pub fn render(width: u32, height: u32) -> Result<Screenshot, BridgeError> {
    let width = width.max(1);
    let height = height.max(1);
    let mut rgb = Vec::with_capacity(rgb_len(width, height));
    for y in 0..height {
        let colour = if y < BANNER_HEIGHT { BANNER } else { BACKGROUND };
        for _ in 0..width {
            rgb.extend_from_slice(&colour);
        }
    }
    encode_png(&rgb, width, height, true)
}

fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}
