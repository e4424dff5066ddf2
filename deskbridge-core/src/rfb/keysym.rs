//! X11 keysym values for the keys the bridge can send.

use crate::action::{Key, Modifier, NamedKey};

pub const XK_BACKSPACE: u32 = 0xff08;
pub const XK_TAB: u32 = 0xff09;
pub const XK_RETURN: u32 = 0xff0d;
pub const XK_ESCAPE: u32 = 0xff1b;
pub const XK_HOME: u32 = 0xff50;
pub const XK_LEFT: u32 = 0xff51;
pub const XK_UP: u32 = 0xff52;
pub const XK_RIGHT: u32 = 0xff53;
pub const XK_DOWN: u32 = 0xff54;
pub const XK_PAGE_UP: u32 = 0xff55;
pub const XK_PAGE_DOWN: u32 = 0xff56;
pub const XK_END: u32 = 0xff57;
pub const XK_INSERT: u32 = 0xff63;
pub const XK_F1: u32 = 0xffbe;
pub const XK_SHIFT_L: u32 = 0xffe1;
pub const XK_CONTROL_L: u32 = 0xffe3;
pub const XK_META_L: u32 = 0xffe7;
pub const XK_ALT_L: u32 = 0xffe9;
pub const XK_SUPER_L: u32 = 0xffeb;
pub const XK_DELETE: u32 = 0xffff;
pub const XK_SPACE: u32 = 0x0020;

/// Unicode characters outside Latin-1 are offset into this plane.
const UNICODE_OFFSET: u32 = 0x0100_0000;

pub fn modifier(m: Modifier) -> u32 {
    match m {
        Modifier::Ctrl => XK_CONTROL_L,
        Modifier::Shift => XK_SHIFT_L,
        Modifier::Alt => XK_ALT_L,
        Modifier::Meta => XK_META_L,
        Modifier::Cmd => XK_SUPER_L,
    }
}

pub fn named(key: NamedKey) -> u32 {
    match key {
        NamedKey::Enter => XK_RETURN,
        NamedKey::Tab => XK_TAB,
        NamedKey::Escape => XK_ESCAPE,
        NamedKey::Backspace => XK_BACKSPACE,
        NamedKey::Delete => XK_DELETE,
        NamedKey::Up => XK_UP,
        NamedKey::Down => XK_DOWN,
        NamedKey::Left => XK_LEFT,
        NamedKey::Right => XK_RIGHT,
        NamedKey::Home => XK_HOME,
        NamedKey::End => XK_END,
        NamedKey::PageUp => XK_PAGE_UP,
        NamedKey::PageDown => XK_PAGE_DOWN,
        NamedKey::Insert => XK_INSERT,
        NamedKey::Space => XK_SPACE,
        NamedKey::F(n) => XK_F1 + u32::from(n.clamp(1, 12) - 1),
    }
}

/// Keysym for a typed character.
pub fn character(c: char) -> u32 {
    match c {
        '\n' | '\r' => XK_RETURN,
        '\t' => XK_TAB,
        '\u{8}' => XK_BACKSPACE,
        c if (c as u32) <= 0xff => c as u32,
        c => UNICODE_OFFSET | c as u32,
    }
}

pub fn key(k: Key) -> u32 {
    match k {
        Key::Named(n) => named(n),
        Key::Char(c) => character(c),
    }
}
