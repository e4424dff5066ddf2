//! Input scripts: the RFB events (and pauses between them) that make up
//! one high-level action.
//!
//! Scripts are plain data so every protocol client replays them the same
//! way and tests can inspect them without a socket.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::{Key, KeyCombination, MouseButton};
use crate::rfb::keysym;
use crate::rfb::wire::{ButtonMask, ClientMessage};

/// Interval between interpolated pointer events (about 60 Hz).
pub const MOVE_STEP: Duration = Duration::from_millis(16);

/// Upper bound on interpolated pointer events per move.
pub const MAX_MOVE_STEPS: u32 = 240;

/// Delays applied while replaying scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputTiming {
    /// How long a click holds the button down.
    #[serde(with = "crate::resilience::retry::duration_ms")]
    pub click_hold: Duration,
    /// Pause between typed characters.
    #[serde(with = "crate::resilience::retry::duration_ms")]
    pub type_delay: Duration,
}

impl Default for InputTiming {
    fn default() -> Self {
        Self {
            click_hold: Duration::from_millis(100),
            type_delay: Duration::from_millis(50),
        }
    }
}

impl InputTiming {
    /// No pauses at all.
    pub fn immediate() -> Self {
        Self {
            click_hold: Duration::ZERO,
            type_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Send(ClientMessage),
    Pause(Duration),
}

fn pointer(mask: ButtonMask, x: u16, y: u16) -> Step {
    Step::Send(ClientMessage::PointerEvent { mask, x, y })
}

fn key(down: bool, keysym: u32) -> Step {
    Step::Send(ClientMessage::KeyEvent { down, keysym })
}

fn pause(steps: &mut Vec<Step>, d: Duration) {
    if !d.is_zero() {
        steps.push(Step::Pause(d));
    }
}

/// Press at `(x, y)`, hold, release at `(x, y)`.
pub fn click(x: u16, y: u16, button: MouseButton, timing: &InputTiming) -> Vec<Step> {
    let mut steps = vec![pointer(button.into(), x, y)];
    pause(&mut steps, timing.click_hold);
    steps.push(pointer(ButtonMask::empty(), x, y));
    steps
}

/// Move from `from` to `to` over `duration` with no buttons held.
pub fn move_pointer(from: (u16, u16), to: (u16, u16), duration: Duration) -> Vec<Step> {
    let n = (duration.as_millis() / MOVE_STEP.as_millis()).min(u128::from(MAX_MOVE_STEPS)) as u32;
    if n <= 1 {
        return vec![pointer(ButtonMask::empty(), to.0, to.1)];
    }

    let interval = duration / n;
    let lerp = |a: u16, b: u16, i: u32| -> u16 {
        let a = f64::from(a);
        let b = f64::from(b);
        (a + (b - a) * f64::from(i) / f64::from(n)).round() as u16
    };

    let mut steps = Vec::with_capacity(n as usize * 2);
    for i in 1..=n {
        steps.push(pointer(
            ButtonMask::empty(),
            lerp(from.0, to.0, i),
            lerp(from.1, to.1, i),
        ));
        if i < n {
            steps.push(Step::Pause(interval));
        }
    }
    steps
}

/// Key down then key up per character.
pub fn type_text(text: &str, timing: &InputTiming) -> Vec<Step> {
    let mut steps = Vec::with_capacity(text.chars().count() * 3);
    for (i, c) in text.chars().enumerate() {
        if i > 0 {
            pause(&mut steps, timing.type_delay);
        }
        let sym = keysym::character(c);
        steps.push(key(true, sym));
        steps.push(key(false, sym));
    }
    steps
}

/// Modifiers down in order, key down/up, modifiers up in reverse.
pub fn key_combination(combo: &KeyCombination) -> Vec<Step> {
    let mut steps = Vec::with_capacity(combo.modifiers.len() * 2 + 2);
    for m in &combo.modifiers {
        steps.push(key(true, keysym::modifier(*m)));
    }
    let sym = keysym::key(combo.key);
    steps.push(key(true, sym));
    steps.push(key(false, sym));
    for m in combo.modifiers.iter().rev() {
        steps.push(key(false, keysym::modifier(*m)));
    }
    steps
}

pub fn key_press(k: Key) -> Vec<Step> {
    let sym = keysym::key(k);
    vec![key(true, sym), key(false, sym)]
}

/// Final pointer position after `steps`, if any pointer event is in it.
pub fn final_pointer(steps: &[Step]) -> Option<(u16, u16)> {
    steps.iter().rev().find_map(|s| match s {
        Step::Send(ClientMessage::PointerEvent { x, y, .. }) => Some((*x, *y)),
        _ => None,
    })
}
