//! Structured action requests and their validation.
//!
//! Everything a client (or the planning service) can ask the backend to
//! do is an [`ActionRequest`]. Requests are built only through
//! validation, so a value of this type never carries a negative
//! coordinate, an unknown button or a malformed key combination, and no
//! protocol I/O happens before that check.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

// ── Mouse ────────────────────────────────────────────────────────

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn parse(name: &str) -> Result<Self, BridgeError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "middle" => Ok(Self::Middle),
            other => Err(BridgeError::InvalidActionRequest(format!(
                "button must be left, right or middle (got {other:?})"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Middle => "middle",
        }
    }
}

// ── Keys ─────────────────────────────────────────────────────────

/// Modifier keys allowed in a key combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Cmd,
    Meta,
}

impl Modifier {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ctrl" | "control" => Some(Self::Ctrl),
            "alt" | "option" => Some(Self::Alt),
            "shift" => Some(Self::Shift),
            "cmd" | "command" | "super" | "win" => Some(Self::Cmd),
            "meta" => Some(Self::Meta),
            _ => None,
        }
    }
}

/// Keys with a name instead of a printable character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Space,
    /// F1..=F12
    F(u8),
}

/// A single terminal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Named(NamedKey),
    Char(char),
}

impl Key {
    /// Parse a key name (case-insensitive) or a single character.
    pub fn parse(name: &str) -> Result<Self, BridgeError> {
        let trimmed = name.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Ok(Self::Char(c));
        }

        let lower = trimmed.to_ascii_lowercase();
        let named = match lower.as_str() {
            "enter" | "return" => NamedKey::Enter,
            "tab" => NamedKey::Tab,
            "escape" | "esc" => NamedKey::Escape,
            "backspace" => NamedKey::Backspace,
            "delete" | "del" => NamedKey::Delete,
            "up" => NamedKey::Up,
            "down" => NamedKey::Down,
            "left" => NamedKey::Left,
            "right" => NamedKey::Right,
            "home" => NamedKey::Home,
            "end" => NamedKey::End,
            "pageup" => NamedKey::PageUp,
            "pagedown" => NamedKey::PageDown,
            "insert" => NamedKey::Insert,
            "space" => NamedKey::Space,
            f if f.starts_with('f') => match f[1..].parse::<u8>() {
                Ok(n @ 1..=12) => NamedKey::F(n),
                _ => return Err(BridgeError::UnsupportedKey(trimmed.to_string())),
            },
            _ => return Err(BridgeError::UnsupportedKey(trimmed.to_string())),
        };
        Ok(Self::Named(named))
    }
}

/// `modifier(+modifier)*+key`, at least one modifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombination {
    pub modifiers: Vec<Modifier>,
    pub key: Key,
}

impl KeyCombination {
    pub fn parse(keys: &str) -> Result<Self, BridgeError> {
        let invalid = |why: &str| BridgeError::InvalidActionRequest(format!("{why}: {keys:?}"));

        let parts: Vec<String> = keys
            .split('+')
            .map(|p| p.trim().to_ascii_lowercase())
            .collect();
        if parts.iter().any(String::is_empty) {
            return Err(invalid("empty key in combination"));
        }
        let Some((last, leading)) = parts.split_last() else {
            return Err(invalid("empty key combination"));
        };
        if leading.is_empty() {
            return Err(invalid("key combination needs a modifier and a key"));
        }

        let mut modifiers = Vec::with_capacity(leading.len());
        for name in leading {
            let m = Modifier::parse(name).ok_or_else(|| invalid("unknown modifier"))?;
            if !modifiers.contains(&m) {
                modifiers.push(m);
            }
        }

        if Modifier::parse(last).is_some() {
            return Err(invalid("key combination must end with a non-modifier key"));
        }
        // Keep the original case for single characters ("ctrl+C").
        let raw_last = keys.rsplit('+').next().unwrap_or_default();
        let key = Key::parse(raw_last)?;

        Ok(Self { modifiers, key })
    }
}

// ── ActionRequest ────────────────────────────────────────────────

/// A validated client instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequest {
    Click {
        x: u16,
        y: u16,
        button: MouseButton,
    },
    Type {
        text: String,
    },
    KeyCombination(KeyCombination),
    KeyPress(Key),
    Move {
        x: u16,
        y: u16,
        duration: Duration,
    },
    Screenshot,
}

impl ActionRequest {
    pub fn click(x: i64, y: i64, button: &str) -> Result<Self, BridgeError> {
        Ok(Self::Click {
            x: coordinate("x", x)?,
            y: coordinate("y", y)?,
            button: MouseButton::parse(button)?,
        })
    }

    pub fn type_text(text: impl Into<String>) -> Result<Self, BridgeError> {
        Ok(Self::Type { text: text.into() })
    }

    pub fn key_combination(keys: &str) -> Result<Self, BridgeError> {
        KeyCombination::parse(keys).map(Self::KeyCombination)
    }

    pub fn key_press(key: &str) -> Result<Self, BridgeError> {
        Key::parse(key).map(Self::KeyPress)
    }

    pub fn move_to(x: i64, y: i64, duration_secs: f64) -> Result<Self, BridgeError> {
        if !duration_secs.is_finite() || duration_secs < 0.0 {
            return Err(BridgeError::InvalidActionRequest(format!(
                "duration must be a non-negative number of seconds (got {duration_secs})"
            )));
        }
        Ok(Self::Move {
            x: coordinate("x", x)?,
            y: coordinate("y", y)?,
            duration: Duration::from_secs_f64(duration_secs.min(60.0)),
        })
    }

    /// Name used in `action_result` responses.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::KeyCombination(_) => "key_combination",
            Self::KeyPress(_) => "key_press",
            Self::Move { .. } => "move",
            Self::Screenshot => "screenshot",
        }
    }
}

fn coordinate(axis: &str, value: i64) -> Result<u16, BridgeError> {
    u16::try_from(value).map_err(|_| {
        BridgeError::InvalidActionRequest(format!(
            "{axis} must be between 0 and {} (got {value})",
            u16::MAX
        ))
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_c_decodes() {
        let combo = KeyCombination::parse("ctrl+c").unwrap();
        assert_eq!(combo.modifiers, vec![Modifier::Ctrl]);
        assert_eq!(combo.key, Key::Char('c'));
    }

    #[test]
    fn bare_key_is_invalid() {
        let err = KeyCombination::parse("shift").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidActionRequest(_)));
        let err = KeyCombination::parse("a").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidActionRequest(_)));
    }

    #[test]
    fn combination_shapes() {
        let combo = KeyCombination::parse("Ctrl + Shift + Tab").unwrap();
        assert_eq!(combo.modifiers, vec![Modifier::Ctrl, Modifier::Shift]);
        assert_eq!(combo.key, Key::Named(NamedKey::Tab));

        assert_eq!(
            KeyCombination::parse("cmd+C").unwrap().key,
            Key::Char('C')
        );
        assert!(matches!(
            KeyCombination::parse("ctrl+shift"),
            Err(BridgeError::InvalidActionRequest(_))
        ));
        assert!(matches!(
            KeyCombination::parse("ctrl++"),
            Err(BridgeError::InvalidActionRequest(_))
        ));
        assert!(matches!(
            KeyCombination::parse("hyper+c"),
            Err(BridgeError::InvalidActionRequest(_))
        ));
        assert!(matches!(
            KeyCombination::parse("ctrl+banana"),
            Err(BridgeError::UnsupportedKey(_))
        ));
    }

    #[test]
    fn named_keys() {
        assert_eq!(Key::parse("Enter").unwrap(), Key::Named(NamedKey::Enter));
        assert_eq!(Key::parse("f5").unwrap(), Key::Named(NamedKey::F(5)));
        assert!(matches!(Key::parse("f13"), Err(BridgeError::UnsupportedKey(_))));
        assert!(matches!(Key::parse("launch"), Err(BridgeError::UnsupportedKey(_))));
    }

    #[test]
    fn click_validation() {
        assert_eq!(
            ActionRequest::click(500, 425, "left").unwrap(),
            ActionRequest::Click {
                x: 500,
                y: 425,
                button: MouseButton::Left
            }
        );
        assert!(ActionRequest::click(-1, 0, "left").is_err());
        assert!(ActionRequest::click(0, 70_000, "left").is_err());
        assert!(matches!(
            ActionRequest::click(1, 1, "thumb"),
            Err(BridgeError::InvalidActionRequest(_))
        ));
    }

    #[test]
    fn move_validation() {
        let ActionRequest::Move { duration, .. } = ActionRequest::move_to(10, 20, 0.5).unwrap()
        else {
            panic!("expected move");
        };
        assert_eq!(duration, Duration::from_millis(500));
        assert!(ActionRequest::move_to(10, 20, -1.0).is_err());
        assert!(ActionRequest::move_to(10, 20, f64::NAN).is_err());
    }
}
