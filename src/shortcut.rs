//! GTK-style accelerator strings such as `<Ctrl><Alt>l` or `<Shift>F5`.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Stored lowercase.
    Char(char),
    Enter,
    Tab,
    Space,
    Backspace,
    F(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortcut {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub key: Key,
}

impl FromStr for Shortcut {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rest = s.trim();
        let (mut ctrl, mut alt, mut shift) = (false, false, false);

        while let Some(after) = rest.strip_prefix('<') {
            let Some(end) = after.find('>') else {
                anyhow::bail!("unterminated modifier in shortcut {s:?}");
            };
            match after[..end].to_ascii_lowercase().as_str() {
                "ctrl" | "control" | "primary" => ctrl = true,
                "alt" | "mod1" => alt = true,
                "shift" => shift = true,
                other => anyhow::bail!("unsupported modifier <{other}> in shortcut {s:?}"),
            }
            rest = &after[end + 1..];
        }

        let key = parse_key(rest).ok_or_else(|| anyhow::anyhow!("unsupported key {rest:?} in shortcut {s:?}"))?;
        Ok(Self {
            ctrl,
            alt,
            shift,
            key,
        })
    }
}

fn parse_key(name: &str) -> Option<Key> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return (!c.is_whitespace() && !c.is_control()).then(|| Key::Char(c.to_ascii_lowercase()));
    }

    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "return" | "enter" | "kp_enter" => Some(Key::Enter),
        "tab" => Some(Key::Tab),
        "space" => Some(Key::Space),
        "backspace" => Some(Key::Backspace),
        _ => {
            let n: u8 = lower.strip_prefix('f')?.parse().ok()?;
            (1..=24).contains(&n).then_some(Key::F(n))
        }
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("<Ctrl>")?;
        }
        if self.alt {
            f.write_str("<Alt>")?;
        }
        if self.shift {
            f.write_str("<Shift>")?;
        }
        match self.key {
            Key::Char(c) => write!(f, "{c}"),
            Key::Enter => f.write_str("Return"),
            Key::Tab => f.write_str("Tab"),
            Key::Space => f.write_str("space"),
            Key::Backspace => f.write_str("BackSpace"),
            Key::F(n) => write!(f, "F{n}"),
        }
    }
}

#[cfg(feature = "tui")]
impl Shortcut {
    pub fn matches(&self, ev: &crossterm::event::KeyEvent) -> bool {
        use crossterm::event::{KeyCode, KeyModifiers};

        let m = ev.modifiers;
        if m.contains(KeyModifiers::CONTROL) != self.ctrl || m.contains(KeyModifiers::ALT) != self.alt {
            return false;
        }
        match (self.key, ev.code) {
            // Terminals report shifted letters as uppercase, with or without SHIFT.
            (Key::Char(want), KeyCode::Char(got)) => {
                let shifted = m.contains(KeyModifiers::SHIFT) || got.is_ascii_uppercase();
                want == got.to_ascii_lowercase() && shifted == self.shift
            }
            (Key::Enter, KeyCode::Enter) => m.contains(KeyModifiers::SHIFT) == self.shift,
            (Key::Tab, KeyCode::Tab) => !self.shift,
            (Key::Tab, KeyCode::BackTab) => self.shift,
            (Key::Space, KeyCode::Char(' ')) => true,
            (Key::Backspace, KeyCode::Backspace) => true,
            (Key::F(n), KeyCode::F(got)) => n == got && m.contains(KeyModifiers::SHIFT) == self.shift,
            _ => false,
        }
    }
}
