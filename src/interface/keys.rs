use crate::{
    error::{ComputerError, Result},
    models::OsType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKey {
    Enter,
    Tab,
    Space,
    Backspace,
    Delete,
    Escape,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    Insert,
    CapsLock,
    Shift,
    Control,
    Alt,
    Command,
    Fn,
    /// `command` on macOS, `ctrl` elsewhere.
    Primary,
    F(u8),
}

impl NamedKey {
    /// Looks up a symbolic name. Case, spaces, `_` and `-` are ignored so
    /// `page_down`, `PageDown` and `page down` are the same key.
    pub fn parse(name: &str) -> Option<Self> {
        let folded: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();

        let key = match folded.as_str() {
            "enter" | "return" | "ret" => Self::Enter,
            "tab" => Self::Tab,
            "space" | "spacebar" => Self::Space,
            "backspace" | "bksp" => Self::Backspace,
            "delete" | "del" | "forwarddelete" => Self::Delete,
            "escape" | "esc" => Self::Escape,
            "home" => Self::Home,
            "end" => Self::End,
            "pageup" | "pgup" => Self::PageUp,
            "pagedown" | "pgdn" | "pgdown" => Self::PageDown,
            "up" | "arrowup" | "uparrow" => Self::Up,
            "down" | "arrowdown" | "downarrow" => Self::Down,
            "left" | "arrowleft" | "leftarrow" => Self::Left,
            "right" | "arrowright" | "rightarrow" => Self::Right,
            "insert" | "ins" => Self::Insert,
            "capslock" | "caps" => Self::CapsLock,
            "shift" => Self::Shift,
            "ctrl" | "control" => Self::Control,
            "alt" | "option" | "opt" => Self::Alt,
            "cmd" | "command" | "super" | "meta" | "win" | "windows" => Self::Command,
            "fn" | "function" => Self::Fn,
            "primary" | "mod" => Self::Primary,
            other => {
                let n: u8 = other.strip_prefix('f')?.parse().ok()?;
                if (1..=12).contains(&n) {
                    Self::F(n)
                } else {
                    return None;
                }
            }
        };
        Some(key)
    }

    /// Name the computer server expects on the given platform.
    pub fn wire_name(&self, os: OsType) -> String {
        let name = match (self, os) {
            (Self::Enter, _) => "enter",
            (Self::Tab, _) => "tab",
            (Self::Space, _) => "space",
            (Self::Backspace, _) => "backspace",
            (Self::Delete, _) => "delete",
            (Self::Escape, _) => "escape",
            (Self::Home, _) => "home",
            (Self::End, _) => "end",
            (Self::PageUp, _) => "pageup",
            (Self::PageDown, _) => "pagedown",
            (Self::Up, _) => "up",
            (Self::Down, _) => "down",
            (Self::Left, _) => "left",
            (Self::Right, _) => "right",
            (Self::Insert, _) => "insert",
            (Self::CapsLock, _) => "capslock",
            (Self::Shift, _) => "shift",
            (Self::Control, _) => "ctrl",
            (Self::Alt, OsType::Macos) => "option",
            (Self::Alt, _) => "alt",
            (Self::Command, OsType::Macos) => "command",
            (Self::Command, _) => "super",
            (Self::Fn, _) => "fn",
            (Self::Primary, OsType::Macos) => "command",
            (Self::Primary, _) => "ctrl",
            (Self::F(n), _) => return format!("f{n}"),
        };
        name.to_string()
    }
}

/// Normalises a key given either as a symbolic name or a single raw
/// character. Raw characters pass through untouched, case included.
pub fn normalize_key(input: &str, os: OsType) -> Result<String> {
    let mut chars = input.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Ok(c.to_string());
    }
    NamedKey::parse(input)
        .map(|key| key.wire_name(os))
        .ok_or_else(|| ComputerError::command_failed("press_key", format!("unknown key '{input}'")))
}
