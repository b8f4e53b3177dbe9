//! Keystroke routing and PTY key encoding.
//!
//! Every keystroke is either a navigation action (handled by the app) or
//! input for the focused tab's PTY. The decision is a single binding
//! lookup on the normalised chord; everything unbound is encoded to the
//! byte sequence a terminal would send and written to the session.

use crate::keys::{Action, KeyBindings, normalize_key};

/// A key code, independent of the terminal backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum KeyCode {
    /// A character key.
    Char(char),
    /// Enter / Return.
    Enter,
    /// Tab.
    Tab,
    /// Backspace.
    Backspace,
    /// Delete.
    Delete,
    /// Insert.
    Insert,
    /// Escape.
    Escape,
    /// Arrow up.
    Up,
    /// Arrow down.
    Down,
    /// Arrow left.
    Left,
    /// Arrow right.
    Right,
    /// Home.
    Home,
    /// End.
    End,
    /// Page up.
    PageUp,
    /// Page down.
    PageDown,
    /// Function key (F1-F12).
    F(u8),
}

/// Keyboard modifier flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Modifiers(u8);

impl Modifiers {
    /// No modifiers.
    pub const NONE: Self = Self(0);
    /// Shift modifier.
    pub const SHIFT: Self = Self(1);
    /// Ctrl modifier.
    pub const CTRL: Self = Self(2);
    /// Alt/Option modifier.
    pub const ALT: Self = Self(4);
    /// Super/Command modifier.
    pub const SUPER: Self = Self(8);

    /// Check whether this set contains the given modifier.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0 && other.0 != 0
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A keystroke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    /// The key code.
    pub code: KeyCode,
    /// Active modifiers.
    pub modifiers: Modifiers,
}

impl KeyEvent {
    /// Create a key event.
    pub fn new(code: KeyCode, modifiers: Modifiers) -> Self {
        Self { code, modifiers }
    }

    /// A key event with no modifiers.
    pub fn plain(code: KeyCode) -> Self {
        Self::new(code, Modifiers::NONE)
    }

    /// The normalised chord string for binding lookup, e.g.
    /// `"ctrl+shift+tab"` or `"alt+3"`. `None` when the key has no
    /// chord representation (for example a bare modifier).
    pub fn chord(&self) -> Option<String> {
        let main = match self.code {
            KeyCode::Char(' ') => "space".to_string(),
            // Letter chords fold case; shift is already reflected in the
            // character crossterm reports.
            KeyCode::Char(c) => c.to_lowercase().to_string(),
            KeyCode::Enter => "enter".into(),
            KeyCode::Tab => "tab".into(),
            KeyCode::Backspace => "backspace".into(),
            KeyCode::Delete => "delete".into(),
            KeyCode::Insert => "insert".into(),
            KeyCode::Escape => "escape".into(),
            KeyCode::Up => "up".into(),
            KeyCode::Down => "down".into(),
            KeyCode::Left => "left".into(),
            KeyCode::Right => "right".into(),
            KeyCode::Home => "home".into(),
            KeyCode::End => "end".into(),
            KeyCode::PageUp => "pageup".into(),
            KeyCode::PageDown => "pagedown".into(),
            KeyCode::F(n) => format!("f{n}"),
        };

        let mut chord = String::new();
        if self.modifiers.contains(Modifiers::CTRL) {
            chord.push_str("ctrl+");
        }
        if self.modifiers.contains(Modifiers::ALT) {
            chord.push_str("alt+");
        }
        if self.modifiers.contains(Modifiers::SHIFT) && !matches!(self.code, KeyCode::Char(_)) {
            chord.push_str("shift+");
        }
        if self.modifiers.contains(Modifiers::SUPER) {
            chord.push_str("super+");
        }
        chord.push_str(&main);
        normalize_key(&chord).ok()
    }
}

impl From<crossterm::event::KeyEvent> for KeyEvent {
    fn from(ct: crossterm::event::KeyEvent) -> Self {
        use crossterm::event::KeyCode as Ct;
        let code = match ct.code {
            Ct::Char(c) => KeyCode::Char(c),
            Ct::Enter => KeyCode::Enter,
            Ct::Tab | Ct::BackTab => KeyCode::Tab,
            Ct::Backspace => KeyCode::Backspace,
            Ct::Delete => KeyCode::Delete,
            Ct::Insert => KeyCode::Insert,
            Ct::Esc => KeyCode::Escape,
            Ct::Up => KeyCode::Up,
            Ct::Down => KeyCode::Down,
            Ct::Left => KeyCode::Left,
            Ct::Right => KeyCode::Right,
            Ct::Home => KeyCode::Home,
            Ct::End => KeyCode::End,
            Ct::PageUp => KeyCode::PageUp,
            Ct::PageDown => KeyCode::PageDown,
            Ct::F(n) => KeyCode::F(n),
            _ => KeyCode::Escape,
        };
        let mut modifiers = Modifiers::NONE;
        if ct.modifiers.contains(crossterm::event::KeyModifiers::SHIFT)
            || matches!(ct.code, Ct::BackTab)
        {
            modifiers = modifiers | Modifiers::SHIFT;
        }
        if ct
            .modifiers
            .contains(crossterm::event::KeyModifiers::CONTROL)
        {
            modifiers = modifiers | Modifiers::CTRL;
        }
        if ct.modifiers.contains(crossterm::event::KeyModifiers::ALT) {
            modifiers = modifiers | Modifiers::ALT;
        }
        if ct.modifiers.contains(crossterm::event::KeyModifiers::SUPER) {
            modifiers = modifiers | Modifiers::SUPER;
        }
        Self { code, modifiers }
    }
}

/// Where a keystroke goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    /// Handled by the app as a navigation action.
    Navigate(Action),
    /// Written to the focused tab's PTY as these bytes.
    Forward(Vec<u8>),
    /// Neither bound nor encodable.
    Ignored,
}

/// Classifies keystrokes as app actions or PTY input.
#[derive(Clone, Debug, Default)]
pub struct InputRouter {
    bindings: KeyBindings,
    bracketed_paste: bool,
}

impl InputRouter {
    /// Create a router over a binding table.
    pub fn new(bindings: KeyBindings) -> Self {
        Self {
            bindings,
            bracketed_paste: false,
        }
    }

    /// The active bindings.
    pub fn bindings(&self) -> &KeyBindings {
        &self.bindings
    }

    /// Replace the binding table.
    pub fn set_bindings(&mut self, bindings: KeyBindings) {
        self.bindings = bindings;
    }

    /// Enable or disable bracketed-paste wrapping.
    pub fn set_bracketed_paste(&mut self, enabled: bool) {
        self.bracketed_paste = enabled;
    }

    /// Decide what to do with a keystroke.
    pub fn route(&self, event: &KeyEvent) -> RouteDecision {
        if let Some(chord) = event.chord() {
            if let Some(action) = self.bindings.action_for(&chord) {
                return RouteDecision::Navigate(action);
            }
        }
        match encode_key(event) {
            Some(bytes) => RouteDecision::Forward(bytes),
            None => RouteDecision::Ignored,
        }
    }

    /// Encode pasted text, wrapping it in bracketed-paste markers when
    /// that mode is enabled.
    pub fn encode_paste(&self, text: &str) -> Vec<u8> {
        if self.bracketed_paste {
            let mut bytes = b"\x1b[200~".to_vec();
            bytes.extend_from_slice(text.as_bytes());
            bytes.extend_from_slice(b"\x1b[201~");
            bytes
        } else {
            text.as_bytes().to_vec()
        }
    }
}

/// xterm modifier parameter: 1 + shift(1) + alt(2) + ctrl(4).
fn modifier_param(modifiers: Modifiers) -> u8 {
    let mut param = 1;
    if modifiers.contains(Modifiers::SHIFT) {
        param += 1;
    }
    if modifiers.contains(Modifiers::ALT) {
        param += 2;
    }
    if modifiers.contains(Modifiers::CTRL) {
        param += 4;
    }
    param
}

/// CSI sequence for a cursor-style key with final `letter`.
fn csi_key(letter: char, modifiers: Modifiers) -> Vec<u8> {
    let param = modifier_param(modifiers);
    if param == 1 {
        format!("\x1b[{letter}").into_bytes()
    } else {
        format!("\x1b[1;{param}{letter}").into_bytes()
    }
}

/// CSI tilde sequence for an editing key with number `n`.
fn tilde_key(n: u8, modifiers: Modifiers) -> Vec<u8> {
    let param = modifier_param(modifiers);
    if param == 1 {
        format!("\x1b[{n}~").into_bytes()
    } else {
        format!("\x1b[{n};{param}~").into_bytes()
    }
}

/// Translate a keystroke to the byte sequence a terminal would send.
///
/// Returns `None` for keys with no terminal representation.
pub fn encode_key(event: &KeyEvent) -> Option<Vec<u8>> {
    let mods = event.modifiers;
    let alt = mods.contains(Modifiers::ALT);

    let base: Vec<u8> = match event.code {
        KeyCode::Char(c) => {
            if mods.contains(Modifiers::CTRL) {
                let lower = c.to_ascii_lowercase();
                if lower.is_ascii_lowercase() {
                    vec![(lower as u8) & 0x1f]
                } else if c == ' ' {
                    vec![0x00]
                } else {
                    let mut buf = [0u8; 4];
                    c.encode_utf8(&mut buf).as_bytes().to_vec()
                }
            } else {
                let mut buf = [0u8; 4];
                c.encode_utf8(&mut buf).as_bytes().to_vec()
            }
        }
        KeyCode::Enter => b"\r".to_vec(),
        KeyCode::Tab => {
            if mods.contains(Modifiers::SHIFT) {
                b"\x1b[Z".to_vec()
            } else {
                b"\t".to_vec()
            }
        }
        KeyCode::Escape => b"\x1b".to_vec(),
        KeyCode::Backspace => b"\x7f".to_vec(),
        KeyCode::Up => csi_key('A', mods),
        KeyCode::Down => csi_key('B', mods),
        KeyCode::Right => csi_key('C', mods),
        KeyCode::Left => csi_key('D', mods),
        KeyCode::Home => csi_key('H', mods),
        KeyCode::End => csi_key('F', mods),
        KeyCode::Insert => tilde_key(2, mods),
        KeyCode::Delete => tilde_key(3, mods),
        KeyCode::PageUp => tilde_key(5, mods),
        KeyCode::PageDown => tilde_key(6, mods),
        KeyCode::F(n @ 1..=4) => {
            let param = modifier_param(mods);
            let letter = [b'P', b'Q', b'R', b'S'][usize::from(n - 1)];
            if param == 1 {
                vec![0x1b, b'O', letter]
            } else {
                format!("\x1b[1;{param}{}", letter as char).into_bytes()
            }
        }
        KeyCode::F(n @ 5..=12) => {
            let num = [15, 17, 18, 19, 20, 21, 23, 24][usize::from(n - 5)];
            tilde_key(num, mods)
        }
        KeyCode::F(_) => return None,
    };

    // Alt prefixes the base sequence with ESC, except for keys whose
    // CSI encoding already carries the modifier.
    let csi_carries_alt = matches!(
        event.code,
        KeyCode::Up
            | KeyCode::Down
            | KeyCode::Left
            | KeyCode::Right
            | KeyCode::Home
            | KeyCode::End
            | KeyCode::Insert
            | KeyCode::Delete
            | KeyCode::PageUp
            | KeyCode::PageDown
            | KeyCode::F(_)
    );
    if alt && !csi_carries_alt {
        let mut bytes = vec![0x1b];
        bytes.extend_from_slice(&base);
        Some(bytes)
    } else {
        Some(base)
    }
}
