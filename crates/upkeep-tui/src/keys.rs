//! Configurable key bindings.
//!
//! Key strings are normalised (lowercase, alias folding, canonical
//! modifier order) before lookup, so `"Ctrl+Shift+Tab"`, `"shift+ctrl+tab"`
//! and `"ctrl+shift+tab"` all name the same chord. Bindings load from a
//! TOML file with `[tab_navigation]`, `[terminal]` and `[app]` tables; a
//! broken file falls back to the defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Result, TuiError};

/// A UI action that can be bound to a key.
///
/// Every action here is a navigation action: when the focused tab's key
/// matches one, the app handles it and nothing is written to the PTY.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum Action {
    /// Focus the next tab.
    NextTab,
    /// Focus the previous tab.
    PrevTab,
    /// Focus tab N (1-9).
    Tab(u8),
    /// Quit the application.
    Quit,
    /// Show the help overlay.
    Help,
    /// Scroll the focused tab up one page.
    ScrollUp,
    /// Scroll the focused tab down one page.
    ScrollDown,
    /// Scroll the focused tab to the top of history.
    ScrollTop,
    /// Scroll the focused tab to the live tail.
    ScrollBottom,
    /// Toggle pause-between-phases for the focused job.
    PauseResume,
    /// Retry the focused job's failed phase.
    RetryPhase,
    /// Save the focused tab's output to a log file.
    SaveLogs,
    /// Show the key-binding help.
    ShowHelp,
}

impl Action {
    /// All actions, used when building default tables.
    pub const ALL: [Action; 21] = [
        Action::NextTab,
        Action::PrevTab,
        Action::Tab(1),
        Action::Tab(2),
        Action::Tab(3),
        Action::Tab(4),
        Action::Tab(5),
        Action::Tab(6),
        Action::Tab(7),
        Action::Tab(8),
        Action::Tab(9),
        Action::Quit,
        Action::Help,
        Action::ScrollUp,
        Action::ScrollDown,
        Action::ScrollTop,
        Action::ScrollBottom,
        Action::PauseResume,
        Action::RetryPhase,
        Action::SaveLogs,
        Action::ShowHelp,
    ];

    /// The configuration name of this action.
    pub fn name(self) -> String {
        match self {
            Action::NextTab => "next_tab".into(),
            Action::PrevTab => "prev_tab".into(),
            Action::Tab(n) => format!("tab_{n}"),
            Action::Quit => "quit".into(),
            Action::Help => "help".into(),
            Action::ScrollUp => "scroll_up".into(),
            Action::ScrollDown => "scroll_down".into(),
            Action::ScrollTop => "scroll_top".into(),
            Action::ScrollBottom => "scroll_bottom".into(),
            Action::PauseResume => "pause_resume".into(),
            Action::RetryPhase => "retry_phase".into(),
            Action::SaveLogs => "save_logs".into(),
            Action::ShowHelp => "show_help".into(),
        }
    }

    /// The config-file table this action belongs to.
    fn section(self) -> &'static str {
        match self {
            Action::NextTab | Action::PrevTab | Action::Tab(_) => "tab_navigation",
            Action::ScrollUp | Action::ScrollDown | Action::ScrollTop | Action::ScrollBottom => {
                "terminal"
            }
            _ => "app",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Action {
    type Err = TuiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(n) = s.strip_prefix("tab_") {
            if let Ok(n) = n.parse::<u8>() {
                if (1..=9).contains(&n) {
                    return Ok(Action::Tab(n));
                }
            }
        }
        match s {
            "next_tab" => Ok(Action::NextTab),
            "prev_tab" => Ok(Action::PrevTab),
            "quit" => Ok(Action::Quit),
            "help" => Ok(Action::Help),
            "scroll_up" => Ok(Action::ScrollUp),
            "scroll_down" => Ok(Action::ScrollDown),
            "scroll_top" => Ok(Action::ScrollTop),
            "scroll_bottom" => Ok(Action::ScrollBottom),
            "pause_resume" => Ok(Action::PauseResume),
            "retry_phase" => Ok(Action::RetryPhase),
            "save_logs" => Ok(Action::SaveLogs),
            "show_help" => Ok(Action::ShowHelp),
            other => Err(TuiError::Binding(format!("unknown action: {other}"))),
        }
    }
}

/// Aliases folded during normalisation.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("esc", "escape"),
    ("return", "enter"),
    ("cr", "enter"),
    ("lf", "enter"),
    ("del", "delete"),
    ("bs", "backspace"),
    ("pgup", "pageup"),
    ("pgdn", "pagedown"),
    ("pgdown", "pagedown"),
    ("ins", "insert"),
    ("spacebar", "space"),
];

/// Modifiers in canonical order.
const MODIFIER_ORDER: &[&str] = &["ctrl", "alt", "shift", "meta", "super", "cmd"];

/// Non-character keys accepted as the main key of a chord.
const SPECIAL_KEYS: &[&str] = &[
    "escape", "enter", "tab", "space", "backspace", "delete", "insert", "home", "end", "pageup",
    "pagedown", "up", "down", "left", "right",
];

/// Normalise a key string to canonical form.
///
/// # Errors
///
/// Returns [`TuiError::Binding`] for empty strings, unknown main keys,
/// or chords with more than one main key.
pub fn normalize_key(key: &str) -> Result<String> {
    let key = key.trim().to_lowercase();
    if key.is_empty() {
        return Err(TuiError::Binding("key cannot be empty".into()));
    }

    let mut modifiers: Vec<&str> = Vec::new();
    let mut main: Option<String> = None;

    for part in key.split('+') {
        let part = part.trim();
        if part.is_empty() {
            return Err(TuiError::Binding(format!("invalid key format: {key}")));
        }
        let part = KEY_ALIASES
            .iter()
            .find(|(alias, _)| *alias == part)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(part);

        if let Some(index) = MODIFIER_ORDER.iter().position(|m| *m == part) {
            modifiers.push(MODIFIER_ORDER[index]);
        } else if main.is_none() {
            main = Some(part.to_string());
        } else {
            return Err(TuiError::Binding(format!("multiple main keys in: {key}")));
        }
    }

    let Some(main) = main else {
        return Err(TuiError::Binding(format!("no main key in: {key}")));
    };

    let is_function_key = main
        .strip_prefix('f')
        .and_then(|n| n.parse::<u8>().ok())
        .is_some_and(|n| (1..=12).contains(&n));
    if main.chars().count() > 1 && !SPECIAL_KEYS.contains(&main.as_str()) && !is_function_key {
        return Err(TuiError::Binding(format!("invalid key: {main}")));
    }

    modifiers.sort_by_key(|m| MODIFIER_ORDER.iter().position(|o| o == m));
    modifiers.dedup();

    if modifiers.is_empty() {
        Ok(main)
    } else {
        Ok(format!("{}+{}", modifiers.join("+"), main))
    }
}

/// Default bindings: `(action, key, is_primary)`. Non-primary entries
/// are alternates that trigger the same action.
fn default_bindings() -> Vec<(Action, &'static str, bool)> {
    vec![
        (Action::NextTab, "ctrl+tab", true),
        (Action::PrevTab, "ctrl+shift+tab", true),
        (Action::Tab(1), "alt+1", true),
        (Action::Tab(2), "alt+2", true),
        (Action::Tab(3), "alt+3", true),
        (Action::Tab(4), "alt+4", true),
        (Action::Tab(5), "alt+5", true),
        (Action::Tab(6), "alt+6", true),
        (Action::Tab(7), "alt+7", true),
        (Action::Tab(8), "alt+8", true),
        (Action::Tab(9), "alt+9", true),
        (Action::Quit, "ctrl+q", true),
        (Action::Help, "f1", true),
        (Action::ScrollUp, "shift+pageup", true),
        (Action::ScrollDown, "shift+pagedown", true),
        (Action::ScrollTop, "shift+home", true),
        (Action::ScrollBottom, "shift+end", true),
        (Action::PauseResume, "ctrl+p", true),
        (Action::PauseResume, "f8", false),
        (Action::RetryPhase, "ctrl+r", true),
        (Action::RetryPhase, "f9", false),
        (Action::SaveLogs, "ctrl+s", true),
        (Action::SaveLogs, "f10", false),
        (Action::ShowHelp, "ctrl+h", true),
    ]
}

/// Raw shape of the bindings file.
#[derive(Debug, Default, Deserialize)]
struct BindingsFile {
    #[serde(default)]
    tab_navigation: BTreeMap<String, toml::Value>,
    #[serde(default)]
    terminal: BTreeMap<String, toml::Value>,
    #[serde(default)]
    app: BTreeMap<String, toml::Value>,
}

/// The active key-binding table.
#[derive(Clone, Debug)]
pub struct KeyBindings {
    key_to_action: BTreeMap<String, Action>,
    primary_key: BTreeMap<Action, String>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let mut bindings = Self {
            key_to_action: BTreeMap::new(),
            primary_key: BTreeMap::new(),
        };
        for (action, key, primary) in default_bindings() {
            if let Ok(normalized) = normalize_key(key) {
                bindings.key_to_action.insert(normalized.clone(), action);
                if primary {
                    bindings.primary_key.insert(action, normalized);
                }
            }
        }
        bindings
    }
}

impl KeyBindings {
    /// Load bindings from a TOML file, layering overrides onto the
    /// defaults. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TuiError::Binding`] for unreadable or malformed files
    /// and invalid action or key names; callers typically fall back to
    /// [`KeyBindings::default`] and warn once.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .map_err(|e| TuiError::Binding(format!("read {}: {e}", path.display())))?;
        let file: BindingsFile = toml::from_str(&data)
            .map_err(|e| TuiError::Binding(format!("parse {}: {e}", path.display())))?;

        let mut bindings = Self::default();
        for table in [&file.tab_navigation, &file.terminal, &file.app] {
            for (action_name, value) in table {
                let action: Action = action_name.parse()?;
                match value {
                    toml::Value::String(key) if key.eq_ignore_ascii_case("none") => {
                        bindings.unbind(action);
                    }
                    toml::Value::String(key) => bindings.bind(key, action)?,
                    _ => {
                        return Err(TuiError::Binding(format!(
                            "binding for {action_name} must be a string"
                        )));
                    }
                }
            }
        }
        Ok(bindings)
    }

    /// Save the current bindings grouped into the three tables.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut sections: BTreeMap<&str, Vec<(String, String)>> = BTreeMap::new();
        for (action, key) in &self.primary_key {
            sections
                .entry(action.section())
                .or_default()
                .push((action.name(), key.clone()));
        }
        let mut out = String::new();
        for section in ["tab_navigation", "terminal", "app"] {
            let Some(entries) = sections.get(section) else { continue };
            out.push_str(&format!("[{section}]\n"));
            for (action, key) in entries {
                out.push_str(&format!("{action} = \"{key}\"\n"));
            }
            out.push('\n');
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TuiError::Binding(format!("create {}: {e}", parent.display())))?;
        }
        std::fs::write(path, out)
            .map_err(|e| TuiError::Binding(format!("write {}: {e}", path.display())))?;
        Ok(())
    }

    /// Bind a key to an action, replacing the action's previous primary
    /// binding and any previous owner of the key.
    pub fn bind(&mut self, key: &str, action: Action) -> Result<()> {
        let normalized = normalize_key(key)?;
        if let Some(old_key) = self.primary_key.get(&action).cloned() {
            self.key_to_action.remove(&old_key);
        }
        self.key_to_action.insert(normalized.clone(), action);
        self.primary_key.insert(action, normalized);
        Ok(())
    }

    /// Remove every key bound to an action.
    pub fn unbind(&mut self, action: Action) {
        self.key_to_action.retain(|_, a| *a != action);
        self.primary_key.remove(&action);
    }

    /// The action bound to a key, if any. Invalid key strings are simply
    /// unbound.
    pub fn action_for(&self, key: &str) -> Option<Action> {
        let normalized = normalize_key(key).ok()?;
        self.key_to_action.get(&normalized).copied()
    }

    /// The primary key bound to an action.
    pub fn key_for(&self, action: Action) -> Option<&str> {
        self.primary_key.get(&action).map(String::as_str)
    }

    /// All `(action, primary key)` pairs.
    pub fn list_all(&self) -> Vec<(Action, String)> {
        self.primary_key
            .iter()
            .map(|(a, k)| (*a, k.clone()))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn normalize_case_and_order() {
        assert_eq!(normalize_key("Ctrl+Tab").unwrap(), "ctrl+tab");
        assert_eq!(normalize_key("shift+ctrl+tab").unwrap(), "ctrl+shift+tab");
        assert_eq!(normalize_key("ALT+SHIFT+CTRL+x").unwrap(), "ctrl+alt+shift+x");
    }

    #[test]
    fn normalize_aliases() {
        assert_eq!(normalize_key("esc").unwrap(), "escape");
        assert_eq!(normalize_key("return").unwrap(), "enter");
        assert_eq!(normalize_key("ctrl+pgup").unwrap(), "ctrl+pageup");
        assert_eq!(normalize_key("del").unwrap(), "delete");
    }

    #[test]
    fn normalize_rejects_bad_input() {
        assert!(normalize_key("").is_err());
        assert!(normalize_key("ctrl+").is_err());
        assert!(normalize_key("ctrl++a").is_err());
        assert!(normalize_key("a+b").is_err());
        assert!(normalize_key("notakey").is_err());
        assert!(normalize_key("f13").is_err());
    }

    #[test]
    fn function_keys_are_valid() {
        assert_eq!(normalize_key("F1").unwrap(), "f1");
        assert_eq!(normalize_key("f12").unwrap(), "f12");
    }

    #[test]
    fn default_lookups() {
        let b = KeyBindings::default();
        assert_eq!(b.action_for("ctrl+tab"), Some(Action::NextTab));
        assert_eq!(b.action_for("Ctrl+Shift+Tab"), Some(Action::PrevTab));
        assert_eq!(b.action_for("alt+3"), Some(Action::Tab(3)));
        assert_eq!(b.action_for("ctrl+q"), Some(Action::Quit));
        assert_eq!(b.action_for("f1"), Some(Action::Help));
        assert_eq!(b.action_for("shift+pageup"), Some(Action::ScrollUp));
        assert_eq!(b.action_for("ctrl+x"), None);
    }

    #[test]
    fn alternate_bindings_share_the_action() {
        let b = KeyBindings::default();
        assert_eq!(b.action_for("ctrl+p"), Some(Action::PauseResume));
        assert_eq!(b.action_for("f8"), Some(Action::PauseResume));
        assert_eq!(b.action_for("ctrl+r"), Some(Action::RetryPhase));
        assert_eq!(b.action_for("f9"), Some(Action::RetryPhase));
        assert_eq!(b.action_for("ctrl+s"), Some(Action::SaveLogs));
        assert_eq!(b.action_for("f10"), Some(Action::SaveLogs));
        // Primary keys win for reverse lookup.
        assert_eq!(b.key_for(Action::PauseResume), Some("ctrl+p"));
    }

    #[test]
    fn bind_replaces_previous_binding() {
        let mut b = KeyBindings::default();
        b.bind("alt+n", Action::NextTab).unwrap();
        assert_eq!(b.action_for("alt+n"), Some(Action::NextTab));
        assert_eq!(b.action_for("ctrl+tab"), None);
    }

    #[test]
    fn unbind_disables_an_action() {
        let mut b = KeyBindings::default();
        b.unbind(Action::Quit);
        assert_eq!(b.action_for("ctrl+q"), None);
        assert_eq!(b.key_for(Action::Quit), None);
    }

    #[test]
    fn round_trip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keybindings.toml");

        let mut b = KeyBindings::default();
        b.bind("alt+n", Action::NextTab).unwrap();
        b.save(&path).unwrap();

        let loaded = KeyBindings::load(&path).unwrap();
        assert_eq!(loaded.action_for("alt+n"), Some(Action::NextTab));
        assert_eq!(loaded.action_for("ctrl+q"), Some(Action::Quit));
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let b = KeyBindings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(b.action_for("ctrl+q"), Some(Action::Quit));
    }

    #[test]
    fn load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keybindings.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        assert!(KeyBindings::load(&path).is_err());
    }

    #[test]
    fn load_rejects_unknown_action() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keybindings.toml");
        std::fs::write(&path, "[app]\nlaunch_missiles = \"ctrl+m\"\n").unwrap();
        assert!(KeyBindings::load(&path).is_err());
    }

    #[test]
    fn load_can_disable_a_binding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keybindings.toml");
        std::fs::write(&path, "[app]\nquit = \"none\"\n").unwrap();
        let b = KeyBindings::load(&path).unwrap();
        assert_eq!(b.action_for("ctrl+q"), None);
    }

    #[test]
    fn action_name_round_trip() {
        for action in Action::ALL {
            assert_eq!(action.name().parse::<Action>().ok(), Some(action));
        }
    }
}
