//! upkeep-tui: terminal emulation, key routing, and tab state for the
//! upkeep update orchestrator.
//!
//! The crate covers the UI-facing half of the core: a VT-subset screen
//! emulator with styled cells and bounded scrollback, the configurable
//! key-binding table and input router, the batched event handler that
//! paces job output for rendering, and per-plugin tab state including the
//! metrics wiring.

pub mod cell;
pub mod color;
pub mod error;
pub mod handler;
pub mod input;
pub mod keys;
pub mod parser;
pub mod screen;
pub mod style;
pub mod tab;

pub use cell::Cell;
pub use color::{Color, NamedColor};
pub use error::{Result, TuiError};
pub use handler::{BatchedEventHandler, EventSink, HandlerConfig};
pub use input::{InputRouter, KeyCode, KeyEvent, Modifiers, RouteDecision, encode_key};
pub use keys::{Action, KeyBindings, normalize_key};
pub use parser::{Parser, TermAction};
pub use screen::{DEFAULT_SCROLLBACK, TerminalScreen};
pub use style::Style;
pub use tab::{ProgressState, TabRegistry, TabState, TabStatus};
