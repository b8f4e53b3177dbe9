//! A single cell of the terminal grid.

use unicode_width::UnicodeWidthStr;

use crate::style::Style;

/// One grid cell: a grapheme plus its style.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    /// The grapheme cluster displayed in this cell. Empty for the
    /// continuation half of a wide character.
    pub grapheme: String,
    /// Display style.
    pub style: Style,
    /// Display width: 1 for most characters, 2 for CJK/emoji, 0 for
    /// continuation cells.
    pub width: u8,
}

impl Cell {
    /// Create a cell, measuring the grapheme's display width.
    pub fn new(grapheme: impl Into<String>, style: Style) -> Self {
        let grapheme = grapheme.into();
        let width = UnicodeWidthStr::width(grapheme.as_str()).min(u8::MAX as usize) as u8;
        Self {
            grapheme,
            style,
            width,
        }
    }

    /// A blank cell: a space with default style.
    pub fn blank() -> Self {
        Self {
            grapheme: " ".into(),
            style: Style::default(),
            width: 1,
        }
    }

    /// The placeholder occupying the second column of a wide character.
    pub fn continuation(style: Style) -> Self {
        Self {
            grapheme: String::new(),
            style,
            width: 0,
        }
    }

    /// Whether this is the continuation half of a wide character.
    pub fn is_continuation(&self) -> bool {
        self.width == 0 && self.grapheme.is_empty()
    }

    /// Whether this cell holds a wide character.
    pub fn is_wide(&self) -> bool {
        self.width > 1
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{Color, NamedColor};

    #[test]
    fn ascii_cell_width() {
        let c = Cell::new("A", Style::default());
        assert_eq!(c.width, 1);
        assert!(!c.is_wide());
    }

    #[test]
    fn cjk_cell_is_wide() {
        let c = Cell::new("\u{4e16}", Style::default());
        assert_eq!(c.width, 2);
        assert!(c.is_wide());
    }

    #[test]
    fn continuation_cell() {
        let c = Cell::continuation(Style::default());
        assert!(c.is_continuation());
        assert_eq!(c.width, 0);
    }

    #[test]
    fn blank_is_default() {
        assert_eq!(Cell::default(), Cell::blank());
    }

    #[test]
    fn styled_cell_keeps_style() {
        let style = Style::new().fg(Color::Named(NamedColor::Red));
        let c = Cell::new("R", style);
        assert_eq!(c.style.fg, Color::Named(NamedColor::Red));
    }
}
