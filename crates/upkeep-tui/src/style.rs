//! Cell style attributes.

use serde::{Deserialize, Serialize};

use crate::color::Color;

/// Style attributes of one terminal cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Style {
    /// Foreground color.
    pub fg: Color,
    /// Background color.
    pub bg: Color,
    /// Bold text (SGR 1).
    pub bold: bool,
    /// Italic text (SGR 3).
    pub italic: bool,
    /// Underlined text (SGR 4).
    pub underline: bool,
    /// Blinking text (SGR 5).
    pub blink: bool,
    /// Reverse video (SGR 7).
    pub reverse: bool,
    /// Strikethrough text (SGR 9).
    pub strikethrough: bool,
}

impl Style {
    /// Create a default style (default colors, no attributes).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the foreground color.
    #[must_use]
    pub fn fg(mut self, color: Color) -> Self {
        self.fg = color;
        self
    }

    /// Set the background color.
    #[must_use]
    pub fn bg(mut self, color: Color) -> Self {
        self.bg = color;
        self
    }

    /// Set bold.
    #[must_use]
    pub fn bold(mut self, val: bool) -> Self {
        self.bold = val;
        self
    }

    /// Set italic.
    #[must_use]
    pub fn italic(mut self, val: bool) -> Self {
        self.italic = val;
        self
    }

    /// Set underline.
    #[must_use]
    pub fn underline(mut self, val: bool) -> Self {
        self.underline = val;
        self
    }

    /// Set blink.
    #[must_use]
    pub fn blink(mut self, val: bool) -> Self {
        self.blink = val;
        self
    }

    /// Set reverse video.
    #[must_use]
    pub fn reverse(mut self, val: bool) -> Self {
        self.reverse = val;
        self
    }

    /// Set strikethrough.
    #[must_use]
    pub fn strikethrough(mut self, val: bool) -> Self {
        self.strikethrough = val;
        self
    }

    /// Returns true if no attribute differs from the default.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

impl From<&Style> for crossterm::style::ContentStyle {
    fn from(style: &Style) -> Self {
        use crossterm::style::{Attribute, ContentStyle};

        let mut cs = ContentStyle::new();
        if style.fg != Color::Default {
            cs.foreground_color = Some(style.fg.into());
        }
        if style.bg != Color::Default {
            cs.background_color = Some(style.bg.into());
        }
        if style.bold {
            cs.attributes.set(Attribute::Bold);
        }
        if style.italic {
            cs.attributes.set(Attribute::Italic);
        }
        if style.underline {
            cs.attributes.set(Attribute::Underlined);
        }
        if style.blink {
            cs.attributes.set(Attribute::SlowBlink);
        }
        if style.reverse {
            cs.attributes.set(Attribute::Reverse);
        }
        if style.strikethrough {
            cs.attributes.set(Attribute::CrossedOut);
        }
        cs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::NamedColor;

    #[test]
    fn builder_pattern() {
        let s = Style::new()
            .fg(Color::Named(NamedColor::Red))
            .bold(true)
            .strikethrough(true);
        assert_eq!(s.fg, Color::Named(NamedColor::Red));
        assert!(s.bold);
        assert!(s.strikethrough);
        assert!(!s.underline);
    }

    #[test]
    fn default_is_default() {
        assert!(Style::new().is_default());
        assert!(!Style::new().blink(true).is_default());
    }

    #[test]
    fn crossterm_conversion_skips_default_colors() {
        let cs: crossterm::style::ContentStyle = (&Style::new()).into();
        assert_eq!(cs.foreground_color, None);
        assert_eq!(cs.background_color, None);

        let styled = Style::new().fg(Color::Indexed(42));
        let cs: crossterm::style::ContentStyle = (&styled).into();
        assert_eq!(
            cs.foreground_color,
            Some(crossterm::style::Color::AnsiValue(42))
        );
    }
}
