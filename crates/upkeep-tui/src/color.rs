//! Color types for terminal cells.

use serde::{Deserialize, Serialize};

/// A terminal color as produced by SGR sequences.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Color {
    /// The terminal's default foreground or background. Distinguishable
    /// from every concrete color.
    #[default]
    Default,
    /// Named ANSI color (SGR 30-37 / 40-47 and bright 90-97 / 100-107).
    Named(NamedColor),
    /// 256-color palette index (SGR 38;5;n / 48;5;n).
    Indexed(u8),
    /// True color RGB (SGR 38;2;r;g;b / 48;2;r;g;b).
    Rgb {
        /// Red component.
        r: u8,
        /// Green component.
        g: u8,
        /// Blue component.
        b: u8,
    },
}

/// The 16 standard ANSI colors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum NamedColor {
    /// Black (0).
    Black,
    /// Red (1).
    Red,
    /// Green (2).
    Green,
    /// Yellow (3).
    Yellow,
    /// Blue (4).
    Blue,
    /// Magenta (5).
    Magenta,
    /// Cyan (6).
    Cyan,
    /// White (7).
    White,
    /// Bright black / dark gray (8).
    BrightBlack,
    /// Bright red (9).
    BrightRed,
    /// Bright green (10).
    BrightGreen,
    /// Bright yellow (11).
    BrightYellow,
    /// Bright blue (12).
    BrightBlue,
    /// Bright magenta (13).
    BrightMagenta,
    /// Bright cyan (14).
    BrightCyan,
    /// Bright white (15).
    BrightWhite,
}

impl NamedColor {
    /// The basic color for an SGR offset 0-7 (as in 30-37 / 40-47).
    pub fn basic(offset: u16) -> Option<Self> {
        match offset {
            0 => Some(Self::Black),
            1 => Some(Self::Red),
            2 => Some(Self::Green),
            3 => Some(Self::Yellow),
            4 => Some(Self::Blue),
            5 => Some(Self::Magenta),
            6 => Some(Self::Cyan),
            7 => Some(Self::White),
            _ => None,
        }
    }

    /// The bright color for an SGR offset 0-7 (as in 90-97 / 100-107).
    pub fn bright(offset: u16) -> Option<Self> {
        match offset {
            0 => Some(Self::BrightBlack),
            1 => Some(Self::BrightRed),
            2 => Some(Self::BrightGreen),
            3 => Some(Self::BrightYellow),
            4 => Some(Self::BrightBlue),
            5 => Some(Self::BrightMagenta),
            6 => Some(Self::BrightCyan),
            7 => Some(Self::BrightWhite),
            _ => None,
        }
    }
}

impl From<Color> for crossterm::style::Color {
    fn from(color: Color) -> Self {
        match color {
            Color::Default => crossterm::style::Color::Reset,
            Color::Rgb { r, g, b } => crossterm::style::Color::Rgb { r, g, b },
            Color::Indexed(i) => crossterm::style::Color::AnsiValue(i),
            Color::Named(n) => match n {
                NamedColor::Black => crossterm::style::Color::Black,
                NamedColor::Red => crossterm::style::Color::DarkRed,
                NamedColor::Green => crossterm::style::Color::DarkGreen,
                NamedColor::Yellow => crossterm::style::Color::DarkYellow,
                NamedColor::Blue => crossterm::style::Color::DarkBlue,
                NamedColor::Magenta => crossterm::style::Color::DarkMagenta,
                NamedColor::Cyan => crossterm::style::Color::DarkCyan,
                NamedColor::White => crossterm::style::Color::Grey,
                NamedColor::BrightBlack => crossterm::style::Color::DarkGrey,
                NamedColor::BrightRed => crossterm::style::Color::Red,
                NamedColor::BrightGreen => crossterm::style::Color::Green,
                NamedColor::BrightYellow => crossterm::style::Color::Yellow,
                NamedColor::BrightBlue => crossterm::style::Color::Blue,
                NamedColor::BrightMagenta => crossterm::style::Color::Magenta,
                NamedColor::BrightCyan => crossterm::style::Color::Cyan,
                NamedColor::BrightWhite => crossterm::style::Color::White,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_differs_from_concrete_colors() {
        assert_ne!(Color::Default, Color::Named(NamedColor::Black));
        assert_ne!(Color::Default, Color::Indexed(0));
        assert_ne!(Color::Default, Color::Rgb { r: 0, g: 0, b: 0 });
    }

    #[test]
    fn basic_offsets() {
        assert_eq!(NamedColor::basic(1), Some(NamedColor::Red));
        assert_eq!(NamedColor::basic(7), Some(NamedColor::White));
        assert_eq!(NamedColor::basic(8), None);
    }

    #[test]
    fn bright_offsets() {
        assert_eq!(NamedColor::bright(0), Some(NamedColor::BrightBlack));
        assert_eq!(NamedColor::bright(7), Some(NamedColor::BrightWhite));
        assert_eq!(NamedColor::bright(9), None);
    }

    #[test]
    fn crossterm_conversion() {
        let ct: crossterm::style::Color = Color::Rgb { r: 1, g: 2, b: 3 }.into();
        assert_eq!(ct, crossterm::style::Color::Rgb { r: 1, g: 2, b: 3 });
        let ct: crossterm::style::Color = Color::Default.into();
        assert_eq!(ct, crossterm::style::Color::Reset);
    }
}
