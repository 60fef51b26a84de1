use serde::{Deserialize, Serialize};

/// Color of a cell's foreground or background. Rendering is out of scope;
/// the engine only stores what the escape stream asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermColor {
    #[default]
    Default,
    Named(NamedColor),
    Indexed(u8),
    Rgb(u8, u8, u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamedColor {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    BrightBlack,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
}

impl NamedColor {
    /// The color for an ANSI base index 0-7, optionally from the bright set.
    pub fn from_ansi(index: u8, bright: bool) -> Self {
        match (index & 7, bright) {
            (0, false) => Self::Black,
            (1, false) => Self::Red,
            (2, false) => Self::Green,
            (3, false) => Self::Yellow,
            (4, false) => Self::Blue,
            (5, false) => Self::Magenta,
            (6, false) => Self::Cyan,
            (7, false) => Self::White,
            (0, true) => Self::BrightBlack,
            (1, true) => Self::BrightRed,
            (2, true) => Self::BrightGreen,
            (3, true) => Self::BrightYellow,
            (4, true) => Self::BrightBlue,
            (5, true) => Self::BrightMagenta,
            (6, true) => Self::BrightCyan,
            _ => Self::BrightWhite,
        }
    }
}
