use crate::colors::TermColor;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Underline style variants as defined by SGR 4 sub-parameters and SGR 21.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnderlineStyle {
    #[default]
    None,
    Single,
    Double,
    Curly,
    Dotted,
    Dashed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CellAttributes {
    pub bold: bool,
    pub dim: bool,
    pub italic: bool,
    pub underline: UnderlineStyle,
    pub strikethrough: bool,
    pub blink: bool,
    pub inverse: bool,
    pub hidden: bool,
    pub underline_color: Option<TermColor>,
}

/// Width classification for a terminal cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CellWidth {
    /// Standard 1-column character.
    #[default]
    Normal,
    /// First cell of a 2-column character (CJK, emoji, etc.).
    Wide,
    /// Second cell of a 2-column character (placeholder, never rendered independently).
    Spacer,
}

/// One grid slot. Cells are plain values; no cell owns another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub c: char,
    /// Combining characters attached to this cell (e.g. diacritics).
    pub combining: SmallVec<[char; 2]>,
    pub fg: TermColor,
    pub bg: TermColor,
    pub attrs: CellAttributes,
    pub wide: CellWidth,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            c: ' ',
            combining: SmallVec::new(),
            fg: TermColor::Default,
            bg: TermColor::Default,
            attrs: CellAttributes::default(),
            wide: CellWidth::Normal,
        }
    }
}

impl Cell {
    /// True for a never-written slot: blank space with all-default styling.
    /// Used when trimming row padding during reflow.
    pub fn is_padding(&self) -> bool {
        self.c == ' '
            && self.combining.is_empty()
            && self.fg == TermColor::Default
            && self.bg == TermColor::Default
            && self.attrs == CellAttributes::default()
            && self.wide == CellWidth::Normal
    }
}

/// One physical row of the grid or the scrollback store: a fixed-width run of
/// cells plus a trailing continuation marker. `soft_wrapped` means the logical
/// line continues onto the next row; a hard newline leaves it false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub cells: Vec<Cell>,
    pub soft_wrapped: bool,
}

impl Row {
    pub fn blank(width: usize) -> Self {
        Self {
            cells: vec![Cell::default(); width],
            soft_wrapped: false,
        }
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }

    /// Number of cells up to and including the last non-padding cell.
    pub fn content_len(&self) -> usize {
        self.cells
            .iter()
            .rposition(|c| !c.is_padding())
            .map(|p| p + 1)
            .unwrap_or(0)
    }

    /// The row's text, trailing padding trimmed, spacer halves skipped.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for cell in &self.cells[..self.content_len()] {
            if cell.wide == CellWidth::Spacer {
                continue;
            }
            out.push(cell.c);
            for &comb in &cell.combining {
                out.push(comb);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CursorState {
    pub row: usize,
    pub col: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cell_is_padding() {
        assert!(Cell::default().is_padding());
    }

    #[test]
    fn written_space_with_background_is_not_padding() {
        let cell = Cell {
            bg: TermColor::Indexed(4),
            ..Cell::default()
        };
        assert!(!cell.is_padding());
    }

    #[test]
    fn content_len_trims_trailing_padding() {
        let mut row = Row::blank(10);
        row.cells[2].c = 'x';
        assert_eq!(row.content_len(), 3);
        assert_eq!(row.text(), "  x");
    }
}
