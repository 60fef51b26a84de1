use crate::cell::{Cell, CellAttributes, CellWidth, CursorState, Row};
use crate::colors::TermColor;
use crate::scrollback::LineBuffer;
use smallvec::SmallVec;
use unicode_width::UnicodeWidthChar;

/// The visible W×H character matrix plus cursor and scroll-region state.
///
/// The grid never owns scrollback: operations that can push rows off the top
/// take a `&mut LineBuffer` sink, so the caller keeps absolute line numbering
/// and annotation eviction in one place. Invariant: `rows.len() == height`
/// and every row is `width` cells wide, except transiently inside a resize.
///
/// The grid marks affected rows dirty; it never decides what or when to
/// redraw.
#[derive(Debug, Clone)]
pub struct Grid {
    rows: Vec<Row>,
    width: usize,
    height: usize,
    pub cursor: CursorState,
    /// Wrote the last column but has not wrapped yet (deferred autowrap).
    pending_wrap: bool,
    scroll_top: usize,
    scroll_bottom: usize,
    saved_cursor: Option<(usize, usize)>,
    pub current_attrs: CellAttributes,
    pub current_fg: TermColor,
    pub current_bg: TermColor,
    tab_stops: Vec<bool>,
    row_dirty: Vec<bool>,
    any_dirty: bool,
    auto_wrap: bool,
    origin_mode: bool,
    /// Last printed character, for REP (CSI Pb b).
    last_char: char,
}

impl Grid {
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            rows: (0..height).map(|_| Row::blank(width)).collect(),
            width,
            height,
            cursor: CursorState::default(),
            pending_wrap: false,
            scroll_top: 0,
            scroll_bottom: height - 1,
            saved_cursor: None,
            current_attrs: CellAttributes::default(),
            current_fg: TermColor::Default,
            current_bg: TermColor::Default,
            tab_stops: default_tab_stops(width),
            row_dirty: vec![true; height],
            any_dirty: true,
            auto_wrap: true,
            origin_mode: false,
            last_char: ' ',
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// The row's text with trailing padding trimmed, for tests and search.
    pub fn row_text(&self, index: usize) -> String {
        self.rows.get(index).map(Row::text).unwrap_or_default()
    }

    pub fn scroll_region(&self) -> (usize, usize) {
        (self.scroll_top, self.scroll_bottom)
    }

    // -- Per-row dirty tracking --

    pub fn is_any_dirty(&self) -> bool {
        self.any_dirty
    }

    /// Out-of-bounds rows are considered dirty (safe default).
    pub fn is_row_dirty(&self, row: usize) -> bool {
        self.row_dirty.get(row).copied().unwrap_or(true)
    }

    pub fn clear_dirty(&mut self) {
        self.row_dirty.fill(false);
        self.any_dirty = false;
    }

    pub fn mark_row_dirty(&mut self, row: usize) {
        if row < self.row_dirty.len() {
            self.row_dirty[row] = true;
        }
        self.any_dirty = true;
    }

    pub fn mark_all_dirty(&mut self) {
        self.row_dirty.fill(true);
        self.any_dirty = true;
    }

    // -- Character placement --

    /// Write a character at the cursor and advance. Handles wide (CJK/emoji)
    /// characters occupying two columns, zero-width combining characters, and
    /// wrap-on-overflow: wrapping sets the overflowed row's trailing
    /// continuation mark and scrolls the region when at its bottom.
    pub fn write_char(&mut self, c: char, history: &mut LineBuffer) {
        let width = UnicodeWidthChar::width(c).unwrap_or(0);

        // Zero-width: attach to the previously written cell.
        if width == 0 {
            let row = self.cursor.row.min(self.height - 1);
            let target = self.cursor.col.saturating_sub(1).min(self.width - 1);
            let attach = if target > 0 && self.rows[row].cells[target].wide == CellWidth::Spacer {
                target - 1
            } else {
                target
            };
            self.rows[row].cells[attach].combining.push(c);
            self.mark_row_dirty(row);
            return;
        }

        if self.pending_wrap {
            self.wrap_to_next_row(history);
        }

        // Wide char at the last column: no room for the spacer, wrap early.
        if width == 2 && self.cursor.col + 1 >= self.width && self.auto_wrap {
            self.wrap_to_next_row(history);
        }

        let row = self.cursor.row.min(self.height - 1);
        let col = if width == 2 {
            self.cursor.col.min(self.width.saturating_sub(2))
        } else {
            self.cursor.col.min(self.width - 1)
        };

        self.clear_wide_pair_at(row, col);
        if width == 2 && col + 1 < self.width {
            self.clear_wide_pair_at(row, col + 1);
        }

        self.rows[row].cells[col] = Cell {
            c,
            combining: SmallVec::new(),
            fg: self.current_fg,
            bg: self.current_bg,
            attrs: self.current_attrs.clone(),
            wide: if width == 2 {
                CellWidth::Wide
            } else {
                CellWidth::Normal
            },
        };
        if width == 2 && col + 1 < self.width {
            self.rows[row].cells[col + 1] = Cell {
                c: ' ',
                combining: SmallVec::new(),
                fg: self.current_fg,
                bg: self.current_bg,
                attrs: self.current_attrs.clone(),
                wide: CellWidth::Spacer,
            };
        }
        self.last_char = c;

        let advance = width.max(1);
        if col + advance < self.width {
            self.cursor.col = col + advance;
        } else {
            self.cursor.col = self.width - 1;
            if self.auto_wrap {
                self.pending_wrap = true;
            }
        }
        self.mark_row_dirty(row);
    }

    /// Resolve a deferred wrap: mark the overflowed row as continuing, move
    /// to column 0 of the next row, scrolling the region at its bottom.
    fn wrap_to_next_row(&mut self, history: &mut LineBuffer) {
        let row = self.cursor.row.min(self.height - 1);
        self.rows[row].soft_wrapped = true;
        self.cursor.col = 0;
        self.pending_wrap = false;
        if self.cursor.row == self.scroll_bottom {
            self.scroll_up(1, history);
        } else if self.cursor.row < self.height - 1 {
            self.cursor.row += 1;
        }
    }

    /// Repeat the last printed character `n` times (REP).
    pub fn repeat_char(&mut self, n: usize, history: &mut LineBuffer) {
        let c = self.last_char;
        for _ in 0..n {
            self.write_char(c, history);
        }
    }

    /// Hard newline (LF): the line ends here, so the current row's
    /// continuation mark is cleared before moving down.
    pub fn newline(&mut self, history: &mut LineBuffer) {
        self.pending_wrap = false;
        let row = self.cursor.row.min(self.height - 1);
        self.rows[row].soft_wrapped = false;
        if self.cursor.row == self.scroll_bottom {
            self.scroll_up(1, history);
        } else if self.cursor.row < self.height - 1 {
            self.cursor.row += 1;
        }
        self.mark_row_dirty(self.cursor.row);
    }

    pub fn carriage_return(&mut self) {
        self.cursor.col = 0;
        self.pending_wrap = false;
    }

    pub fn backspace(&mut self) {
        self.cursor.col = self.cursor.col.saturating_sub(1);
        self.pending_wrap = false;
    }

    pub fn tab(&mut self) {
        self.pending_wrap = false;
        self.cursor.col = self.next_tab_stop(self.cursor.col);
    }

    // -- Cursor movement --

    pub fn cursor_up(&mut self, n: usize) {
        self.pending_wrap = false;
        let top = self.scroll_top;
        if self.cursor.row >= top + n {
            self.cursor.row -= n;
        } else {
            self.cursor.row = top;
        }
    }

    pub fn cursor_down(&mut self, n: usize) {
        self.pending_wrap = false;
        self.cursor.row = (self.cursor.row + n).min(self.scroll_bottom);
    }

    pub fn cursor_forward(&mut self, n: usize) {
        self.pending_wrap = false;
        self.cursor.col = (self.cursor.col + n).min(self.width - 1);
    }

    pub fn cursor_backward(&mut self, n: usize) {
        self.pending_wrap = false;
        self.cursor.col = self.cursor.col.saturating_sub(n);
    }

    /// Absolute cursor position (0-indexed). Under origin mode the row is
    /// relative to the scroll region top and clamped to the region.
    pub fn cursor_to(&mut self, row: usize, col: usize) {
        self.pending_wrap = false;
        if self.origin_mode {
            self.cursor.row = (self.scroll_top + row).min(self.scroll_bottom);
        } else {
            self.cursor.row = row.min(self.height - 1);
        }
        self.cursor.col = col.min(self.width - 1);
    }

    pub fn save_cursor(&mut self) {
        self.saved_cursor = Some((self.cursor.row, self.cursor.col));
    }

    pub fn restore_cursor(&mut self) {
        if let Some((row, col)) = self.saved_cursor {
            self.cursor.row = row.min(self.height - 1);
            self.cursor.col = col.min(self.width - 1);
            self.pending_wrap = false;
        }
    }

    // -- Erasing --

    /// Erase display. Mode 0: cursor to end; 1: start to cursor; 2: all;
    /// 3: all plus scrollback. Unknown modes are no-ops.
    pub fn erase_display(&mut self, mode: u16, history: &mut LineBuffer) {
        let bce = self.bce_cell();
        match mode {
            0 => {
                let row = self.cursor.row.min(self.height - 1);
                let col = self.cursor.col.min(self.width - 1);
                self.clear_wide_pair_at(row, col);
                for c in col..self.width {
                    self.rows[row].cells[c] = bce.clone();
                }
                self.rows[row].soft_wrapped = false;
                for r in (row + 1)..self.height {
                    self.rows[r] = self.bce_row();
                }
            }
            1 => {
                let row = self.cursor.row.min(self.height - 1);
                let col = self.cursor.col.min(self.width - 1);
                for r in 0..row {
                    self.rows[r] = self.bce_row();
                }
                self.clear_wide_pair_at(row, col);
                for c in 0..=col {
                    self.rows[row].cells[c] = bce.clone();
                }
            }
            2 => {
                for r in 0..self.height {
                    self.rows[r] = self.bce_row();
                }
            }
            3 => {
                for r in 0..self.height {
                    self.rows[r] = self.bce_row();
                }
                history.clear();
            }
            _ => {}
        }
        self.mark_all_dirty();
    }

    /// Erase line. Mode 0: cursor to end; 1: start to cursor; 2: whole line.
    pub fn erase_line(&mut self, mode: u16) {
        let row = self.cursor.row.min(self.height - 1);
        let bce = self.bce_cell();
        match mode {
            0 => {
                let col = self.cursor.col.min(self.width - 1);
                self.clear_wide_pair_at(row, col);
                for c in col..self.width {
                    self.rows[row].cells[c] = bce.clone();
                }
                self.rows[row].soft_wrapped = false;
            }
            1 => {
                let col = self.cursor.col.min(self.width - 1);
                self.clear_wide_pair_at(row, col);
                for c in 0..=col {
                    self.rows[row].cells[c] = bce.clone();
                }
            }
            2 => {
                self.rows[row] = self.bce_row();
            }
            _ => {}
        }
        self.mark_row_dirty(row);
    }

    /// Replace `n` cells from the cursor with blanks, no shifting.
    pub fn erase_chars(&mut self, n: usize) {
        let row = self.cursor.row.min(self.height - 1);
        let col = self.cursor.col.min(self.width - 1);
        let end = (col + n).min(self.width);
        let bce = self.bce_cell();
        self.clear_wide_pair_at(row, col);
        if end > 0 && end < self.width {
            self.clear_wide_pair_at(row, end);
        }
        for c in col..end {
            self.rows[row].cells[c] = bce.clone();
        }
        self.mark_row_dirty(row);
    }

    /// Delete `n` cells at the cursor, shifting the remainder left and
    /// filling blanks from the right margin.
    pub fn delete_chars(&mut self, n: usize) {
        self.pending_wrap = false;
        let row = self.cursor.row.min(self.height - 1);
        let col = self.cursor.col.min(self.width - 1);
        self.clear_wide_pair_at(row, col);
        let n = n.min(self.width - col);
        let bce = self.bce_cell();
        for _ in 0..n {
            self.clear_wide_pair_at(row, col);
            self.rows[row].cells.remove(col);
            self.rows[row].cells.push(bce.clone());
        }
        self.rows[row].cells.truncate(self.width);
        self.mark_row_dirty(row);
    }

    /// Insert `n` blank cells at the cursor, shifting the remainder right.
    /// Cells pushed past the right margin are lost.
    pub fn insert_chars(&mut self, n: usize) {
        self.pending_wrap = false;
        let row = self.cursor.row.min(self.height - 1);
        let col = self.cursor.col.min(self.width - 1);
        self.clear_wide_pair_at(row, col);
        let n = n.min(self.width - col);
        let bce = self.bce_cell();
        for _ in 0..n {
            self.rows[row].cells.insert(col, bce.clone());
        }
        self.rows[row].cells.truncate(self.width);
        // If truncation split a wide pair at the right edge, clear the orphan.
        if self.rows[row].cells[self.width - 1].wide == CellWidth::Wide {
            self.rows[row].cells[self.width - 1] = Cell::default();
        }
        self.mark_row_dirty(row);
    }

    // -- Line insertion / deletion --

    /// Insert `n` blank lines at the cursor row, pushing lines below down.
    /// Lines pushed past the scroll bottom are lost.
    pub fn insert_lines(&mut self, n: usize) {
        self.pending_wrap = false;
        let row = self.cursor.row;
        if row < self.scroll_top || row > self.scroll_bottom {
            return;
        }
        let n = n.min(self.scroll_bottom - row + 1);
        for _ in 0..n {
            self.rows.remove(self.scroll_bottom);
            self.rows.insert(row, self.bce_row());
        }
        self.mark_all_dirty();
    }

    /// Delete `n` lines at the cursor row, pulling lines below up. Blank
    /// lines appear at the scroll bottom.
    pub fn delete_lines(&mut self, n: usize) {
        self.pending_wrap = false;
        let row = self.cursor.row;
        if row < self.scroll_top || row > self.scroll_bottom {
            return;
        }
        let n = n.min(self.scroll_bottom - row + 1);
        for _ in 0..n {
            self.rows.remove(row);
            self.rows.insert(self.scroll_bottom, self.bce_row());
        }
        self.mark_all_dirty();
    }

    // -- Scrolling --

    /// Scroll the region up by `n`. Rows leaving the top enter the
    /// scrollback sink only when the region starts at the very top.
    pub fn scroll_up(&mut self, n: usize, history: &mut LineBuffer) {
        let (top, bottom) = (self.scroll_top, self.scroll_bottom);
        if top > bottom || bottom >= self.height {
            return;
        }
        let n = n.min(bottom - top + 1);
        for _ in 0..n {
            let row = self.rows.remove(top);
            if top == 0 {
                history.append_row(row);
            }
            self.rows.insert(bottom, self.bce_row());
        }
        self.mark_all_dirty();
    }

    /// Scroll the region down by `n`. Rows leaving the bottom are lost.
    pub fn scroll_down(&mut self, n: usize) {
        let (top, bottom) = (self.scroll_top, self.scroll_bottom);
        if top > bottom || bottom >= self.height {
            return;
        }
        let n = n.min(bottom - top + 1);
        for _ in 0..n {
            self.rows.remove(bottom);
            self.rows.insert(top, self.bce_row());
        }
        self.mark_all_dirty();
    }

    /// Set the scroll region (0-indexed, inclusive). Degenerate bounds reset
    /// to the full screen; the cursor homes either way.
    pub fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        let top = top.min(self.height - 1);
        let bottom = bottom.min(self.height - 1);
        if top < bottom {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
        } else {
            self.scroll_top = 0;
            self.scroll_bottom = self.height - 1;
        }
        self.cursor.row = if self.origin_mode { self.scroll_top } else { 0 };
        self.cursor.col = 0;
        self.pending_wrap = false;
    }

    /// Move cursor down one line, scrolling up at the region bottom.
    pub fn index(&mut self, history: &mut LineBuffer) {
        self.pending_wrap = false;
        if self.cursor.row == self.scroll_bottom {
            self.scroll_up(1, history);
        } else if self.cursor.row < self.height - 1 {
            self.cursor.row += 1;
        }
    }

    /// Move cursor up one line, scrolling down at the region top.
    pub fn reverse_index(&mut self) {
        self.pending_wrap = false;
        if self.cursor.row == self.scroll_top {
            self.scroll_down(1);
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
        }
    }

    // -- Height-only resize --

    /// In-place resize for height changes at the same width. Width changes go
    /// through the reflow engine instead. Growing pulls rows back out of the
    /// scrollback sink; shrinking pushes top rows into it, keeping the cursor
    /// on screen.
    pub fn resize_rows(&mut self, new_height: usize, history: &mut LineBuffer) {
        let new_height = new_height.max(1);
        if new_height > self.height {
            let mut extra = new_height - self.height;
            while extra > 0 {
                let Some(row) = history.pop_newest() else { break };
                self.rows.insert(0, row);
                self.cursor.row += 1;
                extra -= 1;
            }
            while self.rows.len() < new_height {
                self.rows.push(Row::blank(self.width));
            }
        } else if new_height < self.height {
            // Trailing blank rows are simply dropped; only rows holding
            // content (or the cursor) above the new height go to history.
            let content_rows = self
                .rows
                .iter()
                .rposition(|r| r.content_len() > 0 || r.soft_wrapped)
                .map(|p| p + 1)
                .unwrap_or(0);
            let content_excess = content_rows.saturating_sub(new_height);
            let cursor_excess = (self.cursor.row + 1).saturating_sub(new_height);
            let remove = content_excess.max(cursor_excess);
            for _ in 0..remove {
                if self.rows.is_empty() {
                    break;
                }
                history.append_row(self.rows.remove(0));
                self.cursor.row = self.cursor.row.saturating_sub(1);
            }
            self.rows.truncate(new_height);
            while self.rows.len() < new_height {
                self.rows.push(Row::blank(self.width));
            }
        }
        self.height = new_height;
        self.finish_resize();
    }

    /// Install the freshly re-wrapped screen produced by the reflow engine.
    /// `rows` must already be `width` cells wide and `height` long.
    pub(crate) fn replace_contents(
        &mut self,
        width: usize,
        height: usize,
        rows: Vec<Row>,
        cursor: CursorState,
    ) {
        debug_assert_eq!(rows.len(), height);
        debug_assert!(rows.iter().all(|r| r.cells.len() == width));
        self.width = width.max(1);
        self.height = height.max(1);
        self.rows = rows;
        self.cursor = cursor;
        self.cursor.row = self.cursor.row.min(self.height - 1);
        self.cursor.col = self.cursor.col.min(self.width - 1);
        self.tab_stops = default_tab_stops(self.width);
        self.finish_resize();
    }

    fn finish_resize(&mut self) {
        self.scroll_top = 0;
        self.scroll_bottom = self.height - 1;
        self.cursor.row = self.cursor.row.min(self.height - 1);
        self.cursor.col = self.cursor.col.min(self.width - 1);
        self.pending_wrap = false;
        self.saved_cursor = None;
        self.row_dirty = vec![true; self.height];
        self.any_dirty = true;
    }

    // -- Modes --

    pub fn set_auto_wrap(&mut self, enabled: bool) {
        self.auto_wrap = enabled;
    }

    pub fn auto_wrap(&self) -> bool {
        self.auto_wrap
    }

    /// Origin mode (DECOM): cursor positioning becomes scroll-region
    /// relative; setting or resetting homes the cursor.
    pub fn set_origin_mode(&mut self, enabled: bool) {
        self.origin_mode = enabled;
        self.cursor.row = if enabled { self.scroll_top } else { 0 };
        self.cursor.col = 0;
        self.pending_wrap = false;
    }

    pub fn origin_mode(&self) -> bool {
        self.origin_mode
    }

    // -- Tab stops --

    pub fn set_tab_stop(&mut self) {
        let col = self.cursor.col;
        if col < self.tab_stops.len() {
            self.tab_stops[col] = true;
        }
    }

    /// Mode 0: clear at the cursor column; mode 3: clear all.
    pub fn clear_tab_stop(&mut self, mode: u16) {
        match mode {
            0 => {
                let col = self.cursor.col;
                if col < self.tab_stops.len() {
                    self.tab_stops[col] = false;
                }
            }
            3 => self.tab_stops.fill(false),
            _ => {}
        }
    }

    pub fn next_tab_stop(&self, from_col: usize) -> usize {
        ((from_col + 1)..self.width)
            .find(|&i| self.tab_stops[i])
            .unwrap_or(self.width - 1)
    }

    pub fn prev_tab_stop(&self, from_col: usize) -> usize {
        (0..from_col).rev().find(|&i| self.tab_stops[i]).unwrap_or(0)
    }

    // -- Internal helpers --

    /// If (row, col) holds half of a wide pair, clear both halves so no
    /// orphaned half-character lingers.
    fn clear_wide_pair_at(&mut self, row: usize, col: usize) {
        if row >= self.height || col >= self.width {
            return;
        }
        match self.rows[row].cells[col].wide {
            CellWidth::Wide => {
                if col + 1 < self.width && self.rows[row].cells[col + 1].wide == CellWidth::Spacer {
                    self.rows[row].cells[col + 1] = Cell::default();
                }
            }
            CellWidth::Spacer => {
                if col > 0 && self.rows[row].cells[col - 1].wide == CellWidth::Wide {
                    self.rows[row].cells[col - 1] = Cell::default();
                }
            }
            CellWidth::Normal => {}
        }
    }

    /// Blank cell carrying the current background (BCE: erase fills with the
    /// active SGR background color).
    fn bce_cell(&self) -> Cell {
        Cell {
            bg: self.current_bg,
            ..Cell::default()
        }
    }

    fn bce_row(&self) -> Row {
        Row {
            cells: vec![self.bce_cell(); self.width],
            soft_wrapped: false,
        }
    }
}

fn default_tab_stops(width: usize) -> Vec<bool> {
    let mut stops = vec![false; width];
    for i in (0..width).step_by(8) {
        stops[i] = true;
    }
    stops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(grid: &mut Grid, history: &mut LineBuffer, text: &str) {
        for c in text.chars() {
            match c {
                '\r' => grid.carriage_return(),
                '\n' => grid.newline(history),
                _ => grid.write_char(c, history),
            }
        }
    }

    #[test]
    fn wrap_sets_trailing_continuation_mark() {
        let mut history = LineBuffer::new(100);
        let mut grid = Grid::new(5, 4);
        feed(&mut grid, &mut history, "abcdefgh\r\nijkl\r\n");
        assert_eq!(grid.row_text(0), "abcde");
        assert_eq!(grid.row_text(1), "fgh");
        assert_eq!(grid.row_text(2), "ijkl");
        assert_eq!(grid.row_text(3), "");
        assert!(grid.row(0).unwrap().soft_wrapped);
        assert!(!grid.row(1).unwrap().soft_wrapped);
        assert!(!grid.row(2).unwrap().soft_wrapped);
        assert_eq!(grid.cursor, CursorState { row: 3, col: 0 });
    }

    #[test]
    fn exact_width_line_defers_wrap() {
        let mut history = LineBuffer::new(100);
        let mut grid = Grid::new(5, 4);
        feed(&mut grid, &mut history, "abcde");
        // Pending wrap: cursor parked on the last column, no mark yet.
        assert_eq!(grid.cursor, CursorState { row: 0, col: 4 });
        assert!(!grid.row(0).unwrap().soft_wrapped);
        feed(&mut grid, &mut history, "f");
        assert!(grid.row(0).unwrap().soft_wrapped);
        assert_eq!(grid.row_text(1), "f");
    }

    #[test]
    fn scroll_at_bottom_feeds_history() {
        let mut history = LineBuffer::new(100);
        let mut grid = Grid::new(5, 2);
        feed(&mut grid, &mut history, "aa\r\nbb\r\ncc\r\n");
        assert_eq!(history.len(), 2);
        assert_eq!(history.row(0).unwrap().text(), "aa");
        assert_eq!(history.row(1).unwrap().text(), "bb");
        assert_eq!(grid.row_text(0), "cc");
    }

    #[test]
    fn region_scroll_does_not_feed_history() {
        let mut history = LineBuffer::new(100);
        let mut grid = Grid::new(5, 4);
        feed(&mut grid, &mut history, "aa\r\nbb\r\ncc\r\ndd");
        grid.set_scroll_region(1, 2);
        grid.cursor_to(1, 0);
        grid.scroll_up(1, &mut history);
        assert!(history.is_empty());
        assert_eq!(grid.row_text(0), "aa");
        assert_eq!(grid.row_text(1), "cc");
        assert_eq!(grid.row_text(2), "");
        assert_eq!(grid.row_text(3), "dd");
    }

    #[test]
    fn wide_char_wraps_early_and_pairs() {
        let mut history = LineBuffer::new(100);
        let mut grid = Grid::new(4, 2);
        feed(&mut grid, &mut history, "abc\u{4F60}");
        // No room for both halves at column 3: wraps to the next row.
        assert!(grid.row(0).unwrap().soft_wrapped);
        let row1 = grid.row(1).unwrap();
        assert_eq!(row1.cells[0].wide, CellWidth::Wide);
        assert_eq!(row1.cells[1].wide, CellWidth::Spacer);
    }

    #[test]
    fn combining_char_attaches_to_previous_cell() {
        let mut history = LineBuffer::new(100);
        let mut grid = Grid::new(5, 2);
        feed(&mut grid, &mut history, "e\u{0301}");
        let cell = &grid.row(0).unwrap().cells[0];
        assert_eq!(cell.c, 'e');
        assert_eq!(cell.combining.as_slice(), &['\u{0301}']);
    }

    #[test]
    fn erase_display_mode_3_clears_history() {
        let mut history = LineBuffer::new(100);
        let mut grid = Grid::new(5, 2);
        feed(&mut grid, &mut history, "aa\r\nbb\r\ncc");
        assert!(!history.is_empty());
        let dropped_before = history.next_absolute();
        grid.erase_display(3, &mut history);
        assert!(history.is_empty());
        // Numbering stays dense after the purge.
        assert_eq!(history.next_absolute(), dropped_before);
        assert_eq!(grid.row_text(0), "");
    }

    #[test]
    fn insert_and_delete_lines_respect_region() {
        let mut history = LineBuffer::new(100);
        let mut grid = Grid::new(5, 4);
        feed(&mut grid, &mut history, "aa\r\nbb\r\ncc\r\ndd");
        grid.set_scroll_region(0, 2);
        grid.cursor_to(0, 0);
        grid.insert_lines(1);
        assert_eq!(grid.row_text(0), "");
        assert_eq!(grid.row_text(1), "aa");
        assert_eq!(grid.row_text(2), "bb");
        // Row outside the region is untouched.
        assert_eq!(grid.row_text(3), "dd");
        grid.delete_lines(1);
        assert_eq!(grid.row_text(0), "aa");
        assert_eq!(grid.row_text(2), "");
    }

    #[test]
    fn resize_rows_shrink_pushes_top_into_history() {
        let mut history = LineBuffer::new(100);
        let mut grid = Grid::new(5, 4);
        feed(&mut grid, &mut history, "aa\r\nbb\r\ncc\r\ndd");
        grid.resize_rows(2, &mut history);
        assert_eq!(grid.height(), 2);
        assert_eq!(history.len(), 2);
        assert_eq!(history.row(0).unwrap().text(), "aa");
        assert_eq!(grid.row_text(0), "cc");
        assert_eq!(grid.cursor.row, 1);
    }

    #[test]
    fn resize_rows_grow_pulls_from_history() {
        let mut history = LineBuffer::new(100);
        let mut grid = Grid::new(5, 2);
        feed(&mut grid, &mut history, "aa\r\nbb\r\ncc\r\ndd");
        assert_eq!(history.len(), 2);
        grid.resize_rows(4, &mut history);
        assert_eq!(grid.height(), 4);
        assert!(history.is_empty());
        assert_eq!(grid.row_text(0), "aa");
        assert_eq!(grid.row_text(3), "dd");
    }

    #[test]
    fn malformed_cursor_targets_clamp() {
        let mut grid = Grid::new(5, 4);
        grid.cursor_to(999, 999);
        assert_eq!(grid.cursor, CursorState { row: 3, col: 4 });
        grid.cursor_backward(1000);
        assert_eq!(grid.cursor.col, 0);
    }
}
