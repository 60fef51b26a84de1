use crate::annotations::{AnnotationIndex, BufferPosition, Interval};
use crate::cell::{Cell, CellWidth, CursorState, Row};
use crate::grid::Grid;
use crate::scrollback::LineBuffer;

/// Re-wraps the entire buffer (scrollback + grid) at a new width, rebuilding
/// the grid from the tail and remapping the cursor and every annotation
/// anchor by its character offset within its logical line.
///
/// Height-only changes never come here; `Grid::resize_rows` handles them.
pub fn reflow(
    grid: &mut Grid,
    history: &mut LineBuffer,
    annotations: &mut AnnotationIndex,
    new_width: usize,
    new_height: usize,
) {
    let new_width = new_width.max(1);
    let new_height = new_height.max(1);
    let base = history.first_absolute();
    let grid_base = history.next_absolute();

    // Step 1: undo prior wraps, concatenating history + grid into logical
    // lines. Every physical row is recorded so old absolute coordinates can
    // be translated into (logical line, cell offset) pairs.
    let mut lines: Vec<Vec<Cell>> = Vec::new();
    let mut row_map: Vec<RowOrigin> = Vec::new();
    let mut open = false;
    let all_rows = history
        .iter()
        .map(|(_, row)| row)
        .chain(grid.rows().iter());
    for row in all_rows {
        let contributed = row.content_len();
        if !open {
            lines.push(Vec::new());
        }
        let logical = lines.len() - 1;
        let line = lines.last_mut().unwrap();
        row_map.push(RowOrigin {
            logical,
            start_offset: line.len(),
        });
        line.extend_from_slice(&row.cells[..contributed]);
        open = row.soft_wrapped;
    }

    // Step 2: record each live anchor as (logical line, offset from the
    // logical-line start), plus the cursor by the same technique.
    let anchors: Vec<(crate::annotations::AnnotationId, Interval)> = annotations
        .iter()
        .map(|a| (a.id, a.interval))
        .collect();
    let locate_old = |pos: BufferPosition| -> Option<(usize, usize)> {
        let index = usize::try_from(pos.line.checked_sub(base)?).ok()?;
        let origin = row_map.get(index)?;
        Some((origin.logical, origin.start_offset + pos.col as usize))
    };
    let cursor_abs = grid_base + grid.cursor.row as u64;
    let cursor_old = locate_old(BufferPosition::new(cursor_abs, grid.cursor.col as u32));

    // Step 3: re-wrap each logical line at the new width with fresh
    // continuation marks. New absolute numbers run sequentially from the old
    // base, keeping surviving coordinates dense.
    let mut new_rows: Vec<Row> = Vec::new();
    let mut wrapped: Vec<WrappedLine> = Vec::with_capacity(lines.len());
    for cells in &lines {
        let first_row = new_rows.len();
        let row_starts = rewrap_line(cells, new_width, &mut new_rows);
        wrapped.push(WrappedLine {
            first_row,
            row_starts,
            total: cells.len(),
        });
    }

    // Step 5 (computed before anchors need it): the last `new_height` rows
    // become the visible screen; everything earlier is the new scrollback.
    let total = new_rows.len();
    let history_count = total.saturating_sub(new_height);
    let new_grid_base = base + history_count as u64;

    // Step 4: walk each re-wrapped line to find the row/column holding each
    // recorded offset; clamp ends that ran past truncated content.
    let locate_new = |logical: usize, offset: usize| -> BufferPosition {
        let line = &wrapped[logical];
        let (row_in_line, col) = line.locate(offset, new_width);
        BufferPosition::new(base + (line.first_row + row_in_line) as u64, col as u32)
    };
    for (id, interval) in anchors {
        let (Some(start), Some(end)) = (
            locate_old(interval.start),
            locate_old(interval.end),
        ) else {
            // An endpoint pointed outside the stream; drop the note rather
            // than guess.
            tracing::debug!(?id, "annotation anchor unresolvable across reflow");
            annotations.remove(id);
            continue;
        };
        let new_interval = Interval::new(
            locate_new(start.0, start.1),
            locate_new(end.0, end.1),
        );
        annotations.reanchor(id, new_interval);
    }

    // Step 6: cursor, remapped by the same offset walk.
    let new_cursor = match cursor_old {
        Some((logical, offset)) => {
            let pos = locate_new(logical, offset);
            CursorState {
                row: usize::try_from(pos.line.saturating_sub(new_grid_base)).unwrap_or(0),
                col: (pos.col as usize).min(new_width - 1),
            }
        }
        None => CursorState::default(),
    };

    // Install: earlier rows into scrollback (evicting oldest past capacity),
    // tail into the grid, padded with blanks below the content.
    let mut iter = new_rows.into_iter();
    let history_rows: Vec<Row> = iter.by_ref().take(history_count).collect();
    let mut grid_rows: Vec<Row> = iter.collect();
    while grid_rows.len() < new_height {
        grid_rows.push(Row::blank(new_width));
    }
    history.replace(base, history_rows);
    annotations.truncate_before(history.first_absolute());
    grid.replace_contents(new_width, new_height, grid_rows, new_cursor);
}

/// Where a pre-reflow physical row sat inside its logical line.
struct RowOrigin {
    logical: usize,
    start_offset: usize,
}

/// One logical line after re-wrapping: the global index of its first new row
/// and the cell offset at which each of its rows starts.
struct WrappedLine {
    first_row: usize,
    row_starts: Vec<usize>,
    total: usize,
}

impl WrappedLine {
    /// Map a cell offset to (row within this line, column). Offsets at or
    /// past the end clamp to just after the last cell.
    fn locate(&self, offset: usize, width: usize) -> (usize, usize) {
        debug_assert!(!self.row_starts.is_empty());
        let offset = offset.min(self.total);
        let row = self
            .row_starts
            .iter()
            .rposition(|&start| start <= offset)
            .unwrap_or(0);
        // A clamped end may land exactly on the row width; callers treat the
        // column as an exclusive bound there.
        let col = (offset - self.row_starts[row]).min(width);
        (row, col)
    }
}

/// Re-wrap one logical line into rows of `width`, appending to `out` and
/// returning the starting cell offset of each produced row. An empty line
/// produces a single blank row; a line exactly filling the width produces no
/// trailing empty continuation row. Wide-character pairs never split across a
/// row boundary.
fn rewrap_line(cells: &[Cell], width: usize, out: &mut Vec<Row>) -> Vec<usize> {
    let mut row_starts = Vec::new();
    if cells.is_empty() {
        row_starts.push(0);
        out.push(Row::blank(width));
        return row_starts;
    }
    let mut start = 0;
    while start < cells.len() {
        let mut take = width.min(cells.len() - start);
        // A Wide cell at the break with its Spacer on the far side would be
        // torn apart; wrap one cell early instead.
        if take > 1
            && start + take < cells.len()
            && cells[start + take - 1].wide == CellWidth::Wide
            && cells[start + take].wide == CellWidth::Spacer
        {
            take -= 1;
        }
        row_starts.push(start);
        let mut row_cells = cells[start..start + take].to_vec();
        row_cells.resize(width, Cell::default());
        out.push(Row {
            cells: row_cells,
            soft_wrapped: start + take < cells.len(),
        });
        start += take;
    }
    row_starts
}
