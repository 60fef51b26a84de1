use crate::cell::Row;
use std::collections::VecDeque;
use std::ops::Range;

/// Append-only history of rows that have scrolled off the top of the grid.
///
/// Every row ever appended gets a monotonically increasing absolute line
/// number; `lines_dropped` translates old absolute coordinates after
/// oldest-first eviction. Absolute numbers are dense: the stored rows cover
/// exactly `lines_dropped .. lines_dropped + len`.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    rows: VecDeque<Row>,
    max_rows: usize,
    lines_dropped: u64,
}

impl LineBuffer {
    pub fn new(max_rows: usize) -> Self {
        Self {
            rows: VecDeque::new(),
            max_rows: max_rows.max(1),
            lines_dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Number of rows evicted over the buffer's lifetime.
    pub fn lines_dropped(&self) -> u64 {
        self.lines_dropped
    }

    /// Absolute line number of the oldest stored row.
    pub fn first_absolute(&self) -> u64 {
        self.lines_dropped
    }

    /// Absolute line number the next appended row will receive. Grid rows
    /// continue this numbering: grid row `r` lives at `next_absolute() + r`.
    pub fn next_absolute(&self) -> u64 {
        self.lines_dropped + self.rows.len() as u64
    }

    /// Append a row, evicting the oldest if the buffer is at capacity.
    /// Returns the number of rows evicted (0 or 1). Eviction keeps
    /// continuation chains consistent: the new oldest row always reads as a
    /// logical line head because the trailing wrap marker left with its
    /// predecessor.
    pub fn append_row(&mut self, row: Row) -> usize {
        self.rows.push_back(row);
        if self.rows.len() > self.max_rows {
            self.rows.pop_front();
            self.lines_dropped += 1;
            1
        } else {
            0
        }
    }

    /// Remove and return the newest row (used when the grid regains height).
    pub fn pop_newest(&mut self) -> Option<Row> {
        self.rows.pop_back()
    }

    /// Look up a row by absolute line number. Returns `None` both for rows
    /// that were dropped and for numbers not yet assigned.
    pub fn row(&self, absolute: u64) -> Option<&Row> {
        let index = absolute.checked_sub(self.lines_dropped)?;
        self.rows.get(usize::try_from(index).ok()?)
    }

    /// Lazily iterate rows in a half-open absolute-line range, oldest first.
    /// The range is clamped to what is actually stored; reverse iteration is
    /// available through `DoubleEndedIterator`. Restart by calling again.
    pub fn iter_range(&self, range: Range<u64>) -> impl DoubleEndedIterator<Item = (u64, &Row)> {
        let start = range.start.max(self.lines_dropped);
        let end = range.end.min(self.next_absolute()).max(start);
        let lo = (start - self.lines_dropped) as usize;
        let hi = (end - self.lines_dropped) as usize;
        self.rows
            .iter()
            .enumerate()
            .skip(lo)
            .take(hi - lo)
            .map(move |(i, row)| (self.lines_dropped + i as u64, row))
    }

    /// Iterate all stored rows, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u64, &Row)> {
        self.iter_range(self.first_absolute()..self.next_absolute())
    }

    /// Drop everything, advancing `lines_dropped` past the removed rows so
    /// absolute numbering stays dense.
    pub fn clear(&mut self) {
        self.lines_dropped += self.rows.len() as u64;
        self.rows.clear();
    }

    /// Rebuild from rows produced by reflow or snapshot restore. `base` is
    /// the absolute line number of the first row in `rows`; rows beyond
    /// capacity are evicted oldest-first.
    pub(crate) fn replace(&mut self, base: u64, rows: Vec<Row>) {
        self.rows = rows.into();
        self.lines_dropped = base;
        while self.rows.len() > self.max_rows {
            self.rows.pop_front();
            self.lines_dropped += 1;
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(10_000)
    }
}
