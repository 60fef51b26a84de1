use crate::annotations::{Annotation, AnnotationId, AnnotationIndex, BufferPosition, Interval};
use crate::cell::{CellWidth, Row};
use crate::error::{Result, TerminalError};
use crate::grid::Grid;
use crate::reflow;
use crate::scrollback::LineBuffer;
use termflow_core::config::TerminalConfig;

/// A search hit in absolute buffer coordinates, with the matched text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub interval: Interval,
    pub text: String,
}

/// The complete mutable terminal model: visible grid, scrollback, and the
/// annotation index, plus the odd bits of per-terminal state (title, pending
/// rollback request) that do not belong to any one of them.
///
/// All mutation funnels through the interpreter or through the explicit
/// operations here; the executor owns the single lock around the whole value.
pub struct TerminalState {
    pub grid: Grid,
    pub history: LineBuffer,
    pub annotations: AnnotationIndex,
    title: Option<String>,
    pending_rollback: bool,
    discard_input: bool,
}

impl TerminalState {
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            grid: Grid::new(config.cols, config.rows),
            history: LineBuffer::new(config.scrollback_lines),
            annotations: AnnotationIndex::new(),
            title: None,
            pending_rollback: false,
            discard_input: false,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub(crate) fn set_title(&mut self, title: String) {
        self.title = Some(title);
    }

    /// Roll back the token currently executing: instead of being consumed it
    /// is re-executed on the next drain cycle. For tokens that must wait on
    /// state that is not available yet; the raiser is responsible for not
    /// having mutated anything before raising.
    pub fn request_rollback(&mut self) {
        self.pending_rollback = true;
    }

    pub(crate) fn take_rollback(&mut self) -> bool {
        std::mem::take(&mut self.pending_rollback)
    }

    /// While set, incoming tokens are consumed without being applied (e.g.
    /// a copy or suspend mode owns the screen).
    pub fn set_discard_input(&mut self, discard: bool) {
        self.discard_input = discard;
    }

    pub fn discard_input(&self) -> bool {
        self.discard_input
    }

    /// Resize entry point. A pure height change redistributes rows against
    /// the scrollback; any width change runs the full reflow, which also
    /// applies the new height. Degenerate sizes clamp to 1x1.
    pub fn set_size(&mut self, width: usize, height: usize) {
        let width = width.max(1);
        let height = height.max(1);
        if width == self.grid.width() && height == self.grid.height() {
            return;
        }
        tracing::debug!(width, height, "resizing terminal");
        if width == self.grid.width() {
            self.grid.resize_rows(height, &mut self.history);
            self.prune_annotations();
        } else {
            reflow::reflow(
                &mut self.grid,
                &mut self.history,
                &mut self.annotations,
                width,
                height,
            );
        }
    }

    /// Destroy or clamp annotations whose anchors fell off the top of the
    /// scrollback. Cheap when nothing was evicted; the executor calls this
    /// after every batch.
    pub fn prune_annotations(&mut self) {
        self.annotations
            .truncate_before(self.history.first_absolute());
    }

    /// Absolute line number of the first (oldest) row still reachable.
    pub fn first_line(&self) -> u64 {
        self.history.first_absolute()
    }

    /// Absolute line number just past the last grid row.
    pub fn end_line(&self) -> u64 {
        self.history.next_absolute() + self.grid.height() as u64
    }

    /// Row lookup spanning scrollback and grid by absolute line number.
    pub fn row(&self, absolute: u64) -> Option<&Row> {
        if let Some(row) = self.history.row(absolute) {
            return Some(row);
        }
        let grid_index = absolute.checked_sub(self.history.next_absolute())?;
        self.grid.row(usize::try_from(grid_index).ok()?)
    }

    pub fn add_annotation(
        &mut self,
        interval: Interval,
        text: impl Into<String>,
    ) -> Result<AnnotationId> {
        self.annotations
            .add(interval, text)
            .ok_or(TerminalError::EmptyAnnotation)
    }

    pub fn remove_annotation(&mut self, id: AnnotationId) -> Option<Annotation> {
        self.annotations.remove(id)
    }

    pub fn annotations_in(&self, range: Interval) -> Vec<&Annotation> {
        self.annotations.query(range)
    }

    /// Search the whole buffer (scrollback + grid). `pattern` is a regular
    /// expression unless `literal`, in which case it is matched verbatim.
    /// Match positions map back through wide and combining characters to cell
    /// columns, so the returned intervals highlight correctly.
    pub fn search(
        &self,
        pattern: &str,
        literal: bool,
        case_sensitive: bool,
    ) -> Result<Vec<SearchMatch>> {
        let mut source = String::new();
        if !case_sensitive {
            source.push_str("(?i)");
        }
        if literal {
            source.push_str(&regex::escape(pattern));
        } else {
            source.push_str(pattern);
        }
        let re = regex::Regex::new(&source)?;

        let mut matches = Vec::new();
        let grid_base = self.history.next_absolute();
        let rows = self
            .history
            .iter()
            .chain(
                self.grid
                    .rows()
                    .iter()
                    .enumerate()
                    .map(|(i, row)| (grid_base + i as u64, row)),
            );
        for (line, row) in rows {
            let (text, cols) = row_text_with_columns(row);
            for found in re.find_iter(&text) {
                let start_char = text[..found.start()].chars().count();
                let end_char = text[..found.end()].chars().count();
                let start_col = cols.get(start_char).copied().unwrap_or(0);
                let end_col = cols
                    .get(end_char)
                    .copied()
                    .unwrap_or(row.width() as u32);
                matches.push(SearchMatch {
                    interval: Interval::new(
                        BufferPosition::new(line, start_col),
                        BufferPosition::new(line, end_col),
                    ),
                    text: found.as_str().to_string(),
                });
            }
        }
        Ok(matches)
    }
}

/// Flatten a row to text plus, for each produced character, the cell column
/// it came from. A trailing sentinel column marks one-past-the-content so
/// end-of-match positions resolve without a bounds special case.
fn row_text_with_columns(row: &Row) -> (String, Vec<u32>) {
    let mut text = String::new();
    let mut cols = Vec::new();
    let content = row.content_len();
    for (col, cell) in row.cells[..content].iter().enumerate() {
        if cell.wide == CellWidth::Spacer {
            continue;
        }
        text.push(cell.c);
        cols.push(col as u32);
        for &comb in &cell.combining {
            text.push(comb);
            cols.push(col as u32);
        }
    }
    cols.push(content as u32);
    (text, cols)
}
