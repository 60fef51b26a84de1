use crate::annotations::Annotation;
use crate::cell::{CursorState, Row};
use crate::error::{Result, TerminalError};
use crate::grid::Grid;
use crate::state::TerminalState;
use serde::{Deserialize, Serialize};
use termflow_core::config::TerminalConfig;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the whole terminal model. Absolute line numbering is
/// preserved through `base`, so annotations restored from a snapshot keep
/// pointing at the same content even after earlier lines were evicted.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    width: usize,
    height: usize,
    /// Absolute line number of the first stored history row.
    base: u64,
    history: Vec<Row>,
    screen: Vec<Row>,
    cursor: CursorState,
    annotations: Vec<Annotation>,
    title: Option<String>,
}

/// Serialize the model to JSON. History older than `first_line` is left out
/// (the cutoff clamps to what is actually stored); pass `state.first_line()`
/// to keep everything. Annotations are stored verbatim and clamped against
/// the cutoff on restore. Call under the executor's pause rendezvous so the
/// capture is token-coherent.
pub fn encode(state: &TerminalState, first_line: u64) -> Result<String> {
    let base = first_line.clamp(
        state.history.first_absolute(),
        state.history.next_absolute(),
    );
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        width: state.grid.width(),
        height: state.grid.height(),
        base,
        history: state
            .history
            .iter_range(base..state.history.next_absolute())
            .map(|(_, row)| row.clone())
            .collect(),
        screen: state.grid.rows().to_vec(),
        cursor: state.grid.cursor,
        annotations: state.annotations.iter().cloned().collect(),
        title: state.title().map(str::to_owned),
    };
    Ok(serde_json::to_string(&snapshot)?)
}

/// Rebuild a terminal from a snapshot. The buffer is restored at its saved
/// geometry and then resized to `config`'s, so a restore into a different
/// window size goes through the ordinary reflow path and annotations remap
/// rather than being re-derived.
pub fn restore(json: &str, config: &TerminalConfig) -> Result<TerminalState> {
    let snapshot: Snapshot = serde_json::from_str(json)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(TerminalError::SnapshotVersion(snapshot.version));
    }
    let mut state = TerminalState::new(&TerminalConfig {
        cols: snapshot.width,
        rows: snapshot.height,
        ..config.clone()
    });
    state.history.replace(snapshot.base, snapshot.history);
    let mut screen = snapshot.screen;
    screen.resize_with(snapshot.height.max(1), || Row::blank(snapshot.width));
    state.grid = Grid::new(snapshot.width, snapshot.height);
    state
        .grid
        .replace_contents(snapshot.width, snapshot.height, screen, snapshot.cursor);
    state.annotations.replace(snapshot.annotations);
    // Capacity may be smaller than the snapshot's history was.
    state.annotations.truncate_before(state.history.first_absolute());
    if let Some(title) = snapshot.title {
        state.set_title(title);
    }
    state.set_size(config.cols, config.rows);
    Ok(state)
}
