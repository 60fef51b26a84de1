//! Terminal screen-buffer engine and token execution pipeline.
//!
//! Raw bytes from a process flow through the [`producer`] (escape-sequence
//! tokenizer) into the [`executor`], which applies them on a dedicated
//! thread to the model: the [`grid`], the [`scrollback`] store and the
//! [`annotations`] index. Execution carries backpressure, priority lanes
//! and pause/rendezvous semantics. [`TermSession`] wires the whole pipeline
//! together.

pub mod annotations;
pub mod cell;
pub mod colors;
pub mod error;
pub mod executor;
pub mod grid;
pub mod interpreter;
pub mod producer;
pub mod queue;
pub mod reflow;
pub mod scrollback;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod token;

pub use annotations::{Annotation, AnnotationId, AnnotationIndex, BufferPosition, Interval};
pub use cell::{Cell, CellAttributes, CellWidth, CursorState, Row, UnderlineStyle};
pub use colors::{NamedColor, TermColor};
pub use error::{Result, TerminalError};
pub use executor::{
    pause_all, PauseGuard, SideEffectFlags, TokenExecutor, TokenExecutorDelegate,
};
pub use grid::Grid;
pub use producer::TokenProducer;
pub use scrollback::LineBuffer;
pub use session::TermSession;
pub use state::{SearchMatch, TerminalState};
pub use token::{CsiToken, Priority, Token, TokenBatch};
