//! End-to-end tests of the session pipeline: feed → producer → queue →
//! executor → model, including backpressure, priority and delegate wiring.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use termflow_core::config::TerminalConfig;
use termflow_terminal::{
    BufferPosition, Interval, SideEffectFlags, TermSession, TerminalState,
    TokenExecutorDelegate,
};

fn config(cols: usize, rows: usize) -> TerminalConfig {
    TerminalConfig {
        cols,
        rows,
        ..TerminalConfig::default()
    }
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < Duration::from_secs(10), "timed out");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn screen(session: &TermSession) -> Vec<String> {
    session.with_state(|state| {
        (0..state.grid.height())
            .map(|r| state.grid.row_text(r))
            .collect()
    })
}

#[test]
fn resize_scenario_through_the_full_pipeline() {
    let session = TermSession::new(&config(5, 4)).unwrap();
    session.feed(b"abcdefgh\r\nijkl\r\n".to_vec()).unwrap();
    wait_until(|| screen(&session)[2] == "ijkl");
    assert_eq!(screen(&session), vec!["abcde", "fgh", "ijkl", ""]);
    session.set_size(4, 4);
    assert_eq!(screen(&session), vec!["abcd", "efgh", "ijkl", ""]);
}

#[test]
fn annotations_follow_content_through_pipeline_resize() {
    let session = TermSession::new(&config(5, 4)).unwrap();
    session.feed(b"abcdefgh\r\nijkl\r\n".to_vec()).unwrap();
    wait_until(|| screen(&session)[2] == "ijkl");
    let id = session.with_state(|state| {
        state
            .add_annotation(
                Interval::new(BufferPosition::new(1, 0), BufferPosition::new(1, 3)),
                "fgh",
            )
            .unwrap()
    });
    session.set_size(4, 4);
    let interval = session.with_state(|state| state.annotations.get(id).unwrap().interval);
    // "fgh" now lives at columns 1..4 of the second row ("efgh").
    assert_eq!(interval.start, BufferPosition::new(1, 1));
    assert_eq!(interval.end, BufferPosition::new(1, 4));
}

#[test]
fn input_larger_than_backpressure_budget_completes() {
    let session = TermSession::new(&TerminalConfig {
        backpressure_bytes: 64,
        scrollback_lines: 10_000,
        ..config(10, 4)
    })
    .unwrap();
    // Far more than the budget, in many small feeds: permits must recycle.
    for i in 0..200 {
        session.feed(format!("line{i}\r\n").into_bytes()).unwrap();
    }
    session.feed(b"done".to_vec()).unwrap();
    wait_until(|| screen(&session)[3] == "done");
    let lines = session.with_state(|state| state.history.len());
    assert!(lines > 190, "history has {lines} rows");
}

#[test]
fn high_priority_feed_jumps_queued_input() {
    let session = TermSession::new(&config(40, 4)).unwrap();
    {
        let _pause = session.executor().pause();
        session.feed(b"slow lane".to_vec()).unwrap();
        // Give the reader thread time to enqueue the normal batch.
        std::thread::sleep(Duration::from_millis(20));
        session.feed_high_priority(b"fast ").unwrap();
    }
    wait_until(|| screen(&session)[0] == "fast slow lane");
}

#[derive(Default)]
struct CountingDelegate {
    executed: AtomicUsize,
    syncs: AtomicUsize,
    flags: Mutex<SideEffectFlags>,
}

impl TokenExecutorDelegate for CountingDelegate {
    fn did_execute_tokens(&self, byte_len: usize, _throughput: f64) {
        self.executed.fetch_add(byte_len, Ordering::SeqCst);
    }

    fn sync(&self, _state: &mut TerminalState) {
        self.syncs.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_side_effects(&self, flags: SideEffectFlags) {
        *self.flags.lock() |= flags;
    }
}

#[test]
fn delegate_observes_execution_and_side_effects() {
    let session = TermSession::new(&config(20, 4)).unwrap();
    let delegate = Arc::new(CountingDelegate::default());
    let delegate_obj: Arc<dyn TokenExecutorDelegate> = delegate.clone();
    session.set_delegate(Arc::downgrade(&delegate_obj));
    session.feed(b"observed".to_vec()).unwrap();
    wait_until(|| screen(&session)[0] == "observed");
    wait_until(|| delegate.executed.load(Ordering::SeqCst) > 0);
    wait_until(|| delegate.syncs.load(Ordering::SeqCst) > 0);
    assert!(delegate
        .flags
        .lock()
        .contains(SideEffectFlags::CONTENT_CHANGED));
}

#[test]
fn snapshot_of_live_session_restores_elsewhere() {
    let session = TermSession::new(&config(8, 3)).unwrap();
    session.feed(b"\x1b[1mbold\x1b[m plain\r\n".to_vec()).unwrap();
    wait_until(|| screen(&session)[0] == "bold pla");
    let json = session.snapshot().unwrap();
    drop(session);
    let restored = TermSession::restore(&json, &config(8, 3)).unwrap();
    let (text, bold) = restored.with_state(|state| {
        let row = state.grid.row(0).unwrap();
        (row.text(), row.cells[0].attrs.bold)
    });
    assert_eq!(text, "bold pla");
    assert!(bold);
}

#[test]
fn scrollback_eviction_truncates_annotations() {
    let session = TermSession::new(&TerminalConfig {
        scrollback_lines: 3,
        ..config(10, 2)
    })
    .unwrap();
    session.feed(b"a\r\nb\r\n".to_vec()).unwrap();
    wait_until(|| session.with_state(|s| s.history.len()) == 1);
    let id = session.with_state(|state| {
        state
            .add_annotation(
                Interval::new(BufferPosition::new(0, 0), BufferPosition::new(0, 1)),
                "oldest",
            )
            .unwrap()
    });
    // Push enough lines that absolute line 0 is evicted; the executor
    // prunes the annotation on its own.
    session.feed(b"c\r\nd\r\ne\r\nf\r\ng\r\n".to_vec()).unwrap();
    wait_until(|| session.with_state(|s| s.first_line()) >= 1);
    assert!(session.with_state(|state| state.annotations.get(id).is_none()));
}
