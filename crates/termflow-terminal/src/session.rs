use crate::error::{Result, TerminalError};
use crate::executor::{TokenExecutor, TokenExecutorDelegate};
use crate::producer::TokenProducer;
use crate::snapshot;
use crate::state::TerminalState;
use crate::token::Priority;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use termflow_core::config::TerminalConfig;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One terminal: a byte inlet wired through the producer to an executor.
///
/// Raw output from the process under emulation goes in through [`feed`];
/// a dedicated reader thread parses it into batches and hands them to the
/// executor, blocking there when the backpressure budget is exhausted. The
/// channel between `feed` and the reader is unbounded on purpose: the
/// semaphore, not the channel, is the flow-control point.
///
/// [`feed`]: Self::feed
pub struct TermSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    executor: Arc<TokenExecutor>,
    input_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    priority_producer: Mutex<TokenProducer>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl TermSession {
    pub fn new(config: &TerminalConfig) -> Result<Self> {
        let executor = Arc::new(TokenExecutor::new(config)?);
        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let id = Uuid::new_v4();
        let reader_executor = Arc::clone(&executor);
        let reader = std::thread::Builder::new()
            .name(format!("termflow-reader-{id}"))
            .spawn(move || {
                let mut producer = TokenProducer::new();
                while let Some(bytes) = input_rx.blocking_recv() {
                    let batch = producer.produce(&bytes);
                    if reader_executor.add_batch(batch).is_err() {
                        tracing::debug!("executor stopped, reader exiting");
                        break;
                    }
                }
            })?;
        tracing::info!(%id, "session created");
        Ok(Self {
            id,
            created_at: Utc::now(),
            executor,
            input_tx: Mutex::new(Some(input_tx)),
            priority_producer: Mutex::new(TokenProducer::new()),
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Rebuild a session from a snapshot, resized to `config`'s geometry.
    pub fn restore(json: &str, config: &TerminalConfig) -> Result<Self> {
        let state = snapshot::restore(json, config)?;
        let session = Self::new(config)?;
        session.executor.with_paused(|current| *current = state);
        Ok(session)
    }

    /// Queue raw terminal output for parsing and execution. Never blocks;
    /// backpressure is applied on the reader thread.
    pub fn feed(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        let tx = self.input_tx.lock();
        tx.as_ref()
            .ok_or(TerminalError::ExecutorStopped)?
            .send(bytes.into())
            .map_err(|_| TerminalError::ExecutorStopped)
    }

    /// Parse `bytes` immediately and enqueue them at high priority, jumping
    /// the normal stream and bypassing backpressure. The input must be
    /// self-contained sequences; it does not share parser state with the
    /// normal inlet.
    pub fn feed_high_priority(&self, bytes: &[u8]) -> Result<()> {
        let mut batch = self.priority_producer.lock().produce(bytes);
        batch.priority = Priority::High;
        self.executor.add_batch(batch)
    }

    pub fn executor(&self) -> &Arc<TokenExecutor> {
        &self.executor
    }

    pub fn set_delegate(&self, delegate: Weak<dyn TokenExecutorDelegate>) {
        self.executor.set_delegate(delegate);
    }

    pub fn set_size(&self, width: usize, height: usize) {
        self.executor.set_size(width, height);
    }

    /// Token-coherent read access to the model.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut TerminalState) -> R) -> R {
        self.executor.with_paused(f)
    }

    /// Capture the whole terminal, pausing execution around the encode.
    pub fn snapshot(&self) -> Result<String> {
        self.executor
            .with_paused(|state| snapshot::encode(state, state.first_line()))
    }

    /// Capture the terminal, omitting history older than `first_line`.
    pub fn snapshot_from(&self, first_line: u64) -> Result<String> {
        self.executor
            .with_paused(move |state| snapshot::encode(state, first_line))
    }

    /// Tear the session down: unblock and join the reader, stop the
    /// executor, drop queued work. Idempotent; `Drop` calls this too.
    pub fn close(&self) {
        self.input_tx.lock().take();
        self.executor.stop();
        if let Some(reader) = self.reader.lock().take() {
            if reader.join().is_err() {
                tracing::error!(id = %self.id, "session reader thread panicked");
            }
        }
        tracing::info!(id = %self.id, "session closed");
    }
}

impl Drop for TermSession {
    fn drop(&mut self) {
        self.close();
    }
}
