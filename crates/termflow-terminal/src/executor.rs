use crate::error::{Result, TerminalError};
use crate::interpreter::{apply_token, TokenOutcome};
use crate::queue::TwoTierQueue;
use crate::state::TerminalState;
use crate::token::{Priority, Token, TokenBatch};
use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use termflow_core::config::TerminalConfig;

bitflags! {
    /// Conditions accumulated while side effects queue up, delivered to the
    /// delegate in one call per drain.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SideEffectFlags: u32 {
        /// Grid or scrollback content changed; a redraw is warranted.
        const CONTENT_CHANGED = 1 << 0;
        /// The window title changed.
        const TITLE_CHANGED = 1 << 1;
        /// BEL was received.
        const BELL = 1 << 2;
        /// The buffer was resized.
        const SIZE_CHANGED = 1 << 3;
    }
}

/// Host hooks for the token pipeline. All methods are called on the executor
/// thread. The executor holds the delegate weakly; once a delegate that was
/// set is dropped, pending batches are discarded rather than executed.
pub trait TokenExecutorDelegate: Send + Sync {
    /// While true, batches stay queued instead of executing. Call
    /// [`TokenExecutor::schedule`] after this changes back to false.
    fn should_queue_tokens(&self) -> bool {
        false
    }

    /// Consulted for each token about to execute. Returning true consumes
    /// the token without applying it; the host sees which token and whether
    /// it arrived on the high-priority lane. Used during teardown and while
    /// a mode that owns the screen is active.
    fn should_discard_tokens(&self, _token: &Token, _high_priority: bool) -> bool {
        false
    }

    fn will_execute_tokens(&self) {}

    /// Called after a drain that executed at least one token, with the
    /// executed input length in bytes and the measured execution rate in
    /// bytes per second.
    fn did_execute_tokens(&self, _byte_len: usize, _throughput: f64) {}

    /// Called at most once per drain, with the model lock held, before any
    /// side effect runs, so effects observe a host view that is already
    /// coherent with the model.
    fn sync(&self, _state: &mut TerminalState) {}

    /// The union of the condition flags of all side effects that ran in this
    /// drain.
    fn handle_side_effects(&self, _flags: SideEffectFlags) {}
}

/// One queued side effect: a closure plus the conditions it represents.
struct SideEffect {
    flags: SideEffectFlags,
    action: Box<dyn FnOnce(&mut TerminalState) + Send>,
}

// Process-wide pause counter: while non-zero, every executor in the process
// holds off token execution. Guards are issued by [`pause_all`].
static GLOBAL_PAUSE: AtomicUsize = AtomicUsize::new(0);
static REGISTRY: Mutex<Vec<Weak<Shared>>> = Mutex::new(Vec::new());

/// Pause every [`TokenExecutor`] in the process until the guard drops. Used
/// around operations that must see no terminal mutate anywhere, e.g. whole-
/// process state capture.
pub fn pause_all() -> PauseGuard {
    GLOBAL_PAUSE.fetch_add(1, Ordering::SeqCst);
    PauseGuard { local: None }
}

fn wake_all_executors() {
    let mut registry = REGISTRY.lock();
    registry.retain(|weak| match weak.upgrade() {
        Some(shared) => {
            shared.notify();
            true
        }
        None => false,
    });
}

/// RAII pause token. Executors resume when the last outstanding guard
/// (local or global) drops.
#[must_use = "execution resumes as soon as the guard drops"]
pub struct PauseGuard {
    /// `None` for a process-global pause.
    local: Option<Arc<Shared>>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        match &self.local {
            Some(shared) => {
                if shared.pause_count.fetch_sub(1, Ordering::SeqCst) == 1 {
                    shared.notify();
                }
            }
            None => {
                if GLOBAL_PAUSE.fetch_sub(1, Ordering::SeqCst) == 1 {
                    wake_all_executors();
                }
            }
        }
    }
}

/// Counting semaphore over raw input bytes, the backpressure valve between
/// the producer and the executor. Oversized requests clamp to capacity so a
/// single huge read cannot deadlock the pipeline.
struct ByteSemaphore {
    available: Mutex<usize>,
    cond: Condvar,
    capacity: usize,
    closed: AtomicBool,
}

impl ByteSemaphore {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            available: Mutex::new(capacity),
            cond: Condvar::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Block until `n` permits are available (clamped to capacity). Returns
    /// false if the semaphore closed while waiting.
    fn acquire(&self, n: usize) -> bool {
        let n = n.min(self.capacity);
        let mut available = self.available.lock();
        while *available < n {
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            self.cond.wait(&mut available);
        }
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        *available -= n;
        true
    }

    fn release(&self, n: usize) {
        let n = n.min(self.capacity);
        let mut available = self.available.lock();
        *available = (*available + n).min(self.capacity);
        drop(available);
        self.cond.notify_all();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cond.notify_all();
    }
}

#[derive(Default)]
struct ExecFlags {
    stopped: bool,
    /// True while the worker is inside a drain; `with_paused` waits on this
    /// for its rendezvous.
    draining: bool,
}

struct Shared {
    queue: TwoTierQueue,
    state: Mutex<TerminalState>,
    exec: Mutex<ExecFlags>,
    cond: Condvar,
    pause_count: AtomicUsize,
    semaphore: ByteSemaphore,
    side_effects: Mutex<Vec<SideEffect>>,
    effects_draining: AtomicBool,
    /// Set when a token rolled back: the queue holds work that is waiting on
    /// something external, so the worker stays idle until the next
    /// [`TokenExecutor::schedule`].
    deferred: AtomicBool,
    delegate: Mutex<Option<Weak<dyn TokenExecutorDelegate>>>,
}

/// Live view of the delegate slot. An unset slot means the executor runs
/// standalone; a dead one means the host tore down.
enum DelegateStatus {
    Unset,
    Live(Arc<dyn TokenExecutorDelegate>),
    Dead,
}

impl Shared {
    fn paused(&self) -> bool {
        self.pause_count.load(Ordering::SeqCst) > 0 || GLOBAL_PAUSE.load(Ordering::SeqCst) > 0
    }

    fn notify(&self) {
        let _exec = self.exec.lock();
        self.cond.notify_all();
    }

    fn delegate_status(&self) -> DelegateStatus {
        match self.delegate.lock().as_ref() {
            None => DelegateStatus::Unset,
            Some(weak) => match weak.upgrade() {
                Some(delegate) => DelegateStatus::Live(delegate),
                None => DelegateStatus::Dead,
            },
        }
    }

    fn release_permits(&self, batch: &TokenBatch) {
        if batch.holds_permits {
            self.semaphore.release(batch.byte_len);
        }
    }

    fn run(self: Arc<Self>) {
        tracing::debug!("token executor thread started");
        loop {
            {
                let mut exec = self.exec.lock();
                while !exec.stopped && (self.paused() || !self.runnable()) {
                    self.cond.wait(&mut exec);
                }
                if exec.stopped {
                    break;
                }
                exec.draining = true;
            }
            self.drain();
            let mut exec = self.exec.lock();
            exec.draining = false;
            self.cond.notify_all();
        }
        tracing::debug!("token executor thread exiting");
    }

    /// Whether a drain would make progress right now.
    fn runnable(&self) -> bool {
        if !self.side_effects.lock().is_empty() {
            return true;
        }
        if self.queue.is_empty() || self.deferred.load(Ordering::SeqCst) {
            return false;
        }
        match self.delegate_status() {
            DelegateStatus::Live(delegate) => !delegate.should_queue_tokens(),
            // Unset runs standalone; Dead drains to discard.
            DelegateStatus::Unset | DelegateStatus::Dead => true,
        }
    }

    fn drain(&self) {
        let delegate = match self.delegate_status() {
            DelegateStatus::Live(delegate) => Some(delegate),
            DelegateStatus::Unset => None,
            DelegateStatus::Dead => {
                // The host went away: nothing is left to consume the output,
                // so pending batches are dropped and their permits returned.
                for batch in self.queue.drain() {
                    self.release_permits(&batch);
                }
                self.drain_side_effects(&None, SideEffectFlags::empty());
                return;
            }
        };
        if let Some(delegate) = &delegate {
            delegate.will_execute_tokens();
        }
        let started = std::time::Instant::now();
        let mut executed = 0usize;
        let mut executed_bytes = 0usize;
        let mut flags = SideEffectFlags::empty();
        loop {
            if self.paused() || self.exec.lock().stopped {
                break;
            }
            if let Some(delegate) = &delegate {
                if delegate.should_queue_tokens() {
                    break;
                }
            }
            let Some(mut batch) = self.queue.pop() else {
                break;
            };
            let high_priority = batch.priority == Priority::High;
            let mut rolled_back = false;
            {
                let mut state = self.state.lock();
                while batch.cursor < batch.tokens.len() {
                    let token = &batch.tokens[batch.cursor];
                    let discard = state.discard_input()
                        || delegate
                            .as_ref()
                            .is_some_and(|d| d.should_discard_tokens(token, high_priority));
                    if discard {
                        // Consumed without being applied.
                        batch.cursor += 1;
                        continue;
                    }
                    let outcome = apply_token(&mut state, token);
                    if outcome == TokenOutcome::Rollback {
                        // Leave the token unconsumed; it re-executes on the
                        // next drain cycle.
                        rolled_back = true;
                        break;
                    }
                    batch.cursor += 1;
                    executed += 1;
                    executed_bytes += token.byte_len();
                    // A pause aborts any batch at the next token boundary.
                    if self.paused() {
                        break;
                    }
                    // A normal batch additionally yields to pending
                    // high-priority work and after any token expensive
                    // enough that staying would hold the lock too long.
                    if batch.priority == Priority::Normal
                        && (self.queue.has_high_pending() || token.is_high_latency())
                    {
                        break;
                    }
                }
                state.prune_annotations();
                if state.grid.is_any_dirty() {
                    flags |= SideEffectFlags::CONTENT_CHANGED;
                }
            }
            if rolled_back {
                tracing::debug!(remaining = batch.remaining(), "token rolled back; parking");
                self.deferred.store(true, Ordering::SeqCst);
                self.queue.requeue_front(batch);
                break;
            }
            if batch.is_finished() {
                self.release_permits(&batch);
            } else {
                self.queue.requeue_front(batch);
            }
        }
        self.drain_side_effects(&delegate, flags);
        if executed > 0 {
            if let Some(delegate) = &delegate {
                let elapsed = started.elapsed().as_secs_f64();
                let throughput = if elapsed > 0.0 {
                    executed_bytes as f64 / elapsed
                } else {
                    0.0
                };
                delegate.did_execute_tokens(executed_bytes, throughput);
            }
        }
    }

    /// Run queued side effects, at most one drainer at a time. Effects added
    /// while draining run in the same pass; `sync` fires once, before the
    /// first effect, so effects and flag delivery see a synchronized host.
    fn drain_side_effects(
        &self,
        delegate: &Option<Arc<dyn TokenExecutorDelegate>>,
        mut flags: SideEffectFlags,
    ) {
        if self.effects_draining.swap(true, Ordering::AcqRel) {
            return;
        }
        let has_work = !flags.is_empty() || !self.side_effects.lock().is_empty();
        if has_work {
            if let Some(delegate) = delegate {
                delegate.sync(&mut self.state.lock());
            }
        }
        loop {
            let effects = std::mem::take(&mut *self.side_effects.lock());
            if effects.is_empty() {
                break;
            }
            let mut state = self.state.lock();
            for effect in effects {
                flags |= effect.flags;
                (effect.action)(&mut state);
            }
        }
        if let Some(delegate) = delegate {
            if !flags.is_empty() {
                delegate.handle_side_effects(flags);
            }
        }
        self.effects_draining.store(false, Ordering::Release);
    }
}

/// Executes token batches against the terminal model on a dedicated thread.
///
/// The executor is the single writer of the [`TerminalState`]: tokens,
/// side effects and `with_paused` closures all mutate it under one lock, in
/// a defined order. Producers block in [`add_batch`](Self::add_batch) when
/// more than the configured byte budget of input is in flight.
pub struct TokenExecutor {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TokenExecutor {
    pub fn new(config: &TerminalConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: TwoTierQueue::new(),
            state: Mutex::new(TerminalState::new(config)),
            exec: Mutex::new(ExecFlags::default()),
            cond: Condvar::new(),
            pause_count: AtomicUsize::new(0),
            semaphore: ByteSemaphore::new(config.backpressure_bytes),
            side_effects: Mutex::new(Vec::new()),
            effects_draining: AtomicBool::new(false),
            deferred: AtomicBool::new(false),
            delegate: Mutex::new(None),
        });
        REGISTRY.lock().push(Arc::downgrade(&shared));
        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("termflow-executor".into())
            .spawn(move || worker.run())?;
        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn set_delegate(&self, delegate: Weak<dyn TokenExecutorDelegate>) {
        *self.shared.delegate.lock() = Some(delegate);
        self.schedule();
    }

    /// Enqueue a batch. Normal-priority batches first acquire `byte_len`
    /// permits of the backpressure budget, blocking the caller while too much
    /// unexecuted input is in flight; high-priority batches are exempt and
    /// never block.
    pub fn add_batch(&self, mut batch: TokenBatch) -> Result<()> {
        if self.shared.exec.lock().stopped {
            return Err(TerminalError::ExecutorStopped);
        }
        if batch.priority == Priority::Normal && batch.byte_len > 0 {
            if !self.shared.semaphore.acquire(batch.byte_len) {
                return Err(TerminalError::ExecutorStopped);
            }
            batch.holds_permits = true;
        }
        self.shared.queue.push(batch);
        self.schedule();
        Ok(())
    }

    /// Wake the executor thread to re-evaluate queue and delegate gates.
    /// This is also how a rolled-back token gets retried: whatever it was
    /// waiting for calls `schedule` once the state is ready.
    pub fn schedule(&self) {
        self.shared.deferred.store(false, Ordering::SeqCst);
        self.shared.notify();
    }

    /// Pause this executor until the guard drops. Pauses nest.
    pub fn pause(&self) -> PauseGuard {
        self.shared.pause_count.fetch_add(1, Ordering::SeqCst);
        PauseGuard {
            local: Some(Arc::clone(&self.shared)),
        }
    }

    /// Pause, wait for any in-flight drain to park, then run `f` with
    /// exclusive access to the model. This is the rendezvous for reads and
    /// mutations that must not interleave with token execution, e.g. resize.
    pub fn with_paused<R>(&self, f: impl FnOnce(&mut TerminalState) -> R) -> R {
        let _guard = self.pause();
        {
            let mut exec = self.shared.exec.lock();
            while exec.draining {
                self.shared.cond.wait(&mut exec);
            }
        }
        let mut state = self.shared.state.lock();
        f(&mut state)
    }

    /// Resize through the pause rendezvous so no token executes against a
    /// half-resized buffer.
    pub fn set_size(&self, width: usize, height: usize) {
        self.with_paused(|state| state.set_size(width, height));
    }

    /// Queue a side effect to run on the executor thread after the current
    /// (or next) drain, with the model lock held.
    pub fn add_side_effect(
        &self,
        flags: SideEffectFlags,
        action: impl FnOnce(&mut TerminalState) + Send + 'static,
    ) {
        self.shared.side_effects.lock().push(SideEffect {
            flags,
            action: Box::new(action),
        });
        self.schedule();
    }

    /// Read or mutate the model directly. Prefer [`with_paused`](Self::with_paused)
    /// for anything that must not observe a mid-drain state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut TerminalState) -> R) -> R {
        f(&mut self.shared.state.lock())
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.exec.lock().stopped
    }

    /// Stop the executor thread and drop all queued work. Idempotent;
    /// blocked producers are woken with an error.
    pub fn stop(&self) {
        {
            let mut exec = self.shared.exec.lock();
            if exec.stopped {
                return;
            }
            exec.stopped = true;
            self.shared.cond.notify_all();
        }
        self.shared.semaphore.close();
        for batch in self.shared.queue.drain() {
            self.shared.release_permits(&batch);
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                tracing::error!("token executor thread panicked");
            }
        }
    }
}

impl Drop for TokenExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}
