use crate::token::{Priority, TokenBatch};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Two-tier FIFO of token batches: a high-priority lane that preempts the
/// normal stream at token granularity.
///
/// `high_pending` mirrors whether the high lane is non-empty so the executor
/// can poll for preemption between tokens without touching the lock.
#[derive(Default)]
pub struct TwoTierQueue {
    tiers: Mutex<Tiers>,
    high_pending: AtomicBool,
}

#[derive(Default)]
struct Tiers {
    high: VecDeque<TokenBatch>,
    normal: VecDeque<TokenBatch>,
}

impl TwoTierQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, batch: TokenBatch) {
        let mut tiers = self.tiers.lock();
        match batch.priority {
            Priority::High => {
                tiers.high.push_back(batch);
                self.high_pending.store(true, Ordering::Release);
            }
            Priority::Normal => tiers.normal.push_back(batch),
        }
    }

    /// Next batch to execute: the whole high lane drains before the normal
    /// lane is consulted.
    pub fn pop(&self) -> Option<TokenBatch> {
        let mut tiers = self.tiers.lock();
        if let Some(batch) = tiers.high.pop_front() {
            if tiers.high.is_empty() {
                self.high_pending.store(false, Ordering::Release);
            }
            return Some(batch);
        }
        tiers.normal.pop_front()
    }

    /// Park a partially executed batch back at the head of its lane; `pop`
    /// returns it next (for its tier) with its cursor intact.
    pub fn requeue_front(&self, batch: TokenBatch) {
        let mut tiers = self.tiers.lock();
        match batch.priority {
            Priority::High => {
                tiers.high.push_front(batch);
                self.high_pending.store(true, Ordering::Release);
            }
            Priority::Normal => tiers.normal.push_front(batch),
        }
    }

    /// Lock-free check used between tokens to decide whether to yield a
    /// normal batch mid-way.
    pub fn has_high_pending(&self) -> bool {
        self.high_pending.load(Ordering::Acquire)
    }

    /// Empty both lanes, returning the batches (high lane first) so the
    /// caller can release their backpressure permits.
    pub fn drain(&self) -> Vec<TokenBatch> {
        let mut tiers = self.tiers.lock();
        self.high_pending.store(false, Ordering::Release);
        let mut drained: Vec<TokenBatch> = tiers.high.drain(..).collect();
        drained.extend(tiers.normal.drain(..));
        drained
    }

    pub fn is_empty(&self) -> bool {
        let tiers = self.tiers.lock();
        tiers.high.is_empty() && tiers.normal.is_empty()
    }

    pub fn len(&self) -> usize {
        let tiers = self.tiers.lock();
        tiers.high.len() + tiers.normal.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    fn batch(tag: u8, priority: Priority) -> TokenBatch {
        TokenBatch::new(vec![Token::Ctrl(tag)], 1, priority)
    }

    fn tag_of(batch: &TokenBatch) -> u8 {
        match batch.tokens[0] {
            Token::Ctrl(tag) => tag,
            _ => unreachable!(),
        }
    }

    #[test]
    fn high_lane_drains_first() {
        let queue = TwoTierQueue::new();
        queue.push(batch(1, Priority::Normal));
        queue.push(batch(2, Priority::High));
        queue.push(batch(3, Priority::Normal));
        queue.push(batch(4, Priority::High));
        let order: Vec<u8> = std::iter::from_fn(|| queue.pop()).map(|b| tag_of(&b)).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn high_pending_flag_tracks_lane() {
        let queue = TwoTierQueue::new();
        assert!(!queue.has_high_pending());
        queue.push(batch(1, Priority::High));
        assert!(queue.has_high_pending());
        queue.pop();
        assert!(!queue.has_high_pending());
    }

    #[test]
    fn requeued_batch_keeps_its_cursor() {
        let queue = TwoTierQueue::new();
        queue.push(batch(1, Priority::Normal));
        let mut parked = queue.pop().unwrap();
        parked.cursor = 1;
        queue.push(batch(2, Priority::Normal));
        queue.requeue_front(parked);
        let next = queue.pop().unwrap();
        assert_eq!(tag_of(&next), 1);
        assert_eq!(next.cursor, 1);
    }

    #[test]
    fn drain_returns_everything_high_first() {
        let queue = TwoTierQueue::new();
        queue.push(batch(1, Priority::Normal));
        queue.push(batch(2, Priority::High));
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(tag_of(&drained[0]), 2);
        assert!(queue.is_empty());
        assert!(!queue.has_high_pending());
    }
}
