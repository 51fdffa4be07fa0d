//! Debounced accumulation of missing-title requests into one pending batch.
//!
//! The coalescer is a plain state machine driven with explicit instants. It is
//! owned by a single coordinator thread, which makes enqueue, timer reset and
//! snapshot-and-clear mutually serialized without a lock.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::title_record::TitleId;

/// Reference debounce window between the last enqueue and the flush.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

pub struct RequestCoalescer {
    debounce: Duration,
    pending: BTreeSet<TitleId>,
    flush_deadline: Option<Instant>,
}

impl RequestCoalescer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: BTreeSet::new(),
            flush_deadline: None,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn set_debounce(&mut self, debounce: Duration) {
        self.debounce = debounce;
    }

    /// Adds `title_id` to the pending batch and restarts the quiescence timer.
    ///
    /// Returns `true` when the id was not already pending.
    pub fn enqueue(&mut self, title_id: TitleId, now: Instant) -> bool {
        let inserted = self.pending.insert(title_id);
        self.flush_deadline = Some(now + self.debounce);
        inserted
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, title_id: TitleId) -> bool {
        self.pending.contains(&title_id)
    }

    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_deadline
    }

    /// Time left until the timer fires, `None` when no timer is armed.
    pub fn time_until_flush(&self, now: Instant) -> Option<Duration> {
        self.flush_deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Fires the timer if it has expired.
    ///
    /// An expired timer is always disarmed. The pending set is swapped for an
    /// empty one and returned, or `None` when nothing was pending.
    pub fn take_due_batch(&mut self, now: Instant) -> Option<Vec<TitleId>> {
        let deadline = self.flush_deadline?;
        if now < deadline {
            return None;
        }
        self.flush_deadline = None;
        if self.pending.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.pending);
        Some(batch.into_iter().collect())
    }
}

impl Default for RequestCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
