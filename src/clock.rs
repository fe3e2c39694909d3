//! Event clock: a single ordered queue of future events.
//!
//! Events are ordered by `(time, priority, sequence)`. The sequence number
//! is the insertion order, so two events at the same instant with the same
//! priority always pop in the order they were scheduled. Cancellation is
//! lazy: a cancelled entry stays in the heap and is skipped when it
//! surfaces.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

/// Opaque handle returned by [`EventClock::schedule`]; used to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle(u64);

#[derive(Debug, Clone)]
struct Scheduled<T> {
    at: Duration,
    priority: u8,
    seq: u64,
    payload: T,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest event on top
        other
            .at
            .cmp(&self.at)
            .then(other.priority.cmp(&self.priority))
            .then(other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone)]
pub struct EventClock<T> {
    now: Duration,
    ceiling: Option<Duration>,
    queue: BinaryHeap<Scheduled<T>>,
    pending: HashSet<u64>,
    next_seq: u64,
    halted: bool,
}

impl<T> Default for EventClock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventClock<T> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            ceiling: None,
            queue: BinaryHeap::new(),
            pending: HashSet::new(),
            next_seq: 0,
            halted: false,
        }
    }

    /// Clock that discards every event due after `ceiling`.
    pub fn with_ceiling(ceiling: Duration) -> Self {
        Self {
            ceiling: Some(ceiling),
            ..Self::new()
        }
    }

    #[inline]
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn ceiling(&self) -> Option<Duration> {
        self.ceiling
    }

    /// Schedule `payload` to fire `delay` from now with the lowest priority
    /// class (pure insertion-order tie-break).
    pub fn schedule(&mut self, delay: Duration, payload: T) -> EventHandle {
        self.schedule_with_priority(delay, 0, payload)
    }

    /// Lower `priority` fires first among events due at the same instant.
    pub fn schedule_with_priority(&mut self, delay: Duration, priority: u8, payload: T) -> EventHandle {
        let at = self.now + delay;
        self.schedule_at(at, priority, payload)
    }

    /// Schedule at an absolute timestamp. Timestamps in the past are
    /// clamped to `now`.
    pub fn schedule_at(&mut self, at: Duration, priority: u8, payload: T) -> EventHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled {
            at: at.max(self.now),
            priority,
            seq,
            payload,
        });
        self.pending.insert(seq);
        EventHandle(seq)
    }

    /// Returns `true` if the event was still pending. A cancelled event
    /// never fires, even if it is already due.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.pending.remove(&handle.0)
    }

    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.pending.contains(&handle.0)
    }

    /// Number of live (not cancelled, not fired) events.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Timestamp of the next live event, if any.
    pub fn peek_time(&mut self) -> Option<Duration> {
        self.drop_cancelled();
        self.queue.peek().map(|s| s.at)
    }

    /// Whether [`advance`](Self::advance) would fire another event: a
    /// live event exists at or before the ceiling.
    pub fn has_due(&mut self) -> bool {
        if self.halted {
            return false;
        }
        match (self.peek_time(), self.ceiling) {
            (Some(at), Some(ceiling)) => at <= ceiling,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Pop the next due event and move `now` to its timestamp.
    ///
    /// Returns `None` once the queue is empty or the next event lies past
    /// the ceiling; in the latter case every remaining event is discarded
    /// and the clock halts at the ceiling.
    pub fn advance(&mut self) -> Option<(EventHandle, T)> {
        if self.halted {
            return None;
        }
        self.drop_cancelled();
        let next_at = self.queue.peek()?.at;
        if let Some(ceiling) = self.ceiling {
            if next_at > ceiling {
                tracing::trace!(pending = self.pending.len(), "ceiling reached, discarding events");
                self.now = ceiling;
                self.halt();
                return None;
            }
        }
        let event = self.queue.pop()?;
        self.pending.remove(&event.seq);
        self.now = event.at;
        Some((EventHandle(event.seq), event.payload))
    }

    /// Let idle time pass up to `at`, stopping early at the next live
    /// event or the ceiling. Never moves backwards.
    pub fn advance_to(&mut self, at: Duration) {
        if self.halted {
            return;
        }
        let mut target = self.ceiling.map_or(at, |c| at.min(c));
        if let Some(next) = self.peek_time() {
            target = target.min(next);
        }
        self.now = self.now.max(target);
    }

    /// Stop the clock: every pending event is discarded.
    pub fn halt(&mut self) {
        self.queue.clear();
        self.pending.clear();
        self.halted = true;
    }

    fn drop_cancelled(&mut self) {
        while let Some(top) = self.queue.peek() {
            if self.pending.contains(&top.seq) {
                break;
            }
            self.queue.pop();
        }
    }
}
