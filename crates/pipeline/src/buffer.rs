use crate::message::Message;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// Monotonic generation counter for one buffer's "cycle" (Idle → Armed →
/// Draining → Idle). The `Scheduler` keys its timers on `(user_id, epoch)`
/// instead of holding a handle inside the buffer, so a timer that fires
/// after its cycle has already drained can recognise itself as stale and
/// no-op rather than racing a dangling reference.
pub type Epoch = u64;

#[derive(Debug)]
struct Inner {
    queue: VecDeque<Message>,
    /// `message_id`s currently pending in `queue` for this cycle. A replayed
    /// webhook whose original hasn't been `markProcessed` yet (still
    /// buffered, not yet drained) would otherwise slip past `MessageStore`'s
    /// dedup gate and land in the batch twice.
    pending_ids: HashSet<String>,
    last_message_at: i64,
    epoch: Epoch,
}

/// Bounded per-user FIFO plus the scheduling state assigned to one
/// `UserBuffer`. All mutating operations go through a single lock, which is
/// what makes `drain` atomic with respect to `enqueue`: an `enqueue` racing
/// a `drain` either lands before it (and is swept up in the batch) or
/// blocks until the drain finishes, in which case it always targets the
/// fresh post-drain epoch.
#[derive(Debug)]
pub struct UserBuffer {
    cap: usize,
    inner: Mutex<Inner>,
}

/// Outcome of `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Accepted into `epoch`. `started_cycle` is true when this message was
    /// the first in an empty buffer — the Idle → Armed transition, which
    /// is the caller's cue to arm both the silence and timeout timers
    /// rather than just rearming silence.
    Accepted { epoch: Epoch, started_cycle: bool },
    /// `|queue| == cap`; the caller applies its configured backpressure
    /// policy.
    AtCapacity,
    /// A message with this `message_id` is already pending in the current
    /// cycle. Not inserted; the caller treats this the same as a
    /// `MessageStore` dedup hit.
    Duplicate,
}

/// An atomically-snapshotted, removed batch: the messages a drain produced
/// plus the epoch they belonged to, so the caller can tell a stale timer
/// callback (one still carrying an earlier epoch) from a live one.
#[derive(Debug, Clone)]
pub struct Batch {
    pub epoch: Epoch,
    pub messages: Vec<Message>,
}

impl UserBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                pending_ids: HashSet::new(),
                last_message_at: 0,
                epoch: 0,
            }),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Appends `msg` if there is room. `|queue| <= cap` holds at all times.
    pub fn enqueue(&self, msg: Message) -> EnqueueResult {
        let mut inner = self.inner.lock();
        if inner.pending_ids.contains(&msg.message_id) {
            return EnqueueResult::Duplicate;
        }
        if inner.queue.len() >= self.cap {
            return EnqueueResult::AtCapacity;
        }
        inner.last_message_at = msg.received_at;
        inner.epoch_push(msg)
    }

    /// DROP_OLDEST backpressure: evicts the oldest pending message (if at
    /// capacity) and enqueues `msg`, as one atomic operation — two separate
    /// `remove_oldest` + `enqueue` calls would let another thread's enqueue
    /// land in the gap and violate `|queue| <= cap`.
    pub fn enqueue_evicting_oldest(&self, msg: Message) -> EnqueueResult {
        let mut inner = self.inner.lock();
        if inner.pending_ids.contains(&msg.message_id) {
            return EnqueueResult::Duplicate;
        }
        if inner.queue.len() >= self.cap {
            if let Some(evicted) = inner.queue.pop_front() {
                inner.pending_ids.remove(&evicted.message_id);
            }
        }
        inner.last_message_at = msg.received_at;
        inner.epoch_push(msg)
    }

    /// Removes and returns the oldest pending message, if any.
    pub fn remove_oldest(&self) -> Option<Message> {
        let mut inner = self.inner.lock();
        let removed = inner.queue.pop_front();
        if let Some(m) = &removed {
            inner.pending_ids.remove(&m.message_id);
        }
        removed
    }

    /// Atomically snapshots and clears the queue, advancing to a fresh
    /// epoch. Both the silence and timeout timers for the *drained* epoch
    /// are the caller's responsibility to cancel (the buffer itself no
    /// longer tracks timer handles — see `Epoch`).
    pub fn drain(&self) -> Batch {
        let mut inner = self.inner.lock();
        let messages = inner.queue.drain(..).collect();
        inner.pending_ids.clear();
        let epoch = inner.epoch;
        inner.epoch = inner.epoch.wrapping_add(1);
        Batch { epoch, messages }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    pub fn last_message_at(&self) -> i64 {
        self.inner.lock().last_message_at
    }

    /// The cycle a timer callback should compare itself against before
    /// acting: if it no longer matches, the cycle that armed the timer has
    /// already drained (or been flushed) and the callback is stale.
    pub fn current_epoch(&self) -> Epoch {
        self.inner.lock().epoch
    }
}

impl Inner {
    fn epoch_push(&mut self, msg: Message) -> EnqueueResult {
        let started_cycle = self.queue.is_empty();
        self.pending_ids.insert(msg.message_id.clone());
        self.queue.push_back(msg);
        EnqueueResult::Accepted { epoch: self.epoch, started_cycle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, at: i64) -> Message {
        Message::new(id, "u1", "hi", at)
    }

    #[test]
    fn enqueue_respects_capacity() {
        let buf = UserBuffer::new(2);
        assert!(matches!(buf.enqueue(msg("m1", 0)), EnqueueResult::Accepted { started_cycle: true, .. }));
        assert!(matches!(buf.enqueue(msg("m2", 1)), EnqueueResult::Accepted { started_cycle: false, .. }));
        assert_eq!(buf.enqueue(msg("m3", 2)), EnqueueResult::AtCapacity);
        assert_eq!(buf.size(), 2);
    }

    #[test]
    fn drain_is_atomic_and_advances_epoch() {
        let buf = UserBuffer::new(10);
        buf.enqueue(msg("m1", 0));
        buf.enqueue(msg("m2", 1));
        let epoch_before = buf.current_epoch();
        let batch = buf.drain();
        assert_eq!(batch.epoch, epoch_before);
        assert_eq!(batch.messages.len(), 2);
        assert!(buf.is_empty());
        assert_eq!(buf.current_epoch(), epoch_before + 1);
    }

    #[test]
    fn drain_then_enqueue_starts_a_fresh_cycle() {
        let buf = UserBuffer::new(10);
        buf.enqueue(msg("m1", 0));
        buf.drain();
        match buf.enqueue(msg("m2", 5)) {
            EnqueueResult::Accepted { started_cycle, epoch } => {
                assert!(started_cycle);
                assert_eq!(epoch, 1);
            }
            other => panic!("expected Accepted, got {other:?}"),
        }
    }

    #[test]
    fn evicting_oldest_keeps_size_at_cap() {
        let buf = UserBuffer::new(2);
        buf.enqueue(msg("m1", 0));
        buf.enqueue(msg("m2", 1));
        let evicted_slot = buf.enqueue_evicting_oldest(msg("m3", 2));
        assert!(matches!(evicted_slot, EnqueueResult::Accepted { .. }));
        assert_eq!(buf.size(), 2);
        let batch = buf.drain();
        assert_eq!(batch.messages[0].message_id, "m2");
        assert_eq!(batch.messages[1].message_id, "m3");
    }

    #[test]
    fn rejects_a_message_id_already_pending_in_the_cycle() {
        let buf = UserBuffer::new(10);
        buf.enqueue(msg("m1", 0));
        assert_eq!(buf.enqueue(msg("m1", 100)), EnqueueResult::Duplicate);
        assert_eq!(buf.size(), 1);
    }

    #[test]
    fn duplicate_id_is_enqueueable_again_after_drain() {
        let buf = UserBuffer::new(10);
        buf.enqueue(msg("m1", 0));
        buf.drain();
        assert!(matches!(buf.enqueue(msg("m1", 100)), EnqueueResult::Accepted { .. }));
    }

    #[test]
    fn last_message_at_tracks_most_recent_enqueue() {
        let buf = UserBuffer::new(10);
        buf.enqueue(msg("m1", 100));
        buf.enqueue(msg("m2", 250));
        assert_eq!(buf.last_message_at(), 250);
    }
}
