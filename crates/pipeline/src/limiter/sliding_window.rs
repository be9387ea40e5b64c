use parking_lot::Mutex;
use std::collections::VecDeque;

/// Hard anti-flood ceiling over a rolling interval. Timestamps are stored
/// in arrival order so pruning expired entries is a prefix removal.
#[derive(Debug)]
pub struct SlidingWindow {
    window_ms: i64,
    max_in_window: usize,
    timestamps: Mutex<VecDeque<i64>>,
}

impl SlidingWindow {
    pub fn new(window_ms: i64, max_in_window: usize) -> Self {
        Self { window_ms, max_in_window, timestamps: Mutex::new(VecDeque::new()) }
    }

    /// Prunes entries older than `now - window_ms`, then admits `now` only
    /// if that leaves room under `max_in_window`.
    pub fn try_record(&self, now_ms: i64) -> bool {
        let mut timestamps = self.timestamps.lock();
        let cutoff = now_ms - self.window_ms;
        while matches!(timestamps.front(), Some(&front) if front < cutoff) {
            timestamps.pop_front();
        }

        if timestamps.len() < self.max_in_window {
            timestamps.push_back(now_ms);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_cap_then_rejects() {
        let window = SlidingWindow::new(1_000, 3);
        assert!(window.try_record(0));
        assert!(window.try_record(0));
        assert!(window.try_record(0));
        assert!(!window.try_record(0));
    }

    #[test]
    fn prunes_expired_entries_before_admitting() {
        let window = SlidingWindow::new(1_000, 2);
        assert!(window.try_record(0));
        assert!(window.try_record(0));
        assert!(!window.try_record(500));
        // First two entries now older than window relative to t=1_500.
        assert!(window.try_record(1_500));
    }
}
