use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Default)]
struct UserTimers {
    silence: Option<JoinHandle<()>>,
    timeout: Option<JoinHandle<()>>,
}

/// Single shared timer registry keyed by `userID`, guarded by its own lock.
/// Rather than hand-rolling a time wheel, each armed timer is one spawned
/// task sleeping for its delay and calling back; the registry only keeps
/// the `JoinHandle` needed to cancel or rearm it.
#[derive(Default)]
pub struct Scheduler {
    timers: Mutex<HashMap<String, UserTimers>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or rearms) the silence timer for `user_id`. Rearming aborts
    /// any previously-armed silence timer, matching the Armed → Armed(rearm)
    /// transition — the timeout timer is untouched.
    pub fn arm_silence<Fut>(&self, user_id: &str, delay: Duration, on_fire: impl FnOnce() -> Fut + Send + 'static)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire().await;
        });
        let mut timers = self.timers.lock();
        let entry = timers.entry(user_id.to_string()).or_default();
        if let Some(old) = entry.silence.take() {
            old.abort();
        }
        entry.silence = Some(handle);
    }

    /// Arms the timeout timer for `user_id`. The caller is responsible for
    /// only calling this once per Armed cycle (on the Idle → Armed
    /// transition) — the timeout bounds absolute wait from the first
    /// message and is never reset.
    pub fn arm_timeout<Fut>(&self, user_id: &str, delay: Duration, on_fire: impl FnOnce() -> Fut + Send + 'static)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire().await;
        });
        let mut timers = self.timers.lock();
        let entry = timers.entry(user_id.to_string()).or_default();
        if let Some(old) = entry.timeout.take() {
            old.abort();
        }
        entry.timeout = Some(handle);
    }

    /// Cancels only the silence timer, leaving a still-armed timeout timer
    /// in place — used when a silence callback fires, observes a fresher
    /// `lastMessageAt`, and rearms itself.
    pub fn cancel_silence(&self, user_id: &str) {
        if let Some(entry) = self.timers.lock().get_mut(user_id) {
            if let Some(h) = entry.silence.take() {
                h.abort();
            }
        }
    }

    /// Cancels both timers for `user_id`, e.g. on drain.
    pub fn cancel_all(&self, user_id: &str) {
        if let Some(mut entry) = self.timers.lock().remove(user_id) {
            if let Some(h) = entry.silence.take() {
                h.abort();
            }
            if let Some(h) = entry.timeout.take() {
                h.abort();
            }
        }
    }

    /// Aborts every outstanding timer across all users, for shutdown.
    pub fn shutdown(&self) {
        for (_, mut entry) in self.timers.lock().drain() {
            if let Some(h) = entry.silence.take() {
                h.abort();
            }
            if let Some(h) = entry.timeout.take() {
                h.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn silence_timer_fires_after_delay() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        scheduler.arm_silence("u1", Duration::from_millis(100), move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_silence_cancels_the_previous_timer() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f1 = Arc::clone(&fired);
        scheduler.arm_silence("u1", Duration::from_millis(100), move || async move {
            f1.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::advance(Duration::from_millis(50)).await;

        let f2 = Arc::clone(&fired);
        scheduler.arm_silence("u1", Duration::from_millis(100), move || async move {
            f2.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_prevents_both_timers_from_firing() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f1 = Arc::clone(&fired);
        scheduler.arm_silence("u1", Duration::from_millis(100), move || async move {
            f1.fetch_add(1, Ordering::SeqCst);
        });
        let f2 = Arc::clone(&fired);
        scheduler.arm_timeout("u1", Duration::from_millis(200), move || async move {
            f2.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.cancel_all("u1");
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_silence_leaves_timeout_armed() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f1 = Arc::clone(&fired);
        scheduler.arm_silence("u1", Duration::from_millis(50), move || async move {
            f1.fetch_add(10, Ordering::SeqCst);
        });
        let f2 = Arc::clone(&fired);
        scheduler.arm_timeout("u1", Duration::from_millis(100), move || async move {
            f2.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.cancel_silence("u1");
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
