pub mod sliding_window;
pub mod token_bucket;

pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

/// Composition of a `TokenBucket` (smooth, bursty) and a `SlidingWindow`
/// (hard anti-flood ceiling) for one user. One instance is created lazily
/// per user and cached by the `BatchingService`.
#[derive(Debug)]
pub struct HybridLimiter {
    bucket: TokenBucket,
    window: SlidingWindow,
}

impl HybridLimiter {
    pub fn new(bucket: TokenBucket, window: SlidingWindow) -> Self {
        Self { bucket, window }
    }

    /// `tryAcquire = bucket.tryConsume() AND window.tryRecord()`. Both
    /// sub-checks commit unconditionally, even if the other one rejects: a
    /// sliding-window rejection still "wastes" the token the bucket just
    /// handed out. This is intentional — both limiters are ceilings, not a
    /// single joint gate.
    pub fn try_acquire(&self, now_ms: i64) -> bool {
        let bucket_ok = self.bucket.try_consume(now_ms);
        let window_ok = self.window.try_record(now_ms);
        bucket_ok && window_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_within_both_ceilings() {
        let limiter = HybridLimiter::new(TokenBucket::new(600, 5, 0), SlidingWindow::new(1_000, 5));
        for _ in 0..5 {
            assert!(limiter.try_acquire(0));
        }
        assert!(!limiter.try_acquire(0));
    }

    #[test]
    fn window_rejection_still_spends_a_token() {
        // Bucket has ample capacity; window caps at 1 per second.
        let limiter = HybridLimiter::new(TokenBucket::new(6_000, 10, 0), SlidingWindow::new(1_000, 1));
        assert!(limiter.try_acquire(0));
        // Window rejects the second call even though the bucket would allow it —
        // but the bucket still committed its decrement for this call.
        assert!(!limiter.try_acquire(0));
    }

    #[test]
    fn bucket_exhaustion_rejects_even_with_window_room() {
        let limiter = HybridLimiter::new(TokenBucket::new(60, 1, 0), SlidingWindow::new(1_000, 100));
        assert!(limiter.try_acquire(0));
        assert!(!limiter.try_acquire(0));
    }
}
