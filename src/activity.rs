//! Activity Clock: monotonic "time since last traffic" primitive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe, atomically resettable elapsed-time counter.
///
/// Stores the start instant as nanoseconds since an arbitrary epoch instant
/// captured at construction, so it can live behind an `AtomicU64` without a
/// lock.
pub struct ActivityClock {
    epoch: Instant,
    marked_at_nanos: AtomicU64,
}

impl ActivityClock {
    pub fn new() -> Self {
        let epoch = Instant::now();
        Self {
            epoch,
            marked_at_nanos: AtomicU64::new(0),
        }
    }

    /// Records activity now.
    pub fn mark(&self) {
        let nanos = self.epoch.elapsed().as_nanos() as u64;
        self.marked_at_nanos.store(nanos, Ordering::SeqCst);
    }

    /// Time elapsed since the last `mark()` (or since construction, if never marked).
    pub fn elapsed(&self) -> Duration {
        let now_nanos = self.epoch.elapsed().as_nanos() as u64;
        let marked_nanos = self.marked_at_nanos.load(Ordering::SeqCst);
        Duration::from_nanos(now_nanos.saturating_sub(marked_nanos))
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn elapsed_grows_until_marked_again() {
        let clock = ActivityClock::new();
        clock.mark();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(clock.elapsed() >= Duration::from_millis(15));
        clock.mark();
        assert!(clock.elapsed() < Duration::from_millis(15));
    }
}
