use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Deterministic clock injected into the project under test.
#[derive(Clone)]
pub struct MockClock {
    now: Arc<AtomicI64>,
}

impl MockClock {
    /// Starts well clear of the epoch so mtime grace logic behaves.
    pub fn new() -> Self {
        Self {
            now: Arc::new(AtomicI64::new(1_700_000_000)),
        }
    }

    /// Current mock time in Unix seconds.
    pub fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    /// Advances the clock.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_secs() as i64, Ordering::SeqCst);
    }

    /// A provider closure for `Project::with_time_provider`.
    pub fn as_provider(&self) -> impl Fn() -> i64 + Send + Sync + 'static {
        let now = Arc::clone(&self.now);
        move || now.load(Ordering::SeqCst)
    }
}
