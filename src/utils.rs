use std::time::{Duration, Instant};

/// Fixed-cadence scheduler.
///
/// Ticks are laid out on a grid `start + n * interval` and do not drift with
/// the time spent between two [`Ticker::wait`] calls. A caller that falls
/// behind gets the missed ticks back to back until it has caught up.
#[derive(Debug)]
pub struct Ticker {
    interval: Duration,
    next: Instant,
}

impl Ticker {
    /// Starts a grid at the current instant.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Advances to the next tick and sleeps until it.
    pub fn wait(&mut self) {
        // An interval too large to represent means "never"; stay on the
        // current tick instead of overflowing.
        if let Some(next) = self.next.checked_add(self.interval) {
            self.next = next;
        }
        let remaining = self.next.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}
