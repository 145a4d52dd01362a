//! Time sources for the scheduler.
//!
//! The scheduler measures time in [`Ticks`] (nanoseconds since a clock-specific epoch). All
//! token arithmetic is done in ticks, so a clock only needs to be monotonic.

use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::time::Instant;

/// Nanoseconds since the epoch of a [`Clock`].
pub type Ticks = i64;

/// A monotonic time source.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time in ticks.
    fn now(&self) -> Ticks;
}

/// A [`Clock`] backed by [`tokio::time::Instant`].
///
/// Because it reads the Tokio clock, it follows `tokio::time::pause` and `advance` in tests,
/// which keeps it consistent with timers armed through [`TokioClock::instant`].
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    epoch: Instant,
}

impl TokioClock {
    /// Creates a clock whose epoch is the current instant.
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    /// Converts a tick value back to an [`Instant`], e.g. to arm a timer.
    pub fn instant(&self, ticks: Ticks) -> Instant {
        self.epoch + Duration::from_nanos(ticks.max(0) as u64)
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    #[inline]
    fn now(&self) -> Ticks {
        self.epoch.elapsed().as_nanos() as Ticks
    }
}

/// A manually driven [`Clock`]. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock starting at tick zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.advance_ticks(duration.as_nanos() as Ticks);
    }

    /// Moves the clock forward by `ticks`.
    pub fn advance_ticks(&self, ticks: Ticks) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute tick value. Going backwards is not allowed.
    pub fn set(&self, ticks: Ticks) {
        self.now.fetch_max(ticks, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Ticks {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_and_monotonic() {
        let clock = ManualClock::new();
        let other = clock.clone();

        clock.advance(Duration::from_micros(3));
        assert_eq!(other.now(), 3_000);

        other.set(1_000);
        assert_eq!(clock.now(), 3_000, "clock must not go backwards");

        other.set(10_000);
        assert_eq!(clock.now(), 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        assert_eq!(clock.now(), 0);

        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(clock.now(), 5_000_000);
        assert_eq!(clock.instant(clock.now()), Instant::now());
    }
}
