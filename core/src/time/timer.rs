//! Elapsed/remaining time helpers
//!
//! All arithmetic is wrapping, so a start timestamp taken just before the
//! millisecond counter wraps still yields the right elapsed time.

use hal_abstractions::Clock;

/// Milliseconds between `start_ms` and `now_ms`.
#[inline]
pub fn elapsed_since(now_ms: u32, start_ms: u32) -> u32 {
    now_ms.wrapping_sub(start_ms)
}

/// True once `duration_ms` has elapsed since `start_ms`.
#[inline]
pub fn has_passed(now_ms: u32, start_ms: u32, duration_ms: u32) -> bool {
    elapsed_since(now_ms, start_ms) >= duration_ms
}

/// Milliseconds until `duration_ms` has elapsed since `start_ms`, 0 once it has.
#[inline]
pub fn time_left(now_ms: u32, start_ms: u32, duration_ms: u32) -> u32 {
    duration_ms.saturating_sub(elapsed_since(now_ms, start_ms))
}

/// A start timestamp plus a duration, read against a [`Clock`].
#[derive(Debug, Clone, Copy)]
pub struct Timer<C> {
    clock: C,
    start_ms: u32,
    duration_ms: u32,
}

impl<C: Clock> Timer<C> {
    /// Starts a timer of `duration_ms` now.
    pub fn new(clock: C, duration_ms: u32) -> Self {
        let start_ms = clock.now_ms();
        Self {
            clock,
            start_ms,
            duration_ms,
        }
    }

    /// Timer lasting whatever is left of `other`, clamped to `[min_ms, max_ms]`.
    pub fn bounded(other: &Timer<C>, min_ms: u32, max_ms: u32) -> Self
    where
        C: Clone,
    {
        let duration_ms = other.left().min(max_ms).max(min_ms);
        Self::new(other.clock.clone(), duration_ms)
    }

    /// Restarts the timer with a new duration.
    pub fn set(&mut self, duration_ms: u32) {
        self.start_ms = self.clock.now_ms();
        self.duration_ms = duration_ms;
    }

    /// Restarts the timer with the same duration.
    pub fn reset(&mut self) {
        self.set(self.duration_ms);
    }

    pub fn expired(&self) -> bool {
        has_passed(self.clock.now_ms(), self.start_ms, self.duration_ms)
    }

    pub fn elapsed(&self) -> u32 {
        elapsed_since(self.clock.now_ms(), self.start_ms)
    }

    pub fn left(&self) -> u32 {
        time_left(self.clock.now_ms(), self.start_ms, self.duration_ms)
    }

    pub fn duration(&self) -> u32 {
        self.duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemClock;

    #[test]
    fn test_helpers_across_wrap() {
        let start = u32::MAX - 9;
        let now = 5; // 15 ms later
        assert_eq!(elapsed_since(now, start), 15);
        assert!(has_passed(now, start, 15));
        assert!(!has_passed(now, start, 16));
        assert_eq!(time_left(now, start, 20), 5);
        assert_eq!(time_left(now, start, 10), 0);
    }

    #[test]
    fn test_timer_expiry() {
        let clock = SystemClock::new();
        let mut timer = Timer::new(&clock, 100);
        assert!(!timer.expired());
        assert_eq!(timer.left(), 100);

        clock.advance(40);
        assert_eq!(timer.elapsed(), 40);
        assert_eq!(timer.left(), 60);

        clock.advance(60);
        assert!(timer.expired());
        assert_eq!(timer.left(), 0);

        timer.reset();
        assert!(!timer.expired());
        assert_eq!(timer.left(), 100);

        timer.set(10);
        clock.advance(11);
        assert!(timer.expired());
    }

    #[test]
    fn test_bounded_timer() {
        let clock = SystemClock::new();
        let outer = Timer::new(&clock, 10_000);
        clock.advance(9_000);

        // 1000 left, clamped into [200, 5000]
        assert_eq!(Timer::bounded(&outer, 200, 5_000).duration(), 1_000);
        // Capped by max
        assert_eq!(Timer::bounded(&outer, 0, 300).duration(), 300);

        clock.advance(5_000);
        // Nothing left, raised to min
        assert_eq!(Timer::bounded(&outer, 200, 5_000).duration(), 200);
    }
}
