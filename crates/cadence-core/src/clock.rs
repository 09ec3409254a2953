use std::time::Instant;

/// Monotonic microsecond clock shared by the scheduler and the engine loops.
///
/// All timing arithmetic in cadence is done in integer microseconds measured
/// from a single origin so that emit and dispatch timestamps taken on
/// different threads stay comparable.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Microseconds elapsed since the clock was created.
    #[inline]
    pub fn micros(&self) -> u64 {
        let elapsed = self.origin.elapsed();
        elapsed.as_micros().min(u128::from(u64::MAX)) as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn micros_are_monotonic() {
        let clock = Clock::new();
        let a = clock.micros();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.micros();
        assert!(b > a);
        assert!(b - a >= 1_000);
    }

    #[test]
    fn copies_share_the_origin() {
        let clock = Clock::new();
        let copy = clock;
        std::thread::sleep(Duration::from_millis(1));
        let a = clock.micros();
        let b = copy.micros();
        assert!(a.abs_diff(b) < 5_000);
    }
}
