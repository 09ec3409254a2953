/// Drift-correcting reconciliation between an emit clock and a dispatch clock.
///
/// A producer thread stamps each snapshot with the time it was emitted; the
/// consumer runs on its own cadence and needs an effective dispatch time that
/// tracks the emit clock smoothly instead of jumping with scheduling jitter.
/// The corrector is a small integral controller: it accumulates a signed
/// correction and nudges it by `period / 500` per call whenever
/// `dispatch + correction` falls outside `[emit, emit + period]`. The output
/// is clamped so it never precedes the snapshot it describes and never runs
/// backwards for a given instance.
#[derive(Debug, Clone)]
pub struct InterpolationTimingCorrector {
    correction: i64,
    last_output: u64,
}

/// Initial correction bias in microseconds. Seeding slightly negative makes
/// the consumer start a little behind the emit clock, buffering one snapshot
/// rather than starving on the first ticks.
pub const INITIAL_CORRECTION_US: i64 = -70_000;

impl InterpolationTimingCorrector {
    pub fn new() -> Self {
        Self {
            correction: INITIAL_CORRECTION_US,
            last_output: 0,
        }
    }

    /// Returns the corrected dispatch time for a snapshot emitted at
    /// `emit_time` and consumed at `dispatch_time`, with `period` being the
    /// nominal tick period of the consumer. All values are in microseconds
    /// on the same clock.
    pub fn correct(&mut self, emit_time: u64, dispatch_time: u64, period: u64) -> u64 {
        let step = (period / 500).max(1) as i64;
        let reconciled = dispatch_time as i64 + self.correction;
        if reconciled > emit_time as i64 + period as i64 {
            // Consumer runs ahead of production; ease off.
            self.correction -= step;
        } else if reconciled < emit_time as i64 {
            // Consumer fell behind; catch up.
            self.correction += step;
        }
        let corrected = (dispatch_time as i64 + self.correction)
            .max(emit_time as i64)
            .max(0) as u64;
        let output = corrected.max(self.last_output);
        self.last_output = output;
        output
    }

    /// Whole periods the consumer currently lags behind the emit clock, after
    /// correction. Non-zero values mean the consumer has fallen far behind
    /// and may want to skip ticks instead of replaying them.
    pub fn periods_behind(&self, emit_time: u64, dispatch_time: u64, period: u64) -> u64 {
        if period == 0 {
            return 0;
        }
        let reconciled = dispatch_time as i64 + self.correction;
        let lag = emit_time as i64 - reconciled;
        if lag <= 0 {
            0
        } else {
            lag as u64 / period
        }
    }

    /// Current accumulated correction in microseconds.
    pub fn correction(&self) -> i64 {
        self.correction
    }
}

impl Default for InterpolationTimingCorrector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PERIOD: u64 = 50_000;

    fn run_until_converged(skew: i64, steps: usize) -> (bool, bool) {
        let mut itc = InterpolationTimingCorrector::new();
        let base: u64 = 10_000_000;
        let mut previous = 0u64;
        let mut monotonic = true;
        let mut converged = false;
        for i in 0..steps {
            let emit = base + i as u64 * PERIOD;
            let dispatch = (emit as i64 + skew).max(0) as u64;
            let out = itc.correct(emit, dispatch, PERIOD);
            if out < previous {
                monotonic = false;
            }
            previous = out;
            let reconciled = dispatch as i64 + itc.correction();
            converged = reconciled >= emit as i64 && reconciled <= (emit + PERIOD) as i64;
        }
        (converged, monotonic)
    }

    #[test]
    fn no_correction_inside_the_window() {
        let mut itc = InterpolationTimingCorrector::new();
        let emit = 1_000_000;
        // Dispatch chosen so dispatch + correction lands inside the window.
        let dispatch = emit + 80_000;
        let before = itc.correction();
        itc.correct(emit, dispatch, PERIOD);
        assert_eq!(itc.correction(), before);
    }

    #[test]
    fn output_never_precedes_the_emit_time() {
        let mut itc = InterpolationTimingCorrector::new();
        let emit = 5_000_000;
        let out = itc.correct(emit, emit, PERIOD);
        assert!(out >= emit);
    }

    #[test]
    fn correction_step_is_bounded() {
        let mut itc = InterpolationTimingCorrector::new();
        let before = itc.correction();
        itc.correct(1_000_000, 90_000_000, PERIOD);
        let delta = (itc.correction() - before).abs();
        assert!(delta <= (PERIOD / 500) as i64);
    }

    #[test]
    fn converges_from_large_positive_skew() {
        let (converged, monotonic) = run_until_converged(10 * PERIOD as i64, 10_000);
        assert!(converged, "did not converge from +10 periods of skew");
        assert!(monotonic);
    }

    #[test]
    fn converges_from_large_negative_skew() {
        let (converged, monotonic) = run_until_converged(-10 * (PERIOD as i64), 10_000);
        assert!(converged, "did not converge from -10 periods of skew");
        assert!(monotonic);
    }

    #[test]
    fn reports_backlog_in_whole_periods() {
        let itc = InterpolationTimingCorrector::new();
        let emit = 10_000_000;
        // correction starts at -70ms; dispatch three periods early on top.
        let dispatch = emit - 3 * PERIOD;
        let behind = itc.periods_behind(emit, dispatch, PERIOD);
        assert!(behind >= 3);
        assert_eq!(itc.periods_behind(emit, emit + PERIOD, PERIOD), 0);
    }

    proptest! {
        #[test]
        fn converges_from_any_skew_within_ten_periods(
            skew in -(10 * PERIOD as i64)..(10 * PERIOD as i64)
        ) {
            let (converged, monotonic) = run_until_converged(skew, 20_000);
            prop_assert!(converged);
            prop_assert!(monotonic);
        }
    }
}
