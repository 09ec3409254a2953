/// Fixed-window smoothing buffer for timing samples.
///
/// Keeps the last `window` samples of a metric plus running totals, so
/// callers can query a windowed average, the windowed maximum, the latest
/// sample, and all-time aggregates without storing the full history.
#[derive(Debug, Clone)]
pub struct SmoothingBuffer {
    samples: Vec<u64>,
    next: usize,
    filled: usize,
    last: u64,
    total_sum: u64,
    total_max: u64,
    count: u64,
}

impl SmoothingBuffer {
    pub fn new(window: usize) -> Self {
        Self {
            samples: vec![0; window.max(1)],
            next: 0,
            filled: 0,
            last: 0,
            total_sum: 0,
            total_max: 0,
            count: 0,
        }
    }

    pub fn add(&mut self, sample: u64) {
        self.samples[self.next] = sample;
        self.next = (self.next + 1) % self.samples.len();
        if self.filled < self.samples.len() {
            self.filled += 1;
        }
        self.last = sample;
        self.total_sum = self.total_sum.saturating_add(sample);
        self.total_max = self.total_max.max(sample);
        self.count += 1;
    }

    /// Windowed average of the most recent samples.
    pub fn smooth(&self) -> u64 {
        if self.filled == 0 {
            return 0;
        }
        let sum: u64 = self.samples[..self.filled].iter().sum();
        sum / self.filled as u64
    }

    /// Maximum over the current window.
    pub fn window_max(&self) -> u64 {
        self.samples[..self.filled].iter().copied().max().unwrap_or(0)
    }

    /// The most recently added sample.
    pub fn current(&self) -> u64 {
        self.last
    }

    pub fn total_avg(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_sum / self.count
        }
    }

    pub fn total_max(&self) -> u64 {
        self.total_max
    }

    pub fn total_sum(&self) -> u64 {
        self.total_sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
