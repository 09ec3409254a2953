use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Counting semaphore built on parking_lot primitives.
///
/// Used by the engine to enforce strict alternation between the graphics
/// prepare and dispatch threads; `acquire` blocks, `release` never does.
pub struct Semaphore {
    count: Mutex<u32>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            count: Mutex::new(initial),
            available: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Takes a permit if one is immediately available.
    pub fn try_acquire(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Blocks up to `timeout` for a permit.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            let result = self.available.wait_for(&mut count, timeout);
            if result.timed_out() && *count == 0 {
                return false;
            }
        }
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Returns a permit and wakes one waiter.
    pub fn release(&self) {
        let mut count = self.count.lock();
        *count += 1;
        drop(count);
        self.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn permits_count_down() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
    }

    #[test]
    fn release_wakes_a_blocked_acquire() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                sem.acquire();
            })
        };
        thread::sleep(Duration::from_millis(20));
        sem.release();
        waiter.join().expect("waiter thread panicked");
    }

    #[test]
    fn acquire_timeout_expires_without_permit() {
        let sem = Semaphore::new(0);
        assert!(!sem.acquire_timeout(Duration::from_millis(10)));
        sem.release();
        assert!(sem.acquire_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn strict_alternation_round_trip() {
        let s1 = Arc::new(Semaphore::new(1));
        let s2 = Arc::new(Semaphore::new(0));
        let rounds = 100;

        let partner = {
            let s1 = Arc::clone(&s1);
            let s2 = Arc::clone(&s2);
            thread::spawn(move || {
                for _ in 0..rounds {
                    s2.acquire();
                    s1.release();
                }
            })
        };

        for _ in 0..rounds {
            s1.acquire();
            s2.release();
        }
        partner.join().expect("partner thread panicked");
        assert!(s1.try_acquire());
        assert!(!s2.try_acquire());
    }
}
