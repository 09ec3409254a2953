use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::clock::Clock;
use crate::stats::SmoothingBuffer;

/// Work closure executed by the scheduler loop. Errors propagate out of
/// [`Scheduler::run`] to the caller, which is expected to treat them as a
/// fault of the whole thread.
pub type Action = Box<dyn FnMut() -> anyhow::Result<()> + Send>;

const STATS_WINDOW: usize = 100;
/// Some systems cannot sleep with better granularity than this; shorter
/// requested sleeps are rounded up to avoid busy looping.
const MIN_SLEEP_US: u64 = 1_000;

/// How a schedule decides when it is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Runs exactly once, `delay` after creation, then disables itself.
    Once,
    /// Best-effort filler: always due, runs whenever nothing else is.
    Empty,
    /// Phase-locked to the steady clock with bounded catch-up; backlog
    /// beyond `max_steady_periods` periods is dropped, not replayed.
    SteadyPeriodic,
    /// Self-paced: next due time is measured from when the action last
    /// finished, so cadence drifts under load instead of starving others.
    FreePeriodic,
    /// Never due on its own; runs once per `trigger()` call.
    External,
}

impl ScheduleKind {
    fn is_periodic(self) -> bool {
        matches!(self, ScheduleKind::SteadyPeriodic | ScheduleKind::FreePeriodic)
    }
}

/// Static configuration of a schedule.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Diagnostic name, used only in logs and errors.
    pub name: &'static str,
    pub kind: ScheduleKind,
    /// Tick period in microseconds, for the periodic kinds.
    pub period_us: u64,
    /// Initial delay in microseconds before the schedule first becomes due.
    pub delay_us: u64,
    /// Higher priority runs first when several schedules are due at once.
    pub priority: i32,
    /// Cap on retroactive catch-up ticks for `SteadyPeriodic`.
    pub max_steady_periods: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            name: "<unnamed>",
            kind: ScheduleKind::Once,
            period_us: 1_000,
            delay_us: 0,
            priority: 0,
            max_steady_periods: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("schedule '{0}' is periodic but has a zero period")]
    ZeroPeriod(&'static str),
    #[error("schedule handle no longer refers to a live schedule")]
    StaleHandle,
    #[error("schedule '{0}' is not an external schedule and cannot be triggered")]
    NotTriggerable(&'static str),
    #[error("schedule '{0}' is not periodic and has no period")]
    NotPeriodic(&'static str),
}

/// Per-schedule state shared with handles on other threads.
struct ScheduleShared {
    name: &'static str,
    kind: ScheduleKind,
    period_us: AtomicU64,
    priority: AtomicI32,
    max_steady_periods: u32,
    enabled: AtomicBool,
    /// For `External`: set by `trigger()`, cleared after the next run.
    armed: AtomicBool,
    /// Set when the period changed, so the loop recomputes the due time
    /// instead of honoring one derived from the old period.
    rearm: AtomicBool,
    removed: AtomicBool,
    runs: AtomicU32,
    stats: Mutex<ScheduleStats>,
}

#[derive(Debug)]
struct ScheduleStats {
    delays: SmoothingBuffer,
    durations: SmoothingBuffer,
}

impl ScheduleStats {
    fn new() -> Self {
        Self {
            delays: SmoothingBuffer::new(STATS_WINDOW),
            durations: SmoothingBuffer::new(STATS_WINDOW),
        }
    }
}

/// State shared between the scheduler loop and all of its handles.
struct SchedulerCore {
    stopping: AtomicBool,
    wake_pending: Mutex<bool>,
    wake: Condvar,
    registry: Mutex<Vec<Option<RegistrySlot>>>,
}

struct RegistrySlot {
    generation: u32,
    shared: Arc<ScheduleShared>,
}

impl SchedulerCore {
    fn notify(&self) {
        let mut pending = self.wake_pending.lock();
        *pending = true;
        drop(pending);
        self.wake.notify_one();
    }

    fn lookup(&self, index: usize, generation: u32) -> Result<Arc<ScheduleShared>, SchedulerError> {
        let registry = self.registry.lock();
        let slot = registry
            .get(index)
            .and_then(|slot| slot.as_ref())
            .ok_or(SchedulerError::StaleHandle)?;
        if slot.generation != generation || slot.shared.removed.load(Ordering::Acquire) {
            return Err(SchedulerError::StaleHandle);
        }
        Ok(Arc::clone(&slot.shared))
    }
}

/// Cheap, cloneable remote control for stopping a scheduler from any thread.
#[derive(Clone)]
pub struct SchedulerStopHandle {
    core: Arc<SchedulerCore>,
}

impl SchedulerStopHandle {
    /// Idempotent; the current or next loop iteration returns after
    /// finishing any in-flight action.
    pub fn stop(&self) {
        self.core.stopping.store(true, Ordering::Release);
        self.core.notify();
    }

    pub fn is_stopping(&self) -> bool {
        self.core.stopping.load(Ordering::Acquire)
    }
}

/// Non-owning, generational handle to a schedule.
///
/// Handles stay valid while the schedule lives in its scheduler; all methods
/// are safe to call from any thread concurrently with [`Scheduler::run`] and
/// are observed at the next scheduling decision.
#[derive(Clone)]
pub struct ScheduleHandle {
    core: Arc<SchedulerCore>,
    index: usize,
    generation: u32,
}

impl ScheduleHandle {
    fn shared(&self) -> Result<Arc<ScheduleShared>, SchedulerError> {
        self.core.lookup(self.index, self.generation)
    }

    /// Marks an `External` schedule due and wakes a sleeping loop. Multiple
    /// triggers before the loop observes the schedule coalesce into one run.
    pub fn trigger(&self) -> Result<(), SchedulerError> {
        let shared = self.shared()?;
        if shared.kind != ScheduleKind::External {
            return Err(SchedulerError::NotTriggerable(shared.name));
        }
        shared.armed.store(true, Ordering::Release);
        self.core.notify();
        Ok(())
    }

    pub fn period(&self) -> Result<u64, SchedulerError> {
        let shared = self.shared()?;
        if !shared.kind.is_periodic() {
            return Err(SchedulerError::NotPeriodic(shared.name));
        }
        Ok(shared.period_us.load(Ordering::Acquire))
    }

    pub fn set_period(&self, period_us: u64) -> Result<(), SchedulerError> {
        let shared = self.shared()?;
        if !shared.kind.is_periodic() {
            return Err(SchedulerError::NotPeriodic(shared.name));
        }
        if period_us == 0 {
            return Err(SchedulerError::ZeroPeriod(shared.name));
        }
        shared.period_us.store(period_us, Ordering::Release);
        shared.rearm.store(true, Ordering::Release);
        self.core.notify();
        Ok(())
    }

    pub fn priority(&self) -> Result<i32, SchedulerError> {
        Ok(self.shared()?.priority.load(Ordering::Acquire))
    }

    pub fn set_priority(&self, priority: i32) -> Result<(), SchedulerError> {
        self.shared()?.priority.store(priority, Ordering::Release);
        Ok(())
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), SchedulerError> {
        self.shared()?.enabled.store(enabled, Ordering::Release);
        self.core.notify();
        Ok(())
    }

    /// Total number of completed runs.
    pub fn runs_count(&self) -> Result<u32, SchedulerError> {
        Ok(self.shared()?.runs.load(Ordering::Acquire))
    }

    /// Windowed average delay between due time and actual start, in µs.
    pub fn delay_avg(&self) -> Result<u64, SchedulerError> {
        Ok(self.shared()?.stats.lock().delays.smooth())
    }

    /// Windowed average action duration, in µs.
    pub fn duration_avg(&self) -> Result<u64, SchedulerError> {
        Ok(self.shared()?.stats.lock().durations.smooth())
    }

    pub fn duration_max(&self) -> Result<u64, SchedulerError> {
        Ok(self.shared()?.stats.lock().durations.total_max())
    }

    /// Detaches the schedule from its scheduler; the slot is reclaimed at
    /// the next loop iteration and the handle becomes stale.
    pub fn remove(&self) -> Result<(), SchedulerError> {
        let shared = self.shared()?;
        shared.removed.store(true, Ordering::Release);
        self.core.notify();
        Ok(())
    }
}

struct Entry {
    shared: Arc<ScheduleShared>,
    action: Action,
    /// Next due time in clock micros; `None` until the loop assigns the
    /// initial delay.
    due: Option<u64>,
}

/// Priority-driven work loop for one thread.
///
/// Owns a collection of schedules, repeatedly picks the most urgent one,
/// runs its action, and reschedules it. The loop itself is single-threaded;
/// handles provide the thread-safe surface (trigger, period changes, stop).
pub struct Scheduler {
    core: Arc<SchedulerCore>,
    clock: Clock,
    entries: Vec<Option<Entry>>,
    generations: Vec<u32>,
    max_sleep_us: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// Builds a scheduler on an existing clock so its timestamps line up
    /// with other components sharing that clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                stopping: AtomicBool::new(false),
                wake_pending: Mutex::new(false),
                wake: Condvar::new(),
                registry: Mutex::new(Vec::new()),
            }),
            clock,
            entries: Vec::new(),
            generations: Vec::new(),
            max_sleep_us: 1_000_000,
        }
    }

    /// Upper bound on a single sleep, so period/priority changes made
    /// without a wake-up are still observed reasonably soon.
    pub fn set_max_sleep(&mut self, max_sleep_us: u64) {
        self.max_sleep_us = max_sleep_us.max(MIN_SLEEP_US);
    }

    pub fn stop_handle(&self) -> SchedulerStopHandle {
        SchedulerStopHandle {
            core: Arc::clone(&self.core),
        }
    }

    /// Thread-safe stop; equivalent to `stop_handle().stop()`.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Registers a new schedule. Fails fast on misconfiguration; the
    /// schedule does not run until [`Scheduler::run`] is active.
    pub fn new_schedule(
        &mut self,
        config: ScheduleConfig,
        action: Action,
    ) -> Result<ScheduleHandle, SchedulerError> {
        if config.kind.is_periodic() && config.period_us == 0 {
            return Err(SchedulerError::ZeroPeriod(config.name));
        }
        let shared = Arc::new(ScheduleShared {
            name: config.name,
            kind: config.kind,
            period_us: AtomicU64::new(config.period_us),
            priority: AtomicI32::new(config.priority),
            max_steady_periods: config.max_steady_periods.max(1),
            enabled: AtomicBool::new(true),
            armed: AtomicBool::new(false),
            rearm: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            runs: AtomicU32::new(0),
            stats: Mutex::new(ScheduleStats::new()),
        });
        // Initial delay is applied relative to creation time, not run() time.
        let due = Some(self.clock.micros() + config.delay_us);

        let index = self
            .entries
            .iter()
            .position(|entry| entry.is_none())
            .unwrap_or_else(|| {
                self.entries.push(None);
                self.generations.push(0);
                self.entries.len() - 1
            });
        self.generations[index] = self.generations[index].wrapping_add(1);
        let generation = self.generations[index];
        self.entries[index] = Some(Entry {
            shared: Arc::clone(&shared),
            action,
            due,
        });

        let mut registry = self.core.registry.lock();
        if registry.len() <= index {
            registry.resize_with(index + 1, || None);
        }
        registry[index] = Some(RegistrySlot { generation, shared });
        drop(registry);
        self.core.notify();

        Ok(ScheduleHandle {
            core: Arc::clone(&self.core),
            index,
            generation,
        })
    }

    /// Drops all schedules; outstanding handles become stale.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.core.registry.lock().clear();
    }

    /// Applies handle-side mutations: drops removed schedules and recomputes
    /// due times after period changes.
    fn refresh_entries(&mut self, now: u64) {
        for index in 0..self.entries.len() {
            let (removed, rearm) = match self.entries[index].as_ref() {
                None => continue,
                Some(entry) => (
                    entry.shared.removed.load(Ordering::Acquire),
                    entry.shared.rearm.swap(false, Ordering::AcqRel),
                ),
            };
            if removed {
                self.entries[index] = None;
                self.core.registry.lock()[index] = None;
            } else if rearm {
                if let Some(entry) = self.entries[index].as_mut() {
                    let period = entry.shared.period_us.load(Ordering::Acquire).max(1);
                    entry.due = Some(now + period);
                }
            }
        }
    }

    fn live_entries(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    /// Due time of an entry at `now`, or `None` when it cannot become due
    /// without external intervention.
    fn due_at(entry: &Entry, now: u64) -> Option<u64> {
        let shared = &entry.shared;
        if !shared.enabled.load(Ordering::Acquire) {
            return None;
        }
        let due = entry.due?;
        match shared.kind {
            ScheduleKind::Empty => Some(now),
            ScheduleKind::External => {
                if shared.armed.load(Ordering::Acquire) {
                    Some(due)
                } else {
                    None
                }
            }
            _ => Some(due),
        }
    }

    fn pick_due(&self, now: u64) -> Option<usize> {
        let mut best: Option<(i32, u64, usize)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            let Some(entry) = entry else { continue };
            let Some(due) = Self::due_at(entry, now) else {
                continue;
            };
            if due > now {
                continue;
            }
            let priority = entry.shared.priority.load(Ordering::Acquire);
            let candidate = (priority, due, index);
            best = match best {
                None => Some(candidate),
                // Higher priority first; ties broken by earliest due time.
                Some(current) => {
                    if candidate.0 > current.0
                        || (candidate.0 == current.0 && candidate.1 < current.1)
                    {
                        Some(candidate)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best.map(|(_, _, index)| index)
    }

    fn nearest_due(&self, now: u64) -> Option<u64> {
        self.entries
            .iter()
            .flatten()
            .filter(|entry| entry.shared.kind != ScheduleKind::Empty)
            .filter_map(|entry| Self::due_at(entry, now))
            .min()
    }

    fn sleep_until_due(&self, now: u64) {
        let nearest = self.nearest_due(now);
        let sleep_us = nearest
            .map(|due| due.saturating_sub(now))
            .unwrap_or(self.max_sleep_us)
            .clamp(MIN_SLEEP_US, self.max_sleep_us);
        let mut pending = self.core.wake_pending.lock();
        if !*pending {
            self.core
                .wake
                .wait_for(&mut pending, Duration::from_micros(sleep_us));
        }
        *pending = false;
    }

    fn run_entry(&mut self, index: usize) -> anyhow::Result<()> {
        let Some(entry) = self.entries[index].as_mut() else {
            return Ok(());
        };
        let shared = Arc::clone(&entry.shared);
        let due = entry.due.unwrap_or(0);
        let start = self.clock.micros();

        let result = (entry.action)();

        let end = self.clock.micros();
        {
            let mut stats = shared.stats.lock();
            stats.delays.add(start.saturating_sub(due));
            stats.durations.add(end - start);
        }
        shared.runs.fetch_add(1, Ordering::AcqRel);

        match shared.kind {
            ScheduleKind::Once => {
                shared.enabled.store(false, Ordering::Release);
            }
            ScheduleKind::SteadyPeriodic => {
                let period = shared.period_us.load(Ordering::Acquire).max(1);
                let behind = end.saturating_sub(due) / period;
                if behind >= u64::from(shared.max_steady_periods) {
                    tracing::warn!(
                        schedule = shared.name,
                        skipped = behind,
                        "schedule cannot keep up; dropping backlog"
                    );
                    entry.due = Some(due + behind * period);
                } else {
                    entry.due = Some(due + period);
                }
            }
            ScheduleKind::FreePeriodic => {
                let period = shared.period_us.load(Ordering::Acquire).max(1);
                entry.due = Some(end + period);
            }
            ScheduleKind::External => {
                shared.armed.store(false, Ordering::Release);
                // Re-arm point stays at "now" so delay statistics remain
                // meaningful for the next trigger.
                entry.due = Some(end);
            }
            ScheduleKind::Empty => {}
        }

        result
    }

    /// Blocking loop; returns when stopped, when no schedules remain, or
    /// with the first action error.
    pub fn run(&mut self) -> anyhow::Result<()> {
        while !self.core.stopping.load(Ordering::Acquire) {
            let now = self.clock.micros();
            self.refresh_entries(now);
            if self.live_entries() == 0 {
                break;
            }
            match self.pick_due(now) {
                Some(index) => self.run_entry(index)?,
                None => self.sleep_until_due(now),
            }
        }
        Ok(())
    }

    /// Resets the stop flag so the scheduler can be run again.
    pub fn reset(&mut self) {
        self.core.stopping.store(false, Ordering::Release);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
