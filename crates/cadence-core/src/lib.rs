//! Thread orchestration primitives: a priority scheduler, non-blocking
//! swap-buffer hand-off, timing reconciliation, and the small clock and
//! statistics helpers the rest of the engine builds on.

pub mod clock;
pub mod sched;
pub mod stats;
pub mod swap;
pub mod sync;
pub mod timing;

pub use clock::Clock;
pub use sched::{
    Action, ScheduleConfig, ScheduleHandle, ScheduleKind, Scheduler, SchedulerError,
    SchedulerStopHandle,
};
pub use stats::SmoothingBuffer;
pub use swap::{SwapBufferConfig, SwapBufferError, SwapBufferGuard, SwapReadGuard, SwapWriteGuard};
pub use sync::Semaphore;
pub use timing::InterpolationTimingCorrector;
