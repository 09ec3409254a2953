use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use cadence_core::SchedulerStopHandle;

use crate::subsystems::EngineThread;

/// Engine lifecycle states, in the only order they may be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum EngineState {
    Uninitialized = 0,
    Initializing = 1,
    Initialized = 2,
    Starting = 3,
    Running = 4,
    Stopped = 5,
    Finalizing = 6,
    Finalized = 7,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Initialized,
            3 => Self::Starting,
            4 => Self::Running,
            5 => Self::Stopped,
            6 => Self::Finalizing,
            _ => Self::Finalized,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid lifecycle transition to {to:?} while {actual:?}")]
    InvalidLifecycle { actual: EngineState, to: EngineState },
    #[error("engine thread '{0}' panicked")]
    ThreadPanicked(&'static str),
    #[error("invalid engine configuration: {0}")]
    Config(&'static str),
    #[error("engine is not initialized")]
    NotInitialized,
}

/// Atomic lifecycle state shared across all engine threads.
pub(crate) struct LifecycleState(AtomicU8);

impl LifecycleState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(EngineState::Uninitialized as u8))
    }

    pub(crate) fn current(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves `from -> to`, failing when the engine is in any other state.
    /// Transitions only ever move forward.
    pub(crate) fn advance(&self, from: EngineState, to: EngineState) -> Result<(), EngineError> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| EngineError::InvalidLifecycle {
                actual: EngineState::from_u8(actual),
                to,
            })
    }

    /// Jumps straight to `to`, skipping the step checks. Reserved for the
    /// failed-initialization path, which abandons the normal order and
    /// leaves the engine terminal.
    pub(crate) fn force(&self, to: EngineState) {
        self.0.store(to as u8, Ordering::Release);
    }
}

/// Which part of a thread's lifecycle a stage belongs to; failures during
/// finalization are logged but no longer escalate to a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StagePhase {
    Initialize,
    Run,
    Finalize,
}

/// Runs one lifecycle stage of an engine thread. A failing stage is logged
/// with its thread and phase; outside finalization it also requests an
/// engine-wide stop so the remaining threads wind down instead of spinning
/// against a dead peer.
pub(crate) fn run_stage(
    thread: EngineThread,
    phase: StagePhase,
    stop: &StopController,
    stage: impl FnOnce() -> anyhow::Result<()>,
) {
    if let Err(error) = stage() {
        tracing::error!(?thread, ?phase, error = ?error, "engine stage failed");
        if phase != StagePhase::Finalize {
            stop.request();
        }
    }
}

/// Fans a stop request out to the engine flag and every registered
/// scheduler, so blocked loops wake up and observe it.
pub(crate) struct StopController {
    stopping: AtomicBool,
    schedulers: Mutex<Vec<SchedulerStopHandle>>,
}

impl StopController {
    pub(crate) fn new() -> Self {
        Self {
            stopping: AtomicBool::new(false),
            schedulers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, handle: SchedulerStopHandle) {
        self.schedulers.lock().push(handle);
    }

    pub(crate) fn request(&self) {
        if !self.stopping.swap(true, Ordering::AcqRel) {
            tracing::info!("stopping engine");
        }
        for handle in self.schedulers.lock().iter() {
            handle.stop();
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// Cloneable handle for stopping the engine from any thread. Stopping is
/// idempotent and asynchronous: the gameloops finish their current tick
/// before winding down.
#[derive(Clone)]
pub struct EngineStopHandle {
    pub(crate) inner: std::sync::Arc<StopController>,
}

impl EngineStopHandle {
    pub fn stop(&self) {
        self.inner.request();
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.is_stopping()
    }
}
