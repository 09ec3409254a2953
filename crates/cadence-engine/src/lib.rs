//! Multi-threaded gameloop orchestration.
//!
//! The engine runs application logic across four cooperating threads:
//! control (game state updates), graphics prepare (interpolation and render
//! pass building), graphics dispatch (submission and presentation) and
//! sound (mixing). Threads exchange time-stamped snapshots through
//! non-blocking swap buffers and never wait on each other inside a tick;
//! a slow thread makes its peers skip or reuse snapshots instead of
//! stalling the pipeline.
//!
//! Applications implement the traits in [`subsystems`], bundle them into
//! [`EngineParts`] and drive the [`Engine`] lifecycle:
//! `initialize -> start -> finalize`, with `start` blocking until some
//! thread calls [`EngineStopHandle::stop`].

pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod stats;
pub mod subsystems;

pub use config::{EngineConfig, ProfilingConfig};
pub use engine::{Emit, Engine, EngineScheduleHandles};
pub use lifecycle::{EngineError, EngineState, EngineStopHandle};
pub use stats::{EngineMetric, FrameSnapshot, StatsCollector, StatsMode};
pub use subsystems::{
    AssetStore, ControlLogic, DispatchStats, EngineHooks, EngineParts, EngineThread,
    GraphicsDispatch, GraphicsPrepare, Hook, NullAssets, SoundMixer,
};
