use serde::{Deserialize, Serialize};

use crate::lifecycle::EngineError;
use crate::subsystems::EngineThread;

/// Engine configuration. All fields have sensible defaults, so partial
/// config files only override what they mention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Control update tick period in microseconds (~60 Hz by default).
    pub control_period_us: u64,
    /// Sound mixing tick period in microseconds.
    pub sound_period_us: u64,
    /// Period of the asset synchronization schedule on the control thread.
    pub control_assets_period_us: u64,
    /// Period of the asset processing schedule on the sound thread.
    pub sound_assets_period_us: u64,
    /// How many times one asset-sync tick retries acquiring the subsystem
    /// asset locks before postponing to the next tick.
    pub asset_sync_attempts: u32,
    /// Upper bound on scheduler sleeps, in microseconds.
    pub max_sleep_us: u64,
    /// Sample window for the smoothed timing statistics.
    pub stats_window: usize,
    /// Capacity of the retained per-frame history ring.
    pub history_frames: usize,
    pub profiling: ProfilingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            control_period_us: 16_667,
            sound_period_us: 40_000,
            control_assets_period_us: 50_000,
            sound_assets_period_us: 50_000,
            asset_sync_attempts: 20,
            max_sleep_us: 100_000,
            stats_window: 100,
            history_frames: 256,
            profiling: ProfilingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.control_period_us == 0 {
            return Err(EngineError::Config("control_period_us must be non-zero"));
        }
        if self.sound_period_us == 0 {
            return Err(EngineError::Config("sound_period_us must be non-zero"));
        }
        if self.control_assets_period_us == 0 || self.sound_assets_period_us == 0 {
            return Err(EngineError::Config("asset periods must be non-zero"));
        }
        if self.history_frames == 0 {
            return Err(EngineError::Config("history_frames must be non-zero"));
        }
        Ok(())
    }
}

/// Optional diagnostics emitted through `tracing`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingConfig {
    /// Emit a trace event per tick of the named thread, under the
    /// `cadence::frames` target.
    pub frame_marks: Option<EngineThread>,
    /// Wrap each control tick in a `tracing` span.
    pub emit_spans: bool,
}
