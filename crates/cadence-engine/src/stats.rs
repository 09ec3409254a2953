use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use serde::Serialize;

use cadence_core::SmoothingBuffer;

use crate::subsystems::DispatchStats;

/// Metrics the engine tracks across its threads. Durations are in
/// microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMetric {
    ControlTick,
    SoundTick,
    PrepareTick,
    DispatchTick,
    FrameTime,
    DrawCalls,
    DrawPrimitives,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsMode {
    Latest,
    Average,
    Maximum,
}

/// One completed frame as seen by the dispatch thread.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FrameSnapshot {
    pub frame_index: u64,
    pub frame_time_us: u64,
    pub draw_calls: u32,
    pub draw_primitives: u32,
}

struct MetricBuffers {
    control_tick: SmoothingBuffer,
    sound_tick: SmoothingBuffer,
    prepare_tick: SmoothingBuffer,
    dispatch_tick: SmoothingBuffer,
    frame_time: SmoothingBuffer,
    draw_calls: SmoothingBuffer,
    draw_primitives: SmoothingBuffer,
}

/// Cross-thread collection point for engine timing statistics.
///
/// Recording is cheap enough for per-tick use; the per-frame history ring
/// overwrites its oldest entry once full, so a stalled reader never blocks
/// the dispatch thread.
pub struct StatsCollector {
    buffers: Mutex<MetricBuffers>,
    history: ArrayQueue<FrameSnapshot>,
    frames: AtomicU64,
}

impl StatsCollector {
    pub fn new(window: usize, history_frames: usize) -> Self {
        let buffer = || SmoothingBuffer::new(window);
        Self {
            buffers: Mutex::new(MetricBuffers {
                control_tick: buffer(),
                sound_tick: buffer(),
                prepare_tick: buffer(),
                dispatch_tick: buffer(),
                frame_time: buffer(),
                draw_calls: buffer(),
                draw_primitives: buffer(),
            }),
            history: ArrayQueue::new(history_frames.max(1)),
            frames: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_control(&self, duration_us: u64) {
        self.buffers.lock().control_tick.add(duration_us);
    }

    pub(crate) fn record_sound(&self, duration_us: u64) {
        self.buffers.lock().sound_tick.add(duration_us);
    }

    pub(crate) fn record_prepare(&self, duration_us: u64) {
        self.buffers.lock().prepare_tick.add(duration_us);
    }

    pub(crate) fn record_dispatch(&self, duration_us: u64, stats: DispatchStats) {
        let mut buffers = self.buffers.lock();
        buffers.dispatch_tick.add(duration_us);
        buffers.draw_calls.add(u64::from(stats.draw_calls));
        buffers.draw_primitives.add(u64::from(stats.draw_primitives));
    }

    pub(crate) fn record_frame(&self, frame_time_us: u64, stats: DispatchStats) -> u64 {
        let frame_index = self.frames.fetch_add(1, Ordering::AcqRel);
        self.buffers.lock().frame_time.add(frame_time_us);
        let snapshot = FrameSnapshot {
            frame_index,
            frame_time_us,
            draw_calls: stats.draw_calls,
            draw_primitives: stats.draw_primitives,
        };
        if self.history.push(snapshot).is_err() {
            let _ = self.history.pop();
            let _ = self.history.push(snapshot);
        }
        frame_index
    }

    /// Total frames presented so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Reads one metric. `Average` and `Maximum` are over the configured
    /// sample window.
    pub fn metric(&self, metric: EngineMetric, mode: StatsMode) -> u64 {
        let buffers = self.buffers.lock();
        let buffer = match metric {
            EngineMetric::ControlTick => &buffers.control_tick,
            EngineMetric::SoundTick => &buffers.sound_tick,
            EngineMetric::PrepareTick => &buffers.prepare_tick,
            EngineMetric::DispatchTick => &buffers.dispatch_tick,
            EngineMetric::FrameTime => &buffers.frame_time,
            EngineMetric::DrawCalls => &buffers.draw_calls,
            EngineMetric::DrawPrimitives => &buffers.draw_primitives,
        };
        match mode {
            StatsMode::Latest => buffer.current(),
            StatsMode::Average => buffer.smooth(),
            StatsMode::Maximum => buffer.window_max(),
        }
    }

    /// How many times one metric has been recorded.
    pub fn samples(&self, metric: EngineMetric) -> u64 {
        let buffers = self.buffers.lock();
        match metric {
            EngineMetric::ControlTick => buffers.control_tick.count(),
            EngineMetric::SoundTick => buffers.sound_tick.count(),
            EngineMetric::PrepareTick => buffers.prepare_tick.count(),
            EngineMetric::DispatchTick => buffers.dispatch_tick.count(),
            EngineMetric::FrameTime => buffers.frame_time.count(),
            EngineMetric::DrawCalls => buffers.draw_calls.count(),
            EngineMetric::DrawPrimitives => buffers.draw_primitives.count(),
        }
    }

    /// Drains and returns the retained frame history, oldest first.
    pub fn drain_history(&self) -> Vec<FrameSnapshot> {
        let mut snapshots = Vec::with_capacity(self.history.len());
        while let Some(snapshot) = self.history.pop() {
            snapshots.push(snapshot);
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_queries_each_mode() {
        let stats = StatsCollector::new(4, 8);
        stats.record_control(10);
        stats.record_control(30);
        assert_eq!(stats.metric(EngineMetric::ControlTick, StatsMode::Latest), 30);
        assert_eq!(stats.metric(EngineMetric::ControlTick, StatsMode::Average), 20);
        assert_eq!(stats.metric(EngineMetric::ControlTick, StatsMode::Maximum), 30);
        assert_eq!(stats.samples(EngineMetric::ControlTick), 2);
    }

    #[test]
    fn frame_history_keeps_the_newest_entries() {
        let stats = StatsCollector::new(4, 2);
        for i in 0..5u32 {
            stats.record_frame(
                u64::from(i),
                DispatchStats {
                    draw_calls: i,
                    draw_primitives: i * 3,
                },
            );
        }
        assert_eq!(stats.frames(), 5);
        let history = stats.drain_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].frame_index, 3);
        assert_eq!(history[1].frame_index, 4);
        assert_eq!(history[1].draw_primitives, 12);
    }

    #[test]
    fn dispatch_counters_feed_draw_metrics() {
        let stats = StatsCollector::new(4, 4);
        stats.record_dispatch(
            100,
            DispatchStats {
                draw_calls: 7,
                draw_primitives: 2_000,
            },
        );
        assert_eq!(stats.metric(EngineMetric::DrawCalls, StatsMode::Latest), 7);
        assert_eq!(
            stats.metric(EngineMetric::DrawPrimitives, StatsMode::Maximum),
            2_000
        );
        assert_eq!(stats.metric(EngineMetric::DispatchTick, StatsMode::Average), 100);
    }
}
