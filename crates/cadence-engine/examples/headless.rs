//! Headless engine run: stub subsystems, no window, no audio device.
//! Runs the full four-thread gameloop for two seconds and prints timing
//! statistics on the way out.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use cadence_engine::{
    ControlLogic, DispatchStats, Engine, EngineConfig, EngineHooks, EngineMetric, EngineParts,
    GraphicsDispatch, GraphicsPrepare, NullAssets, SoundMixer, StatsMode,
};

#[derive(Default)]
struct Scene {
    bodies: Vec<(f32, f32)>,
}

#[derive(Default)]
struct Passes {
    instances: usize,
}

#[derive(Default)]
struct Mix {
    voices: usize,
}

struct Game {
    bodies: Vec<(f32, f32)>,
}

impl ControlLogic<Scene, Mix> for Game {
    fn update(&mut self, time: u64) -> anyhow::Result<()> {
        let phase = time as f32 / 1_000_000.0;
        for (index, body) in self.bodies.iter_mut().enumerate() {
            body.0 = (phase + index as f32).sin();
            body.1 = (phase + index as f32).cos();
        }
        Ok(())
    }

    fn graphics_emit(&self, _time: u64, target: &mut Scene) -> anyhow::Result<()> {
        target.bodies.clear();
        target.bodies.extend_from_slice(&self.bodies);
        Ok(())
    }

    fn sound_emit(&self, _time: u64, target: &mut Mix) -> anyhow::Result<()> {
        target.voices = self.bodies.len();
        Ok(())
    }
}

struct Prepare;

impl GraphicsPrepare<Scene, Passes> for Prepare {
    fn prepare_tick(&mut self, _time: u64, emitted: &Scene, target: &mut Passes) -> anyhow::Result<()> {
        target.instances = emitted.bodies.len();
        Ok(())
    }
}

struct Dispatch;

impl GraphicsDispatch<Passes> for Dispatch {
    fn dispatch_tick(&mut self, passes: &Passes) -> anyhow::Result<DispatchStats> {
        Ok(DispatchStats {
            draw_calls: 1,
            draw_primitives: passes.instances as u32 * 2,
        })
    }

    fn swap(&mut self) -> anyhow::Result<()> {
        // Stand-in for vsync.
        thread::sleep(Duration::from_millis(16));
        Ok(())
    }
}

struct Mixer;

impl SoundMixer<Mix> for Mixer {
    fn sound_tick(&mut self, _time: u64, _emitted: &Mix) -> anyhow::Result<()> {
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let parts = EngineParts {
        control: Box::new(Game {
            bodies: vec![(0.0, 0.0); 64],
        }),
        graphics_prepare: Box::new(Prepare),
        graphics_dispatch: Box::new(Dispatch),
        sound: Box::new(Mixer),
        assets: Arc::new(NullAssets),
        hooks: EngineHooks::default(),
    };
    let mut engine = Engine::new(EngineConfig::default(), parts)?;

    engine.initialize()?;
    let stop = engine.stop_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_secs(2));
        stop.stop();
    });
    engine.start()?;
    stopper.join().map_err(|_| anyhow::anyhow!("stopper panicked"))?;

    let stats = engine.stats();
    tracing::info!(
        frames = stats.frames(),
        frame_time_avg_us = stats.metric(EngineMetric::FrameTime, StatsMode::Average),
        control_tick_avg_us = stats.metric(EngineMetric::ControlTick, StatsMode::Average),
        prepare_tick_max_us = stats.metric(EngineMetric::PrepareTick, StatsMode::Maximum),
        draw_calls = stats.metric(EngineMetric::DrawCalls, StatsMode::Latest),
        "run complete"
    );

    engine.finalize()
}
