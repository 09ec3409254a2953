use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cadence_engine::{
    AssetStore, ControlLogic, DispatchStats, Engine, EngineConfig, EngineError, EngineHooks,
    EngineMetric, EngineParts, EngineState, EngineThread, GraphicsDispatch, GraphicsPrepare,
    NullAssets, SoundMixer, StatsMode,
};

#[derive(Default)]
struct Scene {
    tick: u64,
}

#[derive(Default)]
struct Passes {
    tick: u64,
}

#[derive(Default)]
struct Mix {
    tick: u64,
}

#[derive(Default)]
struct Counters {
    updates: AtomicU64,
    graphics_emits: AtomicU64,
    sound_emits: AtomicU64,
    prepare_ticks: AtomicU64,
    dispatch_ticks: AtomicU64,
    swaps: AtomicU64,
    sound_ticks: AtomicU64,
}

struct TestControl {
    counters: Arc<Counters>,
    tick: u64,
}

impl ControlLogic<Scene, Mix> for TestControl {
    fn update(&mut self, _time: u64) -> anyhow::Result<()> {
        self.tick += 1;
        self.counters.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn graphics_emit(&self, _time: u64, target: &mut Scene) -> anyhow::Result<()> {
        target.tick = self.tick;
        self.counters.graphics_emits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sound_emit(&self, _time: u64, target: &mut Mix) -> anyhow::Result<()> {
        target.tick = self.tick;
        self.counters.sound_emits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TestPrepare {
    counters: Arc<Counters>,
}

impl GraphicsPrepare<Scene, Passes> for TestPrepare {
    fn prepare_tick(&mut self, _time: u64, emitted: &Scene, target: &mut Passes) -> anyhow::Result<()> {
        target.tick = emitted.tick;
        self.counters.prepare_ticks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TestDispatch {
    counters: Arc<Counters>,
    swap_delay: Option<Duration>,
}

impl GraphicsDispatch<Passes> for TestDispatch {
    fn dispatch_tick(&mut self, passes: &Passes) -> anyhow::Result<DispatchStats> {
        assert!(passes.tick > 0, "dispatched passes from before the first update");
        self.counters.dispatch_ticks.fetch_add(1, Ordering::SeqCst);
        Ok(DispatchStats {
            draw_calls: 2,
            draw_primitives: 12,
        })
    }

    fn swap(&mut self) -> anyhow::Result<()> {
        self.counters.swaps.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.swap_delay {
            thread::sleep(delay);
        }
        Ok(())
    }
}

struct TestSound {
    counters: Arc<Counters>,
}

impl SoundMixer<Mix> for TestSound {
    fn sound_tick(&mut self, _time: u64, _emitted: &Mix) -> anyhow::Result<()> {
        self.counters.sound_ticks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TestAssets {
    queued: AtomicUsize,
    unloaded: AtomicBool,
}

impl TestAssets {
    fn new() -> Self {
        Self {
            queued: AtomicUsize::new(0),
            unloaded: AtomicBool::new(false),
        }
    }
}

impl AssetStore for TestAssets {
    fn process_control(&self) -> bool {
        self.queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| {
                queued.checked_sub(1)
            })
            .is_ok()
    }

    fn process_thread(&self, _thread: EngineThread) -> bool {
        false
    }

    fn pending(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    fn unload_all(&self) {
        self.unloaded.store(true, Ordering::SeqCst);
        self.queued.store(4, Ordering::SeqCst);
    }
}

fn parts(
    counters: &Arc<Counters>,
    assets: Arc<dyn AssetStore>,
    swap_delay: Option<Duration>,
    hooks: EngineHooks,
) -> EngineParts<Scene, Passes, Mix> {
    EngineParts {
        control: Box::new(TestControl {
            counters: Arc::clone(counters),
            tick: 0,
        }),
        graphics_prepare: Box::new(TestPrepare {
            counters: Arc::clone(counters),
        }),
        graphics_dispatch: Box::new(TestDispatch {
            counters: Arc::clone(counters),
            swap_delay,
        }),
        sound: Box::new(TestSound {
            counters: Arc::clone(counters),
        }),
        assets,
        hooks,
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        control_period_us: 5_000,
        sound_period_us: 10_000,
        ..Default::default()
    }
}

#[test]
fn engine_runs_all_subsystems_through_a_full_lifecycle() {
    let counters = Arc::new(Counters::default());
    let assets = Arc::new(TestAssets::new());
    let control_hook_ran = Arc::new(AtomicBool::new(false));
    let sound_hook_ran = Arc::new(AtomicBool::new(false));
    let hooks = EngineHooks {
        control_initialize: Some(Box::new({
            let flag = Arc::clone(&control_hook_ran);
            move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        })),
        sound_finalize: Some(Box::new({
            let flag = Arc::clone(&sound_hook_ran);
            move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        })),
        ..Default::default()
    };

    let mut engine = Engine::new(
        fast_config(),
        parts(&counters, Arc::clone(&assets) as Arc<dyn AssetStore>, None, hooks),
    )
    .expect("engine construction");
    assert_eq!(engine.state(), EngineState::Uninitialized);

    engine.initialize().expect("initialize");
    assert_eq!(engine.state(), EngineState::Initialized);

    let stop = engine.stop_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        stop.stop();
    });
    engine.start().expect("start");
    stopper.join().expect("stopper panicked");
    assert_eq!(engine.state(), EngineState::Stopped);

    engine.finalize().expect("finalize");
    assert_eq!(engine.state(), EngineState::Finalized);

    assert!(counters.updates.load(Ordering::SeqCst) >= 5);
    assert!(counters.graphics_emits.load(Ordering::SeqCst) > 0);
    assert!(counters.sound_emits.load(Ordering::SeqCst) > 0);
    assert!(counters.prepare_ticks.load(Ordering::SeqCst) > 0);
    assert!(counters.dispatch_ticks.load(Ordering::SeqCst) > 0);
    assert!(counters.swaps.load(Ordering::SeqCst) > 0);
    assert!(counters.sound_ticks.load(Ordering::SeqCst) > 0);
    assert!(control_hook_ran.load(Ordering::SeqCst));
    assert!(sound_hook_ran.load(Ordering::SeqCst));
    assert!(assets.unloaded.load(Ordering::SeqCst));
    assert_eq!(assets.pending(), 0, "finalize must drain queued asset work");

    let stats = engine.stats();
    assert!(stats.frames() > 0);
    assert!(stats.samples(EngineMetric::ControlTick) > 0);
    assert_eq!(stats.metric(EngineMetric::DrawCalls, StatsMode::Maximum), 2);
    assert_eq!(
        stats.metric(EngineMetric::DrawPrimitives, StatsMode::Latest),
        12
    );
    assert!(!stats.drain_history().is_empty());
}

#[test]
fn lifecycle_rejects_out_of_order_calls() {
    let counters = Arc::new(Counters::default());
    let mut engine = Engine::new(
        EngineConfig::default(),
        parts(
            &counters,
            Arc::new(NullAssets) as Arc<dyn AssetStore>,
            None,
            EngineHooks::default(),
        ),
    )
    .expect("engine construction");

    let err = engine.start().expect_err("start before initialize");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::InvalidLifecycle { .. })
    ));
    let err = engine.finalize().expect_err("finalize before start");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::InvalidLifecycle { .. })
    ));
    assert_eq!(engine.state(), EngineState::Uninitialized);
}

#[test]
fn stop_interrupts_a_blocked_graphics_handoff() {
    // A slow presenting renderer keeps the prepare thread parked on its
    // turn semaphore most of the time; stopping must still wind down
    // promptly instead of deadlocking the pair.
    let counters = Arc::new(Counters::default());
    let mut engine = Engine::new(
        fast_config(),
        parts(
            &counters,
            Arc::new(NullAssets) as Arc<dyn AssetStore>,
            Some(Duration::from_millis(30)),
            EngineHooks::default(),
        ),
    )
    .expect("engine construction");

    engine.initialize().expect("initialize");
    let stop = engine.stop_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        stop.stop();
    });
    engine.start().expect("start");
    stopper.join().expect("stopper panicked");
    engine.finalize().expect("finalize");
    assert_eq!(engine.state(), EngineState::Finalized);
    assert!(counters.swaps.load(Ordering::SeqCst) > 0);
}

#[test]
fn periods_are_tunable_after_initialization() {
    let counters = Arc::new(Counters::default());
    let mut engine = Engine::new(
        fast_config(),
        parts(
            &counters,
            Arc::new(NullAssets) as Arc<dyn AssetStore>,
            None,
            EngineHooks::default(),
        ),
    )
    .expect("engine construction");

    engine.initialize().expect("initialize");
    engine.set_control_period(2_000).expect("set control period");
    engine.set_sound_period(20_000).expect("set sound period");
    assert_eq!(engine.control_period(), 2_000);
    // The shared period feeds the sound corrector, not just the schedule.
    assert_eq!(engine.sound_period(), 20_000);

    let stop = engine.stop_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        stop.stop();
    });
    engine.start().expect("start");
    stopper.join().expect("stopper panicked");
    engine.finalize().expect("finalize");

    // 150ms at a 2ms period leaves plenty of headroom above this bound.
    assert!(counters.updates.load(Ordering::SeqCst) >= 20);
    assert!(counters.sound_ticks.load(Ordering::SeqCst) >= 3);
}

#[test]
fn failed_subsystem_initialization_winds_down_the_workers() {
    let counters = Arc::new(Counters::default());
    let hooks = EngineHooks {
        prepare_initialize: Some(Box::new(|| Err(anyhow::anyhow!("no adapter")))),
        ..Default::default()
    };
    let mut engine = Engine::new(
        fast_config(),
        parts(
            &counters,
            Arc::new(NullAssets) as Arc<dyn AssetStore>,
            None,
            hooks,
        ),
    )
    .expect("engine construction");

    let err = engine.initialize().expect_err("initialize must fail");
    assert!(err.to_string().contains("failed to initialize"));
    // The workers were released from the rendezvous and joined on the way
    // out; the engine ends terminal and rejects further lifecycle calls.
    assert_eq!(engine.state(), EngineState::Finalized);
    let err = engine.start().expect_err("start after failed initialize");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::InvalidLifecycle { .. })
    ));
    let err = engine.finalize().expect_err("finalize after failed initialize");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::InvalidLifecycle { .. })
    ));
    assert_eq!(counters.updates.load(Ordering::SeqCst), 0);
}
