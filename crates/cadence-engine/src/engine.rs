use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use parking_lot::Mutex;

use cadence_core::{
    Clock, InterpolationTimingCorrector, ScheduleConfig, ScheduleHandle, ScheduleKind, Scheduler,
    Semaphore, SwapBufferConfig, SwapBufferGuard,
};

use crate::config::{EngineConfig, ProfilingConfig};
use crate::lifecycle::{
    run_stage, EngineError, EngineState, EngineStopHandle, LifecycleState, StagePhase,
    StopController,
};
use crate::stats::StatsCollector;
use crate::subsystems::{
    AssetStore, ControlLogic, DispatchStats, EngineParts, EngineThread, GraphicsDispatch,
    GraphicsPrepare, Hook, SoundMixer,
};

/// Spins this many times on the control thread while draining leftover
/// asset work during finalization.
const ASSET_DRAIN_SPINS: u32 = 100_000;

/// A time-stamped snapshot handed between threads through a swap buffer.
/// `time` is the control tick that produced the payload.
pub struct Emit<T> {
    pub time: u64,
    pub payload: T,
}

impl<T: Default> Default for Emit<T> {
    fn default() -> Self {
        Self {
            time: 0,
            payload: T::default(),
        }
    }
}

/// Handles to the engine's built-in schedules, for runtime tuning. Prefer
/// [`Engine::set_control_period`] for the control period so the timing
/// correctors see the change too.
pub struct EngineScheduleHandles {
    pub control_update: ScheduleHandle,
    pub control_assets: ScheduleHandle,
    pub sound_update: ScheduleHandle,
    pub sound_assets: ScheduleHandle,
}

/// State shared by the control thread and the three workers.
struct EngineShared<G, P, S> {
    clock: Clock,
    state: LifecycleState,
    stop: Arc<StopController>,
    /// Synchronizes the lifecycle phase boundaries of all four threads.
    barrier: Barrier,
    /// Alternation pair between the graphics prepare and dispatch threads;
    /// exactly one permit circulates between them.
    prepare_turn: Semaphore,
    dispatch_turn: Semaphore,
    graphics_emit: SwapBufferGuard<Emit<G>>,
    render_passes: SwapBufferGuard<Emit<P>>,
    sound_emit: SwapBufferGuard<Emit<S>>,
    /// Held by the graphics prepare tick; asset synchronization takes it to
    /// mutate graphics-side resources without racing a frame.
    assets_graphics: Mutex<()>,
    /// Same contract for the sound tick.
    assets_sound: Mutex<()>,
    assets: Arc<dyn AssetStore>,
    stats: StatsCollector,
    control_period_us: AtomicU64,
    sound_period_us: AtomicU64,
    asset_sync_attempts: u32,
    profiling: ProfilingConfig,
}

struct SoundWorker<S> {
    mixer: Box<dyn SoundMixer<S>>,
    corrector: InterpolationTimingCorrector,
}

/// Releases the partner's semaphore when the current turn ends, however
/// the tick exits.
struct TurnGuard<'a>(&'a Semaphore);

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

fn frame_mark(profiling: &ProfilingConfig, thread: EngineThread, duration_us: u64) {
    if profiling.frame_marks == Some(thread) {
        tracing::trace!(target: "cadence::frames", ?thread, duration_us, "tick");
    }
}

/// Four-thread gameloop orchestrator.
///
/// The engine owns a control scheduler run on the caller's thread plus
/// three worker threads (graphics prepare, graphics dispatch, sound), wired
/// together with swap buffers, an alternation semaphore pair, and a shared
/// lifecycle barrier. `G`, `P` and `S` are the application's graphics emit,
/// render pass and sound emit snapshot types.
///
/// The lifecycle is strictly `new -> initialize -> start -> finalize`;
/// `start` blocks until a stop is requested. Skipping `finalize` leaks the
/// worker threads.
pub struct Engine<G, P, S>
where
    G: Default + Send + 'static,
    P: Default + Send + 'static,
    S: Default + Send + 'static,
{
    config: EngineConfig,
    shared: Arc<EngineShared<G, P, S>>,
    parts: Option<EngineParts<G, P, S>>,
    control_scheduler: Option<Scheduler>,
    handles: Option<EngineScheduleHandles>,
    control_hooks: (Option<Hook>, Option<Hook>),
    threads: Vec<(&'static str, JoinHandle<()>)>,
}

impl<G, P, S> Engine<G, P, S>
where
    G: Default + Send + 'static,
    P: Default + Send + 'static,
    S: Default + Send + 'static,
{
    pub fn new(config: EngineConfig, parts: EngineParts<G, P, S>) -> Result<Self, EngineError> {
        config.validate()?;
        let buffer_config = |repeated_reads| SwapBufferConfig {
            slots: 3,
            repeated_reads,
            repeated_writes: false,
        };
        let buffer_error = |_| EngineError::Config("invalid swap buffer configuration");
        let shared = Arc::new(EngineShared {
            clock: Clock::new(),
            state: LifecycleState::new(),
            stop: Arc::new(StopController::new()),
            barrier: Barrier::new(4),
            prepare_turn: Semaphore::new(1),
            dispatch_turn: Semaphore::new(0),
            // Emit buffers allow repeated reads so consumers can keep
            // working off the last snapshot when the control thread stalls;
            // render passes are consumed at most once per frame.
            graphics_emit: SwapBufferGuard::new(buffer_config(true)).map_err(buffer_error)?,
            render_passes: SwapBufferGuard::new(buffer_config(false)).map_err(buffer_error)?,
            sound_emit: SwapBufferGuard::new(buffer_config(true)).map_err(buffer_error)?,
            assets_graphics: Mutex::new(()),
            assets_sound: Mutex::new(()),
            assets: Arc::clone(&parts.assets),
            stats: StatsCollector::new(config.stats_window, config.history_frames),
            control_period_us: AtomicU64::new(config.control_period_us),
            sound_period_us: AtomicU64::new(config.sound_period_us),
            asset_sync_attempts: config.asset_sync_attempts.max(1),
            profiling: config.profiling,
        });
        Ok(Self {
            config,
            shared,
            parts: Some(parts),
            control_scheduler: None,
            handles: None,
            control_hooks: (None, None),
            threads: Vec::new(),
        })
    }

    pub fn state(&self) -> EngineState {
        self.shared.state.current()
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.shared.stats
    }

    pub fn stop_handle(&self) -> EngineStopHandle {
        EngineStopHandle {
            inner: Arc::clone(&self.shared.stop),
        }
    }

    /// Requests a stop; `start` returns once the gameloops wind down.
    pub fn stop(&self) {
        self.shared.stop.request();
    }

    pub fn schedule_handles(&self) -> Option<&EngineScheduleHandles> {
        self.handles.as_ref()
    }

    pub fn control_period(&self) -> u64 {
        self.shared.control_period_us.load(Ordering::Acquire)
    }

    /// Changes the control tick period at runtime. Also feeds the new
    /// period to the timing correctors on the consumer threads.
    pub fn set_control_period(&self, period_us: u64) -> anyhow::Result<()> {
        let handles = self.handles.as_ref().ok_or(EngineError::NotInitialized)?;
        handles.control_update.set_period(period_us)?;
        self.shared
            .control_period_us
            .store(period_us, Ordering::Release);
        Ok(())
    }

    pub fn sound_period(&self) -> u64 {
        self.shared.sound_period_us.load(Ordering::Acquire)
    }

    /// Changes the sound tick period at runtime. Also feeds the new period
    /// to the sound thread's timing corrector.
    pub fn set_sound_period(&self, period_us: u64) -> anyhow::Result<()> {
        let handles = self.handles.as_ref().ok_or(EngineError::NotInitialized)?;
        handles.sound_update.set_period(period_us)?;
        self.shared
            .sound_period_us
            .store(period_us, Ordering::Release);
        Ok(())
    }

    /// Spawns the worker threads and runs every subsystem's initialization
    /// on its own thread. Blocks until all of them finished initializing.
    pub fn initialize(&mut self) -> anyhow::Result<()> {
        self.shared
            .state
            .advance(EngineState::Uninitialized, EngineState::Initializing)?;
        let parts = self.parts.take().ok_or(EngineError::NotInitialized)?;
        let EngineParts {
            control,
            graphics_prepare,
            graphics_dispatch,
            sound,
            assets: _,
            mut hooks,
        } = parts;

        let mut control_scheduler = Scheduler::with_clock(self.shared.clock);
        control_scheduler.set_max_sleep(self.config.max_sleep_us);
        self.shared.stop.register(control_scheduler.stop_handle());
        let logic: Arc<Mutex<Box<dyn ControlLogic<G, S>>>> = Arc::new(Mutex::new(control));
        let control_update = control_scheduler.new_schedule(
            ScheduleConfig {
                name: "control-update",
                kind: ScheduleKind::SteadyPeriodic,
                period_us: self.config.control_period_us,
                priority: 1,
                ..Default::default()
            },
            control_update_action(Arc::clone(&self.shared), Arc::clone(&logic)),
        )?;
        let control_assets = control_scheduler.new_schedule(
            ScheduleConfig {
                name: "control-assets",
                kind: ScheduleKind::FreePeriodic,
                period_us: self.config.control_assets_period_us,
                priority: 0,
                ..Default::default()
            },
            control_assets_action(Arc::clone(&self.shared)),
        )?;

        let mut sound_scheduler = Scheduler::with_clock(self.shared.clock);
        sound_scheduler.set_max_sleep(self.config.max_sleep_us);
        self.shared.stop.register(sound_scheduler.stop_handle());
        let sound_worker = Arc::new(Mutex::new(SoundWorker {
            mixer: sound,
            corrector: InterpolationTimingCorrector::new(),
        }));
        let sound_update = sound_scheduler.new_schedule(
            ScheduleConfig {
                name: "sound-update",
                kind: ScheduleKind::SteadyPeriodic,
                period_us: self.config.sound_period_us,
                priority: 1,
                ..Default::default()
            },
            sound_update_action(Arc::clone(&self.shared), Arc::clone(&sound_worker)),
        )?;
        let sound_assets = sound_scheduler.new_schedule(
            ScheduleConfig {
                name: "sound-assets",
                kind: ScheduleKind::FreePeriodic,
                period_us: self.config.sound_assets_period_us,
                priority: 0,
                ..Default::default()
            },
            sound_assets_action(Arc::clone(&self.shared)),
        )?;

        let prepare_init = hooks.prepare_initialize.take();
        let prepare_finalize = hooks.prepare_finalize.take();
        let dispatch_init = hooks.dispatch_initialize.take();
        let dispatch_finalize = hooks.dispatch_finalize.take();
        let sound_init = hooks.sound_initialize.take();
        let sound_finalize = hooks.sound_finalize.take();
        self.control_hooks = (hooks.control_initialize.take(), hooks.control_finalize.take());

        {
            let shared = Arc::clone(&self.shared);
            self.spawn("cadence-gfx-prepare", move || {
                prepare_entry(shared, graphics_prepare, prepare_init, prepare_finalize)
            })?;
        }
        {
            let shared = Arc::clone(&self.shared);
            self.spawn("cadence-gfx-dispatch", move || {
                dispatch_entry(shared, graphics_dispatch, dispatch_init, dispatch_finalize)
            })?;
        }
        {
            let shared = Arc::clone(&self.shared);
            self.spawn("cadence-sound", move || {
                sound_entry(shared, sound_scheduler, sound_worker, sound_init, sound_finalize)
            })?;
        }

        self.control_scheduler = Some(control_scheduler);
        self.handles = Some(EngineScheduleHandles {
            control_update,
            control_assets,
            sound_update,
            sound_assets,
        });

        // All subsystems finish initializing before anyone proceeds.
        self.shared.barrier.wait();
        if self.shared.stop.is_stopping() {
            self.abort_initialization();
            anyhow::bail!("a subsystem failed to initialize");
        }
        self.shared
            .state
            .advance(EngineState::Initializing, EngineState::Initialized)?;
        Ok(())
    }

    /// Walks the remaining barrier rendezvous after a failed subsystem
    /// initialization so the workers wind down and can be joined; the
    /// engine ends terminal in `Finalized`.
    fn abort_initialization(&mut self) {
        self.shared.barrier.wait(); // gameloops begin; every loop exits at once
        self.shared.barrier.wait(); // gameloops done
        self.shared.assets.unload_all();
        self.shared.barrier.wait(); // finalization begins
        self.drain_control_assets();
        for (name, handle) in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!(thread = name, "engine thread panicked during shutdown");
            }
        }
        self.control_scheduler = None;
        self.handles = None;
        self.shared.state.force(EngineState::Finalized);
    }

    fn drain_control_assets(&self) {
        let mut spins = 0u32;
        while self.shared.assets.pending() > 0 && spins < ASSET_DRAIN_SPINS {
            if !self.shared.assets.process_control() {
                thread::yield_now();
            }
            spins += 1;
        }
        let leftover = self.shared.assets.pending();
        if leftover > 0 {
            tracing::warn!(leftover, "assets still pending after finalization drain");
        }
    }

    fn spawn(
        &mut self,
        name: &'static str,
        entry: impl FnOnce() + Send + 'static,
    ) -> anyhow::Result<()> {
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(entry)
            .with_context(|| format!("spawning {name} thread"))?;
        self.threads.push((name, handle));
        Ok(())
    }

    /// Runs the gameloop on the calling thread until a stop is requested
    /// (or a subsystem fails), then leaves the engine in `Stopped`.
    pub fn start(&mut self) -> anyhow::Result<()> {
        self.shared
            .state
            .advance(EngineState::Initialized, EngineState::Starting)?;
        let mut scheduler = self
            .control_scheduler
            .take()
            .ok_or(EngineError::NotInitialized)?;
        let (mut init_hook, mut finalize_hook) =
            (self.control_hooks.0.take(), self.control_hooks.1.take());
        let stop = Arc::clone(&self.shared.stop);

        run_stage(EngineThread::Control, StagePhase::Initialize, &stop, || {
            if let Some(hook) = init_hook.as_mut() {
                hook()?;
            }
            Ok(())
        });
        // Gameloops begin on every thread.
        self.shared.barrier.wait();
        self.shared
            .state
            .advance(EngineState::Starting, EngineState::Running)?;

        let result = scheduler.run();
        if result.is_err() {
            stop.request();
        }

        // Gameloops have wound down on every thread.
        self.shared.barrier.wait();
        run_stage(EngineThread::Control, StagePhase::Finalize, &stop, || {
            if let Some(hook) = finalize_hook.as_mut() {
                hook()?;
            }
            Ok(())
        });
        self.shared
            .state
            .advance(EngineState::Running, EngineState::Stopped)?;
        result.context("control gameloop failed")
    }

    /// Unloads assets, finalizes every subsystem on its own thread and
    /// joins the workers.
    pub fn finalize(&mut self) -> anyhow::Result<()> {
        self.shared
            .state
            .advance(EngineState::Stopped, EngineState::Finalizing)?;
        self.shared.assets.unload_all();
        // Finalization begins on every thread; workers drain their asset
        // queues behind this barrier.
        self.shared.barrier.wait();
        self.drain_control_assets();

        for (name, handle) in self.threads.drain(..) {
            handle
                .join()
                .map_err(|_| EngineError::ThreadPanicked(name))?;
        }
        self.shared
            .state
            .advance(EngineState::Finalizing, EngineState::Finalized)?;
        Ok(())
    }
}

impl<G, P, S> Drop for Engine<G, P, S>
where
    G: Default + Send + 'static,
    P: Default + Send + 'static,
    S: Default + Send + 'static,
{
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            tracing::warn!("engine dropped before finalize; detaching worker threads");
            self.shared.stop.request();
        }
    }
}

fn control_update_action<G, P, S>(
    shared: Arc<EngineShared<G, P, S>>,
    logic: Arc<Mutex<Box<dyn ControlLogic<G, S>>>>,
) -> cadence_core::Action
where
    G: Default + Send + 'static,
    P: Default + Send + 'static,
    S: Default + Send + 'static,
{
    Box::new(move || {
        let time = shared.clock.micros();
        let span = shared
            .profiling
            .emit_spans
            .then(|| tracing::debug_span!("control_tick", time).entered());

        let mut logic = logic.lock();
        logic.update(time)?;

        // Emits only need shared access and run concurrently; each copies
        // one view of the state into its swap buffer slot.
        let logic_ref: &dyn ControlLogic<G, S> = &**logic;
        let shared_ref = &*shared;
        thread::scope(|scope| {
            let graphics = scope.spawn(move || match shared_ref.graphics_emit.write() {
                Some(mut slot) => {
                    slot.time = time;
                    logic_ref.graphics_emit(time, &mut slot.payload)
                }
                None => {
                    tracing::debug!("skipping graphics emit; no free slot");
                    Ok(())
                }
            });
            let sound = scope.spawn(move || match shared_ref.sound_emit.write() {
                Some(mut slot) => {
                    slot.time = time;
                    logic_ref.sound_emit(time, &mut slot.payload)
                }
                None => {
                    tracing::debug!("skipping sound emit; no free slot");
                    Ok(())
                }
            });
            let gui = scope.spawn(move || logic_ref.gui_emit(time));
            graphics
                .join()
                .map_err(|_| anyhow::anyhow!("graphics emit task panicked"))??;
            sound
                .join()
                .map_err(|_| anyhow::anyhow!("sound emit task panicked"))??;
            gui.join()
                .map_err(|_| anyhow::anyhow!("gui emit task panicked"))??;
            Ok::<_, anyhow::Error>(())
        })?;
        drop(logic);
        drop(span);

        let elapsed = shared.clock.micros().saturating_sub(time);
        shared.stats.record_control(elapsed);
        frame_mark(&shared.profiling, EngineThread::Control, elapsed);
        Ok(())
    })
}

fn control_assets_action<G, P, S>(shared: Arc<EngineShared<G, P, S>>) -> cadence_core::Action
where
    G: Default + Send + 'static,
    P: Default + Send + 'static,
    S: Default + Send + 'static,
{
    Box::new(move || {
        // The subsystem asset locks are held for whole ticks on their
        // threads; retry briefly rather than stalling the control loop.
        for _ in 0..shared.asset_sync_attempts {
            let Some(_graphics) = shared.assets_graphics.try_lock() else {
                thread::yield_now();
                continue;
            };
            let Some(_sound) = shared.assets_sound.try_lock() else {
                thread::yield_now();
                continue;
            };
            while shared.assets.process_control() {}
            return Ok(());
        }
        tracing::debug!("postponing asset synchronization; subsystems busy");
        Ok(())
    })
}

fn sound_update_action<G, P, S>(
    shared: Arc<EngineShared<G, P, S>>,
    worker: Arc<Mutex<SoundWorker<S>>>,
) -> cadence_core::Action
where
    G: Default + Send + 'static,
    P: Default + Send + 'static,
    S: Default + Send + 'static,
{
    Box::new(move || {
        let now = shared.clock.micros();
        let Some(emitted) = shared.sound_emit.read() else {
            tracing::debug!("skipping sound tick; no emitted snapshot");
            return Ok(());
        };
        let mut worker = worker.lock();
        // The sound flow reconciles against its own tick period; only the
        // graphics flow tracks the control period.
        let period = shared.sound_period_us.load(Ordering::Acquire);
        let time = worker.corrector.correct(emitted.time, now, period);
        let behind = worker.corrector.periods_behind(emitted.time, now, period);
        if behind > 0 {
            tracing::debug!(periods = behind, "sound lagging behind emitted snapshots");
        }
        let _assets = shared.assets_sound.lock();
        worker.mixer.sound_tick(time, &emitted.payload)?;
        drop(emitted);

        let elapsed = shared.clock.micros().saturating_sub(now);
        shared.stats.record_sound(elapsed);
        frame_mark(&shared.profiling, EngineThread::Sound, elapsed);
        Ok(())
    })
}

fn sound_assets_action<G, P, S>(shared: Arc<EngineShared<G, P, S>>) -> cadence_core::Action
where
    G: Default + Send + 'static,
    P: Default + Send + 'static,
    S: Default + Send + 'static,
{
    Box::new(move || {
        while shared.assets.process_thread(EngineThread::Sound) {}
        Ok(())
    })
}

fn prepare_entry<G, P, S>(
    shared: Arc<EngineShared<G, P, S>>,
    mut prepare: Box<dyn GraphicsPrepare<G, P>>,
    mut init_hook: Option<Hook>,
    mut finalize_hook: Option<Hook>,
) where
    G: Default + Send + 'static,
    P: Default + Send + 'static,
    S: Default + Send + 'static,
{
    let stop = Arc::clone(&shared.stop);
    run_stage(
        EngineThread::GraphicsPrepare,
        StagePhase::Initialize,
        &stop,
        || {
            if let Some(hook) = init_hook.as_mut() {
                hook()?;
            }
            prepare.initialize()
        },
    );
    shared.barrier.wait();
    shared.barrier.wait();

    run_stage(EngineThread::GraphicsPrepare, StagePhase::Run, &stop, || {
        let mut corrector = InterpolationTimingCorrector::new();
        while !stop.is_stopping() {
            while shared.assets.process_thread(EngineThread::GraphicsPrepare) {}
            shared.prepare_turn.acquire();
            let _turn = TurnGuard(&shared.dispatch_turn);
            if stop.is_stopping() {
                break;
            }
            let started = shared.clock.micros();
            let _assets = shared.assets_graphics.lock();
            let Some(emitted) = shared.graphics_emit.read() else {
                tracing::debug!("skipping graphics frame; no emitted snapshot");
                continue;
            };
            let period = shared.control_period_us.load(Ordering::Acquire);
            let time = corrector.correct(emitted.time, started, period);
            let behind = corrector.periods_behind(emitted.time, started, period);
            if behind > 0 {
                tracing::debug!(periods = behind, "graphics lagging behind emitted snapshots");
            }
            let Some(mut passes) = shared.render_passes.write() else {
                tracing::debug!("skipping graphics frame; render passes busy");
                continue;
            };
            passes.time = time;
            prepare.prepare_tick(time, &emitted.payload, &mut passes.payload)?;
            drop(passes);
            drop(emitted);

            let elapsed = shared.clock.micros().saturating_sub(started);
            shared.stats.record_prepare(elapsed);
            frame_mark(&shared.profiling, EngineThread::GraphicsPrepare, elapsed);
        }
        Ok(())
    });
    // Unblock the dispatch thread if it is waiting for its turn.
    shared.dispatch_turn.release();
    shared.barrier.wait();

    shared.barrier.wait();
    while shared.assets.process_thread(EngineThread::GraphicsPrepare) {}
    run_stage(
        EngineThread::GraphicsPrepare,
        StagePhase::Finalize,
        &stop,
        || {
            prepare.finalize()?;
            if let Some(hook) = finalize_hook.as_mut() {
                hook()?;
            }
            Ok(())
        },
    );
}

fn dispatch_entry<G, P, S>(
    shared: Arc<EngineShared<G, P, S>>,
    mut dispatch: Box<dyn GraphicsDispatch<P>>,
    mut init_hook: Option<Hook>,
    mut finalize_hook: Option<Hook>,
) where
    G: Default + Send + 'static,
    P: Default + Send + 'static,
    S: Default + Send + 'static,
{
    let stop = Arc::clone(&shared.stop);
    run_stage(
        EngineThread::GraphicsDispatch,
        StagePhase::Initialize,
        &stop,
        || {
            if let Some(hook) = init_hook.as_mut() {
                hook()?;
            }
            dispatch.initialize()
        },
    );
    shared.barrier.wait();
    shared.barrier.wait();

    run_stage(EngineThread::GraphicsDispatch, StagePhase::Run, &stop, || {
        let mut last_swap: Option<u64> = None;
        while !stop.is_stopping() {
            shared.dispatch_turn.acquire();
            let _turn = TurnGuard(&shared.prepare_turn);
            if stop.is_stopping() {
                break;
            }
            let started = shared.clock.micros();
            let mut frame_stats = DispatchStats::default();
            if let Some(passes) = shared.render_passes.read() {
                frame_stats = dispatch.dispatch_tick(&passes.payload)?;
                shared
                    .stats
                    .record_dispatch(shared.clock.micros().saturating_sub(started), frame_stats);
            } else {
                tracing::debug!("no new render passes; presenting previous frame");
            }
            dispatch.swap()?;

            let now = shared.clock.micros();
            if let Some(previous) = last_swap {
                let frame_time = now.saturating_sub(previous);
                let frame = shared.stats.record_frame(frame_time, frame_stats);
                if shared.profiling.frame_marks == Some(EngineThread::GraphicsDispatch) {
                    tracing::trace!(
                        target: "cadence::frames",
                        frame,
                        frame_time_us = frame_time,
                        "frame presented"
                    );
                }
            }
            last_swap = Some(now);
            while shared.assets.process_thread(EngineThread::GraphicsDispatch) {}
        }
        Ok(())
    });
    // Unblock the prepare thread if it is waiting for its turn.
    shared.prepare_turn.release();
    shared.barrier.wait();

    shared.barrier.wait();
    while shared.assets.process_thread(EngineThread::GraphicsDispatch) {}
    run_stage(
        EngineThread::GraphicsDispatch,
        StagePhase::Finalize,
        &stop,
        || {
            dispatch.finalize()?;
            if let Some(hook) = finalize_hook.as_mut() {
                hook()?;
            }
            Ok(())
        },
    );
}

fn sound_entry<G, P, S>(
    shared: Arc<EngineShared<G, P, S>>,
    mut scheduler: Scheduler,
    worker: Arc<Mutex<SoundWorker<S>>>,
    mut init_hook: Option<Hook>,
    mut finalize_hook: Option<Hook>,
) where
    G: Default + Send + 'static,
    P: Default + Send + 'static,
    S: Default + Send + 'static,
{
    let stop = Arc::clone(&shared.stop);
    run_stage(EngineThread::Sound, StagePhase::Initialize, &stop, || {
        if let Some(hook) = init_hook.as_mut() {
            hook()?;
        }
        worker.lock().mixer.initialize()
    });
    shared.barrier.wait();
    shared.barrier.wait();

    run_stage(EngineThread::Sound, StagePhase::Run, &stop, || {
        scheduler.run()
    });
    shared.barrier.wait();

    shared.barrier.wait();
    while shared.assets.process_thread(EngineThread::Sound) {}
    run_stage(EngineThread::Sound, StagePhase::Finalize, &stop, || {
        worker.lock().mixer.finalize()?;
        if let Some(hook) = finalize_hook.as_mut() {
            hook()?;
        }
        Ok(())
    });
}
