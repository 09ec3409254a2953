use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The four engine threads, used for asset routing and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineThread {
    Control,
    GraphicsPrepare,
    GraphicsDispatch,
    Sound,
}

/// Counters returned by one graphics dispatch tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub draw_calls: u32,
    pub draw_primitives: u32,
}

/// Application logic driven by the control thread.
///
/// `update` mutates game state on the control thread; the emit methods run
/// concurrently with each other on short-lived helper threads and therefore
/// only get shared access. `G` and `S` are the application's graphics and
/// sound snapshot types.
pub trait ControlLogic<G, S>: Send + Sync {
    fn update(&mut self, time: u64) -> anyhow::Result<()>;

    /// Copies whatever the renderer needs out of the game state into the
    /// emit snapshot.
    fn graphics_emit(&self, time: u64, target: &mut G) -> anyhow::Result<()>;

    fn sound_emit(&self, time: u64, target: &mut S) -> anyhow::Result<()>;

    /// GUI preparation for the frame; most applications leave the default.
    fn gui_emit(&self, _time: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Interpolation and render-pass building on the graphics prepare thread.
pub trait GraphicsPrepare<G, P>: Send {
    fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Turns an emitted snapshot into render passes for `time`, which is
    /// the drift-corrected dispatch time, not the emit time.
    fn prepare_tick(&mut self, time: u64, emitted: &G, target: &mut P) -> anyhow::Result<()>;

    fn finalize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// GPU submission and presentation on the graphics dispatch thread.
pub trait GraphicsDispatch<P>: Send {
    fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn dispatch_tick(&mut self, passes: &P) -> anyhow::Result<DispatchStats>;

    /// Presents the frame; called once per dispatch loop iteration even
    /// when no new passes were available.
    fn swap(&mut self) -> anyhow::Result<()>;

    fn finalize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Audio mixing on the sound thread.
pub trait SoundMixer<S>: Send {
    fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn sound_tick(&mut self, time: u64, emitted: &S) -> anyhow::Result<()>;

    fn finalize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Asset loading back end. The engine drives processing from each thread
/// and drains everything during finalization; the store decides what work
/// lands on which thread.
pub trait AssetStore: Send + Sync {
    /// Processes one pending control-side work item. Returns false when
    /// nothing was pending.
    fn process_control(&self) -> bool;

    /// Processes one pending work item routed to the given thread.
    fn process_thread(&self, thread: EngineThread) -> bool;

    /// Total work items still queued across all threads.
    fn pending(&self) -> usize;

    /// Queues unloading of everything; the queued work is drained through
    /// the per-thread processing calls.
    fn unload_all(&self);
}

/// Asset store for applications that do not stream anything.
#[derive(Debug, Default)]
pub struct NullAssets;

impl AssetStore for NullAssets {
    fn process_control(&self) -> bool {
        false
    }

    fn process_thread(&self, _thread: EngineThread) -> bool {
        false
    }

    fn pending(&self) -> usize {
        0
    }

    fn unload_all(&self) {}
}

/// Callback run at a thread lifecycle boundary.
pub type Hook = Box<dyn FnMut() -> anyhow::Result<()> + Send>;

/// Optional per-thread lifecycle callbacks, each run on its owning thread.
/// Initialization hooks run before the subsystem's own `initialize`;
/// finalization hooks run after its `finalize`.
#[derive(Default)]
pub struct EngineHooks {
    pub control_initialize: Option<Hook>,
    pub control_finalize: Option<Hook>,
    pub prepare_initialize: Option<Hook>,
    pub prepare_finalize: Option<Hook>,
    pub dispatch_initialize: Option<Hook>,
    pub dispatch_finalize: Option<Hook>,
    pub sound_initialize: Option<Hook>,
    pub sound_finalize: Option<Hook>,
}

/// Everything the engine needs from the application, handed over once at
/// construction.
pub struct EngineParts<G, P, S> {
    pub control: Box<dyn ControlLogic<G, S>>,
    pub graphics_prepare: Box<dyn GraphicsPrepare<G, P>>,
    pub graphics_dispatch: Box<dyn GraphicsDispatch<P>>,
    pub sound: Box<dyn SoundMixer<S>>,
    pub assets: Arc<dyn AssetStore>,
    pub hooks: EngineHooks,
}
