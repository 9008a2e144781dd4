// src/controller/loop_controller.rs
//! LoopController - the UI-agent half of the threaded render loop.
//!
//! The controller tracks windows, reacts to lifecycle notifications from the
//! host (show/hide/expose/obscure/resize/destroy), owns the animation
//! driver, and initiates the one blocking point of the whole protocol:
//! polish-and-sync. The render worker picks the block up through its message
//! queue and releases the controller once UI-side state has been copied.
//!
//! The controller is deliberately not `Send`; every method on it belongs to
//! the UI agent. Code on other threads talks to the loop through
//! [`LoopProxy`] and through the controller's event sink, which the host
//! pumps via [`LoopController::process_events`].

use crate::config::CONFIG;
use crate::geometry::{FrameImage, SurfaceSize};
use crate::host::{AnimationDriver, HostHooks, SceneGraphContext, WindowId, WindowRef};
use crate::messages::{lock_grab_slot, ControlMessage, ControlSender, GrabSlot, RenderMessage};
use crate::shared::SharedState;
use crate::timer::{Interval, SingleShot};
use crate::timing::PolishTiming;
use crate::worker::RenderWorker;
use log::*;
use std::marker::PhantomData;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// A window as tracked by the controller.
struct TrackedWindow {
    window: WindowRef,
    /// A frame has been requested and no sync has consumed it yet.
    pending_update: bool,
}

/// Channel endpoint plus join handle of a running render worker.
struct WorkerHandle {
    tx: Sender<RenderMessage>,
    join: JoinHandle<()>,
}

/// The UI-agent side of the render loop.
pub struct LoopController {
    hooks: Arc<dyn HostHooks>,
    sg: Arc<dyn SceneGraphContext>,
    driver: Arc<dyn AnimationDriver>,
    shared: Arc<SharedState>,

    windows: Vec<TrackedWindow>,
    worker: Option<WorkerHandle>,
    /// Render-message sender shared with proxies; `None` while no worker
    /// runs so a proxy repaint cannot land on a dead queue.
    repaint_tx: Arc<Mutex<Option<Sender<RenderMessage>>>>,

    control: ControlSender,
    control_rx: Receiver<ControlMessage>,

    update_timer: Option<SingleShot>,
    update_generation: u64,
    animation_timer: Option<Interval>,
    animation_generation: u64,
    exhaust_delay: Duration,

    ui_thread: ThreadId,
    /// UI-agent affinity: keep the controller out of `Send`.
    _not_send: PhantomData<*const ()>,
}

impl LoopController {
    /// Build a controller on the UI agent. Creates the scene-graph context
    /// and the animation driver through the host hooks and installs the
    /// driver; rendering starts only once a window is exposed.
    pub fn new(hooks: Arc<dyn HostHooks>) -> Self {
        let (tx, rx) = mpsc::channel();
        let sg = hooks.create_scene_graph_context();
        let driver = hooks.create_animation_driver();
        driver.install();

        let control = ControlSender::new(tx, hooks.waker());
        debug!("LoopController: created");

        Self {
            hooks,
            sg,
            driver,
            shared: Arc::new(SharedState::new()),
            windows: Vec::new(),
            worker: None,
            repaint_tx: Arc::new(Mutex::new(None)),
            control,
            control_rx: rx,
            update_timer: None,
            update_generation: 0,
            animation_timer: None,
            animation_generation: 0,
            exhaust_delay: CONFIG.scheduling.exhaust_delay,
            ui_thread: thread::current().id(),
            _not_send: PhantomData,
        }
    }

    pub fn animation_driver(&self) -> &Arc<dyn AnimationDriver> {
        &self.driver
    }

    pub fn scene_graph_context(&self) -> &Arc<dyn SceneGraphContext> {
        &self.sg
    }

    /// A cloneable, `Send` handle for repaint requests from other agents.
    pub fn proxy(&self) -> LoopProxy {
        LoopProxy {
            shared: self.shared.clone(),
            control: self.control.clone(),
            repaint_tx: self.repaint_tx.clone(),
            ui_thread: self.ui_thread,
        }
    }

    /// Add `window` to the tracked list. Showing does not start rendering;
    /// that happens on exposure.
    pub fn show(&mut self, window: WindowRef) {
        debug!("LoopController: show {}", window.id());
        self.windows.push(TrackedWindow {
            window,
            pending_update: false,
        });
    }

    /// Stop rendering `window` and drop it from the tracked list. Hiding an
    /// exposed window obscures it first, then offers the worker a chance to
    /// release render resources.
    pub fn hide(&mut self, window: &WindowRef) {
        debug!("LoopController: hide {}", window.id());
        if window.is_exposed() {
            self.handle_obscurity(window);
        }

        self.release_resources(window, false);

        if let Some(i) = self.window_index(window.id()) {
            self.windows.remove(i);
        }
    }

    /// The window is going away for good. Hide it if needed, then release
    /// with the destructor flag so node cleanup happens even on windows
    /// that asked for a persistent scene graph.
    pub fn window_destroyed(&mut self, window: &WindowRef) {
        debug!("LoopController: windowDestroyed {}", window.id());
        if window.is_visible() {
            self.hide(window);
        }
        self.release_resources(window, true);
    }

    /// Dispatch an exposure transition reported by the windowing system.
    pub fn exposure_changed(&mut self, window: &WindowRef) {
        if self.window_index(window.id()).is_none() {
            return;
        }
        if window.is_exposed() {
            self.handle_exposure(window);
        } else {
            self.handle_obscurity(window);
        }
    }

    /// The window should start rendering: hand it to the worker (starting
    /// the worker if necessary) and push a first frame through.
    fn handle_exposure(&mut self, window: &WindowRef) {
        debug!("LoopController: handleExposure {}", window.id());

        // A GPU context will be bound to the window; make sure it exists.
        if !window.has_handle() {
            window.create_handle();
        }

        let expose = RenderMessage::Expose {
            window: window.clone(),
            size: window.size(),
        };

        match &self.worker {
            Some(worker) => {
                if worker.tx.send(expose).is_err() {
                    warn!("LoopController: render worker queue closed on expose");
                }
            }
            None => {
                debug!("LoopController: starting render worker");
                let (tx, rx) = mpsc::channel();
                // Queued before the thread starts, so it is the first
                // message the worker sees.
                let _ = tx.send(expose);

                self.shared.request_exit(false);
                let worker = RenderWorker::new(
                    rx,
                    self.control.clone(),
                    self.shared.clone(),
                    self.hooks.clone(),
                    self.sg.clone(),
                    self.driver.is_running(),
                );

                match thread::Builder::new()
                    .name("render".to_string())
                    .spawn(move || worker.run())
                {
                    Ok(join) => {
                        *lock_repaint_tx(&self.repaint_tx) = Some(tx.clone());
                        self.worker = Some(WorkerHandle { tx, join });
                    }
                    Err(e) => {
                        error!("LoopController: failed to spawn render worker: {:#}", e);
                        return;
                    }
                }
            }
        }

        self.polish_and_sync();

        // The worker paces animations through frame completion now; the
        // non-visual tick is no longer needed.
        self.kill_animation_timer();
    }

    /// The window stopped being visible on screen: take it away from the
    /// worker, and keep animation time moving without vsync if needed.
    fn handle_obscurity(&mut self, window: &WindowRef) {
        debug!("LoopController: handleObscurity {}", window.id());
        if let Some(worker) = &self.worker {
            let _ = worker.tx.send(RenderMessage::Obscure {
                window: window.id(),
            });
        }

        if !self.anyone_showing() && self.driver.is_running() && self.animation_timer.is_none() {
            self.start_animation_timer();
        }
    }

    /// The host's animation driver reported that animations started.
    ///
    /// Arms the fallback tick whenever nothing is showing, so animations
    /// that begin while every window is obscured still make progress.
    pub fn animation_started(&mut self) {
        debug!("LoopController: animations started");
        if let Some(worker) = &self.worker {
            let _ = worker.tx.send(RenderMessage::AnimationStarted);
        }
        if !self.anyone_showing() && self.animation_timer.is_none() {
            self.start_animation_timer();
        }
    }

    /// The host's animation driver reported that animations stopped.
    pub fn animation_stopped(&mut self) {
        debug!("LoopController: animations stopped");
        if let Some(worker) = &self.worker {
            let _ = worker.tx.send(RenderMessage::AnimationStopped);
        }
        if !self.anyone_showing() {
            self.kill_animation_timer();
        }
    }

    /// Request that a new frame eventually be produced for `window`.
    ///
    /// Many calls coalesce into a single polish-and-sync through a
    /// single-shot timer: the exhaust delay while animations run (so event
    /// processing is not starved), immediate otherwise.
    pub fn maybe_update(&mut self, window: &WindowRef) {
        self.maybe_update_by_id(window.id());
    }

    fn maybe_update_by_id(&mut self, id: WindowId) {
        trace!("LoopController: maybeUpdate {}", id);
        let Some(i) = self.window_index(id) else { return };
        if self.windows[i].pending_update || self.worker.is_none() {
            return;
        }

        self.windows[i].pending_update = true;

        if self.update_timer.is_some() {
            return;
        }

        let delay = if self.driver.is_running() {
            self.exhaust_delay
        } else {
            Duration::ZERO
        };
        self.update_generation += 1;
        let msg = ControlMessage::UpdateTimerFired {
            generation: self.update_generation,
        };
        match SingleShot::start("update-coalesce", delay, self.control.clone(), msg) {
            Ok(timer) => self.update_timer = Some(timer),
            Err(e) => error!("LoopController: failed to arm update timer: {:#}", e),
        }
    }

    /// Unconditional repaint request from the UI agent. (Render-agent
    /// callers go through [`LoopProxy::update`], which forwards to the
    /// worker as a repaint without a new sync.)
    pub fn update(&mut self, window: &WindowRef) {
        self.maybe_update(window);
    }

    /// Notify the worker of a new surface size and push a frame at that
    /// size through. The follow-up sync is part of this contract; callers
    /// only resize. Zero dimensions are ignored.
    pub fn resize(&mut self, window: &WindowRef, size: SurfaceSize) {
        debug!("LoopController: resize {} to {:?}", window.id(), size);

        let Some(worker) = &self.worker else { return };
        if self.windows.is_empty()
            || !window.is_exposed()
            || self.window_index(window.id()).is_none()
        {
            return;
        }
        if size.is_empty() {
            return;
        }

        let _ = worker.tx.send(RenderMessage::Resize {
            window: window.id(),
            size,
        });

        self.polish_and_sync();
    }

    /// The one blocking point: finalize layout on the UI agent, then block
    /// until the worker has copied the scene into render-side structures.
    pub fn polish_and_sync(&mut self) {
        if !self.anyone_showing() {
            return;
        }
        trace!("LoopController: polishAndSync");
        let mut timing = PolishTiming::begin();

        // Polish is the last thing that happens before the scene is synced.
        for t in &self.windows {
            t.window.polish_items();
        }
        if let Some(t) = timing.as_mut() {
            t.polished();
        }

        // Update requests arriving from here on belong to the next frame.
        for t in &mut self.windows {
            t.pending_update = false;
        }

        let Some(worker) = &self.worker else { return };

        let shared = self.shared.clone();
        let mut state = shared.lock_rendezvous();
        state.gui_is_locked = true;

        if worker.tx.send(RenderMessage::RequestSync).is_err() {
            warn!("LoopController: render worker queue closed, skipping sync");
            state.gui_is_locked = false;
            return;
        }

        if let Some(t) = timing.as_mut() {
            t.wait_started();
        }
        let mut state = shared.wait_for_wake(state);
        state.gui_is_locked = false;
        drop(state);

        if let Some(t) = timing {
            t.finish();
        }
    }

    /// Synchronously render `window` and return the resulting image.
    ///
    /// The scene may have changed since the last frame, so the grab does its
    /// own polish and sync; two grabs around a scene mutation therefore see
    /// their respective states. Returns an empty image when the worker is
    /// not running.
    pub fn grab(&mut self, window: &WindowRef) -> FrameImage {
        debug!("LoopController: grab {}", window.id());
        let Some(worker) = &self.worker else {
            return FrameImage::empty();
        };

        if !window.has_handle() {
            window.create_handle();
        }
        window.polish_items();

        let slot: GrabSlot = Arc::new(Mutex::new(None));
        let shared = self.shared.clone();
        let mut state = shared.lock_rendezvous();
        state.gui_is_locked = true;

        let sent = worker
            .tx
            .send(RenderMessage::Grab {
                window: window.id(),
                out: slot.clone(),
            })
            .is_ok();
        if sent {
            state = shared.wait_for_wake(state);
        } else {
            warn!("LoopController: render worker queue closed, grab aborted");
        }
        state.gui_is_locked = false;
        drop(state);

        let result = lock_grab_slot(&slot).take().unwrap_or_else(FrameImage::empty);
        result
    }

    /// Offer the worker a chance to free render resources for `window`,
    /// blocking until it has decided. If the worker actually tore its GPU
    /// context down it is exiting; join it.
    fn release_resources(&mut self, window: &WindowRef, in_destructor: bool) {
        debug!(
            "LoopController: releaseResources {} (destructor: {})",
            window.id(),
            in_destructor
        );

        // Persistence is decided across the *other* tracked windows when the
        // target is being destroyed, across all of them otherwise. Computed
        // here and shipped with the message: this thread blocks right after
        // posting, so the list cannot change underneath the worker.
        let mut persistent_sg = false;
        let mut persistent_gl = false;
        for t in &self.windows {
            if !in_destructor || t.window.id() != window.id() {
                persistent_sg |= t.window.persistent_scene_graph();
                persistent_gl |= t.window.persistent_gpu_context();
            }
        }

        let shared = self.shared.clone();
        let state = shared.lock_rendezvous();
        if let Some(worker) = &self.worker {
            if !self.shared.exit_requested() {
                let sent = worker
                    .tx
                    .send(RenderMessage::TryRelease {
                        window: window.clone(),
                        in_destructor,
                        persistent_scene_graph: persistent_sg,
                        persistent_gpu_context: persistent_gl,
                    })
                    .is_ok();
                if sent {
                    drop(shared.wait_for_wake(state));
                } else {
                    drop(state);
                }
            } else {
                drop(state);
            }
        } else {
            drop(state);
        }

        if self.shared.exit_requested() {
            self.join_worker();
        }
    }

    fn join_worker(&mut self) {
        if let Some(WorkerHandle { tx, join }) = self.worker.take() {
            debug!("LoopController: joining render worker");
            *lock_repaint_tx(&self.repaint_tx) = None;
            drop(tx);
            if let Err(e) = join.join() {
                error!("LoopController: render worker panicked: {:?}", e);
            }
        }
    }

    /// Drain the controller's event sink. The host calls this from its UI
    /// event loop whenever the loop has been woken.
    pub fn process_events(&mut self) {
        while let Ok(msg) = self.control_rx.try_recv() {
            self.dispatch(msg);
        }
    }

    pub(crate) fn dispatch(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::UpdateLater { window } => {
                // The window might have gone away in the meantime.
                if self.window_index(window).is_some() {
                    self.maybe_update_by_id(window);
                }
            }

            ControlMessage::AdvanceAnimations => {
                self.shared
                    .animation_requests_pending
                    .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
                trace!("LoopController: AdvanceAnimations");
                if self.driver.is_running() {
                    self.driver.advance();
                }
            }

            ControlMessage::UpdateTimerFired { generation } => {
                if generation != self.update_generation || self.update_timer.is_none() {
                    return; // stale: the timer was killed after firing
                }
                self.update_timer = None;
                self.polish_and_sync();
            }

            ControlMessage::AnimationTimerTick { generation } => {
                if generation != self.animation_generation || self.animation_timer.is_none() {
                    return;
                }
                trace!("LoopController: non-visual animation tick");
                self.driver.advance();
            }
        }
    }

    fn start_animation_timer(&mut self) {
        let interval = self.animation_interval();
        debug!(
            "LoopController: starting fallback animation timer ({:?})",
            interval
        );
        self.animation_generation += 1;
        let msg = ControlMessage::AnimationTimerTick {
            generation: self.animation_generation,
        };
        match Interval::start("animation-tick", interval, self.control.clone(), msg) {
            Ok(timer) => self.animation_timer = Some(timer),
            Err(e) => error!("LoopController: failed to arm animation timer: {:#}", e),
        }
    }

    fn kill_animation_timer(&mut self) {
        if self.animation_timer.take().is_some() {
            debug!("LoopController: killing fallback animation timer");
        }
        self.animation_generation += 1;
    }

    /// Tick interval for obscured animation. Some platforms report 0 or
    /// another bogus refresh rate; anything below 1 Hz falls back to 16 ms.
    fn animation_interval(&self) -> Duration {
        let rate = self.hooks.refresh_rate();
        if rate < 1.0 {
            Duration::from_millis(16)
        } else {
            Duration::from_millis((1000.0 / rate) as u64)
        }
    }

    pub(crate) fn anyone_showing(&self) -> bool {
        self.windows
            .iter()
            .any(|t| t.window.is_visible() && t.window.is_exposed())
    }

    fn window_index(&self, id: WindowId) -> Option<usize> {
        self.windows.iter().position(|t| t.window.id() == id)
    }

    #[cfg(test)]
    pub(crate) fn pending_update_count(&self) -> usize {
        self.windows.iter().filter(|t| t.pending_update).count()
    }

    #[cfg(test)]
    pub(crate) fn tracked_window_count(&self) -> usize {
        self.windows.len()
    }

    #[cfg(test)]
    pub(crate) fn worker_running(&self) -> bool {
        self.worker.is_some()
    }

    #[cfg(test)]
    pub(crate) fn update_timer_armed(&self) -> bool {
        self.update_timer.is_some()
    }

    #[cfg(test)]
    pub(crate) fn animation_timer_armed(&self) -> bool {
        self.animation_timer.is_some()
    }

    #[cfg(test)]
    pub(crate) fn animation_requests_in_flight(&self) -> i32 {
        self.shared
            .animation_requests_pending
            .load(std::sync::atomic::Ordering::Acquire)
    }
}

impl Drop for LoopController {
    fn drop(&mut self) {
        // Stop timers before the sink goes away, then shut the worker's
        // queue so a still-running worker exits its loop.
        self.update_timer = None;
        self.animation_timer = None;
        self.join_worker();
    }
}

/// Cloneable, `Send` handle for repaint requests from outside the UI agent.
///
/// From the render agent (legal only while the UI agent is blocked in sync)
/// the request is forwarded to the worker as a repaint without a new sync,
/// which keeps render-side animations alive. From any other thread it is
/// replayed on the UI agent as a deferred update.
#[derive(Clone)]
pub struct LoopProxy {
    shared: Arc<SharedState>,
    control: ControlSender,
    repaint_tx: Arc<Mutex<Option<Sender<RenderMessage>>>>,
    ui_thread: ThreadId,
}

impl LoopProxy {
    pub fn update(&self, window: WindowId) {
        if self.shared.is_render_thread() {
            trace!("LoopProxy: repaint requested from render agent");
            if let Some(tx) = lock_repaint_tx(&self.repaint_tx).as_ref() {
                let _ = tx.send(RenderMessage::RequestRepaint);
            }
            return;
        }

        debug_assert!(
            thread::current().id() == self.ui_thread || self.shared.gui_is_locked(),
            "update may only be requested from the UI agent, or during sync"
        );
        self.control.post(ControlMessage::UpdateLater { window });
    }
}

fn lock_repaint_tx(
    tx: &Arc<Mutex<Option<Sender<RenderMessage>>>>,
) -> std::sync::MutexGuard<'_, Option<Sender<RenderMessage>>> {
    tx.lock().unwrap_or_else(|e| e.into_inner())
}
