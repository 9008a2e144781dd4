// src/worker/render_worker.rs
//! RenderWorker - dedicated thread for scene-graph sync and frame submission.
//!
//! The worker owns the GPU context and the per-thread list of exposed
//! windows. Its loop is: process a frame if there is one to process, drain
//! the message queue, then sleep on the queue when idle. It never blocks on
//! the UI agent except while holding the rendezvous mutex during
//! sync/release/grab, and by then the UI agent is already waiting.
//!
//! Threading model:
//! - Owns: GPU context, exposed-window list, pending-update flags
//! - Shares: the rendezvous state and the scene-graph context
//! - Sleep state: a blocking `recv()` on the message queue

use crate::geometry::SurfaceSize;
use crate::host::{GpuContext, HostHooks, SceneGraphContext, WindowId, WindowRef};
use crate::messages::{
    lock_grab_slot, ControlMessage, ControlSender, GrabSlot, RenderMessage, UpdateRequests,
};
use crate::shared::SharedState;
use crate::timing::FrameTiming;
use log::*;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;

/// A window as tracked by the render worker: present exactly while exposed.
pub(crate) struct WorkerWindow {
    pub window: WindowRef,
    pub size: SurfaceSize,
}

/// Render worker state. Constructed on the UI agent, then moved onto the
/// render thread where `run` consumes it.
pub struct RenderWorker {
    rx: Receiver<RenderMessage>,
    control: ControlSender,
    shared: Arc<SharedState>,
    hooks: Arc<dyn HostHooks>,
    sg: Arc<dyn SceneGraphContext>,

    pub(crate) gl: Option<Box<dyn GpuContext>>,
    pub(crate) windows: Vec<WorkerWindow>,
    pub(crate) pending_update: UpdateRequests,
    pub(crate) sleeping: bool,
    pub(crate) animation_running: bool,

    timing: FrameTiming,
}

impl RenderWorker {
    pub(crate) fn new(
        rx: Receiver<RenderMessage>,
        control: ControlSender,
        shared: Arc<SharedState>,
        hooks: Arc<dyn HostHooks>,
        sg: Arc<dyn SceneGraphContext>,
        animation_running: bool,
    ) -> Self {
        Self {
            rx,
            control,
            shared,
            hooks,
            sg,
            gl: None,
            windows: Vec::new(),
            pending_update: UpdateRequests::empty(),
            sleeping: false,
            animation_running,
            timing: FrameTiming::new(),
        }
    }

    /// Main loop of the render thread.
    pub fn run(mut self) {
        debug!("RenderWorker: thread started");
        self.shared.set_render_thread(Some(std::thread::current().id()));

        while !self.shared.exit_requested() {
            if !self.windows.is_empty() {
                if self.gl.is_none() {
                    self.initialize_gpu();
                }
                if let Some(gl) = self.gl.as_mut() {
                    if !self.sg.is_ready() {
                        self.sg.initialize(gl.as_mut());
                    }
                }
                self.sync_and_render();
            }

            self.drain_messages();
            self.sg.flush_deferred();

            if !self.shared.exit_requested()
                && ((!self.animation_running && self.pending_update.is_empty())
                    || self.windows.is_empty())
            {
                self.sleep_until_woken();
            }
        }

        self.shared.set_render_thread(None);
        debug_assert!(
            self.gl.is_none(),
            "GPU context must be released before the render thread exits"
        );
        debug!("RenderWorker: thread stopped");
    }

    /// Lazily create the GPU context against the first exposed window.
    ///
    /// Exposes on windows whose size is still invalid do happen; binding a
    /// fresh context to such a window makes some backends complain, so the
    /// bootstrap falls back to a small offscreen surface.
    fn initialize_gpu(&mut self) {
        debug!("RenderWorker: initializing GPU context");
        let first = &self.windows[0];
        let format = first.window.requested_format();

        let mut gl = match self.hooks.create_gpu_context(format) {
            Ok(gl) => gl,
            Err(e) => {
                error!("RenderWorker: could not create GPU context: {}", e);
                return;
            }
        };

        let bound = if first.size.is_empty() {
            let temp = self
                .hooks
                .create_offscreen_surface(format, SurfaceSize::new(64, 64));
            gl.make_current(temp.as_ref())
        } else {
            gl.make_current(first.window.surface())
        };
        if !bound {
            warn!("RenderWorker: make_current failed during startup");
        }

        self.sg.initialize(gl.as_mut());
        self.gl = Some(gl);
    }

    /// One frame: request an animation tick, sync if the UI agent asked for
    /// one, then render and swap every ready window.
    fn sync_and_render(&mut self) {
        self.timing.frame_started();
        trace!("RenderWorker: sync_and_render");

        // This animation request arrives on the UI agent after the sync.
        if self.animation_running
            && self.shared.animation_requests_pending.load(Ordering::Acquire) < 2
        {
            self.shared
                .animation_requests_pending
                .fetch_add(1, Ordering::AcqRel);
            self.control.post(ControlMessage::AdvanceAnimations);
        }

        if self.pending_update.contains(UpdateRequests::SYNC) {
            self.sync();
        }
        self.timing.synced();

        for w in &self.windows {
            if !w.window.renderer_ready() || w.size.is_empty() {
                trace!(
                    "RenderWorker: window {} not ready, skipping render",
                    w.window.id()
                );
                continue;
            }
            let Some(gl) = self.gl.as_mut() else { break };
            gl.make_current(w.window.surface());
            w.window.render_scene_graph(w.size);
            self.timing.rendered();
            gl.swap_buffers(w.window.surface());
            w.window.fire_frame_swapped();
        }

        self.timing.frame_finished();
    }

    /// Enters the rendezvous mutex knowing the UI agent is blocked, copies
    /// UI-side dirty state into render-side structures, then releases it.
    fn sync(&mut self) {
        trace!("RenderWorker: sync");
        let shared = self.shared.clone();
        let mut state = shared.lock_rendezvous();

        debug_assert!(
            state.gui_is_locked,
            "sync requires the UI agent to be blocked in polish-and-sync"
        );

        self.pending_update = UpdateRequests::empty();

        for w in &self.windows {
            if w.size.is_empty() {
                trace!(
                    "RenderWorker: window {} has no size, skipping sync",
                    w.window.id()
                );
                continue;
            }
            if let Some(gl) = self.gl.as_mut() {
                gl.make_current(w.window.surface());
                w.window.sync_scene_graph();
            }
        }

        shared.signal_gui(&mut state);
    }

    /// Non-blocking queue drain between frames.
    fn drain_messages(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => {
                    self.handle_message(msg);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.handle_disconnect();
                    break;
                }
            }
        }
    }

    /// The nested event loop: block on the queue until a handler reports
    /// that the worker should wake up.
    fn sleep_until_woken(&mut self) {
        trace!("RenderWorker: going to sleep");
        self.sleeping = true;
        loop {
            match self.rx.recv() {
                Ok(msg) => {
                    if self.handle_message(msg) {
                        break;
                    }
                }
                Err(_) => {
                    self.handle_disconnect();
                    break;
                }
            }
        }
        self.sleeping = false;
        trace!("RenderWorker: woke up");
    }

    /// The controller is gone without a release handshake. Tear down what we
    /// own and exit; host-level node cleanup is unreachable at this point.
    fn handle_disconnect(&mut self) {
        warn!("RenderWorker: message channel closed, exiting without release");
        self.gl = None;
        self.shared.request_exit(true);
    }

    /// Process one message. The return value is the wake decision consumed
    /// by the nested event loop; it is ignored while the worker is awake.
    pub(crate) fn handle_message(&mut self, msg: RenderMessage) -> bool {
        match msg {
            RenderMessage::Expose { window, size } => {
                trace!("RenderWorker: Expose {}", window.id());
                if self.window_index(window.id()).is_some() {
                    debug!("RenderWorker: window already added");
                    return false;
                }
                self.windows.push(WorkerWindow { window, size });
                self.sleeping
            }

            RenderMessage::Obscure { window } => {
                trace!("RenderWorker: Obscure {}", window);
                if let Some(i) = self.window_index(window) {
                    self.windows.remove(i);
                }
                self.sleeping && !self.windows.is_empty()
            }

            RenderMessage::Resize { window, size } => {
                trace!("RenderWorker: Resize {} to {:?}", window, size);
                match self.window_index(window) {
                    Some(i) => self.windows[i].size = size,
                    None => debug!("RenderWorker: resize for unknown window {}", window),
                }
                // No wake-up: a sync follows every resize.
                false
            }

            RenderMessage::RequestSync => {
                trace!("RenderWorker: RequestSync");
                if !self.windows.is_empty() {
                    self.pending_update |= UpdateRequests::SYNC;
                }
                self.sleeping
            }

            RenderMessage::RequestRepaint => {
                trace!("RenderWorker: RequestRepaint");
                if !self.windows.is_empty() {
                    self.pending_update |= UpdateRequests::REPAINT;
                }
                self.sleeping
            }

            RenderMessage::AnimationStarted => {
                debug!("RenderWorker: animations started");
                self.animation_running = true;
                self.sleeping
            }

            RenderMessage::AnimationStopped => {
                debug!("RenderWorker: animations stopped");
                self.animation_running = false;
                false
            }

            RenderMessage::TryRelease {
                window,
                in_destructor,
                persistent_scene_graph,
                persistent_gpu_context,
            } => self.handle_try_release(
                window,
                in_destructor,
                persistent_scene_graph,
                persistent_gpu_context,
            ),

            RenderMessage::Grab { window, out } => self.handle_grab(window, out),
        }
    }

    /// Release GPU and scene-graph resources if no window remains exposed.
    /// The controller is blocked waiting, so it is always signalled, even on
    /// the no-op path.
    fn handle_try_release(
        &mut self,
        window: WindowRef,
        in_destructor: bool,
        persistent_scene_graph: bool,
        persistent_gpu_context: bool,
    ) -> bool {
        trace!("RenderWorker: TryRelease {}", window.id());
        let shared = self.shared.clone();
        let mut state = shared.lock_rendezvous();
        let mut wake = false;

        if self.windows.is_empty() {
            self.invalidate_gpu(
                &window,
                in_destructor,
                persistent_scene_graph,
                persistent_gpu_context,
            );
            self.shared.request_exit(self.gl.is_none());
            wake = self.sleeping;
        } else if in_destructor {
            // The window is going away for good; its nodes must be cleaned
            // up now even though other windows keep the contexts alive.
            debug!(
                "RenderWorker: destroying nodes of window {} while others remain",
                window.id()
            );
            if let Some(gl) = self.gl.as_mut() {
                gl.make_current(window.surface());
                window.cleanup_nodes_on_shutdown();
            }
        } else {
            debug!("RenderWorker: not releasing, active windows remain");
        }

        shared.signal_gui(&mut state);
        wake
    }

    /// Tear down render-side resources for `window`, honoring the
    /// persistence policy computed over the remaining tracked windows.
    fn invalidate_gpu(
        &mut self,
        window: &WindowRef,
        in_destructor: bool,
        persistent_scene_graph: bool,
        persistent_gpu_context: bool,
    ) {
        let Some(gl) = self.gl.as_mut() else { return };
        debug!("RenderWorker: invalidating render resources");

        gl.make_current(window.surface());

        // Node cleanup cannot be skipped in the destructor case.
        if !persistent_scene_graph || in_destructor {
            window.cleanup_nodes_on_shutdown();
        }

        if persistent_scene_graph {
            debug!("RenderWorker: persistent scene graph, stopping here");
            return;
        }

        self.sg.invalidate();
        self.sg.flush_deferred();
        gl.done_current();
        debug!("RenderWorker: scene-graph context invalidated");

        if persistent_gpu_context {
            debug!("RenderWorker: persistent GPU context, keeping it");
        } else {
            self.gl = None;
            debug!("RenderWorker: GPU context destroyed");
        }
    }

    /// Synchronously render `window` and read the framebuffer into the
    /// caller-owned slot. The controller is blocked for the duration.
    fn handle_grab(&mut self, window: WindowId, out: GrabSlot) -> bool {
        trace!("RenderWorker: Grab {}", window);
        let shared = self.shared.clone();
        let mut state = shared.lock_rendezvous();

        if let Some(i) = self.window_index(window) {
            if let Some(gl) = self.gl.as_mut() {
                let w = &self.windows[i];
                gl.make_current(w.window.surface());

                debug!("RenderWorker: syncing and rendering for grab");
                w.window.sync_scene_graph();
                w.window.render_scene_graph(w.size);

                *lock_grab_slot(&out) = Some(gl.read_framebuffer(w.size));
            }
        }

        shared.signal_gui(&mut state);
        false
    }

    pub(crate) fn window_index(&self, id: WindowId) -> Option<usize> {
        self.windows.iter().position(|w| w.window.id() == id)
    }
}
