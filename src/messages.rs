// src/messages.rs
//! Message types for communication between the loop controller and the
//! render worker.
//!
//! This module defines the message-based protocol for the two agents. All
//! communication happens via ownership transfer - the payloads are plain
//! data (window references, sizes, a destination-owned grab slot), and each
//! agent processes its queue in order.

use crate::geometry::{FrameImage, SurfaceSize};
use crate::host::{EventLoopWaker, WindowId, WindowRef};
use bitflags::bitflags;
use log::warn;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

bitflags! {
    /// The kinds of work the render worker has been asked to pick up on its
    /// next loop iteration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateRequests: u8 {
        /// The UI agent is blocked and waiting for a sync.
        const SYNC = 1 << 0;
        /// Repaint without a new sync (render-side animations).
        const REPAINT = 1 << 1;
    }
}

/// Destination-owned slot a grab result is written into before the UI agent
/// is released.
pub type GrabSlot = Arc<Mutex<Option<FrameImage>>>;

/// Requests sent from the loop controller (and the worker itself, for
/// repaints) to the render worker's event sink.
pub enum RenderMessage {
    /// A window is now exposed and should be added to the worker's list.
    /// Carries the size at exposure time.
    Expose { window: WindowRef, size: SurfaceSize },

    /// A window ceased to be exposed and should be removed from the list.
    Obscure { window: WindowId },

    /// A window changed size. No wake-up: a sync always follows a resize,
    /// and that is what picks the new size up.
    Resize { window: WindowId, size: SurfaceSize },

    /// The UI agent has blocked and is waiting for a sync.
    RequestSync,

    /// Render another frame without a new sync. Posted by the worker to
    /// itself when a repaint is requested from the render agent.
    RequestRepaint,

    /// The animation driver started; render-driven animation pacing begins.
    AnimationStarted,

    /// The animation driver stopped.
    AnimationStopped,

    /// Release GPU and scene-graph resources if no window remains exposed.
    /// The persistence policy is computed by the controller over its tracked
    /// windows immediately before it blocks, and travels with the message.
    TryRelease {
        window: WindowRef,
        in_destructor: bool,
        persistent_scene_graph: bool,
        persistent_gpu_context: bool,
    },

    /// Synchronously render `window` and read the framebuffer back into the
    /// slot. The controller is blocked until the worker signals.
    Grab { window: WindowId, out: GrabSlot },
}

/// Messages delivered to the loop controller's event sink, pumped on the UI
/// agent by the host event loop.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// Replay an update request that arrived from the wrong agent.
    UpdateLater { window: WindowId },

    /// Advance the animation driver. Posted by the worker after a sync so
    /// that animation time tracks the render cadence.
    AdvanceAnimations,

    /// The update coalescing timer fired.
    UpdateTimerFired { generation: u64 },

    /// The fallback animation timer ticked (no window exposed).
    AnimationTimerTick { generation: u64 },
}

/// Sending half of the controller's event sink, paired with the host waker
/// so that posts from background threads also wake the UI event loop.
#[derive(Clone)]
pub struct ControlSender {
    tx: Sender<ControlMessage>,
    waker: Arc<dyn EventLoopWaker>,
}

impl ControlSender {
    pub fn new(tx: Sender<ControlMessage>, waker: Arc<dyn EventLoopWaker>) -> Self {
        Self { tx, waker }
    }

    /// Post a message to the UI agent and wake its event loop.
    ///
    /// A closed sink means the controller is gone; the message is dropped
    /// (the sender is about to be torn down as well).
    pub fn post(&self, msg: ControlMessage) {
        if self.tx.send(msg).is_err() {
            warn!("ControlSender: controller sink closed, dropping message");
            return;
        }
        if let Err(e) = self.waker.wake() {
            warn!("ControlSender: failed to wake UI event loop: {:#}", e);
        }
    }
}

/// Lock a grab slot, tolerating a poisoned mutex (a panicking grabber must
/// not take the render worker down with it).
pub(crate) fn lock_grab_slot(slot: &GrabSlot) -> std::sync::MutexGuard<'_, Option<FrameImage>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}
