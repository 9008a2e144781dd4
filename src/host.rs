// src/host.rs
//! The contract the render loop consumes from the host UI toolkit.
//!
//! Everything the loop does not own lives behind these traits: the window
//! objects whose scenes it schedules, the GPU context, the scene-graph
//! context, and the animation driver. The loop never reaches around them;
//! implementations decide what a "surface" or a "renderer" actually is.
//!
//! Threading expectations are part of the contract and are documented per
//! method. In short: `polish_items` runs on the UI agent, everything that
//! touches the GPU runs on the render agent, and the sync/render callbacks
//! are only ever invoked under the protocol's rendezvous rules.

use crate::geometry::{FrameImage, SurfaceFormat, SurfaceSize};
use anyhow::Result;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Stable identity of a window for list lookups and message payloads.
pub type WindowId = u64;

/// Shared reference to a host window.
///
/// Windows are handed to the render worker, so the host object must be safe
/// to share; the protocol guarantees which agent calls what, and when.
pub type WindowRef = Arc<dyn HostWindow>;

/// Defines errors the host can report when creating a GPU context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The backend exists but refused to produce a context.
    #[error("failed to create GPU context: {reason}")]
    Creation { reason: String },
    /// No GPU backend is available at all.
    #[error("no GPU backend available")]
    NoBackend,
}

/// An opaque drawable the GPU context can target.
///
/// The loop never interprets a surface; it only routes the right one to
/// `make_current`/`swap_buffers`. Backends downcast through `as_any`.
pub trait RenderSurface: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// A window as seen by the render loop.
///
/// The `sync_scene_graph` call is where UI-side dirty state is copied into
/// render-side structures; it is only invoked while the UI agent is blocked
/// in the rendezvous. `render_scene_graph` runs afterwards with the UI agent
/// released, and must not read UI-mutable state.
pub trait HostWindow: Send + Sync {
    fn id(&self) -> WindowId;

    fn is_visible(&self) -> bool;
    fn is_exposed(&self) -> bool;

    /// Whether the windowing-system handle has been created yet.
    fn has_handle(&self) -> bool;
    /// Create the windowing-system handle. Called on the UI agent before the
    /// window is handed to the worker (a GPU context will be bound to it).
    fn create_handle(&self);

    fn requested_format(&self) -> SurfaceFormat;
    fn size(&self) -> SurfaceSize;
    /// The drawable backing this window.
    fn surface(&self) -> &dyn RenderSurface;

    /// Per-item layout finalization. UI agent only.
    fn polish_items(&self);
    /// Copy UI-side dirty scene state into render-side structures. Render
    /// agent only, UI agent blocked.
    fn sync_scene_graph(&self);
    /// Render the scene graph at the given size. Render agent only.
    fn render_scene_graph(&self, size: SurfaceSize);
    /// Tear down this window's scene-graph nodes. Render agent only.
    fn cleanup_nodes_on_shutdown(&self);
    /// Frame submitted; the host may notify observers.
    fn fire_frame_swapped(&self);

    /// Whether the window's renderer exists. It does not until the first
    /// sync, and windows without one are skipped during render.
    fn renderer_ready(&self) -> bool;

    /// Opt-out of scene-graph teardown when the window is obscured.
    fn persistent_scene_graph(&self) -> bool;
    /// Opt-out of GPU context teardown when the window is obscured.
    fn persistent_gpu_context(&self) -> bool;
}

/// The GPU context owned by the render worker.
///
/// Destruction is `Drop`. The context never leaves the render agent once
/// created; `Send` is required only so the (empty) slot can travel to the
/// worker thread at spawn.
pub trait GpuContext: Send {
    /// Bind the context to a surface. A failure is reported as `false`;
    /// the loop logs and carries on (a later frame may succeed).
    fn make_current(&mut self, surface: &dyn RenderSurface) -> bool;
    fn done_current(&mut self);
    fn swap_buffers(&mut self, surface: &dyn RenderSurface);
    /// Read back the current surface at the given size.
    fn read_framebuffer(&mut self, size: SurfaceSize) -> FrameImage;
}

/// The scene-graph context: constructed once, survives worker sleeps, and is
/// re-initialized against whatever GPU context currently exists.
pub trait SceneGraphContext: Send + Sync {
    fn initialize(&self, gl: &mut dyn GpuContext);
    fn is_ready(&self) -> bool;
    fn invalidate(&self);
    /// Drain deferred resource deletions. Called while a context is current
    /// during invalidation, and once per worker loop iteration.
    fn flush_deferred(&self);
}

/// The host's animation driver.
///
/// The loop only ever advances it on the UI agent; started/stopped
/// notifications are delivered by the host as calls to
/// `LoopController::animation_started` / `animation_stopped`.
pub trait AnimationDriver: Send + Sync {
    fn is_running(&self) -> bool;
    fn advance(&self);
    /// Register the driver with the host's animation system.
    fn install(&self);
}

/// Trait for waking the host's UI event loop from background threads.
///
/// When the render worker or a timer thread posts a message to the
/// controller's event sink, it calls `wake()` so the host loop returns from
/// its blocking poll and pumps `LoopController::process_events`.
pub trait EventLoopWaker: Send + Sync {
    /// Wake the event loop, causing it to return from blocking poll.
    fn wake(&self) -> Result<()>;
}

/// Factory half of the host contract: everything the loop constructs lazily.
pub trait HostHooks: Send + Sync {
    fn create_gpu_context(&self, format: SurfaceFormat)
        -> Result<Box<dyn GpuContext>, ContextError>;

    /// A throwaway offscreen drawable, used to bootstrap the GPU context
    /// when the first exposed window still has an invalid size.
    fn create_offscreen_surface(
        &self,
        format: SurfaceFormat,
        size: SurfaceSize,
    ) -> Box<dyn RenderSurface>;

    fn create_scene_graph_context(&self) -> Arc<dyn SceneGraphContext>;
    fn create_animation_driver(&self) -> Arc<dyn AnimationDriver>;

    /// Refresh rate of the primary display in Hz. Values below 1 Hz are
    /// treated as bogus platform data and replaced with a 16 ms interval.
    fn refresh_rate(&self) -> f64;

    fn waker(&self) -> Arc<dyn EventLoopWaker>;
}
