// src/lib.rs
//! Threaded render loop for scene-graph UI toolkits.
//!
//! Two agents cooperate here. The **UI agent** owns the scene description,
//! layout and animation accounting; the **render agent** owns the GPU
//! context and frame submission, on a dedicated thread. All communication is
//! message passing, except for one deliberate blocking point: the UI agent
//! initiates a polish-and-sync, blocks, and the render worker picks the sync
//! up through its queue and releases the UI agent once it has copied the
//! dirty scene state into render-side structures. The worker then renders
//! and swaps concurrently with the next UI frame being built.
//!
//! The loop is active while any window is exposed. Visible windows are
//! tracked, but only exposed ones are handed to the render thread. When the
//! last window goes away the worker tears down the scene-graph and GPU
//! contexts (unless a window opted into persistence) and exits; it is
//! restarted on the next exposure.
//!
//! The host toolkit plugs in through the traits in [`host`]: windows,
//! GPU context, scene-graph context, animation driver, event-loop waker.

pub mod config;
pub mod controller;
pub mod geometry;
pub mod host;
pub mod messages;
pub mod worker;

mod shared;
mod timer;
mod timing;

#[cfg(test)]
pub(crate) mod testutil;

pub use controller::{LoopController, LoopProxy};
pub use geometry::{FrameImage, SurfaceFormat, SurfaceSize};
pub use host::{
    AnimationDriver, ContextError, EventLoopWaker, GpuContext, HostHooks, HostWindow,
    RenderSurface, SceneGraphContext, WindowId, WindowRef,
};
pub use messages::{ControlMessage, RenderMessage, UpdateRequests};
