// src/timing.rs
//! Frame timing diagnostics, enabled by `QML_WINDOW_TIMING`.
//!
//! Each agent owns its own timing struct instead of sharing mutable
//! globals: `PolishTiming` measures one polish-and-sync on the UI agent,
//! `FrameTiming` lives in the render worker and measures every frame.

use crate::config::CONFIG;
use log::info;
use std::time::{Duration, Instant};

/// Measures a single polish-and-sync from the UI agent's point of view.
pub(crate) struct PolishTiming {
    start: Instant,
    polish_done: Duration,
    wait_start: Duration,
}

impl PolishTiming {
    /// Returns a live measurement only when timing diagnostics are on.
    pub fn begin() -> Option<Self> {
        if !CONFIG.diagnostics.window_timing {
            return None;
        }
        Some(Self {
            start: Instant::now(),
            polish_done: Duration::ZERO,
            wait_start: Duration::ZERO,
        })
    }

    pub fn polished(&mut self) {
        self.polish_done = self.start.elapsed();
    }

    pub fn wait_started(&mut self) {
        self.wait_start = self.start.elapsed();
    }

    pub fn finish(self) {
        let total = self.start.elapsed();
        info!(
            "sync timing: polish={}ms wait={}ms sync={}ms",
            self.polish_done.as_millis(),
            self.wait_start.saturating_sub(self.polish_done).as_millis(),
            total.saturating_sub(self.wait_start).as_millis(),
        );
    }
}

/// Measures frames on the render agent: time since the previous frame, sync
/// duration, first-window render duration, and the tail spent swapping.
pub(crate) struct FrameTiming {
    enabled: bool,
    last_frame: Option<Instant>,
    frame_start: Instant,
    since_last: Duration,
    sync_done: Duration,
    render_done: Duration,
}

impl FrameTiming {
    pub fn new() -> Self {
        Self {
            enabled: CONFIG.diagnostics.window_timing,
            last_frame: None,
            frame_start: Instant::now(),
            since_last: Duration::ZERO,
            sync_done: Duration::ZERO,
            render_done: Duration::ZERO,
        }
    }

    pub fn frame_started(&mut self) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        self.since_last = self.last_frame.map(|t| now - t).unwrap_or_default();
        self.last_frame = Some(now);
        self.frame_start = now;
        self.sync_done = Duration::ZERO;
        self.render_done = Duration::ZERO;
    }

    pub fn synced(&mut self) {
        if self.enabled {
            self.sync_done = self.frame_start.elapsed();
        }
    }

    /// Recorded for the first rendered window only.
    pub fn rendered(&mut self) {
        if self.enabled && self.render_done.is_zero() {
            self.render_done = self.frame_start.elapsed();
        }
    }

    pub fn frame_finished(&self) {
        if !self.enabled {
            return;
        }
        let total = self.frame_start.elapsed();
        info!(
            "frame timing: since_last={}ms sync={}ms render={}ms swap={}ms",
            self.since_last.as_millis(),
            self.sync_done.as_millis(),
            self.render_done.saturating_sub(self.sync_done).as_millis(),
            total.saturating_sub(self.render_done).as_millis(),
        );
    }
}
