// src/shared.rs
//! State shared between the UI agent and the render agent.
//!
//! One mutex plus one condition variable gate exactly three things: the
//! sync rendezvous, release completion, and grab completion. Nothing else
//! in the protocol blocks, and nothing else takes this mutex.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::ThreadId;

/// The mutex-protected half of the rendezvous.
#[derive(Debug, Default)]
pub struct Rendezvous {
    /// True exactly while the UI agent is blocked on the condition variable
    /// waiting for sync or grab completion.
    pub gui_is_locked: bool,
    /// Condition-variable predicate. Set by the worker right before it
    /// notifies; consumed by the waiting UI agent. Guards against spurious
    /// wakeups.
    pub wake_gui: bool,
}

/// Cross-agent coordination state. One instance per loop controller,
/// shared with whichever render worker is currently running.
pub struct SharedState {
    rendezvous: Mutex<Rendezvous>,
    wake: Condvar,

    /// Cooperative shutdown flag for the render worker.
    pub should_exit: AtomicBool,
    /// Worker-to-UI animation messages in flight. Never exceeds 2.
    pub animation_requests_pending: AtomicI32,

    render_thread: Mutex<Option<ThreadId>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            rendezvous: Mutex::new(Rendezvous::default()),
            wake: Condvar::new(),
            should_exit: AtomicBool::new(false),
            animation_requests_pending: AtomicI32::new(0),
            render_thread: Mutex::new(None),
        }
    }

    /// Lock the rendezvous state. Poisoning is tolerated: a panicked agent
    /// must not wedge the survivor on teardown.
    pub fn lock_rendezvous(&self) -> MutexGuard<'_, Rendezvous> {
        self.rendezvous.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the UI agent is currently blocked waiting on the worker.
    pub fn gui_is_locked(&self) -> bool {
        self.lock_rendezvous().gui_is_locked
    }

    /// Worker side: mark the rendezvous complete and release the UI agent.
    pub fn signal_gui(&self, state: &mut Rendezvous) {
        state.wake_gui = true;
        self.wake.notify_one();
    }

    /// UI side: block until the worker signals. Returns with the predicate
    /// consumed and the lock re-held.
    pub fn wait_for_wake<'a>(
        &self,
        mut guard: MutexGuard<'a, Rendezvous>,
    ) -> MutexGuard<'a, Rendezvous> {
        while !guard.wake_gui {
            guard = self
                .wake
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
        guard.wake_gui = false;
        guard
    }

    /// Published by the worker for the lifetime of its thread so callers can
    /// be classified by agent.
    pub fn set_render_thread(&self, id: Option<ThreadId>) {
        *self
            .render_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = id;
    }

    pub fn is_render_thread(&self) -> bool {
        *self
            .render_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            == Some(std::thread::current().id())
    }

    pub fn exit_requested(&self) -> bool {
        self.should_exit.load(Ordering::Acquire)
    }

    pub fn request_exit(&self, exit: bool) {
        self.should_exit.store(exit, Ordering::Release);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
