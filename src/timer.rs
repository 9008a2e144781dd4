// src/timer.rs
//! Thread-backed timers that post messages to the controller's event sink.
//!
//! The loop has no event-loop framework to hang timers on, so each timer is
//! a small named thread that sleeps and posts. Cancellation is cooperative
//! (a flag checked after the sleep) and, because a timer can fire in the
//! instant it is being killed, every timer message carries a generation tag
//! the controller validates at dispatch; a stale generation is ignored.

use crate::messages::{ControlMessage, ControlSender};
use anyhow::{Context, Result};
use log::error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Single-shot timer: sleeps once, posts once, exits.
///
/// Used for the update coalescing delay (0 ms or the exhaust delay).
pub struct SingleShot {
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SingleShot {
    pub fn start(name: &str, delay: Duration, sender: ControlSender, msg: ControlMessage) -> Result<Self> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                if !flag.load(Ordering::Acquire) {
                    sender.post(msg);
                }
            })
            .with_context(|| format!("Failed to spawn timer thread '{}'", name))?;

        Ok(Self {
            cancelled,
            handle: Some(handle),
        })
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Drop for SingleShot {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                error!("Timer thread panicked: {:?}", e);
            }
        }
    }
}

/// Repeating timer: posts every `interval` until cancelled or dropped.
///
/// Used for the fallback animation tick while no window is exposed.
pub struct Interval {
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Interval {
    pub fn start(name: &str, interval: Duration, sender: ControlSender, msg: ControlMessage) -> Result<Self> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                thread::sleep(interval);
                if flag.load(Ordering::Acquire) {
                    break;
                }
                sender.post(msg.clone());
            })
            .with_context(|| format!("Failed to spawn timer thread '{}'", name))?;

        Ok(Self {
            cancelled,
            handle: Some(handle),
        })
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Drop for Interval {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                error!("Timer thread panicked: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EventLoopWaker;
    use std::sync::mpsc;

    struct NoopWaker;
    impl EventLoopWaker for NoopWaker {
        fn wake(&self) -> Result<()> {
            Ok(())
        }
    }

    fn sender() -> (ControlSender, mpsc::Receiver<ControlMessage>) {
        let (tx, rx) = mpsc::channel();
        (ControlSender::new(tx, Arc::new(NoopWaker)), rx)
    }

    #[test]
    fn single_shot_fires_once() {
        let (sender, rx) = sender();
        let _t = SingleShot::start(
            "test-single-shot",
            Duration::from_millis(1),
            sender,
            ControlMessage::UpdateTimerFired { generation: 7 },
        )
        .unwrap();

        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            ControlMessage::UpdateTimerFired { generation } => assert_eq!(generation, 7),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
    }

    #[test]
    fn cancelled_single_shot_stays_silent() {
        let (sender, rx) = sender();
        let t = SingleShot::start(
            "test-cancelled",
            Duration::from_millis(50),
            sender,
            ControlMessage::UpdateTimerFired { generation: 1 },
        )
        .unwrap();
        t.cancel();
        drop(t);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn interval_keeps_ticking_until_dropped() {
        let (sender, rx) = sender();
        let t = Interval::start(
            "test-interval",
            Duration::from_millis(2),
            sender,
            ControlMessage::AnimationTimerTick { generation: 3 },
        )
        .unwrap();

        for _ in 0..3 {
            match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
                ControlMessage::AnimationTimerTick { generation } => assert_eq!(generation, 3),
                other => panic!("unexpected message: {:?}", other),
            }
        }
        drop(t);
        // Drain whatever raced the drop, then expect silence.
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
    }
}
