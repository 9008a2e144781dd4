// src/config.rs

//! Defines configuration structures and provides global access to the loaded
//! configuration.
//!
//! The render loop's configuration is read once from the environment and made
//! available globally via a lazily initialized static variable `CONFIG`.

use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Milliseconds the update coalescing timer waits while animations run.
const EXHAUST_DELAY_ENV: &str = "QML_EXHAUST_DELAY";
/// Presence enables polish/wait/sync/render/swap timing diagnostics.
const WINDOW_TIMING_ENV: &str = "QML_WINDOW_TIMING";

/// Lazily initialized global static storage for the render loop configuration.
pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let cfg = load_config_from_env();
    info!(
        "Configuration loaded: exhaust_delay={:?}, window_timing={}",
        cfg.scheduling.exhaust_delay, cfg.diagnostics.window_timing
    );
    cfg
});

/// Reads the environment overrides on top of the built-in defaults.
///
/// A malformed value is logged and ignored rather than treated as fatal; the
/// loop must come up with defaults no matter what the environment contains.
fn load_config_from_env() -> Config {
    let mut cfg = Config::default();

    if let Ok(raw) = std::env::var(EXHAUST_DELAY_ENV) {
        match raw.trim().parse::<u64>() {
            Ok(ms) => cfg.scheduling.exhaust_delay = Duration::from_millis(ms),
            Err(e) => warn!(
                "Ignoring {}={:?}: not an integer millisecond count ({})",
                EXHAUST_DELAY_ENV, raw, e
            ),
        }
    }

    if std::env::var_os(WINDOW_TIMING_ENV).is_some_and(|v| !v.is_empty()) {
        cfg.diagnostics.window_timing = true;
    }

    cfg
}

/// Represents the complete configuration of the render loop.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub scheduling: SchedulingConfig,
    pub diagnostics: DiagnosticsConfig,
}

/// Defines settings related to frame scheduling on the UI agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Interval the update coalescing timer waits while animations are
    /// running. Many update requests arriving inside this window produce a
    /// single polish-and-sync.
    pub exhaust_delay: Duration,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        SchedulingConfig {
            exhaust_delay: Duration::from_millis(5),
        }
    }
}

/// Defines settings related to diagnostics output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Emit timing for polish/wait/sync on the UI agent and
    /// since-last/sync/render/swap on the render agent.
    pub window_timing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.scheduling.exhaust_delay, Duration::from_millis(5));
        assert!(!cfg.diagnostics.window_timing);
    }
}
