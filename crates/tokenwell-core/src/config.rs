//! Centralized configuration for tokenwell.
//!
//! Constants are grouped per concern; [`InjectorSettings`] is the runtime,
//! file-loadable subset a host may want to tune.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InjectorError, Result};

/// Bounded-wait ("require") configuration.
pub struct RequireConfig;

impl RequireConfig {
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5);
    /// Waits shorter than this would never poll past the first frame.
    pub const MIN_MAX_WAIT: Duration = Duration::from_secs(1);

    /// Clamp a requested maximum wait to the supported minimum.
    pub fn clamp_max_wait(max_wait: Duration) -> Duration {
        max_wait.max(Self::MIN_MAX_WAIT)
    }
}

/// Tick source configuration.
pub struct TickConfig;

impl TickConfig {
    /// Roughly one frame at 60 Hz.
    pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);
    pub const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);
}

/// Runtime settings for an [`Injector`](crate::Injector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InjectorSettings {
    /// Default maximum wait for `require` calls, in milliseconds.
    pub default_require_wait_ms: u64,
}

impl Default for InjectorSettings {
    fn default() -> Self {
        Self {
            default_require_wait_ms: RequireConfig::DEFAULT_MAX_WAIT.as_millis() as u64,
        }
    }
}

impl InjectorSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| InjectorError::Config {
            message: format!("Failed to read settings file {}: {}", path.display(), e),
            source: None,
        })?;
        Self::from_json(&contents)
    }

    /// Default require wait, clamped to [`RequireConfig::MIN_MAX_WAIT`].
    pub fn default_require_wait(&self) -> Duration {
        RequireConfig::clamp_max_wait(Duration::from_millis(self.default_require_wait_ms))
    }
}
