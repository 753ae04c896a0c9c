//! Runtime configuration
//!
//! Everything has a default; a config file only needs the fields it
//! wants to change.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

/// Bounds applied by `Guard`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Hard limit for a guarded operation
    pub timeout_ms: u64,

    /// Successful calls slower than this get a diagnostic note
    pub slow_threshold_ms: u64,
}

impl GuardConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            slow_threshold_ms: 5_000,
        }
    }
}

/// Content session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub session_id: String,

    /// Emit diagnostic notes. Off in normal operation.
    pub debug: bool,

    pub guard: GuardConfig,
}

impl ContentConfig {
    /// Parse a JSON config, filling unspecified fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            session_id: Uuid::now_v7().to_string(),
            debug: false,
            guard: GuardConfig::default(),
        }
    }
}
