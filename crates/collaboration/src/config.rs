/// Engine configuration
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{CollaborationError, Result};

/// Top-level engine settings, loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub history: HistoryConfig,
    pub cursor: CursorThrottleConfig,
    pub presence: PresenceConfig,

    /// Hex colours peers are assigned from, by hash of their id
    pub palette: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            cursor: CursorThrottleConfig::default(),
            presence: PresenceConfig::default(),
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
        }
    }
}

pub const DEFAULT_PALETTE: [&str; 12] = [
    "#E57373", "#F06292", "#BA68C8", "#9575CD", "#7986CB", "#64B5F6", "#4DD0E1", "#4DB6AC",
    "#81C784", "#DCE775", "#FFB74D", "#A1887F",
];

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| CollaborationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            CollaborationError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history.max_depth == 0 {
            return Err(CollaborationError::Config(
                "history.max_depth must be at least 1".to_string(),
            ));
        }
        if self.palette.is_empty() {
            return Err(CollaborationError::Config(
                "palette must contain at least one colour".to_string(),
            ));
        }
        if self.cursor.min_distance_px < 0.0 {
            return Err(CollaborationError::Config(
                "cursor.min_distance_px must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Undoable checkpoints kept per branch; the oldest is evicted first
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_depth: 20 }
    }
}

/// Sender-side cursor throttle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CursorThrottleConfig {
    pub min_interval_ms: u64,
    pub min_distance_px: f64,
}

impl CursorThrottleConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for CursorThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 50,
            min_distance_px: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceConfig {
    pub idle_after_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            idle_after_secs: 60,
        }
    }
}
