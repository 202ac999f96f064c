//! Notification manager configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::Deserialize;

use crate::error::ConfigError;
use crate::scheduler::ThreadSchedulerConfig;

/// Configuration for a [`NotificationManager`](crate::manager::NotificationManager).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationManagerConfig {
    /// Used only when the manager starts its own scheduler.
    pub scheduler: ThreadSchedulerConfig,
}

impl NotificationManagerConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` for malformed JSON or mistyped fields,
    /// `ConfigError::Invalid` when a value is out of range.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    ///
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()
    }
}
