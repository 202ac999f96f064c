//! Error types for lwm2m-notify.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! precise condition. Most runtime conditions inside the notification engine
//! never surface as errors: they fail open (send) or fail silent (purge). The
//! variants here are the ones that do reach a caller.

use thiserror::Error;

/// Errors raised while building or validating write-attributes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributeError {
    #[error("Invalid attributes: {reason}")]
    InvalidAttributes {
        reason: String,
    },

    #[error("Attribute '{name}' is not applicable to path {path}")]
    NotApplicable {
        name: String,
        path: String,
    },

    #[error("Invalid value '{value}' for attribute '{name}'")]
    InvalidValue {
        name: String,
        value: String,
    },
}

impl AttributeError {
    /// Creates an invalid-combination error.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidAttributes {
            reason: reason.into(),
        }
    }
}

/// Errors raised while parsing an LWM2M path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Invalid LWM2M path '{input}': {reason}")]
    Invalid {
        input: String,
        reason: String,
    },
}

/// Errors raised by a task scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("Scheduler is shut down")]
    Shutdown,

    #[error("Scheduler queue is full (capacity: {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Scheduler worker disconnected")]
    Disconnected,
}

/// Errors raised when reading a notification stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Timed out after {duration_ms}ms waiting for a notification")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Notification stream disconnected")]
    Disconnected,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {message}")]
    Parse {
        message: String,
    },

    #[error("Invalid configuration field '{field}': {reason}")]
    Invalid {
        field: String,
        reason: String,
    },
}

/// Top-level error type for lwm2m-notify.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Attribute error: {0}")]
    Attributes(#[from] AttributeError),

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

impl NotifyError {
    /// Returns true if this is an attribute error.
    #[must_use]
    pub const fn is_attributes(&self) -> bool {
        matches!(self, Self::Attributes(_))
    }

    /// Returns true if this is a path error.
    #[must_use]
    pub const fn is_path(&self) -> bool {
        matches!(self, Self::Path(_))
    }

    /// Returns true if this is a scheduler error.
    #[must_use]
    pub const fn is_scheduler(&self) -> bool {
        matches!(self, Self::Scheduler(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this is a stream error.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

/// Result type alias for lwm2m-notify operations.
pub type NotifyResult<T> = Result<T, NotifyError>;
