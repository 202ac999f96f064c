//! # lwm2m-notify - Write-attribute driven Observe notifications
//!
//! An LWM2M client tells its servers about resource changes through Observe
//! notifications. Servers shape that traffic with write-attributes:
//! minimum and maximum periods (`pmin`, `pmax`) and value thresholds
//! (`gt`, `lt`, `st`). This crate is the engine that applies them: for every
//! observed node it decides whether a change is worth a notification and
//! when that notification may go out.
//!
//! ## Core Concepts
//!
//! - **Relation**: one (server, observed path) pair with attributes
//! - **NotificationData**: the per-relation state (last send time, last sent
//!   value, pending pmin deferral, armed pmax timer)
//! - **NotificationStrategy**: attribute selection and threshold policy
//! - **TaskScheduler**: delayed tasks and the engine's clock
//!
//! The engine reads resources, delivers notifications and learns about
//! attributes only through the traits in [`ports`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lwm2m_notify::{
//!     InMemoryAttributeSource, LwM2mPath, LwM2mServer, NotificationManager, NotificationSender,
//!     ObserveRequest, ObserveResponse, Value,
//! };
//!
//! let source = Arc::new(InMemoryAttributeSource::new());
//! source.add_object(3303);
//!
//! let server = LwM2mServer::new(1, "coaps://dm.example.com");
//! let path = LwM2mPath::resource(3303, 0, 5700);
//! source.write_attributes(&server, path, "pmin=10&pmax=60&gt=25".parse()?)?;
//!
//! let reader = Arc::new(|_: &LwM2mServer, _: &ObserveRequest| {
//!     ObserveResponse::success(Value::Float(21.5))
//! });
//! let manager = NotificationManager::new(source, reader)?;
//!
//! let (sender, stream) = lwm2m_notify::ports::channel(64);
//! let sender: Arc<dyn NotificationSender> = Arc::new(sender);
//! let request = ObserveRequest::new(path);
//! manager.init_relation(&server, &request, &Value::Float(21.5), &sender)?;
//!
//! // Called by the object layer whenever the observed value changes.
//! manager.notification_triggered(&server, &request, &sender);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Vocabulary
pub mod error;
pub mod path;
pub mod relation;
pub mod value;

// Attributes and policy
pub mod attributes;
pub mod strategy;

// Engine
pub mod config;
pub mod manager;
pub mod ports;
pub mod scheduler;
pub mod store;

// Re-export primary types at crate root for convenience
pub use attributes::{AttributeName, AttributeSet, AttributeValue, NotificationAttributeTree};
pub use config::NotificationManagerConfig;
pub use error::{
    AttributeError, ConfigError, NotifyError, NotifyResult, PathError, SchedulerError, StreamError,
};
pub use manager::{ManagerStats, NotificationManager, NotificationManagerBuilder};
pub use path::LwM2mPath;
pub use ports::{
    AttributeSource, ChannelSender, InMemoryAttributeSource, NotificationSender, NotificationStream,
    ObjectListener, ResourceReader,
};
pub use relation::{LwM2mServer, ObserveRequest, ObserveResponse, ResponseCode};
pub use scheduler::{
    ManualScheduler, ScheduledTask, SchedulerOwnership, TaskId, TaskScheduler, ThreadScheduler,
    ThreadSchedulerConfig,
};
pub use store::{NotificationData, NotificationDataStore, RelationKey};
pub use strategy::{DefaultNotificationStrategy, NotificationStrategy};
pub use value::Value;
