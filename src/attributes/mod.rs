//! Notification write-attributes.
//!
//! Servers attach attributes (`pmin`, `pmax`, `gt`, `lt`, `st`, `epmin`,
//! `epmax`) to nodes of the object tree. The notification engine consumes
//! them through a [`NotificationAttributeTree`] per (server, object).

/// Attribute names, values and sets.
pub mod set;
/// Attribute trees with inheritance.
pub mod tree;

pub use set::{AttributeName, AttributeSet, AttributeValue};
pub use tree::NotificationAttributeTree;
