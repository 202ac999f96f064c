//! Resource values carried by Observe responses.
//!
//! Values mirror the LWM2M resource data types. The notification engine only
//! ever looks inside them to evaluate value-based write-attributes, so the
//! numeric view (`as_f64`) is what matters most here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content of a resource read.
///
/// # Examples
///
/// ```
/// use lwm2m_notify::Value;
///
/// let temp = Value::Float(21.5);
/// assert_eq!(temp.as_f64(), Some(21.5));
/// assert!(Value::Integer(3).is_numeric());
/// assert!(!Value::String("on".into()).is_numeric());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Signed integer resource.
    Integer(i64),
    /// Unsigned integer resource.
    UnsignedInteger(u64),
    /// Float resource.
    Float(f64),
    /// Boolean resource.
    Boolean(bool),
    /// UTF-8 string resource.
    String(String),
    /// Raw bytes.
    Opaque(Vec<u8>),
    /// Time resource.
    Time(DateTime<Utc>),
    /// Reference to an object instance.
    ObjectLink {
        /// Linked object id.
        object_id: u16,
        /// Linked instance id.
        object_instance_id: u16,
    },
    /// Multi-instance resource: resource-instance id to value.
    Multiple(BTreeMap<u16, Value>),
}

impl Value {
    /// Signed or unsigned integer.
    #[must_use]
    pub const fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::UnsignedInteger(_))
    }

    /// Float value.
    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    /// Integer and float values take part in threshold comparisons.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::UnsignedInteger(_) | Self::Float(_))
    }

    /// Multi-instance resource.
    #[must_use]
    pub const fn is_multiple(&self) -> bool {
        matches!(self, Self::Multiple(_))
    }

    /// Boolean content, if any.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Signed integer content, if any.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view used by threshold checks. Integers are widened to `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::UnsignedInteger(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String content, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Time content, if any.
    #[must_use]
    pub const fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(v) => Some(*v),
            _ => None,
        }
    }

    /// Resource instances of a multi-instance resource.
    #[must_use]
    pub const fn as_multiple(&self) -> Option<&BTreeMap<u16, Value>> {
        match self {
            Self::Multiple(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::UnsignedInteger(_) => "unsigned_integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::String(_) => "string",
            Self::Opaque(_) => "opaque",
            Self::Time(_) => "time",
            Self::ObjectLink { .. } => "object_link",
            Self::Multiple(_) => "multiple",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::UnsignedInteger(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Opaque(v) => write!(f, "opaque[{}]", v.len()),
            Self::Time(v) => write!(f, "{}", v.to_rfc3339()),
            Self::ObjectLink {
                object_id,
                object_instance_id,
            } => write!(f, "{object_id}:{object_instance_id}"),
            Self::Multiple(v) => write!(f, "multiple[{}]", v.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UnsignedInteger(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_view() {
        assert_eq!(Value::Integer(-4).as_f64(), Some(-4.0));
        assert_eq!(Value::UnsignedInteger(7).as_f64(), Some(7.0));
        assert_eq!(Value::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Boolean(true).as_f64(), None);
        assert_eq!(Value::String("1".into()).as_f64(), None);
    }

    #[test]
    fn test_type_predicates() {
        assert!(Value::Integer(1).is_integer());
        assert!(Value::UnsignedInteger(1).is_integer());
        assert!(Value::Float(1.0).is_float());
        assert!(Value::Multiple(BTreeMap::new()).is_multiple());
        assert_eq!(Value::Opaque(vec![1, 2]).type_name(), "opaque");
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Integer(42).to_string(), "42");
        assert_eq!(Value::String("hi".into()).to_string(), "\"hi\"");
        assert_eq!(Value::Opaque(vec![0; 3]).to_string(), "opaque[3]");
        assert_eq!(
            Value::ObjectLink {
                object_id: 3,
                object_instance_id: 0
            }
            .to_string(),
            "3:0"
        );
    }

    #[test]
    fn test_multiple_holds_instances() {
        let mut instances = BTreeMap::new();
        instances.insert(0, Value::Integer(1));
        instances.insert(1, Value::Integer(2));
        let v = Value::Multiple(instances);
        assert_eq!(v.as_multiple().map(BTreeMap::len), Some(2));
        assert_eq!(v.as_f64(), None);
    }

    #[test]
    fn test_serialization_is_tagged() {
        let val = Value::Float(2.5);
        let json = serde_json::to_value(&val).unwrap();
        assert_eq!(json["type"], "float");
        let back: Value = serde_json::from_value(json).unwrap();
        assert_eq!(back, val);
    }
}
