//! Notification strategy: which attributes apply and when a value change counts.
//!
//! The strategy is pure policy. It holds no state and is consulted by the
//! [`NotificationManager`](crate::manager::NotificationManager) on every
//! decision, so implementations must be cheap.

use crate::attributes::{AttributeName, AttributeValue, NotificationAttributeTree};
use crate::error::AttributeError;
use crate::path::LwM2mPath;
use crate::value::Value;

/// Attribute filtering and trigger-predicate policy.
pub trait NotificationStrategy: Send + Sync {
    /// Reduces the attributes written on an object to the ones governing
    /// notifications for `path`.
    ///
    /// An empty result means a classic observe (no attribute handling).
    ///
    /// # Errors
    ///
    /// Returns `AttributeError::InvalidAttributes` when the effective
    /// combination is inconsistent; the Observe request must then fail.
    fn select_notification_attributes(
        &self,
        path: &LwM2mPath,
        tree: &NotificationAttributeTree,
    ) -> Result<NotificationAttributeTree, AttributeError>;

    /// Whether `name` applies to `path`.
    fn has_attribute(&self, tree: &NotificationAttributeTree, path: &LwM2mPath, name: AttributeName) -> bool {
        self.attribute_value(tree, path, name).is_some()
    }

    /// Value of `name` for `path`.
    fn attribute_value(
        &self,
        tree: &NotificationAttributeTree,
        path: &LwM2mPath,
        name: AttributeName,
    ) -> Option<AttributeValue>;

    /// Whether any value-based criterion (`gt`, `lt`, `st`) applies to `path`.
    fn has_criteria_based_on_value(&self, tree: &NotificationAttributeTree, path: &LwM2mPath) -> bool;

    /// Whether moving from `old` to `new` satisfies the value criteria.
    fn should_trigger_notification_based_on_value_change(
        &self,
        tree: &NotificationAttributeTree,
        path: &LwM2mPath,
        old: Option<&Value>,
        new: &Value,
    ) -> bool;
}

/// Strategy implementing LWM2M 1.2 attribute semantics.
///
/// - attributes are inherited object -> instance -> resource -> resource
///   instance, deeper levels overriding;
/// - `gt` / `lt` fire when the value crosses the threshold in either
///   direction;
/// - `st` fires when the value moved by at least the step since the last
///   notification;
/// - non-numeric values fire on any change.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultNotificationStrategy;

impl DefaultNotificationStrategy {
    /// Creates the default strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn crossed(threshold: f64, old: f64, new: f64) -> bool {
    (old <= threshold && new > threshold) || (old > threshold && new <= threshold)
}

impl NotificationStrategy for DefaultNotificationStrategy {
    fn select_notification_attributes(
        &self,
        path: &LwM2mPath,
        tree: &NotificationAttributeTree,
    ) -> Result<NotificationAttributeTree, AttributeError> {
        let effective = tree.resolve(path).filter(|name| name.is_applicable_to(path));
        if effective.is_empty() {
            return Ok(NotificationAttributeTree::new());
        }
        effective.validate()?;
        Ok(NotificationAttributeTree::single(*path, effective))
    }

    fn attribute_value(
        &self,
        tree: &NotificationAttributeTree,
        path: &LwM2mPath,
        name: AttributeName,
    ) -> Option<AttributeValue> {
        tree.value(path, name)
    }

    fn has_criteria_based_on_value(&self, tree: &NotificationAttributeTree, path: &LwM2mPath) -> bool {
        [AttributeName::GreaterThan, AttributeName::LessThan, AttributeName::Step]
            .into_iter()
            .any(|name| tree.value(path, name).is_some())
    }

    fn should_trigger_notification_based_on_value_change(
        &self,
        tree: &NotificationAttributeTree,
        path: &LwM2mPath,
        old: Option<&Value>,
        new: &Value,
    ) -> bool {
        let (Some(old_num), Some(new_num)) = (old.and_then(Value::as_f64), new.as_f64()) else {
            return old != Some(new);
        };

        let threshold = |name| tree.value(path, name).map(AttributeValue::as_f64);
        let gt = threshold(AttributeName::GreaterThan);
        let lt = threshold(AttributeName::LessThan);
        let st = threshold(AttributeName::Step);

        if gt.is_none() && lt.is_none() && st.is_none() {
            return true;
        }

        gt.is_some_and(|t| crossed(t, old_num, new_num))
            || lt.is_some_and(|t| crossed(t, old_num, new_num))
            || st.is_some_and(|s| (new_num - old_num).abs() >= s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeSet;

    fn resource() -> LwM2mPath {
        LwM2mPath::resource(3303, 0, 5700)
    }

    fn tree_with(query: &str) -> NotificationAttributeTree {
        NotificationAttributeTree::single(resource(), query.parse::<AttributeSet>().unwrap())
    }

    #[test]
    fn select_merges_levels_and_validates() {
        let mut tree = NotificationAttributeTree::new();
        tree.insert(LwM2mPath::object(3303), AttributeSet::new().with_pmax(60));
        tree.insert(resource(), "pmin=5&gt=50".parse().unwrap());

        let selected = DefaultNotificationStrategy
            .select_notification_attributes(&resource(), &tree)
            .unwrap();
        let set = selected.get(&resource()).unwrap();
        assert_eq!(set.period(AttributeName::MaximumPeriod), Some(60));
        assert_eq!(set.period(AttributeName::MinimumPeriod), Some(5));
        assert_eq!(set.threshold(AttributeName::GreaterThan), Some(50.0));
    }

    #[test]
    fn select_drops_value_criteria_for_instance_observe() {
        let mut tree = NotificationAttributeTree::new();
        tree.insert(resource(), "gt=50".parse().unwrap());
        let selected = DefaultNotificationStrategy
            .select_notification_attributes(&LwM2mPath::object_instance(3303, 0), &tree)
            .unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn select_rejects_inconsistent_merge() {
        let mut tree = NotificationAttributeTree::new();
        tree.insert(LwM2mPath::object(3303), AttributeSet::new().with_pmax(5));
        tree.insert(resource(), AttributeSet::new().with_pmin(10));
        let err = DefaultNotificationStrategy
            .select_notification_attributes(&resource(), &tree)
            .unwrap_err();
        assert!(matches!(err, AttributeError::InvalidAttributes { .. }));
    }

    #[test]
    fn gt_fires_only_on_crossing() {
        let s = DefaultNotificationStrategy;
        let tree = tree_with("gt=50");
        let old = Value::Float(40.0);
        assert!(!s.should_trigger_notification_based_on_value_change(&tree, &resource(), Some(&old), &Value::Float(45.0)));
        assert!(s.should_trigger_notification_based_on_value_change(&tree, &resource(), Some(&old), &Value::Float(60.0)));
        let above = Value::Float(60.0);
        assert!(!s.should_trigger_notification_based_on_value_change(&tree, &resource(), Some(&above), &Value::Float(70.0)));
        assert!(s.should_trigger_notification_based_on_value_change(&tree, &resource(), Some(&above), &Value::Float(50.0)));
    }

    #[test]
    fn lt_fires_only_on_crossing() {
        let s = DefaultNotificationStrategy;
        let tree = tree_with("lt=10");
        let old = Value::Integer(15);
        assert!(!s.should_trigger_notification_based_on_value_change(&tree, &resource(), Some(&old), &Value::Integer(11)));
        assert!(s.should_trigger_notification_based_on_value_change(&tree, &resource(), Some(&old), &Value::Integer(9)));
    }

    #[test]
    fn st_fires_on_step_in_either_direction() {
        let s = DefaultNotificationStrategy;
        let tree = tree_with("st=2");
        let old = Value::Float(10.0);
        assert!(!s.should_trigger_notification_based_on_value_change(&tree, &resource(), Some(&old), &Value::Float(11.5)));
        assert!(s.should_trigger_notification_based_on_value_change(&tree, &resource(), Some(&old), &Value::Float(12.0)));
        assert!(s.should_trigger_notification_based_on_value_change(&tree, &resource(), Some(&old), &Value::Float(7.9)));
    }

    #[test]
    fn non_numeric_fires_on_change() {
        let s = DefaultNotificationStrategy;
        let tree = tree_with("st=1");
        let old = Value::String("on".into());
        assert!(!s.should_trigger_notification_based_on_value_change(&tree, &resource(), Some(&old), &Value::String("on".into())));
        assert!(s.should_trigger_notification_based_on_value_change(&tree, &resource(), Some(&old), &Value::String("off".into())));
        assert!(s.should_trigger_notification_based_on_value_change(&tree, &resource(), None, &Value::Float(1.0)));
    }

    #[test]
    fn criteria_detection() {
        let s = DefaultNotificationStrategy;
        assert!(s.has_criteria_based_on_value(&tree_with("lt=1"), &resource()));
        assert!(!s.has_criteria_based_on_value(&tree_with("pmin=1"), &resource()));
        assert!(s.has_attribute(&tree_with("pmin=1"), &resource(), AttributeName::MinimumPeriod));
        assert!(!s.has_attribute(&tree_with("pmin=1"), &resource(), AttributeName::MaximumPeriod));
    }
}
