//! Write-attribute names, values and sets.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AttributeError;
use crate::path::LwM2mPath;

/// Notification-class write-attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeName {
    /// `pmin`: minimum seconds between two notifications.
    #[serde(rename = "pmin")]
    MinimumPeriod,
    /// `pmax`: maximum seconds without a notification.
    #[serde(rename = "pmax")]
    MaximumPeriod,
    /// `gt`: notify when the value crosses this threshold.
    #[serde(rename = "gt")]
    GreaterThan,
    /// `lt`: notify when the value crosses this threshold.
    #[serde(rename = "lt")]
    LessThan,
    /// `st`: notify when the value moved by at least this step.
    #[serde(rename = "st")]
    Step,
    /// `epmin`: minimum evaluation period.
    #[serde(rename = "epmin")]
    EvaluateMinimumPeriod,
    /// `epmax`: maximum evaluation period.
    #[serde(rename = "epmax")]
    EvaluateMaximumPeriod,
}

impl AttributeName {
    /// All notification attributes, in canonical order.
    pub const ALL: [Self; 7] = [
        Self::MinimumPeriod,
        Self::MaximumPeriod,
        Self::GreaterThan,
        Self::LessThan,
        Self::Step,
        Self::EvaluateMinimumPeriod,
        Self::EvaluateMaximumPeriod,
    ];

    /// Wire name, as used in a write-attributes query.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MinimumPeriod => "pmin",
            Self::MaximumPeriod => "pmax",
            Self::GreaterThan => "gt",
            Self::LessThan => "lt",
            Self::Step => "st",
            Self::EvaluateMinimumPeriod => "epmin",
            Self::EvaluateMaximumPeriod => "epmax",
        }
    }

    /// Period attributes carry whole seconds.
    #[must_use]
    pub const fn is_period(self) -> bool {
        matches!(
            self,
            Self::MinimumPeriod
                | Self::MaximumPeriod
                | Self::EvaluateMinimumPeriod
                | Self::EvaluateMaximumPeriod
        )
    }

    /// Value-based attributes only make sense on numeric resources.
    #[must_use]
    pub const fn is_value_based(self) -> bool {
        matches!(self, Self::GreaterThan | Self::LessThan | Self::Step)
    }

    /// Returns true if this attribute may be attached to `path`.
    #[must_use]
    pub const fn is_applicable_to(self, path: &LwM2mPath) -> bool {
        if path.is_root() {
            return false;
        }
        if self.is_value_based() {
            return path.is_resource() || path.is_resource_instance();
        }
        true
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeName {
    type Err = AttributeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| AttributeError::InvalidValue {
                name: s.to_string(),
                value: String::new(),
            })
    }
}

/// Value of a write-attribute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Seconds, for `pmin`, `pmax`, `epmin`, `epmax`.
    Period(u64),
    /// Decimal threshold, for `gt`, `lt`, `st`.
    Threshold(f64),
}

impl AttributeValue {
    /// Seconds of a period value, `None` for a threshold.
    #[must_use]
    pub const fn as_seconds(self) -> Option<u64> {
        match self {
            Self::Period(s) => Some(s),
            Self::Threshold(_) => None,
        }
    }

    /// Numeric view of either kind.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Period(s) => s as f64,
            Self::Threshold(v) => v,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Period(s) => write!(f, "{s}"),
            Self::Threshold(v) => write!(f, "{v}"),
        }
    }
}

/// A set of notification write-attributes attached to one path.
///
/// Values are checked on insertion (kind and range); the cross-attribute
/// consistency rules are checked by [`AttributeSet::validate`].
///
/// # Examples
///
/// ```
/// use lwm2m_notify::{AttributeName, AttributeSet};
///
/// let set: AttributeSet = "pmin=5&pmax=60&gt=50".parse().unwrap();
/// assert_eq!(set.period(AttributeName::MinimumPeriod), Some(5));
/// assert!(set.has_value_criteria());
/// assert!(set.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    values: BTreeMap<AttributeName, AttributeValue>,
}

impl AttributeSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an attribute, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `AttributeError::InvalidValue` when the value kind does not
    /// match the attribute or the value is out of range.
    pub fn insert(&mut self, name: AttributeName, value: AttributeValue) -> Result<(), AttributeError> {
        let value = check_value(name, value)?;
        self.values.insert(name, value);
        Ok(())
    }

    /// Removes an attribute, returning its value.
    pub fn remove(&mut self, name: AttributeName) -> Option<AttributeValue> {
        self.values.remove(&name)
    }

    /// Builder-style `pmin`.
    #[must_use]
    pub fn with_pmin(mut self, seconds: u64) -> Self {
        self.values.insert(AttributeName::MinimumPeriod, AttributeValue::Period(seconds));
        self
    }

    /// Builder-style `pmax`.
    #[must_use]
    pub fn with_pmax(mut self, seconds: u64) -> Self {
        self.values.insert(AttributeName::MaximumPeriod, AttributeValue::Period(seconds));
        self
    }

    /// Builder-style `gt`.
    ///
    /// # Errors
    ///
    /// Fails when `value` is not finite.
    pub fn with_gt(self, value: f64) -> Result<Self, AttributeError> {
        self.with_threshold(AttributeName::GreaterThan, value)
    }

    /// Builder-style `lt`.
    ///
    /// # Errors
    ///
    /// Fails when `value` is not finite.
    pub fn with_lt(self, value: f64) -> Result<Self, AttributeError> {
        self.with_threshold(AttributeName::LessThan, value)
    }

    /// Builder-style `st`.
    ///
    /// # Errors
    ///
    /// Fails when `value` is negative or not finite.
    pub fn with_st(self, value: f64) -> Result<Self, AttributeError> {
        self.with_threshold(AttributeName::Step, value)
    }

    fn with_threshold(mut self, name: AttributeName, value: f64) -> Result<Self, AttributeError> {
        self.insert(name, AttributeValue::Threshold(value))?;
        Ok(self)
    }

    /// Value of `name`, if set.
    #[must_use]
    pub fn get(&self, name: AttributeName) -> Option<AttributeValue> {
        self.values.get(&name).copied()
    }

    /// Whether `name` is set.
    #[must_use]
    pub fn contains(&self, name: AttributeName) -> bool {
        self.values.contains_key(&name)
    }

    /// Seconds of a period attribute.
    #[must_use]
    pub fn period(&self, name: AttributeName) -> Option<u64> {
        self.get(name).and_then(AttributeValue::as_seconds)
    }

    /// Numeric value of a threshold attribute.
    #[must_use]
    pub fn threshold(&self, name: AttributeName) -> Option<f64> {
        match self.get(name) {
            Some(AttributeValue::Threshold(v)) => Some(v),
            _ => None,
        }
    }

    /// True if `gt`, `lt` or `st` is set.
    #[must_use]
    pub fn has_value_criteria(&self) -> bool {
        self.values.keys().any(|name| name.is_value_based())
    }

    /// Whether no attribute is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of attributes set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (AttributeName, AttributeValue)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    /// Returns a new set where attributes of `other` override ours.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (*k, *v)));
        Self { values }
    }

    /// Keeps only the attributes accepted by `keep`.
    #[must_use]
    pub fn filter(&self, mut keep: impl FnMut(AttributeName) -> bool) -> Self {
        Self {
            values: self
                .values
                .iter()
                .filter(|(k, _)| keep(**k))
                .map(|(k, v)| (*k, *v))
                .collect(),
        }
    }

    /// Checks cross-attribute consistency.
    ///
    /// # Errors
    ///
    /// Returns `AttributeError::InvalidAttributes` naming the violated rule:
    /// `pmax > 0`, `pmin <= pmax`, `epmin <= epmax`, `lt < gt`,
    /// `lt + 2*st < gt`.
    pub fn validate(&self) -> Result<(), AttributeError> {
        use AttributeName::{
            EvaluateMaximumPeriod, EvaluateMinimumPeriod, GreaterThan, LessThan, MaximumPeriod,
            MinimumPeriod, Step,
        };

        // A zero pmax would re-arm its timer on every send.
        if self.period(MaximumPeriod) == Some(0) {
            return Err(AttributeError::invalid("attributes don't fulfill 'pmax' > 0"));
        }

        if let (Some(pmin), Some(pmax)) = (self.period(MinimumPeriod), self.period(MaximumPeriod)) {
            if pmin > pmax {
                return Err(AttributeError::invalid(format!(
                    "attributes don't fulfill 'pmin' <= 'pmax' ({pmin} > {pmax})"
                )));
            }
        }

        if let (Some(epmin), Some(epmax)) = (
            self.period(EvaluateMinimumPeriod),
            self.period(EvaluateMaximumPeriod),
        ) {
            if epmin > epmax {
                return Err(AttributeError::invalid(format!(
                    "attributes don't fulfill 'epmin' <= 'epmax' ({epmin} > {epmax})"
                )));
            }
        }

        if let (Some(lt), Some(gt)) = (self.threshold(LessThan), self.threshold(GreaterThan)) {
            if lt >= gt {
                return Err(AttributeError::invalid(format!(
                    "attributes don't fulfill 'lt' < 'gt' ({lt} >= {gt})"
                )));
            }
            if let Some(st) = self.threshold(Step) {
                if lt + 2.0 * st >= gt {
                    return Err(AttributeError::invalid(
                        "attributes don't fulfill 'lt' + 2*'st' < 'gt'",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Checks that every attribute may be attached to `path`, then validates.
    ///
    /// # Errors
    ///
    /// `AttributeError::NotApplicable` for a misplaced attribute, otherwise
    /// whatever [`AttributeSet::validate`] reports.
    pub fn validate_for(&self, path: &LwM2mPath) -> Result<(), AttributeError> {
        if let Some(name) = self.values.keys().find(|name| !name.is_applicable_to(path)) {
            return Err(AttributeError::NotApplicable {
                name: name.to_string(),
                path: path.to_string(),
            });
        }
        self.validate()
    }
}

fn check_value(name: AttributeName, value: AttributeValue) -> Result<AttributeValue, AttributeError> {
    let bad = || AttributeError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    };

    if name.is_period() {
        return match value {
            AttributeValue::Period(_) => Ok(value),
            AttributeValue::Threshold(_) => Err(bad()),
        };
    }

    // Thresholds accept integral input too.
    let v = value.as_f64();
    if !v.is_finite() || (name == AttributeName::Step && v < 0.0) {
        return Err(bad());
    }
    Ok(AttributeValue::Threshold(v))
}

impl FromStr for AttributeSet {
    type Err = AttributeError;

    /// Parses a write-attributes query such as `pmin=10&pmax=60&st=0.5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = Self::new();
        for pair in s.split('&').map(str::trim).filter(|p| !p.is_empty()) {
            let (raw_name, raw_value) = pair.split_once('=').ok_or_else(|| AttributeError::InvalidValue {
                name: pair.to_string(),
                value: String::new(),
            })?;
            let name: AttributeName = raw_name.trim().parse()?;
            let raw_value = raw_value.trim();
            let invalid = || AttributeError::InvalidValue {
                name: name.to_string(),
                value: raw_value.to_string(),
            };
            let value = if name.is_period() {
                AttributeValue::Period(raw_value.parse().map_err(|_| invalid())?)
            } else {
                AttributeValue::Threshold(raw_value.parse().map_err(|_| invalid())?)
            };
            set.insert(name, value)?;
        }
        Ok(set)
    }
}

impl fmt::Display for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                f.write_str("&")?;
            }
            first = false;
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_and_display_back() {
        let set: AttributeSet = "pmin=5&pmax=60&gt=50&st=0.5".parse().unwrap();
        assert_eq!(set.period(AttributeName::MinimumPeriod), Some(5));
        assert_eq!(set.period(AttributeName::MaximumPeriod), Some(60));
        assert_eq!(set.threshold(AttributeName::GreaterThan), Some(50.0));
        assert_eq!(set.threshold(AttributeName::Step), Some(0.5));
        assert_eq!(set.to_string(), "pmin=5&pmax=60&gt=50&st=0.5");
    }

    #[test]
    fn parse_rejects_unknown_and_malformed() {
        assert!("foo=1".parse::<AttributeSet>().is_err());
        assert!("pmin".parse::<AttributeSet>().is_err());
        assert!("pmin=1.5".parse::<AttributeSet>().is_err());
        assert!("pmin=-1".parse::<AttributeSet>().is_err());
        assert!("st=-1".parse::<AttributeSet>().is_err());
        assert!("gt=abc".parse::<AttributeSet>().is_err());
    }

    #[test]
    fn insert_checks_value_kind() {
        let mut set = AttributeSet::new();
        assert!(set
            .insert(AttributeName::MinimumPeriod, AttributeValue::Threshold(1.0))
            .is_err());
        assert!(set.insert(AttributeName::GreaterThan, AttributeValue::Period(3)).is_ok());
        assert_eq!(set.get(AttributeName::GreaterThan), Some(AttributeValue::Threshold(3.0)));
        assert!(set
            .insert(AttributeName::LessThan, AttributeValue::Threshold(f64::NAN))
            .is_err());
    }

    #[test]
    fn validate_period_ordering() {
        assert!(AttributeSet::new().with_pmin(5).with_pmax(5).validate().is_ok());
        let err = AttributeSet::new().with_pmin(10).with_pmax(5).validate().unwrap_err();
        assert!(matches!(err, AttributeError::InvalidAttributes { .. }));
        assert!("epmin=10&epmax=2".parse::<AttributeSet>().unwrap().validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_pmax() {
        let err = AttributeSet::new().with_pmax(0).validate().unwrap_err();
        assert!(matches!(err, AttributeError::InvalidAttributes { .. }));
        assert!(AttributeSet::new().with_pmin(0).validate().is_ok());
        assert!(AttributeSet::new().with_pmin(0).with_pmax(1).validate().is_ok());
    }

    #[test]
    fn validate_thresholds() {
        assert!("lt=10&gt=20".parse::<AttributeSet>().unwrap().validate().is_ok());
        assert!("lt=20&gt=20".parse::<AttributeSet>().unwrap().validate().is_err());
        assert!("lt=10&gt=20&st=4".parse::<AttributeSet>().unwrap().validate().is_ok());
        assert!("lt=10&gt=20&st=5".parse::<AttributeSet>().unwrap().validate().is_err());
    }

    #[test]
    fn validate_for_rejects_value_criteria_above_resource_level() {
        let set = AttributeSet::new().with_gt(1.0).unwrap();
        assert!(set.validate_for(&LwM2mPath::resource(3, 0, 1)).is_ok());
        let err = set.validate_for(&LwM2mPath::object_instance(3, 0)).unwrap_err();
        assert!(matches!(err, AttributeError::NotApplicable { .. }));

        let periods = AttributeSet::new().with_pmin(1);
        assert!(periods.validate_for(&LwM2mPath::object(3)).is_ok());
        assert!(periods.validate_for(&LwM2mPath::ROOT).is_err());
    }

    #[test]
    fn merge_overrides_with_other() {
        let object = AttributeSet::new().with_pmin(10).with_pmax(100);
        let resource = AttributeSet::new().with_pmin(1).with_gt(5.0).unwrap();
        let merged = object.merge(&resource);
        assert_eq!(merged.period(AttributeName::MinimumPeriod), Some(1));
        assert_eq!(merged.period(AttributeName::MaximumPeriod), Some(100));
        assert!(merged.has_value_criteria());
    }

    #[test]
    fn filter_keeps_selected() {
        let set: AttributeSet = "pmin=1&gt=2&lt=0".parse().unwrap();
        let periods = set.filter(AttributeName::is_period);
        assert_eq!(periods.len(), 1);
        assert!(!periods.has_value_criteria());
    }
}
