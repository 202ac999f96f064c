//! Per-object attribute trees.

use std::collections::BTreeMap;

use crate::path::LwM2mPath;

use super::set::{AttributeName, AttributeSet, AttributeValue};

/// Attributes written by one server on the nodes of one object.
///
/// Keys are the paths the attributes were written to (object, instance,
/// resource or resource instance level). Lookups for a path resolve the
/// inherited set: deeper levels override shallower ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationAttributeTree {
    sets: BTreeMap<LwM2mPath, AttributeSet>,
}

impl NotificationAttributeTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree holding a single set.
    #[must_use]
    pub fn single(path: LwM2mPath, set: AttributeSet) -> Self {
        let mut tree = Self::new();
        tree.insert(path, set);
        tree
    }

    /// Sets the attributes of `path`. An empty set removes the entry.
    pub fn insert(&mut self, path: LwM2mPath, set: AttributeSet) -> Option<AttributeSet> {
        if set.is_empty() {
            return self.sets.remove(&path);
        }
        self.sets.insert(path, set)
    }

    /// Removes the set attached to `path`.
    pub fn remove(&mut self, path: &LwM2mPath) -> Option<AttributeSet> {
        self.sets.remove(path)
    }

    /// Attributes written exactly at `path`.
    #[must_use]
    pub fn get(&self, path: &LwM2mPath) -> Option<&AttributeSet> {
        self.sets.get(path)
    }

    /// Attributes applying to `path`, inherited down from the object level.
    #[must_use]
    pub fn resolve(&self, path: &LwM2mPath) -> AttributeSet {
        path.lineage()
            .iter()
            .filter_map(|p| self.sets.get(p))
            .fold(AttributeSet::new(), |acc, set| acc.merge(set))
    }

    /// Value of `name` for `path`, with inheritance.
    #[must_use]
    pub fn value(&self, path: &LwM2mPath, name: AttributeName) -> Option<AttributeValue> {
        path.lineage()
            .iter()
            .rev()
            .find_map(|p| self.sets.get(p).and_then(|set| set.get(name)))
    }

    /// Drops every set attached to `path` or below it.
    pub fn remove_under(&mut self, path: &LwM2mPath) {
        self.sets.retain(|p, _| !p.starts_with(path));
    }

    /// Whether no path carries attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Number of paths carrying attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Attached sets in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&LwM2mPath, &AttributeSet)> {
        self.sets.iter()
    }
}
