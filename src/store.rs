//! Per-relation notification state.
//!
//! The store is the single owner of every scheduled pmin/pmax handle. Each
//! mutation that drops a [`NotificationData`] cancels the tasks it held, so
//! no timer ever outlives the state it was armed for.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::attributes::NotificationAttributeTree;
use crate::path::LwM2mPath;
use crate::scheduler::ScheduledTask;
use crate::value::Value;

/// Identity of an Observe relation: (server id, observed path).
///
/// Ordered by server first, so one server's relations form a contiguous
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationKey {
    /// Id of the observing server.
    pub server_id: u64,
    /// Observed node.
    pub path: LwM2mPath,
}

impl RelationKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(server_id: u64, path: LwM2mPath) -> Self {
        Self { server_id, path }
    }
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server#{}:{}", self.server_id, self.path)
    }
}

/// Snapshot of one relation's notification state.
///
/// Never mutated in place: the manager builds a new snapshot and hands it to
/// the store, which cancels whatever the old one held.
#[derive(Debug, Clone)]
pub struct NotificationData {
    attributes: Arc<NotificationAttributeTree>,
    last_sending_time: Option<Instant>,
    last_sent_value: Option<Value>,
    pmin_task: Option<ScheduledTask>,
    pmax_task: Option<ScheduledTask>,
}

impl NotificationData {
    /// Builds a snapshot.
    ///
    /// `last_sending_time` is expected iff pmin is configured,
    /// `last_sent_value` iff value criteria are, `pmax_task` iff pmax is.
    #[must_use]
    pub fn new(
        attributes: Arc<NotificationAttributeTree>,
        last_sending_time: Option<Instant>,
        last_sent_value: Option<Value>,
        pmax_task: Option<ScheduledTask>,
    ) -> Self {
        Self {
            attributes,
            last_sending_time,
            last_sent_value,
            pmin_task: None,
            pmax_task,
        }
    }

    /// Same state with a pending pmin deferral.
    ///
    /// The pmax handle is copied along, so storing the result cancels it: the
    /// deferred send re-arms pmax once it runs.
    #[must_use]
    pub fn with_pmin_task(&self, task: ScheduledTask) -> Self {
        Self {
            pmin_task: Some(task),
            ..self.clone()
        }
    }

    /// Effective attributes of the relation.
    #[must_use]
    pub fn attributes(&self) -> &Arc<NotificationAttributeTree> {
        &self.attributes
    }

    /// Instant of the last send, kept only when pmin applies.
    #[must_use]
    pub const fn last_sending_time(&self) -> Option<Instant> {
        self.last_sending_time
    }

    /// Value of the last send, kept only when value criteria apply.
    #[must_use]
    pub const fn last_sent_value(&self) -> Option<&Value> {
        self.last_sent_value.as_ref()
    }

    /// Pending pmin deferral.
    #[must_use]
    pub const fn pmin_task(&self) -> Option<&ScheduledTask> {
        self.pmin_task.as_ref()
    }

    /// Armed pmax timer.
    #[must_use]
    pub const fn pmax_task(&self) -> Option<&ScheduledTask> {
        self.pmax_task.as_ref()
    }

    /// True iff a minimum period applies.
    #[must_use]
    pub const fn use_pmin(&self) -> bool {
        self.last_sending_time.is_some()
    }

    /// True iff a maximum period applies.
    #[must_use]
    pub const fn use_pmax(&self) -> bool {
        self.pmax_task.is_some()
    }

    /// True iff value-based criteria apply.
    #[must_use]
    pub const fn has_criteria_based_on_value(&self) -> bool {
        self.last_sent_value.is_some()
    }

    /// True while a deferred send is scheduled.
    #[must_use]
    pub const fn pmin_task_scheduled(&self) -> bool {
        self.pmin_task.is_some()
    }

    fn tasks(&self) -> impl Iterator<Item = &ScheduledTask> {
        self.pmin_task.iter().chain(self.pmax_task.iter())
    }

    fn cancel_tasks(&self) {
        for task in self.tasks() {
            task.cancel();
        }
    }
}

/// Ordered map from relation key to notification state.
///
/// Every operation runs in one critical section. Nothing spans calls.
#[derive(Debug, Default)]
pub struct NotificationDataStore {
    entries: Mutex<BTreeMap<RelationKey, NotificationData>>,
}

impl NotificationDataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the entry for `key`.
    #[must_use]
    pub fn get(&self, key: &RelationKey) -> Option<NotificationData> {
        self.entries.lock().get(key).cloned()
    }

    /// Inserts `data`, cancelling the tasks of the entry it replaces.
    pub fn add(&self, key: RelationKey, data: NotificationData) -> Option<NotificationData> {
        let previous = self.entries.lock().insert(key, data);
        if let Some(prev) = &previous {
            prev.cancel_tasks();
        }
        previous
    }

    /// Replaces the entry for `key` only if one exists.
    ///
    /// The replaced entry's tasks are cancelled. When `key` is absent the
    /// relation was dropped concurrently: `data` is not stored and its own
    /// tasks are cancelled instead.
    pub fn update(&self, key: RelationKey, data: NotificationData) -> Option<NotificationData> {
        let mut entries = self.entries.lock();
        match entries.get_mut(&key) {
            Some(slot) => {
                let previous = std::mem::replace(slot, data);
                drop(entries);
                previous.cancel_tasks();
                Some(previous)
            }
            None => {
                drop(entries);
                data.cancel_tasks();
                None
            }
        }
    }

    /// Removes the entry for `key` and cancels its tasks.
    pub fn remove(&self, key: &RelationKey) -> Option<NotificationData> {
        let removed = self.entries.lock().remove(key);
        if let Some(data) = &removed {
            data.cancel_tasks();
        }
        removed
    }

    /// Removes every entry at or below `parent`, for every server.
    ///
    /// Returns the number of entries removed.
    pub fn clear_under(&self, parent: &LwM2mPath) -> usize {
        let removed: Vec<NotificationData> = {
            let mut entries = self.entries.lock();
            let keys: Vec<RelationKey> = entries
                .keys()
                .filter(|k| k.path.starts_with(parent))
                .copied()
                .collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };
        for data in &removed {
            data.cancel_tasks();
        }
        removed.len()
    }

    /// Removes every entry of one server.
    ///
    /// Returns the number of entries removed.
    pub fn clear_for_server(&self, server_id: u64) -> usize {
        let removed = {
            let mut entries = self.entries.lock();
            let mut tail = entries.split_off(&RelationKey::new(server_id, LwM2mPath::ROOT));
            // `tail` starts at this server; give back whatever follows it.
            if let Some(next) = server_id.checked_add(1) {
                let mut rest = tail.split_off(&RelationKey::new(next, LwM2mPath::ROOT));
                entries.append(&mut rest);
            }
            tail
        };
        for data in removed.values() {
            data.cancel_tasks();
        }
        removed.len()
    }

    /// Removes every entry.
    pub fn clear_all(&self) -> usize {
        let removed = std::mem::take(&mut *self.entries.lock());
        for data in removed.values() {
            data.cancel_tasks();
        }
        removed.len()
    }

    /// Whether `key` has an entry.
    #[must_use]
    pub fn contains(&self, key: &RelationKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Whether no relation is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of tracked relations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Keys currently tracked, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<RelationKey> {
        self.entries.lock().keys().copied().collect()
    }
}
