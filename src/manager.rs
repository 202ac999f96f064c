//! Notification manager: decides whether and when each Observe notification
//! goes out.
//!
//! Every trigger for an observed node ends up in
//! [`NotificationManager::notification_triggered`]. Relations observed without
//! attributes are forwarded as-is. Relations with attributes go through:
//!
//! 1. `pmin == pmax`: only the periodic pmax timer may send;
//! 2. value criteria (`gt`, `lt`, `st`): suppress unless the strategy says
//!    the change matters (a failed read is sent anyway);
//! 3. `pmin`: a trigger inside the minimum period is deferred to its end,
//!    and further triggers coalesce into that single deferral;
//! 4. otherwise send now.
//!
//! After each successful send the relation state is rebuilt and the pmax
//! timer re-armed. A failed response or a relation gone downstream drops the
//! state instead.
//!
//! All entry points and every scheduled callback serialize on one re-entrant
//! lock per manager. Callbacks hold only a weak reference to the manager.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::ReentrantMutex;
use serde::Serialize;

use crate::attributes::{AttributeName, AttributeValue, NotificationAttributeTree};
use crate::config::NotificationManagerConfig;
use crate::error::{NotifyResult, SchedulerError};
use crate::path::LwM2mPath;
use crate::ports::{AttributeSource, NotificationSender, ObjectListener, ResourceReader};
use crate::relation::{LwM2mServer, ObserveRequest, ObserveResponse};
use crate::scheduler::{ScheduledTask, SchedulerOwnership, TaskScheduler, ThreadScheduler};
use crate::store::{NotificationData, NotificationDataStore, RelationKey};
use crate::strategy::{DefaultNotificationStrategy, NotificationStrategy};
use crate::value::Value;

/// Counters describing what the manager decided so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Notifications handed to a sender.
    pub sent: u64,
    /// Triggers dropped by `pmin == pmax`, value criteria or coalescing.
    pub suppressed: u64,
    /// Triggers deferred to the end of the minimum period.
    pub deferred: u64,
    /// Relations dropped after a failed response, a gone relation or a
    /// scheduler failure.
    pub purged: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    suppressed: AtomicU64,
    deferred: AtomicU64,
    purged: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ManagerStats {
        ManagerStats {
            sent: self.sent.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
        }
    }
}

/// What a scheduled send needs, captured when it is scheduled.
#[derive(Clone)]
struct RelationContext {
    server: LwM2mServer,
    request: ObserveRequest,
    attributes: Arc<NotificationAttributeTree>,
    sender: Arc<dyn NotificationSender>,
}

impl RelationContext {
    fn key(&self) -> RelationKey {
        RelationKey::new(self.server.id, self.request.path)
    }

    fn path(&self) -> &LwM2mPath {
        &self.request.path
    }
}

struct Inner {
    lock: ReentrantMutex<()>,
    store: NotificationDataStore,
    strategy: Arc<dyn NotificationStrategy>,
    reader: Arc<dyn ResourceReader>,
    attributes: Arc<dyn AttributeSource>,
    scheduler: Arc<dyn TaskScheduler>,
    ownership: SchedulerOwnership,
    destroyed: AtomicBool,
    counters: Counters,
}

impl Inner {
    fn period(&self, tree: &NotificationAttributeTree, path: &LwM2mPath, name: AttributeName) -> Option<u64> {
        self.strategy
            .attribute_value(tree, path, name)
            .and_then(AttributeValue::as_seconds)
    }

    fn init_relation(
        self: &Arc<Self>,
        server: &LwM2mServer,
        request: &ObserveRequest,
        current_value: &Value,
        sender: &Arc<dyn NotificationSender>,
    ) -> NotifyResult<()> {
        let _guard = self.lock.lock();

        let path = request.path;
        let Some(object_id) = path.object_id() else {
            return Ok(());
        };
        let Some(written) = self.attributes.attributes_for(server, object_id) else {
            return Ok(());
        };
        if written.is_empty() {
            return Ok(());
        }
        let selected = self.strategy.select_notification_attributes(&path, &written)?;
        if selected.is_empty() {
            return Ok(());
        }

        log::debug!("[notify] tracking {request} for {server}");
        let ctx = RelationContext {
            server: server.clone(),
            request: request.clone(),
            attributes: Arc::new(selected),
            sender: Arc::clone(sender),
        };
        self.refresh_relation(true, &ctx, Some(current_value.clone()));
        Ok(())
    }

    fn notification_triggered(
        self: &Arc<Self>,
        server: &LwM2mServer,
        request: &ObserveRequest,
        sender: &Arc<dyn NotificationSender>,
    ) {
        let _guard = self.lock.lock();
        log::trace!("[notify] trigger {request} for {server}");

        let key = RelationKey::new(server.id, request.path);
        let Some(data) = self.store.get(&key) else {
            let response = self.reader.read(server, request);
            sender.send_notification(response);
            Counters::bump(&self.counters.sent);
            return;
        };

        let path = &request.path;
        let tree = Arc::clone(data.attributes());

        if data.use_pmax() {
            let pmax = self.period(&tree, path, AttributeName::MaximumPeriod);
            let pmin = self.period(&tree, path, AttributeName::MinimumPeriod);
            if pmax.is_some() && pmax == pmin {
                log::trace!("[notify] {key}: pmin == pmax, left to the pmax timer");
                Counters::bump(&self.counters.suppressed);
                return;
            }
        }

        let mut candidate: Option<ObserveResponse> = None;
        if data.has_criteria_based_on_value() {
            let response = self.reader.read(server, request);
            if response.is_success() {
                if let Some(new_value) = response.content() {
                    let trigger = self.strategy.should_trigger_notification_based_on_value_change(
                        &tree,
                        path,
                        data.last_sent_value(),
                        new_value,
                    );
                    if !trigger {
                        log::trace!("[notify] {key}: value criteria not met");
                        Counters::bump(&self.counters.suppressed);
                        return;
                    }
                }
            }
            candidate = Some(response);
        }

        let ctx = RelationContext {
            server: server.clone(),
            request: request.clone(),
            attributes: tree,
            sender: Arc::clone(sender),
        };

        if let Some(last_sending_time) = data.last_sending_time() {
            if data.pmin_task_scheduled() {
                log::trace!("[notify] {key}: deferral already pending");
                Counters::bump(&self.counters.suppressed);
                return;
            }

            let pmin = self
                .period(&ctx.attributes, path, AttributeName::MinimumPeriod)
                .unwrap_or(0);
            let elapsed = self
                .scheduler
                .now()
                .saturating_duration_since(last_sending_time)
                .as_secs();
            if elapsed < pmin {
                let delay = Duration::from_secs(pmin - elapsed);
                match self.schedule_send(&ctx, delay) {
                    Ok(task) => {
                        log::debug!("[notify] {key}: deferred by {}s", delay.as_secs());
                        self.store.update(key, data.with_pmin_task(task));
                        Counters::bump(&self.counters.deferred);
                        return;
                    }
                    Err(err) => {
                        log::warn!("[notify] {key}: cannot defer ({err}), sending now");
                    }
                }
            }
        }

        self.send_notification(&ctx, candidate);
    }

    /// True while the stored state for `key` is the one `ctx` was built from.
    ///
    /// A re-observe installs a fresh attribute tree and every refresh reuses
    /// the tree it was given, so the tree pointer identifies the relation.
    fn is_current(&self, key: &RelationKey, ctx: &RelationContext) -> bool {
        self.store
            .get(key)
            .is_some_and(|data| Arc::ptr_eq(data.attributes(), &ctx.attributes))
    }

    fn send_notification(self: &Arc<Self>, ctx: &RelationContext, response: Option<ObserveResponse>) {
        let _guard = self.lock.lock();

        let key = ctx.key();
        if !self.is_current(&key, ctx) {
            log::trace!("[notify] {key}: stale callback, relation replaced or dropped");
            return;
        }

        let response = response.unwrap_or_else(|| self.reader.read(&ctx.server, &ctx.request));
        let failed = response.is_failure();
        let content = response.content.clone();

        let delivered = ctx.sender.send_notification(response);
        Counters::bump(&self.counters.sent);

        // The sender may have re-observed or cancelled the relation.
        if !self.is_current(&key, ctx) {
            log::debug!("[notify] {key}: relation replaced during send, keeping the new state");
            return;
        }

        if !delivered {
            log::debug!("[notify] {key}: relation gone downstream, dropping state");
            self.purge(&key);
        } else if failed {
            log::debug!("[notify] {key}: failure response sent, dropping state");
            self.purge(&key);
        } else {
            self.refresh_relation(false, ctx, content);
        }
    }

    /// Builds fresh state after a send (or at creation) and stores it.
    fn refresh_relation(self: &Arc<Self>, new_relation: bool, ctx: &RelationContext, value: Option<Value>) {
        let path = ctx.path();
        let tree = &ctx.attributes;
        let key = ctx.key();

        let last_sending_time = self
            .strategy
            .has_attribute(tree, path, AttributeName::MinimumPeriod)
            .then(|| self.scheduler.now());
        let last_sent_value = if self.strategy.has_criteria_based_on_value(tree, path) {
            // Nothing to compare against in an empty response: keep the last value.
            value.or_else(|| {
                self.store
                    .get(&key)
                    .and_then(|data| data.last_sent_value().cloned())
            })
        } else {
            None
        };

        let pmax_task = match self.period(tree, path, AttributeName::MaximumPeriod) {
            Some(pmax) => match self.schedule_send(ctx, Duration::from_secs(pmax)) {
                Ok(task) => Some(task),
                Err(err) => {
                    log::warn!("[notify] {key}: cannot arm pmax ({err}), falling back to plain observe");
                    self.purge(&key);
                    return;
                }
            },
            None => None,
        };

        let data = NotificationData::new(Arc::clone(tree), last_sending_time, last_sent_value, pmax_task);
        if new_relation {
            self.store.add(key, data);
        } else {
            self.store.update(key, data);
        }
    }

    fn schedule_send(
        self: &Arc<Self>,
        ctx: &RelationContext,
        delay: Duration,
    ) -> Result<ScheduledTask, SchedulerError> {
        let weak = Arc::downgrade(self);
        let ctx = ctx.clone();
        self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.send_notification(&ctx, None);
                }
            }),
        )
    }

    fn purge(&self, key: &RelationKey) {
        if self.store.remove(key).is_some() {
            Counters::bump(&self.counters.purged);
        }
    }
}

/// Purges relations under removed objects.
struct ObjectRemovalListener {
    inner: Weak<Inner>,
}

impl ObjectListener for ObjectRemovalListener {
    fn object_removed(&self, object_id: u16) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let _guard = inner.lock.lock();
        let purged = inner.store.clear_under(&LwM2mPath::object(object_id));
        if purged > 0 {
            log::debug!("[notify] object {object_id} removed, dropped {purged} relation(s)");
        }
    }
}

/// Builder for [`NotificationManager`].
pub struct NotificationManagerBuilder {
    attributes: Arc<dyn AttributeSource>,
    reader: Arc<dyn ResourceReader>,
    strategy: Option<Arc<dyn NotificationStrategy>>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
    config: NotificationManagerConfig,
}

impl NotificationManagerBuilder {
    /// Replaces the [`DefaultNotificationStrategy`].
    #[must_use]
    pub fn strategy(mut self, strategy: Arc<dyn NotificationStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Uses a caller-managed scheduler instead of starting one.
    ///
    /// The manager never shuts an injected scheduler down.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Sets the configuration used when the manager starts its own scheduler.
    #[must_use]
    pub fn config(mut self, config: NotificationManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the manager and subscribes it to object removals.
    ///
    /// # Errors
    ///
    /// `NotifyError::Config` for an invalid config, `NotifyError::Scheduler`
    /// if the owned scheduler thread cannot start.
    pub fn build(self) -> NotifyResult<NotificationManager> {
        self.config.validate()?;

        let (scheduler, ownership): (Arc<dyn TaskScheduler>, _) = match self.scheduler {
            Some(scheduler) => (scheduler, SchedulerOwnership::Shared),
            None => {
                let owned: Arc<dyn TaskScheduler> =
                    Arc::new(ThreadScheduler::start(&self.config.scheduler)?);
                (owned, SchedulerOwnership::Owned)
            }
        };

        let inner = Arc::new(Inner {
            lock: ReentrantMutex::new(()),
            store: NotificationDataStore::new(),
            strategy: self
                .strategy
                .unwrap_or_else(|| Arc::new(DefaultNotificationStrategy::new())),
            reader: self.reader,
            attributes: Arc::clone(&self.attributes),
            scheduler,
            ownership,
            destroyed: AtomicBool::new(false),
            counters: Counters::default(),
        });

        self.attributes.add_listener(Arc::new(ObjectRemovalListener {
            inner: Arc::downgrade(&inner),
        }));
        log::debug!("[notify] manager created ({ownership:?} scheduler)");

        Ok(NotificationManager { inner })
    }
}

/// Attribute-driven Observe notification scheduler.
///
/// Dropping the manager calls [`NotificationManager::destroy`].
pub struct NotificationManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationManager")
            .field("relations", &self.inner.store.len())
            .field("ownership", &self.inner.ownership)
            .field("stats", &self.inner.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl NotificationManager {
    /// Starts a builder over the two mandatory collaborators.
    #[must_use]
    pub fn builder(
        attributes: Arc<dyn AttributeSource>,
        reader: Arc<dyn ResourceReader>,
    ) -> NotificationManagerBuilder {
        NotificationManagerBuilder {
            attributes,
            reader,
            strategy: None,
            scheduler: None,
            config: NotificationManagerConfig::default(),
        }
    }

    /// Manager with the default strategy and its own scheduler thread.
    ///
    /// # Errors
    ///
    /// See [`NotificationManagerBuilder::build`].
    pub fn new(attributes: Arc<dyn AttributeSource>, reader: Arc<dyn ResourceReader>) -> NotifyResult<Self> {
        Self::builder(attributes, reader).build()
    }

    /// Sets up attribute handling for a freshly accepted Observe relation.
    ///
    /// `current_value` is the value carried by the Observe response that was
    /// just sent. Without applicable attributes (unknown object, nothing
    /// written, root path) the relation stays a classic observe.
    ///
    /// # Errors
    ///
    /// `NotifyError::Attributes` when the effective attributes are
    /// inconsistent; the Observe request must then be rejected.
    pub fn init_relation(
        &self,
        server: &LwM2mServer,
        request: &ObserveRequest,
        current_value: &Value,
        sender: &Arc<dyn NotificationSender>,
    ) -> NotifyResult<()> {
        self.inner.init_relation(server, request, current_value, sender)
    }

    /// Handles a change on an observed node.
    pub fn notification_triggered(
        &self,
        server: &LwM2mServer,
        request: &ObserveRequest,
        sender: &Arc<dyn NotificationSender>,
    ) {
        self.inner.notification_triggered(server, request, sender);
    }

    /// Forgets the state of one relation.
    pub fn clear_relation(&self, server: &LwM2mServer, request: &ObserveRequest) {
        let _guard = self.inner.lock.lock();
        self.inner
            .store
            .remove(&RelationKey::new(server.id, request.path));
    }

    /// Forgets every relation of `server`.
    pub fn clear_server(&self, server: &LwM2mServer) {
        let _guard = self.inner.lock.lock();
        let cleared = self.inner.store.clear_for_server(server.id);
        log::debug!("[notify] cleared {cleared} relation(s) of {server}");
    }

    /// Forgets every relation.
    pub fn clear(&self) {
        let _guard = self.inner.lock.lock();
        self.inner.store.clear_all();
    }

    /// Whether attribute state is held for this relation.
    #[must_use]
    pub fn is_tracked(&self, server: &LwM2mServer, request: &ObserveRequest) -> bool {
        self.inner
            .store
            .contains(&RelationKey::new(server.id, request.path))
    }

    /// Snapshot of the state held for this relation.
    #[must_use]
    pub fn relation(&self, server: &LwM2mServer, request: &ObserveRequest) -> Option<NotificationData> {
        self.inner
            .store
            .get(&RelationKey::new(server.id, request.path))
    }

    /// Number of relations with attribute state.
    #[must_use]
    pub fn relation_count(&self) -> usize {
        self.inner.store.len()
    }

    /// Counters of the decisions taken so far.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        self.inner.counters.snapshot()
    }

    /// Whether `destroy` shuts the scheduler down.
    #[must_use]
    pub fn scheduler_ownership(&self) -> SchedulerOwnership {
        self.inner.ownership
    }

    /// Drops all relation state and shuts down the scheduler if the manager
    /// started it. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _guard = self.inner.lock.lock();
            self.inner.store.clear_all();
        }
        // Outside the lock: shutdown joins the worker, which may be waiting on it.
        if self.inner.ownership == SchedulerOwnership::Owned {
            self.inner.scheduler.shutdown();
        }
        log::debug!("[notify] manager destroyed");
    }
}

impl Drop for NotificationManager {
    fn drop(&mut self) {
        self.destroy();
    }
}
