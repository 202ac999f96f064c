//! Collaborator interfaces consumed by the notification engine.
//!
//! The engine never reads resources, encodes payloads or touches the network
//! itself. It talks to the rest of the client through these traits:
//!
//! - [`ResourceReader`]: produces the current response for an observed node;
//! - [`NotificationSender`]: delivers a notification to the server;
//! - [`AttributeSource`]: exposes written attributes and object lifecycle.
//!
//! Reference implementations live here too: [`InMemoryAttributeSource`] and
//! the channel-backed [`ChannelSender`] / [`NotificationStream`] pair.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::{Mutex, RwLock};

use crate::attributes::{AttributeSet, NotificationAttributeTree};
use crate::error::{NotifyResult, PathError, StreamError};
use crate::path::LwM2mPath;
use crate::relation::{LwM2mServer, ObserveRequest, ObserveResponse};

/// Reads the current state of an observed node.
pub trait ResourceReader: Send + Sync {
    /// Builds the response a notification would carry right now.
    ///
    /// Must be a fast local read: the engine calls it under its lock.
    fn read(&self, server: &LwM2mServer, request: &ObserveRequest) -> ObserveResponse;
}

impl<F> ResourceReader for F
where
    F: Fn(&LwM2mServer, &ObserveRequest) -> ObserveResponse + Send + Sync,
{
    fn read(&self, server: &LwM2mServer, request: &ObserveRequest) -> ObserveResponse {
        self(server, request)
    }
}

/// Delivers notifications for one Observe relation.
pub trait NotificationSender: Send + Sync {
    /// Sends `response` to the observing server.
    ///
    /// Returns false when the relation no longer exists downstream (the
    /// server cancelled it or the session is gone).
    fn send_notification(&self, response: ObserveResponse) -> bool;
}

impl<F> NotificationSender for F
where
    F: Fn(ObserveResponse) -> bool + Send + Sync,
{
    fn send_notification(&self, response: ObserveResponse) -> bool {
        self(response)
    }
}

/// Object lifecycle events.
pub trait ObjectListener: Send + Sync {
    /// An object was registered. Ignored by default.
    fn object_added(&self, _object_id: u16) {}

    /// An object was unregistered along with every instance under it.
    fn object_removed(&self, object_id: u16);
}

/// Written attributes and object lifecycle, as seen by the engine.
pub trait AttributeSource: Send + Sync {
    /// Attributes `server` wrote on object `object_id`.
    ///
    /// `None` when the object is not registered; an empty tree when it is but
    /// nothing was written.
    fn attributes_for(&self, server: &LwM2mServer, object_id: u16) -> Option<NotificationAttributeTree>;

    /// Registers a listener for object additions and removals.
    fn add_listener(&self, listener: Arc<dyn ObjectListener>);
}

/// Thread-safe in-memory attribute source.
///
/// Keeps one attribute tree per (object, server). Removing an object drops
/// its attributes and notifies listeners outside the internal lock, so a
/// listener may call back into the source.
#[derive(Default)]
pub struct InMemoryAttributeSource {
    objects: RwLock<BTreeMap<u16, BTreeMap<u64, NotificationAttributeTree>>>,
    listeners: Mutex<Vec<Arc<dyn ObjectListener>>>,
}

impl std::fmt::Debug for InMemoryAttributeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAttributeSource")
            .field("objects", &self.objects.read().keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl InMemoryAttributeSource {
    /// Creates a source with no object registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an object. Returns false if it was already present.
    pub fn add_object(&self, object_id: u16) -> bool {
        let added = {
            let mut objects = self.objects.write();
            if objects.contains_key(&object_id) {
                false
            } else {
                objects.insert(object_id, BTreeMap::new());
                true
            }
        };
        if added {
            for listener in self.listeners_snapshot() {
                listener.object_added(object_id);
            }
        }
        added
    }

    /// Unregisters an object and drops every attribute written on it.
    ///
    /// Returns false if the object was not registered.
    pub fn remove_object(&self, object_id: u16) -> bool {
        let removed = self.objects.write().remove(&object_id).is_some();
        if removed {
            log::debug!("[attributes] object {object_id} removed");
            for listener in self.listeners_snapshot() {
                listener.object_removed(object_id);
            }
        }
        removed
    }

    /// Whether `object_id` is registered.
    #[must_use]
    pub fn has_object(&self, object_id: u16) -> bool {
        self.objects.read().contains_key(&object_id)
    }

    /// Writes attributes on `path` for `server`, replacing what was there.
    ///
    /// An empty set clears the attributes of `path`.
    ///
    /// # Errors
    ///
    /// `PathError::Invalid` for the root path or an unregistered object;
    /// `AttributeError` when the set is misplaced or inconsistent.
    pub fn write_attributes(
        &self,
        server: &LwM2mServer,
        path: LwM2mPath,
        set: AttributeSet,
    ) -> NotifyResult<()> {
        let Some(object_id) = path.object_id() else {
            return Err(PathError::Invalid {
                input: path.to_string(),
                reason: "attributes cannot be written on the root path".to_string(),
            }
            .into());
        };
        set.validate_for(&path)?;

        let mut objects = self.objects.write();
        let Some(per_server) = objects.get_mut(&object_id) else {
            return Err(PathError::Invalid {
                input: path.to_string(),
                reason: format!("object {object_id} is not registered"),
            }
            .into());
        };
        log::debug!("[attributes] {server} wrote {path}?{set}");
        per_server.entry(server.id).or_default().insert(path, set);
        Ok(())
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn ObjectListener>> {
        self.listeners.lock().clone()
    }
}

impl AttributeSource for InMemoryAttributeSource {
    fn attributes_for(&self, server: &LwM2mServer, object_id: u16) -> Option<NotificationAttributeTree> {
        let objects = self.objects.read();
        let per_server = objects.get(&object_id)?;
        Some(per_server.get(&server.id).cloned().unwrap_or_default())
    }

    fn add_listener(&self, listener: Arc<dyn ObjectListener>) {
        self.listeners.lock().push(listener);
    }
}

/// Creates a bounded delivery channel.
///
/// A full channel drops the notification but keeps the relation alive;
/// dropping the [`NotificationStream`] makes the sender report the relation
/// gone.
#[must_use]
pub fn channel(capacity: usize) -> (ChannelSender, NotificationStream) {
    let (tx, rx) = bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ChannelSender {
            tx,
            dropped: Arc::clone(&dropped),
        },
        NotificationStream { rx, dropped },
    )
}

/// Sending half of [`channel`].
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: Sender<ObserveResponse>,
    dropped: Arc<AtomicU64>,
}

impl NotificationSender for ChannelSender {
    fn send_notification(&self, response: ObserveResponse) -> bool {
        match self.tx.try_send(response) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("[delivery] channel full, notification dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Receiving half of [`channel`].
#[derive(Debug)]
pub struct NotificationStream {
    rx: Receiver<ObserveResponse>,
    dropped: Arc<AtomicU64>,
}

impl NotificationStream {
    /// Receive the next notification (blocking).
    ///
    /// # Errors
    ///
    /// `StreamError::Disconnected` once every sender is gone.
    pub fn recv(&self) -> Result<ObserveResponse, StreamError> {
        self.rx.recv().map_err(|_| StreamError::Disconnected)
    }

    /// Receive the next notification with a timeout.
    ///
    /// # Errors
    ///
    /// `StreamError::Timeout` or `StreamError::Disconnected`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ObserveResponse, StreamError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => StreamError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            },
            RecvTimeoutError::Disconnected => StreamError::Disconnected,
        })
    }

    /// Next notification if one is already queued.
    pub fn try_recv(&self) -> Option<ObserveResponse> {
        match self.rx.try_recv() {
            Ok(response) => Some(response),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Every notification currently queued.
    pub fn drain(&self) -> Vec<ObserveResponse> {
        self.rx.try_iter().collect()
    }

    /// Notifications dropped because the channel was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
