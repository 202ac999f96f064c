//! Delayed-task scheduling.
//!
//! The notification engine arms one-shot tasks for pmin deferrals and pmax
//! periods. Tasks are handed to a [`TaskScheduler`], which also acts as the
//! engine's monotonic clock so that virtual-time schedulers can drive the
//! whole engine deterministically.
//!
//! Cancellation is best-effort: [`ScheduledTask::cancel`] prevents a run that
//! has not started yet and never interrupts one in progress.

/// Virtual-time scheduler for tests and simulation.
pub mod manual;
/// Single background worker thread scheduler.
pub mod thread;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulerError;

pub use manual::ManualScheduler;
pub use thread::{ThreadScheduler, ThreadSchedulerConfig};

/// Work item run by a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Unique identifier for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new random task id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

/// Handle on a task submitted to a [`TaskScheduler`].
///
/// Clones share the same underlying state; equality is by task id.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    id: TaskId,
    state: Arc<AtomicU8>,
}

impl ScheduledTask {
    /// Creates a pending handle. Scheduler implementations call this.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: TaskId::new(),
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// Id of this task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Cancels the task if it has not started.
    ///
    /// Returns true if this call prevented the run.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// True once the task was cancelled before it started.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// True once the task body has returned (or panicked).
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// True while the task is neither started nor cancelled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    /// Claims the task for execution. Returns false if it was cancelled.
    ///
    /// Scheduler implementations must call this right before running the
    /// task body and [`ScheduledTask::mark_done`] right after.
    pub fn try_start(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Records the end of a run started with [`ScheduledTask::try_start`].
    pub fn mark_done(&self) {
        self.state.store(DONE, Ordering::Release);
    }
}

impl Default for ScheduledTask {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ScheduledTask {}

/// Delays are clamped so that absurd periods cannot overflow `Instant`.
const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    let delay = delay.min(MAX_DELAY);
    now.checked_add(delay).unwrap_or(now)
}

/// Runs a claimed task, isolating panics so the caller survives.
pub(crate) fn run_task(handle: &ScheduledTask, task: Task) {
    if !handle.try_start() {
        return;
    }
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
    if result.is_err() {
        log::warn!("[scheduler] task {} panicked", handle.id());
    }
    handle.mark_done();
}

/// Delayed-task executor and monotonic clock.
pub trait TaskScheduler: Send + Sync {
    /// Current time on this scheduler's clock.
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// Runs `task` once after `delay`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Shutdown` after [`TaskScheduler::shutdown`];
    /// implementations with bounded queues may report `QueueFull`.
    fn schedule(&self, delay: Duration, task: Task) -> Result<ScheduledTask, SchedulerError>;

    /// Stops the scheduler and discards pending tasks. Idempotent.
    fn shutdown(&self);

    /// Whether [`TaskScheduler::shutdown`] has been called.
    fn is_shutdown(&self) -> bool;
}

/// Who is responsible for shutting a scheduler down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerOwnership {
    /// Created by the component holding it; shut down with that component.
    Owned,
    /// Injected by the caller, who manages its lifecycle.
    Shared,
}
