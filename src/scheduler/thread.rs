//! Thread-backed task scheduler.
//!
//! A single named worker thread owns a deadline-ordered heap. Callers submit
//! tasks over a bounded control channel and never block: a saturated queue is
//! reported as `SchedulerError::QueueFull`. Blocking here would deadlock when a
//! caller holds a lock that the task being run by the worker is waiting for.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::{ConfigError, SchedulerError};

use super::{deadline_after, run_task, ScheduledTask, Task, TaskScheduler};

/// Cancelled entries are purged from the heap once it grows past this size.
const COMPACT_THRESHOLD: usize = 1024;

/// How long shutdown waits for room in a full control queue.
const SHUTDOWN_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ThreadSchedulerConfig {
    /// Name of the worker thread.
    pub thread_name: String,
    /// Max queued submissions not yet picked up by the worker.
    pub control_queue_capacity: usize,
}

impl Default for ThreadSchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: "lwm2m-notify-scheduler".to_string(),
            control_queue_capacity: 1024,
        }
    }
}

impl ThreadSchedulerConfig {
    /// Rejects an empty thread name and a zero queue capacity.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "scheduler.thread_name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.control_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.control_queue_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

enum ControlMsg {
    Schedule {
        deadline: Instant,
        handle: ScheduledTask,
        task: Task,
    },
    Shutdown,
}

struct HeapEntry {
    deadline: Instant,
    seq: u64,
    handle: ScheduledTask,
    task: Task,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed: BinaryHeap is a max-heap, we want the earliest deadline on top.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Scheduler running tasks on one background thread.
///
/// Tasks run one at a time, in deadline order. A panicking task is logged and
/// does not take the worker down.
pub struct ThreadScheduler {
    control_tx: Sender<ControlMsg>,
    capacity: usize,
    shutdown: AtomicBool,
    worker_id: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("capacity", &self.capacity)
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ThreadScheduler {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Disconnected` if the OS refuses to spawn the thread.
    pub fn start(cfg: &ThreadSchedulerConfig) -> Result<Self, SchedulerError> {
        let capacity = cfg.control_queue_capacity.max(1);
        let (control_tx, control_rx) = bounded::<ControlMsg>(capacity);

        let join = thread::Builder::new()
            .name(cfg.thread_name.clone())
            .spawn(move || worker_loop(&control_rx))
            .map_err(|e| {
                log::warn!("[scheduler] failed to spawn worker: {e}");
                SchedulerError::Disconnected
            })?;
        let worker_id = join.thread().id();
        log::info!("[scheduler] worker '{}' started", cfg.thread_name);

        Ok(Self {
            control_tx,
            capacity,
            shutdown: AtomicBool::new(false),
            worker_id,
            join: Mutex::new(Some(join)),
        })
    }
}

impl TaskScheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Result<ScheduledTask, SchedulerError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        let handle = ScheduledTask::new();
        let msg = ControlMsg::Schedule {
            deadline: deadline_after(Instant::now(), delay),
            handle: handle.clone(),
            task,
        };
        match self.control_tx.try_send(msg) {
            Ok(()) => Ok(handle),
            Err(TrySendError::Full(_)) => Err(SchedulerError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(SchedulerError::Disconnected),
        }
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let signalled = match self.control_tx.try_send(ControlMsg::Shutdown) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => true,
            // Full queue: the worker is draining it, wait a bounded time for a slot.
            Err(TrySendError::Full(msg)) => {
                self.control_tx.send_timeout(msg, SHUTDOWN_SEND_TIMEOUT).is_ok()
            }
        };

        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            if !signalled {
                // The worker exits once the last sender is dropped.
                log::warn!("[scheduler] worker did not accept shutdown, detaching it");
                drop(handle);
            } else if thread::current().id() == self.worker_id {
                // A task shutting down its own scheduler cannot join itself.
                drop(handle);
            } else if handle.join().is_err() {
                log::warn!("[scheduler] worker thread panicked");
            }
        }
        log::info!("[scheduler] shut down");
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(control_rx: &Receiver<ControlMsg>) {
    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let next_deadline = heap.peek().map(|e| e.deadline);
        let msg = match next_deadline {
            None => control_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => {
                control_rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
        };

        match msg {
            Ok(ControlMsg::Schedule {
                deadline,
                handle,
                task,
            }) => {
                seq = seq.wrapping_add(1);
                heap.push(HeapEntry {
                    deadline,
                    seq,
                    handle,
                    task,
                });
            }
            Ok(ControlMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while heap.peek().is_some_and(|e| e.deadline <= now) {
            if let Some(entry) = heap.pop() {
                run_task(&entry.handle, entry.task);
            }
        }

        if heap.len() >= COMPACT_THRESHOLD {
            heap.retain(|e| e.handle.is_pending());
        }
    }

    let discarded = heap.len();
    for entry in heap {
        entry.handle.cancel();
    }
    if discarded > 0 {
        log::debug!("[scheduler] discarded {discarded} pending task(s) on shutdown");
    }
}
