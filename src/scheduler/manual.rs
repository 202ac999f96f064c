//! Virtual-time scheduler.
//!
//! Nothing runs on its own: time only moves when [`ManualScheduler::advance`]
//! is called, and due tasks run on the caller's thread. The notification
//! engine reads its clock through [`TaskScheduler::now`], so a whole engine
//! driven by this scheduler is fully deterministic.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::SchedulerError;

use super::{deadline_after, run_task, ScheduledTask, Task, TaskScheduler};

struct State {
    origin: Instant,
    now: Instant,
    seq: u64,
    queue: BTreeMap<(Instant, u64), (ScheduledTask, Task)>,
    shutdown: bool,
}

/// Scheduler whose clock is advanced explicitly.
pub struct ManualScheduler {
    state: Mutex<State>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualScheduler")
            .field("elapsed", &state.now.saturating_duration_since(state.origin))
            .field("queued", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    /// Creates a scheduler whose clock starts at the current instant.
    #[must_use]
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            state: Mutex::new(State {
                origin,
                now: origin,
                seq: 0,
                queue: BTreeMap::new(),
                shutdown: false,
            }),
        }
    }

    /// Virtual time elapsed since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let state = self.state.lock();
        state.now.saturating_duration_since(state.origin)
    }

    /// Number of tasks neither run nor cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .queue
            .values()
            .filter(|(handle, _)| handle.is_pending())
            .count()
    }

    /// Moves the clock forward by `by`, running every task that falls due.
    ///
    /// Tasks run in deadline order, ties in scheduling order. The clock reads
    /// each task's deadline while it runs. Tasks scheduled from inside a task
    /// run in the same call when their deadline is within the window.
    ///
    /// Returns the number of task bodies executed.
    pub fn advance(&self, by: Duration) -> usize {
        let target = {
            let state = self.state.lock();
            deadline_after(state.now, by)
        };

        let mut ran = 0;
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.first_key_value() {
                    Some((&(deadline, _), _)) if deadline <= target => {
                        state.now = state.now.max(deadline);
                        state.queue.pop_first().map(|(_, entry)| entry)
                    }
                    _ => None,
                }
            };
            // Run outside the lock: the task may schedule more work.
            let Some((handle, task)) = next else { break };
            if handle.is_pending() {
                run_task(&handle, task);
                ran += 1;
            }
        }

        let mut state = self.state.lock();
        state.now = state.now.max(target);
        ran
    }

    /// Runs every task due at the current instant without moving the clock.
    pub fn run_due(&self) -> usize {
        self.advance(Duration::ZERO)
    }
}

impl TaskScheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    fn schedule(&self, delay: Duration, task: Task) -> Result<ScheduledTask, SchedulerError> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(SchedulerError::Shutdown);
        }
        let handle = ScheduledTask::new();
        let deadline = deadline_after(state.now, delay);
        state.seq = state.seq.wrapping_add(1);
        let key = (deadline, state.seq);
        state.queue.insert(key, (handle.clone(), task));
        Ok(handle)
    }

    fn shutdown(&self) {
        let drained = {
            let mut state = self.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            std::mem::take(&mut state.queue)
        };
        for (handle, _) in drained.into_values() {
            handle.cancel();
        }
    }

    fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}
