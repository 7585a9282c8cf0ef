//! Single-threaded cooperative task scheduling.
//!
//! The fragment sender never blocks. Whenever it has to wait, for the
//! bandwidth tracker or for an acknowledgement round trip, it re-arms itself
//! as a delayed task on a [`Scheduler`]. Tasks are cancelled by dropping the
//! [`TaskHandle`] returned when they were scheduled, so a context that goes
//! away can never be called back.
//!
//! Two implementations are provided: [`ManualScheduler`] runs on a virtual
//! clock advanced by its owner, and [`LocalTokioScheduler`] runs tasks on a
//! Tokio `LocalSet`.

mod local;
mod manual;

use std::{
    cell::Cell,
    fmt,
    rc::Rc,
    time::{Duration, Instant},
};

pub use local::LocalTokioScheduler;
pub use manual::ManualScheduler;

/// Work item executed once by a [`Scheduler`].
pub type Task = Box<dyn FnOnce()>;

/// Deadline used when a delay is too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Source of the current time.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Cooperative scheduler running tasks at or after a deadline.
///
/// Implementations must never invoke a task synchronously from inside
/// [`Scheduler::add_at`]; callers schedule while holding their own state.
pub trait Scheduler: Clock {
    /// Run `task` once `deadline` has passed.
    fn add_at(&self, deadline: Instant, task: Task) -> TaskHandle;

    /// Run `task` as soon as possible.
    fn add_now(&self, task: Task) -> TaskHandle { self.add_at(self.now(), task) }

    /// Run `task` after `delay`.
    fn add_delayed(&self, delay: Duration, task: Task) -> TaskHandle {
        self.add_at(deadline_after(self.now(), delay), task)
    }
}

/// `now + delay`, clamped to a distant deadline instead of overflowing.
#[must_use]
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Shared run/cancel state of one scheduled task.
#[derive(Debug, Default)]
pub struct TaskSlot {
    cancelled: Cell<bool>,
    started: Cell<bool>,
}

impl TaskSlot {
    /// Fresh slot for a newly scheduled task.
    #[must_use]
    pub fn new() -> Rc<Self> { Rc::new(Self::default()) }

    /// Mark the task as running. Returns `false` when it was cancelled and
    /// must be skipped.
    pub fn try_start(&self) -> bool {
        if self.cancelled.get() {
            return false;
        }
        self.started.set(true);
        true
    }

    /// Whether the owning handle cancelled the task.
    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.cancelled.get() }
}

/// Owning handle to a scheduled task.
///
/// Dropping the handle before the task started cancels it.
pub struct TaskHandle {
    slot: Rc<TaskSlot>,
    on_cancel: Option<Box<dyn FnOnce()>>,
}

impl TaskHandle {
    /// Wrap the slot shared with the scheduler.
    #[must_use]
    pub fn new(slot: Rc<TaskSlot>) -> Self {
        Self {
            slot,
            on_cancel: None,
        }
    }

    /// Run `hook` if the task is cancelled, letting a scheduler release
    /// resources it holds for the task.
    #[must_use]
    pub fn with_cancel_hook(mut self, hook: impl FnOnce() + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    /// Whether the task can still run.
    #[must_use]
    pub fn is_pending(&self) -> bool { !self.slot.started.get() && !self.slot.cancelled.get() }

    /// Cancel the task. Equivalent to dropping the handle.
    pub fn cancel(self) {}
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if self.is_pending() {
            self.slot.cancelled.set(true);
            if let Some(hook) = self.on_cancel.take() {
                hook();
            }
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}
