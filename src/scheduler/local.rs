//! Scheduler backed by a Tokio `LocalSet`.

use std::time::Instant;

use tokio::time::{Instant as TokioInstant, sleep_until};

use super::{Clock, Scheduler, Task, TaskHandle, TaskSlot};

/// Runs tasks as `spawn_local` futures that sleep until their deadline.
///
/// Must be used from within a [`tokio::task::LocalSet`]. Time is read from
/// Tokio's clock so paused-time tests behave deterministically. Dropping a
/// [`TaskHandle`] aborts the underlying Tokio task.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalTokioScheduler;

impl LocalTokioScheduler {
    /// Create the scheduler.
    #[must_use]
    pub const fn new() -> Self { Self }
}

impl Clock for LocalTokioScheduler {
    fn now(&self) -> Instant { TokioInstant::now().into_std() }
}

impl Scheduler for LocalTokioScheduler {
    fn add_at(&self, deadline: Instant, task: Task) -> TaskHandle {
        let slot = TaskSlot::new();
        let run_slot = std::rc::Rc::clone(&slot);
        let join = tokio::task::spawn_local(async move {
            sleep_until(TokioInstant::from_std(deadline)).await;
            if run_slot.try_start() {
                task();
            } else {
                tracing::trace!("skipping cancelled task");
            }
        });
        let abort = join.abort_handle();
        TaskHandle::new(slot).with_cancel_hook(move || abort.abort())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc, time::Duration};

    use tokio::task::LocalSet;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn delayed_task_runs_after_its_deadline() {
        LocalSet::new()
            .run_until(async {
                let scheduler = LocalTokioScheduler::new();
                let ran = Rc::new(Cell::new(false));
                let flag = Rc::clone(&ran);
                let handle = scheduler
                    .add_delayed(Duration::from_millis(50), Box::new(move || flag.set(true)));

                tokio::time::sleep(Duration::from_millis(49)).await;
                assert!(!ran.get());
                tokio::time::sleep(Duration::from_millis(2)).await;
                assert!(ran.get());
                assert!(!handle.is_pending());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_aborts_the_task() {
        LocalSet::new()
            .run_until(async {
                let scheduler = LocalTokioScheduler::new();
                let ran = Rc::new(Cell::new(false));
                let flag = Rc::clone(&ran);
                let handle = scheduler
                    .add_delayed(Duration::from_millis(10), Box::new(move || flag.set(true)));
                drop(handle);

                tokio::time::sleep(Duration::from_millis(20)).await;
                assert!(!ran.get());
            })
            .await;
    }
}
