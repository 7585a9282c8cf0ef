//! Deterministic scheduler driven by an explicit virtual clock.

use std::{
    cell::{Cell, RefCell},
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    fmt,
    rc::Rc,
    time::{Duration, Instant},
};

use super::{Clock, Scheduler, Task, TaskHandle, TaskSlot};

/// Queue length below which cancelled entries are left for `pop_due`.
const COMPACT_THRESHOLD: usize = 64;

struct Queued {
    deadline: Instant,
    seq: u64,
    slot: Rc<TaskSlot>,
    task: Task,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// Scheduler whose clock only moves when its owner says so.
///
/// Tasks due at the same instant run in the order they were scheduled.
/// Tasks may schedule further tasks while running.
///
/// # Examples
///
/// ```
/// use std::{cell::Cell, rc::Rc, time::Duration};
///
/// use fragwire::scheduler::{ManualScheduler, Scheduler};
///
/// let scheduler = ManualScheduler::new();
/// let ran = Rc::new(Cell::new(false));
/// let flag = Rc::clone(&ran);
/// let _handle = scheduler.add_delayed(Duration::from_millis(10), Box::new(move || flag.set(true)));
/// scheduler.advance(Duration::from_millis(9));
/// assert!(!ran.get());
/// scheduler.advance(Duration::from_millis(1));
/// assert!(ran.get());
/// ```
pub struct ManualScheduler {
    now: Cell<Instant>,
    next_seq: Cell<u64>,
    queue: RefCell<BinaryHeap<Reverse<Queued>>>,
    compact_at: Cell<usize>,
}

impl ManualScheduler {
    /// Create a scheduler whose clock starts at the real current instant.
    #[must_use]
    pub fn new() -> Self { Self::starting_at(Instant::now()) }

    /// Create a scheduler whose clock starts at `start`.
    #[must_use]
    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Cell::new(start),
            next_seq: Cell::new(0),
            queue: RefCell::new(BinaryHeap::new()),
            compact_at: Cell::new(COMPACT_THRESHOLD),
        }
    }

    /// Deadline of the earliest task that has not been cancelled.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut queue = self.queue.borrow_mut();
        while let Some(Reverse(head)) = queue.peek() {
            if !head.slot.is_cancelled() {
                return Some(head.deadline);
            }
            queue.pop();
        }
        None
    }

    /// Number of tasks that are queued and not cancelled.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.queue
            .borrow()
            .iter()
            .filter(|Reverse(queued)| !queued.slot.is_cancelled())
            .count()
    }

    /// Run every task whose deadline is at or before the current time,
    /// including tasks scheduled by those tasks. Returns how many ran.
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        while let Some(queued) = self.pop_due() {
            if queued.slot.try_start() {
                (queued.task)();
                ran += 1;
            }
        }
        ran
    }

    /// Move the clock forward by `delta` and run what became due.
    pub fn advance(&self, delta: Duration) -> usize {
        self.now.set(super::deadline_after(self.now.get(), delta));
        self.run_due()
    }

    /// Run tasks in deadline order, moving the clock to each deadline, until
    /// nothing is due at or before `limit`. The clock ends at `limit`.
    pub fn run_until(&self, limit: Instant) -> usize {
        let mut ran = self.run_due();
        while let Some(deadline) = self.next_deadline().filter(|deadline| *deadline <= limit) {
            if deadline > self.now.get() {
                self.now.set(deadline);
            }
            ran += self.run_due();
        }
        if limit > self.now.get() {
            self.now.set(limit);
        }
        ran
    }

    /// Run tasks in deadline order until the queue is empty or `max_tasks`
    /// have run. Returns how many ran.
    pub fn run_until_idle(&self, max_tasks: usize) -> usize {
        let mut ran = 0;
        while ran < max_tasks {
            let Some(deadline) = self.next_deadline() else {
                break;
            };
            if deadline > self.now.get() {
                self.now.set(deadline);
            }
            let Some(queued) = self.pop_due() else {
                break;
            };
            if queued.slot.try_start() {
                (queued.task)();
                ran += 1;
            }
        }
        ran
    }

    fn pop_due(&self) -> Option<Queued> {
        let mut queue = self.queue.borrow_mut();
        let due = queue
            .peek()
            .is_some_and(|Reverse(head)| head.deadline <= self.now.get());
        if due {
            queue.pop().map(|Reverse(queued)| queued)
        } else {
            None
        }
    }
}

impl Default for ManualScheduler {
    fn default() -> Self { Self::new() }
}

impl Clock for ManualScheduler {
    fn now(&self) -> Instant { self.now.get() }
}

impl Scheduler for ManualScheduler {
    fn add_at(&self, deadline: Instant, task: Task) -> TaskHandle {
        let slot = TaskSlot::new();
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let mut queue = self.queue.borrow_mut();
        if queue.len() >= self.compact_at.get() {
            // Cancelled tasks far in the future would otherwise only leave
            // the heap once the clock reaches them.
            queue.retain(|Reverse(queued)| !queued.slot.is_cancelled());
            self.compact_at
                .set(COMPACT_THRESHOLD.max(queue.len().saturating_mul(2)));
        }
        queue.push(Reverse(Queued {
            deadline,
            seq,
            slot: Rc::clone(&slot),
            task,
        }));
        TaskHandle::new(slot)
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now.get())
            .field("queued", &self.queue.borrow().len())
            .finish()
    }
}
