//! Bandwidth tracker with a predetermined answer sequence.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    time::Duration,
};

use fragwire::BandwidthTracker;

/// Replays a fixed list of delays, one per query, then allows every send.
/// Consumed byte counts are recorded.
#[derive(Debug, Default)]
pub struct ScriptedTracker {
    delays: RefCell<VecDeque<Duration>>,
    queries: Cell<usize>,
    consumed: Vec<usize>,
}

impl ScriptedTracker {
    /// Create a tracker answering `delays` in order.
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            delays: RefCell::new(delays.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Byte counts passed to `consume`, in order.
    pub fn consumed(&self) -> &[usize] { &self.consumed }

    /// Number of `get_delay` calls so far.
    pub fn queries(&self) -> usize { self.queries.get() }
}

impl BandwidthTracker for ScriptedTracker {
    fn get_delay(&self, _bytes: usize) -> Duration {
        self.queries.set(self.queries.get() + 1);
        self.delays
            .borrow_mut()
            .pop_front()
            .unwrap_or(Duration::ZERO)
    }

    fn consume(&mut self, bytes: usize) { self.consumed.push(bytes); }
}
