//! Statistics sink that remembers every update.

use std::{cell::RefCell, collections::BTreeMap};

use fragwire::StatsSink;

/// [`StatsSink`] accumulating counters in memory.
#[derive(Debug, Default)]
pub struct RecordingStats {
    counters: RefCell<BTreeMap<&'static str, u64>>,
}

impl RecordingStats {
    /// Create an empty recorder.
    pub fn new() -> Self { Self::default() }

    /// Current value of `name`, zero when never updated.
    pub fn get(&self, name: &str) -> u64 { self.counters.borrow().get(name).copied().unwrap_or(0) }
}

impl StatsSink for RecordingStats {
    fn update(&self, name: &'static str, delta: u64) {
        *self.counters.borrow_mut().entry(name).or_default() += delta;
    }
}
