use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::settings::Backend;

/// Forced-restart counts per backend, used to spot restart storms.
#[derive(Debug, Default)]
pub struct RestartCounters {
    counts: Mutex<BTreeMap<Backend, u32>>,
}

impl RestartCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one forced restart and return the new total.
    pub fn record_restart(&self, backend: Backend) -> u32 {
        let mut counts = self.counts.lock();
        let count = counts.entry(backend).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset(&self, backend: Backend) {
        self.counts.lock().remove(&backend);
    }

    pub fn get(&self, backend: Backend) -> u32 {
        self.counts.lock().get(&backend).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<Backend, u32> {
        self.counts.lock().clone()
    }
}
