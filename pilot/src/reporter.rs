//! Once-per-condition failure reporting.
//!
//! A persistent failure (a dead detector backend, an exhausted budget) would
//! otherwise log every cycle. The first occurrence is a warning, repeats are
//! debug-level, and the recovery is logged with how many cycles it lasted.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct FailureReporter {
    active: BTreeMap<String, u64>,
}

impl FailureReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `condition` as failing this cycle. Returns true on its first
    /// occurrence since the last recovery.
    pub fn failing(&mut self, condition: &str, detail: &str) -> bool {
        let count = self.active.entry(condition.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            warn!(condition, detail, "failure");
            true
        } else {
            debug!(condition, detail, repeats = *count, "failure persists");
            false
        }
    }

    /// Report `condition` as healthy. Returns the number of consecutive
    /// failures that just ended, if it was failing.
    pub fn recovered(&mut self, condition: &str) -> Option<u64> {
        let count = self.active.remove(condition)?;
        info!(condition, occurrences = count, "recovered");
        Some(count)
    }

    pub fn is_failing(&self, condition: &str) -> bool {
        self.active.contains_key(condition)
    }
}
