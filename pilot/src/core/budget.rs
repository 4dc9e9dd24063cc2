//! Session spend ledger for external calls and shared time-budget helpers.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::error::ExternalError;

/// Process-lifetime count of external call attempts against a fixed budget.
///
/// Every attempt spends one unit whatever its outcome. The ledger is only
/// reset by constructing a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetLedger {
    budget: u32,
    spent: u32,
}

impl BudgetLedger {
    pub fn new(budget: u32) -> Self {
        Self { budget, spent: 0 }
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn spent(&self) -> u32 {
        self.spent
    }

    pub fn remaining(&self) -> u32 {
        self.budget.saturating_sub(self.spent)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Spend one attempt, or fail without spending when nothing is left.
    pub fn try_spend(&mut self) -> Result<(), ExternalError> {
        if self.is_exhausted() {
            return Err(ExternalError::BudgetExhausted {
                spent: self.spent,
                budget: self.budget,
            });
        }
        self.spent += 1;
        Ok(())
    }
}

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining_time(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
}
