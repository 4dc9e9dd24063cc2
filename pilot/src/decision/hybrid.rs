//! Rules first, external reasoning second, inaction last.

use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::budget::BudgetLedger;
use crate::core::error::ExternalError;
use crate::core::rules::RuleEngine;
use crate::core::state::GameState;
use crate::core::types::DecisionResult;
use crate::decision::guarded::GuardedClient;
use crate::io::provider::ReasoningProvider;

/// Decisions made so far, by where they came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecisionCounters {
    pub rule: u64,
    pub external: u64,
    pub degraded: u64,
}

/// What the hybrid engine settled on, plus the external failure if any.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridDecision {
    pub result: DecisionResult,
    pub failure: Option<ExternalError>,
}

pub struct HybridEngine<P> {
    rules: RuleEngine,
    external: Option<GuardedClient<P>>,
    counters: DecisionCounters,
}

impl<P: ReasoningProvider> HybridEngine<P> {
    pub fn new(rules: RuleEngine, external: Option<GuardedClient<P>>) -> Self {
        Self {
            rules,
            external,
            counters: DecisionCounters::default(),
        }
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn external(&self) -> Option<&GuardedClient<P>> {
        self.external.as_ref()
    }

    pub fn counters(&self) -> DecisionCounters {
        self.counters
    }

    /// Always yields a decision. The ledger is touched only when no rule
    /// matched and an external client is configured.
    #[instrument(skip_all, fields(version = state.version()))]
    pub fn decide(&mut self, state: &GameState, ledger: &mut BudgetLedger) -> HybridDecision {
        if let Some(result) = self.rules.decide(state) {
            debug!(action = result.action.kind().as_str(), "rule matched");
            self.counters.rule += 1;
            return HybridDecision {
                result,
                failure: None,
            };
        }

        let Some(client) = &self.external else {
            self.counters.degraded += 1;
            return HybridDecision {
                result: DecisionResult::degraded("no rule matched and no external provider"),
                failure: None,
            };
        };

        match client.decide(state, self.rules.economy(), ledger) {
            Ok(result) => {
                self.counters.external += 1;
                HybridDecision {
                    result,
                    failure: None,
                }
            }
            Err(err) => {
                self.counters.degraded += 1;
                HybridDecision {
                    result: DecisionResult::degraded(err.to_string()),
                    failure: Some(err),
                }
            }
        }
    }
}
