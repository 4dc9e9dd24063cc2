//! Budgeted, time-bounded, retrying wrapper around a reasoning provider.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::core::budget::{BudgetLedger, remaining_time};
use crate::core::error::ExternalError;
use crate::core::response::parse_decision;
use crate::core::state::GameState;
use crate::core::types::{DecisionResult, Economy};
use crate::io::config::ExternalConfig;
use crate::io::prompt::PromptEngine;
use crate::io::provider::{ProviderFailure, ReasoningProvider, ReasoningRequest};

/// Calls the provider under the configured budget, timeout and retry policy.
///
/// Every dispatched attempt spends one ledger unit whatever its outcome. A
/// timed-out attempt is not retried; transient failures are, up to
/// `max_retries` and while the call deadline leaves room for the backoff.
pub struct GuardedClient<P> {
    provider: P,
    prompts: PromptEngine,
    policy: ExternalConfig,
}

impl<P: ReasoningProvider> GuardedClient<P> {
    pub fn new(provider: P, policy: ExternalConfig) -> Self {
        Self {
            provider,
            prompts: PromptEngine::new(),
            policy,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[instrument(skip_all, fields(version = state.version(), remaining = ledger.remaining()))]
    pub fn decide(
        &self,
        state: &GameState,
        economy: &Economy,
        ledger: &mut BudgetLedger,
    ) -> Result<DecisionResult, ExternalError> {
        let prompt = self
            .prompts
            .render_decision(state, economy)
            .map_err(|err| ExternalError::ProviderError(format!("render prompt: {err:#}")))?;
        let timeout = self.policy.timeout();
        let attempts = self.policy.max_retries.saturating_add(1);
        // Upper bound for the whole call, backoff sleeps included.
        let deadline = Instant::now() + timeout.saturating_mul(attempts);
        let mut dispatched = 0u32;
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.policy.backoff_delay(attempt - 1);
                if remaining_time(deadline).is_none_or(|left| left <= delay) {
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "no time left to retry");
                    break;
                }
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                thread::sleep(delay);
            }
            let Some(left) = remaining_time(deadline) else {
                break;
            };
            ledger.try_spend()?;
            dispatched += 1;

            let request = ReasoningRequest {
                prompt: prompt.clone(),
                timeout: timeout.min(left),
            };
            let started = Instant::now();
            let result = self.provider.complete(&request);
            let elapsed = started.elapsed();

            match result {
                Ok(_) if elapsed > request.timeout => {
                    return Err(timed_out(attempt, elapsed));
                }
                Ok(raw) => {
                    let decision = parse_decision(&raw, self.policy.default_confidence)
                        .map_err(ExternalError::ParseError)?;
                    info!(
                        attempt,
                        action = decision.action.kind().as_str(),
                        confidence = decision.confidence,
                        "external decision"
                    );
                    return Ok(decision);
                }
                Err(ProviderFailure::TimedOut) => return Err(timed_out(attempt, elapsed)),
                Err(ProviderFailure::Fatal(message)) => {
                    return Err(ExternalError::ProviderError(message));
                }
                Err(ProviderFailure::Transient(message)) => {
                    warn!(attempt, attempts, %message, "transient provider failure");
                    last_failure = message;
                }
            }
        }

        Err(ExternalError::ProviderError(format!(
            "gave up after {dispatched} attempts: {last_failure}"
        )))
    }
}

fn timed_out(attempt: u32, elapsed: Duration) -> ExternalError {
    ExternalError::Timeout {
        attempt,
        elapsed_ms: elapsed.as_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ActionType, DecisionSource, Position};
    use crate::test_support::{ScriptedProvider, prep_state};

    fn policy(max_retries: u32) -> ExternalConfig {
        ExternalConfig {
            max_retries,
            backoff_ms: 0,
            timeout_ms: 1_000,
            ..ExternalConfig::default()
        }
    }

    fn decide(
        client: &GuardedClient<ScriptedProvider>,
        ledger: &mut BudgetLedger,
    ) -> Result<DecisionResult, ExternalError> {
        client.decide(&prep_state(10), &Economy::default(), ledger)
    }

    #[test]
    fn parses_fenced_response() {
        let provider = ScriptedProvider::new(vec![Ok(
            "Buy the mage.\n```json\n{\"action_type\":\"buy-hero\",\"target\":\"Lux\",\"position\":{\"shop\":2},\"confidence\":0.8}\n```"
                .to_string(),
        )]);
        let client = GuardedClient::new(provider, policy(2));
        let mut ledger = BudgetLedger::new(5);

        let decision = decide(&client, &mut ledger).expect("decision");
        assert_eq!(decision.source, DecisionSource::External);
        assert_eq!(decision.action.kind(), ActionType::BuyHero);
        assert_eq!(decision.action.position(), Some(Position::Shop { slot: 2 }));
        assert_eq!(decision.confidence, 0.8);
        assert_eq!(decision.reasoning.as_deref(), Some("Buy the mage."));
        assert_eq!(ledger.spent(), 1);
        assert!(client.provider().requests()[0].contains("gold: 10"));
    }

    #[test]
    fn retries_transient_failures_then_succeeds() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderFailure::Transient("503".to_string())),
            Ok(r#"{"action_type":"refresh-shop"}"#.to_string()),
        ]);
        let client = GuardedClient::new(provider, policy(2));
        let mut ledger = BudgetLedger::new(5);

        let decision = decide(&client, &mut ledger).expect("decision");
        assert_eq!(decision.action.kind(), ActionType::RefreshShop);
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(ledger.spent(), 2);
        assert_eq!(client.provider().calls(), 2);
    }

    #[test]
    fn stops_after_max_retries() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderFailure::Transient("a".to_string())),
            Err(ProviderFailure::Transient("b".to_string())),
            Err(ProviderFailure::Transient("c".to_string())),
        ]);
        let client = GuardedClient::new(provider, policy(1));
        let mut ledger = BudgetLedger::new(5);

        let err = decide(&client, &mut ledger).expect_err("exhausted retries");
        assert!(matches!(err, ExternalError::ProviderError(ref message) if message.contains('b')));
        assert_eq!(client.provider().calls(), 2);
        assert_eq!(ledger.spent(), 2);
    }

    #[test]
    fn exhausted_budget_never_calls_provider() {
        let provider = ScriptedProvider::new(vec![Ok(r#"{"action_type":"none"}"#.to_string())]);
        let client = GuardedClient::new(provider, policy(2));
        let mut ledger = BudgetLedger::new(0);

        let err = decide(&client, &mut ledger).expect_err("no budget");
        assert_eq!(err, ExternalError::BudgetExhausted { spent: 0, budget: 0 });
        assert_eq!(client.provider().calls(), 0);
    }

    #[test]
    fn budget_runs_out_mid_retry() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderFailure::Transient("busy".to_string())),
            Ok(r#"{"action_type":"none"}"#.to_string()),
        ]);
        let client = GuardedClient::new(provider, policy(3));
        let mut ledger = BudgetLedger::new(1);

        let err = decide(&client, &mut ledger).expect_err("budget");
        assert!(matches!(err, ExternalError::BudgetExhausted { spent: 1, budget: 1 }));
        assert_eq!(client.provider().calls(), 1);
    }

    #[test]
    fn timeout_is_spent_and_not_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderFailure::TimedOut),
            Ok(r#"{"action_type":"none"}"#.to_string()),
        ]);
        let client = GuardedClient::new(provider, policy(2));
        let mut ledger = BudgetLedger::new(5);

        let err = decide(&client, &mut ledger).expect_err("timeout");
        assert!(matches!(err, ExternalError::Timeout { attempt: 1, .. }));
        assert_eq!(ledger.spent(), 1);
        assert_eq!(client.provider().calls(), 1);
    }

    #[test]
    fn late_reply_counts_as_timeout() {
        let provider = ScriptedProvider::new(vec![Ok(r#"{"action_type":"none"}"#.to_string())])
            .with_delay(Duration::from_millis(80));
        let client = GuardedClient::new(
            provider,
            ExternalConfig {
                timeout_ms: 20,
                ..policy(0)
            },
        );
        let mut ledger = BudgetLedger::new(5);

        let err = decide(&client, &mut ledger).expect_err("late");
        assert!(matches!(err, ExternalError::Timeout { .. }));
    }

    #[test]
    fn fatal_failure_is_not_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderFailure::Fatal("401".to_string())),
            Ok(r#"{"action_type":"none"}"#.to_string()),
        ]);
        let client = GuardedClient::new(provider, policy(2));
        let mut ledger = BudgetLedger::new(5);

        let err = decide(&client, &mut ledger).expect_err("fatal");
        assert_eq!(err, ExternalError::ProviderError("401".to_string()));
        assert_eq!(client.provider().calls(), 1);
    }

    #[test]
    fn malformed_response_is_parse_error() {
        let provider = ScriptedProvider::new(vec![
            Ok(r#"{"action_type":"cast-spell"}"#.to_string()),
            Ok("no json here".to_string()),
        ]);
        let client = GuardedClient::new(provider, policy(0));
        let mut ledger = BudgetLedger::new(5);

        assert!(matches!(
            decide(&client, &mut ledger),
            Err(ExternalError::ParseError(_))
        ));
        assert!(matches!(
            decide(&client, &mut ledger),
            Err(ExternalError::ParseError(_))
        ));
        assert_eq!(ledger.spent(), 2);
    }

    #[test]
    fn backoff_past_deadline_gives_up_without_spending() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderFailure::Transient("503".to_string())),
            Ok(r#"{"action_type":"refresh-shop"}"#.to_string()),
        ]);
        let client = GuardedClient::new(
            provider,
            ExternalConfig {
                timeout_ms: 50,
                backoff_ms: 120,
                ..policy(1)
            },
        );
        let mut ledger = BudgetLedger::new(5);

        let err = decide(&client, &mut ledger).expect_err("no time to retry");
        assert!(matches!(err, ExternalError::ProviderError(ref message) if message.contains("503")));
        assert_eq!(client.provider().calls(), 1);
        assert_eq!(ledger.spent(), 1);
    }
}
