//! One control cycle: capture → fuse → update → decide → validate → enqueue
//! → execute.
//!
//! [`Pilot`] owns every piece of mutable session state (game snapshot, budget
//! ledger, queue, statistics) and is the only writer. [`Pilot::run_cycle`]
//! never fails: each stage's error is folded into the [`CycleReport`] and the
//! cycle always runs to completion.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::BudgetLedger;
use crate::core::coords::{CoordinateNormalizer, Layout};
use crate::core::error::{ExternalError, RecognitionGap};
use crate::core::fusion::fuse;
use crate::core::rules::RuleEngine;
use crate::core::state::{GameState, StateField};
use crate::core::types::{
    DecisionResult, DecisionSource, DetectionSource, HeroCatalog, RawDetection,
};
use crate::core::validator::validate;
use crate::decision::guarded::GuardedClient;
use crate::decision::hybrid::{HybridDecision, HybridEngine};
use crate::io::capture::{BackendOutput, Capture};
use crate::io::config::PilotConfig;
use crate::io::input::InputSink;
use crate::io::provider::ReasoningProvider;
use crate::queue::{ActionQueue, ExecutionOutcome, Executor};
use crate::reporter::FailureReporter;

const SAFETY_WINDOW: Duration = Duration::from_secs(60);

/// Session totals, logged when the loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PilotStats {
    pub cycles: u64,
    pub rule_decisions: u64,
    pub external_decisions: u64,
    pub degraded_decisions: u64,
    pub rejections: u64,
    pub queue_drops: u64,
    /// Queued actions invalidated by a later state update.
    pub stale_drops: u64,
    pub executed: u64,
    pub failed: u64,
    pub recognition_gaps: u64,
    pub state_violations: u64,
    pub safety_blocks: u64,
    pub capture_errors: u64,
    pub budget_spent: u32,
}

/// Everything that happened in one cycle. Serialized as one cycle-log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub surface_changed: bool,
    pub gaps: Vec<String>,
    pub entities: usize,
    pub state_version: u64,
    pub changed: Vec<StateField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_error: Option<String>,
    pub decision: DecisionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
    pub queued: bool,
    pub queue_full: bool,
    pub safety_blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionOutcome>,
}

impl CycleReport {
    pub fn new(cycle: u64, decision: DecisionResult) -> Self {
        Self {
            cycle,
            surface_changed: false,
            gaps: Vec::new(),
            entities: 0,
            state_version: 0,
            changed: Vec::new(),
            state_error: None,
            decision,
            external_error: None,
            rejection: None,
            queued: false,
            queue_full: false,
            safety_blocked: false,
            execution: None,
        }
    }
}

/// Caps input dispatches within any sliding 60s window.
#[derive(Debug, Clone)]
pub struct SafetyGate {
    max_per_window: u32,
    dispatched: VecDeque<Instant>,
}

impl SafetyGate {
    /// A limit of zero disables the gate.
    pub fn new(max_actions_per_minute: u32) -> Self {
        Self {
            max_per_window: max_actions_per_minute,
            dispatched: VecDeque::new(),
        }
    }

    pub fn allows(&mut self, now: Instant) -> bool {
        if self.max_per_window == 0 {
            return true;
        }
        while let Some(oldest) = self.dispatched.front()
            && now.saturating_duration_since(*oldest) >= SAFETY_WINDOW
        {
            self.dispatched.pop_front();
        }
        self.dispatched.len() < self.max_per_window as usize
    }

    pub fn record(&mut self, now: Instant) {
        self.dispatched.push_back(now);
    }
}

pub struct Pilot<P, I> {
    config: PilotConfig,
    catalog: HeroCatalog,
    state: GameState,
    ledger: BudgetLedger,
    engine: HybridEngine<P>,
    normalizer: CoordinateNormalizer,
    queue: ActionQueue,
    executor: Executor<I>,
    safety: SafetyGate,
    reporter: FailureReporter,
    stats: PilotStats,
}

impl<P: ReasoningProvider, I: InputSink> Pilot<P, I> {
    /// Without a provider, unmatched cycles degrade to inaction.
    pub fn new(config: PilotConfig, provider: Option<P>, input: I) -> Self {
        let rules = RuleEngine::new(config.economy.clone(), &config.disabled_rules);
        let external = provider.map(|provider| GuardedClient::new(provider, config.external.clone()));
        Self {
            catalog: config.catalog(),
            state: GameState::new(config.state.bench_capacity),
            ledger: BudgetLedger::new(config.external.session_budget),
            engine: HybridEngine::new(rules, external),
            normalizer: CoordinateNormalizer::default(),
            queue: ActionQueue::new(config.execution.queue_capacity),
            executor: Executor::new(input, Layout::default(), config.execution.clone()),
            safety: SafetyGate::new(config.safety.max_actions_per_minute),
            reporter: FailureReporter::new(),
            stats: PilotStats::default(),
            config,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub fn executor(&self) -> &Executor<I> {
        &self.executor
    }

    pub fn engine(&self) -> &HybridEngine<P> {
        &self.engine
    }

    pub fn stats(&self) -> &PilotStats {
        &self.stats
    }

    /// Count a capture that could not be taken at all.
    pub fn note_capture_error(&mut self, detail: &str) {
        self.stats.capture_errors += 1;
        self.reporter.failing("capture", detail);
    }

    #[instrument(skip_all, fields(cycle = self.stats.cycles + 1))]
    pub fn run_cycle(&mut self, capture: Capture) -> CycleReport {
        self.stats.cycles += 1;
        self.reporter.recovered("capture");
        let mut report = CycleReport::new(self.stats.cycles, DecisionResult::degraded("pending"));

        report.surface_changed = self.normalizer.observe(capture.surface);
        if report.surface_changed {
            info!(
                width = capture.surface.width,
                height = capture.surface.height,
                "surface changed"
            );
        }

        let mut detections = Vec::new();
        for (backend, output) in [
            (DetectionSource::TextExtraction, capture.text),
            (DetectionSource::TemplateMatch, capture.template),
        ] {
            match self.backend_detections(backend, output) {
                Ok(found) => detections.extend(found),
                Err(gap) => {
                    self.stats.recognition_gaps += 1;
                    report.gaps.push(gap.to_string());
                }
            }
        }

        let entities = fuse(detections, self.config.fusion.min_confidence);
        report.entities = entities.len();
        match self
            .state
            .update(&entities, &self.catalog, &self.config.state)
        {
            Ok(update) => {
                self.reporter.recovered("state");
                report.changed = update.changed;
            }
            Err(err) => {
                self.stats.state_violations += 1;
                self.reporter.failing("state", &err.to_string());
                report.state_error = Some(err.to_string());
            }
        }
        report.state_version = self.state.version();

        let decision = self.engine.decide(&self.state, &mut self.ledger);
        self.note_external(&decision);
        report.external_error = decision.failure.map(|err| err.to_string());
        report.decision = decision.result;
        let counters = self.engine.counters();
        self.stats.rule_decisions = counters.rule;
        self.stats.external_decisions = counters.external;
        self.stats.degraded_decisions = counters.degraded;
        self.stats.budget_spent = self.ledger.spent();

        self.enqueue(&mut report);
        self.execute_head(&mut report);
        report
    }

    fn backend_detections(
        &mut self,
        backend: DetectionSource,
        output: BackendOutput,
    ) -> Result<Vec<RawDetection>, RecognitionGap> {
        let condition = backend.as_str();
        let result = match output {
            Ok(found) if found.is_empty() => Err("no detections".to_string()),
            other => other,
        };
        match result {
            Ok(found) => {
                self.reporter.recovered(condition);
                Ok(found)
            }
            Err(reason) => {
                self.reporter.failing(condition, &reason);
                Err(RecognitionGap { backend, reason })
            }
        }
    }

    /// External conditions clear only once an external call succeeds; rule
    /// matches say nothing about the provider.
    fn note_external(&mut self, decision: &HybridDecision) {
        if let Some(err) = &decision.failure {
            self.reporter.failing(err.kind(), &err.to_string());
        } else if decision.result.source == DecisionSource::External {
            for kind in ExternalError::KINDS {
                self.reporter.recovered(kind);
            }
        }
    }

    fn enqueue(&mut self, report: &mut CycleReport) {
        let decision = &report.decision;
        if decision.action.is_none() {
            return;
        }
        if let Err(rejection) = validate(&decision.action, &self.state, self.engine.rules().economy())
        {
            self.stats.rejections += 1;
            warn!(source = decision.source.as_str(), %rejection, "action rejected");
            report.rejection = Some(rejection.to_string());
            return;
        }
        match self.queue.push(decision.action.clone()) {
            Ok(()) => report.queued = true,
            Err(full) => {
                self.stats.queue_drops += 1;
                warn!(%full, action = decision.action.kind().as_str(), "action dropped");
                report.queue_full = true;
            }
        }
    }

    fn execute_head(&mut self, report: &mut CycleReport) {
        let economy = self.engine.rules().economy();
        while let Some(head) = self.queue.peek() {
            match validate(head, &self.state, economy) {
                Ok(()) => break,
                Err(rejection) => {
                    self.stats.stale_drops += 1;
                    debug!(%rejection, "dropping stale queued action");
                    self.queue.pop();
                }
            }
        }
        if self.queue.is_empty() {
            return;
        }

        let now = Instant::now();
        if !self.safety.allows(now) {
            self.stats.safety_blocks += 1;
            self.reporter.failing("safety", "action rate limit reached");
            report.safety_blocked = true;
            return;
        }
        self.reporter.recovered("safety");
        let Some(action) = self.queue.pop() else {
            return;
        };
        self.safety.record(now);
        let outcome = self.executor.execute(&action, &self.normalizer);
        if outcome.success {
            self.stats.executed += 1;
        } else {
            self.stats.failed += 1;
        }
        report.execution = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coords::Surface;
    use crate::core::types::{ActionType, DecisionSource, EntityKind};
    use crate::io::input::InputEventKind;
    use crate::io::provider::ProviderFailure;
    use crate::test_support::{
        ScriptedProvider, ScriptedSink, capture, detection_batch, quiet_config, sample_heroes,
        template, text,
    };

    fn pilot(
        config: PilotConfig,
        script: Option<Vec<Result<String, ProviderFailure>>>,
    ) -> Pilot<ScriptedProvider, ScriptedSink> {
        Pilot::new(config, script.map(ScriptedProvider::new), ScriptedSink::new())
    }

    #[test]
    fn rule_decision_is_validated_queued_and_executed() {
        let config = PilotConfig {
            heroes: sample_heroes(),
            ..quiet_config()
        };
        let mut pilot = pilot(config, None);
        let report = pilot.run_cycle(capture(detection_batch(10), Vec::new()));

        assert!(report.gaps.iter().any(|gap| gap.contains("template-match")));
        assert_eq!(report.decision.source, DecisionSource::Rule);
        assert_eq!(report.decision.action.kind(), ActionType::BuyHero);
        assert!(report.queued);
        let execution = report.execution.expect("executed");
        assert!(execution.success);
        let events = pilot.executor().input().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, InputEventKind::Click);
        assert_eq!(events[0].point.pixel(), (960, 1000));
        assert_eq!(pilot.stats().executed, 1);
        assert_eq!(pilot.ledger().spent(), 0);
    }

    #[test]
    fn degraded_decision_queues_nothing() {
        let mut config = quiet_config();
        config.external.session_budget = 0;
        let mut pilot = pilot(
            config,
            Some(vec![Ok(r#"{"action_type":"level-up"}"#.to_string())]),
        );
        let report = pilot.run_cycle(capture(
            vec![text(EntityKind::NumericField, 0, "0", 0.9)],
            Vec::new(),
        ));

        assert!(report.decision.action.is_none());
        assert_eq!(report.decision.source, DecisionSource::Hybrid);
        assert_eq!(report.decision.confidence, 0.0);
        assert!(report.external_error.is_some());
        assert!(!report.queued);
        assert!(report.execution.is_none());
        assert_eq!(
            pilot.engine().external().map(|client| client.provider().calls()),
            Some(0)
        );
        assert_eq!(pilot.stats().degraded_decisions, 1);
    }

    #[test]
    fn invalid_external_action_is_rejected() {
        let mut pilot = pilot(
            quiet_config(),
            Some(vec![Ok(
                r#"{"action_type":"sell-hero","position":{"bench":3}}"#.to_string(),
            )]),
        );
        let report = pilot.run_cycle(capture(
            vec![text(EntityKind::NumericField, 0, "0", 0.9)],
            Vec::new(),
        ));

        assert_eq!(report.decision.source, DecisionSource::External);
        assert!(report.rejection.is_some());
        assert!(!report.queued);
        assert!(pilot.queue().is_empty());
        assert_eq!(pilot.stats().rejections, 1);
        assert_eq!(pilot.ledger().spent(), 1);
    }

    #[test]
    fn failed_dispatch_is_recorded_and_loop_continues() {
        let config = PilotConfig {
            heroes: sample_heroes(),
            ..quiet_config()
        };
        let mut pilot = Pilot::<ScriptedProvider, _>::new(config, None, ScriptedSink::failing_after(0));
        let report = pilot.run_cycle(capture(detection_batch(10), Vec::new()));

        let execution = report.execution.expect("attempted");
        assert!(!execution.success);
        assert_eq!(pilot.stats().failed, 1);
        assert!(pilot.queue().is_empty());
    }

    #[test]
    fn safety_gate_keeps_action_queued() {
        let mut config = PilotConfig {
            heroes: sample_heroes(),
            ..quiet_config()
        };
        config.safety.max_actions_per_minute = 1;
        let mut pilot = pilot(config, None);

        let first = pilot.run_cycle(capture(detection_batch(10), Vec::new()));
        assert!(first.execution.is_some());
        let second = pilot.run_cycle(capture(detection_batch(10), Vec::new()));
        assert!(second.safety_blocked);
        assert!(second.execution.is_none());
        assert_eq!(pilot.queue().len(), 1);
        assert_eq!(pilot.stats().safety_blocks, 1);
    }

    #[test]
    fn out_of_bounds_detection_keeps_previous_state() {
        let mut pilot = pilot(quiet_config(), None);
        pilot.run_cycle(capture(
            vec![text(EntityKind::NumericField, 0, "7", 0.9)],
            Vec::new(),
        ));
        let version = pilot.state().version();

        let report = pilot.run_cycle(capture(
            vec![
                text(EntityKind::NumericField, 0, "9", 0.9),
                template(EntityKind::ShopSlot, 9, "Garen", 0.9),
            ],
            Vec::new(),
        ));
        assert!(report.state_error.is_some());
        assert_eq!(pilot.state().gold, 7);
        assert_eq!(pilot.state().version(), version);
        assert_eq!(pilot.stats().state_violations, 1);
    }

    #[test]
    fn surface_change_rescales_dispatch() {
        let config = PilotConfig {
            heroes: sample_heroes(),
            ..quiet_config()
        };
        let mut pilot = pilot(config, None);
        let mut frame = capture(detection_batch(10), Vec::new());
        frame.surface = Surface {
            width: 960,
            height: 540,
        };
        let report = pilot.run_cycle(frame);

        assert!(report.surface_changed);
        assert_eq!(pilot.executor().input().events()[0].point.pixel(), (480, 500));
    }

    #[test]
    fn safety_gate_window_slides() {
        let mut gate = SafetyGate::new(2);
        let start = Instant::now();
        assert!(gate.allows(start));
        gate.record(start);
        gate.record(start);
        assert!(!gate.allows(start + Duration::from_secs(59)));
        assert!(gate.allows(start + Duration::from_secs(60)));
        assert!(SafetyGate::new(0).allows(start));
    }

    fn broke_capture() -> Capture {
        capture(vec![text(EntityKind::NumericField, 0, "0", 0.9)], Vec::new())
    }

    #[test]
    fn exhausted_budget_stays_reported_across_rule_matches() {
        let mut config = PilotConfig {
            heroes: sample_heroes(),
            ..quiet_config()
        };
        config.external.session_budget = 0;
        let mut pilot = pilot(config, Some(Vec::new()));

        pilot.run_cycle(broke_capture());
        assert!(pilot.reporter.is_failing("budget_exhausted"));

        let matched = pilot.run_cycle(capture(detection_batch(10), Vec::new()));
        assert_eq!(matched.decision.source, DecisionSource::Rule);
        assert!(pilot.reporter.is_failing("budget_exhausted"));

        let again = pilot.run_cycle(broke_capture());
        assert!(again.external_error.is_some());
        assert!(!pilot.reporter.failing("budget_exhausted", "repeat"));
    }

    #[test]
    fn external_success_clears_provider_condition() {
        let mut pilot = pilot(
            quiet_config(),
            Some(vec![
                Err(ProviderFailure::Fatal("model offline".to_string())),
                Ok(r#"{"action_type":"refresh-shop"}"#.to_string()),
            ]),
        );

        pilot.run_cycle(broke_capture());
        assert!(pilot.reporter.is_failing("provider_error"));

        let report = pilot.run_cycle(broke_capture());
        assert_eq!(report.decision.source, DecisionSource::External);
        assert!(!pilot.reporter.is_failing("provider_error"));
    }
}
