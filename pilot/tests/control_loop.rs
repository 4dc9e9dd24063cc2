//! Loop-level tests driving full control cycles through scripted edges.
//!
//! Each scenario wires a [`Pilot`] to a capture source, an optional scripted
//! reasoning provider and a recording input sink, then checks what reached
//! the input layer and what the session statistics say.

use std::fs;
use std::time::Duration;

use serde_json::json;

use pilot::core::types::{ActionType, DecisionSource, EntityKind};
use pilot::cycle::Pilot;
use pilot::io::capture::ReplaySource;
use pilot::io::config::PilotConfig;
use pilot::io::cycle_log::CycleLog;
use pilot::io::input::InputEventKind;
use pilot::io::provider::ProviderFailure;
use pilot::looping::{CancelToken, LoopConfig, LoopStop, run_loop};
use pilot::test_support::{
    ScriptedCapture, ScriptedProvider, ScriptedSink, capture, quiet_config, sample_heroes, template,
    text, write_fixture,
};

fn loop_config(max_cycles: Option<u64>) -> LoopConfig {
    LoopConfig {
        interval: Duration::from_millis(1),
        max_cycles,
        max_runtime: None,
    }
}

fn prep_capture(gold: u32) -> serde_json::Value {
    json!({
        "surface": {"width": 1280, "height": 720},
        "text": [
            {"kind": "numeric-field", "slot_index": 0, "label": gold.to_string(), "confidence": 0.95, "source": "text-extraction"}
        ],
        "template": [
            {"kind": "phase-banner", "slot_index": 0, "label": "preparation", "confidence": 0.9, "source": "template-match"},
            {"kind": "shop-slot", "slot_index": 2, "label": "Leona", "confidence": 0.9, "source": "template-match"},
            {"kind": "synergy-badge", "slot_index": 0, "label": "Knight:1", "confidence": 0.9, "source": "template-match"}
        ]
    })
}

/// Replayed preparation screen: 10 gold, an active Knight synergy and a
/// 3-cost Knight in shop slot 2.
///
/// Expected: the synergy rule buys slot 2 without any external call, the
/// validator accepts it, and exactly one click lands on the shop-slot-2
/// center scaled from 1920x1080 to 1280x720.
#[test]
fn replayed_rule_buy_reaches_input_layer() {
    let (_dir, path) = write_fixture(vec![prep_capture(10)]).expect("fixture");
    let mut source = ReplaySource::from_path(&path).expect("source");
    let config = PilotConfig {
        heroes: sample_heroes(),
        ..quiet_config()
    };
    let mut pilot = Pilot::new(config, Some(ScriptedProvider::new(Vec::new())), ScriptedSink::new());
    let mut reports = Vec::new();

    let outcome = run_loop(
        &mut pilot,
        &mut source,
        &loop_config(None),
        &CancelToken::new(),
        |report| reports.push(report.clone()),
    );

    assert_eq!(outcome.stop, LoopStop::CaptureExhausted);
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.decision.source, DecisionSource::Rule);
    assert_eq!(report.decision.action.kind(), ActionType::BuyHero);
    assert_eq!(report.decision.action.target(), Some("Leona"));
    assert!(report.gaps.is_empty());

    let events = pilot.executor().input().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, InputEventKind::Click);
    assert_eq!(events[0].point.pixel(), (640, 667));

    assert_eq!(outcome.stats.rule_decisions, 1);
    assert_eq!(outcome.stats.executed, 1);
    assert_eq!(pilot.ledger().spent(), 0);
    assert_eq!(
        pilot.engine().external().map(|client| client.provider().calls()),
        Some(0)
    );
}

/// No rule matches (refresh disabled, nothing useful in the shop) and the
/// session budget allows one external call.
///
/// Cycle 1: the provider answers buy-experience; it is validated and tapped.
/// Cycles 2-3: the budget is spent, so the engine degrades to inaction
/// without calling the provider again and nothing more is dispatched.
#[test]
fn external_budget_caps_escalation() {
    let mut config = quiet_config();
    config.disabled_rules = vec!["refresh_for_upgrades".to_string()];
    config.external.session_budget = 1;
    let provider = ScriptedProvider::new(vec![
        Ok(r#"{"action_type":"buy-experience","reasoning":"push level"}"#.to_string()),
        Ok(r#"{"action_type":"level-up"}"#.to_string()),
    ]);
    let mut pilot = Pilot::new(config, Some(provider), ScriptedSink::new());
    let mut source = ScriptedCapture::repeating(capture(
        vec![text(EntityKind::NumericField, 0, "8", 0.95)],
        vec![template(EntityKind::PhaseBanner, 0, "preparation", 0.9)],
    ));
    let mut sources = Vec::new();

    let outcome = run_loop(
        &mut pilot,
        &mut source,
        &loop_config(Some(3)),
        &CancelToken::new(),
        |report| sources.push((report.decision.source, report.decision.action.kind())),
    );

    assert_eq!(outcome.stop, LoopStop::MaxCycles);
    assert_eq!(
        sources,
        vec![
            (DecisionSource::External, ActionType::BuyExperience),
            (DecisionSource::Hybrid, ActionType::None),
            (DecisionSource::Hybrid, ActionType::None),
        ]
    );
    assert_eq!(
        pilot.engine().external().map(|client| client.provider().calls()),
        Some(1)
    );
    assert_eq!(outcome.stats.budget_spent, 1);
    assert_eq!(outcome.stats.external_decisions, 1);
    assert_eq!(outcome.stats.degraded_decisions, 2);

    let events = pilot.executor().input().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].point.pixel(), (200, 930));
}

/// A dead template matcher is a recognition gap every cycle, but the text
/// backend still carries enough to act; transient provider failures are
/// retried within the same call.
#[test]
fn loop_survives_backend_gap_and_transient_provider_failures() {
    let mut config = quiet_config();
    config.disabled_rules = vec!["refresh_for_upgrades".to_string()];
    config.external.max_retries = 2;
    let provider = ScriptedProvider::new(vec![
        Err(ProviderFailure::Transient("overloaded".to_string())),
        Ok("```json\n{\"action_type\":\"none\",\"reasoning\":\"save gold\"}\n```".to_string()),
    ]);
    let mut pilot = Pilot::new(config, Some(provider), ScriptedSink::new());
    let mut dead_template = capture(
        vec![text(EntityKind::NumericField, 0, "3", 0.95)],
        Vec::new(),
    );
    dead_template.template = Err("matcher crashed".to_string());
    let mut source = ScriptedCapture::repeating(dead_template);
    let mut reports = Vec::new();

    let outcome = run_loop(
        &mut pilot,
        &mut source,
        &loop_config(Some(2)),
        &CancelToken::new(),
        |report| reports.push(report.clone()),
    );

    assert_eq!(outcome.stats.recognition_gaps, 2);
    assert!(reports[0].gaps[0].contains("matcher crashed"));
    assert_eq!(pilot.state().gold, 3);
    assert_eq!(reports[0].decision.source, DecisionSource::External);
    assert_eq!(reports[0].decision.reasoning.as_deref(), Some("save gold"));
    assert!(pilot.executor().input().events().is_empty());
    assert_eq!(pilot.ledger().spent(), 3);
}

/// Every cycle of a replay lands in the JSONL cycle log.
#[test]
fn cycle_log_records_each_cycle() {
    let (dir, path) =
        write_fixture(vec![prep_capture(10), prep_capture(7), prep_capture(4)]).expect("fixture");
    let mut source = ReplaySource::from_path(&path).expect("source");
    let config = PilotConfig {
        heroes: sample_heroes(),
        ..quiet_config()
    };
    let mut pilot = Pilot::<ScriptedProvider, _>::new(config, None, ScriptedSink::new());
    let log_path = dir.path().join("cycles.jsonl");
    let mut log = CycleLog::create(&log_path).expect("log");

    let outcome = run_loop(
        &mut pilot,
        &mut source,
        &loop_config(None),
        &CancelToken::new(),
        |report| log.append(report).expect("append"),
    );
    assert_eq!(outcome.stats.cycles, 3);

    let contents = fs::read_to_string(&log_path).expect("read log");
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["cycle"], 1);
    assert_eq!(lines[0]["decision"]["source"], "rule");
    assert_eq!(lines[2]["cycle"], 3);
}
