//! Strict decoding of reasoning-provider responses into decisions.
//!
//! A response must contain one JSON object that validates against the
//! decision schema. Anything that does not decode cleanly into a known action
//! with structurally valid positions is rejected, never guessed at.

use std::sync::LazyLock;

use jsonschema::Draft;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::types::{Action, ActionType, DecisionResult, DecisionSource, Position};

pub const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced json regex should be valid")
});

#[derive(Debug, Deserialize)]
struct WireDecision {
    action_type: ActionType,
    target: Option<String>,
    position: Option<WirePosition>,
    destination: Option<WirePosition>,
    reasoning: Option<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum WirePosition {
    Shop { shop: u8 },
    Bench { bench: u8 },
    Board { row: u8, col: u8 },
}

impl From<WirePosition> for Position {
    fn from(wire: WirePosition) -> Self {
        match wire {
            WirePosition::Shop { shop } => Position::Shop { slot: shop },
            WirePosition::Bench { bench } => Position::Bench { index: bench },
            WirePosition::Board { row, col } => Position::Board { row, col },
        }
    }
}

/// Parse a raw provider response into an external decision.
///
/// `default_confidence` applies when the provider reports none.
pub fn parse_decision(raw: &str, default_confidence: f64) -> Result<DecisionResult, String> {
    let (json, start, end) = extract_json(raw).ok_or("response contains no JSON object")?;
    let value: Value =
        serde_json::from_str(json).map_err(|err| format!("invalid JSON: {err}"))?;
    validate_schema(&value)?;
    let wire: WireDecision =
        serde_json::from_value(value).map_err(|err| format!("decode decision: {err}"))?;

    let kind = wire.action_type;
    let position = wire.position.map(Position::from);
    let destination = wire.destination.map(Position::from);
    check_structure(kind, position, destination)?;

    let confidence = wire.confidence.unwrap_or(default_confidence);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {confidence} outside [0, 1]"));
    }

    let reasoning = wire.reasoning.or_else(|| {
        let outside = format!("{} {}", &raw[..start], &raw[end..]);
        let outside = outside.replace("```json", "").replace("```", "");
        let outside = outside.trim();
        (!outside.is_empty()).then(|| outside.to_string())
    });

    let target = wire.target.filter(|target| !target.trim().is_empty());
    Ok(DecisionResult {
        action: Action::from_parts(kind, target, position, destination),
        source: DecisionSource::External,
        confidence,
        reasoning,
    })
}

/// Locate the JSON object: a fenced block first, otherwise the outermost
/// brace span. Returns the slice and its byte range in `raw`.
fn extract_json(raw: &str) -> Option<(&str, usize, usize)> {
    if let Some(caps) = FENCED_JSON.captures(raw)
        && let Some(body) = caps.get(1)
    {
        return Some((body.as_str(), body.start(), body.end()));
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')? + 1;
    (start < end).then(|| (&raw[start..end], start, end))
}

fn validate_schema(instance: &Value) -> Result<(), String> {
    let schema: Value = serde_json::from_str(DECISION_SCHEMA)
        .map_err(|err| format!("parse decision schema: {err}"))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| format!("compile decision schema: {err}"))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(format!("schema validation failed: {}", messages.join("; ")));
    }
    Ok(())
}

fn check_structure(
    kind: ActionType,
    position: Option<Position>,
    destination: Option<Position>,
) -> Result<(), String> {
    let on_field = |position: Option<Position>| {
        matches!(
            position,
            Some(Position::Board { .. } | Position::Bench { .. })
        )
    };
    match kind {
        ActionType::BuyHero if !matches!(position, Some(Position::Shop { .. })) => {
            Err("buy-hero requires a shop position".to_string())
        }
        ActionType::SellHero if !on_field(position) => {
            Err("sell-hero requires a board or bench position".to_string())
        }
        ActionType::MoveHero if !on_field(position) || !on_field(destination) => {
            Err("move-hero requires board or bench position and destination".to_string())
        }
        _ => Ok(()),
    }
}
