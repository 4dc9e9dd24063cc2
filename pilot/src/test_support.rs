//! Deterministic builders and scripted fakes shared by unit and integration
//! tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::coords::REFERENCE;
use crate::core::state::GameState;
use crate::core::types::{
    DetectionSource, EntityKind, Hero, HeroCatalog, Phase, Position, RawDetection,
    RecognizedEntity, ShopOffer, Unit,
};
use crate::io::capture::{Capture, CaptureSource};
use crate::io::config::{ExecutionConfig, PilotConfig};
use crate::io::input::{InputEvent, InputSink};
use crate::io::provider::{ProviderFailure, ReasoningProvider, ReasoningRequest};

pub fn detection(
    kind: EntityKind,
    slot_index: u32,
    label: &str,
    confidence: f64,
    source: DetectionSource,
) -> RawDetection {
    RawDetection {
        kind,
        slot_index,
        label: label.to_string(),
        confidence,
        source,
    }
}

pub fn text(kind: EntityKind, slot_index: u32, label: &str, confidence: f64) -> RawDetection {
    detection(
        kind,
        slot_index,
        label,
        confidence,
        DetectionSource::TextExtraction,
    )
}

pub fn template(kind: EntityKind, slot_index: u32, label: &str, confidence: f64) -> RawDetection {
    detection(
        kind,
        slot_index,
        label,
        confidence,
        DetectionSource::TemplateMatch,
    )
}

/// Detections taken as already fused, in batch order.
pub fn entities(batch: Vec<RawDetection>) -> Vec<RecognizedEntity> {
    batch
        .into_iter()
        .map(RecognizedEntity::from_detection)
        .collect()
}

pub fn sample_heroes() -> Vec<Hero> {
    [
        ("Garen", 1, &["Knight"][..]),
        ("Poppy", 1, &["Knight"][..]),
        ("Annie", 2, &["Mage"][..]),
        ("Lux", 3, &["Mage"][..]),
        ("Leona", 3, &["Knight"][..]),
        ("Ahri", 4, &["Mage", "Spirit"][..]),
    ]
    .into_iter()
    .map(|(name, cost, synergies)| Hero {
        name: name.to_string(),
        cost,
        synergies: synergies.iter().map(|synergy| synergy.to_string()).collect(),
    })
    .collect()
}

pub fn sample_catalog() -> HeroCatalog {
    HeroCatalog::new(sample_heroes())
}

/// Preparation phase, level 1, full hp, empty shop, board and bench.
pub fn prep_state(gold: u32) -> GameState {
    let mut state = GameState::default();
    state.phase = Phase::Preparation;
    state.gold = gold;
    state
}

pub fn offer(name: &str, cost: u32, synergies: &[&str]) -> ShopOffer {
    ShopOffer {
        name: name.to_string(),
        cost,
        synergies: synergies.iter().map(|synergy| synergy.to_string()).collect(),
    }
}

fn unit(name: &str, position: Position) -> Unit {
    Unit {
        hero: sample_catalog().resolve(name),
        position,
    }
}

pub fn bench_unit(name: &str, index: u8) -> Unit {
    unit(name, Position::Bench { index })
}

pub fn board_unit(name: &str, row: u8, col: u8) -> Unit {
    unit(name, Position::Board { row, col })
}

/// One capture on the reference surface.
pub fn capture(text: Vec<RawDetection>, template: Vec<RawDetection>) -> Capture {
    Capture {
        surface: REFERENCE,
        text: Ok(text),
        template: Ok(template),
    }
}

/// A preparation-phase screen: `gold` gold, an active Knight synergy and a
/// 3-cost Knight (Leona) in shop slot 2.
pub fn detection_batch(gold: u32) -> Vec<RawDetection> {
    vec![
        text(EntityKind::NumericField, 0, &gold.to_string(), 0.95),
        template(EntityKind::ShopSlot, 2, "Leona", 0.9),
        template(EntityKind::SynergyBadge, 0, "Knight:1", 0.9),
    ]
}

/// Execution without timing or pixel jitter.
pub fn still_execution() -> ExecutionConfig {
    ExecutionConfig {
        jitter_min_ms: 0,
        jitter_max_ms: 0,
        pixel_jitter_x: 0,
        pixel_jitter_y: 0,
        seed: Some(1),
        ..ExecutionConfig::default()
    }
}

/// Config that never sleeps: no jitter, no backoff, 1ms cycle interval.
pub fn quiet_config() -> PilotConfig {
    let mut config = PilotConfig {
        execution: still_execution(),
        ..PilotConfig::default()
    };
    config.cycle.interval_ms = 1;
    config.external.backoff_ms = 0;
    config
}

/// Returns scripted results in order; fails fatally once the script runs out.
pub struct ScriptedProvider {
    script: RefCell<VecDeque<Result<String, ProviderFailure>>>,
    requests: RefCell<Vec<String>>,
    calls: Cell<usize>,
    delay: Duration,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<String, ProviderFailure>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
            calls: Cell::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Prompts received, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl ReasoningProvider for ScriptedProvider {
    fn complete(&self, request: &ReasoningRequest) -> Result<String, ProviderFailure> {
        self.calls.set(self.calls.get() + 1);
        self.requests.borrow_mut().push(request.prompt.clone());
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderFailure::Fatal("script exhausted".to_string())))
    }
}

/// Records events; optionally fails every dispatch after the first `n`.
#[derive(Debug, Default)]
pub struct ScriptedSink {
    events: Vec<InputEvent>,
    fail_after: Option<usize>,
    attempts: usize,
}

impl ScriptedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(dispatches: usize) -> Self {
        Self {
            fail_after: Some(dispatches),
            ..Self::default()
        }
    }

    pub fn events(&self) -> &[InputEvent] {
        &self.events
    }
}

impl InputSink for ScriptedSink {
    fn dispatch(&mut self, event: &InputEvent) -> Result<()> {
        self.attempts += 1;
        if let Some(limit) = self.fail_after
            && self.attempts > limit
        {
            bail!("device disconnected");
        }
        self.events.push(event.clone());
        Ok(())
    }
}

/// Capture source over a fixed script; `Err` entries surface as capture
/// errors. Optionally repeats its last capture forever.
pub struct ScriptedCapture {
    script: VecDeque<Result<Capture, String>>,
    repeat_last: Option<Capture>,
    taken: usize,
}

impl ScriptedCapture {
    pub fn new(script: Vec<Result<Capture, String>>) -> Self {
        Self {
            script: script.into(),
            repeat_last: None,
            taken: 0,
        }
    }

    pub fn repeating(capture: Capture) -> Self {
        Self {
            script: VecDeque::new(),
            repeat_last: Some(capture),
            taken: 0,
        }
    }

    pub fn taken(&self) -> usize {
        self.taken
    }
}

impl CaptureSource for ScriptedCapture {
    fn capture(&mut self) -> Result<Option<Capture>> {
        let next = match self.script.pop_front() {
            Some(Ok(capture)) => Some(capture),
            Some(Err(message)) => {
                self.taken += 1;
                return Err(anyhow!(message));
            }
            None => self.repeat_last.clone(),
        };
        if next.is_some() {
            self.taken += 1;
        }
        Ok(next)
    }
}

/// Write a replay fixture holding `captures` into a fresh temp dir.
pub fn write_fixture(captures: Vec<Value>) -> Result<(TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create fixture dir")?;
    let path = dir.path().join("captures.json");
    let body = serde_json::json!({ "captures": captures });
    let raw = serde_json::to_string_pretty(&body).context("serialize fixture")?;
    fs::write(&path, raw).with_context(|| format!("write {}", path.display()))?;
    Ok((dir, path))
}
