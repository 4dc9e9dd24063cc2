//! Capture sources feeding the control loop.
//!
//! A [`Capture`] bundles one screen's surface size with the output of both
//! detector backends. Either backend may fail independently; the cycle turns
//! a failed backend into a recognition gap and fuses whatever is left.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::core::coords::Surface;
use crate::core::types::RawDetection;

/// One backend's result for a capture.
pub type BackendOutput = Result<Vec<RawDetection>, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub surface: Surface,
    pub text: BackendOutput,
    pub template: BackendOutput,
}

pub trait CaptureSource {
    /// Produce the next capture, or `None` once the source is exhausted.
    fn capture(&mut self) -> Result<Option<Capture>>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FixtureBackend {
    Detections(Vec<RawDetection>),
    Failed { error: String },
}

impl Default for FixtureBackend {
    fn default() -> Self {
        Self::Detections(Vec::new())
    }
}

impl From<FixtureBackend> for BackendOutput {
    fn from(backend: FixtureBackend) -> Self {
        match backend {
            FixtureBackend::Detections(detections) => Ok(detections),
            FixtureBackend::Failed { error } => Err(error),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FixtureCapture {
    surface: Surface,
    #[serde(default)]
    text: FixtureBackend,
    #[serde(default)]
    template: FixtureBackend,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    captures: Vec<FixtureCapture>,
}

/// Replays recorded captures from a JSON fixture, in order.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    captures: VecDeque<Capture>,
}

impl ReplaySource {
    pub fn new(captures: impl IntoIterator<Item = Capture>) -> Self {
        Self {
            captures: captures.into_iter().collect(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let fixture: Fixture = serde_json::from_str(raw).context("parse capture fixture")?;
        Ok(Self::new(fixture.captures.into_iter().map(|capture| {
            Capture {
                surface: capture.surface,
                text: capture.text.into(),
                template: capture.template.into(),
            }
        })))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let source = Self::from_json(&raw).with_context(|| format!("load {}", path.display()))?;
        info!(path = %path.display(), captures = source.remaining(), "loaded capture fixture");
        Ok(source)
    }

    pub fn remaining(&self) -> usize {
        self.captures.len()
    }
}

impl CaptureSource for ReplaySource {
    fn capture(&mut self) -> Result<Option<Capture>> {
        let next = self.captures.pop_front();
        if next.is_none() {
            debug!("capture fixture exhausted");
        }
        Ok(next)
    }
}
