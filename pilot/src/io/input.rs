//! Input sinks: where normalized touch events end up.
//!
//! [`InputSink`] decouples the executor from the device backend. The dry-run
//! [`LogSink`] only logs and records; tests use scripted sinks that fail on
//! demand.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::core::coords::DevicePoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputEventKind {
    Click,
    DragStart,
    DragEnd,
    Text,
}

impl InputEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::DragStart => "drag-start",
            Self::DragEnd => "drag-end",
            Self::Text => "text",
        }
    }
}

/// One device-level input event, in device pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputEvent {
    pub kind: InputEventKind,
    pub point: DevicePoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl InputEvent {
    pub fn click(point: DevicePoint) -> Self {
        Self {
            kind: InputEventKind::Click,
            point,
            duration: None,
            text: None,
        }
    }

    pub fn drag_start(point: DevicePoint, duration: Duration) -> Self {
        Self {
            kind: InputEventKind::DragStart,
            point,
            duration: Some(duration),
            text: None,
        }
    }

    pub fn drag_end(point: DevicePoint) -> Self {
        Self {
            kind: InputEventKind::DragEnd,
            point,
            duration: None,
            text: None,
        }
    }
}

pub trait InputSink {
    fn dispatch(&mut self, event: &InputEvent) -> Result<()>;
}

impl<S: InputSink + ?Sized> InputSink for Box<S> {
    fn dispatch(&mut self, event: &InputEvent) -> Result<()> {
        (**self).dispatch(event)
    }
}

/// Dry-run sink: logs every event and keeps them for inspection.
#[derive(Debug, Default)]
pub struct LogSink {
    events: Vec<InputEvent>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[InputEvent] {
        &self.events
    }
}

impl InputSink for LogSink {
    fn dispatch(&mut self, event: &InputEvent) -> Result<()> {
        let (x, y) = event.point.pixel();
        info!(
            kind = event.kind.as_str(),
            x,
            y,
            duration_ms = event.duration.map(|duration| duration.as_millis() as u64),
            "dry-run input"
        );
        self.events.push(event.clone());
        Ok(())
    }
}
