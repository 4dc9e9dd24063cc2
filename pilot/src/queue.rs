//! Bounded action queue and the executor that turns actions into input.
//!
//! Validated actions wait in a FIFO; the control cycle pops one per cycle and
//! hands it to the [`Executor`]. The executor maps the action to a gesture on
//! the logical layout, jitters timing and tap position, normalizes to device
//! pixels and dispatches through an [`InputSink`].

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::coords::{CoordinateNormalizer, Gesture, Layout, LogicalPoint};
use crate::core::error::{ExecutionError, QueueFull};
use crate::core::types::{Action, ActionType};
use crate::io::config::ExecutionConfig;
use crate::io::input::{InputEvent, InputSink};

#[derive(Debug, Clone)]
pub struct ActionQueue {
    items: VecDeque<Action>,
    capacity: usize,
}

impl ActionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `action`; on a full queue the action is dropped.
    pub fn push(&mut self, action: Action) -> Result<(), QueueFull> {
        if self.items.len() >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
            });
        }
        self.items.push_back(action);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Action> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&Action> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Result of executing one queued action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub action: ActionType,
    pub success: bool,
    /// Input events dispatched before success or failure.
    pub events: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

pub struct Executor<I> {
    input: I,
    layout: Layout,
    config: ExecutionConfig,
    rng: StdRng,
    history: VecDeque<ExecutionOutcome>,
}

impl<I: InputSink> Executor<I> {
    pub fn new(input: I, layout: Layout, config: ExecutionConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            input,
            layout,
            config,
            rng,
            history: VecDeque::new(),
        }
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    /// Most recent outcomes, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &ExecutionOutcome> {
        self.history.iter()
    }

    #[instrument(skip_all, fields(action = action.kind().as_str()))]
    pub fn execute(&mut self, action: &Action, normalizer: &CoordinateNormalizer) -> ExecutionOutcome {
        let mut events = 0;
        let result = self.perform(action, normalizer, &mut events);
        let outcome = ExecutionOutcome {
            action: action.kind(),
            success: result.is_ok(),
            events,
            error: result.err(),
        };
        match &outcome.error {
            None => info!(events, "action executed"),
            Some(err) => warn!(%err, events, "action failed"),
        }
        self.record(outcome.clone());
        outcome
    }

    fn perform(
        &mut self,
        action: &Action,
        normalizer: &CoordinateNormalizer,
        events: &mut usize,
    ) -> Result<(), ExecutionError> {
        let planned = match self.layout.gesture(action)? {
            Gesture::Tap(point) => {
                vec![InputEvent::click(normalizer.to_device(self.nudge(point)))]
            }
            Gesture::Drag { from, to } => vec![
                InputEvent::drag_start(
                    normalizer.to_device(self.nudge(from)),
                    Duration::from_millis(self.config.drag_duration_ms),
                ),
                InputEvent::drag_end(normalizer.to_device(self.nudge(to))),
            ],
        };
        for event in &planned {
            self.pause();
            self.input
                .dispatch(event)
                .map_err(|err| ExecutionError::Dispatch(format!("{err:#}")))?;
            *events += 1;
        }
        Ok(())
    }

    fn pause(&mut self) {
        let delay = self
            .rng
            .gen_range(self.config.jitter_min_ms..=self.config.jitter_max_ms);
        debug!(delay_ms = delay, "input delay");
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
    }

    fn nudge(&mut self, point: LogicalPoint) -> LogicalPoint {
        let dx = i64::from(self.config.pixel_jitter_x);
        let dy = i64::from(self.config.pixel_jitter_y);
        point.offset(
            self.rng.gen_range(-dx..=dx) as f64,
            self.rng.gen_range(-dy..=dy) as f64,
        )
    }

    fn record(&mut self, outcome: ExecutionOutcome) {
        if self.config.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.config.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(outcome);
    }
}
