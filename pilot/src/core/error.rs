//! Typed failures crossing component boundaries inside a control cycle.
//!
//! Everything here is recoverable: the cycle folds each kind into its report
//! and keeps going. I/O and CLI edges use `anyhow` instead.

use serde::Serialize;
use thiserror::Error;

use crate::core::types::{ActionType, DetectionSource, EntityKind};

/// A detector backend produced nothing for this capture.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} backend produced no detections: {reason}", backend.as_str())]
pub struct RecognitionGap {
    pub backend: DetectionSource,
    pub reason: String,
}

/// A state update was rejected; the prior snapshot is retained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("{kind} slot {index} out of bounds (capacity {capacity})")]
    SlotOutOfBounds {
        kind: EntityKind,
        index: u32,
        capacity: u32,
    },
    #[error("state invariant violated: {0}")]
    InvariantViolation(String),
}

/// Failures of the guarded external decision call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    #[error("external budget exhausted ({spent}/{budget} calls spent)")]
    BudgetExhausted { spent: u32, budget: u32 },
    #[error("external call timed out on attempt {attempt} after {elapsed_ms}ms")]
    Timeout { attempt: u32, elapsed_ms: u128 },
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("unparseable decision: {0}")]
    ParseError(String),
}

impl ExternalError {
    /// Every value `kind` can return.
    pub const KINDS: [&'static str; 4] =
        ["budget_exhausted", "timeout", "provider_error", "parse_error"];

    /// Stable classification used for once-per-condition reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BudgetExhausted { .. } => "budget_exhausted",
            Self::Timeout { .. } => "timeout",
            Self::ProviderError(_) => "provider_error",
            Self::ParseError(_) => "parse_error",
        }
    }
}

/// The validator refused an action; it is dropped, never queued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} rejected: {reason}")]
pub struct Rejection {
    pub kind: ActionType,
    pub reason: String,
}

impl Rejection {
    pub fn new(kind: ActionType, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Input dispatch failed for a queued action.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("no screen target for {0}")]
    NoTarget(String),
    #[error("input dispatch failed: {0}")]
    Dispatch(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("action queue full (capacity {capacity})")]
pub struct QueueFull {
    pub capacity: usize,
}
