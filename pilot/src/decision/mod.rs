//! Decision making: deterministic rules with a guarded external fallback.

pub mod guarded;
pub mod hybrid;
