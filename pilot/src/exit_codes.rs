//! Stable exit codes for pilot CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, unreadable fixture, or any other error.
pub const INVALID: i32 = 1;
/// `pilot replay` finished with the external call budget spent.
pub const BUDGET_EXHAUSTED: i32 = 2;
/// `pilot replay` was interrupted twice and did not finish its cycle.
pub const INTERRUPTED: i32 = 130;
