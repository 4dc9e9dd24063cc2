//! Perception → decision → execution control loop for an auto-battler.
//!
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (fusion, state folding, rules,
//!   validation, coordinates, response parsing). No I/O.
//! - **[`io`]**: Side-effecting edges (config, capture sources, input sinks,
//!   reasoning providers, cycle log). Behind traits so tests can script them.
//!
//! [`decision`], [`queue`] and [`cycle`] compose the two into one control
//! cycle; [`looping`] repeats it until a stop condition.

pub mod core;
pub mod cycle;
pub mod decision;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod queue;
pub mod reporter;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
