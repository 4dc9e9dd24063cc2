//! Diagnostic tracing for the pilot.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: per-cycle diagnostics via `RUST_LOG`, output
//!   to stderr. Not persisted.
//!
//! - **Cycle log (`io/cycle_log`)**: one JSON line per cycle when configured.
//!   Unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `pilot=info,warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=pilot=debug pilot replay --fixture captures.json
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pilot=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
