//! Side-effecting edges of the pilot: config, capture, input, providers, logs.

pub mod capture;
pub mod config;
pub mod cycle_log;
pub mod input;
pub mod process;
pub mod prompt;
pub mod provider;
