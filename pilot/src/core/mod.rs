//! Deterministic, pure logic for the perception-to-action pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod coords;
pub mod error;
pub mod fusion;
pub mod response;
pub mod rules;
pub mod state;
pub mod types;
pub mod validator;
