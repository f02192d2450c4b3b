//! Deterministic, pure logic shared by the round controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.
//! The only exception is the epsilon-greedy policy, whose randomness is
//! injected as an `Rng` so tests can seed it.

pub mod extract;
pub mod feedback;
pub mod history;
pub mod policy;
pub mod selection;
pub mod transition;
pub mod types;
