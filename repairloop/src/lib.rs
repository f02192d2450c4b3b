//! Round-based generate/correct/test/select loop for model-written programs.
//!
//! A session turns a natural-language requirement into a program by running
//! bounded rounds. Each round asks a generative backend for a pool of
//! candidates, self-corrects every candidate, executes them in generation
//! order inside a subprocess sandbox, and keeps the first passing candidate
//! (or the first one that ran at all). The chosen candidate's outcome is fed
//! back as text into the next round.
//!
//! The architecture keeps the same split throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (selection, transitions, history,
//!   code extraction, instruction policies). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (backend processes, the sandbox,
//!   configuration, prompt rendering, artifacts). Behind traits so tests can
//!   script them.
//!
//! Orchestration modules ([`round`], [`session`]) wire core logic to I/O.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod round;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
