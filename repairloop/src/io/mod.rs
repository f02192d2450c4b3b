//! Side-effecting operations: child processes, the sandbox, backends,
//! configuration, prompt rendering, and session artifacts.

pub mod artifacts;
pub mod backend;
pub mod config;
pub mod process;
pub mod prompt;
pub mod roles;
pub mod sandbox;
