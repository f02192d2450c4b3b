//! Stable exit codes for the `repairloop` CLI.

/// Session passed, or a sandbox check ran to completion.
pub const OK: i32 = 0;
/// Invalid input/config or an infrastructure error (missing interpreter, I/O).
pub const INVALID: i32 = 1;
/// Round budget exhausted without a passing candidate; final code still printed.
pub const EXHAUSTED: i32 = 2;
/// No program was produced (failure marker).
pub const NO_PROGRAM: i32 = 3;
