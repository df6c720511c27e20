//! Stable exit codes for the CLI.

/// Tests passed (or the command succeeded).
pub const OK: i32 = 0;
/// Tests failed.
pub const FAILED: i32 = 1;
/// Command-line usage error.
pub const USAGE: i32 = 2;
/// GraphWalker failed to start, crashed, or answered with an error.
pub const GENERATOR: i32 = 3;
/// Runner internal error, including model validation.
pub const INTERNAL: i32 = 4;
