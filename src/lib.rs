//! Model-based test runner.
//!
//! A run wires three collaborators together: a [`planner::Planner`] that
//! supplies steps (either live from a GraphWalker subprocess or replayed from
//! a recorded path), an [`executor::Executor`] that dispatches each step to
//! the test code over HTTP, and a set of [`reporter::Reporter`]s that observe
//! progress. The [`walker::Walker`] owns the loop and the fixture protocol.

pub mod config;
pub mod error;
pub mod executor;
pub mod exit_codes;
pub mod graphwalker;
pub mod logging;
pub mod model;
pub mod planner;
pub mod process;
pub mod reporter;
pub mod run;
pub mod steps;
pub mod test_support;
pub mod validate;
pub mod verify;
pub mod walker;
