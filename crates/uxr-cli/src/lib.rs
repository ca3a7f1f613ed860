//! The operator entrypoint for running and inspecting UX research studies
//! from the command line. Thin by design: argument parsing and wiring only,
//! the actual logic lives in `uxr-orchestrator`, `uxr-queue`, and `uxr-store`.

pub mod backend;
pub mod cli;

pub use cli::{run, Cli, Command};
