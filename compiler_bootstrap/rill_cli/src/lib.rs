//! Library surface of the `rill` CLI, exposed separately from `main.rs`
//! so integration tests can drive individual commands without spawning
//! a subprocess.

pub mod commands;
pub mod config;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
