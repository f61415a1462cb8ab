//! Command implementations for the Rill CLI.

pub mod compile;
pub mod display;
pub mod repl;
pub mod run;
