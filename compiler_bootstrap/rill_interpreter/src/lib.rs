//! Bytecode execution: call frames and the dispatch loop over compiled
//! modules (spec §3 "Coroutine", §4.7, §4.8).
//!
//! `rill_memory` owns the object model and heap; `rill_scheduler` owns the
//! ready queue. This crate is the third leg: it walks a coroutine's frame
//! stack against a `rill_ir::bytecode::Function`'s code buffer, producing
//! and consuming the other two crates' types.

pub mod frame;
pub mod interpreter;

pub use frame::Frame;
pub use interpreter::Interpreter;
