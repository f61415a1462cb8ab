//! SSA-form intermediate representation, construction, required passes,
//! register allocation, and bytecode emission for the Rill compiler
//! back end (spec §3, §4.1–§4.4).

pub mod bytecode;
pub mod builder;
pub mod dominators;
pub mod emit;
pub mod ir;
pub mod passes;
pub mod regalloc;

pub use builder::build_module;
pub use ir::*;
