//! Value representation, heap, tracing garbage collector, and handles for
//! the Rill virtual machine (spec §3 data model, §4.5, §4.6).

pub mod context;
pub mod handles;
pub mod heap;
pub mod object;
pub mod value;

pub use context::Context;
pub use handles::{Global, GlobalHandles, HandleScope, HandleStack, Local};
pub use heap::Heap;
pub use object::{GcObject, Header, ObjectKind};
pub use value::Value;
