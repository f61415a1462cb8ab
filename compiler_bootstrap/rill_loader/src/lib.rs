//! Module loading, import resolution and the host embedding ABI (spec
//! §4.9, §6).

pub mod compiler;
pub mod host;
pub mod module;

pub use compiler::compile_source;
pub use host::{CompletionCallback, Host};
pub use module::load_module;
