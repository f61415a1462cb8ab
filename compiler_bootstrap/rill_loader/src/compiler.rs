//! Source-to-bytecode compilation pipeline: the "compiler accepts a
//! source string and produces a compiled module" half of the host ABI
//! (spec §6a).
//!
//! Front end (lex/parse) is `rill_lexer`/`rill_parser`; `rill_parser`
//! drives the lexer internally, so only `Parser::parse_source` is
//! called here. `rill_ir::emit::emit_function` already runs every
//! required IR pass (critical-edge splitting, CSSA construction, dead
//! code elimination) and register allocation per function, so this
//! pipeline is: parse -> resolve -> build IR module -> emit bytecode.

use rill_common::{RillError, RillResult, StringTable};
use rill_ir::bytecode;
use rill_parser::Parser;

/// Compiles `source` to a bytecode module named `module_name`, interning
/// every identifier and literal through `strings` (the caller's
/// [`Context::strings`](rill_memory::Context), so member string payloads
/// share handles with the running VM once loaded).
///
/// `file_id` is the source file identifier threaded into parse errors and
/// diagnostic spans; callers compiling from a single in-memory buffer
/// (the REPL, `rill run`) can pass `0`.
pub fn compile_source(source: &str, file_id: u32, module_name: &str, strings: &mut StringTable) -> RillResult<bytecode::Module> {
    let program = Parser::parse_source(source, file_id, strings)?;

    let tables = rill_sema::analyze(&program);
    if tables.diagnostics.has_errors() {
        return Err(RillError::semantic_error(diagnostics_summary(&tables.diagnostics)));
    }

    let name = strings.intern(module_name);
    let (module, diagnostics) = rill_ir::build_module(&program, &tables, strings, name);
    if diagnostics.has_errors() {
        return Err(RillError::codegen_error(diagnostics_summary(&diagnostics)));
    }
    if !module.valid {
        return Err(RillError::codegen_error("module construction failed validation"));
    }

    Ok(rill_ir::emit::emit_module(&module))
}

fn diagnostics_summary(diagnostics: &rill_common::Diagnostics) -> String {
    diagnostics.errors().map(|d| d.message().to_string()).collect::<Vec<_>>().join("; ")
}
