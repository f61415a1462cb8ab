//! `rill compile`: runs the pipeline up to (but not past) bytecode
//! emission, optionally printing an intermediate form instead of writing
//! a module (spec §6 CLI contract: "compile-only with AST/IR/bytecode
//! dumps").

use std::path::Path;

use anyhow::{Context, Result};
use rill_common::{Diagnostic, StringTable};
use rill_parser::Parser;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dump {
    Ast,
    Ir,
    Bytecode,
}

/// Prints `errors` either as one JSON array (`--json-diagnostics`, for
/// editor/CI tooling) or as one human-readable line per diagnostic.
fn report_errors(errors: impl Iterator<Item = impl std::fmt::Display>, json: bool, raw: &[Diagnostic]) {
    if json {
        match serde_json::to_string(raw) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("failed to serialize diagnostics: {err}"),
        }
    } else {
        for diag in errors {
            eprintln!("{diag}");
        }
    }
}

/// Returns the process exit code: `0` on success, `1` if any compiler
/// stage reports an error (spec §7: "never emits bytecode if any error
/// was reported").
pub fn execute(path: &Path, dump: Option<Dump>, json_diagnostics: bool) -> Result<i32> {
    let source = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let module_name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("main").to_string();
    let mut strings = StringTable::new();

    let program = match Parser::parse_source(&source, 0, &mut strings) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{err}");
            return Ok(1);
        }
    };
    if dump == Some(Dump::Ast) {
        println!("{program:#?}");
        return Ok(0);
    }

    let tables = rill_sema::analyze(&program);
    if tables.diagnostics.has_errors() {
        let errors: Vec<Diagnostic> = tables.diagnostics.errors().cloned().collect();
        report_errors(errors.iter(), json_diagnostics, &errors);
        return Ok(1);
    }

    let name = strings.intern(&module_name);
    let (module, diagnostics) = rill_ir::build_module(&program, &tables, &mut strings, name);
    if diagnostics.has_errors() {
        let errors: Vec<Diagnostic> = diagnostics.errors().cloned().collect();
        report_errors(errors.iter(), json_diagnostics, &errors);
        return Ok(1);
    }
    if !module.valid {
        eprintln!("internal error: module construction failed validation");
        return Ok(1);
    }
    if dump == Some(Dump::Ir) {
        println!("{module:#?}");
        return Ok(0);
    }

    let bytecode_module = rill_ir::emit::emit_module(&module);
    match dump {
        Some(Dump::Bytecode) => println!("{bytecode_module:#?}"),
        _ => println!("compiled {module_name}: {} members", bytecode_module.members.len()),
    }
    Ok(0)
}
