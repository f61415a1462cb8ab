//! `rill repl`: reads one line at a time, compiles it as a throwaway
//! module exporting a single function, invokes that function, and prints
//! its result (spec §6 CLI contract: "REPL"). Each line gets its own
//! module so declarations in one line can reference module state
//! established by an earlier one without re-compiling history.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use rill_common::StringTable;
use rill_loader::Host;
use rill_memory::object::CoroutineState;

use crate::commands::display::display_value;

pub fn execute() -> Result<i32> {
    let mut host = Host::new();
    let stdin = io::stdin();
    let mut line_no = 0u32;

    print!("rill> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            print!("rill> ");
            io::stdout().flush().ok();
            continue;
        }
        line_no += 1;
        let module_name = format!("repl_{line_no}");

        // Try the line as a bare expression first (the common case:
        // `1 + 2`), falling back to a full statement body for
        // declarations and control flow that aren't expressions.
        let as_expr = format!("export func __entry() {{ return ({trimmed}); }}");
        let as_stmts = format!("export func __entry() {{ {trimmed} }}");

        let source = if parses(&as_expr) { as_expr } else { as_stmts };
        match run_one(&mut host, &source, &module_name) {
            Ok(Some(value)) => println!("{value}"),
            Ok(None) => {}
            Err(message) => eprintln!("{message}"),
        }

        print!("rill> ");
        io::stdout().flush().ok();
    }
    println!();
    Ok(0)
}

fn parses(source: &str) -> bool {
    let mut strings = StringTable::new();
    rill_parser::Parser::parse_source(source, 0, &mut strings).is_ok()
}

/// Compiles and runs `source`, returning the printed result (`None` for
/// `null`, matching "empty function body returns `null`" not being worth
/// echoing back at every REPL prompt) or an error message.
fn run_one(host: &mut Host, source: &str, module_name: &str) -> Result<Option<String>, String> {
    let module = host.compile(source, module_name).map_err(|e| e.to_string())?;
    host.load(&module).map_err(|e| e.to_string())?;
    let entry = host.lookup_export(module_name, "__entry").expect("compiled module always exports __entry");
    let coroutine = host.invoke(entry, &[]).map_err(|e| e.to_string())?;
    while host.has_ready() {
        host.run_ready().map_err(|e| e.to_string())?;
    }
    let co = unsafe { rill_memory::object::Coroutine::from_value(coroutine) };
    match co.state.get() {
        CoroutineState::Done if co.failed.get() => Err(format!("panic: {}", display_value(co.result.get(), &host.context().strings))),
        CoroutineState::Done if co.result.get().is_null() => Ok(None),
        CoroutineState::Done => Ok(Some(display_value(co.result.get(), &host.context().strings))),
        _ => Err("suspended waiting on a native async call".to_string()),
    }
}
