//! `rill run`: compile a source file, invoke its exported entry function
//! as a coroutine, and drain the ready queue to completion (spec §8
//! end-to-end scenarios; spec §6 "function invocation that returns a
//! coroutine handle").

use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use rill_loader::Host;
use rill_memory::object::CoroutineState;
use rill_memory::Context as VmContext;
use rill_memory::Heap;

use crate::commands::display::display_value;
use crate::config::Config;

/// Returns the process exit code: `0` on a successful, non-panicking
/// completion; `1` on a compile error; `2` on an uncaught panic.
pub fn execute(path: &Path, entry: &str) -> Result<i32> {
    let source = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let module_name = module_name_of(path);

    let config = Config::load(path.parent().unwrap_or_else(|| Path::new(".")))?;
    let heap = Heap::with_config(config.gc.heap_page_size, config.gc.heap_page_size.max(4), config.gc.grow_factor);
    let mut host = Host::with_context(VmContext::with_heap(heap));

    let module = match host.compile(&source, &module_name) {
        Ok(module) => module,
        Err(err) => {
            eprintln!("{err}");
            return Ok(1);
        }
    };

    host.load(&module).with_context(|| format!("loading module {module_name}"))?;

    let Some(function) = host.lookup_export(&module_name, entry) else {
        eprintln!("no exported function `{entry}` in {module_name}");
        return Ok(1);
    };

    let coroutine = host.invoke(function, &[])?;
    info!("running {module_name}::{entry}");

    // A single CLI invocation has no external I/O of its own to
    // interleave with VM progress, so it drains the ready queue until
    // either the coroutine completes or the whole program runs dry
    // (spec §4.8: "the host loop typically alternates external I/O with
    // `run_ready`" — here there is none, so the loop degenerates to a
    // simple drain, matching scenario 5's "after one drain ... Waiting").
    while host.has_ready() {
        host.run_ready()?;
    }

    let co = unsafe { rill_memory::object::Coroutine::from_value(coroutine) };
    match co.state.get() {
        CoroutineState::Done if !co.failed.get() => {
            println!("{}", display_value(co.result.get(), &host.context().strings));
            Ok(0)
        }
        CoroutineState::Done => {
            eprintln!("uncaught panic: {}", display_value(co.result.get(), &host.context().strings));
            Ok(2)
        }
        _ => {
            eprintln!("{entry} suspended waiting on a native async call that never resumed it");
            Ok(2)
        }
    }
}

fn module_name_of(path: &Path) -> String {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("main").to_string()
}
