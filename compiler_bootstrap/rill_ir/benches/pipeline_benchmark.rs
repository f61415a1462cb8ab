//! Throughput of the IR construction -> passes -> register allocation ->
//! bytecode emission pipeline, run end to end from parsed source so the
//! numbers reflect what `rill_loader::compiler::compile_source` actually
//! pays per call.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rill_common::StringTable;
use rill_ir::emit::emit_module;
use rill_parser::Parser;

const STRAIGHT_LINE: &str = "export func f() { return 1 + 2 * 3 - 4 / 2; }";

const LOOP_ACCUMULATOR: &str = "export func g(n) { \
    var s = 0; \
    for (var i = 0; i < n; i = i + 1) { s = s + i; } \
    return s; \
}";

const NESTED_CLOSURE: &str = "export func h() { \
    const c = { var x = 0; func() { x = x + 1; return x; }; }; \
    return c() + c() + c(); \
}";

fn compile(src: &str) {
    let mut strings = StringTable::new();
    let program = Parser::parse_source(src, 0, &mut strings).expect("parses");
    let tables = rill_sema::analyze(&program);
    assert!(!tables.diagnostics.has_errors());
    let name = strings.intern("bench");
    let (module, diagnostics) = rill_ir::build_module(&program, &tables, &mut strings, name);
    assert!(!diagnostics.has_errors());
    black_box(emit_module(&module));
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("ir_pipeline");
    group.bench_function("straight_line", |b| b.iter(|| compile(STRAIGHT_LINE)));
    group.bench_function("loop_accumulator", |b| b.iter(|| compile(LOOP_ACCUMULATOR)));
    group.bench_function("nested_closure", |b| b.iter(|| compile(NESTED_CLOSURE)));
    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
