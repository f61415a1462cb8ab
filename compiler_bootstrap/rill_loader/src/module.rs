//! Converts a compiled [`bytecode::Module`] into a runtime
//! [`object::Module`] heap value, resolves its imports and drives its
//! initializer to completion (spec §4.9).
//!
//! Linking order: the host is responsible for loading a module's
//! dependencies before the module itself — this loader resolves each
//! `Import` member by looking the named module up in
//! [`Context::modules`] and failing hard if it isn't there yet (spec
//! §4.9: "resolved by name against a module registry; a reference to an
//! unresolved import is a hard load-time error").

use hashbrown::HashMap;

use rill_common::{InternedStr, RillError, RillResult};
use rill_ir::bytecode;
use rill_interpreter::Interpreter;
use rill_memory::object::{
    self, Code, Coroutine, CoroutineState, FunctionTemplate, HandlerRange, Header, HeapFloat, HeapInteger, HeapString, HeapSymbol,
    Module as RtModule, ObjectKind,
};
use rill_memory::{Context, Value};

/// Loads `module` into `ctx`, running its initializer via `interp` until
/// it either finishes or panics. Returns the new module's runtime
/// `Value` (already registered in `ctx.modules` under its own name) once
/// its exports are safe to observe.
///
/// An initializer that suspends on a native async call before completing
/// is rejected: this host loader only drives the ready queue it just
/// enqueued the initializer onto, and has no other work to interleave
/// while waiting on a resume token that will never fire on its own
/// (see DESIGN.md).
pub fn load_module(ctx: &mut Context, interp: &mut Interpreter, module: &bytecode::Module) -> RillResult<Value> {
    let placeholder_members: Box<[Value]> = vec![Value::UNDEFINED; module.members.len()].into_boxed_slice();
    let module_ptr = ctx.heap.allocate(RtModule {
        header: Header::new(ObjectKind::Module, std::mem::size_of::<RtModule>() as u32),
        name: module.name,
        members: placeholder_members,
        record_templates: Box::new([]),
        exports: HashMap::new(),
        initialized: false,
    });
    let module_value = unsafe { Value::from_heap_ptr(module_ptr) };

    let mut members = Vec::with_capacity(module.members.len());
    let mut record_templates: Vec<Box<[InternedStr]>> = Vec::with_capacity(module.members.len());
    for member in &module.members {
        record_templates.push(match member {
            bytecode::Member::RecordTemplate(t) => t.fields.clone().into_boxed_slice(),
            _ => Box::new([]),
        });
        members.push(build_member(ctx, member, module_value)?);
    }

    let init_value = members[module.init_function as usize];

    {
        let rt = unsafe { object::from_value_mut::<RtModule>(module_value) };
        rt.members = members.into_boxed_slice();
        rt.record_templates = record_templates.into_boxed_slice();
    }

    let coroutine = interp.spawn(ctx, init_value, &[])?;
    interp.run_ready(ctx)?;

    let co = unsafe { Coroutine::from_value(coroutine) };
    if !matches!(co.state.get(), CoroutineState::Done) {
        return Err(RillError::loader_error("module initializer suspended before completing; the host loader cannot wait on it"));
    }
    if co.failed.get() {
        return Err(RillError::loader_error("module initializer panicked"));
    }

    // Exports become observable only now that the initializer has run to
    // completion (spec §4.9).
    let rt = unsafe { object::from_value_mut::<RtModule>(module_value) };
    for (index, member) in module.members.iter().enumerate() {
        if let bytecode::Member::Variable { name, exported: true } = member {
            if let Some(&value) = rt.members.get(index) {
                rt.exports.insert(*name, value);
            }
        }
    }
    rt.initialized = true;

    let handle = ctx.globals.alloc(module_value);
    ctx.modules.insert(module.name, handle);
    Ok(module_value)
}

fn build_member(ctx: &mut Context, member: &bytecode::Member, owning_module: Value) -> RillResult<Value> {
    Ok(match member {
        bytecode::Member::Integer(v) => {
            if let Some(small) = Value::small_int(*v) {
                small
            } else {
                let ptr = ctx.heap.allocate(HeapInteger { header: Header::new(ObjectKind::Integer, std::mem::size_of::<HeapInteger>() as u32), value: *v });
                unsafe { Value::from_heap_ptr(ptr) }
            }
        }
        bytecode::Member::Float(bits) => {
            let ptr = ctx.heap.allocate(HeapFloat { header: Header::new(ObjectKind::Float, std::mem::size_of::<HeapFloat>() as u32), value: f64::from_bits(*bits) });
            unsafe { Value::from_heap_ptr(ptr) }
        }
        bytecode::Member::String(s) => {
            let ptr = ctx.heap.allocate(HeapString {
                header: Header::new(ObjectKind::String, std::mem::size_of::<HeapString>() as u32),
                bytes: Box::from(ctx.strings.resolve(*s)),
            });
            unsafe { Value::from_heap_ptr(ptr) }
        }
        bytecode::Member::Symbol(s) => {
            let ptr = ctx.heap.allocate(HeapSymbol { header: Header::new(ObjectKind::Symbol, std::mem::size_of::<HeapSymbol>() as u32), name: *s });
            unsafe { Value::from_heap_ptr(ptr) }
        }
        bytecode::Member::Import { module: dep_name, name } => {
            let handle = ctx.modules.get(dep_name).copied().ok_or_else(|| {
                RillError::loader_error(format!("unresolved import: module `{}` is not loaded", ctx.strings.resolve(*dep_name)))
            })?;
            let dep = unsafe { RtModule::from_value(ctx.globals.get(handle)) };
            dep.exports.get(name).copied().ok_or_else(|| {
                RillError::loader_error(format!(
                    "unresolved import: module `{}` has no export named `{}`",
                    ctx.strings.resolve(*dep_name),
                    ctx.strings.resolve(*name)
                ))
            })?
        }
        bytecode::Member::Variable { .. } => Value::UNDEFINED,
        bytecode::Member::Function(f) => {
            let code_ptr = ctx.heap.allocate(Code { header: Header::new(ObjectKind::Code, std::mem::size_of::<Code>() as u32), bytes: f.code.clone().into_boxed_slice() });
            let code_value = unsafe { Value::from_heap_ptr(code_ptr) };
            let handlers: Box<[HandlerRange]> =
                f.handlers.iter().map(|h| HandlerRange { start_pc: h.start_pc, end_pc: h.end_pc, target_pc: h.target_pc }).collect();
            let ptr = ctx.heap.allocate(FunctionTemplate {
                header: Header::new(ObjectKind::FunctionTemplate, std::mem::size_of::<FunctionTemplate>() as u32),
                name: f.name,
                param_count: f.param_count,
                register_count: f.register_count,
                is_closure: matches!(f.kind, bytecode::FunctionKind::Closure),
                handlers,
                code: code_value,
                module: owning_module,
            });
            unsafe { Value::from_heap_ptr(ptr) }
        }
        bytecode::Member::RecordTemplate(_) => {
            // Record templates have no standalone heap representation
            // (spec §3); `MakeRecord`/field lookups resolve through
            // `Module::record_templates` by member id instead.
            Value::UNDEFINED
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::StringTable;

    fn compile(ctx: &mut Context, src: &str, name: &str) -> bytecode::Module {
        crate::compiler::compile_source(src, 0, name, &mut ctx.strings).expect("compiles")
    }

    #[test]
    fn loads_a_module_and_runs_its_initializer() {
        let mut ctx = Context::new();
        let mut interp = Interpreter::new();
        let compiled = compile(&mut ctx, "export func answer() { return 42; }", "demo");
        let value = load_module(&mut ctx, &mut interp, &compiled).expect("module loads");
        let rt = unsafe { RtModule::from_value(value) };
        assert!(rt.initialized);
        assert!(ctx.modules.contains_key(&compiled.name));
    }

    #[test]
    fn unresolved_import_is_a_hard_error() {
        let mut ctx = Context::new();
        let mut interp = Interpreter::new();
        let mut strings = StringTable::new();
        let missing = strings.intern("missing_module");
        let sym = strings.intern("thing");
        ctx.strings = strings;
        let compiled = bytecode::Module {
            name: ctx.strings.intern("consumer"),
            members: vec![bytecode::Member::Import { module: missing, name: sym }],
            init_function: 0,
        };
        let err = load_module(&mut ctx, &mut interp, &compiled).unwrap_err();
        assert!(err.to_string().contains("unresolved import"));
    }
}
