//! The embedding surface a host process drives the VM through (spec
//! §6): compile source, load compiled modules, look up exports, invoke
//! functions as coroutines, drain the ready queue, and register native
//! functions the loaded program can call.

use hashbrown::HashMap;

use rill_common::{InternedStr, RillResult};
use rill_ir::bytecode;
use rill_interpreter::Interpreter;
use rill_memory::object::{self, Coroutine, CoroutineState, Header, Module as RtModule, NativeAsyncFn, NativeFn, ObjectKind};
use rill_memory::{Context, Value};

/// Invoked once a coroutine registered via [`Host::on_complete`] reaches
/// [`CoroutineState::Done`], with its result value and whether it failed
/// (panicked rather than returning normally).
pub type CompletionCallback = fn(&mut Context, Value, bool);

/// One VM instance: a [`Context`] (heap, strings, module registry) plus
/// the [`Interpreter`] driving its coroutines (spec §5: "a single host
/// thread owns one VM instance").
pub struct Host {
    ctx: Context,
    interp: Interpreter,
    completions: HashMap<Value, Vec<CompletionCallback>>,
}

impl Host {
    pub fn new() -> Host {
        Host { ctx: Context::new(), interp: Interpreter::new(), completions: HashMap::new() }
    }

    /// Builds a `Host` around an already-configured [`Context`] (e.g. one
    /// built from `rill_cli`'s `[gc]` config section via
    /// [`rill_memory::Context::with_heap`]).
    pub fn with_context(ctx: Context) -> Host {
        Host { ctx, interp: Interpreter::new(), completions: HashMap::new() }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// (a) "The compiler accepts a source string and produces a compiled
    /// module." Interns through this host's own string table so the
    /// result links against modules already loaded here.
    pub fn compile(&mut self, source: &str, module_name: &str) -> RillResult<bytecode::Module> {
        crate::compiler::compile_source(source, 0, module_name, &mut self.ctx.strings)
    }

    /// (b) "The VM accepts compiled modules, running their
    /// initializers and exposing their exports." Dependencies named by
    /// `Import` members must already be loaded.
    pub fn load(&mut self, module: &bytecode::Module) -> RillResult<Value> {
        crate::module::load_module(&mut self.ctx, &mut self.interp, module)
    }

    /// (c) "Export lookup by (module name, symbol name)."
    pub fn lookup_export(&mut self, module_name: &str, symbol: &str) -> Option<Value> {
        let module_name = self.ctx.strings.intern(module_name);
        let symbol = self.ctx.strings.intern(symbol);
        self.lookup_export_interned(module_name, symbol)
    }

    pub fn lookup_export_interned(&self, module_name: InternedStr, symbol: InternedStr) -> Option<Value> {
        let handle = *self.ctx.modules.get(&module_name)?;
        let module = unsafe { RtModule::from_value(self.ctx.globals.get(handle)) };
        module.exports.get(&symbol).copied()
    }

    /// (d) "Function invocation, producing a coroutine handle."
    pub fn invoke(&mut self, function: Value, args: &[Value]) -> RillResult<Value> {
        self.interp.spawn(&mut self.ctx, function, args)
    }

    /// (e) "A completion callback, fired once with the coroutine's
    /// result or panic value." Multiple callbacks on the same coroutine
    /// all fire, in registration order, the first time it's observed
    /// `Done`.
    pub fn on_complete(&mut self, coroutine: Value, callback: CompletionCallback) {
        self.completions.entry(coroutine).or_default().push(callback);
    }

    /// (f) "has_ready / run_ready, so the host can interleave VM
    /// progress with its own I/O loop."
    pub fn has_ready(&self) -> bool {
        self.interp.scheduler().has_ready()
    }

    pub fn run_ready(&mut self) -> RillResult<()> {
        self.interp.run_ready(&mut self.ctx)?;
        self.fire_completions();
        Ok(())
    }

    /// Fires a resume token a registered async native was handed at
    /// suspension time (spec §4.8), making its coroutine `Ready` again.
    /// The caller must still call [`Host::run_ready`] to actually
    /// advance it.
    pub fn fire(&mut self, token: rill_scheduler::ResumeTokenId, value: Value) -> RillResult<()> {
        self.interp.fire(token, value)
    }

    fn fire_completions(&mut self) {
        let done: Vec<Value> = self
            .completions
            .keys()
            .copied()
            .filter(|&co| matches!(unsafe { Coroutine::from_value(co) }.state.get(), CoroutineState::Done))
            .collect();
        for coroutine in done {
            let callbacks = self.completions.remove(&coroutine).unwrap_or_default();
            let co = unsafe { Coroutine::from_value(coroutine) };
            let (value, failed) = (co.result.get(), co.failed.get());
            for callback in callbacks {
                callback(&mut self.ctx, value, failed);
            }
        }
    }

    /// (g) "Native function registration, including async natives."
    /// Registers every entry as the export table of a synthetic,
    /// already-initialized module named `module_name`, so user code
    /// reaches natives through the same `import`/export mechanism as
    /// any other module (spec §4.9 gives imports no special case for
    /// where the imported module came from).
    pub fn register_natives(&mut self, module_name: &str, natives: &[(&str, u32, NativeFn)], async_natives: &[(&str, u32, NativeAsyncFn)]) -> Value {
        let name = self.ctx.strings.intern(module_name);
        let mut exports = HashMap::new();
        for &(symbol, arity, func) in natives {
            let interned = self.ctx.strings.intern(symbol);
            let ptr = self.ctx.heap.allocate(object::NativeFunction {
                header: Header::new(ObjectKind::NativeFunction, std::mem::size_of::<object::NativeFunction>() as u32),
                name: interned,
                arity,
                func,
            });
            exports.insert(interned, unsafe { Value::from_heap_ptr(ptr) });
        }
        for &(symbol, arity, func) in async_natives {
            let interned = self.ctx.strings.intern(symbol);
            let ptr = self.ctx.heap.allocate(object::NativeAsyncFunction {
                header: Header::new(ObjectKind::NativeAsyncFunction, std::mem::size_of::<object::NativeAsyncFunction>() as u32),
                name: interned,
                arity,
                func,
            });
            exports.insert(interned, unsafe { Value::from_heap_ptr(ptr) });
        }
        let module_ptr = self.ctx.heap.allocate(RtModule {
            header: Header::new(ObjectKind::Module, std::mem::size_of::<RtModule>() as u32),
            name,
            members: Box::new([]),
            record_templates: Box::new([]),
            exports,
            initialized: true,
        });
        let value = unsafe { Value::from_heap_ptr(module_ptr) };
        let handle = self.ctx.globals.alloc(value);
        self.ctx.modules.insert(name, handle);
        value
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double(_ctx: &mut Context, args: &[Value]) -> Result<Value, rill_common::RillError> {
        let n = args[0].as_small_int().ok_or_else(|| rill_common::RillError::runtime_error("expected a small int"))?;
        Ok(Value::small_int(n * 2).unwrap())
    }

    #[test]
    fn compiles_loads_and_invokes_an_exported_function() {
        let mut host = Host::new();
        let module = host.compile("export func add(a, b) { return a + b; }", "arith").expect("compiles");
        host.load(&module).expect("loads");
        let add = host.lookup_export("arith", "add").expect("add is exported");
        let coroutine = host.invoke(add, &[Value::small_int(2).unwrap(), Value::small_int(3).unwrap()]).unwrap();
        host.run_ready().unwrap();
        let co = unsafe { Coroutine::from_value(coroutine) };
        assert!(matches!(co.state.get(), CoroutineState::Done));
        assert_eq!(co.result.get().as_small_int(), Some(5));
    }

    #[test]
    fn completion_callback_fires_after_run_ready() {
        use std::sync::atomic::{AtomicBool, Ordering};
        static FIRED: AtomicBool = AtomicBool::new(false);
        fn record(_ctx: &mut Context, _value: Value, _failed: bool) {
            FIRED.store(true, Ordering::SeqCst);
        }

        let mut host = Host::new();
        let module = host.compile("export func f() { return 1; }", "m").expect("compiles");
        host.load(&module).expect("loads");
        let f = host.lookup_export("m", "f").unwrap();
        let coroutine = host.invoke(f, &[]).unwrap();
        host.on_complete(coroutine, record);
        assert!(!FIRED.load(Ordering::SeqCst));
        host.run_ready().unwrap();
        assert!(FIRED.load(Ordering::SeqCst));
    }

    #[test]
    fn registered_natives_are_reachable_as_a_module() {
        let mut host = Host::new();
        host.register_natives("host", &[("double", 1, double as NativeFn)], &[]);
        let doubler = host.lookup_export("host", "double").expect("double is registered");
        assert!(doubler.is_heap_ptr());
    }

    #[test]
    fn scenario_2_for_loop_accumulator() {
        let mut host = Host::new();
        let module = host
            .compile(
                "export func g(n) { var s = 0; for (var i = 0; i < n; i = i + 1) { s = s + i; }; return s; }",
                "loop",
            )
            .expect("compiles");
        host.load(&module).expect("loads");
        let g = host.lookup_export("loop", "g").unwrap();
        let coroutine = host.invoke(g, &[Value::small_int(10).unwrap()]).unwrap();
        host.run_ready().unwrap();
        let co = unsafe { Coroutine::from_value(coroutine) };
        assert!(!co.failed.get());
        assert_eq!(co.result.get().as_small_int(), Some(45));
    }

    #[test]
    fn scenario_3_closure_over_mutable_local() {
        let mut host = Host::new();
        let module = host
            .compile(
                "export func h() { const c = { var x = 0; func() { x = x + 1; return x; }; }; return c() + c() + c(); }",
                "closure",
            )
            .expect("compiles");
        host.load(&module).expect("loads");
        let h = host.lookup_export("closure", "h").unwrap();
        let coroutine = host.invoke(h, &[]).unwrap();
        host.run_ready().unwrap();
        let co = unsafe { Coroutine::from_value(coroutine) };
        assert!(!co.failed.get());
        assert_eq!(co.result.get().as_small_int(), Some(6));
    }

    #[test]
    fn scenario_6_bad_index_panics() {
        let mut host = Host::new();
        let module = host.compile("export func r() { return [1,2,3][5]; }", "idx").expect("compiles");
        host.load(&module).expect("loads");
        let r = host.lookup_export("idx", "r").unwrap();
        let coroutine = host.invoke(r, &[]).unwrap();
        host.run_ready().unwrap();
        let co = unsafe { Coroutine::from_value(coroutine) };
        assert!(co.failed.get());
    }

    thread_local! {
        static PENDING_TOKEN: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
    }

    /// Registers, but does not fire, a resume token — modelling an async
    /// native whose completion arrives from outside the VM's own call
    /// stack (spec §4.8: "the token is stored and fired from host
    /// callback code").
    fn delay(_ctx: &mut Context, _args: &[Value], token: u64) -> Result<(), rill_common::RillError> {
        PENDING_TOKEN.with(|cell| cell.set(token));
        Ok(())
    }

    #[test]
    fn scenario_5_async_native_suspends_then_resumes() {
        let mut host = Host::new();
        host.register_natives("async_io", &[], &[("delay", 1, delay as NativeAsyncFn)]);
        let module = host.compile("export func q() { delay(0); return 42; }", "q").expect("compiles");
        host.load(&module).expect("loads");
        let q = host.lookup_export("q", "q").unwrap();
        let coroutine = host.invoke(q, &[]).unwrap();

        host.run_ready().unwrap();
        let co = unsafe { Coroutine::from_value(coroutine) };
        assert!(matches!(co.state.get(), CoroutineState::Waiting));

        let token = rill_scheduler::ResumeTokenId::from_raw(PENDING_TOKEN.with(|cell| cell.get()));
        host.fire(token, Value::NULL).unwrap();
        host.run_ready().unwrap();
        assert!(matches!(co.state.get(), CoroutineState::Done));
        assert_eq!(co.result.get().as_small_int(), Some(42));
    }
}
