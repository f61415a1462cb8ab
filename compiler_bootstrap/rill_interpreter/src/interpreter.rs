//! Bytecode dispatch loop (spec §4.7).

use hashbrown::HashMap;

use rill_common::{RillError, RillResult};
use rill_ir::bytecode::Opcode;
use rill_memory::object::{
    self, Array, ArrayStorage, BoundMethod, Code, Coroutine, CoroutineState, CoroutineStack, Function, FunctionTemplate, HashTable,
    HashTableStorage, Header, HeapFloat, HeapInteger, HeapString, HeapSymbol, Method, Module, NativeAsyncFunction, NativeFunction,
    ObjectKind, Record, Tuple,
};
use rill_memory::{Context, Value};
use rill_scheduler::{ResumeTokenId, Scheduler};

use crate::frame::Frame;

/// Ties together the ready queue ([`Scheduler`]) and every suspended
/// coroutine's live call stack. One `Interpreter` drives exactly one
/// [`Context`]'s coroutines (spec §5: "a single host thread owns one VM
/// instance").
pub struct Interpreter {
    scheduler: Scheduler,
    /// Per-coroutine call stacks, keyed by the `Coroutine` heap value.
    /// Kept here rather than on `CoroutineStack` itself (spec §4.5 roots:
    /// "interpreter state (current coroutine and register file)") so
    /// every *suspended* coroutine's live frames stay GC-visible through
    /// [`Interpreter::roots`], not only the one currently running.
    frames: HashMap<Value, Vec<Frame>>,
}

enum Outcome {
    Continue,
    Suspended,
    Done,
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter { scheduler: Scheduler::new(), frames: HashMap::new() }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Fires a resume token minted by a prior `NativeAsyncFunction`
    /// suspension, handing `value` back to the coroutine that is
    /// waiting on it and re-enqueuing it as `Ready` (spec §4.8
    /// "Resumption"). The next `run_ready` that pops it delivers `value`
    /// into the register the original `Call` wrote its destination to,
    /// via [`Interpreter::deliver_resume_value`].
    pub fn fire(&mut self, token: ResumeTokenId, value: Value) -> RillResult<()> {
        self.scheduler.fire(token, value)
    }

    /// Every value live because of interpreter-owned state: each
    /// suspended or ready coroutine's frames (their templates, captured
    /// environments, and scratch operand stacks) plus the scheduler's own
    /// roots (ready queue, pending resume tokens).
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.frames.values().flat_map(|stack| stack.iter()).flat_map(|f| {
            std::iter::once(f.template).chain(std::iter::once(f.env)).chain(f.expr_stack.iter().copied())
        }).chain(self.scheduler.roots())
    }

    /// Creates a coroutine executing `function` with `args`, enqueues it
    /// ready, and returns the new `Coroutine` value. `function` must be a
    /// `FunctionTemplate` or `Function` (closure) value.
    pub fn spawn(&mut self, ctx: &mut Context, function: Value, args: &[Value]) -> RillResult<Value> {
        let (template, env) = unwrap_callable(function)?;
        let tmpl = unsafe { object::from_value::<FunctionTemplate>(template) };
        let window = (tmpl.param_count + tmpl.register_count) as usize;
        let mut registers = Vec::with_capacity(window);
        for i in 0..tmpl.param_count as usize {
            registers.push(std::cell::Cell::new(args.get(i).copied().unwrap_or(Value::UNDEFINED)));
        }
        for _ in 0..tmpl.register_count {
            registers.push(std::cell::Cell::new(Value::UNDEFINED));
        }
        let stack_ptr = ctx.heap.allocate(CoroutineStack {
            header: Header::new(ObjectKind::CoroutineStack, std::mem::size_of::<CoroutineStack>() as u32),
            registers,
        });
        let stack = unsafe { Value::from_heap_ptr(stack_ptr) };
        let co_ptr = ctx.heap.allocate(Coroutine {
            header: Header::new(ObjectKind::Coroutine, std::mem::size_of::<Coroutine>() as u32),
            name: None,
            function,
            stack,
            state: std::cell::Cell::new(CoroutineState::Ready),
            result: std::cell::Cell::new(Value::UNDEFINED),
            failed: std::cell::Cell::new(false),
            resume_value: std::cell::Cell::new(Value::UNDEFINED),
        });
        let coroutine = unsafe { Value::from_heap_ptr(co_ptr) };
        let frame = Frame::new(template, env, 0, tmpl.param_count, tmpl.register_count, u32::MAX);
        self.frames.insert(coroutine, vec![frame]);
        self.scheduler.enqueue(coroutine);
        Ok(coroutine)
    }

    /// Drains the ready queue, running each coroutine until it completes,
    /// panics, or suspends on a native async call (spec §4.8 `run_ready`).
    pub fn run_ready(&mut self, ctx: &mut Context) -> RillResult<()> {
        while self.scheduler.has_ready() {
            let coroutine = self.scheduler.pop_ready().expect("has_ready just returned true");
            self.run_coroutine(ctx, coroutine)?;
        }
        Ok(())
    }

    fn run_coroutine(&mut self, ctx: &mut Context, coroutine: Value) -> RillResult<()> {
        self.deliver_resume_value(coroutine);
        loop {
            let outcome = self.execute_one(ctx, coroutine)?;
            match outcome {
                Outcome::Continue => continue,
                Outcome::Suspended => return Ok(()),
                Outcome::Done => return Ok(()),
            }
        }
    }

    /// If the coroutine's top frame is parked waiting on a fired resume
    /// token, writes the delivered value into its destination register
    /// and clears the wait so dispatch resumes past the original call.
    fn deliver_resume_value(&mut self, coroutine: Value) {
        let co = unsafe { Coroutine::from_value(coroutine) };
        let value = co.resume_value.get();
        co.resume_value.set(Value::UNDEFINED);
        let frames = self.frames.get_mut(&coroutine).expect("running coroutine has a frame stack");
        if let Some(frame) = frames.last_mut() {
            if let Some(dest) = frame.pending_async_dest.take() {
                let stack = unsafe { CoroutineStack::from_value(co.stack) };
                stack.registers[frame.register_slot(dest)].set(value);
            }
        }
    }

    fn execute_one(&mut self, ctx: &mut Context, coroutine: Value) -> RillResult<Outcome> {
        let code_bytes;
        let fault_pc;
        let op;
        {
            let frames = self.frames.get_mut(&coroutine).expect("running coroutine has a frame stack");
            let frame = frames.last_mut().expect("coroutine's frame stack is never empty while running");
            let tmpl = unsafe { object::from_value::<FunctionTemplate>(frame.template) };
            let code = unsafe { object::from_value::<Code>(tmpl.code) };
            code_bytes = code.bytes.clone();
            fault_pc = frame.pc;
            op = match Opcode::from_u8(code_bytes[frame.pc]) {
                Some(op) => op,
                None => return Err(RillError::runtime_error("invalid opcode byte")),
            };
            frame.pc += 1;
        }

        match self.dispatch(ctx, coroutine, op, &code_bytes, fault_pc) {
            Ok(outcome) => Ok(outcome),
            Err(DispatchError::Host(e)) => Err(e),
            Err(DispatchError::Panic(value)) => self.unwind(ctx, coroutine, value, fault_pc),
        }
    }

    /// Executes one decoded instruction. Returns `Ok` for normal control
    /// flow (including frame push/pop for calls and returns) or
    /// `Err(DispatchError::Panic)` for any of the panic-raising
    /// conditions of spec §4.7 point 5.
    fn dispatch(&mut self, ctx: &mut Context, coroutine: Value, op: Opcode, code: &[u8], fault_pc: usize) -> Result<Outcome, DispatchError> {
        let mut pc = fault_pc + 1;
        macro_rules! frame {
            () => {
                self.frames.get_mut(&coroutine).unwrap().last_mut().unwrap()
            };
        }
        macro_rules! stack {
            () => {
                unsafe { CoroutineStack::from_value(unsafe { Coroutine::from_value(coroutine) }.stack) }
            };
        }
        macro_rules! read_reg {
            ($i:expr) => {
                stack!().registers[frame!().register_slot($i)].get()
            };
        }
        macro_rules! write_reg {
            ($i:expr, $v:expr) => {
                stack!().registers[frame!().register_slot($i)].set($v)
            };
        }

        match op {
            Opcode::LoadNull => {
                let dest = read_u32(code, &mut pc);
                write_reg!(dest, Value::NULL);
            }
            Opcode::LoadFalse => {
                let dest = read_u32(code, &mut pc);
                write_reg!(dest, Value::FALSE);
            }
            Opcode::LoadTrue => {
                let dest = read_u32(code, &mut pc);
                write_reg!(dest, Value::TRUE);
            }
            Opcode::LoadInt => {
                let v = read_i64(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let value = make_int(ctx, v);
                write_reg!(dest, value);
            }
            Opcode::LoadFloat => {
                let bits = read_u64(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let value = make_float(ctx, f64::from_bits(bits));
                write_reg!(dest, value);
            }
            Opcode::LoadConst | Opcode::LoadModule => {
                let member = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let module = current_module(self, coroutine);
                let m = unsafe { Module::from_value(module) };
                let value = m.members.get(member as usize).copied().unwrap_or(Value::UNDEFINED);
                write_reg!(dest, value);
            }
            Opcode::LoadGlobal => {
                let member = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let module = current_module(self, coroutine);
                let m = unsafe { Module::from_value(module) };
                let name = symbol_name(m, member);
                let value = name.and_then(|n| m.exports.get(&n).copied()).unwrap_or(Value::UNDEFINED);
                write_reg!(dest, value);
            }
            Opcode::LoadParam => {
                let i = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let value = stack!().registers[frame!().param_slot(i)].get();
                write_reg!(dest, value);
            }
            Opcode::LoadLocal => {
                let i = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let value = read_reg!(i);
                write_reg!(dest, value);
            }
            Opcode::LoadClosure => {
                let env_reg = read_u32(code, &mut pc);
                let index = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let env = if env_reg == u32::MAX { frame!().env } else { read_reg!(env_reg) };
                let value = if index == u32::MAX {
                    env
                } else {
                    let e = unsafe { object::from_value::<rill_memory::object::Environment>(env) };
                    e.slots.get(index as usize).map(|c| c.get()).unwrap_or(Value::UNDEFINED)
                };
                write_reg!(dest, value);
            }
            Opcode::LoadMember => {
                let object_reg = read_u32(code, &mut pc);
                let member = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let receiver = read_reg!(object_reg);
                let module = current_module(self, coroutine);
                let m = unsafe { Module::from_value(module) };
                let name = symbol_name(m, member).ok_or_else(|| DispatchError::Host(RillError::runtime_error("field name member is not a symbol")))?;
                let value = record_field(m, receiver, name).ok_or_else(|| panic_str(ctx, "no such field"))?;
                write_reg!(dest, value);
            }
            Opcode::LoadIndex => {
                let object_reg = read_u32(code, &mut pc);
                let index_reg = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let receiver = read_reg!(object_reg);
                let index = read_reg!(index_reg);
                let value = index_get(receiver, index).map_err(|e| panic_str(ctx, &e))?;
                write_reg!(dest, value);
            }

            Opcode::StoreParam => {
                let i = read_u32(code, &mut pc);
                let value_reg = read_u32(code, &mut pc);
                let value = read_reg!(value_reg);
                stack!().registers[frame!().param_slot(i)].set(value);
            }
            Opcode::StoreLocal => {
                let i = read_u32(code, &mut pc);
                let value_reg = read_u32(code, &mut pc);
                let value = read_reg!(value_reg);
                write_reg!(i, value);
            }
            Opcode::StoreClosure => {
                let env_reg = read_u32(code, &mut pc);
                let index = read_u32(code, &mut pc);
                let value_reg = read_u32(code, &mut pc);
                let env = if env_reg == u32::MAX { frame!().env } else { read_reg!(env_reg) };
                let value = read_reg!(value_reg);
                let e = unsafe { object::from_value::<rill_memory::object::Environment>(env) };
                if let Some(slot) = e.slots.get(index as usize) {
                    slot.set(value);
                }
            }
            Opcode::StoreModule => {
                let m_idx = read_u32(code, &mut pc);
                let value_reg = read_u32(code, &mut pc);
                let value = read_reg!(value_reg);
                let module = current_module(self, coroutine);
                let m = unsafe { object::from_value_mut::<Module>(module) };
                if let Some(slot) = m.members.get_mut(m_idx as usize) {
                    *slot = value;
                }
            }
            Opcode::StoreMember | Opcode::StoreField => {
                let object_reg = read_u32(code, &mut pc);
                let member = read_u32(code, &mut pc);
                let value_reg = read_u32(code, &mut pc);
                let receiver = read_reg!(object_reg);
                let value = read_reg!(value_reg);
                let module = current_module(self, coroutine);
                let m = unsafe { Module::from_value(module) };
                let name = symbol_name(m, member).ok_or_else(|| DispatchError::Host(RillError::runtime_error("field name member is not a symbol")))?;
                record_field_set(m, receiver, name, value).map_err(|e| panic_str(ctx, &e))?;
            }
            Opcode::StoreIndex => {
                let object_reg = read_u32(code, &mut pc);
                let index_reg = read_u32(code, &mut pc);
                let value_reg = read_u32(code, &mut pc);
                let receiver = read_reg!(object_reg);
                let index = read_reg!(index_reg);
                let value = read_reg!(value_reg);
                index_set(ctx, receiver, index, value).map_err(|e| panic_str(ctx, &e))?;
            }

            Opcode::Dup => {
                let v = *frame!().expr_stack.last().ok_or_else(|| panic_str(ctx, "stack underflow"))?;
                frame!().expr_stack.push(v);
            }
            Opcode::Pop => {
                frame!().expr_stack.pop().ok_or_else(|| panic_str(ctx, "stack underflow"))?;
            }
            Opcode::Rotate2 | Opcode::Rotate3 | Opcode::Rotate4 => {
                let n = match op {
                    Opcode::Rotate2 => 2,
                    Opcode::Rotate3 => 3,
                    _ => 4,
                };
                let stack = &mut frame!().expr_stack;
                let len = stack.len();
                if len < n {
                    return Err(panic_str(ctx, "stack underflow"));
                }
                stack[len - n..].rotate_left(1);
            }

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Pow => {
                let l = read_u32(code, &mut pc);
                let r = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let lv = read_reg!(l);
                let rv = read_reg!(r);
                let result = arith(ctx, op, lv, rv).map_err(|e| panic_str(ctx, &e))?;
                write_reg!(dest, result);
            }
            Opcode::Gt | Opcode::Gte | Opcode::Lt | Opcode::Lte => {
                let l = read_u32(code, &mut pc);
                let r = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let lv = read_reg!(l);
                let rv = read_reg!(r);
                let result = compare(op, lv, rv).map_err(|e| panic_str(ctx, &e))?;
                write_reg!(dest, Value::bool(result));
            }
            Opcode::Eq => {
                let l = read_u32(code, &mut pc);
                let r = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let result = values_equal(read_reg!(l), read_reg!(r));
                write_reg!(dest, Value::bool(result));
            }
            Opcode::NEq => {
                let l = read_u32(code, &mut pc);
                let r = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let result = !values_equal(read_reg!(l), read_reg!(r));
                write_reg!(dest, Value::bool(result));
            }
            Opcode::UAdd => {
                let v = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let value = read_reg!(v);
                if as_num(value).is_none() {
                    return Err(panic_str(ctx, "unary + on a non-number"));
                }
                write_reg!(dest, value);
            }
            Opcode::USub => {
                let v = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let value = read_reg!(v);
                let result = match as_num(value) {
                    Some(Num::Int(i)) => make_int(ctx, i.wrapping_neg()),
                    Some(Num::Float(f)) => make_float(ctx, -f),
                    None => return Err(panic_str(ctx, "unary - on a non-number")),
                };
                write_reg!(dest, result);
            }
            Opcode::LNot => {
                let v = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let value = read_reg!(v);
                write_reg!(dest, Value::bool(!value.is_truthy()));
            }
            Opcode::BNot => {
                let v = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let value = read_reg!(v);
                let i = as_int(value).ok_or_else(|| panic_str(ctx, "bitwise not on a non-integer"))?;
                let result = make_int(ctx, !i);
                write_reg!(dest, result);
            }

            Opcode::Jmp => {
                let target = read_u32(code, &mut pc);
                frame!().pc = target as usize;
                return Ok(Outcome::Continue);
            }
            Opcode::JmpTrue | Opcode::JmpTruePop => {
                let cond = read_u32(code, &mut pc);
                let target = read_u32(code, &mut pc);
                if read_reg!(cond).is_truthy() {
                    frame!().pc = target as usize;
                    return Ok(Outcome::Continue);
                }
            }
            Opcode::JmpFalse | Opcode::JmpFalsePop => {
                let cond = read_u32(code, &mut pc);
                let target = read_u32(code, &mut pc);
                if !read_reg!(cond).is_truthy() {
                    frame!().pc = target as usize;
                    return Ok(Outcome::Continue);
                }
            }

            Opcode::Call => return self.dispatch_call(ctx, coroutine, code, &mut pc),
            Opcode::LoadMethod => {
                let receiver_reg = read_u32(code, &mut pc);
                let member = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let receiver = read_reg!(receiver_reg);
                let module = current_module(self, coroutine);
                let m = unsafe { Module::from_value(module) };
                let name = symbol_name(m, member).ok_or_else(|| DispatchError::Host(RillError::runtime_error("method name member is not a symbol")))?;
                let method = record_field(m, receiver, name).ok_or_else(|| panic_str(ctx, "no such method"))?;
                let bound_ptr = ctx.heap.allocate(BoundMethod {
                    header: Header::new(ObjectKind::BoundMethod, std::mem::size_of::<BoundMethod>() as u32),
                    receiver,
                    method,
                });
                let bound = unsafe { Value::from_heap_ptr(bound_ptr) };
                write_reg!(dest, bound);
            }
            Opcode::CallMethod => return self.dispatch_call_method(ctx, coroutine, code, &mut pc),

            Opcode::Return => {
                let value_reg = read_u32(code, &mut pc);
                let value = if value_reg == u32::MAX { Value::UNDEFINED } else { read_reg!(value_reg) };
                return Ok(self.do_return(ctx, coroutine, value));
            }
            Opcode::Rethrow => {
                let v = read_u32(code, &mut pc);
                let value = read_reg!(v);
                return Err(DispatchError::Panic(value));
            }

            Opcode::MakeArray => {
                let (items, dest) = read_items(code, &mut pc, |i| read_reg!(i));
                let storage_ptr = ctx.heap.allocate(ArrayStorage {
                    header: Header::new(ObjectKind::ArrayStorage, std::mem::size_of::<ArrayStorage>() as u32),
                    items: items.clone(),
                });
                let storage = unsafe { Value::from_heap_ptr(storage_ptr) };
                let array_ptr = ctx.heap.allocate(Array {
                    header: Header::new(ObjectKind::Array, std::mem::size_of::<Array>() as u32),
                    storage,
                    len: items.len() as u32,
                });
                let array = unsafe { Value::from_heap_ptr(array_ptr) };
                write_reg!(dest, array);
            }
            Opcode::MakeTuple => {
                let (items, dest) = read_items(code, &mut pc, |i| read_reg!(i));
                let ptr = ctx.heap.allocate(Tuple {
                    header: Header::new(ObjectKind::Tuple, std::mem::size_of::<Tuple>() as u32),
                    items: items.into_boxed_slice(),
                });
                let value = unsafe { Value::from_heap_ptr(ptr) };
                write_reg!(dest, value);
            }
            Opcode::MakeSet => {
                let (items, dest) = read_items(code, &mut pc, |i| read_reg!(i));
                let entries = items.into_iter().map(|v| (v, Value::TRUE)).collect();
                let value = make_hashtable(ctx, entries);
                write_reg!(dest, value);
            }
            Opcode::MakeMap => {
                let (items, dest) = read_items(code, &mut pc, |i| read_reg!(i));
                let entries = items.chunks(2).map(|kv| (kv[0], kv.get(1).copied().unwrap_or(Value::UNDEFINED))).collect();
                let value = make_hashtable(ctx, entries);
                write_reg!(dest, value);
            }
            Opcode::MakeRecord => {
                let template = read_u32(code, &mut pc);
                let (items, dest) = read_items(code, &mut pc, |i| read_reg!(i));
                let ptr = ctx.heap.allocate(Record {
                    header: Header::new(ObjectKind::Record, std::mem::size_of::<Record>() as u32),
                    template,
                    fields: items.into_boxed_slice(),
                });
                let value = unsafe { Value::from_heap_ptr(ptr) };
                write_reg!(dest, value);
            }
            Opcode::MakeClosure => {
                let template_member = read_u32(code, &mut pc);
                let env_reg = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let env = read_reg!(env_reg);
                let module = current_module(self, coroutine);
                let m = unsafe { Module::from_value(module) };
                let template = m.members.get(template_member as usize).copied().unwrap_or(Value::UNDEFINED);
                let ptr = ctx.heap.allocate(Function {
                    header: Header::new(ObjectKind::Function, std::mem::size_of::<Function>() as u32),
                    template,
                    env,
                });
                let value = unsafe { Value::from_heap_ptr(ptr) };
                write_reg!(dest, value);
            }
            Opcode::MakeEnvironment => {
                let parent_reg = read_u32(code, &mut pc);
                let size = read_u32(code, &mut pc);
                let dest = read_u32(code, &mut pc);
                let parent = if parent_reg == u32::MAX { Value::NULL } else { read_reg!(parent_reg) };
                let slots = (0..size).map(|_| std::cell::Cell::new(Value::UNDEFINED)).collect();
                let ptr = ctx.heap.allocate(rill_memory::object::Environment {
                    header: Header::new(ObjectKind::Environment, std::mem::size_of::<rill_memory::object::Environment>() as u32),
                    parent,
                    slots,
                });
                let value = unsafe { Value::from_heap_ptr(ptr) };
                write_reg!(dest, value);
            }
            Opcode::FormatString => {
                let (items, dest) = read_items(code, &mut pc, |i| read_reg!(i));
                let mut out = String::new();
                for v in items {
                    out.push_str(&display_value(ctx, v));
                }
                let ptr = ctx.heap.allocate(HeapString {
                    header: Header::new(ObjectKind::String, std::mem::size_of::<HeapString>() as u32),
                    bytes: out.into_boxed_str(),
                });
                let value = unsafe { Value::from_heap_ptr(ptr) };
                write_reg!(dest, value);
            }

            Opcode::AssertFail => {
                let member = read_u32(code, &mut pc);
                let module = current_module(self, coroutine);
                let m = unsafe { Module::from_value(module) };
                let value = m.members.get(member as usize).copied().unwrap_or(Value::UNDEFINED);
                return Err(DispatchError::Panic(value));
            }
        }

        frame!().pc = pc;
        Ok(Outcome::Continue)
    }

    fn dispatch_call(&mut self, ctx: &mut Context, coroutine: Value, code: &[u8], pc: &mut usize) -> Result<Outcome, DispatchError> {
        let callee_reg = read_u32(code, pc);
        let argc = read_u32(code, pc);
        let mut arg_regs = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            arg_regs.push(read_u32(code, pc));
        }
        let dest = read_u32(code, pc);
        self.frames.get_mut(&coroutine).unwrap().last_mut().unwrap().pc = *pc;

        let stack = unsafe { CoroutineStack::from_value(unsafe { Coroutine::from_value(coroutine) }.stack) };
        let frame = self.frames.get(&coroutine).unwrap().last().unwrap();
        let callee = stack.registers[frame.register_slot(callee_reg)].get();
        let args: Vec<Value> = arg_regs.iter().map(|&r| stack.registers[frame.register_slot(r)].get()).collect();

        self.invoke(ctx, coroutine, callee, &args, dest)
    }

    fn dispatch_call_method(&mut self, ctx: &mut Context, coroutine: Value, code: &[u8], pc: &mut usize) -> Result<Outcome, DispatchError> {
        let handle_reg = read_u32(code, pc);
        let argc = read_u32(code, pc);
        let mut arg_regs = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            arg_regs.push(read_u32(code, pc));
        }
        let dest = read_u32(code, pc);
        self.frames.get_mut(&coroutine).unwrap().last_mut().unwrap().pc = *pc;

        let stack = unsafe { CoroutineStack::from_value(unsafe { Coroutine::from_value(coroutine) }.stack) };
        let frame = self.frames.get(&coroutine).unwrap().last().unwrap();
        let handle = stack.registers[frame.register_slot(handle_reg)].get();
        let mut args: Vec<Value> = Vec::with_capacity(arg_regs.len() + 1);
        let callee = if is_kind(handle, ObjectKind::BoundMethod) {
            let bm = unsafe { object::from_value::<BoundMethod>(handle) };
            args.push(bm.receiver);
            bm.method
        } else {
            handle
        };
        for &r in &arg_regs {
            args.push(stack.registers[frame.register_slot(r)].get());
        }

        self.invoke(ctx, coroutine, callee, &args, dest)
    }

    /// Calls `callee` with `args`, dispatching on its runtime kind: pushes
    /// a user frame for `FunctionTemplate`/`Function`, runs a native
    /// callback synchronously for `NativeFunction`, or suspends the
    /// coroutine on a resume token for `NativeAsyncFunction` (spec §4.7
    /// point 1, §4.8 suspension points).
    fn invoke(&mut self, ctx: &mut Context, coroutine: Value, callee: Value, args: &[Value], dest: u32) -> Result<Outcome, DispatchError> {
        if is_kind(callee, ObjectKind::FunctionTemplate) || is_kind(callee, ObjectKind::Function) {
            let (template, env) = unwrap_callable(callee).map_err(DispatchError::Host)?;
            let tmpl = unsafe { object::from_value::<FunctionTemplate>(template) };
            let window = (tmpl.param_count + tmpl.register_count) as usize;
            let stack = unsafe { CoroutineStack::from_value_mut(unsafe { Coroutine::from_value(coroutine) }.stack) };
            let base = stack.registers.len();
            for i in 0..tmpl.param_count as usize {
                stack.registers.push(std::cell::Cell::new(args.get(i).copied().unwrap_or(Value::UNDEFINED)));
            }
            for _ in 0..tmpl.register_count {
                stack.registers.push(std::cell::Cell::new(Value::UNDEFINED));
            }
            debug_assert_eq!(stack.registers.len() - base, window);
            let new_frame = Frame::new(template, env, base, tmpl.param_count, tmpl.register_count, dest);
            self.frames.get_mut(&coroutine).unwrap().push(new_frame);
            return Ok(Outcome::Continue);
        }

        if is_kind(callee, ObjectKind::NativeFunction) {
            let native = unsafe { object::from_value::<NativeFunction>(callee) };
            let result = (native.func)(ctx, args).map_err(|e| DispatchError::Panic(error_to_panic(ctx, &e)))?;
            let stack = unsafe { CoroutineStack::from_value(unsafe { Coroutine::from_value(coroutine) }.stack) };
            let frame = self.frames.get(&coroutine).unwrap().last().unwrap();
            stack.registers[frame.register_slot(dest)].set(result);
            return Ok(Outcome::Continue);
        }

        if is_kind(callee, ObjectKind::NativeAsyncFunction) {
            let native = unsafe { object::from_value::<NativeAsyncFunction>(callee) };
            let token = self.scheduler.suspend(coroutine);
            self.frames.get_mut(&coroutine).unwrap().last_mut().unwrap().pending_async_dest = Some(dest);
            (native.func)(ctx, args, token.raw()).map_err(DispatchError::Host)?;
            return Ok(Outcome::Suspended);
        }

        Err(panic_str(ctx, "value is not callable"))
    }

    /// Pops the current frame. If a caller remains, writes `value` into
    /// its `return_dest` register and continues there; otherwise sets the
    /// coroutine's result and marks it `Done` (spec §4.7 point 4).
    fn do_return(&mut self, ctx: &mut Context, coroutine: Value, value: Value) -> Outcome {
        let frames = self.frames.get_mut(&coroutine).unwrap();
        let returning = frames.pop().expect("return with an empty frame stack");
        if let Some(caller) = frames.last() {
            if returning.return_dest != u32::MAX {
                let stack = unsafe { CoroutineStack::from_value(unsafe { Coroutine::from_value(coroutine) }.stack) };
                stack.registers[caller.register_slot(returning.return_dest)].set(value);
            }
            Outcome::Continue
        } else {
            self.finish_coroutine(ctx, coroutine, value, false);
            Outcome::Done
        }
    }

    fn finish_coroutine(&mut self, _ctx: &mut Context, coroutine: Value, value: Value, failed: bool) {
        let co = unsafe { Coroutine::from_value(coroutine) };
        co.result.set(value);
        co.failed.set(failed);
        co.state.set(CoroutineState::Done);
        self.frames.remove(&coroutine);
    }

    /// Unwinds frames looking for a handler covering `fault_pc` (spec
    /// §4.7 point 5). The panic payload is delivered into register 0 of
    /// the catching frame — a convention chosen here since spec leaves
    /// the handler's entry contract unspecified (see DESIGN.md).
    fn unwind(&mut self, ctx: &mut Context, coroutine: Value, value: Value, fault_pc: usize) -> RillResult<Outcome> {
        let mut pc_to_check = fault_pc;
        loop {
            let found_target = {
                let frames = self.frames.get(&coroutine).unwrap();
                let frame = frames.last().expect("unwind is never called with an empty frame stack");
                let tmpl = unsafe { object::from_value::<FunctionTemplate>(frame.template) };
                tmpl.handlers.iter().find(|h| pc_to_check >= h.start_pc as usize && pc_to_check < h.end_pc as usize).map(|h| h.target_pc)
            };
            if let Some(target) = found_target {
                let stack = unsafe { CoroutineStack::from_value(unsafe { Coroutine::from_value(coroutine) }.stack) };
                let frames = self.frames.get_mut(&coroutine).unwrap();
                let frame = frames.last_mut().unwrap();
                frame.pc = target as usize;
                stack.registers[frame.register_slot(0)].set(value);
                return Ok(Outcome::Continue);
            }
            let frames = self.frames.get_mut(&coroutine).unwrap();
            let popped = frames.pop().expect("handler search ran out of frames");
            pc_to_check = popped.pc;
            if frames.is_empty() {
                self.finish_coroutine(ctx, coroutine, value, true);
                return Ok(Outcome::Done);
            }
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

enum DispatchError {
    Host(RillError),
    Panic(Value),
}

fn panic_str(ctx: &mut Context, message: &str) -> DispatchError {
    let ptr = ctx.heap.allocate(HeapString {
        header: Header::new(ObjectKind::String, std::mem::size_of::<HeapString>() as u32),
        bytes: Box::from(message),
    });
    DispatchError::Panic(unsafe { Value::from_heap_ptr(ptr) })
}

fn error_to_panic(ctx: &mut Context, err: &RillError) -> Value {
    let ptr = ctx.heap.allocate(HeapString {
        header: Header::new(ObjectKind::String, std::mem::size_of::<HeapString>() as u32),
        bytes: err.to_string().into_boxed_str(),
    });
    unsafe { Value::from_heap_ptr(ptr) }
}

fn is_kind(v: Value, kind: ObjectKind) -> bool {
    v.is_heap_ptr() && unsafe { v.as_heap_ptr().as_ref().kind == kind }
}

fn unwrap_callable(v: Value) -> RillResult<(Value, Value)> {
    if is_kind(v, ObjectKind::FunctionTemplate) {
        Ok((v, Value::UNDEFINED))
    } else if is_kind(v, ObjectKind::Function) {
        let f = unsafe { object::from_value::<Function>(v) };
        Ok((f.template, f.env))
    } else {
        Err(RillError::runtime_error("value is not a function"))
    }
}

fn current_module(interp: &Interpreter, coroutine: Value) -> Value {
    let frame = interp.frames.get(&coroutine).unwrap().last().unwrap();
    let tmpl = unsafe { object::from_value::<FunctionTemplate>(frame.template) };
    tmpl.module
}

fn symbol_name(m: &Module, member: u32) -> Option<rill_common::InternedStr> {
    let v = *m.members.get(member as usize)?;
    if is_kind(v, ObjectKind::Symbol) {
        Some(unsafe { object::from_value::<HeapSymbol>(v) }.name)
    } else {
        None
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(v: Value) -> Option<Num> {
    if let Some(i) = v.as_small_int() {
        return Some(Num::Int(i));
    }
    if is_kind(v, ObjectKind::Integer) {
        return Some(Num::Int(unsafe { object::from_value::<HeapInteger>(v) }.value));
    }
    if is_kind(v, ObjectKind::Float) {
        return Some(Num::Float(unsafe { object::from_value::<HeapFloat>(v) }.value));
    }
    None
}

fn as_int(v: Value) -> Option<i64> {
    match as_num(v)? {
        Num::Int(i) => Some(i),
        Num::Float(_) => None,
    }
}

fn make_int(ctx: &mut Context, v: i64) -> Value {
    if let Some(small) = Value::small_int(v) {
        return small;
    }
    let ptr = ctx.heap.allocate(HeapInteger {
        header: Header::new(ObjectKind::Integer, std::mem::size_of::<HeapInteger>() as u32),
        value: v,
    });
    unsafe { Value::from_heap_ptr(ptr) }
}

fn make_float(ctx: &mut Context, v: f64) -> Value {
    let ptr = ctx.heap.allocate(HeapFloat {
        header: Header::new(ObjectKind::Float, std::mem::size_of::<HeapFloat>() as u32),
        value: v,
    });
    unsafe { Value::from_heap_ptr(ptr) }
}

/// Integer arithmetic promotes to `Integer` on overflow; mixing integer
/// and float promotes to float (spec §4.7 tie-breaks).
fn arith(ctx: &mut Context, op: Opcode, l: Value, r: Value) -> Result<Value, String> {
    let (l, r) = (as_num(l).ok_or("arithmetic on a non-number")?, as_num(r).ok_or("arithmetic on a non-number")?);
    match (l, r) {
        (Num::Int(a), Num::Int(b)) => {
            let result = match op {
                Opcode::Add => a.checked_add(b),
                Opcode::Sub => a.checked_sub(b),
                Opcode::Mul => a.checked_mul(b),
                Opcode::Div => {
                    if b == 0 {
                        return Err("division by zero".to_string());
                    }
                    a.checked_div(b)
                }
                Opcode::Mod => {
                    if b == 0 {
                        return Err("division by zero".to_string());
                    }
                    a.checked_rem(b)
                }
                Opcode::Pow => {
                    if let Ok(exp) = u32::try_from(b) {
                        a.checked_pow(exp)
                    } else {
                        None
                    }
                }
                _ => unreachable!(),
            };
            Ok(match result {
                Some(v) => make_int(ctx, v),
                None if op == Opcode::Pow => make_float(ctx, (a as f64).powf(b as f64)),
                None => return Err("integer overflow".to_string()),
            })
        }
        (a, b) => {
            let (a, b) = (to_f64(a), to_f64(b));
            let result = match op {
                Opcode::Add => a + b,
                Opcode::Sub => a - b,
                Opcode::Mul => a * b,
                Opcode::Div => a / b,
                Opcode::Mod => a % b,
                Opcode::Pow => a.powf(b),
                _ => unreachable!(),
            };
            Ok(make_float(ctx, result))
        }
    }
}

fn to_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

fn compare(op: Opcode, l: Value, r: Value) -> Result<bool, String> {
    let (l, r) = (as_num(l).ok_or("comparison on a non-number")?, as_num(r).ok_or("comparison on a non-number")?);
    let (a, b) = (to_f64(l), to_f64(r));
    Ok(match op {
        Opcode::Gt => a > b,
        Opcode::Gte => a >= b,
        Opcode::Lt => a < b,
        Opcode::Lte => a <= b,
        _ => unreachable!(),
    })
}

/// Spec §4.7 tie-breaks: NaN is never equal to anything (including
/// itself); strings compare by byte content; symbols by interned-name
/// identity; every other heap kind by reference identity (the values'
/// raw tagged words).
fn values_equal(a: Value, b: Value) -> bool {
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return match (x, y) {
            (Num::Int(x), Num::Int(y)) => x == y,
            (x, y) => to_f64(x) == to_f64(y),
        };
    }
    if is_kind(a, ObjectKind::String) && is_kind(b, ObjectKind::String) {
        return unsafe { object::from_value::<HeapString>(a) }.bytes == unsafe { object::from_value::<HeapString>(b) }.bytes;
    }
    if is_kind(a, ObjectKind::Symbol) && is_kind(b, ObjectKind::Symbol) {
        return unsafe { object::from_value::<HeapSymbol>(a) }.name == unsafe { object::from_value::<HeapSymbol>(b) }.name;
    }
    a == b
}

/// Looks up `name` in the record's field list, resolved through the
/// owning module's `record_templates` side table (`rec.template` is a
/// member index into that module — see `Module::record_templates`).
fn record_field_index(m: &Module, template: u32, name: rill_common::InternedStr) -> Option<usize> {
    let names = m.record_templates.get(template as usize)?;
    names.iter().position(|n| *n == name)
}

fn record_field(m: &Module, receiver: Value, name: rill_common::InternedStr) -> Option<Value> {
    if !is_kind(receiver, ObjectKind::Record) {
        return None;
    }
    let rec = unsafe { object::from_value::<Record>(receiver) };
    let idx = record_field_index(m, rec.template, name)?;
    rec.fields.get(idx).copied()
}

fn record_field_set(m: &Module, receiver: Value, name: rill_common::InternedStr, value: Value) -> Result<(), String> {
    if !is_kind(receiver, ObjectKind::Record) {
        return Err("not a record".to_string());
    }
    let rec = unsafe { object::from_value::<Record>(receiver) };
    let idx = record_field_index(m, rec.template, name).ok_or("no such field")?;
    let rec = unsafe { object::from_value_mut::<Record>(receiver) };
    rec.fields[idx] = value;
    Ok(())
}

fn index_get(receiver: Value, index: Value) -> Result<Value, String> {
    if is_kind(receiver, ObjectKind::Array) {
        let arr = unsafe { object::from_value::<Array>(receiver) };
        let storage = unsafe { object::from_value::<ArrayStorage>(arr.storage) };
        let i = as_int(index).ok_or("array index must be an integer")?;
        return storage.items.get(i as usize).copied().ok_or_else(|| "array index out of bounds".to_string());
    }
    if is_kind(receiver, ObjectKind::Tuple) {
        let t = unsafe { object::from_value::<Tuple>(receiver) };
        let i = as_int(index).ok_or("tuple index must be an integer")?;
        return t.items.get(i as usize).copied().ok_or_else(|| "tuple index out of bounds".to_string());
    }
    if is_kind(receiver, ObjectKind::HashTable) {
        let h = unsafe { object::from_value::<HashTable>(receiver) };
        let storage = unsafe { object::from_value::<HashTableStorage>(h.storage) };
        return storage
            .entries
            .iter()
            .find(|(k, _)| values_equal(*k, index))
            .map(|(_, v)| *v)
            .ok_or_else(|| "key not found".to_string());
    }
    Err("value does not support indexing".to_string())
}

fn index_set(ctx: &mut Context, receiver: Value, index: Value, value: Value) -> Result<(), String> {
    if is_kind(receiver, ObjectKind::Array) {
        let arr = unsafe { object::from_value::<Array>(receiver) };
        let storage = unsafe { object::from_value_mut::<ArrayStorage>(arr.storage) };
        let i = as_int(index).ok_or("array index must be an integer")?;
        let slot = storage.items.get_mut(i as usize).ok_or("array index out of bounds")?;
        *slot = value;
        return Ok(());
    }
    if is_kind(receiver, ObjectKind::HashTable) {
        let h = unsafe { object::from_value_mut::<HashTable>(receiver) };
        let storage = unsafe { object::from_value_mut::<HashTableStorage>(h.storage) };
        if let Some(entry) = storage.entries.iter_mut().find(|(k, _)| values_equal(*k, index)) {
            entry.1 = value;
        } else {
            storage.entries.push((index, value));
            h.len += 1;
        }
        let _ = ctx;
        return Ok(());
    }
    Err("value does not support index assignment".to_string())
}

fn make_hashtable(ctx: &mut Context, entries: Vec<(Value, Value)>) -> Value {
    let len = entries.len() as u32;
    let storage_ptr = ctx.heap.allocate(HashTableStorage {
        header: Header::new(ObjectKind::HashTableStorage, std::mem::size_of::<HashTableStorage>() as u32),
        entries,
    });
    let storage = unsafe { Value::from_heap_ptr(storage_ptr) };
    let ptr = ctx.heap.allocate(HashTable {
        header: Header::new(ObjectKind::HashTable, std::mem::size_of::<HashTable>() as u32),
        storage,
        len,
    });
    unsafe { Value::from_heap_ptr(ptr) }
}

fn display_value(ctx: &Context, v: Value) -> String {
    if v.is_null() {
        return "null".to_string();
    }
    if v.is_undefined() {
        return "undefined".to_string();
    }
    if let Some(b) = v.as_bool() {
        return b.to_string();
    }
    if let Some(i) = v.as_small_int() {
        return i.to_string();
    }
    if is_kind(v, ObjectKind::Integer) {
        return unsafe { object::from_value::<HeapInteger>(v) }.value.to_string();
    }
    if is_kind(v, ObjectKind::Float) {
        return unsafe { object::from_value::<HeapFloat>(v) }.value.to_string();
    }
    if is_kind(v, ObjectKind::String) {
        return unsafe { object::from_value::<HeapString>(v) }.bytes.to_string();
    }
    if is_kind(v, ObjectKind::Symbol) {
        let name = unsafe { object::from_value::<HeapSymbol>(v) }.name;
        return ctx.strings.resolve(name).to_string();
    }
    "<object>".to_string()
}

fn read_items(code: &[u8], pc: &mut usize, mut read_reg: impl FnMut(u32) -> Value) -> (Vec<Value>, u32) {
    let count = read_u32(code, pc);
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let r = read_u32(code, pc);
        items.push(read_reg(r));
    }
    let dest = read_u32(code, pc);
    (items, dest)
}

fn read_u32(code: &[u8], pc: &mut usize) -> u32 {
    let bytes: [u8; 4] = code[*pc..*pc + 4].try_into().expect("truncated operand");
    *pc += 4;
    u32::from_le_bytes(bytes)
}

fn read_i64(code: &[u8], pc: &mut usize) -> i64 {
    let bytes: [u8; 8] = code[*pc..*pc + 8].try_into().expect("truncated operand");
    *pc += 8;
    i64::from_le_bytes(bytes)
}

fn read_u64(code: &[u8], pc: &mut usize) -> u64 {
    let bytes: [u8; 8] = code[*pc..*pc + 8].try_into().expect("truncated operand");
    *pc += 8;
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-assembles a little-endian code buffer, bypassing
    /// `rill_ir::emit` entirely so these tests exercise `execute_one`'s
    /// decode/dispatch directly rather than through the compiler
    /// pipeline (that round trip is already covered end-to-end by
    /// `rill_loader::host`'s scenario tests).
    struct Asm(Vec<u8>);
    impl Asm {
        fn new() -> Asm {
            Asm(Vec::new())
        }
        fn op(mut self, op: Opcode) -> Asm {
            self.0.push(op as u8);
            self
        }
        fn u32(mut self, v: u32) -> Asm {
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }
        fn i64(mut self, v: i64) -> Asm {
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }
        fn f64_bits(mut self, v: f64) -> Asm {
            self.0.extend_from_slice(&v.to_bits().to_le_bytes());
            self
        }
        fn finish(self) -> Vec<u8> {
            self.0
        }
    }

    /// Builds a standalone one-function module around `code` and spawns
    /// it as a coroutine, returning the coroutine value once the ready
    /// queue has fully drained.
    fn run(ctx: &mut Context, code: Vec<u8>, register_count: u32) -> Value {
        let mut interp = Interpreter::new();
        let code_ptr = ctx.heap.allocate(Code { header: Header::new(ObjectKind::Code, std::mem::size_of::<Code>() as u32), bytes: code.into_boxed_slice() });
        let code_value = unsafe { Value::from_heap_ptr(code_ptr) };
        let module_ptr = ctx.heap.allocate(Module {
            header: Header::new(ObjectKind::Module, std::mem::size_of::<Module>() as u32),
            name: ctx.strings.intern("test"),
            members: Box::new([]),
            record_templates: Box::new([]),
            exports: hashbrown::HashMap::new(),
            initialized: true,
        });
        let module_value = unsafe { Value::from_heap_ptr(module_ptr) };
        let tmpl_ptr = ctx.heap.allocate(FunctionTemplate {
            header: Header::new(ObjectKind::FunctionTemplate, std::mem::size_of::<FunctionTemplate>() as u32),
            name: None,
            param_count: 0,
            register_count,
            is_closure: false,
            handlers: Box::new([]),
            code: code_value,
            module: module_value,
        });
        let tmpl_value = unsafe { Value::from_heap_ptr(tmpl_ptr) };
        let coroutine = interp.spawn(ctx, tmpl_value, &[]).expect("spawn");
        interp.run_ready(ctx).expect("run_ready");
        coroutine
    }

    #[test]
    fn adds_two_small_integers() {
        let mut ctx = Context::new();
        let code = Asm::new()
            .op(Opcode::LoadInt).i64(1).u32(0)
            .op(Opcode::LoadInt).i64(2).u32(1)
            .op(Opcode::Add).u32(0).u32(1).u32(0)
            .op(Opcode::Return).u32(0)
            .finish();
        let coroutine = run(&mut ctx, code, 2);
        let co = unsafe { Coroutine::from_value(coroutine) };
        assert!(matches!(co.state.get(), CoroutineState::Done));
        assert!(!co.failed.get());
        assert_eq!(co.result.get().as_small_int(), Some(3));
    }

    #[test]
    fn division_by_zero_panics_the_coroutine() {
        let mut ctx = Context::new();
        let code = Asm::new()
            .op(Opcode::LoadInt).i64(1).u32(0)
            .op(Opcode::LoadInt).i64(0).u32(1)
            .op(Opcode::Div).u32(0).u32(1).u32(0)
            .op(Opcode::Return).u32(0)
            .finish();
        let coroutine = run(&mut ctx, code, 2);
        let co = unsafe { Coroutine::from_value(coroutine) };
        assert!(matches!(co.state.get(), CoroutineState::Done));
        assert!(co.failed.get());
    }

    #[test]
    fn jmp_false_skips_the_truthy_branch() {
        let mut ctx = Context::new();
        // if (false) { r0 = 1 } else { r0 = 2 }; return r0
        let code = Asm::new()
            .op(Opcode::LoadFalse).u32(1)       // offset 0..5: r1 = false
            .op(Opcode::JmpFalse).u32(1).u32(32) // offset 5..14: !r1 -> jump to the else branch at 32
            .op(Opcode::LoadInt).i64(1).u32(0)   // offset 14..27: r0 = 1 (then branch)
            .op(Opcode::Jmp).u32(45)             // offset 27..32: skip the else branch
            .op(Opcode::LoadInt).i64(2).u32(0)   // offset 32..45: r0 = 2 (else branch)
            .op(Opcode::Return).u32(0)           // offset 45..50
            .finish();
        let coroutine = run(&mut ctx, code, 2);
        let co = unsafe { Coroutine::from_value(coroutine) };
        assert!(!co.failed.get());
        assert_eq!(co.result.get().as_small_int(), Some(2));
    }

    #[test]
    fn nan_is_never_equal_to_itself() {
        let mut ctx = Context::new();
        let code = Asm::new()
            .op(Opcode::LoadFloat).f64_bits(f64::NAN).u32(0)
            .op(Opcode::Eq).u32(0).u32(0).u32(1)
            .op(Opcode::Return).u32(1)
            .finish();
        let coroutine = run(&mut ctx, code, 2);
        let co = unsafe { Coroutine::from_value(coroutine) };
        assert!(!co.failed.get());
        assert_eq!(co.result.get(), Value::FALSE);
    }
}
