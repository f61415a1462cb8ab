//! Call frames (spec §4.7): "`params` lives immediately below the frame
//! header on the stack; `locals` immediately above". Here the stack is a
//! coroutine's flat [`rill_memory::object::CoroutineStack::registers`]
//! vector; a `Frame` records the window within it this call owns rather
//! than re-introducing a register abstraction at runtime (the compiler
//! already lowered register operations to local-index operations at
//! emission time, per spec §4.7).

use rill_memory::Value;

/// A single activation of a user (bytecode) function.
///
/// `base` is the offset into the owning coroutine's register vector
/// where this frame's window starts: `[base, base + param_count)` holds
/// parameters (addressed by `LoadParam`/`StoreParam`), and
/// `[base + param_count, base + param_count + register_count)` holds the
/// function's SSA registers (addressed by every other `Load*`/`Store*`
/// that names a register operand).
pub struct Frame {
    /// The `FunctionTemplate` this frame is executing.
    pub template: Value,
    /// The closure's captured `Environment`, or `Value::UNDEFINED` if
    /// the function isn't a closure (`OuterEnvironment`/`LoadClosure`
    /// with the `u32::MAX` sentinel reads this).
    pub env: Value,
    pub base: usize,
    pub param_count: u32,
    pub register_count: u32,
    pub pc: usize,
    /// Register index in the *caller* frame that should receive this
    /// frame's return value once it returns; `u32::MAX` marks the
    /// coroutine's outermost frame, whose return instead sets the
    /// coroutine's own result slot.
    pub return_dest: u32,
    /// Set when this frame is parked on a `NativeAsyncFunction` call: the
    /// register that should receive the value the fired resume token
    /// delivers. `None` means this frame isn't currently waiting on one.
    pub pending_async_dest: Option<u32>,
    /// Scratch operand stack for the stack-flavored opcodes
    /// (`Dup`/`Pop`/`Rotate2`/`Rotate3`/`Rotate4`/non-`Pop` conditional
    /// jumps) that the register-addressed bytecode this workspace emits
    /// never actually produces, but that the opcode repertoire still
    /// names (spec §4.4).
    pub expr_stack: Vec<Value>,
}

impl Frame {
    pub fn new(template: Value, env: Value, base: usize, param_count: u32, register_count: u32, return_dest: u32) -> Frame {
        Frame {
            template,
            env,
            base,
            param_count,
            register_count,
            pc: 0,
            return_dest,
            pending_async_dest: None,
            expr_stack: Vec::new(),
        }
    }

    pub fn window_len(&self) -> usize {
        (self.param_count + self.register_count) as usize
    }

    pub fn param_slot(&self, index: u32) -> usize {
        debug_assert!(index < self.param_count, "param index out of range");
        self.base + index as usize
    }

    pub fn register_slot(&self, index: u32) -> usize {
        debug_assert!(index < self.register_count, "register index out of range");
        self.base + self.param_count as usize + index as usize
    }
}
