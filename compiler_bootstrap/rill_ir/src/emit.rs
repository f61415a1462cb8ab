//! Bytecode emission (spec §4.4): traverses a function's CFG in reverse
//! postorder, emits one opcode per IR instruction, resolves symbolic
//! branch labels once every block's start offset is known, and collects
//! member references for the module assembler.

use hashbrown::HashMap;

use crate::bytecode::{self, HandlerRange, Opcode};
use crate::dominators::reverse_postorder;
use crate::ir::{self, BlockId, ConstKind, ContainerKind, InstId, InstKind, LValue, Terminator};
use crate::regalloc::Allocation;
use rill_common::InternedStr;

/// Accumulates `String`/`Symbol` constants that `LoadConst`/`AssertFail`
/// reference but that the IR builder never hoisted to a module member
/// (inline literals live only as per-function `Constant` instructions).
/// Emission appends one deduplicated module member per distinct interned
/// string the first time a function references it, assigning member ids
/// starting right after the IR module's own members.
struct ConstPool {
    base: bytecode::MemberId,
    seen: HashMap<InternedStr, bytecode::MemberId>,
    new_members: Vec<bytecode::Member>,
}

impl ConstPool {
    fn new(base: bytecode::MemberId) -> ConstPool {
        ConstPool { base, seen: HashMap::new(), new_members: Vec::new() }
    }

    fn string(&mut self, s: InternedStr) -> bytecode::MemberId {
        self.member(s, bytecode::Member::String(s))
    }

    fn symbol(&mut self, s: InternedStr) -> bytecode::MemberId {
        self.member(s, bytecode::Member::Symbol(s))
    }

    fn member(&mut self, key: InternedStr, make: bytecode::Member) -> bytecode::MemberId {
        if let Some(&id) = self.seen.get(&key) {
            return id;
        }
        let id = self.base + self.new_members.len() as bytecode::MemberId;
        self.new_members.push(make);
        self.seen.insert(key, id);
        id
    }
}

/// Lowers every function member of an IR module to its bytecode form. The
/// register allocation and required passes (critical-edge splitting, CSSA,
/// DCE) must already have run on `module`'s functions.
pub fn emit_module(module: &ir::Module) -> bytecode::Module {
    let mut pool = ConstPool::new(module.members.len() as bytecode::MemberId);
    let mut members = Vec::with_capacity(module.members.len());
    for member in &module.members {
        members.push(match member {
            ir::Member::Function(f) => bytecode::Member::Function(emit_function(f, &mut pool)),
            ir::Member::Import { module, name } => bytecode::Member::Import { module: *module, name: *name },
            ir::Member::Variable { name, exported } => bytecode::Member::Variable { name: *name, exported: *exported },
            ir::Member::Constant(ConstKind::Integer(v)) => bytecode::Member::Integer(*v),
            ir::Member::Constant(ConstKind::Float(bits)) => bytecode::Member::Float(*bits),
            ir::Member::Constant(ConstKind::String(s)) => bytecode::Member::String(*s),
            ir::Member::Constant(ConstKind::Symbol(s)) => bytecode::Member::Symbol(*s),
            ir::Member::Constant(ConstKind::Null | ConstKind::Bool(_)) => {
                // Null/Bool constants never need a standalone module member;
                // they're always emitted inline via LoadNull/LoadTrue/LoadFalse.
                bytecode::Member::Integer(0)
            }
            ir::Member::RecordTemplate(t) => bytecode::Member::RecordTemplate(bytecode::RecordTemplate { fields: t.fields.clone() }),
        });
    }
    members.extend(pool.new_members);
    bytecode::Module { name: module.name, members, init_function: module.init_function }
}

struct Label {
    offset: usize,
}

enum PendingJump {
    Jmp { fixup: usize, target: BlockId },
    JmpTrue { fixup: usize, target: BlockId },
    JmpFalse { fixup: usize, target: BlockId },
}

pub fn emit_function(func: &ir::Function, pool: &mut ConstPool) -> bytecode::Function {
    let mut func = func.clone();
    crate::passes::split_critical_edges(&mut func);
    crate::passes::build_cssa(&mut func);
    crate::passes::eliminate_dead_code(&mut func);
    let alloc = crate::regalloc::allocate(&mut func);

    let order = reverse_postorder(&func);
    let mut code = Vec::new();
    let mut block_labels: HashMap<BlockId, Label> = HashMap::new();
    let mut pending_jumps: Vec<PendingJump> = Vec::new();
    let mut handlers = Vec::new();

    for &block in &order {
        block_labels.insert(block, Label { offset: code.len() });
        emit_block(&func, block, &alloc, &mut code, &mut pending_jumps, &mut handlers, pool);
    }

    for jump in pending_jumps {
        match jump {
            PendingJump::Jmp { fixup, target } | PendingJump::JmpTrue { fixup, target } | PendingJump::JmpFalse { fixup, target } => {
                let target_offset = block_labels[&target].offset as u32;
                code[fixup..fixup + 4].copy_from_slice(&target_offset.to_le_bytes());
            }
        }
    }

    bytecode::Function {
        name: func.name,
        param_count: func.params.len() as u32,
        register_count: alloc.register_count,
        kind: match func.kind {
            ir::FunctionKind::Normal => bytecode::FunctionKind::Normal,
            ir::FunctionKind::Closure => bytecode::FunctionKind::Closure,
        },
        handlers,
        code,
    }
}

fn emit_block(
    func: &ir::Function,
    block: BlockId,
    alloc: &Allocation,
    code: &mut Vec<u8>,
    pending_jumps: &mut Vec<PendingJump>,
    _handlers: &mut Vec<HandlerRange>,
    pool: &mut ConstPool,
) {
    for &inst_id in &func.blocks[block as usize].instructions {
        emit_instruction(func, inst_id, alloc, code, pool);
    }
    emit_terminator(func, block, alloc, code, pending_jumps, pool);
}

fn reg(alloc: &Allocation, id: InstId) -> u32 {
    alloc.registers.get(&id).copied().unwrap_or(0)
}

fn emit_instruction(func: &ir::Function, inst_id: InstId, alloc: &Allocation, code: &mut Vec<u8>, pool: &mut ConstPool) {
    let dest = reg(alloc, inst_id);
    match &func.instructions[inst_id as usize].kind {
        InstKind::UseLocal(_) | InstKind::Phi(_) => {
            // Aliases and phi destinations carry no independent runtime
            // value; the register allocator already gave them the same
            // register as whatever they alias, so nothing to emit.
        }
        InstKind::Constant(ConstKind::Null) => push_op(code, Opcode::LoadNull, dest),
        InstKind::Constant(ConstKind::Bool(true)) => push_op(code, Opcode::LoadTrue, dest),
        InstKind::Constant(ConstKind::Bool(false)) => push_op(code, Opcode::LoadFalse, dest),
        InstKind::Constant(ConstKind::Integer(v)) => {
            code.push(Opcode::LoadInt as u8);
            code.extend_from_slice(&v.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::Constant(ConstKind::Float(bits)) => {
            code.push(Opcode::LoadFloat as u8);
            code.extend_from_slice(&bits.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::Constant(ConstKind::String(s)) => {
            let member = pool.string(*s);
            code.push(Opcode::LoadConst as u8);
            code.extend_from_slice(&member.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::Constant(ConstKind::Symbol(s)) => {
            let member = pool.symbol(*s);
            code.push(Opcode::LoadConst as u8);
            code.extend_from_slice(&member.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::OuterEnvironment => {
            // Not a slot load: env=u32::MAX/index=u32::MAX is the sentinel
            // pair meaning "the current frame's own captured environment
            // object", reusing LoadClosure rather than adding an opcode
            // outside the §4.4 repertoire.
            code.push(Opcode::LoadClosure as u8);
            code.extend_from_slice(&u32::MAX.to_le_bytes());
            code.extend_from_slice(&u32::MAX.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::BinaryOp(op, l, r) => {
            code.push(binop_opcode(*op) as u8);
            code.extend_from_slice(&reg(alloc, *l).to_le_bytes());
            code.extend_from_slice(&reg(alloc, *r).to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::UnaryOp(op, v) => {
            code.push(unop_opcode(*op) as u8);
            code.extend_from_slice(&reg(alloc, *v).to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::Call { callee, args } => {
            code.push(Opcode::Call as u8);
            code.extend_from_slice(&reg(alloc, *callee).to_le_bytes());
            let arg_regs = &func.arg_lists[*args as usize];
            code.extend_from_slice(&(arg_regs.len() as u32).to_le_bytes());
            for &a in arg_regs {
                code.extend_from_slice(&reg(alloc, a).to_le_bytes());
            }
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::MethodHandle { receiver, name } => {
            let member = pool.symbol(*name);
            code.push(Opcode::LoadMethod as u8);
            code.extend_from_slice(&reg(alloc, *receiver).to_le_bytes());
            code.extend_from_slice(&member.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::MethodCall { handle, args } => {
            code.push(Opcode::CallMethod as u8);
            code.extend_from_slice(&reg(alloc, *handle).to_le_bytes());
            let arg_regs = &func.arg_lists[*args as usize];
            code.extend_from_slice(&(arg_regs.len() as u32).to_le_bytes());
            for &a in arg_regs {
                code.extend_from_slice(&reg(alloc, a).to_le_bytes());
            }
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::MakeEnvironment { parent, size } => {
            code.push(Opcode::MakeEnvironment as u8);
            code.extend_from_slice(&parent.map(|p| reg(alloc, p)).unwrap_or(u32::MAX).to_le_bytes());
            code.extend_from_slice(&size.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::MakeClosure { template, env } => {
            code.push(Opcode::MakeClosure as u8);
            code.extend_from_slice(&template.to_le_bytes());
            code.extend_from_slice(&reg(alloc, *env).to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::Container { kind, items } => {
            let item_regs = &func.arg_lists[*items as usize];
            match kind {
                ContainerKind::Array => code.push(Opcode::MakeArray as u8),
                ContainerKind::Tuple => code.push(Opcode::MakeTuple as u8),
                ContainerKind::Set => code.push(Opcode::MakeSet as u8),
                ContainerKind::Map => code.push(Opcode::MakeMap as u8),
                ContainerKind::Record(template) => {
                    code.push(Opcode::MakeRecord as u8);
                    code.extend_from_slice(&template.to_le_bytes());
                }
            }
            code.extend_from_slice(&(item_regs.len() as u32).to_le_bytes());
            for &item in item_regs {
                code.extend_from_slice(&reg(alloc, item).to_le_bytes());
            }
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::Format(parts) => {
            let part_regs = &func.arg_lists[*parts as usize];
            code.push(Opcode::FormatString as u8);
            code.extend_from_slice(&(part_regs.len() as u32).to_le_bytes());
            for &p in part_regs {
                code.extend_from_slice(&reg(alloc, p).to_le_bytes());
            }
            code.extend_from_slice(&dest.to_le_bytes());
        }
        InstKind::UseLValue(lv) => emit_load_lvalue(lv, alloc, dest, code, pool),
        InstKind::StoreLValue { target, value } => emit_store_lvalue(target, reg(alloc, *value), alloc, code, pool),
    }
}

fn push_op(code: &mut Vec<u8>, op: Opcode, dest: u32) {
    code.push(op as u8);
    code.extend_from_slice(&dest.to_le_bytes());
}

fn emit_load_lvalue(lv: &LValue, alloc: &Allocation, dest: u32, code: &mut Vec<u8>, pool: &mut ConstPool) {
    match lv {
        LValue::Param(i) => {
            code.push(Opcode::LoadParam as u8);
            code.extend_from_slice(&i.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        LValue::Module(m) => {
            code.push(Opcode::LoadModule as u8);
            code.extend_from_slice(&m.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        LValue::Closure { env, index } => {
            code.push(Opcode::LoadClosure as u8);
            code.extend_from_slice(&reg(alloc, *env).to_le_bytes());
            code.extend_from_slice(&index.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        LValue::Field { object, name } => {
            let member = pool.symbol(*name);
            code.push(Opcode::LoadMember as u8);
            code.extend_from_slice(&reg(alloc, *object).to_le_bytes());
            code.extend_from_slice(&member.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        LValue::Index { object, index } => {
            code.push(Opcode::LoadIndex as u8);
            code.extend_from_slice(&reg(alloc, *object).to_le_bytes());
            code.extend_from_slice(&reg(alloc, *index).to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
        LValue::Global(name) => {
            let member = pool.symbol(*name);
            code.push(Opcode::LoadGlobal as u8);
            code.extend_from_slice(&member.to_le_bytes());
            code.extend_from_slice(&dest.to_le_bytes());
        }
    }
}

fn emit_store_lvalue(lv: &LValue, value_reg: u32, alloc: &Allocation, code: &mut Vec<u8>, pool: &mut ConstPool) {
    match lv {
        LValue::Param(i) => {
            code.push(Opcode::StoreParam as u8);
            code.extend_from_slice(&i.to_le_bytes());
            code.extend_from_slice(&value_reg.to_le_bytes());
        }
        LValue::Module(m) => {
            code.push(Opcode::StoreModule as u8);
            code.extend_from_slice(&m.to_le_bytes());
            code.extend_from_slice(&value_reg.to_le_bytes());
        }
        LValue::Closure { env, index } => {
            code.push(Opcode::StoreClosure as u8);
            code.extend_from_slice(&reg(alloc, *env).to_le_bytes());
            code.extend_from_slice(&index.to_le_bytes());
            code.extend_from_slice(&value_reg.to_le_bytes());
        }
        LValue::Field { object, name } => {
            let member = pool.symbol(*name);
            code.push(Opcode::StoreField as u8);
            code.extend_from_slice(&reg(alloc, *object).to_le_bytes());
            code.extend_from_slice(&member.to_le_bytes());
            code.extend_from_slice(&value_reg.to_le_bytes());
        }
        LValue::Index { object, index } => {
            code.push(Opcode::StoreIndex as u8);
            code.extend_from_slice(&reg(alloc, *object).to_le_bytes());
            code.extend_from_slice(&reg(alloc, *index).to_le_bytes());
            code.extend_from_slice(&value_reg.to_le_bytes());
        }
        LValue::Global(_) => {
            // Unreachable from `rill_ir::builder`, which rejects assigning
            // to a global as a semantic error (no StoreGlobal opcode
            // exists); kept for IR-level completeness if another builder
            // ever constructs this shape directly.
            unreachable!("LValue::Global has no valid store encoding")
        }
    }
}

fn emit_terminator(
    func: &ir::Function,
    block: BlockId,
    alloc: &Allocation,
    code: &mut Vec<u8>,
    pending_jumps: &mut Vec<PendingJump>,
    pool: &mut ConstPool,
) {
    match func.blocks[block as usize].terminator {
        Terminator::Jump(target) => {
            code.push(Opcode::Jmp as u8);
            let fixup = code.len();
            code.extend_from_slice(&0u32.to_le_bytes());
            pending_jumps.push(PendingJump::Jmp { fixup, target });
        }
        Terminator::Branch { cond, then_block, else_block } => {
            code.push(Opcode::JmpFalsePop as u8);
            code.extend_from_slice(&reg(alloc, cond).to_le_bytes());
            let fixup = code.len();
            code.extend_from_slice(&0u32.to_le_bytes());
            pending_jumps.push(PendingJump::JmpFalse { fixup, target: else_block });
            code.push(Opcode::Jmp as u8);
            let fixup2 = code.len();
            code.extend_from_slice(&0u32.to_le_bytes());
            pending_jumps.push(PendingJump::Jmp { fixup: fixup2, target: then_block });
        }
        Terminator::Return(value) => {
            code.push(Opcode::Return as u8);
            code.extend_from_slice(&value.map(|v| reg(alloc, v)).unwrap_or(u32::MAX).to_le_bytes());
        }
        Terminator::Rethrow(v) => {
            code.push(Opcode::Rethrow as u8);
            code.extend_from_slice(&reg(alloc, v).to_le_bytes());
        }
        Terminator::AssertFail { message } => {
            let member = pool.string(message);
            code.push(Opcode::AssertFail as u8);
            code.extend_from_slice(&member.to_le_bytes());
        }
        Terminator::Exit | Terminator::Never | Terminator::Entry | Terminator::None => {
            // Entry carries no code of its own; Exit/Never blocks have no
            // successor to fall through to and a preceding instruction
            // already set the coroutine's terminal state.
        }
    }
}

fn binop_opcode(op: rill_parser::BinOp) -> Opcode {
    use rill_parser::BinOp::*;
    match op {
        Add => Opcode::Add,
        Sub => Opcode::Sub,
        Mul => Opcode::Mul,
        Div => Opcode::Div,
        Mod => Opcode::Mod,
        Pow => Opcode::Pow,
        Eq => Opcode::Eq,
        NotEq => Opcode::NEq,
        Lt => Opcode::Lt,
        LtEq => Opcode::Lte,
        Gt => Opcode::Gt,
        GtEq => Opcode::Gte,
    }
}

fn unop_opcode(op: rill_parser::UnOp) -> Opcode {
    use rill_parser::UnOp::*;
    match op {
        Neg => Opcode::USub,
        Pos => Opcode::UAdd,
        Not => Opcode::LNot,
        BitNot => Opcode::BNot,
    }
}
