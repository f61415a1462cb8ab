//! SSA-form IR data model (spec §3: IR module, IR function, instruction
//! value, closure environment).

use rill_common::InternedStr;
use rill_parser::{BinOp, UnOp};

pub type MemberId = u32;
pub type BlockId = u32;
pub type InstId = u32;
/// Index into a function's [`Function::arg_lists`] arena — the "local
/// lists (argument vectors)" of spec §3, shared storage for phi operands,
/// call arguments, and container items so they aren't each an inline `Vec`.
pub type ArgListId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstKind {
    Null,
    Bool(bool),
    Integer(i64),
    Float(u64), // bit pattern; f64 isn't Eq, stored as raw bits for LVN hashing
    String(InternedStr),
    Symbol(InternedStr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Array,
    Tuple,
    Record(MemberId),
    Set,
    Map,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LValue {
    /// The `i`th declared parameter of the current function (`LoadParam`).
    Param(u32),
    Module(MemberId),
    /// A slot in a materialized closure environment object (spec §4.1:
    /// "accesses become `UseLValue(Closure(env, index))`").
    Closure { env: InstId, index: u32 },
    Field { object: InstId, name: InternedStr },
    Index { object: InstId, index: InstId },
    /// A free identifier with no statically resolved binding; loaded
    /// dynamically from the host/module global namespace (`LoadGlobal`).
    Global(InternedStr),
}

/// One SSA value's defining operation (spec §3: Instruction value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    UseLocal(InstId),
    Phi(ArgListId),
    Constant(ConstKind),
    OuterEnvironment,
    BinaryOp(BinOp, InstId, InstId),
    UnaryOp(UnOp, InstId),
    Call { callee: InstId, args: ArgListId },
    MethodHandle { receiver: InstId, name: InternedStr },
    MethodCall { handle: InstId, args: ArgListId },
    MakeEnvironment { parent: Option<InstId>, size: u32 },
    MakeClosure { template: MemberId, env: InstId },
    Container { kind: ContainerKind, items: ArgListId },
    Format(ArgListId),
    UseLValue(LValue),
    /// Store-as-value bookkeeping for assignment targets; not itself
    /// read, present so the store has an SSA identity DCE can reason
    /// about as a side-effecting root.
    StoreLValue { target: LValue, value: InstId },
}

impl InstKind {
    /// Whether this instruction has an externally observable effect and
    /// must survive dead-code elimination regardless of use count.
    pub fn has_side_effect(&self) -> bool {
        matches!(
            self,
            InstKind::Call { .. }
                | InstKind::MethodCall { .. }
                | InstKind::StoreLValue { .. }
                | InstKind::MakeEnvironment { .. }
        )
    }

    /// Whether two instructions are interchangeable for local value
    /// numbering: same opcode, same operands, same constants (spec §4.1).
    pub fn lvn_key(&self) -> Option<(&'static str, Vec<i64>)> {
        use InstKind::*;
        let key = |tag: &'static str, ops: Vec<i64>| Some((tag, ops));
        match self {
            Constant(ConstKind::Null) => key("const.null", vec![]),
            Constant(ConstKind::Bool(b)) => key("const.bool", vec![*b as i64]),
            Constant(ConstKind::Integer(i)) => key("const.int", vec![*i]),
            Constant(ConstKind::Float(bits)) => key("const.float", vec![*bits as i64]),
            Constant(ConstKind::String(s)) => key("const.str", vec![s.index() as i64]),
            Constant(ConstKind::Symbol(s)) => key("const.sym", vec![s.index() as i64]),
            BinaryOp(op, lhs, rhs) => key("bin", vec![*op as i64, *lhs as i64, *rhs as i64]),
            UnaryOp(op, operand) => key("un", vec![*op as i64, *operand as i64]),
            OuterEnvironment => key("outer_env", vec![]),
            UseLValue(LValue::Module(m)) => key("lv.module", vec![*m as i64]),
            UseLValue(LValue::Closure { env, index }) => key("lv.closure", vec![*env as i64, *index as i64]),
            UseLValue(LValue::Global(name)) => key("lv.global", vec![name.index() as i64]),
            // Field/Index/calls/containers are not pure-cacheable: a field
            // read can observe mutation between occurrences, so they are
            // excluded from LVN.
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub id: InstId,
    pub block: BlockId,
    pub kind: InstKind,
}

/// A block's terminator (spec §3: one of {None, Jump, Branch, Return,
/// Exit, Rethrow, AssertFail, Never, Entry}).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// Block under construction; not yet closed.
    None,
    Jump(BlockId),
    Branch { cond: InstId, then_block: BlockId, else_block: BlockId },
    Return(Option<InstId>),
    Exit,
    Rethrow(InstId),
    AssertFail { message: InternedStr },
    /// Control never reaches the end of this block (e.g. both arms of
    /// every path inside it already returned/broke/continued).
    Never,
    /// Marks the function's unique entry block; carries no control-flow
    /// meaning of its own beyond identifying block 0 to later passes.
    Entry,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Instructions in emission order; by convention all `Phi`
    /// instructions are contiguous at the front (spec §3 invariant).
    pub instructions: Vec<InstId>,
    pub predecessors: Vec<BlockId>,
    pub terminator: Terminator,
    /// Set once sealed (Braun et al.): all predecessors are known and no
    /// further ones will be added.
    pub sealed: bool,
}

impl BasicBlock {
    pub fn phi_count(&self, instructions: &[Instruction]) -> usize {
        self.instructions
            .iter()
            .take_while(|&&id| matches!(instructions[id as usize].kind, InstKind::Phi(_)))
            .count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordTemplate {
    pub fields: Vec<InternedStr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Normal,
    Closure,
}

/// An IR function: blocks, instructions, parameters, local lists and
/// record templates (spec §3: "IR function").
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<InternedStr>,
    pub kind: FunctionKind,
    pub entry: BlockId,
    /// Parameter SSA ids, one per declared parameter, defined at entry.
    pub params: Vec<InstId>,
    pub blocks: Vec<BasicBlock>,
    pub instructions: Vec<Instruction>,
    pub arg_lists: Vec<Vec<InstId>>,
    pub record_templates: Vec<RecordTemplate>,
    /// Number of registers assigned by register allocation; `None` until
    /// `rill_ir::regalloc::allocate` has run.
    pub register_count: Option<u32>,
    /// Dominator-tree cache, invalidated by critical-edge splitting
    /// (spec §4.2 [ADD]).
    pub dominators: Option<Vec<BlockId>>,
}

impl Function {
    pub fn new(name: Option<InternedStr>, kind: FunctionKind) -> Self {
        let entry_block = BasicBlock {
            id: 0,
            instructions: Vec::new(),
            predecessors: Vec::new(),
            terminator: Terminator::Entry,
            sealed: false,
        };
        Function {
            name,
            kind,
            entry: 0,
            params: Vec::new(),
            blocks: vec![entry_block],
            instructions: Vec::new(),
            arg_lists: Vec::new(),
            record_templates: Vec::new(),
            register_count: None,
            dominators: None,
        }
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = self.blocks.len() as BlockId;
        self.blocks.push(BasicBlock {
            id,
            instructions: Vec::new(),
            predecessors: Vec::new(),
            terminator: Terminator::None,
            sealed: false,
        });
        self.dominators = None;
        id
    }

    pub fn push_inst(&mut self, block: BlockId, kind: InstKind) -> InstId {
        let id = self.instructions.len() as InstId;
        self.instructions.push(Instruction { id, block, kind });
        self.blocks[block as usize].instructions.push(id);
        id
    }

    /// Inserts a phi at the front of `block`'s instruction list, keeping
    /// the phis-first invariant.
    pub fn push_phi(&mut self, block: BlockId, args: ArgListId) -> InstId {
        let id = self.instructions.len() as InstId;
        self.instructions.push(Instruction { id, block, kind: InstKind::Phi(args) });
        self.blocks[block as usize].instructions.insert(0, id);
        id
    }

    pub fn new_arg_list(&mut self, items: Vec<InstId>) -> ArgListId {
        let id = self.arg_lists.len() as ArgListId;
        self.arg_lists.push(items);
        id
    }

    pub fn new_record_template(&mut self, fields: Vec<InternedStr>) -> MemberId {
        let id = self.record_templates.len() as MemberId;
        self.record_templates.push(RecordTemplate { fields });
        id
    }

    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        self.blocks[block as usize].terminator = term;
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[to as usize].predecessors.push(from);
    }

    /// Blocks in increasing id order, which for this builder's structured
    /// emission is already a valid reverse-postorder traversal.
    pub fn blocks_in_order(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }
}

#[derive(Debug, Clone)]
pub enum Member {
    Function(Function),
    Import { module: InternedStr, name: InternedStr },
    Variable { name: InternedStr, exported: bool },
    Constant(ConstKind),
    RecordTemplate(RecordTemplate),
}

/// An IR module: a set of members keyed by stable identifiers (spec §3).
#[derive(Debug, Clone)]
pub struct Module {
    pub name: InternedStr,
    pub members: Vec<Member>,
    pub init_function: MemberId,
    pub valid: bool,
}

impl Module {
    pub fn new(name: InternedStr) -> Self {
        Module { name, members: Vec::new(), init_function: 0, valid: true }
    }

    pub fn add_member(&mut self, member: Member) -> MemberId {
        let id = self.members.len() as MemberId;
        self.members.push(member);
        id
    }

    pub fn function(&self, id: MemberId) -> Option<&Function> {
        match &self.members[id as usize] {
            Member::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn function_mut(&mut self, id: MemberId) -> Option<&mut Function> {
        match &mut self.members[id as usize] {
            Member::Function(f) => Some(f),
            _ => None,
        }
    }
}
