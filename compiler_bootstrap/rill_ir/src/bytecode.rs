//! Bytecode data model (spec §3 "Bytecode module"/"Bytecode function",
//! §4.4 opcode repertoire, §6 on-disk module file layout).
//!
//! Two encodings coexist by design (SPEC_FULL.md §4.4 [ADD]): a function's
//! in-memory code buffer uses little-endian operands (matching
//! `original_source/lib/hammer/compiler/opcodes.hpp`'s stack-machine
//! layout), while the on-disk module file uses a big-endian varint header
//! format. [`Module::write_to`]/[`Module::read_from`] are the only place
//! that boundary is crossed.

use rill_common::{InternedStr, RillError, RillResult};

pub type MemberId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    LoadNull = 0,
    LoadFalse,
    LoadTrue,
    LoadInt,
    LoadFloat,
    LoadConst,
    LoadParam,
    LoadLocal,
    LoadClosure,
    LoadModule,
    LoadGlobal,
    /// Not in spec §4.4's abridged Loads list, but required to read
    /// `a.b`/`a[i]` expressions back; added symmetrically with the
    /// Stores category's `StoreMember`/`StoreIndex`, matching
    /// `original_source`'s paired `load_member`/`load_index` opcodes.
    LoadMember,
    LoadIndex,

    StoreParam,
    StoreLocal,
    StoreClosure,
    StoreModule,
    StoreMember,
    StoreIndex,
    StoreField,

    Dup,
    Pop,
    Rotate2,
    Rotate3,
    Rotate4,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    UAdd,
    USub,
    LNot,
    BNot,
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    NEq,

    Jmp,
    JmpTrue,
    JmpTruePop,
    JmpFalse,
    JmpFalsePop,

    Call,
    Return,
    LoadMethod,
    CallMethod,

    MakeArray,
    MakeTuple,
    MakeMap,
    MakeSet,
    MakeRecord,
    MakeClosure,
    MakeEnvironment,
    /// String interpolation (spec §3 "Format"): concatenates the string
    /// representation of each part register into one `String`. Not in
    /// spec §4.4's abridged opcode list, but required so interpolation
    /// lowers to something the interpreter can execute directly rather
    /// than an unmarked `MakeArray` a later, never-built pass would have
    /// had to fold.
    FormatString,

    AssertFail,
    Rethrow,
}

impl Opcode {
    pub fn from_u8(b: u8) -> Option<Opcode> {
        if b <= Opcode::Rethrow as u8 {
            // Safety-free conversion: Opcode is a fieldless, densely
            // numbered repr(u8) enum so every value in range is valid.
            Some(unsafe { std::mem::transmute::<u8, Opcode>(b) })
        } else {
            None
        }
    }
}

/// An (start-pc, end-pc, target-pc) panic-handler range (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerRange {
    pub start_pc: u32,
    pub end_pc: u32,
    pub target_pc: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Normal,
    Closure,
}

/// A compiled function: header plus a byte-addressable, variable-length
/// instruction stream (spec §3, §4.4).
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<InternedStr>,
    pub param_count: u32,
    pub register_count: u32,
    pub kind: FunctionKind,
    pub handlers: Vec<HandlerRange>,
    pub code: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RecordTemplate {
    pub fields: Vec<InternedStr>,
}

#[derive(Debug, Clone)]
pub enum Member {
    Integer(i64),
    Float(u64),
    String(InternedStr),
    Symbol(InternedStr),
    Import { module: InternedStr, name: InternedStr },
    Variable { name: InternedStr, exported: bool },
    Function(Function),
    RecordTemplate(RecordTemplate),
}

/// On-disk member type tags (spec §6: "each member starts with a
/// one-byte type tag"). Stable across versions; never renumber.
#[repr(u8)]
enum MemberTag {
    Integer = 0,
    Float = 1,
    String = 2,
    Symbol = 3,
    Import = 4,
    Variable = 5,
    Function = 6,
    RecordTemplate = 7,
}

const MAGIC: [u8; 4] = *b"RILB";
const VERSION: u16 = 1;

#[derive(Debug, Clone)]
pub struct Module {
    pub name: InternedStr,
    pub members: Vec<Member>,
    pub init_function: MemberId,
}

impl Module {
    pub fn function(&self, id: MemberId) -> Option<&Function> {
        match &self.members[id as usize] {
            Member::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Serializes the module to the file layout of spec §6: magic,
    /// version, member count, then each member's tag and body. Integers
    /// are big-endian LEB128; strings are length-prefixed UTF-8 resolved
    /// through `strings`.
    pub fn write_to(&self, out: &mut Vec<u8>, strings: &rill_common::StringTable) {
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_be_bytes());
        write_varint_be(out, self.members.len() as u64);
        write_varint_be(out, self.init_function as u64);
        write_string(out, strings.resolve(self.name));
        for member in &self.members {
            write_member(out, member, strings);
        }
    }

    /// Reverses [`Module::write_to`]. `intern` is used to re-intern every
    /// string payload into the reader's own string table, since member
    /// bodies and function code buffers only ever reference it as handles.
    pub fn read_from(bytes: &[u8], intern: &mut dyn FnMut(&str) -> InternedStr) -> RillResult<Module> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let magic = cursor.take(4)?;
        if magic != MAGIC {
            return Err(RillError::loader_error("not a Rill bytecode module (bad magic)"));
        }
        let version = u16::from_be_bytes(cursor.take(2)?.try_into().unwrap());
        if version != VERSION {
            return Err(RillError::loader_error(format!("unsupported bytecode module version {version}")));
        }
        let member_count = cursor.read_varint_be()? as usize;
        let init_function = cursor.read_varint_be()? as MemberId;
        let name = intern(&cursor.read_string()?);

        let mut members = Vec::with_capacity(member_count);
        for _ in 0..member_count {
            members.push(read_member(&mut cursor, intern)?);
        }
        Ok(Module { name, members, init_function })
    }
}

fn write_member(out: &mut Vec<u8>, member: &Member, strings: &rill_common::StringTable) {
    match member {
        Member::Integer(v) => {
            out.push(MemberTag::Integer as u8);
            write_varint_be_signed(out, *v);
        }
        Member::Float(bits) => {
            out.push(MemberTag::Float as u8);
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Member::String(s) => {
            out.push(MemberTag::String as u8);
            write_string(out, strings.resolve(*s));
        }
        Member::Symbol(s) => {
            out.push(MemberTag::Symbol as u8);
            write_string(out, strings.resolve(*s));
        }
        Member::Import { module, name } => {
            out.push(MemberTag::Import as u8);
            write_string(out, strings.resolve(*module));
            write_string(out, strings.resolve(*name));
        }
        Member::Variable { name, exported } => {
            out.push(MemberTag::Variable as u8);
            write_string(out, strings.resolve(*name));
            out.push(*exported as u8);
        }
        Member::Function(f) => {
            out.push(MemberTag::Function as u8);
            write_opt_string(out, f.name.map(|n| strings.resolve(n)));
            write_varint_be(out, f.param_count as u64);
            write_varint_be(out, f.register_count as u64);
            out.push(matches!(f.kind, FunctionKind::Closure) as u8);
            write_varint_be(out, f.handlers.len() as u64);
            for h in &f.handlers {
                write_varint_be(out, h.start_pc as u64);
                write_varint_be(out, h.end_pc as u64);
                write_varint_be(out, h.target_pc as u64);
            }
            write_varint_be(out, f.code.len() as u64);
            out.extend_from_slice(&f.code);
        }
        Member::RecordTemplate(t) => {
            out.push(MemberTag::RecordTemplate as u8);
            write_varint_be(out, t.fields.len() as u64);
            for field in &t.fields {
                write_string(out, strings.resolve(*field));
            }
        }
    }
}

fn read_member(cursor: &mut Cursor, intern: &mut dyn FnMut(&str) -> InternedStr) -> RillResult<Member> {
    let tag = cursor.take(1)?[0];
    Ok(if tag == MemberTag::Integer as u8 {
        Member::Integer(cursor.read_varint_be_signed()?)
    } else if tag == MemberTag::Float as u8 {
        Member::Float(u64::from_be_bytes(cursor.take(8)?.try_into().unwrap()))
    } else if tag == MemberTag::String as u8 {
        Member::String(intern(&cursor.read_string()?))
    } else if tag == MemberTag::Symbol as u8 {
        Member::Symbol(intern(&cursor.read_string()?))
    } else if tag == MemberTag::Import as u8 {
        let module = intern(&cursor.read_string()?);
        let name = intern(&cursor.read_string()?);
        Member::Import { module, name }
    } else if tag == MemberTag::Variable as u8 {
        let name = intern(&cursor.read_string()?);
        let exported = cursor.take(1)?[0] != 0;
        Member::Variable { name, exported }
    } else if tag == MemberTag::Function as u8 {
        let name = cursor.read_opt_string()?.map(|s| intern(&s));
        let param_count = cursor.read_varint_be()? as u32;
        let register_count = cursor.read_varint_be()? as u32;
        let kind = if cursor.take(1)?[0] != 0 { FunctionKind::Closure } else { FunctionKind::Normal };
        let handler_count = cursor.read_varint_be()?;
        let mut handlers = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            let start_pc = cursor.read_varint_be()? as u32;
            let end_pc = cursor.read_varint_be()? as u32;
            let target_pc = cursor.read_varint_be()? as u32;
            handlers.push(HandlerRange { start_pc, end_pc, target_pc });
        }
        let code_len = cursor.read_varint_be()? as usize;
        let code = cursor.take(code_len)?.to_vec();
        Member::Function(Function { name, param_count, register_count, kind, handlers, code })
    } else if tag == MemberTag::RecordTemplate as u8 {
        let field_count = cursor.read_varint_be()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(intern(&cursor.read_string()?));
        }
        Member::RecordTemplate(RecordTemplate { fields })
    } else {
        return Err(RillError::loader_error(format!("unknown bytecode member tag {tag}")));
    })
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_varint_be(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

fn write_opt_string(out: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            out.push(1);
            write_string(out, s);
        }
        None => out.push(0),
    }
}

fn write_varint_be(out: &mut Vec<u8>, mut v: u64) {
    // Big-endian variable-length: emit groups of 7 bits, most-significant
    // group first, continuation bit set on every byte but the last.
    let mut groups = Vec::new();
    loop {
        groups.push((v & 0x7f) as u8);
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    for (i, group) in groups.iter().rev().enumerate() {
        let last = i == groups.len() - 1;
        out.push(if last { *group } else { group | 0x80 });
    }
}

fn write_varint_be_signed(out: &mut Vec<u8>, v: i64) {
    // Zigzag-encode so small negatives stay small on the wire.
    let zigzag = ((v << 1) ^ (v >> 63)) as u64;
    write_varint_be(out, zigzag);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> RillResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(RillError::loader_error("unexpected end of bytecode module"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_varint_be(&mut self) -> RillResult<u64> {
        let mut value: u64 = 0;
        loop {
            let byte = self.take(1)?[0];
            value = (value << 7) | (byte & 0x7f) as u64;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    fn read_varint_be_signed(&mut self) -> RillResult<i64> {
        let zigzag = self.read_varint_be()?;
        Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
    }

    fn read_string(&mut self) -> RillResult<String> {
        let len = self.read_varint_be()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| RillError::loader_error("bytecode module string is not valid UTF-8"))
    }

    fn read_opt_string(&mut self) -> RillResult<Option<String>> {
        let tag = self.take(1)?[0];
        if tag == 0 {
            Ok(None)
        } else {
            Ok(Some(self.read_string()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::StringTable;

    #[test]
    fn module_round_trips_through_file_layout() {
        let mut strings = StringTable::new();
        let name = strings.intern("demo");
        let fn_name = strings.intern("main");
        let module = Module {
            name,
            members: vec![
                Member::Integer(-7),
                Member::Function(Function {
                    name: Some(fn_name),
                    param_count: 1,
                    register_count: 2,
                    kind: FunctionKind::Normal,
                    handlers: vec![HandlerRange { start_pc: 0, end_pc: 4, target_pc: 10 }],
                    code: vec![Opcode::LoadNull as u8, Opcode::Return as u8],
                }),
            ],
            init_function: 1,
        };

        let mut bytes = Vec::new();
        module.write_to(&mut bytes, &strings);

        let mut read_back = StringTable::new();
        let roundtripped = Module::read_from(&bytes, &mut |s| read_back.intern(s)).expect("module should decode");

        assert_eq!(read_back.resolve(roundtripped.name), "demo");
        assert_eq!(roundtripped.members.len(), 2);
        assert!(matches!(roundtripped.members[0], Member::Integer(-7)));
        let Member::Function(f) = &roundtripped.members[1] else { panic!() };
        assert_eq!(f.param_count, 1);
        assert_eq!(f.handlers.len(), 1);
        assert_eq!(f.code, vec![Opcode::LoadNull as u8, Opcode::Return as u8]);
    }

    #[test]
    fn opcode_from_u8_rejects_out_of_range() {
        assert!(Opcode::from_u8(255).is_none());
        assert_eq!(Opcode::from_u8(0), Some(Opcode::LoadNull));
    }
}
