//! Heap object headers and the closed set of object kinds (spec §3).

use std::cell::Cell;
use std::ptr::NonNull;

use hashbrown::HashMap;
use rill_common::InternedStr;

use crate::value::Value;

/// The closed set of heap object kinds (spec §3 "Object kinds"). `Null`,
/// `Boolean`, `SmallInteger` and `Undefined` never appear as a heap
/// object's kind — they're always represented directly in [`Value`] —
/// but the tags are kept here for the type table's introspection surface
/// (`Type`/`InternalType` objects name a kind by this enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectKind {
    Null,
    Boolean,
    SmallInteger,
    Integer,
    Float,
    String,
    Symbol,
    Tuple,
    Record,
    Array,
    ArrayStorage,
    HashTable,
    HashTableStorage,
    HashTableIterator,
    Buffer,
    Code,
    FunctionTemplate,
    Environment,
    Function,
    BoundMethod,
    Method,
    Module,
    Type,
    InternalType,
    NativeFunction,
    NativeAsyncFunction,
    NativeObject,
    NativePointer,
    Coroutine,
    CoroutineStack,
    StringBuilder,
    Undefined,
}

/// Every heap allocation begins with a `Header` (spec §3: "class pointer
/// / type tag, GC mark bit, size information, an intrusive link used by
/// the collector's object list").
pub struct Header {
    pub kind: ObjectKind,
    pub mark: Cell<bool>,
    /// Total size in bytes of the allocation this header fronts, used by
    /// the heap to track live-set size for the collection threshold.
    pub size: u32,
    /// Intrusive singly-linked list of every object the heap has ever
    /// allocated, walked by sweep; `None` marks the list tail.
    pub next: Cell<Option<NonNull<Header>>>,
}

impl Header {
    pub fn new(kind: ObjectKind, size: u32) -> Header {
        Header { kind, mark: Cell::new(false), size, next: Cell::new(None) }
    }
}

/// A GC-managed object: a [`Header`] followed by kind-specific payload.
/// `#[repr(C)]` guarantees `&Self as *const Header` is a no-op cast, so a
/// `NonNull<Header>` obtained from [`Value::as_heap_ptr`] can be cast back
/// to `NonNull<Self>` once the header's `kind` confirms the type.
pub trait GcObject {
    const KIND: ObjectKind;
    fn header(&self) -> &Header;
    /// Pushes every `Value` and heap reference this object directly holds
    /// onto `worklist`, for the mark phase's reachability trace.
    fn trace(&self, worklist: &mut Vec<NonNull<Header>>);
}

macro_rules! gc_object {
    ($name:ident, $kind:expr) => {
        impl GcObject for $name {
            const KIND: ObjectKind = $kind;
            fn header(&self) -> &Header {
                &self.header
            }
            fn trace(&self, worklist: &mut Vec<NonNull<Header>>) {
                self.trace_fields(worklist)
            }
        }
    };
}

#[inline]
fn push_value(worklist: &mut Vec<NonNull<Header>>, v: Value) {
    if v.is_heap_ptr() {
        // SAFETY: `is_heap_ptr` was just checked.
        worklist.push(unsafe { v.as_heap_ptr() });
    }
}

#[repr(C)]
pub struct HeapInteger {
    pub header: Header,
    pub value: i64,
}
impl HeapInteger {
    fn trace_fields(&self, _worklist: &mut Vec<NonNull<Header>>) {}
}
gc_object!(HeapInteger, ObjectKind::Integer);

#[repr(C)]
pub struct HeapFloat {
    pub header: Header,
    pub value: f64,
}
impl HeapFloat {
    fn trace_fields(&self, _worklist: &mut Vec<NonNull<Header>>) {}
}
gc_object!(HeapFloat, ObjectKind::Float);

#[repr(C)]
pub struct HeapString {
    pub header: Header,
    pub bytes: Box<str>,
}
impl HeapString {
    fn trace_fields(&self, _worklist: &mut Vec<NonNull<Header>>) {}
}
gc_object!(HeapString, ObjectKind::String);

/// A symbol: like a string, but equality and hashing are by interned
/// handle (pointer identity of the name), not byte content (spec §4.7).
#[repr(C)]
pub struct HeapSymbol {
    pub header: Header,
    pub name: InternedStr,
}
impl HeapSymbol {
    fn trace_fields(&self, _worklist: &mut Vec<NonNull<Header>>) {}
}
gc_object!(HeapSymbol, ObjectKind::Symbol);

#[repr(C)]
pub struct Tuple {
    pub header: Header,
    pub items: Box<[Value]>,
}
impl Tuple {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        for &v in self.items.iter() {
            push_value(worklist, v);
        }
    }
}
gc_object!(Tuple, ObjectKind::Tuple);

#[repr(C)]
pub struct Record {
    pub header: Header,
    pub template: u32,
    pub fields: Box<[Value]>,
}
impl Record {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        for &v in self.fields.iter() {
            push_value(worklist, v);
        }
    }
}
gc_object!(Record, ObjectKind::Record);

/// Backing storage for an [`Array`]: a capacity buffer of values, grown
/// geometrically and replaced (not resized in place) on overflow.
#[repr(C)]
pub struct ArrayStorage {
    pub header: Header,
    pub items: Vec<Value>,
}
impl ArrayStorage {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        for &v in self.items.iter() {
            push_value(worklist, v);
        }
    }
}
gc_object!(ArrayStorage, ObjectKind::ArrayStorage);

#[repr(C)]
pub struct Array {
    pub header: Header,
    pub storage: Value,
    pub len: u32,
}
impl Array {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        push_value(worklist, self.storage);
    }
}
gc_object!(Array, ObjectKind::Array);

#[repr(C)]
pub struct HashTableStorage {
    pub header: Header,
    pub entries: Vec<(Value, Value)>,
}
impl HashTableStorage {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        for &(k, v) in self.entries.iter() {
            push_value(worklist, k);
            push_value(worklist, v);
        }
    }
}
gc_object!(HashTableStorage, ObjectKind::HashTableStorage);

#[repr(C)]
pub struct HashTable {
    pub header: Header,
    pub storage: Value,
    pub len: u32,
}
impl HashTable {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        push_value(worklist, self.storage);
    }
}
gc_object!(HashTable, ObjectKind::HashTable);

#[repr(C)]
pub struct HashTableIterator {
    pub header: Header,
    pub table: Value,
    pub cursor: u32,
}
impl HashTableIterator {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        push_value(worklist, self.table);
    }
}
gc_object!(HashTableIterator, ObjectKind::HashTableIterator);

/// A raw byte buffer; used as the growable backing store for
/// [`StringBuilder`] and for native-object blobs that don't need value
/// tracing.
#[repr(C)]
pub struct Buffer {
    pub header: Header,
    pub bytes: Vec<u8>,
}
impl Buffer {
    fn trace_fields(&self, _worklist: &mut Vec<NonNull<Header>>) {}
}
gc_object!(Buffer, ObjectKind::Buffer);

#[repr(C)]
pub struct StringBuilder {
    pub header: Header,
    pub buffer: Value,
}
impl StringBuilder {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        push_value(worklist, self.buffer);
    }
}
gc_object!(StringBuilder, ObjectKind::StringBuilder);

/// Wraps a [`rill_ir::bytecode::Function`]'s code buffer as a standalone
/// heap object (spec §3 "Code" kind), referenced by a [`FunctionTemplate`].
#[repr(C)]
pub struct Code {
    pub header: Header,
    pub bytes: Box<[u8]>,
}
impl Code {
    fn trace_fields(&self, _worklist: &mut Vec<NonNull<Header>>) {}
}
gc_object!(Code, ObjectKind::Code);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HandlerRange {
    pub start_pc: u32,
    pub end_pc: u32,
    pub target_pc: u32,
}

/// The runtime counterpart of a compiled [`rill_ir::bytecode::Function`]
/// header: name, arity, frame size, handler table and a pointer to its
/// `Code` object. A `FunctionTemplate` is shared by every closure created
/// from the same declaration; what varies per closure is the captured
/// [`Environment`].
#[repr(C)]
pub struct FunctionTemplate {
    pub header: Header,
    pub name: Option<InternedStr>,
    pub param_count: u32,
    pub register_count: u32,
    pub is_closure: bool,
    pub handlers: Box<[HandlerRange]>,
    pub code: Value,
    /// The `Module` this template was loaded from, so member-relative
    /// opcodes (`LoadModule`, `LoadConst`, `MakeClosure`, `MakeRecord`)
    /// executing in a frame built from this template know which member
    /// table to index (spec §4.9: members are module-scoped).
    pub module: Value,
}
impl FunctionTemplate {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        push_value(worklist, self.code);
        push_value(worklist, self.module);
    }
}
gc_object!(FunctionTemplate, ObjectKind::FunctionTemplate);

/// A closure environment: captured variable slots plus an optional
/// parent environment (spec §3 "Closure environment").
#[repr(C)]
pub struct Environment {
    pub header: Header,
    pub parent: Value,
    pub slots: Box<[Cell<Value>]>,
}
impl Environment {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        push_value(worklist, self.parent);
        for slot in self.slots.iter() {
            push_value(worklist, slot.get());
        }
    }
}
gc_object!(Environment, ObjectKind::Environment);

#[repr(C)]
pub struct Function {
    pub header: Header,
    pub template: Value,
    pub env: Value,
}
impl Function {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        push_value(worklist, self.template);
        push_value(worklist, self.env);
    }
}
gc_object!(Function, ObjectKind::Function);

#[repr(C)]
pub struct BoundMethod {
    pub header: Header,
    pub receiver: Value,
    pub method: Value,
}
impl BoundMethod {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        push_value(worklist, self.receiver);
        push_value(worklist, self.method);
    }
}
gc_object!(BoundMethod, ObjectKind::BoundMethod);

/// An unbound method descriptor resolved by name from a receiver's type
/// (`LoadMethod`/`MethodHandle` in spec §3/§4.4).
#[repr(C)]
pub struct Method {
    pub header: Header,
    pub name: InternedStr,
    pub function: Value,
}
impl Method {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        push_value(worklist, self.function);
    }
}
gc_object!(Method, ObjectKind::Method);

/// Runtime counterpart of a compiled [`rill_ir::bytecode::Module`]: its
/// member table translated member-by-member into heap values (spec §4.9),
/// indexed identically so `LoadModule <i>`/`LoadConst <i>` can address it
/// directly by the same `MemberId` the compiler emitted, plus the
/// by-name export table used for cross-module `import` resolution.
#[repr(C)]
pub struct Module {
    pub header: Header,
    pub name: InternedStr,
    pub members: Box<[Value]>,
    /// Field-name lists for `RecordTemplate` members, parallel-indexed
    /// by the same member id as `members`. Record templates carry no
    /// heap representation of their own — `RecordTemplate` isn't in the
    /// closed object-kind set (spec §3) — so this plain side table is
    /// what `MakeRecord <template>` and record field lookups resolve
    /// against instead. Entries for non-`RecordTemplate` members are
    /// empty slices.
    pub record_templates: Box<[Box<[InternedStr]>]>,
    pub exports: HashMap<InternedStr, Value>,
    pub initialized: bool,
}
impl Module {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        for &v in self.members.iter() {
            push_value(worklist, v);
        }
        for &v in self.exports.values() {
            push_value(worklist, v);
        }
    }
}
gc_object!(Module, ObjectKind::Module);

impl Module {
    /// # Safety
    /// `v` must be a live heap pointer to a `Module` object.
    pub unsafe fn from_value<'a>(v: Value) -> &'a Module {
        cast::<Module>(v.as_heap_ptr()).as_ref()
    }
}

/// A runtime type descriptor, naming an [`ObjectKind`] for the VM's
/// reflection surface. `InternalType` additionally marks kinds that are
/// not constructible from user code (e.g. `Environment`, `CoroutineStack`).
#[repr(C)]
pub struct Type {
    pub header: Header,
    pub described_kind: ObjectKind,
    pub name: InternedStr,
    pub internal: bool,
}
impl Type {
    fn trace_fields(&self, _worklist: &mut Vec<NonNull<Header>>) {}
}
gc_object!(Type, ObjectKind::Type);

pub type NativeFn = fn(&mut crate::context::Context, &[Value]) -> Result<Value, rill_common::RillError>;

/// # Safety contract with the scheduler
/// A registered async native calls `start` exactly once per invocation
/// frame, handing it a [`crate::scheduler_api::ResumeTokenId`] (defined in
/// `rill_scheduler`) that must be fired exactly once, synchronously or
/// from host callback code.
pub type NativeAsyncFn = fn(&mut crate::context::Context, &[Value], u64) -> Result<(), rill_common::RillError>;

#[repr(C)]
pub struct NativeFunction {
    pub header: Header,
    pub name: InternedStr,
    pub arity: u32,
    pub func: NativeFn,
}
impl NativeFunction {
    fn trace_fields(&self, _worklist: &mut Vec<NonNull<Header>>) {}
}
gc_object!(NativeFunction, ObjectKind::NativeFunction);

#[repr(C)]
pub struct NativeAsyncFunction {
    pub header: Header,
    pub name: InternedStr,
    pub arity: u32,
    pub func: NativeAsyncFn,
}
impl NativeAsyncFunction {
    fn trace_fields(&self, _worklist: &mut Vec<NonNull<Header>>) {}
}
gc_object!(NativeAsyncFunction, ObjectKind::NativeAsyncFunction);

type Finalizer = fn(&mut dyn std::any::Any);

/// An opaque host value embedded in the heap. `NativeObject` is,
/// deliberately, the *only* heap kind that currently runs a finalizer on
/// sweep (spec §4.5, §9 open question: whether to extend finalization to
/// user-defined kinds is left unresolved and not implemented here).
#[repr(C)]
pub struct NativeObject {
    pub header: Header,
    pub payload: Box<dyn std::any::Any>,
    pub finalizer: Option<Finalizer>,
}
impl NativeObject {
    fn trace_fields(&self, _worklist: &mut Vec<NonNull<Header>>) {}
}
impl GcObject for NativeObject {
    const KIND: ObjectKind = ObjectKind::NativeObject;
    fn header(&self) -> &Header {
        &self.header
    }
    fn trace(&self, worklist: &mut Vec<NonNull<Header>>) {
        self.trace_fields(worklist)
    }
}

#[repr(C)]
pub struct NativePointer {
    pub header: Header,
    pub addr: usize,
}
impl NativePointer {
    fn trace_fields(&self, _worklist: &mut Vec<NonNull<Header>>) {}
}
gc_object!(NativePointer, ObjectKind::NativePointer);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    Ready,
    Running,
    Waiting,
    Done,
}

/// Spec §3 "Coroutine": name, function, stack, state, result slot and
/// intrusive ready-queue links. The ready-queue links themselves are
/// owned by `rill_scheduler`'s slab (keyed by a small integer coroutine
/// id) rather than raw pointers here, so the heap's tracing never has to
/// reason about scheduler-internal cursors.
#[repr(C)]
pub struct Coroutine {
    pub header: Header,
    pub name: Option<InternedStr>,
    pub function: Value,
    pub stack: Value,
    pub state: Cell<CoroutineState>,
    pub result: Cell<Value>,
    pub failed: Cell<bool>,
    /// Value most recently delivered by a fired resume token, read (and
    /// reset to `Value::UNDEFINED`) by the interpreter the next time this
    /// coroutine runs (spec §4.8 resumption: "writes the provided value
    /// into the async frame's result slot").
    pub resume_value: Cell<Value>,
}
impl Coroutine {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        push_value(worklist, self.function);
        push_value(worklist, self.stack);
        push_value(worklist, self.result.get());
        push_value(worklist, self.resume_value.get());
    }
}
gc_object!(Coroutine, ObjectKind::Coroutine);

impl Coroutine {
    /// # Safety
    /// `v` must be a live heap pointer to a `Coroutine` object.
    pub unsafe fn from_value<'a>(v: Value) -> &'a Coroutine {
        cast::<Coroutine>(v.as_heap_ptr()).as_ref()
    }
}

/// Spec §3 "Coroutine stack": frames plus the value stack above the
/// topmost frame. Represented here as an explicit frame vector and a
/// parallel register file per frame rather than one contiguous byte
/// buffer with hand-placed frame headers — `rill_interpreter::frame`
/// builds and walks it; this object only owns the storage GC must trace.
#[repr(C)]
pub struct CoroutineStack {
    pub header: Header,
    pub registers: Vec<Cell<Value>>,
}
impl CoroutineStack {
    fn trace_fields(&self, worklist: &mut Vec<NonNull<Header>>) {
        for r in self.registers.iter() {
            push_value(worklist, r.get());
        }
    }
}
gc_object!(CoroutineStack, ObjectKind::CoroutineStack);

impl CoroutineStack {
    /// # Safety
    /// `v` must be a live heap pointer to a `CoroutineStack` object.
    pub unsafe fn from_value<'a>(v: Value) -> &'a CoroutineStack {
        cast::<CoroutineStack>(v.as_heap_ptr()).as_ref()
    }

    /// # Safety
    /// `v` must be a live heap pointer to a `CoroutineStack` object, and
    /// the caller must not alias this mutable reference with any other
    /// live reference to the same object (the heap itself enforces
    /// nothing here; `rill_interpreter` is solely responsible).
    pub unsafe fn from_value_mut<'a>(v: Value) -> &'a mut CoroutineStack {
        cast::<CoroutineStack>(v.as_heap_ptr()).as_mut()
    }
}

/// Casts a validated heap pointer back to its concrete payload type.
///
/// # Safety
/// `ptr.as_ref().kind` must equal `T::KIND`.
pub unsafe fn cast<T: GcObject>(ptr: NonNull<Header>) -> NonNull<T> {
    debug_assert_eq!(ptr.as_ref().kind, T::KIND);
    ptr.cast::<T>()
}

/// Reinterprets a heap-pointer `Value` as a reference to its concrete
/// payload type, for callers (chiefly `rill_interpreter`) that already
/// know `v`'s kind from a prior `match` on its header.
///
/// # Safety
/// `v` must be a live heap pointer whose header kind is `T::KIND`.
pub unsafe fn from_value<'a, T: GcObject>(v: Value) -> &'a T {
    cast::<T>(v.as_heap_ptr()).as_ref()
}

/// Mutable counterpart of [`from_value`].
///
/// # Safety
/// `v` must be a live heap pointer whose header kind is `T::KIND`, and
/// the caller must not alias the returned reference with any other live
/// reference to the same object.
pub unsafe fn from_value_mut<'a, T: GcObject>(v: Value) -> &'a mut T {
    cast::<T>(v.as_heap_ptr()).as_mut()
}
