//! The VM's explicit `Context`: every piece of mutable global state the
//! VM needs, gathered into one value owned by the embedding (spec §9
//! design note: "Mutable global state in the VM ... all VM operations
//! take it as an argument").

use hashbrown::HashMap;

use rill_common::{InternedStr, StringTable};

use crate::handles::{Global, GlobalHandles, HandleStack};
use crate::heap::Heap;
use crate::object::{Header, ObjectKind, Type};
use crate::value::Value;

/// VM singletons that must be reachable as GC roots independent of any
/// handle (spec §4.5: "a set of VM singletons (true, false, null
/// sentinels, interned string table, module table)"). The sentinel
/// values themselves need no root slot (they aren't heap pointers), but
/// the type table does.
pub struct Context {
    pub heap: Heap,
    pub strings: StringTable,
    pub handles: HandleStack,
    pub globals: GlobalHandles,
    /// `ObjectKind` -> its runtime `Type` object, registered once at
    /// startup by [`Context::register_builtin_types`].
    type_table: HashMap<ObjectKind, Global>,
    /// Loaded modules by name, the module registry imports resolve
    /// against (spec §4.9).
    pub modules: HashMap<InternedStr, Global>,
}

impl Context {
    pub fn new() -> Context {
        Context::with_heap(Heap::new())
    }

    /// Builds a `Context` around a heap already configured from the
    /// embedding's own settings (e.g. `rill_cli`'s `[gc]` config
    /// section), rather than the built-in defaults `Heap::new` uses.
    pub fn with_heap(heap: Heap) -> Context {
        let mut ctx = Context {
            heap,
            strings: StringTable::new(),
            handles: HandleStack::new(),
            globals: GlobalHandles::new(),
            type_table: HashMap::new(),
            modules: HashMap::new(),
        };
        ctx.register_builtin_types();
        ctx
    }

    fn register_builtin_types(&mut self) {
        const BUILTIN_KINDS: &[(ObjectKind, &str)] = &[
            (ObjectKind::Integer, "Int"),
            (ObjectKind::Float, "Float"),
            (ObjectKind::String, "String"),
            (ObjectKind::Symbol, "Symbol"),
            (ObjectKind::Tuple, "Tuple"),
            (ObjectKind::Record, "Record"),
            (ObjectKind::Array, "Array"),
            (ObjectKind::HashTable, "Map"),
            (ObjectKind::Function, "Function"),
            (ObjectKind::BoundMethod, "BoundMethod"),
            (ObjectKind::Module, "Module"),
            (ObjectKind::NativeObject, "NativeObject"),
            (ObjectKind::Coroutine, "Coroutine"),
        ];
        for &(kind, name) in BUILTIN_KINDS {
            let interned = self.strings.intern(name);
            let ptr = self.heap.allocate(Type {
                header: Header::new(ObjectKind::Type, std::mem::size_of::<Type>() as u32),
                described_kind: kind,
                name: interned,
                internal: false,
            });
            let value = unsafe { Value::from_heap_ptr(ptr) };
            let handle = self.globals.alloc(value);
            self.type_table.insert(kind, handle);
        }
    }

    pub fn type_of(&self, kind: ObjectKind) -> Option<Value> {
        self.type_table.get(&kind).map(|&g| self.globals.get(g))
    }

    /// Every value the collector must treat as reachable regardless of
    /// whether a handle currently points at it: the handle stack, the
    /// global slots, and (transitively, since modules/types are
    /// themselves global handles) the module table and type table.
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.handles.roots().chain(self.globals.roots())
    }

    /// Runs a full mark-sweep pass rooted at [`Context::roots`] plus
    /// whatever additional roots the caller supplies (e.g. the
    /// interpreter's current coroutine and its live register file, spec
    /// §4.5 "interpreter state").
    pub fn collect(&mut self, extra_roots: impl IntoIterator<Item = Value>) -> usize {
        let roots: Vec<Value> = self.roots().chain(extra_roots).collect();
        self.heap.collect(roots)
    }

    /// Allocates through the heap, running a collection first if the
    /// live set has grown past threshold (spec §4.5 allocation contract).
    /// `extra_roots` must cover every value the caller holds live outside
    /// a handle at the point of calling this — which is precisely why
    /// spec §4.6 requires allocating code to read its operands through
    /// handles first.
    pub fn maybe_collect(&mut self, extra_roots: impl IntoIterator<Item = Value>) {
        if self.heap.needs_collection() {
            self.collect(extra_roots);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_types_are_registered_and_rooted() {
        let ctx = Context::new();
        let int_type = ctx.type_of(ObjectKind::Integer).expect("Int type registered");
        assert!(int_type.is_heap_ptr());
    }

    #[test]
    fn handle_stack_roots_are_visible() {
        let mut ctx = Context::new();
        let before = ctx.roots().count();
        ctx.handles.push(Value::NULL);
        assert_eq!(ctx.roots().count(), before + 1);
    }
}
