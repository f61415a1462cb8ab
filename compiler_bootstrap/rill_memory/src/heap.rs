//! Paged heap and mark-sweep tracing collector (spec §4.5).
//!
//! Allocation is bump-style: a page absorbs objects until its configured
//! byte budget is spent, then a new page is opened; an object whose size
//! exceeds the page budget gets a dedicated page of its own. Each
//! allocation is still one `Box<T>` (so Rust's allocator, not hand-rolled
//! bump pointers, owns the actual bytes) — what the page tracks is the
//! *logical* bump cursor used to decide when to roll over and to size
//! the next collection threshold, matching the "paged heap, bump
//! allocation" architecture of spec §4.5 without requiring raw
//! byte-level object layout across ~20 heterogeneous kinds.

use std::ptr::NonNull;

use rill_common::RillError;

use crate::object::{GcObject, Header, NativeObject};
use crate::value::Value;

const DEFAULT_PAGE_BUDGET: usize = 64 * 1024;
/// Objects at or above this size skip the current page and get a
/// dedicated page of their own (SPEC_FULL.md §4.5).
const OVERSIZED_THRESHOLD: usize = 4 * 1024;
const INITIAL_THRESHOLD: usize = 64 * 1024;

struct Page {
    used: usize,
    budget: usize,
}

impl Page {
    fn new(budget: usize) -> Page {
        Page { used: 0, budget }
    }

    fn try_fill(&mut self, size: usize) -> bool {
        if self.used + size > self.budget {
            return false;
        }
        self.used += size;
        true
    }
}

pub struct HeapStats {
    pub bytes_allocated: usize,
    pub object_count: usize,
    pub threshold: usize,
    pub pages: usize,
}

/// Owns every heap-allocated object's memory and the intrusive list used
/// by sweep. Collection is triggered either explicitly or when
/// `allocate` pushes the live-set past `threshold`.
pub struct Heap {
    pages: Vec<Page>,
    page_budget: usize,
    /// Head of the intrusive singly-linked object list (spec §3 header
    /// "intrusive link"); `None` when the heap is empty.
    objects: Option<NonNull<Header>>,
    bytes_allocated: usize,
    object_count: usize,
    threshold: usize,
    initial_threshold: usize,
    /// Factor the next-collection threshold grows by relative to the
    /// post-collection live set (spec §4.5: "grows geometrically with
    /// the live-set size after a collection").
    grow_factor: f64,
}

impl Heap {
    pub fn new() -> Heap {
        Heap::with_config(DEFAULT_PAGE_BUDGET, INITIAL_THRESHOLD, 2.0)
    }

    /// Builds a heap with host-configured page size, initial collection
    /// threshold and growth factor (surfaced to the embedding as
    /// `rill_cli`'s `[gc]` config section).
    pub fn with_config(page_budget: usize, initial_threshold: usize, grow_factor: f64) -> Heap {
        Heap {
            pages: vec![Page::new(page_budget)],
            page_budget,
            objects: None,
            bytes_allocated: 0,
            object_count: 0,
            threshold: initial_threshold,
            initial_threshold,
            grow_factor,
        }
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            bytes_allocated: self.bytes_allocated,
            object_count: self.object_count,
            threshold: self.threshold,
            pages: self.pages.len(),
        }
    }

    /// True once the live set has grown past the dynamic threshold (spec
    /// §4.5: "Allocation may trigger a GC if the live set has grown past
    /// a dynamic threshold").
    pub fn needs_collection(&self) -> bool {
        self.bytes_allocated >= self.threshold
    }

    fn bump(&mut self, size: usize) {
        if size >= OVERSIZED_THRESHOLD {
            // Oversized object: dedicated page, already "full" on arrival.
            let mut page = Page::new(size);
            page.used = size;
            self.pages.push(page);
            return;
        }
        if let Some(last) = self.pages.last_mut() {
            if last.try_fill(size) {
                return;
            }
        }
        let mut page = Page::new(self.page_budget);
        page.try_fill(size);
        self.pages.push(page);
    }

    /// Allocates `value` on the heap and links it into the object list.
    /// Returns a raw `Header` pointer; callers immediately wrap it as a
    /// `Value` via [`crate::value::Value::from_heap_ptr`].
    pub fn allocate<T: GcObject>(&mut self, value: T) -> NonNull<Header> {
        let size = value.header().size as usize;
        let boxed = Box::new(value);
        // SAFETY: `T` is `#[repr(C)]` (or, for `NativeObject`, its header
        // is still its first field) with `Header` as its first field, so
        // a pointer to the box is a valid pointer to its `Header`.
        let raw = Box::into_raw(boxed) as *mut Header;
        let header_ptr = unsafe { NonNull::new_unchecked(raw) };
        unsafe {
            header_ptr.as_ref().next.set(self.objects);
        }
        self.objects = Some(header_ptr);
        self.bytes_allocated += size;
        self.object_count += 1;
        self.bump(size);
        header_ptr
    }

    /// Traces from `roots`, then sweeps every unmarked object, finalizing
    /// `NativeObject`s as it frees them (spec §4.5 Mark/Sweep). Returns
    /// the number of objects collected.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) -> usize {
        let mut worklist: Vec<NonNull<Header>> = Vec::new();
        for root in roots {
            if root.is_heap_ptr() {
                // SAFETY: checked above.
                worklist.push(unsafe { root.as_heap_ptr() });
            }
        }

        while let Some(ptr) = worklist.pop() {
            let header = unsafe { ptr.as_ref() };
            if header.mark.get() {
                continue;
            }
            header.mark.set(true);
            trace_object(ptr, &mut worklist);
        }

        let mut collected = 0usize;
        let mut survivors_head: Option<NonNull<Header>> = None;
        let mut survivors_tail: Option<NonNull<Header>> = None;
        let mut cursor = self.objects.take();
        while let Some(ptr) = cursor {
            let header = unsafe { ptr.as_ref() };
            cursor = header.next.get();
            if header.mark.get() {
                header.mark.set(false);
                header.next.set(None);
                match survivors_tail {
                    Some(tail) => unsafe {
                        tail.as_ref().next.set(Some(ptr));
                    },
                    None => survivors_head = Some(ptr),
                }
                survivors_tail = Some(ptr);
            } else {
                self.bytes_allocated -= header.size as usize;
                self.object_count -= 1;
                collected += 1;
                free_object(ptr);
            }
        }
        self.objects = survivors_head;

        // Geometric growth of the next-collection threshold (spec §4.5).
        self.threshold = ((self.bytes_allocated as f64 * self.grow_factor) as usize).max(self.initial_threshold);
        collected
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn trace_object(ptr: NonNull<Header>, worklist: &mut Vec<NonNull<Header>>) {
    use crate::object::*;
    let kind = unsafe { ptr.as_ref().kind };
    macro_rules! trace_as {
        ($t:ty) => {{
            let typed = unsafe { cast::<$t>(ptr) };
            unsafe { typed.as_ref().trace(worklist) };
        }};
    }
    match kind {
        ObjectKind::Integer => trace_as!(HeapInteger),
        ObjectKind::Float => trace_as!(HeapFloat),
        ObjectKind::String => trace_as!(HeapString),
        ObjectKind::Symbol => trace_as!(HeapSymbol),
        ObjectKind::Tuple => trace_as!(Tuple),
        ObjectKind::Record => trace_as!(Record),
        ObjectKind::Array => trace_as!(Array),
        ObjectKind::ArrayStorage => trace_as!(ArrayStorage),
        ObjectKind::HashTable => trace_as!(HashTable),
        ObjectKind::HashTableStorage => trace_as!(HashTableStorage),
        ObjectKind::HashTableIterator => trace_as!(HashTableIterator),
        ObjectKind::Buffer => trace_as!(Buffer),
        ObjectKind::Code => trace_as!(Code),
        ObjectKind::FunctionTemplate => trace_as!(FunctionTemplate),
        ObjectKind::Environment => trace_as!(Environment),
        ObjectKind::Function => trace_as!(Function),
        ObjectKind::BoundMethod => trace_as!(BoundMethod),
        ObjectKind::Method => trace_as!(Method),
        ObjectKind::Module => trace_as!(Module),
        ObjectKind::Type => trace_as!(Type),
        ObjectKind::NativeFunction => trace_as!(NativeFunction),
        ObjectKind::NativeAsyncFunction => trace_as!(NativeAsyncFunction),
        ObjectKind::NativePointer => trace_as!(NativePointer),
        ObjectKind::Coroutine => trace_as!(Coroutine),
        ObjectKind::CoroutineStack => trace_as!(CoroutineStack),
        ObjectKind::StringBuilder => trace_as!(StringBuilder),
        ObjectKind::NativeObject => {
            let typed = unsafe { cast::<NativeObject>(ptr) };
            unsafe { typed.as_ref().trace(worklist) };
        }
        ObjectKind::InternalType => trace_as!(Type),
        ObjectKind::Null | ObjectKind::Boolean | ObjectKind::SmallInteger | ObjectKind::Undefined => {
            unreachable!("these kinds are never heap-allocated")
        }
    }
}

/// Reconstructs the original `Box<T>` from a raw header pointer and lets
/// it drop, running `NativeObject`'s finalizer first (spec §4.5: "only
/// `NativeObject`" currently finalizes).
fn free_object(ptr: NonNull<Header>) {
    use crate::object::*;
    let kind = unsafe { ptr.as_ref().kind };
    macro_rules! drop_as {
        ($t:ty) => {{
            let typed = unsafe { cast::<$t>(ptr) };
            drop(unsafe { Box::from_raw(typed.as_ptr()) });
        }};
    }
    match kind {
        ObjectKind::Integer => drop_as!(HeapInteger),
        ObjectKind::Float => drop_as!(HeapFloat),
        ObjectKind::String => drop_as!(HeapString),
        ObjectKind::Symbol => drop_as!(HeapSymbol),
        ObjectKind::Tuple => drop_as!(Tuple),
        ObjectKind::Record => drop_as!(Record),
        ObjectKind::Array => drop_as!(Array),
        ObjectKind::ArrayStorage => drop_as!(ArrayStorage),
        ObjectKind::HashTable => drop_as!(HashTable),
        ObjectKind::HashTableStorage => drop_as!(HashTableStorage),
        ObjectKind::HashTableIterator => drop_as!(HashTableIterator),
        ObjectKind::Buffer => drop_as!(Buffer),
        ObjectKind::Code => drop_as!(Code),
        ObjectKind::FunctionTemplate => drop_as!(FunctionTemplate),
        ObjectKind::Environment => drop_as!(Environment),
        ObjectKind::Function => drop_as!(Function),
        ObjectKind::BoundMethod => drop_as!(BoundMethod),
        ObjectKind::Method => drop_as!(Method),
        ObjectKind::Module => drop_as!(Module),
        ObjectKind::Type => drop_as!(Type),
        ObjectKind::NativeFunction => drop_as!(NativeFunction),
        ObjectKind::NativeAsyncFunction => drop_as!(NativeAsyncFunction),
        ObjectKind::NativePointer => drop_as!(NativePointer),
        ObjectKind::Coroutine => drop_as!(Coroutine),
        ObjectKind::CoroutineStack => drop_as!(CoroutineStack),
        ObjectKind::StringBuilder => drop_as!(StringBuilder),
        ObjectKind::InternalType => drop_as!(Type),
        ObjectKind::NativeObject => {
            let typed = unsafe { cast::<NativeObject>(ptr) };
            let mut boxed = unsafe { Box::from_raw(typed.as_ptr()) };
            if let Some(finalizer) = boxed.finalizer {
                finalizer(&mut *boxed.payload);
            }
            drop(boxed);
        }
        ObjectKind::Null | ObjectKind::Boolean | ObjectKind::SmallInteger | ObjectKind::Undefined => {
            unreachable!("these kinds are never heap-allocated")
        }
    }
}

/// Raised when the heap cannot keep up with allocation even after a
/// collection attempt (spec §7 "OOM"). There is no hard byte cap in this
/// implementation — the host process's allocator is the real limit — so
/// this is reserved for `rill_interpreter` to surface a distinguished
/// panic kind if a future cap is added.
pub fn oom_error(context: &str) -> RillError {
    RillError::runtime_error(format!("out of memory: {context}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Header, HeapInteger, ObjectKind};

    fn alloc_int(heap: &mut Heap, v: i64) -> Value {
        let ptr = heap.allocate(HeapInteger {
            header: Header::new(ObjectKind::Integer, std::mem::size_of::<HeapInteger>() as u32),
            value: v,
        });
        unsafe { Value::from_heap_ptr(ptr) }
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let mut heap = Heap::new();
        let kept = alloc_int(&mut heap, 1);
        let _dropped = alloc_int(&mut heap, 2);
        assert_eq!(heap.stats().object_count, 2);

        let collected = heap.collect([kept]);
        assert_eq!(collected, 1);
        assert_eq!(heap.stats().object_count, 1);
    }

    #[test]
    fn mark_bits_are_cleared_after_collection() {
        let mut heap = Heap::new();
        let kept = alloc_int(&mut heap, 1);
        heap.collect([kept]);
        let header = unsafe { kept.as_heap_ptr().as_ref() };
        assert!(!header.mark.get());
    }

    #[test]
    fn collecting_twice_does_not_double_free() {
        let mut heap = Heap::new();
        let kept = alloc_int(&mut heap, 1);
        heap.collect([kept]);
        heap.collect([kept]);
        assert_eq!(heap.stats().object_count, 1);
    }
}
