//! Value representation (spec §3 "Value"): a machine-word tagged pointer.
//!
//! Three representations share one word:
//! - an even word is a heap object pointer; the object's kind lives in its
//!   [`crate::object::Header`].
//! - an odd word with the low bit set is a `SmallInteger`: the remaining
//!   bits, arithmetic-shifted back, are a sign-extended payload.
//! - a handful of reserved low addresses are constant sentinels (null,
//!   true, false, undefined, stop-iteration) — never valid heap pointers
//!   because the heap's pages are never placed there (see `rill_memory::heap`).

use std::fmt;
use std::ptr::NonNull;

use crate::object::Header;

/// Smallest magnitude representable as a `SmallInteger` before it must be
/// promoted to a heap `Integer` (spec §4.7: "promotes `SmallInteger` to
/// `Integer` on overflow"). One bit is spent on the tag and one on the
/// sign, so the usable range is `[-2^61, 2^61)`.
pub const SMALL_INT_BITS: u32 = 62;
pub const SMALL_INT_MIN: i64 = -(1i64 << (SMALL_INT_BITS - 1));
pub const SMALL_INT_MAX: i64 = (1i64 << (SMALL_INT_BITS - 1)) - 1;

const TAG_INT: u64 = 0b1;

// Reserved sentinel addresses. They are even (so they fall in the
// "pointer" bucket by tag) but sit below any address the heap's page
// allocator ever hands out, so they can never alias a real object.
const SENTINEL_NULL: u64 = 0;
const SENTINEL_FALSE: u64 = 2;
const SENTINEL_TRUE: u64 = 4;
const SENTINEL_UNDEFINED: u64 = 6;
const SENTINEL_STOP_ITERATION: u64 = 8;
/// First address the heap is permitted to allocate at; enforced by
/// `rill_memory::heap::Heap` so sentinels below this never collide with a
/// live object pointer.
pub const HEAP_RESERVED_BASE: u64 = 4096;

/// A tagged machine word: either a heap pointer, a small integer, or one
/// of the fixed constant sentinels.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(u64);

impl Value {
    pub const NULL: Value = Value(SENTINEL_NULL);
    pub const FALSE: Value = Value(SENTINEL_FALSE);
    pub const TRUE: Value = Value(SENTINEL_TRUE);
    pub const UNDEFINED: Value = Value(SENTINEL_UNDEFINED);
    pub const STOP_ITERATION: Value = Value(SENTINEL_STOP_ITERATION);

    #[inline]
    pub fn bool(b: bool) -> Value {
        if b {
            Value::TRUE
        } else {
            Value::FALSE
        }
    }

    /// Builds a `SmallInteger`, or `None` if `v` doesn't fit the small
    /// range and must be boxed as a heap `Integer` instead.
    #[inline]
    pub fn small_int(v: i64) -> Option<Value> {
        if v < SMALL_INT_MIN || v > SMALL_INT_MAX {
            return None;
        }
        let bits = ((v as u64) << 1) | TAG_INT;
        Some(Value(bits))
    }

    /// # Safety
    /// `ptr` must point at a live, fully-initialized [`Header`] owned by
    /// the heap that will outlive every use of the returned `Value`.
    #[inline]
    pub unsafe fn from_heap_ptr(ptr: NonNull<Header>) -> Value {
        let bits = ptr.as_ptr() as u64;
        debug_assert_eq!(bits & TAG_INT, 0, "heap pointers must be even");
        debug_assert!(bits >= HEAP_RESERVED_BASE, "heap pointer aliases a sentinel");
        Value(bits)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == SENTINEL_NULL
    }

    #[inline]
    pub fn is_undefined(self) -> bool {
        self.0 == SENTINEL_UNDEFINED
    }

    #[inline]
    pub fn is_stop_iteration(self) -> bool {
        self.0 == SENTINEL_STOP_ITERATION
    }

    #[inline]
    pub fn is_bool(self) -> bool {
        self.0 == SENTINEL_TRUE || self.0 == SENTINEL_FALSE
    }

    #[inline]
    pub fn as_bool(self) -> Option<bool> {
        match self.0 {
            SENTINEL_TRUE => Some(true),
            SENTINEL_FALSE => Some(false),
            _ => None,
        }
    }

    #[inline]
    pub fn is_small_int(self) -> bool {
        self.0 & TAG_INT != 0
    }

    #[inline]
    pub fn as_small_int(self) -> Option<i64> {
        if self.is_small_int() {
            Some((self.0 as i64) >> 1)
        } else {
            None
        }
    }

    #[inline]
    pub fn is_heap_ptr(self) -> bool {
        self.0 & TAG_INT == 0 && self.0 >= HEAP_RESERVED_BASE
    }

    /// # Safety
    /// Caller must have checked [`Value::is_heap_ptr`]; the returned
    /// pointer is only valid as long as the owning heap has not swept the
    /// object.
    #[inline]
    pub unsafe fn as_heap_ptr(self) -> NonNull<Header> {
        debug_assert!(self.is_heap_ptr());
        NonNull::new_unchecked(self.0 as *mut Header)
    }

    /// "Truthy" per the interpreter's branch opcodes: everything except
    /// `null`, `false`, and `undefined` is true.
    #[inline]
    pub fn is_truthy(self) -> bool {
        !(self.is_null() || self.0 == SENTINEL_FALSE || self.is_undefined())
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else if self.is_undefined() {
            write!(f, "undefined")
        } else if self.is_stop_iteration() {
            write!(f, "<stop-iteration>")
        } else if let Some(b) = self.as_bool() {
            write!(f, "{b}")
        } else if let Some(i) = self.as_small_int() {
            write!(f, "{i}")
        } else {
            write!(f, "<heap {:#x}>", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_int_round_trips_across_full_range() {
        for v in [0, 1, -1, 12345, SMALL_INT_MIN, SMALL_INT_MAX] {
            let value = Value::small_int(v).expect("in range");
            assert_eq!(value.as_small_int(), Some(v));
        }
    }

    #[test]
    fn out_of_range_small_int_is_rejected() {
        assert!(Value::small_int(SMALL_INT_MAX + 1).is_none());
        assert!(Value::small_int(SMALL_INT_MIN - 1).is_none());
    }

    #[test]
    fn sentinels_are_distinct_and_not_small_ints() {
        let sentinels = [Value::NULL, Value::TRUE, Value::FALSE, Value::UNDEFINED, Value::STOP_ITERATION];
        for s in sentinels {
            assert!(!s.is_small_int());
            assert!(!s.is_heap_ptr());
        }
        assert_ne!(Value::TRUE, Value::FALSE);
        assert_ne!(Value::NULL, Value::UNDEFINED);
    }

    #[test]
    fn truthiness_matches_spec_rule() {
        assert!(!Value::NULL.is_truthy());
        assert!(!Value::FALSE.is_truthy());
        assert!(!Value::UNDEFINED.is_truthy());
        assert!(Value::TRUE.is_truthy());
        assert!(Value::small_int(0).unwrap().is_truthy());
    }
}
