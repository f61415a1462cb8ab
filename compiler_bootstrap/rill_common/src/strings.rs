//! String interning: stable small-integer handles for short textual tokens
//! (identifiers, record field names, symbol literals).
//!
//! Handle `0` is the invalid sentinel and is never returned by `intern`.
//! Two handles compare equal iff the underlying strings are byte-identical;
//! since interning is the only way to obtain a handle, that reduces to a
//! plain integer compare.

use hashbrown::HashMap;
use std::fmt;

/// An interned string handle. Stable for the lifetime of the owning
/// [`StringTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternedStr(u32);

impl InternedStr {
    /// The invalid sentinel; never produced by `StringTable::intern`.
    pub const INVALID: InternedStr = InternedStr(0);

    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InternedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Interns byte-identical strings to the same handle.
///
/// Entries are append-only: a `StringTable` never forgets a string or
/// reuses a handle, so handles stay valid for the whole compilation or VM
/// lifetime that owns the table.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: Vec<Box<str>>,
    lookup: HashMap<Box<str>, InternedStr>,
}

impl StringTable {
    pub fn new() -> Self {
        // Reserve slot 0 for the invalid sentinel.
        Self {
            strings: vec![Box::from("")],
            lookup: HashMap::new(),
        }
    }

    pub fn intern(&mut self, s: &str) -> InternedStr {
        if let Some(&handle) = self.lookup.get(s) {
            return handle;
        }
        let handle = InternedStr(self.strings.len() as u32);
        let boxed: Box<str> = Box::from(s);
        self.strings.push(boxed.clone());
        self.lookup.insert(boxed, handle);
        handle
    }

    pub fn resolve(&self, handle: InternedStr) -> &str {
        self.strings
            .get(handle.0 as usize)
            .map(|s| s.as_ref())
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.strings.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_handle_is_never_interned() {
        let mut table = StringTable::new();
        assert!(InternedStr::INVALID.is_invalid());
        let h = table.intern("x");
        assert_ne!(h, InternedStr::INVALID);
    }

    #[test]
    fn interning_is_byte_equality() {
        let mut table = StringTable::new();
        let a = table.intern("hello");
        let b = table.intern("hello");
        let c = table.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.resolve(a), "hello");
    }

    #[test]
    fn round_trip_law() {
        let mut table = StringTable::new();
        for s in ["a", "bb", "ccc", "a", "bb"] {
            let h = table.intern(s);
            assert_eq!(table.resolve(h), s);
        }
        assert_eq!(table.len(), 3);
    }
}
