//! Process-wide string interning.
//!
//! Grounded on the teacher's `intern.rs`: a single growable table mapping
//! small integer ids to owned strings, with a reverse lookup for dedup on
//! insert. Bendu's runtime `Value::Str` and the compiler's constant pool
//! both hold `StringId`s rather than owned `String`s so that equal string
//! literals across a whole compilation unit share one allocation.

use std::fmt;

use ahash::AHashMap;

/// Identifies one interned string. Stable for the lifetime of the [`Interns`]
/// table that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The process-wide string pool.
///
/// Interning is append-only: once a string is assigned an id it keeps that
/// id for the life of the table. Reference counting for runtime strings
/// lives on the heap object that wraps a `StringId` (see `heap.rs`), not
/// here — the pool itself never frees entries, matching the teacher's
/// "torn down on VM shutdown after a final GC" lifecycle from the data
/// model (§3, `Resource ownership`).
#[derive(Debug, Default)]
pub struct Interns {
    strings: Vec<String>,
    lookup: AHashMap<String, StringId>,
}

impl Interns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning the existing id if already present.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        self.strings.push(s.to_owned());
        self.lookup.insert(s.to_owned(), id);
        id
    }

    #[inline]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups() {
        let mut interns = Interns::new();
        let a = interns.intern("hello");
        let b = interns.intern("hello");
        let c = interns.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interns.get(a), "hello");
        assert_eq!(interns.get(c), "world");
    }
}
