//! String interner for identifier storage.
//!
//! Provides O(1) interning and lookup. Interned strings are leaked so that
//! lookups can hand out `&'static str` without lifetime plumbing; the
//! interner lives for the whole compilation anyway.

// Arc is the implementation of SharedInterner: one interner is shared by every
// phase of a compilation.
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::Name;

struct Inner {
    map: FxHashMap<&'static str, u32>,
    strings: Vec<&'static str>,
}

/// String interner mapping identifiers to compact [`Name`] handles.
///
/// Interning the same string twice returns the same `Name`, so name equality
/// is an integer compare.
pub struct StringInterner {
    inner: RwLock<Inner>,
}

impl StringInterner {
    /// Create a new interner with the empty string pre-interned as
    /// [`Name::EMPTY`].
    pub fn new() -> Self {
        let mut inner = Inner {
            map: FxHashMap::default(),
            strings: Vec::with_capacity(256),
        };
        let empty: &'static str = "";
        inner.map.insert(empty, 0);
        inner.strings.push(empty);
        StringInterner {
            inner: RwLock::new(inner),
        }
    }

    /// Intern a string, returning its `Name`.
    ///
    /// # Panics
    /// Panics if more than `u32::MAX` distinct strings are interned.
    pub fn intern(&self, s: &str) -> Name {
        {
            let guard = self.inner.read();
            if let Some(&idx) = guard.map.get(s) {
                return Name::new(idx);
            }
        }

        let mut guard = self.inner.write();
        // Double-check after acquiring the write lock.
        if let Some(&idx) = guard.map.get(s) {
            return Name::new(idx);
        }

        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        let idx = u32::try_from(guard.strings.len())
            .unwrap_or_else(|_| panic!("string interner exceeded u32::MAX entries"));
        guard.strings.push(leaked);
        guard.map.insert(leaked, idx);
        Name::new(idx)
    }

    /// Look up the string for a `Name`.
    ///
    /// Returns `&'static str` because interned strings are never deallocated.
    pub fn lookup(&self, name: Name) -> &'static str {
        let guard = self.inner.read();
        guard.strings[name.index()]
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    /// True if only the empty string is interned.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

/// Clonable handle to a shared [`StringInterner`].
///
/// Every phase of a compilation (type store, analyzer, lowering) holds one of
/// these; they all see the same name table.
#[derive(Clone)]
pub struct SharedInterner(Arc<StringInterner>);

impl SharedInterner {
    pub fn new() -> Self {
        SharedInterner(Arc::new(StringInterner::new()))
    }
}

impl Default for SharedInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for SharedInterner {
    type Target = StringInterner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for SharedInterner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedInterner")
            .field("len", &self.0.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_and_lookup() {
        let interner = StringInterner::new();

        let a = interner.intern("alpha");
        let b = interner.intern("beta");
        let a2 = interner.intern("alpha");

        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(interner.lookup(a), "alpha");
        assert_eq!(interner.lookup(b), "beta");
    }

    #[test]
    fn empty_string_is_pre_interned() {
        let interner = StringInterner::new();
        assert_eq!(interner.intern(""), Name::EMPTY);
        assert_eq!(interner.lookup(Name::EMPTY), "");
    }

    #[test]
    fn shared_interner_sees_same_table() {
        let interner = SharedInterner::new();
        let clone = interner.clone();
        assert_eq!(interner.intern("x"), clone.intern("x"));
    }
}
