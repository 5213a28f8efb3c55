// ABOUTME: Symbol and Keyword value types plus their process-wide interning pool.
// Meta-less symbols/keywords are reference-equal singletons; meta-bearing symbols are not interned.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Mutex;

/// Interned `(namespace, name)` pair. Cloning is cheap (`Rc` bump).
#[derive(Clone, Eq)]
pub struct Symbol(Rc<SymbolData>);

struct SymbolData {
    ns: Option<String>,
    name: String,
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        // Interned symbols are reference-equal; fall back to structural
        // comparison so two pool entries built independently still compare
        // correctly (e.g. across `Interner::reset` boundaries in tests).
        Rc::ptr_eq(&self.0, &other.0) || (self.ns() == other.ns() && self.name() == other.name())
    }
}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ns().hash(state);
        self.name().hash(state);
    }
}

impl Symbol {
    pub fn ns(&self) -> Option<&str> {
        self.0.ns.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// True when `sym` was produced by [`Symbol::ptr_fresh`] or a gensym —
    /// i.e. guaranteed distinct from every other symbol with the same text.
    pub fn is_same_identity(&self, other: &Symbol) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Build an uninterned symbol carrying metadata. Per spec.md §3, symbols
    /// with attached metadata are distinct values, never pooled.
    pub fn fresh(ns: Option<String>, name: String) -> Symbol {
        Symbol(Rc::new(SymbolData { ns, name }))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.ns {
            Some(ns) => write!(f, "{}/{}", ns, self.0.name),
            None => write!(f, "{}", self.0.name),
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self)
    }
}

/// Keyword: same shape as Symbol, always interned (spec.md §3).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Keyword(Rc<SymbolData>);

impl Keyword {
    pub fn ns(&self) -> Option<&str> {
        self.0.ns.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.ns {
            Some(ns) => write!(f, ":{}/{}", ns, self.0.name),
            None => write!(f, ":{}", self.0.name),
        }
    }
}

impl fmt::Debug for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keyword({})", self)
    }
}

/// Process-lifecycle singleton pool for symbols and keywords, guarded by a
/// single mutex the way the teacher's `Environment` guards bindings with a
/// `RefCell` — here the pool is shared across threads so it needs real
/// exclusion rather than a single-threaded cell.
pub struct Interner {
    symbols: Mutex<HashMap<(Option<String>, String), Rc<SymbolData>>>,
    keywords: Mutex<HashMap<(Option<String>, String), Rc<SymbolData>>>,
    gensym_counter: std::sync::atomic::AtomicU64,
}

impl Interner {
    pub fn new() -> Self {
        Interner {
            symbols: Mutex::new(HashMap::new()),
            keywords: Mutex::new(HashMap::new()),
            gensym_counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn intern_symbol(&self, ns: Option<&str>, name: &str) -> Symbol {
        let key = (ns.map(String::from), name.to_string());
        let mut pool = self.symbols.lock().expect("symbol interner poisoned");
        let entry = pool.entry(key.clone()).or_insert_with(|| {
            Rc::new(SymbolData {
                ns: key.0.clone(),
                name: key.1.clone(),
            })
        });
        Symbol(Rc::clone(entry))
    }

    pub fn intern_keyword(&self, ns: Option<&str>, name: &str) -> Keyword {
        let key = (ns.map(String::from), name.to_string());
        let mut pool = self.keywords.lock().expect("keyword interner poisoned");
        let entry = pool.entry(key.clone()).or_insert_with(|| {
            Rc::new(SymbolData {
                ns: key.0.clone(),
                name: key.1.clone(),
            })
        });
        Keyword(Rc::clone(entry))
    }

    /// Mint a symbol guaranteed distinct from any interned or previously
    /// gensym'd symbol with the same textual prefix. Used by the macro
    /// engine's auto-gensym (spec.md §4.2) and by `(gensym)`.
    pub fn gensym(&self, prefix: &str) -> Symbol {
        let n = self
            .gensym_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Symbol::fresh(None, format!("{prefix}__{n}__auto__"))
    }

    /// Test-only teardown hook (spec.md §9: "process-lifecycle singletons
    /// with explicit teardown hooks used only in tests").
    #[cfg(test)]
    pub fn reset(&self) {
        self.symbols.lock().unwrap().clear();
        self.keywords.lock().unwrap().clear();
        self.gensym_counter
            .store(0, std::sync::atomic::Ordering::Relaxed);
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_symbols_are_reference_equal() {
        let interner = Interner::new();
        let a = interner.intern_symbol(None, "foo");
        let b = interner.intern_symbol(None, "foo");
        assert!(a.is_same_identity(&b));
    }

    #[test]
    fn interned_keywords_are_singletons_per_ns_name() {
        let interner = Interner::new();
        let a = interner.intern_keyword(Some("ns"), "k");
        let b = interner.intern_keyword(Some("ns"), "k");
        assert_eq!(a, b);
        let c = interner.intern_keyword(None, "k");
        assert_ne!(a, c);
    }

    #[test]
    fn gensym_is_always_fresh() {
        let interner = Interner::new();
        let a = interner.gensym("v");
        let b = interner.gensym("v");
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn fresh_symbols_with_meta_are_not_interned() {
        let interner = Interner::new();
        let pooled = interner.intern_symbol(None, "x");
        let meta_bearing = Symbol::fresh(None, "x".to_string());
        assert_eq!(pooled.name(), meta_bearing.name());
        assert!(!pooled.is_same_identity(&meta_bearing));
    }
}
