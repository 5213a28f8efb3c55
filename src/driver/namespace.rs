// ABOUTME: Per-namespace visibility state (spec.md §4.5): vars, aliases,
// refers, and imports. Grounded on the teacher's `Environment`
// (`src/env.rs`) — a `RefCell`-backed binding map — generalized from a
// single lexical-scope chain to one map per namespace plus three
// cross-namespace lookup tables.

use std::cell::RefCell;
use std::collections::HashMap;

/// A var's current value, as far as the driver is concerned: the emitted
/// C# member reference that reads it, plus whether it currently holds a
/// mutable reference cell that must survive a reload (spec.md §4.5 "state
/// preservation").
#[derive(Debug, Clone)]
pub struct VarEntry {
    pub qualified_name: String,
    pub is_type: bool,
    pub is_mutable_ref: bool,
}

/// One compile namespace's visibility state.
#[derive(Debug, Default)]
pub struct Namespace {
    pub name: String,
    vars: RefCell<HashMap<String, VarEntry>>,
    pub aliases: RefCell<HashMap<String, String>>,
    pub refers: RefCell<HashMap<String, (String, String)>>,
    pub imports: RefCell<std::collections::HashSet<String>>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Namespace {
            name: name.into(),
            vars: RefCell::new(HashMap::new()),
            aliases: RefCell::new(HashMap::new()),
            refers: RefCell::new(HashMap::new()),
            imports: RefCell::new(std::collections::HashSet::new()),
        }
    }

    pub fn define_var(&self, name: impl Into<String>, entry: VarEntry) {
        self.vars.borrow_mut().insert(name.into(), entry);
    }

    pub fn get_var(&self, name: &str) -> Option<VarEntry> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn var_names(&self) -> Vec<String> {
        self.vars.borrow().keys().cloned().collect()
    }

    /// Vars whose current value is a mutable reference cell, captured
    /// before a reload so they can be re-bound afterward (spec.md §4.5
    /// "state preservation").
    pub fn mutable_ref_vars(&self) -> Vec<(String, VarEntry)> {
        self.vars
            .borrow()
            .iter()
            .filter(|(_, e)| e.is_mutable_ref)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn alias_target(&self, alias: &str) -> Option<String> {
        self.aliases.borrow().get(alias).cloned()
    }

    pub fn refer_target(&self, name: &str) -> Option<(String, String)> {
        self.refers.borrow().get(name).cloned()
    }

    pub fn imports_ns(&self, ns: &str) -> bool {
        self.imports.borrow().contains(ns)
    }

    /// True when some alias in this namespace's `require` table points at
    /// `ns` (spec.md §4.5's `(require '[A :as a])` visibility grant).
    pub fn has_alias_to(&self, ns: &str) -> bool {
        self.aliases.borrow().values().any(|target| target == ns)
    }
}

/// All known namespaces, keyed by name. Grounded the same way `Environment`
/// is: a single `RefCell<HashMap<...>>` guarding the registry itself, since
/// a session is single-threaded for eval (spec.md §5).
#[derive(Debug, Default)]
pub struct NsRegistry {
    namespaces: RefCell<HashMap<String, std::rc::Rc<Namespace>>>,
}

impl NsRegistry {
    pub fn new() -> Self {
        NsRegistry::default()
    }

    pub fn get_or_create(&self, name: &str) -> std::rc::Rc<Namespace> {
        if let Some(ns) = self.namespaces.borrow().get(name) {
            return ns.clone();
        }
        let ns = std::rc::Rc::new(Namespace::new(name));
        self.namespaces.borrow_mut().insert(name.to_string(), ns.clone());
        ns
    }

    pub fn get(&self, name: &str) -> Option<std::rc::Rc<Namespace>> {
        self.namespaces.borrow().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.namespaces.borrow().keys().cloned().collect()
    }

    #[cfg(test)]
    pub fn reset(&self) {
        self.namespaces.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let reg = NsRegistry::new();
        let a = reg.get_or_create("user");
        let b = reg.get_or_create("user");
        assert!(std::rc::Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn mutable_ref_vars_filters_plain_vars() {
        let ns = Namespace::new("user");
        ns.define_var(
            "counter",
            VarEntry {
                qualified_name: "User.counter".to_string(),
                is_type: false,
                is_mutable_ref: true,
            },
        );
        ns.define_var(
            "greeting",
            VarEntry {
                qualified_name: "User.greeting".to_string(),
                is_type: false,
                is_mutable_ref: false,
            },
        );
        let captured = ns.mutable_ref_vars();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, "counter");
    }

    #[test]
    fn import_visibility_is_per_namespace() {
        let ns = Namespace::new("my-app.core");
        assert!(!ns.imports_ns("my-app.util"));
        ns.imports.borrow_mut().insert("my-app.util".to_string());
        assert!(ns.imports_ns("my-app.util"));
    }

    #[test]
    fn aliasing_a_namespace_grants_visibility() {
        let ns = Namespace::new("my-app.core");
        assert!(!ns.has_alias_to("my-app.util"));
        ns.aliases.borrow_mut().insert("u".to_string(), "my-app.util".to_string());
        assert!(ns.has_alias_to("my-app.util"));
    }
}
