// ABOUTME: Dev-mode reload (spec.md §4.5 "Reload"/§5 "File watching") —
// debounce, namespace dependency tracking, stateful-binding capture and
// restore, and recursive topological reload. `notify_changed` is the seam a
// watcher drives on each detected change; `watch.rs` supplies the actual
// filesystem polling, kept separate so this module stays agnostic to how a
// change was detected.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use crate::config::RELOAD_DEBOUNCE;
use crate::driver::host::ProjectLoader;
use crate::driver::namespace::VarEntry;
use crate::driver::Session;
use crate::error::DriverError;

/// Which namespaces require/import which, rebuilt incrementally as
/// namespaces are (re)loaded.
#[derive(Default)]
pub struct DependencyGraph {
    dependents: RefCell<HashMap<String, HashSet<String>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    pub fn record_dependency(&self, dependent: &str, dependency: &str) {
        self.dependents
            .borrow_mut()
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string());
    }

    /// Drops every edge recorded *for* `ns` (i.e. `ns` as someone else's
    /// dependent) — called before reanalyzing `ns` so stale require/import
    /// edges don't survive a definition that dropped them.
    pub fn clear_edges_from(&self, ns: &str) {
        for dependents in self.dependents.borrow_mut().values_mut() {
            dependents.remove(ns);
        }
    }

    pub fn dependents_of(&self, ns: &str) -> Vec<String> {
        self.dependents.borrow().get(ns).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }
}

/// Per-namespace debounce tracking (spec.md: "≥400 ms window") plus the
/// reload-sequence mutex (spec.md §5 "serialized through a reload mutex so
/// a single source change produces one reload sequence").
pub struct ReloadDebouncer {
    last_trigger: Mutex<HashMap<String, Instant>>,
    reload_lock: Mutex<()>,
}

impl Default for ReloadDebouncer {
    fn default() -> Self {
        ReloadDebouncer {
            last_trigger: Mutex::new(HashMap::new()),
            reload_lock: Mutex::new(()),
        }
    }
}

impl ReloadDebouncer {
    pub fn new() -> Self {
        ReloadDebouncer::default()
    }

    /// True if this event for `ns` is outside the debounce window of the
    /// previous one — a burst of saves within the window collapses to the
    /// single reload the first event in the burst triggers.
    pub fn should_trigger(&self, ns: &str, now: Instant) -> bool {
        let mut last = self.last_trigger.lock().expect("reload debounce mutex poisoned");
        let fresh = last.get(ns).map(|t| now.duration_since(*t) >= RELOAD_DEBOUNCE).unwrap_or(true);
        if fresh {
            last.insert(ns.to_string(), now);
        }
        fresh
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReloadReport {
    pub reloaded: Vec<String>,
    pub errors: Vec<(String, String)>,
}

/// Drives reload of a namespace and, recursively, its dependents, in the
/// order recursion naturally gives: a namespace's dependents are only
/// reloaded once it has reloaded itself (spec.md §4.5 "Reload").
pub struct ReloadEngine<'a> {
    pub loader: &'a dyn ProjectLoader,
    pub graph: &'a DependencyGraph,
    pub debouncer: &'a ReloadDebouncer,
}

impl<'a> ReloadEngine<'a> {
    /// The seam an external filesystem watcher calls on a detected change
    /// (spec.md §5 "File watching"). Debounces per-namespace and, once
    /// past the window, runs the full reload sequence; an event inside the
    /// window is swallowed since the first event in the burst already
    /// triggered (or will trigger) the reload.
    pub fn notify_changed(&self, session: &Session, ns: &str, now: Instant) -> Option<ReloadReport> {
        if self.debouncer.should_trigger(ns, now) {
            Some(self.reload_namespace(session, ns))
        } else {
            None
        }
    }

    pub fn reload_namespace(&self, session: &Session, ns: &str) -> ReloadReport {
        let _guard = self.debouncer.reload_lock.lock().expect("reload mutex poisoned");
        let mut report = ReloadReport::default();
        let mut in_progress = HashSet::new();
        self.reload_recursive(session, ns, &mut report, &mut in_progress);
        report
    }

    fn reload_recursive(&self, session: &Session, ns: &str, report: &mut ReloadReport, in_progress: &mut HashSet<String>) {
        if !in_progress.insert(ns.to_string()) {
            return; // cyclic require graph; already reloading this namespace higher up the stack
        }

        match self.reload_one(session, ns) {
            Ok(()) => report.reloaded.push(ns.to_string()),
            Err(e) => {
                report.errors.push((ns.to_string(), e.to_string()));
                return; // don't cascade a failed reload to dependents
            }
        }

        for dependent in self.graph.dependents_of(ns) {
            self.reload_recursive(session, &dependent, report, in_progress);
        }
    }

    fn reload_one(&self, session: &Session, ns: &str) -> Result<(), DriverError> {
        let captured = session
            .namespaces()
            .get(ns)
            .map(|namespace| namespace.mutable_ref_vars())
            .unwrap_or_default();

        self.graph.clear_edges_from(ns);

        let source = self
            .loader
            .load_namespace_source(ns)
            .map_err(|e| DriverError::UnknownOp(format!("cannot reload {ns}: {e}")))?;
        session.eval_in_namespace(ns, &source)?;

        for required in required_namespaces(&source) {
            self.graph.record_dependency(ns, &required);
        }

        if let Some(namespace) = session.namespaces().get(ns) {
            restore_stateful_bindings(&namespace, captured);
        }
        Ok(())
    }
}

fn restore_stateful_bindings(namespace: &crate::driver::namespace::Namespace, captured: Vec<(String, VarEntry)>) {
    for (name, entry) in captured {
        namespace.define_var(name, entry);
    }
}

/// Scans a namespace's source text for `require`/`import` target names, at
/// any nesting depth (covering both standalone `(require ...)` forms and
/// `ns`-clause-nested ones). A lightweight structural scan rather than a
/// full re-analysis, since dependency discovery only needs namespace names.
fn required_namespaces(source: &str) -> Vec<String> {
    let forms = match crate::reader::read_all(source) {
        Ok(forms) => forms,
        Err(_) => return Vec::new(),
    };
    let mut deps = Vec::new();
    for form in &forms {
        collect_require_targets(form, &mut deps);
    }
    deps
}

fn collect_require_targets(form: &Form, deps: &mut Vec<String>) {
    let Some(items) = form.as_list_items() else { return };
    if let Some(head) = items.first().and_then(|f| f.as_symbol()) {
        if matches!(head.name(), "require" | "import") {
            for target in &items[1..] {
                if let Some(s) = target.as_symbol() {
                    deps.push(s.name().to_string());
                }
            }
        }
    }
    for item in &items {
        collect_require_targets(item, deps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::host::{MockHostCompiler, MockProjectLoader};
    use std::rc::Rc;

    #[test]
    fn dependents_of_is_empty_until_recorded() {
        let graph = DependencyGraph::new();
        assert!(graph.dependents_of("my-app.core").is_empty());
        graph.record_dependency("my-app.web", "my-app.core");
        assert_eq!(graph.dependents_of("my-app.core"), vec!["my-app.web".to_string()]);
    }

    #[test]
    fn clear_edges_from_removes_ns_as_a_dependent_everywhere() {
        let graph = DependencyGraph::new();
        graph.record_dependency("my-app.web", "my-app.core");
        graph.clear_edges_from("my-app.web");
        assert!(graph.dependents_of("my-app.core").is_empty());
    }

    #[test]
    fn debounce_rejects_events_within_the_window() {
        let debouncer = ReloadDebouncer::new();
        let t0 = Instant::now();
        assert!(debouncer.should_trigger("user", t0));
        assert!(!debouncer.should_trigger("user", t0 + std::time::Duration::from_millis(50)));
        assert!(debouncer.should_trigger("user", t0 + std::time::Duration::from_millis(500)));
    }

    #[test]
    fn notify_changed_swallows_events_inside_the_debounce_window() {
        let host: Rc<dyn crate::driver::host::HostCompiler> = Rc::new(MockHostCompiler::new());
        let session = Session::new(host, "user");
        let loader = MockProjectLoader::new().with_source("user", "(def a 1)");
        let graph = DependencyGraph::new();
        let debouncer = ReloadDebouncer::new();
        let engine = ReloadEngine {
            loader: &loader,
            graph: &graph,
            debouncer: &debouncer,
        };
        let t0 = Instant::now();
        assert!(engine.notify_changed(&session, "user", t0).is_some());
        assert!(engine.notify_changed(&session, "user", t0 + std::time::Duration::from_millis(50)).is_none());
    }

    #[test]
    fn reload_namespace_reevaluates_source_and_reports_success() {
        let host: Rc<dyn crate::driver::host::HostCompiler> = Rc::new(MockHostCompiler::new());
        let session = Session::new(host, "user");
        let loader = MockProjectLoader::new().with_source("user", "(def a 1)");
        let graph = DependencyGraph::new();
        let debouncer = ReloadDebouncer::new();
        let engine = ReloadEngine {
            loader: &loader,
            graph: &graph,
            debouncer: &debouncer,
        };
        let report = engine.reload_namespace(&session, "user");
        assert_eq!(report.reloaded, vec!["user".to_string()]);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn reload_reports_an_error_for_a_missing_namespace() {
        let host: Rc<dyn crate::driver::host::HostCompiler> = Rc::new(MockHostCompiler::new());
        let session = Session::new(host, "user");
        let loader = MockProjectLoader::new();
        let graph = DependencyGraph::new();
        let debouncer = ReloadDebouncer::new();
        let engine = ReloadEngine {
            loader: &loader,
            graph: &graph,
            debouncer: &debouncer,
        };
        let report = engine.reload_namespace(&session, "ghost.ns");
        assert!(report.reloaded.is_empty());
        assert_eq!(report.errors.len(), 1);
    }
}
