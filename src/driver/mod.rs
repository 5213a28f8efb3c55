// ABOUTME: REPL session driver (spec.md §4.5) — the eval algorithm that
// turns one read form into host-compiled, host-run results, threading
// namespace registry, result history, and the type cache across calls.
// Grounded on the teacher's REPL loop (`src/main.rs`) for the overall
// read-eval-print shape and its Ctrl-C handling for `Interrupted`, and on
// `src/sandbox.rs`'s capability-injection pattern for taking a `HostCompiler`
// as a constructor argument rather than reaching for a global.

pub mod host;
pub mod namespace;
pub mod reload;
pub mod typesig;
pub mod watch;
pub mod wire;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::analyzer::{self, CollectionLit, Ctx, Expr};
use crate::emitter::mangle::qualify;
use crate::emitter::{self, EmitCtx, EmitScope, Mode};
use crate::error::{DriverError, HostCompileError};
use crate::form::Form;
use crate::macroexpand::primitives::PrimitiveTable;
use crate::macroexpand::MacroRegistry;
use crate::reader;

use host::HostCompiler;
use namespace::{NsRegistry, VarEntry};
use typesig::{is_type_defining, type_signature};

/// The result of evaluating one form (spec.md §4.5 "eval(text) →
/// {values[], stdout, error?, namespace}").
#[derive(Debug, Clone, Default)]
pub struct EvalOutcome {
    pub values: Vec<String>,
    pub stdout: String,
    pub namespace: String,
}

/// One REPL session's durable state. Not `Sync` — a session is
/// single-threaded for eval (spec.md §5); the wire server is expected to
/// serialize access per connection (see `wire.rs`).
pub struct Session {
    macro_registry: MacroRegistry,
    primitives: PrimitiveTable,
    namespaces: NsRegistry,
    current_ns: RefCell<String>,
    /// Signatures of type-defining forms already compiled and loaded into
    /// this process (spec.md §4.5 "Type signature").
    type_cache: RefCell<std::collections::HashSet<String>>,
    /// `*1`/`*2`/`*3` result-history ring, most recent first.
    history: RefCell<[Option<String>; 3]>,
    host: Rc<dyn HostCompiler>,
    interrupted: AtomicBool,
}

impl Session {
    pub fn new(host: Rc<dyn HostCompiler>, initial_namespace: impl Into<String>) -> Self {
        let namespaces = NsRegistry::new();
        let current_ns = initial_namespace.into();
        namespaces.get_or_create(&current_ns);
        Session {
            macro_registry: MacroRegistry::new(),
            primitives: PrimitiveTable::new(),
            namespaces,
            current_ns: RefCell::new(current_ns),
            type_cache: RefCell::new(std::collections::HashSet::new()),
            history: RefCell::new([None, None, None]),
            host,
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn current_namespace(&self) -> String {
        self.current_ns.borrow().clone()
    }

    pub fn namespaces(&self) -> &NsRegistry {
        &self.namespaces
    }

    /// Requests cancellation of the in-flight eval (spec.md §5
    /// "Cancellation"). Checked cooperatively once per form.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Evaluates `text` with the current namespace temporarily switched to
    /// `ns` for the duration of the call, restoring the prior current
    /// namespace afterward — used by reload (`reload.rs`) to reevaluate a
    /// specific namespace's file without disturbing the caller's REPL
    /// namespace.
    pub fn eval_in_namespace(&self, ns: &str, text: &str) -> Result<EvalOutcome, DriverError> {
        let previous = self.current_namespace();
        *self.current_ns.borrow_mut() = ns.to_string();
        let result = self.eval(text);
        *self.current_ns.borrow_mut() = previous;
        result
    }

    /// Evaluates every form in `text` in source order (spec.md §5
    /// "Ordering"), threading namespace and history state across forms
    /// within the call.
    pub fn eval(&self, text: &str) -> Result<EvalOutcome, DriverError> {
        let forms = reader::read_all(text)?;
        let mut values = Vec::new();
        let mut stdout = String::new();
        for form in &forms {
            if self.interrupted.swap(false, Ordering::SeqCst) {
                return Err(DriverError::Interrupted);
            }
            let outcome = self.eval_one_form(form)?;
            values.extend(outcome.values);
            stdout.push_str(&outcome.stdout);
        }
        Ok(EvalOutcome {
            values,
            stdout,
            namespace: self.current_namespace(),
        })
    }

    fn eval_one_form(&self, form: &Form) -> Result<EvalOutcome, DriverError> {
        // Step 1: session data special forms never reach the analyzer.
        if let Some(sym) = form.as_symbol() {
            match sym.name() {
                "*ns*" => return Ok(self.single_value(self.current_namespace())),
                "*1" | "*2" | "*3" => {
                    let idx = sym.name().as_bytes()[1] as usize - b'1' as usize;
                    let value = self.history.borrow()[idx].clone().unwrap_or_else(|| "nil".to_string());
                    return Ok(self.single_value(value));
                }
                _ => {}
            }
        }

        let mut ctx = Ctx::new(&self.macro_registry, &self.primitives, self.current_namespace());
        let expr = analyzer::analyze(form, &mut ctx, true)?;

        // Step 2: namespace-management forms update the registry directly.
        if let Some(outcome) = self.apply_namespace_form(&expr)? {
            return Ok(outcome);
        }

        // Step 3: type-defining forms go through the type cache.
        if is_type_defining(&expr) {
            return self.eval_type_defining(&expr);
        }

        // Step 4: everything else is a continuation script.
        self.eval_continuation(&expr)
    }

    fn single_value(&self, value: String) -> EvalOutcome {
        EvalOutcome {
            values: vec![value],
            stdout: String::new(),
            namespace: self.current_namespace(),
        }
    }

    fn nil_outcome(&self) -> EvalOutcome {
        EvalOutcome {
            values: vec!["nil".to_string()],
            stdout: String::new(),
            namespace: self.current_namespace(),
        }
    }

    fn apply_namespace_form(&self, expr: &Expr) -> Result<Option<EvalOutcome>, DriverError> {
        match expr {
            Expr::Ns(ns_expr) => {
                let ns = self.namespaces.get_or_create(&ns_expr.name);
                for req in &ns_expr.requires {
                    apply_require(&ns, req);
                }
                for imp in &ns_expr.imports {
                    apply_import(&ns, imp);
                }
                *self.current_ns.borrow_mut() = ns_expr.name.clone();
                Ok(Some(self.nil_outcome()))
            }
            Expr::InNs(name) => {
                self.namespaces.get_or_create(name);
                *self.current_ns.borrow_mut() = name.clone();
                Ok(Some(self.nil_outcome()))
            }
            Expr::Require(req) => {
                let ns = self.namespaces.get_or_create(&self.current_namespace());
                apply_require(&ns, req);
                Ok(Some(self.nil_outcome()))
            }
            Expr::Import(imp) => {
                let ns = self.namespaces.get_or_create(&self.current_namespace());
                apply_import(&ns, imp);
                Ok(Some(self.nil_outcome()))
            }
            _ => Ok(None),
        }
    }

    fn eval_type_defining(&self, expr: &Expr) -> Result<EvalOutcome, DriverError> {
        let ns = self.current_namespace();
        let signature = type_signature(&ns, expr).expect("is_type_defining guarantees a signature");
        if self.type_cache.borrow().contains(&signature) {
            return Ok(self.nil_outcome());
        }

        let emit_ctx = EmitCtx::for_namespace(ns.clone());
        let source = emitter::emit(expr, Mode::Statement, &emit_ctx, &EmitScope::new());
        self.host.compile_unit(&source)?;
        self.type_cache.borrow_mut().insert(signature);

        let current = self.namespaces.get_or_create(&ns);
        self.install_type_vars(&current, expr);
        Ok(self.nil_outcome())
    }

    /// Installs the defined type name (and, for records, the two generated
    /// factory vars, named the ClojureCLR way: `->Name`/`map->Name`) into
    /// the current namespace (spec.md §4.5 step 3).
    fn install_type_vars(&self, ns: &namespace::Namespace, expr: &Expr) {
        let (name, is_record) = match expr {
            Expr::DefType { name, .. } => (name.name().to_string(), false),
            Expr::DefRecord { name, .. } => (name.name().to_string(), true),
            Expr::DefProtocol { name, .. } => (name.name().to_string(), false),
            _ => return,
        };
        let qualified_class = qualify(&ns.name, &name);
        ns.define_var(
            name.clone(),
            VarEntry {
                qualified_name: qualified_class.clone(),
                is_type: true,
                is_mutable_ref: false,
            },
        );
        if is_record {
            ns.define_var(
                format!("->{name}"),
                VarEntry {
                    qualified_name: format!("{qualified_class}.Create"),
                    is_type: false,
                    is_mutable_ref: false,
                },
            );
            ns.define_var(
                format!("map->{name}"),
                VarEntry {
                    qualified_name: format!("{qualified_class}.CreateFromMap"),
                    is_type: false,
                    is_mutable_ref: false,
                },
            );
        }
    }

    fn eval_continuation(&self, expr: &Expr) -> Result<EvalOutcome, DriverError> {
        self.check_type_visibility(expr)?;

        let emit_ctx = EmitCtx::for_namespace(self.current_namespace());
        let source = emitter::emit(expr, Mode::Expression, &emit_ctx, &EmitScope::new());
        let unit = self.host.run_continuation(&source)?;

        if let Expr::Def { symbol, type_hint, .. } = expr {
            let ns = self.namespaces.get_or_create(&self.current_namespace());
            let is_mutable_ref = type_hint.as_ref().map(|h| h.name == "Atom" || h.name == "Volatile").unwrap_or(false);
            ns.define_var(
                symbol.name().to_string(),
                VarEntry {
                    qualified_name: symbol.name().to_string(),
                    is_type: false,
                    is_mutable_ref,
                },
            );
        }

        let values = if unit.values.is_empty() { vec!["nil".to_string()] } else { unit.values.clone() };
        self.push_history(values.last().cloned().unwrap_or_else(|| "nil".to_string()));
        Ok(EvalOutcome {
            values,
            stdout: unit.stdout,
            namespace: self.current_namespace(),
        })
    }

    fn push_history(&self, value: String) {
        let mut h = self.history.borrow_mut();
        h[2] = h[1].take();
        h[1] = h[0].take();
        h[0] = Some(value);
    }

    /// Enforces spec.md §4.5 "Visibility" against every constructor call a
    /// continuation script reaches, before it's ever handed to the host
    /// compiler (spec.md §8 scenario 6's type-visibility gate).
    fn check_type_visibility(&self, expr: &Expr) -> Result<(), DriverError> {
        let mut refs = Vec::new();
        collect_new_refs(expr, &mut refs);
        if refs.is_empty() {
            return Ok(());
        }
        let current = self.namespaces.get_or_create(&self.current_namespace());
        for (type_name, explicit_ns) in refs {
            let Some(defining_ns) = self.resolve_defining_ns(&type_name, explicit_ns.as_deref()) else {
                continue;
            };
            if !is_accessible(&current, &defining_ns) {
                return Err(DriverError::HostCompile(HostCompileError::NotAccessible { type_name, defining_ns }));
            }
        }
        Ok(())
    }

    /// The namespace a constructor call's type name is defined in: the
    /// call's own resolved alias when it's namespace-qualified, otherwise
    /// whichever other known namespace happens to define a type of that
    /// name (an unqualified reference to a type the current namespace
    /// doesn't itself define). Returns `None` when the type is defined in
    /// the current namespace (always visible to itself) or in no known
    /// namespace at all (left for the host compiler to reject).
    fn resolve_defining_ns(&self, type_name: &str, explicit_ns: Option<&str>) -> Option<String> {
        if let Some(ns) = explicit_ns {
            return Some(ns.to_string());
        }
        let current = self.current_namespace();
        for candidate in self.namespaces.names() {
            if candidate == current {
                continue;
            }
            if let Some(ns) = self.namespaces.get(&candidate) {
                if ns.get_var(type_name).map(|v| v.is_type).unwrap_or(false) {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

/// Collects every `(type_name, ns)` pair a constructor call (`Expr::New`)
/// reaches anywhere in `expr`'s tree, for `check_type_visibility` to gate
/// before emission.
fn collect_new_refs(expr: &Expr, out: &mut Vec<(String, Option<String>)>) {
    match expr {
        Expr::New { type_name, ns, args } => {
            out.push((type_name.clone(), ns.clone()));
            for a in args {
                collect_new_refs(a, out);
            }
        }
        Expr::Literal(_) | Expr::KeywordRef(_) | Expr::SymbolRef { .. } | Expr::Quote(_) | Expr::DefMacro { .. } | Expr::StaticProperty { .. } => {}
        Expr::CollectionLiteral(lit) => match lit {
            CollectionLit::Vector(items) | CollectionLit::Set(items) => items.iter().for_each(|e| collect_new_refs(e, out)),
            CollectionLit::Map(pairs) => pairs.iter().for_each(|(k, v)| {
                collect_new_refs(k, out);
                collect_new_refs(v, out);
            }),
        },
        Expr::If { test, then, else_ } => {
            collect_new_refs(test, out);
            collect_new_refs(then, out);
            if let Some(e) = else_ {
                collect_new_refs(e, out);
            }
        }
        Expr::Do(body) | Expr::Recur { args: body } => body.iter().for_each(|e| collect_new_refs(e, out)),
        Expr::Let { bindings, body } | Expr::Loop { bindings, body } => {
            bindings.iter().for_each(|(_, e)| collect_new_refs(e, out));
            body.iter().for_each(|e| collect_new_refs(e, out));
        }
        Expr::Try { body, catches, finally } => {
            body.iter().for_each(|e| collect_new_refs(e, out));
            catches.iter().for_each(|c| c.body.iter().for_each(|e| collect_new_refs(e, out)));
            finally.iter().for_each(|e| collect_new_refs(e, out));
        }
        Expr::Throw(inner) | Expr::Cast { expr: inner, .. } | Expr::Await(inner) | Expr::Assert(inner) => collect_new_refs(inner, out),
        Expr::Def { init, .. } => {
            if let Some(init) = init {
                collect_new_refs(init, out);
            }
        }
        Expr::Fn(f) => f.methods.iter().for_each(|m| m.body.iter().for_each(|e| collect_new_refs(e, out))),
        Expr::Invoke { function, args } => {
            collect_new_refs(function, out);
            args.iter().for_each(|e| collect_new_refs(e, out));
        }
        Expr::InstanceMethod { target, args, .. } => {
            collect_new_refs(target, out);
            args.iter().for_each(|e| collect_new_refs(e, out));
        }
        Expr::InstanceProperty { target, .. } => collect_new_refs(target, out),
        Expr::StaticMethod { args, .. } | Expr::PrimitiveOp { operands: args, .. } | Expr::RawHost { interpolations: args, .. } => {
            args.iter().for_each(|e| collect_new_refs(e, out))
        }
        Expr::Assign { target, value } | Expr::SetBang { target, value } => {
            collect_new_refs(target, out);
            collect_new_refs(value, out);
        }
        Expr::Ns(_) | Expr::InNs(_) | Expr::Require(_) | Expr::Import(_) | Expr::DefProtocol { .. } => {}
        Expr::DefType { methods, .. } | Expr::DefRecord { methods, .. } => {
            methods.iter().for_each(|m| m.body.iter().for_each(|e| collect_new_refs(e, out)))
        }
        Expr::Test { body, .. } => body.iter().for_each(|e| collect_new_refs(e, out)),
    }
}

fn apply_require(ns: &namespace::Namespace, req: &analyzer::RequireClause) {
    if let Some(alias) = &req.alias {
        ns.aliases.borrow_mut().insert(alias.clone(), req.ns.clone());
    }
    for name in &req.refer {
        ns.refers.borrow_mut().insert(name.clone(), (req.ns.clone(), name.clone()));
    }
}

fn apply_import(ns: &namespace::Namespace, imp: &analyzer::ImportClause) {
    ns.imports.borrow_mut().insert(imp.host_ns.clone());
}

/// A symbol reference is only resolvable from `ns` when its defining
/// namespace is the current one or has been imported into it (spec.md
/// §4.5 "Visibility"). Used by the wire layer / CLI to surface the
/// `NotAccessible` error before even asking the host compiler.
pub fn is_accessible(accessing_ns: &namespace::Namespace, defining_ns: &str) -> bool {
    accessing_ns.name == defining_ns || accessing_ns.imports_ns(defining_ns) || accessing_ns.has_alias_to(defining_ns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use host::MockHostCompiler;

    fn session() -> Session {
        Session::new(Rc::new(MockHostCompiler::new()), "user")
    }

    #[test]
    fn star_ns_returns_current_namespace() {
        let s = session();
        let out = s.eval("*ns*").unwrap();
        assert_eq!(out.values, vec!["user".to_string()]);
    }

    #[test]
    fn in_ns_switches_current_namespace_without_compiling() {
        let s = session();
        let out = s.eval("(in-ns 'my-app.core)").unwrap();
        assert_eq!(out.namespace, "my-app.core");
        assert_eq!(s.current_namespace(), "my-app.core");
    }

    /// The exact C# source `eval_continuation` would send to the host for
    /// `text`, so a test can script `MockHostCompiler`'s response to it.
    fn continuation_source(s: &Session, text: &str) -> String {
        let form = reader::read_all(text).unwrap().remove(0);
        let mut ctx = Ctx::new(&s.macro_registry, &s.primitives, s.current_namespace());
        let expr = analyzer::analyze(&form, &mut ctx, true).unwrap();
        let emit_ctx = EmitCtx::for_namespace(s.current_namespace());
        emitter::emit(&expr, Mode::Expression, &emit_ctx, &EmitScope::new())
    }

    fn scripted_unit(value: &str) -> Result<host::CompiledUnit, HostCompileError> {
        Ok(host::CompiledUnit {
            source: String::new(),
            values: vec![value.to_string()],
            stdout: String::new(),
        })
    }

    #[test]
    fn history_ring_advances_on_each_eval() {
        // A throwaway session just to compute the exact source each form
        // would emit, so the scripted host responses key on the real thing.
        let probe = session();
        let src_a = continuation_source(&probe, "(+ 1 2)");
        let src_b = continuation_source(&probe, "(+ 10 20)");
        let src_c = continuation_source(&probe, "(+ 100 200)");

        let host = MockHostCompiler::new()
            .with_scripted_response(src_a, scripted_unit("3"))
            .with_scripted_response(src_b, scripted_unit("30"))
            .with_scripted_response(src_c, scripted_unit("300"));
        let s = Session::new(Rc::new(host), "user");

        assert_eq!(s.eval("(+ 1 2)").unwrap().values, vec!["3".to_string()]);
        assert_eq!(s.eval("(+ 10 20)").unwrap().values, vec!["30".to_string()]);
        assert_eq!(s.eval("(+ 100 200)").unwrap().values, vec!["300".to_string()]);

        assert_eq!(s.eval("*1").unwrap().values, vec!["300".to_string()]);
        assert_eq!(s.eval("*2").unwrap().values, vec!["30".to_string()]);
        assert_eq!(s.eval("*3").unwrap().values, vec!["3".to_string()]);
    }

    #[test]
    fn redefining_a_record_with_same_shape_hits_the_type_cache() {
        let s = session();
        s.eval("(defrecord Point [x y])").unwrap();
        assert_eq!(s.type_cache.borrow().len(), 1);
        s.eval("(defrecord Point [x y])").unwrap();
        assert_eq!(s.type_cache.borrow().len(), 1);
    }

    #[test]
    fn redefining_a_record_with_new_field_creates_a_new_cache_entry() {
        let s = session();
        s.eval("(defrecord Point [x y])").unwrap();
        s.eval("(defrecord Point [x y z])").unwrap();
        assert_eq!(s.type_cache.borrow().len(), 2);
    }

    #[test]
    fn defrecord_installs_factory_vars() {
        let s = session();
        s.eval("(defrecord Point [x y])").unwrap();
        let ns = s.namespaces.get("user").unwrap();
        assert!(ns.get_var("->Point").is_some());
        assert!(ns.get_var("map->Point").is_some());
    }

    #[test]
    fn interrupt_aborts_the_next_form() {
        let s = session();
        s.interrupt();
        let err = s.eval("(def a 1)").unwrap_err();
        assert!(matches!(err, DriverError::Interrupted));
    }
}
