// ABOUTME: Compile-time macro engine (spec.md §4.2): a small tree-walking
// evaluator for macro bodies, syntax-quote's structural expansion, and the
// registry `defmacro` installs into.

pub mod primitives;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::form::{Form, FormData};
use crate::interner;
use crate::symbol::Symbol;
use primitives::PrimitiveTable;

/// A value living inside the macro evaluator. Most values are ordinary
/// [`Form`]s; `fn` additionally needs a callable representation that `Form`
/// itself (a closed data sum, spec.md §3) has no variant for.
#[derive(Clone)]
pub enum MacroValue {
    Data(Form),
    Closure(Rc<MacroClosure>),
}

impl MacroValue {
    fn into_form(self) -> Result<Form, RuntimeError> {
        match self {
            MacroValue::Data(f) => Ok(f),
            MacroValue::Closure(_) => Err(RuntimeError::message(
                "cannot use a macro-time function value where a plain form was expected",
            )),
        }
    }
}

pub struct MacroClosure {
    params: Vec<Symbol>,
    rest: Option<Symbol>,
    body: Vec<Form>,
    env: Rc<MacroEnv>,
}

/// Lexical scope for the macro evaluator: a chain of frames, innermost first,
/// mirroring the teacher's `Environment` but keyed on interned `Symbol`s and
/// holding [`MacroValue`]s rather than the runtime's own value type.
pub struct MacroEnv {
    bindings: RefCell<HashMap<String, MacroValue>>,
    parent: Option<Rc<MacroEnv>>,
}

impl MacroEnv {
    pub fn root() -> Rc<MacroEnv> {
        Rc::new(MacroEnv {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    fn child(parent: &Rc<MacroEnv>) -> Rc<MacroEnv> {
        Rc::new(MacroEnv {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    fn define(&self, name: &str, value: MacroValue) {
        self.bindings.borrow_mut().insert(name.to_string(), value);
    }

    fn lookup(&self, name: &str) -> Option<MacroValue> {
        if let Some(v) = self.bindings.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }
}

/// Registry of macros installed by `defmacro`, keyed on unqualified name
/// (spec.md §4.2: "a global expansion-time registry keyed by unqualified
/// name"). `RefCell`, not a mutex: the REPL session this engine serves is
/// single-threaded for eval (spec.md §5), and every other macro-engine type
/// here is already `Rc`-based and therefore `!Send`.
#[derive(Default)]
pub struct MacroRegistry {
    macros: RefCell<HashMap<String, Rc<MacroClosure>>>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        MacroRegistry::default()
    }

    pub fn register(&self, name: &str, closure: Rc<MacroClosure>) {
        self.macros.borrow_mut().insert(name.to_string(), closure);
    }

    pub fn get(&self, name: &str) -> Option<Rc<MacroClosure>> {
        self.macros.borrow().get(name).cloned()
    }

    pub fn is_macro(&self, name: &str) -> bool {
        self.macros.borrow().contains_key(name)
    }
}

/// Control-flow result of evaluating one macro-body form: either a plain
/// value, or an in-flight `recur` waiting to be caught by the innermost
/// enclosing function invocation (spec.md §4.2/§4.3: "must be in tail
/// position of the innermost frame").
enum Flow {
    Value(MacroValue),
    Recur(Vec<MacroValue>),
}

fn truthy(v: &MacroValue) -> bool {
    match v {
        MacroValue::Closure(_) => true,
        MacroValue::Data(f) => !matches!(f.data, FormData::Nil | FormData::Boolean(false)),
    }
}

/// Evaluates `form` as a statement: `recur` surfacing here is always an
/// error, since statement position is never a tail position.
fn eval_stmt(form: &Form, env: &Rc<MacroEnv>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<MacroValue, RuntimeError> {
    match eval_flow(form, env, registry, table)? {
        Flow::Value(v) => Ok(v),
        Flow::Recur(_) => Err(RuntimeError::message("recur used outside tail position")),
    }
}

/// Evaluates a fully-expanded macro body form to a [`Form`], the public
/// entry point `defmacro` expansion (and the analyzer, later) calls.
pub fn eval_macro(form: &Form, env: &Rc<MacroEnv>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Form, RuntimeError> {
    eval_stmt(form, env, registry, table)?.into_form()
}

fn eval_body_tail(body: &[Form], env: &Rc<MacroEnv>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Flow, RuntimeError> {
    let Some((last, init)) = body.split_last() else {
        return Ok(Flow::Value(MacroValue::Data(Form::nil())));
    };
    for form in init {
        eval_stmt(form, env, registry, table)?;
    }
    eval_flow(last, env, registry, table)
}

fn eval_flow(form: &Form, env: &Rc<MacroEnv>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Flow, RuntimeError> {
    match &form.data {
        FormData::Symbol(sym) => {
            let key = qualified_key(sym);
            env.lookup(&key)
                .map(Flow::Value)
                .ok_or_else(|| RuntimeError::message(format!("unresolved symbol in macro body: {sym}")))
        }
        FormData::List(l) if !l.is_empty() => {
            let items = l.to_vec();
            let head = &items[0];
            if let Some(sym) = head.as_symbol() {
                match sym.name() {
                    "quote" => special_quote(&items),
                    "if" => special_if(&items, env, registry, table),
                    "do" => eval_body_tail(&items[1..], env, registry, table),
                    "let" | "let*" => special_let(&items, env, registry, table),
                    "fn" | "fn*" => special_fn(&items, env),
                    "syntax-quote" => special_syntax_quote(&items, env, registry, table),
                    "recur" => special_recur(&items, env, registry, table),
                    _ => eval_call(sym, &items[1..], env, registry, table),
                }
            } else {
                let head_val = eval_stmt(head, env, registry, table)?;
                let args = eval_args(&items[1..], env, registry, table)?;
                apply_value(head_val, args, registry, table)
            }
        }
        _ => Ok(Flow::Value(MacroValue::Data(form.clone()))),
    }
}

fn qualified_key(sym: &Symbol) -> String {
    match sym.ns() {
        Some(ns) => format!("{ns}/{}", sym.name()),
        None => sym.name().to_string(),
    }
}

fn special_quote(items: &[Form]) -> Result<Flow, RuntimeError> {
    if items.len() != 2 {
        return Err(RuntimeError::message("quote requires exactly 1 argument"));
    }
    Ok(Flow::Value(MacroValue::Data(items[1].clone())))
}

fn special_if(items: &[Form], env: &Rc<MacroEnv>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Flow, RuntimeError> {
    if items.len() < 3 || items.len() > 4 {
        return Err(RuntimeError::message("if requires a test, a then branch, and an optional else branch"));
    }
    let test = eval_stmt(&items[1], env, registry, table)?;
    if truthy(&test) {
        eval_flow(&items[2], env, registry, table)
    } else if items.len() == 4 {
        eval_flow(&items[3], env, registry, table)
    } else {
        Ok(Flow::Value(MacroValue::Data(Form::nil())))
    }
}

fn binding_vector(form: &Form) -> Result<Vec<Form>, RuntimeError> {
    match &form.data {
        FormData::Vector(v) => Ok(v.to_vec()),
        _ => Err(RuntimeError::message("expected a binding vector")),
    }
}

fn special_let(items: &[Form], env: &Rc<MacroEnv>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Flow, RuntimeError> {
    if items.len() < 2 {
        return Err(RuntimeError::message("let requires a binding vector"));
    }
    let bindings = binding_vector(&items[1])?;
    if bindings.len() % 2 != 0 {
        return Err(RuntimeError::message("let binding vector requires an even number of forms"));
    }
    let child = MacroEnv::child(env);
    for pair in bindings.chunks(2) {
        let name = pair[0]
            .as_symbol()
            .ok_or_else(|| RuntimeError::message("let binding names must be symbols"))?;
        let value = eval_stmt(&pair[1], &child, registry, table)?;
        child.define(name.name(), value);
    }
    eval_body_tail(&items[2..], &child, registry, table)
}

fn parse_params(vec_form: &Form) -> Result<(Vec<Symbol>, Option<Symbol>), RuntimeError> {
    let raw = binding_vector(vec_form)?;
    let mut params = Vec::new();
    let mut rest = None;
    let mut i = 0;
    while i < raw.len() {
        let sym = raw[i]
            .as_symbol()
            .ok_or_else(|| RuntimeError::message("fn parameters must be symbols"))?;
        if sym.name() == "&" {
            let rest_sym = raw
                .get(i + 1)
                .and_then(|f| f.as_symbol())
                .ok_or_else(|| RuntimeError::message("& must be followed by a rest parameter symbol"))?;
            rest = Some(rest_sym.clone());
            break;
        }
        params.push(sym.clone());
        i += 1;
    }
    Ok((params, rest))
}

fn special_fn(items: &[Form], env: &Rc<MacroEnv>) -> Result<Flow, RuntimeError> {
    if items.len() < 2 {
        return Err(RuntimeError::message("fn requires a parameter vector"));
    }
    let closure = build_closure(&items[1], items[2..].to_vec(), env)?;
    Ok(Flow::Value(MacroValue::Closure(closure)))
}

/// Builds a macro-time closure from a parameter vector and body, shared by
/// the `fn`/`fn*` special form and `defmacro`'s installation path (spec.md
/// §4.2/§4.3 — both produce the same [`MacroClosure`] shape).
pub fn build_closure(params_form: &Form, body: Vec<Form>, env: &Rc<MacroEnv>) -> Result<Rc<MacroClosure>, RuntimeError> {
    let (params, rest) = parse_params(params_form)?;
    Ok(Rc::new(MacroClosure {
        params,
        rest,
        body,
        env: Rc::clone(env),
    }))
}

/// Expands one macro call: binds the raw, unevaluated argument forms
/// directly (spec.md §4.2 — macro parameters receive syntax, not values)
/// and runs the macro body to produce the replacement form.
pub fn expand_macro_call(closure: &Rc<MacroClosure>, raw_args: &[Form], registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Form, RuntimeError> {
    let args: Vec<MacroValue> = raw_args.iter().cloned().map(MacroValue::Data).collect();
    match invoke_closure(closure, args, registry, table)? {
        Flow::Value(v) => v.into_form(),
        Flow::Recur(_) => Err(RuntimeError::message("recur used outside tail position")),
    }
}

fn special_recur(items: &[Form], env: &Rc<MacroEnv>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Flow, RuntimeError> {
    let args = eval_args(&items[1..], env, registry, table)?;
    Ok(Flow::Recur(args))
}

fn is_unquote_like(form: &Form, name: &str) -> Option<Form> {
    let sym = form.head_symbol()?;
    if sym.ns().is_none() && sym.name() == name {
        if let Some(items) = form.as_list_items() {
            if items.len() == 2 {
                return Some(items[1].clone());
            }
        }
    }
    None
}

fn special_syntax_quote(items: &[Form], env: &Rc<MacroEnv>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Flow, RuntimeError> {
    if items.len() != 2 {
        return Err(RuntimeError::message("syntax-quote requires exactly 1 argument"));
    }
    let template = &items[1];
    if let Some(inner) = is_unquote_like(template, "unquote") {
        return eval_flow(&inner, env, registry, table);
    }
    let mut gensyms = HashMap::new();
    let expanded = expand_syntax_quote(template, &mut gensyms);
    eval_flow(&expanded, env, registry, table)
}

fn eval_args(forms: &[Form], env: &Rc<MacroEnv>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Vec<MacroValue>, RuntimeError> {
    forms.iter().map(|f| eval_stmt(f, env, registry, table)).collect()
}

fn apply_value(callee: MacroValue, args: Vec<MacroValue>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Flow, RuntimeError> {
    match callee {
        MacroValue::Closure(closure) => invoke_closure(&closure, args, registry, table),
        MacroValue::Data(_) => Err(RuntimeError::message("cannot call a non-function value")),
    }
}

/// Invokes a macro-time closure, trampolining `recur` in tail position back
/// into a fresh call frame rather than growing the Rust call stack (spec.md
/// §4.3: "function boundary erases frame").
fn invoke_closure(closure: &Rc<MacroClosure>, mut args: Vec<MacroValue>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Flow, RuntimeError> {
    loop {
        if args.len() < closure.params.len() || (closure.rest.is_none() && args.len() != closure.params.len()) {
            return Err(RuntimeError::message(format!(
                "function expects {} argument(s){}, got {}",
                closure.params.len(),
                if closure.rest.is_some() { " or more" } else { "" },
                args.len()
            )));
        }
        let call_env = MacroEnv::child(&closure.env);
        for (param, value) in closure.params.iter().zip(args.iter()) {
            call_env.define(param.name(), value.clone());
        }
        if let Some(rest) = &closure.rest {
            let rest_forms: Vec<Form> = args[closure.params.len()..]
                .iter()
                .cloned()
                .map(|v| v.into_form())
                .collect::<Result<_, _>>()?;
            call_env.define(rest.name(), MacroValue::Data(Form::list(rest_forms)));
        }

        match eval_body_tail(&closure.body, &call_env, registry, table)? {
            Flow::Value(v) => return Ok(Flow::Value(v)),
            Flow::Recur(new_args) => {
                args = new_args;
                continue;
            }
        }
    }
}

fn eval_call(sym: &Symbol, arg_forms: &[Form], env: &Rc<MacroEnv>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Flow, RuntimeError> {
    if sym.ns().is_none() && sym.name() == "apply" {
        return special_apply(arg_forms, env, registry, table);
    }

    let key = qualified_key(sym);

    match env.lookup(&key) {
        Some(MacroValue::Closure(closure)) => {
            let args = eval_args(arg_forms, env, registry, table)?;
            return invoke_closure(&closure, args, registry, table);
        }
        Some(MacroValue::Data(_)) => {
            return Err(RuntimeError::message(format!("{sym} is bound to a non-function value and cannot be called")));
        }
        None => {}
    }

    if let Some(f) = table.get(sym.name()) {
        let args = eval_args(arg_forms, env, registry, table)?;
        let forms: Vec<Form> = args.into_iter().map(|v| v.into_form()).collect::<Result<_, _>>()?;
        return Ok(Flow::Value(MacroValue::Data(f(&forms)?)));
    }

    if let Some(closure) = registry.get(sym.name()) {
        let args = eval_args(arg_forms, env, registry, table)?;
        return invoke_closure(&closure, args, registry, table);
    }

    Err(RuntimeError::message(format!("unresolved call target in macro body: {sym}")))
}

fn special_apply(arg_forms: &[Form], env: &Rc<MacroEnv>, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Flow, RuntimeError> {
    if arg_forms.len() != 2 {
        return Err(RuntimeError::message("apply requires exactly 2 arguments: a primitive name and an argument list"));
    }
    let target = eval_stmt(&arg_forms[0], env, registry, table)?.into_form()?;
    let target_name = target
        .as_symbol()
        .ok_or_else(|| RuntimeError::message("apply's first argument must evaluate to a symbol naming a primitive"))?
        .name()
        .to_string();
    let list_val = eval_stmt(&arg_forms[1], env, registry, table)?.into_form()?;
    let items = list_val
        .as_list_items()
        .ok_or_else(|| RuntimeError::message("apply's second argument must evaluate to a list"))?;
    let f = table
        .get(&target_name)
        .ok_or_else(|| RuntimeError::message(format!("apply: unknown primitive {target_name}")))?;
    Ok(Flow::Value(MacroValue::Data(f(&items)?)))
}

fn sym_form(name: &str) -> Form {
    Form::symbol(interner::intern_symbol(None, name))
}

fn wrap_list_elems(items: Vec<Form>, gensyms: &mut HashMap<String, Symbol>) -> Form {
    let mut concat_args = vec![sym_form("concat")];
    for item in items {
        if let Some(spliced) = is_unquote_like(&item, "unquote-splicing") {
            concat_args.push(spliced);
        } else if let Some(unquoted) = is_unquote_like(&item, "unquote") {
            concat_args.push(Form::list(vec![sym_form("list"), unquoted]));
        } else {
            let expanded = expand_syntax_quote(&item, gensyms);
            concat_args.push(Form::list(vec![sym_form("list"), expanded]));
        }
    }
    Form::list(concat_args)
}

/// Structural syntax-quote rewrite (spec.md §4.2): every form becomes a
/// constructor expression (`quote`, `list`, `concat`, `vec`, `set`,
/// `apply hash-map`) that rebuilds it at macro-eval time, with embedded
/// unquote/unquote-splicing forms left as live sub-expressions.
fn expand_syntax_quote(form: &Form, gensyms: &mut HashMap<String, Symbol>) -> Form {
    match &form.data {
        FormData::Symbol(sym) if sym.ns().is_none() && sym.name().ends_with('#') && sym.name().len() > 1 => {
            let base = &sym.name()[..sym.name().len() - 1];
            let fresh = gensyms
                .entry(base.to_string())
                .or_insert_with(|| interner::gensym(base))
                .clone();
            Form::list(vec![sym_form("quote"), Form::symbol(fresh)])
        }
        FormData::List(l) => wrap_list_elems(l.to_vec(), gensyms),
        FormData::Vector(v) => Form::list(vec![sym_form("vec"), wrap_list_elems(v.to_vec(), gensyms)]),
        FormData::Set(s) => Form::list(vec![sym_form("set"), wrap_list_elems(s.items(), gensyms)]),
        FormData::Map(m) => {
            let flat: Vec<Form> = m.entries().into_iter().flat_map(|(k, v)| [k, v]).collect();
            Form::list(vec![
                sym_form("apply"),
                Form::list(vec![sym_form("quote"), sym_form("hash-map")]),
                wrap_list_elems(flat, gensyms),
            ])
        }
        _ => Form::list(vec![sym_form("quote"), form.clone()]),
    }
}

/// Repeatedly expands `form` while its head names a registered macro
/// (spec.md §4.2/§4.3: "repeated ... while the head remains a macro
/// symbol"). A qualified `ns/name` head is left alone — qualified macro
/// references are not expanded, matching `defmacro`'s unqualified-name-only
/// registry.
pub fn expand_to_fixed_point(form: &Form, registry: &MacroRegistry, table: &PrimitiveTable) -> Result<Form, RuntimeError> {
    let mut current = form.clone();
    loop {
        let Some(sym) = current.head_symbol() else {
            return Ok(current);
        };
        if sym.ns().is_some() {
            return Ok(current);
        }
        let Some(closure) = registry.get(sym.name()) else {
            return Ok(current);
        };
        let items = current.as_list_items().unwrap_or_default();
        current = expand_macro_call(&closure, &items[1..], registry, table)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader;

    fn parse_one(src: &str) -> Form {
        reader::read_all(src).unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn evaluates_arithmetic_call() {
        let env = MacroEnv::root();
        let registry = MacroRegistry::new();
        let table = PrimitiveTable::new();
        let form = parse_one("(+ 1 2 3)");
        assert_eq!(eval_macro(&form, &env, &registry, &table).unwrap(), Form::int(6));
    }

    #[test]
    fn let_binds_sequentially() {
        let env = MacroEnv::root();
        let registry = MacroRegistry::new();
        let table = PrimitiveTable::new();
        let form = parse_one("(let [a 1 b (+ a 1)] (+ a b))");
        assert_eq!(eval_macro(&form, &env, &registry, &table).unwrap(), Form::int(3));
    }

    #[test]
    fn if_picks_the_right_branch() {
        let env = MacroEnv::root();
        let registry = MacroRegistry::new();
        let table = PrimitiveTable::new();
        assert_eq!(eval_macro(&parse_one("(if true 1 2)"), &env, &registry, &table).unwrap(), Form::int(1));
        assert_eq!(eval_macro(&parse_one("(if false 1 2)"), &env, &registry, &table).unwrap(), Form::int(2));
        assert_eq!(eval_macro(&parse_one("(if nil 1)"), &env, &registry, &table).unwrap(), Form::nil());
    }

    #[test]
    fn recur_trampolines_without_growing_the_stack() {
        let env = MacroEnv::root();
        let registry = MacroRegistry::new();
        let table = PrimitiveTable::new();
        let closure_form = parse_one("(fn [n acc] (if (= n 0) acc (recur (- n 1) (+ acc 1))))");
        let closure_val = eval_stmt(&closure_form, &env, &registry, &table).unwrap();
        let MacroValue::Closure(closure) = closure_val else {
            panic!("expected a closure");
        };
        let args = vec![MacroValue::Data(Form::int(50_000)), MacroValue::Data(Form::int(0))];
        let result = invoke_closure(&closure, args, &registry, &table).unwrap();
        let Flow::Value(MacroValue::Data(f)) = result else {
            panic!("expected a value");
        };
        assert_eq!(f, Form::int(50_000));
    }

    #[test]
    fn syntax_quote_rewrites_unquote_and_splicing() {
        let env = MacroEnv::root();
        env.define("x", MacroValue::Data(Form::int(42)));
        let registry = MacroRegistry::new();
        let table = PrimitiveTable::new();
        let form = parse_one("`(a ~x b)");
        let result = eval_macro(&form, &env, &registry, &table).unwrap();
        let items = result.as_list_items().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1], Form::int(42));
    }

    #[test]
    fn syntax_quote_auto_gensym_is_stable_within_one_expansion() {
        let env = MacroEnv::root();
        let registry = MacroRegistry::new();
        let table = PrimitiveTable::new();
        let form = parse_one("`(+ tmp# tmp#)");
        let result = eval_macro(&form, &env, &registry, &table).unwrap();
        let items = result.as_list_items().unwrap();
        let a = items[1].as_symbol().unwrap();
        let b = items[2].as_symbol().unwrap();
        assert_eq!(a, b);
        assert!(a.name().starts_with("tmp__"));
    }

    #[test]
    fn defmacro_style_closure_expands_without_evaluating_its_arguments() {
        let env = MacroEnv::root();
        let registry = MacroRegistry::new();
        let table = PrimitiveTable::new();
        let params = parse_one("[test then]");
        let body = vec![parse_one("`(if (not ~test) ~then)")];
        let closure = build_closure(&params, body, &env).unwrap();
        registry.register("unless", closure);

        let call = parse_one("(unless done (reset-counter))");
        let expanded = expand_to_fixed_point(&call, &registry, &table).unwrap();
        assert_eq!(expanded.head_symbol().unwrap().name(), "if");
    }
}
