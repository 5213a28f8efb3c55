// ABOUTME: Curated primitive-function table for the compile-time macro
// evaluator (spec.md §4.2) — arithmetic, predicates, and the constructor
// calls syntax-quote expansion rewrites into (`list`, `concat`, `vec`,
// `set`, `hash-map`).

use std::collections::HashMap;

use reed_macros::primitive;

use crate::collections::{PersistentMap, PersistentSet, PersistentVector};
use crate::error::RuntimeError;
use crate::form::{Form, FormData};
use crate::interner;

pub type PrimitiveFn = fn(&[Form]) -> Result<Form, RuntimeError>;

/// Table of primitives reachable by name from inside a macro body, populated
/// once at startup by [`PrimitiveTable::new`]. Curated rather than an
/// exhaustive reproduction of a host-language standard library: enough to
/// support the macro evaluator's own special forms, the constructor calls
/// syntax-quote expansion emits, and the example macros spec.md §8 names
/// (`unless`, `->`, `cond`).
pub struct PrimitiveTable {
    fns: HashMap<String, PrimitiveFn>,
}

impl PrimitiveTable {
    pub fn new() -> Self {
        let mut table = PrimitiveTable { fns: HashMap::new() };
        table.register_all();
        table
    }

    pub fn insert(&mut self, name: &str, f: PrimitiveFn) {
        self.fns.insert(name.to_string(), f);
    }

    pub fn get(&self, name: &str) -> Option<&PrimitiveFn> {
        self.fns.get(name)
    }

    fn register_all(&mut self) {
        register_add(self);
        register_sub(self);
        register_mul(self);
        register_div(self);
        register_num_eq(self);
        register_lt(self);
        register_gt(self);
        register_lte(self);
        register_gte(self);
        register_not(self);
        register_nil_q(self);
        register_symbol_q(self);
        register_keyword_q(self);
        register_list_q(self);
        register_vector_q(self);
        register_list(self);
        register_cons(self);
        register_first(self);
        register_rest(self);
        register_concat(self);
        register_count(self);
        register_vec_ctor(self);
        register_set_ctor(self);
        register_hash_map(self);
        register_gensym(self);
        register_name(self);
        register_identity(self);
        register_str_ctor(self);
    }
}

impl Default for PrimitiveTable {
    fn default() -> Self {
        Self::new()
    }
}

fn truthy(f: &Form) -> bool {
    !matches!(f.data, FormData::Nil | FormData::Boolean(false))
}

enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(f: &Form) -> Result<Num, RuntimeError> {
    match &f.data {
        FormData::Integer(n) => Ok(Num::Int(*n)),
        FormData::Float(n) => Ok(Num::Float(*n)),
        other => Err(RuntimeError::message(format!(
            "expected a number, got {}",
            other_type_name(other)
        ))),
    }
}

fn other_type_name(data: &FormData) -> &'static str {
    Form::new(data.clone()).type_name()
}

fn numeric_fold(args: &[Form], identity: i64, int_op: fn(i64, i64) -> i64, float_op: fn(f64, f64) -> f64) -> Result<Form, RuntimeError> {
    if args.is_empty() {
        return Ok(Form::int(identity));
    }
    let mut acc = as_num(&args[0])?;
    for a in &args[1..] {
        let n = as_num(a)?;
        acc = match (acc, n) {
            (Num::Int(x), Num::Int(y)) => Num::Int(int_op(x, y)),
            (Num::Int(x), Num::Float(y)) => Num::Float(float_op(x as f64, y)),
            (Num::Float(x), Num::Int(y)) => Num::Float(float_op(x, y as f64)),
            (Num::Float(x), Num::Float(y)) => Num::Float(float_op(x, y)),
        };
    }
    Ok(match acc {
        Num::Int(n) => Form::int(n),
        Num::Float(n) => Form::float(n),
    })
}

/// Returns the sum of all arguments; `0` with no arguments.
#[primitive(name = "+", category = "Arithmetic", related(sub, mul))]
pub fn add(args: &[Form]) -> Result<Form, RuntimeError> {
    numeric_fold(args, 0, |a, b| a + b, |a, b| a + b)
}

/// Subtracts each following argument from the first; negates a single argument.
#[primitive(name = "-", category = "Arithmetic", related(add))]
pub fn sub(args: &[Form]) -> Result<Form, RuntimeError> {
    if args.len() == 1 {
        return match as_num(&args[0])? {
            Num::Int(n) => Ok(Form::int(-n)),
            Num::Float(n) => Ok(Form::float(-n)),
        };
    }
    numeric_fold(args, 0, |a, b| a - b, |a, b| a - b)
}

/// Returns the product of all arguments; `1` with no arguments.
#[primitive(name = "*", category = "Arithmetic", related(add, div))]
pub fn mul(args: &[Form]) -> Result<Form, RuntimeError> {
    numeric_fold(args, 1, |a, b| a * b, |a, b| a * b)
}

/// Divides the first argument by each following argument.
#[primitive(name = "/", category = "Arithmetic", related(mul))]
pub fn div(args: &[Form]) -> Result<Form, RuntimeError> {
    if args.len() < 2 {
        return Err(RuntimeError::message("/ requires at least 2 arguments"));
    }
    let mut acc = match as_num(&args[0])? {
        Num::Int(n) => n as f64,
        Num::Float(n) => n,
    };
    for a in &args[1..] {
        let n = match as_num(a)? {
            Num::Int(n) => n as f64,
            Num::Float(n) => n,
        };
        acc /= n;
    }
    Ok(Form::float(acc))
}

/// Structural equality across every argument pair.
#[primitive(name = "=", category = "Comparison")]
pub fn num_eq(args: &[Form]) -> Result<Form, RuntimeError> {
    Ok(Form::bool(args.windows(2).all(|w| w[0] == w[1])))
}

fn numeric_as_f64(f: &Form) -> Result<f64, RuntimeError> {
    match as_num(f)? {
        Num::Int(n) => Ok(n as f64),
        Num::Float(n) => Ok(n),
    }
}

/// True when arguments are in strictly increasing order.
#[primitive(name = "<", category = "Comparison", related(gt))]
pub fn lt(args: &[Form]) -> Result<Form, RuntimeError> {
    for w in args.windows(2) {
        if !(numeric_as_f64(&w[0])? < numeric_as_f64(&w[1])?) {
            return Ok(Form::bool(false));
        }
    }
    Ok(Form::bool(true))
}

/// True when arguments are in strictly decreasing order.
#[primitive(name = ">", category = "Comparison", related(lt))]
pub fn gt(args: &[Form]) -> Result<Form, RuntimeError> {
    for w in args.windows(2) {
        if !(numeric_as_f64(&w[0])? > numeric_as_f64(&w[1])?) {
            return Ok(Form::bool(false));
        }
    }
    Ok(Form::bool(true))
}

/// True when arguments are non-decreasing.
#[primitive(name = "<=", category = "Comparison")]
pub fn lte(args: &[Form]) -> Result<Form, RuntimeError> {
    for w in args.windows(2) {
        if !(numeric_as_f64(&w[0])? <= numeric_as_f64(&w[1])?) {
            return Ok(Form::bool(false));
        }
    }
    Ok(Form::bool(true))
}

/// True when arguments are non-increasing.
#[primitive(name = ">=", category = "Comparison")]
pub fn gte(args: &[Form]) -> Result<Form, RuntimeError> {
    for w in args.windows(2) {
        if !(numeric_as_f64(&w[0])? >= numeric_as_f64(&w[1])?) {
            return Ok(Form::bool(false));
        }
    }
    Ok(Form::bool(true))
}

/// Logical negation using Lisp truthiness (`nil`/`false` are falsy).
#[primitive(name = "not", category = "Logic")]
pub fn not(args: &[Form]) -> Result<Form, RuntimeError> {
    let a = args.first().ok_or_else(|| RuntimeError::message("not requires 1 argument"))?;
    Ok(Form::bool(!truthy(a)))
}

/// True when the argument is `nil`.
#[primitive(name = "nil?", category = "Predicates")]
pub fn nil_q(args: &[Form]) -> Result<Form, RuntimeError> {
    Ok(Form::bool(matches!(args.first().map(|f| &f.data), Some(FormData::Nil))))
}

/// True when the argument is a symbol.
#[primitive(name = "symbol?", category = "Predicates")]
pub fn symbol_q(args: &[Form]) -> Result<Form, RuntimeError> {
    Ok(Form::bool(matches!(args.first().map(|f| &f.data), Some(FormData::Symbol(_)))))
}

/// True when the argument is a keyword.
#[primitive(name = "keyword?", category = "Predicates")]
pub fn keyword_q(args: &[Form]) -> Result<Form, RuntimeError> {
    Ok(Form::bool(matches!(args.first().map(|f| &f.data), Some(FormData::Keyword(_)))))
}

/// True when the argument is a list.
#[primitive(name = "list?", category = "Predicates")]
pub fn list_q(args: &[Form]) -> Result<Form, RuntimeError> {
    Ok(Form::bool(matches!(args.first().map(|f| &f.data), Some(FormData::List(_)))))
}

/// True when the argument is a vector.
#[primitive(name = "vector?", category = "Predicates")]
pub fn vector_q(args: &[Form]) -> Result<Form, RuntimeError> {
    Ok(Form::bool(matches!(args.first().map(|f| &f.data), Some(FormData::Vector(_)))))
}

/// Builds a list from its arguments.
#[primitive(name = "list", category = "Collections", related(cons, concat))]
pub fn list(args: &[Form]) -> Result<Form, RuntimeError> {
    Ok(Form::list(args.to_vec()))
}

/// Prepends an element onto a seqable collection, returning a list.
#[primitive(name = "cons", category = "Collections", related(list))]
pub fn cons(args: &[Form]) -> Result<Form, RuntimeError> {
    if args.len() != 2 {
        return Err(RuntimeError::message("cons requires 2 arguments"));
    }
    let mut items = seq_items(&args[1])?;
    items.insert(0, args[0].clone());
    Ok(Form::list(items))
}

/// Returns the first element of a seqable collection, or `nil` if empty.
#[primitive(name = "first", category = "Collections")]
pub fn first(args: &[Form]) -> Result<Form, RuntimeError> {
    let items = seq_items(args.first().ok_or_else(|| RuntimeError::message("first requires 1 argument"))?)?;
    Ok(items.into_iter().next().unwrap_or_else(Form::nil))
}

/// Returns every element but the first, as a list; `()` for an empty collection.
#[primitive(name = "rest", category = "Collections")]
pub fn rest(args: &[Form]) -> Result<Form, RuntimeError> {
    let items = seq_items(args.first().ok_or_else(|| RuntimeError::message("rest requires 1 argument"))?)?;
    Ok(Form::list(items.into_iter().skip(1).collect()))
}

/// Concatenates any number of seqable collections into a single list.
#[primitive(name = "concat", category = "Collections", related(list))]
pub fn concat(args: &[Form]) -> Result<Form, RuntimeError> {
    let mut out = Vec::new();
    for a in args {
        out.extend(seq_items(a)?);
    }
    Ok(Form::list(out))
}

/// Returns the number of elements in a seqable collection.
#[primitive(name = "count", category = "Collections")]
pub fn count(args: &[Form]) -> Result<Form, RuntimeError> {
    let items = seq_items(args.first().ok_or_else(|| RuntimeError::message("count requires 1 argument"))?)?;
    Ok(Form::int(items.len() as i64))
}

/// Builds a vector from a single seqable collection argument.
#[primitive(name = "vec", category = "Collections")]
pub fn vec_ctor(args: &[Form]) -> Result<Form, RuntimeError> {
    let items = seq_items(args.first().ok_or_else(|| RuntimeError::message("vec requires 1 argument"))?)?;
    Ok(Form::new(FormData::Vector(PersistentVector::from_iter(items))))
}

/// Builds a set from a single seqable collection argument; later duplicates win.
#[primitive(name = "set", category = "Collections")]
pub fn set_ctor(args: &[Form]) -> Result<Form, RuntimeError> {
    let items = seq_items(args.first().ok_or_else(|| RuntimeError::message("set requires 1 argument"))?)?;
    let mut set = PersistentSet::new();
    for item in items {
        set = set.conj(item);
    }
    Ok(Form::new(FormData::Set(set)))
}

/// Builds a map from a flat sequence of key/value arguments.
#[primitive(name = "hash-map", category = "Collections")]
pub fn hash_map(args: &[Form]) -> Result<Form, RuntimeError> {
    if args.len() % 2 != 0 {
        return Err(RuntimeError::message("hash-map requires an even number of arguments"));
    }
    let pairs: Vec<(Form, Form)> = args.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();
    let map = PersistentMap::from_pairs(pairs)?;
    Ok(Form::new(FormData::Map(map)))
}

/// Mints a symbol guaranteed distinct from any other in the process, used
/// by macros needing hygiene beyond auto-gensym's `#` suffix sugar.
#[primitive(name = "gensym", category = "Macros")]
pub fn gensym(args: &[Form]) -> Result<Form, RuntimeError> {
    let prefix = match args.first() {
        Some(Form { data: FormData::Str(s), .. }) => s.clone(),
        Some(Form { data: FormData::Symbol(s), .. }) => s.name().to_string(),
        None => "G".to_string(),
        _ => return Err(RuntimeError::message("gensym expects a string or symbol prefix")),
    };
    Ok(Form::symbol(interner::gensym(&prefix)))
}

/// Returns the unqualified name of a symbol or keyword as a string.
#[primitive(name = "name", category = "Macros")]
pub fn name(args: &[Form]) -> Result<Form, RuntimeError> {
    match args.first().map(|f| &f.data) {
        Some(FormData::Symbol(s)) => Ok(Form::string(s.name())),
        Some(FormData::Keyword(k)) => Ok(Form::string(k.name())),
        Some(FormData::Str(s)) => Ok(Form::string(s.clone())),
        _ => Err(RuntimeError::message("name expects a symbol, keyword, or string")),
    }
}

/// Returns its single argument unchanged.
#[primitive(name = "identity", category = "Other")]
pub fn identity(args: &[Form]) -> Result<Form, RuntimeError> {
    args.first().cloned().ok_or_else(|| RuntimeError::message("identity requires 1 argument"))
}

/// Concatenates the string representation of every argument.
#[primitive(name = "str", category = "Other")]
pub fn str_ctor(args: &[Form]) -> Result<Form, RuntimeError> {
    let mut out = String::new();
    for a in args {
        match &a.data {
            FormData::Str(s) => out.push_str(s),
            FormData::Nil => {}
            FormData::Symbol(s) => out.push_str(&s.to_string()),
            FormData::Keyword(k) => out.push_str(&k.to_string()),
            FormData::Integer(n) => out.push_str(&n.to_string()),
            FormData::Float(n) => out.push_str(&n.to_string()),
            FormData::Boolean(b) => out.push_str(&b.to_string()),
            FormData::Character(c) => out.push(*c),
            other => out.push_str(Form::new(other.clone()).type_name()),
        }
    }
    Ok(Form::string(out))
}

/// Extracts the elements of any seqable [`Form`] (list, vector, or set) as an
/// owned `Vec`. Maps are not seqable here since flattening their entries is
/// handled explicitly by syntax-quote's map-literal rule.
fn seq_items(f: &Form) -> Result<Vec<Form>, RuntimeError> {
    match &f.data {
        FormData::List(l) => Ok(l.to_vec()),
        FormData::Vector(v) => Ok(v.to_vec()),
        FormData::Set(s) => Ok(s.items()),
        FormData::Nil => Ok(Vec::new()),
        other => Err(RuntimeError::message(format!("cannot treat {} as a sequence", Form::new(other.clone()).type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sums_all_args() {
        assert_eq!(add(&[Form::int(1), Form::int(2), Form::int(3)]).unwrap(), Form::int(6));
    }

    #[test]
    fn add_promotes_to_float_on_mixed_args() {
        let result = add(&[Form::int(1), Form::float(2.5)]).unwrap();
        assert_eq!(result, Form::float(3.5));
    }

    #[test]
    fn sub_negates_single_arg() {
        assert_eq!(sub(&[Form::int(5)]).unwrap(), Form::int(-5));
    }

    #[test]
    fn lt_checks_strict_order() {
        assert_eq!(lt(&[Form::int(1), Form::int(2), Form::int(3)]).unwrap(), Form::bool(true));
        assert_eq!(lt(&[Form::int(1), Form::int(1)]).unwrap(), Form::bool(false));
    }

    #[test]
    fn cons_prepends_onto_a_list() {
        let list_form = list(&[Form::int(2), Form::int(3)]).unwrap();
        let result = cons(&[Form::int(1), list_form]).unwrap();
        assert_eq!(result.as_list_items().unwrap(), vec![Form::int(1), Form::int(2), Form::int(3)]);
    }

    #[test]
    fn concat_flattens_multiple_collections() {
        let a = list(&[Form::int(1)]).unwrap();
        let b = list(&[Form::int(2), Form::int(3)]).unwrap();
        let result = concat(&[a, b]).unwrap();
        assert_eq!(result.as_list_items().unwrap(), vec![Form::int(1), Form::int(2), Form::int(3)]);
    }

    #[test]
    fn hash_map_builds_from_flat_pairs() {
        let k = Form::keyword(interner::intern_keyword(None, "a"));
        let result = hash_map(&[k, Form::int(1)]).unwrap();
        assert!(matches!(result.data, FormData::Map(_)));
    }

    #[test]
    fn gensym_is_unique_each_call() {
        let a = gensym(&[]).unwrap();
        let b = gensym(&[]).unwrap();
        assert_ne!(a, b);
    }
}
