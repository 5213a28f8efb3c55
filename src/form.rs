// ABOUTME: Form — the reader's output type and the data substrate the macro
// engine rewrites (spec.md §3). Every form may carry an immutable metadata map.

use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::collections::{PersistentList, PersistentMap, PersistentVector, PersistentSet};
use crate::symbol::{Keyword, Symbol};

pub type Meta = PersistentMap<Form, Form>;

#[derive(Clone)]
pub struct Form {
    pub data: FormData,
    pub meta: Option<Rc<Meta>>,
}

#[derive(Clone)]
pub enum FormData {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Str(String),
    Character(char),
    Nil,
    Symbol(Symbol),
    Keyword(Keyword),
    List(PersistentList<Form>),
    Vector(PersistentVector<Form>),
    Map(PersistentMap<Form, Form>),
    Set(PersistentSet<Form>),
}

impl Form {
    pub fn new(data: FormData) -> Form {
        Form { data, meta: None }
    }

    pub fn with_meta(data: FormData, meta: Meta) -> Form {
        Form {
            data,
            meta: if meta.is_empty() { None } else { Some(Rc::new(meta)) },
        }
    }

    pub fn nil() -> Form {
        Form::new(FormData::Nil)
    }

    pub fn bool(b: bool) -> Form {
        Form::new(FormData::Boolean(b))
    }

    pub fn int(n: i64) -> Form {
        Form::new(FormData::Integer(n))
    }

    pub fn float(n: f64) -> Form {
        Form::new(FormData::Float(n))
    }

    pub fn string(s: impl Into<String>) -> Form {
        Form::new(FormData::Str(s.into()))
    }

    pub fn symbol(sym: Symbol) -> Form {
        Form::new(FormData::Symbol(sym))
    }

    pub fn keyword(kw: Keyword) -> Form {
        Form::new(FormData::Keyword(kw))
    }

    pub fn list(items: Vec<Form>) -> Form {
        Form::new(FormData::List(PersistentList::from_iter(items)))
    }

    pub fn vector(items: Vec<Form>) -> Form {
        Form::new(FormData::Vector(PersistentVector::from_iter(items)))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.data, FormData::Nil)
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match &self.data {
            FormData::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list_items(&self) -> Option<Vec<Form>> {
        match &self.data {
            FormData::List(l) => Some(l.to_vec()),
            _ => None,
        }
    }

    /// The head symbol of a list form, if any — used throughout the analyzer
    /// and macro engine's dispatch-by-head-symbol logic.
    pub fn head_symbol(&self) -> Option<Symbol> {
        match &self.data {
            FormData::List(l) => l.first().and_then(|f| f.as_symbol().cloned()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.data {
            FormData::Integer(_) => "integer",
            FormData::Float(_) => "float",
            FormData::Boolean(_) => "boolean",
            FormData::Str(_) => "string",
            FormData::Character(_) => "character",
            FormData::Nil => "nil",
            FormData::Symbol(_) => "symbol",
            FormData::Keyword(_) => "keyword",
            FormData::List(_) => "list",
            FormData::Vector(_) => "vector",
            FormData::Map(_) => "map",
            FormData::Set(_) => "set",
        }
    }
}

impl PartialEq for Form {
    fn eq(&self, other: &Self) -> bool {
        use FormData::*;
        match (&self.data, &other.data) {
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Boolean(a), Boolean(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Character(a), Character(b)) => a == b,
            (Nil, Nil) => true,
            (Symbol(a), Symbol(b)) => a == b,
            (Keyword(a), Keyword(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Vector(a), Vector(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Set(a), Set(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Form {}

impl Hash for Form {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.data).hash(state);
        match &self.data {
            FormData::Integer(n) => n.hash(state),
            FormData::Float(n) => n.to_bits().hash(state),
            FormData::Boolean(b) => b.hash(state),
            FormData::Str(s) => s.hash(state),
            FormData::Character(c) => c.hash(state),
            FormData::Nil => {}
            FormData::Symbol(s) => s.name().hash(state),
            FormData::Keyword(k) => {
                k.ns().hash(state);
                k.name().hash(state);
            }
            FormData::List(l) => l.count().hash(state),
            FormData::Vector(v) => v.count().hash(state),
            FormData::Map(m) => m.count().hash(state),
            FormData::Set(s) => s.count().hash(state),
        }
    }
}

impl std::fmt::Debug for Form {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_compare_by_value() {
        assert_eq!(Form::int(42), Form::int(42));
        assert_ne!(Form::int(42), Form::int(43));
    }

    #[test]
    fn nil_equals_nil() {
        assert_eq!(Form::nil(), Form::nil());
    }
}
