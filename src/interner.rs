// ABOUTME: Process-wide access point to the symbol/keyword interner singleton (spec.md §9).

use std::sync::OnceLock;

use crate::symbol::{Interner, Keyword, Symbol};

static INTERNER: OnceLock<Interner> = OnceLock::new();

fn global() -> &'static Interner {
    INTERNER.get_or_init(Interner::new)
}

pub fn intern_symbol(ns: Option<&str>, name: &str) -> Symbol {
    global().intern_symbol(ns, name)
}

pub fn intern_keyword(ns: Option<&str>, name: &str) -> Keyword {
    global().intern_keyword(ns, name)
}

pub fn gensym(prefix: &str) -> Symbol {
    global().gensym(prefix)
}
