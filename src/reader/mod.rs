//! Reader (spec.md §4.1): lifts source text into [`Form`]s with metadata,
//! desugaring reader macros (`'`, `` ` ``, `~`, `~@`, `@`, `#'`, `#(...)`) along the way.
//! Re-entrant and holds no global state beyond the symbol/keyword interner and
//! a thread-local doc-comment buffer, mirroring the teacher's `PENDING_DOCS`.

use std::cell::RefCell;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace1, one_of},
    combinator::{opt, recognize, value},
    multi::many0,
    IResult, Parser,
};

use crate::error::{Location, ReaderError, ReaderErrorKind};
use crate::form::{Form, FormData, Meta};
use crate::interner;

thread_local! {
    static PENDING_DOCS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static LAST_SPECIFIC_ERROR: RefCell<Option<(ReaderErrorKind, String)>> = const { RefCell::new(None) };
}

pub fn take_pending_docs() -> Vec<String> {
    PENDING_DOCS.with(|d| std::mem::take(&mut *d.borrow_mut()))
}

fn note_specific_error(kind: ReaderErrorKind, reason: impl Into<String>) {
    LAST_SPECIFIC_ERROR.with(|e| *e.borrow_mut() = Some((kind, reason.into())));
}

fn take_specific_error() -> Option<(ReaderErrorKind, String)> {
    LAST_SPECIFIC_ERROR.with(|e| e.borrow_mut().take())
}

/// Read every top-level form out of `input`. Stops at the first syntactic
/// error (spec.md §4.1): the caller may retry from the error's offset for
/// the next form since the reader holds no state across a failed form.
pub fn read_all(input: &str) -> Result<Vec<Form>, ReaderError> {
    let mut forms = Vec::new();
    let mut rest = input;
    loop {
        let (after_ws, docs) = ws_and_collect_docs(rest).map_err(|_| unterminated(rest))?;
        if !docs.is_empty() {
            PENDING_DOCS.with(|d| d.borrow_mut().extend(docs));
        }
        if after_ws.trim().is_empty() {
            break;
        }
        rest = after_ws;
        match parse_form(rest) {
            Ok((next, form)) => {
                forms.push(form);
                rest = next;
            }
            Err(_) => return Err(unterminated(rest)),
        }
    }
    Ok(forms)
}

pub fn read_one(input: &str) -> Result<(Form, &str), ReaderError> {
    let (rest, _) = ws_and_comments(input).map_err(|_| unterminated(input))?;
    parse_form(rest).map(|(r, f)| (f, r)).map_err(|_| unterminated(rest))
}

fn unterminated(remaining: &str) -> ReaderError {
    let location = locate(remaining);
    match take_specific_error() {
        Some((kind, reason)) => ReaderError::new(kind, location, reason),
        None => ReaderError::new(
            ReaderErrorKind::UnbalancedBrackets,
            location,
            "unexpected end of input or malformed form",
        ),
    }
}

fn locate(_remaining: &str) -> Location {
    // The reader doesn't track absolute offsets into the original buffer
    // (forms are re-parsed from `rest` slices); callers needing precise
    // positions should track offsets themselves before calling `read_one`.
    Location::new(1, 1)
}

fn ws_and_comments(input: &str) -> IResult<&str, ()> {
    many0(alt((
        value((), multispace1),
        value((), char(',')),
        parse_line_comment,
    )))
    .map(|_| ())
    .parse(input)
}

fn parse_line_comment(input: &str) -> IResult<&str, ()> {
    let (input, _) = char(';')(input)?;
    let (input, _) = take_while(|c| c != '\n')(input)?;
    Ok((input, ()))
}

fn parse_doc_comment(input: &str) -> IResult<&str, String> {
    let (input, _) = tag(";;;")(input)?;
    let (input, text) = take_while(|c| c != '\n')(input)?;
    Ok((input, text.trim().to_string()))
}

fn ws_and_collect_docs(input: &str) -> IResult<&str, Vec<String>> {
    let mut docs = Vec::new();
    let mut input = input;
    loop {
        let start = input;
        if let Ok((rest, doc)) = parse_doc_comment(input) {
            docs.push(doc);
            input = rest;
            continue;
        }
        if let Ok((rest, _)) = ws_and_comments(input) {
            input = rest;
        }
        if start == input {
            break;
        }
    }
    Ok((input, docs))
}

fn parse_form(input: &str) -> IResult<&str, Form> {
    let (input, _) = ws_and_comments(input)?;
    let (input, metas) = many0(parse_meta_prefix).parse(input)?;
    let (input, _) = ws_and_comments(input)?;
    let (input, base) = parse_form_core(input)?;
    if metas.is_empty() {
        return Ok((input, base));
    }
    let mut merged = Meta::new();
    for m in metas {
        m.for_each(|k, v| merged = merged.assoc(k.clone(), v.clone()));
    }
    Ok((input, Form::with_meta(base.data, merged)))
}

fn parse_meta_prefix(input: &str) -> IResult<&str, Meta> {
    let (input, _) = char('^')(input)?;
    let (input, _) = ws_and_comments(input)?;
    alt((
        meta_from_map,
        meta_from_keyword,
        meta_from_tag,
    ))
    .parse(input)
}

fn meta_from_map(input: &str) -> IResult<&str, Meta> {
    let (input, form) = parse_map(input)?;
    match form.data {
        FormData::Map(m) => Ok((input, m)),
        _ => unreachable!(),
    }
}

fn meta_from_keyword(input: &str) -> IResult<&str, Meta> {
    let (input, form) = parse_keyword(input)?;
    match form.data {
        FormData::Keyword(kw) => Ok((input, Meta::new().assoc(Form::keyword(kw), Form::bool(true)))),
        _ => unreachable!(),
    }
}

fn meta_from_tag(input: &str) -> IResult<&str, Meta> {
    let (input, form) = alt((parse_symbol, parse_string)).parse(input)?;
    let tag_kw = interner::intern_keyword(None, "tag");
    Ok((input, Meta::new().assoc(Form::keyword(tag_kw), form)))
}

fn parse_form_core(input: &str) -> IResult<&str, Form> {
    alt((
        parse_reader_macro,
        parse_anon_fn,
        parse_number,
        parse_string,
        parse_char_literal,
        parse_list,
        parse_vector,
        parse_set,
        parse_map,
        parse_keyword,
        parse_piped_symbol,
        parse_reserved_or_symbol,
    ))
    .parse(input)
}

fn parse_reader_macro(input: &str) -> IResult<&str, Form> {
    alt((
        parse_quote,
        parse_syntax_quote,
        parse_unquote_splicing,
        parse_unquote,
        parse_deref,
        parse_var_quote,
    ))
    .parse(input)
}

fn wrap(head: &str, inner: Form) -> Form {
    Form::list(vec![Form::symbol(interner::intern_symbol(None, head)), inner])
}

fn parse_quote(input: &str) -> IResult<&str, Form> {
    let (input, _) = char('\'')(input)?;
    let (input, inner) = parse_form(input)?;
    Ok((input, wrap("quote", inner)))
}

fn parse_syntax_quote(input: &str) -> IResult<&str, Form> {
    let (input, _) = char('`')(input)?;
    let (input, inner) = parse_form(input)?;
    Ok((input, wrap("syntax-quote", inner)))
}

fn parse_unquote_splicing(input: &str) -> IResult<&str, Form> {
    let (input, _) = tag("~@")(input)?;
    let (input, inner) = parse_form(input)?;
    Ok((input, wrap("unquote-splicing", inner)))
}

fn parse_unquote(input: &str) -> IResult<&str, Form> {
    let (input, _) = char('~')(input)?;
    let (input, inner) = parse_form(input)?;
    Ok((input, wrap("unquote", inner)))
}

fn parse_deref(input: &str) -> IResult<&str, Form> {
    let (input, _) = char('@')(input)?;
    let (input, inner) = parse_form(input)?;
    Ok((input, wrap("deref", inner)))
}

fn parse_var_quote(input: &str) -> IResult<&str, Form> {
    let (input, _) = tag("#'")(input)?;
    let (input, inner) = parse_form(input)?;
    Ok((input, wrap("var", inner)))
}

fn parse_anon_fn(input: &str) -> IResult<&str, Form> {
    let (input, _) = tag("#(")(input)?;
    let (input, items) = many0(parse_form).parse(input)?;
    let (input, _) = ws_and_comments(input)?;
    let (input, _) = char(')')(input)?;
    let body = Form::list(items);
    let (max_n, has_rest) = percent_params(&body);
    let mut params = Vec::new();
    for i in 1..=max_n {
        params.push(Form::symbol(interner::intern_symbol(None, &format!("%{i}"))));
    }
    if has_rest {
        params.push(Form::symbol(interner::intern_symbol(None, "&")));
        params.push(Form::symbol(interner::intern_symbol(None, "%&")));
    }
    let fn_sym = Form::symbol(interner::intern_symbol(None, "fn*"));
    Ok((input, Form::list(vec![fn_sym, Form::vector(params), body])))
}

fn percent_params(form: &Form) -> (usize, bool) {
    let mut max_n = 0usize;
    let mut has_rest = false;
    walk_percent(form, &mut max_n, &mut has_rest);
    (max_n, has_rest)
}

fn walk_percent(form: &Form, max_n: &mut usize, has_rest: &mut bool) {
    match &form.data {
        FormData::Symbol(s) if s.ns().is_none() => {
            let name = s.name();
            if name == "%" {
                *max_n = (*max_n).max(1);
            } else if name == "%&" {
                *has_rest = true;
            } else if let Some(n) = name.strip_prefix('%').and_then(|n| n.parse::<usize>().ok()) {
                *max_n = (*max_n).max(n);
            }
        }
        FormData::List(l) => l
            .to_vec()
            .iter()
            .for_each(|f| walk_percent(f, &mut *max_n, &mut *has_rest)),
        FormData::Vector(v) => v
            .iter()
            .for_each(|f| walk_percent(&f, &mut *max_n, &mut *has_rest)),
        _ => {}
    }
}

fn parse_number(input: &str) -> IResult<&str, Form> {
    let (rest, text) = recognize((
        opt(alt((char('-'), char('+')))),
        alt((
            recognize((digit1, opt((char('.'), digit1)), opt(parse_exponent))),
            recognize((char('.'), digit1)),
        )),
    ))
    .parse(input)?;
    // Reject a bare sign/number collision with a following symbol char by
    // requiring the number not be immediately followed by a symbol char.
    if text.contains('.') || text.to_lowercase().contains('e') {
        let n: f64 = text.parse().map_err(|_| nom_fail(input))?;
        Ok((rest, Form::float(n)))
    } else {
        let n: i64 = text.parse().map_err(|_| nom_fail(input))?;
        Ok((rest, Form::int(n)))
    }
}

fn parse_exponent(input: &str) -> IResult<&str, &str> {
    recognize((one_of("eE"), opt(one_of("+-")), digit1)).parse(input)
}

fn nom_fail(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
}

fn parse_string(input: &str) -> IResult<&str, Form> {
    let (input, _) = char('"')(input)?;
    let mut result = String::new();
    let mut rest = input;
    loop {
        if let Ok((after, _)) = char::<_, nom::error::Error<_>>('"')(rest) {
            return Ok((after, Form::string(result)));
        }
        if rest.is_empty() {
            note_specific_error(ReaderErrorKind::UnterminatedString, "unterminated string literal");
            return Err(nom_fail(rest));
        }
        let (after, c) = take_single_char(rest)?;
        if c == '\\' {
            let (after2, esc) = one_of("nrt\\\"")(after)?;
            result.push(match esc {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
            rest = after2;
        } else {
            result.push(c);
            rest = after;
        }
    }
}

fn parse_char_literal(input: &str) -> IResult<&str, Form> {
    let (input, _) = char('\\')(input)?;
    alt((
        value('\n', tag("newline")),
        value(' ', tag("space")),
        value('\t', tag("tab")),
        value('\u{8}', tag("backspace")),
        value('\r', tag("return")),
        take_single_char,
    ))
    .map(|c| Form::new(FormData::Character(c)))
    .parse(input)
}

fn take_single_char(input: &str) -> IResult<&str, char> {
    let mut chars = input.char_indices();
    match chars.next() {
        Some((_, c)) => {
            let next_idx = chars.next().map(|(i, _)| i).unwrap_or(input.len());
            Ok((&input[next_idx..], c))
        }
        None => Err(nom_fail(input)),
    }
}

const SYMBOL_START: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ+-*/%<>=!?_.$&";
const SYMBOL_CONT_EXTRA: &str = "+-*/%<>=!?_.$&:#'";

fn is_symbol_cont(c: char) -> bool {
    c.is_alphanumeric() || SYMBOL_CONT_EXTRA.contains(c)
}

fn parse_reserved_or_symbol(input: &str) -> IResult<&str, Form> {
    alt((
        value(Form::bool(true), tag("true")),
        value(Form::bool(false), tag("false")),
        value(Form::nil(), tag("nil")),
        parse_symbol,
    ))
    .parse(input)
}

fn parse_symbol(input: &str) -> IResult<&str, Form> {
    let (input, first) = one_of(SYMBOL_START)(input)?;
    let (input, rest) = take_while(is_symbol_cont)(input)?;
    let mut text = String::new();
    text.push(first);
    text.push_str(rest);
    Ok((input, symbol_form(&text)))
}

fn symbol_form(text: &str) -> Form {
    match text.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
            Form::symbol(interner::intern_symbol(Some(ns), name))
        }
        _ => Form::symbol(interner::intern_symbol(None, text)),
    }
}

fn parse_piped_symbol(input: &str) -> IResult<&str, Form> {
    let (input, _) = char('|')(input)?;
    let mut result = String::new();
    let mut rest = input;
    loop {
        if rest.is_empty() {
            note_specific_error(ReaderErrorKind::UnterminatedPipeEscape, "unterminated |...| escape");
            return Err(nom_fail(rest));
        }
        if let Ok((after, _)) = char::<_, nom::error::Error<_>>('|')(rest) {
            if let Ok((after2, _)) = char::<_, nom::error::Error<_>>('|')(after) {
                result.push('|');
                rest = after2;
                continue;
            }
            if result.is_empty() {
                return Err(nom_fail(rest));
            }
            return Ok((after, Form::symbol(interner::intern_symbol(None, &result))));
        }
        let (after, c) = take_single_char(rest)?;
        result.push(c);
        rest = after;
    }
}

fn parse_keyword(input: &str) -> IResult<&str, Form> {
    let (input, _) = char(':')(input)?;
    let (input, first) = one_of(SYMBOL_START)(input)?;
    let (input, rest) = take_while(is_symbol_cont)(input)?;
    let mut text = String::new();
    text.push(first);
    text.push_str(rest);
    let kw = match text.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => interner::intern_keyword(Some(ns), name),
        _ => interner::intern_keyword(None, &text),
    };
    Ok((input, Form::keyword(kw)))
}

fn parse_list(input: &str) -> IResult<&str, Form> {
    let (input, _) = char('(')(input)?;
    let (input, items) = many0(parse_form).parse(input)?;
    let (input, _) = ws_and_comments(input)?;
    let (input, _) = char(')')(input)?;
    Ok((input, Form::list(items)))
}

fn parse_vector(input: &str) -> IResult<&str, Form> {
    let (input, _) = char('[')(input)?;
    let (input, items) = many0(parse_form).parse(input)?;
    let (input, _) = ws_and_comments(input)?;
    let (input, _) = char(']')(input)?;
    Ok((input, Form::vector(items)))
}

fn parse_set(input: &str) -> IResult<&str, Form> {
    let (input, _) = tag("#{")(input)?;
    let (input, items) = many0(parse_form).parse(input)?;
    let (input, _) = ws_and_comments(input)?;
    let (input, _) = char('}')(input)?;
    let set = crate::collections::PersistentSet::from_unique_items(items).map_err(|_dup| {
        note_specific_error(ReaderErrorKind::DuplicateSetElement, "duplicate element in set literal");
        nom_fail(input)
    })?;
    Ok((input, Form::new(FormData::Set(set))))
}

fn parse_map(input: &str) -> IResult<&str, Form> {
    let (input, _) = char('{')(input)?;
    let (input, items) = many0(parse_form).parse(input)?;
    let (input, _) = ws_and_comments(input)?;
    let (input, _) = char('}')(input)?;
    if items.len() % 2 != 0 {
        note_specific_error(ReaderErrorKind::OddMapEntries, "map literal has an odd number of forms");
        return Err(nom_fail(input));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut it = items.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        if k.is_nil() {
            note_specific_error(ReaderErrorKind::NullMapKey, "map literal has a nil key");
            return Err(nom_fail(input));
        }
        pairs.push((k, v));
    }
    let map = crate::collections::PersistentMap::from_pairs(pairs)
        .map_err(|_| nom_fail(input))?;
    Ok((input, Form::new(FormData::Map(map))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(src: &str) -> Form {
        read_all(src).unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn reads_integers_and_floats() {
        assert!(matches!(read("42").data, FormData::Integer(42)));
        assert!(matches!(read("-7").data, FormData::Integer(-7)));
        assert!(matches!(read("3.14").data, FormData::Float(_)));
    }

    #[test]
    fn reads_leading_plus_sign() {
        assert!(matches!(read("+7").data, FormData::Integer(7)));
        assert!(matches!(read("+3.5").data, FormData::Float(_)));
    }

    #[test]
    fn reads_reserved_atoms() {
        assert!(matches!(read("true").data, FormData::Boolean(true)));
        assert!(matches!(read("false").data, FormData::Boolean(false)));
        assert!(matches!(read("nil").data, FormData::Nil));
    }

    #[test]
    fn reads_string_with_escapes() {
        let f = read(r#""a\nb""#);
        match f.data {
            FormData::Str(s) => assert_eq!(s, "a\nb"),
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn reads_quote_sugar() {
        let f = read("'x");
        let items = f.as_list_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_symbol().unwrap().name(), "quote");
    }

    #[test]
    fn reads_syntax_quote_unquote_splicing() {
        let f = read("`(a ~b ~@c)");
        let items = f.as_list_items().unwrap();
        assert_eq!(items[0].as_symbol().unwrap().name(), "syntax-quote");
    }

    #[test]
    fn reads_vector_map_set() {
        assert!(matches!(read("[1 2 3]").data, FormData::Vector(_)));
        assert!(matches!(read("{:a 1 :b 2}").data, FormData::Map(_)));
        assert!(matches!(read("#{1 2 3}").data, FormData::Set(_)));
    }

    #[test]
    fn odd_map_entries_is_error() {
        assert!(read_all("{:a 1 :b}").is_err());
    }

    #[test]
    fn duplicate_set_element_is_error() {
        assert!(read_all("#{1 1}").is_err());
    }

    #[test]
    fn nil_map_key_is_rejected() {
        let err = read_all("{nil 1}").unwrap_err();
        assert_eq!(err.kind, ReaderErrorKind::NullMapKey);
    }

    #[test]
    fn pipe_escaped_symbol() {
        let f = read("|foo bar|");
        assert_eq!(f.as_symbol().unwrap().name(), "foo bar");
    }

    #[test]
    fn metadata_keyword_shorthand() {
        let f = read("^:dynamic x");
        let meta = f.meta.expect("metadata attached");
        let kw = interner::intern_keyword(None, "dynamic");
        assert_eq!(meta.get(&Form::keyword(kw)), Some(&Form::bool(true)));
    }

    #[test]
    fn anon_fn_sugar_builds_params() {
        let f = read("#(+ % 1)");
        let items = f.as_list_items().unwrap();
        assert_eq!(items[0].as_symbol().unwrap().name(), "fn*");
    }

    #[test]
    fn symbol_interning_round_trip_is_reference_equal() {
        let a = read("foo");
        let b = read("foo");
        assert_eq!(a.as_symbol().unwrap(), b.as_symbol().unwrap());
    }
}
