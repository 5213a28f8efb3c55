// ABOUTME: Name mangling (spec.md §4.4) — the deterministic, injective map
// from source identifiers/namespaces to legal C# identifiers.

/// One illegal-character escape, applied char-by-char to a bare identifier.
fn escape_char(c: char) -> Option<&'static str> {
    match c {
        '-' => Some("_"),
        '+' => Some("_PLUS_"),
        '?' => Some("_QUESTION"),
        '!' => Some("_BANG"),
        '>' => Some("_GT_"),
        '<' => Some("_LT_"),
        '*' => Some("_STAR_"),
        '\'' => Some("_PRIME_"),
        '/' => Some("."),
        _ => None,
    }
}

/// Mangle a single bare name (no namespace segment) into a legal C#
/// identifier. Characters outside spec.md's nine-entry escape table but also
/// outside `[A-Za-z0-9_]` (e.g. `=`, `%`, `&`) fall back to a hex escape —
/// spec.md's table covers the symbols its examples actually use, not the
/// full space of legal Lisp-symbol characters.
pub fn mangle_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match escape_char(c) {
            Some(s) => out.push_str(s),
            None if c.is_ascii_alphanumeric() || c == '_' => out.push(c),
            None => out.push_str(&format!("_U{:04X}_", c as u32)),
        }
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Pascal-cases one namespace segment: hyphens mark word boundaries and are
/// dropped, the first letter of each resulting word is capitalized.
fn pascal_case_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for word in segment.split('-') {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            for c in chars {
                match escape_char(c) {
                    Some(s) if s != "." => out.push_str(s),
                    _ => out.push(c),
                }
            }
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Mangle a dotted namespace into its C# namespace path. The last segment
/// doubles as the wrapping class name (spec.md §4.4).
pub fn mangle_namespace_class(ns: &str) -> String {
    ns.split('.').map(pascal_case_segment).collect::<Vec<_>>().join(".")
}

/// The wrapping class name for a namespace — its last mangled segment.
pub fn wrapping_class_name(ns: &str) -> String {
    ns.rsplit('.').next().map(pascal_case_segment).unwrap_or_else(|| "_".to_string())
}

/// Fully-qualified reference to a var: `Mangled.Namespace.Path.name`.
pub fn qualify(ns: &str, name: &str) -> String {
    format!("{}.{}", mangle_namespace_class(ns), mangle_identifier(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphen_becomes_underscore() {
        assert_eq!(mangle_identifier("my-var"), "my_var");
    }

    #[test]
    fn predicate_suffix_is_escaped() {
        assert_eq!(mangle_identifier("empty?"), "empty_QUESTION");
    }

    #[test]
    fn bang_and_arrows_are_escaped() {
        assert_eq!(mangle_identifier("swap!"), "swap_BANG");
        assert_eq!(mangle_identifier("->"), "__GT_");
        assert_eq!(mangle_identifier("<!"), "_LT_BANG");
    }

    #[test]
    fn slash_becomes_dot() {
        assert_eq!(mangle_identifier("a/b"), "a.b");
    }

    #[test]
    fn leading_digit_gets_prefixed() {
        assert_eq!(mangle_identifier("1st"), "_1st");
    }

    #[test]
    fn namespace_segments_are_pascal_cased_and_dotted() {
        assert_eq!(mangle_namespace_class("my-app.core"), "MyApp.Core");
        assert_eq!(wrapping_class_name("my-app.core"), "Core");
    }

    #[test]
    fn qualify_joins_namespace_and_name() {
        assert_eq!(qualify("my-app.core", "frobnicate!"), "MyApp.Core.frobnicate_BANG");
    }
}
