// ABOUTME: Structural type signatures (spec.md §4.5 "Type signature") — the
// key the type-cache is keyed on, so re-evaluating an unchanged
// protocol/type/record definition reuses its already-loaded artifact.

use crate::analyzer::{Expr, FieldDef, ProtocolMethod, TypeMethod};

fn hint_text(hint: &Option<crate::analyzer::TypeHint>) -> &str {
    hint.as_ref().map(|h| h.name.as_str()).unwrap_or("dynamic")
}

fn field_sig(f: &FieldDef) -> String {
    format!("{}:{}{}", f.name.name(), hint_text(&f.hint), if f.mutable { "!" } else { "" })
}

fn method_sig(m: &TypeMethod) -> String {
    let arity = m.params.iter().filter(|p| p.name.name() != "this").count();
    let hints: Vec<&str> = m.params.iter().filter(|p| p.name.name() != "this").map(|p| hint_text(&p.hint)).collect();
    format!("{}/{arity}({})", m.name, hints.join(","))
}

fn protocol_method_sig(m: &ProtocolMethod) -> String {
    format!("{}/{}", m.name, m.arity)
}

/// Builds the canonical signature string for a type-defining `Expr`
/// (spec.md: "namespace, kind, simple name, field names in order with
/// their hints, list of implemented interfaces, and for each method an
/// arity + hints descriptor"). Returns `None` for any other `Expr`.
pub fn type_signature(ns: &str, expr: &Expr) -> Option<String> {
    match expr {
        Expr::DefProtocol { name, methods } => {
            let method_sigs: Vec<String> = methods.iter().map(protocol_method_sig).collect();
            Some(format!("{ns}/protocol/{}[{}]", name.name(), method_sigs.join(";")))
        }
        Expr::DefType { name, fields, methods, interfaces } => Some(build_signature(ns, "type", name.name(), fields, methods, interfaces)),
        Expr::DefRecord { name, fields, methods, interfaces } => Some(build_signature(ns, "record", name.name(), fields, methods, interfaces)),
        _ => None,
    }
}

fn build_signature(ns: &str, kind: &str, name: &str, fields: &[FieldDef], methods: &[TypeMethod], interfaces: &[String]) -> String {
    let field_sigs: Vec<String> = fields.iter().map(field_sig).collect();
    let method_sigs: Vec<String> = methods.iter().map(method_sig).collect();
    format!(
        "{ns}/{kind}/{name}[{}][{}][{}]",
        field_sigs.join(","),
        interfaces.join(","),
        method_sigs.join(";")
    )
}

/// True for any `Expr` variant `type_signature` recognizes — used by the
/// eval algorithm to branch into the type-cache path (spec.md §4.5 step 3).
pub fn is_type_defining(expr: &Expr) -> bool {
    matches!(expr, Expr::DefProtocol { .. } | Expr::DefType { .. } | Expr::DefRecord { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{self, Ctx};
    use crate::macroexpand::primitives::PrimitiveTable;
    use crate::macroexpand::MacroRegistry;
    use crate::reader;

    fn analyze_one(src: &str) -> Expr {
        let registry = MacroRegistry::new();
        let table = PrimitiveTable::new();
        let forms = reader::read_all(src).unwrap();
        let mut ctx = Ctx::new(&registry, &table, "user");
        analyzer::analyze(&forms[0], &mut ctx, true).unwrap()
    }

    #[test]
    fn identical_defrecord_forms_produce_identical_signatures() {
        let a = analyze_one("(defrecord Point [x y])");
        let b = analyze_one("(defrecord Point [x y])");
        assert_eq!(type_signature("user", &a), type_signature("user", &b));
    }

    #[test]
    fn adding_a_field_changes_the_signature() {
        let a = analyze_one("(defrecord Point [x y])");
        let b = analyze_one("(defrecord Point [x y z])");
        assert_ne!(type_signature("user", &a), type_signature("user", &b));
    }

    #[test]
    fn non_type_expr_has_no_signature() {
        let a = analyze_one("(+ 1 2)");
        assert_eq!(type_signature("user", &a), None);
        assert!(!is_type_defining(&a));
    }
}
