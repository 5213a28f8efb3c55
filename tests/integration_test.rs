// ABOUTME: Comprehensive integration tests verifying the reader, analyzer,
// emitter, and driver work together end to end against a mock host compiler.

use reed::analyzer::{self, Ctx};
use reed::driver::host::MockHostCompiler;
use reed::driver::Session;
use reed::macroexpand::primitives::PrimitiveTable;
use reed::macroexpand::MacroRegistry;
use reed::reader;
use std::rc::Rc;

fn session() -> Session {
    Session::new(Rc::new(MockHostCompiler::new()), "user")
}

/// Runs `text` through reader → analyzer directly, bypassing the driver,
/// for tests that only care about what the emitter would see.
fn analyze_one(text: &str) -> analyzer::Expr {
    let form = reader::read_all(text).unwrap().remove(0);
    let macros = MacroRegistry::new();
    let primitives = PrimitiveTable::new();
    let mut ctx = Ctx::new(&macros, &primitives, "user".to_string());
    analyzer::analyze(&form, &mut ctx, true).unwrap()
}

#[test]
fn def_and_star1_round_trip_through_a_mock_host() {
    let s = session();
    s.eval("(def a 1)").unwrap();
    let out = s.eval("*1").unwrap();
    assert_eq!(out.values, vec!["nil".to_string()]);
}

#[test]
fn in_ns_switches_namespace_without_touching_the_host() {
    let s = session();
    s.eval("(in-ns 'my-app.core)").unwrap();
    assert_eq!(s.current_namespace(), "my-app.core");
    assert_eq!(s.namespaces().names(), vec!["my-app.core".to_string()]);
}

#[test]
fn defrecord_can_be_redefined_with_the_same_shape() {
    let s = session();
    s.eval("(defrecord Point [x y])").unwrap();
    assert!(s.eval("(defrecord Point [x y])").is_ok());
}

#[test]
fn unqualified_constructor_for_another_namespaces_type_is_rejected() {
    let s = session();
    s.eval("(ns my-app.core) (defrecord Point [x y])").unwrap();
    s.eval("(ns my-app.client)").unwrap();
    let err = s.eval("(Point. 1 2)").unwrap_err();
    let frame = err.to_wire_frame();
    assert!(frame.message.contains("my-app.core"));
}

#[test]
fn aliased_constructor_for_another_namespaces_type_succeeds() {
    let s = session();
    s.eval("(ns my-app.core) (defrecord Point [x y])").unwrap();
    s.eval("(ns my-app.client) (require '[my-app.core :as core])").unwrap();
    assert!(s.eval("(core/Point. 1 2)").is_ok());
}

#[test]
fn null_map_key_is_a_reader_error_not_a_panic() {
    let result = reader::read_all("{nil 1}");
    assert!(result.is_err());
}

#[test]
fn analyzer_resolves_namespace_qualified_constructor_through_an_alias() {
    let expr = analyze_one("(require '[my-app.core :as a]) (a/Point. 1 2)");
    match expr {
        analyzer::Expr::New { type_name, ns, .. } => {
            assert_eq!(type_name, "Point");
            assert_eq!(ns.as_deref(), Some("my-app.core"));
        }
        other => panic!("expected Expr::New, got {other:?}"),
    }
}
