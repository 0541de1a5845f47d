//! Module imports: exports, aliasing, caching, and cycle detection.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use welle::ast::InfixOp;
use welle::{MapLoader, RunFailure, Runner, Value};

fn lib_module() -> welle::ast::Program {
    welle::ast::Program::new(
        "lib",
        vec![
            assign("a", infix(int(40), InfixOp::Add, int(2))),
            func_stmt("twice", &["x"], vec![ret(infix(ident("x"), InfixOp::Mul, int(2)))]),
            export_stmt("a"),
            export_stmt("twice"),
        ],
    )
}

#[test]
fn import_binds_the_exports_dict() {
    let mut loader = MapLoader::new();
    loader.insert("lib", lib_module());
    let (value, _) = run_with_loader(
        vec![
            import_stmt("lib", None),
            expr_stmt(member(ident("lib"), "a")),
        ],
        &mut loader,
    );
    assert_eq!(value, Value::Int(42));
}

#[test]
fn import_alias_and_basename_binding() {
    let mut loader = MapLoader::new();
    loader.insert("pkg/util.we", lib_module());
    let (value, _) = run_with_loader(
        vec![
            import_stmt("pkg/util.we", None),
            expr_stmt(member(ident("util"), "a")),
        ],
        &mut loader,
    );
    assert_eq!(value, Value::Int(42));

    let mut loader = MapLoader::new();
    loader.insert("pkg/util.we", lib_module());
    let (value, _) = run_with_loader(
        vec![
            import_stmt("pkg/util.we", Some("u")),
            expr_stmt(member(ident("u"), "a")),
        ],
        &mut loader,
    );
    assert_eq!(value, Value::Int(42));
}

#[test]
fn from_import_binds_selected_names() {
    let mut loader = MapLoader::new();
    loader.insert("lib", lib_module());
    let (value, _) = run_with_loader(
        vec![
            from_import("lib", &[("a", None), ("twice", Some("double"))]),
            expr_stmt(call_name("double", vec![ident("a")])),
        ],
        &mut loader,
    );
    assert_eq!(value, Value::Int(84));
}

#[test]
fn missing_export_raises() {
    let mut loader = MapLoader::new();
    loader.insert("lib", lib_module());
    let mut out = welle::CollectStringPrint::new();
    let failure = Runner::new()
        .loader(&mut loader)
        .run(
            &program(vec![from_import("lib", &[("nope", None)])]),
            &mut out,
        )
        .expect_err("import should fail");
    let RunFailure::Uncaught(err) = failure else {
        panic!("expected runtime failure");
    };
    assert_eq!(err.message, "module \"lib\" has no export \"nope\"");
}

#[test]
fn modules_execute_once_and_cache_their_exports() {
    let mut loader = MapLoader::new();
    loader.insert(
        "noisy",
        welle::ast::Program::new(
            "noisy",
            vec![
                expr_stmt(call_name("print", vec![string("loaded")])),
                assign("x", int(1)),
                export_stmt("x"),
            ],
        ),
    );
    let (_, out) = run_with_loader(
        vec![
            import_stmt("noisy", Some("first")),
            import_stmt("noisy", Some("second")),
            expr_stmt(member(ident("second"), "x")),
        ],
        &mut loader,
    );
    assert_eq!(out, "loaded\n", "the module body must run exactly once");
}

#[test]
fn import_cycle_raises_wm0001_with_the_ordered_chain() {
    let mut loader = MapLoader::new();
    loader.insert(
        "a",
        welle::ast::Program::new("a", vec![import_stmt("b", None)]),
    );
    loader.insert(
        "b",
        welle::ast::Program::new("b", vec![import_stmt("a", None)]),
    );
    let mut out = welle::CollectStringPrint::new();
    let failure = Runner::new()
        .loader(&mut loader)
        .run(&program(vec![import_stmt("a", None)]), &mut out)
        .expect_err("cycle should fail");
    let RunFailure::Uncaught(err) = failure else {
        panic!("expected runtime failure");
    };
    assert_eq!(err.message, "WM0001 import cycle: a -> b -> a");
}

#[test]
fn self_import_is_the_smallest_cycle() {
    let mut loader = MapLoader::new();
    loader.insert(
        "selfish",
        welle::ast::Program::new("selfish", vec![import_stmt("selfish", None)]),
    );
    let mut out = welle::CollectStringPrint::new();
    let failure = Runner::new()
        .loader(&mut loader)
        .run(&program(vec![import_stmt("selfish", None)]), &mut out)
        .expect_err("cycle should fail");
    let RunFailure::Uncaught(err) = failure else {
        panic!("expected runtime failure");
    };
    assert_eq!(err.message, "WM0001 import cycle: selfish -> selfish");
}

#[test]
fn module_globals_are_isolated_from_the_importer() {
    let mut loader = MapLoader::new();
    loader.insert(
        "lib",
        welle::ast::Program::new(
            "lib",
            vec![assign("x", int(100)), export_stmt("x")],
        ),
    );
    let (value, _) = run_with_loader(
        vec![
            assign("x", int(1)),
            import_stmt("lib", None),
            expr_stmt(ident("x")),
        ],
        &mut loader,
    );
    assert_eq!(value, Value::Int(1), "the module's x must not leak");
}

#[test]
fn exported_functions_stay_callable_across_units() {
    // The exported closure carries its own constant pool.
    let mut loader = MapLoader::new();
    loader.insert(
        "greeter",
        welle::ast::Program::new(
            "greeter",
            vec![
                func_stmt(
                    "greet",
                    &["who"],
                    vec![ret(infix(string("hi "), InfixOp::Add, ident("who")))],
                ),
                export_stmt("greet"),
            ],
        ),
    );
    let (value, _) = run_with_loader(
        vec![
            from_import("greeter", &[("greet", None)]),
            expr_stmt(call_name("greet", vec![string("you")])),
        ],
        &mut loader,
    );
    assert_eq!(value, Value::str("hi you"));
}

#[test]
fn import_errors_propagate_as_catchable_errors() {
    let mut loader = MapLoader::new();
    let (value, _) = run_with_loader(
        vec![
            assign("msg", string("")),
            try_stmt(
                vec![import_stmt("ghost", None)],
                Some(("e", vec![assign("msg", member(ident("e"), "message"))])),
                None,
            ),
            expr_stmt(ident("msg")),
        ],
        &mut loader,
    );
    assert_eq!(value, Value::str("cannot import \"ghost\": module not found"));
}
