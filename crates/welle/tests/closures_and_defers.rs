//! Closure capture semantics and deferred-call ordering.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use welle::ast::InfixOp;
use welle::Value;

/// `out = out + s` helper used to observe side-effect ordering.
fn mark_fn() -> welle::ast::Stmt {
    func_stmt(
        "mark",
        &["s"],
        vec![
            assign("out", infix(ident("out"), InfixOp::Add, ident("s"))),
            ret_nil(),
        ],
    )
}

#[test]
fn closures_capture_enclosing_locals() {
    // func make(x){ return func(y){ return x+y } } f=make(2); print(f(3))
    let make = func_stmt(
        "make",
        &["x"],
        vec![ret(func_lit(
            &["y"],
            vec![ret(infix(ident("x"), InfixOp::Add, ident("y")))],
        ))],
    );
    let (_, out) = run(vec![
        make,
        assign("f", call_name("make", vec![int(2)])),
        expr_stmt(call_name("print", vec![call_name("f", vec![int(3)])])),
    ]);
    assert_eq!(out, "5\n");
}

#[test]
fn two_closures_share_one_captured_cell() {
    // A closure capturing x observes mutations by another closure capturing x.
    let counter = func_stmt(
        "counter",
        &[],
        vec![
            assign("c", int(0)),
            assign(
                "inc",
                func_lit(
                    &[],
                    vec![
                        assign("c", infix(ident("c"), InfixOp::Add, int(1))),
                        ret(ident("c")),
                    ],
                ),
            ),
            assign("get", func_lit(&[], vec![ret(ident("c"))])),
            ret(tuple(vec![ident("inc"), ident("get")])),
        ],
    );
    let (value, _) = run(vec![
        counter,
        destructure(
            vec![name_target("inc"), name_target("get")],
            call_name("counter", vec![]),
        ),
        expr_stmt(call_name("inc", vec![])),
        expr_stmt(call_name("inc", vec![])),
        expr_stmt(call_name("get", vec![])),
    ]);
    assert_eq!(value, Value::Int(2));
}

#[test]
fn capture_through_an_intermediate_scope() {
    // The middle function never mentions x except by closing over it.
    let outer = func_stmt(
        "outer",
        &["x"],
        vec![ret(func_lit(
            &[],
            vec![ret(func_lit(&[], vec![ret(ident("x"))]))],
        ))],
    );
    let (value, _) = run(vec![
        outer,
        assign("mid", call_name("outer", vec![int(9)])),
        assign("inner", call_name("mid", vec![])),
        expr_stmt(call_name("inner", vec![])),
    ]);
    assert_eq!(value, Value::Int(9));
}

#[test]
fn local_named_function_can_recurse() {
    let outer = func_stmt(
        "outer",
        &[],
        vec![
            func_stmt(
                "fact",
                &["n"],
                vec![
                    if_stmt(
                        infix(ident("n"), InfixOp::Lt, int(2)),
                        vec![ret(int(1))],
                        None,
                    ),
                    ret(infix(
                        ident("n"),
                        InfixOp::Mul,
                        call_name("fact", vec![infix(ident("n"), InfixOp::Sub, int(1))]),
                    )),
                ],
            ),
            ret(call_name("fact", vec![int(5)])),
        ],
    );
    let (value, _) = run(vec![outer, expr_stmt(call_name("outer", vec![]))]);
    assert_eq!(value, Value::Int(120));
}

#[test]
fn defers_run_lifo_before_the_caller_observes_return() {
    let g = func_stmt(
        "g",
        &[],
        vec![
            defer_stmt(call_name("mark", vec![string("a")])),
            defer_stmt(call_name("mark", vec![string("b")])),
            defer_stmt(call_name("mark", vec![string("c")])),
            ret(string("r")),
        ],
    );
    let (value, _) = run(vec![
        assign("out", string("")),
        mark_fn(),
        g,
        assign("r", call_name("g", vec![])),
        expr_stmt(infix(ident("out"), InfixOp::Add, ident("r"))),
    ]);
    // c, b, a run before the return value reaches the caller.
    assert_eq!(value, Value::str("cbar"));
}

#[test]
fn defers_run_when_the_frame_unwinds_on_throw() {
    // out accumulates "d" from the defer, then "c" from the catch.
    let f = func_stmt(
        "f",
        &[],
        vec![
            defer_stmt(call_name("mark", vec![string("d")])),
            throw_stmt(string("boom")),
        ],
    );
    let (_, out) = run(vec![
        assign("out", string("")),
        mark_fn(),
        f,
        try_stmt(
            vec![expr_stmt(call_name("f", vec![]))],
            Some(("e", vec![expr_stmt(call_name("mark", vec![string("c")]))])),
            None,
        ),
        expr_stmt(call_name("print", vec![ident("out")])),
    ]);
    assert_eq!(out, "dc\n");
}

#[test]
fn defer_arguments_are_evaluated_at_registration() {
    let f = func_stmt(
        "f",
        &[],
        vec![
            assign("a", string("1")),
            defer_stmt(call_name("mark", vec![ident("a")])),
            assign("a", string("2")),
            ret_nil(),
        ],
    );
    let (value, _) = run(vec![
        assign("out", string("")),
        mark_fn(),
        f,
        expr_stmt(call_name("f", vec![])),
        expr_stmt(ident("out")),
    ]);
    assert_eq!(value, Value::str("1"));
}

#[test]
fn defers_run_in_every_unwound_frame() {
    // g defers "g", f defers "f"; f calls g; g throws; both defers run,
    // innermost frame first.
    let g = func_stmt(
        "g",
        &[],
        vec![
            defer_stmt(call_name("mark", vec![string("g")])),
            throw_stmt(string("x")),
        ],
    );
    let f = func_stmt(
        "f",
        &[],
        vec![
            defer_stmt(call_name("mark", vec![string("f")])),
            expr_stmt(call_name("g", vec![])),
        ],
    );
    let (value, _) = run(vec![
        assign("out", string("")),
        mark_fn(),
        g,
        f,
        try_stmt(
            vec![expr_stmt(call_name("f", vec![]))],
            Some(("e", vec![])),
            None,
        ),
        expr_stmt(ident("out")),
    ]);
    assert_eq!(value, Value::str("gf"));
}

#[test]
fn throwing_defer_supersedes_the_return_but_later_defers_still_run() {
    let f = func_stmt(
        "f",
        &[],
        vec![
            defer_stmt(call_name("mark", vec![string("early")])),
            defer_stmt(call_name("boom", vec![])),
            ret(string("ignored")),
        ],
    );
    let boom = func_stmt("boom", &[], vec![throw_stmt(string("defer-error"))]);
    let (value, _) = run(vec![
        assign("out", string("")),
        mark_fn(),
        boom,
        f,
        assign("msg", string("")),
        try_stmt(
            vec![expr_stmt(call_name("f", vec![]))],
            Some(("e", vec![assign("msg", member(ident("e"), "message"))])),
            None,
        ),
        expr_stmt(tuple(vec![ident("out"), ident("msg")])),
    ]);
    assert_eq!(
        value,
        Value::Tuple(vec![Value::str("early"), Value::str("defer-error")].into())
    );
}

#[test]
fn spread_defer_expands_at_registration() {
    let f = func_stmt(
        "f",
        &[],
        vec![
            assign("args", list(vec![string("x")])),
            defer_stmt(call(ident("mark"), vec![spread(ident("args"))])),
            ret_nil(),
        ],
    );
    let (value, _) = run(vec![
        assign("out", string("")),
        mark_fn(),
        f,
        expr_stmt(call_name("f", vec![])),
        expr_stmt(ident("out")),
    ]);
    assert_eq!(value, Value::str("x"));
}
