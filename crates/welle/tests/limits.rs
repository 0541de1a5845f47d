//! Resource budgets are enforced and catchable by user code.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use welle::ast::InfixOp;
use welle::{ResourceLimits, Value};

#[test]
fn memory_limit_yields_a_catchable_error() {
    // With a 10-byte budget, allocating "hello" fails immediately; the
    // catch body reads the message without further allocation.
    let (value, _) = run_limited(
        vec![
            try_stmt(
                vec![assign("s", string("hello"))],
                Some(("e", vec![expr_stmt(member(ident("e"), "message"))])),
                None,
            ),
        ],
        ResourceLimits::new().max_memory(10),
    );
    assert_eq!(value, Value::str("max memory exceeded (10 bytes)"));
}

#[test]
fn memory_error_carries_the_reserved_code() {
    let (value, _) = run_limited(
        vec![
            try_stmt(
                vec![assign("s", string("hello"))],
                Some(("e", vec![expr_stmt(member(ident("e"), "code"))])),
                None,
            ),
        ],
        ResourceLimits::new().max_memory(10),
    );
    assert_eq!(value, Value::Int(welle::MEMORY_ERROR_CODE));
}

#[test]
fn step_limit_yields_a_catchable_error() {
    let (value, _) = run_limited(
        vec![
            assign("msg", string("")),
            try_stmt(
                vec![while_stmt(boolean(true), vec![])],
                Some(("e", vec![assign("msg", member(ident("e"), "message"))])),
                None,
            ),
            expr_stmt(ident("msg")),
        ],
        ResourceLimits::new().max_steps(200),
    );
    assert_eq!(value, Value::str("max instruction count exceeded (200)"));
}

#[test]
fn recursion_limit_yields_a_catchable_error() {
    let f = func_stmt("f", &[], vec![ret(call_name("f", vec![]))]);
    let (value, _) = run_limited(
        vec![
            f,
            assign("msg", string("")),
            try_stmt(
                vec![expr_stmt(call_name("f", vec![]))],
                Some(("e", vec![assign("msg", member(ident("e"), "message"))])),
                None,
            ),
            expr_stmt(ident("msg")),
        ],
        ResourceLimits::new().max_recursion(5),
    );
    let Value::Str(msg) = value else {
        panic!("expected a string message");
    };
    assert!(msg.starts_with("max recursion depth exceeded"));
}

#[test]
fn unlimited_runs_are_unaffected() {
    let (value, _) = run(vec![
        assign("total", int(0)),
        for_in(
            "x",
            call_name("range", vec![int(1000)]),
            vec![assign_op(
                "total",
                welle::ast::AssignOp::Add,
                ident("x"),
            )],
        ),
        expr_stmt(ident("total")),
    ]);
    assert_eq!(value, Value::Int(499_500));
}

#[test]
fn budget_charges_accumulate_across_allocations() {
    // Each loop iteration allocates; a small budget fails partway through
    // rather than on the first allocation.
    let (value, _) = run_limited(
        vec![
            assign("n", int(0)),
            assign("msg", string("")),
            try_stmt(
                vec![while_stmt(
                    boolean(true),
                    vec![
                        expr_stmt(call_name("range", vec![int(10)])),
                        assign_op("n", welle::ast::AssignOp::Add, int(1)),
                    ],
                )],
                Some(("e", vec![assign("msg", member(ident("e"), "message"))])),
                None,
            ),
            expr_stmt(tuple(vec![
                ident("msg"),
                infix(ident("n"), InfixOp::Gt, int(0)),
            ])),
        ],
        ResourceLimits::new().max_memory(2000),
    );
    assert_eq!(
        value,
        Value::Tuple(vec![Value::str("max memory exceeded (2000 bytes)"), Value::Bool(true)].into())
    );
}
