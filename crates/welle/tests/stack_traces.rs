//! Stack-trace formatting: frame lines, anonymous-function naming,
//! deepest-first ordering.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use welle::ast::{Expr, ExprKind, Position, Stmt, StmtKind};
use welle::RunFailure;

#[test]
fn trace_lists_frames_deepest_first() {
    // line 2: func inner() { line 3: throw "boom" }
    // line 5: inner()
    let throw_pos = Position::new(3, 5);
    let inner = Stmt::new(
        StmtKind::Func {
            name: "inner".to_string(),
            params: vec![],
            body: welle::ast::Block(vec![Stmt::new(
                StmtKind::Throw(Expr::new(ExprKind::Str("boom".to_string()), throw_pos)),
                throw_pos,
            )]),
        },
        Position::new(2, 1),
    );
    let call_pos = Position::new(5, 1);
    let call = Stmt::new(
        StmtKind::Expr(Expr::new(
            ExprKind::Call {
                callee: Box::new(Expr::new(ExprKind::Ident("inner".to_string()), call_pos)),
                args: vec![],
            },
            call_pos,
        )),
        call_pos,
    );

    let (failure, _) = run_failure(vec![inner, call]);
    let RunFailure::Uncaught(err) = failure else {
        panic!("expected runtime failure");
    };
    assert_eq!(
        err.report(),
        "error: boom\n\
         stack trace:\n\
         \x20 at inner (test.we:3:5)\n\
         \x20 at <main> (test.we:5:1)"
    );
}

#[test]
fn anonymous_functions_are_named_by_their_defining_position() {
    // g = func at line 2 column 5; the throw sits at line 3.
    let throw_pos = Position::new(3, 3);
    let body = vec![Stmt::new(
        StmtKind::Throw(Expr::new(ExprKind::Str("e".to_string()), throw_pos)),
        throw_pos,
    )];
    let lit = func_lit_at(Position::new(2, 5), &[], body);

    let (failure, _) = run_failure(vec![
        assign("g", lit),
        expr_stmt(call_name("g", vec![])),
    ]);
    let RunFailure::Uncaught(err) = failure else {
        panic!("expected runtime failure");
    };
    assert!(
        err.stack.contains("  at <anon@2:5> (test.we:3:3)"),
        "got: {}",
        err.stack
    );
}

#[test]
fn caught_errors_carry_the_trace_of_the_original_raise() {
    let thrower = func_stmt("thrower", &[], vec![throw_stmt(string("x"))]);
    let (value, _) = run(vec![
        thrower,
        assign("s", string("")),
        try_stmt(
            vec![expr_stmt(call_name("thrower", vec![]))],
            Some(("e", vec![assign("s", member(ident("e"), "stack"))])),
            None,
        ),
        expr_stmt(method_call(ident("s"), "count", vec![string("at thrower")])),
    ]);
    assert_eq!(value, welle::Value::Int(1));
}

#[test]
fn budget_errors_format_like_ordinary_errors() {
    let (failure, _) = {
        let mut out = welle::CollectStringPrint::new();
        let failure = welle::Runner::new()
            .limits(welle::ResourceLimits::new().max_steps(10))
            .run(
                &program(vec![while_stmt(boolean(true), vec![])]),
                &mut out,
            )
            .expect_err("step limit should fire");
        (failure, out.into_output())
    };
    let RunFailure::Uncaught(err) = failure else {
        panic!("expected runtime failure");
    };
    assert_eq!(err.message, "max instruction count exceeded (10)");
    assert!(err.report().contains("stack trace:"));
    assert!(err.report().contains("<main>"));
}
