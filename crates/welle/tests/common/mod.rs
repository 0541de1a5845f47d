//! Shared helpers for building program trees and running them.
//!
//! The parser is an external collaborator, so tests construct the tree
//! directly through these builders.

#![allow(dead_code)]

use welle::ast::{
    AssignOp, Block, CatchClause, DestructureTarget, DictEntry, Expr, ExprKind, InfixOp, MatchArm,
    Position, PrefixOp, Program, Stmt, StmtKind, SwitchCase,
};
use welle::{CollectStringPrint, ModuleLoader, ResourceLimits, RunFailure, Runner, Value};

pub fn p() -> Position {
    Position::new(1, 1)
}

pub fn at(line: u32, column: u32) -> Position {
    Position::new(line, column)
}

// ============================================================================
// Expressions
// ============================================================================

pub fn int(n: i64) -> Expr {
    Expr::new(ExprKind::Int(n), p())
}

pub fn float(f: f64) -> Expr {
    Expr::new(ExprKind::Float(f), p())
}

pub fn string(s: &str) -> Expr {
    Expr::new(ExprKind::Str(s.to_string()), p())
}

pub fn boolean(b: bool) -> Expr {
    Expr::new(ExprKind::Bool(b), p())
}

pub fn nil() -> Expr {
    Expr::new(ExprKind::Nil, p())
}

pub fn ident(name: &str) -> Expr {
    Expr::new(ExprKind::Ident(name.to_string()), p())
}

pub fn list(items: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::List(items), p())
}

pub fn tuple(items: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::Tuple(items), p())
}

pub fn dict(entries: Vec<(Expr, Expr)>) -> Expr {
    let entries = entries
        .into_iter()
        .map(|(k, v)| DictEntry::Pair(k, v))
        .collect();
    Expr::new(ExprKind::Dict(entries), p())
}

pub fn dict_shorthand(names: &[&str]) -> Expr {
    let entries = names
        .iter()
        .map(|n| DictEntry::Shorthand((*n).to_string()))
        .collect();
    Expr::new(ExprKind::Dict(entries), p())
}

pub fn infix(left: Expr, op: InfixOp, right: Expr) -> Expr {
    Expr::new(
        ExprKind::Infix {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        p(),
    )
}

pub fn prefix(op: PrefixOp, operand: Expr) -> Expr {
    Expr::new(
        ExprKind::Prefix {
            op,
            operand: Box::new(operand),
        },
        p(),
    )
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::new(
        ExprKind::Call {
            callee: Box::new(callee),
            args,
        },
        p(),
    )
}

pub fn call_name(name: &str, args: Vec<Expr>) -> Expr {
    call(ident(name), args)
}

pub fn method_call(object: Expr, name: &str, args: Vec<Expr>) -> Expr {
    call(member(object, name), args)
}

pub fn member(object: Expr, name: &str) -> Expr {
    Expr::new(
        ExprKind::Member {
            object: Box::new(object),
            member: name.to_string(),
        },
        p(),
    )
}

pub fn index(object: Expr, idx: Expr) -> Expr {
    Expr::new(
        ExprKind::Index {
            object: Box::new(object),
            index: Box::new(idx),
        },
        p(),
    )
}

pub fn slice(object: Expr, low: Option<Expr>, high: Option<Expr>, step: Option<Expr>) -> Expr {
    Expr::new(
        ExprKind::SliceExpr {
            object: Box::new(object),
            low: low.map(Box::new),
            high: high.map(Box::new),
            step: step.map(Box::new),
        },
        p(),
    )
}

pub fn spread(inner: Expr) -> Expr {
    Expr::new(ExprKind::Spread(Box::new(inner)), p())
}

pub fn func_lit(params: &[&str], body: Vec<Stmt>) -> Expr {
    func_lit_at(p(), params, body)
}

pub fn func_lit_at(pos: Position, params: &[&str], body: Vec<Stmt>) -> Expr {
    Expr::new(
        ExprKind::FunctionLit {
            params: params.iter().map(|s| (*s).to_string()).collect(),
            body: Block(body),
        },
        pos,
    )
}

pub fn conditional(cond: Expr, then: Expr, alt: Expr) -> Expr {
    Expr::new(
        ExprKind::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            alt: Box::new(alt),
        },
        p(),
    )
}

pub fn template(parts: &[&str], exprs: Vec<Expr>) -> Expr {
    Expr::new(
        ExprKind::Template {
            parts: parts.iter().map(|s| (*s).to_string()).collect(),
            exprs,
            tag: None,
        },
        p(),
    )
}

pub fn tagged_template(tag: Expr, parts: &[&str], exprs: Vec<Expr>) -> Expr {
    Expr::new(
        ExprKind::Template {
            parts: parts.iter().map(|s| (*s).to_string()).collect(),
            exprs,
            tag: Some(Box::new(tag)),
        },
        p(),
    )
}

pub fn match_expr(subject: Expr, arms: Vec<(Vec<Expr>, Expr)>, default: Option<Expr>) -> Expr {
    Expr::new(
        ExprKind::Match {
            subject: Box::new(subject),
            arms: arms
                .into_iter()
                .map(|(values, body)| MatchArm { values, body })
                .collect(),
            default: default.map(Box::new),
        },
        p(),
    )
}

pub fn list_comp(element: Expr, var: &str, iterable: Expr, filter: Option<Expr>) -> Expr {
    Expr::new(
        ExprKind::ListComp {
            element: Box::new(element),
            var: var.to_string(),
            iterable: Box::new(iterable),
            filter: filter.map(Box::new),
        },
        p(),
    )
}

pub fn assign_expr(name: &str, op: AssignOp, value: Expr) -> Expr {
    Expr::new(
        ExprKind::AssignExpr {
            name: name.to_string(),
            op,
            value: Box::new(value),
        },
        p(),
    )
}

// ============================================================================
// Statements
// ============================================================================

pub fn expr_stmt(expr: Expr) -> Stmt {
    let pos = expr.pos;
    Stmt::new(StmtKind::Expr(expr), pos)
}

pub fn assign(name: &str, value: Expr) -> Stmt {
    assign_op(name, AssignOp::Assign, value)
}

pub fn walrus(name: &str, value: Expr) -> Stmt {
    assign_op(name, AssignOp::Walrus, value)
}

pub fn assign_op(name: &str, op: AssignOp, value: Expr) -> Stmt {
    Stmt::new(
        StmtKind::Assign {
            name: name.to_string(),
            op,
            value,
        },
        p(),
    )
}

pub fn destructure(targets: Vec<DestructureTarget>, value: Expr) -> Stmt {
    Stmt::new(StmtKind::DestructureAssign { targets, value }, p())
}

pub fn name_target(name: &str) -> DestructureTarget {
    DestructureTarget::Name(name.to_string())
}

pub fn star_target(name: &str) -> DestructureTarget {
    DestructureTarget::Star(name.to_string())
}

pub fn index_assign(object: Expr, idx: Expr, op: AssignOp, value: Expr) -> Stmt {
    Stmt::new(
        StmtKind::IndexAssign {
            object,
            index: idx,
            op,
            value,
        },
        p(),
    )
}

pub fn member_assign(object: Expr, name: &str, op: AssignOp, value: Expr) -> Stmt {
    Stmt::new(
        StmtKind::MemberAssign {
            object,
            member: name.to_string(),
            op,
            value,
        },
        p(),
    )
}

pub fn ret(value: Expr) -> Stmt {
    Stmt::new(StmtKind::Return(Some(value)), p())
}

pub fn ret_nil() -> Stmt {
    Stmt::new(StmtKind::Return(None), p())
}

pub fn func_stmt(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
    Stmt::new(
        StmtKind::Func {
            name: name.to_string(),
            params: params.iter().map(|s| (*s).to_string()).collect(),
            body: Block(body),
        },
        p(),
    )
}

pub fn if_stmt(cond: Expr, then: Vec<Stmt>, alt: Option<Vec<Stmt>>) -> Stmt {
    Stmt::new(
        StmtKind::If {
            cond,
            then: Block(then),
            alt: alt.map(Block),
        },
        p(),
    )
}

pub fn while_stmt(cond: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::new(
        StmtKind::While {
            cond,
            body: Block(body),
        },
        p(),
    )
}

pub fn for_stmt(
    init: Option<Stmt>,
    cond: Option<Expr>,
    post: Option<Stmt>,
    body: Vec<Stmt>,
) -> Stmt {
    Stmt::new(
        StmtKind::For {
            init: init.map(Box::new),
            cond,
            post: post.map(Box::new),
            body: Block(body),
        },
        p(),
    )
}

pub fn for_in(key: &str, iterable: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::new(
        StmtKind::ForIn {
            key: key.to_string(),
            value: None,
            iterable,
            body: Block(body),
        },
        p(),
    )
}

pub fn for_in_kv(key: &str, value: &str, iterable: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::new(
        StmtKind::ForIn {
            key: key.to_string(),
            value: Some(value.to_string()),
            iterable,
            body: Block(body),
        },
        p(),
    )
}

pub fn switch_stmt(
    subject: Expr,
    cases: Vec<(Vec<Expr>, Vec<Stmt>)>,
    default: Option<Vec<Stmt>>,
) -> Stmt {
    Stmt::new(
        StmtKind::Switch {
            subject,
            cases: cases
                .into_iter()
                .map(|(values, body)| SwitchCase {
                    values,
                    body: Block(body),
                })
                .collect(),
            default: default.map(Block),
        },
        p(),
    )
}

pub fn try_stmt(
    body: Vec<Stmt>,
    catch: Option<(&str, Vec<Stmt>)>,
    finally: Option<Vec<Stmt>>,
) -> Stmt {
    Stmt::new(
        StmtKind::Try {
            body: Block(body),
            catch: catch.map(|(name, body)| CatchClause {
                name: name.to_string(),
                body: Block(body),
            }),
            finally: finally.map(Block),
        },
        p(),
    )
}

pub fn defer_stmt(call: Expr) -> Stmt {
    Stmt::new(StmtKind::Defer { call }, p())
}

pub fn throw_stmt(value: Expr) -> Stmt {
    let pos = value.pos;
    Stmt::new(StmtKind::Throw(value), pos)
}

pub fn brk() -> Stmt {
    Stmt::new(StmtKind::Break, p())
}

pub fn cont() -> Stmt {
    Stmt::new(StmtKind::Continue, p())
}

pub fn import_stmt(path: &str, alias: Option<&str>) -> Stmt {
    Stmt::new(
        StmtKind::Import {
            path: path.to_string(),
            alias: alias.map(ToString::to_string),
        },
        p(),
    )
}

pub fn from_import(path: &str, names: &[(&str, Option<&str>)]) -> Stmt {
    Stmt::new(
        StmtKind::FromImport {
            path: path.to_string(),
            names: names
                .iter()
                .map(|(n, a)| ((*n).to_string(), a.map(ToString::to_string)))
                .collect(),
        },
        p(),
    )
}

pub fn export_stmt(name: &str) -> Stmt {
    Stmt::new(
        StmtKind::Export {
            name: name.to_string(),
        },
        p(),
    )
}

// ============================================================================
// Runners
// ============================================================================

pub fn program(stmts: Vec<Stmt>) -> Program {
    Program::new("test.we", stmts)
}

/// Runs a program, returning the last-popped value and captured stdout.
pub fn run(stmts: Vec<Stmt>) -> (Value, String) {
    run_limited(stmts, ResourceLimits::default())
}

pub fn run_value(stmts: Vec<Stmt>) -> Value {
    run(stmts).0
}

pub fn run_output(stmts: Vec<Stmt>) -> String {
    run(stmts).1
}

pub fn run_limited(stmts: Vec<Stmt>, limits: ResourceLimits) -> (Value, String) {
    let mut out = CollectStringPrint::new();
    let outcome = Runner::new()
        .limits(limits)
        .run(&program(stmts), &mut out)
        .unwrap_or_else(|failure| panic!("program failed: {failure}"));
    (outcome.value, out.into_output())
}

/// Runs a program expected to fail, returning the failure and stdout.
pub fn run_failure(stmts: Vec<Stmt>) -> (RunFailure, String) {
    let mut out = CollectStringPrint::new();
    let failure = Runner::new()
        .run(&program(stmts), &mut out)
        .expect_err("program unexpectedly succeeded");
    (failure, out.into_output())
}

pub fn run_with_loader(stmts: Vec<Stmt>, loader: &mut dyn ModuleLoader) -> (Value, String) {
    let mut out = CollectStringPrint::new();
    let outcome = Runner::new()
        .loader(loader)
        .run(&program(stmts), &mut out)
        .unwrap_or_else(|failure| panic!("program failed: {failure}"));
    (outcome.value, out.into_output())
}

/// The message of an uncaught runtime error.
pub fn uncaught_message(stmts: Vec<Stmt>) -> String {
    match run_failure(stmts).0 {
        RunFailure::Uncaught(err) => err.message.clone(),
        RunFailure::Compile(err) => panic!("expected runtime error, got compile error: {err}"),
    }
}

/// The message of a compile-time error.
pub fn compile_message(stmts: Vec<Stmt>) -> String {
    match run_failure(stmts).0 {
        RunFailure::Compile(err) => err.message().to_string(),
        RunFailure::Uncaught(err) => panic!("expected compile error, got runtime error: {err:?}"),
    }
}
