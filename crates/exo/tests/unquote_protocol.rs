//! Quote/unquote meta-layer tests: splicing host-computed IR into a
//! procedure body and re-entering the parser from host code.

use std::rc::Rc;

use exo::{CaptureScope, HostVal, ParseError, SourceAnchor, parse_proc, uast};

fn anchor() -> SourceAnchor {
    SourceAnchor::new("test.py")
}

/// A host function returning a `Pass` IR node, for statement injection.
fn emit_pass() -> HostVal {
    HostVal::Func(Rc::new(|_args: &[HostVal]| {
        Ok(HostVal::Stmt(Box::new(uast::Stmt::Pass {
            srcinfo: exo::SrcInfo {
                file: std::sync::Arc::from("host"),
                line: 1,
                col: 1,
                end_line: 1,
                end_col: 1,
            },
        })))
    }))
}

#[test]
fn statement_unquote_injects_returned_ir() {
    let scope = CaptureScope::new().local("emit_stmt", emit_pass()).local("x", HostVal::Int(0));
    let src = "\
def foo(n: size):
    with unquote:
        emit_stmt(x)
";
    let p = parse_proc(src, &anchor(), &scope).expect("should parse");
    assert_eq!(p.body.len(), 1, "the body is exactly the injected statement");
    assert!(matches!(p.body[0], uast::Stmt::Pass { .. }));
}

#[test]
fn expression_unquote_accepts_ints_and_floats() {
    let scope = CaptureScope::new().local("TILE", HostVal::Int(4));
    let src = "\
def foo(x: f32[8]):
    x[unquote(TILE + 1)] = unquote(2.5)
";
    let p = parse_proc(src, &anchor(), &scope).expect("should parse");
    let uast::Stmt::Assign { idx, rhs, .. } = &p.body[0] else {
        panic!("expected assignment");
    };
    assert!(matches!(
        idx[0],
        uast::Expr::Const {
            val: uast::Lit::Int(5),
            ..
        }
    ));
    assert!(matches!(
        rhs,
        uast::Expr::Const {
            val: uast::Lit::Float(_),
            ..
        }
    ));
}

#[test]
fn expression_unquote_accepts_ir_expressions() {
    let ir = uast::Expr::Const {
        val: uast::Lit::Int(7),
        srcinfo: exo::SrcInfo {
            file: std::sync::Arc::from("host"),
            line: 1,
            col: 1,
            end_line: 1,
            end_col: 1,
        },
    };
    let scope = CaptureScope::new().local("seven", HostVal::Expr(Box::new(ir)));
    let src = "\
def foo(x: f32[8]):
    x[unquote(seven)] = 0.0
";
    let p = parse_proc(src, &anchor(), &scope).expect("should parse");
    let uast::Stmt::Assign { idx, .. } = &p.body[0] else {
        panic!("expected assignment");
    };
    assert!(matches!(
        idx[0],
        uast::Expr::Const {
            val: uast::Lit::Int(7),
            ..
        }
    ));
}

#[test]
fn expression_unquote_rejects_other_values() {
    let scope = CaptureScope::new().local("name", HostVal::Str(Rc::from("hello")));
    let err = parse_proc(
        "def foo(x: f32[8]):\n    x[unquote(name)] = 0.0\n",
        &anchor(),
        &scope,
    )
    .expect_err("a string cannot be unquoted in expression position");
    assert!(matches!(err, ParseError::Unquote { .. }));
    assert!(err.message().contains("a string"), "got: {err}");
}

#[test]
fn unquote_in_type_position_takes_a_type_name() {
    let scope = CaptureScope::new().local("precision", HostVal::Str(Rc::from("f32")));
    let src = "\
def foo(n: size, x: unquote(precision)[n]):
    x[0] = 0.0
";
    let p = parse_proc(src, &anchor(), &scope).expect("should parse");
    let uast::Type::Tensor { elem, .. } = &p.args[1].typ else {
        panic!("expected tensor");
    };
    assert_eq!(**elem, uast::Type::F32);
}

#[test]
fn unquote_in_type_position_rejects_bad_names() {
    let scope = CaptureScope::new().local("precision", HostVal::Str(Rc::from("f99")));
    let err = parse_proc(
        "def foo(n: size, x: unquote(precision)[n]):\n    pass\n",
        &anchor(),
        &scope,
    )
    .expect_err("unknown type name should fail");
    assert!(err.message().contains("did not yield a valid type"), "got: {err}");
}

#[test]
fn quote_inside_unquote_reenters_the_procedure_scope() {
    // the quoted block mentions the loop iterator, which only the procedure
    // scope can resolve
    let src = "\
def foo(n: size, x: f32[n]):
    for i in par(0, n):
        with unquote:
            with quote:
                x[i] = 0.0
";
    let p = parse_proc(src, &anchor(), &CaptureScope::new()).expect("should parse");
    let uast::Stmt::For { iter, body, .. } = &p.body[0] else {
        panic!("expected loop");
    };
    let uast::Stmt::Assign { idx, .. } = &body[0] else {
        panic!("expected the quoted assignment in the loop body");
    };
    let uast::Expr::Read { name, .. } = &idx[0] else {
        panic!("expected index read");
    };
    assert_eq!(name, iter, "quoted code resolves to the procedure's iterator symbol");
}

#[test]
fn quote_expression_inside_unquote() {
    // quote(i + 1) builds an IR expression against the procedure scope,
    // which the surrounding unquote splices back in
    let src = "\
def foo(n: size, x: f32[n]):
    for i in par(0, n):
        x[unquote(quote(i + 1))] = 0.0
";
    let p = parse_proc(src, &anchor(), &CaptureScope::new()).expect("should parse");
    let uast::Stmt::For { iter, body, .. } = &p.body[0] else {
        panic!("expected loop");
    };
    let uast::Stmt::Assign { idx, .. } = &body[0] else {
        panic!("expected assignment");
    };
    let uast::Expr::BinOp { op, lhs, .. } = &idx[0] else {
        panic!("expected spliced binop index");
    };
    assert_eq!(*op, uast::BinOp::Add);
    let uast::Expr::Read { name, .. } = &**lhs else {
        panic!("expected read of the iterator");
    };
    assert_eq!(name, iter);
}

#[test]
fn unbound_local_fails_only_when_referenced() {
    let scope = CaptureScope::new().unbound_local("ghost").local("TILE", HostVal::Int(2));
    // not referencing the unbound local is fine
    let ok = parse_proc(
        "def foo(x: f32[8]):\n    x[unquote(TILE)] = 0.0\n",
        &anchor(),
        &scope,
    );
    assert!(ok.is_ok());

    // referencing it raises at evaluation time
    let err = parse_proc(
        "def foo(x: f32[8]):\n    x[unquote(ghost)] = 0.0\n",
        &anchor(),
        &scope,
    )
    .expect_err("unbound local should fail when referenced");
    assert!(err.message().contains("unbound"), "got: {err}");
}

#[test]
fn host_assignments_thread_through_the_block() {
    let scope = CaptureScope::new().local("emit_stmt", emit_pass()).local("base", HostVal::Int(1));
    let src = "\
def foo(n: size):
    with unquote:
        t = base + 1
        emit_stmt(t)
        emit_stmt(t)
";
    let p = parse_proc(src, &anchor(), &scope).expect("should parse");
    assert_eq!(p.body.len(), 2, "each call injects one statement");
}

#[test]
fn injection_is_deterministic() {
    let src = "\
def foo(n: size, x: f32[n]):
    for i in par(0, n):
        with unquote:
            with quote:
                x[i] = 0.0
            with quote:
                x[i] = 1.0
";
    let a = parse_proc(src, &anchor(), &CaptureScope::new()).expect("should parse");
    let b = parse_proc(src, &anchor(), &CaptureScope::new()).expect("should parse");
    assert!(uast::alpha_eq(&a, &b), "repeated parses inject identical IR");
    let uast::Stmt::For { body, .. } = &a.body[0] else {
        panic!("expected loop");
    };
    assert_eq!(body.len(), 2, "quoted blocks are injected in order");
}

#[test]
fn statement_level_unquote_call_is_rejected() {
    let err = parse_proc(
        "def foo(n: size):\n    unquote(n)\n",
        &anchor(),
        &CaptureScope::new(),
    )
    .expect_err("statement-level unquote must use the with form");
    assert!(err.message().contains("with unquote:"), "got: {err}");
}

#[test]
fn with_other_context_is_rejected() {
    let err = parse_proc(
        "def foo(n: size):\n    with open('f'):\n        pass\n",
        &anchor(),
        &CaptureScope::new(),
    )
    .expect_err("only unquote with-blocks are allowed");
    assert!(err.message().contains("expected unquote"), "got: {err}");
}
