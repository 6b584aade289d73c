//! Pattern-fragment parsing: PAST output, holes, and the
//! expression/statement disambiguation rules.

use exo::{past, pattern};

fn stmt_pattern(src: &str) -> Vec<past::Stmt> {
    match pattern(src).expect("pattern should parse") {
        past::Pattern::Stmts(stmts) => stmts,
        past::Pattern::Expr(_) => panic!("expected a statement pattern"),
    }
}

fn expr_pattern(src: &str) -> past::Expr {
    match pattern(src).expect("pattern should parse") {
        past::Pattern::Expr(e) => e,
        past::Pattern::Stmts(_) => panic!("expected an expression pattern"),
    }
}

#[test]
fn assignment_with_holes() {
    let stmts = stmt_pattern("A[_] = _");
    let [past::Stmt::Assign { name, idx, rhs, .. }] = stmts.as_slice() else {
        panic!("expected one assignment");
    };
    assert_eq!(name, "A");
    assert!(matches!(idx.as_slice(), [past::Expr::EHole { .. }]));
    assert!(matches!(rhs, past::Expr::EHole { .. }));
}

#[test]
fn bare_underscore_is_an_expression_hole() {
    assert!(matches!(expr_pattern("_"), past::Expr::EHole { .. }));
}

#[test]
fn statement_hole_in_a_block() {
    let stmts = stmt_pattern("x[0] = 1.0\n_\n");
    assert_eq!(stmts.len(), 2);
    assert!(matches!(stmts[1], past::Stmt::SHole { .. }));
}

#[test]
fn loop_pattern_keeps_textual_iterator() {
    let stmts = stmt_pattern("for i in par(0, n):\n    A[i] = _\n");
    let [past::Stmt::For { iter, lo, hi, body, .. }] = stmts.as_slice() else {
        panic!("expected one loop");
    };
    assert_eq!(iter, "i");
    assert!(matches!(lo, past::Expr::Const { .. }));
    assert!(matches!(hi, past::Expr::Read { .. }));
    assert_eq!(body.len(), 1);
}

#[test]
fn loop_pattern_with_wildcard_range() {
    let stmts = stmt_pattern("for i in _:\n    _\n");
    let [past::Stmt::For { lo, hi, .. }] = stmts.as_slice() else {
        panic!("expected one loop");
    };
    assert!(matches!(lo, past::Expr::EHole { .. }));
    assert!(matches!(hi, past::Expr::EHole { .. }));
}

#[test]
fn stride_is_a_standalone_pattern() {
    let e = expr_pattern("stride(x, 0)");
    assert!(matches!(e, past::Expr::Stride { dim: Some(0), .. }));

    let e = expr_pattern("stride(x, _)");
    assert!(matches!(e, past::Expr::Stride { dim: None, .. }));
}

#[test]
fn builtin_call_is_an_expression_pattern() {
    let e = expr_pattern("sin(_)");
    let past::Expr::BuiltIn { f, args, .. } = e else {
        panic!("expected builtin pattern");
    };
    assert_eq!(f, exo::BuiltIn::Sin);
    assert!(matches!(args.as_slice(), [past::Expr::EHole { .. }]));
}

#[test]
fn procedure_call_stays_a_statement_pattern() {
    let stmts = stmt_pattern("gemm(_, _)");
    let [past::Stmt::Call { name, args, .. }] = stmts.as_slice() else {
        panic!("expected a call statement pattern");
    };
    assert_eq!(name, "gemm");
    assert_eq!(args.len(), 2);
}

#[test]
fn config_write_pattern() {
    let stmts = stmt_pattern("Cfg.field = 0.0");
    let [past::Stmt::WriteConfig { config, field, .. }] = stmts.as_slice() else {
        panic!("expected a config write pattern");
    };
    assert_eq!(config, "Cfg");
    assert_eq!(field, "field");
}

#[test]
fn alloc_pattern_with_dims() {
    let stmts = stmt_pattern("tmp: f32[n, 16]");
    let [past::Stmt::Alloc { name, dims, .. }] = stmts.as_slice() else {
        panic!("expected an alloc pattern");
    };
    assert_eq!(name, "tmp");
    assert_eq!(dims.len(), 2);
}

#[test]
fn reduce_pattern() {
    let stmts = stmt_pattern("res[_] += _");
    assert!(matches!(stmts.as_slice(), [past::Stmt::Reduce { .. }]));
}

#[test]
fn unquote_is_rejected_in_patterns() {
    let err = pattern("unquote(x)").expect_err("unquote must not appear in fragments");
    assert!(err.message().contains("not allowed in pattern"), "got: {err}");
}

#[test]
fn reads_remain_textual() {
    let e = expr_pattern("A[i, j]");
    let past::Expr::Read { name, idx, .. } = e else {
        panic!("expected read pattern");
    };
    assert_eq!(name, "A");
    assert!(matches!(
        idx.as_slice(),
        [past::Expr::Read { .. }, past::Expr::Read { .. }]
    ));
}
