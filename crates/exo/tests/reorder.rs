//! The reorder directive: exchanging perfectly nested loop pairs.

mod common;

use common::{aconst, asize, assign, avar, fconst, forall, proc, seq};
use exo::{Procedure, Sym, loop_ir as lir};

/// `for i in (0, n): for j in (0, m): A[i, j] = 0.0`
fn nest() -> (lir::Proc, Sym, Sym) {
    let n = Sym::new("n");
    let m = Sym::new("m");
    let a = Sym::new("A");
    let i = Sym::new("i");
    let j = Sym::new("j");
    let body = forall(
        &i,
        asize(&n),
        forall(&j, asize(&m), assign(&a, vec![avar(&i), avar(&j)], fconst(0.0))),
    );
    let p = proc("zero", vec![n, m], vec![a], body);
    (p, i, j)
}

#[test]
fn reorder_swaps_loops_and_bounds() {
    let (p, i, j) = nest();
    let proc_obj = Procedure::new(p).expect("well-formed input");
    let reordered = proc_obj.reorder("i", "j").expect("reorder should apply");

    let lir::Stmt::ForAll {
        iter: outer,
        hi: outer_hi,
        body,
        ..
    } = &reordered.loop_ir().body
    else {
        panic!("expected outer loop");
    };
    assert_eq!(outer, &j, "the inner loop moved outside");
    assert!(matches!(outer_hi, lir::AExpr::Size { name, .. } if name.name() == "m"));
    let lir::Stmt::ForAll {
        iter: inner,
        hi: inner_hi,
        body: inner_body,
        ..
    } = &**body
    else {
        panic!("expected inner loop");
    };
    assert_eq!(inner, &i);
    assert!(matches!(inner_hi, lir::AExpr::Size { name, .. } if name.name() == "n"));
    // the statement below is untouched
    assert!(matches!(&**inner_body, lir::Stmt::Assign { idx, .. } if idx.len() == 2));
}

#[test]
fn reorder_is_an_involution() {
    let (p, _, _) = nest();
    let original = Procedure::new(p).expect("well-formed input");
    let back = original
        .reorder("i", "j")
        .expect("forward")
        .reorder("j", "i")
        .expect("backward");
    assert!(
        lir::alpha_eq(original.loop_ir(), back.loop_ir()),
        "reorder twice restores the procedure"
    );
}

#[test]
fn reorder_requires_a_directly_nested_loop() {
    // for i: x = 0.0; for j: ... -- the statement blocks the nest
    let n = Sym::new("n");
    let x = Sym::new("x");
    let i = Sym::new("i");
    let j = Sym::new("j");
    let body = forall(
        &i,
        asize(&n),
        seq(vec![
            assign(&x, vec![], fconst(0.0)),
            forall(&j, asize(&n), assign(&x, vec![], fconst(1.0))),
        ]),
    );
    let p = proc("p", vec![n], vec![x], body);
    let err = Procedure::new(p)
        .expect("well-formed input")
        .reorder("i", "j")
        .expect_err("the loops are not perfectly nested");
    assert_eq!(err.message(), "expected loop directly inside of i loop");
}

#[test]
fn reorder_requires_the_named_inner_iterator() {
    let n = Sym::new("n");
    let x = Sym::new("x");
    let i = Sym::new("i");
    let k = Sym::new("k");
    let body = forall(&i, asize(&n), forall(&k, asize(&n), assign(&x, vec![], fconst(0.0))));
    let p = proc("p", vec![n], vec![x], body);

    // name_pairs finds no (i, j) nest at all
    let err = Procedure::new(p)
        .expect("well-formed input")
        .reorder("i", "j")
        .expect_err("no such nest");
    assert!(err.message().contains("no loop nest"), "got: {err}");
}

#[test]
fn mismatched_inner_iterator_reports_the_expectation() {
    let n = Sym::new("n");
    let x = Sym::new("x");
    let i = Sym::new("i");
    let j = Sym::new("j");
    let k = Sym::new("k");
    // for i: for k: for j: ... -- (i, j) is a pair, but k sits in between
    let body = forall(
        &i,
        asize(&n),
        forall(&k, asize(&n), forall(&j, asize(&n), assign(&x, vec![], fconst(0.0)))),
    );
    let p = proc("p", vec![n], vec![x], body);
    let err = Procedure::new(p)
        .expect("well-formed input")
        .reorder("i", "j")
        .expect_err("k blocks the nest");
    assert!(
        err.message().contains("to have iteration variable j"),
        "got: {err}"
    );
}

#[test]
fn untargeted_loops_recurse_structurally() {
    // the (i, j) nest sits under an unrelated outer loop and an if
    let n = Sym::new("n");
    let x = Sym::new("x");
    let t = Sym::new("t");
    let i = Sym::new("i");
    let j = Sym::new("j");
    let nest = forall(&i, asize(&n), forall(&j, asize(&n), assign(&x, vec![], fconst(0.0))));
    let body = forall(
        &t,
        aconst(2),
        common::if_stmt(common::cmp(lir::CmpOp::Lt, avar(&t), aconst(1)), nest),
    );
    let p = proc("p", vec![n], vec![x], body);
    let result = Procedure::new(p)
        .expect("well-formed input")
        .reorder("i", "j")
        .expect("reorder applies under nesting");
    // outer structure unchanged
    let lir::Stmt::ForAll { iter, body, .. } = &result.loop_ir().body else {
        panic!("expected the unrelated loop to stay outermost");
    };
    assert_eq!(iter, &t);
    let lir::Stmt::If { body, .. } = &**body else {
        panic!("expected the guard to survive");
    };
    let lir::Stmt::ForAll { iter, .. } = &**body else {
        panic!("expected the reordered nest");
    };
    assert_eq!(iter, &j, "j is now the outer loop of the nest");
}

#[test]
fn reorder_preserves_source_spans() {
    let n = Sym::new("n");
    let x = Sym::new("x");
    let i = Sym::new("i");
    let j = Sym::new("j");
    let outer = lir::Stmt::ForAll {
        iter: i.clone(),
        hi: asize(&n),
        body: Box::new(lir::Stmt::ForAll {
            iter: j.clone(),
            hi: asize(&n),
            body: Box::new(assign(&x, vec![avar(&i)], fconst(0.0))),
            srcinfo: common::span_at(20),
        }),
        srcinfo: common::span_at(10),
    };
    let p = proc("p", vec![n], vec![x], outer);
    let result = Procedure::new(p).unwrap().reorder("i", "j").unwrap();
    let lir::Stmt::ForAll { srcinfo, body, .. } = &result.loop_ir().body else {
        panic!("expected loop");
    };
    assert_eq!(srcinfo.line, 20, "the j loop keeps its own span in its new position");
    let lir::Stmt::ForAll { srcinfo, .. } = &**body else {
        panic!("expected inner loop");
    };
    assert_eq!(srcinfo.line, 10, "the i loop keeps its span too");
}
