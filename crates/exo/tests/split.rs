//! The split directive: tiling one loop into a hi/lo pair with a symbolic
//! ceiling-division bound.

mod common;

use std::collections::HashMap;

use common::{Buffers, asize, assign, avar, fconst, forall, interpret, proc, read};
use exo::{Procedure, Sym, loop_ir as lir};
use pretty_assertions::assert_eq;

/// `for v in (0, n): A[v] = v`
fn ramp() -> (lir::Proc, Sym, Sym) {
    let n = Sym::new("n");
    let a = Sym::new("A");
    let v = Sym::new("v");
    let body = forall(&v, asize(&n), assign(&a, vec![avar(&v)], read(&v, vec![])));
    let p = proc("ramp", vec![n.clone()], vec![a.clone()], body);
    (p, n, a)
}

#[test]
fn split_produces_the_documented_shape() {
    let (p, _, _) = ramp();
    let split = Procedure::new(p)
        .expect("well-formed input")
        .split("v", 4, "vh", "vl")
        .expect("split should apply");

    let expected = "\
proc ramp(n: size, A):
    for vh in range(0, n / 4):
        for vl in range(0, 4):
            A[4 * vh + vl] = 4 * vh + vl
";
    assert_eq!(split.to_string(), expected);
}

#[test]
fn split_mints_fresh_iterators() {
    let (p, _, _) = ramp();
    let original = Procedure::new(p).unwrap();
    let split = original.split("v", 4, "vh", "vl").unwrap();
    let lir::Stmt::ForAll { iter: vh, body, .. } = &split.loop_ir().body else {
        panic!("expected hi loop");
    };
    let lir::Stmt::ForAll { iter: vl, .. } = &**body else {
        panic!("expected lo loop");
    };
    assert_eq!(vh.name(), "vh");
    assert_eq!(vl.name(), "vl");
    assert_ne!(vh, vl);

    // splitting again mints different symbols even with the same hints
    let again = original.split("v", 4, "vh", "vl").unwrap();
    let lir::Stmt::ForAll { iter: vh2, .. } = &again.loop_ir().body else {
        panic!("expected hi loop");
    };
    assert_ne!(vh, vh2, "independent splits mint distinct symbols");
}

#[test]
fn split_preserves_semantics_when_quotient_divides() {
    let (p, n, a) = ramp();
    let original = Procedure::new(p).unwrap();
    let split = original.split("v", 4, "vh", "vl").unwrap();

    let mut before: Buffers = HashMap::from([(a.id(), vec![0.0; 8])]);
    let mut after: Buffers = HashMap::from([(a.id(), vec![0.0; 8])]);
    interpret(original.loop_ir(), &[(&n, 8)], &mut before);
    interpret(split.loop_ir(), &[(&n, 8)], &mut after);
    assert_eq!(before[&a.id()], after[&a.id()]);
}

#[test]
fn split_matches_masked_iteration_when_quotient_does_not_divide() {
    // with n = 10 and q = 4 the ceiling bound over-approximates; the
    // interpreter masks out-of-range accesses, which is the reference
    // behaviour for the padded final iteration
    let (p, n, a) = ramp();
    let original = Procedure::new(p).unwrap();
    let split = original.split("v", 4, "vh", "vl").unwrap();

    let mut before: Buffers = HashMap::from([(a.id(), vec![0.0; 10])]);
    let mut after: Buffers = HashMap::from([(a.id(), vec![0.0; 10])]);
    interpret(original.loop_ir(), &[(&n, 10)], &mut before);
    interpret(split.loop_ir(), &[(&n, 10)], &mut after);
    assert_eq!(before[&a.id()], after[&a.id()]);
}

#[test]
fn split_substitutes_size_positions_in_nested_bounds() {
    // the inner loop's bound mentions the split variable in a Size position;
    // the substitution must rewrite it as well
    let n = Sym::new("n");
    let a = Sym::new("A");
    let v = Sym::new("v");
    let w = Sym::new("w");
    let inner = forall(&w, asize(&v), assign(&a, vec![avar(&w)], fconst(1.0)));
    let body = forall(&v, asize(&n), inner);
    let p = proc("tri", vec![n], vec![a], body);

    let split = Procedure::new(p)
        .unwrap()
        .split("v", 2, "vh", "vl")
        .expect("split should apply");
    let lir::Stmt::ForAll { body, .. } = &split.loop_ir().body else {
        panic!("expected hi loop");
    };
    let lir::Stmt::ForAll { body, .. } = &**body else {
        panic!("expected lo loop");
    };
    let lir::Stmt::ForAll { hi, .. } = &**body else {
        panic!("expected the dependent inner loop");
    };
    assert!(
        matches!(hi, lir::AExpr::Add { .. }),
        "the dependent bound was rewritten to 2*vh + vl, got {hi}"
    );
}

#[test]
fn split_rejects_non_positive_quotients() {
    let (p, _, _) = ramp();
    let err = Procedure::new(p)
        .unwrap()
        .split("v", 0, "vh", "vl")
        .expect_err("quotient must be positive");
    assert!(err.message().contains("must be positive"), "got: {err}");
}

#[test]
fn split_of_unknown_name_fails() {
    let (p, _, _) = ramp();
    let err = Procedure::new(p)
        .unwrap()
        .split("zzz", 4, "h", "l")
        .expect_err("no such loop");
    assert!(err.message().contains("no symbol matching"), "got: {err}");
}

#[test]
fn split_then_reorder_composes() {
    // a split loop nest is immediately reorderable by the fresh names
    let (p, n, a) = ramp();
    let tiled = Procedure::new(p)
        .unwrap()
        .split("v", 4, "vh", "vl")
        .unwrap()
        .reorder("vh", "vl")
        .expect("the fresh loops form a nest");

    let mut after: Buffers = HashMap::from([(a.id(), vec![0.0; 8])]);
    interpret(tiled.loop_ir(), &[(&n, 8)], &mut after);
    let expected: Vec<f64> = (0..8).map(f64::from).collect();
    assert_eq!(after[&a.id()], expected);
}
