//! Name-descriptor resolution over LoopIR: `name`, `name[k]`, and
//! `outer > inner` pair search with shadowing.

mod common;

use common::{aconst, alloc, forall, pass, proc, seq};
use exo::{Sym, scheduling};

#[test]
fn single_name_collects_in_preorder() {
    // sizes and args come first, then allocations and iterators in a
    // preorder walk of the body
    let n = Sym::new("n");
    let x = Sym::new("x");
    let i0 = Sym::new("i");
    let i1 = Sym::new("i");
    let body = forall(&i0, aconst(4), forall(&i1, aconst(4), pass()));
    let p = proc("p", vec![n.clone()], vec![x.clone()], body);

    let syms = scheduling::name_symbols(&p, "i").expect("search should succeed");
    assert_eq!(syms, vec![i0.clone(), i1.clone()]);

    let first = scheduling::name_symbols(&p, "i[1]").expect("indexed search");
    assert_eq!(first, vec![i0]);
    let second = scheduling::name_symbols(&p, "i[2]").expect("indexed search");
    assert_eq!(second, vec![i1]);
}

#[test]
fn sizes_and_args_precede_body_occurrences() {
    let n = Sym::new("v");
    let a = Sym::new("v");
    let it = Sym::new("v");
    let p = proc(
        "p",
        vec![n.clone()],
        vec![a.clone()],
        forall(&it, aconst(2), pass()),
    );
    let syms = scheduling::name_symbols(&p, "v").expect("search should succeed");
    assert_eq!(syms, vec![n, a, it]);
}

#[test]
fn allocations_are_defining_occurrences() {
    let t = Sym::new("tmp");
    let p = proc("p", vec![], vec![], alloc(&t, vec![aconst(4)]));
    let syms = scheduling::name_symbols(&p, "tmp").expect("search should succeed");
    assert_eq!(syms, vec![t]);
}

#[test]
fn missing_index_is_an_error_but_empty_unindexed_is_not() {
    let i = Sym::new("i");
    let p = proc("p", vec![], vec![], forall(&i, aconst(2), pass()));

    let none = scheduling::name_symbols(&p, "zzz").expect("unindexed search may be empty");
    assert!(none.is_empty());

    let err = scheduling::name_symbols(&p, "i[2]").expect_err("index past the end must fail");
    assert!(err.message().contains("needed 2"), "got: {err}");

    let err = scheduling::name_symbols(&p, "i[0]").expect_err("indices are 1-based");
    assert!(err.message().contains("at least 1"), "got: {err}");
}

/// The canonical shadowing example: nesting `[j, i, j, i, i]` under `j > i`
/// yields exactly the five documented pairs, in preorder.
#[test]
fn pair_search_with_nested_shadowing() {
    let j0 = Sym::new("j");
    let i1 = Sym::new("i");
    let j2 = Sym::new("j");
    let i3 = Sym::new("i");
    let i4 = Sym::new("i");

    let body = forall(
        &j0,
        aconst(2),
        forall(
            &i1,
            aconst(2),
            forall(&j2, aconst(2), forall(&i3, aconst(2), forall(&i4, aconst(2), pass()))),
        ),
    );
    let p = proc("p", vec![], vec![], body);

    let pairs = scheduling::name_pairs(&p, "j", "i").expect("pair search");
    let expected = vec![
        (j0.clone(), i1.clone()),
        (j0.clone(), i3.clone()),
        (j0.clone(), i4.clone()),
        (j2.clone(), i3.clone()),
        (j2.clone(), i4.clone()),
    ];
    assert_eq!(pairs, expected, "five pairs, outer-preorder first");
}

#[test]
fn pair_search_respects_outer_index() {
    let j0 = Sym::new("j");
    let i1 = Sym::new("i");
    let j2 = Sym::new("j");
    let i3 = Sym::new("i");

    let body = forall(
        &j0,
        aconst(2),
        forall(&i1, aconst(2), forall(&j2, aconst(2), forall(&i3, aconst(2), pass()))),
    );
    let p = proc("p", vec![], vec![], body);

    let pairs = scheduling::name_pairs(&p, "j[2]", "i").expect("pair search");
    assert_eq!(pairs, vec![(j2, i3)]);
}

#[test]
fn pair_search_over_siblings() {
    let j = Sym::new("j");
    let i_left = Sym::new("i");
    let i_right = Sym::new("i");
    let body = forall(
        &j,
        aconst(2),
        seq(vec![
            forall(&i_left, aconst(2), pass()),
            forall(&i_right, aconst(2), pass()),
        ]),
    );
    let p = proc("p", vec![], vec![], body);

    let pairs = scheduling::name_pairs(&p, "j", "i").expect("pair search");
    assert_eq!(pairs, vec![(j.clone(), i_left), (j, i_right)]);
}

#[test]
fn indexed_pair_search_with_no_match_is_an_error() {
    let j = Sym::new("j");
    let p = proc("p", vec![], vec![], forall(&j, aconst(2), pass()));
    let err = scheduling::name_pairs(&p, "j[1]", "i[1]").expect_err("no inner loop exists");
    assert!(err.message().contains("no loop nest"), "got: {err}");
}
