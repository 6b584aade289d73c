//! Matching PAST fragments against loop IR.
//!
//! A mutual recursion over (pattern, IR) pairs: holes match any subtree,
//! identifier strings resolve consistently through a string-to-symbol
//! unification map, and `_` is a wildcard that unifies with anything.
//! Pattern expressions match value expressions, affine expressions, and
//! predicates, whichever the IR position calls for.

use ahash::AHashMap;

use crate::{loop_ir as lir, past, sym::Sym, uast};

/// Consistent identifier unification: once a pattern name has matched a
/// symbol, every later occurrence must match the same symbol.
#[derive(Debug, Default, Clone)]
pub(crate) struct MatchEnv {
    names: AHashMap<String, Sym>,
}

impl MatchEnv {
    fn unify(&mut self, name: &str, sym: &Sym) -> bool {
        if name == "_" {
            return true;
        }
        match self.names.get(name) {
            Some(bound) => bound == sym,
            None => {
                self.names.insert(name.to_owned(), sym.clone());
                true
            }
        }
    }
}

/// One step of a path from a procedure body to a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Seq0,
    Seq1,
    IfBody,
    ForBody,
}

/// Returns every match of `pattern` in the procedure body, outermost first.
/// A multi-statement pattern matches a consecutive run of a `Seq` spine and
/// is returned re-folded into a single spine.
pub(crate) fn find_stmts(pattern: &[past::Stmt], proc: &lir::Proc) -> Vec<lir::Stmt> {
    let mut out = Vec::new();
    if pattern.is_empty() {
        return out;
    }
    find_in_block(pattern, &proc.body, &mut out);
    out
}

fn find_in_block(pattern: &[past::Stmt], block: &lir::Stmt, out: &mut Vec<lir::Stmt>) {
    let run = lir::spine(block);
    if run.len() >= pattern.len() {
        for window in run.windows(pattern.len()) {
            let mut env = MatchEnv::default();
            if match_block(pattern, window, &mut env) {
                let matched: Vec<lir::Stmt> = window.iter().map(|s| (*s).clone()).collect();
                out.push(lir::seq_of(matched));
            }
        }
    }
    for elem in run {
        match elem {
            lir::Stmt::If { body, .. } | lir::Stmt::ForAll { body, .. } => find_in_block(pattern, body, out),
            _ => {}
        }
    }
}

/// Path to the first (outermost, leftmost) statement matching `pattern`.
pub(crate) fn find_first_path(pattern: &past::Stmt, body: &lir::Stmt) -> Option<Vec<Step>> {
    let mut path = Vec::new();
    let mut found = None;
    path_search(pattern, body, &mut path, &mut found);
    found
}

fn path_search(pattern: &past::Stmt, s: &lir::Stmt, path: &mut Vec<Step>, found: &mut Option<Vec<Step>>) {
    if found.is_some() {
        return;
    }
    match s {
        lir::Stmt::Seq { s0, s1, .. } => {
            path.push(Step::Seq0);
            path_search(pattern, s0, path, found);
            path.pop();
            if found.is_some() {
                return;
            }
            path.push(Step::Seq1);
            path_search(pattern, s1, path, found);
            path.pop();
        }
        _ => {
            let mut env = MatchEnv::default();
            if match_stmt(pattern, s, &mut env) {
                *found = Some(path.clone());
                return;
            }
            match s {
                lir::Stmt::If { body, .. } => {
                    path.push(Step::IfBody);
                    path_search(pattern, body, path, found);
                    path.pop();
                }
                lir::Stmt::ForAll { body, .. } => {
                    path.push(Step::ForBody);
                    path_search(pattern, body, path, found);
                    path.pop();
                }
                _ => {}
            }
        }
    }
}

fn match_block(pattern: &[past::Stmt], stmts: &[&lir::Stmt], env: &mut MatchEnv) -> bool {
    pattern.len() == stmts.len() && pattern.iter().zip(stmts).all(|(p, s)| match_stmt(p, s, env))
}

pub(crate) fn match_stmt(pattern: &past::Stmt, s: &lir::Stmt, env: &mut MatchEnv) -> bool {
    match (pattern, s) {
        // a statement hole matches any single statement
        (past::Stmt::SHole { .. }, _) => !matches!(s, lir::Stmt::Seq { .. }),

        (
            past::Stmt::Assign {
                name, idx, rhs: prhs, ..
            },
            lir::Stmt::Assign {
                name: sym,
                idx: sidx,
                rhs,
                ..
            },
        )
        | (
            past::Stmt::Reduce {
                name, idx, rhs: prhs, ..
            },
            lir::Stmt::Reduce {
                name: sym,
                idx: sidx,
                rhs,
                ..
            },
        ) => {
            env.unify(name, sym)
                && idx.len() == sidx.len()
                && idx.iter().zip(sidx).all(|(p, a)| match_affine(p, a, env))
                && match_value(prhs, rhs, env)
        }

        (past::Stmt::Alloc { name, dims, .. }, lir::Stmt::Alloc { name: sym, shape, .. }) => {
            env.unify(name, sym)
                && dims.len() == shape.len()
                && dims.iter().zip(shape).all(|(p, a)| match_affine(p, a, env))
        }

        (
            past::Stmt::If {
                cond, body, orelse, ..
            },
            lir::Stmt::If {
                cond: scond,
                body: sbody,
                ..
            },
        ) => orelse.is_empty() && match_pred(cond, scond, env) && match_body(body, sbody, env),

        (
            past::Stmt::For {
                iter, lo, hi, body, ..
            },
            lir::Stmt::ForAll {
                iter: sym,
                hi: shi,
                body: sbody,
                ..
            },
        ) => {
            env.unify(iter, sym)
                && match_lo_zero(lo)
                && match_affine(hi, shi, env)
                && match_body(body, sbody, env)
        }

        (past::Stmt::Pass { .. }, lir::Stmt::Pass { .. }) => true,

        (past::Stmt::Call { name, args, .. }, lir::Stmt::Call { proc, args: sargs, .. }) => {
            (name == "_" || *name == proc.name)
                && args.len() == sargs.len()
                && args.iter().zip(sargs).all(|(p, a)| match_affine(p, a, env))
        }

        (
            past::Stmt::WriteConfig { config, field, .. },
            lir::Stmt::WriteConfig {
                config: scfg,
                field: sfield,
                ..
            },
        ) => (config == "_" || config == scfg.name()) && (field == "_" || field == sfield),

        _ => false,
    }
}

/// Loop patterns are written `for i in par(0, n)`; the lower bound of a
/// `ForAll` is implicitly zero, so only a literal zero or a hole matches.
fn match_lo_zero(lo: &past::Expr) -> bool {
    match lo {
        past::Expr::EHole { .. } => true,
        past::Expr::Const {
            val: uast::Lit::Int(0), ..
        } => true,
        _ => false,
    }
}

fn match_body(pattern: &[past::Stmt], body: &lir::Stmt, env: &mut MatchEnv) -> bool {
    let run = lir::spine(body);
    match_block(pattern, &run, env)
}

pub(crate) fn match_value(pattern: &past::Expr, e: &lir::Expr, env: &mut MatchEnv) -> bool {
    match (pattern, e) {
        (past::Expr::EHole { .. }, _) => true,

        (past::Expr::Read { name, idx, .. }, lir::Expr::Read { name: sym, idx: sidx, .. }) => {
            env.unify(name, sym)
                && idx.len() == sidx.len()
                && idx.iter().zip(sidx).all(|(p, a)| match_affine(p, a, env))
        }

        (past::Expr::Const { val, .. }, lir::Expr::Const { val: sval, .. }) => match val {
            uast::Lit::Int(v) => (*v as f64) == *sval,
            uast::Lit::Float(v) => v == sval,
            uast::Lit::Bool(_) => false,
        },

        (
            past::Expr::BinOp { op, lhs, rhs, .. },
            lir::Expr::BinOp {
                op: sop,
                lhs: slhs,
                rhs: srhs,
                ..
            },
        ) => {
            let op_matches = matches!(
                (op, sop),
                (uast::BinOp::Add, lir::Op::Add)
                    | (uast::BinOp::Sub, lir::Op::Sub)
                    | (uast::BinOp::Mul, lir::Op::Mul)
                    | (uast::BinOp::Div, lir::Op::Div)
            );
            op_matches && match_value(lhs, slhs, env) && match_value(rhs, srhs, env)
        }

        (past::Expr::BuiltIn { .. }, lir::Expr::Select { .. }) => false,

        (
            past::Expr::ReadConfig { config, field, .. },
            lir::Expr::ReadConfig {
                config: scfg,
                field: sfield,
                ..
            },
        ) => (config == "_" || config == scfg.name()) && (field == "_" || field == sfield),

        _ => false,
    }
}

pub(crate) fn match_affine(pattern: &past::Expr, a: &lir::AExpr, env: &mut MatchEnv) -> bool {
    match (pattern, a) {
        (past::Expr::EHole { .. }, _) => true,

        (past::Expr::Read { name, idx, .. }, lir::AExpr::Var { name: sym, .. } | lir::AExpr::Size { name: sym, .. }) => {
            idx.is_empty() && env.unify(name, sym)
        }

        (
            past::Expr::Const {
                val: uast::Lit::Int(v), ..
            },
            lir::AExpr::Const { val, .. },
        ) => v == val,

        (
            past::Expr::BinOp {
                op: uast::BinOp::Add,
                lhs,
                rhs,
                ..
            },
            lir::AExpr::Add {
                lhs: slhs, rhs: srhs, ..
            },
        )
        | (
            past::Expr::BinOp {
                op: uast::BinOp::Sub,
                lhs,
                rhs,
                ..
            },
            lir::AExpr::Sub {
                lhs: slhs, rhs: srhs, ..
            },
        ) => match_affine(lhs, slhs, env) && match_affine(rhs, srhs, env),

        // k * e (either operand order) matches a constant scale
        (
            past::Expr::BinOp {
                op: uast::BinOp::Mul,
                lhs,
                rhs,
                ..
            },
            lir::AExpr::Scale { coeff, e, .. },
        ) => {
            (matches_const(lhs, *coeff) && match_affine(rhs, e, env))
                || (matches_const(rhs, *coeff) && match_affine(lhs, e, env))
        }

        // e / k matches the symbolic ceiling division
        (
            past::Expr::BinOp {
                op: uast::BinOp::Div | uast::BinOp::FloorDiv,
                lhs,
                rhs,
                ..
            },
            lir::AExpr::ScaleDiv { e, quot, .. },
        ) => matches_const(rhs, *quot) && match_affine(lhs, e, env),

        _ => false,
    }
}

fn matches_const(pattern: &past::Expr, val: i64) -> bool {
    matches!(
        pattern,
        past::Expr::Const { val: uast::Lit::Int(v), .. } if *v == val
    ) || matches!(pattern, past::Expr::EHole { .. })
}

pub(crate) fn match_pred(pattern: &past::Expr, p: &lir::Pred, env: &mut MatchEnv) -> bool {
    match (pattern, p) {
        (past::Expr::EHole { .. }, _) => true,

        (
            past::Expr::BinOp {
                op: uast::BinOp::And,
                lhs,
                rhs,
                ..
            },
            lir::Pred::And {
                lhs: slhs, rhs: srhs, ..
            },
        )
        | (
            past::Expr::BinOp {
                op: uast::BinOp::Or,
                lhs,
                rhs,
                ..
            },
            lir::Pred::Or {
                lhs: slhs, rhs: srhs, ..
            },
        ) => match_pred(lhs, slhs, env) && match_pred(rhs, srhs, env),

        (
            past::Expr::BinOp { op, lhs, rhs, .. },
            lir::Pred::Cmp {
                op: sop,
                lhs: slhs,
                rhs: srhs,
                ..
            },
        ) => {
            let op_matches = matches!(
                (op, sop),
                (uast::BinOp::Lt, lir::CmpOp::Lt)
                    | (uast::BinOp::Gt, lir::CmpOp::Gt)
                    | (uast::BinOp::Le, lir::CmpOp::Le)
                    | (uast::BinOp::Ge, lir::CmpOp::Ge)
                    | (uast::BinOp::Eq, lir::CmpOp::Eq)
                    | (uast::BinOp::Ne, lir::CmpOp::Ne)
            );
            op_matches && match_affine(lhs, slhs, env) && match_affine(rhs, srhs, env)
        }

        _ => false,
    }
}
