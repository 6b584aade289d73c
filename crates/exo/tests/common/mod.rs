//! Shared helpers for the integration tests: terse LoopIR builders and a
//! miniature reference interpreter used by the split-semantics property.
#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use exo::{SrcInfo, Sym, loop_ir as lir};

pub fn span() -> SrcInfo {
    SrcInfo {
        file: Arc::from("test"),
        line: 1,
        col: 1,
        end_line: 1,
        end_col: 1,
    }
}

/// A span distinguishable from [`span`], for forwarding tests.
pub fn span_at(line: u32) -> SrcInfo {
    SrcInfo {
        file: Arc::from("test"),
        line,
        col: 1,
        end_line: line,
        end_col: 1,
    }
}

// ----- affine expressions

pub fn avar(s: &Sym) -> lir::AExpr {
    lir::AExpr::Var {
        name: s.clone(),
        srcinfo: span(),
    }
}

pub fn asize(s: &Sym) -> lir::AExpr {
    lir::AExpr::Size {
        name: s.clone(),
        srcinfo: span(),
    }
}

pub fn aconst(val: i64) -> lir::AExpr {
    lir::AExpr::Const { val, srcinfo: span() }
}

pub fn aadd(lhs: lir::AExpr, rhs: lir::AExpr) -> lir::AExpr {
    lir::AExpr::Add {
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        srcinfo: span(),
    }
}

pub fn asub(lhs: lir::AExpr, rhs: lir::AExpr) -> lir::AExpr {
    lir::AExpr::Sub {
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        srcinfo: span(),
    }
}

pub fn ascale(coeff: i64, e: lir::AExpr) -> lir::AExpr {
    lir::AExpr::Scale {
        coeff,
        e: Box::new(e),
        srcinfo: span(),
    }
}

pub fn ascalediv(e: lir::AExpr, quot: i64) -> lir::AExpr {
    lir::AExpr::ScaleDiv {
        e: Box::new(e),
        quot,
        srcinfo: span(),
    }
}

// ----- value expressions

pub fn read(s: &Sym, idx: Vec<lir::AExpr>) -> lir::Expr {
    lir::Expr::Read {
        name: s.clone(),
        idx,
        srcinfo: span(),
    }
}

pub fn fconst(val: f64) -> lir::Expr {
    lir::Expr::Const { val, srcinfo: span() }
}

pub fn binop(op: lir::Op, lhs: lir::Expr, rhs: lir::Expr) -> lir::Expr {
    lir::Expr::BinOp {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        srcinfo: span(),
    }
}

pub fn cmp(op: lir::CmpOp, lhs: lir::AExpr, rhs: lir::AExpr) -> lir::Pred {
    lir::Pred::Cmp {
        op,
        lhs,
        rhs,
        srcinfo: span(),
    }
}

// ----- statements

pub fn assign(s: &Sym, idx: Vec<lir::AExpr>, rhs: lir::Expr) -> lir::Stmt {
    lir::Stmt::Assign {
        name: s.clone(),
        idx,
        rhs,
        srcinfo: span(),
    }
}

pub fn reduce(s: &Sym, idx: Vec<lir::AExpr>, rhs: lir::Expr) -> lir::Stmt {
    lir::Stmt::Reduce {
        name: s.clone(),
        idx,
        rhs,
        srcinfo: span(),
    }
}

pub fn alloc(s: &Sym, shape: Vec<lir::AExpr>) -> lir::Stmt {
    lir::Stmt::Alloc {
        name: s.clone(),
        shape,
        srcinfo: span(),
    }
}

pub fn forall(iter: &Sym, hi: lir::AExpr, body: lir::Stmt) -> lir::Stmt {
    lir::Stmt::ForAll {
        iter: iter.clone(),
        hi,
        body: Box::new(body),
        srcinfo: span(),
    }
}

pub fn if_stmt(cond: lir::Pred, body: lir::Stmt) -> lir::Stmt {
    lir::Stmt::If {
        cond,
        body: Box::new(body),
        srcinfo: span(),
    }
}

pub fn pass() -> lir::Stmt {
    lir::Stmt::Pass { srcinfo: span() }
}

pub fn seq(stmts: Vec<lir::Stmt>) -> lir::Stmt {
    lir::seq_of(stmts)
}

pub fn proc(name: &str, sizes: Vec<Sym>, args: Vec<Sym>, body: lir::Stmt) -> lir::Proc {
    lir::Proc {
        name: name.to_owned(),
        sizes,
        args: args
            .into_iter()
            .map(|name| lir::FnArg { name, srcinfo: span() })
            .collect(),
        body,
        instr: None,
        srcinfo: span(),
    }
}

// --------------------------------------------------------------------------
// Miniature reference interpreter
//
// Buffers are one-dimensional f64 vectors keyed by symbol id. Out-of-range
// accesses follow masked-iteration semantics: a write outside the buffer is
// skipped and a read outside it yields zero, which is what a split loop with
// a ceiling-division bound produces on its final partial iteration.

pub type Buffers = HashMap<u32, Vec<f64>>;

pub fn interpret(p: &lir::Proc, sizes: &[(&Sym, i64)], buffers: &mut Buffers) {
    let mut env: HashMap<u32, i64> = sizes.iter().map(|(s, v)| (s.id(), *v)).collect();
    exec(&p.body, &mut env, buffers);
}

fn exec(s: &lir::Stmt, env: &mut HashMap<u32, i64>, bufs: &mut Buffers) {
    match s {
        lir::Stmt::Seq { s0, s1, .. } => {
            exec(s0, env, bufs);
            exec(s1, env, bufs);
        }
        lir::Stmt::If { cond, body, .. } => {
            if eval_pred(cond, env) {
                exec(body, env, bufs);
            }
        }
        lir::Stmt::ForAll { iter, hi, body, .. } => {
            let n = eval_aexpr(hi, env);
            for v in 0..n {
                env.insert(iter.id(), v);
                exec(body, env, bufs);
            }
            env.remove(&iter.id());
        }
        lir::Stmt::Alloc { name, shape, .. } => {
            let len = shape.iter().map(|d| eval_aexpr(d, env)).product::<i64>().max(1);
            bufs.insert(name.id(), vec![0.0; usize::try_from(len).expect("alloc size")]);
        }
        lir::Stmt::Assign { name, idx, rhs, .. } => {
            let val = eval_expr(rhs, env, bufs);
            store(name.id(), idx, env, bufs, val, false);
        }
        lir::Stmt::Reduce { name, idx, rhs, .. } => {
            let val = eval_expr(rhs, env, bufs);
            store(name.id(), idx, env, bufs, val, true);
        }
        lir::Stmt::Pass { .. } => {}
        other => panic!("reference interpreter does not model: {other}"),
    }
}

fn store(buf: u32, idx: &[lir::AExpr], env: &HashMap<u32, i64>, bufs: &mut Buffers, val: f64, reduce: bool) {
    let i = match idx {
        [] => 0,
        [e] => eval_aexpr(e, env),
        _ => panic!("reference interpreter buffers are one-dimensional"),
    };
    let buffer = bufs.get_mut(&buf).expect("write to unallocated buffer");
    let Ok(i) = usize::try_from(i) else { return };
    if let Some(cell) = buffer.get_mut(i) {
        if reduce {
            *cell += val;
        } else {
            *cell = val;
        }
    }
}

fn eval_expr(e: &lir::Expr, env: &HashMap<u32, i64>, bufs: &Buffers) -> f64 {
    match e {
        lir::Expr::Read { name, idx, .. } => {
            if idx.is_empty() {
                if let Some(v) = env.get(&name.id()) {
                    return *v as f64;
                }
            }
            let i = match idx.as_slice() {
                [] => 0,
                [e] => eval_aexpr(e, env),
                _ => panic!("reference interpreter buffers are one-dimensional"),
            };
            let buffer = bufs.get(&name.id()).expect("read from unallocated buffer");
            usize::try_from(i)
                .ok()
                .and_then(|i| buffer.get(i))
                .copied()
                .unwrap_or(0.0)
        }
        lir::Expr::Const { val, .. } => *val,
        lir::Expr::BinOp { op, lhs, rhs, .. } => {
            let a = eval_expr(lhs, env, bufs);
            let b = eval_expr(rhs, env, bufs);
            match op {
                lir::Op::Add => a + b,
                lir::Op::Sub => a - b,
                lir::Op::Mul => a * b,
                lir::Op::Div => a / b,
            }
        }
        lir::Expr::Select { cond, body, .. } => {
            if eval_pred(cond, env) {
                eval_expr(body, env, bufs)
            } else {
                0.0
            }
        }
        lir::Expr::ReadConfig { .. } => panic!("reference interpreter does not model configs"),
    }
}

fn eval_pred(p: &lir::Pred, env: &HashMap<u32, i64>) -> bool {
    match p {
        lir::Pred::Cmp { op, lhs, rhs, .. } => {
            let a = eval_aexpr(lhs, env);
            let b = eval_aexpr(rhs, env);
            match op {
                lir::CmpOp::Lt => a < b,
                lir::CmpOp::Gt => a > b,
                lir::CmpOp::Le => a <= b,
                lir::CmpOp::Ge => a >= b,
                lir::CmpOp::Eq => a == b,
                lir::CmpOp::Ne => a != b,
            }
        }
        lir::Pred::And { lhs, rhs, .. } => eval_pred(lhs, env) && eval_pred(rhs, env),
        lir::Pred::Or { lhs, rhs, .. } => eval_pred(lhs, env) || eval_pred(rhs, env),
    }
}

fn eval_aexpr(a: &lir::AExpr, env: &HashMap<u32, i64>) -> i64 {
    match a {
        lir::AExpr::Var { name, .. } | lir::AExpr::Size { name, .. } => {
            *env.get(&name.id()).unwrap_or_else(|| panic!("unbound symbol {name}"))
        }
        lir::AExpr::Const { val, .. } => *val,
        lir::AExpr::Scale { coeff, e, .. } => coeff * eval_aexpr(e, env),
        // the symbolic scale-divide denotes a ceiling division
        lir::AExpr::ScaleDiv { e, quot, .. } => {
            let v = eval_aexpr(e, env);
            v.div_euclid(*quot) + i64::from(v.rem_euclid(*quot) != 0)
        }
        lir::AExpr::Add { lhs, rhs, .. } => eval_aexpr(lhs, env) + eval_aexpr(rhs, env),
        lir::AExpr::Sub { lhs, rhs, .. } => eval_aexpr(lhs, env) - eval_aexpr(rhs, env),
    }
}
