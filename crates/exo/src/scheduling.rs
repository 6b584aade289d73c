//! Name-descriptor search and the scheduling primitives.
//!
//! Every primitive consumes a procedure and returns a new one; none mutates
//! in place, and every inapplicable rewrite raises a [`SchedulingError`]
//! anchored at the offending statement where one exists. The primitives are
//! purely structural — dependency safety is the caller's responsibility.

use std::sync::LazyLock;

use ahash::AHashMap;
use regex::Regex;

use crate::{
    config::Config,
    error::SchedulingError,
    loop_ir::{self as lir, AExpr, Pred, Stmt},
    past,
    pattern::{self, Step},
    srcinfo::SrcInfo,
    sym::Sym,
    uast,
};

// --------------------------------------------------------------------------
// Finding names
//
// descriptor grammar:
//
//     single ::= name | name[k]          -- k is 1-based
//     pair   ::= single > single         -- outer > inner

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\w+)").expect("static regex"));
static IDX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([0-9_]+)\]").expect("static regex"));

fn parse_descriptor(desc: &str) -> Result<(String, Option<usize>), SchedulingError> {
    let name = NAME_RE
        .captures(desc.trim())
        .and_then(|c| c.get(1))
        .ok_or_else(|| SchedulingError::new(format!("malformed name descriptor: '{desc}'")))?
        .as_str()
        .to_owned();
    let idx = match IDX_RE.captures(desc) {
        Some(c) => {
            let digits = c[1].replace('_', "");
            let k = digits
                .parse::<usize>()
                .map_err(|_| SchedulingError::new(format!("malformed descriptor index in '{desc}'")))?;
            if k == 0 {
                return Err(SchedulingError::new(format!(
                    "descriptor index must be at least 1: '{desc}'"
                )));
            }
            Some(k)
        }
        None => None,
    };
    Ok((name, idx))
}

/// Every defining occurrence of a symbol spelled `name`: sizes, arguments,
/// then allocations and loop iterators in a preorder walk of the body.
/// With `[k]` only the k-th occurrence is returned and fewer than `k`
/// occurrences is an error; without it an empty result is allowed.
pub fn name_symbols(proc: &lir::Proc, desc: &str) -> Result<Vec<Sym>, SchedulingError> {
    let (name, idx) = parse_descriptor(desc)?;

    let mut syms = Vec::new();
    for sz in &proc.sizes {
        if sz.name() == name {
            syms.push(sz.clone());
        }
    }
    for arg in &proc.args {
        if arg.name.name() == name {
            syms.push(arg.name.clone());
        }
    }
    find_sym_stmt(&proc.body, &name, &mut syms);

    match idx {
        Some(k) => {
            if syms.len() < k {
                Err(SchedulingError::new(format!(
                    "found only {} defining occurrence(s) of '{name}', needed {k}",
                    syms.len()
                )))
            } else {
                Ok(vec![syms[k - 1].clone()])
            }
        }
        None => Ok(syms),
    }
}

fn find_sym_stmt(s: &Stmt, name: &str, out: &mut Vec<Sym>) {
    match s {
        Stmt::Seq { s0, s1, .. } => {
            find_sym_stmt(s0, name, out);
            find_sym_stmt(s1, name, out);
        }
        Stmt::If { body, .. } => find_sym_stmt(body, name, out),
        Stmt::Alloc { name: sym, .. } => {
            if sym.name() == name {
                out.push(sym.clone());
            }
        }
        Stmt::ForAll { iter, body, .. } => {
            if iter.name() == name {
                out.push(iter.clone());
            }
            find_sym_stmt(body, name, out);
        }
        _ => {}
    }
}

/// All `(outer, inner)` loop-iterator pairs matching `out_desc > in_desc`.
///
/// An outer loop opens only while no outer match is active; inner
/// occurrences are recorded under the active outer; descent then continues
/// unconditionally, so shadowed re-uses of the outer name each open in turn.
/// The `[k]` indices count occurrences in visit order, independently for the
/// outer and inner streams.
pub fn name_pairs(proc: &lir::Proc, out_desc: &str, in_desc: &str) -> Result<Vec<(Sym, Sym)>, SchedulingError> {
    let (out_name, out_idx) = parse_descriptor(out_desc)?;
    let (in_name, in_idx) = parse_descriptor(in_desc)?;

    struct Search<'a> {
        out_name: &'a str,
        in_name: &'a str,
        out_idx: Option<usize>,
        in_idx: Option<usize>,
        out_cnt: usize,
        in_cnt: usize,
        pairs: Vec<(Sym, Sym)>,
    }

    fn walk(s: &Stmt, out_sym: Option<&Sym>, st: &mut Search<'_>) {
        match s {
            Stmt::Seq { s0, s1, .. } => {
                walk(s0, out_sym, st);
                walk(s1, out_sym, st);
            }
            Stmt::If { body, .. } => walk(body, out_sym, st),
            Stmt::ForAll { iter, body, .. } => {
                // first, search for the outer name
                if out_sym.is_none() && iter.name() == st.out_name {
                    st.out_cnt += 1;
                    if st.out_idx.is_none_or(|k| k == st.out_cnt) {
                        walk(body, Some(iter), st);
                    }
                // if we are inside of an outer-name match...
                } else if out_sym.is_some() && iter.name() == st.in_name {
                    st.in_cnt += 1;
                    if st.in_idx.is_none_or(|k| k == st.in_cnt) {
                        st.pairs.push((out_sym.expect("outer is set").clone(), iter.clone()));
                    }
                }
                walk(body, out_sym, st);
            }
            _ => {}
        }
    }

    let mut st = Search {
        out_name: &out_name,
        in_name: &in_name,
        out_idx,
        in_idx,
        out_cnt: 0,
        in_cnt: 0,
        pairs: Vec::new(),
    };
    walk(&proc.body, None, &mut st);

    if st.pairs.is_empty() && (out_idx.is_some() || in_idx.is_some()) {
        return Err(SchedulingError::new(format!(
            "no loop nest matching '{out_desc} > {in_desc}'"
        )));
    }
    Ok(st.pairs)
}

fn with_body(proc: &lir::Proc, body: Stmt) -> lir::Proc {
    lir::Proc {
        name: proc.name.clone(),
        sizes: proc.sizes.clone(),
        args: proc.args.clone(),
        body,
        instr: proc.instr.clone(),
        srcinfo: proc.srcinfo.clone(),
    }
}

// --------------------------------------------------------------------------
// Reorder

/// Exchanges each `ForAll(outer, ..., ForAll(inner, ..., body))` pair.
/// The loop that inherits each position keeps its own source span.
pub fn reorder_proc(proc: &lir::Proc, outer: &Sym, inner: &Sym) -> Result<lir::Proc, SchedulingError> {
    let body = reorder_s(&proc.body, outer, inner)?;
    Ok(with_body(proc, body))
}

fn reorder_s(s: &Stmt, outer: &Sym, inner: &Sym) -> Result<Stmt, SchedulingError> {
    match s {
        Stmt::Seq { s0, s1, srcinfo } => Ok(Stmt::Seq {
            s0: Box::new(reorder_s(s0, outer, inner)?),
            s1: Box::new(reorder_s(s1, outer, inner)?),
            srcinfo: srcinfo.clone(),
        }),
        Stmt::If { cond, body, srcinfo } => Ok(Stmt::If {
            cond: cond.clone(),
            body: Box::new(reorder_s(body, outer, inner)?),
            srcinfo: srcinfo.clone(),
        }),
        Stmt::ForAll {
            iter,
            hi,
            body,
            srcinfo,
        } => {
            if iter == outer {
                match &**body {
                    Stmt::ForAll {
                        iter: in_iter,
                        hi: in_hi,
                        body: in_body,
                        srcinfo: in_srcinfo,
                    } => {
                        if in_iter != inner {
                            return Err(SchedulingError::at(
                                format!(
                                    "expected loop directly inside of {outer} loop to have iteration variable {inner}"
                                ),
                                srcinfo.clone(),
                            ));
                        }
                        // wrap outer loop; now inner loop
                        let new_inner = Stmt::ForAll {
                            iter: iter.clone(),
                            hi: hi.clone(),
                            body: in_body.clone(),
                            srcinfo: srcinfo.clone(),
                        };
                        // wrap inner loop; now outer loop
                        Ok(Stmt::ForAll {
                            iter: in_iter.clone(),
                            hi: in_hi.clone(),
                            body: Box::new(new_inner),
                            srcinfo: in_srcinfo.clone(),
                        })
                    }
                    _ => Err(SchedulingError::at(
                        format!("expected loop directly inside of {outer} loop"),
                        srcinfo.clone(),
                    )),
                }
            } else {
                Ok(Stmt::ForAll {
                    iter: iter.clone(),
                    hi: hi.clone(),
                    body: Box::new(reorder_s(body, outer, inner)?),
                    srcinfo: srcinfo.clone(),
                })
            }
        }
        other => Ok(other.clone()),
    }
}

// --------------------------------------------------------------------------
// Split

/// Splits `ForAll(v, N, B)` into `ForAll(hi, N /^ q, ForAll(lo, q, B'))`
/// where `B'` replaces every affine occurrence of `v` (both `Var` and `Size`
/// positions) by `q*hi + lo`, and `/^` is the symbolic ceiling division.
///
/// Substitution into `Size` positions assumes a well-typed input; no guard
/// is attempted for a split variable occurring in a later-declared shape.
pub fn split_proc(
    proc: &lir::Proc,
    var: &Sym,
    quot: i64,
    hi_hint: &str,
    lo_hint: &str,
) -> Result<lir::Proc, SchedulingError> {
    if quot <= 0 {
        return Err(SchedulingError::new(format!(
            "split quotient must be positive, got {quot}"
        )));
    }
    let split = Split {
        var: var.clone(),
        quot,
        hi: Sym::new(hi_hint),
        lo: Sym::new(lo_hint),
    };
    let body = split.split_s(&proc.body);
    Ok(with_body(proc, body))
}

struct Split {
    var: Sym,
    quot: i64,
    hi: Sym,
    lo: Sym,
}

impl Split {
    /// `q*hi + lo`, stamped with the span of the occurrence it replaces.
    fn substitute(&self, srcinfo: &SrcInfo) -> AExpr {
        AExpr::Add {
            lhs: Box::new(AExpr::Scale {
                coeff: self.quot,
                e: Box::new(AExpr::Var {
                    name: self.hi.clone(),
                    srcinfo: srcinfo.clone(),
                }),
                srcinfo: srcinfo.clone(),
            }),
            rhs: Box::new(AExpr::Var {
                name: self.lo.clone(),
                srcinfo: srcinfo.clone(),
            }),
            srcinfo: srcinfo.clone(),
        }
    }

    fn split_s(&self, s: &Stmt) -> Stmt {
        match s {
            Stmt::Seq { s0, s1, srcinfo } => Stmt::Seq {
                s0: Box::new(self.split_s(s0)),
                s1: Box::new(self.split_s(s1)),
                srcinfo: srcinfo.clone(),
            },
            Stmt::Assign {
                name,
                idx,
                rhs,
                srcinfo,
            } => Stmt::Assign {
                name: name.clone(),
                idx: idx.iter().map(|i| self.split_a(i)).collect(),
                rhs: self.split_e(rhs),
                srcinfo: srcinfo.clone(),
            },
            Stmt::Reduce {
                name,
                idx,
                rhs,
                srcinfo,
            } => Stmt::Reduce {
                name: name.clone(),
                idx: idx.iter().map(|i| self.split_a(i)).collect(),
                rhs: self.split_e(rhs),
                srcinfo: srcinfo.clone(),
            },
            Stmt::If { cond, body, srcinfo } => Stmt::If {
                cond: self.split_p(cond),
                body: Box::new(self.split_s(body)),
                srcinfo: srcinfo.clone(),
            },
            Stmt::ForAll {
                iter,
                hi,
                body,
                srcinfo,
            } => {
                let body = self.split_s(body);
                let hi = self.split_a(hi);
                if *iter == self.var {
                    // construct the lo loop first and feed it the body
                    let lo_loop = Stmt::ForAll {
                        iter: self.lo.clone(),
                        hi: AExpr::Const {
                            val: self.quot,
                            srcinfo: srcinfo.clone(),
                        },
                        body: Box::new(body),
                        srcinfo: srcinfo.clone(),
                    };
                    let div = AExpr::ScaleDiv {
                        e: Box::new(hi),
                        quot: self.quot,
                        srcinfo: srcinfo.clone(),
                    };
                    Stmt::ForAll {
                        iter: self.hi.clone(),
                        hi: div,
                        body: Box::new(lo_loop),
                        srcinfo: srcinfo.clone(),
                    }
                } else {
                    Stmt::ForAll {
                        iter: iter.clone(),
                        hi,
                        body: Box::new(body),
                        srcinfo: srcinfo.clone(),
                    }
                }
            }
            Stmt::Alloc { name, shape, srcinfo } => Stmt::Alloc {
                name: name.clone(),
                shape: shape.iter().map(|d| self.split_a(d)).collect(),
                srcinfo: srcinfo.clone(),
            },
            Stmt::Call { proc, args, srcinfo } => Stmt::Call {
                proc: proc.clone(),
                args: args.iter().map(|a| self.split_a(a)).collect(),
                srcinfo: srcinfo.clone(),
            },
            Stmt::WriteConfig {
                config,
                field,
                rhs,
                srcinfo,
            } => Stmt::WriteConfig {
                config: config.clone(),
                field: field.clone(),
                rhs: self.split_e(rhs),
                srcinfo: srcinfo.clone(),
            },
            Stmt::Pass { srcinfo } => Stmt::Pass {
                srcinfo: srcinfo.clone(),
            },
        }
    }

    fn split_e(&self, e: &lir::Expr) -> lir::Expr {
        match e {
            lir::Expr::Read { name, idx, srcinfo } => {
                // a bare read of the split iterator in value position is an
                // affine occurrence too: expand it to q*hi + lo directly
                if *name == self.var && idx.is_empty() {
                    return lir::Expr::BinOp {
                        op: lir::Op::Add,
                        lhs: Box::new(lir::Expr::BinOp {
                            op: lir::Op::Mul,
                            lhs: Box::new(lir::Expr::Const {
                                val: self.quot as f64,
                                srcinfo: srcinfo.clone(),
                            }),
                            rhs: Box::new(lir::Expr::Read {
                                name: self.hi.clone(),
                                idx: Vec::new(),
                                srcinfo: srcinfo.clone(),
                            }),
                            srcinfo: srcinfo.clone(),
                        }),
                        rhs: Box::new(lir::Expr::Read {
                            name: self.lo.clone(),
                            idx: Vec::new(),
                            srcinfo: srcinfo.clone(),
                        }),
                        srcinfo: srcinfo.clone(),
                    };
                }
                lir::Expr::Read {
                    name: name.clone(),
                    idx: idx.iter().map(|i| self.split_a(i)).collect(),
                    srcinfo: srcinfo.clone(),
                }
            }
            lir::Expr::BinOp {
                op,
                lhs,
                rhs,
                srcinfo,
            } => lir::Expr::BinOp {
                op: *op,
                lhs: Box::new(self.split_e(lhs)),
                rhs: Box::new(self.split_e(rhs)),
                srcinfo: srcinfo.clone(),
            },
            lir::Expr::Select { cond, body, srcinfo } => lir::Expr::Select {
                cond: self.split_p(cond),
                body: Box::new(self.split_e(body)),
                srcinfo: srcinfo.clone(),
            },
            other => other.clone(),
        }
    }

    fn split_a(&self, a: &AExpr) -> AExpr {
        match a {
            AExpr::Var { name, srcinfo } => {
                if *name == self.var {
                    self.substitute(srcinfo)
                } else {
                    a.clone()
                }
            }
            AExpr::Size { name, srcinfo } => {
                if *name == self.var {
                    self.substitute(srcinfo)
                } else {
                    a.clone()
                }
            }
            AExpr::Scale { coeff, e, srcinfo } => AExpr::Scale {
                coeff: *coeff,
                e: Box::new(self.split_a(e)),
                srcinfo: srcinfo.clone(),
            },
            AExpr::ScaleDiv { e, quot, srcinfo } => AExpr::ScaleDiv {
                e: Box::new(self.split_a(e)),
                quot: *quot,
                srcinfo: srcinfo.clone(),
            },
            AExpr::Add { lhs, rhs, srcinfo } => AExpr::Add {
                lhs: Box::new(self.split_a(lhs)),
                rhs: Box::new(self.split_a(rhs)),
                srcinfo: srcinfo.clone(),
            },
            AExpr::Sub { lhs, rhs, srcinfo } => AExpr::Sub {
                lhs: Box::new(self.split_a(lhs)),
                rhs: Box::new(self.split_a(rhs)),
                srcinfo: srcinfo.clone(),
            },
            AExpr::Const { .. } => a.clone(),
        }
    }

    fn split_p(&self, p: &Pred) -> Pred {
        match p {
            Pred::Cmp {
                op,
                lhs,
                rhs,
                srcinfo,
            } => Pred::Cmp {
                op: *op,
                lhs: self.split_a(lhs),
                rhs: self.split_a(rhs),
                srcinfo: srcinfo.clone(),
            },
            Pred::And { lhs, rhs, srcinfo } => Pred::And {
                lhs: Box::new(self.split_p(lhs)),
                rhs: Box::new(self.split_p(rhs)),
                srcinfo: srcinfo.clone(),
            },
            Pred::Or { lhs, rhs, srcinfo } => Pred::Or {
                lhs: Box::new(self.split_p(lhs)),
                rhs: Box::new(self.split_p(rhs)),
                srcinfo: srcinfo.clone(),
            },
        }
    }
}

// --------------------------------------------------------------------------
// Symbol substitution (used by unroll, inline, partial_eval)

/// Capture-avoiding symbol substitution: `rename` maps binder symbols to
/// fresh ones, `exprs` maps parameter symbols to replacement affine terms.
#[derive(Default)]
pub(crate) struct SymSubst {
    rename: AHashMap<u32, Sym>,
    exprs: AHashMap<u32, AExpr>,
}

impl SymSubst {
    pub(crate) fn rename(&mut self, from: &Sym, to: Sym) {
        self.rename.insert(from.id(), to);
    }

    pub(crate) fn map_expr(&mut self, from: &Sym, to: AExpr) {
        self.exprs.insert(from.id(), to);
    }

    /// Resolves a name position (a buffer or iterator being defined or
    /// written). A parameter mapped to a non-variable term cannot stand in a
    /// name position.
    fn subst_name(&self, name: &Sym, srcinfo: &SrcInfo) -> Result<Sym, SchedulingError> {
        if let Some(fresh) = self.rename.get(&name.id()) {
            return Ok(fresh.clone());
        }
        match self.exprs.get(&name.id()) {
            None => Ok(name.clone()),
            Some(AExpr::Var { name: sym, .. } | AExpr::Size { name: sym, .. }) => Ok(sym.clone()),
            Some(_) => Err(SchedulingError::at(
                format!("buffer '{name}' must be bound to a plain variable"),
                srcinfo.clone(),
            )),
        }
    }

    pub(crate) fn subst_stmt(&self, s: &Stmt) -> Result<Stmt, SchedulingError> {
        Ok(match s {
            Stmt::Seq { s0, s1, srcinfo } => Stmt::Seq {
                s0: Box::new(self.subst_stmt(s0)?),
                s1: Box::new(self.subst_stmt(s1)?),
                srcinfo: srcinfo.clone(),
            },
            Stmt::Assign {
                name,
                idx,
                rhs,
                srcinfo,
            } => Stmt::Assign {
                name: self.subst_name(name, srcinfo)?,
                idx: idx.iter().map(|i| self.subst_aexpr(i)).collect(),
                rhs: self.subst_expr(rhs)?,
                srcinfo: srcinfo.clone(),
            },
            Stmt::Reduce {
                name,
                idx,
                rhs,
                srcinfo,
            } => Stmt::Reduce {
                name: self.subst_name(name, srcinfo)?,
                idx: idx.iter().map(|i| self.subst_aexpr(i)).collect(),
                rhs: self.subst_expr(rhs)?,
                srcinfo: srcinfo.clone(),
            },
            Stmt::If { cond, body, srcinfo } => Stmt::If {
                cond: self.subst_pred(cond),
                body: Box::new(self.subst_stmt(body)?),
                srcinfo: srcinfo.clone(),
            },
            Stmt::ForAll {
                iter,
                hi,
                body,
                srcinfo,
            } => Stmt::ForAll {
                iter: self.subst_name(iter, srcinfo)?,
                hi: self.subst_aexpr(hi),
                body: Box::new(self.subst_stmt(body)?),
                srcinfo: srcinfo.clone(),
            },
            Stmt::Alloc { name, shape, srcinfo } => Stmt::Alloc {
                name: self.subst_name(name, srcinfo)?,
                shape: shape.iter().map(|d| self.subst_aexpr(d)).collect(),
                srcinfo: srcinfo.clone(),
            },
            Stmt::Call { proc, args, srcinfo } => Stmt::Call {
                proc: proc.clone(),
                args: args.iter().map(|a| self.subst_aexpr(a)).collect(),
                srcinfo: srcinfo.clone(),
            },
            Stmt::WriteConfig {
                config,
                field,
                rhs,
                srcinfo,
            } => Stmt::WriteConfig {
                config: config.clone(),
                field: field.clone(),
                rhs: self.subst_expr(rhs)?,
                srcinfo: srcinfo.clone(),
            },
            Stmt::Pass { srcinfo } => Stmt::Pass {
                srcinfo: srcinfo.clone(),
            },
        })
    }

    fn subst_expr(&self, e: &lir::Expr) -> Result<lir::Expr, SchedulingError> {
        Ok(match e {
            lir::Expr::Read { name, idx, srcinfo } => {
                // a value-position read of a substituted index symbol expands
                // into value arithmetic rather than a renamed buffer read
                if idx.is_empty() {
                    if let Some(replacement) = self.exprs.get(&name.id()) {
                        if !matches!(replacement, AExpr::Var { .. } | AExpr::Size { .. }) {
                            return Ok(aexpr_to_expr(replacement));
                        }
                    }
                }
                lir::Expr::Read {
                    name: self.subst_name(name, srcinfo)?,
                    idx: idx.iter().map(|i| self.subst_aexpr(i)).collect(),
                    srcinfo: srcinfo.clone(),
                }
            }
            lir::Expr::BinOp {
                op,
                lhs,
                rhs,
                srcinfo,
            } => lir::Expr::BinOp {
                op: *op,
                lhs: Box::new(self.subst_expr(lhs)?),
                rhs: Box::new(self.subst_expr(rhs)?),
                srcinfo: srcinfo.clone(),
            },
            lir::Expr::Select { cond, body, srcinfo } => lir::Expr::Select {
                cond: self.subst_pred(cond),
                body: Box::new(self.subst_expr(body)?),
                srcinfo: srcinfo.clone(),
            },
            other => other.clone(),
        })
    }

    fn subst_pred(&self, p: &Pred) -> Pred {
        match p {
            Pred::Cmp {
                op,
                lhs,
                rhs,
                srcinfo,
            } => Pred::Cmp {
                op: *op,
                lhs: self.subst_aexpr(lhs),
                rhs: self.subst_aexpr(rhs),
                srcinfo: srcinfo.clone(),
            },
            Pred::And { lhs, rhs, srcinfo } => Pred::And {
                lhs: Box::new(self.subst_pred(lhs)),
                rhs: Box::new(self.subst_pred(rhs)),
                srcinfo: srcinfo.clone(),
            },
            Pred::Or { lhs, rhs, srcinfo } => Pred::Or {
                lhs: Box::new(self.subst_pred(lhs)),
                rhs: Box::new(self.subst_pred(rhs)),
                srcinfo: srcinfo.clone(),
            },
        }
    }

    fn subst_aexpr(&self, a: &AExpr) -> AExpr {
        match a {
            AExpr::Var { name, srcinfo } | AExpr::Size { name, srcinfo } => {
                if let Some(fresh) = self.rename.get(&name.id()) {
                    return AExpr::Var {
                        name: fresh.clone(),
                        srcinfo: srcinfo.clone(),
                    };
                }
                match self.exprs.get(&name.id()) {
                    Some(replacement) => replacement.clone(),
                    None => a.clone(),
                }
            }
            AExpr::Scale { coeff, e, srcinfo } => AExpr::Scale {
                coeff: *coeff,
                e: Box::new(self.subst_aexpr(e)),
                srcinfo: srcinfo.clone(),
            },
            AExpr::ScaleDiv { e, quot, srcinfo } => AExpr::ScaleDiv {
                e: Box::new(self.subst_aexpr(e)),
                quot: *quot,
                srcinfo: srcinfo.clone(),
            },
            AExpr::Add { lhs, rhs, srcinfo } => AExpr::Add {
                lhs: Box::new(self.subst_aexpr(lhs)),
                rhs: Box::new(self.subst_aexpr(rhs)),
                srcinfo: srcinfo.clone(),
            },
            AExpr::Sub { lhs, rhs, srcinfo } => AExpr::Sub {
                lhs: Box::new(self.subst_aexpr(lhs)),
                rhs: Box::new(self.subst_aexpr(rhs)),
                srcinfo: srcinfo.clone(),
            },
            AExpr::Const { .. } => a.clone(),
        }
    }
}

// --------------------------------------------------------------------------
// Unroll

/// Replaces a constant-bound loop by its body repeated once per iteration
/// with the iterator substituted; a zero-trip loop becomes `Pass`.
pub fn unroll_proc(proc: &lir::Proc, var: &Sym) -> Result<lir::Proc, SchedulingError> {
    let body = unroll_s(&proc.body, var)?;
    Ok(with_body(proc, body))
}

fn unroll_s(s: &Stmt, var: &Sym) -> Result<Stmt, SchedulingError> {
    match s {
        Stmt::Seq { s0, s1, srcinfo } => Ok(Stmt::Seq {
            s0: Box::new(unroll_s(s0, var)?),
            s1: Box::new(unroll_s(s1, var)?),
            srcinfo: srcinfo.clone(),
        }),
        Stmt::If { cond, body, srcinfo } => Ok(Stmt::If {
            cond: cond.clone(),
            body: Box::new(unroll_s(body, var)?),
            srcinfo: srcinfo.clone(),
        }),
        Stmt::ForAll {
            iter,
            hi,
            body,
            srcinfo,
        } => {
            let body = unroll_s(body, var)?;
            if iter != var {
                return Ok(Stmt::ForAll {
                    iter: iter.clone(),
                    hi: hi.clone(),
                    body: Box::new(body),
                    srcinfo: srcinfo.clone(),
                });
            }
            let AExpr::Const { val: trips, .. } = hi else {
                return Err(SchedulingError::at(
                    format!("can only unroll loops with constant bounds, loop over {iter} has a symbolic bound"),
                    srcinfo.clone(),
                ));
            };
            if *trips <= 0 {
                return Ok(Stmt::Pass {
                    srcinfo: srcinfo.clone(),
                });
            }
            let mut copies = Vec::with_capacity(usize::try_from(*trips).unwrap_or(0));
            for k in 0..*trips {
                let mut subst = SymSubst::default();
                subst.map_expr(
                    iter,
                    AExpr::Const {
                        val: k,
                        srcinfo: srcinfo.clone(),
                    },
                );
                copies.push(subst.subst_stmt(&body)?);
            }
            Ok(lir::seq_of(copies))
        }
        other => Ok(other.clone()),
    }
}

// --------------------------------------------------------------------------
// Path plumbing shared by the pattern-directed primitives

fn single_stmt_pattern(pattern_src: &str) -> Result<past::Stmt, SchedulingError> {
    let parsed = crate::parse::pattern(pattern_src)
        .map_err(|e| SchedulingError::new(format!("invalid pattern '{pattern_src}': {e}")))?;
    match parsed {
        past::Pattern::Stmts(stmts) => {
            let mut stmts = stmts;
            if stmts.len() != 1 {
                return Err(SchedulingError::new(format!(
                    "expected a single-statement pattern, got {} statements",
                    stmts.len()
                )));
            }
            Ok(stmts.pop().expect("length checked"))
        }
        past::Pattern::Expr(_) => Err(SchedulingError::new(format!(
            "expected a statement pattern, '{pattern_src}' is an expression"
        ))),
    }
}

fn locate(proc: &lir::Proc, pattern_src: &str) -> Result<Vec<Step>, SchedulingError> {
    let stmt_pattern = single_stmt_pattern(pattern_src)?;
    pattern::find_first_path(&stmt_pattern, &proc.body)
        .ok_or_else(|| SchedulingError::new(format!("no statement matching '{pattern_src}'")))
}

fn get_at<'a>(s: &'a Stmt, path: &[Step]) -> &'a Stmt {
    match path.first() {
        None => s,
        Some(step) => match (step, s) {
            (Step::Seq0, Stmt::Seq { s0, .. }) => get_at(s0, &path[1..]),
            (Step::Seq1, Stmt::Seq { s1, .. }) => get_at(s1, &path[1..]),
            (Step::IfBody, Stmt::If { body, .. }) | (Step::ForBody, Stmt::ForAll { body, .. }) => {
                get_at(body, &path[1..])
            }
            _ => unreachable!("path does not match tree shape"),
        },
    }
}

fn rebuild_at(
    s: &Stmt,
    path: &[Step],
    f: &mut dyn FnMut(&Stmt) -> Result<Stmt, SchedulingError>,
) -> Result<Stmt, SchedulingError> {
    let Some(step) = path.first() else {
        return f(s);
    };
    Ok(match (step, s) {
        (Step::Seq0, Stmt::Seq { s0, s1, srcinfo }) => Stmt::Seq {
            s0: Box::new(rebuild_at(s0, &path[1..], f)?),
            s1: s1.clone(),
            srcinfo: srcinfo.clone(),
        },
        (Step::Seq1, Stmt::Seq { s0, s1, srcinfo }) => Stmt::Seq {
            s0: s0.clone(),
            s1: Box::new(rebuild_at(s1, &path[1..], f)?),
            srcinfo: srcinfo.clone(),
        },
        (Step::IfBody, Stmt::If { cond, body, srcinfo }) => Stmt::If {
            cond: cond.clone(),
            body: Box::new(rebuild_at(body, &path[1..], f)?),
            srcinfo: srcinfo.clone(),
        },
        (
            Step::ForBody,
            Stmt::ForAll {
                iter,
                hi,
                body,
                srcinfo,
            },
        ) => Stmt::ForAll {
            iter: iter.clone(),
            hi: hi.clone(),
            body: Box::new(rebuild_at(body, &path[1..], f)?),
            srcinfo: srcinfo.clone(),
        },
        _ => unreachable!("path does not match tree shape"),
    })
}

fn scopes_on(path: &[Step]) -> usize {
    path.iter().filter(|s| matches!(s, Step::IfBody | Step::ForBody)).count()
}

fn iters_on_path(body: &Stmt, path: &[Step]) -> Vec<Sym> {
    let mut iters = Vec::new();
    let mut cur = body;
    for step in path {
        match (step, cur) {
            (Step::Seq0, Stmt::Seq { s0, .. }) => cur = s0,
            (Step::Seq1, Stmt::Seq { s1, .. }) => cur = s1,
            (Step::IfBody, Stmt::If { body, .. }) => cur = body,
            (Step::ForBody, Stmt::ForAll { iter, body, .. }) => {
                iters.push(iter.clone());
                cur = body;
            }
            _ => unreachable!("path does not match tree shape"),
        }
    }
    iters
}

fn join_opt(a: Option<Stmt>, b: Option<Stmt>) -> Option<Stmt> {
    match (a, b) {
        (Some(a), Some(b)) => {
            let srcinfo = a.srcinfo().clone();
            Some(Stmt::Seq {
                s0: Box::new(a),
                s1: Box::new(b),
                srcinfo,
            })
        }
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

// --------------------------------------------------------------------------
// Fission

/// Splits the loop body at the statement matching `pattern` into two
/// siblings, lifting the cut through the innermost `n_lifts` enclosing
/// scopes by duplicating each lifted-over loop and guard.
pub fn fission_after_proc(proc: &lir::Proc, pattern_src: &str, n_lifts: usize) -> Result<lir::Proc, SchedulingError> {
    let path = locate(proc, pattern_src)?;
    let total_scopes = scopes_on(&path);

    fn go(
        s: &Stmt,
        path: &[Step],
        crossed: usize,
        total: usize,
        n_lifts: usize,
    ) -> (Option<Stmt>, Option<Stmt>) {
        let Some(step) = path.first() else {
            // the matched point itself ends the first half
            return (Some(s.clone()), None);
        };
        match (step, s) {
            (Step::Seq0, Stmt::Seq { s0, s1, .. }) => {
                let (first, second) = go(s0, &path[1..], crossed, total, n_lifts);
                (first, join_opt(second, Some((**s1).clone())))
            }
            (Step::Seq1, Stmt::Seq { s0, s1, .. }) => {
                let (first, second) = go(s1, &path[1..], crossed, total, n_lifts);
                (join_opt(Some((**s0).clone()), first), second)
            }
            (Step::IfBody, Stmt::If { cond, body, srcinfo }) => {
                let (first, second) = go(body, &path[1..], crossed + 1, total, n_lifts);
                let wrap = |b: Stmt| Stmt::If {
                    cond: cond.clone(),
                    body: Box::new(b),
                    srcinfo: srcinfo.clone(),
                };
                if total - crossed <= n_lifts {
                    (first.map(wrap), second.map(wrap))
                } else {
                    (join_opt(first, second).map(wrap), None)
                }
            }
            (
                Step::ForBody,
                Stmt::ForAll {
                    iter,
                    hi,
                    body,
                    srcinfo,
                },
            ) => {
                let (first, second) = go(body, &path[1..], crossed + 1, total, n_lifts);
                let wrap = |b: Stmt| Stmt::ForAll {
                    iter: iter.clone(),
                    hi: hi.clone(),
                    body: Box::new(b),
                    srcinfo: srcinfo.clone(),
                };
                if total - crossed <= n_lifts {
                    (first.map(&wrap), second.map(&wrap))
                } else {
                    (join_opt(first, second).map(&wrap), None)
                }
            }
            _ => unreachable!("path does not match tree shape"),
        }
    }

    let (first, second) = go(&proc.body, &path, 0, total_scopes, n_lifts);
    let body = join_opt(first, second).expect("fission cannot empty the body");
    Ok(with_body(proc, body))
}

// --------------------------------------------------------------------------
// Lift alloc

/// Hoists the allocation named by `desc` out of up to `n_lifts` enclosing
/// scopes. Lifting past a loop whose iterator occurs in the allocation's
/// shape is an error.
pub fn lift_alloc_proc(proc: &lir::Proc, desc: &str, n_lifts: usize) -> Result<lir::Proc, SchedulingError> {
    let syms = name_symbols(proc, desc)?;
    let Some(target) = syms.first() else {
        return Err(SchedulingError::new(format!("no allocation matching '{desc}'")));
    };

    let path = find_alloc_path(&proc.body, target)
        .ok_or_else(|| SchedulingError::new(format!("'{desc}' does not name an allocation statement")))?;
    let total_scopes = scopes_on(&path);

    fn go(
        s: &Stmt,
        path: &[Step],
        crossed: usize,
        total: usize,
        n_lifts: usize,
    ) -> Result<(Option<Stmt>, Option<Stmt>), SchedulingError> {
        let Some(step) = path.first() else {
            return Ok((Some(s.clone()), None));
        };
        Ok(match (step, s) {
            (Step::Seq0, Stmt::Seq { s0, s1, .. }) => {
                let (alloc, rem) = go(s0, &path[1..], crossed, total, n_lifts)?;
                (alloc, join_opt(rem, Some((**s1).clone())))
            }
            (Step::Seq1, Stmt::Seq { s0, s1, .. }) => {
                let (alloc, rem) = go(s1, &path[1..], crossed, total, n_lifts)?;
                (alloc, join_opt(Some((**s0).clone()), rem))
            }
            (Step::IfBody, Stmt::If { cond, body, srcinfo }) => {
                let (alloc, rem) = go(body, &path[1..], crossed + 1, total, n_lifts)?;
                let inner = rem.unwrap_or(Stmt::Pass {
                    srcinfo: srcinfo.clone(),
                });
                let rebuilt = |b: Stmt| Stmt::If {
                    cond: cond.clone(),
                    body: Box::new(b),
                    srcinfo: srcinfo.clone(),
                };
                match alloc {
                    Some(alloc_stmt) if total - crossed <= n_lifts => (Some(alloc_stmt), Some(rebuilt(inner))),
                    Some(alloc_stmt) => {
                        let srcinfo = alloc_stmt.srcinfo().clone();
                        let joined = Stmt::Seq {
                            s0: Box::new(alloc_stmt),
                            s1: Box::new(inner),
                            srcinfo,
                        };
                        (None, Some(rebuilt(joined)))
                    }
                    None => (None, Some(rebuilt(inner))),
                }
            }
            (
                Step::ForBody,
                Stmt::ForAll {
                    iter,
                    hi,
                    body,
                    srcinfo,
                },
            ) => {
                let (alloc, rem) = go(body, &path[1..], crossed + 1, total, n_lifts)?;
                let inner = rem.unwrap_or(Stmt::Pass {
                    srcinfo: srcinfo.clone(),
                });
                let rebuilt = |b: Stmt| Stmt::ForAll {
                    iter: iter.clone(),
                    hi: hi.clone(),
                    body: Box::new(b),
                    srcinfo: srcinfo.clone(),
                };
                match alloc {
                    Some(alloc_stmt) if total - crossed <= n_lifts => {
                        if let Stmt::Alloc { name, shape, .. } = &alloc_stmt {
                            if shape.iter().any(|d| aexpr_mentions(d, iter)) {
                                return Err(SchedulingError::at(
                                    format!(
                                        "cannot lift allocation of '{name}' out of the loop over '{iter}': \
                                         its shape mentions the iterator"
                                    ),
                                    alloc_stmt.srcinfo().clone(),
                                ));
                            }
                        }
                        (Some(alloc_stmt), Some(rebuilt(inner)))
                    }
                    Some(alloc_stmt) => {
                        let srcinfo = alloc_stmt.srcinfo().clone();
                        let joined = Stmt::Seq {
                            s0: Box::new(alloc_stmt),
                            s1: Box::new(inner),
                            srcinfo,
                        };
                        (None, Some(rebuilt(joined)))
                    }
                    None => (None, Some(rebuilt(inner))),
                }
            }
            _ => unreachable!("path does not match tree shape"),
        })
    }

    let (alloc, rem) = go(&proc.body, &path, 0, total_scopes, n_lifts)?;
    let body = match alloc {
        Some(alloc_stmt) => {
            let srcinfo = alloc_stmt.srcinfo().clone();
            let rest = rem.unwrap_or(Stmt::Pass {
                srcinfo: srcinfo.clone(),
            });
            Stmt::Seq {
                s0: Box::new(alloc_stmt),
                s1: Box::new(rest),
                srcinfo,
            }
        }
        None => rem.expect("lift cannot empty the body"),
    };
    Ok(with_body(proc, body))
}

fn find_alloc_path(body: &Stmt, target: &Sym) -> Option<Vec<Step>> {
    fn go(s: &Stmt, target: &Sym, path: &mut Vec<Step>, found: &mut Option<Vec<Step>>) {
        if found.is_some() {
            return;
        }
        match s {
            Stmt::Seq { s0, s1, .. } => {
                path.push(Step::Seq0);
                go(s0, target, path, found);
                path.pop();
                if found.is_some() {
                    return;
                }
                path.push(Step::Seq1);
                go(s1, target, path, found);
                path.pop();
            }
            Stmt::If { body, .. } => {
                path.push(Step::IfBody);
                go(body, target, path, found);
                path.pop();
            }
            Stmt::ForAll { body, .. } => {
                path.push(Step::ForBody);
                go(body, target, path, found);
                path.pop();
            }
            Stmt::Alloc { name, .. } if name == target => *found = Some(path.clone()),
            _ => {}
        }
    }
    let mut path = Vec::new();
    let mut found = None;
    go(body, target, &mut path, &mut found);
    found
}

fn aexpr_mentions(a: &AExpr, sym: &Sym) -> bool {
    match a {
        AExpr::Var { name, .. } | AExpr::Size { name, .. } => name == sym,
        AExpr::Const { .. } => false,
        AExpr::Scale { e, .. } | AExpr::ScaleDiv { e, .. } => aexpr_mentions(e, sym),
        AExpr::Add { lhs, rhs, .. } | AExpr::Sub { lhs, rhs, .. } => {
            aexpr_mentions(lhs, sym) || aexpr_mentions(rhs, sym)
        }
    }
}

// --------------------------------------------------------------------------
// Inline

/// Substitutes the callee body at the call site matching `pattern`,
/// alpha-renaming every callee-local binder to avoid capture.
pub fn inline_proc(proc: &lir::Proc, pattern_src: &str) -> Result<lir::Proc, SchedulingError> {
    let path = locate(proc, pattern_src)?;
    let body = rebuild_at(&proc.body, &path, &mut |s| {
        let Stmt::Call {
            proc: callee,
            args,
            srcinfo,
        } = s
        else {
            return Err(SchedulingError::at(
                format!("'{pattern_src}' does not match a call statement"),
                s.srcinfo().clone(),
            ));
        };
        let params: Vec<&Sym> = callee.sizes.iter().chain(callee.args.iter().map(|a| &a.name)).collect();
        if params.len() != args.len() {
            return Err(SchedulingError::at(
                format!(
                    "call to '{}' passes {} argument(s) but the procedure declares {}",
                    callee.name,
                    args.len(),
                    params.len()
                ),
                srcinfo.clone(),
            ));
        }

        let mut subst = SymSubst::default();
        for (param, actual) in params.iter().zip(args) {
            subst.map_expr(param, actual.clone());
        }
        for binder in collect_binders(&callee.body) {
            let fresh = binder.copy();
            subst.rename(&binder, fresh);
        }
        subst.subst_stmt(&callee.body)
    })?;
    Ok(with_body(proc, body))
}

fn collect_binders(s: &Stmt) -> Vec<Sym> {
    let mut out = Vec::new();
    fn go(s: &Stmt, out: &mut Vec<Sym>) {
        match s {
            Stmt::Seq { s0, s1, .. } => {
                go(s0, out);
                go(s1, out);
            }
            Stmt::If { body, .. } => go(body, out),
            Stmt::ForAll { iter, body, .. } => {
                out.push(iter.clone());
                go(body, out);
            }
            Stmt::Alloc { name, .. } => out.push(name.clone()),
            _ => {}
        }
    }
    go(s, &mut out);
    out
}

// --------------------------------------------------------------------------
// Replace

/// Substitutes the statement matching `pattern` with a call to an
/// instruction-tagged procedure whose body structurally unifies with it.
pub fn replace_proc(proc: &lir::Proc, pattern_src: &str, instr: &lir::Proc) -> Result<lir::Proc, SchedulingError> {
    if instr.instr.is_none() {
        return Err(SchedulingError::new(format!(
            "replace requires an instruction-tagged procedure, '{}' has no instr annotation",
            instr.name
        )));
    }
    let path = locate(proc, pattern_src)?;
    let target = get_at(&proc.body, &path);

    let params: Vec<Sym> = instr
        .sizes
        .iter()
        .cloned()
        .chain(instr.args.iter().map(|a| a.name.clone()))
        .collect();
    let mut unifier = Unifier {
        params: params.iter().map(Sym::id).collect(),
        bindings: AHashMap::new(),
        locals: AHashMap::new(),
    };
    if !unifier.unify_stmt(&instr.body, target) {
        return Err(SchedulingError::at(
            format!("the body of '{}' does not unify with the matched statement", instr.name),
            target.srcinfo().clone(),
        ));
    }

    let mut call_args = Vec::with_capacity(params.len());
    for param in &params {
        match unifier.bindings.get(&param.id()) {
            Some(arg) => call_args.push(arg.clone()),
            None => {
                return Err(SchedulingError::new(format!(
                    "instruction argument '{param}' is not determined by the pattern"
                )));
            }
        }
    }

    let instr_rc = std::rc::Rc::new(instr.clone());
    let body = rebuild_at(&proc.body, &path, &mut |s| {
        Ok(Stmt::Call {
            proc: instr_rc.clone(),
            args: call_args.clone(),
            srcinfo: s.srcinfo().clone(),
        })
    })?;
    Ok(with_body(proc, body))
}

/// Unification of an instruction body (whose free symbols are the
/// instruction's parameters) against a target subtree.
struct Unifier {
    params: ahash::AHashSet<u32>,
    /// parameter symbol -> bound affine term in the target
    bindings: AHashMap<u32, AExpr>,
    /// instruction-local binder -> target binder
    locals: AHashMap<u32, u32>,
}

impl Unifier {
    fn bind_param(&mut self, param: &Sym, target: &AExpr) -> bool {
        match self.bindings.get(&param.id()) {
            Some(existing) => aexpr_identical(existing, target),
            None => {
                self.bindings.insert(param.id(), target.clone());
                true
            }
        }
    }

    fn unify_name(&mut self, pat: &Sym, target: &Sym, target_span: &SrcInfo) -> bool {
        if self.params.contains(&pat.id()) {
            return self.bind_param(
                pat,
                &AExpr::Var {
                    name: target.clone(),
                    srcinfo: target_span.clone(),
                },
            );
        }
        match self.locals.get(&pat.id()) {
            Some(bound) => *bound == target.id(),
            None => false,
        }
    }

    fn bind_local(&mut self, pat: &Sym, target: &Sym) {
        self.locals.insert(pat.id(), target.id());
    }

    fn unify_stmt(&mut self, pat: &Stmt, target: &Stmt) -> bool {
        match (pat, target) {
            (Stmt::Seq { s0: p0, s1: p1, .. }, Stmt::Seq { s0: t0, s1: t1, .. }) => {
                self.unify_stmt(p0, t0) && self.unify_stmt(p1, t1)
            }
            (
                Stmt::Assign {
                    name: pn,
                    idx: pi,
                    rhs: pr,
                    ..
                },
                Stmt::Assign {
                    name: tn,
                    idx: ti,
                    rhs: tr,
                    srcinfo,
                },
            )
            | (
                Stmt::Reduce {
                    name: pn,
                    idx: pi,
                    rhs: pr,
                    ..
                },
                Stmt::Reduce {
                    name: tn,
                    idx: ti,
                    rhs: tr,
                    srcinfo,
                },
            ) => {
                self.unify_name(pn, tn, srcinfo)
                    && pi.len() == ti.len()
                    && pi.iter().zip(ti).all(|(p, t)| self.unify_aexpr(p, t))
                    && self.unify_expr(pr, tr)
            }
            (Stmt::If { cond: pc, body: pb, .. }, Stmt::If { cond: tc, body: tb, .. }) => {
                self.unify_pred(pc, tc) && self.unify_stmt(pb, tb)
            }
            (
                Stmt::ForAll {
                    iter: pit,
                    hi: ph,
                    body: pb,
                    ..
                },
                Stmt::ForAll {
                    iter: tit,
                    hi: th,
                    body: tb,
                    ..
                },
            ) => {
                if !self.unify_aexpr(ph, th) {
                    return false;
                }
                self.bind_local(pit, tit);
                self.unify_stmt(pb, tb)
            }
            (
                Stmt::Alloc {
                    name: pn, shape: ps, ..
                },
                Stmt::Alloc {
                    name: tn, shape: ts, ..
                },
            ) => {
                self.bind_local(pn, tn);
                ps.len() == ts.len() && ps.iter().zip(ts).all(|(p, t)| self.unify_aexpr(p, t))
            }
            (Stmt::Pass { .. }, Stmt::Pass { .. }) => true,
            _ => false,
        }
    }

    fn unify_expr(&mut self, pat: &lir::Expr, target: &lir::Expr) -> bool {
        match (pat, target) {
            (
                lir::Expr::Read {
                    name: pn, idx: pi, ..
                },
                lir::Expr::Read {
                    name: tn,
                    idx: ti,
                    srcinfo,
                },
            ) => {
                self.unify_name(pn, tn, srcinfo)
                    && pi.len() == ti.len()
                    && pi.iter().zip(ti).all(|(p, t)| self.unify_aexpr(p, t))
            }
            (lir::Expr::Const { val: pv, .. }, lir::Expr::Const { val: tv, .. }) => pv == tv,
            (
                lir::Expr::BinOp {
                    op: po,
                    lhs: pl,
                    rhs: pr,
                    ..
                },
                lir::Expr::BinOp {
                    op: to,
                    lhs: tl,
                    rhs: tr,
                    ..
                },
            ) => po == to && self.unify_expr(pl, tl) && self.unify_expr(pr, tr),
            (
                lir::Expr::Select {
                    cond: pc, body: pb, ..
                },
                lir::Expr::Select {
                    cond: tc, body: tb, ..
                },
            ) => self.unify_pred(pc, tc) && self.unify_expr(pb, tb),
            (
                lir::Expr::ReadConfig {
                    config: pc, field: pf, ..
                },
                lir::Expr::ReadConfig {
                    config: tc, field: tf, ..
                },
            ) => pc.name() == tc.name() && pf == tf,
            _ => false,
        }
    }

    fn unify_pred(&mut self, pat: &Pred, target: &Pred) -> bool {
        match (pat, target) {
            (
                Pred::Cmp {
                    op: po,
                    lhs: pl,
                    rhs: pr,
                    ..
                },
                Pred::Cmp {
                    op: to,
                    lhs: tl,
                    rhs: tr,
                    ..
                },
            ) => po == to && self.unify_aexpr(pl, tl) && self.unify_aexpr(pr, tr),
            (Pred::And { lhs: pl, rhs: pr, .. }, Pred::And { lhs: tl, rhs: tr, .. })
            | (Pred::Or { lhs: pl, rhs: pr, .. }, Pred::Or { lhs: tl, rhs: tr, .. }) => {
                self.unify_pred(pl, tl) && self.unify_pred(pr, tr)
            }
            _ => false,
        }
    }

    fn unify_aexpr(&mut self, pat: &AExpr, target: &AExpr) -> bool {
        match pat {
            AExpr::Var { name, .. } | AExpr::Size { name, .. } => {
                if self.params.contains(&name.id()) {
                    return self.bind_param(name, target);
                }
                match target {
                    AExpr::Var { name: tn, .. } | AExpr::Size { name: tn, .. } => {
                        self.locals.get(&name.id()) == Some(&tn.id())
                    }
                    _ => false,
                }
            }
            AExpr::Const { val: pv, .. } => matches!(target, AExpr::Const { val: tv, .. } if pv == tv),
            AExpr::Scale { coeff: pc, e: pe, .. } => match target {
                AExpr::Scale { coeff: tc, e: te, .. } => pc == tc && self.unify_aexpr(pe, te),
                _ => false,
            },
            AExpr::ScaleDiv { e: pe, quot: pq, .. } => match target {
                AExpr::ScaleDiv { e: te, quot: tq, .. } => pq == tq && self.unify_aexpr(pe, te),
                _ => false,
            },
            AExpr::Add { lhs: pl, rhs: pr, .. } => match target {
                AExpr::Add { lhs: tl, rhs: tr, .. } => self.unify_aexpr(pl, tl) && self.unify_aexpr(pr, tr),
                _ => false,
            },
            AExpr::Sub { lhs: pl, rhs: pr, .. } => match target {
                AExpr::Sub { lhs: tl, rhs: tr, .. } => self.unify_aexpr(pl, tl) && self.unify_aexpr(pr, tr),
                _ => false,
            },
        }
    }
}

/// Lowers an affine term into value arithmetic, for value positions where a
/// substituted index symbol used to be read directly.
fn aexpr_to_expr(a: &AExpr) -> lir::Expr {
    let srcinfo = a.srcinfo().clone();
    match a {
        AExpr::Var { name, .. } | AExpr::Size { name, .. } => lir::Expr::Read {
            name: name.clone(),
            idx: Vec::new(),
            srcinfo,
        },
        AExpr::Const { val, .. } => lir::Expr::Const {
            val: *val as f64,
            srcinfo,
        },
        AExpr::Scale { coeff, e, .. } => lir::Expr::BinOp {
            op: lir::Op::Mul,
            lhs: Box::new(lir::Expr::Const {
                val: *coeff as f64,
                srcinfo: srcinfo.clone(),
            }),
            rhs: Box::new(aexpr_to_expr(e)),
            srcinfo,
        },
        AExpr::ScaleDiv { e, quot, .. } => lir::Expr::BinOp {
            op: lir::Op::Div,
            lhs: Box::new(aexpr_to_expr(e)),
            rhs: Box::new(lir::Expr::Const {
                val: *quot as f64,
                srcinfo: srcinfo.clone(),
            }),
            srcinfo,
        },
        AExpr::Add { lhs, rhs, .. } => lir::Expr::BinOp {
            op: lir::Op::Add,
            lhs: Box::new(aexpr_to_expr(lhs)),
            rhs: Box::new(aexpr_to_expr(rhs)),
            srcinfo,
        },
        AExpr::Sub { lhs, rhs, .. } => lir::Expr::BinOp {
            op: lir::Op::Sub,
            lhs: Box::new(aexpr_to_expr(lhs)),
            rhs: Box::new(aexpr_to_expr(rhs)),
            srcinfo,
        },
    }
}

/// Structural identity of affine terms with symbol identity (spans ignored).
fn aexpr_identical(a: &AExpr, b: &AExpr) -> bool {
    match (a, b) {
        (AExpr::Var { name: n1, .. }, AExpr::Var { name: n2, .. })
        | (AExpr::Size { name: n1, .. }, AExpr::Size { name: n2, .. }) => n1 == n2,
        (AExpr::Const { val: v1, .. }, AExpr::Const { val: v2, .. }) => v1 == v2,
        (
            AExpr::Scale {
                coeff: c1, e: e1, ..
            },
            AExpr::Scale {
                coeff: c2, e: e2, ..
            },
        ) => c1 == c2 && aexpr_identical(e1, e2),
        (AExpr::ScaleDiv { e: e1, quot: q1, .. }, AExpr::ScaleDiv { e: e2, quot: q2, .. }) => {
            q1 == q2 && aexpr_identical(e1, e2)
        }
        (AExpr::Add { lhs: l1, rhs: r1, .. }, AExpr::Add { lhs: l2, rhs: r2, .. })
        | (AExpr::Sub { lhs: l1, rhs: r1, .. }, AExpr::Sub { lhs: l2, rhs: r2, .. }) => {
            aexpr_identical(l1, l2) && aexpr_identical(r1, r2)
        }
        _ => false,
    }
}

// --------------------------------------------------------------------------
// Config binding

/// Introduces a fresh scalar initialised from `cfg.field` and redirects
/// every read of that field through it.
pub fn bind_config_proc(
    proc: &lir::Proc,
    cfg: &Config,
    field: &str,
    name_hint: &str,
) -> Result<lir::Proc, SchedulingError> {
    let fresh = Sym::new(name_hint);
    let mut state = BindConfig {
        cfg_name: cfg.name(),
        field,
        fresh: &fresh,
        replaced: 0,
        config_rc: None,
    };
    let body = state.rewrite_stmt(&proc.body);
    if state.replaced == 0 {
        return Err(SchedulingError::new(format!(
            "no reads of config field '{}.{field}' found",
            cfg.name()
        )));
    }
    let config_rc = state.config_rc.expect("a replaced read recorded its config");

    let srcinfo = proc.body.srcinfo().clone();
    let header = Stmt::Seq {
        s0: Box::new(Stmt::Alloc {
            name: fresh.clone(),
            shape: Vec::new(),
            srcinfo: srcinfo.clone(),
        }),
        s1: Box::new(Stmt::Assign {
            name: fresh.clone(),
            idx: Vec::new(),
            rhs: lir::Expr::ReadConfig {
                config: config_rc,
                field: field.to_owned(),
                srcinfo: srcinfo.clone(),
            },
            srcinfo: srcinfo.clone(),
        }),
        srcinfo: srcinfo.clone(),
    };
    let body = Stmt::Seq {
        s0: Box::new(header),
        s1: Box::new(body),
        srcinfo,
    };
    Ok(with_body(proc, body))
}

struct BindConfig<'a> {
    cfg_name: &'a str,
    field: &'a str,
    fresh: &'a Sym,
    replaced: usize,
    config_rc: Option<std::rc::Rc<Config>>,
}

impl BindConfig<'_> {
    fn rewrite_stmt(&mut self, s: &Stmt) -> Stmt {
        match s {
            Stmt::Seq { s0, s1, srcinfo } => Stmt::Seq {
                s0: Box::new(self.rewrite_stmt(s0)),
                s1: Box::new(self.rewrite_stmt(s1)),
                srcinfo: srcinfo.clone(),
            },
            Stmt::Assign {
                name,
                idx,
                rhs,
                srcinfo,
            } => Stmt::Assign {
                name: name.clone(),
                idx: idx.clone(),
                rhs: self.rewrite_expr(rhs),
                srcinfo: srcinfo.clone(),
            },
            Stmt::Reduce {
                name,
                idx,
                rhs,
                srcinfo,
            } => Stmt::Reduce {
                name: name.clone(),
                idx: idx.clone(),
                rhs: self.rewrite_expr(rhs),
                srcinfo: srcinfo.clone(),
            },
            Stmt::If { cond, body, srcinfo } => Stmt::If {
                cond: cond.clone(),
                body: Box::new(self.rewrite_stmt(body)),
                srcinfo: srcinfo.clone(),
            },
            Stmt::ForAll {
                iter,
                hi,
                body,
                srcinfo,
            } => Stmt::ForAll {
                iter: iter.clone(),
                hi: hi.clone(),
                body: Box::new(self.rewrite_stmt(body)),
                srcinfo: srcinfo.clone(),
            },
            Stmt::WriteConfig {
                config,
                field,
                rhs,
                srcinfo,
            } => Stmt::WriteConfig {
                config: config.clone(),
                field: field.clone(),
                rhs: self.rewrite_expr(rhs),
                srcinfo: srcinfo.clone(),
            },
            other => other.clone(),
        }
    }

    fn rewrite_expr(&mut self, e: &lir::Expr) -> lir::Expr {
        match e {
            lir::Expr::ReadConfig { config, field, srcinfo }
                if config.name() == self.cfg_name && field == self.field =>
            {
                self.replaced += 1;
                self.config_rc.get_or_insert_with(|| config.clone());
                lir::Expr::Read {
                    name: self.fresh.clone(),
                    idx: Vec::new(),
                    srcinfo: srcinfo.clone(),
                }
            }
            lir::Expr::BinOp {
                op,
                lhs,
                rhs,
                srcinfo,
            } => lir::Expr::BinOp {
                op: *op,
                lhs: Box::new(self.rewrite_expr(lhs)),
                rhs: Box::new(self.rewrite_expr(rhs)),
                srcinfo: srcinfo.clone(),
            },
            lir::Expr::Select { cond, body, srcinfo } => lir::Expr::Select {
                cond: cond.clone(),
                body: Box::new(self.rewrite_expr(body)),
                srcinfo: srcinfo.clone(),
            },
            other => other.clone(),
        }
    }
}

/// Rewrites the scalar assignment matching `pattern` into a write of
/// `cfg.field`.
pub fn write_config_proc(
    proc: &lir::Proc,
    pattern_src: &str,
    cfg: &std::rc::Rc<Config>,
    field: &str,
) -> Result<lir::Proc, SchedulingError> {
    if cfg.field(field).is_none() {
        return Err(SchedulingError::new(format!(
            "config '{}' has no field '{field}'",
            cfg.name()
        )));
    }
    let path = locate(proc, pattern_src)?;
    let body = rebuild_at(&proc.body, &path, &mut |s| match s {
        Stmt::Assign { idx, rhs, srcinfo, .. } if idx.is_empty() => Ok(Stmt::WriteConfig {
            config: cfg.clone(),
            field: field.to_owned(),
            rhs: rhs.clone(),
            srcinfo: srcinfo.clone(),
        }),
        _ => Err(SchedulingError::at(
            "write_config expects the pattern to match a scalar assignment",
            s.srcinfo().clone(),
        )),
    })?;
    Ok(with_body(proc, body))
}

// --------------------------------------------------------------------------
// Partial evaluation & simplification

/// Substitutes concrete values for size parameters and drops them from the
/// signature.
pub fn partial_eval_proc(proc: &lir::Proc, bindings: &[(&str, i64)]) -> Result<lir::Proc, SchedulingError> {
    let mut subst = SymSubst::default();
    let mut dropped: Vec<u32> = Vec::new();
    for (name, val) in bindings {
        let sym = proc
            .sizes
            .iter()
            .find(|s| s.name() == *name)
            .ok_or_else(|| SchedulingError::new(format!("no size parameter named '{name}'")))?;
        subst.map_expr(
            sym,
            AExpr::Const {
                val: *val,
                srcinfo: proc.srcinfo.clone(),
            },
        );
        dropped.push(sym.id());
    }
    let body = subst.subst_stmt(&proc.body)?;
    let mut result = with_body(proc, body);
    result.sizes.retain(|s| !dropped.contains(&s.id()));
    Ok(result)
}

/// Normalises every affine expression to a canonical linear combination and
/// folds constant value arithmetic. Purely cosmetic on well-formed input.
pub fn simplify_proc(proc: &lir::Proc) -> lir::Proc {
    with_body(proc, simplify_stmt(&proc.body))
}

fn simplify_stmt(s: &Stmt) -> Stmt {
    match s {
        Stmt::Seq { s0, s1, srcinfo } => Stmt::Seq {
            s0: Box::new(simplify_stmt(s0)),
            s1: Box::new(simplify_stmt(s1)),
            srcinfo: srcinfo.clone(),
        },
        Stmt::Assign {
            name,
            idx,
            rhs,
            srcinfo,
        } => Stmt::Assign {
            name: name.clone(),
            idx: idx.iter().map(normalize_aexpr).collect(),
            rhs: simplify_expr(rhs),
            srcinfo: srcinfo.clone(),
        },
        Stmt::Reduce {
            name,
            idx,
            rhs,
            srcinfo,
        } => Stmt::Reduce {
            name: name.clone(),
            idx: idx.iter().map(normalize_aexpr).collect(),
            rhs: simplify_expr(rhs),
            srcinfo: srcinfo.clone(),
        },
        Stmt::If { cond, body, srcinfo } => Stmt::If {
            cond: simplify_pred(cond),
            body: Box::new(simplify_stmt(body)),
            srcinfo: srcinfo.clone(),
        },
        Stmt::ForAll {
            iter,
            hi,
            body,
            srcinfo,
        } => Stmt::ForAll {
            iter: iter.clone(),
            hi: normalize_aexpr(hi),
            body: Box::new(simplify_stmt(body)),
            srcinfo: srcinfo.clone(),
        },
        Stmt::Alloc { name, shape, srcinfo } => Stmt::Alloc {
            name: name.clone(),
            shape: shape.iter().map(normalize_aexpr).collect(),
            srcinfo: srcinfo.clone(),
        },
        Stmt::Call { proc, args, srcinfo } => Stmt::Call {
            proc: proc.clone(),
            args: args.iter().map(normalize_aexpr).collect(),
            srcinfo: srcinfo.clone(),
        },
        Stmt::WriteConfig {
            config,
            field,
            rhs,
            srcinfo,
        } => Stmt::WriteConfig {
            config: config.clone(),
            field: field.clone(),
            rhs: simplify_expr(rhs),
            srcinfo: srcinfo.clone(),
        },
        Stmt::Pass { srcinfo } => Stmt::Pass {
            srcinfo: srcinfo.clone(),
        },
    }
}

fn simplify_expr(e: &lir::Expr) -> lir::Expr {
    match e {
        lir::Expr::Read { name, idx, srcinfo } => lir::Expr::Read {
            name: name.clone(),
            idx: idx.iter().map(normalize_aexpr).collect(),
            srcinfo: srcinfo.clone(),
        },
        lir::Expr::BinOp {
            op,
            lhs,
            rhs,
            srcinfo,
        } => {
            let lhs = simplify_expr(lhs);
            let rhs = simplify_expr(rhs);
            if let (lir::Expr::Const { val: a, .. }, lir::Expr::Const { val: b, .. }) = (&lhs, &rhs) {
                let val = match op {
                    lir::Op::Add => a + b,
                    lir::Op::Sub => a - b,
                    lir::Op::Mul => a * b,
                    lir::Op::Div => a / b,
                };
                return lir::Expr::Const {
                    val,
                    srcinfo: srcinfo.clone(),
                };
            }
            lir::Expr::BinOp {
                op: *op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                srcinfo: srcinfo.clone(),
            }
        }
        lir::Expr::Select { cond, body, srcinfo } => lir::Expr::Select {
            cond: simplify_pred(cond),
            body: Box::new(simplify_expr(body)),
            srcinfo: srcinfo.clone(),
        },
        other => other.clone(),
    }
}

fn simplify_pred(p: &Pred) -> Pred {
    match p {
        Pred::Cmp {
            op,
            lhs,
            rhs,
            srcinfo,
        } => Pred::Cmp {
            op: *op,
            lhs: normalize_aexpr(lhs),
            rhs: normalize_aexpr(rhs),
            srcinfo: srcinfo.clone(),
        },
        Pred::And { lhs, rhs, srcinfo } => Pred::And {
            lhs: Box::new(simplify_pred(lhs)),
            rhs: Box::new(simplify_pred(rhs)),
            srcinfo: srcinfo.clone(),
        },
        Pred::Or { lhs, rhs, srcinfo } => Pred::Or {
            lhs: Box::new(simplify_pred(lhs)),
            rhs: Box::new(simplify_pred(rhs)),
            srcinfo: srcinfo.clone(),
        },
    }
}

/// An atom of the linear form: a variable, a size, or an opaque symbolic
/// division (normalised inside, never merged).
enum Atom {
    Var(Sym),
    Size(Sym),
    Div(AExpr, i64),
}

/// Normalises to `constant + Σ coeff·atom` in first-occurrence order, then
/// rebuilds a minimal tree.
fn normalize_aexpr(a: &AExpr) -> AExpr {
    let srcinfo = a.srcinfo().clone();
    let mut konst = 0i64;
    let mut terms: Vec<(Atom, i64)> = Vec::new();
    collect_terms(a, 1, &mut konst, &mut terms);

    let mut result: Option<AExpr> = None;
    for (atom, coeff) in terms {
        if coeff == 0 {
            continue;
        }
        let base = match atom {
            Atom::Var(name) => AExpr::Var {
                name,
                srcinfo: srcinfo.clone(),
            },
            Atom::Size(name) => AExpr::Size {
                name,
                srcinfo: srcinfo.clone(),
            },
            Atom::Div(e, quot) => AExpr::ScaleDiv {
                e: Box::new(e),
                quot,
                srcinfo: srcinfo.clone(),
            },
        };
        let magnitude = coeff.abs();
        let term = if magnitude == 1 {
            base
        } else {
            AExpr::Scale {
                coeff: magnitude,
                e: Box::new(base),
                srcinfo: srcinfo.clone(),
            }
        };
        result = Some(match result {
            None if coeff > 0 => term,
            None => AExpr::Sub {
                lhs: Box::new(AExpr::Const {
                    val: 0,
                    srcinfo: srcinfo.clone(),
                }),
                rhs: Box::new(term),
                srcinfo: srcinfo.clone(),
            },
            Some(acc) if coeff > 0 => AExpr::Add {
                lhs: Box::new(acc),
                rhs: Box::new(term),
                srcinfo: srcinfo.clone(),
            },
            Some(acc) => AExpr::Sub {
                lhs: Box::new(acc),
                rhs: Box::new(term),
                srcinfo: srcinfo.clone(),
            },
        });
    }

    match result {
        None => AExpr::Const { val: konst, srcinfo },
        Some(acc) if konst == 0 => acc,
        Some(acc) if konst > 0 => AExpr::Add {
            lhs: Box::new(acc),
            rhs: Box::new(AExpr::Const {
                val: konst,
                srcinfo: srcinfo.clone(),
            }),
            srcinfo,
        },
        Some(acc) => AExpr::Sub {
            lhs: Box::new(acc),
            rhs: Box::new(AExpr::Const {
                val: -konst,
                srcinfo: srcinfo.clone(),
            }),
            srcinfo,
        },
    }
}

fn collect_terms(a: &AExpr, sign: i64, konst: &mut i64, terms: &mut Vec<(Atom, i64)>) {
    match a {
        AExpr::Const { val, .. } => *konst += sign * val,
        AExpr::Var { name, .. } => add_term(terms, Atom::Var(name.clone()), sign),
        AExpr::Size { name, .. } => add_term(terms, Atom::Size(name.clone()), sign),
        AExpr::Scale { coeff, e, .. } => collect_terms(e, sign * coeff, konst, terms),
        AExpr::ScaleDiv { e, quot, .. } => {
            let inner = normalize_aexpr(e);
            if let AExpr::Const { val, .. } = inner {
                // ceiling division of a known value folds away
                let q = *quot;
                let ceil = val.div_euclid(q) + i64::from(val.rem_euclid(q) != 0);
                *konst += sign * ceil;
            } else {
                terms.push((Atom::Div(inner, *quot), sign));
            }
        }
        AExpr::Add { lhs, rhs, .. } => {
            collect_terms(lhs, sign, konst, terms);
            collect_terms(rhs, sign, konst, terms);
        }
        AExpr::Sub { lhs, rhs, .. } => {
            collect_terms(lhs, sign, konst, terms);
            collect_terms(rhs, -sign, konst, terms);
        }
    }
}

fn add_term(terms: &mut Vec<(Atom, i64)>, atom: Atom, coeff: i64) {
    let key = match &atom {
        Atom::Var(s) | Atom::Size(s) => Some(s.id()),
        Atom::Div(..) => None,
    };
    if let Some(id) = key {
        for (existing, c) in terms.iter_mut() {
            match existing {
                Atom::Var(s) | Atom::Size(s) if s.id() == id => {
                    *c += coeff;
                    return;
                }
                _ => {}
            }
        }
    }
    terms.push((atom, coeff));
}

// --------------------------------------------------------------------------
// Guards and statement order

/// Wraps the statement matching `pattern` in `if iter == value`, where
/// `iter` is an enclosing loop named by `loop_desc`.
pub fn add_guard_proc(
    proc: &lir::Proc,
    pattern_src: &str,
    loop_desc: &str,
    value: i64,
) -> Result<lir::Proc, SchedulingError> {
    let path = locate(proc, pattern_src)?;
    let enclosing = iters_on_path(&proc.body, &path);
    let (loop_name, _) = parse_descriptor(loop_desc)?;
    let Some(iter) = enclosing.iter().rev().find(|s| s.name() == loop_name) else {
        return Err(SchedulingError::new(format!(
            "the matched statement is not nested inside a loop over '{loop_name}'"
        )));
    };
    let iter = iter.clone();

    let body = rebuild_at(&proc.body, &path, &mut |s| {
        let srcinfo = s.srcinfo().clone();
        Ok(Stmt::If {
            cond: Pred::Cmp {
                op: lir::CmpOp::Eq,
                lhs: AExpr::Var {
                    name: iter.clone(),
                    srcinfo: srcinfo.clone(),
                },
                rhs: AExpr::Const {
                    val: value,
                    srcinfo: srcinfo.clone(),
                },
                srcinfo: srcinfo.clone(),
            },
            body: Box::new(s.clone()),
            srcinfo,
        })
    })?;
    Ok(with_body(proc, body))
}

/// Swaps the statement matching `pattern` with the statement immediately
/// after it. No dependency check is performed.
pub fn reorder_stmts_proc(proc: &lir::Proc, pattern_src: &str) -> Result<lir::Proc, SchedulingError> {
    let path = locate(proc, pattern_src)?;
    if path.last() != Some(&Step::Seq0) {
        return Err(SchedulingError::new(format!(
            "the statement matching '{pattern_src}' has no following statement to reorder with"
        )));
    }
    let parent = &path[..path.len() - 1];
    let body = rebuild_at(&proc.body, parent, &mut |s| {
        let Stmt::Seq { s0, s1, srcinfo } = s else {
            unreachable!("parent of a Seq0 step is a Seq");
        };
        Ok(Stmt::Seq {
            s0: s1.clone(),
            s1: s0.clone(),
            srcinfo: srcinfo.clone(),
        })
    })?;
    Ok(with_body(proc, body))
}

// --------------------------------------------------------------------------
// par_to_seq (UAST level: loop ranges only exist before elaboration)

/// Converts every `par` range on loops named `name` into a `seq` range.
pub fn par_to_seq(proc: &uast::Proc, name: &str) -> Result<uast::Proc, SchedulingError> {
    let mut converted = 0usize;
    let body = par_to_seq_block(&proc.body, name, &mut converted);
    if converted == 0 {
        return Err(SchedulingError::new(format!("no parallel loop named '{name}'")));
    }
    Ok(uast::Proc {
        name: proc.name.clone(),
        args: proc.args.clone(),
        preds: proc.preds.clone(),
        body,
        instr: proc.instr.clone(),
        srcinfo: proc.srcinfo.clone(),
    })
}

fn par_to_seq_block(stmts: &[uast::Stmt], name: &str, converted: &mut usize) -> Vec<uast::Stmt> {
    stmts
        .iter()
        .map(|s| match s {
            uast::Stmt::For {
                iter,
                range,
                body,
                srcinfo,
            } => {
                let range = match range {
                    uast::LoopRange::Par { lo, hi, srcinfo } if iter.name() == name => {
                        *converted += 1;
                        uast::LoopRange::Seq {
                            lo: lo.clone(),
                            hi: hi.clone(),
                            srcinfo: srcinfo.clone(),
                        }
                    }
                    other => other.clone(),
                };
                uast::Stmt::For {
                    iter: iter.clone(),
                    range,
                    body: par_to_seq_block(body, name, converted),
                    srcinfo: srcinfo.clone(),
                }
            }
            uast::Stmt::If {
                cond,
                body,
                orelse,
                srcinfo,
            } => uast::Stmt::If {
                cond: cond.clone(),
                body: par_to_seq_block(body, name, converted),
                orelse: par_to_seq_block(orelse, name, converted),
                srcinfo: srcinfo.clone(),
            },
            other => other.clone(),
        })
        .collect()
}
