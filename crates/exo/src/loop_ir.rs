//! The scheduling IR.
//!
//! All names are resolved symbols; loop bodies are binary `Seq` spines rather
//! than statement lists. The scheduling engine consumes a procedure and
//! produces a new one — nodes are immutable and rewrites rebuild the spine
//! they touch, sharing nothing mutable.
//!
//! Invariant: every `ForAll` iterator is fresh in its body's scope; no two
//! enclosing loops share an iteration symbol ([`validate`] checks this).

use std::rc::Rc;

use ahash::AHashMap;

use crate::{config::Config, error::ValidationError, srcinfo::SrcInfo, sym::Sym};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Proc {
    pub name: String,
    /// Size parameters, in declaration order.
    pub sizes: Vec<Sym>,
    /// Buffer and scalar parameters.
    pub args: Vec<FnArg>,
    pub body: Stmt,
    pub instr: Option<String>,
    pub srcinfo: SrcInfo,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FnArg {
    pub name: Sym,
    pub srcinfo: SrcInfo,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Stmt {
    Seq {
        s0: Box<Stmt>,
        s1: Box<Stmt>,
        srcinfo: SrcInfo,
    },
    Assign {
        name: Sym,
        idx: Vec<AExpr>,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
    Reduce {
        name: Sym,
        idx: Vec<AExpr>,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
    If {
        cond: Pred,
        body: Box<Stmt>,
        srcinfo: SrcInfo,
    },
    ForAll {
        iter: Sym,
        hi: AExpr,
        body: Box<Stmt>,
        srcinfo: SrcInfo,
    },
    Alloc {
        name: Sym,
        shape: Vec<AExpr>,
        srcinfo: SrcInfo,
    },
    Pass {
        srcinfo: SrcInfo,
    },
    Call {
        proc: Rc<Proc>,
        args: Vec<AExpr>,
        srcinfo: SrcInfo,
    },
    WriteConfig {
        config: Rc<Config>,
        field: String,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
}

impl Stmt {
    pub fn srcinfo(&self) -> &SrcInfo {
        match self {
            Self::Seq { srcinfo, .. }
            | Self::Assign { srcinfo, .. }
            | Self::Reduce { srcinfo, .. }
            | Self::If { srcinfo, .. }
            | Self::ForAll { srcinfo, .. }
            | Self::Alloc { srcinfo, .. }
            | Self::Pass { srcinfo }
            | Self::Call { srcinfo, .. }
            | Self::WriteConfig { srcinfo, .. } => srcinfo,
        }
    }
}

/// Value (data-plane) expressions.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    Read {
        name: Sym,
        idx: Vec<AExpr>,
        srcinfo: SrcInfo,
    },
    Const {
        val: f64,
        srcinfo: SrcInfo,
    },
    BinOp {
        op: Op,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        srcinfo: SrcInfo,
    },
    /// `body` where `cond` holds, zero otherwise.
    Select {
        cond: Pred,
        body: Box<Expr>,
        srcinfo: SrcInfo,
    },
    ReadConfig {
        config: Rc<Config>,
        field: String,
        srcinfo: SrcInfo,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum Op {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
}

/// Control predicates on affine terms.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Pred {
    Cmp {
        op: CmpOp,
        lhs: AExpr,
        rhs: AExpr,
        srcinfo: SrcInfo,
    },
    And {
        lhs: Box<Pred>,
        rhs: Box<Pred>,
        srcinfo: SrcInfo,
    },
    Or {
        lhs: Box<Pred>,
        rhs: Box<Pred>,
        srcinfo: SrcInfo,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum CmpOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
}

/// Affine index expressions: linear combinations of symbols with integer
/// coefficients plus a constant, or trees that normalise to one. There is no
/// general multiplication; `Scale` multiplies by a constant and `ScaleDiv` is
/// a symbolic ceiling division consumed by later passes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum AExpr {
    /// A loop iterator or index variable.
    Var { name: Sym, srcinfo: SrcInfo },
    /// A size parameter.
    Size { name: Sym, srcinfo: SrcInfo },
    Const { val: i64, srcinfo: SrcInfo },
    Scale {
        coeff: i64,
        e: Box<AExpr>,
        srcinfo: SrcInfo,
    },
    ScaleDiv {
        e: Box<AExpr>,
        quot: i64,
        srcinfo: SrcInfo,
    },
    Add {
        lhs: Box<AExpr>,
        rhs: Box<AExpr>,
        srcinfo: SrcInfo,
    },
    Sub {
        lhs: Box<AExpr>,
        rhs: Box<AExpr>,
        srcinfo: SrcInfo,
    },
}

impl AExpr {
    pub fn srcinfo(&self) -> &SrcInfo {
        match self {
            Self::Var { srcinfo, .. }
            | Self::Size { srcinfo, .. }
            | Self::Const { srcinfo, .. }
            | Self::Scale { srcinfo, .. }
            | Self::ScaleDiv { srcinfo, .. }
            | Self::Add { srcinfo, .. }
            | Self::Sub { srcinfo, .. } => srcinfo,
        }
    }
}

/// Folds a non-empty statement list into a right-leaning `Seq` spine.
///
/// # Panics
/// Panics when `stmts` is empty; callers represent empty blocks with `Pass`.
pub fn seq_of(mut stmts: Vec<Stmt>) -> Stmt {
    assert!(!stmts.is_empty(), "cannot build a Seq spine from no statements");
    let mut result = stmts.pop().unwrap();
    while let Some(s) = stmts.pop() {
        let srcinfo = s.srcinfo().clone();
        result = Stmt::Seq {
            s0: Box::new(s),
            s1: Box::new(result),
            srcinfo,
        };
    }
    result
}

/// Flattens a `Seq` spine into the statements it chains, in order.
pub fn spine(stmt: &Stmt) -> Vec<&Stmt> {
    let mut out = Vec::new();
    fn go<'a>(s: &'a Stmt, out: &mut Vec<&'a Stmt>) {
        if let Stmt::Seq { s0, s1, .. } = s {
            go(s0, out);
            go(s1, out);
        } else {
            out.push(s);
        }
    }
    go(stmt, &mut out);
    out
}

// --------------------------------------------------------------------------
// Well-formedness

/// Checks the iterator-freshness invariant: no `ForAll` may bind a symbol
/// already bound by an enclosing loop, a size, or an argument.
pub fn validate(proc: &Proc) -> Result<(), ValidationError> {
    let mut bound: Vec<Sym> = proc.sizes.clone();
    bound.extend(proc.args.iter().map(|a| a.name.clone()));
    validate_stmt(&proc.body, &mut bound)
}

fn validate_stmt(s: &Stmt, bound: &mut Vec<Sym>) -> Result<(), ValidationError> {
    match s {
        Stmt::Seq { s0, s1, .. } => {
            validate_stmt(s0, bound)?;
            validate_stmt(s1, bound)
        }
        Stmt::If { body, .. } => validate_stmt(body, bound),
        Stmt::ForAll { iter, body, .. } => {
            if bound.contains(iter) {
                return Err(ValidationError::new(format!(
                    "loop iterator '{iter}' is already bound in an enclosing scope"
                )));
            }
            bound.push(iter.clone());
            let result = validate_stmt(body, bound);
            bound.pop();
            result
        }
        _ => Ok(()),
    }
}

// --------------------------------------------------------------------------
// Alpha-equivalence

/// Structural equality up to symbol identity (and ignoring source spans).
pub fn alpha_eq(a: &Proc, b: &Proc) -> bool {
    if a.name != b.name || a.sizes.len() != b.sizes.len() || a.args.len() != b.args.len() {
        return false;
    }
    let mut env = AlphaEnv::default();
    for (x, y) in a.sizes.iter().zip(&b.sizes) {
        env.bind(x, y);
    }
    for (x, y) in a.args.iter().zip(&b.args) {
        env.bind(&x.name, &y.name);
    }
    stmt_eq(&mut env, &a.body, &b.body)
}

#[derive(Default)]
struct AlphaEnv {
    fwd: AHashMap<u32, u32>,
    rev: AHashMap<u32, u32>,
}

impl AlphaEnv {
    fn bind(&mut self, a: &Sym, b: &Sym) {
        self.fwd.insert(a.id(), b.id());
        self.rev.insert(b.id(), a.id());
    }

    fn same(&self, a: &Sym, b: &Sym) -> bool {
        match (self.fwd.get(&a.id()), self.rev.get(&b.id())) {
            (Some(&fb), Some(&ra)) => fb == b.id() && ra == a.id(),
            (None, None) => a == b,
            _ => false,
        }
    }
}

fn stmt_eq(env: &mut AlphaEnv, a: &Stmt, b: &Stmt) -> bool {
    match (a, b) {
        (Stmt::Seq { s0: a0, s1: a1, .. }, Stmt::Seq { s0: b0, s1: b1, .. }) => {
            stmt_eq(env, a0, b0) && stmt_eq(env, a1, b1)
        }
        (
            Stmt::Assign {
                name: n1,
                idx: i1,
                rhs: r1,
                ..
            },
            Stmt::Assign {
                name: n2,
                idx: i2,
                rhs: r2,
                ..
            },
        )
        | (
            Stmt::Reduce {
                name: n1,
                idx: i1,
                rhs: r1,
                ..
            },
            Stmt::Reduce {
                name: n2,
                idx: i2,
                rhs: r2,
                ..
            },
        ) => env.same(n1, n2) && aexprs_eq(env, i1, i2) && expr_eq(env, r1, r2),
        (Stmt::If { cond: c1, body: b1, .. }, Stmt::If { cond: c2, body: b2, .. }) => {
            pred_eq(env, c1, c2) && stmt_eq(env, b1, b2)
        }
        (
            Stmt::ForAll {
                iter: v1,
                hi: h1,
                body: b1,
                ..
            },
            Stmt::ForAll {
                iter: v2,
                hi: h2,
                body: b2,
                ..
            },
        ) => {
            if !aexpr_eq(env, h1, h2) {
                return false;
            }
            env.bind(v1, v2);
            stmt_eq(env, b1, b2)
        }
        (Stmt::Alloc { name: n1, shape: s1, .. }, Stmt::Alloc { name: n2, shape: s2, .. }) => {
            let shapes = aexprs_eq(env, s1, s2);
            env.bind(n1, n2);
            shapes
        }
        (Stmt::Pass { .. }, Stmt::Pass { .. }) => true,
        (Stmt::Call { proc: p1, args: a1, .. }, Stmt::Call { proc: p2, args: a2, .. }) => {
            p1.name == p2.name && aexprs_eq(env, a1, a2)
        }
        (
            Stmt::WriteConfig {
                config: c1,
                field: f1,
                rhs: r1,
                ..
            },
            Stmt::WriteConfig {
                config: c2,
                field: f2,
                rhs: r2,
                ..
            },
        ) => c1.name() == c2.name() && f1 == f2 && expr_eq(env, r1, r2),
        _ => false,
    }
}

fn expr_eq(env: &mut AlphaEnv, a: &Expr, b: &Expr) -> bool {
    match (a, b) {
        (Expr::Read { name: n1, idx: i1, .. }, Expr::Read { name: n2, idx: i2, .. }) => {
            env.same(n1, n2) && aexprs_eq(env, i1, i2)
        }
        (Expr::Const { val: v1, .. }, Expr::Const { val: v2, .. }) => v1 == v2,
        (
            Expr::BinOp {
                op: o1,
                lhs: l1,
                rhs: r1,
                ..
            },
            Expr::BinOp {
                op: o2,
                lhs: l2,
                rhs: r2,
                ..
            },
        ) => o1 == o2 && expr_eq(env, l1, l2) && expr_eq(env, r1, r2),
        (Expr::Select { cond: c1, body: b1, .. }, Expr::Select { cond: c2, body: b2, .. }) => {
            pred_eq(env, c1, c2) && expr_eq(env, b1, b2)
        }
        (
            Expr::ReadConfig {
                config: c1, field: f1, ..
            },
            Expr::ReadConfig {
                config: c2, field: f2, ..
            },
        ) => c1.name() == c2.name() && f1 == f2,
        _ => false,
    }
}

fn pred_eq(env: &mut AlphaEnv, a: &Pred, b: &Pred) -> bool {
    match (a, b) {
        (
            Pred::Cmp {
                op: o1,
                lhs: l1,
                rhs: r1,
                ..
            },
            Pred::Cmp {
                op: o2,
                lhs: l2,
                rhs: r2,
                ..
            },
        ) => o1 == o2 && aexpr_eq(env, l1, l2) && aexpr_eq(env, r1, r2),
        (Pred::And { lhs: l1, rhs: r1, .. }, Pred::And { lhs: l2, rhs: r2, .. })
        | (Pred::Or { lhs: l1, rhs: r1, .. }, Pred::Or { lhs: l2, rhs: r2, .. }) => {
            pred_eq(env, l1, l2) && pred_eq(env, r1, r2)
        }
        _ => false,
    }
}

fn aexprs_eq(env: &mut AlphaEnv, a: &[AExpr], b: &[AExpr]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| aexpr_eq(env, x, y))
}

fn aexpr_eq(env: &mut AlphaEnv, a: &AExpr, b: &AExpr) -> bool {
    match (a, b) {
        (AExpr::Var { name: n1, .. }, AExpr::Var { name: n2, .. })
        | (AExpr::Size { name: n1, .. }, AExpr::Size { name: n2, .. }) => env.same(n1, n2),
        (AExpr::Const { val: v1, .. }, AExpr::Const { val: v2, .. }) => v1 == v2,
        (
            AExpr::Scale {
                coeff: c1, e: e1, ..
            },
            AExpr::Scale {
                coeff: c2, e: e2, ..
            },
        ) => c1 == c2 && aexpr_eq(env, e1, e2),
        (
            AExpr::ScaleDiv { e: e1, quot: q1, .. },
            AExpr::ScaleDiv { e: e2, quot: q2, .. },
        ) => q1 == q2 && aexpr_eq(env, e1, e2),
        (AExpr::Add { lhs: l1, rhs: r1, .. }, AExpr::Add { lhs: l2, rhs: r2, .. })
        | (AExpr::Sub { lhs: l1, rhs: r1, .. }, AExpr::Sub { lhs: l2, rhs: r2, .. }) => {
            aexpr_eq(env, l1, l2) && aexpr_eq(env, r1, r2)
        }
        _ => false,
    }
}
