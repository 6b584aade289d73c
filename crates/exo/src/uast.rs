//! The untyped AST produced by the surface parser.
//!
//! Every name has already been resolved to a [`Sym`]; "untyped" means no type
//! elaboration has run yet, not that names are still strings (that is what
//! [`crate::past`] is for). Nodes are immutable and own their children.

use std::rc::Rc;

use ahash::AHashMap;

use crate::{builtins::BuiltIn, config::Config, memory::Memory, srcinfo::SrcInfo, sym::Sym};

/// Surface-language types.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Type {
    /// The generic numeric type `R`, refined by later passes.
    Num,
    F16,
    F32,
    F64,
    Int8,
    UInt8,
    UInt16,
    Int32,
    Bool,
    Size,
    Index,
    Stride,
    /// `elem[d0, d1, ...]`, or `[elem][d0, ...]` for window arguments.
    /// Dimensions are affine expressions over size symbols.
    Tensor {
        dims: Vec<Expr>,
        is_window: bool,
        elem: Box<Type>,
    },
}

impl Type {
    /// Resolves a primitive numeric type name (`R`, `f32`, `ui8`, ...).
    pub fn prim_from_name(name: &str) -> Option<Self> {
        match name {
            "R" => Some(Self::Num),
            "f16" => Some(Self::F16),
            "f32" => Some(Self::F32),
            "f64" => Some(Self::F64),
            "i8" => Some(Self::Int8),
            "ui8" => Some(Self::UInt8),
            "ui16" => Some(Self::UInt16),
            "i32" => Some(Self::Int32),
            _ => None,
        }
    }

    /// Whether this type may appear as a config field: control-plane types
    /// and concrete numeric scalars, but not `R` and not tensors.
    pub fn is_config_field(&self) -> bool {
        !matches!(self, Self::Num | Self::Tensor { .. })
    }
}

/// A procedure: arguments, precondition predicates, body, and an optional
/// instruction tag marking it as replaceable hardware instruction.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Proc {
    pub name: String,
    pub args: Vec<FnArg>,
    pub preds: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub instr: Option<String>,
    pub srcinfo: SrcInfo,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FnArg {
    pub name: Sym,
    pub typ: Type,
    pub mem: Option<Memory>,
    pub srcinfo: SrcInfo,
}

/// `for v in par(lo, hi)` / `for v in seq(lo, hi)`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum LoopRange {
    Par { lo: Expr, hi: Expr, srcinfo: SrcInfo },
    Seq { lo: Expr, hi: Expr, srcinfo: SrcInfo },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Stmt {
    Assign {
        name: Sym,
        idx: Vec<Expr>,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
    Reduce {
        name: Sym,
        idx: Vec<Expr>,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
    /// First assignment to a previously undeclared scalar name.
    FreshAssign {
        name: Sym,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
    Alloc {
        name: Sym,
        typ: Type,
        mem: Option<Memory>,
        srcinfo: SrcInfo,
    },
    If {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        srcinfo: SrcInfo,
    },
    For {
        iter: Sym,
        range: LoopRange,
        body: Vec<Stmt>,
        srcinfo: SrcInfo,
    },
    Pass {
        srcinfo: SrcInfo,
    },
    Call {
        proc: Rc<Proc>,
        args: Vec<Expr>,
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
            Self::Assign { srcinfo, .. }
            | Self::Reduce { srcinfo, .. }
            | Self::FreshAssign { srcinfo, .. }
            | Self::Alloc { srcinfo, .. }
            | Self::If { srcinfo, .. }
            | Self::For { srcinfo, .. }
            | Self::Pass { srcinfo }
            | Self::Call { srcinfo, .. }
            | Self::WriteConfig { srcinfo, .. } => srcinfo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Lit {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Binary operators accepted by the surface syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "%")]
    Mod,
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
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    Read {
        name: Sym,
        idx: Vec<Expr>,
        srcinfo: SrcInfo,
    },
    /// A window (slice projection) of a tensor: `x[lo:hi, i]`.
    Window {
        name: Sym,
        idx: Vec<WAccess>,
        srcinfo: SrcInfo,
    },
    Const {
        val: Lit,
        srcinfo: SrcInfo,
    },
    USub {
        arg: Box<Expr>,
        srcinfo: SrcInfo,
    },
    BinOp {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        srcinfo: SrcInfo,
    },
    /// `stride(buf, dim)`: the run-time stride of a buffer dimension.
    Stride {
        name: Sym,
        dim: u32,
        srcinfo: SrcInfo,
    },
    BuiltIn {
        f: BuiltIn,
        args: Vec<Expr>,
        srcinfo: SrcInfo,
    },
    ReadConfig {
        config: Rc<Config>,
        field: String,
        srcinfo: SrcInfo,
    },
}

impl Expr {
    pub fn srcinfo(&self) -> &SrcInfo {
        match self {
            Self::Read { srcinfo, .. }
            | Self::Window { srcinfo, .. }
            | Self::Const { srcinfo, .. }
            | Self::USub { srcinfo, .. }
            | Self::BinOp { srcinfo, .. }
            | Self::Stride { srcinfo, .. }
            | Self::BuiltIn { srcinfo, .. }
            | Self::ReadConfig { srcinfo, .. } => srcinfo,
        }
    }
}

/// One axis of a window expression: either a point or an interval.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum WAccess {
    Interval {
        lo: Option<Expr>,
        hi: Option<Expr>,
        srcinfo: SrcInfo,
    },
    Point {
        pt: Expr,
        srcinfo: SrcInfo,
    },
}

// --------------------------------------------------------------------------
// Alpha-equivalence

/// Structural equality up to symbol identity.
///
/// Both procedures must bind symbols at the same points (arguments, loop
/// iterators, allocations, fresh assignments); bound symbols are compared
/// through the binding correspondence, source spans are ignored.
pub fn alpha_eq(a: &Proc, b: &Proc) -> bool {
    let mut env = AlphaEnv::default();
    if a.name != b.name || a.instr != b.instr || a.args.len() != b.args.len() {
        return false;
    }
    for (x, y) in a.args.iter().zip(&b.args) {
        if !type_eq(&mut env, &x.typ, &y.typ) || x.mem != y.mem || !env.bind(&x.name, &y.name) {
            return false;
        }
    }
    exprs_eq(&mut env, &a.preds, &b.preds) && block_eq(&mut env, &a.body, &b.body)
}

#[derive(Default)]
struct AlphaEnv {
    fwd: AHashMap<u32, u32>,
    rev: AHashMap<u32, u32>,
}

impl AlphaEnv {
    fn bind(&mut self, a: &Sym, b: &Sym) -> bool {
        self.fwd.insert(a.id(), b.id());
        self.rev.insert(b.id(), a.id());
        true
    }

    fn same(&self, a: &Sym, b: &Sym) -> bool {
        match (self.fwd.get(&a.id()), self.rev.get(&b.id())) {
            (Some(&fb), Some(&ra)) => fb == b.id() && ra == a.id(),
            // Free on both sides: identity comparison.
            (None, None) => a == b,
            _ => false,
        }
    }
}

fn type_eq(env: &mut AlphaEnv, a: &Type, b: &Type) -> bool {
    match (a, b) {
        (
            Type::Tensor {
                dims: d1,
                is_window: w1,
                elem: e1,
            },
            Type::Tensor {
                dims: d2,
                is_window: w2,
                elem: e2,
            },
        ) => w1 == w2 && exprs_eq(env, d1, d2) && type_eq(env, e1, e2),
        _ => a == b,
    }
}

fn block_eq(env: &mut AlphaEnv, a: &[Stmt], b: &[Stmt]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| stmt_eq(env, x, y))
}

fn stmt_eq(env: &mut AlphaEnv, a: &Stmt, b: &Stmt) -> bool {
    match (a, b) {
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
        ) => env.same(n1, n2) && exprs_eq(env, i1, i2) && expr_eq(env, r1, r2),
        (Stmt::FreshAssign { name: n1, rhs: r1, .. }, Stmt::FreshAssign { name: n2, rhs: r2, .. }) => {
            let rhs = expr_eq(env, r1, r2);
            rhs && env.bind(n1, n2)
        }
        (
            Stmt::Alloc {
                name: n1,
                typ: t1,
                mem: m1,
                ..
            },
            Stmt::Alloc {
                name: n2,
                typ: t2,
                mem: m2,
                ..
            },
        ) => m1 == m2 && type_eq(env, t1, t2) && env.bind(n1, n2),
        (
            Stmt::If {
                cond: c1,
                body: b1,
                orelse: o1,
                ..
            },
            Stmt::If {
                cond: c2,
                body: b2,
                orelse: o2,
                ..
            },
        ) => expr_eq(env, c1, c2) && block_eq(env, b1, b2) && block_eq(env, o1, o2),
        (
            Stmt::For {
                iter: v1,
                range: r1,
                body: b1,
                ..
            },
            Stmt::For {
                iter: v2,
                range: r2,
                body: b2,
                ..
            },
        ) => range_eq(env, r1, r2) && env.bind(v1, v2) && block_eq(env, b1, b2),
        (Stmt::Pass { .. }, Stmt::Pass { .. }) => true,
        (Stmt::Call { proc: p1, args: a1, .. }, Stmt::Call { proc: p2, args: a2, .. }) => {
            p1.name == p2.name && exprs_eq(env, a1, a2)
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

fn range_eq(env: &mut AlphaEnv, a: &LoopRange, b: &LoopRange) -> bool {
    match (a, b) {
        (LoopRange::Par { lo: l1, hi: h1, .. }, LoopRange::Par { lo: l2, hi: h2, .. })
        | (LoopRange::Seq { lo: l1, hi: h1, .. }, LoopRange::Seq { lo: l2, hi: h2, .. }) => {
            expr_eq(env, l1, l2) && expr_eq(env, h1, h2)
        }
        _ => false,
    }
}

fn exprs_eq(env: &mut AlphaEnv, a: &[Expr], b: &[Expr]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| expr_eq(env, x, y))
}

fn expr_eq(env: &mut AlphaEnv, a: &Expr, b: &Expr) -> bool {
    match (a, b) {
        (Expr::Read { name: n1, idx: i1, .. }, Expr::Read { name: n2, idx: i2, .. }) => {
            env.same(n1, n2) && exprs_eq(env, i1, i2)
        }
        (Expr::Window { name: n1, idx: i1, .. }, Expr::Window { name: n2, idx: i2, .. }) => {
            env.same(n1, n2)
                && i1.len() == i2.len()
                && i1.iter().zip(i2).all(|(x, y)| waccess_eq(env, x, y))
        }
        (Expr::Const { val: v1, .. }, Expr::Const { val: v2, .. }) => v1 == v2,
        (Expr::USub { arg: a1, .. }, Expr::USub { arg: a2, .. }) => expr_eq(env, a1, a2),
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
        (Expr::Stride { name: n1, dim: d1, .. }, Expr::Stride { name: n2, dim: d2, .. }) => {
            env.same(n1, n2) && d1 == d2
        }
        (Expr::BuiltIn { f: f1, args: a1, .. }, Expr::BuiltIn { f: f2, args: a2, .. }) => {
            f1 == f2 && exprs_eq(env, a1, a2)
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

fn waccess_eq(env: &mut AlphaEnv, a: &WAccess, b: &WAccess) -> bool {
    match (a, b) {
        (WAccess::Interval { lo: l1, hi: h1, .. }, WAccess::Interval { lo: l2, hi: h2, .. }) => {
            opt_expr_eq(env, l1.as_ref(), l2.as_ref()) && opt_expr_eq(env, h1.as_ref(), h2.as_ref())
        }
        (WAccess::Point { pt: p1, .. }, WAccess::Point { pt: p2, .. }) => expr_eq(env, p1, p2),
        _ => false,
    }
}

fn opt_expr_eq(env: &mut AlphaEnv, a: Option<&Expr>, b: Option<&Expr>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => expr_eq(env, x, y),
        (None, None) => true,
        _ => false,
    }
}
