//! The pattern AST: a structural mirror of the surface syntax in which
//! identifier leaves are still strings and every category admits a hole.
//!
//! Patterns are parsed from fragment strings by [`crate::pattern`] and matched
//! against loop IR by [`crate::pattern` search]; `_` in an identifier or
//! index position is a wildcard, a bare `_` statement is a statement hole.

use crate::{
    builtins::BuiltIn,
    srcinfo::SrcInfo,
    uast::{BinOp, Lit},
};

/// Result of one pattern parse: a block of statements or a single expression.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Pattern {
    Stmts(Vec<Stmt>),
    Expr(Expr),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Stmt {
    Assign {
        name: String,
        idx: Vec<Expr>,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
    Reduce {
        name: String,
        idx: Vec<Expr>,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
    Alloc {
        name: String,
        dims: Vec<Expr>,
        srcinfo: SrcInfo,
    },
    If {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        srcinfo: SrcInfo,
    },
    For {
        iter: String,
        lo: Expr,
        hi: Expr,
        body: Vec<Stmt>,
        srcinfo: SrcInfo,
    },
    Pass {
        srcinfo: SrcInfo,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        srcinfo: SrcInfo,
    },
    WriteConfig {
        config: String,
        field: String,
        srcinfo: SrcInfo,
    },
    /// `_` on its own line: matches any single statement.
    SHole {
        srcinfo: SrcInfo,
    },
}

impl Stmt {
    pub fn srcinfo(&self) -> &SrcInfo {
        match self {
            Self::Assign { srcinfo, .. }
            | Self::Reduce { srcinfo, .. }
            | Self::Alloc { srcinfo, .. }
            | Self::If { srcinfo, .. }
            | Self::For { srcinfo, .. }
            | Self::Pass { srcinfo }
            | Self::Call { srcinfo, .. }
            | Self::WriteConfig { srcinfo, .. }
            | Self::SHole { srcinfo } => srcinfo,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    Read {
        name: String,
        idx: Vec<Expr>,
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
    /// `stride(buf, k)`; `stride(buf, _)` leaves the dimension open.
    Stride {
        name: String,
        dim: Option<u32>,
        srcinfo: SrcInfo,
    },
    BuiltIn {
        f: BuiltIn,
        args: Vec<Expr>,
        srcinfo: SrcInfo,
    },
    ReadConfig {
        config: String,
        field: String,
        srcinfo: SrcInfo,
    },
    /// `_` in expression position: matches any subtree.
    EHole {
        srcinfo: SrcInfo,
    },
}

impl Expr {
    pub fn srcinfo(&self) -> &SrcInfo {
        match self {
            Self::Read { srcinfo, .. }
            | Self::Const { srcinfo, .. }
            | Self::USub { srcinfo, .. }
            | Self::BinOp { srcinfo, .. }
            | Self::Stride { srcinfo, .. }
            | Self::BuiltIn { srcinfo, .. }
            | Self::ReadConfig { srcinfo, .. }
            | Self::EHole { srcinfo } => srcinfo,
        }
    }
}
