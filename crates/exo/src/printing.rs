//! Deterministic printers.
//!
//! The UAST printer emits surface syntax that re-parses to an
//! alpha-equivalent procedure (given a capture scope binding the same
//! memories, configs, and callees). The LoopIR printer is for diagnostics
//! and tests; it is deterministic but not a parser input.

use std::fmt::{self, Write};

use crate::{loop_ir as lir, uast};

const INDENT: &str = "    ";

// --------------------------------------------------------------------------
// UAST

impl fmt::Display for uast::Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "def {}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: ", arg.name)?;
            write_type(f, &arg.typ)?;
            if let Some(mem) = &arg.mem {
                write!(f, " @ {mem}")?;
            }
        }
        f.write_str("):\n")?;
        for pred in &self.preds {
            write!(f, "{INDENT}assert ")?;
            write_expr(f, pred)?;
            f.write_str("\n")?;
        }
        if self.body.is_empty() && self.preds.is_empty() {
            writeln!(f, "{INDENT}pass")?;
        }
        write_block(f, &self.body, 1)
    }
}

fn write_type(f: &mut impl Write, typ: &uast::Type) -> fmt::Result {
    match typ {
        uast::Type::Num => f.write_str("R"),
        uast::Type::F16 => f.write_str("f16"),
        uast::Type::F32 => f.write_str("f32"),
        uast::Type::F64 => f.write_str("f64"),
        uast::Type::Int8 => f.write_str("i8"),
        uast::Type::UInt8 => f.write_str("ui8"),
        uast::Type::UInt16 => f.write_str("ui16"),
        uast::Type::Int32 => f.write_str("i32"),
        uast::Type::Bool => f.write_str("bool"),
        uast::Type::Size => f.write_str("size"),
        uast::Type::Index => f.write_str("index"),
        uast::Type::Stride => f.write_str("stride"),
        uast::Type::Tensor { dims, is_window, elem } => {
            if *is_window {
                f.write_str("[")?;
                write_type(f, elem)?;
                f.write_str("]")?;
            } else {
                write_type(f, elem)?;
            }
            f.write_str("[")?;
            for (i, d) in dims.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_expr(f, d)?;
            }
            f.write_str("]")
        }
    }
}

fn write_block(f: &mut impl Write, stmts: &[uast::Stmt], depth: usize) -> fmt::Result {
    for s in stmts {
        write_stmt(f, s, depth)?;
    }
    Ok(())
}

fn write_stmt(f: &mut impl Write, s: &uast::Stmt, depth: usize) -> fmt::Result {
    let pad = INDENT.repeat(depth);
    match s {
        uast::Stmt::Assign { name, idx, rhs, .. } => {
            write!(f, "{pad}{name}")?;
            write_idx(f, idx)?;
            f.write_str(" = ")?;
            write_expr(f, rhs)?;
            f.write_str("\n")
        }
        uast::Stmt::Reduce { name, idx, rhs, .. } => {
            write!(f, "{pad}{name}")?;
            write_idx(f, idx)?;
            f.write_str(" += ")?;
            write_expr(f, rhs)?;
            f.write_str("\n")
        }
        uast::Stmt::FreshAssign { name, rhs, .. } => {
            write!(f, "{pad}{name} = ")?;
            write_expr(f, rhs)?;
            f.write_str("\n")
        }
        uast::Stmt::Alloc { name, typ, mem, .. } => {
            write!(f, "{pad}{name}: ")?;
            write_type(f, typ)?;
            if let Some(mem) = mem {
                write!(f, " @ {mem}")?;
            }
            f.write_str("\n")
        }
        uast::Stmt::If { cond, body, orelse, .. } => {
            write!(f, "{pad}if ")?;
            write_expr(f, cond)?;
            f.write_str(":\n")?;
            write_block(f, body, depth + 1)?;
            if !orelse.is_empty() {
                writeln!(f, "{pad}else:")?;
                write_block(f, orelse, depth + 1)?;
            }
            Ok(())
        }
        uast::Stmt::For { iter, range, body, .. } => {
            let (kind, lo, hi) = match range {
                uast::LoopRange::Par { lo, hi, .. } => ("par", lo, hi),
                uast::LoopRange::Seq { lo, hi, .. } => ("seq", lo, hi),
            };
            write!(f, "{pad}for {iter} in {kind}(")?;
            write_expr(f, lo)?;
            f.write_str(", ")?;
            write_expr(f, hi)?;
            f.write_str("):\n")?;
            write_block(f, body, depth + 1)
        }
        uast::Stmt::Pass { .. } => writeln!(f, "{pad}pass"),
        uast::Stmt::Call { proc, args, .. } => {
            write!(f, "{pad}{}(", proc.name)?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_expr(f, a)?;
            }
            f.write_str(")\n")
        }
        uast::Stmt::WriteConfig { config, field, rhs, .. } => {
            write!(f, "{pad}{config}.{field} = ")?;
            write_expr(f, rhs)?;
            f.write_str("\n")
        }
    }
}

fn write_idx(f: &mut impl Write, idx: &[uast::Expr]) -> fmt::Result {
    if idx.is_empty() {
        return Ok(());
    }
    f.write_str("[")?;
    for (i, e) in idx.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_expr(f, e)?;
    }
    f.write_str("]")
}

/// Operands that are themselves operations get parenthesized, which
/// round-trips to the identical tree.
fn write_operand(f: &mut impl Write, e: &uast::Expr) -> fmt::Result {
    if matches!(e, uast::Expr::BinOp { .. } | uast::Expr::USub { .. }) {
        f.write_str("(")?;
        write_expr(f, e)?;
        f.write_str(")")
    } else {
        write_expr(f, e)
    }
}

fn write_expr(f: &mut impl Write, e: &uast::Expr) -> fmt::Result {
    match e {
        uast::Expr::Read { name, idx, .. } => {
            write!(f, "{name}")?;
            write_idx(f, idx)
        }
        uast::Expr::Window { name, idx, .. } => {
            write!(f, "{name}[")?;
            for (i, w) in idx.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                match w {
                    uast::WAccess::Point { pt, .. } => write_expr(f, pt)?,
                    uast::WAccess::Interval { lo, hi, .. } => {
                        if let Some(lo) = lo {
                            write_expr(f, lo)?;
                        }
                        f.write_str(":")?;
                        if let Some(hi) = hi {
                            write_expr(f, hi)?;
                        }
                    }
                }
            }
            f.write_str("]")
        }
        uast::Expr::Const { val, .. } => match val {
            uast::Lit::Int(v) => write!(f, "{v}"),
            uast::Lit::Float(v) => write!(f, "{v:?}"),
            uast::Lit::Bool(true) => f.write_str("True"),
            uast::Lit::Bool(false) => f.write_str("False"),
        },
        uast::Expr::USub { arg, .. } => {
            f.write_str("-")?;
            write_operand(f, arg)
        }
        uast::Expr::BinOp { op, lhs, rhs, .. } => {
            write_operand(f, lhs)?;
            write!(f, " {op} ")?;
            write_operand(f, rhs)
        }
        uast::Expr::Stride { name, dim, .. } => write!(f, "stride({name}, {dim})"),
        uast::Expr::BuiltIn { f: b, args, .. } => {
            write!(f, "{b}(")?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_expr(f, a)?;
            }
            f.write_str(")")
        }
        uast::Expr::ReadConfig { config, field, .. } => write!(f, "{config}.{field}"),
    }
}

// --------------------------------------------------------------------------
// LoopIR

impl fmt::Display for lir::Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_lir_proc(self, f)
    }
}

fn fmt_lir_proc(proc: &lir::Proc, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "proc {}(", proc.name)?;
    let mut first = true;
    for sz in &proc.sizes {
        if !first {
            f.write_str(", ")?;
        }
        first = false;
        write!(f, "{sz}: size")?;
    }
    for arg in &proc.args {
        if !first {
            f.write_str(", ")?;
        }
        first = false;
        write!(f, "{}", arg.name)?;
    }
    f.write_str("):\n")?;
    write_lir_stmt(f, &proc.body, 1)
}

fn write_lir_stmt(f: &mut impl Write, s: &lir::Stmt, depth: usize) -> fmt::Result {
    let pad = INDENT.repeat(depth);
    match s {
        lir::Stmt::Seq { s0, s1, .. } => {
            write_lir_stmt(f, s0, depth)?;
            write_lir_stmt(f, s1, depth)
        }
        lir::Stmt::Assign { name, idx, rhs, .. } => {
            write!(f, "{pad}{name}")?;
            write_lir_idx(f, idx)?;
            f.write_str(" = ")?;
            write_lir_expr(f, rhs)?;
            f.write_str("\n")
        }
        lir::Stmt::Reduce { name, idx, rhs, .. } => {
            write!(f, "{pad}{name}")?;
            write_lir_idx(f, idx)?;
            f.write_str(" += ")?;
            write_lir_expr(f, rhs)?;
            f.write_str("\n")
        }
        lir::Stmt::If { cond, body, .. } => {
            write!(f, "{pad}if ")?;
            write_lir_pred(f, cond)?;
            f.write_str(":\n")?;
            write_lir_stmt(f, body, depth + 1)
        }
        lir::Stmt::ForAll { iter, hi, body, .. } => {
            write!(f, "{pad}for {iter} in range(0, ")?;
            write_aexpr(f, hi)?;
            f.write_str("):\n")?;
            write_lir_stmt(f, body, depth + 1)
        }
        lir::Stmt::Alloc { name, shape, .. } => {
            write!(f, "{pad}alloc {name}")?;
            write_lir_idx(f, shape)?;
            f.write_str("\n")
        }
        lir::Stmt::Pass { .. } => writeln!(f, "{pad}pass"),
        lir::Stmt::Call { proc, args, .. } => {
            write!(f, "{pad}{}(", proc.name)?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_aexpr(f, a)?;
            }
            f.write_str(")\n")
        }
        lir::Stmt::WriteConfig { config, field, rhs, .. } => {
            write!(f, "{pad}{config}.{field} = ")?;
            write_lir_expr(f, rhs)?;
            f.write_str("\n")
        }
    }
}

fn write_lir_idx(f: &mut impl Write, idx: &[lir::AExpr]) -> fmt::Result {
    if idx.is_empty() {
        return Ok(());
    }
    f.write_str("[")?;
    for (i, a) in idx.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_aexpr(f, a)?;
    }
    f.write_str("]")
}

fn write_lir_expr(f: &mut impl Write, e: &lir::Expr) -> fmt::Result {
    match e {
        lir::Expr::Read { name, idx, .. } => {
            write!(f, "{name}")?;
            write_lir_idx(f, idx)
        }
        lir::Expr::Const { val, .. } => write_f64(f, *val),
        lir::Expr::BinOp { op, lhs, rhs, .. } => {
            write_lir_operand(f, lhs)?;
            write!(f, " {op} ")?;
            write_lir_operand(f, rhs)
        }
        lir::Expr::Select { cond, body, .. } => {
            f.write_str("select(")?;
            write_lir_pred(f, cond)?;
            f.write_str(", ")?;
            write_lir_expr(f, body)?;
            f.write_str(")")
        }
        lir::Expr::ReadConfig { config, field, .. } => write!(f, "{config}.{field}"),
    }
}

fn write_lir_operand(f: &mut impl Write, e: &lir::Expr) -> fmt::Result {
    // only additive operands need grouping against the surrounding operator
    if matches!(
        e,
        lir::Expr::BinOp {
            op: lir::Op::Add | lir::Op::Sub,
            ..
        }
    ) {
        f.write_str("(")?;
        write_lir_expr(f, e)?;
        f.write_str(")")
    } else {
        write_lir_expr(f, e)
    }
}

fn write_f64(f: &mut impl Write, v: f64) -> fmt::Result {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        write!(f, "{}", v as i64)
    } else {
        write!(f, "{v}")
    }
}

fn write_lir_pred(f: &mut impl Write, p: &lir::Pred) -> fmt::Result {
    match p {
        lir::Pred::Cmp { op, lhs, rhs, .. } => {
            write_aexpr(f, lhs)?;
            write!(f, " {op} ")?;
            write_aexpr(f, rhs)
        }
        lir::Pred::And { lhs, rhs, .. } => {
            f.write_str("(")?;
            write_lir_pred(f, lhs)?;
            f.write_str(" and ")?;
            write_lir_pred(f, rhs)?;
            f.write_str(")")
        }
        lir::Pred::Or { lhs, rhs, .. } => {
            f.write_str("(")?;
            write_lir_pred(f, lhs)?;
            f.write_str(" or ")?;
            write_lir_pred(f, rhs)?;
            f.write_str(")")
        }
    }
}

fn write_aexpr(f: &mut impl Write, a: &lir::AExpr) -> fmt::Result {
    match a {
        lir::AExpr::Var { name, .. } | lir::AExpr::Size { name, .. } => write!(f, "{name}"),
        lir::AExpr::Const { val, .. } => write!(f, "{val}"),
        lir::AExpr::Scale { coeff, e, .. } => {
            write!(f, "{coeff} * ")?;
            write_aexpr_grouped(f, e)
        }
        lir::AExpr::ScaleDiv { e, quot, .. } => {
            write_aexpr_grouped(f, e)?;
            write!(f, " / {quot}")
        }
        lir::AExpr::Add { lhs, rhs, .. } => {
            write_aexpr(f, lhs)?;
            f.write_str(" + ")?;
            write_aexpr_grouped(f, rhs)
        }
        lir::AExpr::Sub { lhs, rhs, .. } => {
            write_aexpr(f, lhs)?;
            f.write_str(" - ")?;
            write_aexpr_grouped(f, rhs)
        }
    }
}

fn write_aexpr_grouped(f: &mut impl Write, a: &lir::AExpr) -> fmt::Result {
    if matches!(a, lir::AExpr::Add { .. } | lir::AExpr::Sub { .. }) {
        f.write_str("(")?;
        write_aexpr(f, a)?;
        f.write_str(")")
    } else {
        write_aexpr(f, a)
    }
}

impl fmt::Display for lir::Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_lir_stmt(f, self, 0)
    }
}

impl fmt::Display for lir::AExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_aexpr(f, self)
    }
}
