//! The user-facing procedure object.
//!
//! A [`Procedure`] wraps an immutable LoopIR procedure; every scheduling
//! method returns a new `Procedure` and raises a [`SchedulingError`] when the
//! requested rewrite is inapplicable. Targets are named textually: loop and
//! buffer symbols through the `name` / `name[k]` / `outer > inner` descriptor
//! grammar, statements through PAST pattern fragments.

use std::{fmt, rc::Rc};

use crate::{
    config::Config,
    error::{SchedulingError, ValidationError},
    loop_ir::{self as lir, Stmt},
    past,
    pattern, scheduling,
    sym::Sym,
};

#[derive(Debug, Clone)]
pub struct Procedure {
    proc: Rc<lir::Proc>,
}

impl Procedure {
    /// Wraps a LoopIR procedure, checking the iterator-freshness invariant.
    pub fn new(proc: lir::Proc) -> Result<Self, ValidationError> {
        lir::validate(&proc)?;
        Ok(Self { proc: Rc::new(proc) })
    }

    pub fn name(&self) -> &str {
        &self.proc.name
    }

    pub fn loop_ir(&self) -> &lir::Proc {
        &self.proc
    }

    fn rebuilt(&self, proc: lir::Proc) -> Result<Self, SchedulingError> {
        debug_assert!(
            lir::validate(&proc).is_ok(),
            "scheduling rewrite broke IR well-formedness"
        );
        Ok(Self { proc: Rc::new(proc) })
    }

    fn resolve_single(&self, desc: &str) -> Result<Sym, SchedulingError> {
        let mut syms = scheduling::name_symbols(&self.proc, desc)?;
        match syms.len() {
            0 => Err(SchedulingError::new(format!("no symbol matching '{desc}'"))),
            1 => Ok(syms.pop().expect("length checked")),
            n => Err(SchedulingError::new(format!(
                "descriptor '{desc}' is ambiguous ({n} matches); disambiguate with '{desc}[k]'"
            ))),
        }
    }

    /// Exchanges each loop nest matching `outer > inner`.
    pub fn reorder(&self, out_desc: &str, in_desc: &str) -> Result<Self, SchedulingError> {
        let pairs = scheduling::name_pairs(&self.proc, out_desc, in_desc)?;
        if pairs.is_empty() {
            return Err(SchedulingError::new(format!(
                "no loop nest matching '{out_desc} > {in_desc}'"
            )));
        }
        let mut proc = (*self.proc).clone();
        for (outer, inner) in &pairs {
            proc = scheduling::reorder_proc(&proc, outer, inner)?;
        }
        self.rebuilt(proc)
    }

    /// Exchanges one specific loop pair by symbol.
    pub fn reorder_syms(&self, outer: &Sym, inner: &Sym) -> Result<Self, SchedulingError> {
        self.rebuilt(scheduling::reorder_proc(&self.proc, outer, inner)?)
    }

    /// Splits the loop over `desc` by `quot`, minting fresh `hi`/`lo`
    /// iterators from the hints.
    pub fn split(&self, desc: &str, quot: i64, hi_hint: &str, lo_hint: &str) -> Result<Self, SchedulingError> {
        let var = self.resolve_single(desc)?;
        self.rebuilt(scheduling::split_proc(&self.proc, &var, quot, hi_hint, lo_hint)?)
    }

    /// Like [`Self::split`], targeting a specific symbol.
    pub fn split_sym(&self, var: &Sym, quot: i64, hi_hint: &str, lo_hint: &str) -> Result<Self, SchedulingError> {
        self.rebuilt(scheduling::split_proc(&self.proc, var, quot, hi_hint, lo_hint)?)
    }

    /// Fully unrolls the constant-bound loop over `desc`.
    pub fn unroll(&self, desc: &str) -> Result<Self, SchedulingError> {
        let var = self.resolve_single(desc)?;
        self.rebuilt(scheduling::unroll_proc(&self.proc, &var)?)
    }

    /// Splits the enclosing body after the statement matching `pattern`,
    /// lifting the cut through `n_lifts` enclosing scopes.
    pub fn fission_after(&self, pattern: &str, n_lifts: usize) -> Result<Self, SchedulingError> {
        self.rebuilt(scheduling::fission_after_proc(&self.proc, pattern, n_lifts)?)
    }

    /// Hoists the allocation named by `desc` out of `n_lifts` enclosing
    /// scopes.
    pub fn lift_alloc(&self, desc: &str, n_lifts: usize) -> Result<Self, SchedulingError> {
        self.rebuilt(scheduling::lift_alloc_proc(&self.proc, desc, n_lifts)?)
    }

    /// Inlines the callee at the call site matching `pattern`.
    pub fn inline(&self, pattern: &str) -> Result<Self, SchedulingError> {
        self.rebuilt(scheduling::inline_proc(&self.proc, pattern)?)
    }

    /// Replaces the statement matching `pattern` with a call to `instr`,
    /// an instruction-tagged procedure whose body unifies with it.
    pub fn replace(&self, pattern: &str, instr: &Self) -> Result<Self, SchedulingError> {
        self.rebuilt(scheduling::replace_proc(&self.proc, pattern, &instr.proc)?)
    }

    /// Binds reads of `cfg.field` to a fresh scalar named from `hint`.
    pub fn bind_config(&self, cfg: &Config, field: &str, hint: &str) -> Result<Self, SchedulingError> {
        self.rebuilt(scheduling::bind_config_proc(&self.proc, cfg, field, hint)?)
    }

    /// Rewrites the scalar assignment matching `pattern` into a write of
    /// `cfg.field`.
    pub fn write_config(&self, pattern: &str, cfg: &Rc<Config>, field: &str) -> Result<Self, SchedulingError> {
        self.rebuilt(scheduling::write_config_proc(&self.proc, pattern, cfg, field)?)
    }

    /// Substitutes concrete values for size parameters.
    pub fn partial_eval(&self, bindings: &[(&str, i64)]) -> Result<Self, SchedulingError> {
        self.rebuilt(scheduling::partial_eval_proc(&self.proc, bindings)?)
    }

    /// Normalises affine expressions and folds constants.
    pub fn simplify(&self) -> Self {
        Self {
            proc: Rc::new(scheduling::simplify_proc(&self.proc)),
        }
    }

    /// Wraps the statement matching `pattern` in `if iter == value` for the
    /// enclosing loop named `loop_desc`.
    pub fn add_guard(&self, pattern: &str, loop_desc: &str, value: i64) -> Result<Self, SchedulingError> {
        self.rebuilt(scheduling::add_guard_proc(&self.proc, pattern, loop_desc, value)?)
    }

    /// Swaps the statement matching `pattern` with its successor.
    pub fn reorder_stmts(&self, pattern: &str) -> Result<Self, SchedulingError> {
        self.rebuilt(scheduling::reorder_stmts_proc(&self.proc, pattern)?)
    }

    /// Every statement matching the pattern fragment, outermost first.
    pub fn find(&self, pattern_src: &str) -> Result<Vec<Stmt>, SchedulingError> {
        let parsed = crate::parse::pattern(pattern_src)
            .map_err(|e| SchedulingError::new(format!("invalid pattern '{pattern_src}': {e}")))?;
        match parsed {
            past::Pattern::Stmts(stmts) => Ok(pattern::find_stmts(&stmts, &self.proc)),
            past::Pattern::Expr(_) => Err(SchedulingError::new(format!(
                "expected a statement pattern, '{pattern_src}' is an expression"
            ))),
        }
    }

    /// Every loop whose iterator matches `desc`.
    pub fn find_loop(&self, desc: &str) -> Result<Vec<Stmt>, SchedulingError> {
        let syms = scheduling::name_symbols(&self.proc, desc)?;
        let mut out = Vec::new();
        collect_loops(&self.proc.body, &syms, &mut out);
        Ok(out)
    }

    /// Relocates a statement from an earlier revision of this procedure in
    /// the current one. Rewrites preserve source spans, so the counterparts
    /// of `stmt` are exactly the statements carrying its span.
    pub fn forward(&self, stmt: &Stmt) -> Vec<Stmt> {
        let mut out = Vec::new();
        collect_by_span(&self.proc.body, stmt, &mut out);
        out
    }
}

fn collect_loops(s: &Stmt, iters: &[Sym], out: &mut Vec<Stmt>) {
    match s {
        Stmt::Seq { s0, s1, .. } => {
            collect_loops(s0, iters, out);
            collect_loops(s1, iters, out);
        }
        Stmt::If { body, .. } => collect_loops(body, iters, out),
        Stmt::ForAll { iter, body, .. } => {
            if iters.contains(iter) {
                out.push(s.clone());
            }
            collect_loops(body, iters, out);
        }
        _ => {}
    }
}

fn collect_by_span(s: &Stmt, target: &Stmt, out: &mut Vec<Stmt>) {
    if !matches!(s, Stmt::Seq { .. })
        && s.srcinfo() == target.srcinfo()
        && std::mem::discriminant(s) == std::mem::discriminant(target)
    {
        out.push(s.clone());
    }
    match s {
        Stmt::Seq { s0, s1, .. } => {
            collect_by_span(s0, target, out);
            collect_by_span(s1, target, out);
        }
        Stmt::If { body, .. } | Stmt::ForAll { body, .. } => collect_by_span(body, target, out),
        _ => {}
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.proc, f)
    }
}
