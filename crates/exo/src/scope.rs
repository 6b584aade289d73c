//! Environments consulted during parsing.
//!
//! Three overlapping layers, looked up in order: the chained procedure-local
//! scope ([`ScopeChain`]), the defining frame's locals, and the defining
//! frame's globals (both captured in a [`CaptureScope`]). Host-side values of
//! all three layers are [`HostVal`]s.

use std::{fmt, rc::Rc};

use ahash::AHashMap;
use indexmap::IndexMap;
use ruff_python_ast as ast;

use crate::{builtins::BuiltIn, config::Config, memory::Memory, sym::Sym, uast};

/// A host-side function callable from unquoted code.
pub type HostFn = Rc<dyn Fn(&[HostVal]) -> Result<HostVal, String>>;

/// A value living in the host layer: what names outside the object language
/// resolve to, and what unquoted host code computes with.
#[derive(Clone)]
pub enum HostVal {
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// A resolved object-language variable.
    Sym(Sym),
    /// A size argument; reads become size references, writes are rejected.
    SizeStub(Sym),
    Builtin(BuiltIn),
    Memory(Memory),
    Config(Rc<Config>),
    Proc(Rc<uast::Proc>),
    /// An IR expression, injectable at an expression unquote site.
    Expr(Box<uast::Expr>),
    /// An IR statement, injectable at a statement unquote site.
    Stmt(Box<uast::Stmt>),
    /// A list of IR statements, injected in order.
    Stmts(Vec<uast::Stmt>),
    Func(HostFn),
    /// A registered quote-expression callback: re-enters the parser on the
    /// retained host expression when called.
    QuoteExpr(Rc<ast::Expr>),
    /// A registered quote-block callback over retained host statements.
    QuoteStmts(Rc<Vec<ast::Stmt>>),
}

impl HostVal {
    /// A short noun for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "an integer",
            Self::Float(_) => "a float",
            Self::Str(_) => "a string",
            Self::Sym(_) => "a variable",
            Self::SizeStub(_) => "a size",
            Self::Builtin(_) => "a builtin function",
            Self::Memory(_) => "a memory",
            Self::Config(_) => "a config object",
            Self::Proc(_) => "a procedure",
            Self::Expr(_) => "an IR expression",
            Self::Stmt(_) => "an IR statement",
            Self::Stmts(_) => "IR statements",
            Self::Func(_) => "a host function",
            Self::QuoteExpr(_) | Self::QuoteStmts(_) => "a quoted fragment",
        }
    }
}

impl fmt::Debug for HostVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Sym(s) => write!(f, "Sym({s:?})"),
            Self::SizeStub(s) => write!(f, "SizeStub({s:?})"),
            Self::Builtin(b) => write!(f, "Builtin({b})"),
            Self::Memory(m) => write!(f, "Memory({m})"),
            Self::Config(c) => write!(f, "Config({})", c.name()),
            Self::Proc(p) => write!(f, "Proc({})", p.name),
            Self::Expr(_) => f.write_str("Expr(..)"),
            Self::Stmt(_) => f.write_str("Stmt(..)"),
            Self::Stmts(s) => write!(f, "Stmts(len={})", s.len()),
            Self::Func(_) => f.write_str("Func(..)"),
            Self::QuoteExpr(_) => f.write_str("QuoteExpr(..)"),
            Self::QuoteStmts(_) => f.write_str("QuoteStmts(..)"),
        }
    }
}

/// The captured environment record of the defining site: the globals and
/// locals visible where the procedure (or scheduling script) was written.
///
/// Locals may be declared without a value (`unbound_local`); referencing one
/// from unquoted code fails at evaluation time, exactly like the deleted
/// parameters of the original two-layer closure construction. Iteration order
/// is insertion order, which keeps name mangling deterministic.
#[derive(Clone, Default)]
pub struct CaptureScope {
    globals: IndexMap<String, HostVal>,
    locals: IndexMap<String, Option<HostVal>>,
}

impl CaptureScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn global(mut self, name: &str, val: HostVal) -> Self {
        self.globals.insert(name.to_owned(), val);
        self
    }

    #[must_use]
    pub fn local(mut self, name: &str, val: HostVal) -> Self {
        self.locals.insert(name.to_owned(), Some(val));
        self
    }

    /// Declares a local that exists but holds no value at capture time.
    #[must_use]
    pub fn unbound_local(mut self, name: &str) -> Self {
        self.locals.insert(name.to_owned(), None);
        self
    }

    pub(crate) fn globals(&self) -> &IndexMap<String, HostVal> {
        &self.globals
    }

    pub(crate) fn locals(&self) -> &IndexMap<String, Option<HostVal>> {
        &self.locals
    }
}

/// The chained procedure-local scope: a stack of frames, lookup walks
/// outward, insertion always hits the top frame.
///
/// Every `push` must pair with a `pop` on every exit path; the parser goes
/// through a closure-based guard so an early error cannot strand a frame.
#[derive(Debug, Default)]
pub(crate) struct ScopeChain {
    frames: Vec<AHashMap<String, HostVal>>,
}

impl ScopeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self) {
        self.frames.push(AHashMap::new());
    }

    pub fn pop(&mut self) {
        let popped = self.frames.pop();
        debug_assert!(popped.is_some(), "scope pop without matching push");
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn insert(&mut self, name: &str, val: HostVal) {
        self.frames
            .last_mut()
            .expect("insert into empty scope chain")
            .insert(name.to_owned(), val);
    }

    pub fn lookup(&self, name: &str) -> Option<&HostVal> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Flattens the chain into name → value with inner frames shadowing
    /// outer ones, in outer-to-inner insertion order.
    pub fn flatten(&self) -> IndexMap<String, HostVal> {
        let mut out = IndexMap::new();
        for frame in &self.frames {
            for (name, val) in frame {
                out.insert(name.clone(), val.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_outward_and_shadows() {
        let mut chain = ScopeChain::new();
        chain.push();
        chain.insert("i", HostVal::Int(1));
        chain.push();
        assert!(matches!(chain.lookup("i"), Some(HostVal::Int(1))));
        chain.insert("i", HostVal::Int(2));
        assert!(matches!(chain.lookup("i"), Some(HostVal::Int(2))));
        chain.pop();
        assert!(matches!(chain.lookup("i"), Some(HostVal::Int(1))));
        chain.pop();
        assert_eq!(chain.depth(), 0);
    }

    #[test]
    fn inner_frame_does_not_leak() {
        let mut chain = ScopeChain::new();
        chain.push();
        chain.push();
        chain.insert("tmp", HostVal::Int(7));
        chain.pop();
        assert!(chain.lookup("tmp").is_none());
        chain.pop();
    }
}
