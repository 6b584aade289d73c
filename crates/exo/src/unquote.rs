//! The quote/unquote meta-layer.
//!
//! An `unquote` site escapes from the object language into host evaluation;
//! a `quote` site inside that host code re-enters the parser with the
//! enclosing procedure scope. The original's reflective construction (a
//! compiled two-layer closure over the defining frame) is rendered here as a
//! direct application of a small evaluator to the captured environment
//! record: [`QuoteReplacer`] lowers host code into [`HStmt`]/[`HExpr`] form,
//! rewriting quote constructs into calls to uniquely-mangled callback names
//! registered in the [`UnquoteEnv`], and the evaluator runs with the parser
//! threaded through as the builder quoted fragments re-enter.
//!
//! For a given captured scope and input AST the mangled names, callback
//! registrations, and injected IR are deterministic: the environment is an
//! insertion-ordered map and mangling probes `prefix0`, `prefix1`, ... over
//! the union of globals and locals until a free name is found.

use std::rc::Rc;

use indexmap::IndexMap;
use ruff_python_ast::{self as ast, Expr as AstExpr, Number, Operator as AstOperator, Stmt as AstStmt, UnaryOp};
use ruff_text_size::Ranged;

use crate::{
    error::ParseError,
    parse::Parser,
    scope::{CaptureScope, HostVal},
    srcinfo::{SpanMap, SrcInfo},
    uast,
};

pub(crate) const QUOTE_CALLBACK_PREFIX: &str = "__quote_callback";

// --------------------------------------------------------------------------
// Host IR

/// A host statement in evaluable form.
#[derive(Debug, Clone)]
pub(crate) enum HStmt {
    Expr { e: HExpr },
    Assign { name: String, e: HExpr },
    Return { e: HExpr },
    /// A `with quote:` block, rewritten to its registered callback.
    QuoteBlock { callback: String, span: SrcInfo },
}

/// A host expression in evaluable form.
#[derive(Debug, Clone)]
pub(crate) enum HExpr {
    Int { val: i64, span: SrcInfo },
    Float { val: f64, span: SrcInfo },
    Str { val: String, span: SrcInfo },
    Name { name: String, span: SrcInfo },
    Neg { arg: Box<HExpr>, span: SrcInfo },
    BinOp {
        op: HOp,
        lhs: Box<HExpr>,
        rhs: Box<HExpr>,
        span: SrcInfo,
    },
    Call {
        func: String,
        args: Vec<HExpr>,
        span: SrcInfo,
    },
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum HOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

// --------------------------------------------------------------------------
// The captured environment record

enum Lookup {
    Found(HostVal),
    /// The name exists as a local of the defining frame but held no value at
    /// capture time; referencing it is an error, like the deleted outer-scope
    /// parameters of the original construction.
    Unbound,
    Missing,
}

/// Captured globals and locals of the defining site, plus any callbacks
/// registered while rewriting quote constructs.
pub(crate) struct UnquoteEnv {
    globals: IndexMap<String, HostVal>,
    locals: IndexMap<String, Option<HostVal>>,
}

impl UnquoteEnv {
    /// The environment used at unquote sites: the defining frame only.
    pub(crate) fn from_capture(scope: &CaptureScope) -> Self {
        Self {
            globals: scope.globals().clone(),
            locals: scope.locals().clone(),
        }
    }

    /// The environment used for parser-internal evaluation (memory
    /// annotations, config lookups, callees): the defining frame with the
    /// procedure-local scope layered on top.
    pub(crate) fn from_capture_with(scope: &CaptureScope, object_locals: IndexMap<String, HostVal>) -> Self {
        let mut locals = scope.locals().clone();
        for (name, val) in object_locals {
            locals.insert(name, Some(val));
        }
        Self {
            globals: scope.globals().clone(),
            locals,
        }
    }

    /// Probes `prefix0`, `prefix1`, ... against the union of globals and
    /// locals; the first free name wins, so collisions are impossible.
    pub(crate) fn mangle_name(&self, prefix: &str) -> String {
        let mut index = 0usize;
        loop {
            let mangled = format!("{prefix}{index}");
            if !self.locals.contains_key(&mangled) && !self.globals.contains_key(&mangled) {
                return mangled;
            }
            index += 1;
        }
    }

    pub(crate) fn register_quote_callback(&mut self, callback: HostVal) -> String {
        let mangled = self.mangle_name(QUOTE_CALLBACK_PREFIX);
        self.locals.insert(mangled.clone(), Some(callback));
        mangled
    }

    fn lookup(&self, name: &str) -> Lookup {
        match self.locals.get(name) {
            Some(Some(val)) => Lookup::Found(val.clone()),
            Some(None) => Lookup::Unbound,
            None => match self.globals.get(name) {
                Some(val) => Lookup::Found(val.clone()),
                None => Lookup::Missing,
            },
        }
    }

    fn assign(&mut self, name: &str, val: HostVal) {
        self.locals.insert(name.to_owned(), Some(val));
    }
}

// --------------------------------------------------------------------------
// Quote replacement

/// Lowers host statements and expressions into evaluable form, rewriting
/// `with quote:` blocks and `quote(e)` calls into calls to freshly-mangled
/// callback names whose payload (the retained host AST) is registered in the
/// environment.
pub(crate) struct QuoteReplacer<'e> {
    env: &'e mut UnquoteEnv,
    spans: SpanMap,
}

impl<'e> QuoteReplacer<'e> {
    pub(crate) fn new(env: &'e mut UnquoteEnv, spans: SpanMap) -> Self {
        Self { env, spans }
    }

    fn err<T>(&self, range: ruff_text_size::TextRange, msg: impl Into<std::borrow::Cow<'static, str>>) -> Result<T, ParseError> {
        Err(ParseError::unquote(msg, self.spans.span(range)))
    }

    pub(crate) fn lower_stmts(&mut self, stmts: &[AstStmt]) -> Result<Vec<HStmt>, ParseError> {
        stmts.iter().map(|s| self.lower_stmt(s)).collect()
    }

    fn lower_stmt(&mut self, s: &AstStmt) -> Result<HStmt, ParseError> {
        match s {
            AstStmt::With(w) => {
                let is_quote = w.items.len() == 1
                    && matches!(&w.items[0].context_expr, AstExpr::Name(n) if n.id.as_str() == "quote");
                if !is_quote {
                    return self.err(w.range, "only 'with quote:' blocks are supported in unquoted code");
                }
                let callback = self
                    .env
                    .register_quote_callback(HostVal::QuoteStmts(Rc::new(w.body.to_vec())));
                Ok(HStmt::QuoteBlock {
                    callback,
                    span: self.spans.span(w.range),
                })
            }
            AstStmt::Assign(assign) => {
                let [AstExpr::Name(target)] = assign.targets.as_slice() else {
                    return self.err(assign.range, "only simple assignments are supported in unquoted code");
                };
                Ok(HStmt::Assign {
                    name: target.id.to_string(),
                    e: self.lower_expr(&assign.value)?,
                })
            }
            AstStmt::Return(ret) => match &ret.value {
                Some(value) => Ok(HStmt::Return {
                    e: self.lower_expr(value)?,
                }),
                None => self.err(ret.range, "bare return is not supported in unquoted code"),
            },
            AstStmt::Expr(es) => Ok(HStmt::Expr {
                e: self.lower_expr(&es.value)?,
            }),
            other => self.err(other.range(), "host statement not supported in unquoted code"),
        }
    }

    pub(crate) fn lower_expr(&mut self, e: &AstExpr) -> Result<HExpr, ParseError> {
        let span = self.spans.span(e.range());
        match e {
            AstExpr::Call(call) => {
                let AstExpr::Name(f) = &*call.func else {
                    return self.err(call.func.range(), "only named functions are callable in unquoted code");
                };
                if f.id.as_str() == "quote" {
                    if !call.arguments.keywords.is_empty() || call.arguments.args.len() != 1 {
                        return self.err(call.range, "quote must take exactly one argument");
                    }
                    let callback = self
                        .env
                        .register_quote_callback(HostVal::QuoteExpr(Rc::new(call.arguments.args[0].clone())));
                    return Ok(HExpr::Call {
                        func: callback,
                        args: Vec::new(),
                        span,
                    });
                }
                if !call.arguments.keywords.is_empty() {
                    return self.err(call.range, "keyword arguments are not supported in unquoted code");
                }
                let args = call
                    .arguments
                    .args
                    .iter()
                    .map(|a| self.lower_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(HExpr::Call {
                    func: f.id.to_string(),
                    args,
                    span,
                })
            }
            AstExpr::Name(n) => Ok(HExpr::Name {
                name: n.id.to_string(),
                span,
            }),
            AstExpr::NumberLiteral(num) => match &num.value {
                Number::Int(i) => match i.as_i64() {
                    Some(val) => Ok(HExpr::Int { val, span }),
                    None => self.err(num.range, format!("integer literal too large: {i}")),
                },
                Number::Float(val) => Ok(HExpr::Float { val: *val, span }),
                Number::Complex { .. } => self.err(num.range, "complex literals are not supported"),
            },
            AstExpr::StringLiteral(s) => Ok(HExpr::Str {
                val: s.value.to_string(),
                span,
            }),
            AstExpr::UnaryOp(u) if matches!(u.op, UnaryOp::USub) => Ok(HExpr::Neg {
                arg: Box::new(self.lower_expr(&u.operand)?),
                span,
            }),
            AstExpr::BinOp(b) => {
                let op = match b.op {
                    AstOperator::Add => HOp::Add,
                    AstOperator::Sub => HOp::Sub,
                    AstOperator::Mult => HOp::Mul,
                    AstOperator::Div => HOp::Div,
                    AstOperator::FloorDiv => HOp::FloorDiv,
                    AstOperator::Mod => HOp::Mod,
                    _ => return self.err(b.range, "unsupported host operator"),
                };
                Ok(HExpr::BinOp {
                    op,
                    lhs: Box::new(self.lower_expr(&b.left)?),
                    rhs: Box::new(self.lower_expr(&b.right)?),
                    span,
                })
            }
            other => self.err(other.range(), "unsupported host expression in unquoted code"),
        }
    }
}

// --------------------------------------------------------------------------
// Evaluation (the parser is the builder quoted fragments re-enter)

impl Parser<'_> {
    /// Evaluates a host expression in the defining frame with the
    /// procedure-local scope layered on top. Used for memory annotations,
    /// config lookups, and callee resolution.
    pub(crate) fn eval_expr_node(&mut self, e: &AstExpr) -> Result<HostVal, ParseError> {
        let mut env = UnquoteEnv::from_capture_with(self.scope, self.locals.flatten());
        let hexpr = QuoteReplacer::new(&mut env, self.spans.clone()).lower_expr(e)?;
        self.host_eval_expr(&mut env, &hexpr)
    }

    /// Expression-level unquote: `unquote(<host expr>)` in expression
    /// position. Integers and floats inject as constants, IR expressions
    /// inject as themselves; anything else is an error.
    pub(crate) fn unquote_expr_site(&mut self, call: &ast::ExprCall) -> Result<uast::Expr, ParseError> {
        let span = self.spans.span(call.range);
        let arg = self.check_unquote_call(call)?;
        let mut env = UnquoteEnv::from_capture(self.scope);
        let hexpr = QuoteReplacer::new(&mut env, self.spans.clone()).lower_expr(arg)?;
        match self.host_eval_expr(&mut env, &hexpr)? {
            HostVal::Int(v) => Ok(uast::Expr::Const {
                val: uast::Lit::Int(v),
                srcinfo: span,
            }),
            HostVal::Float(v) => Ok(uast::Expr::Const {
                val: uast::Lit::Float(v),
                srcinfo: span,
            }),
            HostVal::Expr(e) => Ok(*e),
            other => Err(ParseError::unquote(
                format!(
                    "unquote computed {}, expected an integer, float, or IR expression",
                    other.kind()
                ),
                span,
            )),
        }
    }

    /// Unquote in type position: the host value must be a string naming a
    /// primitive type.
    pub(crate) fn unquote_type_site(&mut self, call: &ast::ExprCall) -> Result<uast::Type, ParseError> {
        let span = self.spans.span(call.range);
        let arg = self.check_unquote_call(call)?;
        let mut env = UnquoteEnv::from_capture(self.scope);
        let hexpr = QuoteReplacer::new(&mut env, self.spans.clone()).lower_expr(arg)?;
        match self.host_eval_expr(&mut env, &hexpr)? {
            HostVal::Str(s) => uast::Type::prim_from_name(&s)
                .ok_or_else(|| ParseError::unquote("unquote computation did not yield a valid type", span)),
            _ => Err(ParseError::unquote("unquote computation did not yield a valid type", span)),
        }
    }

    /// Statement-level unquote: evaluates the host block; expression
    /// statements yielding IR statements are appended to the surrounding
    /// parse, and `with quote:` blocks re-enter the parser.
    pub(crate) fn unquote_block_site(
        &mut self,
        body: &[AstStmt],
        out: &mut Vec<uast::Stmt>,
    ) -> Result<(), ParseError> {
        let mut env = UnquoteEnv::from_capture(self.scope);
        let hstmts = QuoteReplacer::new(&mut env, self.spans.clone()).lower_stmts(body)?;
        self.host_eval_block(&mut env, &hstmts, Some(out))?;
        Ok(())
    }

    fn check_unquote_call<'c>(&self, call: &'c ast::ExprCall) -> Result<&'c AstExpr, ParseError> {
        if !call.arguments.keywords.is_empty() {
            return Err(ParseError::syntax(
                "unquote must take non-keyword argument",
                self.spans.span(call.range),
            ));
        }
        let [arg] = call.arguments.args.as_ref() else {
            return Err(ParseError::syntax(
                "unquote must take 1 argument",
                self.spans.span(call.range),
            ));
        };
        Ok(arg)
    }

    /// Runs a host block; a `return` ends evaluation and yields the result
    /// through the single reserved slot.
    fn host_eval_block(
        &mut self,
        env: &mut UnquoteEnv,
        stmts: &[HStmt],
        mut collector: Option<&mut Vec<uast::Stmt>>,
    ) -> Result<Option<HostVal>, ParseError> {
        for s in stmts {
            match s {
                HStmt::Assign { name, e } => {
                    let val = self.host_eval_expr(env, e)?;
                    env.assign(name, val);
                }
                HStmt::Return { e } => return Ok(Some(self.host_eval_expr(env, e)?)),
                HStmt::Expr { e } => {
                    let val = self.host_eval_expr(env, e)?;
                    if let Some(out) = collector.as_deref_mut() {
                        match val {
                            HostVal::Stmt(stmt) => out.push(*stmt),
                            HostVal::Stmts(list) => out.extend(list),
                            // other values are evaluated for effect only
                            _ => {}
                        }
                    }
                }
                HStmt::QuoteBlock { callback, span } => {
                    let Some(out) = collector.as_deref_mut() else {
                        return Err(ParseError::unquote(
                            "reached quote block with no buffer to place quoted statements",
                            span.clone(),
                        ));
                    };
                    let Lookup::Found(HostVal::QuoteStmts(quoted)) = env.lookup(callback) else {
                        unreachable!("quote callback '{callback}' vanished from its environment");
                    };
                    let parsed = self.scoped(|p| p.parse_stmt_block(&quoted))?;
                    out.extend(parsed);
                }
            }
        }
        Ok(None)
    }

    fn host_eval_expr(&mut self, env: &mut UnquoteEnv, e: &HExpr) -> Result<HostVal, ParseError> {
        match e {
            HExpr::Int { val, .. } => Ok(HostVal::Int(*val)),
            HExpr::Float { val, .. } => Ok(HostVal::Float(*val)),
            HExpr::Str { val, .. } => Ok(HostVal::Str(Rc::from(val.as_str()))),
            HExpr::Name { name, span } => match env.lookup(name) {
                Lookup::Found(val) => Ok(val),
                Lookup::Unbound => Err(ParseError::unquote(
                    format!("local '{name}' is unbound in the captured scope"),
                    span.clone(),
                )),
                Lookup::Missing => Err(ParseError::unquote(
                    format!("name '{name}' is not defined in the captured scope"),
                    span.clone(),
                )),
            },
            HExpr::Neg { arg, span } => match self.host_eval_expr(env, arg)? {
                HostVal::Int(v) => Ok(HostVal::Int(-v)),
                HostVal::Float(v) => Ok(HostVal::Float(-v)),
                other => Err(ParseError::unquote(
                    format!("cannot negate {}", other.kind()),
                    span.clone(),
                )),
            },
            HExpr::BinOp { op, lhs, rhs, span } => {
                let lhs = self.host_eval_expr(env, lhs)?;
                let rhs = self.host_eval_expr(env, rhs)?;
                host_arith(*op, &lhs, &rhs).map_err(|msg| ParseError::unquote(msg, span.clone()))
            }
            HExpr::Call { func, args, span } => {
                let callee = match env.lookup(func) {
                    Lookup::Found(val) => val,
                    Lookup::Unbound => {
                        return Err(ParseError::unquote(
                            format!("local '{func}' is unbound in the captured scope"),
                            span.clone(),
                        ));
                    }
                    Lookup::Missing => {
                        return Err(ParseError::unquote(
                            format!("name '{func}' is not defined in the captured scope"),
                            span.clone(),
                        ));
                    }
                };
                match callee {
                    HostVal::Func(f) => {
                        let mut argv = Vec::with_capacity(args.len());
                        for a in args {
                            argv.push(self.host_eval_expr(env, a)?);
                        }
                        f(&argv).map_err(|msg| ParseError::unquote(msg, span.clone()))
                    }
                    // quote(e): re-enter the parser on the retained fragment,
                    // resolving identifiers against the procedure scope
                    HostVal::QuoteExpr(quoted) => {
                        let expr = self.parse_expr(&quoted)?;
                        Ok(HostVal::Expr(Box::new(expr)))
                    }
                    HostVal::QuoteStmts(_) => Err(ParseError::unquote(
                        "quote blocks cannot be called as expressions",
                        span.clone(),
                    )),
                    other => Err(ParseError::unquote(
                        format!("{} is not callable in host code", other.kind()),
                        span.clone(),
                    )),
                }
            }
        }
    }
}

fn host_arith(op: HOp, lhs: &HostVal, rhs: &HostVal) -> Result<HostVal, String> {
    match (lhs, rhs) {
        (HostVal::Int(a), HostVal::Int(b)) => {
            let (a, b) = (*a, *b);
            let checked = match op {
                HOp::Add => a.checked_add(b),
                HOp::Sub => a.checked_sub(b),
                HOp::Mul => a.checked_mul(b),
                HOp::Div => {
                    if b == 0 {
                        return Err("division by zero in host arithmetic".to_owned());
                    }
                    return Ok(HostVal::Float(a as f64 / b as f64));
                }
                HOp::FloorDiv => {
                    if b == 0 {
                        return Err("division by zero in host arithmetic".to_owned());
                    }
                    a.checked_div_euclid(b)
                }
                HOp::Mod => {
                    if b == 0 {
                        return Err("division by zero in host arithmetic".to_owned());
                    }
                    a.checked_rem_euclid(b)
                }
            };
            checked
                .map(HostVal::Int)
                .ok_or_else(|| "integer overflow in host arithmetic".to_owned())
        }
        (HostVal::Int(_) | HostVal::Float(_), HostVal::Int(_) | HostVal::Float(_)) => {
            let a = host_float(lhs);
            let b = host_float(rhs);
            let val = match op {
                HOp::Add => a + b,
                HOp::Sub => a - b,
                HOp::Mul => a * b,
                HOp::Div => a / b,
                HOp::FloorDiv => (a / b).floor(),
                HOp::Mod => a.rem_euclid(b),
            };
            Ok(HostVal::Float(val))
        }
        _ => Err(format!(
            "cannot combine {} and {} in host arithmetic",
            lhs.kind(),
            rhs.kind()
        )),
    }
}

fn host_float(v: &HostVal) -> f64 {
    match v {
        HostVal::Int(i) => *i as f64,
        HostVal::Float(f) => *f,
        _ => unreachable!("host_float on non-numeric value"),
    }
}
