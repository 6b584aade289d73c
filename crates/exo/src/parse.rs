//! The surface parser: lifts a host AST into UAST procedures, config
//! definitions, or PAST pattern fragments.
//!
//! Procedures and fragments are written in Python surface syntax; the host
//! parse itself is delegated to `ruff_python_parser` and this module walks
//! the resulting AST. The parser maintains the chained procedure-local scope
//! and consults the captured defining-site environment for everything the
//! object language does not bind itself (memories, configs, callees, and
//! host values reached through unquote).

use ruff_python_ast::{self as ast, Expr as AstExpr, Number, Operator as AstOperator, Stmt as AstStmt, UnaryOp};
use ruff_python_parser::parse_module;
use ruff_text_size::Ranged;

use crate::{
    builtins,
    config::{Config, ConfigField},
    error::ParseError,
    memory::Memory,
    past,
    scope::{CaptureScope, HostVal, ScopeChain},
    srcinfo::{SourceAnchor, SpanMap, SrcInfo},
    sym::Sym,
    uast,
};

/// Parses one procedure definition into a UAST procedure.
///
/// `src` must contain exactly one `def`; `anchor` places its spans in the
/// defining file; `scope` is the captured environment of the defining site.
pub fn parse_proc(src: &str, anchor: &SourceAnchor, scope: &CaptureScope) -> Result<uast::Proc, ParseError> {
    parse_proc_impl(src, anchor, scope, None)
}

/// Parses an instruction-tagged procedure: like [`parse_proc`], but the
/// resulting procedure carries `instr` and may be targeted by `replace`.
pub fn parse_instr_proc(
    src: &str,
    anchor: &SourceAnchor,
    scope: &CaptureScope,
    instr: &str,
) -> Result<uast::Proc, ParseError> {
    parse_proc_impl(src, anchor, scope, Some(instr.to_owned()))
}

fn parse_proc_impl(
    src: &str,
    anchor: &SourceAnchor,
    scope: &CaptureScope,
    instr: Option<String>,
) -> Result<uast::Proc, ParseError> {
    let spans = SpanMap::new(src, anchor);
    let body = parse_host_module(src, &spans)?;
    let [stmt] = body.as_slice() else {
        return Err(ParseError::syntax(
            "expected exactly one procedure definition",
            spans.span(ruff_text_size::TextRange::empty(ruff_text_size::TextSize::from(0u32))),
        ));
    };
    let AstStmt::FunctionDef(fdef) = stmt else {
        return Err(ParseError::syntax(
            "expected a procedure definition",
            spans.span(stmt.range()),
        ));
    };

    let mut parser = Parser::new(spans, scope);
    parser.locals.push();
    parser.seed_builtins();
    let result = parser.parse_fdef(fdef, instr);
    parser.locals.pop();
    debug_assert_eq!(parser.locals.depth(), 0, "unbalanced scope chain after parse");
    result
}

/// Parses a decorated host class with `name : type` fields into a [`Config`].
pub fn parse_config(src: &str, anchor: &SourceAnchor) -> Result<Config, ParseError> {
    let spans = SpanMap::new(src, anchor);
    let body = parse_host_module(src, &spans)?;
    let [stmt] = body.as_slice() else {
        return Err(ParseError::syntax(
            "expected exactly one config definition",
            spans.span(ruff_text_size::TextRange::empty(ruff_text_size::TextSize::from(0u32))),
        ));
    };
    let AstStmt::ClassDef(cls) = stmt else {
        return Err(ParseError::syntax(
            "expected a config class definition",
            spans.span(stmt.range()),
        ));
    };
    if cls.arguments.as_ref().is_some_and(|a| !a.args.is_empty()) {
        return Err(ParseError::syntax(
            "expected no base classes in a config definition",
            spans.span(cls.range),
        ));
    }

    let mut fields = Vec::new();
    for field_stmt in &cls.body {
        fields.push(parse_config_field(field_stmt, &spans)?);
    }
    Config::new(cls.name.id.as_str(), fields)
        .map_err(|e| ParseError::syntax(e.message().to_owned(), spans.span(cls.range)))
}

fn parse_config_field(stmt: &AstStmt, spans: &SpanMap) -> Result<ConfigField, ParseError> {
    let basic_err = "expected config field definition of the form: name : type";
    let AstStmt::AnnAssign(ann) = stmt else {
        return Err(ParseError::syntax(basic_err, spans.span(stmt.range())));
    };
    if ann.value.is_some() {
        return Err(ParseError::syntax(basic_err, spans.span(ann.range)));
    }
    let AstExpr::Name(target) = &*ann.target else {
        return Err(ParseError::syntax(basic_err, spans.span(ann.range)));
    };
    let typ = match &*ann.annotation {
        AstExpr::Name(t) => config_field_type(t.id.as_str()),
        _ => None,
    };
    let Some(typ) = typ else {
        return Err(ParseError::syntax(
            "expected a control-plane or concrete numeric field type",
            spans.span(ann.annotation.range()),
        ));
    };
    Ok(ConfigField {
        name: target.id.to_string(),
        typ,
    })
}

fn config_field_type(name: &str) -> Option<uast::Type> {
    match name {
        "bool" => Some(uast::Type::Bool),
        "size" => Some(uast::Type::Size),
        "index" => Some(uast::Type::Index),
        "stride" => Some(uast::Type::Stride),
        // the generic numeric type R is not allowed in configs
        "R" => None,
        other => uast::Type::prim_from_name(other),
    }
}

/// Compiles a pattern fragment: a block of statements or a single expression
/// with hole leaves. See [`crate::past`].
pub fn pattern(src: &str) -> Result<past::Pattern, ParseError> {
    pattern_at(src, "pattern", 0)
}

/// Like [`pattern`], with spans anchored at `file`/`line`.
pub fn pattern_at(src: &str, file: &str, line: u32) -> Result<past::Pattern, ParseError> {
    let anchor = SourceAnchor::at(file, line, 0);
    let spans = SpanMap::new(src, &anchor);
    let body = parse_host_module(src, &spans)?;
    let mut fragment = FragmentParser { spans };

    // A single expression statement is an expression pattern, unless it is a
    // call to something other than a builtin or stride (procedure-call
    // statement patterns keep their statement reading).
    if let [AstStmt::Expr(es)] = body.as_slice() {
        let is_expr = match &*es.value {
            AstExpr::Call(call) => matches!(
                &*call.func,
                AstExpr::Name(n) if builtins::lookup(n.id.as_str()).is_some() || n.id.as_str() == "stride"
            ),
            _ => true,
        };
        if is_expr {
            return Ok(past::Pattern::Expr(fragment.parse_expr(&es.value)?));
        }
    }
    Ok(past::Pattern::Stmts(fragment.parse_stmts(&body)?))
}

fn parse_host_module(src: &str, spans: &SpanMap) -> Result<Vec<AstStmt>, ParseError> {
    let parsed = parse_module(src).map_err(|e| ParseError::syntax(e.to_string(), spans.span(e.range())))?;
    Ok(parsed.into_syntax().body.to_vec())
}

// --------------------------------------------------------------------------
// Shared operator conversion

/// Maps a host binary operator onto the surface-language set; `Err` carries
/// the operator's spelling for the error message.
fn convert_binop(op: AstOperator) -> Result<uast::BinOp, &'static str> {
    match op {
        AstOperator::Add => Ok(uast::BinOp::Add),
        AstOperator::Sub => Ok(uast::BinOp::Sub),
        AstOperator::Mult => Ok(uast::BinOp::Mul),
        AstOperator::Div => Ok(uast::BinOp::Div),
        AstOperator::FloorDiv => Ok(uast::BinOp::FloorDiv),
        AstOperator::Mod => Ok(uast::BinOp::Mod),
        AstOperator::Pow => Err("**"),
        AstOperator::LShift => Err("<<"),
        AstOperator::RShift => Err(">>"),
        AstOperator::BitOr => Err("|"),
        AstOperator::BitXor => Err("^"),
        AstOperator::BitAnd => Err("&"),
        AstOperator::MatMult => Err("@"),
    }
}

fn convert_cmpop(op: ast::CmpOp) -> Result<uast::BinOp, &'static str> {
    match op {
        ast::CmpOp::Eq => Ok(uast::BinOp::Eq),
        ast::CmpOp::NotEq => Ok(uast::BinOp::Ne),
        ast::CmpOp::Lt => Ok(uast::BinOp::Lt),
        ast::CmpOp::LtE => Ok(uast::BinOp::Le),
        ast::CmpOp::Gt => Ok(uast::BinOp::Gt),
        ast::CmpOp::GtE => Ok(uast::BinOp::Ge),
        ast::CmpOp::Is => Err("is"),
        ast::CmpOp::IsNot => Err("is not"),
        ast::CmpOp::In => Err("in"),
        ast::CmpOp::NotIn => Err("not in"),
    }
}

// --------------------------------------------------------------------------
// Procedure parser (UAST output)

/// The left-hand side of an assignment or an access expression, before name
/// resolution: base name, point indices, and window axes when any dimension
/// is a slice.
struct LValue {
    name: String,
    name_span: SrcInfo,
    idx: Vec<uast::Expr>,
    window: Option<Vec<uast::WAccess>>,
}

pub(crate) struct Parser<'a> {
    pub(crate) spans: SpanMap,
    pub(crate) scope: &'a CaptureScope,
    pub(crate) locals: ScopeChain,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(spans: SpanMap, scope: &'a CaptureScope) -> Self {
        Self {
            spans,
            scope,
            locals: ScopeChain::new(),
        }
    }

    pub(crate) fn seed_builtins(&mut self) {
        for (name, b) in builtins::all() {
            self.locals.insert(name, HostVal::Builtin(b));
        }
    }

    fn err<T>(&self, range: ruff_text_size::TextRange, msg: impl Into<std::borrow::Cow<'static, str>>) -> Result<T, ParseError> {
        Err(ParseError::syntax(msg, self.spans.span(range)))
    }

    fn err_unsupported<T>(
        &self,
        range: ruff_text_size::TextRange,
        msg: impl Into<std::borrow::Cow<'static, str>>,
    ) -> Result<T, ParseError> {
        Err(ParseError::unsupported(msg, self.spans.span(range)))
    }

    /// Runs `f` inside a fresh scope frame; the frame is popped on every
    /// exit path, including early error returns.
    pub(crate) fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R, ParseError>) -> Result<R, ParseError> {
        self.locals.push();
        let result = f(self);
        self.locals.pop();
        result
    }

    fn parse_fdef(&mut self, fdef: &ast::StmtFunctionDef, instr: Option<String>) -> Result<uast::Proc, ParseError> {
        let params = &fdef.parameters;
        let bad_arg_syntax = "procedure arguments must be plain 'name : type' parameters \
                              (no defaults, *args, **kwargs, or keyword-only arguments)";
        if !params.posonlyargs.is_empty()
            || params.vararg.is_some()
            || !params.kwonlyargs.is_empty()
            || params.kwarg.is_some()
            || params.args.iter().any(|p| p.default.is_some())
        {
            return self.err(params.range, bad_arg_syntax);
        }

        let mut args = Vec::new();
        let mut seen = ahash::AHashSet::new();
        for p in &params.args {
            let param = &p.parameter;
            let arg_name = param.name.id.as_str();
            let Some(annotation) = &param.annotation else {
                return self.err(param.range, "expected argument to be typed, i.e. 'x : T'");
            };
            let (typ, mem) = self.parse_arg_type(annotation)?;
            if !seen.insert(arg_name.to_owned()) {
                return self.err(param.range, format!("repeated argument name: '{arg_name}'"));
            }
            let sym = Sym::new(arg_name);
            if matches!(typ, uast::Type::Size) {
                self.locals.insert(arg_name, HostVal::SizeStub(sym.clone()));
            } else {
                // index variables and buffers need no stub
                self.locals.insert(arg_name, HostVal::Sym(sym.clone()));
            }
            args.push(uast::FnArg {
                name: sym,
                typ,
                mem,
                srcinfo: self.spans.span(param.range),
            });
        }

        // return types are non-sensical for procedures
        if let Some(returns) = &fdef.returns {
            return self.err(returns.range(), "procedures do not support return types");
        }

        // leading asserts form the precondition list
        let first_non_assert = fdef
            .body
            .iter()
            .position(|s| !matches!(s, AstStmt::Assert(_)))
            .unwrap_or(fdef.body.len());
        let mut preds = Vec::new();
        for s in &fdef.body[..first_non_assert] {
            let AstStmt::Assert(a) = s else { unreachable!() };
            if a.msg.is_some() {
                return self.err(a.range, "procedure assertions should not have messages");
            }
            preds.push(self.parse_expr(&a.test)?);
        }

        let body = self.parse_stmt_block(&fdef.body[first_non_assert..])?;
        Ok(uast::Proc {
            name: fdef.name.id.to_string(),
            args,
            preds,
            body,
            instr,
            srcinfo: self.spans.span(fdef.range),
        })
    }

    /// Argument annotations are `type` or `type @ memory`; control-plane
    /// types refuse the memory annotation.
    fn parse_arg_type(&mut self, node: &AstExpr) -> Result<(uast::Type, Option<Memory>), ParseError> {
        let (typ_node, mem_node) = match node {
            AstExpr::BinOp(ast::ExprBinOp {
                left,
                op: AstOperator::MatMult,
                right,
                ..
            }) => (&**left, Some(&**right)),
            _ => (node, None),
        };

        if let AstExpr::Name(n) = typ_node {
            let control = match n.id.as_str() {
                "size" => Some(uast::Type::Size),
                "index" => Some(uast::Type::Index),
                "bool" => Some(uast::Type::Bool),
                "stride" => Some(uast::Type::Stride),
                _ => None,
            };
            if let Some(typ) = control {
                if mem_node.is_some() {
                    return self.err(node.range(), "control types should not be annotated with memory locations");
                }
                return Ok((typ, None));
            }
        }

        let typ = self.parse_num_type(typ_node, true)?;
        let mem = match mem_node {
            Some(m) => Some(self.eval_memory(m)?),
            None => None,
        };
        Ok((typ, mem))
    }

    /// Allocation annotations are `type` or `type @ memory` where the type
    /// may be a tensor with affine dimension expressions.
    fn parse_alloc_typmem(&mut self, node: &AstExpr) -> Result<(uast::Type, Option<Memory>), ParseError> {
        let (typ_node, mem_node) = match node {
            AstExpr::BinOp(ast::ExprBinOp {
                left,
                op: AstOperator::MatMult,
                right,
                ..
            }) => (&**left, Some(&**right)),
            _ => (node, None),
        };
        let typ = self.parse_num_type(typ_node, false)?;
        let mem = match mem_node {
            Some(m) => Some(self.eval_memory(m)?),
            None => None,
        };
        Ok((typ, mem))
    }

    fn eval_memory(&mut self, node: &AstExpr) -> Result<Memory, ParseError> {
        match self.eval_expr_node(node)? {
            HostVal::Memory(mem) => Ok(mem),
            other => self.err(
                node.range(),
                format!("expected a memory annotation, found {}", other.kind()),
            ),
        }
    }

    fn parse_num_type(&mut self, node: &AstExpr, is_arg: bool) -> Result<uast::Type, ParseError> {
        match node {
            AstExpr::Subscript(sub) => {
                let (elem, is_window) = match &*sub.value {
                    AstExpr::List(list) => {
                        if !is_arg {
                            return self.err(
                                node.range(),
                                "window expressions such as [R] should only be used in the function signature",
                            );
                        }
                        let [base] = list.elts.as_slice() else {
                            return self.err(
                                node.range(),
                                "window expressions should annotate only one type, e.g. [R]",
                            );
                        };
                        (self.parse_num_type(base, false)?, true)
                    }
                    base => (self.parse_num_type(base, false)?, false),
                };

                let dims: Vec<&AstExpr> = match &*sub.slice {
                    AstExpr::Slice(_) => return self.err(sub.slice.range(), "index-slicing not allowed"),
                    AstExpr::Tuple(t) => t.elts.iter().collect(),
                    e => vec![e],
                };
                let dims = dims
                    .into_iter()
                    .map(|d| self.parse_expr(d))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(uast::Type::Tensor {
                    dims,
                    is_window,
                    elem: Box::new(elem),
                })
            }
            AstExpr::Name(n) => uast::Type::prim_from_name(n.id.as_str())
                .ok_or_else(|| ParseError::syntax(format!("unrecognized type: '{}'", n.id), self.spans.span(n.range))),
            AstExpr::Call(call) if is_unquote_call(call) => self.unquote_type_site(call),
            _ => self.err(node.range(), "unrecognized type annotation"),
        }
    }

    pub(crate) fn parse_stmt_block(&mut self, stmts: &[AstStmt]) -> Result<Vec<uast::Stmt>, ParseError> {
        let mut rstmts = Vec::new();
        for s in stmts {
            match s {
                // ----- statement-level unquote
                AstStmt::With(w) => {
                    let is_unquote = w.items.len() == 1
                        && matches!(&w.items[0].context_expr, AstExpr::Name(n) if n.id.as_str() == "unquote");
                    if !is_unquote {
                        return self.err(w.range, "expected unquote");
                    }
                    self.unquote_block_site(&w.body, &mut rstmts)?;
                }

                // ----- assignment, reduction, declaration
                AstStmt::Assign(assign) => self.parse_assign(assign, &mut rstmts)?,
                AstStmt::AnnAssign(ann) => self.parse_decl(ann, &mut rstmts)?,
                AstStmt::AugAssign(aug) => self.parse_reduce(aug, &mut rstmts)?,

                // ----- loops
                AstStmt::For(f) => {
                    if f.is_async {
                        return self.err_unsupported(f.range, "async loops are not supported");
                    }
                    if !f.orelse.is_empty() {
                        return self.err(f.range, "else clause on for-loops unsupported");
                    }
                    let AstExpr::Name(target) = &*f.target else {
                        return self.err(f.target.range(), "expected simple name for iterator variable");
                    };
                    let (iter, range, body) = self.scoped(|p| {
                        let sym = Sym::new(target.id.as_str());
                        p.locals.insert(target.id.as_str(), HostVal::Sym(sym.clone()));
                        let range = p.parse_loop_range(&f.iter)?;
                        let body = p.parse_stmt_block(&f.body)?;
                        Ok((sym, range, body))
                    })?;
                    rstmts.push(uast::Stmt::For {
                        iter,
                        range,
                        body,
                        srcinfo: self.spans.span(f.range),
                    });
                }

                // ----- branches
                AstStmt::If(i) => {
                    let cond = self.parse_expr(&i.test)?;
                    let body = self.scoped(|p| p.parse_stmt_block(&i.body))?;
                    let orelse = self.parse_orelse(&i.elif_else_clauses)?;
                    rstmts.push(uast::Stmt::If {
                        cond,
                        body,
                        orelse,
                        srcinfo: self.spans.span(i.range),
                    });
                }

                // ----- sub-procedure calls
                AstStmt::Expr(es) if matches!(&*es.value, AstExpr::Call(_)) => {
                    let AstExpr::Call(call) = &*es.value else { unreachable!() };
                    rstmts.push(self.parse_call_stmt(call)?);
                }

                AstStmt::Pass(p) => rstmts.push(uast::Stmt::Pass {
                    srcinfo: self.spans.span(p.range),
                }),

                AstStmt::Expr(es) if matches!(&*es.value, AstExpr::Name(n) if n.id.as_str() == "_") => {
                    return self.err(es.range, "statement holes are only allowed in patterns");
                }

                AstStmt::Assert(a) => {
                    return self.err(a.range, "predicate assert should happen at the beginning of a procedure");
                }

                other => return self.err_unsupported(other.range(), "unsupported type of statement"),
            }
        }
        Ok(rstmts)
    }

    fn parse_orelse(&mut self, clauses: &[ast::ElifElseClause]) -> Result<Vec<uast::Stmt>, ParseError> {
        let mut tail = Vec::new();
        for clause in clauses.iter().rev() {
            match &clause.test {
                Some(test) => {
                    let cond = self.parse_expr(test)?;
                    let body = self.scoped(|p| p.parse_stmt_block(&clause.body))?;
                    tail = vec![uast::Stmt::If {
                        cond,
                        body,
                        orelse: tail,
                        srcinfo: self.spans.span(clause.range),
                    }];
                }
                None => tail = self.scoped(|p| p.parse_stmt_block(&clause.body))?,
            }
        }
        Ok(tail)
    }

    fn parse_assign(&mut self, assign: &ast::StmtAssign, rstmts: &mut Vec<uast::Stmt>) -> Result<(), ParseError> {
        let span = self.spans.span(assign.range);
        let [target] = assign.targets.as_slice() else {
            return self.err(assign.range, "expected only one expression on the left of an assignment");
        };
        let rhs = self.parse_expr(&assign.value)?;

        // configuration writes: cfg.field = e
        if let AstExpr::Attribute(attr) = target {
            let AstExpr::Name(base) = &*attr.value else {
                return self.err(
                    attr.range,
                    "expected configuration writes of the form 'config.field = ...'",
                );
            };
            let config = self.eval_config(base)?;
            let field = attr.attr.id.as_str();
            if config.field(field).is_none() {
                return self.err(
                    attr.range,
                    format!("config '{}' has no field '{field}'", config.name()),
                );
            }
            rstmts.push(uast::Stmt::WriteConfig {
                config,
                field: field.to_owned(),
                rhs,
                srcinfo: span,
            });
            return Ok(());
        }

        let lv = self.parse_lvalue(target)?;
        if lv.window.is_some() {
            return self.err(
                target.range(),
                "cannot perform windowing on left-hand-side of an assignment",
            );
        }

        // first assignment to an undeclared scalar introduces the name
        if lv.idx.is_empty() && !self.locals.contains(&lv.name) {
            let sym = Sym::new(&lv.name);
            self.locals.insert(&lv.name, HostVal::Sym(sym.clone()));
            rstmts.push(uast::Stmt::FreshAssign {
                name: sym,
                rhs,
                srcinfo: span,
            });
            return Ok(());
        }

        let name = self.resolve_lhs(&lv)?;
        rstmts.push(uast::Stmt::Assign {
            name,
            idx: lv.idx,
            rhs,
            srcinfo: span,
        });
        Ok(())
    }

    fn parse_decl(&mut self, ann: &ast::StmtAnnAssign, rstmts: &mut Vec<uast::Stmt>) -> Result<(), ParseError> {
        if ann.value.is_some() {
            return self.err(ann.range, "variable declaration should not have a value assigned");
        }
        let AstExpr::Name(name) = &*ann.target else {
            return self.err(ann.target.range(), "expected simple name in declaration");
        };
        let (typ, mem) = self.parse_alloc_typmem(&ann.annotation)?;
        let sym = Sym::new(name.id.as_str());
        self.locals.insert(name.id.as_str(), HostVal::Sym(sym.clone()));
        rstmts.push(uast::Stmt::Alloc {
            name: sym,
            typ,
            mem,
            srcinfo: self.spans.span(ann.range),
        });
        Ok(())
    }

    fn parse_reduce(&mut self, aug: &ast::StmtAugAssign, rstmts: &mut Vec<uast::Stmt>) -> Result<(), ParseError> {
        if aug.op != AstOperator::Add {
            return self.err(aug.range, "only += reductions are supported");
        }
        let rhs = self.parse_expr(&aug.value)?;
        let lv = self.parse_lvalue(&aug.target)?;
        if lv.window.is_some() {
            return self.err(
                aug.target.range(),
                "cannot perform windowing on left-hand-side of a reduction",
            );
        }
        let name = self.resolve_lhs(&lv)?;
        rstmts.push(uast::Stmt::Reduce {
            name,
            idx: lv.idx,
            rhs,
            srcinfo: self.spans.span(aug.range),
        });
        Ok(())
    }

    fn resolve_lhs(&self, lv: &LValue) -> Result<Sym, ParseError> {
        match self.locals.lookup(&lv.name) {
            Some(HostVal::Sym(sym)) => Ok(sym.clone()),
            Some(HostVal::SizeStub(_)) => Err(ParseError::syntax(
                format!("cannot write to size variable '{}'", lv.name),
                lv.name_span.clone(),
            )),
            Some(_) => Err(ParseError::syntax(
                format!("expected '{}' to refer to a local variable", lv.name),
                lv.name_span.clone(),
            )),
            None => Err(ParseError::syntax(
                format!("variable '{}' undefined", lv.name),
                lv.name_span.clone(),
            )),
        }
    }

    fn parse_call_stmt(&mut self, call: &ast::ExprCall) -> Result<uast::Stmt, ParseError> {
        let span = self.spans.span(call.range);
        if let AstExpr::Name(f) = &*call.func {
            if f.id.as_str() == "unquote" {
                return self.err(call.range, "statement-level unquote must use 'with unquote:'");
            }
        }
        if !call.arguments.keywords.is_empty() {
            return self.err(call.range, "cannot call a procedure with keyword arguments");
        }
        let callee = self.eval_expr_node(&call.func)?;
        let HostVal::Proc(proc) = callee else {
            return self.err(call.func.range(), "expected called object to be a procedure");
        };
        let args = call
            .arguments
            .args
            .iter()
            .map(|a| self.parse_expr(a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(uast::Stmt::Call {
            proc,
            args,
            srcinfo: span,
        })
    }

    fn parse_loop_range(&mut self, cond: &AstExpr) -> Result<uast::LoopRange, ParseError> {
        let form_err = "expected for loop condition to be in the form 'par(...,...)' or 'seq(...,...)'";
        let AstExpr::Call(call) = cond else {
            return self.err(cond.range(), form_err);
        };
        let AstExpr::Name(f) = &*call.func else {
            return self.err(cond.range(), form_err);
        };
        let kind = f.id.as_str();
        if kind != "par" && kind != "seq" {
            return self.err(cond.range(), form_err);
        }
        if !call.arguments.keywords.is_empty() {
            return self.err(call.range, "par() and seq() do not support named arguments");
        }
        let [lo_node, hi_node] = call.arguments.args.as_ref() else {
            return self.err(call.range, "par() and seq() expect exactly 2 arguments");
        };
        let lo = self.parse_expr(lo_node)?;
        let hi = self.parse_expr(hi_node)?;
        let srcinfo = self.spans.span(call.range);
        Ok(if kind == "par" {
            uast::LoopRange::Par { lo, hi, srcinfo }
        } else {
            uast::LoopRange::Seq { lo, hi, srcinfo }
        })
    }

    fn parse_lvalue(&mut self, node: &AstExpr) -> Result<LValue, ParseError> {
        match node {
            AstExpr::Name(n) => Ok(LValue {
                name: n.id.to_string(),
                name_span: self.spans.span(n.range),
                idx: Vec::new(),
                window: None,
            }),
            AstExpr::Subscript(sub) => {
                let AstExpr::Name(base) = &*sub.value else {
                    return self.err(sub.range, "expected access to have form 'x' or 'x[...]'");
                };
                let dims: Vec<&AstExpr> = match &*sub.slice {
                    AstExpr::Tuple(t) => t.elts.iter().collect(),
                    e => vec![e],
                };
                let is_window = dims.iter().any(|e| matches!(e, AstExpr::Slice(_)));
                let (idx, window) = if is_window {
                    let axes = dims
                        .into_iter()
                        .map(|e| self.parse_waccess(e))
                        .collect::<Result<Vec<_>, _>>()?;
                    (Vec::new(), Some(axes))
                } else {
                    let idx = dims
                        .into_iter()
                        .map(|e| self.parse_expr(e))
                        .collect::<Result<Vec<_>, _>>()?;
                    (idx, None)
                };
                Ok(LValue {
                    name: base.id.to_string(),
                    name_span: self.spans.span(base.range),
                    idx,
                    window,
                })
            }
            _ => self.err(node.range(), "expected lhs of form 'x' or 'x[...]'"),
        }
    }

    fn parse_waccess(&mut self, e: &AstExpr) -> Result<uast::WAccess, ParseError> {
        let srcinfo = self.spans.span(e.range());
        if let AstExpr::Slice(slice) = e {
            if slice.step.is_some() {
                return self.err(
                    e.range(),
                    "expected windowing to have the form x[:], x[i:], x[:j], or x[i:j], but not x[i:j:k]",
                );
            }
            let lo = slice.lower.as_deref().map(|lo| self.parse_expr(lo)).transpose()?;
            let hi = slice.upper.as_deref().map(|hi| self.parse_expr(hi)).transpose()?;
            Ok(uast::WAccess::Interval { lo, hi, srcinfo })
        } else {
            Ok(uast::WAccess::Point {
                pt: self.parse_expr(e)?,
                srcinfo,
            })
        }
    }

    pub(crate) fn parse_expr(&mut self, e: &AstExpr) -> Result<uast::Expr, ParseError> {
        match e {
            AstExpr::Name(_) | AstExpr::Subscript(_) => {
                let span = self.spans.span(e.range());
                let lv = self.parse_lvalue(e)?;
                let resolved = self
                    .locals
                    .lookup(&lv.name)
                    .cloned()
                    .or_else(|| self.scope.locals().get(&lv.name).and_then(Clone::clone))
                    .or_else(|| self.scope.globals().get(&lv.name).cloned());
                match resolved {
                    Some(HostVal::Sym(sym) | HostVal::SizeStub(sym)) => Ok(match lv.window {
                        Some(idx) => uast::Expr::Window {
                            name: sym,
                            idx,
                            srcinfo: span,
                        },
                        None => uast::Expr::Read {
                            name: sym,
                            idx: lv.idx,
                            srcinfo: span,
                        },
                    }),
                    Some(HostVal::Int(v)) => {
                        if !lv.idx.is_empty() || lv.window.is_some() {
                            return Err(ParseError::syntax(
                                format!("cannot index '{}' because it is the constant {v}", lv.name),
                                lv.name_span,
                            ));
                        }
                        Ok(uast::Expr::Const {
                            val: uast::Lit::Int(v),
                            srcinfo: span,
                        })
                    }
                    Some(HostVal::Float(v)) => {
                        if !lv.idx.is_empty() || lv.window.is_some() {
                            return Err(ParseError::syntax(
                                format!("cannot index '{}' because it is the constant {v}", lv.name),
                                lv.name_span,
                            ));
                        }
                        Ok(uast::Expr::Const {
                            val: uast::Lit::Float(v),
                            srcinfo: span,
                        })
                    }
                    _ => Err(ParseError::syntax(
                        format!("variable '{}' undefined", lv.name),
                        lv.name_span,
                    )),
                }
            }

            AstExpr::Attribute(attr) => {
                let AstExpr::Name(base) = &*attr.value else {
                    return self.err(attr.range, "expected configuration reads of the form 'config.field'");
                };
                let config = self.eval_config(base)?;
                let field = attr.attr.id.as_str();
                if config.field(field).is_none() {
                    return self.err(
                        attr.range,
                        format!("config '{}' has no field '{field}'", config.name()),
                    );
                }
                Ok(uast::Expr::ReadConfig {
                    config,
                    field: field.to_owned(),
                    srcinfo: self.spans.span(attr.range),
                })
            }

            AstExpr::NumberLiteral(num) => {
                let span = self.spans.span(num.range);
                let val = match &num.value {
                    Number::Int(i) => match i.as_i64() {
                        Some(v) => uast::Lit::Int(v),
                        None => return self.err(num.range, format!("integer literal too large: {i}")),
                    },
                    Number::Float(f) => uast::Lit::Float(*f),
                    Number::Complex { .. } => {
                        return self.err_unsupported(num.range, "complex literals are not supported");
                    }
                };
                Ok(uast::Expr::Const { val, srcinfo: span })
            }

            AstExpr::BooleanLiteral(b) => Ok(uast::Expr::Const {
                val: uast::Lit::Bool(b.value),
                srcinfo: self.spans.span(b.range),
            }),

            AstExpr::UnaryOp(u) => match u.op {
                UnaryOp::USub => Ok(uast::Expr::USub {
                    arg: Box::new(self.parse_expr(&u.operand)?),
                    srcinfo: self.spans.span(u.range),
                }),
                UnaryOp::UAdd => self.err_unsupported(u.range, "unsupported unary operator: +"),
                UnaryOp::Not => self.err_unsupported(u.range, "unsupported unary operator: not"),
                UnaryOp::Invert => self.err_unsupported(u.range, "unsupported unary operator: ~"),
            },

            AstExpr::BinOp(b) => {
                let op = match convert_binop(b.op) {
                    Ok(op) => op,
                    Err(name) => return self.err_unsupported(b.range, format!("unsupported binary operator: {name}")),
                };
                let lhs = self.parse_expr(&b.left)?;
                let rhs = self.parse_expr(&b.right)?;
                Ok(uast::Expr::BinOp {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    srcinfo: self.spans.span(b.range),
                })
            }

            AstExpr::BoolOp(b) => {
                let op = match b.op {
                    ast::BoolOp::And => uast::BinOp::And,
                    ast::BoolOp::Or => uast::BinOp::Or,
                };
                let srcinfo = self.spans.span(b.range);
                let mut values = b.values.iter();
                let mut lhs = self.parse_expr(values.next().expect("BoolOp has at least two operands"))?;
                for rhs_node in values {
                    let rhs = self.parse_expr(rhs_node)?;
                    lhs = uast::Expr::BinOp {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        srcinfo: srcinfo.clone(),
                    };
                }
                Ok(lhs)
            }

            AstExpr::Compare(cmp) => {
                // a < b < c parses as (a < b) and (b < c)
                let srcinfo = self.spans.span(cmp.range);
                let mut vals = vec![self.parse_expr(&cmp.left)?];
                for v in &cmp.comparators {
                    vals.push(self.parse_expr(v)?);
                }
                let mut result: Option<uast::Expr> = None;
                for (opnode, pair) in cmp.ops.iter().zip(vals.windows(2)) {
                    let op = match convert_cmpop(*opnode) {
                        Ok(op) => op,
                        Err(name) => return self.err_unsupported(cmp.range, format!("unsupported binary operator: {name}")),
                    };
                    let c = uast::Expr::BinOp {
                        op,
                        lhs: Box::new(pair[0].clone()),
                        rhs: Box::new(pair[1].clone()),
                        srcinfo: srcinfo.clone(),
                    };
                    result = Some(match result {
                        None => c,
                        Some(acc) => uast::Expr::BinOp {
                            op: uast::BinOp::And,
                            lhs: Box::new(acc),
                            rhs: Box::new(c),
                            srcinfo: srcinfo.clone(),
                        },
                    });
                }
                result.map_or_else(|| self.err(cmp.range, "empty comparison"), Ok)
            }

            AstExpr::Call(call) => self.parse_call_expr(call),

            _ => self.err_unsupported(e.range(), "unsupported form of expression"),
        }
    }

    fn parse_call_expr(&mut self, call: &ast::ExprCall) -> Result<uast::Expr, ParseError> {
        let span = self.spans.span(call.range);

        if is_unquote_call(call) {
            return self.unquote_expr_site(call);
        }

        // stride(buf, k) is a first-class expression
        if let AstExpr::Name(f) = &*call.func {
            if f.id.as_str() == "stride" {
                return self.parse_stride_expr(call);
            }
        }

        let callee = self.eval_expr_node(&call.func)?;
        let HostVal::Builtin(f) = callee else {
            return self.err(call.func.range(), "expected called object to be a builtin function");
        };
        if !call.arguments.keywords.is_empty() {
            return self.err(call.range, "cannot call a builtin function with keyword arguments");
        }
        let args = call
            .arguments
            .args
            .iter()
            .map(|a| self.parse_expr(a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(uast::Expr::BuiltIn { f, args, srcinfo: span })
    }

    fn parse_stride_expr(&mut self, call: &ast::ExprCall) -> Result<uast::Expr, ParseError> {
        let stride_err = "expected stride(...) to have exactly 2 arguments: the identifier \
                          for the buffer we are talking about and an integer specifying which dimension";
        if !call.arguments.keywords.is_empty() || call.arguments.args.len() != 2 {
            return self.err(call.range, stride_err);
        }
        let AstExpr::Name(buf) = &call.arguments.args[0] else {
            return self.err(call.range, stride_err);
        };
        let dim = match &call.arguments.args[1] {
            AstExpr::NumberLiteral(ast::ExprNumberLiteral {
                value: Number::Int(i), ..
            }) => match i.as_i64().and_then(|v| u32::try_from(v).ok()) {
                Some(v) => v,
                None => return self.err(call.range, stride_err),
            },
            _ => return self.err(call.range, stride_err),
        };
        let name = match self.locals.lookup(buf.id.as_str()) {
            Some(HostVal::Sym(sym) | HostVal::SizeStub(sym)) => sym.clone(),
            _ => {
                return Err(ParseError::syntax(
                    format!("variable '{}' undefined", buf.id),
                    self.spans.span(buf.range),
                ));
            }
        };
        Ok(uast::Expr::Stride {
            name,
            dim,
            srcinfo: self.spans.span(call.range),
        })
    }

    fn eval_config(&mut self, base: &ast::ExprName) -> Result<std::rc::Rc<Config>, ParseError> {
        match self.eval_expr_node(&AstExpr::Name(base.clone()))? {
            HostVal::Config(config) => Ok(config),
            other => Err(ParseError::syntax(
                format!("expected '{}' to be a config object, found {}", base.id, other.kind()),
                self.spans.span(base.range),
            )),
        }
    }
}

pub(crate) fn is_unquote_call(call: &ast::ExprCall) -> bool {
    matches!(&*call.func, AstExpr::Name(n) if n.id.as_str() == "unquote")
}

// --------------------------------------------------------------------------
// Fragment parser (PAST output)

/// Parses pattern fragments. No environments: identifiers stay strings, `_`
/// is a hole, and the unquote protocol is unavailable.
struct FragmentParser {
    spans: SpanMap,
}

impl FragmentParser {
    fn err<T>(&self, range: ruff_text_size::TextRange, msg: impl Into<std::borrow::Cow<'static, str>>) -> Result<T, ParseError> {
        Err(ParseError::syntax(msg, self.spans.span(range)))
    }

    fn parse_stmts(&mut self, stmts: &[AstStmt]) -> Result<Vec<past::Stmt>, ParseError> {
        let mut rstmts = Vec::new();
        for s in stmts {
            match s {
                AstStmt::Assign(assign) => {
                    let span = self.spans.span(assign.range);
                    let [target] = assign.targets.as_slice() else {
                        return self.err(assign.range, "expected only one expression on the left of an assignment");
                    };
                    if let AstExpr::Attribute(attr) = target {
                        let AstExpr::Name(base) = &*attr.value else {
                            return self.err(
                                attr.range,
                                "expected configuration writes of the form 'config.field = ...'",
                            );
                        };
                        rstmts.push(past::Stmt::WriteConfig {
                            config: base.id.to_string(),
                            field: attr.attr.id.to_string(),
                            srcinfo: span,
                        });
                        continue;
                    }
                    let (name, idx) = self.parse_access(target)?;
                    let rhs = self.parse_expr(&assign.value)?;
                    rstmts.push(past::Stmt::Assign {
                        name,
                        idx,
                        rhs,
                        srcinfo: span,
                    });
                }

                AstStmt::AugAssign(aug) => {
                    if aug.op != AstOperator::Add {
                        return self.err(aug.range, "only += reductions are supported");
                    }
                    let (name, idx) = self.parse_access(&aug.target)?;
                    let rhs = self.parse_expr(&aug.value)?;
                    rstmts.push(past::Stmt::Reduce {
                        name,
                        idx,
                        rhs,
                        srcinfo: self.spans.span(aug.range),
                    });
                }

                AstStmt::AnnAssign(ann) => {
                    if ann.value.is_some() {
                        return self.err(ann.range, "variable declaration should not have a value assigned");
                    }
                    let AstExpr::Name(name) = &*ann.target else {
                        return self.err(ann.target.range(), "expected simple name in declaration");
                    };
                    let dims = match &*ann.annotation {
                        AstExpr::Subscript(sub) => {
                            let dims: Vec<&AstExpr> = match &*sub.slice {
                                AstExpr::Tuple(t) => t.elts.iter().collect(),
                                e => vec![e],
                            };
                            dims.into_iter()
                                .map(|d| self.parse_expr(d))
                                .collect::<Result<Vec<_>, _>>()?
                        }
                        AstExpr::Name(_) => Vec::new(),
                        other => return self.err(other.range(), "unrecognized type annotation"),
                    };
                    rstmts.push(past::Stmt::Alloc {
                        name: name.id.to_string(),
                        dims,
                        srcinfo: self.spans.span(ann.range),
                    });
                }

                AstStmt::For(f) => {
                    if !f.orelse.is_empty() {
                        return self.err(f.range, "else clause on for-loops unsupported");
                    }
                    let AstExpr::Name(target) = &*f.target else {
                        return self.err(f.target.range(), "expected simple name for iterator variable");
                    };
                    let (lo, hi) = self.parse_loop_range(&f.iter)?;
                    let body = self.parse_stmts(&f.body)?;
                    rstmts.push(past::Stmt::For {
                        iter: target.id.to_string(),
                        lo,
                        hi,
                        body,
                        srcinfo: self.spans.span(f.range),
                    });
                }

                AstStmt::If(i) => {
                    let cond = self.parse_expr(&i.test)?;
                    let body = self.parse_stmts(&i.body)?;
                    let orelse = self.parse_orelse(&i.elif_else_clauses)?;
                    rstmts.push(past::Stmt::If {
                        cond,
                        body,
                        orelse,
                        srcinfo: self.spans.span(i.range),
                    });
                }

                AstStmt::Expr(es) if matches!(&*es.value, AstExpr::Name(n) if n.id.as_str() == "_") => {
                    rstmts.push(past::Stmt::SHole {
                        srcinfo: self.spans.span(es.range),
                    });
                }

                AstStmt::Expr(es) if matches!(&*es.value, AstExpr::Call(_)) => {
                    let AstExpr::Call(call) = &*es.value else { unreachable!() };
                    let AstExpr::Name(f) = &*call.func else {
                        return self.err(call.func.range(), "expected called object to be a procedure");
                    };
                    if f.id.as_str() == "unquote" {
                        return self.err(call.range, "unquote is not allowed in pattern fragments");
                    }
                    if f.id.as_str() == "stride" {
                        return self.err(call.range, "stride(...) must be a standalone pattern or an expression");
                    }
                    if !call.arguments.keywords.is_empty() {
                        return self.err(call.range, "cannot call a procedure with keyword arguments");
                    }
                    let args = call
                        .arguments
                        .args
                        .iter()
                        .map(|a| self.parse_expr(a))
                        .collect::<Result<Vec<_>, _>>()?;
                    rstmts.push(past::Stmt::Call {
                        name: f.id.to_string(),
                        args,
                        srcinfo: self.spans.span(call.range),
                    });
                }

                AstStmt::Pass(p) => rstmts.push(past::Stmt::Pass {
                    srcinfo: self.spans.span(p.range),
                }),

                other => return self.err(other.range(), "unsupported type of statement"),
            }
        }
        Ok(rstmts)
    }

    fn parse_orelse(&mut self, clauses: &[ast::ElifElseClause]) -> Result<Vec<past::Stmt>, ParseError> {
        let mut tail = Vec::new();
        for clause in clauses.iter().rev() {
            match &clause.test {
                Some(test) => {
                    let cond = self.parse_expr(test)?;
                    let body = self.parse_stmts(&clause.body)?;
                    tail = vec![past::Stmt::If {
                        cond,
                        body,
                        orelse: tail,
                        srcinfo: self.spans.span(clause.range),
                    }];
                }
                None => tail = self.parse_stmts(&clause.body)?,
            }
        }
        Ok(tail)
    }

    /// Loop ranges in patterns are `par(lo, hi)` / `seq(lo, hi)`; anything
    /// else leaves both bounds as holes.
    fn parse_loop_range(&mut self, cond: &AstExpr) -> Result<(past::Expr, past::Expr), ParseError> {
        if let AstExpr::Call(call) = cond {
            if let AstExpr::Name(f) = &*call.func {
                if matches!(f.id.as_str(), "par" | "seq") {
                    if !call.arguments.keywords.is_empty() {
                        return self.err(call.range, "par() and seq() do not support named arguments");
                    }
                    let [lo, hi] = call.arguments.args.as_ref() else {
                        return self.err(call.range, "par() and seq() expect exactly 2 arguments");
                    };
                    return Ok((self.parse_expr(lo)?, self.parse_expr(hi)?));
                }
            }
        }
        let srcinfo = self.spans.span(cond.range());
        Ok((
            past::Expr::EHole {
                srcinfo: srcinfo.clone(),
            },
            past::Expr::EHole { srcinfo },
        ))
    }

    fn parse_access(&mut self, node: &AstExpr) -> Result<(String, Vec<past::Expr>), ParseError> {
        match node {
            AstExpr::Name(n) => Ok((n.id.to_string(), Vec::new())),
            AstExpr::Subscript(sub) => {
                let AstExpr::Name(base) = &*sub.value else {
                    return self.err(sub.range, "expected access to have form 'x' or 'x[...]'");
                };
                let dims: Vec<&AstExpr> = match &*sub.slice {
                    AstExpr::Tuple(t) => t.elts.iter().collect(),
                    e => vec![e],
                };
                if dims.iter().any(|e| matches!(e, AstExpr::Slice(_))) {
                    return self.err(sub.range, "windowing is not supported in patterns");
                }
                let idx = dims
                    .into_iter()
                    .map(|d| self.parse_expr(d))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((base.id.to_string(), idx))
            }
            _ => self.err(node.range(), "expected lhs of form 'x' or 'x[...]'"),
        }
    }

    fn parse_expr(&mut self, e: &AstExpr) -> Result<past::Expr, ParseError> {
        match e {
            AstExpr::Name(_) | AstExpr::Subscript(_) => {
                let span = self.spans.span(e.range());
                let (name, idx) = self.parse_access(e)?;
                if name == "_" && idx.is_empty() {
                    return Ok(past::Expr::EHole { srcinfo: span });
                }
                Ok(past::Expr::Read {
                    name,
                    idx,
                    srcinfo: span,
                })
            }

            AstExpr::Attribute(attr) => {
                let AstExpr::Name(base) = &*attr.value else {
                    return self.err(attr.range, "expected configuration reads of the form 'config.field'");
                };
                Ok(past::Expr::ReadConfig {
                    config: base.id.to_string(),
                    field: attr.attr.id.to_string(),
                    srcinfo: self.spans.span(attr.range),
                })
            }

            AstExpr::NumberLiteral(num) => {
                let span = self.spans.span(num.range);
                let val = match &num.value {
                    Number::Int(i) => match i.as_i64() {
                        Some(v) => uast::Lit::Int(v),
                        None => return self.err(num.range, format!("integer literal too large: {i}")),
                    },
                    Number::Float(f) => uast::Lit::Float(*f),
                    Number::Complex { .. } => return self.err(num.range, "complex literals are not supported"),
                };
                Ok(past::Expr::Const { val, srcinfo: span })
            }

            AstExpr::BooleanLiteral(b) => Ok(past::Expr::Const {
                val: uast::Lit::Bool(b.value),
                srcinfo: self.spans.span(b.range),
            }),

            AstExpr::UnaryOp(u) => match u.op {
                UnaryOp::USub => Ok(past::Expr::USub {
                    arg: Box::new(self.parse_expr(&u.operand)?),
                    srcinfo: self.spans.span(u.range),
                }),
                _ => self.err(u.range, "unsupported unary operator"),
            },

            AstExpr::BinOp(b) => {
                let op = match convert_binop(b.op) {
                    Ok(op) => op,
                    Err(name) => return self.err(b.range, format!("unsupported binary operator: {name}")),
                };
                Ok(past::Expr::BinOp {
                    op,
                    lhs: Box::new(self.parse_expr(&b.left)?),
                    rhs: Box::new(self.parse_expr(&b.right)?),
                    srcinfo: self.spans.span(b.range),
                })
            }

            AstExpr::BoolOp(b) => {
                let op = match b.op {
                    ast::BoolOp::And => uast::BinOp::And,
                    ast::BoolOp::Or => uast::BinOp::Or,
                };
                let srcinfo = self.spans.span(b.range);
                let mut values = b.values.iter();
                let mut lhs = self.parse_expr(values.next().expect("BoolOp has at least two operands"))?;
                for rhs_node in values {
                    let rhs = self.parse_expr(rhs_node)?;
                    lhs = past::Expr::BinOp {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        srcinfo: srcinfo.clone(),
                    };
                }
                Ok(lhs)
            }

            AstExpr::Compare(cmp) => {
                let srcinfo = self.spans.span(cmp.range);
                let mut vals = vec![self.parse_expr(&cmp.left)?];
                for v in &cmp.comparators {
                    vals.push(self.parse_expr(v)?);
                }
                let mut result: Option<past::Expr> = None;
                for (opnode, pair) in cmp.ops.iter().zip(vals.windows(2)) {
                    let op = match convert_cmpop(*opnode) {
                        Ok(op) => op,
                        Err(name) => return self.err(cmp.range, format!("unsupported binary operator: {name}")),
                    };
                    let c = past::Expr::BinOp {
                        op,
                        lhs: Box::new(pair[0].clone()),
                        rhs: Box::new(pair[1].clone()),
                        srcinfo: srcinfo.clone(),
                    };
                    result = Some(match result {
                        None => c,
                        Some(acc) => past::Expr::BinOp {
                            op: uast::BinOp::And,
                            lhs: Box::new(acc),
                            rhs: Box::new(c),
                            srcinfo: srcinfo.clone(),
                        },
                    });
                }
                result.map_or_else(|| self.err(cmp.range, "empty comparison"), Ok)
            }

            AstExpr::Call(call) => {
                let span = self.spans.span(call.range);
                let AstExpr::Name(f) = &*call.func else {
                    return self.err(call.func.range(), "expected called object to be a builtin function");
                };
                match f.id.as_str() {
                    "unquote" => self.err(call.range, "unquote is not allowed in pattern fragments"),
                    "stride" => self.parse_stride_pattern(call),
                    name => {
                        let Some(b) = builtins::lookup(name) else {
                            return self.err(call.func.range(), "expected called object to be a builtin function");
                        };
                        if !call.arguments.keywords.is_empty() {
                            return self.err(call.range, "cannot call a builtin function with keyword arguments");
                        }
                        let args = call
                            .arguments
                            .args
                            .iter()
                            .map(|a| self.parse_expr(a))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(past::Expr::BuiltIn {
                            f: b,
                            args,
                            srcinfo: span,
                        })
                    }
                }
            }

            _ => self.err(e.range(), "unsupported form of expression"),
        }
    }

    fn parse_stride_pattern(&mut self, call: &ast::ExprCall) -> Result<past::Expr, ParseError> {
        let stride_err = "expected stride(...) to have exactly 2 arguments: the identifier \
                          for the buffer we are talking about and an integer specifying which dimension";
        if !call.arguments.keywords.is_empty() || call.arguments.args.len() != 2 {
            return self.err(call.range, stride_err);
        }
        let AstExpr::Name(buf) = &call.arguments.args[0] else {
            return self.err(call.range, stride_err);
        };
        let dim = match &call.arguments.args[1] {
            AstExpr::NumberLiteral(ast::ExprNumberLiteral {
                value: Number::Int(i), ..
            }) => match i.as_i64().and_then(|v| u32::try_from(v).ok()) {
                Some(v) => Some(v),
                None => return self.err(call.range, stride_err),
            },
            AstExpr::Name(n) if n.id.as_str() == "_" => None,
            _ => return self.err(call.range, stride_err),
        };
        Ok(past::Expr::Stride {
            name: buf.id.to_string(),
            dim,
            srcinfo: self.spans.span(call.range),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The scope chain must return to its pre-parse depth even when parsing
    /// fails deep inside nested scopes.
    #[test]
    fn scope_chain_balanced_after_error() {
        let src = "\
def bad(n: size):
    for i in par(0, n):
        for j in par(0, n):
            x[i] = oops
";
        let anchor = SourceAnchor::new("test.py");
        let scope = CaptureScope::new();
        let spans = SpanMap::new(src, &anchor);
        let body = parse_host_module(src, &spans).unwrap();
        let AstStmt::FunctionDef(fdef) = &body[0] else {
            panic!("expected function def");
        };

        let mut parser = Parser::new(spans, &scope);
        parser.locals.push();
        parser.seed_builtins();
        let result = parser.parse_fdef(fdef, None);
        assert!(result.is_err(), "reference to undefined 'x' should fail");
        assert_eq!(parser.locals.depth(), 1, "only the base frame should remain");
        parser.locals.pop();
        assert_eq!(parser.locals.depth(), 0);
    }
}
