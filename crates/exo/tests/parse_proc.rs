//! Surface-parser tests: lifting procedure definitions into UAST.

use exo::{CaptureScope, HostVal, Memory, ParseError, SourceAnchor, parse_config, parse_proc, uast};

fn anchor() -> SourceAnchor {
    SourceAnchor::new("test.py")
}

fn parse_ok(src: &str) -> uast::Proc {
    parse_proc(src, &anchor(), &CaptureScope::new()).expect("procedure should parse")
}

fn parse_err(src: &str) -> ParseError {
    parse_proc(src, &anchor(), &CaptureScope::new()).expect_err("procedure should be rejected")
}

#[test]
fn conv1d_parses() {
    let src = "\
def conv1d(n: size, m: size, r: size, x: f32[n], w: f32[m], res: f32[r]):
    for i in par(0, r):
        res[i] = 0.0
    for i in par(0, r):
        for j in par(0, n):
            if i <= j and j < i + m:
                res[i] += x[j] * w[i - j + m - 1]
";
    let p = parse_ok(src);
    assert_eq!(p.name, "conv1d");
    assert_eq!(p.args.len(), 6);
    assert_eq!(p.body.len(), 2, "two top-level loops");
    assert!(p.preds.is_empty());
}

#[test]
fn size_args_resolve_to_size_reads() {
    let src = "\
def foo(n: size, x: f32[n]):
    for i in par(0, n):
        x[i] = 0.0
";
    let p = parse_ok(src);
    let uast::Stmt::For { range, .. } = &p.body[0] else {
        panic!("expected a loop");
    };
    let uast::LoopRange::Par { hi, .. } = range else {
        panic!("expected a par range");
    };
    let uast::Expr::Read { name, idx, .. } = hi else {
        panic!("expected the bound to read the size argument");
    };
    assert_eq!(name, &p.args[0].name, "bound must reuse the size argument's symbol");
    assert!(idx.is_empty());
}

#[test]
fn leading_asserts_become_preconditions() {
    let src = "\
def foo(n: size):
    assert n > 0
    assert n < 100
    pass
";
    let p = parse_ok(src);
    assert_eq!(p.preds.len(), 2);
    assert_eq!(p.body.len(), 1);
}

#[test]
fn assert_after_statement_is_rejected() {
    let src = "\
def foo(n: size):
    pass
    assert n > 0
";
    let err = parse_err(src);
    assert!(
        err.message().contains("beginning"),
        "message should say asserts belong at the start, got: {err}"
    );
}

#[test]
fn assert_with_message_is_rejected() {
    let err = parse_err("def foo(n: size):\n    assert n > 0, 'nope'\n    pass\n");
    assert!(err.message().contains("should not have messages"), "got: {err}");
}

#[test]
fn return_type_is_rejected() {
    let err = parse_err("def foo(n: size) -> size:\n    pass\n");
    assert!(err.message().contains("return types"), "got: {err}");
}

#[test]
fn default_arguments_are_rejected() {
    let err = parse_err("def foo(n: size = 4):\n    pass\n");
    assert!(err.message().contains("name : type"), "got: {err}");
}

#[test]
fn untyped_argument_is_rejected() {
    let err = parse_err("def foo(n):\n    pass\n");
    assert!(err.message().contains("expected argument to be typed"), "got: {err}");
}

#[test]
fn repeated_argument_name_is_rejected() {
    let err = parse_err("def foo(n: size, n: size):\n    pass\n");
    assert!(err.message().contains("repeated argument name"), "got: {err}");
}

#[test]
fn annotated_declaration_introduces_alloc() {
    let src = "\
def foo(n: size):
    tmp: f32[n, n]
    for i in par(0, n):
        tmp[i, i] = 1.0
";
    let p = parse_ok(src);
    let uast::Stmt::Alloc { typ, mem, .. } = &p.body[0] else {
        panic!("expected an allocation");
    };
    assert!(mem.is_none());
    let uast::Type::Tensor { dims, is_window, .. } = typ else {
        panic!("expected a tensor type");
    };
    assert_eq!(dims.len(), 2);
    assert!(!is_window);
}

#[test]
fn memory_annotation_resolves_in_captured_scope() {
    let scope = CaptureScope::new().global("DRAM", HostVal::Memory(Memory::new("DRAM")));
    let src = "\
def foo(n: size, x: f32[n] @ DRAM):
    tmp: f32[n] @ DRAM
    tmp[0] = 0.0
";
    let p = parse_proc(src, &anchor(), &scope).expect("procedure should parse");
    assert_eq!(p.args[1].mem.as_ref().map(Memory::name), Some("DRAM"));
    let uast::Stmt::Alloc { mem, .. } = &p.body[0] else {
        panic!("expected an allocation");
    };
    assert_eq!(mem.as_ref().map(Memory::name), Some("DRAM"));
}

#[test]
fn unknown_memory_annotation_fails_with_span() {
    let err = parse_err("def foo(n: size, x: f32[n] @ FastMem):\n    pass\n");
    assert!(err.message().contains("not defined"), "got: {err}");
    assert_eq!(err.span().file.as_ref(), "test.py");
}

#[test]
fn declaration_with_value_is_rejected() {
    let err = parse_err("def foo(n: size):\n    tmp: f32[n] = 0.0\n");
    assert!(err.message().contains("should not have a value"), "got: {err}");
}

#[test]
fn augmented_assignment_only_accepts_plus() {
    let src = "\
def foo(n: size, x: f32[n]):
    for i in par(0, n):
        x[i] += 1.0
";
    let p = parse_ok(src);
    let uast::Stmt::For { body, .. } = &p.body[0] else {
        panic!("expected a loop");
    };
    assert!(matches!(body[0], uast::Stmt::Reduce { .. }));

    let err = parse_err("def foo(n: size, x: f32[n]):\n    x[0] -= 1.0\n");
    assert!(err.message().contains("only += reductions"), "got: {err}");
}

#[test]
fn fresh_assignment_to_undeclared_scalar() {
    let src = "\
def foo(n: size):
    acc = 0.0
    acc = 1.0
";
    let p = parse_ok(src);
    let uast::Stmt::FreshAssign { name: first, .. } = &p.body[0] else {
        panic!("first assignment should be fresh");
    };
    let uast::Stmt::Assign { name: second, idx, .. } = &p.body[1] else {
        panic!("second assignment should be a plain assign");
    };
    assert_eq!(first, second, "both statements should target the same symbol");
    assert!(idx.is_empty());
}

#[test]
fn writing_a_size_is_rejected() {
    let err = parse_err("def foo(n: size):\n    n = 4\n");
    assert!(err.message().contains("cannot write to size variable"), "got: {err}");
}

#[test]
fn undefined_variable_read_is_rejected() {
    let err = parse_err("def foo(n: size):\n    y = x\n");
    assert!(err.message().contains("variable 'x' undefined"), "got: {err}");
}

#[test]
fn loop_requires_par_or_seq() {
    let err = parse_err("def foo(n: size):\n    for i in range(0, n):\n        pass\n");
    assert!(
        err.message().contains("'par(...,...)' or 'seq(...,...)'"),
        "got: {err}"
    );
}

#[test]
fn seq_loop_parses_to_seq_range() {
    let p = parse_ok("def foo(n: size):\n    for i in seq(0, n):\n        pass\n");
    let uast::Stmt::For { range, .. } = &p.body[0] else {
        panic!("expected a loop");
    };
    assert!(matches!(range, uast::LoopRange::Seq { .. }));
}

#[test]
fn loop_iterators_shadow_in_nested_scopes() {
    let src = "\
def foo(n: size, x: f32[n]):
    for i in par(0, n):
        for i in par(0, n):
            x[i] = 0.0
        x[i] = 1.0
";
    let p = parse_ok(src);
    let uast::Stmt::For { iter: outer, body, .. } = &p.body[0] else {
        panic!("expected outer loop");
    };
    let uast::Stmt::For { iter: inner, body: inner_body, .. } = &body[0] else {
        panic!("expected inner loop");
    };
    assert_ne!(outer, inner, "shadowed iterators are distinct symbols");
    let uast::Stmt::Assign { idx, .. } = &inner_body[0] else {
        panic!("expected inner assignment");
    };
    let uast::Expr::Read { name, .. } = &idx[0] else {
        panic!("expected index read");
    };
    assert_eq!(name, inner, "inner body sees the inner iterator");
    let uast::Stmt::Assign { idx, .. } = &body[1] else {
        panic!("expected outer assignment");
    };
    let uast::Expr::Read { name, .. } = &idx[0] else {
        panic!("expected index read");
    };
    assert_eq!(name, outer, "after the inner loop the outer iterator is visible again");
}

#[test]
fn builtins_are_seeded() {
    let src = "\
def foo(x: f32[4]):
    x[0] = sin(x[1])
    x[1] = relu(x[2])
";
    let p = parse_ok(src);
    let uast::Stmt::Assign { rhs, .. } = &p.body[0] else {
        panic!("expected assignment");
    };
    assert!(matches!(rhs, uast::Expr::BuiltIn { f: exo::BuiltIn::Sin, .. }));
}

#[test]
fn stride_is_a_first_class_expression() {
    let src = "\
def foo(n: size, x: f32[n]):
    assert stride(x, 0) == 1
    pass
";
    let p = parse_ok(src);
    let uast::Expr::BinOp { lhs, .. } = &p.preds[0] else {
        panic!("expected comparison");
    };
    assert!(matches!(&**lhs, uast::Expr::Stride { dim: 0, .. }));
}

#[test]
fn window_expression_parses() {
    let src = "\
def foo(n: size, x: [f32][n], y: f32[n]):
    y[0:n] = 0.0
";
    // windowing on the left of an assignment is rejected...
    let err = parse_err(src);
    assert!(err.message().contains("windowing"), "got: {err}");

    // ...but fine in expression position
    let src = "\
def foo(n: size, dst: [f32][n], src: f32[n]):
    win = src[0:n]
";
    let p = parse_ok(src);
    let uast::Stmt::FreshAssign { rhs, .. } = &p.body[0] else {
        panic!("expected fresh assignment");
    };
    let uast::Expr::Window { idx, .. } = rhs else {
        panic!("expected window expression");
    };
    assert!(matches!(idx[0], uast::WAccess::Interval { .. }));
}

#[test]
fn window_argument_type_parses() {
    let p = parse_ok("def foo(n: size, src: [i8][n]):\n    pass\n");
    let uast::Type::Tensor { is_window, .. } = &p.args[1].typ else {
        panic!("expected tensor type");
    };
    assert!(is_window);
}

#[test]
fn slice_step_is_rejected() {
    let err = parse_err("def foo(n: size, x: f32[n]):\n    w = x[0:n:2]\n");
    assert!(err.message().contains("x[i:j]"), "got: {err}");
}

#[test]
fn procedure_call_resolves_callee_in_scope() {
    let callee_src = "\
def clear(n: size, x: f32[n]):
    for i in par(0, n):
        x[i] = 0.0
";
    let callee = parse_ok(callee_src);
    let scope = CaptureScope::new().local("clear", HostVal::Proc(std::rc::Rc::new(callee)));
    let src = "\
def caller(n: size, x: f32[n]):
    clear(n, x)
";
    let p = parse_proc(src, &anchor(), &scope).expect("caller should parse");
    let uast::Stmt::Call { proc, args, .. } = &p.body[0] else {
        panic!("expected call statement");
    };
    assert_eq!(proc.name, "clear");
    assert_eq!(args.len(), 2);
}

#[test]
fn calling_a_non_procedure_is_rejected() {
    let scope = CaptureScope::new().local("clear", HostVal::Int(3));
    let err = parse_proc("def caller(n: size):\n    clear(n)\n", &anchor(), &scope)
        .expect_err("calling an integer should fail");
    assert!(err.message().contains("to be a procedure"), "got: {err}");
}

#[test]
fn captured_constants_become_literals() {
    let scope = CaptureScope::new().local("TILE", HostVal::Int(8)).global("EPS", HostVal::Float(0.5));
    let src = "\
def foo(x: f32[8]):
    x[0] = TILE + EPS
";
    let p = parse_proc(src, &anchor(), &scope).expect("should parse");
    let uast::Stmt::Assign { rhs, .. } = &p.body[0] else {
        panic!("expected assignment");
    };
    let uast::Expr::BinOp { lhs, rhs, .. } = rhs else {
        panic!("expected binop");
    };
    assert!(matches!(&**lhs, uast::Expr::Const { val: uast::Lit::Int(8), .. }));
    assert!(matches!(&**rhs, uast::Expr::Const { val: uast::Lit::Float(_), .. }));
}

#[test]
fn indexing_a_captured_constant_is_rejected() {
    let scope = CaptureScope::new().local("TILE", HostVal::Int(8));
    let err = parse_proc("def foo(n: size):\n    y = TILE[0]\n", &anchor(), &scope)
        .expect_err("indexing a constant should fail");
    assert!(err.message().contains("constant"), "got: {err}");
}

#[test]
fn config_write_and_read() {
    let cfg = parse_config(
        "class ConfigAB:\n    a: f32\n    b: f32\n",
        &SourceAnchor::new("cfg.py"),
    )
    .expect("config should parse");
    let scope = CaptureScope::new().global("ConfigAB", HostVal::Config(std::rc::Rc::new(cfg)));
    let src = "\
def foo(x: f32[4]):
    ConfigAB.a = 32.0
    x[0] = ConfigAB.a
";
    let p = parse_proc(src, &anchor(), &scope).expect("should parse");
    let uast::Stmt::WriteConfig { config, field, .. } = &p.body[0] else {
        panic!("expected config write");
    };
    assert_eq!(config.name(), "ConfigAB");
    assert_eq!(field, "a");
    let uast::Stmt::Assign { rhs, .. } = &p.body[1] else {
        panic!("expected assignment");
    };
    assert!(matches!(rhs, uast::Expr::ReadConfig { .. }));
}

#[test]
fn config_write_of_unknown_field_is_rejected() {
    let cfg = parse_config("class Cfg:\n    a: f32\n", &SourceAnchor::new("cfg.py")).unwrap();
    let scope = CaptureScope::new().global("Cfg", HostVal::Config(std::rc::Rc::new(cfg)));
    let err = parse_proc("def foo(n: size):\n    Cfg.missing = 1.0\n", &anchor(), &scope)
        .expect_err("unknown field should fail");
    assert!(err.message().contains("no field 'missing'"), "got: {err}");
}

#[test]
fn config_rejects_generic_numeric_fields() {
    let err = parse_config("class Cfg:\n    a: R\n", &SourceAnchor::new("cfg.py"))
        .expect_err("R fields should be rejected");
    assert!(err.message().contains("field type"), "got: {err}");
}

#[test]
fn statement_hole_is_pattern_only() {
    let err = parse_err("def foo(n: size):\n    _\n");
    assert!(err.message().contains("only allowed in patterns"), "got: {err}");
}

#[test]
fn unsupported_operators_are_rejected() {
    let err = parse_err("def foo(n: size, x: f32[n]):\n    x[0] = 1 ** 2\n");
    assert!(err.message().contains("unsupported binary operator: **"), "got: {err}");
}

#[test]
fn spans_carry_the_anchor_offsets() {
    let src = "def foo(n: size):\n    y = x\n";
    let err = parse_proc(src, &SourceAnchor::at("lib.py", 40, 4), &CaptureScope::new())
        .expect_err("undefined variable");
    assert_eq!(err.span().file.as_ref(), "lib.py");
    assert_eq!(err.span().line, 42, "line offset is applied");
    assert!(err.span().col > 4, "dedent offset is applied");
}

#[test]
fn chained_comparison_desugars_to_and() {
    let p = parse_ok("def foo(n: size):\n    if 0 < n and n < 10:\n        pass\n");
    let uast::Stmt::If { cond, .. } = &p.body[0] else {
        panic!("expected if");
    };
    assert!(matches!(
        cond,
        uast::Expr::BinOp {
            op: uast::BinOp::And,
            ..
        }
    ));
}
