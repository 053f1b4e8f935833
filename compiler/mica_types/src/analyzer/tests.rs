use super::*;
use crate::testutil::TestBuilder;
use mica_ir::Expr;
use pretty_assertions::assert_eq;

#[test]
fn literal_analysis_yields_rvalues() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let env = tb.env();
    let expr = tb.int_lit("41");
    let pv = safe_analyze_one(&comp, expr, &env).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(pv.ty, comp.types.int32_type);
    assert!(pv.is_temp);
}

#[test]
fn analysis_is_idempotent() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let env = tb.env();
    let code = tb.code_returning(
        vec![("x", None, mica_ir::Tempness::DontCare)],
        vec![tb.name_ref("x")],
    );
    tb.install_proc("id", code);
    let call = tb.call(tb.name_ref("id"), vec![tb.int_lit("1")]);
    let first = safe_analyze_one(&comp, call, &env).unwrap_or_else(|e| panic!("{e}"));
    let second = safe_analyze_one(&comp, call, &env).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(first, second);
}

#[test]
fn caching_disabler_blocks_cache_insertion() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let env = tb.env();
    let expr = tb.int_lit("7");
    {
        let _disabler = comp.disable_caching();
        safe_analyze_one(&comp, expr, &env).unwrap_or_else(|e| panic!("{e}"));
        assert!(comp.analysis_cache.borrow().is_empty());
    }
    safe_analyze_one(&comp, expr, &env).unwrap_or_else(|e| panic!("{e}"));
    assert!(!comp.analysis_cache.borrow().is_empty());
}

#[test]
fn generic_overload_binds_pattern_variable() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let env = tb.env();
    // f(x: T) = x with pattern variable T.
    let t_name = comp.name("T");
    let ty_pattern = tb.name_ref("T");
    let mut code = (*tb.code_returning(
        vec![("x", Some(ty_pattern), mica_ir::Tempness::DontCare)],
        vec![tb.name_ref("x")],
    ))
    .clone();
    code.pattern_vars = vec![mica_ir::PatternVar {
        name: t_name,
        multi: false,
    }];
    tb.install_proc("f", std::rc::Rc::new(code));

    let int_call = tb.call(tb.name_ref("f"), vec![tb.int_lit("1")]);
    let pv = safe_analyze_one(&comp, int_call, &env).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(pv.ty, comp.types.int32_type);

    let bool_call = tb.call(tb.name_ref("f"), vec![tb.bool_lit(true)]);
    let pv = safe_analyze_one(&comp, bool_call, &env).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(pv.ty, comp.types.bool_type);
}

#[test]
fn short_circuit_type_is_bool_even_with_static_false() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let env = tb.env();
    // crash() is a perfectly analyzable callable returning Bool.
    tb.install_proc("crash", tb.code_returning(vec![], vec![tb.bool_lit(true)]));
    let call = tb.call(tb.name_ref("crash"), vec![]);
    let and = comp.add_expr(Expr::And(tb.bool_lit(false), call), mica_ir::Span::DUMMY);
    let pv = safe_analyze_one(&comp, and, &env).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(pv.ty, comp.types.bool_type);
    assert!(pv.is_temp);
}

#[test]
fn implicit_unpack_expands_a_single_multi_expression() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let env = tb.env();
    // g() returns two values; a two-position context accepts a lone call.
    let two = tb.code_returning(vec![], vec![tb.int_lit("1"), tb.bool_lit(true)]);
    tb.install_proc("g", two);
    let call = tb.call(tb.name_ref("g"), vec![]);
    let mpv = safe_analyze_multi(&comp, &[call], &env, 2).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(mpv.len(), 2);
    assert_eq!(mpv.values[0].ty, comp.types.int32_type);
    assert_eq!(mpv.values[1].ty, comp.types.bool_type);
}

#[test]
fn unknown_name_is_a_user_error() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let env = tb.env();
    let expr = tb.name_ref("nonexistent");
    let err = safe_analyze_one(&comp, expr, &env).unwrap_err();
    assert_eq!(err.code, mica_diagnostic::ErrorCode::E3008);
}

#[test]
fn tuple_literal_analysis() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let env = tb.env();
    let tuple = comp.add_expr(
        Expr::Tuple(vec![tb.int_lit("1"), tb.bool_lit(false)]),
        mica_ir::Span::DUMMY,
    );
    let pv = safe_analyze_one(&comp, tuple, &env).unwrap_or_else(|e| panic!("{e}"));
    let expected = comp
        .types
        .tuple_type(vec![comp.types.int32_type, comp.types.bool_type]);
    assert_eq!(pv.ty, expected);
    assert!(pv.is_temp);
}

#[test]
fn call_by_name_analyzes_caller_expressions() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let env = tb.env();
    let code = tb.code_returning(
        vec![("x", None, mica_ir::Tempness::DontCare)],
        vec![tb.name_ref("x")],
    );
    let proc = tb.install_proc("byname", tb.code_returning(vec![], vec![tb.int_lit("0")]));
    // Shadow with a call-by-name overload taking one argument.
    tb.add_overload(&proc, code, true);
    let call = tb.call(tb.name_ref("byname"), vec![tb.int_lit("9")]);
    let pv = safe_analyze_one(&comp, call, &env).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(pv.ty, comp.types.int32_type);
}

#[test]
fn recursion_with_declared_return_type_resolves() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let env = tb.env();
    // f(x) Int32 { return f(x); } — bottomless, but the declared type
    // resolves the fixed point.
    let recursive_call = tb.call(tb.name_ref("f"), vec![tb.name_ref("x")]);
    let body = tb.return_stmt(vec![recursive_call]);
    let mut code = (*tb.code_with_body(vec![("x", None, mica_ir::Tempness::DontCare)], body)).clone();
    let int32_expr = tb.obj_expr(crate::Object::Type(comp.types.int32_type));
    code.return_specs = Some(vec![mica_ir::ReturnSpec {
        by_ref: false,
        ty: int32_expr,
        name: None,
    }]);
    tb.install_proc("f", std::rc::Rc::new(code));
    let call = tb.call(tb.name_ref("f"), vec![tb.int_lit("3")]);
    let pv = safe_analyze_one(&comp, call, &env).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(pv.ty, comp.types.int32_type);
}

#[test]
fn dispatch_expansion_merges_branches() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let env = tb.env();

    // variant V = Int32 | Float64
    let int_expr = tb.obj_expr(crate::Object::Type(comp.types.int32_type));
    let float_expr = tb.obj_expr(crate::Object::Type(comp.types.float64_type));
    let decl = std::rc::Rc::new(mica_ir::VariantDecl {
        name: comp.name("V"),
        params: Vec::new(),
        var_param: None,
        default_instances: vec![int_expr, float_expr],
        instances: std::cell::RefCell::new(Vec::new()),
        module: std::cell::RefCell::new(None),
    });
    tb.module.add_item(mica_ir::Item::Variant(decl.clone()));
    let v_ty = comp
        .types
        .variant_type(&decl, Vec::new(), mica_ir::Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));

    // f(x) = 1 — every member arm agrees on Int32.
    tb.install_proc(
        "f",
        tb.code_returning(
            vec![("x", None, mica_ir::Tempness::DontCare)],
            vec![tb.int_lit("1")],
        ),
    );

    let x = crate::PValue::lvalue(v_ty);
    let dispatch_arg = comp.add_expr(
        Expr::Dispatch(tb.obj_expr(crate::Object::PValue(x))),
        mica_ir::Span::DUMMY,
    );
    let call = tb.call(tb.name_ref("f"), vec![dispatch_arg]);
    let pv = safe_analyze_one(&comp, call, &env).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(pv.ty, comp.types.int32_type);

    // Each arm specialized separately: one entry per member type.
    let f_int = crate::invoke::lookup_invoke(
        &comp,
        &env.lookup(comp.name("f")).unwrap_or_else(|| panic!("f")),
        &[comp.types.int32_type],
        &[mica_ir::Tempness::Lvalue],
    );
    assert!(f_int.analyzed.get());
}
