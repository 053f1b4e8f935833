use super::*;
use crate::testutil::TestBuilder;
use crate::Compilation;
use mica_ir::{Expr, Item, RecordDecl, RecordField, Span, Tempness};
use pretty_assertions::assert_eq;
use std::cell::RefCell;

fn install_record(tb: &TestBuilder<'_>, name: &str, body: RecordBody) -> Rc<RecordDecl> {
    install_record_with_params(tb, name, Vec::new(), body)
}

fn install_record_with_params(
    tb: &TestBuilder<'_>,
    name: &str,
    params: Vec<Name>,
    body: RecordBody,
) -> Rc<RecordDecl> {
    let decl = Rc::new(RecordDecl {
        name: tb.comp.name(name),
        params,
        var_param: None,
        pattern_vars: Vec::new(),
        predicate: None,
        body,
        module: RefCell::new(None),
    });
    tb.module.add_item(Item::Record(decl.clone()));
    decl
}

#[test]
fn declared_fields_materialize_lazily_once() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let int_expr = tb.obj_expr(Object::Type(comp.types.int32_type));
    let float_expr = tb.obj_expr(Object::Type(comp.types.float64_type));
    let decl = install_record(
        &tb,
        "P",
        RecordBody::Fields(vec![
            RecordField {
                name: comp.name("x"),
                ty: int_expr,
                var_field: false,
            },
            RecordField {
                name: comp.name("y"),
                ty: float_expr,
                var_field: false,
            },
        ]),
    );
    let ty = comp
        .types
        .record_type(&decl, Vec::new(), Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));

    assert!(comp.types.with_meta(ty, |m| m.record_fields.is_none()));
    let fields = comp.record_fields(ty).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(fields.types, vec![comp.types.int32_type, comp.types.float64_type]);
    assert_eq!(fields.names.len(), 2);
    assert_eq!(fields.index_map[&comp.name("y")], 1);

    // Second query returns the cached list.
    let again = comp.record_fields(ty).unwrap_or_else(|e| panic!("{e}"));
    assert!(Rc::ptr_eq(&fields, &again));
}

#[test]
fn record_params_substitute_into_field_types() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let t_param = comp.name("T");
    let field_ty = tb.name_ref("T");
    let decl = install_record_with_params(
        &tb,
        "BoxLike",
        vec![t_param],
        RecordBody::Fields(vec![RecordField {
            name: comp.name("value"),
            ty: field_ty,
            var_field: false,
        }]),
    );
    let ty = comp
        .types
        .record_type(&decl, vec![Object::Type(comp.types.float64_type)], Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));
    let fields = comp.record_fields(ty).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(fields.types, vec![comp.types.float64_type]);
}

#[test]
fn computed_body_yields_name_type_pairs() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    // record R[T] = ((#a, T), (#b, Int32))
    let t_param = comp.name("T");
    let pair_a = comp.add_expr(
        Expr::Tuple(vec![
            tb.obj_expr(Object::Ident(comp.name("a"))),
            tb.name_ref("T"),
        ]),
        Span::DUMMY,
    );
    let pair_b = comp.add_expr(
        Expr::Tuple(vec![
            tb.obj_expr(Object::Ident(comp.name("b"))),
            tb.obj_expr(Object::Type(comp.types.int32_type)),
        ]),
        Span::DUMMY,
    );
    let decl = install_record_with_params(
        &tb,
        "R",
        vec![t_param],
        RecordBody::Computed(vec![pair_a, pair_b]),
    );
    let ty = comp
        .types
        .record_type(&decl, vec![Object::Type(comp.types.float64_type)], Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));

    let fields = comp.record_fields(ty).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(fields.field_count(), 2);
    assert_eq!(comp.str(fields.names[0]), "a");
    assert_eq!(fields.types[0], comp.types.float64_type);
    assert_eq!(comp.str(fields.names[1]), "b");
    assert_eq!(fields.types[1], comp.types.int32_type);
}

#[test]
fn computed_body_with_properties_installs_overloads() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    // prop procedure with no overloads yet
    let prop_proc = Rc::new(mica_ir::Procedure::new(comp.name("sizeHint")));
    tb.module
        .add_item(Item::Proc(prop_proc.clone()));

    // record R = RecordWithProperties[[[sizeHint, 8]], [(#a, Int32)]]
    let prop_tuple = comp.add_expr(
        Expr::Tuple(vec![
            tb.obj_expr(Object::Proc(prop_proc.clone())),
            comp.add_expr(
                Expr::StaticExpr(tb.int_lit("8")),
                Span::DUMMY,
            ),
        ]),
        Span::DUMMY,
    );
    let props = comp.add_expr(Expr::Tuple(vec![prop_tuple]), Span::DUMMY);
    let field_pair = comp.add_expr(
        Expr::Tuple(vec![
            tb.obj_expr(Object::Ident(comp.name("a"))),
            tb.obj_expr(Object::Type(comp.types.int32_type)),
        ]),
        Span::DUMMY,
    );
    let field_list = comp.add_expr(Expr::Tuple(vec![field_pair]), Span::DUMMY);
    let rwp = tb.name_ref("RecordWithProperties");
    let rwp_type = comp.add_expr(
        Expr::Indexing {
            base: rwp,
            args: vec![props, field_list],
        },
        Span::DUMMY,
    );
    // The computed body constructs a value of the RecordWithProperties type.
    let body = tb.call(rwp_type, vec![]);
    let decl = install_record(&tb, "R", RecordBody::Computed(vec![body]));
    let ty = comp
        .types
        .record_type(&decl, Vec::new(), Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));

    let fields = comp.record_fields(ty).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(fields.field_count(), 1);
    assert_eq!(comp.str(fields.names[0]), "a");
    assert_eq!(fields.types[0], comp.types.int32_type);

    // The property overload answers sizeHint(Static[R]) with the static 8.
    assert_eq!(prop_proc.overloads.borrow().len(), 1);
    let static_r = comp.types.static_type(Object::Type(ty));
    let entry = crate::invoke::safe_analyze_callable(
        &comp,
        &Object::Proc(prop_proc),
        &[static_r],
        &[Tempness::Rvalue],
    )
    .unwrap_or_else(|e| panic!("{e}"));
    let ret = entry.return_types.borrow()[0];
    let Some(Object::Holder(holder)) = crate::unwrap_static_type(&comp, ret) else {
        panic!("property did not return a static value");
    };
    assert_eq!(holder.as_i128(true), 8);
}

#[test]
fn var_field_expands_to_a_type_sequence() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    // record Multi[..Ts] { items: ..Ts; tail: Int32; }
    let ts_param = comp.name("Ts");
    let items_ty = tb.name_ref("Ts");
    let tail_ty = tb.obj_expr(Object::Type(comp.types.int32_type));
    let decl = Rc::new(RecordDecl {
        name: comp.name("Multi"),
        params: Vec::new(),
        var_param: Some(ts_param),
        pattern_vars: Vec::new(),
        predicate: None,
        body: RecordBody::Fields(vec![
            RecordField {
                name: comp.name("items"),
                ty: items_ty,
                var_field: true,
            },
            RecordField {
                name: comp.name("tail"),
                ty: tail_ty,
                var_field: false,
            },
        ]),
        module: RefCell::new(None),
    });
    tb.module.add_item(Item::Record(decl.clone()));
    let ty = comp
        .types
        .record_type(
            &decl,
            vec![
                Object::Type(comp.types.bool_type),
                Object::Type(comp.types.float64_type),
            ],
            Span::DUMMY,
        )
        .unwrap_or_else(|e| panic!("{e}"));
    let fields = comp.record_fields(ty).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(
        fields.types,
        vec![
            comp.types.bool_type,
            comp.types.float64_type,
            comp.types.int32_type
        ]
    );
    assert_eq!(fields.var_field_position, Some(0));
    assert_eq!(fields.var_field_len, 2);
}

#[test]
fn variant_instances_extend_members_via_pattern() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    // variant Opt[T] = T; instance Opt[T] | Bool
    let t_param = comp.name("T");
    let default_member = tb.name_ref("T");
    let decl = Rc::new(mica_ir::VariantDecl {
        name: comp.name("Opt"),
        params: vec![t_param],
        var_param: None,
        default_instances: vec![default_member],
        instances: RefCell::new(Vec::new()),
        module: RefCell::new(None),
    });
    tb.module.add_item(Item::Variant(decl.clone()));

    let target = comp.add_expr(
        Expr::Indexing {
            base: tb.name_ref("Opt"),
            args: vec![tb.name_ref("U")],
        },
        Span::DUMMY,
    );
    let bool_member = tb.obj_expr(Object::Type(comp.types.bool_type));
    let instance = Rc::new(mica_ir::InstanceDecl {
        pattern_vars: vec![mica_ir::PatternVar {
            name: comp.name("U"),
            multi: false,
        }],
        target,
        predicate: None,
        members: vec![bool_member],
        module: RefCell::new(Some(tb.module.clone())),
    });
    decl.instances.borrow_mut().push(instance);

    let ty = comp
        .types
        .variant_type(&decl, vec![Object::Type(comp.types.int32_type)], Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));
    let members = comp.variant_members(ty).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(*members, vec![comp.types.int32_type, comp.types.bool_type]);
}

#[test]
fn empty_variant_is_rejected() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let decl = Rc::new(mica_ir::VariantDecl {
        name: comp.name("Empty"),
        params: Vec::new(),
        var_param: None,
        default_instances: Vec::new(),
        instances: RefCell::new(Vec::new()),
        module: RefCell::new(None),
    });
    tb.module.add_item(Item::Variant(decl.clone()));
    let ty = comp
        .types
        .variant_type(&decl, Vec::new(), Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));
    let err = comp.variant_members(ty).unwrap_err();
    assert_eq!(err.code, ErrorCode::E2003);
}
