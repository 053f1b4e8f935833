use super::*;
use crate::context::Compilation;
use crate::object::Object;
use mica_ir::{Expr, Item, Module, RecordBody, RecordField, RecordDecl};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn tuple_layout_matches_struct_rules() {
    let comp = Compilation::new();
    let t = comp
        .types
        .tuple_type(vec![comp.types.int32_type, comp.types.int32_type]);
    assert_eq!(comp.type_size(t), Ok(8));
    assert_eq!(comp.type_alignment(t), Ok(4));
    let offsets = comp.field_offsets(t).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(*offsets, vec![0, 4]);
}

#[test]
fn layout_is_cached_on_first_query() {
    let comp = Compilation::new();
    let t = comp
        .types
        .tuple_type(vec![comp.types.int64_type, comp.types.int8_type]);
    let first = comp.type_layout(t).unwrap_or_else(|e| panic!("{e}"));
    let second = comp.type_layout(t).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(first, second);
    assert_eq!(first.size, 16);
    assert_eq!(first.align, 8);
}

#[test]
fn alignment_is_max_of_fields() {
    let comp = Compilation::new();
    let t = comp.types.tuple_type(vec![
        comp.types.int8_type,
        comp.types.float64_type,
        comp.types.int16_type,
    ]);
    assert_eq!(comp.type_alignment(t), Ok(8));
    // Size covers the field extents padded to alignment.
    assert_eq!(comp.type_size(t), Ok(24));
}

#[test]
fn array_size_is_aligned_element_stride() {
    let comp = Compilation::new();
    let a = comp.types.array_type(comp.types.int32_type, 7);
    assert_eq!(comp.type_size(a), Ok(28));
    assert_eq!(comp.type_alignment(a), Ok(4));
}

#[test]
fn union_layout_covers_largest_member() {
    let comp = Compilation::new();
    let u = comp
        .types
        .union_type(vec![comp.types.int8_type, comp.types.float64_type]);
    assert_eq!(comp.type_size(u), Ok(8));
    assert_eq!(comp.type_alignment(u), Ok(8));
}

#[test]
fn static_types_occupy_one_byte() {
    let comp = Compilation::new();
    let s = comp.types.static_type(Object::Type(comp.types.int32_type));
    assert_eq!(comp.type_size(s), Ok(1));
}

fn self_referential_record(comp: &Compilation, through_pointer: bool) -> Rc<RecordDecl> {
    let module = Module::new(comp.name("m"));
    let name = comp.name("R");
    let field_ty = if through_pointer {
        let base = comp.add_expr(Expr::NameRef(comp.name("Pointer")), mica_ir::Span::DUMMY);
        let arg = comp.add_expr(Expr::NameRef(name), mica_ir::Span::DUMMY);
        comp.add_expr(
            Expr::Indexing {
                base,
                args: vec![arg],
            },
            mica_ir::Span::DUMMY,
        )
    } else {
        comp.add_expr(Expr::NameRef(name), mica_ir::Span::DUMMY)
    };
    let decl = Rc::new(RecordDecl {
        name,
        params: Vec::new(),
        var_param: None,
        pattern_vars: Vec::new(),
        predicate: None,
        body: RecordBody::Fields(vec![RecordField {
            name: comp.name("next"),
            ty: field_ty,
            var_field: false,
        }]),
        module: RefCell::new(None),
    });
    module.add_item(Item::Record(decl.clone()));
    decl
}

#[test]
fn by_value_self_containment_is_rejected() {
    let comp = Compilation::new();
    let decl = self_referential_record(&comp, false);
    let ty = comp
        .types
        .record_type(&decl, Vec::new(), mica_ir::Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));
    let err = comp.type_layout(ty).unwrap_err();
    assert_eq!(err.code, mica_diagnostic::ErrorCode::E2001);
    // The failure does not install a layout.
    assert!(comp.types.with_meta(ty, |m| m.layout.is_none()));
}

#[test]
fn recursion_through_pointer_is_fine() {
    let comp = Compilation::new();
    let decl = self_referential_record(&comp, true);
    let ty = comp
        .types
        .record_type(&decl, Vec::new(), mica_ir::Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));
    let layout = comp.type_layout(ty).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(layout.size, comp.data_layout.pointer_size);
}

#[test]
fn variant_repr_is_tag_plus_union() {
    let comp = Compilation::new();
    let module = Module::new(comp.name("m"));
    let int_expr = comp.object_expr(Object::Type(comp.types.int32_type), mica_ir::Span::DUMMY);
    let float_expr = comp.object_expr(
        Object::Type(comp.types.float64_type),
        mica_ir::Span::DUMMY,
    );
    let decl = Rc::new(mica_ir::VariantDecl {
        name: comp.name("V"),
        params: Vec::new(),
        var_param: None,
        default_instances: vec![int_expr, float_expr],
        instances: RefCell::new(Vec::new()),
        module: RefCell::new(None),
    });
    module.add_item(Item::Variant(decl.clone()));
    let ty = comp
        .types
        .variant_type(&decl, Vec::new(), mica_ir::Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));
    let members = comp.variant_members(ty).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(
        *members,
        vec![comp.types.int32_type, comp.types.float64_type]
    );
    // Tag (4 bytes) + padding + 8-byte payload.
    assert_eq!(comp.type_size(ty), Ok(16));
    assert_eq!(
        comp.variant_member_index(ty, comp.types.float64_type, mica_ir::Span::DUMMY),
        Ok(1)
    );
}
