use super::*;
use pretty_assertions::assert_eq;

fn store() -> TypeStore {
    TypeStore::new(64)
}

#[test]
fn primitives_are_pre_interned() {
    let store = store();
    assert_eq!(store.int_type(32), store.int32_type);
    assert_eq!(store.uint_type(64), store.uint64_type);
    assert_eq!(store.float_type(64), store.float64_type);
    assert_eq!(store.c_size_t_type, store.uint64_type);
    assert_eq!(store.c_ptrdiff_t_type, store.int64_type);
}

#[test]
fn equal_structure_interns_to_same_id() {
    let store = store();
    let a = store.tuple_type(vec![store.int32_type, store.int32_type]);
    let b = store.tuple_type(vec![store.int32_type, store.int32_type]);
    let c = store.tuple_type(vec![store.int32_type, store.int64_type]);
    assert_eq!(a, b);
    assert_ne!(a, c);

    let p1 = store.pointer_type(a);
    let p2 = store.pointer_type(b);
    assert_eq!(p1, p2);
}

#[test]
fn code_pointer_interning_keys_on_ref_flags() {
    let store = store();
    let by_value = store.code_pointer_type(
        vec![store.int32_type],
        vec![false],
        vec![store.int32_type],
    );
    let by_ref = store.code_pointer_type(
        vec![store.int32_type],
        vec![true],
        vec![store.int32_type],
    );
    assert_ne!(by_value, by_ref);
    let again = store.code_pointer_type(
        vec![store.int32_type],
        vec![false],
        vec![store.int32_type],
    );
    assert_eq!(by_value, again);
}

#[test]
fn vec_element_must_be_numeric() {
    let store = store();
    assert!(store.vec_type(store.float32_type, 4, Span::DUMMY).is_ok());
    let tuple = store.tuple_type(vec![store.int32_type]);
    let err = store.vec_type(tuple, 4, Span::DUMMY).unwrap_err();
    assert_eq!(err.code, ErrorCode::E2002);
}

#[test]
fn primitive_aggregate_flags() {
    let store = store();
    assert!(store.is_primitive(store.int32_type));
    assert!(store.is_primitive_aggregate(store.int32_type));

    let small = store.array_type(store.int32_type, 8);
    assert!(store.is_primitive_aggregate(small));
    assert!(!store.is_primitive_aggregate_too_large(small));

    let large = store.array_type(store.int32_type, 9);
    assert!(store.is_primitive_aggregate(large));
    assert!(store.is_primitive_aggregate_too_large(large));

    // The veto propagates through enclosing tuples.
    let wrapper = store.tuple_type(vec![large]);
    assert!(store.is_primitive_aggregate_too_large(wrapper));
}

#[test]
fn static_tuple_classification() {
    let store = store();
    let s1 = store.static_type(Object::Ident(mica_ir::Name::EMPTY));
    let s2 = store.static_type(Object::Type(store.int32_type));
    let tuple = store.tuple_type(vec![s1, s2]);
    assert!(store.is_static_or_tuple_of_statics(tuple));

    let mixed = store.tuple_type(vec![s1, store.int32_type]);
    assert!(!store.is_static_or_tuple_of_statics(mixed));
}

#[test]
fn static_type_interning_uses_object_equality() {
    let store = store();
    let a = store.static_type(Object::Ident(mica_ir::Name::EMPTY));
    let b = store.static_type(Object::Ident(mica_ir::Name::EMPTY));
    assert_eq!(a, b);
}
