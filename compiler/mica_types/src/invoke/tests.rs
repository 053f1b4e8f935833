use super::*;
use crate::testutil::TestBuilder;
use crate::Compilation;
use mica_ir::Tempness;
use pretty_assertions::assert_eq;

#[test]
fn equal_keys_yield_the_same_entry() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let code = tb.code_returning(
        vec![("x", None, Tempness::DontCare)],
        vec![tb.name_ref("x")],
    );
    let proc = tb.install_proc("f", code);
    let callable = Object::Proc(proc);
    let key = [comp.types.int32_type];
    let temps = [Tempness::Rvalue];

    let a = safe_analyze_callable(&comp, &callable, &key, &temps)
        .unwrap_or_else(|e| panic!("{e}"));
    let b = safe_analyze_callable(&comp, &callable, &key, &temps)
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(Rc::ptr_eq(&a, &b));

    // A different tempness key is a different specialization.
    let c = safe_analyze_callable(&comp, &callable, &key, &[Tempness::Lvalue])
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(!Rc::ptr_eq(&a, &c));
}

#[test]
fn entries_record_analyzed_returns() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let code = tb.code_returning(
        vec![("x", None, Tempness::DontCare)],
        vec![tb.name_ref("x")],
    );
    let proc = tb.install_proc("f", code);
    let entry = safe_analyze_callable(
        &comp,
        &Object::Proc(proc),
        &[comp.types.float64_type],
        &[Tempness::Rvalue],
    )
    .unwrap_or_else(|e| panic!("{e}"));
    assert!(entry.analyzed.get());
    assert_eq!(*entry.return_types.borrow(), vec![comp.types.float64_type]);
    assert_eq!(*entry.return_is_ref.borrow(), vec![false]);
}

#[test]
fn rvalue_only_overload_rejects_lvalues() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let code = tb.code_returning(
        vec![("x", None, Tempness::Rvalue)],
        vec![tb.name_ref("x")],
    );
    let proc = tb.install_proc("sink", code);
    let callable = Object::Proc(proc);
    let key = [comp.types.int32_type];

    assert!(
        analyze_callable(&comp, &callable, &key, &[Tempness::Rvalue])
            .unwrap_or_else(|e| panic!("{e}"))
            .is_some()
    );
    assert!(
        analyze_callable(&comp, &callable, &key, &[Tempness::Lvalue])
            .unwrap_or_else(|e| panic!("{e}"))
            .is_none()
    );
}

#[test]
fn later_overloads_shadow_earlier_ones() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let first = tb.code_returning(
        vec![("x", None, Tempness::DontCare)],
        vec![tb.bool_lit(true)],
    );
    let proc = tb.install_proc("f", first);
    // Later declaration returns the argument instead.
    let second = tb.code_returning(
        vec![("x", None, Tempness::DontCare)],
        vec![tb.name_ref("x")],
    );
    tb.add_overload(&proc, second, false);

    let entry = safe_analyze_callable(
        &comp,
        &Object::Proc(proc),
        &[comp.types.int32_type],
        &[Tempness::Rvalue],
    )
    .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(*entry.return_types.borrow(), vec![comp.types.int32_type]);
}

#[test]
fn missing_overload_is_a_user_error() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let code = tb.code_returning(vec![], vec![tb.bool_lit(true)]);
    let proc = tb.install_proc("f", code);
    let err = safe_analyze_callable(
        &comp,
        &Object::Proc(proc),
        &[comp.types.int32_type],
        &[Tempness::Rvalue],
    )
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::E3005);
}

#[test]
fn forward_arguments_record_forwarded_rvalues() {
    let comp = Compilation::new();
    let tb = TestBuilder::new(&comp);
    let code = tb.code_returning(
        vec![("x", None, Tempness::Forward)],
        vec![tb.name_ref("x")],
    );
    let proc = tb.install_proc("fwd", code);
    let callable = Object::Proc(proc);
    let key = [comp.types.int32_type];

    let entry = safe_analyze_callable(&comp, &callable, &key, &[Tempness::Rvalue])
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(*entry.forwarded_rvalue_flags.borrow(), vec![true]);

    let entry = safe_analyze_callable(&comp, &callable, &key, &[Tempness::Lvalue])
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(*entry.forwarded_rvalue_flags.borrow(), vec![false]);
}
