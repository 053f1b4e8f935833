use super::*;
use crate::context::Compilation;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn comp() -> Compilation {
    Compilation::new()
}

fn decode_int(comp: &Compilation, digits: &str, suffix: &str) -> Rc<ValueHolder> {
    decode_int_literal(comp, None, digits, suffix, Span::DUMMY).unwrap_or_else(|e| panic!("{e}"))
}

fn decode_float(comp: &Compilation, digits: &str, suffix: &str) -> Rc<ValueHolder> {
    decode_float_literal(comp, None, digits, suffix, Span::DUMMY).unwrap_or_else(|e| panic!("{e}"))
}

#[test]
fn hex_integer_literal() {
    let comp = comp();
    let vh = decode_int(&comp, "0x100", "i");
    assert_eq!(vh.ty, comp.types.int32_type);
    assert_eq!(vh.as_i128(true), 256);
}

#[test]
fn bare_literal_uses_default_integer_type() {
    let comp = comp();
    let vh = decode_int(&comp, "42", "");
    assert_eq!(vh.ty, comp.types.int32_type);
    assert_eq!(vh.as_i128(true), 42);
}

#[test]
fn module_attribute_overrides_default_integer_type() {
    let comp = comp();
    let module = mica_ir::Module::new(comp.name("m"));
    module.default_integer_type.set(Some(comp.types.int64_type));
    let vh = decode_int_literal(&comp, Some(&module), "7", "", Span::DUMMY)
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(vh.ty, comp.types.int64_type);
}

#[test]
fn signed_range_checks() {
    let comp = comp();
    assert_eq!(decode_int(&comp, "127", "ss").as_i128(true), 127);
    assert_eq!(decode_int(&comp, "-128", "ss").as_i128(true), -128);
    let err = decode_int_literal(&comp, None, "128", "ss", Span::DUMMY).unwrap_err();
    assert_eq!(err.code, mica_diagnostic::ErrorCode::E1002);
    let err = decode_int_literal(&comp, None, "-1", "uss", Span::DUMMY).unwrap_err();
    assert_eq!(err.code, mica_diagnostic::ErrorCode::E1002);
}

#[test]
fn unknown_suffix_is_rejected() {
    let comp = comp();
    let err = decode_int_literal(&comp, None, "1", "zz", Span::DUMMY).unwrap_err();
    assert_eq!(err.code, mica_diagnostic::ErrorCode::E1003);
}

#[test]
fn trailing_junk_is_rejected() {
    let comp = comp();
    let err = decode_int_literal(&comp, None, "12x4", "i", Span::DUMMY).unwrap_err();
    assert_eq!(err.code, mica_diagnostic::ErrorCode::E1001);
}

#[test]
fn imaginary_suffixes_select_imag_types() {
    let comp = comp();
    assert_eq!(decode_float(&comp, "1.5", "j").ty, comp.types.imag64_type);
    assert_eq!(decode_float(&comp, "1.5", "fj").ty, comp.types.imag32_type);
    assert_eq!(decode_int(&comp, "2", "j").ty, comp.types.imag64_type);
}

#[test]
fn hex_float_boundary_values() {
    let comp = comp();

    // Smallest normal double.
    let vh = decode_float(&comp, "0x1p-1022", "ff");
    assert_eq!(vh.as_f64(), f64::MIN_POSITIVE);

    // Below the smallest subnormal: underflows to +0.0.
    let vh = decode_float(&comp, "0x1p-1075", "ff");
    assert_eq!(vh.as_f64().to_bits(), 0.0f64.to_bits());

    // Smallest subnormal.
    let vh = decode_float(&comp, "0x1p-1074", "ff");
    assert_eq!(vh.as_f64(), f64::from_bits(1));

    // Largest finite double.
    let vh = decode_float(&comp, "0x1.fffffffffffffp+1023", "ff");
    assert_eq!(vh.as_f64(), f64::MAX);

    // Overflow to infinity.
    let vh = decode_float(&comp, "0x1p+1024", "ff");
    assert!(vh.as_f64().is_infinite());

    // Signed zero survives.
    let vh = decode_float(&comp, "-0x0p+0", "ff");
    assert_eq!(vh.as_f64().to_bits(), (-0.0f64).to_bits());
}

#[test]
fn hex_float_rounds_to_nearest_even() {
    // 53 bits of mantissa plus a trailing 1: exactly representable neighbor
    // decided by the even bit.
    let x = parse_hex_float("0x1.00000000000008p+0").unwrap_or_else(|| panic!("parse"));
    assert_eq!(x, 1.0);
    let y = parse_hex_float("0x1.00000000000018p+0").unwrap_or_else(|| panic!("parse"));
    assert_eq!(y.to_bits(), 1.0f64.to_bits() + 2);
}

/// Exact hex rendering of a finite double.
fn hex_string(x: f64) -> String {
    let bits = x.to_bits();
    let sign = if bits >> 63 != 0 { "-" } else { "" };
    let exp = ((bits >> 52) & 0x7FF) as i64;
    let frac = bits & 0xF_FFFF_FFFF_FFFF;
    if exp == 0 {
        if frac == 0 {
            return format!("{sign}0x0p+0");
        }
        return format!("{sign}0x0.{frac:013x}p-1022");
    }
    format!("{sign}0x1.{frac:013x}p{:+}", exp - 1023)
}

#[test]
fn hex_round_trip_spot_checks() {
    for x in [
        0.0,
        -0.0,
        1.0,
        -1.0,
        0.5,
        1.0 / 3.0,
        std::f64::consts::PI,
        f64::MAX,
        f64::MIN_POSITIVE,
        f64::from_bits(1),
        f64::from_bits(0x000F_FFFF_FFFF_FFFF),
    ] {
        let parsed = parse_hex_float(&hex_string(x)).unwrap_or_else(|| panic!("parse"));
        assert_eq!(parsed.to_bits(), x.to_bits(), "round trip of {x:e}");
    }
}

proptest! {
    /// Decoding the canonical hex printing of any finite double yields
    /// exactly that double.
    #[test]
    fn hex_round_trip(bits in any::<u64>()) {
        let exp = (bits >> 52) & 0x7FF;
        prop_assume!(exp != 0x7FF); // skip NaN and infinity
        let x = f64::from_bits(bits);
        let parsed = parse_hex_float(&hex_string(x)).unwrap_or_else(|| panic!("parse"));
        prop_assert_eq!(parsed.to_bits(), x.to_bits());
    }
}
