//! Literal decoding.
//!
//! Integer literals accept decimal and hex digits with a width-selecting
//! suffix (`ss/s/i/l/ll` signed, `uss/us/u/ul/ull` unsigned, `f/ff/fl`
//! float, `fj/ffj/flj/j/lj` imaginary); a bare literal falls back to the
//! module's default integer type, else `Int32`. Float literals additionally
//! parse hex-float forms (`0x1.8p3`), deriving the IEEE-754 double with
//! round-to-nearest-even, subnormal underflow via mantissa shifting, overflow
//! to infinity, and signed zero.

use std::rc::Rc;

use mica_diagnostic::ErrorCode;
use mica_ir::{Module, Span, TypeId};

use crate::context::Compilation;
use crate::error::{SemaError, SemaResult};
use crate::object::ValueHolder;

fn is_hex(text: &str) -> bool {
    let digits = text
        .strip_prefix('-')
        .or_else(|| text.strip_prefix('+'))
        .unwrap_or(text);
    digits.starts_with("0x") || digits.starts_with("0X")
}

fn invalid(span: Span, what: &str) -> SemaError {
    SemaError::new(ErrorCode::E1001, span, format!("invalid {what} literal"))
}

fn out_of_range(span: Span, what: &str) -> SemaError {
    SemaError::new(ErrorCode::E1002, span, format!("{what} literal out of range"))
}

/// Parse the digit text as a signed integer in base 10 or 16.
fn parse_int(text: &str, span: Span, what: &str) -> SemaResult<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(rest) => (16, rest),
        None => (10, digits),
    };
    if digits.is_empty() {
        return Err(invalid(span, what));
    }
    let magnitude = u128::from_str_radix(digits, radix).map_err(|e| match e.kind() {
        std::num::IntErrorKind::PosOverflow => out_of_range(span, what),
        _ => invalid(span, what),
    })?;
    if negative {
        if magnitude > (1u128 << 127) {
            return Err(out_of_range(span, what));
        }
        Ok((magnitude as i128).wrapping_neg())
    } else {
        i128::try_from(magnitude).map_err(|_| out_of_range(span, what))
    }
}

fn check_signed_range(value: i128, bits: u32, span: Span, what: &str) -> SemaResult<()> {
    if bits >= 128 {
        return Ok(());
    }
    let min = -(1i128 << (bits - 1));
    let max = (1i128 << (bits - 1)) - 1;
    if value < min || value > max {
        return Err(out_of_range(span, what));
    }
    Ok(())
}

fn check_unsigned_range(value: i128, bits: u32, span: Span, what: &str) -> SemaResult<()> {
    if value < 0 {
        return Err(out_of_range(span, what));
    }
    if bits >= 128 {
        return Ok(());
    }
    if value > (1i128 << bits) - 1 {
        return Err(out_of_range(span, what));
    }
    Ok(())
}

/// `suffix` selects `test_type` either explicitly or by module default.
fn type_suffix(suffix: &str, default: TypeId, test_suffix: &str, test_type: TypeId) -> bool {
    suffix == test_suffix || (suffix.is_empty() && default == test_type)
}

fn imag_type_suffix(suffix: &str, default: TypeId, test_suffix: &str, test_type: TypeId) -> bool {
    suffix == test_suffix || (suffix == "j" && default == test_type)
}

/// Decode an integer literal (which may carry a float suffix) into a typed
/// value holder.
pub fn decode_int_literal(
    comp: &Compilation,
    module: Option<&Rc<Module>>,
    digits: &str,
    suffix: &str,
    span: Span,
) -> SemaResult<Rc<ValueHolder>> {
    let ts = &comp.types;
    let default = module
        .and_then(|m| m.default_integer_type.get())
        .unwrap_or(ts.int32_type);

    let signed_case: &[(&str, TypeId, u32, &str)] = &[
        ("ss", ts.int8_type, 8, "int8"),
        ("s", ts.int16_type, 16, "int16"),
        ("i", ts.int32_type, 32, "int32"),
        ("l", ts.int64_type, 64, "int64"),
        ("ll", ts.int128_type, 128, "int128"),
    ];
    for &(test, ty, bits, what) in signed_case {
        if type_suffix(suffix, default, test, ty) {
            let value = parse_int(digits, span, what)?;
            check_signed_range(value, bits, span, what)?;
            return Ok(comp.int_holder(ty, value));
        }
    }

    let unsigned_case: &[(&str, TypeId, u32, &str)] = &[
        ("uss", ts.uint8_type, 8, "uint8"),
        ("us", ts.uint16_type, 16, "uint16"),
        ("u", ts.uint32_type, 32, "uint32"),
        ("ul", ts.uint64_type, 64, "uint64"),
        ("ull", ts.uint128_type, 128, "uint128"),
    ];
    for &(test, ty, bits, what) in unsigned_case {
        if type_suffix(suffix, default, test, ty) {
            let value = parse_int(digits, span, what)?;
            check_unsigned_range(value, bits, span, what)?;
            return Ok(comp.int_holder(ty, value));
        }
    }

    match suffix {
        "f" => float_holder(comp, ts.float32_type, digits, span, "float32"),
        "ff" => float_holder(comp, ts.float64_type, digits, span, "float64"),
        "fl" => float_holder(comp, ts.float80_type, digits, span, "float80"),
        "fj" => float_holder(comp, ts.imag32_type, digits, span, "imag32"),
        "j" | "ffj" => float_holder(comp, ts.imag64_type, digits, span, "imag64"),
        "lj" | "flj" => float_holder(comp, ts.imag80_type, digits, span, "imag80"),
        _ => Err(SemaError::new(
            ErrorCode::E1003,
            span,
            format!("invalid literal suffix: {suffix}"),
        )),
    }
}

/// Decode a float literal into a typed value holder.
pub fn decode_float_literal(
    comp: &Compilation,
    module: Option<&Rc<Module>>,
    digits: &str,
    suffix: &str,
    span: Span,
) -> SemaResult<Rc<ValueHolder>> {
    let ts = &comp.types;
    let default = module
        .and_then(|m| m.default_float_type.get())
        .unwrap_or(ts.float64_type);

    if type_suffix(suffix, default, "f", ts.float32_type) {
        float_holder(comp, ts.float32_type, digits, span, "float32")
    } else if type_suffix(suffix, default, "ff", ts.float64_type) {
        float_holder(comp, ts.float64_type, digits, span, "float64")
    } else if suffix == "fl" || suffix == "l" || (suffix.is_empty() && default == ts.float80_type)
    {
        float_holder(comp, ts.float80_type, digits, span, "float80")
    } else if imag_type_suffix(suffix, default, "fj", ts.float32_type) {
        float_holder(comp, ts.imag32_type, digits, span, "imag32")
    } else if imag_type_suffix(suffix, default, "ffj", ts.float64_type) {
        float_holder(comp, ts.imag64_type, digits, span, "imag64")
    } else if suffix == "lj" || suffix == "flj" || (suffix == "j" && default == ts.float80_type) {
        float_holder(comp, ts.imag80_type, digits, span, "imag80")
    } else {
        Err(SemaError::new(
            ErrorCode::E1003,
            span,
            format!("invalid float literal suffix: {suffix}"),
        ))
    }
}

fn float_holder(
    comp: &Compilation,
    ty: TypeId,
    digits: &str,
    span: Span,
    what: &str,
) -> SemaResult<Rc<ValueHolder>> {
    let value = parse_float_text(digits, span, what)?;
    if value.is_infinite() && !is_hex(digits) {
        return Err(out_of_range(span, what));
    }
    Ok(comp.float_holder(ty, value))
}

fn parse_float_text(text: &str, span: Span, what: &str) -> SemaResult<f64> {
    if is_hex(text) {
        parse_hex_float(text).ok_or_else(|| invalid(span, what))
    } else {
        text.parse::<f64>().map_err(|_| invalid(span, what))
    }
}

fn hex_digit(c: u8) -> Option<u64> {
    match c {
        b'0'..=b'9' => Some(u64::from(c - b'0')),
        b'a'..=b'f' => Some(u64::from(c - b'a' + 10)),
        b'A'..=b'F' => Some(u64::from(c - b'A' + 10)),
        _ => None,
    }
}

fn float_from_parts(negative: bool, exponent: i64, mantissa: u64) -> f64 {
    let bits = (u64::from(negative) << 63)
        | (((exponent as u64) & 0x7FF) << 52)
        | (mantissa & 0xF_FFFF_FFFF_FFFF);
    f64::from_bits(bits)
}

/// Parse a hex-float literal (`[±]0x<hex>[.<hex>]p<dec>`) into an IEEE-754
/// double.
///
/// The mantissa is accumulated into 64 bits (extra digits only contribute
/// stickiness), then positioned with its leading bit at 60 and rounded to
/// nearest-even into the 52-bit field. Exponents below the normal range shift
/// the mantissa further right (gradual underflow into subnormals, then zero);
/// exponents at or above 2047 produce an infinity of the right sign.
pub(crate) fn parse_hex_float(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut negative = false;
    let mut mantissa: u64 = 0;
    let mut mantissa_bits: i64 = 0;
    let mut used_mantissa_bits: i64 = 0;
    let mut point: i64 = 0;
    let mut seen_point = false;
    let mut exponent_index = None;

    for (i, &c) in bytes.iter().enumerate() {
        match c {
            b'-' if i == 0 => negative = true,
            b'+' if i == 0 => {}
            b'-' | b'+' => return None,
            b'.' => {
                if seen_point {
                    return None;
                }
                seen_point = true;
            }
            b'p' | b'P' => {
                exponent_index = Some(i);
                break;
            }
            b'x' | b'X' => {
                if mantissa != 0 {
                    return None;
                }
            }
            _ => {
                let digit = hex_digit(c)?;
                if seen_point {
                    point += 4;
                }
                if c == b'0' && mantissa == 0 {
                    continue;
                }
                mantissa_bits += 4;
                if c != b'0' {
                    used_mantissa_bits = mantissa_bits;
                }
                if mantissa_bits <= 64 {
                    mantissa = (mantissa << 4) | digit;
                }
            }
        }
    }

    let exponent_index = exponent_index?;
    let exponent: i64 = text[exponent_index + 1..].parse().ok()?;

    if mantissa == 0 {
        return Some(float_from_parts(negative, 0, 0));
    }

    let mantissa_log = 63 - i64::from(mantissa.leading_zeros());
    let mut mantissa_exponent =
        mantissa_log + (mantissa_bits - 64).max(0) - point + exponent + 1023;

    // Position the leading bit at 60; a wider-than-60-bit mantissa sheds its
    // lowest bits, which the `used_mantissa_bits > 60` stickiness below
    // accounts for.
    if mantissa_log > 60 {
        mantissa >>= mantissa_log - 60;
    } else {
        mantissa <<= 60 - mantissa_log;
    }
    let mantissa_shift = 8 + (1 - mantissa_exponent).max(0);

    if mantissa_shift > 61 {
        mantissa_exponent = 0;
        mantissa = 0;
    } else if mantissa_exponent >= 2047 {
        mantissa_exponent = 2047;
        mantissa = 0;
    } else {
        let round_bit = mantissa & (1u64 << (mantissa_shift - 1));
        let round_mask = mantissa & ((1u64 << (mantissa_shift - 1)) - 1);
        let even_bit = mantissa & (1u64 << mantissa_shift);

        mantissa >>= mantissa_shift;

        if round_bit != 0 && (round_mask != 0 || used_mantissa_bits > 60 || even_bit != 0) {
            mantissa += 1;
        }

        if mantissa_exponent < 0 {
            mantissa_exponent = 0;
        }
        if mantissa_exponent == 0 {
            // A round-up out of the subnormal range lands exactly on the
            // smallest normal.
            if mantissa >> 52 != 0 {
                mantissa_exponent = 1;
            }
        } else if mantissa >> 53 != 0 {
            mantissa >>= 1;
            mantissa_exponent += 1;
            if mantissa_exponent >= 2047 {
                mantissa_exponent = 2047;
                mantissa = 0;
            }
        }
    }

    Some(float_from_parts(negative, mantissa_exponent, mantissa))
}

#[cfg(test)]
mod tests;
