//! `$name` / `${expr}` interpolation for textual backend bodies.
//!
//! A two-state scan: outside an interpolation, characters copy through; a
//! `$` starts either a bare identifier or a brace-balanced expression. The
//! referenced static evaluates in the body's environment and pastes as a
//! backend type name, an integer/float/bool value, or an identifier's text.

use mica_diagnostic::ErrorCode;
use mica_types::{Compilation, Env, Object, SemaError, SemaResult, TypeData};

fn is_first_ident_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_ident_char(c: char) -> bool {
    is_first_ident_char(c) || c.is_ascii_digit() || c == '?'
}

/// Render a static object into the output stream.
fn paste_object(comp: &Compilation, obj: &Object, out: &mut String) -> SemaResult<()> {
    match obj {
        Object::Type(ty) => {
            let bty = comp.backend_type(*ty)?;
            out.push_str(&bty.to_string());
            Ok(())
        }
        Object::Holder(holder) => match comp.types.data(holder.ty) {
            TypeData::Bool => {
                out.push(if holder.as_bool() { '1' } else { '0' });
                Ok(())
            }
            TypeData::Integer { signed, .. } => {
                out.push_str(&holder.as_i128(signed).to_string());
                Ok(())
            }
            TypeData::Float { .. } => {
                out.push_str(&holder.as_f64().to_string());
                Ok(())
            }
            _ => Err(SemaError::new(
                ErrorCode::E4007,
                mica_ir::Span::DUMMY,
                "only booleans, integers, and float values can be interpolated",
            )),
        },
        Object::Ident(name) => {
            out.push_str(comp.str(*name));
            Ok(())
        }
        other => {
            out.push_str(&comp.object_name(other));
            Ok(())
        }
    }
}

/// Resolve a dot-separated identifier path to a static object.
fn resolve_path(comp: &Compilation, path: &str, env: &Env) -> SemaResult<Object> {
    let mut parts = path.split('.');
    let first = parts.next().unwrap_or_default();
    let first_name = comp.name(first);
    let mut current = env
        .lookup(first_name)
        .or_else(|| comp.operator_by_name(first_name))
        .ok_or_else(|| {
            SemaError::new(
                ErrorCode::E3008,
                mica_ir::Span::DUMMY,
                format!("unknown identifier in interpolation: {first}"),
            )
        })?;
    for part in parts {
        let Object::Module(module) = &current else {
            return Err(SemaError::new(
                ErrorCode::E3006,
                mica_ir::Span::DUMMY,
                format!("{part}: only module members can be dotted in interpolation"),
            ));
        };
        let member_env = Env::module_root(module.clone());
        current = member_env.lookup(comp.name(part)).ok_or_else(|| {
            SemaError::new(
                ErrorCode::E3008,
                mica_ir::Span::DUMMY,
                format!("module has no member {part}"),
            )
        })?;
    }
    match current {
        Object::AliasExpr(expr, captured) => comp.evaluate_one_static(expr, &captured),
        other => Ok(other),
    }
}

/// Interpolate a textual body in the given environment.
pub fn interpolate_asm(comp: &Compilation, text: &str, env: &Env) -> SemaResult<String> {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        // `$identifier`
        let start = i + 1;
        if start < chars.len() && is_first_ident_char(chars[start]) {
            let mut end = start + 1;
            while end < chars.len() && is_ident_char(chars[end]) {
                end += 1;
            }
            let path: String = chars[start..end].iter().collect();
            let obj = resolve_path(comp, &path, env)?;
            paste_object(comp, &obj, &mut out)?;
            i = end;
            continue;
        }

        // `${expr}` with balanced braces
        if start < chars.len() && chars[start] == '{' {
            let mut depth = 1usize;
            let mut end = start + 1;
            while end < chars.len() && depth > 0 {
                match chars[end] {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                end += 1;
            }
            if depth == 0 {
                let path: String = chars[start + 1..end - 1].iter().collect();
                let obj = resolve_path(comp, path.trim(), env)?;
                paste_object(comp, &obj, &mut out)?;
                i = end;
                continue;
            }
        }

        // Lone `$`: copy through.
        out.push('$');
        i += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_text_passes_through() {
        let comp = Compilation::new();
        let env = Env::empty();
        let out = interpolate_asm(&comp, "ret i8* null", &env).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out, "ret i8* null");
    }

    #[test]
    fn identifier_interpolation_pastes_types_and_values() {
        let comp = Compilation::new();
        let env = Env::empty();
        env.add_local(comp.name("T"), Object::Type(comp.types.int32_type));
        env.add_local(
            comp.name("n"),
            Object::Holder(comp.int_holder(comp.types.int32_type, 7)),
        );
        let out = interpolate_asm(&comp, "add $T %x, $n", &env).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out, "add i32 %x, 7");
    }

    #[test]
    fn braced_interpolation_with_balanced_braces() {
        let comp = Compilation::new();
        let env = Env::empty();
        env.add_local(comp.name("T"), Object::Type(comp.types.float64_type));
        let out = interpolate_asm(&comp, "fadd ${T} %a, %b", &env).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out, "fadd double %a, %b");
    }

    #[test]
    fn unknown_name_is_an_error() {
        let comp = Compilation::new();
        let env = Env::empty();
        let err = interpolate_asm(&comp, "$missing", &env).unwrap_err();
        assert_eq!(err.code, ErrorCode::E3008);
    }

    #[test]
    fn lone_dollar_passes_through() {
        let comp = Compilation::new();
        let env = Env::empty();
        let out = interpolate_asm(&comp, "a $ b", &env).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out, "a $ b");
    }
}
