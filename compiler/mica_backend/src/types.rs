//! Backend value types.

use std::rc::Rc;

/// Floating-point widths the backend understands.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FloatWidth {
    F32,
    F64,
    /// x87 extended precision; padded to 16 bytes in memory.
    F80,
}

/// A backend-level type.
///
/// Pointers are opaque: loads and GEPs carry the pointee type explicitly, so
/// the pointer type itself has no structure.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum BType {
    /// Integer of the given bit width (including `Int(1)` for flags).
    Int(u16),
    Float(FloatWidth),
    Ptr,
    Struct(Rc<[BType]>),
    Array(Rc<BType>, u64),
    Vector(Rc<BType>, u64),
    Void,
}

impl BType {
    pub const I1: BType = BType::Int(1);
    pub const I8: BType = BType::Int(8);
    pub const I32: BType = BType::Int(32);
    pub const I64: BType = BType::Int(64);

    pub fn struct_of(fields: Vec<BType>) -> BType {
        BType::Struct(Rc::from(fields))
    }

    pub fn array_of(elem: BType, len: u64) -> BType {
        BType::Array(Rc::new(elem), len)
    }

    pub fn vector_of(elem: BType, len: u64) -> BType {
        BType::Vector(Rc::new(elem), len)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, BType::Struct(_) | BType::Array(..))
    }
}

impl std::fmt::Display for BType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BType::Int(bits) => write!(f, "i{bits}"),
            BType::Float(FloatWidth::F32) => write!(f, "float"),
            BType::Float(FloatWidth::F64) => write!(f, "double"),
            BType::Float(FloatWidth::F80) => write!(f, "x86_fp80"),
            BType::Ptr => write!(f, "ptr"),
            BType::Struct(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, "}}")
            }
            BType::Array(elem, len) => write!(f, "[{len} x {elem}]"),
            BType::Vector(elem, len) => write!(f, "<{len} x {elem}>"),
            BType::Void => write!(f, "void"),
        }
    }
}
