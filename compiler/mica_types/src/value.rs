//! Value descriptors.
//!
//! `PValue` is what analysis knows about one value position: its type and
//! whether the position is a temporary (rvalue) or a borrow of existing
//! storage (lvalue). `CValue` is the lowered counterpart: a type plus the
//! backend handle of a pointer to the value. Multi-valued wrappers carry one
//! descriptor per position.

use mica_backend::ValueId;
use mica_ir::TypeId;
use smallvec::SmallVec;

/// Analysis value: type plus rvalue/lvalue flag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PValue {
    pub ty: TypeId,
    /// `true` = rvalue (owns its storage at this site), `false` = lvalue.
    pub is_temp: bool,
}

impl PValue {
    pub fn rvalue(ty: TypeId) -> PValue {
        PValue { ty, is_temp: true }
    }

    pub fn lvalue(ty: TypeId) -> PValue {
        PValue { ty, is_temp: false }
    }
}

/// Ordered sequence of analysis values.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct MultiPValue {
    pub values: SmallVec<[PValue; 4]>,
}

impl MultiPValue {
    pub fn new() -> MultiPValue {
        MultiPValue::default()
    }

    pub fn one(pv: PValue) -> MultiPValue {
        let mut values = SmallVec::new();
        values.push(pv);
        MultiPValue { values }
    }

    pub fn from_values(values: impl IntoIterator<Item = PValue>) -> MultiPValue {
        MultiPValue {
            values: values.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, pv: PValue) {
        self.values.push(pv);
    }

    pub fn extend(&mut self, other: &MultiPValue) {
        self.values.extend(other.values.iter().copied());
    }
}

/// Lowered value: type plus the backend handle of a pointer to the value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CValue {
    pub ty: TypeId,
    /// Backend SSA handle; always a pointer to storage of `ty`.
    pub ptr: ValueId,
    /// Set when the value arrived through a `forward` argument bound to an
    /// rvalue; re-analysis of the binding sees it as a temporary.
    pub forwarded_rvalue: bool,
}

impl CValue {
    pub fn new(ty: TypeId, ptr: ValueId) -> CValue {
        CValue {
            ty,
            ptr,
            forwarded_rvalue: false,
        }
    }

    pub fn forwarded(ty: TypeId, ptr: ValueId) -> CValue {
        CValue {
            ty,
            ptr,
            forwarded_rvalue: true,
        }
    }
}

/// Ordered sequence of lowered values.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct MultiCValue {
    pub values: SmallVec<[CValue; 4]>,
}

impl MultiCValue {
    pub fn new() -> MultiCValue {
        MultiCValue::default()
    }

    pub fn one(cv: CValue) -> MultiCValue {
        let mut values = SmallVec::new();
        values.push(cv);
        MultiCValue { values }
    }

    pub fn from_slice(values: &[CValue]) -> MultiCValue {
        MultiCValue {
            values: values.iter().copied().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, cv: CValue) {
        self.values.push(cv);
    }

    pub fn extend(&mut self, other: &MultiCValue) {
        self.values.extend(other.values.iter().copied());
    }

    /// Argument-key types of the carried values.
    pub fn to_args_key(&self) -> Vec<TypeId> {
        self.values.iter().map(|cv| cv.ty).collect()
    }
}
