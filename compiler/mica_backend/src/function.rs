//! Functions, blocks, values, and instructions.
//!
//! Values are function-local and referenced by `ValueId`. Every value knows
//! its type; instructions producing no value have type `Void`. Blocks record
//! their instructions in emission order and at most one terminator.

use crate::module::{FuncId, GlobalId};
use crate::types::BType;

/// Handle for a basic block within a function.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) u32);

/// Handle for a value within a function.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub(crate) u32);

impl std::fmt::Debug for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl std::fmt::Debug for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Linkage {
    Internal,
    External,
}

/// Attributes on function parameters.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParamAttr {
    NoAlias,
    /// Aggregate passed by pointer at the C ABI.
    ByVal,
    /// Aggregate returned through a hidden pointer at the C ABI.
    SRet,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FnAttr {
    InlineHint,
    NoInline,
    AlwaysInline,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntPredicate {
    Eq,
    Ne,
    SLt,
    SLe,
    SGt,
    SGe,
    ULt,
    ULe,
    UGt,
    UGe,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FloatPredicate {
    OEq,
    OLt,
    OLe,
    OGt,
    OGe,
    ONe,
    Ord,
    UEq,
    ULt,
    ULe,
    UGt,
    UGe,
    UNe,
    Uno,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FPTrunc,
    FPExt,
    FPToSI,
    FPToUI,
    SIToFP,
    UIToFP,
    PtrToInt,
    IntToPtr,
    Bitcast,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MemoryOrdering {
    Unordered,
    Monotonic,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Nand,
    Or,
    Xor,
    Min,
    Max,
    UMin,
    UMax,
}

/// What a call targets.
#[derive(Clone, Debug, PartialEq)]
pub enum Callee {
    Func(FuncId),
    /// Indirect call through a value; the signature travels with the call.
    Value {
        callee: ValueId,
        params: Vec<BType>,
        ret: BType,
    },
    /// Named backend intrinsic (`expect`, etc.).
    Intrinsic(&'static str),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instr {
    Alloca(BType),
    Load {
        ty: BType,
        ptr: ValueId,
    },
    Store {
        value: ValueId,
        ptr: ValueId,
    },
    Gep {
        base_ty: BType,
        ptr: ValueId,
        indices: Vec<ValueId>,
    },
    BinOp {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    FNeg(ValueId),
    ICmp {
        pred: IntPredicate,
        lhs: ValueId,
        rhs: ValueId,
    },
    FCmp {
        pred: FloatPredicate,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cast {
        op: CastOp,
        value: ValueId,
        to: BType,
    },
    Call {
        callee: Callee,
        args: Vec<ValueId>,
    },
    Memcpy {
        dst: ValueId,
        src: ValueId,
        bytes: ValueId,
    },
    Memmove {
        dst: ValueId,
        src: ValueId,
        bytes: ValueId,
    },
    Fence(MemoryOrdering),
    AtomicRmw {
        op: RmwOp,
        ptr: ValueId,
        value: ValueId,
        ordering: MemoryOrdering,
    },
    AtomicLoad {
        ty: BType,
        ptr: ValueId,
        ordering: MemoryOrdering,
    },
    AtomicStore {
        value: ValueId,
        ptr: ValueId,
        ordering: MemoryOrdering,
    },
    AtomicCmpXchg {
        ptr: ValueId,
        expected: ValueId,
        replacement: ValueId,
        success: MemoryOrdering,
        failure: MemoryOrdering,
    },
    // terminators
    Br(BlockId),
    CondBr {
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret(Option<ValueId>),
    Unreachable,
}

impl Instr {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instr::Br(_) | Instr::CondBr { .. } | Instr::Ret(_) | Instr::Unreachable
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    Argument(u32),
    ConstInt(i128),
    /// Bit pattern of the constant at the type's width, widened to u64.
    ConstFloat(u64),
    ConstNull,
    Undef,
    GlobalRef(GlobalId),
    FuncRef(FuncId),
    Instr(Instr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValueData {
    pub ty: BType,
    pub kind: ValueKind,
}

#[derive(Clone, Debug, Default)]
pub struct BlockData {
    pub name: String,
    pub instrs: Vec<ValueId>,
    pub terminator: Option<ValueId>,
}

/// A backend function: signature plus blocks and values.
#[derive(Debug)]
pub struct FunctionData {
    pub name: String,
    pub params: Vec<BType>,
    pub ret: BType,
    pub linkage: Linkage,
    pub is_declaration: bool,
    pub attrs: Vec<FnAttr>,
    pub param_attrs: Vec<Vec<ParamAttr>>,
    pub(crate) blocks: Vec<BlockData>,
    pub(crate) values: Vec<ValueData>,
}

impl FunctionData {
    pub(crate) fn new(name: String, params: Vec<BType>, ret: BType, linkage: Linkage) -> Self {
        let param_attrs = vec![Vec::new(); params.len()];
        let values = params
            .iter()
            .enumerate()
            .map(|(i, ty)| ValueData {
                ty: ty.clone(),
                kind: ValueKind::Argument(u32::try_from(i).unwrap_or(u32::MAX)),
            })
            .collect();
        FunctionData {
            name,
            params,
            ret,
            linkage,
            is_declaration: true,
            attrs: Vec::new(),
            param_attrs,
            blocks: Vec::new(),
            values,
        }
    }

    /// The `ValueId` for parameter `index`.
    pub fn param(&self, index: usize) -> ValueId {
        assert!(index < self.params.len(), "parameter index out of range");
        ValueId(u32::try_from(index).unwrap_or(u32::MAX))
    }

    pub fn add_attr(&mut self, attr: FnAttr) {
        if !self.attrs.contains(&attr) {
            self.attrs.push(attr);
        }
    }

    pub fn add_param_attr(&mut self, index: usize, attr: ParamAttr) {
        let attrs = &mut self.param_attrs[index];
        if !attrs.contains(&attr) {
            attrs.push(attr);
        }
    }

    pub fn append_block(&mut self, name: impl Into<String>) -> BlockId {
        self.is_declaration = false;
        let id = BlockId(u32::try_from(self.blocks.len()).unwrap_or_else(|_| panic!("block overflow")));
        self.blocks.push(BlockData {
            name: name.into(),
            instrs: Vec::new(),
            terminator: None,
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0 as usize]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// All block ids in append order.
    pub fn block_ids(&self) -> Vec<BlockId> {
        (0..self.blocks.len())
            .map(|i| BlockId(u32::try_from(i).unwrap_or(u32::MAX)))
            .collect()
    }

    /// All value ids in creation order.
    pub fn value_ids(&self) -> Vec<ValueId> {
        (0..self.values.len())
            .map(|i| ValueId(u32::try_from(i).unwrap_or(u32::MAX)))
            .collect()
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0 as usize]
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn push_value(&mut self, data: ValueData) -> ValueId {
        let id = ValueId(u32::try_from(self.values.len()).unwrap_or_else(|_| panic!("value overflow")));
        self.values.push(data);
        id
    }

    /// True if `block` consists of a single unconditional branch to `target`.
    ///
    /// Used by the lowering driver to detect runtime no-op bodies.
    pub fn block_is_trivial_jump(&self, block: BlockId, target: BlockId) -> bool {
        let data = self.block(block);
        if !data.instrs.is_empty() {
            return false;
        }
        match data.terminator {
            Some(term) => matches!(
                self.value(term).kind,
                ValueKind::Instr(Instr::Br(dest)) if dest == target
            ),
            None => false,
        }
    }
}
