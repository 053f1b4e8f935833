//! Instruction builder.
//!
//! A `Builder` is positioned on one basic block of one function and appends
//! instructions there. Several builders may target the same function (the
//! lowering driver keeps one on the init block for stack slots and one on the
//! current code block); borrows are transient per emitted instruction.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::function::{
    BinOp, BlockId, Callee, CastOp, FloatPredicate, FunctionData, Instr, IntPredicate,
    MemoryOrdering, RmwOp, ValueData, ValueId, ValueKind,
};
use crate::module::{FuncId, GlobalId};
use crate::types::{BType, FloatWidth};

/// Builder positioned on a basic block.
pub struct Builder {
    func: Rc<RefCell<FunctionData>>,
    block: Cell<BlockId>,
}

impl Builder {
    pub fn new(func: Rc<RefCell<FunctionData>>, block: BlockId) -> Builder {
        Builder {
            func,
            block: Cell::new(block),
        }
    }

    pub fn position_at_end(&self, block: BlockId) {
        self.block.set(block);
    }

    pub fn current_block(&self) -> BlockId {
        self.block.get()
    }

    /// Append a fresh block to the function (does not move the builder).
    pub fn append_block(&self, name: impl Into<String>) -> BlockId {
        self.func.borrow_mut().append_block(name)
    }

    pub fn is_terminated(&self) -> bool {
        self.func
            .borrow()
            .block(self.block.get())
            .terminator
            .is_some()
    }

    pub fn value_ty(&self, value: ValueId) -> BType {
        self.func.borrow().value(value).ty.clone()
    }

    // -- constants --

    pub fn const_int(&self, ty: BType, value: i128) -> ValueId {
        debug_assert!(matches!(ty, BType::Int(_)));
        self.func.borrow_mut().push_value(ValueData {
            ty,
            kind: ValueKind::ConstInt(value),
        })
    }

    pub fn const_bool(&self, value: bool) -> ValueId {
        self.const_int(BType::I1, i128::from(value))
    }

    /// Float constant from its bit pattern at the type's width.
    pub fn const_float_bits(&self, width: FloatWidth, bits: u64) -> ValueId {
        self.func.borrow_mut().push_value(ValueData {
            ty: BType::Float(width),
            kind: ValueKind::ConstFloat(bits),
        })
    }

    pub fn const_null(&self) -> ValueId {
        self.func.borrow_mut().push_value(ValueData {
            ty: BType::Ptr,
            kind: ValueKind::ConstNull,
        })
    }

    pub fn undef(&self, ty: BType) -> ValueId {
        self.func.borrow_mut().push_value(ValueData {
            ty,
            kind: ValueKind::Undef,
        })
    }

    pub fn func_ref(&self, func: FuncId) -> ValueId {
        self.func.borrow_mut().push_value(ValueData {
            ty: BType::Ptr,
            kind: ValueKind::FuncRef(func),
        })
    }

    pub fn global_ref(&self, global: GlobalId) -> ValueId {
        self.func.borrow_mut().push_value(ValueData {
            ty: BType::Ptr,
            kind: ValueKind::GlobalRef(global),
        })
    }

    // -- instructions --

    fn emit(&self, ty: BType, instr: Instr) -> ValueId {
        let mut func = self.func.borrow_mut();
        let block = self.block.get();
        assert!(
            func.block(block).terminator.is_none(),
            "instruction emitted into terminated block {block:?} of `{}`",
            func.name
        );
        let terminator = instr.is_terminator();
        let id = func.push_value(ValueData {
            ty,
            kind: ValueKind::Instr(instr),
        });
        let data = &mut func.blocks[block.0 as usize];
        if terminator {
            data.terminator = Some(id);
        } else {
            data.instrs.push(id);
        }
        id
    }

    pub fn alloca(&self, ty: BType) -> ValueId {
        self.emit(BType::Ptr, Instr::Alloca(ty))
    }

    pub fn load(&self, ty: BType, ptr: ValueId) -> ValueId {
        self.emit(ty.clone(), Instr::Load { ty, ptr })
    }

    pub fn store(&self, value: ValueId, ptr: ValueId) {
        self.emit(BType::Void, Instr::Store { value, ptr });
    }

    pub fn gep(&self, base_ty: BType, ptr: ValueId, indices: Vec<ValueId>) -> ValueId {
        self.emit(BType::Ptr, Instr::Gep { base_ty, ptr, indices })
    }

    /// GEP to field `index` of a struct value behind `ptr`.
    pub fn struct_gep(&self, struct_ty: BType, ptr: ValueId, index: u32) -> ValueId {
        let zero = self.const_int(BType::I32, 0);
        let idx = self.const_int(BType::I32, i128::from(index));
        self.gep(struct_ty, ptr, vec![zero, idx])
    }

    pub fn binop(&self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.value_ty(lhs);
        self.emit(ty, Instr::BinOp { op, lhs, rhs })
    }

    pub fn fneg(&self, value: ValueId) -> ValueId {
        let ty = self.value_ty(value);
        self.emit(ty, Instr::FNeg(value))
    }

    pub fn icmp(&self, pred: IntPredicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(BType::I1, Instr::ICmp { pred, lhs, rhs })
    }

    pub fn fcmp(&self, pred: FloatPredicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(BType::I1, Instr::FCmp { pred, lhs, rhs })
    }

    pub fn cast(&self, op: CastOp, value: ValueId, to: BType) -> ValueId {
        self.emit(to.clone(), Instr::Cast { op, value, to })
    }

    pub fn call(&self, callee: Callee, args: Vec<ValueId>, ret: BType) -> ValueId {
        self.emit(ret, Instr::Call { callee, args })
    }

    pub fn memcpy(&self, dst: ValueId, src: ValueId, bytes: ValueId) {
        self.emit(BType::Void, Instr::Memcpy { dst, src, bytes });
    }

    pub fn memmove(&self, dst: ValueId, src: ValueId, bytes: ValueId) {
        self.emit(BType::Void, Instr::Memmove { dst, src, bytes });
    }

    pub fn fence(&self, ordering: MemoryOrdering) {
        self.emit(BType::Void, Instr::Fence(ordering));
    }

    pub fn atomic_rmw(
        &self,
        op: RmwOp,
        ptr: ValueId,
        value: ValueId,
        ordering: MemoryOrdering,
    ) -> ValueId {
        let ty = self.value_ty(value);
        self.emit(ty, Instr::AtomicRmw { op, ptr, value, ordering })
    }

    pub fn atomic_load(&self, ty: BType, ptr: ValueId, ordering: MemoryOrdering) -> ValueId {
        self.emit(ty.clone(), Instr::AtomicLoad { ty, ptr, ordering })
    }

    pub fn atomic_store(&self, value: ValueId, ptr: ValueId, ordering: MemoryOrdering) {
        self.emit(BType::Void, Instr::AtomicStore { value, ptr, ordering });
    }

    pub fn atomic_cmpxchg(
        &self,
        ptr: ValueId,
        expected: ValueId,
        replacement: ValueId,
        success: MemoryOrdering,
        failure: MemoryOrdering,
    ) -> ValueId {
        let ty = self.value_ty(expected);
        self.emit(
            BType::struct_of(vec![ty, BType::I1]),
            Instr::AtomicCmpXchg {
                ptr,
                expected,
                replacement,
                success,
                failure,
            },
        )
    }

    /// Branch-weight hint: tells the optimizer `value` usually equals
    /// `expected`. Returns the (pass-through) value.
    pub fn expect(&self, value: ValueId, expected: ValueId) -> ValueId {
        let ty = self.value_ty(value);
        self.emit(
            ty,
            Instr::Call {
                callee: Callee::Intrinsic("expect"),
                args: vec![value, expected],
            },
        )
    }

    // -- terminators --

    pub fn br(&self, dest: BlockId) {
        self.emit(BType::Void, Instr::Br(dest));
    }

    pub fn cond_br(&self, cond: ValueId, then_block: BlockId, else_block: BlockId) {
        self.emit(
            BType::Void,
            Instr::CondBr {
                cond,
                then_block,
                else_block,
            },
        );
    }

    pub fn ret(&self, value: Option<ValueId>) {
        self.emit(BType::Void, Instr::Ret(value));
    }

    pub fn unreachable(&self) {
        self.emit(BType::Void, Instr::Unreachable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::DataLayout;
    use crate::module::Module;
    use crate::Linkage;
    use pretty_assertions::assert_eq;

    fn test_func(module: &Module) -> Rc<RefCell<FunctionData>> {
        let id = module.add_function("f", vec![BType::Ptr], BType::Ptr, Linkage::Internal);
        module.func(id)
    }

    #[test]
    fn emits_into_current_block() {
        let module = Module::new("m", DataLayout::default());
        let func = test_func(&module);
        let entry = func.borrow_mut().append_block("entry");
        let bx = Builder::new(func.clone(), entry);

        let slot = bx.alloca(BType::I32);
        let c = bx.const_int(BType::I32, 41);
        bx.store(c, slot);
        let loaded = bx.load(BType::I32, slot);
        bx.ret(Some(loaded));

        let func = func.borrow();
        let block = func.block(entry);
        assert_eq!(block.instrs.len(), 3); // alloca, store, load
        assert!(block.terminator.is_some());
        assert_eq!(func.value(loaded).ty, BType::I32);
    }

    #[test]
    #[should_panic(expected = "terminated block")]
    fn emit_after_terminator_is_a_bug() {
        let module = Module::new("m", DataLayout::default());
        let func = test_func(&module);
        let entry = func.borrow_mut().append_block("entry");
        let bx = Builder::new(func, entry);
        bx.unreachable();
        bx.alloca(BType::I32);
    }

    #[test]
    fn trivial_jump_detection() {
        let module = Module::new("m", DataLayout::default());
        let func = test_func(&module);
        let (code, ret) = {
            let mut f = func.borrow_mut();
            (f.append_block("code"), f.append_block("return"))
        };
        let bx = Builder::new(func.clone(), code);
        bx.br(ret);
        assert!(func.borrow().block_is_trivial_jump(code, ret));
        assert!(!func.borrow().block_is_trivial_jump(ret, code));
    }
}
