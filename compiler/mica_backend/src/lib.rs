//! Backend model for the Mica compiler.
//!
//! The lowering driver talks to the backend through a small surface: create
//! functions, blocks, and stack slots; emit loads, stores, GEPs, arithmetic,
//! calls, atomics, and memory moves; query the data layout for sizes,
//! alignments, and struct offsets; register global constructors and
//! destructors; accept textual function bodies.
//!
//! This crate implements that surface as an in-memory SSA function/block/value
//! model. Instruction selection, register allocation, and object emission are
//! a separate concern and not modeled here.

mod builder;
mod function;
mod layout;
mod module;
mod types;

pub use builder::Builder;
pub use function::{
    BinOp, BlockId, Callee, CastOp, FloatPredicate, FnAttr, FunctionData, Instr, IntPredicate,
    Linkage, MemoryOrdering, ParamAttr, RmwOp, ValueData, ValueId, ValueKind,
};
pub use layout::{DataLayout, StructLayout};
pub use module::{AsmError, AsmFunction, FuncId, GlobalData, GlobalId, Module};
pub use types::{BType, FloatWidth};
