//! The primitive-operation table.
//!
//! Every built-in the analyzer and lowering driver understand is one code in
//! this enum. The prelude module exports a subset of them under operator
//! names (`tupleLiteral`, `index`, `assign`, …); those are the overloadable
//! ones, so user code can extend them with additional overloads. The
//! introspection and algebra codes are handled directly and are not
//! overloadable.

/// Codes for built-in operations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[allow(non_camel_case_types)]
pub enum PrimOpCode {
    // -- type constructors / introspection --
    TypeP,
    TypeSize,
    TypeAlignment,
    PointerT,
    CodePointerT,
    ExternalCodePointerT,
    ArrayT,
    VecT,
    TupleT,
    UnionT,
    StaticT,
    RecordWithPropertiesT,

    // -- bit-level --
    Bitcopy,
    Bitcast,

    // -- bool --
    BoolNot,

    // -- integer comparisons --
    IntegerEqualsP,
    IntegerLesserP,

    // -- IEEE comparisons --
    FloatOrderedEqualsP,
    FloatOrderedLesserP,
    FloatOrderedLesserEqualsP,
    FloatOrderedGreaterP,
    FloatOrderedGreaterEqualsP,
    FloatOrderedNotEqualsP,
    FloatOrderedP,
    FloatUnorderedEqualsP,
    FloatUnorderedLesserP,
    FloatUnorderedLesserEqualsP,
    FloatUnorderedGreaterP,
    FloatUnorderedGreaterEqualsP,
    FloatUnorderedNotEqualsP,
    FloatUnorderedP,

    // -- numeric algebra --
    NumericAdd,
    NumericSubtract,
    NumericMultiply,
    FloatDivide,
    NumericNegate,
    IntegerQuotient,
    IntegerRemainder,
    IntegerShiftLeft,
    IntegerShiftRight,
    IntegerBitwiseAnd,
    IntegerBitwiseOr,
    IntegerBitwiseXor,
    IntegerBitwiseNot,
    NumericConvert,

    // -- checked integer algebra (routes to named user procedures) --
    IntegerAddChecked,
    IntegerSubtractChecked,
    IntegerMultiplyChecked,
    IntegerQuotientChecked,
    IntegerRemainderChecked,
    IntegerShiftLeftChecked,
    IntegerNegateChecked,
    IntegerConvertChecked,

    // -- pointers --
    AddressOf,
    PointerDereference,
    PointerOffset,
    PointerToInt,
    IntToPointer,
    NullPointer,

    // -- code pointers --
    MakeCodePointer,
    MakeExternalCodePointer,
    CallExternalCodePointer,

    // -- arrays --
    ArrayRef,
    ArrayElements,

    // -- tuples --
    TupleElementCount,
    TupleRef,
    TupleElements,

    // -- unions --
    UnionMemberCount,

    // -- records --
    RecordP,
    RecordFieldCount,
    RecordFieldName,
    RecordWithFieldP,
    RecordFieldRef,
    RecordFieldRefByName,
    RecordFields,
    RecordVariadicField,

    // -- variants --
    VariantP,
    VariantMemberIndex,
    VariantMemberCount,
    VariantMembers,

    // -- new-types --
    BaseType,

    // -- statics and modules --
    StaticName,
    MainModule,
    StaticModule,
    ModuleName,
    ModuleMemberNames,
    StaticIntegers,
    Integers,
    StaticFieldRef,

    // -- enums --
    EnumP,
    EnumMemberCount,
    EnumMemberName,
    EnumToInt,
    IntToEnum,

    // -- string literals --
    StringLiteralP,
    StringLiteralByteIndex,
    StringLiteralBytes,
    StringLiteralByteSize,
    StringLiteralByteSlice,
    StringLiteralConcat,
    StringLiteralFromBytes,

    // -- atomic orderings --
    OrderUnordered,
    OrderMonotonic,
    OrderAcquire,
    OrderRelease,
    OrderAcqRel,
    OrderSeqCst,

    // -- atomics --
    AtomicFence,
    AtomicRMW,
    RMWXchg,
    RMWAdd,
    RMWSubtract,
    RMWAnd,
    RMWNAnd,
    RMWOr,
    RMWXor,
    RMWMin,
    RMWMax,
    RMWUMin,
    RMWUMax,
    AtomicLoad,
    AtomicStore,
    AtomicCompareExchange,

    // -- exceptions --
    ActiveException,

    // -- memory movement --
    Memcpy,
    Memmove,

    // -- value packs --
    CountValues,
    NthValue,
    WithoutNthValue,
    TakeValues,
    DropValues,

    // -- hints --
    UsuallyEquals,

    // -- prelude operators (overloadable) --
    TupleLiteral,
    Index,
    Call,
    FieldRefOp,
    Destroy,
    Copy,
    Move,
    Assign,
    UpdateAssign,
    PrefixUpdateAssign,
    IndexAssign,
    StaticIndexAssign,
    FieldRefAssign,
    IndexUpdateAssign,
    StaticIndexUpdateAssign,
    FieldRefUpdateAssign,
    ThrowValue,
    DispatchTag,
    DispatchIndex,
    DispatchTagCount,
    InvalidDispatch,
    VariantReprType,
    CallMain,
    ExceptionInInitializer,
    ExceptionInFinalizer,
}

impl PrimOpCode {
    /// Every code, in declaration order; the prelude installs all of them
    /// under their exported names.
    pub const ALL: &'static [PrimOpCode] = &[
        PrimOpCode::TypeP,
        PrimOpCode::TypeSize,
        PrimOpCode::TypeAlignment,
        PrimOpCode::PointerT,
        PrimOpCode::CodePointerT,
        PrimOpCode::ExternalCodePointerT,
        PrimOpCode::ArrayT,
        PrimOpCode::VecT,
        PrimOpCode::TupleT,
        PrimOpCode::UnionT,
        PrimOpCode::StaticT,
        PrimOpCode::RecordWithPropertiesT,
        PrimOpCode::Bitcopy,
        PrimOpCode::Bitcast,
        PrimOpCode::BoolNot,
        PrimOpCode::IntegerEqualsP,
        PrimOpCode::IntegerLesserP,
        PrimOpCode::FloatOrderedEqualsP,
        PrimOpCode::FloatOrderedLesserP,
        PrimOpCode::FloatOrderedLesserEqualsP,
        PrimOpCode::FloatOrderedGreaterP,
        PrimOpCode::FloatOrderedGreaterEqualsP,
        PrimOpCode::FloatOrderedNotEqualsP,
        PrimOpCode::FloatOrderedP,
        PrimOpCode::FloatUnorderedEqualsP,
        PrimOpCode::FloatUnorderedLesserP,
        PrimOpCode::FloatUnorderedLesserEqualsP,
        PrimOpCode::FloatUnorderedGreaterP,
        PrimOpCode::FloatUnorderedGreaterEqualsP,
        PrimOpCode::FloatUnorderedNotEqualsP,
        PrimOpCode::FloatUnorderedP,
        PrimOpCode::NumericAdd,
        PrimOpCode::NumericSubtract,
        PrimOpCode::NumericMultiply,
        PrimOpCode::FloatDivide,
        PrimOpCode::NumericNegate,
        PrimOpCode::IntegerQuotient,
        PrimOpCode::IntegerRemainder,
        PrimOpCode::IntegerShiftLeft,
        PrimOpCode::IntegerShiftRight,
        PrimOpCode::IntegerBitwiseAnd,
        PrimOpCode::IntegerBitwiseOr,
        PrimOpCode::IntegerBitwiseXor,
        PrimOpCode::IntegerBitwiseNot,
        PrimOpCode::NumericConvert,
        PrimOpCode::IntegerAddChecked,
        PrimOpCode::IntegerSubtractChecked,
        PrimOpCode::IntegerMultiplyChecked,
        PrimOpCode::IntegerQuotientChecked,
        PrimOpCode::IntegerRemainderChecked,
        PrimOpCode::IntegerShiftLeftChecked,
        PrimOpCode::IntegerNegateChecked,
        PrimOpCode::IntegerConvertChecked,
        PrimOpCode::AddressOf,
        PrimOpCode::PointerDereference,
        PrimOpCode::PointerOffset,
        PrimOpCode::PointerToInt,
        PrimOpCode::IntToPointer,
        PrimOpCode::NullPointer,
        PrimOpCode::MakeCodePointer,
        PrimOpCode::MakeExternalCodePointer,
        PrimOpCode::CallExternalCodePointer,
        PrimOpCode::ArrayRef,
        PrimOpCode::ArrayElements,
        PrimOpCode::TupleElementCount,
        PrimOpCode::TupleRef,
        PrimOpCode::TupleElements,
        PrimOpCode::UnionMemberCount,
        PrimOpCode::RecordP,
        PrimOpCode::RecordFieldCount,
        PrimOpCode::RecordFieldName,
        PrimOpCode::RecordWithFieldP,
        PrimOpCode::RecordFieldRef,
        PrimOpCode::RecordFieldRefByName,
        PrimOpCode::RecordFields,
        PrimOpCode::RecordVariadicField,
        PrimOpCode::VariantP,
        PrimOpCode::VariantMemberIndex,
        PrimOpCode::VariantMemberCount,
        PrimOpCode::VariantMembers,
        PrimOpCode::BaseType,
        PrimOpCode::StaticName,
        PrimOpCode::MainModule,
        PrimOpCode::StaticModule,
        PrimOpCode::ModuleName,
        PrimOpCode::ModuleMemberNames,
        PrimOpCode::StaticIntegers,
        PrimOpCode::Integers,
        PrimOpCode::StaticFieldRef,
        PrimOpCode::EnumP,
        PrimOpCode::EnumMemberCount,
        PrimOpCode::EnumMemberName,
        PrimOpCode::EnumToInt,
        PrimOpCode::IntToEnum,
        PrimOpCode::StringLiteralP,
        PrimOpCode::StringLiteralByteIndex,
        PrimOpCode::StringLiteralBytes,
        PrimOpCode::StringLiteralByteSize,
        PrimOpCode::StringLiteralByteSlice,
        PrimOpCode::StringLiteralConcat,
        PrimOpCode::StringLiteralFromBytes,
        PrimOpCode::OrderUnordered,
        PrimOpCode::OrderMonotonic,
        PrimOpCode::OrderAcquire,
        PrimOpCode::OrderRelease,
        PrimOpCode::OrderAcqRel,
        PrimOpCode::OrderSeqCst,
        PrimOpCode::AtomicFence,
        PrimOpCode::AtomicRMW,
        PrimOpCode::RMWXchg,
        PrimOpCode::RMWAdd,
        PrimOpCode::RMWSubtract,
        PrimOpCode::RMWAnd,
        PrimOpCode::RMWNAnd,
        PrimOpCode::RMWOr,
        PrimOpCode::RMWXor,
        PrimOpCode::RMWMin,
        PrimOpCode::RMWMax,
        PrimOpCode::RMWUMin,
        PrimOpCode::RMWUMax,
        PrimOpCode::AtomicLoad,
        PrimOpCode::AtomicStore,
        PrimOpCode::AtomicCompareExchange,
        PrimOpCode::ActiveException,
        PrimOpCode::Memcpy,
        PrimOpCode::Memmove,
        PrimOpCode::CountValues,
        PrimOpCode::NthValue,
        PrimOpCode::WithoutNthValue,
        PrimOpCode::TakeValues,
        PrimOpCode::DropValues,
        PrimOpCode::UsuallyEquals,
        PrimOpCode::TupleLiteral,
        PrimOpCode::Index,
        PrimOpCode::Call,
        PrimOpCode::FieldRefOp,
        PrimOpCode::Destroy,
        PrimOpCode::Copy,
        PrimOpCode::Move,
        PrimOpCode::Assign,
        PrimOpCode::UpdateAssign,
        PrimOpCode::PrefixUpdateAssign,
        PrimOpCode::IndexAssign,
        PrimOpCode::StaticIndexAssign,
        PrimOpCode::FieldRefAssign,
        PrimOpCode::IndexUpdateAssign,
        PrimOpCode::StaticIndexUpdateAssign,
        PrimOpCode::FieldRefUpdateAssign,
        PrimOpCode::ThrowValue,
        PrimOpCode::DispatchTag,
        PrimOpCode::DispatchIndex,
        PrimOpCode::DispatchTagCount,
        PrimOpCode::InvalidDispatch,
        PrimOpCode::VariantReprType,
        PrimOpCode::CallMain,
        PrimOpCode::ExceptionInInitializer,
        PrimOpCode::ExceptionInFinalizer,
    ];

    /// Whether user overloads may be attached to this operation.
    ///
    /// The prelude-operator codes are overloadable; the algebra and
    /// introspection codes are dispatched directly by the analyzer and never
    /// consult overload lists. The split mirrors the original prim-op table
    /// and must stay consistent between analysis and lowering.
    pub fn is_overloadable(self) -> bool {
        use PrimOpCode::*;
        matches!(
            self,
            TupleLiteral
                | Index
                | Call
                | FieldRefOp
                | Destroy
                | Copy
                | Move
                | Assign
                | UpdateAssign
                | PrefixUpdateAssign
                | IndexAssign
                | StaticIndexAssign
                | FieldRefAssign
                | IndexUpdateAssign
                | StaticIndexUpdateAssign
                | FieldRefUpdateAssign
                | ThrowValue
                | DispatchTag
                | DispatchIndex
                | DispatchTagCount
                | InvalidDispatch
                | VariantReprType
                | CallMain
                | ExceptionInInitializer
                | ExceptionInFinalizer
        )
    }

    /// The name the operation is exported under.
    pub fn name(self) -> &'static str {
        use PrimOpCode::*;
        match self {
            TypeP => "Type?",
            TypeSize => "TypeSize",
            TypeAlignment => "TypeAlignment",
            PointerT => "Pointer",
            CodePointerT => "CodePointer",
            ExternalCodePointerT => "ExternalCodePointer",
            ArrayT => "Array",
            VecT => "Vec",
            TupleT => "Tuple",
            UnionT => "Union",
            StaticT => "Static",
            RecordWithPropertiesT => "RecordWithProperties",
            Bitcopy => "bitcopy",
            Bitcast => "bitcast",
            BoolNot => "boolNot",
            IntegerEqualsP => "integerEquals?",
            IntegerLesserP => "integerLesser?",
            FloatOrderedEqualsP => "floatOrderedEquals?",
            FloatOrderedLesserP => "floatOrderedLesser?",
            FloatOrderedLesserEqualsP => "floatOrderedLesserEquals?",
            FloatOrderedGreaterP => "floatOrderedGreater?",
            FloatOrderedGreaterEqualsP => "floatOrderedGreaterEquals?",
            FloatOrderedNotEqualsP => "floatOrderedNotEquals?",
            FloatOrderedP => "floatOrdered?",
            FloatUnorderedEqualsP => "floatUnorderedEquals?",
            FloatUnorderedLesserP => "floatUnorderedLesser?",
            FloatUnorderedLesserEqualsP => "floatUnorderedLesserEquals?",
            FloatUnorderedGreaterP => "floatUnorderedGreater?",
            FloatUnorderedGreaterEqualsP => "floatUnorderedGreaterEquals?",
            FloatUnorderedNotEqualsP => "floatUnorderedNotEquals?",
            FloatUnorderedP => "floatUnordered?",
            NumericAdd => "numericAdd",
            NumericSubtract => "numericSubtract",
            NumericMultiply => "numericMultiply",
            FloatDivide => "floatDivide",
            NumericNegate => "numericNegate",
            IntegerQuotient => "integerQuotient",
            IntegerRemainder => "integerRemainder",
            IntegerShiftLeft => "integerShiftLeft",
            IntegerShiftRight => "integerShiftRight",
            IntegerBitwiseAnd => "integerBitwiseAnd",
            IntegerBitwiseOr => "integerBitwiseOr",
            IntegerBitwiseXor => "integerBitwiseXor",
            IntegerBitwiseNot => "integerBitwiseNot",
            NumericConvert => "numericConvert",
            IntegerAddChecked => "integerAddChecked",
            IntegerSubtractChecked => "integerSubtractChecked",
            IntegerMultiplyChecked => "integerMultiplyChecked",
            IntegerQuotientChecked => "integerQuotientChecked",
            IntegerRemainderChecked => "integerRemainderChecked",
            IntegerShiftLeftChecked => "integerShiftLeftChecked",
            IntegerNegateChecked => "integerNegateChecked",
            IntegerConvertChecked => "integerConvertChecked",
            AddressOf => "addressOf",
            PointerDereference => "pointerDereference",
            PointerOffset => "pointerOffset",
            PointerToInt => "pointerToInt",
            IntToPointer => "intToPointer",
            NullPointer => "nullPointer",
            MakeCodePointer => "makeCodePointer",
            MakeExternalCodePointer => "makeExternalCodePointer",
            CallExternalCodePointer => "callExternalCodePointer",
            ArrayRef => "arrayRef",
            ArrayElements => "arrayElements",
            TupleElementCount => "TupleElementCount",
            TupleRef => "tupleRef",
            TupleElements => "tupleElements",
            UnionMemberCount => "UnionMemberCount",
            RecordP => "Record?",
            RecordFieldCount => "RecordFieldCount",
            RecordFieldName => "RecordFieldName",
            RecordWithFieldP => "RecordWithField?",
            RecordFieldRef => "recordFieldRef",
            RecordFieldRefByName => "recordFieldRefByName",
            RecordFields => "recordFields",
            RecordVariadicField => "recordVariadicField",
            VariantP => "Variant?",
            VariantMemberIndex => "VariantMemberIndex",
            VariantMemberCount => "VariantMemberCount",
            VariantMembers => "VariantMembers",
            BaseType => "BaseType",
            StaticName => "StaticName",
            MainModule => "MainModule",
            StaticModule => "StaticModule",
            ModuleName => "ModuleName",
            ModuleMemberNames => "ModuleMemberNames",
            StaticIntegers => "staticIntegers",
            Integers => "integers",
            StaticFieldRef => "staticFieldRef",
            EnumP => "Enum?",
            EnumMemberCount => "EnumMemberCount",
            EnumMemberName => "EnumMemberName",
            EnumToInt => "enumToInt",
            IntToEnum => "intToEnum",
            StringLiteralP => "StringLiteral?",
            StringLiteralByteIndex => "stringLiteralByteIndex",
            StringLiteralBytes => "stringLiteralBytes",
            StringLiteralByteSize => "stringLiteralByteSize",
            StringLiteralByteSlice => "stringLiteralByteSlice",
            StringLiteralConcat => "stringLiteralConcat",
            StringLiteralFromBytes => "stringLiteralFromBytes",
            OrderUnordered => "OrderUnordered",
            OrderMonotonic => "OrderMonotonic",
            OrderAcquire => "OrderAcquire",
            OrderRelease => "OrderRelease",
            OrderAcqRel => "OrderAcqRel",
            OrderSeqCst => "OrderSeqCst",
            AtomicFence => "atomicFence",
            AtomicRMW => "atomicRMW",
            RMWXchg => "RMWXchg",
            RMWAdd => "RMWAdd",
            RMWSubtract => "RMWSubtract",
            RMWAnd => "RMWAnd",
            RMWNAnd => "RMWNAnd",
            RMWOr => "RMWOr",
            RMWXor => "RMWXor",
            RMWMin => "RMWMin",
            RMWMax => "RMWMax",
            RMWUMin => "RMWUMin",
            RMWUMax => "RMWUMax",
            AtomicLoad => "atomicLoad",
            AtomicStore => "atomicStore",
            AtomicCompareExchange => "atomicCompareExchange",
            ActiveException => "activeException",
            Memcpy => "memcpy",
            Memmove => "memmove",
            CountValues => "countValues",
            NthValue => "nthValue",
            WithoutNthValue => "withoutNthValue",
            TakeValues => "takeValues",
            DropValues => "dropValues",
            UsuallyEquals => "usuallyEquals",
            TupleLiteral => "tupleLiteral",
            Index => "index",
            Call => "call",
            FieldRefOp => "fieldRef",
            Destroy => "destroy",
            Copy => "copy",
            Move => "move",
            Assign => "assign",
            UpdateAssign => "updateAssign",
            PrefixUpdateAssign => "prefixUpdateAssign",
            IndexAssign => "indexAssign",
            StaticIndexAssign => "staticIndexAssign",
            FieldRefAssign => "fieldRefAssign",
            IndexUpdateAssign => "indexUpdateAssign",
            StaticIndexUpdateAssign => "staticIndexUpdateAssign",
            FieldRefUpdateAssign => "fieldRefUpdateAssign",
            ThrowValue => "throwValue",
            DispatchTag => "dispatchTag",
            DispatchIndex => "dispatchIndex",
            DispatchTagCount => "DispatchTagCount",
            InvalidDispatch => "invalidDispatch",
            VariantReprType => "variantReprType",
            CallMain => "callMain",
            ExceptionInInitializer => "exceptionInInitializer",
            ExceptionInFinalizer => "exceptionInFinalizer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overloadable_split_covers_operators_only() {
        assert!(PrimOpCode::Assign.is_overloadable());
        assert!(PrimOpCode::Destroy.is_overloadable());
        assert!(PrimOpCode::DispatchTag.is_overloadable());
        assert!(!PrimOpCode::NumericAdd.is_overloadable());
        assert!(!PrimOpCode::RecordFieldRef.is_overloadable());
        assert!(!PrimOpCode::AtomicLoad.is_overloadable());
    }

    #[test]
    fn names_are_unique_for_operator_lookup() {
        use std::collections::HashSet;
        let codes = [
            PrimOpCode::TupleLiteral,
            PrimOpCode::Index,
            PrimOpCode::Assign,
            PrimOpCode::Destroy,
            PrimOpCode::Copy,
            PrimOpCode::Move,
            PrimOpCode::ThrowValue,
            PrimOpCode::DispatchTag,
            PrimOpCode::DispatchIndex,
        ];
        let names: HashSet<&str> = codes.iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), codes.len());
    }
}
