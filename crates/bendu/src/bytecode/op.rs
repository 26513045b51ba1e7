//! Opcode definitions (spec.md §4.3 "Instruction set"; §6 "Instruction
//! encoding").
//!
//! Grounded on the teacher's `bytecode/op.rs`/`builder.rs` split: `Opcode`
//! is a plain `#[repr(u8)]` tag with no embedded payload — immediates live
//! in the bytecode stream right after the tag byte, written/read by
//! [`super::builder::CodeBuilder`] and [`super::super::bytecode::vm`]
//! respectively, the same division of labour the teacher uses for its own
//! one-byte-opcode-plus-typed-operands encoding.

/// One VM instruction tag. Discriminants are assigned by declaration order
/// and are only meaningful within bytecode produced and consumed by the
/// same build (spec.md's Non-goals rule out cross-version bytecode
/// compatibility).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr)]
#[repr(u8)]
pub enum Opcode {
    // --- constants ---
    PushI32Literal,
    PushF32Literal,
    PushU8Literal,
    PushStringLiteral,
    PushUnitLiteral,
    PushBoolTrue,
    PushBoolFalse,

    // --- arithmetic, specialized per primitive ---
    AddI32,
    SubI32,
    MulI32,
    DivI32,
    ModI32,
    AddF32,
    SubF32,
    MulF32,
    DivF32,
    AddString,
    AddChar,

    // --- comparison, specialized per primitive ---
    EqI32,
    NeqI32,
    LtI32,
    LteI32,
    GtI32,
    GteI32,
    EqF32,
    NeqF32,
    LtF32,
    LteF32,
    GtF32,
    GteF32,
    EqString,
    NeqString,
    LtString,
    LteString,
    GtString,
    GteString,
    EqChar,
    NeqChar,
    LtChar,
    LteChar,
    GtChar,
    GteChar,
    EqBool,
    NeqBool,
    /// Fallback comparison when the operand type is still a type variable at
    /// codegen time (spec.md §4.3: "Generic operators (eq, neq) are the
    /// fallback when types remain polymorphic").
    EqGeneric,
    NeqGeneric,

    // --- logical short-circuit ---
    JmpDupTrue,
    JmpDupFalse,

    // --- control flow ---
    Jmp,
    JmpFalse,
    Ret,

    // --- frame and local access ---
    Load,
    Store,
    LoadPackage,
    StorePackage,

    // --- calls ---
    Call,
    CallClosure,
    CallPackage,

    // --- heap constructors ---
    PushTuple,
    PushTupleComponent,
    PushArray,
    ArrayIndex,
    ArraySlice,
    PushCustom,
    PushConstructorComponent,
    /// Pops a `Custom` value, pushes its constructor id as an `Int` — the
    /// runtime counterpart of the static constructor tag tested during
    /// pattern-match compilation (spec.md §4.3, match-arm dispatch).
    PushConstructorTag,
    PushClosure,

    // --- builtin dispatch ---
    CallBuiltin,

    // --- printing ---
    Print,
    PrintI32,
    PrintF32,
    PrintBool,
    PrintChar,
    PrintUnit,
    Println,

    // --- stack discipline ---
    Dup,
    Discard,
    NotBool,
}

impl Opcode {
    #[inline]
    pub fn decode(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_round_trips_through_its_byte_tag() {
        for tag in 0u8..=(Opcode::NotBool as u8) {
            assert!(Opcode::decode(tag).is_some(), "tag {tag} did not decode");
        }
    }
}
