//! Pass-1 operand representation: everything [`crate::operand_parser`] can
//! produce from a token stream before the symbol table is complete.
//!
//! `vcpu::Operand` has no placeholder for "a name I haven't resolved yet",
//! by design (see its doc comment) — that job belongs here. Pass 2 (see
//! [`crate::assembler`]) walks every [`RawOperand`] and turns it into a
//! real `vcpu::Operand`, consulting [`crate::symtab::SymbolTable`] for
//! anything symbolic. A `Symbol`/`Variable`/`Offset`/`Seg` surviving to the
//! end of pass 2 with no matching entry in the table is an undefined-symbol
//! error.

use vcpu::{RegisterId, SegmentId};

#[derive(Clone, Debug, PartialEq)]
pub enum RawOperand {
    Register(RegisterId),
    SegmentRegister(SegmentId),
    Immediate(i32),
    /// A bracketed memory operand with no symbolic name, e.g. `[BX+SI+4]`.
    Memory {
        segment_override: Option<SegmentId>,
        base: Option<RegisterId>,
        index: Option<RegisterId>,
        displacement: i32,
    },
    /// A variable or label name used as a memory reference, optionally
    /// indexed (`MSG[BX]`) or segment-overridden (`ES:MSG`). Resolves to
    /// `vcpu::Operand::Mem` once the symbol's offset is known.
    Variable {
        name: String,
        segment_override: Option<SegmentId>,
        base: Option<RegisterId>,
        index: Option<RegisterId>,
        displacement: i32,
    },
    /// `OFFSET name` — resolves to the symbol's slot offset as an
    /// immediate.
    Offset(String),
    /// `SEG name` — resolves to the paragraph address of the segment the
    /// symbol lives in, as an immediate.
    Seg(String),
    /// `TYPE name` — always resolves to `Immediate(0)`.
    Type(String),
    /// A bare name with no bracket or segment override. Ambiguous until
    /// pass 2 knows the owning instruction: a transfer-of-control
    /// instruction resolves it as a jump/call target (near offset, or
    /// `seg:offset` if `far` is set by `SHORT`/`NEAR`/`FAR`); anything else
    /// resolves it as a direct memory reference to a variable.
    Symbol { name: String, far: bool },
}
