//! Opcodes and operand forms shared between the assembler and the
//! execution unit.

use crate::register::{RegisterId, SegmentId};
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use util::EnumFromStr;
use util_derive::{EnumFromStr, InteropGetName};

/// Every mnemonic this emulator recognizes. Mirrors the source-level
/// 8086 mnemonic, so parsing is a straight `FromStr` on the uppercased
/// token.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumFromStr,
    InteropGetName,
    FromPrimitive,
    ToPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum Opcode {
    // Data transfer
    MOV,
    XCHG,
    LEA,
    LDS,
    LES,

    // Arithmetic
    ADD,
    ADC,
    SUB,
    SBB,
    CMP,
    MUL,
    DIV,
    INC,
    DEC,
    NEG,
    CBW,
    CWD,

    // Logical
    AND,
    OR,
    XOR,
    NOT,
    TEST,

    // Shift / rotate
    SHL,
    SAL,
    SHR,
    SAR,
    ROL,
    ROR,
    RCL,
    RCR,

    // Transfer of control
    JMP,
    CALL,
    RET,
    RETF,
    LOOP,
    LOOPE,
    LOOPZ,
    LOOPNE,
    LOOPNZ,
    JCXZ,
    JE,
    JZ,
    JNE,
    JNZ,
    JG,
    JNLE,
    JGE,
    JNL,
    JL,
    JNGE,
    JLE,
    JNG,
    JA,
    JNBE,
    JAE,
    JNB,
    JB,
    JNAE,
    JBE,
    JNA,
    JC,
    JNC,
    JO,
    JNO,
    JS,
    JNS,
    JP,
    JPE,
    JNP,
    JPO,

    // String manipulation (the `B`/`W` suffix fixes the operand width,
    // see `Opcode::string_width`)
    MOVSB,
    MOVSW,
    CMPSB,
    CMPSW,
    LODSB,
    LODSW,
    STOSB,
    STOSW,
    SCASB,
    SCASW,

    // Flag manipulation
    STC,
    CLC,
    CMC,
    STD,
    CLD,
    STI,
    CLI,
    LAHF,
    SAHF,

    // Stack
    PUSH,
    POP,
    PUSHF,
    POPF,

    // I/O
    IN,
    OUT,

    // Miscellaneous
    NOP,
    INT,
    IRET,
    HLT,
    INTO,
    XLAT,
    ESC,
    WAIT,
    LOCK,
}

impl Opcode {
    /// Explicit operand width carried by a `B`/`W`-suffixed string
    /// instruction, if any.
    pub fn string_width(self) -> Option<u8> {
        use Opcode::*;
        match self {
            MOVSB | CMPSB | LODSB | STOSB | SCASB => Some(1),
            MOVSW | CMPSW | LODSW | STOSW | SCASW => Some(2),
            _ => None,
        }
    }

    pub fn is_conditional_jump(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            JE | JZ
                | JNE
                | JNZ
                | JG
                | JNLE
                | JGE
                | JNL
                | JL
                | JNGE
                | JLE
                | JNG
                | JA
                | JNBE
                | JAE
                | JNB
                | JB
                | JNAE
                | JBE
                | JNA
                | JC
                | JNC
                | JO
                | JNO
                | JS
                | JNS
                | JP
                | JPE
                | JNP
                | JPO
                | JCXZ
        )
    }

    pub fn is_loop(self) -> bool {
        use Opcode::*;
        matches!(self, LOOP | LOOPE | LOOPZ | LOOPNE | LOOPNZ)
    }

    pub fn is_string_instruction(self) -> bool {
        self.string_width().is_some()
    }
}

/// One repeat-prefix preceding a string instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepPrefix {
    Rep,
    Repe,
    Repne,
}

/// A fully-resolved operand, as seen by the execution unit. Assembly-time
/// placeholders (`Label`/`FarLabel`) are resolved away before a program is
/// handed to a [`Machine`](crate::machine::Machine) — see `vasm`'s
/// two-pass resolver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Reg(RegisterId),
    SegReg(SegmentId),
    Imm(i32),
    Mem {
        segment_override: Option<SegmentId>,
        base: Option<RegisterId>,
        index: Option<RegisterId>,
        displacement: i32,
    },
    /// A resolved `FAR` target, e.g. a `CALL seg:off` to a known label or
    /// an `INT`-style IVT transfer. Near targets resolve to a plain
    /// [`Operand::Imm`] offset instead.
    FarPtr { segment: u16, offset: u16 },
}

impl Operand {
    pub fn mem(
        segment_override: Option<SegmentId>,
        base: Option<RegisterId>,
        index: Option<RegisterId>,
        displacement: i32,
    ) -> Operand {
        Operand::Mem {
            segment_override,
            base,
            index,
            displacement,
        }
    }
}

/// One decoded instruction slot, ready for the execution unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub rep_prefix: Option<RepPrefix>,
    /// Explicit `BYTE PTR`/`WORD PTR`/`DWORD PTR` width override carried
    /// from assembly time; the `PTR` token itself is dropped (see
    /// `vasm::instructions`), but the width it pinned down still has to
    /// reach the execution unit when no register operand is present to
    /// infer it from.
    pub width_override: Option<u8>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Instruction {
        Instruction {
            opcode,
            operands,
            rep_prefix: None,
            width_override: None,
        }
    }

    pub fn with_width(opcode: Opcode, operands: Vec<Operand>, width: u8) -> Instruction {
        Instruction {
            opcode,
            operands,
            rep_prefix: None,
            width_override: Some(width),
        }
    }

    pub fn with_rep(opcode: Opcode, rep_prefix: RepPrefix) -> Instruction {
        Instruction {
            opcode,
            operands: Vec::new(),
            rep_prefix: Some(rep_prefix),
            width_override: None,
        }
    }

    /// The operand width in bytes this instruction operates at (§4.6
    /// "Operand width (opbyte)"): an 8-bit register among the operands
    /// forces width 1; otherwise an explicit `PTR` override or a string
    /// instruction's `B`/`W` suffix applies; default is 2.
    pub fn operand_width(&self) -> u8 {
        if let Some(width) = self.opcode.string_width() {
            return width;
        }
        for operand in &self.operands {
            if let Operand::Reg(reg) = operand {
                if reg.is_byte() {
                    return 1;
                }
            }
        }
        self.width_override.unwrap_or(2)
    }
}

/// One entry in an assembled segment image: either an instruction slot, a
/// data byte, or unwritten.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    Empty,
    Instruction(Instruction),
    Data(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_parses_from_uppercased_mnemonic() {
        assert_eq!("mov".to_uppercase().parse::<Opcode>().unwrap(), Opcode::MOV);
        assert!("frobnicate".parse::<Opcode>().is_err());
    }

    #[test]
    fn string_width_is_only_set_for_suffixed_mnemonics() {
        assert_eq!(Opcode::MOVSB.string_width(), Some(1));
        assert_eq!(Opcode::MOVSW.string_width(), Some(2));
        assert_eq!(Opcode::MOV.string_width(), None);
    }
}
