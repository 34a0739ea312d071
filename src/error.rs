//! Runtime error types for the processor core.
//!
//! Assembly-time errors live in the `vasm` crate; this module only covers
//! failures that can occur while a [`Machine`](crate::machine::Machine) is
//! executing an already-assembled program.

use thiserror::Error;

/// Errors raised while a [`Machine`](crate::machine::Machine) executes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("address {address:#x} is outside the addressable range [0, {limit:#x})")]
    AddressOutOfRange { address: i64, limit: usize },

    #[error("unknown mnemonic \"{mnemonic}\"")]
    UnknownMnemonic { mnemonic: String },

    #[error("instruction \"{mnemonic}\" cannot operate on operand width {width}")]
    InvalidOperandWidth { mnemonic: String, width: u8 },

    #[error("instruction \"{mnemonic}\" expected a {expected} operand, found {found}")]
    InvalidOperandKind {
        mnemonic: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("interrupt vector {vector:#x} has no registered handler")]
    UnhandledInterrupt { vector: u8 },

    #[error("segment registers can only be loaded from a general register or memory, not an immediate")]
    ImmediateSegmentLoad,

    #[error("stack pointer {sp:#x} is not even")]
    UnalignedStackPointer { sp: u16 },
}

pub type Result<T> = std::result::Result<T, Error>;
