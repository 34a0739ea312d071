//! Assembly-time errors. Every variant that can be traced back to a source
//! line carries one, satisfying "the assembler reports the offending line
//! context" — the runtime's own [`vcpu::Error`] has no notion of a source
//! line, so it is wrapped verbatim for the handful of checks (address
//! range, for instance) that are shared between assembly and execution.

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("line {line}: ALIGN requires a power-of-two argument, found {value}")]
    NonPowerOfTwoAlign { line: u32, value: i32 },

    #[error("line {line}: malformed numeric or string literal \"{token}\"")]
    MalformedLiteral { line: u32, token: String },

    #[error("line {line}: unknown data directive \"{token}\"")]
    UnknownDataDirective { line: u32, token: String },

    #[error("line {line}: unknown mnemonic \"{mnemonic}\"")]
    UnknownMnemonic { line: u32, mnemonic: String },

    #[error("line {line}: expected an operand, found none")]
    MissingOperand { line: u32 },

    #[error("line {line}: could not parse operand \"{operand}\"")]
    MalformedOperand { line: u32, operand: String },

    #[error("line {line}: segment \"{segment}\" is missing a matching ENDS")]
    MissingEnds { line: u32, segment: String },

    #[error("line {line}: ENDS \"{segment}\" has no matching SEGMENT")]
    UnmatchedEnds { line: u32, segment: String },

    #[error("line {line}: segment \"{segment}\" has no ASSUME mapping to a segment register")]
    UnassignedSegment { line: u32, segment: String },

    #[error("line {line}: \"{name}\" is not defined")]
    UndefinedSymbol { line: u32, name: String },

    #[error("line {line}: END references unknown entry label \"{label}\"")]
    UnknownEntryLabel { line: u32, label: String },

    #[error("line {line}: instruction outside of any SEGMENT block")]
    OutsideSegment { line: u32 },

    #[error(transparent)]
    Cpu(#[from] vcpu::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
