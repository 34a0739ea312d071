//! An assembler for a small, MASM-flavored 8086 assembly dialect, producing
//! a [`vexfile::Executable`] the `vex` loader can relocate and run directly
//! under [`vcpu`].
//!
//! # Dialect
//!
//! A program is a sequence of named `SEGMENT`/`ENDS` blocks, each assumed
//! onto one of the four segment registers with `ASSUME CS:name, DS:name,
//! ...` (in any order, anywhere in the source — every `ASSUME` is collected
//! before the main pass so a segment can resolve its own register as soon
//! as it opens). `NAME`/`TITLE` are accepted and ignored. `ORG expr` moves
//! the current segment's write cursor; `EVEN` and `ALIGN n` pad it to a
//! 2-byte or `n`-byte boundary. `END [label]` closes the source and, if
//! given, names the entry point.
//!
//! A line of the form `NAME:` defines a code label at the segment's current
//! offset; `NAME DB/DW/DD elements` defines a byte/word/dword variable and
//! reserves space for it (see [`data`] for `DUP` and string-literal
//! support). Anything else is parsed as an instruction: an optional
//! `REP`/`REPE`/`REPNE` prefix, a mnemonic, and a comma-separated operand
//! list. Operands accept `BYTE PTR`/`WORD PTR`/`DWORD PTR` width
//! qualifiers, `SHORT`/`NEAR`/`FAR` distance qualifiers, a `SEGREG:`
//! override, bracketed memory forms (`[BX+SI+4]`, `MSG[BX]`), and the
//! `OFFSET`/`SEG`/`TYPE` operators (see [`operand_parser`]).
//!
//! # Two passes
//!
//! Assembly happens in two passes (see [`assembler`]). Pass 1 walks the
//! preprocessed source once, building the symbol table and, per segment, a
//! list of slots — each instruction or data byte occupies exactly one slot,
//! so a symbol's offset is known the moment its line is reached; there is
//! no separate size-counting pass the way assembling to real variable-
//! length machine code would need. Pass 2 walks every pending instruction
//! and resolves its operands against the now-complete symbol table,
//! producing the final `vcpu::Operand` values the execution unit expects.

pub mod assembler;
pub mod ast;
pub mod data;
pub mod error;
pub mod instructions;
pub mod lexer;
pub mod numeric;
pub mod operand_parser;
pub mod source_map;
pub mod symtab;

pub use assembler::assemble;
pub use error::{Error, Result};
pub use source_map::{SourceMap, SourceMapItem};
