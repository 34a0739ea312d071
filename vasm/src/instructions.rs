//! Pass-1 parsing of one instruction line (an optional `REP`-family prefix,
//! a mnemonic, and a comma-separated operand list) into a
//! [`PendingInstruction`] — operands are [`ParsedOperand`]s, not yet
//! resolved against the symbol table.

use std::str::FromStr;

use vcpu::{Opcode, RepPrefix};

use crate::error::{Error, Result};
use crate::lexer::split_operands;
use crate::operand_parser::{parse_operand, ParsedOperand};

pub struct PendingInstruction {
    pub opcode: Opcode,
    pub operands: Vec<ParsedOperand>,
    pub rep_prefix: Option<RepPrefix>,
}

const REP_PREFIXES: &[(&str, RepPrefix)] = &[
    ("REPE", RepPrefix::Repe),
    ("REPZ", RepPrefix::Repe),
    ("REPNE", RepPrefix::Repne),
    ("REPNZ", RepPrefix::Repne),
    ("REP", RepPrefix::Rep),
];

/// Parse `tokens`/`text` (both already produced by [`crate::lexer`]) as an
/// instruction. `text` is consulted, not `tokens`, for the operand list, so
/// a multi-word operand like `OFFSET MSG` survives as one piece instead of
/// being torn apart by the same whitespace/comma split used to classify the
/// line.
pub fn parse_instruction(line: u32, tokens: &[String], text: &str) -> Result<PendingInstruction> {
    let mut mnemonic_idx = 0;
    let mut rep_prefix = None;
    if let Some(&(_, prefix)) = REP_PREFIXES.iter().find(|(name, _)| tokens[0] == *name) {
        rep_prefix = Some(prefix);
        mnemonic_idx = 1;
    }

    let mnemonic = tokens
        .get(mnemonic_idx)
        .ok_or(Error::MissingOperand { line })?;
    let opcode = Opcode::from_str(mnemonic)
        .map_err(|_| Error::UnknownMnemonic { line, mnemonic: mnemonic.clone() })?;

    let operand_text = text_after_nth_token(text, mnemonic_idx + 1);
    let mut operands = Vec::new();
    for piece in split_operands(&operand_text) {
        operands.push(parse_operand(line, &piece)?);
    }

    Ok(PendingInstruction { opcode, operands, rep_prefix })
}

/// Skip the first `count` whitespace/comma-delimited words of `text` and
/// return what is left, trimmed. Mirrors [`crate::lexer::tokenize`]'s own
/// notion of a word boundary so it lines up with `tokens`.
fn text_after_nth_token(text: &str, count: usize) -> String {
    let mut remaining = text;
    for _ in 0..count {
        remaining = skip_first_word(remaining);
    }
    remaining.trim().to_string()
}

fn skip_first_word(s: &str) -> &str {
    let s = s.trim_start();
    let end = s.find(|c: char| c.is_whitespace() || c == ',').unwrap_or(s.len());
    s[end..].trim_start_matches(',')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::RawOperand;
    use vcpu::RegisterId;

    #[test]
    fn parses_mnemonic_and_operands() {
        let tokens = vec!["MOV".to_string(), "AX".to_string(), "5".to_string()];
        let pending = parse_instruction(1, &tokens, "MOV AX, 5").unwrap();
        assert_eq!(pending.opcode, Opcode::MOV);
        assert_eq!(pending.operands.len(), 2);
        assert_eq!(pending.operands[0].raw, RawOperand::Register(RegisterId::AX));
        assert_eq!(pending.operands[1].raw, RawOperand::Immediate(5));
    }

    #[test]
    fn recognizes_a_rep_prefix() {
        let tokens = vec!["REP".to_string(), "MOVSB".to_string()];
        let pending = parse_instruction(1, &tokens, "REP MOVSB").unwrap();
        assert_eq!(pending.opcode, Opcode::MOVSB);
        assert_eq!(pending.rep_prefix, Some(RepPrefix::Rep));
    }

    #[test]
    fn keeps_an_offset_expression_as_one_operand() {
        let tokens = vec!["MOV".to_string(), "DX".to_string(), "OFFSET".to_string(), "MSG".to_string()];
        let pending = parse_instruction(1, &tokens, "MOV DX, OFFSET MSG").unwrap();
        assert_eq!(pending.operands.len(), 2);
        assert_eq!(pending.operands[1].raw, RawOperand::Offset("MSG".to_string()));
    }

    #[test]
    fn unknown_mnemonic_is_an_error() {
        let tokens = vec!["FROBNICATE".to_string()];
        assert!(parse_instruction(1, &tokens, "FROBNICATE").is_err());
    }
}
