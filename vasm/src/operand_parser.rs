//! Parses one already-comma-split, uppercased operand string (e.g.
//! `"BYTE PTR [BX+4]"`, `"OFFSET MSG"`, `"ES:[DI]"`) into a [`RawOperand`]
//! plus an optional width override contributed by a `PTR` qualifier.

use crate::ast::RawOperand;
use crate::error::{Error, Result};
use crate::numeric::{looks_numeric, parse_integer};
use std::str::FromStr;
use vcpu::{RegisterId, SegmentId};

pub struct ParsedOperand {
    pub raw: RawOperand,
    pub width_override: Option<u8>,
    pub far: bool,
}

pub fn parse_operand(line: u32, text: &str) -> Result<ParsedOperand> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut s = collapsed.as_str();
    let mut width_override = None;
    let mut far = false;

    loop {
        if let Some(rest) = strip_keyword(s, "BYTE PTR") {
            width_override = Some(1);
            s = rest;
        } else if let Some(rest) = strip_keyword(s, "WORD PTR") {
            width_override = Some(2);
            s = rest;
        } else if let Some(rest) = strip_keyword(s, "DWORD PTR") {
            width_override = Some(4);
            s = rest;
        } else if let Some(rest) = strip_keyword(s, "SHORT") {
            s = rest;
        } else if let Some(rest) = strip_keyword(s, "NEAR") {
            s = rest;
        } else if let Some(rest) = strip_keyword(s, "FAR") {
            far = true;
            s = rest;
        } else {
            break;
        }
    }

    if let Some(rest) = strip_keyword(s, "OFFSET") {
        return Ok(ParsedOperand { raw: RawOperand::Offset(rest.to_string()), width_override, far });
    }
    if let Some(rest) = strip_keyword(s, "SEG") {
        return Ok(ParsedOperand { raw: RawOperand::Seg(rest.to_string()), width_override, far });
    }
    if let Some(rest) = strip_keyword(s, "TYPE") {
        return Ok(ParsedOperand { raw: RawOperand::Type(rest.to_string()), width_override, far });
    }

    let (segment_override, rest) = strip_segment_prefix(s);
    let raw = parse_operand_body(line, rest, segment_override, far)?;
    Ok(ParsedOperand { raw, width_override, far })
}

/// Strip a leading keyword followed by at least one space, returning the
/// trimmed remainder. `s` is assumed already uppercased.
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = s.strip_prefix(keyword)?;
    if rest.is_empty() {
        return None;
    }
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim_start())
}

/// `SEGREG:rest` prefix, e.g. `ES:[DI]` or `DS:MSG`.
fn strip_segment_prefix(s: &str) -> (Option<SegmentId>, &str) {
    if let Some(idx) = top_level_colon(s) {
        let (head, tail) = s.split_at(idx);
        if let Ok(seg) = SegmentId::from_str(head.trim()) {
            return (Some(seg), tail[1..].trim());
        }
    }
    (None, s)
}

fn top_level_colon(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, ch) in s.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth -= 1,
            ':' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_operand_body(
    line: u32,
    s: &str,
    segment_override: Option<SegmentId>,
    far: bool,
) -> Result<RawOperand> {
    if s.is_empty() {
        return Err(Error::MissingOperand { line });
    }

    if let Some(bracket_start) = s.find('[') {
        if !s.ends_with(']') {
            return Err(Error::MalformedOperand { line, operand: s.to_string() });
        }
        let name = s[..bracket_start].trim();
        let contents = &s[bracket_start + 1..s.len() - 1];
        let (base, index, displacement) = parse_bracket_contents(line, contents)?;
        return if name.is_empty() {
            Ok(RawOperand::Memory { segment_override, base, index, displacement })
        } else {
            Ok(RawOperand::Variable {
                name: name.to_string(),
                segment_override,
                base,
                index,
                displacement,
            })
        };
    }

    if segment_override.is_some() {
        return Ok(RawOperand::Variable {
            name: s.to_string(),
            segment_override,
            base: None,
            index: None,
            displacement: 0,
        });
    }

    if let Ok(reg) = RegisterId::from_str(s) {
        return Ok(RawOperand::Register(reg));
    }
    if let Ok(seg) = SegmentId::from_str(s) {
        return Ok(RawOperand::SegmentRegister(seg));
    }
    if looks_numeric(s) {
        return Ok(RawOperand::Immediate(parse_integer(line, s)?));
    }

    Ok(RawOperand::Symbol { name: s.to_string(), far })
}

/// Parse the inside of `[...]`: a sum of registers and signed integer
/// terms, e.g. `BX+SI+4` or `BP-2` or `DI`. `BX`/`BP` classify as the base
/// register, `SI`/`DI` as the index register, matching 8086 addressing
/// modes; everything numeric accumulates into the displacement.
fn parse_bracket_contents(
    line: u32,
    contents: &str,
) -> Result<(Option<RegisterId>, Option<RegisterId>, i32)> {
    let mut base = None;
    let mut index = None;
    let mut displacement = 0i32;

    let mut term = String::new();
    let mut sign = 1i32;
    let mut terms: Vec<(i32, String)> = Vec::new();
    for ch in contents.chars() {
        match ch {
            '+' | '-' => {
                if !term.trim().is_empty() {
                    terms.push((sign, term.trim().to_string()));
                }
                term.clear();
                sign = if ch == '-' { -1 } else { 1 };
            }
            _ => term.push(ch),
        }
    }
    if !term.trim().is_empty() {
        terms.push((sign, term.trim().to_string()));
    }

    for (term_sign, raw_term) in terms {
        if let Ok(reg) = RegisterId::from_str(&raw_term) {
            match reg {
                RegisterId::BX | RegisterId::BP if base.is_none() => base = Some(reg),
                RegisterId::SI | RegisterId::DI if index.is_none() => index = Some(reg),
                _ => return Err(Error::MalformedOperand { line, operand: contents.to_string() }),
            }
            continue;
        }
        let value = parse_integer(line, &raw_term)?;
        displacement += term_sign * value;
    }

    Ok((base, index, displacement))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_operand_parses() {
        let parsed = parse_operand(1, "AX").unwrap();
        assert_eq!(parsed.raw, RawOperand::Register(RegisterId::AX));
    }

    #[test]
    fn offset_expression_parses_as_offset() {
        let parsed = parse_operand(1, "OFFSET MSG").unwrap();
        assert_eq!(parsed.raw, RawOperand::Offset("MSG".to_string()));
    }

    #[test]
    fn byte_ptr_sets_width_override_and_parses_the_memory_operand() {
        let parsed = parse_operand(1, "BYTE PTR [BX+4]").unwrap();
        assert_eq!(parsed.width_override, Some(1));
        assert_eq!(
            parsed.raw,
            RawOperand::Memory {
                segment_override: None,
                base: Some(RegisterId::BX),
                index: None,
                displacement: 4,
            }
        );
    }

    #[test]
    fn segment_override_prefix_parses() {
        let parsed = parse_operand(1, "ES:[DI]").unwrap();
        match parsed.raw {
            RawOperand::Memory { segment_override: Some(SegmentId::ES), base: None, index: Some(RegisterId::DI), displacement: 0 } => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn variable_with_index_parses() {
        let parsed = parse_operand(1, "MSG[BX]").unwrap();
        match parsed.raw {
            RawOperand::Variable { name, base: Some(RegisterId::BX), .. } => assert_eq!(name, "MSG"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn bare_identifier_is_a_symbol() {
        let parsed = parse_operand(1, "L1").unwrap();
        assert_eq!(parsed.raw, RawOperand::Symbol { name: "L1".to_string(), far: false });
    }

    #[test]
    fn hex_suffix_immediate_parses() {
        let parsed = parse_operand(1, "0FFH").unwrap();
        assert_eq!(parsed.raw, RawOperand::Immediate(0xff));
    }
}
