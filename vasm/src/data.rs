//! `DB`/`DW`/`DD` data-definition expansion into raw bytes, including
//! `count DUP(expr)` repetition and double/single-quoted string literals
//! (characters emitted as their ASCII bytes).

use crate::error::{Error, Result};
use crate::numeric::parse_integer;
use byteorder::{ByteOrder, LittleEndian};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataWidth {
    Byte,
    Word,
    Dword,
}

impl DataWidth {
    fn bytes(self) -> usize {
        match self {
            DataWidth::Byte => 1,
            DataWidth::Word => 2,
            DataWidth::Dword => 4,
        }
    }
}

/// Expand the comma-split operand list of a `DB`/`DW`/`DD` directive into
/// raw bytes. Each element is either an integer literal, a `count
/// DUP(expr)` repetition, or — `DB` only — a quoted string.
pub fn expand(line: u32, width: DataWidth, elements: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for element in elements {
        expand_element(line, width, element, &mut out)?;
    }
    Ok(out)
}

fn expand_element(line: u32, width: DataWidth, element: &str, out: &mut Vec<u8>) -> Result<()> {
    let element = element.trim();

    if width == DataWidth::Byte && is_quoted_string(element) {
        let text = &element[1..element.len() - 1];
        out.extend(text.bytes());
        return Ok(());
    }

    if let Some((count, inner)) = split_dup(element) {
        let count = parse_integer(line, count.trim())?;
        if count < 0 {
            return Err(Error::MalformedLiteral { line, token: element.to_string() });
        }
        for piece in crate::lexer::split_operands(inner) {
            for _ in 0..count {
                expand_element(line, width, &piece, out)?;
            }
        }
        return Ok(());
    }

    let value = parse_integer(line, element)
        .map_err(|_| Error::MalformedLiteral { line, token: element.to_string() })?;
    push_le(width, value, out);
    Ok(())
}

fn is_quoted_string(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
}

/// Recognize `count DUP(expr)`, returning `(count, expr)` if `element`
/// matches that shape.
fn split_dup(element: &str) -> Option<(&str, &str)> {
    let open = element.find("DUP(")?;
    if !element.ends_with(')') {
        return None;
    }
    let count = &element[..open];
    let inner = &element[open + 4..element.len() - 1];
    Some((count, inner))
}

fn push_le(width: DataWidth, value: i32, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + width.bytes(), 0);
    match width {
        DataWidth::Byte => out[start] = value as u8,
        DataWidth::Word => LittleEndian::write_u16(&mut out[start..], value as u16),
        DataWidth::Dword => LittleEndian::write_u32(&mut out[start..], value as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_accepts_integers_and_strings() {
        let out = expand(1, DataWidth::Byte, &["\"HI$\"".to_string(), "0".to_string()]).unwrap();
        assert_eq!(out, vec![b'H', b'I', b'$', 0]);
    }

    #[test]
    fn dw_is_little_endian() {
        let out = expand(1, DataWidth::Word, &["0x1234".to_string()]).unwrap();
        assert_eq!(out, vec![0x34, 0x12]);
    }

    #[test]
    fn dd_is_little_endian() {
        let out = expand(1, DataWidth::Dword, &["0DEADBEEFH".to_string()]).unwrap();
        assert_eq!(out, vec![0xef, 0xbe, 0xad, 0xde]);
    }

    #[test]
    fn dup_repeats_its_expression() {
        let out = expand(1, DataWidth::Byte, &["3 DUP(0)".to_string()]).unwrap();
        assert_eq!(out, vec![0, 0, 0]);
    }
}
