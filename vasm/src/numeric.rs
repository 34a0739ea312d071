//! Numeric literal parsing (MASM-style: `0x…`/`0X…` hex, and
//! suffix-based radices `…B`/`…O`/`…D`/`…H`; unsuffixed is decimal).
//!
//! Parsing is case-insensitive, but [`crate::lexer::preprocess`] already
//! uppercases every line, so every token this module sees has already been
//! uppercased once before it arrives.

use crate::error::{Error, Result};

/// Parse one numeric literal token (already uppercased) to a signed
/// 32-bit value. Accepts an optional leading `+`/`-` sign.
pub fn parse_integer(line: u32, token: &str) -> Result<i32> {
    let (sign, unsigned) = match token.strip_prefix('-') {
        Some(rest) => (-1i32, rest),
        None => (1i32, token.strip_prefix('+').unwrap_or(token)),
    };
    if unsigned.is_empty() {
        return Err(Error::MalformedLiteral { line, token: token.to_string() });
    }

    let malformed = || Error::MalformedLiteral { line, token: token.to_string() };

    let magnitude = if let Some(rest) = unsigned.strip_prefix("0X") {
        i64::from_str_radix(rest, 16).map_err(|_| malformed())?
    } else if let Some(rest) = unsigned.strip_suffix('B') {
        i64::from_str_radix(rest, 2).map_err(|_| malformed())?
    } else if let Some(rest) = unsigned.strip_suffix('O') {
        i64::from_str_radix(rest, 8).map_err(|_| malformed())?
    } else if let Some(rest) = unsigned.strip_suffix('H') {
        i64::from_str_radix(rest, 16).map_err(|_| malformed())?
    } else if let Some(rest) = unsigned.strip_suffix('D') {
        rest.parse::<i64>().map_err(|_| malformed())?
    } else {
        unsigned.parse::<i64>().map_err(|_| malformed())?
    };

    Ok((sign as i64 * magnitude) as i32)
}

/// True iff `token` looks like a numeric literal at all (used to tell an
/// immediate apart from a register/symbol name while parsing operands).
pub fn looks_numeric(token: &str) -> bool {
    let unsigned = token
        .strip_prefix('-')
        .or_else(|| token.strip_prefix('+'))
        .unwrap_or(token);
    matches!(unsigned.chars().next(), Some(c) if c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_suffix_literal_parses() {
        assert_eq!(parse_integer(1, "0FFH").unwrap(), 0xff);
        assert_eq!(parse_integer(1, "FFH").unwrap(), 0xff);
    }

    #[test]
    fn hex_prefix_literal_parses() {
        assert_eq!(parse_integer(1, "0X1A").unwrap(), 0x1a);
    }

    #[test]
    fn binary_octal_decimal_suffixes_parse() {
        assert_eq!(parse_integer(1, "1010B").unwrap(), 0b1010);
        assert_eq!(parse_integer(1, "17O").unwrap(), 0o17);
        assert_eq!(parse_integer(1, "123D").unwrap(), 123);
    }

    #[test]
    fn unsuffixed_literal_is_decimal() {
        assert_eq!(parse_integer(1, "42").unwrap(), 42);
        assert_eq!(parse_integer(1, "-5").unwrap(), -5);
    }

    #[test]
    fn malformed_literal_is_an_error() {
        assert!(parse_integer(1, "").is_err());
        assert!(parse_integer(1, "ZZH").is_err());
    }
}
