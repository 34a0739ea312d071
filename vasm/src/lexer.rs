//! Turns raw assembly text into preprocessed [`Line`]s: comments stripped,
//! the uninitialized-data placeholder `?` normalized to `0`, and the whole
//! line uppercased (assembly is case-insensitive end to end, including the
//! text of DB/DW string literals — see the data model).
//!
//! Two views of each line are kept side by side: `tokens`, a whitespace/
//! comma split used to classify the line (mnemonic, directive, label), and
//! `text`, the comment-stripped original used to split operand lists on
//! top-level commas (so `OFFSET MSG` survives as one operand instead of
//! being torn apart by the same split that separates `DX, OFFSET MSG`).

/// One preprocessed source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    pub number: u32,
    pub tokens: Vec<String>,
    pub text: String,
}

/// Strip a `;` comment, respecting quoted strings, and uppercase the rest.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    for ch in line.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == ';' => break,
            None => {}
        }
        out.push(ch);
    }
    out
}

fn is_placeholder_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '(' | ')')
}

/// Replace every standalone `?` (the uninitialized-data placeholder) with
/// `0`, outside of quoted strings. "Standalone" means delimited by
/// whitespace, a comma, a parenthesis, or the edge of the line, so `?`
/// inside a string literal like `DB "WHAT?"` is left untouched.
fn replace_uninitialized_placeholder(line: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut quote: Option<char> = None;
    for (i, &ch) in chars.iter().enumerate() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == '?' => {
                let before_ok = i == 0 || is_placeholder_boundary(chars[i - 1]);
                let after_ok = i + 1 == chars.len() || is_placeholder_boundary(chars[i + 1]);
                if before_ok && after_ok {
                    out.push('0');
                    continue;
                }
            }
            None => {}
        }
        out.push(ch);
    }
    out
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|tok| !tok.is_empty())
        .map(|tok| tok.to_string())
        .collect()
}

/// Strip comments, drop blank lines, uppercase, and tokenize every line of
/// `source`. Line numbers are 1-based and count *all* physical lines
/// (including ones dropped because they end up blank), so error messages
/// point at the right place in the original file.
pub fn preprocess(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    for (i, raw) in source.lines().enumerate() {
        let number = i as u32 + 1;
        let stripped = strip_comment(raw).to_uppercase();
        let normalized = replace_uninitialized_placeholder(&stripped);
        let text = normalized.trim().to_string();
        if text.is_empty() {
            continue;
        }
        let tokens = tokenize(&text);
        if tokens.is_empty() {
            continue;
        }
        lines.push(Line { number, tokens, text });
    }
    lines
}

/// Split `text` on commas that are not nested inside `[...]` or a quoted
/// string, trimming whitespace from each piece. Empty pieces are dropped,
/// so a trailing comma (or no operands at all) yields an empty `Vec`.
pub fn split_operands(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for ch in text.chars() {
        match quote {
            Some(q) if ch == q => {
                quote = None;
                current.push(ch);
                continue;
            }
            Some(_) => {
                current.push(ch);
                continue;
            }
            None => {}
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                pieces.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current.trim().to_string());
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_are_stripped_but_quoted_semicolons_survive() {
        let lines = preprocess("MOV AL, 5 ; load five\nMSG DB \"A;B$\"");
        assert_eq!(lines[0].text, "MOV AL, 5");
        assert_eq!(lines[1].text, "MSG DB \"A;B$\"");
    }

    #[test]
    fn blank_and_comment_only_lines_are_dropped() {
        let lines = preprocess("  \n; just a comment\nNOP");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].number, 3);
    }

    #[test]
    fn uninitialized_placeholder_becomes_zero() {
        let lines = preprocess("DB ?, 1, ?");
        assert_eq!(lines[0].text, "DB 0, 1, 0");
    }

    #[test]
    fn operand_split_keeps_offset_expressions_together_and_respects_brackets() {
        let operands = split_operands("DX, OFFSET MSG");
        assert_eq!(operands, vec!["DX".to_string(), "OFFSET MSG".to_string()]);

        let operands = split_operands("AX, [BX+SI+4]");
        assert_eq!(operands, vec!["AX".to_string(), "[BX+SI+4]".to_string()]);
    }
}
