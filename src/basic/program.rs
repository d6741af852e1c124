use std::collections::HashMap;

use super::tokenizer::{is_kw, is_string_literal, tokenize, unquote};
use super::{BasicError, DataValue};

/// One executable statement after preprocessing.
#[derive(Debug, Clone)]
pub struct Statement {
    /// Label attached to this statement (uppercased), if any.
    pub label: Option<String>,
    /// 1-based source line the statement came from.
    pub line: usize,
    pub tokens: Vec<String>,
}

/// A preprocessed program: the flat statement list plus the label map.
#[derive(Debug, Default, Clone)]
pub struct Program {
    pub statements: Vec<Statement>,
    /// Uppercased label -> statement index. A label on the last (empty)
    /// position points one past the end and simply ends the run.
    pub labels: HashMap<String, usize>,
}

/// Words that can start a statement; an identifier followed by ':' is only a
/// label when it is not one of these (so `PRINT: PRINT` keeps both PRINTs).
const STATEMENT_WORDS: &[&str] = &[
    "PRINT", "CLS", "END", "REM", "GOTO", "GOSUB", "RETURN", "IF", "THEN", "ELSE", "ELSEIF",
    "FOR", "NEXT", "WHILE", "WEND", "DO", "LOOP", "SELECT", "CASE", "DIM", "DATA", "READ",
    "RESTORE", "INPUT", "LINE", "SCREEN", "COLOR", "LOCATE", "PSET", "GET", "PUT", "BLOAD",
    "BSAVE", "BEEP", "SOUND", "PLAY", "SLEEP", "RANDOMIZE", "LET", "SUB", "FUNCTION",
    "DECLARE", "CALL", "EXIT", "STOP", "VIEW", "WINDOW",
];

impl Program {
    /// Preprocess BASIC source: extract labels, strip comments, split
    /// multi-statement lines on top-level ':' (except lines beginning with
    /// IF, whose THEN-actions keep their colons) and tokenize.
    pub fn parse(source: &str) -> Result<Program, BasicError> {
        let mut program = Program::default();
        let mut pending_label: Option<(String, usize)> = None;

        for (idx, raw) in source.lines().enumerate() {
            let line_no = idx + 1;
            let mut text = raw.trim();
            if text.is_empty() {
                continue;
            }

            if let Some((name, rest)) = take_label(text) {
                text = rest.trim();
                if let Some((prev, prev_line)) = pending_label.take() {
                    // Two labels in a row both target the next statement.
                    program.bind_label(prev, prev_line, program.statements.len())?;
                }
                pending_label = Some((name, line_no));
            }

            if text.is_empty() || is_comment(text) {
                continue;
            }

            for piece in split_statements(text) {
                let tokens = tokenize(&piece);
                if tokens.is_empty() || is_comment(&piece) {
                    continue;
                }
                let stmt_label = match pending_label.take() {
                    Some((name, decl_line)) => {
                        program.bind_label(name.clone(), decl_line, program.statements.len())?;
                        Some(name)
                    }
                    None => None,
                };
                program.statements.push(Statement {
                    label: stmt_label,
                    line: line_no,
                    tokens,
                });
            }
        }

        if let Some((name, decl_line)) = pending_label.take() {
            // Trailing label: a jump to it just ends the program.
            let end = program.statements.len();
            program.bind_label(name, decl_line, end)?;
        }

        Ok(program)
    }

    fn bind_label(&mut self, name: String, line: usize, target: usize) -> Result<(), BasicError> {
        if self.labels.contains_key(&name) {
            return Err(BasicError::DuplicateLabel { label: name, line });
        }
        self.labels.insert(name, target);
        Ok(())
    }

    /// Collect the DATA queue in program order, keeping each value's
    /// statement index so RESTORE-to-label can reposition.
    pub fn collect_data(&self) -> Vec<(usize, DataValue)> {
        let mut data = Vec::new();
        for (idx, stmt) in self.statements.iter().enumerate() {
            if stmt.tokens.first().is_none_or(|t| !is_kw(t, "DATA")) {
                continue;
            }
            let mut group: Vec<&String> = Vec::new();
            let mut flush = |group: &mut Vec<&String>, data: &mut Vec<(usize, DataValue)>| {
                let value = if group.len() == 1 && is_string_literal(group[0]) {
                    DataValue::Str(unquote(group[0]))
                } else {
                    let joined: String = group.iter().map(|t| t.as_str()).collect();
                    match joined.parse::<i64>() {
                        Ok(n) => DataValue::Int(n),
                        Err(_) => DataValue::Str(joined),
                    }
                };
                group.clear();
                data.push((idx, value));
            };
            for token in &stmt.tokens[1..] {
                if token == "," {
                    flush(&mut group, &mut data);
                } else {
                    group.push(token);
                }
            }
            flush(&mut group, &mut data);
        }
        data
    }
}

/// A leading `'` or `REM` comments out the rest of the line.
fn is_comment(text: &str) -> bool {
    let t = text.trim_start();
    t.starts_with('\'')
        || t.get(..3).is_some_and(|head| head.eq_ignore_ascii_case("REM"))
            && t[3..].chars().next().is_none_or(|c| !c.is_ascii_alphanumeric())
}

/// Extract a leading label: a line number, or an identifier terminated by
/// ':' that is not a statement word.
fn take_label(text: &str) -> Option<(String, &str)> {
    let mut chars = text.char_indices();
    let (_, first) = chars.next()?;

    if first.is_ascii_digit() {
        let end = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let rest = &text[end..];
        // Boundary: end of line, whitespace, or an optional ':'.
        if rest.is_empty() {
            return Some((text.to_string(), rest));
        }
        if let Some(stripped) = rest.strip_prefix(':') {
            return Some((text[..end].to_string(), stripped));
        }
        if rest.starts_with(char::is_whitespace) {
            return Some((text[..end].to_string(), rest));
        }
        return None;
    }

    if first.is_ascii_alphabetic() {
        let end = text
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(text.len());
        let name = &text[..end];
        let rest = &text[end..];
        if rest.starts_with(':')
            && !STATEMENT_WORDS
                .iter()
                .any(|w| name.eq_ignore_ascii_case(w))
        {
            return Some((name.to_ascii_uppercase(), &rest[1..]));
        }
    }
    None
}

/// Split a line into statement pieces on top-level ':' outside string
/// literals. Lines beginning with IF stay whole so THEN-actions can use ':'.
/// A `'` outside a string cuts the rest of the line as a trailing comment.
fn split_statements(text: &str) -> Vec<String> {
    let keep_whole = {
        let t = text.trim_start();
        t.get(..2).is_some_and(|head| head.eq_ignore_ascii_case("IF"))
            && t[2..].chars().next().is_none_or(char::is_whitespace)
    };

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for c in text.chars() {
        match c {
            '"' => {
                in_string = !in_string;
                current.push(c);
            }
            '\'' if !in_string => break,
            ':' if !in_string && !keep_whole => {
                pieces.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    pieces.push(current);
    pieces.retain(|p| !p.trim().is_empty());
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_named_labels() {
        let p = Program::parse("10 PRINT \"A\"\nstart:\nGOTO 10").unwrap();
        assert_eq!(p.labels.get("10"), Some(&0));
        assert_eq!(p.labels.get("START"), Some(&1));
        assert_eq!(p.statements.len(), 2);
    }

    #[test]
    fn statement_words_are_not_labels() {
        // `PRINT:` starts a statement, not a label named PRINT.
        let p = Program::parse("PRINT: PRINT").unwrap();
        assert!(p.labels.is_empty());
        assert_eq!(p.statements.len(), 2);
    }

    #[test]
    fn colon_splits_except_if_lines() {
        let p = Program::parse("A = 1 : B = 2\nIF A = 1 THEN B = 3 : C = 4").unwrap();
        assert_eq!(p.statements.len(), 3);
        assert!(is_kw(&p.statements[2].tokens[0], "IF"));
        assert!(p.statements[2].tokens.iter().any(|t| t == ":"));
    }

    #[test]
    fn comments_are_dropped() {
        let p = Program::parse("' full line\nREM another\nPRINT 1 ' trailing\nA = 1 : ' tail")
            .unwrap();
        assert_eq!(p.statements.len(), 2);
        assert_eq!(p.statements[0].tokens, vec!["PRINT", "1"]);
    }

    #[test]
    fn duplicate_label_fails() {
        let err = Program::parse("10 PRINT 1\n10 PRINT 2").unwrap_err();
        assert!(matches!(err, BasicError::DuplicateLabel { .. }));
        assert!(format!("{}", err).contains("10"));
    }

    #[test]
    fn data_values_collected_in_order() {
        let p = Program::parse("DATA 1, -2, \"three, four\"\nDATA five").unwrap();
        let data = p.collect_data();
        assert_eq!(data.len(), 4);
        assert_eq!(data[0].1, DataValue::Int(1));
        assert_eq!(data[1].1, DataValue::Int(-2));
        assert_eq!(data[2].1, DataValue::Str("three, four".into()));
        assert_eq!(data[3].1, DataValue::Str("five".into()));
    }
}
