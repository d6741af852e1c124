/// Characters that always stand alone as tokens (before merging the
/// two-character comparison operators).
const SPECIALS: &str = ",()-:;=+*/<>%";

/// Sigils that terminate an identifier run and stay attached to it.
const SIGILS: &str = "$%&!#";

/// Split one statement's text into tokens.
///
/// Rules: whitespace separates tokens; string literals are delimited by `"`
/// with `""` as an embedded quote (the token keeps its surrounding quotes);
/// the characters in [`SPECIALS`] form single-character tokens, merged into
/// `<>`, `<=`, `>=` when adjacent; everything else accumulates into
/// identifier/number runs, with a trailing sigil attached to its run. Case
/// is preserved; keyword comparison happens case-insensitively downstream.
pub fn tokenize(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens: Vec<String> = Vec::new();
    let mut run = String::new();
    let mut pos = 0;

    let flush = |run: &mut String, tokens: &mut Vec<String>| {
        if !run.is_empty() {
            tokens.push(std::mem::take(run));
        }
    };

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            flush(&mut run, &mut tokens);
            pos += 1;
            continue;
        }

        if c == '"' {
            flush(&mut run, &mut tokens);
            let mut literal = String::from('"');
            pos += 1;
            while pos < chars.len() {
                let c = chars[pos];
                if c == '"' {
                    if pos + 1 < chars.len() && chars[pos + 1] == '"' {
                        literal.push_str("\"\"");
                        pos += 2;
                        continue;
                    }
                    pos += 1;
                    break;
                }
                literal.push(c);
                pos += 1;
            }
            literal.push('"');
            tokens.push(literal);
            continue;
        }

        if SPECIALS.contains(c) {
            // '%' doubles as the integer sigil when it ends a run.
            if c == '%' && !run.is_empty() && run.starts_with(|c: char| c.is_ascii_alphabetic()) {
                run.push('%');
                flush(&mut run, &mut tokens);
                pos += 1;
                continue;
            }
            flush(&mut run, &mut tokens);
            if c == '<' && pos + 1 < chars.len() && (chars[pos + 1] == '>' || chars[pos + 1] == '=')
            {
                tokens.push(format!("<{}", chars[pos + 1]));
                pos += 2;
                continue;
            }
            if c == '>' && pos + 1 < chars.len() && chars[pos + 1] == '=' {
                tokens.push(">=".to_string());
                pos += 2;
                continue;
            }
            tokens.push(c.to_string());
            pos += 1;
            continue;
        }

        if SIGILS.contains(c) && c != '%' {
            run.push(c);
            flush(&mut run, &mut tokens);
            pos += 1;
            continue;
        }

        run.push(c);
        pos += 1;
    }
    flush(&mut run, &mut tokens);
    tokens
}

/// Case-insensitive keyword comparison.
pub fn is_kw(token: &str, keyword: &str) -> bool {
    token.eq_ignore_ascii_case(keyword)
}

/// True for a bare unsigned number token.
pub fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Unquote a string literal token, resolving embedded `""`.
pub fn unquote(token: &str) -> String {
    let inner = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token);
    inner.replace("\"\"", "\"")
}

/// True for a `"..."` literal token.
pub fn is_string_literal(token: &str) -> bool {
    token.len() >= 2 && token.starts_with('"') && token.ends_with('"')
}
