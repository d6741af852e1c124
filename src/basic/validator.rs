use super::BasicError;
use super::program::Program;
use super::tokenizer::{is_kw, is_numeric};

/// An open structural block while scanning the statement list.
#[derive(Debug)]
enum Block {
    For { var: String, line: usize },
    While { line: usize },
    Do { line: usize },
    If { line: usize },
    Select { line: usize },
    Sub { line: usize },
    Function { line: usize },
}

impl Block {
    fn kind(&self) -> &'static str {
        match self {
            Block::For { .. } => "FOR",
            Block::While { .. } => "WHILE",
            Block::Do { .. } => "DO",
            Block::If { .. } => "IF",
            Block::Select { .. } => "SELECT CASE",
            Block::Sub { .. } => "SUB",
            Block::Function { .. } => "FUNCTION",
        }
    }

    fn closer(&self) -> &'static str {
        match self {
            Block::For { .. } => "NEXT",
            Block::While { .. } => "WEND",
            Block::Do { .. } => "LOOP",
            Block::If { .. } => "END IF",
            Block::Select { .. } => "END SELECT",
            Block::Sub { .. } => "END SUB",
            Block::Function { .. } => "END FUNCTION",
        }
    }

    fn line(&self) -> usize {
        match self {
            Block::For { line, .. }
            | Block::While { line }
            | Block::Do { line }
            | Block::If { line }
            | Block::Select { line }
            | Block::Sub { line }
            | Block::Function { line } => *line,
        }
    }
}

/// Check the structural health of a preprocessed program: balanced blocks,
/// NEXT variables matching their FOR, and GOTO/GOSUB targets that exist
/// (purely numeric targets are deferred to runtime).
pub fn validate(program: &Program) -> Result<(), BasicError> {
    let mut stack: Vec<Block> = Vec::new();

    for stmt in &program.statements {
        let line = stmt.line;
        let t = &stmt.tokens;
        let Some(head) = t.first() else { continue };

        if is_kw(head, "FOR") {
            let var = t.get(1).cloned().ok_or_else(|| BasicError::SyntaxError {
                message: "FOR without a loop variable".into(),
                line,
            })?;
            stack.push(Block::For { var, line });
        } else if is_kw(head, "NEXT") {
            match stack.pop() {
                Some(Block::For { var, .. }) => {
                    if let Some(named) = t.get(1) {
                        if !named.eq_ignore_ascii_case(&var) {
                            return Err(BasicError::MismatchedNext {
                                message: format!(
                                    "NEXT {} does not match FOR {}",
                                    named, var
                                ),
                                line,
                            });
                        }
                    }
                }
                Some(open) => {
                    return Err(BasicError::MismatchedNext {
                        message: format!("NEXT closes an open {} block", open.kind()),
                        line,
                    });
                }
                None => {
                    return Err(BasicError::MismatchedNext {
                        message: "NEXT without FOR".into(),
                        line,
                    });
                }
            }
        } else if is_kw(head, "WHILE") {
            stack.push(Block::While { line });
        } else if is_kw(head, "WEND") {
            match stack.pop() {
                Some(Block::While { .. }) => {}
                _ => {
                    return Err(BasicError::SyntaxError {
                        message: "WEND without WHILE".into(),
                        line,
                    });
                }
            }
        } else if is_kw(head, "DO") {
            stack.push(Block::Do { line });
        } else if is_kw(head, "LOOP") {
            match stack.pop() {
                Some(Block::Do { .. }) => {}
                _ => {
                    return Err(BasicError::SyntaxError {
                        message: "LOOP without DO".into(),
                        line,
                    });
                }
            }
        } else if is_kw(head, "IF") {
            // Only the block form (statement ending in THEN) opens a block.
            if t.last().is_some_and(|last| is_kw(last, "THEN")) {
                stack.push(Block::If { line });
            }
        } else if is_kw(head, "ELSEIF") || is_kw(head, "ELSE") {
            if !matches!(stack.last(), Some(Block::If { .. })) {
                return Err(BasicError::SyntaxError {
                    message: format!("{} outside an IF block", head.to_ascii_uppercase()),
                    line,
                });
            }
            if is_kw(head, "ELSEIF") && !t.last().is_some_and(|last| is_kw(last, "THEN")) {
                return Err(BasicError::SyntaxError {
                    message: "ELSEIF without THEN".into(),
                    line,
                });
            }
        } else if is_kw(head, "SELECT") {
            if !t.get(1).is_some_and(|n| is_kw(n, "CASE")) {
                return Err(BasicError::SyntaxError {
                    message: "SELECT without CASE".into(),
                    line,
                });
            }
            stack.push(Block::Select { line });
        } else if is_kw(head, "CASE") {
            if !matches!(stack.last(), Some(Block::Select { .. })) {
                return Err(BasicError::SyntaxError {
                    message: "CASE outside a SELECT CASE block".into(),
                    line,
                });
            }
        } else if is_kw(head, "SUB") {
            stack.push(Block::Sub { line });
        } else if is_kw(head, "FUNCTION") {
            stack.push(Block::Function { line });
        } else if is_kw(head, "END") {
            if let Some(what) = t.get(1) {
                let matched = match stack.last() {
                    Some(Block::If { .. }) if is_kw(what, "IF") => true,
                    Some(Block::Select { .. }) if is_kw(what, "SELECT") => true,
                    Some(Block::Sub { .. }) if is_kw(what, "SUB") => true,
                    Some(Block::Function { .. }) if is_kw(what, "FUNCTION") => true,
                    _ => false,
                };
                if matched {
                    stack.pop();
                } else {
                    return Err(BasicError::SyntaxError {
                        message: format!("END {} closes nothing", what.to_ascii_uppercase()),
                        line,
                    });
                }
            }
        } else if is_kw(head, "EXIT") {
            let target = t.get(1).cloned().unwrap_or_default();
            let ok = if is_kw(&target, "FOR") {
                stack.iter().any(|b| matches!(b, Block::For { .. }))
            } else if is_kw(&target, "DO") {
                stack.iter().any(|b| matches!(b, Block::Do { .. }))
            } else if is_kw(&target, "SUB") {
                stack.iter().any(|b| matches!(b, Block::Sub { .. }))
            } else if is_kw(&target, "FUNCTION") {
                stack.iter().any(|b| matches!(b, Block::Function { .. }))
            } else {
                false
            };
            if !ok {
                return Err(BasicError::SyntaxError {
                    message: format!("EXIT {} outside such a block", target.to_ascii_uppercase()),
                    line,
                });
            }
        } else if is_kw(head, "GOTO") || is_kw(head, "GOSUB") || is_kw(head, "RESTORE") {
            if let Some(target) = t.get(1) {
                // Line numbers are resolved at runtime; named labels must
                // exist now.
                if !is_numeric(target)
                    && !program.labels.contains_key(&target.to_ascii_uppercase())
                {
                    return Err(BasicError::UndefinedLabel {
                        label: target.clone(),
                        line,
                    });
                }
            } else if !is_kw(head, "RESTORE") {
                return Err(BasicError::SyntaxError {
                    message: format!("{} without a target", head.to_ascii_uppercase()),
                    line,
                });
            }
        }
    }

    if let Some(open) = stack.pop() {
        return Err(BasicError::UnclosedBlock {
            kind: open.kind(),
            closer: open.closer(),
            line: open.line(),
        });
    }
    Ok(())
}
