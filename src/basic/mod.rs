//! The BASIC dialect: tokenizer, structural validator, expression evaluator
//! and the statement interpreter driving the IO emulator.

pub mod eval;
pub mod interpreter;
pub mod program;
pub mod tokenizer;
pub mod validator;

mod api;

pub use interpreter::{Interpreter, RunOutcome};
pub use program::{Program, Statement};

use crate::error::EmuError;

/// Errors produced while loading or running a BASIC program.
///
/// Everything except cancellation is caught at statement-dispatch level,
/// printed as a one-line diagnostic on the text overlay and terminates the
/// run normally.
#[derive(Debug, thiserror::Error)]
pub enum BasicError {
    #[error("line {line}: duplicate label '{label}'")]
    DuplicateLabel { label: String, line: usize },

    #[error("line {line}: undefined label '{label}'")]
    UndefinedLabel { label: String, line: usize },

    #[error("line {line}: {kind} without matching {closer}")]
    UnclosedBlock {
        kind: &'static str,
        closer: &'static str,
        line: usize,
    },

    #[error("line {line}: {message}")]
    MismatchedNext { message: String, line: usize },

    #[error("line {line}: unknown statement '{token}'")]
    UnknownStatement { token: String, line: usize },

    #[error("line {line}: '{name}' is a reserved keyword")]
    ReservedKeyword { name: String, line: usize },

    #[error("line {line}: syntax error: {message}")]
    SyntaxError { message: String, line: usize },

    #[error("line {line}: {message}")]
    Runtime { message: String, line: usize },

    #[error("Out of DATA")]
    DataExhausted,

    #[error(transparent)]
    Emu(#[from] EmuError),
}

impl BasicError {
    /// Cancellation is not an error: the run just ends quietly.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BasicError::Emu(EmuError::Cancelled))
    }
}

/// One value held in the DATA queue.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Int(i64),
    Str(String),
}
