//! error.rs — compile-time diagnostics (§4.6): a `Diag`/`Diagnostics` pair
//! for collecting multiple errors from a single compile pass.

use pocket_lexer::Pos;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct Diag {
    pub pos: Pos,
    pub message: String,
}

/// Accumulates errors across a whole module compile so the parser can
/// resynchronize and keep reporting instead of bailing at the first one.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub errors: Vec<Diag>,
}

impl Diagnostics {
    pub fn err(&mut self, pos: Pos, message: impl Into<String>) {
        self.errors.push(Diag {
            pos,
            message: message.into(),
        });
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] pocket_lexer::LexError),

    #[error("{} compile error(s):\n{}", .0.len(), render(.0))]
    Diagnostics(Vec<Diag>),
}

fn render(diags: &[Diag]) -> String {
    diags
        .iter()
        .map(|d| format!("{}:{}: {}", d.pos.line, d.pos.offset, d.message))
        .collect::<Vec<_>>()
        .join("\n")
}
