//! error.rs — lexical errors (§4.5).

use crate::token::Pos;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("{pos:?}: unexpected character {ch:?}")]
    UnexpectedChar { ch: char, pos: Pos },

    #[error("{pos:?}: unterminated string literal")]
    UnterminatedString { pos: Pos },

    #[error("{pos:?}: unterminated block comment")]
    UnterminatedComment { pos: Pos },

    #[error("{pos:?}: invalid numeric literal {text:?}")]
    InvalidNumber { text: String, pos: Pos },

    #[error("{pos:?}: invalid escape sequence '\\{ch}'")]
    InvalidEscape { ch: char, pos: Pos },

    #[error("{pos:?}: string interpolation nested past the depth limit ({limit})")]
    InterpolationTooDeep { limit: u32, pos: Pos },

    #[error("{pos:?}: '${{' without matching '}}'")]
    UnterminatedInterpolation { pos: Pos },
}
