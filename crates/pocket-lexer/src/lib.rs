//! pocket-lexer — turns PocketLang source text into a token stream (§4.5).
//!
//! String interpolation (`$name`, `${ expr }`) recurses back into the
//! scanner for the embedded expression between `${` and its matching `}`.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod error;
pub mod lexer;
pub mod token;

pub use error::LexError;
pub use lexer::{Lexer, MAX_INTERPOLATION_DEPTH};
pub use token::{keyword, Pos, Token, TokenKind};
