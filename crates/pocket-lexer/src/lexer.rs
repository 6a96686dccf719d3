//! lexer.rs — the scanner (§4.5).
//!
//! Scans one [`Token`] at a time from a UTF-8 source buffer. `\n` is itself a
//! token (`Line`) since PocketLang uses newlines as statement terminators;
//! `#` starts a line comment.
//!
//! String interpolation (`"a $name b"`, `"a ${expr} b"`) is lexed in place:
//! a string literal is emitted as a run of [`TokenKind::StringInterp`]
//! pieces followed by a final [`TokenKind::Str`] piece, with ordinary
//! tokens (a bare `Name`, or the full token stream of a `${ ... }` block)
//! interleaved between pieces. Nesting is tracked per `${` frame so that a
//! brace belonging to a nested map/block literal inside the interpolated
//! expression isn't confused with the one that closes the interpolation.

use crate::error::LexError;
use crate::token::{keyword, Pos, Token, TokenKind};

/// Maximum nesting depth for `${ ... }` interpolation blocks (§4.5).
pub const MAX_INTERPOLATION_DEPTH: u32 = 8;

struct InterpFrame {
    quote: u8,
    /// Brace nesting *within* this `${ ... }` block. `0` means the next
    /// unmatched `}` closes the interpolation itself.
    brace_depth: i32,
}

/// A continuation the scanner resumes on the next call, used to interleave
/// string-literal pieces with the ordinary tokens of an interpolated name
/// or expression.
enum Cont {
    /// Resume scanning string-literal text for `quote` (used both right
    /// after a `$name` short form, and right after an `${ ... }` block's
    /// closing brace).
    ResumeString { quote: u8 },
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    interp_stack: Vec<InterpFrame>,
    pending: Option<Cont>,
    /// A `Name` token already carved out of a `$name` short-form trigger,
    /// queued to be returned before resuming the string literal.
    queued_name: Option<String>,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            interp_stack: Vec::new(),
            pending: None,
            queued_name: None,
        }
    }

    #[must_use]
    fn here(&self) -> Pos {
        Pos {
            line: self.line,
            offset: self.pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.src.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn tok(&self, kind: TokenKind, pos: Pos) -> Token {
        Token { kind, pos }
    }

    /// Drains every token up to and including `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::new();
        loop {
            let t = self.next_token()?;
            let is_eof = matches!(t.kind, TokenKind::Eof);
            out.push(t);
            if is_eof {
                return Ok(out);
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        if let Some(name) = self.queued_name.take() {
            let pos = self.here();
            // After the short-form `$name`, the next call resumes the
            // literal's remaining raw text.
            if let Some(frame) = self.interp_stack.last() {
                self.pending = Some(Cont::ResumeString { quote: frame.quote });
                self.interp_stack.pop();
            }
            return Ok(self.tok(TokenKind::Name(name), pos));
        }
        if let Some(Cont::ResumeString { quote }) = self.pending.take() {
            let pos = self.here();
            return self.scan_string_piece(quote, pos);
        }

        self.skip_trivia();

        let pos = self.here();
        let Some(c) = self.peek() else {
            if !self.interp_stack.is_empty() {
                return Err(LexError::UnterminatedInterpolation { pos });
            }
            return Ok(self.tok(TokenKind::Eof, pos));
        };

        if c == b'\n' {
            self.bump();
            return Ok(self.tok(TokenKind::Line, pos));
        }
        if c.is_ascii_digit() {
            return self.scan_number(pos);
        }
        if c == b'_' || c.is_ascii_alphabetic() || c >= 0x80 {
            return self.scan_ident(pos);
        }
        if c == b'"' || c == b'\'' {
            self.bump();
            return self.scan_string_piece(c, pos);
        }

        self.scan_operator(pos)
    }

    /// Skips spaces/tabs/carriage-returns and `# ...` line comments. Does
    /// *not* skip `\n` — it's a significant token.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r') => {
                    self.bump();
                }
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return,
            }
        }
    }

    fn scan_ident(&mut self, pos: Pos) -> Result<Token, LexError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'_' || c.is_ascii_alphanumeric() || c >= 0x80 {
                self.bump();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .expect("ascii/utf8-continuation scan keeps valid boundaries")
            .to_string();
        let kind = keyword(&text).unwrap_or(TokenKind::Name(text));
        Ok(self.tok(kind, pos))
    }

    fn scan_number(&mut self, pos: Pos) -> Result<Token, LexError> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.bump();
            self.bump();
            let digit_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.bump();
            }
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
            if self.pos == digit_start {
                return Err(LexError::InvalidNumber {
                    text: text.to_string(),
                    pos,
                });
            }
            let digits = std::str::from_utf8(&self.src[digit_start..self.pos]).unwrap();
            let value = u64::from_str_radix(digits, 16).map_err(|_| LexError::InvalidNumber {
                text: text.to_string(),
                pos,
            })?;
            return Ok(self.tok(TokenKind::Number(value as f64), pos));
        }
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'b' | b'B')) {
            self.bump();
            self.bump();
            let digit_start = self.pos;
            while matches!(self.peek(), Some(b'0' | b'1')) {
                self.bump();
            }
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
            if self.pos == digit_start {
                return Err(LexError::InvalidNumber {
                    text: text.to_string(),
                    pos,
                });
            }
            let digits = std::str::from_utf8(&self.src[digit_start..self.pos]).unwrap();
            let value = u64::from_str_radix(digits, 2).map_err(|_| LexError::InvalidNumber {
                text: text.to_string(),
                pos,
            })?;
            return Ok(self.tok(TokenKind::Number(value as f64), pos));
        }

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let save = self.pos;
            self.bump();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.bump();
            }
            if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                self.pos = save; // not actually an exponent, e.g. `3.e` alone
            }
        }

        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let value = text.parse::<f64>().map_err(|_| LexError::InvalidNumber {
            text: text.to_string(),
            pos,
        })?;
        Ok(self.tok(TokenKind::Number(value), pos))
    }

    /// Scans raw string-literal text (after the opening quote, or resumed
    /// mid-literal) until the closing `quote`, a `$name` short form, or a
    /// `${` block trigger.
    fn scan_string_piece(&mut self, quote: u8, pos: Pos) -> Result<Token, LexError> {
        let mut buf = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(LexError::UnterminatedString { pos });
            };
            if c == quote {
                self.bump();
                return Ok(self.tok(TokenKind::Str(buf), pos));
            }
            if c == b'\\' {
                self.bump();
                let esc_pos = self.here();
                let Some(e) = self.bump() else {
                    return Err(LexError::UnterminatedString { pos });
                };
                buf.push(match e {
                    b'n' => '\n',
                    b't' => '\t',
                    b'r' => '\r',
                    b'0' => '\0',
                    b'\\' => '\\',
                    b'"' => '"',
                    b'\'' => '\'',
                    b'$' => '$',
                    other => {
                        return Err(LexError::InvalidEscape {
                            ch: other as char,
                            pos: esc_pos,
                        })
                    }
                });
                continue;
            }
            if c == b'$' && matches!(self.peek_at(1), Some(b'{')) {
                self.bump(); // $
                self.bump(); // {
                if self.interp_stack.len() as u32 >= MAX_INTERPOLATION_DEPTH {
                    return Err(LexError::InterpolationTooDeep {
                        limit: MAX_INTERPOLATION_DEPTH,
                        pos,
                    });
                }
                self.interp_stack.push(InterpFrame {
                    quote,
                    brace_depth: 0,
                });
                return Ok(self.tok(TokenKind::StringInterp(buf), pos));
            }
            if c == b'$' {
                let ahead = self.peek_at(1);
                let is_name_start =
                    matches!(ahead, Some(b) if b == b'_' || b.is_ascii_alphabetic() || b >= 0x80);
                if is_name_start {
                    self.bump(); // $
                    let start = self.pos;
                    while let Some(b) = self.peek() {
                        if b == b'_' || b.is_ascii_alphanumeric() || b >= 0x80 {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    let name = std::str::from_utf8(&self.src[start..self.pos])
                        .unwrap()
                        .to_string();
                    self.interp_stack.push(InterpFrame {
                        quote,
                        brace_depth: -1, // sentinel: no `}` to wait for
                    });
                    self.queued_name = Some(name);
                    return Ok(self.tok(TokenKind::StringInterp(buf), pos));
                }
            }
            buf.push(c as char);
            self.bump();
        }
    }

    fn scan_operator(&mut self, pos: Pos) -> Result<Token, LexError> {
        use TokenKind::*;
        let c = self.bump().expect("checked by caller");
        let kind = match c {
            b'(' => LParen,
            b')' => RParen,
            b'[' => LBracket,
            b']' => RBracket,
            b'{' => {
                if let Some(frame) = self.interp_stack.last_mut() {
                    if frame.brace_depth >= 0 {
                        frame.brace_depth += 1;
                    }
                }
                LBrace
            }
            b'}' => {
                if let Some(frame) = self.interp_stack.last() {
                    if frame.brace_depth > 0 {
                        self.interp_stack.last_mut().unwrap().brace_depth -= 1;
                        RBrace
                    } else {
                        let frame = self.interp_stack.pop().unwrap();
                        return self.scan_string_piece(frame.quote, pos);
                    }
                } else {
                    RBrace
                }
            }
            b',' => Comma,
            b':' => Colon,
            b';' => Semicolon,
            b'.' => {
                if self.peek() == Some(b'.') {
                    self.bump();
                    Range
                } else {
                    Dot
                }
            }
            b'+' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    PlusEq
                } else {
                    Plus
                }
            }
            b'-' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    MinusEq
                } else if self.peek() == Some(b'>') {
                    self.bump();
                    Arrow
                } else {
                    Minus
                }
            }
            b'*' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    StarEq
                } else {
                    Star
                }
            }
            b'/' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    SlashEq
                } else {
                    Slash
                }
            }
            b'%' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    PercentEq
                } else {
                    Percent
                }
            }
            b'^' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    CaretEq
                } else {
                    Caret
                }
            }
            b'&' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    AmpEq
                } else {
                    Amp
                }
            }
            b'|' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    PipeEq
                } else {
                    Pipe
                }
            }
            b'~' => Tilde,
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    BangEq
                } else {
                    Bang
                }
            }
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    EqEq
                } else {
                    Eq
                }
            }
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    LtEq
                } else if self.peek() == Some(b'<') {
                    self.bump();
                    if self.peek() == Some(b'=') {
                        self.bump();
                        ShlEq
                    } else {
                        Shl
                    }
                } else {
                    Lt
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    GtEq
                } else if self.peek() == Some(b'>') {
                    self.bump();
                    if self.peek() == Some(b'=') {
                        self.bump();
                        ShrEq
                    } else {
                        Shr
                    }
                } else {
                    Gt
                }
            }
            other => {
                return Err(LexError::UnexpectedChar {
                    ch: other as char,
                    pos,
                })
            }
        };
        Ok(self.tok(kind, pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("if x then end"),
            vec![If, Name("x".into()), Then, End, Eof]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(kinds("42"), vec![Number(42.0), Eof]);
        assert_eq!(kinds("3.14"), vec![Number(3.14), Eof]);
        assert_eq!(kinds("0x1F"), vec![Number(31.0), Eof]);
        assert_eq!(kinds("0b101"), vec![Number(5.0), Eof]);
        assert_eq!(kinds("1e3"), vec![Number(1000.0), Eof]);
        assert_eq!(kinds("2.5e-1"), vec![Number(0.25), Eof]);
    }

    #[test]
    fn compound_assign_and_ranges() {
        assert_eq!(kinds("x += 1"), vec![Name("x".into()), PlusEq, Number(1.0), Eof]);
        assert_eq!(kinds("0..10"), vec![Number(0.0), Range, Number(10.0), Eof]);
        assert_eq!(kinds("x <<= 2"), vec![Name("x".into()), ShlEq, Number(2.0), Eof]);
    }

    #[test]
    fn plain_string_has_no_interp_piece() {
        assert_eq!(kinds(r#""hello""#), vec![Str("hello".into()), Eof]);
    }

    #[test]
    fn dollar_name_short_form() {
        // "a $name b" -> StringInterp("a "), Name("name"), Str(" b")
        assert_eq!(
            kinds(r#""a $name b""#),
            vec![
                StringInterp("a ".into()),
                Name("name".into()),
                Str(" b".into()),
                Eof
            ]
        );
    }

    #[test]
    fn dollar_brace_expr_form() {
        // "a ${1 + 2} b" -> StringInterp("a "), Number, Plus, Number, Str(" b")
        assert_eq!(
            kinds(r#""a ${1 + 2} b""#),
            vec![
                StringInterp("a ".into()),
                Number(1.0),
                Plus,
                Number(2.0),
                Str(" b".into()),
                Eof
            ]
        );
    }

    #[test]
    fn nested_brace_inside_interpolation_is_not_confused_with_close() {
        // map literal `{1: 2}` nested inside `${ ... }`
        assert_eq!(
            kinds(r#""v=${ {1: 2}.len() } done""#),
            vec![
                StringInterp("v=".into()),
                LBrace,
                Number(1.0),
                Colon,
                Number(2.0),
                RBrace,
                Dot,
                Name("len".into()),
                LParen,
                RParen,
                Str(" done".into()),
                Eof
            ]
        );
    }

    #[test]
    fn recursive_interpolation_two_levels() {
        assert_eq!(
            kinds(r#""${"x${1}y"}""#),
            vec![
                StringInterp("".into()),
                StringInterp("x".into()),
                Number(1.0),
                Str("y".into()),
                Str("".into()),
                Eof
            ]
        );
    }

    #[test]
    fn interpolation_past_depth_limit_errors() {
        let mut src = String::from('"');
        for _ in 0..MAX_INTERPOLATION_DEPTH + 1 {
            src.push_str("${\"");
        }
        for _ in 0..MAX_INTERPOLATION_DEPTH + 1 {
            src.push_str("\"}");
        }
        src.push('"');
        let err = Lexer::new(&src).tokenize().unwrap_err();
        assert!(matches!(err, LexError::InterpolationTooDeep { .. }));
    }

    #[test]
    fn comment_and_line_tokens() {
        assert_eq!(
            kinds("x # comment\ny"),
            vec![Name("x".into()), Line, Name("y".into()), Eof]
        );
    }

    #[test]
    fn unterminated_string_errors() {
        let err = Lexer::new("\"abc").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString { .. }));
    }

    /// Space-separated atoms that lex unambiguously regardless of neighbor,
    /// for the round-trip property below.
    fn vocabulary() -> Vec<(&'static str, TokenKind)> {
        vec![
            ("0", Number(0.0)),
            ("1", Number(1.0)),
            ("42", Number(42.0)),
            ("x", Name("x".into())),
            ("count", Name("count".into())),
            ("+", Plus),
            ("-", Minus),
            ("*", Star),
            ("(", LParen),
            (")", RParen),
            ("==", EqEq),
            ("if", If),
            ("end", End),
            ("return", Return),
        ]
    }

    proptest::proptest! {
        #[test]
        fn reprinted_source_lexes_to_the_same_tokens(
            picks in proptest::collection::vec(0usize..14, 0..40)
        ) {
            let vocab = vocabulary();
            let source = picks
                .iter()
                .map(|&i| vocab[i].0)
                .collect::<Vec<_>>()
                .join(" ");
            let mut expected: Vec<TokenKind> = picks.iter().map(|&i| vocab[i].1.clone()).collect();
            expected.push(Eof);
            proptest::prop_assert_eq!(kinds(&source), expected);
        }
    }
}
