//! precedence.rs — the Pratt precedence table (§4.6).

use pocket_lexer::TokenKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Precedence {
    Lowest,
    LogicalOr,
    LogicalAnd,
    Equality,
    Test, // `in`
    Comparison,
    BitOr,
    BitXor,
    BitAnd,
    BitShift,
    Range,
    Term,
    Factor,
    Unary,
    Call,
    Subscript,
    Attribute,
    Primary,
}

impl Precedence {
    #[must_use]
    pub fn next(self) -> Self {
        use Precedence::*;
        match self {
            Lowest => LogicalOr,
            LogicalOr => LogicalAnd,
            LogicalAnd => Equality,
            Equality => Test,
            Test => Comparison,
            Comparison => BitOr,
            BitOr => BitXor,
            BitXor => BitAnd,
            BitAnd => BitShift,
            BitShift => Range,
            Range => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Subscript,
            Subscript => Attribute,
            Attribute => Primary,
            Primary => Primary,
        }
    }
}

/// Infix binding power of `kind`, or `None` if it never appears in infix
/// position.
#[must_use]
pub fn infix_precedence(kind: &TokenKind) -> Option<Precedence> {
    use Precedence::*;
    use TokenKind::*;
    Some(match kind {
        Or => LogicalOr,
        And => LogicalAnd,
        EqEq | BangEq => Equality,
        In | Is => Test,
        Lt | LtEq | Gt | GtEq => Comparison,
        Pipe => BitOr,
        Caret => BitXor,
        Amp => BitAnd,
        Shl | Shr => BitShift,
        Range => Precedence::Range,
        Plus | Minus => Term,
        Star | Slash | Percent => Factor,
        LParen => Call,
        LBracket => Subscript,
        Dot => Attribute,
        _ => return None,
    })
}
