//! Binding powers for the Pratt-style expression parser.

use crate::ast::{BinOp, LogicalOp};
use rill_lexer::TokenKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Bin(BinOp),
    Logical(LogicalOp),
    Assign,
}

/// Returns `(left binding power, right binding power, op)` for a token
/// that can start an infix expression, or `None` if the token does not.
/// Right-associative operators (assignment, `^`) have a lower right power
/// than left so repeated application nests on the right.
pub fn infix_binding_power(kind: &TokenKind) -> Option<(u8, u8, InfixOp)> {
    use TokenKind::*;
    Some(match kind {
        Assign => (2, 1, InfixOp::Assign),
        OrOr => (3, 4, InfixOp::Logical(LogicalOp::Or)),
        AndAnd => (5, 6, InfixOp::Logical(LogicalOp::And)),
        EqEq => (7, 8, InfixOp::Bin(BinOp::Eq)),
        NotEq => (7, 8, InfixOp::Bin(BinOp::NotEq)),
        Lt => (9, 10, InfixOp::Bin(BinOp::Lt)),
        LtEq => (9, 10, InfixOp::Bin(BinOp::LtEq)),
        Gt => (9, 10, InfixOp::Bin(BinOp::Gt)),
        GtEq => (9, 10, InfixOp::Bin(BinOp::GtEq)),
        Plus => (11, 12, InfixOp::Bin(BinOp::Add)),
        Minus => (11, 12, InfixOp::Bin(BinOp::Sub)),
        Star => (13, 14, InfixOp::Bin(BinOp::Mul)),
        Slash => (13, 14, InfixOp::Bin(BinOp::Div)),
        Percent => (13, 14, InfixOp::Bin(BinOp::Mod)),
        Caret => (16, 15, InfixOp::Bin(BinOp::Pow)),
        _ => return None,
    })
}

pub const PREFIX_BINDING_POWER: u8 = 17;
pub const POSTFIX_BINDING_POWER: u8 = 19;
