//! Expression parsing with binding powers.
//!
//! Precedence, loosest to tightest: `||`, `&&`, comparison, `+ -`,
//! `* / %`, unary `!`, postfix `|modifier`. Comparison is non-associative,
//! everything else binary is left-associative.

use super::errors::{ParseError, ParseErrorKind, ParseResult};
use super::Parser;
use crate::ast::{BinaryOp, Expression, Filter, Literal, ModifierCall, Variable};
use crate::lexer::TokenKind;

/// Binding power of a binary operator.
///
/// The `(left, right)` pair encodes associativity: for left-associative
/// operators the right power is one above the left, so an operator does not
/// extend its own right-hand side.
#[derive(Debug, Clone, Copy)]
pub(super) struct BindingPower {
    pub left: u8,
    pub right: u8,
}

impl BindingPower {
    const fn left_assoc(power: u8) -> Self {
        Self {
            left: power,
            right: power + 1,
        }
    }
}

/// Precedence table, loosest binding first.
mod prec {
    use super::BindingPower;

    pub const OR: BindingPower = BindingPower::left_assoc(2);
    pub const AND: BindingPower = BindingPower::left_assoc(4);
    /// Chains of comparisons are rejected after the fact.
    pub const COMPARISON: BindingPower = BindingPower::left_assoc(6);
    pub const ADDITIVE: BindingPower = BindingPower::left_assoc(8);
    pub const MULTIPLICATIVE: BindingPower = BindingPower::left_assoc(10);
}

/// Maps a token to its binary operator and binding power.
fn binary_op(kind: &TokenKind) -> Option<(BinaryOp, BindingPower)> {
    let entry = match kind {
        TokenKind::OrOr => (BinaryOp::Or, prec::OR),
        TokenKind::AndAnd => (BinaryOp::And, prec::AND),
        TokenKind::EqEq => (BinaryOp::Equals, prec::COMPARISON),
        TokenKind::NotEq => (BinaryOp::NotEquals, prec::COMPARISON),
        TokenKind::Gt => (BinaryOp::Greater, prec::COMPARISON),
        TokenKind::GtEq => (BinaryOp::GreaterEquals, prec::COMPARISON),
        TokenKind::Lt => (BinaryOp::Lesser, prec::COMPARISON),
        TokenKind::LtEq => (BinaryOp::LesserEquals, prec::COMPARISON),
        TokenKind::Plus => (BinaryOp::Plus, prec::ADDITIVE),
        TokenKind::Minus => (BinaryOp::Minus, prec::ADDITIVE),
        TokenKind::Star => (BinaryOp::Multiply, prec::MULTIPLICATIVE),
        TokenKind::Slash => (BinaryOp::Divide, prec::MULTIPLICATIVE),
        TokenKind::Percent => (BinaryOp::Modulo, prec::MULTIPLICATIVE),
        _ => return None,
    };
    Some(entry)
}

impl Parser {
    /// Parses a full expression.
    pub(super) fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_binary(0)
    }

    /// Precedence-climbing loop over binary operators.
    fn parse_binary(&mut self, min_bp: u8) -> ParseResult<Expression> {
        let mut lhs = self.parse_prefix()?;

        while let Some((op, bp)) = self.current_kind().and_then(binary_op) {
            if bp.left < min_bp {
                break;
            }
            self.bump();
            let rhs = self.parse_binary(bp.right)?;
            lhs = Expression::Binary {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
            };

            // a < b < c has no meaning in this grammar
            if op.is_comparison() {
                if let Some((next, _)) = self.current_kind().and_then(binary_op) {
                    if next.is_comparison() {
                        return Err(ParseError::new(
                            ParseErrorKind::NonAssociativeComparison,
                            self.current_start(),
                        ));
                    }
                }
            }
        }

        Ok(lhs)
    }

    /// Parses unary prefixes and hands off to the atom.
    fn parse_prefix(&mut self) -> ParseResult<Expression> {
        if self.eat(&TokenKind::Not) {
            let inner = self.parse_prefix()?;
            return Ok(Expression::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    /// Parses a literal, variable or parenthesized expression, then any
    /// postfix modifier pipe.
    fn parse_atom(&mut self) -> ParseResult<Expression> {
        let position = self.current_start();
        let Some(token) = self.current() else {
            return Err(ParseError::new(ParseErrorKind::ExpectedExpression, position));
        };

        let base = match &token.kind {
            TokenKind::Integer(v) => {
                let v = *v;
                self.bump();
                Expression::Literal(Literal::Integer(v))
            }
            TokenKind::Double(v) => {
                let v = *v;
                self.bump();
                Expression::Literal(Literal::Double(v))
            }
            TokenKind::Str => {
                let text = token.text.clone();
                self.bump();
                Expression::Literal(Literal::String(text))
            }
            TokenKind::True => {
                self.bump();
                Expression::Literal(Literal::Boolean(true))
            }
            TokenKind::False => {
                self.bump();
                Expression::Literal(Literal::Boolean(false))
            }
            TokenKind::Null => {
                self.bump();
                Expression::Literal(Literal::Null)
            }
            TokenKind::Dollar => {
                self.bump();
                Expression::Variable(self.parse_variable()?)
            }
            TokenKind::OpenParen => {
                self.bump();
                let inner = self.parse_binary(0)?;
                self.expect(&TokenKind::CloseParen)?;
                inner
            }
            other => return Err(ParseError::unexpected(position, other)),
        };

        self.parse_pipes(base)
    }

    /// Parses a variable path after the `$` was consumed.
    pub(super) fn parse_variable(&mut self) -> ParseResult<Variable> {
        let name = self.expect_ident()?;
        let mut var = Variable::Global { name };

        loop {
            if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident()?;
                var = Variable::Member {
                    parent: Box::new(var),
                    name,
                };
            } else if self.eat(&TokenKind::OpenBracket) {
                let index = self.parse_binary(0)?;
                self.expect(&TokenKind::CloseBracket)?;
                var = Variable::MemberAt {
                    parent: Box::new(var),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }

        Ok(var)
    }

    /// Parses a postfix modifier chain, if present.
    fn parse_pipes(&mut self, base: Expression) -> ParseResult<Expression> {
        let mut chain = Vec::new();
        let mut raw_output = false;

        while self.eat(&TokenKind::Pipe) {
            let name = self.expect_ident()?;
            let mut args = Vec::new();
            if self.eat(&TokenKind::Colon) {
                args.push(self.parse_modifier_arg()?);
                while self.eat(&TokenKind::Comma) {
                    args.push(self.parse_modifier_arg()?);
                }
            }

            // `raw` is not a transformation, it turns output escaping off
            if name == "raw" && args.is_empty() {
                raw_output = true;
                continue;
            }
            raw_output = false;
            chain.push(ModifierCall::new(name, args));
        }

        if chain.is_empty() && !raw_output {
            return Ok(base);
        }
        Ok(Expression::Filter(Filter {
            base: Box::new(base),
            chain,
            raw_output,
        }))
    }

    /// Parses a single literal modifier argument.
    fn parse_modifier_arg(&mut self) -> ParseResult<Literal> {
        let position = self.current_start();
        let Some(token) = self.current() else {
            return Err(ParseError::new(ParseErrorKind::UnexpectedEof, position));
        };
        let literal = match &token.kind {
            TokenKind::Integer(v) => Literal::Integer(*v),
            TokenKind::Double(v) => Literal::Double(*v),
            TokenKind::Str => Literal::String(token.text.clone()),
            TokenKind::True => Literal::Boolean(true),
            TokenKind::False => Literal::Boolean(false),
            TokenKind::Null => Literal::Null,
            _ => {
                return Err(ParseError::new(
                    ParseErrorKind::InvalidModifierArgument,
                    position,
                ))
            }
        };
        self.bump();
        Ok(literal)
    }
}
