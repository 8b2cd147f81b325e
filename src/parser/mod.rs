//! Parser for the template language.
//!
//! Consumes the token stream and produces the typed [`SyntaxTree`]. Raw
//! text becomes `Raw` statements; directives become output, `if`,
//! `foreach` and assignment statements. `{elseif ...}` chains are desugared
//! into nested `if` statements in the else arm.

mod errors;
mod expr;

pub use errors::{ParseError, ParseErrorKind, ParseResult};

use crate::ast::{Expression, Statement, Statements, SyntaxTree, Variable};
use crate::error::CompileError;
use crate::lexer::{Lexer, Token, TokenKind};

/// Parses template source into a syntax tree.
pub fn parse(input: &str) -> Result<SyntaxTree, CompileError> {
    let tokens = Lexer::new(input).tokenize().map_err(CompileError::from)?;
    log::trace!("lexed {} tokens", tokens.len());

    let mut parser = Parser::new(tokens);
    let (statements, closer) = parser.parse_statements(&[]).map_err(CompileError::from)?;
    debug_assert!(closer.is_none(), "no terminators requested at top level");
    log::trace!("parsed {} top-level statements", statements.len());

    Ok(SyntaxTree::new(statements))
}

/// Block terminators a statement list can stop at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closer {
    /// `{/if}`
    EndIf,
    /// `{else}`
    Else,
    /// `{elseif`, with the condition still in the token stream.
    ElseIf,
    /// `{/foreach}`
    EndForeach,
    /// `{foreachelse}`
    ForeachElse,
}

/// The parser over a lexed token stream.
pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    // =========================================================================
    // Token navigation
    // =========================================================================

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn current_kind(&self) -> Option<&TokenKind> {
        self.current().map(|t| &t.kind)
    }

    /// Byte position of the current token, or end of input.
    fn current_start(&self) -> usize {
        match self.current() {
            Some(t) => t.start,
            None => self.tokens.last().map(|t| t.start + t.text.len()).unwrap_or(0),
        }
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.current_kind() == Some(kind)
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> ParseResult<()> {
        if self.eat(kind) {
            return Ok(());
        }
        match self.current() {
            Some(t) => Err(ParseError::unexpected(t.start, &t.kind)),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof,
                self.current_start(),
            )),
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match self.current() {
            Some(t) if t.kind == TokenKind::Ident => {
                let name = t.text.clone();
                self.bump();
                Ok(name)
            }
            Some(t) => Err(ParseError::new(ParseErrorKind::ExpectedIdentifier, t.start)),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof,
                self.current_start(),
            )),
        }
    }

    fn expect_close_brace(&mut self) -> ParseResult<()> {
        if self.eat(&TokenKind::CloseBrace) {
            return Ok(());
        }
        Err(ParseError::new(
            ParseErrorKind::ExpectedCloseBrace,
            self.current_start(),
        ))
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Parses statements until end of input or one of the given closers.
    /// Returns the statements and the closer that ended them, if any.
    fn parse_statements(
        &mut self,
        terminators: &[Closer],
    ) -> ParseResult<(Statements, Option<Closer>)> {
        let mut statements = Vec::new();

        while let Some(token) = self.current() {
            match &token.kind {
                TokenKind::Raw => {
                    statements.push(Statement::Raw(token.text.clone()));
                    self.bump();
                }
                TokenKind::OpenBrace => {
                    if let Some(closer) = self.try_closer(terminators)? {
                        return Ok((Statements(statements), Some(closer)));
                    }
                    statements.push(self.parse_directive()?);
                }
                _ => {
                    let err = ParseError::unexpected(token.start, &token.kind);
                    return Err(err);
                }
            }
        }

        if terminators.is_empty() {
            Ok((Statements(statements), None))
        } else {
            Err(ParseError::new(
                ParseErrorKind::UnexpectedEof,
                self.current_start(),
            ))
        }
    }

    /// Checks whether the directive at the current `{` is one of the
    /// requested block terminators and consumes it if so. A block end that
    /// nobody asked for is an error.
    fn try_closer(&mut self, terminators: &[Closer]) -> ParseResult<Option<Closer>> {
        let brace_pos = self.current_start();
        let next = self.tokens.get(self.pos + 1).map(|t| &t.kind);
        let after = self.tokens.get(self.pos + 2).map(|t| &t.kind);

        let closer = match (next, after) {
            (Some(TokenKind::Slash), Some(TokenKind::If)) => Some((Closer::EndIf, 3, true)),
            (Some(TokenKind::Slash), Some(TokenKind::Foreach)) => {
                Some((Closer::EndForeach, 3, true))
            }
            (Some(TokenKind::Else), _) => Some((Closer::Else, 2, true)),
            (Some(TokenKind::ElseIf), _) => Some((Closer::ElseIf, 2, false)),
            (Some(TokenKind::ForeachElse), _) => Some((Closer::ForeachElse, 2, true)),
            _ => None,
        };

        let Some((closer, tokens_to_eat, expect_brace)) = closer else {
            return Ok(None);
        };
        if !terminators.contains(&closer) {
            return Err(ParseError::new(ParseErrorKind::UnmatchedBlockEnd, brace_pos));
        }
        for _ in 0..tokens_to_eat {
            self.bump();
        }
        if expect_brace {
            self.expect_close_brace()?;
        }
        Ok(Some(closer))
    }

    /// Parses one `{...}` directive into a statement. The `{` is current.
    fn parse_directive(&mut self) -> ParseResult<Statement> {
        self.bump(); // {

        match self.current_kind() {
            Some(TokenKind::If) => {
                self.bump();
                self.parse_if_tail()
            }
            Some(TokenKind::Foreach) => {
                self.bump();
                self.parse_foreach_tail()
            }
            Some(TokenKind::Assign) => {
                self.bump();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::To)?;
                self.expect(&TokenKind::Dollar)?;
                let name = self.expect_ident()?;
                self.expect_close_brace()?;
                Ok(Statement::Assign { name, expr })
            }
            Some(TokenKind::Dollar) if self.is_plain_assignment() => {
                self.bump(); // $
                let name = self.expect_ident()?;
                self.bump(); // =
                let expr = self.parse_expression()?;
                self.expect_close_brace()?;
                Ok(Statement::Assign { name, expr })
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect_close_brace()?;
                let escape = output_escapes(&expr);
                Ok(Statement::Output { expr, escape })
            }
        }
    }

    /// Lookahead for `{$name = ...}`: dollar, identifier, `=`.
    fn is_plain_assignment(&self) -> bool {
        matches!(
            (
                self.tokens.get(self.pos + 1).map(|t| &t.kind),
                self.tokens.get(self.pos + 2).map(|t| &t.kind),
            ),
            (Some(TokenKind::Ident), Some(TokenKind::Eq))
        )
    }

    /// Parses an if statement after the `if` keyword: condition, then-arm
    /// and any `{elseif}`/`{else}` continuation.
    fn parse_if_tail(&mut self) -> ParseResult<Statement> {
        let condition = self.parse_expression()?;
        self.expect_close_brace()?;

        let (then_branch, closer) =
            self.parse_statements(&[Closer::ElseIf, Closer::Else, Closer::EndIf])?;

        let else_branch = match closer {
            Some(Closer::EndIf) | None => None,
            Some(Closer::Else) => {
                let (else_branch, _) = self.parse_statements(&[Closer::EndIf])?;
                Some(else_branch)
            }
            Some(Closer::ElseIf) => {
                // elseif desugars to a nested if in the else arm
                let nested = self.parse_if_tail()?;
                Some(Statements(vec![nested]))
            }
            Some(other) => {
                debug_assert!(false, "closer {:?} was never requested", other);
                None
            }
        };

        Ok(Statement::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    /// Parses a foreach statement after the `foreach` keyword. Both forms
    /// are accepted: `$item in $source` and `$source as $key => $value`.
    fn parse_foreach_tail(&mut self) -> ParseResult<Statement> {
        let first_pos = self.current_start();
        self.expect(&TokenKind::Dollar)?;
        let first = self.parse_variable()?;

        let (source, key, value) = if self.eat(&TokenKind::In) {
            let value = plain_name(first, first_pos)?;
            self.expect(&TokenKind::Dollar)?;
            let source = self.parse_variable()?;
            (source, None, value)
        } else {
            self.expect(&TokenKind::As)?;
            let second_pos = self.current_start();
            self.expect(&TokenKind::Dollar)?;
            let second = plain_name(self.parse_variable()?, second_pos)?;
            if self.eat(&TokenKind::Arrow) {
                let third_pos = self.current_start();
                self.expect(&TokenKind::Dollar)?;
                let third = plain_name(self.parse_variable()?, third_pos)?;
                (first, Some(second), third)
            } else {
                (first, None, second)
            }
        };
        self.expect_close_brace()?;

        let (body, closer) = self.parse_statements(&[Closer::ForeachElse, Closer::EndForeach])?;
        let else_branch = match closer {
            Some(Closer::ForeachElse) => {
                let (else_branch, _) = self.parse_statements(&[Closer::EndForeach])?;
                Some(else_branch)
            }
            _ => None,
        };

        Ok(Statement::Foreach {
            source,
            key,
            value,
            body,
            else_branch,
        })
    }
}

/// Whether an output statement escapes: everything does, except an
/// expression whose filter chain ended in `|raw`.
fn output_escapes(expr: &Expression) -> bool {
    match expr {
        Expression::Filter(filter) => !filter.raw_output,
        _ => true,
    }
}

/// Requires a variable path to be a plain `$name`.
fn plain_name(var: Variable, position: usize) -> ParseResult<String> {
    match var {
        Variable::Global { name } => Ok(name),
        _ => Err(ParseError::new(
            ParseErrorKind::InvalidLoopVariable,
            position,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Literal};

    fn parse_ok(input: &str) -> SyntaxTree {
        parse(input).expect("template should parse")
    }

    fn single_statement(input: &str) -> Statement {
        let tree = parse_ok(input);
        assert_eq!(tree.statements().len(), 1, "expected a single statement");
        tree.statements().0[0].clone()
    }

    #[test]
    fn raw_only() {
        let tree = parse_ok("no directives here\n");
        assert_eq!(
            tree.statements().0,
            vec![Statement::Raw("no directives here\n".into())]
        );
    }

    #[test]
    fn variable_output() {
        let Statement::Output { expr, escape } = single_statement("{$name}") else {
            panic!("expected output statement");
        };
        assert!(escape);
        assert_eq!(
            expr,
            Expression::Variable(Variable::Global {
                name: "name".into()
            })
        );
    }

    #[test]
    fn member_paths() {
        let Statement::Output { expr, .. } = single_statement("{$a.b[3]}") else {
            panic!("expected output statement");
        };
        let Expression::Variable(Variable::MemberAt { parent, index }) = expr else {
            panic!("expected an indexed member access");
        };
        assert_eq!(
            *parent,
            Variable::Member {
                parent: Box::new(Variable::Global { name: "a".into() }),
                name: "b".into()
            }
        );
        assert_eq!(*index, Expression::Literal(Literal::Integer(3)));
    }

    #[test]
    fn precedence() {
        // 1+3-2*10 parses as (1+3)-(2*10)
        let Statement::Output { expr, .. } = single_statement("{1+3-2*10}") else {
            panic!("expected output statement");
        };
        let Expression::Binary {
            op: BinaryOp::Minus,
            right,
            ..
        } = expr
        else {
            panic!("expected subtraction at the top");
        };
        assert!(matches!(
            *right,
            Expression::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn parens_override_precedence() {
        let Statement::Output { expr, .. } = single_statement("{(1+3-2)*10}") else {
            panic!("expected output statement");
        };
        assert!(matches!(
            expr,
            Expression::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn comparison_chain_is_rejected() {
        assert!(parse("{1 < 2 < 3}").is_err());
    }

    #[test]
    fn if_elseif_desugars() {
        let stmt = single_statement("{if $v}T{elseif $w}F{/if}");
        let Statement::If { else_branch, .. } = stmt else {
            panic!("expected if statement");
        };
        let nested = else_branch.expect("elseif should produce an else arm");
        assert!(matches!(nested.0[0], Statement::If { .. }));
    }

    #[test]
    fn foreach_in_form() {
        let stmt = single_statement("{foreach $item in $list}x{/foreach}");
        let Statement::Foreach {
            source, key, value, ..
        } = stmt
        else {
            panic!("expected foreach statement");
        };
        assert_eq!(source, Variable::Global { name: "list".into() });
        assert_eq!(key, None);
        assert_eq!(value, "item");
    }

    #[test]
    fn foreach_as_form_with_keys() {
        let stmt = single_statement("{foreach $map as $k => $v}x{/foreach}");
        let Statement::Foreach {
            source, key, value, ..
        } = stmt
        else {
            panic!("expected foreach statement");
        };
        assert_eq!(source, Variable::Global { name: "map".into() });
        assert_eq!(key.as_deref(), Some("k"));
        assert_eq!(value, "v");
    }

    #[test]
    fn foreachelse_arm() {
        let stmt = single_statement("{foreach $l in $src}..{foreachelse}else{/foreach}");
        let Statement::Foreach { else_branch, .. } = stmt else {
            panic!("expected foreach statement");
        };
        assert_eq!(
            else_branch.unwrap().0,
            vec![Statement::Raw("else".into())]
        );
    }

    #[test]
    fn assign_forms() {
        assert_eq!(
            single_statement("{assign $v*11 to $t}"),
            single_statement("{$t = $v*11}")
        );
    }

    #[test]
    fn modifier_chain() {
        let Statement::Output { expr, escape } = single_statement("{$x|tolower|default:\"n\"}")
        else {
            panic!("expected output statement");
        };
        assert!(escape);
        let Expression::Filter(filter) = expr else {
            panic!("expected filter expression");
        };
        assert_eq!(filter.chain.len(), 2);
        assert_eq!(filter.chain[0].name, "tolower");
        assert_eq!(filter.chain[1].token, "default:\"n\"");
    }

    #[test]
    fn raw_modifier_disables_escaping() {
        let Statement::Output { escape, .. } = single_statement("{$x|raw}") else {
            panic!("expected output statement");
        };
        assert!(!escape);
    }

    #[test]
    fn unmatched_end_fails() {
        assert!(parse("{/if}").is_err());
        assert!(parse("{if true}x").is_err());
    }
}
