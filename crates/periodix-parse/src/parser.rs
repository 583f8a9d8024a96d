//! Recursive-descent parser over the token stream from [`crate::tokenizer`].
//!
//! Precedence, loosest to tightest: `||`, `&&`, comparisons, `+`/`-`,
//! `*`/`/`/`%`, unary `-`/`!`, `^` (right-associative), then calls and
//! parenthesized groups. The formula language's operator list has no
//! precedence table of its own, so this mirrors the conventional C-family
//! ordering, which is also what every spreadsheet-adjacent grammar in this
//! codebase's ancestry assumes.

use std::fmt;

use crate::ast::{AstNode, BinaryOp, CallArgs, Func, UnaryOp};
use crate::tokenizer::{Spanned, Token, TokenKind, Tokenizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.message, self.position)
    }
}

impl std::error::Error for ParserError {}

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn parse(input: &str) -> Result<AstNode, ParserError> {
        let tokens = Tokenizer::tokenize(input).map_err(|e| ParserError {
            message: e.message,
            position: e.position,
        })?;
        let mut parser = Parser { tokens, pos: 0 };
        let node = parser.parse_or()?;
        parser.expect_eof()?;
        Ok(node)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn peek_pos(&self) -> usize {
        self.tokens[self.pos].1
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].0.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_op(&mut self, kind: TokenKind) -> Result<(), ParserError> {
        if self.peek() == &Token::Op(kind) {
            self.bump();
            Ok(())
        } else {
            Err(ParserError {
                message: format!("expected '{kind}', found '{}'", self.peek().describe()),
                position: self.peek_pos(),
            })
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParserError> {
        if self.peek() == &Token::Op(TokenKind::Eof) {
            Ok(())
        } else {
            Err(ParserError {
                message: format!("unexpected trailing token '{}'", self.peek().describe()),
                position: self.peek_pos(),
            })
        }
    }

    fn parse_or(&mut self) -> Result<AstNode, ParserError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == &Token::Op(TokenKind::PipePipe) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = AstNode::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<AstNode, ParserError> {
        let mut lhs = self.parse_comparison()?;
        while self.peek() == &Token::Op(TokenKind::AmpAmp) {
            self.bump();
            let rhs = self.parse_comparison()?;
            lhs = AstNode::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<AstNode, ParserError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Op(TokenKind::EqEq) => BinaryOp::Eq,
                Token::Op(TokenKind::NotEq) => BinaryOp::Ne,
                Token::Op(TokenKind::Lt) => BinaryOp::Lt,
                Token::Op(TokenKind::Le) => BinaryOp::Le,
                Token::Op(TokenKind::Gt) => BinaryOp::Gt,
                Token::Op(TokenKind::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_additive()?;
            lhs = AstNode::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<AstNode, ParserError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Op(TokenKind::Plus) => BinaryOp::Add,
                Token::Op(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = AstNode::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<AstNode, ParserError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Op(TokenKind::Star) => BinaryOp::Mul,
                Token::Op(TokenKind::Slash) => BinaryOp::Div,
                Token::Op(TokenKind::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = AstNode::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<AstNode, ParserError> {
        match self.peek() {
            Token::Op(TokenKind::Minus) => {
                self.bump();
                let expr = self.parse_unary()?;
                Ok(AstNode::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(expr),
                })
            }
            Token::Op(TokenKind::Bang) => {
                self.bump();
                let expr = self.parse_unary()?;
                Ok(AstNode::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                })
            }
            _ => self.parse_power(),
        }
    }

    /// `^` is right-associative: `2 ^ 3 ^ 2 == 2 ^ (3 ^ 2)`.
    fn parse_power(&mut self) -> Result<AstNode, ParserError> {
        let base = self.parse_primary()?;
        if self.peek() == &Token::Op(TokenKind::Caret) {
            self.bump();
            let exponent = self.parse_unary()?;
            Ok(AstNode::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            })
        } else {
            Ok(base)
        }
    }

    fn parse_primary(&mut self) -> Result<AstNode, ParserError> {
        let pos = self.peek_pos();
        match self.bump() {
            Token::Number(n) => Ok(AstNode::Number(n)),
            Token::Ident(name) => {
                if self.peek() == &Token::Op(TokenKind::LParen) {
                    self.parse_call(&name, pos)
                } else {
                    Ok(AstNode::Reference(name))
                }
            }
            Token::Op(TokenKind::LParen) => {
                let inner = self.parse_or()?;
                self.expect_op(TokenKind::RParen)?;
                Ok(inner)
            }
            other => Err(ParserError {
                message: format!("unexpected token '{}'", other.describe()),
                position: pos,
            }),
        }
    }

    fn parse_call(&mut self, name: &str, pos: usize) -> Result<AstNode, ParserError> {
        let func = Func::parse(name).ok_or_else(|| ParserError {
            message: format!("unknown function '{name}'"),
            position: pos,
        })?;
        self.expect_op(TokenKind::LParen)?;
        let mut args = CallArgs::new();
        if self.peek() != &Token::Op(TokenKind::RParen) {
            args.push(self.parse_or()?);
            while self.peek() == &Token::Op(TokenKind::Comma) {
                self.bump();
                args.push(self.parse_or()?);
            }
        }
        self.expect_op(TokenKind::RParen)?;
        func.check_arity(args.len()).map_err(|message| ParserError {
            message,
            position: pos,
        })?;
        Ok(AstNode::Call { func, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> AstNode {
        Parser::parse(s).unwrap_or_else(|e| panic!("failed to parse {s:?}: {e}"))
    }

    #[test]
    fn precedence_multiplies_before_adding() {
        assert_eq!(
            parse("R1 + R2 * R3"),
            AstNode::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(AstNode::Reference("R1".into())),
                rhs: Box::new(AstNode::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(AstNode::Reference("R2".into())),
                    rhs: Box::new(AstNode::Reference("R3".into())),
                }),
            }
        );
    }

    #[test]
    fn power_is_right_associative() {
        assert_eq!(
            parse("2 ^ 3 ^ 2"),
            AstNode::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(AstNode::Number(2.0)),
                rhs: Box::new(AstNode::Binary {
                    op: BinaryOp::Pow,
                    lhs: Box::new(AstNode::Number(3.0)),
                    rhs: Box::new(AstNode::Number(2.0)),
                }),
            }
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(
            parse("R1 || R2 && R3"),
            AstNode::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(AstNode::Reference("R1".into())),
                rhs: Box::new(AstNode::Binary {
                    op: BinaryOp::And,
                    lhs: Box::new(AstNode::Reference("R2".into())),
                    rhs: Box::new(AstNode::Reference("R3".into())),
                }),
            }
        );
    }

    #[test]
    fn parses_array_operator_calls() {
        let ast = parse("CUMSUM(R1) + SHIFT(R2, 3)");
        match ast {
            AstNode::Binary { op: BinaryOp::Add, lhs, rhs } => {
                assert_eq!(
                    *lhs,
                    AstNode::Call {
                        func: Func::CumSum,
                        args: smallvec::smallvec![AstNode::Reference("R1".into())],
                    }
                );
                assert_eq!(
                    *rhs,
                    AstNode::Call {
                        func: Func::Shift,
                        args: smallvec::smallvec![AstNode::Reference("R2".into()), AstNode::Number(3.0)],
                    }
                );
            }
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = Parser::parse("MIN(R1, R2, R3)").unwrap_err();
        assert!(err.message.contains("MIN"));
    }

    #[test]
    fn rejects_unknown_function() {
        let err = Parser::parse("NOPE(R1)").unwrap_err();
        assert!(err.message.contains("unknown function"));
    }

    #[test]
    fn collects_hard_and_soft_refs() {
        let ast = parse("R1 + SHIFT(R2, 3) + PREVVAL(R3)");
        let mut hard = Vec::new();
        let mut soft = Vec::new();
        ast.collect_refs(&mut hard, &mut soft);
        assert_eq!(hard, vec!["R1".to_string()]);
        assert_eq!(soft, vec!["R2".to_string(), "R3".to_string()]);
    }

    #[test]
    fn nested_lag_scope_still_soft() {
        let ast = parse("SHIFT(R1 + CUMSUM(R2), 1)");
        let mut hard = Vec::new();
        let mut soft = Vec::new();
        ast.collect_refs(&mut hard, &mut soft);
        assert!(hard.is_empty());
        assert_eq!(soft, vec!["R1".to_string(), "R2".to_string()]);
    }
}
