//! The parser

use thiserror::Error;

use crate::common::arena::Arena;
use crate::common::Id;
use crate::diag::SourceLocation;

use super::ast::*;
use super::lex::{LexError, Lexer, Token, TokenKind};

#[derive(Error, Debug)]
#[error("parse error: {0}")]
pub struct ParseError(pub String);

impl From<LexError> for ParseError {
    fn from(err: LexError) -> ParseError {
        ParseError(err.to_string())
    }
}

/// Parse `input` into an AST whose expressions live in `arena`.
pub fn parse<'a>(arena: &'a Arena, file: Id, input: &str) -> Result<Program<'a>, ParseError> {
    let tokens = Lexer::new(input).tokens()?;
    let mut parser = Parser { arena, file, tokens, pos: 0 };
    let func = parser.function()?;
    if let Some(extra) = parser.peek() {
        return Err(ParseError(format!(
            "trailing input after function body, starting with '{}'",
            extra.text
        )));
    }
    Ok(Program { func })
}

struct Parser<'a, 'src> {
    arena: &'a Arena,
    file: Id,
    tokens: Vec<Token<'src>>,
    pos: usize,
}

impl<'a, 'src> Parser<'a, 'src> {
    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn advance(&mut self) -> Result<Token<'src>, ParseError> {
        let token = self
            .tokens
            .get(self.pos)
            .copied()
            .ok_or_else(|| ParseError("unexpected end of input".into()))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        let token = self.advance()?;
        if token.kind != kind {
            return Err(ParseError(format!(
                "expected '{kind}' at {}:{}, found '{}'",
                token.line, token.col, token.text
            )));
        }
        Ok(token)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn loc_of(&self, token: &Token<'_>) -> SourceLocation {
        let end = (token.line, token.col + token.text.len() as u32);
        SourceLocation::new(self.file, (token.line, token.col), end)
    }

    // function := "int" id "(" ")" block
    fn function(&mut self) -> Result<Function<'a>, ParseError> {
        let start = self.expect(TokenKind::Int)?;
        let loc = self.loc_of(&start);
        let name_token = self.expect(TokenKind::Id)?;
        let name = Id::new(name_token.text.to_owned());
        self.expect(TokenKind::LParen)?;
        self.expect(TokenKind::RParen)?;
        let body = self.block()?;
        Ok(Function { name, body, loc })
    }

    // block := "{" stmt* "}"
    fn block(&mut self) -> Result<Vec<Stmt<'a>>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while self.peek_kind() != Some(TokenKind::RBrace) {
            if self.peek().is_none() {
                return Err(ParseError("unterminated block, expected '}'".into()));
            }
            stmts.push(self.statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt<'a>, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Int) => self.declaration(),
            Some(TokenKind::Return) => {
                let token = self.advance()?;
                let loc = self.loc_of(&token);
                let value = self.expression()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Return { value, loc })
            }
            Some(TokenKind::If) => self.if_statement(),
            Some(TokenKind::While) => self.while_statement(),
            Some(TokenKind::Id) => {
                let token = self.advance()?;
                let loc = self.loc_of(&token);
                let name = Id::new(token.text.to_owned());
                self.expect(TokenKind::Assign)?;
                let value = self.expression()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Assign { name, value, loc })
            }
            _ => {
                let token = self.advance()?;
                Err(ParseError(format!(
                    "expected a statement at {}:{}, found '{}'",
                    token.line, token.col, token.text
                )))
            }
        }
    }

    // declaration := "int" id ("=" expr)? ";"
    fn declaration(&mut self) -> Result<Stmt<'a>, ParseError> {
        self.expect(TokenKind::Int)?;
        let name_token = self.expect(TokenKind::Id)?;
        let loc = self.loc_of(&name_token);
        let name = Id::new(name_token.text.to_owned());
        let init = if self.eat(TokenKind::Assign) {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect(TokenKind::Semi)?;
        Ok(Stmt::Declare { name, init, loc })
    }

    fn if_statement(&mut self) -> Result<Stmt<'a>, ParseError> {
        let token = self.expect(TokenKind::If)?;
        let loc = self.loc_of(&token);
        self.expect(TokenKind::LParen)?;
        let cond = self.expression()?;
        self.expect(TokenKind::RParen)?;
        let then_body = self.block()?;
        let else_body = if self.eat(TokenKind::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::If { cond, then_body, else_body, loc })
    }

    fn while_statement(&mut self) -> Result<Stmt<'a>, ParseError> {
        let token = self.expect(TokenKind::While)?;
        let loc = self.loc_of(&token);
        self.expect(TokenKind::LParen)?;
        let cond = self.expression()?;
        self.expect(TokenKind::RParen)?;
        let body = self.block()?;
        Ok(Stmt::While { cond, body, loc })
    }

    // expr := additive ("<" additive)*
    fn expression(&mut self) -> Result<&'a Expr<'a>, ParseError> {
        let mut lhs = self.additive()?;
        while self.peek_kind() == Some(TokenKind::Lt) {
            self.advance()?;
            let rhs = self.additive()?;
            lhs = self.arena.alloc(Expr::BOp { op: BOp::Lt, lhs, rhs, loc: lhs.loc() });
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<&'a Expr<'a>, ParseError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BOp::Add,
                Some(TokenKind::Minus) => BOp::Sub,
                _ => break,
            };
            self.advance()?;
            let rhs = self.multiplicative()?;
            lhs = self.arena.alloc(Expr::BOp { op, lhs, rhs, loc: lhs.loc() });
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<&'a Expr<'a>, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BOp::Mul,
                Some(TokenKind::Slash) => BOp::Div,
                Some(TokenKind::Percent) => BOp::Mod,
                _ => break,
            };
            self.advance()?;
            let rhs = self.unary()?;
            lhs = self.arena.alloc(Expr::BOp { op, lhs, rhs, loc: lhs.loc() });
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<&'a Expr<'a>, ParseError> {
        if self.peek_kind() == Some(TokenKind::Minus) {
            let token = self.advance()?;
            let loc = self.loc_of(&token);
            let operand = self.unary()?;
            return Ok(self.arena.alloc(Expr::Negate { operand, loc }));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<&'a Expr<'a>, ParseError> {
        let token = self.advance()?;
        let loc = self.loc_of(&token);
        match token.kind {
            TokenKind::Num => {
                // Overflowing literals saturate; semantic analysis rejects
                // anything outside the signed 32-bit range anyway.
                let value = token.text.parse::<i64>().unwrap_or(i64::MAX);
                Ok(self.arena.alloc(Expr::Num { value, loc }))
            }
            TokenKind::HexNum => {
                let value = i64::from_str_radix(&token.text[2..], 16).unwrap_or(i64::MAX);
                Ok(self.arena.alloc(Expr::Num { value, loc }))
            }
            TokenKind::Id => {
                let name = Id::new(token.text.to_owned());
                Ok(self.arena.alloc(Expr::Var { name, loc }))
            }
            TokenKind::LParen => {
                let inner = self.expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => Err(ParseError(format!(
                "expected an expression at {}:{}, found '{}'",
                token.line, token.col, token.text
            ))),
        }
    }
}
