//! The lexer.

use derive_more::Display;
use regex::Regex;
use thiserror::Error;

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// 1-based position of the token's first character.
    pub line: u32,
    pub col: u32,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("hexnum")]
    HexNum,
    #[display("int")]
    Int,
    #[display("return")]
    Return,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("while")]
    While,
    #[display("=")]
    Assign,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("%")]
    Percent,
    #[display("<")]
    Lt,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display(";")]
    Semi,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("lexer error: unexpected character {ch:?} at {line}:{col}")]
pub struct LexError {
    pub ch: char,
    pub line: u32,
    pub col: u32,
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    line: u32,
    col: u32,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;
        let matcher = |pattern: &str, kind| (Regex::new(pattern).unwrap(), kind);
        Lexer {
            input,
            pos: 0,
            line: 1,
            col: 1,
            // Comments count as whitespace; block comments may span lines.
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://[^\n]*)|(?s:/\*.*?\*/))*").unwrap(),
            matchers: vec![
                matcher(r"\Aint\b", Int),
                matcher(r"\Areturn\b", Return),
                matcher(r"\Aif\b", If),
                matcher(r"\Aelse\b", Else),
                matcher(r"\Awhile\b", While),
                matcher(r"\A[A-Za-z_][A-Za-z0-9_]*", Id),
                matcher(r"\A0[xX][0-9a-fA-F]+", HexNum),
                matcher(r"\A[0-9]+", Num),
                matcher(r"\A=", Assign),
                matcher(r"\A\+", Plus),
                matcher(r"\A-", Minus),
                matcher(r"\A\*", Star),
                matcher(r"\A/", Slash),
                matcher(r"\A%", Percent),
                matcher(r"\A<", Lt),
                matcher(r"\A\(", LParen),
                matcher(r"\A\)", RParen),
                matcher(r"\A\{", LBrace),
                matcher(r"\A\}", RBrace),
                matcher(r"\A;", Semi),
            ],
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Consume `len` bytes, keeping the line/column counters in step.
    fn advance(&mut self, len: usize) {
        for ch in self.input[self.pos..self.pos + len].chars() {
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos += len;
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.advance(m.end());
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }

        let rest = &self.input[self.pos..];
        for (matcher, kind) in &self.matchers {
            if let Some(m) = matcher.find(rest) {
                let token = Token {
                    kind: *kind,
                    text: &rest[..m.end()],
                    line: self.line,
                    col: self.col,
                };
                self.advance(m.end());
                return Ok(Some(token));
            }
        }

        Err(LexError {
            ch: rest.chars().next().unwrap_or('\0'),
            line: self.line,
            col: self.col,
        })
    }

    /// Drain the whole input into a token vector.
    pub fn tokens(mut self) -> Result<Vec<Token<'input>>, LexError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next()? {
            tokens.push(token);
        }
        Ok(tokens)
    }
}
