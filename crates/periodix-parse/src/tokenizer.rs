//! Hand-written tokenizer for the formula language. No regex: the alphabet
//! is small enough that a single `Peekable<Chars>` scan handles everything,
//! including the `&&`/`||`/`<=`/`>=`/`!=` two-character operators.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Bang,
    AmpAmp,
    PipePipe,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Caret => "^",
            TokenKind::Bang => "!",
            TokenKind::AmpAmp => "&&",
            TokenKind::PipePipe => "||",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Comma => ",",
            TokenKind::Eof => "<eof>",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    /// A bare identifier: a reference name (`R12`, `V1.5`, `T.DiM`, ...) or
    /// a function name (`IF`, `CUMSUM`, ...). The parser disambiguates by
    /// whether it's followed by `(`.
    Ident(String),
    Op(TokenKind),
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Ident(s) => s.clone(),
            Token::Op(k) => k.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.message, self.position)
    }
}

impl std::error::Error for TokenizerError {}

pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    pos: usize,
}

/// One token plus the byte offset it started at, for error reporting.
pub type Spanned = (Token, usize);

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            pos: 0,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    pub fn tokenize(input: &'a str) -> Result<Vec<Spanned>, TokenizerError> {
        let mut tokenizer = Tokenizer::new(input);
        let mut out = Vec::new();
        loop {
            let (tok, pos) = tokenizer.next_token()?;
            let is_eof = matches!(tok, Token::Op(TokenKind::Eof));
            out.push((tok, pos));
            if is_eof {
                break;
            }
        }
        Ok(out)
    }

    fn next_token(&mut self) -> Result<Spanned, TokenizerError> {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
        let start = self.pos;
        let Some(&c) = self.chars.peek() else {
            return Ok((Token::Op(TokenKind::Eof), start));
        };

        if c.is_ascii_digit() || c == '.' {
            return Ok((self.scan_number()?, start));
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return Ok((self.scan_ident(), start));
        }

        self.bump();
        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '&' if self.chars.peek() == Some(&'&') => {
                self.bump();
                TokenKind::AmpAmp
            }
            '|' if self.chars.peek() == Some(&'|') => {
                self.bump();
                TokenKind::PipePipe
            }
            '=' if self.chars.peek() == Some(&'=') => {
                self.bump();
                TokenKind::EqEq
            }
            '!' if self.chars.peek() == Some(&'=') => {
                self.bump();
                TokenKind::NotEq
            }
            '!' => TokenKind::Bang,
            '<' if self.chars.peek() == Some(&'=') => {
                self.bump();
                TokenKind::Le
            }
            '<' => TokenKind::Lt,
            '>' if self.chars.peek() == Some(&'=') => {
                self.bump();
                TokenKind::Ge
            }
            '>' => TokenKind::Gt,
            other => {
                return Err(TokenizerError {
                    message: format!("unexpected character '{other}'"),
                    position: start,
                });
            }
        };
        Ok((Token::Op(kind), start))
    }

    fn scan_number(&mut self) -> Result<Token, TokenizerError> {
        let start = self.pos;
        let mut text = String::new();
        let mut seen_dot = false;
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if let Some(&c) = self.chars.peek() {
            if c == 'e' || c == 'E' {
                let mut lookahead = self.chars.clone();
                lookahead.next();
                let exp_ok = matches!(lookahead.peek(), Some(d) if d.is_ascii_digit())
                    || matches!(lookahead.peek(), Some('+') | Some('-'));
                if exp_ok {
                    text.push(c);
                    self.bump();
                    if let Some(&sign) = self.chars.peek() {
                        if sign == '+' || sign == '-' {
                            text.push(sign);
                            self.bump();
                        }
                    }
                    while let Some(&d) = self.chars.peek() {
                        if d.is_ascii_digit() {
                            text.push(d);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
            }
        }
        text.parse::<f64>().map(Token::Number).map_err(|_| TokenizerError {
            message: format!("invalid number literal '{text}'"),
            position: start,
        })
    }

    fn scan_ident(&mut self) -> Token {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Token::Ident(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        Tokenizer::tokenize(input)
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn tokenizes_arithmetic() {
        assert_eq!(
            kinds("R1 + 2.5 * V1.3"),
            vec![
                Token::Ident("R1".into()),
                Token::Op(TokenKind::Plus),
                Token::Number(2.5),
                Token::Op(TokenKind::Star),
                Token::Ident("V1.3".into()),
                Token::Op(TokenKind::Eof),
            ]
        );
    }

    #[test]
    fn tokenizes_two_char_operators() {
        assert_eq!(
            kinds("R1 <= R2 && R3 != R4"),
            vec![
                Token::Ident("R1".into()),
                Token::Op(TokenKind::Le),
                Token::Ident("R2".into()),
                Token::Op(TokenKind::AmpAmp),
                Token::Ident("R3".into()),
                Token::Op(TokenKind::NotEq),
                Token::Ident("R4".into()),
                Token::Op(TokenKind::Eof),
            ]
        );
    }

    #[test]
    fn rejects_unknown_character() {
        let err = Tokenizer::tokenize("R1 @ R2").unwrap_err();
        assert_eq!(err.position, 3);
    }
}
