//! Lexer for Slug source text
//!
//! Produces a flat token stream with 0-indexed line/column positions.
//! Newlines are significant (they terminate statements) and are emitted as
//! tokens; the parser decides where they matter. Comments run from `#` to
//! end of line.

use crate::token::{Token, TokenKind};

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    errors: Vec<String>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 0,
            column: 0,
            errors: Vec::new(),
        }
    }

    /// Tokenize the whole input. Lexical errors are collected alongside the
    /// tokens so the parser can report everything at once.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<String>) {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        (tokens, self.errors)
    }

    fn next_token(&mut self) -> Token {
        self.skip_blank();
        let (line, column) = (self.line, self.column);
        let make = |kind| Token::new(kind, line, column);

        let c = match self.peek() {
            Some(c) => c,
            None => return make(TokenKind::Eof),
        };

        if c == '\n' {
            self.advance();
            return make(TokenKind::Newline);
        }

        if c.is_ascii_digit() {
            return make(TokenKind::Number(self.read_number()));
        }

        if c == 'b' && self.peek_at(1) == Some('"') {
            self.advance();
            let bytes = self.read_quoted(line, column);
            return make(TokenKind::Bytes(bytes));
        }

        if is_ident_start(c) {
            let word = self.read_ident();
            let kind = TokenKind::keyword(&word).unwrap_or(TokenKind::Ident(word));
            return make(kind);
        }

        if c == '"' {
            return make(TokenKind::Str(self.read_string(line, column)));
        }

        self.advance();
        let kind = match c {
            '=' => match self.peek() {
                Some('=') => {
                    self.advance();
                    TokenKind::Eq
                }
                Some('>') => {
                    self.advance();
                    TokenKind::Arrow
                }
                _ => TokenKind::Assign,
            },
            '+' => {
                if self.peek() == Some(':') {
                    self.advance();
                    TokenKind::PrependOp
                } else {
                    TokenKind::Plus
                }
            }
            ':' => {
                if self.peek() == Some('+') {
                    self.advance();
                    TokenKind::AppendOp
                } else {
                    TokenKind::Colon
                }
            }
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '~' => TokenKind::Tilde,
            '^' => TokenKind::Caret,
            '@' => TokenKind::At,
            '&' => {
                if self.peek() == Some('&') {
                    self.advance();
                    TokenKind::AndAnd
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.advance();
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Ne
                } else {
                    TokenKind::Bang
                }
            }
            '<' => match self.peek() {
                Some('=') => {
                    self.advance();
                    TokenKind::Le
                }
                Some('<') => {
                    self.advance();
                    TokenKind::Shl
                }
                _ => TokenKind::Lt,
            },
            '>' => match self.peek() {
                Some('=') => {
                    self.advance();
                    TokenKind::Ge
                }
                Some('>') => {
                    self.advance();
                    TokenKind::Shr
                }
                _ => TokenKind::Gt,
            },
            '.' => {
                if self.peek() == Some('.') && self.peek_at(1) == Some('.') {
                    self.advance();
                    self.advance();
                    TokenKind::Ellipsis
                } else {
                    self.error(line, column, format!("unexpected character '{}'", c));
                    return self.next_token();
                }
            }
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            _ => {
                self.error(line, column, format!("unexpected character '{}'", c));
                return self.next_token();
            }
        };
        make(kind)
    }

    /// Skip spaces, tabs, carriage returns and comments, but not newlines.
    fn skip_blank(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    /// Read a decimal literal: digits, optional fraction, optional exponent.
    /// Validation of the value itself happens in the parser via `Dec64`.
    fn read_number(&mut self) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(1), Some('+') | Some('-')) {
                lookahead = 2;
            }
            if self.peek_at(lookahead).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..lookahead {
                    text.push(self.peek().expect("lookahead checked"));
                    self.advance();
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }
        text
    }

    fn read_ident(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    /// Read a quoted string literal, interpreting escapes.
    fn read_string(&mut self, line: usize, column: usize) -> String {
        let bytes = self.read_quoted(line, column);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Read a quoted literal as raw bytes. The opening quote has not been
    /// consumed yet. `\xNN` inserts the byte verbatim, so this is the shared
    /// reader for both string and bytes literals.
    fn read_quoted(&mut self, line: usize, column: usize) -> Vec<u8> {
        self.advance(); // opening quote
        let mut out: Vec<u8> = Vec::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.error(line, column, "unterminated string literal".to_string());
                    break;
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        Some('n') => out.push(b'\n'),
                        Some('t') => out.push(b'\t'),
                        Some('r') => out.push(b'\r'),
                        Some('\\') => out.push(b'\\'),
                        Some('"') => out.push(b'"'),
                        Some('0') => out.push(0),
                        Some('x') => {
                            self.advance();
                            let hi = self.peek();
                            self.advance();
                            let lo = self.peek();
                            match (
                                hi.and_then(|c| c.to_digit(16)),
                                lo.and_then(|c| c.to_digit(16)),
                            ) {
                                (Some(hi), Some(lo)) => out.push((hi * 16 + lo) as u8),
                                _ => self.error(
                                    line,
                                    column,
                                    "invalid \\x escape in string literal".to_string(),
                                ),
                            }
                        }
                        Some(other) => {
                            self.error(
                                line,
                                column,
                                format!("unknown escape '\\{}' in string literal", other),
                            );
                        }
                        None => {
                            self.error(line, column, "unterminated string literal".to_string());
                            return out;
                        }
                    }
                    self.advance();
                }
                Some(c) => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    self.advance();
                }
            }
        }
        out
    }

    fn error(&mut self, line: usize, column: usize, message: String) {
        self.errors
            .push(format!("{}:{}: {}", line + 1, column + 1, message));
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
