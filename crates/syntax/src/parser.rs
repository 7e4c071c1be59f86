//! Parser for Slug
//!
//! Recursive descent over the token stream, with precedence climbing for
//! expressions. Newlines terminate statements; inside delimiters and after
//! operators they are insignificant.
//!
//! Errors are strings carrying 1-indexed line:column of the offending token.

use crate::ast::{
    Arg, Block, Expr, InfixOp, MapPatternEntry, MatchCase, Param, Pattern, Position, PrefixOp,
    Program, Stmt, TagSpec,
};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};
use slug_core::Dec64;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    lex_errors: Vec<String>,
}

type PResult<T> = Result<T, String>;

impl Parser {
    pub fn new(source: &str) -> Self {
        let (tokens, lex_errors) = Lexer::new(source).tokenize();
        Parser {
            tokens,
            pos: 0,
            lex_errors,
        }
    }

    /// Parse a whole program. All lexer errors are reported; parsing stops at
    /// the first syntax error.
    pub fn parse(&mut self) -> Result<Program, Vec<String>> {
        if !self.lex_errors.is_empty() {
            return Err(self.lex_errors.clone());
        }
        let mut program = Program::default();
        self.skip_terminators();
        while !self.at_eof() {
            match self.parse_statement() {
                Ok(stmt) => program.statements.push(stmt),
                Err(e) => return Err(vec![e]),
            }
            if let Err(e) = self.expect_terminator() {
                return Err(vec![e]);
            }
            self.skip_terminators();
        }
        Ok(program)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> PResult<Stmt> {
        let tags = self.parse_tags()?;
        let pos = self.position();
        match self.peek_kind() {
            TokenKind::Let => {
                self.advance();
                self.parse_let(false, tags, pos)
            }
            TokenKind::Const => {
                self.advance();
                self.parse_let(true, tags, pos)
            }
            TokenKind::Fn if matches!(self.peek_kind_at(1), TokenKind::Ident(_)) => {
                let func = self.parse_fn_literal()?;
                let name = match &func {
                    Expr::Function {
                        name: Some(name), ..
                    } => name.clone(),
                    _ => unreachable!("named fn checked above"),
                };
                Ok(Stmt::Function {
                    name,
                    func,
                    tags,
                    pos,
                })
            }
            TokenKind::Foreign => {
                self.advance();
                self.expect(&TokenKind::Fn, "after 'foreign'")?;
                let name = self.expect_ident("foreign function name")?;
                let params = self.parse_params()?;
                Ok(Stmt::Foreign {
                    name,
                    params,
                    tags,
                    pos,
                })
            }
            TokenKind::Return => {
                self.no_tags(&tags, "return")?;
                self.advance();
                let value = if self.at_terminator() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                Ok(Stmt::Return { value, pos })
            }
            TokenKind::Defer => {
                self.no_tags(&tags, "defer")?;
                self.advance();
                let call = self.parse_expression()?;
                if !matches!(call, Expr::Call { .. }) {
                    return Err(format!("{}: defer requires a call expression", pos));
                }
                Ok(Stmt::Defer { call, pos })
            }
            TokenKind::Throw => {
                self.no_tags(&tags, "throw")?;
                self.advance();
                let value = self.parse_expression()?;
                Ok(Stmt::Throw { value, pos })
            }
            _ => {
                self.no_tags(&tags, "this statement")?;
                let expr = self.parse_expression()?;
                Ok(Stmt::Expr { expr })
            }
        }
    }

    fn parse_let(&mut self, constant: bool, tags: Vec<TagSpec>, pos: Position) -> PResult<Stmt> {
        let pattern = self.parse_pattern()?;
        self.expect(&TokenKind::Assign, "in binding")?;
        self.skip_newlines();
        let value = self.parse_expression()?;
        Ok(Stmt::Let {
            pattern,
            value,
            constant,
            tags,
            pos,
        })
    }

    /// Leading `@name` / `@name(args)` annotations.
    fn parse_tags(&mut self) -> PResult<Vec<TagSpec>> {
        let mut tags = Vec::new();
        while *self.peek_kind() == TokenKind::At {
            let pos = self.position();
            self.advance();
            let name = self.expect_ident("tag name")?;
            let mut args = Vec::new();
            if self.eat(&TokenKind::LParen) {
                self.skip_newlines();
                while *self.peek_kind() != TokenKind::RParen {
                    args.push(self.parse_expression()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(&TokenKind::RParen, "after tag arguments")?;
            }
            tags.push(TagSpec { name, args, pos });
            self.skip_newlines();
        }
        Ok(tags)
    }

    fn no_tags(&self, tags: &[TagSpec], what: &str) -> PResult<()> {
        match tags.first() {
            Some(tag) => Err(format!(
                "{}: tag '@{}' cannot annotate {}",
                tag.pos, tag.name, what
            )),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Expressions (precedence climbing)
    // ------------------------------------------------------------------

    pub fn parse_expression(&mut self) -> PResult<Expr> {
        self.parse_expr(1)
    }

    fn parse_expr(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let Some(prec) = infix_precedence(self.peek_kind()) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            let op_token = self.advance();
            let pos = Position::new(op_token.line, op_token.column);
            self.skip_newlines();
            match op_token.kind {
                TokenKind::Assign => {
                    // Right-associative; any target parses, the evaluator
                    // rejects non-identifiers.
                    let value = self.parse_expr(prec)?;
                    lhs = Expr::Assign {
                        target: Box::new(lhs),
                        value: Box::new(value),
                        pos,
                    };
                }
                kind => {
                    let op = infix_op(&kind).expect("precedence implies operator");
                    let next_min = if kind == TokenKind::PrependOp {
                        prec // right-associative
                    } else {
                        prec + 1
                    };
                    let rhs = self.parse_expr(next_min)?;
                    lhs = Expr::Infix {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        pos,
                    };
                }
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let pos = self.position();
        let prefix = match self.peek_kind() {
            TokenKind::Bang => Some(PrefixOp::Not),
            TokenKind::Minus => Some(PrefixOp::Neg),
            TokenKind::Tilde => Some(PrefixOp::BitNot),
            _ => None,
        };
        if let Some(op) = prefix {
            self.advance();
            let rhs = self.parse_unary()?;
            return Ok(Expr::Prefix {
                op,
                rhs: Box::new(rhs),
                pos,
            });
        }
        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    /// Calls and index/slice bind tightest and chain left to right.
    fn parse_postfix(&mut self, mut expr: Expr) -> PResult<Expr> {
        loop {
            match self.peek_kind() {
                TokenKind::LParen => {
                    let pos = self.position();
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        tail: false,
                        pos,
                    };
                }
                TokenKind::LBracket => {
                    expr = self.parse_index(expr)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> PResult<Vec<Arg>> {
        self.expect(&TokenKind::LParen, "to open argument list")?;
        self.skip_newlines();
        let mut args = Vec::new();
        while *self.peek_kind() != TokenKind::RParen {
            let spread = self.eat(&TokenKind::Ellipsis);
            let expr = self.parse_expression()?;
            args.push(Arg { expr, spread });
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RParen, "to close argument list")?;
        Ok(args)
    }

    fn parse_index(&mut self, target: Expr) -> PResult<Expr> {
        let pos = self.position();
        self.expect(&TokenKind::LBracket, "to open index")?;
        self.skip_newlines();

        let start = if matches!(self.peek_kind(), TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        if !self.eat(&TokenKind::Colon) {
            self.expect(&TokenKind::RBracket, "to close index")?;
            let index = start.ok_or_else(|| format!("{}: empty index expression", pos))?;
            return Ok(Expr::Index {
                target: Box::new(target),
                index,
                pos,
            });
        }

        self.skip_newlines();
        let end = if matches!(self.peek_kind(), TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        let step = if self.eat(&TokenKind::Colon) {
            self.skip_newlines();
            if *self.peek_kind() == TokenKind::RBracket {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            }
        } else {
            None
        };
        self.expect(&TokenKind::RBracket, "to close slice")?;
        Ok(Expr::SliceExpr {
            target: Box::new(target),
            start,
            end,
            step,
            pos,
        })
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let pos = self.position();
        match self.peek_kind().clone() {
            TokenKind::Number(text) => {
                self.advance();
                let value: Dec64 = text
                    .parse()
                    .map_err(|e| format!("{}: {}", pos, e))?;
                Ok(Expr::Number { value, pos })
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::Str { value, pos })
            }
            TokenKind::Bytes(value) => {
                self.advance();
                Ok(Expr::Bytes { value, pos })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool { value: true, pos })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool { value: false, pos })
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Nil { pos })
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident { name, pos })
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let expr = self.parse_expression()?;
                self.skip_newlines();
                self.expect(&TokenKind::RParen, "to close group")?;
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_list_literal(pos),
            TokenKind::LBrace => self.parse_map_literal(pos),
            TokenKind::If => self.parse_if(pos),
            TokenKind::Fn => self.parse_fn_literal(),
            TokenKind::Match => self.parse_match(pos),
            TokenKind::Try => self.parse_try(pos),
            TokenKind::Recur => {
                self.advance();
                let args = self.parse_args()?;
                Ok(Expr::Recur { args, pos })
            }
            other => Err(format!("{}: unexpected token '{}'", pos, other)),
        }
    }

    fn parse_list_literal(&mut self, pos: Position) -> PResult<Expr> {
        self.expect(&TokenKind::LBracket, "to open list")?;
        self.skip_newlines();
        let mut elements = Vec::new();
        while *self.peek_kind() != TokenKind::RBracket {
            elements.push(self.parse_expression()?);
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBracket, "to close list")?;
        Ok(Expr::List { elements, pos })
    }

    fn parse_map_literal(&mut self, pos: Position) -> PResult<Expr> {
        self.expect(&TokenKind::LBrace, "to open map")?;
        self.skip_newlines();
        let mut entries = Vec::new();
        while *self.peek_kind() != TokenKind::RBrace {
            let key = match self.peek_kind().clone() {
                // bare identifier keys are string keys
                TokenKind::Ident(name)
                    if *self.peek_kind_at(1) == TokenKind::Colon =>
                {
                    let kpos = self.position();
                    self.advance();
                    Expr::Str { value: name, pos: kpos }
                }
                _ => self.parse_expression()?,
            };
            self.expect(&TokenKind::Colon, "between map key and value")?;
            self.skip_newlines();
            let value = self.parse_expression()?;
            entries.push((key, value));
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace, "to close map")?;
        Ok(Expr::MapLit { entries, pos })
    }

    fn parse_if(&mut self, pos: Position) -> PResult<Expr> {
        self.expect(&TokenKind::If, "to start conditional")?;
        let cond = self.parse_expression()?;
        let then = self.parse_block()?;
        let alt = if self.eat(&TokenKind::Else) {
            if *self.peek_kind() == TokenKind::If {
                let nested_pos = self.position();
                let nested = self.parse_if(nested_pos)?;
                Some(Block {
                    statements: vec![Stmt::Expr { expr: nested }],
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Expr::If {
            cond: Box::new(cond),
            then,
            alt,
            pos,
        })
    }

    fn parse_fn_literal(&mut self) -> PResult<Expr> {
        let pos = self.position();
        self.expect(&TokenKind::Fn, "to start function")?;
        let name = match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ => None,
        };
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(Expr::Function {
            name,
            params,
            body,
            has_tail_call: false,
            pos,
        })
    }

    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        self.expect(&TokenKind::LParen, "to open parameter list")?;
        self.skip_newlines();
        let mut params: Vec<Param> = Vec::new();
        while *self.peek_kind() != TokenKind::RParen {
            if let Some(prev) = params.last()
                && prev.variadic
            {
                return Err(format!(
                    "{}: variadic parameter must be last",
                    self.position()
                ));
            }
            if self.eat(&TokenKind::Ellipsis) {
                let name = self.expect_ident("variadic parameter name")?;
                params.push(Param {
                    name,
                    default: None,
                    variadic: true,
                });
            } else {
                let name = self.expect_ident("parameter name")?;
                let default = if self.eat(&TokenKind::Assign) {
                    self.skip_newlines();
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                params.push(Param {
                    name,
                    default,
                    variadic: false,
                });
            }
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RParen, "to close parameter list")?;
        Ok(params)
    }

    fn parse_block(&mut self) -> PResult<Block> {
        self.skip_newlines();
        self.expect(&TokenKind::LBrace, "to open block")?;
        self.skip_terminators();
        let mut statements = Vec::new();
        while *self.peek_kind() != TokenKind::RBrace && !self.at_eof() {
            statements.push(self.parse_statement()?);
            self.expect_terminator()?;
            self.skip_terminators();
        }
        self.expect(&TokenKind::RBrace, "to close block")?;
        Ok(Block { statements })
    }

    fn parse_match(&mut self, pos: Position) -> PResult<Expr> {
        self.expect(&TokenKind::Match, "to start match")?;
        let subject = self.parse_expression()?;
        let cases = self.parse_case_block()?;
        Ok(Expr::Match {
            subject: Box::new(subject),
            cases,
            pos,
        })
    }

    fn parse_try(&mut self, pos: Position) -> PResult<Expr> {
        self.expect(&TokenKind::Try, "to start try")?;
        let body = self.parse_block()?;
        self.skip_newlines();
        self.expect(&TokenKind::Catch, "after try block")?;
        let cases = self.parse_case_block()?;
        Ok(Expr::TryCatch { body, cases, pos })
    }

    fn parse_case_block(&mut self) -> PResult<Vec<MatchCase>> {
        self.skip_newlines();
        self.expect(&TokenKind::LBrace, "to open cases")?;
        self.skip_terminators();
        let mut cases = Vec::new();
        while *self.peek_kind() != TokenKind::RBrace && !self.at_eof() {
            let pos = self.position();
            let pattern = self.parse_pattern()?;
            let guard = if self.eat(&TokenKind::If) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            self.expect(&TokenKind::Arrow, "before case body")?;
            self.skip_newlines();
            let body = if *self.peek_kind() == TokenKind::LBrace {
                self.parse_block()?
            } else {
                let expr = self.parse_expression()?;
                Block {
                    statements: vec![Stmt::Expr { expr }],
                }
            };
            cases.push(MatchCase {
                pattern,
                guard,
                body,
                pos,
            });
            if !self.eat(&TokenKind::Comma) && !self.at_terminator() {
                break;
            }
            self.skip_terminators();
        }
        self.expect(&TokenKind::RBrace, "to close cases")?;
        Ok(cases)
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    pub fn parse_pattern(&mut self) -> PResult<Pattern> {
        let pos = self.position();
        let first = self.parse_pattern_primary()?;
        if *self.peek_kind() != TokenKind::Pipe {
            return Ok(first);
        }
        let mut alternatives = vec![first];
        while self.eat(&TokenKind::Pipe) {
            self.skip_newlines();
            alternatives.push(self.parse_pattern_primary()?);
        }
        Ok(Pattern::Alt { alternatives, pos })
    }

    fn parse_pattern_primary(&mut self) -> PResult<Pattern> {
        let pos = self.position();
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                if name == "_" {
                    Ok(Pattern::Wildcard { pos })
                } else {
                    Ok(Pattern::Ident { name, pos })
                }
            }
            TokenKind::Caret => {
                self.advance();
                let name = self.expect_ident("pinned identifier")?;
                Ok(Pattern::Pin { name, pos })
            }
            TokenKind::Ellipsis => {
                self.advance();
                let name = match self.peek_kind().clone() {
                    TokenKind::Ident(name) => {
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                Ok(Pattern::Spread { name, pos })
            }
            TokenKind::LBracket => {
                self.advance();
                self.skip_newlines();
                let mut elements = Vec::new();
                while *self.peek_kind() != TokenKind::RBracket {
                    elements.push(self.parse_pattern()?);
                    self.skip_newlines();
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(&TokenKind::RBracket, "to close list pattern")?;
                Ok(Pattern::List { elements, pos })
            }
            TokenKind::LBrace => self.parse_map_pattern(pos),
            TokenKind::Minus
            | TokenKind::Number(_)
            | TokenKind::Str(_)
            | TokenKind::Bytes(_)
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Nil => {
                let expr = self.parse_literal_pattern_expr()?;
                Ok(Pattern::Literal { expr, pos })
            }
            other => Err(format!("{}: unexpected token '{}' in pattern", pos, other)),
        }
    }

    /// Literal patterns are scalar literals, optionally negated.
    fn parse_literal_pattern_expr(&mut self) -> PResult<Expr> {
        let pos = self.position();
        if self.eat(&TokenKind::Minus) {
            let inner = self.parse_literal_pattern_expr()?;
            return Ok(Expr::Prefix {
                op: PrefixOp::Neg,
                rhs: Box::new(inner),
                pos,
            });
        }
        match self.peek_kind().clone() {
            TokenKind::Number(text) => {
                self.advance();
                let value: Dec64 = text.parse().map_err(|e| format!("{}: {}", pos, e))?;
                Ok(Expr::Number { value, pos })
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::Str { value, pos })
            }
            TokenKind::Bytes(value) => {
                self.advance();
                Ok(Expr::Bytes { value, pos })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool { value: true, pos })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool { value: false, pos })
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Nil { pos })
            }
            other => Err(format!(
                "{}: expected literal in pattern, found '{}'",
                pos, other
            )),
        }
    }

    fn parse_map_pattern(&mut self, pos: Position) -> PResult<Pattern> {
        self.expect(&TokenKind::LBrace, "to open map pattern")?;
        self.skip_newlines();

        // `{*}` copies every string-keyed pair into scope
        if *self.peek_kind() == TokenKind::Star {
            self.advance();
            self.skip_newlines();
            self.expect(&TokenKind::RBrace, "to close map pattern")?;
            return Ok(Pattern::Map {
                entries: Vec::new(),
                rest: None,
                exact: false,
                select_all: true,
                pos,
            });
        }

        // `{= k: p}` requires the value to carry no extra keys
        let exact = self.eat(&TokenKind::Assign);
        if exact {
            self.skip_newlines();
        }

        let mut entries = Vec::new();
        let mut rest: Option<Option<String>> = None;
        while *self.peek_kind() != TokenKind::RBrace {
            if self.eat(&TokenKind::Ellipsis) {
                if rest.is_some() {
                    return Err(format!(
                        "{}: duplicate rest pattern in map pattern",
                        self.position()
                    ));
                }
                rest = Some(match self.peek_kind().clone() {
                    TokenKind::Ident(name) => {
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                });
            } else {
                let (key, shorthand) = match self.peek_kind().clone() {
                    TokenKind::Ident(name) => {
                        let kpos = self.position();
                        self.advance();
                        let shorthand = *self.peek_kind() != TokenKind::Colon;
                        (
                            Expr::Str {
                                value: name,
                                pos: kpos,
                            },
                            shorthand,
                        )
                    }
                    _ => (self.parse_literal_pattern_expr()?, false),
                };
                let pattern = if shorthand {
                    let name = match &key {
                        Expr::Str { value, .. } => value.clone(),
                        _ => unreachable!("shorthand key is always an identifier"),
                    };
                    Pattern::Ident {
                        name,
                        pos: key.pos(),
                    }
                } else {
                    self.expect(&TokenKind::Colon, "between map key and pattern")?;
                    self.skip_newlines();
                    self.parse_pattern()?
                };
                entries.push(MapPatternEntry { key, pattern });
            }
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace, "to close map pattern")?;
        Ok(Pattern::Map {
            entries,
            rest,
            exact,
            select_all: false,
            pos,
        })
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| self.tokens.last().expect("token stream ends with Eof"))
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn position(&self) -> Position {
        let t = self.peek();
        Position::new(t.line, t.column)
    }

    fn at_eof(&self) -> bool {
        *self.peek_kind() == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, context: &str) -> PResult<Token> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(format!(
                "{}: expected '{}' {}, found '{}'",
                self.position(),
                kind,
                context,
                self.peek_kind()
            ))
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<String> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(format!(
                "{}: expected {}, found '{}'",
                self.position(),
                what,
                other
            )),
        }
    }

    fn skip_newlines(&mut self) {
        while *self.peek_kind() == TokenKind::Newline {
            self.advance();
        }
    }

    fn skip_terminators(&mut self) {
        while matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Semicolon
        ) {
            self.advance();
        }
    }

    fn at_terminator(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        )
    }

    fn expect_terminator(&mut self) -> PResult<()> {
        if self.at_terminator() {
            while matches!(
                self.peek_kind(),
                TokenKind::Newline | TokenKind::Semicolon
            ) {
                self.advance();
            }
            Ok(())
        } else {
            Err(format!(
                "{}: expected end of statement, found '{}'",
                self.position(),
                self.peek_kind()
            ))
        }
    }
}

fn infix_precedence(kind: &TokenKind) -> Option<u8> {
    Some(match kind {
        TokenKind::Assign => 1,
        TokenKind::OrOr => 2,
        TokenKind::AndAnd => 3,
        TokenKind::Eq | TokenKind::Ne => 4,
        TokenKind::Lt | TokenKind::Gt | TokenKind::Le | TokenKind::Ge => 5,
        TokenKind::Pipe => 6,
        TokenKind::Caret => 7,
        TokenKind::Amp => 8,
        TokenKind::Shl | TokenKind::Shr => 9,
        TokenKind::Plus | TokenKind::Minus | TokenKind::AppendOp | TokenKind::PrependOp => 10,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 11,
        _ => return None,
    })
}

fn infix_op(kind: &TokenKind) -> Option<InfixOp> {
    Some(match kind {
        TokenKind::Plus => InfixOp::Add,
        TokenKind::Minus => InfixOp::Sub,
        TokenKind::Star => InfixOp::Mul,
        TokenKind::Slash => InfixOp::Div,
        TokenKind::Percent => InfixOp::Rem,
        TokenKind::Amp => InfixOp::BitAnd,
        TokenKind::Pipe => InfixOp::BitOr,
        TokenKind::Caret => InfixOp::BitXor,
        TokenKind::Shl => InfixOp::Shl,
        TokenKind::Shr => InfixOp::Shr,
        TokenKind::Lt => InfixOp::Lt,
        TokenKind::Gt => InfixOp::Gt,
        TokenKind::Le => InfixOp::Le,
        TokenKind::Ge => InfixOp::Ge,
        TokenKind::Eq => InfixOp::Eq,
        TokenKind::Ne => InfixOp::Ne,
        TokenKind::AndAnd => InfixOp::And,
        TokenKind::OrOr => InfixOp::Or,
        TokenKind::AppendOp => InfixOp::Append,
        TokenKind::PrependOp => InfixOp::Prepend,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        Parser::new(source)
            .parse()
            .unwrap_or_else(|e| panic!("parse failed: {:?}", e))
    }

    fn parse_err(source: &str) -> Vec<String> {
        Parser::new(source)
            .parse()
            .expect_err("expected parse failure")
    }

    fn single_expr(source: &str) -> Expr {
        let program = parse_ok(source);
        assert_eq!(program.statements.len(), 1, "want one statement");
        match program.statements.into_iter().next().unwrap() {
            Stmt::Expr { expr } => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let expr = single_expr("1 + 2 * 3");
        match expr {
            Expr::Infix {
                op: InfixOp::Add,
                rhs,
                ..
            } => {
                assert!(matches!(
                    *rhs,
                    Expr::Infix {
                        op: InfixOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn test_prepend_is_right_associative() {
        let expr = single_expr("1 +: 2 +: xs");
        match expr {
            Expr::Infix {
                op: InfixOp::Prepend,
                rhs,
                ..
            } => {
                assert!(matches!(
                    *rhs,
                    Expr::Infix {
                        op: InfixOp::Prepend,
                        ..
                    }
                ));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn test_let_with_tags() {
        let program = parse_ok("@export let x = 1");
        match &program.statements[0] {
            Stmt::Let { tags, constant, .. } => {
                assert_eq!(tags.len(), 1);
                assert_eq!(tags[0].name, "export");
                assert!(!constant);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_named_fn_is_a_definition() {
        let program = parse_ok("fn inc(n) { n + 1 }");
        assert!(matches!(
            &program.statements[0],
            Stmt::Function { name, .. } if name == "inc"
        ));
    }

    #[test]
    fn test_fn_params() {
        let expr = single_expr("fn(a, b = 2, ...rest) { a }");
        match expr {
            Expr::Function { params, .. } => {
                assert_eq!(params.len(), 3);
                assert!(params[1].default.is_some());
                assert!(params[2].variadic);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_variadic_must_be_last() {
        let errors = parse_err("fn(...rest, a) { a }");
        assert!(errors[0].contains("variadic"));
    }

    #[test]
    fn test_call_with_spread() {
        let expr = single_expr("f(1, ...xs)");
        match expr {
            Expr::Call { args, .. } => {
                assert!(!args[0].spread);
                assert!(args[1].spread);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_index_and_slice() {
        assert!(matches!(single_expr("xs[0]"), Expr::Index { .. }));
        match single_expr("xs[1:3]") {
            Expr::SliceExpr { start, end, step, .. } => {
                assert!(start.is_some());
                assert!(end.is_some());
                assert!(step.is_none());
            }
            other => panic!("unexpected: {:?}", other),
        }
        match single_expr("xs[::2]") {
            Expr::SliceExpr { start, end, step, .. } => {
                assert!(start.is_none());
                assert!(end.is_none());
                assert!(step.is_some());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_match_with_spread_pattern() {
        let expr = single_expr("match xs { [h, ...t] => t\n _ => nil }");
        match expr {
            Expr::Match { cases, .. } => {
                assert_eq!(cases.len(), 2);
                match &cases[0].pattern {
                    Pattern::List { elements, .. } => {
                        assert_eq!(elements.len(), 2);
                        assert!(matches!(elements[1], Pattern::Spread { .. }));
                    }
                    other => panic!("unexpected pattern: {:?}", other),
                }
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_match_guard_and_alternation() {
        let expr = single_expr("match n { 1 | 2 => \"small\"\n x if x > 2 => \"big\" }");
        match expr {
            Expr::Match { cases, .. } => {
                assert!(matches!(cases[0].pattern, Pattern::Alt { .. }));
                assert!(cases[1].guard.is_some());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_map_pattern_variants() {
        let program = parse_ok("let {a, b: [x], ...rest} = m");
        match &program.statements[0] {
            Stmt::Let { pattern, .. } => match pattern {
                Pattern::Map { entries, rest, exact, .. } => {
                    assert_eq!(entries.len(), 2);
                    assert_eq!(rest, &Some(Some("rest".to_string())));
                    assert!(!exact);
                }
                other => panic!("unexpected pattern: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }

        let program = parse_ok("let {= a} = m");
        match &program.statements[0] {
            Stmt::Let { pattern, .. } => {
                assert!(matches!(pattern, Pattern::Map { exact: true, .. }));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let program = parse_ok("let {*} = m");
        match &program.statements[0] {
            Stmt::Let { pattern, .. } => {
                assert!(matches!(pattern, Pattern::Map { select_all: true, .. }));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_pinned_pattern() {
        let expr = single_expr("match x { ^expected => true\n _ => false }");
        match expr {
            Expr::Match { cases, .. } => {
                assert!(matches!(&cases[0].pattern, Pattern::Pin { name, .. } if name == "expected"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_try_catch() {
        let expr = single_expr("try { risky() } catch { {code: c} => c }");
        match expr {
            Expr::TryCatch { body, cases, .. } => {
                assert_eq!(body.statements.len(), 1);
                assert_eq!(cases.len(), 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_defer_requires_call() {
        let errors = parse_err("defer 42");
        assert!(errors[0].contains("defer requires a call"));
        assert!(matches!(
            &parse_ok("defer close(f)").statements[0],
            Stmt::Defer { .. }
        ));
    }

    #[test]
    fn test_foreign_declaration() {
        let program = parse_ok("foreign fn now()");
        assert!(matches!(
            &program.statements[0],
            Stmt::Foreign { name, params, .. } if name == "now" && params.is_empty()
        ));
    }

    #[test]
    fn test_newline_terminates_statement() {
        let program = parse_ok("let a = 1\nlet b = 2");
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn test_operator_allows_continuation() {
        let program = parse_ok("let a = 1 +\n  2");
        assert_eq!(program.statements.len(), 1);
    }

    #[test]
    fn test_multiline_collections() {
        let program = parse_ok("let xs = [\n  1,\n  2,\n]\nlet m = {\n  a: 1,\n}");
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn test_assignment_parses_any_target() {
        // the evaluator rejects non-identifier targets at runtime
        assert!(matches!(single_expr("x = 1"), Expr::Assign { .. }));
        assert!(matches!(single_expr("xs[0] = 1"), Expr::Assign { .. }));
    }

    #[test]
    fn test_number_literal_exponent_cap_is_a_parse_error() {
        let errors = parse_err("let x = 1e300");
        assert!(errors[0].contains("exponent out of range"));
    }
}
