//! Slug Syntax: source text in, AST out
//!
//! The front end for the Slug language: a hand-rolled lexer with line/column
//! tracking, a recursive-descent + Pratt parser, and the tail-position pass
//! that annotates calls before the evaluator ever sees the tree.
//!
//! Parse errors are reported as strings carrying 1-indexed line:column
//! positions; the runtime joins them when a module fails to load.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod tailpos;
pub mod token;

pub use ast::{Arg, Block, Expr, InfixOp, MatchCase, Param, Pattern, PrefixOp, Program, Stmt};
pub use parser::Parser;

/// Parse a complete source file, running the tail-position pass.
///
/// Returns the program or all collected parse errors.
pub fn parse_source(source: &str) -> Result<Program, Vec<String>> {
    let mut parser = Parser::new(source);
    let mut program = parser.parse()?;
    tailpos::mark_program(&mut program);
    Ok(program)
}
