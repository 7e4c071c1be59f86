//! Tail-position marking
//!
//! Runs once over a freshly parsed program. Calls that are the last evaluated
//! expression of a function body get their `tail` flag set, and every
//! function literal learns whether its body contains a tail call (`recur`
//! always counts). The evaluator turns marked calls into `TailCall` sentinels
//! that the application trampoline unrolls, so recursion depth never grows
//! the host stack.
//!
//! Calls inside a `try` body are never marked: a trampolined continuation
//! would run outside the catch.

use crate::ast::{Arg, Block, Expr, Program, Stmt};

/// Mark every function literal in the program.
pub fn mark_program(program: &mut Program) {
    let mut walker = Walker { found: false };
    for stmt in &mut program.statements {
        walker.stmt(stmt, false, false);
    }
}

struct Walker {
    /// Whether the function currently being walked contains a tail call.
    found: bool,
}

impl Walker {
    fn block(&mut self, block: &mut Block, tail: bool, protected: bool) {
        let last = block.statements.len().saturating_sub(1);
        for (i, stmt) in block.statements.iter_mut().enumerate() {
            self.stmt(stmt, tail && i == last, protected);
        }
    }

    fn stmt(&mut self, stmt: &mut Stmt, tail: bool, protected: bool) {
        match stmt {
            Stmt::Let { value, tags, .. } => {
                for tag in tags {
                    for arg in &mut tag.args {
                        self.expr(arg, false, protected);
                    }
                }
                self.expr(value, false, protected);
            }
            Stmt::Function { func, .. } => self.expr(func, false, protected),
            Stmt::Foreign { .. } => {}
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    // return leaves the function immediately, so its call is a
                    // tail call anywhere outside a try body
                    self.expr(value, !protected, protected);
                }
            }
            Stmt::Defer { call, .. } => self.expr(call, false, protected),
            Stmt::Throw { value, .. } => self.expr(value, false, protected),
            Stmt::Expr { expr } => self.expr(expr, tail, protected),
        }
    }

    fn expr(&mut self, expr: &mut Expr, tail: bool, protected: bool) {
        match expr {
            Expr::Number { .. }
            | Expr::Str { .. }
            | Expr::Bytes { .. }
            | Expr::Bool { .. }
            | Expr::Nil { .. }
            | Expr::Ident { .. } => {}
            Expr::List { elements, .. } => {
                for e in elements {
                    self.expr(e, false, protected);
                }
            }
            Expr::MapLit { entries, .. } => {
                for (k, v) in entries {
                    self.expr(k, false, protected);
                    self.expr(v, false, protected);
                }
            }
            Expr::Prefix { rhs, .. } => self.expr(rhs, false, protected),
            Expr::Infix { lhs, rhs, .. } => {
                self.expr(lhs, false, protected);
                self.expr(rhs, false, protected);
            }
            Expr::Assign { target, value, .. } => {
                self.expr(target, false, protected);
                self.expr(value, false, protected);
            }
            Expr::If {
                cond, then, alt, ..
            } => {
                self.expr(cond, false, protected);
                self.block(then, tail, protected);
                if let Some(alt) = alt {
                    self.block(alt, tail, protected);
                }
            }
            Expr::Function {
                body,
                has_tail_call,
                params,
                ..
            } => {
                for param in params {
                    if let Some(default) = &mut param.default {
                        self.expr(default, false, false);
                    }
                }
                let saved = self.found;
                self.found = false;
                self.block(body, true, false);
                *has_tail_call = self.found;
                self.found = saved;
            }
            Expr::Call {
                callee,
                args,
                tail: tail_flag,
                ..
            } => {
                if tail {
                    *tail_flag = true;
                    self.found = true;
                }
                self.expr(callee, false, protected);
                self.args(args, protected);
            }
            Expr::Recur { args, .. } => {
                self.found = true;
                self.args(args, protected);
            }
            Expr::Index { target, index, .. } => {
                self.expr(target, false, protected);
                self.expr(index, false, protected);
            }
            Expr::SliceExpr {
                target,
                start,
                end,
                step,
                ..
            } => {
                self.expr(target, false, protected);
                for part in [start, end, step].into_iter().flatten() {
                    self.expr(part, false, protected);
                }
            }
            Expr::Match { subject, cases, .. } => {
                self.expr(subject, false, protected);
                for case in cases {
                    if let Some(guard) = &mut case.guard {
                        self.expr(guard, false, protected);
                    }
                    self.block(&mut case.body, tail, protected);
                }
            }
            Expr::TryCatch { body, cases, .. } => {
                self.block(body, false, true);
                for case in cases {
                    if let Some(guard) = &mut case.guard {
                        self.expr(guard, false, protected);
                    }
                    self.block(&mut case.body, tail, protected);
                }
            }
        }
    }

    fn args(&mut self, args: &mut [Arg], protected: bool) {
        for arg in args {
            self.expr(&mut arg.expr, false, protected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn parse_marked(source: &str) -> Program {
        let mut program = Parser::new(source).parse().expect("parse");
        mark_program(&mut program);
        program
    }

    fn top_fn(program: &Program) -> (&Block, bool) {
        for stmt in &program.statements {
            let func = match stmt {
                Stmt::Function { func, .. } => func,
                Stmt::Let { value, .. } => value,
                _ => continue,
            };
            if let Expr::Function {
                body,
                has_tail_call,
                ..
            } = func
            {
                return (body, *has_tail_call);
            }
        }
        panic!("no function in program");
    }

    fn is_tail_call(expr: &Expr) -> bool {
        matches!(expr, Expr::Call { tail: true, .. })
    }

    #[test]
    fn test_last_call_is_tail() {
        let program = parse_marked("fn f(n) { g(n) }");
        let (body, has) = top_fn(&program);
        assert!(has);
        match &body.statements[0] {
            Stmt::Expr { expr } => assert!(is_tail_call(expr)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_non_final_call_is_not_tail() {
        let program = parse_marked("fn f(n) { g(n)\n 1 }");
        let (body, has) = top_fn(&program);
        assert!(!has);
        match &body.statements[0] {
            Stmt::Expr { expr } => assert!(!is_tail_call(expr)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_call_inside_expression_is_not_tail() {
        let program = parse_marked("fn f(n) { 1 + g(n) }");
        let (_, has) = top_fn(&program);
        assert!(!has);
    }

    #[test]
    fn test_if_branches_are_tail_positions() {
        let program = parse_marked("fn f(n) { if n > 0 { f(n - 1) } else { 0 } }");
        let (_, has) = top_fn(&program);
        assert!(has);
    }

    #[test]
    fn test_return_is_tail_position() {
        let program = parse_marked("fn f(n) { return g(n)\n 1 }");
        let (body, has) = top_fn(&program);
        assert!(has);
        match &body.statements[0] {
            Stmt::Return {
                value: Some(expr), ..
            } => assert!(is_tail_call(expr)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_recur_sets_flag() {
        let program = parse_marked("fn f(n, acc) { if n == 0 { acc } else { recur(n - 1, acc * n) } }");
        let (_, has) = top_fn(&program);
        assert!(has);
    }

    #[test]
    fn test_try_body_is_protected() {
        let program = parse_marked("fn f() { try { g() } catch { _ => 0 } }");
        let (body, has) = top_fn(&program);
        assert!(!has);
        match &body.statements[0] {
            Stmt::Expr {
                expr: Expr::TryCatch { body, .. },
            } => match &body.statements[0] {
                Stmt::Expr { expr } => assert!(!is_tail_call(expr)),
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_nested_function_does_not_leak_tail_state() {
        let program = parse_marked("fn outer() { let inner = fn(n) { inner(n) }\n 42 }");
        let (_, has) = top_fn(&program);
        assert!(!has);
    }

    #[test]
    fn test_match_case_bodies_are_tail_positions() {
        let program = parse_marked("fn f(xs) { match xs { [h, ...t] => f(t)\n _ => 0 } }");
        let (_, has) = top_fn(&program);
        assert!(has);
    }
}
