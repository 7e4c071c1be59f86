//! Tree-walking evaluator
//!
//! A mutually recursive dispatch over AST node kinds. Language-level failures
//! are `Error` / `RuntimeError` objects that short-circuit sibling
//! evaluation; `Return` and `TailCall` sentinels propagate the same way and
//! are consumed at function boundaries.
//!
//! Tail calls never grow the host stack: a call marked tail by the parser
//! returns a `TailCall` sentinel, and `apply_function` unrolls the chain
//! iteratively (the trampoline).

use crate::actors::message::ActorId;
use crate::env::{DefineFlags, Env, TraceFrame};
use crate::foreign::{self, EvaluatorContext};
use crate::ops;
use crate::pattern::{self, MatchFlags};
use crate::program::Shared;
use crate::value::{
    Foreign, Function, FunctionGroup, MapValue, Object, SliceValue, TagMap, Value, signature_of,
    TAG_EXPORT, TAG_IMPORT,
};
use slug_core::Dec64;
use slug_syntax::ast::{
    Arg, Block, Expr, InfixOp, MatchCase, Pattern, Position, Program, Stmt, TagSpec,
};
use std::sync::Arc;

/// One entry of the call stack; `recur` targets the top.
pub struct CallFrame {
    pub name: String,
    pub func: Arc<Function>,
}

pub struct Evaluator {
    pub shared: Arc<Shared>,
    /// The actor this evaluator instance runs inside.
    pub self_id: ActorId,
    pub module_fqn: String,
    pub file: String,
    pub source: Arc<str>,
    envs: Vec<Env>,
    call_stack: Vec<CallFrame>,
}

impl Evaluator {
    pub fn new(shared: Arc<Shared>, self_id: ActorId) -> Evaluator {
        Evaluator {
            shared,
            self_id,
            module_fqn: "main".to_string(),
            file: "<main>".to_string(),
            source: Arc::from(""),
            envs: Vec::new(),
            call_stack: Vec::new(),
        }
    }

    pub fn set_module(&mut self, fqn: &str, file: &str, source: Arc<str>) {
        self.module_fqn = fqn.to_string();
        self.file = file.to_string();
        self.source = source;
    }

    /// Walk the env stack top-to-bottom collecting frame descriptors.
    pub fn gather_stack_trace(&self) -> Vec<TraceFrame> {
        self.envs.iter().rev().filter_map(|e| e.frame()).collect()
    }

    /// Evaluate a whole program in `env`. The env is pushed on the trace
    /// stack and its deferred statements run on exit; a trailing
    /// `ReturnValue` is unwrapped.
    pub fn eval_program(&mut self, program: &Program, env: &Env) -> Object {
        self.envs.push(env.clone());
        let mut result = Object::nil();
        for stmt in &program.statements {
            result = self.eval_stmt(stmt, env);
            if result.is_abrupt() {
                break;
            }
        }
        result = self.run_deferred(env, result);
        self.envs.pop();
        if let Value::Return(inner) = &result.value {
            return (**inner).clone();
        }
        result
    }

    /// Evaluate a block in a fresh scope; deferred statements registered in
    /// it run LIFO on exit.
    pub fn eval_block(&mut self, block: &Block, outer: &Env) -> Object {
        let env = Env::enclosed(outer);
        let mut result = Object::nil();
        for stmt in &block.statements {
            result = self.eval_stmt(stmt, &env);
            if result.is_abrupt() {
                break;
            }
        }
        self.run_deferred(&env, result)
    }

    /// Run the frame's deferred calls in LIFO order. The handed-in result
    /// stands unless a deferred call itself fails, which replaces it.
    fn run_deferred(&mut self, env: &Env, result: Object) -> Object {
        let deferred = env.take_deferred();
        if deferred.is_empty() {
            return result;
        }
        let mut result = result;
        if result.is_error() {
            env.set_last_error(result.clone());
        }
        for d in deferred.into_iter().rev() {
            let outcome = self.eval_expr(&d.call, &d.env);
            if outcome.is_error() {
                env.set_last_error(outcome.clone());
                result = outcome;
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub fn eval_stmt(&mut self, stmt: &Stmt, env: &Env) -> Object {
        match stmt {
            Stmt::Let {
                pattern,
                value,
                constant,
                tags,
                pos,
            } => self.eval_let(pattern, value, *constant, tags, *pos, env),
            Stmt::Function {
                name, func, tags, ..
            } => self.eval_fn_def(name, func, tags, env),
            Stmt::Foreign {
                name,
                params,
                tags,
                pos,
            } => self.eval_foreign_decl(name, params, tags, *pos, env),
            Stmt::Return { value, .. } => {
                let inner = match value {
                    Some(expr) => self.eval_expr(expr, env),
                    None => Object::nil(),
                };
                if inner.is_error() {
                    return inner;
                }
                Object::return_value(inner)
            }
            Stmt::Defer { call, .. } => {
                env.register_defer(call.clone(), env.clone());
                Object::nil()
            }
            Stmt::Throw { value, .. } => {
                let payload = self.eval_expr(value, env);
                if payload.is_error() {
                    return payload;
                }
                Object::runtime_error(payload, self.gather_stack_trace())
            }
            Stmt::Expr { expr } => self.eval_expr(expr, env),
        }
    }

    fn eval_let(
        &mut self,
        pattern: &Pattern,
        value: &Expr,
        constant: bool,
        tags: &[TagSpec],
        pos: Position,
        env: &Env,
    ) -> Object {
        let mut val = self.eval_expr(value, env);
        if val.is_abrupt() {
            return val;
        }
        match self.eval_tags(tags, env) {
            Ok(tag_map) => val = val.apply_tags_if_present(tag_map),
            Err(e) => return e,
        }
        let flags = MatchFlags {
            constant,
            export: tags.iter().any(|t| t.name == TAG_EXPORT),
            import: val.has_tag(TAG_IMPORT),
        };
        match pattern::bind_pattern(self, pattern, &val, flags, env, env) {
            Ok(true) => Object::nil(),
            Ok(false) => Object::error(format!(
                "{}: pattern did not match value of type {}",
                pos,
                val.type_name()
            )),
            Err(e) => e,
        }
    }

    /// Named function definition. A redefinition with a different signature
    /// in the same frame extends a function group dispatched by arity.
    fn eval_fn_def(&mut self, name: &str, func: &Expr, tags: &[TagSpec], env: &Env) -> Object {
        let mut val = self.eval_expr(func, env);
        if val.is_error() {
            return val;
        }
        match self.eval_tags(tags, env) {
            Ok(tag_map) => val = val.apply_tags_if_present(tag_map),
            Err(e) => return e,
        }
        let new_fn = match &val.value {
            Value::Function(f) => f.clone(),
            _ => return Object::error(format!("fn definition '{}' is not a function", name)),
        };

        let merged = match env.get_local(name).map(|b| b.value) {
            Some(existing) => match &existing.value {
                Value::Function(old) if old.signature != new_fn.signature => {
                    let mut group = FunctionGroup {
                        name: name.to_string(),
                        functions: vec![old.clone()],
                    };
                    group.insert(new_fn);
                    Object::from(Value::FunctionGroup(Arc::new(group)))
                }
                Value::FunctionGroup(old) => {
                    let mut group = FunctionGroup {
                        name: name.to_string(),
                        functions: old.functions.clone(),
                    };
                    group.insert(new_fn);
                    Object::from(Value::FunctionGroup(Arc::new(group)))
                }
                _ => val,
            },
            None => val,
        };

        let flags = DefineFlags {
            mutable: true,
            export: tags.iter().any(|t| t.name == TAG_EXPORT),
            import: false,
        };
        match env.define(name, merged, flags) {
            Ok(()) => Object::nil(),
            Err(e) => Object::error(e),
        }
    }

    /// `foreign fn name(params)` — resolve `moduleFqn.name` in the foreign
    /// registry and install the native callable under the declared name.
    fn eval_foreign_decl(
        &mut self,
        name: &str,
        params: &[slug_syntax::ast::Param],
        tags: &[TagSpec],
        pos: Position,
        env: &Env,
    ) -> Object {
        let full_name = format!("{}.{}", self.module_fqn, name);
        let Some(func) = self.shared.foreign.lookup(&full_name) else {
            return Object::error(format!(
                "{}: unknown foreign function '{}'",
                pos, full_name
            ));
        };
        let mut obj = Object::from(Value::Foreign(Arc::new(Foreign {
            name: full_name,
            params: params.to_vec(),
            signature: signature_of(params),
            func,
        })));
        match self.eval_tags(tags, env) {
            Ok(tag_map) => obj = obj.apply_tags_if_present(tag_map),
            Err(e) => return e,
        }
        let flags = DefineFlags {
            mutable: true,
            export: tags.iter().any(|t| t.name == TAG_EXPORT),
            import: false,
        };
        match env.define(name, obj, flags) {
            Ok(()) => Object::nil(),
            Err(e) => Object::error(e),
        }
    }

    fn eval_tags(&mut self, tags: &[TagSpec], env: &Env) -> Result<TagMap, Object> {
        let mut map = TagMap::new();
        for tag in tags {
            let mut args = Vec::with_capacity(tag.args.len());
            for arg in &tag.args {
                let v = self.eval_expr(arg, env);
                if v.is_error() {
                    return Err(v);
                }
                args.push(v);
            }
            map.insert(tag.name.clone(), args);
        }
        Ok(map)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn eval_expr(&mut self, expr: &Expr, env: &Env) -> Object {
        match expr {
            Expr::Number { value, .. } => Object::number(*value),
            Expr::Str { value, .. } => Object::string(value),
            Expr::Bytes { value, .. } => Object::bytes(value.clone()),
            Expr::Bool { value, .. } => Object::boolean(*value),
            Expr::Nil { .. } => Object::nil(),
            Expr::Ident { name, pos } => self.eval_ident(name, *pos, env),
            Expr::List { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    let v = self.eval_expr(element, env);
                    if v.is_abrupt() {
                        return v;
                    }
                    items.push(v);
                }
                Object::list(items)
            }
            Expr::MapLit { entries, .. } => {
                let mut map = MapValue::new();
                for (key_expr, value_expr) in entries {
                    let key = self.eval_expr(key_expr, env);
                    if key.is_abrupt() {
                        return key;
                    }
                    if !key.is_hashable() {
                        return Object::error(format!(
                            "{}: unusable as map key: {}",
                            key_expr.pos(),
                            key.type_name()
                        ));
                    }
                    let value = self.eval_expr(value_expr, env);
                    if value.is_abrupt() {
                        return value;
                    }
                    map.insert(key, value);
                }
                Object::map(map)
            }
            Expr::Prefix { op, rhs, .. } => {
                let operand = self.eval_expr(rhs, env);
                if operand.is_abrupt() {
                    return operand;
                }
                ops::eval_prefix(*op, operand)
            }
            Expr::Infix { op, lhs, rhs, pos } => self.eval_infix(*op, lhs, rhs, *pos, env),
            Expr::Assign { target, value, pos } => {
                let Expr::Ident { name, .. } = target.as_ref() else {
                    return Object::error(format!("{}: invalid assignment target", pos));
                };
                let v = self.eval_expr(value, env);
                if v.is_abrupt() {
                    return v;
                }
                match env.assign(name, v.clone()) {
                    Ok(()) => v,
                    Err(e) => Object::error(format!("{}: {}", pos, e)),
                }
            }
            Expr::If {
                cond, then, alt, ..
            } => {
                let c = self.eval_expr(cond, env);
                if c.is_abrupt() {
                    return c;
                }
                if c.is_truthy() {
                    self.eval_block(then, env)
                } else {
                    match alt {
                        Some(block) => self.eval_block(block, env),
                        None => Object::nil(),
                    }
                }
            }
            Expr::Function {
                name,
                params,
                body,
                has_tail_call,
                ..
            } => Object::from(Value::Function(Arc::new(Function {
                name: name.clone(),
                params: params.clone(),
                body: Arc::new(body.clone()),
                env: env.clone(),
                signature: signature_of(params),
                has_tail_call: *has_tail_call,
            }))),
            Expr::Call {
                callee,
                args,
                tail,
                pos,
            } => {
                let callee_obj = self.eval_expr(callee, env);
                if callee_obj.is_abrupt() {
                    return callee_obj;
                }
                let arg_values = match self.eval_args(args, env) {
                    Ok(v) => v,
                    Err(e) => return e,
                };
                let name = callee_name(callee);
                if *tail {
                    return Object::tail_call(name, callee_obj, arg_values);
                }
                self.apply_function(env, *pos, &name, callee_obj, arg_values)
            }
            Expr::Recur { args, pos } => {
                let arg_values = match self.eval_args(args, env) {
                    Ok(v) => v,
                    Err(e) => return e,
                };
                match self.call_stack.last() {
                    Some(frame) => Object::tail_call(
                        frame.name.clone(),
                        Object::from(Value::Function(frame.func.clone())),
                        arg_values,
                    ),
                    None => Object::error(format!("{}: recur outside of a function", pos)),
                }
            }
            Expr::Index { target, index, .. } => {
                let t = self.eval_expr(target, env);
                if t.is_abrupt() {
                    return t;
                }
                let i = self.eval_expr(index, env);
                if i.is_abrupt() {
                    return i;
                }
                ops::eval_index(&t, &i)
            }
            Expr::SliceExpr {
                target,
                start,
                end,
                step,
                ..
            } => {
                let t = self.eval_expr(target, env);
                if t.is_abrupt() {
                    return t;
                }
                let slice = SliceValue {
                    start: match self.eval_slice_part(start, env) {
                        Ok(v) => v,
                        Err(e) => return e,
                    },
                    end: match self.eval_slice_part(end, env) {
                        Ok(v) => v,
                        Err(e) => return e,
                    },
                    step: match self.eval_slice_part(step, env) {
                        Ok(v) => v,
                        Err(e) => return e,
                    },
                };
                ops::eval_slice(&t, &slice)
            }
            Expr::Match { subject, cases, .. } => {
                let subj = self.eval_expr(subject, env);
                if subj.is_abrupt() {
                    return subj;
                }
                match self.eval_cases(&subj, cases, env) {
                    Some(result) => result,
                    None => Object::nil(),
                }
            }
            Expr::TryCatch { body, cases, .. } => {
                let result = self.eval_block(body, env);
                if let Value::RuntimeError(re) = &result.value {
                    let payload = re.payload.clone();
                    match self.eval_cases(&payload, cases, env) {
                        Some(handled) => handled,
                        None => result, // uncaught: keep propagating
                    }
                } else {
                    result
                }
            }
        }
    }

    fn eval_ident(&mut self, name: &str, pos: Position, env: &Env) -> Object {
        if let Some(builtin) = self.shared.builtins.get(name) {
            return builtin.clone();
        }
        match env.get(name) {
            Some(value) => value,
            None => Object::error(format!("{}: identifier not found: {}", pos, name)),
        }
    }

    fn eval_infix(
        &mut self,
        op: InfixOp,
        lhs: &Expr,
        rhs: &Expr,
        pos: Position,
        env: &Env,
    ) -> Object {
        // && and || short-circuit and are defined on booleans only
        if matches!(op, InfixOp::And | InfixOp::Or) {
            let left = self.eval_expr(lhs, env);
            if left.is_abrupt() {
                return left;
            }
            let Value::Bool(l) = left.value else {
                return Object::error(format!(
                    "{}: {} requires BOOLEAN operands, got {}",
                    pos,
                    op,
                    left.type_name()
                ));
            };
            if (op == InfixOp::And && !l) || (op == InfixOp::Or && l) {
                return Object::boolean(l);
            }
            let right = self.eval_expr(rhs, env);
            if right.is_abrupt() {
                return right;
            }
            let Value::Bool(r) = right.value else {
                return Object::error(format!(
                    "{}: {} requires BOOLEAN operands, got {}",
                    pos,
                    op,
                    right.type_name()
                ));
            };
            return Object::boolean(r);
        }

        let left = self.eval_expr(lhs, env);
        if left.is_abrupt() {
            return left;
        }
        let right = self.eval_expr(rhs, env);
        if right.is_abrupt() {
            return right;
        }
        ops::eval_infix(op, left, right)
    }

    fn eval_slice_part(
        &mut self,
        part: &Option<Box<Expr>>,
        env: &Env,
    ) -> Result<Option<Dec64>, Object> {
        let Some(expr) = part else {
            return Ok(None);
        };
        let v = self.eval_expr(expr, env);
        if v.is_abrupt() {
            return Err(v);
        }
        match v.value {
            Value::Nil => Ok(None),
            Value::Number(n) => Ok(Some(n)),
            _ => Err(Object::error(format!(
                "{}: slice bound must be a number, got {}",
                expr.pos(),
                v.type_name()
            ))),
        }
    }

    fn eval_args(&mut self, args: &[Arg], env: &Env) -> Result<Vec<Object>, Object> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            let v = self.eval_expr(&arg.expr, env);
            if v.is_abrupt() {
                return Err(v);
            }
            if arg.spread {
                match &v.value {
                    Value::List(items) => out.extend(items.iter().cloned()),
                    _ => {
                        return Err(Object::error(format!(
                            "{}: cannot spread {}",
                            arg.expr.pos(),
                            v.type_name()
                        )));
                    }
                }
            } else {
                out.push(v);
            }
        }
        Ok(out)
    }

    /// Try each case in order; the first whose pattern (and guard) accepts
    /// the subject evaluates its body in the case's scoped environment.
    /// Returns None when no case matched.
    fn eval_cases(
        &mut self,
        subject: &Object,
        cases: &[MatchCase],
        env: &Env,
    ) -> Option<Object> {
        for case in cases {
            let case_env = Env::enclosed(env);
            match pattern::bind_pattern(
                self,
                &case.pattern,
                subject,
                MatchFlags::default(),
                &case_env,
                env,
            ) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => return Some(e),
            }
            if let Some(guard) = &case.guard {
                let g = self.eval_expr(guard, &case_env);
                if g.is_abrupt() {
                    return Some(g);
                }
                if !g.is_truthy() {
                    continue;
                }
            }
            return Some(self.eval_block(&case.body, &case_env));
        }
        None
    }

    // ------------------------------------------------------------------
    // Application
    // ------------------------------------------------------------------

    /// Apply a callable. Handles the three callable kinds and unrolls
    /// `TailCall` sentinels iteratively so tail recursion runs in constant
    /// host-stack space.
    pub fn apply_function(
        &mut self,
        env: &Env,
        pos: Position,
        name: &str,
        callee: Object,
        args: Vec<Object>,
    ) -> Object {
        let mut name = name.to_string();
        let mut callee = callee;
        let mut args = args;
        loop {
            let kind = callee.value.clone();
            match kind {
                Value::Function(func) => {
                    let result = self.invoke_function(pos, &name, &func, args);
                    let unwrapped = match &result.value {
                        Value::Return(inner) => (**inner).clone(),
                        _ => result,
                    };
                    if let Value::TailCall(tc) = &unwrapped.value {
                        name = tc.name.clone();
                        callee = tc.callee.clone();
                        args = tc.args.clone();
                        continue;
                    }
                    return unwrapped;
                }
                Value::FunctionGroup(group) => match group.dispatch(args.len()) {
                    Some(func) => {
                        callee = Object::from(Value::Function(func));
                        continue;
                    }
                    None => {
                        return Object::error(format!(
                            "{}: no signature of '{}' accepts {} argument(s)",
                            pos,
                            group.name,
                            args.len()
                        ));
                    }
                },
                Value::Foreign(f) => {
                    let mut ctx = EvaluatorContext {
                        evaluator: self,
                        env: env.clone(),
                        position: pos,
                    };
                    let result = foreign::invoke(&f, &mut ctx, args);
                    if let Value::TailCall(tc) = &result.value {
                        name = tc.name.clone();
                        callee = tc.callee.clone();
                        args = tc.args.clone();
                        continue;
                    }
                    return result;
                }
                Value::Error(_) | Value::RuntimeError(_) => return callee,
                _ => {
                    return Object::error(format!(
                        "{}: not a function: {}",
                        pos,
                        callee.type_name()
                    ));
                }
            }
        }
    }

    /// One non-trampolined application: push a call frame and a scoped
    /// environment, bind parameters, evaluate the body, run deferred calls.
    fn invoke_function(
        &mut self,
        pos: Position,
        name: &str,
        func: &Arc<Function>,
        args: Vec<Object>,
    ) -> Object {
        self.call_stack.push(CallFrame {
            name: name.to_string(),
            func: func.clone(),
        });
        let fenv = Env::with_frame(
            &func.env,
            TraceFrame {
                function: name.to_string(),
                file: self.file.clone(),
                position: pos,
                source: self.source.clone(),
            },
        );
        self.envs.push(fenv.clone());

        let mut result = match self.bind_params(func, &fenv, args) {
            Ok(()) => {
                let mut result = Object::nil();
                for stmt in &func.body.statements {
                    result = self.eval_stmt(stmt, &fenv);
                    if result.is_abrupt() {
                        break;
                    }
                }
                result
            }
            Err(e) => e,
        };
        result = self.run_deferred(&fenv, result);

        self.envs.pop();
        self.call_stack.pop();
        result
    }

    /// Positional binding: variadic tail absorbs the remainder as a List,
    /// unspecified parameters take their default (evaluated lazily in the
    /// new env) or nil.
    fn bind_params(
        &mut self,
        func: &Function,
        fenv: &Env,
        args: Vec<Object>,
    ) -> Result<(), Object> {
        let params = &func.params;
        let variadic = params.last().is_some_and(|p| p.variadic);
        let fixed = if variadic {
            params.len() - 1
        } else {
            params.len()
        };
        if !variadic && args.len() > params.len() {
            return Err(Object::error(format!(
                "wrong number of arguments: signature {} takes at most {}, got {}",
                func.signature,
                params.len(),
                args.len()
            )));
        }
        let mutable = DefineFlags {
            mutable: true,
            ..Default::default()
        };
        for (i, param) in params.iter().take(fixed).enumerate() {
            let value = match args.get(i) {
                Some(v) => v.clone(),
                None => match &param.default {
                    Some(default_expr) => {
                        let v = self.eval_expr(default_expr, fenv);
                        if v.is_error() {
                            return Err(v);
                        }
                        v
                    }
                    None => Object::nil(),
                },
            };
            fenv.define(&param.name, value, mutable).map_err(Object::error)?;
        }
        if variadic {
            let rest: Vec<Object> = args.get(fixed..).map(|s| s.to_vec()).unwrap_or_default();
            let param = params.last().expect("variadic tail");
            fenv.define(&param.name, Object::list(rest), mutable)
                .map_err(Object::error)?;
        }
        Ok(())
    }
}

fn callee_name(callee: &Expr) -> String {
    match callee {
        Expr::Ident { name, .. } => name.clone(),
        Expr::Function {
            name: Some(name), ..
        } => name.clone(),
        _ => "(anonymous)".to_string(),
    }
}
