//! Host builtins
//!
//! Installed through the foreign bridge at interpreter construction, one
//! registration site per builtin. Identifier resolution consults this table
//! before the environment, so builtins behave like ambient globals.

use crate::actors::handler::{EvalHandler, message_to_object};
use crate::actors::kernel::{Kernel, KernelError};
use crate::actors::message::{ActorId, Payload, Right};
use crate::foreign::{EvaluatorContext, NativeFn};
use crate::modules;
use crate::value::{Foreign, MapValue, Object, SliceValue, Value};
use slug_core::Dec64;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Build the builtin table consulted by identifier resolution.
pub fn builtin_objects() -> HashMap<String, Object> {
    let mut table = HashMap::new();
    let mut add = |name: &str, func: NativeFn| {
        table.insert(
            name.to_string(),
            Object::from(Value::Foreign(Arc::new(Foreign {
                name: name.to_string(),
                params: Vec::new(),
                signature: "(...)".to_string(),
                func,
            }))),
        );
    };

    // Values
    add("len", builtin_len);
    add("type", builtin_type);
    add("string", builtin_string);
    add("inspect", builtin_inspect);
    add("first", builtin_first);
    add("rest", builtin_rest);
    add("keys", builtin_keys);
    add("values", builtin_values);
    add("slice", builtin_slice);

    // I/O
    add("print", builtin_print);
    add("println", builtin_println);

    // Modules
    add("import", builtin_import);

    // Actors
    add("self", builtin_self);
    add("spawn", builtin_spawn);
    add("send", builtin_send);
    add("call", builtin_call);
    add("receive", builtin_receive);
    add("reply", builtin_reply);
    add("register", builtin_register);
    add("unregister", builtin_unregister);
    add("whereis", builtin_whereis);
    add("registered", builtin_registered);
    add("grant", builtin_grant);
    add("alias", builtin_alias);
    add("exit", builtin_exit);
    add("cancel_children", builtin_cancel_children);
    add("sleep", builtin_sleep);

    table
}

fn arity_error(name: &str, expected: &str, got: usize) -> Object {
    Object::error(format!(
        "wrong number of arguments to {}: expected {}, got {}",
        name, expected, got
    ))
}

fn actor_target(kernel: &Kernel, v: &Object) -> Option<ActorId> {
    match &v.value {
        Value::Number(n) => Some(ActorId(n.to_i64() as u64)),
        Value::Str(name) => kernel.lookup(name),
        _ => None,
    }
}

fn status_map(ok: bool, detail: Option<(&str, Object)>) -> Object {
    let mut map = MapValue::new();
    map.insert(Object::string("ok"), Object::boolean(ok));
    if let Some((key, value)) = detail {
        map.insert(Object::string(key), value);
    }
    Object::map(map)
}

// ---------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------

fn builtin_len(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("len", "1", args.len());
    }
    match &args[0].value {
        Value::Str(s) => Object::int(s.chars().count() as i64),
        Value::Bytes(b) => Object::int(b.len() as i64),
        Value::List(items) => Object::int(items.len() as i64),
        Value::Map(map) => Object::int(map.len() as i64),
        _ => Object::error(format!("len not supported on {}", args[0].type_name())),
    }
}

fn builtin_type(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("type", "1", args.len());
    }
    Object::string(args[0].type_name())
}

fn builtin_string(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("string", "1", args.len());
    }
    Object::string(args[0].inspect())
}

fn builtin_inspect(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("inspect", "1", args.len());
    }
    Object::string(args[0].inspect_quoted())
}

fn builtin_first(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("first", "1", args.len());
    }
    match &args[0].value {
        Value::List(items) => items.first().cloned().unwrap_or_else(Object::nil),
        Value::Str(s) => s
            .chars()
            .next()
            .map(|c| Object::string(c.to_string()))
            .unwrap_or_else(Object::nil),
        Value::Bytes(b) => b
            .first()
            .map(|byte| Object::int(*byte as i64))
            .unwrap_or_else(Object::nil),
        _ => Object::error(format!("first not supported on {}", args[0].type_name())),
    }
}

fn builtin_rest(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("rest", "1", args.len());
    }
    match &args[0].value {
        Value::List(items) => {
            if items.is_empty() {
                Object::nil()
            } else {
                Object::list(items[1..].to_vec())
            }
        }
        Value::Str(s) => {
            let mut chars = s.chars();
            match chars.next() {
                Some(_) => Object::string(chars.as_str()),
                None => Object::nil(),
            }
        }
        Value::Bytes(b) => {
            if b.is_empty() {
                Object::nil()
            } else {
                Object::bytes(b[1..].to_vec())
            }
        }
        _ => Object::error(format!("rest not supported on {}", args[0].type_name())),
    }
}

fn builtin_keys(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("keys", "1", args.len());
    }
    match &args[0].value {
        Value::Map(map) => {
            let mut keys: Vec<Object> = map.entries.values().map(|e| e.key.clone()).collect();
            keys.sort_by_key(|k| k.inspect_quoted());
            Object::list(keys)
        }
        _ => Object::error(format!("keys not supported on {}", args[0].type_name())),
    }
}

fn builtin_values(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("values", "1", args.len());
    }
    match &args[0].value {
        Value::Map(map) => {
            let mut entries: Vec<_> = map.entries.values().collect();
            entries.sort_by_key(|e| e.key.inspect_quoted());
            Object::list(entries.iter().map(|e| e.value.clone()).collect())
        }
        _ => Object::error(format!("values not supported on {}", args[0].type_name())),
    }
}

fn builtin_slice(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() > 3 {
        return arity_error("slice", "at most 3", args.len());
    }
    let part = |i: usize| -> Result<Option<Dec64>, Object> {
        match args.get(i).map(|a| &a.value) {
            None | Some(Value::Nil) => Ok(None),
            Some(Value::Number(n)) => Ok(Some(*n)),
            Some(_) => Err(Object::error(format!(
                "slice bound must be a number, got {}",
                args[i].type_name()
            ))),
        }
    };
    let start = match part(0) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let end = match part(1) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let step = match part(2) {
        Ok(v) => v,
        Err(e) => return e,
    };
    Object::from(Value::Slice(Arc::new(SliceValue { start, end, step })))
}

// ---------------------------------------------------------------------
// I/O
// ---------------------------------------------------------------------

fn render_args(args: &[Object]) -> String {
    args.iter()
        .map(|a| a.inspect())
        .collect::<Vec<_>>()
        .join(" ")
}

fn builtin_print(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    use std::io::Write;
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "{}", render_args(&args));
    let _ = stdout.flush();
    Object::nil()
}

fn builtin_println(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    println!("{}", render_args(&args));
    Object::nil()
}

// ---------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------

fn builtin_import(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("import", "1", args.len());
    }
    let Value::Str(fqn) = &args[0].value else {
        return Object::error(format!(
            "import expects a module name, got {}",
            args[0].type_name()
        ));
    };
    let fqn = fqn.to_string();
    let loaded = ctx.load_module(&fqn);
    match &loaded.value {
        Value::Module(module) => modules::exports_map(module),
        _ => loaded, // error from the loader
    }
}

// ---------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------

fn builtin_self(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if !args.is_empty() {
        return arity_error("self", "0", args.len());
    }
    let (_, self_id) = ctx.act();
    Object::int(self_id.as_i64())
}

/// `spawn(fn, extra…)` or `spawn(name, fn, extra…)`: a new actor whose
/// handler runs `fn(msg, extra…)` per message.
fn builtin_spawn(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    let (name, rest) = match args.first().map(|a| &a.value) {
        Some(Value::Str(name)) => (Some(name.to_string()), &args[1..]),
        _ => (None, &args[..]),
    };
    let Some(handler_fn) = rest.first() else {
        return arity_error("spawn", "a handler function", args.len());
    };
    if !matches!(
        handler_fn.value,
        Value::Function(_) | Value::FunctionGroup(_) | Value::Foreign(_)
    ) {
        return Object::error(format!(
            "spawn expects a function handler, got {}",
            handler_fn.type_name()
        ));
    }
    let (kernel, self_id) = ctx.act();
    let handler = EvalHandler {
        shared: ctx.evaluator.shared.clone(),
        handler_fn: handler_fn.clone(),
        extra_args: rest[1..].to_vec(),
        module_fqn: ctx.evaluator.module_fqn.clone(),
        file: ctx.evaluator.file.clone(),
        source: ctx.evaluator.source.clone(),
    };
    match kernel.spawn_child(
        Some(self_id),
        name.as_deref(),
        Kernel::default_rights(),
        Box::new(handler),
    ) {
        Ok(id) => Object::int(id.as_i64()),
        Err(e) => Object::error(format!("spawn failed: {}", e)),
    }
}

fn builtin_send(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 2 {
        return arity_error("send", "2", args.len());
    }
    let (kernel, self_id) = ctx.act();
    let Some(target) = actor_target(&kernel, &args[0]) else {
        return Object::boolean(false);
    };
    let delivered = kernel
        .send_async(self_id, target, Payload::Value(args[1].clone()))
        .is_ok();
    Object::boolean(delivered)
}

/// Synchronous request-reply. Returns `{ok: true, value: reply}` or
/// `{ok: false, error: …}` so callers handle failure without a catch.
fn builtin_call(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() < 2 || args.len() > 3 {
        return arity_error("call", "2 or 3", args.len());
    }
    let timeout = match args.get(2).map(|a| &a.value) {
        None => 5000,
        Some(Value::Number(n)) => n.to_i64(),
        Some(_) => {
            return Object::error(format!(
                "call timeout must be a number, got {}",
                args[2].type_name()
            ));
        }
    };
    let (kernel, self_id) = ctx.act();
    let Some(target) = actor_target(&kernel, &args[0]) else {
        return status_map(false, Some(("error", Object::string("no such actor"))));
    };
    match kernel.send_sync(self_id, target, Payload::Value(args[1].clone()), timeout) {
        Ok(reply) => {
            let value = match reply.payload {
                Payload::Value(obj) => obj,
                other => Object::string(other.type_tag()),
            };
            status_map(true, Some(("value", value)))
        }
        Err(KernelError::Timeout) => {
            status_map(false, Some(("error", Object::string("timeout"))))
        }
        Err(e) => status_map(false, Some(("error", Object::string(e.to_string())))),
    }
}

fn builtin_receive(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() > 1 {
        return arity_error("receive", "at most 1", args.len());
    }
    let timeout = match args.first().map(|a| &a.value) {
        None => -1,
        Some(Value::Number(n)) => n.to_i64(),
        Some(_) => {
            return Object::error(format!(
                "receive timeout must be a number, got {}",
                args[0].type_name()
            ));
        }
    };
    match ctx.wait_for_message(timeout) {
        Ok(msg) => message_to_object(&msg),
        Err(KernelError::Timeout) => Object::nil(),
        Err(e) => Object::error(format!("receive failed: {}", e)),
    }
}

/// `reply(msg, value)`: answer a received message map, preserving its
/// correlation token.
fn builtin_reply(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 2 {
        return arity_error("reply", "2", args.len());
    }
    let Value::Map(map) = &args[0].value else {
        return Object::error(format!(
            "reply expects a message map, got {}",
            args[0].type_name()
        ));
    };
    let field = |name: &str| map.get(&Object::string(name)).cloned();
    let target = field("reply_to")
        .filter(|v| !v.is_nil())
        .or_else(|| field("sender"));
    let Some(target) = target else {
        return Object::boolean(false);
    };
    let (kernel, self_id) = ctx.act();
    let Some(to) = actor_target(&kernel, &target) else {
        return Object::boolean(false);
    };
    let correlation = match field("correlation").map(|v| v.value) {
        Some(Value::Number(n)) => Some(n.to_i64() as u64),
        _ => None,
    };
    let delivered = kernel
        .send_reply(self_id, to, correlation, Payload::Value(args[1].clone()))
        .is_ok();
    Object::boolean(delivered)
}

fn builtin_register(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 2 {
        return arity_error("register", "2", args.len());
    }
    let Value::Str(name) = &args[0].value else {
        return Object::error(format!(
            "register expects a name, got {}",
            args[0].type_name()
        ));
    };
    let (kernel, _) = ctx.act();
    let Some(id) = actor_target(&kernel, &args[1]) else {
        return Object::boolean(false);
    };
    match kernel.register(name, id) {
        Ok(()) => Object::boolean(true),
        Err(e) => Object::error(e.to_string()),
    }
}

fn builtin_unregister(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("unregister", "1", args.len());
    }
    let Value::Str(name) = &args[0].value else {
        return Object::error(format!(
            "unregister expects a name, got {}",
            args[0].type_name()
        ));
    };
    let (kernel, _) = ctx.act();
    kernel.unregister(name);
    Object::nil()
}

fn builtin_whereis(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("whereis", "1", args.len());
    }
    let Value::Str(name) = &args[0].value else {
        return Object::error(format!(
            "whereis expects a name, got {}",
            args[0].type_name()
        ));
    };
    let (kernel, _) = ctx.act();
    match kernel.actor_by_name(name) {
        Some(id) => Object::int(id.as_i64()),
        None => Object::nil(),
    }
}

fn builtin_registered(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if !args.is_empty() {
        return arity_error("registered", "0", args.len());
    }
    let (kernel, _) = ctx.act();
    Object::list(kernel.registered().into_iter().map(Object::string).collect())
}

/// `grant(actor, payload_type, right)`: augment another actor's rights.
fn builtin_grant(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 3 {
        return arity_error("grant", "3", args.len());
    }
    let (kernel, _) = ctx.act();
    let Some(other) = actor_target(&kernel, &args[0]) else {
        return Object::boolean(false);
    };
    let Value::Str(target) = &args[1].value else {
        return Object::error(format!(
            "grant expects a payload type, got {}",
            args[1].type_name()
        ));
    };
    let Value::Str(right_name) = &args[2].value else {
        return Object::error(format!(
            "grant expects a right name, got {}",
            args[2].type_name()
        ));
    };
    let right = match right_name.as_ref() {
        "none" => Right::None,
        "write" => Right::Write,
        "read" => Right::Read,
        "exec" => Right::Exec,
        other => return Object::error(format!("unknown right '{}'", other)),
    };
    match kernel.grant(other, target, right) {
        Ok(()) => Object::boolean(true),
        Err(e) => Object::error(e.to_string()),
    }
}

/// `alias(alias, target)`: payload-type alias for this actor's rights table.
fn builtin_alias(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 2 {
        return arity_error("alias", "2", args.len());
    }
    let (Value::Str(alias), Value::Str(target)) = (&args[0].value, &args[1].value) else {
        return Object::error("alias expects two strings".to_string());
    };
    let (kernel, self_id) = ctx.act();
    match kernel.register_alias(self_id, alias, target) {
        Ok(()) => Object::boolean(true),
        Err(e) => Object::error(e.to_string()),
    }
}

/// `exit(reason?)`: enqueue a cooperative Exit to this actor.
fn builtin_exit(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() > 1 {
        return arity_error("exit", "at most 1", args.len());
    }
    let reason = args.into_iter().next().unwrap_or_else(Object::nil);
    let (kernel, self_id) = ctx.act();
    let _ = kernel.send_async(self_id, self_id, Payload::Exit { reason });
    Object::nil()
}

/// `cancel_children(reason?)`: fail-fast sibling cancellation.
fn builtin_cancel_children(ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() > 1 {
        return arity_error("cancel_children", "at most 1", args.len());
    }
    let reason = args.into_iter().next().unwrap_or_else(Object::nil);
    let (kernel, self_id) = ctx.act();
    kernel.terminate_children(self_id, reason);
    Object::nil()
}

fn builtin_sleep(_ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    if args.len() != 1 {
        return arity_error("sleep", "1", args.len());
    }
    let Value::Number(ms) = &args[0].value else {
        return Object::error(format!(
            "sleep expects milliseconds, got {}",
            args[0].type_name()
        ));
    };
    let ms = ms.to_i64().max(0) as u64;
    may::coroutine::sleep(Duration::from_millis(ms));
    Object::nil()
}
