//! Pattern matching
//!
//! Implements the full pattern contract: wildcard, pinned identifier,
//! literal, binding identifier, spread, alternation, list patterns (also
//! over Bytes, whose elements match as Numbers) and map patterns with
//! exact / rest / select-all forms.
//!
//! Bindings are atomic: each whole-pattern attempt collects bindings in a
//! scratch frame and promotes them to the target environment only when the
//! entire pattern matched. Pinned identifiers resolve in the enclosing
//! environment, so pattern variables cannot shadow them.

use crate::env::{DefineFlags, Env};
use crate::evaluator::Evaluator;
use crate::value::{MapKey, MapValue, Object, Value};
use slug_syntax::ast::Pattern;
use std::collections::HashSet;

/// Binding disposition for a whole match.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchFlags {
    pub constant: bool,
    pub export: bool,
    pub import: bool,
}

impl MatchFlags {
    fn define_flags(self) -> DefineFlags {
        DefineFlags {
            mutable: !self.constant,
            export: self.export,
            import: self.import,
        }
    }
}

/// Match `pattern` against `value`, promoting bindings into `target` only on
/// success. Pins and literal expressions resolve in `pin_env`.
pub fn bind_pattern(
    ev: &mut Evaluator,
    pattern: &Pattern,
    value: &Object,
    flags: MatchFlags,
    target: &Env,
    pin_env: &Env,
) -> Result<bool, Object> {
    let scratch = Env::new();
    if !pattern_matches(ev, pattern, value, flags, &scratch, pin_env)? {
        return Ok(false);
    }
    scratch.promote_into(target).map_err(Object::error)?;
    Ok(true)
}

/// Match one pattern, collecting bindings into `scope`.
pub fn pattern_matches(
    ev: &mut Evaluator,
    pattern: &Pattern,
    value: &Object,
    flags: MatchFlags,
    scope: &Env,
    pin_env: &Env,
) -> Result<bool, Object> {
    match pattern {
        Pattern::Wildcard { .. } => Ok(true),
        Pattern::Ident { name, .. } => {
            scope
                .define(name, value.clone(), flags.define_flags())
                .map_err(Object::error)?;
            Ok(true)
        }
        Pattern::Pin { name, pos } => match pin_env.get(name) {
            Some(pinned) => Ok(pinned == *value),
            None => Err(Object::error(format!(
                "{}: identifier not found: {}",
                pos, name
            ))),
        },
        Pattern::Literal { expr, .. } => {
            let literal = ev.eval_expr(expr, pin_env);
            if literal.is_error() {
                return Err(literal);
            }
            Ok(literal == *value)
        }
        Pattern::Spread { name, .. } => {
            if let Some(name) = name {
                scope
                    .define(name, value.clone(), flags.define_flags())
                    .map_err(Object::error)?;
            }
            Ok(true)
        }
        Pattern::Alt { alternatives, .. } => {
            // Scoped per alternative: a failed alternative leaves nothing.
            for alt in alternatives {
                let scratch = Env::new();
                if pattern_matches(ev, alt, value, flags, &scratch, pin_env)? {
                    scratch.promote_into(scope).map_err(Object::error)?;
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Pattern::List { elements, .. } => match_list(ev, elements, value, flags, scope, pin_env),
        Pattern::Map {
            entries,
            rest,
            exact,
            select_all,
            ..
        } => match_map(
            ev, entries, rest, *exact, *select_all, value, flags, scope, pin_env,
        ),
    }
}

fn match_list(
    ev: &mut Evaluator,
    elements: &[Pattern],
    value: &Object,
    flags: MatchFlags,
    scope: &Env,
    pin_env: &Env,
) -> Result<bool, Object> {
    // Bytes match list patterns element-wise, each byte as a Number.
    enum Elems<'v> {
        List(&'v [Object]),
        Bytes(&'v [u8]),
    }
    let elems = match &value.value {
        Value::List(items) => Elems::List(items),
        Value::Bytes(bytes) => Elems::Bytes(bytes),
        _ => return Ok(false),
    };
    let len = match &elems {
        Elems::List(items) => items.len(),
        Elems::Bytes(bytes) => bytes.len(),
    };
    let spread_last = matches!(elements.last(), Some(Pattern::Spread { .. }));
    let fixed = if spread_last {
        elements.len() - 1
    } else {
        elements.len()
    };
    if spread_last {
        if len < fixed {
            return Ok(false);
        }
    } else if len != fixed {
        return Ok(false);
    }

    let scratch = Env::new();
    let element_at = |i: usize| match &elems {
        Elems::List(items) => items[i].clone(),
        Elems::Bytes(bytes) => Object::int(bytes[i] as i64),
    };
    for (i, sub) in elements.iter().take(fixed).enumerate() {
        if !pattern_matches(ev, sub, &element_at(i), flags, &scratch, pin_env)? {
            return Ok(false);
        }
    }
    if spread_last {
        let residue = match &elems {
            Elems::List(items) => Object::list(items[fixed..].to_vec()),
            Elems::Bytes(bytes) => Object::bytes(bytes[fixed..].to_vec()),
        };
        if !pattern_matches(
            ev,
            elements.last().expect("spread checked"),
            &residue,
            flags,
            &scratch,
            pin_env,
        )? {
            return Ok(false);
        }
    }
    scratch.promote_into(scope).map_err(Object::error)?;
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
fn match_map(
    ev: &mut Evaluator,
    entries: &[slug_syntax::ast::MapPatternEntry],
    rest: &Option<Option<String>>,
    exact: bool,
    select_all: bool,
    value: &Object,
    flags: MatchFlags,
    scope: &Env,
    pin_env: &Env,
) -> Result<bool, Object> {
    let map = match &value.value {
        Value::Map(map) => map,
        _ => return Ok(false),
    };

    if select_all {
        // Copy every string-keyed pair straight into the current scope.
        for entry in map.entries.values() {
            if let Value::Str(name) = &entry.key.value {
                scope
                    .define(name, entry.value.clone(), flags.define_flags())
                    .map_err(Object::error)?;
            }
        }
        return Ok(true);
    }

    let scratch = Env::new();
    let mut used: HashSet<MapKey> = HashSet::new();
    for entry in entries {
        let key = ev.eval_expr(&entry.key, pin_env);
        if key.is_error() {
            return Err(key);
        }
        let Some(map_key) = MapKey::from_object(&key) else {
            return Err(Object::error(format!(
                "unusable as map key: {}",
                key.type_name()
            )));
        };
        let Some(found) = map.entries.get(&map_key) else {
            return Ok(false);
        };
        if !pattern_matches(ev, &entry.pattern, &found.value.clone(), flags, &scratch, pin_env)? {
            return Ok(false);
        }
        used.insert(map_key);
    }

    if exact && used.len() != map.len() {
        return Ok(false);
    }

    if let Some(rest_name) = rest {
        let mut residue = MapValue::new();
        for (key, entry) in &map.entries {
            if !used.contains(key) {
                residue.entries.insert(key.clone(), entry.clone());
            }
        }
        if let Some(name) = rest_name {
            scratch
                .define(name, Object::map(residue), flags.define_flags())
                .map_err(Object::error)?;
        }
    }

    scratch.promote_into(scope).map_err(Object::error)?;
    Ok(true)
}
