//! Module loader
//!
//! Modules are memoized by fully qualified name. A dotted FQN maps to a
//! relative path with a `.slug` suffix, resolved against the project root
//! first and `${SLUG_HOME}/lib` second. Sandbox mode restricts loading to
//! the configured allow list.

use crate::env::{Env, TraceFrame};
use crate::evaluator::Evaluator;
use crate::value::{MapValue, Module, Object, TagMap, Value, TAG_IMPORT};
use crate::config;
use slug_syntax::ast::Position;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

const LOCK_MSG: &str = "module cache lock poisoned";

/// Load (or fetch from cache) the module named `fqn`, returning the Module
/// object or an Error object.
pub fn load_module(ev: &mut Evaluator, fqn: &str) -> Object {
    let settings = &ev.shared.settings;
    if settings.sandbox_enabled() && !settings.sandbox_allowed().iter().any(|m| m == fqn) {
        return Object::error(format!("module not allowed: {}", fqn));
    }

    if let Some(cached) = ev.shared.modules.read().expect(LOCK_MSG).get(fqn) {
        debug!(module = fqn, "module cache hit");
        return cached.clone();
    }

    // The cache fills only after the body evaluates; a second load of an
    // in-flight FQN is a circular import.
    if !ev
        .shared
        .loading
        .lock()
        .expect(LOCK_MSG)
        .insert(fqn.to_string())
    {
        return Object::error(format!("circular module import: {}", fqn));
    }
    let result = load_uncached(ev, fqn);
    ev.shared.loading.lock().expect(LOCK_MSG).remove(fqn);
    result
}

fn load_uncached(ev: &mut Evaluator, fqn: &str) -> Object {
    let settings = &ev.shared.settings;
    let mut rel = PathBuf::new();
    for part in fqn.split('.') {
        rel.push(part);
    }
    rel.set_extension("slug");

    let candidates = [settings.root_path.join(&rel), config::lib_dir().join(&rel)];
    let mut found: Option<(PathBuf, String)> = None;
    for candidate in &candidates {
        match std::fs::read_to_string(candidate) {
            Ok(text) => {
                found = Some((candidate.clone(), text));
                break;
            }
            Err(_) => continue,
        }
    }
    let Some((path, text)) = found else {
        return Object::error(format!(
            "cannot load module '{}': tried {} and {}",
            fqn,
            candidates[0].display(),
            candidates[1].display()
        ));
    };
    debug!(module = fqn, path = %path.display(), "loading module");

    let program = match slug_syntax::parse_source(&text) {
        Ok(program) => program,
        Err(errors) => {
            return Object::error(format!(
                "parse errors in module '{}': {}",
                fqn,
                errors.join("; ")
            ));
        }
    };

    let source: Arc<str> = Arc::from(text.as_str());
    let file = path.display().to_string();
    let env = Env::with_frame(
        &Env::new(),
        TraceFrame {
            function: format!("<module {}>", fqn),
            file: file.clone(),
            position: Position::default(),
            source: source.clone(),
        },
    );

    // Evaluate the module body under its own module identity, then restore.
    let saved_fqn = ev.module_fqn.clone();
    let saved_file = ev.file.clone();
    let saved_source = ev.source.clone();
    ev.set_module(fqn, &file, source.clone());
    let result = ev.eval_program(&program, &env);
    ev.set_module(&saved_fqn, &saved_file, saved_source);

    if result.is_error() {
        return result;
    }

    let module = Module {
        name: fqn.to_string(),
        path,
        source,
        program: Arc::new(program),
        env,
    };
    let obj = Object::from(Value::Module(Arc::new(module)));
    ev.shared
        .modules
        .write()
        .expect(LOCK_MSG)
        .insert(fqn.to_string(), obj.clone());
    obj
}

/// Build the map returned by `import(…)`: exported symbols keyed by name,
/// carrying the `@import` tag so destructuring binds with import semantics.
pub fn exports_map(module: &Module) -> Object {
    let mut map = MapValue::new();
    for (name, value) in module.env.exports() {
        map.insert(Object::string(name), value);
    }
    Object::map(map)
        .apply_tags_if_present(TagMap::from([(TAG_IMPORT.to_string(), Vec::new())]))
}
