//! Lexically scoped environments
//!
//! An [`Env`] is one frame in a chain: a binding table plus an optional
//! stack-frame descriptor and the frame's deferred statements. Frames are
//! shared (`Arc<Mutex<…>>`) because closures capture them and values holding
//! closures cross actor mailboxes. Locks are held only for the duration of a
//! single operation; the chain is walked one frame at a time.
//!
//! Reference cycles (a function capturing the environment that binds it) are
//! tolerated for process lifetime.

use crate::value::Object;
use slug_syntax::ast::{Expr, Position};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// One binding record.
#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Object,
    pub mutable: bool,
    pub export: bool,
    pub import: bool,
}

/// Flags applied when a binding is created.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefineFlags {
    pub mutable: bool,
    pub export: bool,
    pub import: bool,
}

/// Stack-frame descriptor carried by frames that correspond to a call,
/// module load, or program entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceFrame {
    pub function: String,
    pub file: String,
    pub position: Position,
    pub source: Arc<str>,
}

impl TraceFrame {
    /// Render one frame: location, function name, and the offending source
    /// line with the column highlighted.
    pub fn render(&self) -> String {
        let mut out = format!("  at {} ({}:{})", self.function, self.file, self.position);
        if let Some(line) = self.source.lines().nth(self.position.line) {
            out.push_str(&format!("\n    {}\n    {}^", line, " ".repeat(self.position.column)));
        }
        out
    }
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Render a gathered trace, most recent frame first.
pub fn render_trace(trace: &[TraceFrame]) -> String {
    trace
        .iter()
        .map(TraceFrame::render)
        .collect::<Vec<_>>()
        .join("\n")
}

/// A deferred call and the environment snapshot it runs in.
#[derive(Debug, Clone)]
pub struct DeferredCall {
    pub call: Expr,
    pub env: Env,
}

#[derive(Debug, Default)]
struct EnvInner {
    bindings: HashMap<String, Binding>,
    outer: Option<Env>,
    frame: Option<TraceFrame>,
    deferred: Vec<DeferredCall>,
    last_error: Option<Object>,
}

/// A shared handle to one environment frame.
#[derive(Clone, Debug, Default)]
pub struct Env {
    inner: Arc<Mutex<EnvInner>>,
}

const LOCK_MSG: &str = "environment lock poisoned - evaluator panicked while holding it";

impl Env {
    /// A fresh root frame.
    pub fn new() -> Env {
        Env::default()
    }

    /// A child frame enclosing `outer`.
    pub fn enclosed(outer: &Env) -> Env {
        let env = Env::new();
        env.inner.lock().expect(LOCK_MSG).outer = Some(outer.clone());
        env
    }

    /// A child frame with a stack-frame descriptor (function application,
    /// module load, program entry).
    pub fn with_frame(outer: &Env, frame: TraceFrame) -> Env {
        let env = Env::enclosed(outer);
        env.inner.lock().expect(LOCK_MSG).frame = Some(frame);
        env
    }

    pub fn outer(&self) -> Option<Env> {
        self.inner.lock().expect(LOCK_MSG).outer.clone()
    }

    pub fn frame(&self) -> Option<TraceFrame> {
        self.inner.lock().expect(LOCK_MSG).frame.clone()
    }

    /// Create a binding in this frame. Fails when the name is already bound
    /// here as a constant.
    pub fn define(
        &self,
        name: &str,
        value: Object,
        flags: DefineFlags,
    ) -> Result<(), String> {
        let mut inner = self.inner.lock().expect(LOCK_MSG);
        if let Some(existing) = inner.bindings.get(name)
            && !existing.mutable
        {
            return Err(format!("cannot redefine constant '{}'", name));
        }
        inner.bindings.insert(
            name.to_string(),
            Binding {
                value,
                mutable: flags.mutable,
                export: flags.export,
                import: flags.import,
            },
        );
        Ok(())
    }

    /// Create a constant binding.
    pub fn define_constant(
        &self,
        name: &str,
        value: Object,
        export: bool,
        import: bool,
    ) -> Result<(), String> {
        self.define(
            name,
            value,
            DefineFlags {
                mutable: false,
                export,
                import,
            },
        )
    }

    /// Rebind the nearest mutable binding. Fails when the name is unbound or
    /// bound as a constant.
    pub fn assign(&self, name: &str, value: Object) -> Result<(), String> {
        let mut current = self.clone();
        loop {
            let next = {
                let mut inner = current.inner.lock().expect(LOCK_MSG);
                if let Some(binding) = inner.bindings.get_mut(name) {
                    if !binding.mutable {
                        return Err(format!("cannot assign to constant '{}'", name));
                    }
                    binding.value = value;
                    return Ok(());
                }
                inner.outer.clone()
            };
            match next {
                Some(outer) => current = outer,
                None => return Err(format!("identifier not found: {}", name)),
            }
        }
    }

    /// Resolve a name through the frame chain.
    pub fn get(&self, name: &str) -> Option<Object> {
        self.get_binding(name).map(|b| b.value)
    }

    /// Resolve a name and return the whole binding record.
    pub fn get_binding(&self, name: &str) -> Option<Binding> {
        let mut current = self.clone();
        loop {
            let next = {
                let inner = current.inner.lock().expect(LOCK_MSG);
                if let Some(binding) = inner.bindings.get(name) {
                    return Some(binding.clone());
                }
                inner.outer.clone()
            };
            match next {
                Some(outer) => current = outer,
                None => return None,
            }
        }
    }

    /// Resolve a name in this frame only, without walking outward.
    pub fn get_local(&self, name: &str) -> Option<Binding> {
        self.inner
            .lock()
            .expect(LOCK_MSG)
            .bindings
            .get(name)
            .cloned()
    }

    /// Names bound directly in this frame.
    pub fn local_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect(LOCK_MSG)
            .bindings
            .keys()
            .cloned()
            .collect()
    }

    /// Bindings of this frame whose record or value marks them exported.
    pub fn exports(&self) -> Vec<(String, Object)> {
        let inner = self.inner.lock().expect(LOCK_MSG);
        inner
            .bindings
            .iter()
            .filter(|(_, b)| b.export || b.value.is_exportable())
            .map(|(name, b)| (name.clone(), b.value.clone()))
            .collect()
    }

    /// Copy this frame's own bindings into `target`, preserving flags.
    /// Used to promote pattern-match bindings on whole-pattern success.
    pub fn promote_into(&self, target: &Env) -> Result<(), String> {
        let bindings: Vec<(String, Binding)> = {
            let inner = self.inner.lock().expect(LOCK_MSG);
            inner
                .bindings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        for (name, binding) in bindings {
            target.define(
                &name,
                binding.value,
                DefineFlags {
                    mutable: binding.mutable,
                    export: binding.export,
                    import: binding.import,
                },
            )?;
        }
        Ok(())
    }

    /// Register a deferred call on this frame.
    pub fn register_defer(&self, call: Expr, env: Env) {
        self.inner
            .lock()
            .expect(LOCK_MSG)
            .deferred
            .push(DeferredCall { call, env });
    }

    /// Take the deferred calls in registration order; the caller runs them
    /// in reverse (LIFO).
    pub fn take_deferred(&self) -> Vec<DeferredCall> {
        std::mem::take(&mut self.inner.lock().expect(LOCK_MSG).deferred)
    }

    /// Error slot observed by deferred statements.
    pub fn set_last_error(&self, error: Object) {
        self.inner.lock().expect(LOCK_MSG).last_error = Some(error);
    }

    pub fn last_error(&self) -> Option<Object> {
        self.inner.lock().expect(LOCK_MSG).last_error.clone()
    }
}
