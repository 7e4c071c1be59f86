//! Foreign function bridge
//!
//! A process-level name→native-function table. Module code declares
//! `foreign fn name(params)`; at declaration time the evaluator resolves
//! `moduleFqn.name` here and installs a `Foreign` value with the declared
//! parameters.
//!
//! Native functions receive an [`EvaluatorContext`] for the duration of the
//! call only. Panics inside native code are caught and surfaced as `Error`
//! values citing the foreign name.

use crate::actors::kernel::{Kernel, KernelError};
use crate::actors::message::{ActorId, Message};
use crate::config::Settings;
use crate::env::Env;
use crate::evaluator::Evaluator;
use crate::value::{Foreign, Object};
use slug_syntax::ast::Position;
use std::collections::HashMap;
use std::sync::RwLock;

/// Signature of a native function.
pub type NativeFn = fn(&mut EvaluatorContext<'_>, Vec<Object>) -> Object;

/// Call-scoped view handed to native functions. Must not be retained past
/// the call.
pub struct EvaluatorContext<'a> {
    pub evaluator: &'a mut Evaluator,
    pub env: Env,
    pub position: Position,
}

impl<'a> EvaluatorContext<'a> {
    pub fn new_error(&self, message: impl Into<String>) -> Object {
        Object::error(message)
    }

    pub fn nil(&self) -> Object {
        Object::nil()
    }

    pub fn config(&self) -> &Settings {
        &self.evaluator.shared.settings
    }

    pub fn load_module(&mut self, fqn: &str) -> Object {
        crate::modules::load_module(self.evaluator, fqn)
    }

    /// The actor context: kernel handle and the id of the actor whose
    /// evaluator is running.
    pub fn act(&self) -> (Kernel, ActorId) {
        (
            self.evaluator.shared.kernel.clone(),
            self.evaluator.self_id,
        )
    }

    /// Block on the running actor's own mailbox.
    pub fn wait_for_message(&self, timeout_ms: i64) -> Result<Message, KernelError> {
        self.evaluator
            .shared
            .kernel
            .receive_from(self.evaluator.self_id, timeout_ms)
    }
}

/// Name → native function lookup table.
#[derive(Default)]
pub struct ForeignRegistry {
    entries: RwLock<HashMap<String, NativeFn>>,
}

const LOCK_MSG: &str = "foreign registry lock poisoned";

impl ForeignRegistry {
    pub fn new() -> ForeignRegistry {
        ForeignRegistry::default()
    }

    pub fn register(&self, name: impl Into<String>, func: NativeFn) {
        self.entries
            .write()
            .expect(LOCK_MSG)
            .insert(name.into(), func);
    }

    pub fn lookup(&self, name: &str) -> Option<NativeFn> {
        self.entries.read().expect(LOCK_MSG).get(name).copied()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .expect(LOCK_MSG)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Format a panic payload into a readable message.
pub fn format_panic_payload(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Invoke a native function, recovering from panics.
pub fn invoke(foreign: &Foreign, ctx: &mut EvaluatorContext<'_>, args: Vec<Object>) -> Object {
    let result =
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (foreign.func)(ctx, args)));
    match result {
        Ok(obj) => obj,
        Err(payload) => Object::error(format!(
            "foreign function '{}' panicked: {}",
            foreign.name,
            format_panic_payload(payload.as_ref())
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        fn f(_ctx: &mut EvaluatorContext<'_>, _args: Vec<Object>) -> Object {
            Object::int(1)
        }
        let registry = ForeignRegistry::new();
        registry.register("time.now", f);
        assert!(registry.lookup("time.now").is_some());
        assert!(registry.lookup("time.later").is_none());
        assert_eq!(registry.names(), vec!["time.now".to_string()]);
    }

    #[test]
    fn test_format_panic_payload() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(format_panic_payload(boxed.as_ref()), "static message");
        let boxed: Box<dyn std::any::Any + Send> = Box::new("owned".to_string());
        assert_eq!(format_panic_payload(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u32);
        assert_eq!(format_panic_payload(boxed.as_ref()), "unknown panic");
    }
}
