//! Evaluator-backed actor handlers
//!
//! [`EvalHandler`] runs a Slug function once per delivered message;
//! [`ProgramHandler`] is the entry actor that evaluates a whole program and
//! replies with its result.

use crate::actors::kernel::Handler;
use crate::actors::message::{ActorId, HandlerSignal, Message, Payload};
use crate::env::{Env, TraceFrame};
use crate::evaluator::Evaluator;
use crate::program::Shared;
use crate::value::{MapValue, Object};
use slug_syntax::ast::Position;
use std::sync::Arc;
use tracing::warn;

/// The message map handed to Slug handler code: type, payload, sender,
/// reply_to, correlation.
pub fn message_to_object(msg: &Message) -> Object {
    let mut map = MapValue::new();
    let type_str = match &msg.payload {
        Payload::Start => "start",
        Payload::Exit { .. } => "exit",
        Payload::UnknownOperation { .. } => "unknown-operation",
        Payload::EvaluateProgram(_) => "evaluate-program",
        Payload::Value(_) => "message",
    };
    map.insert(Object::string("type"), Object::string(type_str));
    let payload = match &msg.payload {
        Payload::Value(obj) => obj.clone(),
        Payload::Exit { reason } => reason.clone(),
        Payload::UnknownOperation { operation } => Object::string(operation),
        _ => Object::nil(),
    };
    map.insert(Object::string("payload"), payload);
    map.insert(Object::string("sender"), Object::int(msg.sender.as_i64()));
    map.insert(
        Object::string("reply_to"),
        msg.reply_to
            .map(|id| Object::int(id.as_i64()))
            .unwrap_or_else(Object::nil),
    );
    map.insert(
        Object::string("correlation"),
        msg.correlation
            .map(|c| Object::int(c as i64))
            .unwrap_or_else(Object::nil),
    );
    Object::map(map)
}

/// Runs a user-supplied handler function for every message. `Exit`
/// terminates; a failing handler terminates with the error as the reason
/// (the parent learns about it through the exit record). When the incoming
/// message carries a reply-to, the handler's return value is sent back with
/// the original correlation token.
pub struct EvalHandler {
    pub shared: Arc<Shared>,
    pub handler_fn: Object,
    pub extra_args: Vec<Object>,
    pub module_fqn: String,
    pub file: String,
    pub source: Arc<str>,
}

impl Handler for EvalHandler {
    fn handle(&mut self, self_id: ActorId, msg: Message) -> HandlerSignal {
        if let Payload::Exit { reason } = &msg.payload {
            return HandlerSignal::Terminate {
                reason: reason.clone(),
            };
        }
        let reply_to = msg.reply_to;
        let correlation = msg.correlation;
        let msg_obj = message_to_object(&msg);

        let mut ev = Evaluator::new(self.shared.clone(), self_id);
        ev.set_module(&self.module_fqn, &self.file, self.source.clone());
        let mut args = Vec::with_capacity(1 + self.extra_args.len());
        args.push(msg_obj);
        args.extend(self.extra_args.iter().cloned());
        let env = Env::new();
        let result = ev.apply_function(
            &env,
            Position::default(),
            "<actor handler>",
            self.handler_fn.clone(),
            args,
        );

        if result.is_error() {
            warn!(actor = %self_id, error = %result.inspect(), "actor handler failed");
            return HandlerSignal::Terminate { reason: result };
        }
        if let Some(reply_to) = reply_to {
            let _ = self.shared.kernel.send_reply(
                self_id,
                reply_to,
                correlation,
                Payload::Value(result),
            );
        }
        HandlerSignal::Continue
    }
}

/// Entry actor: evaluates an `EvaluateProgram` job and terminates.
pub struct ProgramHandler {
    pub shared: Arc<Shared>,
}

impl Handler for ProgramHandler {
    fn handle(&mut self, self_id: ActorId, msg: Message) -> HandlerSignal {
        match msg.payload {
            Payload::EvaluateProgram(job) => {
                let mut ev = Evaluator::new(self.shared.clone(), self_id);
                ev.set_module(&job.fqn, &job.file, job.source.clone());
                let root = Env::new();
                let env = Env::with_frame(
                    &root,
                    TraceFrame {
                        function: "<program>".to_string(),
                        file: job.file.clone(),
                        position: Position::default(),
                        source: job.source.clone(),
                    },
                );
                let result = ev.eval_program(&job.program, &env);
                if let Some(reply_to) = msg.reply_to {
                    let _ = self.shared.kernel.send_reply(
                        self_id,
                        reply_to,
                        msg.correlation,
                        Payload::Value(result),
                    );
                }
                HandlerSignal::Terminate {
                    reason: Object::nil(),
                }
            }
            Payload::Exit { reason } => HandlerSignal::Terminate { reason },
            _ => HandlerSignal::Continue,
        }
    }
}
