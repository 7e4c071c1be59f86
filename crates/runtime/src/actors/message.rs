//! Kernel message types
//!
//! A [`Message`] is what travels through a mailbox: sender, optional
//! reply-to, optional correlation token, and a payload. The kernel interprets
//! only its own control payloads (`Start`, `Exit`, `UnknownOperation`,
//! `EvaluateProgram`); everything else is an opaque language value carried in
//! the [`Payload::Value`] envelope.

use crate::value::Object;
use slug_syntax::ast::Program;
use std::fmt;
use std::sync::Arc;

/// Non-zero actor identifier, unique within the process.
///
/// Ids stay within 47 bits so they round-trip exactly through a Slug Number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u64);

impl ActorId {
    /// Pseudo-sender used for messages originating in the kernel itself.
    pub const KERNEL: ActorId = ActorId(0);

    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A program handed to the entry actor for evaluation.
#[derive(Debug)]
pub struct ProgramJob {
    pub program: Arc<Program>,
    pub fqn: String,
    pub file: String,
    pub source: Arc<str>,
}

/// Message payload. The kernel only interprets its own control variants.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Bootstrap signal for a freshly spawned actor.
    Start,
    /// Termination signal; handlers interpret it cooperatively.
    Exit { reason: Object },
    /// Reply for a request the receiver did not understand.
    UnknownOperation { operation: String },
    /// Entry-actor control message carrying an AST.
    EvaluateProgram(Arc<ProgramJob>),
    /// The `SlugActorMessage` envelope: an opaque language value.
    Value(Object),
}

impl Payload {
    /// The type tag consulted by the rights table. Control payloads use
    /// fixed tags; user values are classified by their first tag name, or
    /// their type name when untagged.
    pub fn type_tag(&self) -> String {
        match self {
            Payload::Start => "start".to_string(),
            Payload::Exit { .. } => "exit".to_string(),
            Payload::UnknownOperation { .. } => "unknown-operation".to_string(),
            Payload::EvaluateProgram(_) => "evaluate-program".to_string(),
            Payload::Value(obj) => obj
                .primary_tag()
                .unwrap_or_else(|| obj.type_name().to_lowercase()),
        }
    }
}

/// One mailbox entry.
#[derive(Debug, Clone)]
pub struct Message {
    pub sender: ActorId,
    pub reply_to: Option<ActorId>,
    pub correlation: Option<u64>,
    pub payload: Payload,
}

impl Message {
    pub fn new(sender: ActorId, payload: Payload) -> Message {
        Message {
            sender,
            reply_to: None,
            correlation: None,
            payload,
        }
    }
}

/// Access level for one payload type in an actor's rights table. Levels are
/// cumulative: `Read` implies `Write`, `Exec` implies both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Right {
    None,
    /// May send this payload type asynchronously.
    Write,
    /// May also read synchronous replies.
    Read,
    /// May also invoke side-effecting kernel operations (spawn etc.).
    Exec,
}

impl Right {
    pub fn allows(self, required: Right) -> bool {
        self >= required
    }
}

/// What a handler tells the kernel after processing one message.
#[derive(Debug)]
pub enum HandlerSignal {
    Continue,
    Terminate { reason: Object },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TagMap;

    #[test]
    fn test_payload_type_tags() {
        assert_eq!(Payload::Start.type_tag(), "start");
        assert_eq!(
            Payload::Exit {
                reason: Object::nil()
            }
            .type_tag(),
            "exit"
        );
        assert_eq!(Payload::Value(Object::int(1)).type_tag(), "number");
        let tagged = Object::int(1)
            .apply_tags_if_present(TagMap::from([("job".to_string(), Vec::new())]));
        assert_eq!(Payload::Value(tagged).type_tag(), "job");
    }

    #[test]
    fn test_rights_are_cumulative() {
        assert!(Right::Exec.allows(Right::Write));
        assert!(Right::Read.allows(Right::Write));
        assert!(!Right::Write.allows(Right::Read));
        assert!(!Right::None.allows(Right::Write));
    }
}
