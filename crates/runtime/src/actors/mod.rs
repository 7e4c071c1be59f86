//! The actor kernel: lifecycle, mailboxes, scheduling, registry, rights.

pub mod handler;
pub mod kernel;
pub mod message;

pub use handler::{EvalHandler, ProgramHandler, message_to_object};
pub use kernel::{Handler, Kernel, KernelError};
pub use message::{ActorId, HandlerSignal, Message, Payload, ProgramJob, Right};
