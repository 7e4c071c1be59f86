//! Slug Runtime
//!
//! The runtime core of the Slug language: the object model, scoped
//! environments, the tree-walking evaluator, the module loader, the foreign
//! bridge, and the actor kernel that hosts evaluator instances as isolated
//! processes communicating by message passing.
//!
//! The typical entry point is [`program::Interp`]:
//!
//! ```ignore
//! let settings = Settings::load(".", "main")?;
//! let interp = Interp::new(settings);
//! let result = interp.run_file(Path::new("main.slug"))?;
//! ```

pub mod actors;
pub mod builtins;
pub mod config;
pub mod env;
pub mod evaluator;
pub mod foreign;
pub mod modules;
pub mod ops;
pub mod pattern;
pub mod program;
pub mod value;

pub use actors::{ActorId, Kernel, KernelError};
pub use config::Settings;
pub use env::{Env, TraceFrame, render_trace};
pub use evaluator::Evaluator;
pub use program::{Interp, RunError, Shared};
pub use value::{Object, Value};
