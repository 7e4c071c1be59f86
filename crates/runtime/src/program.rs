//! Shared interpreter state and the program driver
//!
//! [`Shared`] holds everything process-wide: configuration, the actor
//! kernel, the module cache, the foreign registry and the builtin table.
//! [`Interp`] is the front door: parse a source file, boot the entry actor,
//! deliver `EvaluateProgram`, and hand back the result.

use crate::actors::handler::ProgramHandler;
use crate::actors::kernel::{Kernel, KernelError};
use crate::actors::message::{ActorId, Payload, ProgramJob};
use crate::builtins;
use crate::config::Settings;
use crate::foreign::ForeignRegistry;
use crate::value::Object;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

/// Process-wide interpreter state. Registries take exclusive locks for
/// mutation; reads are concurrent.
pub struct Shared {
    pub settings: Settings,
    pub kernel: Kernel,
    pub modules: RwLock<HashMap<String, Object>>,
    /// FQNs whose bodies are currently evaluating; a second load of one of
    /// these is a circular import.
    pub loading: Mutex<HashSet<String>>,
    pub foreign: ForeignRegistry,
    pub builtins: HashMap<String, Object>,
}

impl Shared {
    pub fn new(settings: Settings) -> Arc<Shared> {
        Arc::new(Shared {
            settings,
            kernel: Kernel::new(),
            modules: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashSet::new()),
            foreign: ForeignRegistry::new(),
            builtins: builtins::builtin_objects(),
        })
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("parse failed:\n{}", .0.join("\n"))]
    Parse(Vec<String>),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// One interpreter instance with its own kernel and caches.
pub struct Interp {
    pub shared: Arc<Shared>,
}

impl Interp {
    pub fn new(settings: Settings) -> Interp {
        Interp {
            shared: Shared::new(settings),
        }
    }

    pub fn run_file(&self, path: &Path) -> Result<Object, RunError> {
        let source = std::fs::read_to_string(path).map_err(|e| RunError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let fqn = self.shared.settings.main_fqn.clone();
        self.run_source(&source, &path.display().to_string(), &fqn)
    }

    /// Parse and run a program: spawn the entry actor, deliver
    /// `EvaluateProgram`, wait for its reply, then shut the kernel down.
    pub fn run_source(&self, source: &str, file: &str, fqn: &str) -> Result<Object, RunError> {
        let program = slug_syntax::parse_source(source).map_err(RunError::Parse)?;
        let job = ProgramJob {
            program: Arc::new(program),
            fqn: fqn.to_string(),
            file: file.to_string(),
            source: Arc::from(source),
        };
        debug!(file, fqn, "starting program actor");
        let root = self.shared.kernel.spawn_child(
            None,
            Some("program"),
            Kernel::default_rights(),
            Box::new(ProgramHandler {
                shared: self.shared.clone(),
            }),
        )?;
        let reply = self.shared.kernel.send_sync(
            ActorId::KERNEL,
            root,
            Payload::EvaluateProgram(Arc::new(job)),
            -1,
        )?;
        let result = match reply.payload {
            Payload::Value(obj) => obj,
            _ => Object::nil(),
        };
        self.shared.kernel.shutdown(Object::nil());
        self.shared.kernel.wait_all();
        Ok(result)
    }

    /// Parse only; used by `slug check`.
    pub fn check_source(source: &str) -> Result<(), Vec<String>> {
        slug_syntax::parse_source(source).map(|_| ())
    }
}
