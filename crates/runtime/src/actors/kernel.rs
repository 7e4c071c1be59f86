//! Actor kernel
//!
//! Actors are May coroutines, one per actor, each draining a dedicated MPMC
//! mailbox. The kernel owns the process-wide actor and name registries and
//! enforces the per-sender rights table before a message reaches a mailbox.
//!
//! Scheduling is parallel across actors and cooperative within one: a
//! handler processes exactly one message at a time, and channel operations
//! yield to the May scheduler instead of blocking OS threads.
//!
//! Passive actors are mailbox-only (no coroutine, no handler). They exist to
//! correlate synchronous request-reply: `send_sync` spawns one, points
//! `reply_to` at it, blocks on its mailbox, and tears it down.

use crate::actors::message::{ActorId, HandlerSignal, Message, Payload, Right};
use crate::value::Object;
use may::sync::mpmc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("no such actor: {0}")]
    NoSuchActor(ActorId),
    #[error("actor name '{0}' is already registered")]
    NameTaken(String),
    #[error("actor {actor} may not send '{payload}' messages")]
    AccessDenied { actor: ActorId, payload: String },
    #[error("timed out waiting for a message")]
    Timeout,
    #[error("mailbox closed")]
    MailboxClosed,
}

/// Per-message callback driven by the actor's coroutine.
pub trait Handler: Send + 'static {
    fn handle(&mut self, self_id: ActorId, msg: Message) -> HandlerSignal;
}

/// Ids stay under 2^47 so they convert exactly to a Slug Number.
const ID_MASK: u64 = 0x7FFF_FFFF_FFFF;

const LOCK_MSG: &str = "kernel lock poisoned - actor panicked while holding it";

struct ActorEntry {
    id: ActorId,
    name: Mutex<Option<String>>,
    parent: Option<ActorId>,
    sender: mpmc::Sender<Message>,
    receiver: mpmc::Receiver<Message>,
    children: Mutex<HashSet<ActorId>>,
    rights: RwLock<HashMap<String, Right>>,
    aliases: RwLock<HashMap<String, String>>,
    alive: AtomicBool,
    passive: bool,
}

impl ActorEntry {
    /// Effective right for a payload type: exact entry, then alias target,
    /// then the `*` wildcard. Absent entries deny.
    fn right_for(&self, type_tag: &str) -> Right {
        let rights = self.rights.read().expect(LOCK_MSG);
        if let Some(right) = rights.get(type_tag) {
            return *right;
        }
        let aliases = self.aliases.read().expect(LOCK_MSG);
        if let Some(target) = aliases.get(type_tag)
            && let Some(right) = rights.get(target)
        {
            return *right;
        }
        rights.get("*").copied().unwrap_or(Right::None)
    }
}

struct KernelInner {
    actors: RwLock<HashMap<ActorId, Arc<ActorEntry>>>,
    names: RwLock<HashMap<String, ActorId>>,
    serial: AtomicU64,
    /// Running (non-passive) actors; the shutdown condvar fires at zero.
    active: AtomicUsize,
    shutdown_mutex: Mutex<()>,
    shutdown_condvar: Condvar,
}

/// Shared handle to the actor kernel.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::new()
    }
}

/// Default coroutine stack size: 1MB. May's own default is far smaller than
/// a tree-walking evaluator needs. Override via SLUG_STACK_SIZE (bytes).
const DEFAULT_STACK_SIZE: usize = 0x100000;

static COROUTINE_INIT: Once = Once::new();

fn init_coroutine_runtime() {
    COROUTINE_INIT.call_once(|| {
        let stack_size = std::env::var("SLUG_STACK_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_STACK_SIZE);
        may::config().set_stack_size(stack_size);
    });
}

impl Kernel {
    pub fn new() -> Kernel {
        init_coroutine_runtime();
        Kernel {
            inner: Arc::new(KernelInner {
                actors: RwLock::new(HashMap::new()),
                names: RwLock::new(HashMap::new()),
                serial: AtomicU64::new(0),
                active: AtomicUsize::new(0),
                shutdown_mutex: Mutex::new(()),
                shutdown_condvar: Condvar::new(),
            }),
        }
    }

    /// Full-trust rights table used for actors spawned by ordinary program
    /// code. Restricted actors get an explicit table instead.
    pub fn default_rights() -> HashMap<String, Right> {
        HashMap::from([("*".to_string(), Right::Exec)])
    }

    /// Counter XOR per-spawn nonce, retried until unique and non-zero.
    fn fresh_id(&self) -> ActorId {
        loop {
            let serial = self.inner.serial.fetch_add(1, Ordering::Relaxed) + 1;
            let nonce: u64 = rand::random();
            let id = (serial ^ nonce) & ID_MASK;
            if id == 0 {
                continue;
            }
            let id = ActorId(id);
            if !self
                .inner
                .actors
                .read()
                .expect(LOCK_MSG)
                .contains_key(&id)
            {
                return id;
            }
        }
    }

    fn entry(&self, id: ActorId) -> Option<Arc<ActorEntry>> {
        self.inner.actors.read().expect(LOCK_MSG).get(&id).cloned()
    }

    fn live_entry(&self, id: ActorId) -> Result<Arc<ActorEntry>, KernelError> {
        match self.entry(id) {
            Some(entry) if entry.alive.load(Ordering::Acquire) => Ok(entry),
            _ => Err(KernelError::NoSuchActor(id)),
        }
    }

    /// Rights check at the kernel boundary, before delivery. The kernel
    /// itself is privileged.
    fn check_right(
        &self,
        from: ActorId,
        type_tag: &str,
        required: Right,
    ) -> Result<(), KernelError> {
        if from == ActorId::KERNEL {
            return Ok(());
        }
        let entry = self
            .entry(from)
            .ok_or(KernelError::NoSuchActor(from))?;
        if entry.right_for(type_tag).allows(required) {
            Ok(())
        } else {
            Err(KernelError::AccessDenied {
                actor: from,
                payload: type_tag.to_string(),
            })
        }
    }

    fn deliver(&self, entry: &ActorEntry, msg: Message) -> Result<(), KernelError> {
        entry
            .sender
            .send(msg)
            .map_err(|_| KernelError::MailboxClosed)
    }

    fn insert_entry(
        &self,
        name: Option<&str>,
        parent: Option<ActorId>,
        rights: HashMap<String, Right>,
        passive: bool,
    ) -> Result<Arc<ActorEntry>, KernelError> {
        let id = self.fresh_id();
        let (sender, receiver) = mpmc::channel();
        let entry = Arc::new(ActorEntry {
            id,
            name: Mutex::new(None),
            parent,
            sender,
            receiver,
            children: Mutex::new(HashSet::new()),
            rights: RwLock::new(rights),
            aliases: RwLock::new(HashMap::new()),
            alive: AtomicBool::new(true),
            passive,
        });
        if let Some(name) = name {
            let mut names = self.inner.names.write().expect(LOCK_MSG);
            if names.contains_key(name) {
                return Err(KernelError::NameTaken(name.to_string()));
            }
            names.insert(name.to_string(), id);
            *entry.name.lock().expect(LOCK_MSG) = Some(name.to_string());
        }
        self.inner
            .actors
            .write()
            .expect(LOCK_MSG)
            .insert(id, entry.clone());
        if let Some(parent_id) = parent
            && let Some(parent_entry) = self.entry(parent_id)
        {
            parent_entry
                .children
                .lock()
                .expect(LOCK_MSG)
                .insert(id);
        }
        Ok(entry)
    }

    /// Spawn an actor with the given handler. The mailbox starts empty; the
    /// caller sends `Start` explicitly if the handler needs bootstrap data.
    pub fn spawn_child(
        &self,
        parent: Option<ActorId>,
        name: Option<&str>,
        rights: HashMap<String, Right>,
        handler: Box<dyn Handler>,
    ) -> Result<ActorId, KernelError> {
        if let Some(parent_id) = parent {
            self.check_right(parent_id, "spawn", Right::Exec)?;
        }
        let entry = self.insert_entry(name, parent, rights, false)?;
        self.inner.active.fetch_add(1, Ordering::Release);
        let kernel = self.clone();
        let actor = entry.clone();
        // Safety: the closure is Send + 'static; it owns its captures.
        unsafe {
            may::coroutine::spawn(move || run_actor(kernel, actor, handler));
        }
        debug!(actor = %entry.id, "spawned actor");
        Ok(entry.id)
    }

    /// Spawn a mailbox-only actor used as a synchronous reply sink.
    pub fn spawn_passive(&self, name: Option<&str>) -> Result<ActorId, KernelError> {
        let entry = self.insert_entry(name, None, HashMap::new(), true)?;
        Ok(entry.id)
    }

    /// Remove a passive actor and its name registration.
    pub fn remove_passive(&self, id: ActorId) {
        if let Some(entry) = self.entry(id)
            && entry.passive
        {
            if let Some(name) = entry.name.lock().expect(LOCK_MSG).take() {
                self.inner.names.write().expect(LOCK_MSG).remove(&name);
            }
            self.inner.actors.write().expect(LOCK_MSG).remove(&id);
        }
    }

    /// Asynchronous send: sender set, no reply-to. Fails when the target is
    /// gone or the sender's rights deny the payload type.
    pub fn send_async(
        &self,
        from: ActorId,
        to: ActorId,
        payload: Payload,
    ) -> Result<(), KernelError> {
        self.check_right(from, &payload.type_tag(), Right::Write)?;
        let entry = self.live_entry(to)?;
        self.deliver(&entry, Message::new(from, payload))
    }

    /// Reply to a correlated request: like `send_async` but carrying the
    /// correlation token of the request being answered.
    pub fn send_reply(
        &self,
        from: ActorId,
        to: ActorId,
        correlation: Option<u64>,
        payload: Payload,
    ) -> Result<(), KernelError> {
        self.check_right(from, &payload.type_tag(), Right::Write)?;
        let entry = self.live_entry(to)?;
        self.deliver(
            &entry,
            Message {
                sender: from,
                reply_to: None,
                correlation,
                payload,
            },
        )
    }

    /// Forward an already-received message preserving the original sender
    /// and reply-to.
    pub fn forward_async(
        &self,
        from: ActorId,
        to: ActorId,
        msg: Message,
    ) -> Result<(), KernelError> {
        self.check_right(from, &msg.payload.type_tag(), Right::Write)?;
        let entry = self.live_entry(to)?;
        self.deliver(&entry, msg)
    }

    /// Synchronous request-reply through a transient passive actor. The
    /// reply is delivered before this returns, or the timeout fires. An
    /// unreachable target reports a timeout, never a hang.
    pub fn send_sync(
        &self,
        from: ActorId,
        to: ActorId,
        payload: Payload,
        timeout_ms: i64,
    ) -> Result<Message, KernelError> {
        self.check_right(from, &payload.type_tag(), Right::Read)?;
        let passive = self.spawn_passive(None)?;
        // Masked like actor ids so the token survives a Number round-trip.
        let correlation = rand::random::<u64>() & ID_MASK;
        let result = (|| {
            let entry = self.live_entry(to).map_err(|_| KernelError::Timeout)?;
            self.deliver(
                &entry,
                Message {
                    sender: from,
                    reply_to: Some(passive),
                    correlation: Some(correlation),
                    payload,
                },
            )
            .map_err(|_| KernelError::Timeout)?;
            self.receive_from(passive, timeout_ms)
        })();
        self.remove_passive(passive);
        result
    }

    /// Block on a mailbox: `timeout < 0` waits forever, `0` polls, `> 0`
    /// waits that many milliseconds. A timeout removes no pending message.
    pub fn receive_from(&self, id: ActorId, timeout_ms: i64) -> Result<Message, KernelError> {
        let entry = self.entry(id).ok_or(KernelError::NoSuchActor(id))?;
        if timeout_ms < 0 {
            entry.receiver.recv().map_err(|_| KernelError::MailboxClosed)
        } else if timeout_ms == 0 {
            entry.receiver.try_recv().map_err(|_| KernelError::Timeout)
        } else {
            entry
                .receiver
                .recv_timeout(Duration::from_millis(timeout_ms as u64))
                .map_err(|_| KernelError::Timeout)
        }
    }

    /// Register a name for a live actor.
    pub fn register(&self, name: &str, id: ActorId) -> Result<(), KernelError> {
        let entry = self.live_entry(id)?;
        {
            let mut names = self.inner.names.write().expect(LOCK_MSG);
            if names.contains_key(name) {
                return Err(KernelError::NameTaken(name.to_string()));
            }
            names.insert(name.to_string(), id);
        }
        // Lock order is entry.name before names everywhere; the names guard
        // is released before touching the entry.
        *entry.name.lock().expect(LOCK_MSG) = Some(name.to_string());
        Ok(())
    }

    pub fn unregister(&self, name: &str) {
        let removed = self.inner.names.write().expect(LOCK_MSG).remove(name);
        if let Some(id) = removed
            && let Some(entry) = self.entry(id)
        {
            entry.name.lock().expect(LOCK_MSG).take();
        }
    }

    pub fn lookup(&self, name: &str) -> Option<ActorId> {
        self.inner.names.read().expect(LOCK_MSG).get(name).copied()
    }

    /// Like `lookup`, but only resolves names whose actor is still alive.
    pub fn actor_by_name(&self, name: &str) -> Option<ActorId> {
        self.lookup(name).filter(|id| self.is_alive(*id))
    }

    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .names
            .read()
            .expect(LOCK_MSG)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn is_alive(&self, id: ActorId) -> bool {
        self.entry(id)
            .is_some_and(|e| e.alive.load(Ordering::Acquire))
    }

    /// Augment `other`'s rights entry for the given payload type.
    pub fn grant(
        &self,
        other: ActorId,
        target: &str,
        right: Right,
    ) -> Result<(), KernelError> {
        let entry = self.live_entry(other)?;
        entry
            .rights
            .write()
            .expect(LOCK_MSG)
            .insert(target.to_string(), right);
        Ok(())
    }

    /// Register a payload-type alias consulted by the rights lookup.
    pub fn register_alias(
        &self,
        actor: ActorId,
        alias: &str,
        target: &str,
    ) -> Result<(), KernelError> {
        let entry = self.live_entry(actor)?;
        entry
            .aliases
            .write()
            .expect(LOCK_MSG)
            .insert(alias.to_string(), target.to_string());
        Ok(())
    }

    /// Send `Exit` to every child of `parent` (fail-fast sibling cancel).
    pub fn terminate_children(&self, parent: ActorId, reason: Object) {
        if let Some(entry) = self.entry(parent) {
            let children: Vec<ActorId> = entry
                .children
                .lock()
                .expect(LOCK_MSG)
                .iter()
                .copied()
                .collect();
            for child in children {
                let _ = self.send_async(
                    ActorId::KERNEL,
                    child,
                    Payload::Exit {
                        reason: reason.clone(),
                    },
                );
            }
        }
    }

    /// Send `Exit` to every live actor. Cooperative: handlers finish their
    /// current message first.
    pub fn shutdown(&self, reason: Object) {
        let ids: Vec<ActorId> = self
            .inner
            .actors
            .read()
            .expect(LOCK_MSG)
            .values()
            .filter(|e| !e.passive)
            .map(|e| e.id)
            .collect();
        for id in ids {
            let _ = self.send_async(
                ActorId::KERNEL,
                id,
                Payload::Exit {
                    reason: reason.clone(),
                },
            );
        }
    }

    /// Block until every non-passive actor has terminated. Event-driven via
    /// condvar, no polling.
    pub fn wait_all(&self) {
        let mut guard = self.inner.shutdown_mutex.lock().expect(LOCK_MSG);
        while self.inner.active.load(Ordering::Acquire) > 0 {
            guard = self.inner.shutdown_condvar.wait(guard).expect(LOCK_MSG);
        }
    }

    pub fn actor_count(&self) -> usize {
        self.inner.actors.read().expect(LOCK_MSG).len()
    }

    /// Termination protocol: mark dead, drain-and-relay the mailbox,
    /// unregister, notify the parent with an exit record, signal children.
    fn finish_actor(&self, entry: &Arc<ActorEntry>, reason: Object) {
        entry.alive.store(false, Ordering::Release);

        // Relay undrained messages to the supervisor, if any.
        while let Ok(msg) = entry.receiver.try_recv() {
            if let Some(parent_id) = entry.parent
                && let Ok(parent) = self.live_entry(parent_id)
            {
                let _ = self.deliver(&parent, msg);
            }
        }

        if let Some(name) = entry.name.lock().expect(LOCK_MSG).take() {
            self.inner.names.write().expect(LOCK_MSG).remove(&name);
        }
        self.inner.actors.write().expect(LOCK_MSG).remove(&entry.id);

        if let Some(parent_id) = entry.parent
            && let Some(parent) = self.entry(parent_id)
        {
            parent.children.lock().expect(LOCK_MSG).remove(&entry.id);
            let _ = self.deliver(
                &parent,
                Message::new(
                    entry.id,
                    Payload::Exit {
                        reason: reason.clone(),
                    },
                ),
            );
        }

        let children: Vec<ActorId> = entry
            .children
            .lock()
            .expect(LOCK_MSG)
            .drain()
            .collect();
        for child in children {
            if let Ok(child_entry) = self.live_entry(child) {
                let _ = self.deliver(
                    &child_entry,
                    Message::new(
                        entry.id,
                        Payload::Exit {
                            reason: reason.clone(),
                        },
                    ),
                );
            }
        }

        let prev = self.inner.active.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            let _guard = self.inner.shutdown_mutex.lock().expect(LOCK_MSG);
            self.inner.shutdown_condvar.notify_all();
        }
        debug!(actor = %entry.id, "actor terminated");
    }
}

fn run_actor(kernel: Kernel, entry: Arc<ActorEntry>, mut handler: Box<dyn Handler>) {
    loop {
        let msg = match entry.receiver.recv() {
            Ok(msg) => msg,
            Err(_) => break,
        };
        match handler.handle(entry.id, msg) {
            HandlerSignal::Continue => {}
            HandlerSignal::Terminate { reason } => {
                kernel.finish_actor(&entry, reason);
                return;
            }
        }
    }
    kernel.finish_actor(&entry, Object::nil());
}
