//! The Slug object model
//!
//! Every value the language touches is an [`Object`]: a closed sum of
//! variants plus an optional tag map. Composite payloads sit behind `Arc` so
//! cloning is O(1) and values can cross actor mailboxes.
//!
//! Tags are metadata: they never participate in equality. The only reserved
//! tags are `@export` (module export) and `@import` (import-binding
//! destructuring).

use crate::env::{Env, TraceFrame};
use crate::foreign::NativeFn;
use slug_core::Dec64;
use slug_syntax::ast::{Block, Param};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

/// Tag map: tag name to argument list.
pub type TagMap = HashMap<String, Vec<Object>>;

/// Reserved tag marking a value as a module export.
pub const TAG_EXPORT: &str = "export";
/// Reserved tag marking a map produced by `import(…)`.
pub const TAG_IMPORT: &str = "import";

/// A user-defined function: parameters, body, captured environment.
#[derive(Debug)]
pub struct Function {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Arc<Block>,
    pub env: Env,
    pub signature: String,
    pub has_tail_call: bool,
}

impl Function {
    /// Fewest positional arguments the function accepts (params without a
    /// default, excluding a trailing variadic).
    pub fn min_arity(&self) -> usize {
        self.params
            .iter()
            .filter(|p| !p.variadic && p.default.is_none())
            .count()
    }

    /// Whether `count` positional arguments can bind to the parameter list.
    pub fn accepts_arity(&self, count: usize) -> bool {
        let variadic = self.params.last().is_some_and(|p| p.variadic);
        if variadic {
            count >= self.params.len() - 1
        } else {
            count <= self.params.len()
        }
    }
}

/// Render a parameter list as a stable signature string, e.g.
/// `(a, b = ?, ...rest)`.
pub fn signature_of(params: &[Param]) -> String {
    let mut parts = Vec::with_capacity(params.len());
    for p in params {
        if p.variadic {
            parts.push(format!("...{}", p.name));
        } else if p.default.is_some() {
            parts.push(format!("{} = ?", p.name));
        } else {
            parts.push(p.name.clone());
        }
    }
    format!("({})", parts.join(", "))
}

/// A set of same-named functions dispatched by arity.
#[derive(Debug, Default)]
pub struct FunctionGroup {
    pub name: String,
    pub functions: Vec<Arc<Function>>,
}

impl FunctionGroup {
    /// Select a member for `count` arguments: an exact arity match wins,
    /// otherwise the first member that can bind them.
    pub fn dispatch(&self, count: usize) -> Option<Arc<Function>> {
        let exact = self.functions.iter().find(|f| {
            !f.params.last().is_some_and(|p| p.variadic) && f.params.len() == count
        });
        if let Some(f) = exact {
            return Some(f.clone());
        }
        self.functions
            .iter()
            .find(|f| f.accepts_arity(count))
            .cloned()
    }

    /// Insert or replace the member with the same signature.
    pub fn insert(&mut self, func: Arc<Function>) {
        if let Some(slot) = self
            .functions
            .iter_mut()
            .find(|f| f.signature == func.signature)
        {
            *slot = func;
        } else {
            self.functions.push(func);
        }
    }
}

/// A native function installed through the foreign registry.
pub struct Foreign {
    pub name: String,
    pub params: Vec<Param>,
    pub signature: String,
    pub func: NativeFn,
}

impl fmt::Debug for Foreign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Foreign")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

/// An evaluated module.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub path: PathBuf,
    pub source: Arc<str>,
    pub program: Arc<slug_syntax::ast::Program>,
    pub env: Env,
}

/// A three-field slice; any field may be nil.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceValue {
    pub start: Option<Dec64>,
    pub end: Option<Dec64>,
    pub step: Option<Dec64>,
}

/// Tail-call sentinel consumed by the application trampoline.
#[derive(Debug)]
pub struct TailCallValue {
    pub name: String,
    pub callee: Object,
    pub args: Vec<Object>,
}

/// A synchronous failure value. Not catchable from the language.
#[derive(Debug)]
pub struct ErrorValue {
    pub message: String,
}

/// A thrown, catchable exception with its captured stack trace.
#[derive(Debug)]
pub struct RuntimeErrorValue {
    pub payload: Object,
    pub trace: Vec<TraceFrame>,
}

/// A map with hashable keys. The original key object is kept alongside each
/// value so iteration and rendering see what the program wrote.
#[derive(Debug, Default)]
pub struct MapValue {
    pub entries: HashMap<MapKey, MapEntry>,
}

#[derive(Debug, Clone)]
pub struct MapEntry {
    pub key: Object,
    pub value: Object,
}

impl MapValue {
    pub fn new() -> Self {
        MapValue::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: Object, value: Object) -> Option<()> {
        let map_key = MapKey::from_object(&key)?;
        self.entries.insert(map_key, MapEntry { key, value });
        Some(())
    }

    pub fn get(&self, key: &Object) -> Option<&Object> {
        let map_key = MapKey::from_object(key)?;
        self.entries.get(&map_key).map(|e| &e.value)
    }

    pub fn contains(&self, key: &Object) -> bool {
        MapKey::from_object(key)
            .map(|k| self.entries.contains_key(&k))
            .unwrap_or(false)
    }
}

impl PartialEq for MapValue {
    fn eq(&self, other: &Self) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries
            .iter()
            .all(|(k, e)| other.entries.get(k).is_some_and(|o| o.value == e.value))
    }
}

/// Hashable subset of the object model, usable as a map key.
///
/// Number, String, Boolean and Bytes hash deterministically; everything else
/// is rejected at map construction or index time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Number(Dec64),
    Str(Arc<str>),
    Bool(bool),
    Bytes(Arc<[u8]>),
}

impl MapKey {
    pub fn from_object(obj: &Object) -> Option<MapKey> {
        match &obj.value {
            Value::Number(n) => Some(MapKey::Number(*n)),
            Value::Str(s) => Some(MapKey::Str(s.clone())),
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            Value::Bytes(b) => Some(MapKey::Bytes(b.clone())),
            _ => None,
        }
    }

    pub fn to_object(&self) -> Object {
        match self {
            MapKey::Number(n) => Object::number(*n),
            MapKey::Str(s) => Object::from(Value::Str(s.clone())),
            MapKey::Bool(b) => Object::boolean(*b),
            MapKey::Bytes(b) => Object::from(Value::Bytes(b.clone())),
        }
    }

    /// Stable 64-bit key, deterministic within a single process.
    pub fn hash64(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// The variant part of an object.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(Dec64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    List(Arc<Vec<Object>>),
    Map(Arc<MapValue>),
    Function(Arc<Function>),
    FunctionGroup(Arc<FunctionGroup>),
    Foreign(Arc<Foreign>),
    Module(Arc<Module>),
    Slice(Arc<SliceValue>),
    /// `return` wrapper, unwrapped at function boundaries.
    Return(Arc<Object>),
    /// Trampoline sentinel; never escapes `apply_function`.
    TailCall(Arc<TailCallValue>),
    /// Synchronous failure; short-circuits evaluation, not catchable.
    Error(Arc<ErrorValue>),
    /// Thrown exception; catchable by a catch block.
    RuntimeError(Arc<RuntimeErrorValue>),
}

/// A language value: a variant plus optional tags.
#[derive(Debug, Clone)]
pub struct Object {
    pub value: Value,
    pub tags: Option<Arc<TagMap>>,
}

impl From<Value> for Object {
    fn from(value: Value) -> Self {
        Object { value, tags: None }
    }
}

impl Object {
    pub fn nil() -> Object {
        Value::Nil.into()
    }

    pub fn boolean(b: bool) -> Object {
        Value::Bool(b).into()
    }

    pub fn number(n: Dec64) -> Object {
        Value::Number(n).into()
    }

    pub fn int(n: i64) -> Object {
        Value::Number(Dec64::from_i64(n)).into()
    }

    pub fn string(s: impl AsRef<str>) -> Object {
        Value::Str(Arc::from(s.as_ref())).into()
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Object {
        Value::Bytes(Arc::from(b.into().into_boxed_slice())).into()
    }

    pub fn list(items: Vec<Object>) -> Object {
        Value::List(Arc::new(items)).into()
    }

    pub fn map(map: MapValue) -> Object {
        Value::Map(Arc::new(map)).into()
    }

    pub fn error(message: impl Into<String>) -> Object {
        Value::Error(Arc::new(ErrorValue {
            message: message.into(),
        }))
        .into()
    }

    pub fn runtime_error(payload: Object, trace: Vec<TraceFrame>) -> Object {
        Value::RuntimeError(Arc::new(RuntimeErrorValue { payload, trace })).into()
    }

    pub fn return_value(inner: Object) -> Object {
        Value::Return(Arc::new(inner)).into()
    }

    pub fn tail_call(name: String, callee: Object, args: Vec<Object>) -> Object {
        Value::TailCall(Arc::new(TailCallValue { name, callee, args })).into()
    }

    /// Error or RuntimeError: short-circuits sibling evaluation.
    pub fn is_error(&self) -> bool {
        matches!(self.value, Value::Error(_) | Value::RuntimeError(_))
    }

    /// Anything that aborts straight-line evaluation of a block.
    pub fn is_abrupt(&self) -> bool {
        matches!(
            self.value,
            Value::Error(_) | Value::RuntimeError(_) | Value::Return(_) | Value::TailCall(_)
        )
    }

    /// Slug truthiness: only `false` and `nil` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self.value, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.value, Value::Nil)
    }

    pub fn is_hashable(&self) -> bool {
        MapKey::from_object(self).is_some()
    }

    pub fn type_name(&self) -> &'static str {
        match &self.value {
            Value::Nil => "NIL",
            Value::Bool(_) => "BOOLEAN",
            Value::Number(_) => "NUMBER",
            Value::Str(_) => "STRING",
            Value::Bytes(_) => "BYTES",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Function(_) => "FUNCTION",
            Value::FunctionGroup(_) => "FUNCTION GROUP",
            Value::Foreign(_) => "FOREIGN",
            Value::Module(_) => "MODULE",
            Value::Slice(_) => "SLICE",
            Value::Return(_) => "RETURN",
            Value::TailCall(_) => "TAIL CALL",
            Value::Error(_) => "ERROR",
            Value::RuntimeError(_) => "RUNTIME ERROR",
        }
    }

    /// Whether this variant accepts tags: containers, callables, and the
    /// taggable scalars (Number, String, Boolean).
    pub fn accepts_tags(&self) -> bool {
        matches!(
            self.value,
            Value::Bool(_)
                | Value::Number(_)
                | Value::Str(_)
                | Value::Bytes(_)
                | Value::List(_)
                | Value::Map(_)
                | Value::Function(_)
                | Value::FunctionGroup(_)
                | Value::Foreign(_)
                | Value::Module(_)
        )
    }

    /// Merge tags onto the value if its variant accepts them; other variants
    /// pass through untouched.
    pub fn apply_tags_if_present(mut self, tags: TagMap) -> Object {
        if tags.is_empty() || !self.accepts_tags() {
            return self;
        }
        let mut merged = self.tags.map(|t| (*t).clone()).unwrap_or_default();
        merged.extend(tags);
        self.tags = Some(Arc::new(merged));
        self
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags
            .as_ref()
            .is_some_and(|t| t.contains_key(name))
    }

    pub fn tag_args(&self, name: &str) -> Option<Vec<Object>> {
        self.tags.as_ref().and_then(|t| t.get(name).cloned())
    }

    /// Exportable values carry the `@export` tag.
    pub fn is_exportable(&self) -> bool {
        self.has_tag(TAG_EXPORT)
    }

    /// First tag name, if any. Used by the kernel to classify payloads for
    /// rights checks; sorted so the choice is deterministic.
    pub fn primary_tag(&self) -> Option<String> {
        self.tags
            .as_ref()
            .and_then(|t| t.keys().min().cloned())
    }

    /// Canonical rendering. Strings render bare at the top level and quoted
    /// inside containers.
    pub fn inspect(&self) -> String {
        match &self.value {
            Value::Str(s) => s.to_string(),
            _ => self.inspect_quoted(),
        }
    }

    /// Container-position rendering: like `inspect` but strings keep their
    /// quotes.
    pub fn inspect_quoted(&self) -> String {
        match &self.value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Str(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Value::Bytes(b) => {
                let mut out = String::from("b\"");
                for byte in b.iter() {
                    if byte.is_ascii_graphic() || *byte == b' ' {
                        out.push(*byte as char);
                    } else {
                        out.push_str(&format!("\\x{:02x}", byte));
                    }
                }
                out.push('"');
                out
            }
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|o| o.inspect_quoted()).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let mut parts: Vec<String> = map
                    .entries
                    .values()
                    .map(|e| format!("{}: {}", e.key.inspect_quoted(), e.value.inspect_quoted()))
                    .collect();
                parts.sort();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Function(f) => match &f.name {
                Some(name) => format!("fn {}{}", name, f.signature),
                None => format!("fn{}", f.signature),
            },
            Value::FunctionGroup(g) => format!("fn {}[{} signatures]", g.name, g.functions.len()),
            Value::Foreign(f) => format!("foreign fn {}{}", f.name, f.signature),
            Value::Module(m) => format!("module {}", m.name),
            Value::Slice(s) => {
                let part = |d: &Option<Dec64>| match d {
                    Some(n) => n.to_string(),
                    None => "nil".to_string(),
                };
                format!("slice({}, {}, {})", part(&s.start), part(&s.end), part(&s.step))
            }
            Value::Return(inner) => inner.inspect_quoted(),
            Value::TailCall(tc) => format!("<tail call {}>", tc.name),
            Value::Error(e) => format!("error: {}", e.message),
            Value::RuntimeError(e) => format!("runtime error: {}", e.payload.inspect()),
        }
    }
}

// Tags are metadata; equality compares the variant only.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (&self.value, &other.value) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Slice(a), Value::Slice(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::FunctionGroup(a), Value::FunctionGroup(b)) => Arc::ptr_eq(a, b),
            (Value::Foreign(a), Value::Foreign(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Return(a), Value::Return(b)) => a == b,
            (Value::TailCall(a), Value::TailCall(b)) => Arc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b),
            (Value::RuntimeError(a), Value::RuntimeError(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inspect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_tags() {
        let plain = Object::int(5);
        let tagged = Object::int(5)
            .apply_tags_if_present(TagMap::from([("export".to_string(), Vec::new())]));
        assert_eq!(plain, tagged);
        assert!(tagged.is_exportable());
        assert!(!plain.is_exportable());
    }

    #[test]
    fn test_tags_only_stick_to_taggable_variants() {
        let tags = TagMap::from([("x".to_string(), Vec::new())]);
        assert!(Object::nil().apply_tags_if_present(tags.clone()).tags.is_none());
        assert!(Object::int(1).apply_tags_if_present(tags.clone()).tags.is_some());
        assert!(Object::list(vec![]).apply_tags_if_present(tags).tags.is_some());
    }

    #[test]
    fn test_list_equality_elementwise() {
        let a = Object::list(vec![Object::int(1), Object::string("x")]);
        let b = Object::list(vec![Object::int(1), Object::string("x")]);
        let c = Object::list(vec![Object::int(2), Object::string("x")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_map_equality_by_keys_and_values() {
        let mut m1 = MapValue::new();
        m1.insert(Object::string("a"), Object::int(1)).unwrap();
        m1.insert(Object::int(2), Object::string("two")).unwrap();
        let mut m2 = MapValue::new();
        // insertion order is irrelevant
        m2.insert(Object::int(2), Object::string("two")).unwrap();
        m2.insert(Object::string("a"), Object::int(1)).unwrap();
        assert_eq!(Object::map(m1), Object::map(m2));
    }

    #[test]
    fn test_map_rejects_unhashable_keys() {
        let mut m = MapValue::new();
        assert!(m.insert(Object::list(vec![]), Object::int(1)).is_none());
        assert!(m.insert(Object::nil(), Object::int(1)).is_none());
    }

    #[test]
    fn test_map_key_stability() {
        let a = MapKey::from_object(&Object::int(42)).unwrap();
        let b = MapKey::from_object(&Object::int(42)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hash64(), b.hash64());
    }

    #[test]
    fn test_map_key_equal_values_equal_keys() {
        // 1e1 and 10 are the same Number, so they must map to the same key
        let a = MapKey::from_object(&Object::number(Dec64::from_parts(1, 1))).unwrap();
        let b = MapKey::from_object(&Object::int(10)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hash64(), b.hash64());
    }

    #[test]
    fn test_inspect_rendering() {
        assert_eq!(Object::string("hi").inspect(), "hi");
        assert_eq!(
            Object::list(vec![Object::string("a"), Object::int(2)]).inspect(),
            "[\"a\", 2]"
        );
        let mut m = MapValue::new();
        m.insert(Object::string("k"), Object::int(1)).unwrap();
        assert_eq!(Object::map(m).inspect(), "{\"k\": 1}");
        assert_eq!(Object::bytes(vec![65, 0]).inspect(), "b\"A\\x00\"");
        assert_eq!(Object::nil().inspect(), "nil");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Object::nil().is_truthy());
        assert!(!Object::boolean(false).is_truthy());
        assert!(Object::boolean(true).is_truthy());
        assert!(Object::int(0).is_truthy());
        assert!(Object::string("").is_truthy());
    }

    #[test]
    fn test_function_arity() {
        use slug_syntax::ast::Param;
        let p = |name: &str, variadic: bool| Param {
            name: name.to_string(),
            default: None,
            variadic,
        };
        let f = Function {
            name: None,
            params: vec![p("a", false), p("rest", true)],
            body: Arc::new(Block::default()),
            env: Env::new(),
            signature: signature_of(&[p("a", false), p("rest", true)]),
            has_tail_call: false,
        };
        assert_eq!(f.min_arity(), 1);
        assert!(f.accepts_arity(1));
        assert!(f.accepts_arity(5));
        assert!(!f.accepts_arity(0));
        assert_eq!(f.signature, "(a, ...rest)");
    }
}
