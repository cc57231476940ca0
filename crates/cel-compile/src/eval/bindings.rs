//! Variable bindings for CEL evaluation.
//!
//! The binding surface is a mapping from dotted-path strings to values:
//! keys may be simple identifiers (`"request"`) or already-qualified paths
//! (`"request.auth.claims"`). Qualified-identifier resolution embedded in
//! compiled programs probes these keys longest-prefix-first.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::Value;

/// Monotonic version source for binding maps; a map's version changes on
/// every mutation, giving the compile driver a sound identity key for its
/// derived-record memo.
static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// Trait for resolving variable bindings during evaluation.
pub trait Bindings: Send + Sync {
    /// Resolve a (possibly dotted) binding key to its value.
    ///
    /// Returns `None` if the key is not bound.
    fn resolve(&self, name: &str) -> Option<Value>;

    /// Check whether a key is bound without cloning its value.
    fn has(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
}

/// The standard binding map from dotted-path strings to values.
#[derive(Debug, Clone)]
pub struct MapBindings {
    entries: HashMap<String, Value>,
    version: u64,
}

impl Default for MapBindings {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            version: next_version(),
        }
    }
}

impl MapBindings {
    /// Create an empty binding map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a binding map from an iterator of entries.
    pub fn from_iter(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            version: next_version(),
        }
    }

    /// Insert a binding. The key may be a simple identifier or a dotted
    /// path.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(name.into(), value.into());
        self.version = next_version();
    }

    /// Remove a binding.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.version = next_version();
        self.entries.remove(name)
    }

    /// Identity of this map's key set: changes on every mutation. A clone
    /// shares the version, and rightly so (its derived record is
    /// identical).
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the bound keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

impl Bindings for MapBindings {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.entries.get(name).cloned()
    }

    fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

/// An empty binding surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyBindings;

impl Bindings for EmptyBindings {
    fn resolve(&self, _name: &str) -> Option<Value> {
        None
    }

    fn has(&self, _name: &str) -> bool {
        false
    }
}

/// A lexical scope layered over outer bindings.
///
/// Comprehension iteration variables, the accumulator, and `bind`-style
/// locals shadow outer names. Locals are per-call scratch; nothing
/// outlives one evaluate.
pub struct Scope<'a> {
    parent: &'a dyn Bindings,
    local: HashMap<String, Value>,
}

impl<'a> Scope<'a> {
    /// Create a scope over the given parent.
    pub fn new(parent: &'a dyn Bindings) -> Self {
        Self {
            parent,
            local: HashMap::new(),
        }
    }

    /// Add a local binding that shadows the parent (builder form).
    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.local.insert(name.into(), value.into());
        self
    }

    /// Insert a local binding.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.local.insert(name.into(), value.into());
    }
}

impl Bindings for Scope<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.local
            .get(name)
            .cloned()
            .or_else(|| self.parent.resolve(name))
    }

    fn has(&self, name: &str) -> bool {
        self.local.contains_key(name) || self.parent.has(name)
    }
}

impl<T: Bindings + ?Sized> Bindings for &T {
    fn resolve(&self, name: &str) -> Option<Value> {
        (**self).resolve(name)
    }

    fn has(&self, name: &str) -> bool {
        (**self).has(name)
    }
}

impl<T: Bindings> Bindings for Arc<T> {
    fn resolve(&self, name: &str) -> Option<Value> {
        (**self).resolve(name)
    }

    fn has(&self, name: &str) -> bool {
        (**self).has(name)
    }
}

/// The derived binding record a compiled program works against.
///
/// Wraps the caller's map with the precomputed key set that `Resolve`
/// candidate probing consults; deriving the key set is the per-bindings
/// cost the compile driver memoizes across evaluates with the same map
/// (identity-compared through [`MapBindings::version`]).
pub struct PreparedBindings<'a> {
    inner: &'a MapBindings,
    keys: Arc<HashSet<String>>,
}

impl<'a> PreparedBindings<'a> {
    /// Derive the prepared record from a user binding map.
    pub fn new(inner: &'a MapBindings) -> Self {
        let keys = Arc::new(inner.keys().cloned().collect());
        Self { inner, keys }
    }

    /// Reattach a previously-derived key set to its map.
    pub fn with_keys(inner: &'a MapBindings, keys: Arc<HashSet<String>>) -> Self {
        Self { inner, keys }
    }

    /// The derived key set, shareable across calls.
    pub fn keys(&self) -> Arc<HashSet<String>> {
        self.keys.clone()
    }

    /// Fast membership probe for a candidate dotted path.
    pub fn has_key(&self, name: &str) -> bool {
        self.keys.contains(name)
    }
}

impl Bindings for PreparedBindings<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        if !self.keys.contains(name) {
            return None;
        }
        self.inner.resolve(name)
    }

    fn has(&self, name: &str) -> bool {
        self.keys.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_bindings() {
        let mut bindings = MapBindings::new();
        bindings.insert("x", 42i64);
        bindings.insert("name", "hello");

        assert_eq!(bindings.resolve("x"), Some(Value::Int(42)));
        assert_eq!(bindings.resolve("name"), Some(Value::from("hello")));
        assert_eq!(bindings.resolve("unknown"), None);

        assert!(bindings.has("x"));
        assert!(!bindings.has("unknown"));
    }

    #[test]
    fn test_dotted_keys() {
        let mut bindings = MapBindings::new();
        bindings.insert("a.b.c", 1i64);
        bindings.insert("a.b", 2i64);

        assert_eq!(bindings.resolve("a.b.c"), Some(Value::Int(1)));
        assert_eq!(bindings.resolve("a.b"), Some(Value::Int(2)));
        assert_eq!(bindings.resolve("a"), None);
    }

    #[test]
    fn test_scope_shadowing() {
        let parent = MapBindings::from_iter([
            ("x".to_string(), Value::Int(1)),
            ("y".to_string(), Value::Int(2)),
        ]);

        let child = Scope::new(&parent).with_binding("x", 10i64);

        // Local binding shadows parent
        assert_eq!(child.resolve("x"), Some(Value::Int(10)));
        // Parent binding is accessible
        assert_eq!(child.resolve("y"), Some(Value::Int(2)));
        // Unknown still returns None
        assert_eq!(child.resolve("z"), None);
    }

    #[test]
    fn test_empty_bindings() {
        let bindings = EmptyBindings;
        assert_eq!(bindings.resolve("anything"), None);
        assert!(!bindings.has("anything"));
    }

    #[test]
    fn test_prepared_bindings_probe() {
        let mut bindings = MapBindings::new();
        bindings.insert("a.b", 1i64);
        let prepared = PreparedBindings::new(&bindings);

        assert!(prepared.has_key("a.b"));
        assert!(!prepared.has_key("a"));
        assert_eq!(prepared.resolve("a.b"), Some(Value::Int(1)));
        assert_eq!(prepared.resolve("a"), None);
    }
}
