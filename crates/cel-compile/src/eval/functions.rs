//! Function registry for runtime dispatch.
//!
//! Named functions (standard library and extensions) are stored as
//! overloads keyed by function name. The compile driver installs the
//! method table once; compiled programs capture it immutably, so parallel
//! evaluates share it without synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use super::Value;

/// A function implementation that takes already-evaluated arguments and
/// returns a value. Member functions receive the receiver as the first
/// argument.
pub type FunctionImpl = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// A function overload with its implementation.
#[derive(Clone)]
pub struct Overload {
    /// The overload ID (e.g., "size_string").
    pub id: &'static str,
    /// Whether this is a member function (receiver.method(args)).
    pub is_member: bool,
    /// Number of parameters including the receiver; None for variadic.
    pub arity: Option<usize>,
    /// The implementation function.
    pub implementation: FunctionImpl,
}

impl Overload {
    /// Create a global (standalone) overload.
    pub fn global(
        id: &'static str,
        arity: usize,
        implementation: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            is_member: false,
            arity: Some(arity),
            implementation: Arc::new(implementation),
        }
    }

    /// Create a member overload; arity counts the receiver.
    pub fn member(
        id: &'static str,
        arity: usize,
        implementation: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            is_member: true,
            arity: Some(arity),
            implementation: Arc::new(implementation),
        }
    }

    /// Create a variadic global overload.
    pub fn variadic(
        id: &'static str,
        implementation: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            is_member: false,
            arity: None,
            implementation: Arc::new(implementation),
        }
    }

    /// Call this overload with the given arguments.
    pub fn call(&self, args: &[Value]) -> Value {
        (self.implementation)(args)
    }

    /// Check whether this overload accepts a call shape.
    pub fn accepts(&self, arity: usize, is_member: bool) -> bool {
        self.is_member == is_member && self.arity.map_or(true, |a| a == arity)
    }
}

impl std::fmt::Debug for Overload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overload")
            .field("id", &self.id)
            .field("is_member", &self.is_member)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Registry of all named functions available during evaluation.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Vec<Overload>>,
}

impl FunctionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an overload under a function name; overloads for the same
    /// name accumulate.
    pub fn register(&mut self, name: impl Into<String>, overload: Overload) {
        self.functions.entry(name.into()).or_default().push(overload);
    }

    /// Check if a function exists.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Find overloads matching a call shape.
    pub fn find(&self, name: &str, arity: usize, is_member: bool) -> Vec<&Overload> {
        self.functions
            .get(name)
            .map(|overloads| {
                overloads
                    .iter()
                    .filter(|o| o.accepts(arity, is_member))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get the number of registered function names.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.len())
            .finish()
    }
}
