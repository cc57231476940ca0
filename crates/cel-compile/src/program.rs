//! Compiled CEL programs.
//!
//! A `Program` is the closure `compile()` produces: the lowered IR, the
//! emitted diagnostic source, and the immutable runtime method table.
//! `evaluate` runs the IR against caller-supplied bindings; nothing in the
//! program mutates across calls except the identity-keyed memo of the
//! derived binding record, so one program may be evaluated from many
//! threads at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::CelError;
use crate::eval::{FunctionRegistry, Interpreter, MapBindings, PreparedBindings, Value};
use crate::ir::Ir;

/// Memoized derived record: the key set of the last bindings map seen,
/// tagged with that map's version.
struct BindingMemo {
    version: u64,
    keys: Arc<HashSet<String>>,
}

/// A compiled CEL program ready for evaluation.
pub struct Program {
    ir: Arc<Ir>,
    source: String,
    functions: Arc<FunctionRegistry>,
    memo: Mutex<Option<BindingMemo>>,
}

impl Program {
    pub(crate) fn new(ir: Ir, source: String, functions: Arc<FunctionRegistry>) -> Self {
        Self {
            ir: Arc::new(ir),
            source,
            functions,
            memo: Mutex::new(None),
        }
    }

    /// The emitted host source for this program (diagnostic).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The compiled IR (diagnostic).
    pub fn ir(&self) -> &Ir {
        &self.ir
    }

    /// Evaluate against the given bindings.
    ///
    /// Successive evaluates with the same (unmutated) binding map reuse
    /// the derived key-set record instead of rebuilding it.
    pub fn evaluate(&self, bindings: &MapBindings) -> Result<Value, CelError> {
        let prepared = self.prepare(bindings);
        let result = Interpreter::new(&prepared, &self.functions).eval(&self.ir);
        match result {
            Value::Error(e) => Err(CelError::from(e.as_ref())),
            value => Ok(value),
        }
    }

    /// Evaluate with no bindings.
    pub fn evaluate_empty(&self) -> Result<Value, CelError> {
        self.evaluate(&MapBindings::new())
    }

    fn prepare<'a>(&self, bindings: &'a MapBindings) -> PreparedBindings<'a> {
        let mut memo = self.memo.lock().expect("binding memo poisoned");
        if let Some(entry) = memo.as_ref() {
            if entry.version == bindings.version() {
                return PreparedBindings::with_keys(bindings, entry.keys.clone());
            }
        }
        let prepared = PreparedBindings::new(bindings);
        *memo = Some(BindingMemo {
            version: bindings.version(),
            keys: prepared.keys(),
        });
        prepared
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
