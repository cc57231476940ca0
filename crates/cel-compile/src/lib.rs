//! cel-compile: compiles Common Expression Language (CEL) expressions
//! into executable programs.
//!
//! Each source expression is transformed once - parsed into a CEL-AST,
//! lowered to an emission-ready IR, and wrapped with the runtime method
//! table - and thereafter evaluated against per-call bindings:
//!
//! ```
//! use cel_compile::{compile, CompileOptions, MapBindings, Value};
//!
//! let program = compile("size(names.filter(n, n.startsWith(prefix)))",
//!     CompileOptions::default()).unwrap();
//!
//! let mut bindings = MapBindings::new();
//! bindings.insert("names", Value::list(["alice", "bob", "aria"]));
//! bindings.insert("prefix", "a");
//! assert_eq!(program.evaluate(&bindings).unwrap(), Value::Int(2));
//! ```
//!
//! # Architecture
//!
//! The pipeline is a straight line: parser (the `cel-compile-parser`
//! crate) -> transformer ([`lower`]) -> emitter ([`emit`]) -> program
//! ([`Program`]). Rust has no runtime code loading, so the program is an
//! IR interpreter and the emitted source is kept as a diagnostic
//! rendering on [`Program::source`].
//!
//! # Errors
//!
//! `compile` rejects invalid syntax and malformed macros with a
//! [`CompileError`]. At evaluate time every contract violation travels
//! internally as an error sentinel - absorbable by `&&`, `||`, and
//! `has()` - and surfaces as a [`CelError`] only if it reaches the top of
//! the expression.

mod emit;
mod error;
pub mod eval;
pub mod ext;
pub mod ir;
pub mod lower;
mod program;

use std::sync::Arc;

pub use cel_compile_parser::{parse, parse_with_macros, MacroRegistry, ParseError};

pub use emit::emit;
pub use error::{CelError, CompileError};
pub use eval::{
    Bindings, CidrValue, Duration, EmptyBindings, EvalError, EvalErrorKind, FunctionRegistry,
    IpValue, MapBindings, MapKey, OptionalValue, Overload, StructValue, Timestamp, TypeValue,
    Value, ValueError, ValueMap,
};
pub use program::Program;

/// Options for [`compile`].
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Disable parse-time macro expansion (`has`, `all`, `exists`, ...).
    pub disable_macros: bool,
    /// Dotted namespace prefix applied to unqualified identifier lookups
    /// and struct type names.
    pub container: String,
}

/// The compile driver: parse, lower, emit, and install the runtime.
pub fn compile(source: &str, options: CompileOptions) -> Result<Program, CompileError> {
    let ast = if options.disable_macros {
        parse_with_macros(source, MacroRegistry::new())?
    } else {
        parse(source)?
    };

    let ir = lower::lower(&ast, &options.container)?;
    let emitted = emit::emit(&ir);
    let functions = Arc::new(ext::standard_registry());

    Ok(Program::new(ir, emitted, functions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_and_evaluate() {
        let program = compile("1 + 2 * 3", CompileOptions::default()).unwrap();
        assert_eq!(program.evaluate_empty().unwrap(), Value::Int(7));
    }

    #[test]
    fn test_compile_rejects_bad_syntax() {
        assert!(compile("1 +", CompileOptions::default()).is_err());
        assert!(compile("has(42)", CompileOptions::default()).is_err());
        assert!(compile("", CompileOptions::default()).is_err());
    }

    #[test]
    fn test_disable_macros() {
        let options = CompileOptions {
            disable_macros: true,
            ..CompileOptions::default()
        };
        // all() is no longer a macro; it compiles to an unknown function
        let program = compile("[1].all(x, x > 0)", options).unwrap();
        assert!(program.evaluate_empty().is_err());
    }

    #[test]
    fn test_container_resolution() {
        let options = CompileOptions {
            container: "x.y".to_string(),
            ..CompileOptions::default()
        };
        let program = compile("z", options).unwrap();

        let mut bindings = MapBindings::new();
        bindings.insert("x.y.z", 1i64);
        bindings.insert("x.z", 2i64);
        bindings.insert("z", 3i64);
        assert_eq!(program.evaluate(&bindings).unwrap(), Value::Int(1));

        let mut bindings = MapBindings::new();
        bindings.insert("x.z", 2i64);
        bindings.insert("z", 3i64);
        assert_eq!(program.evaluate(&bindings).unwrap(), Value::Int(2));

        let mut bindings = MapBindings::new();
        bindings.insert("z", 3i64);
        assert_eq!(program.evaluate(&bindings).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_source_is_exposed() {
        let program = compile("a && b", CompileOptions::default()).unwrap();
        assert!(program.source().contains("rt.and"));
    }
}
