//! Extension libraries.
//!
//! Each module registers a family of named functions into the
//! [`FunctionRegistry`]; the compile driver installs all of them once per
//! compile and the resulting table is shared immutably by every evaluate.

pub mod encoders_ext;
pub mod math_ext;
pub mod net_ext;
pub mod optionals_ext;
pub mod strings_ext;

use crate::eval::{stdlib, FunctionRegistry};

/// Build the full runtime method table: the standard library plus all
/// extensions.
pub fn standard_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    stdlib::install(&mut registry);
    math_ext::install(&mut registry);
    strings_ext::install(&mut registry);
    encoders_ext::install(&mut registry);
    optionals_ext::install(&mut registry);
    net_ext::install(&mut registry);
    registry
}
