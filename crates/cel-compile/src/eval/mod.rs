//! The value runtime.
//!
//! - [`Value`] represents runtime values, including the error sentinel
//! - [`Bindings`] supplies dotted-path variable bindings
//! - [`FunctionRegistry`] is the named-function method table
//! - [`Interpreter`] executes compiled IR against bindings
//!
//! The runtime holds no cross-call state beyond the method table; logical
//! temporaries and comprehension accumulators are per-call and local.

mod bindings;
mod error;
mod functions;
mod interp;
pub(crate) mod stdlib;
mod structs;
pub(crate) mod time;
mod value;

pub use bindings::{Bindings, EmptyBindings, MapBindings, PreparedBindings, Scope};
pub use error::{EvalError, EvalErrorKind};
pub use functions::{FunctionImpl, FunctionRegistry, Overload};
pub use interp::Interpreter;
pub use structs::StructValue;
pub use value::{
    CidrValue, Duration, IpValue, MapKey, OptionalValue, Timestamp, TypeValue, Value, ValueError,
    ValueMap,
};
