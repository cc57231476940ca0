//! Optionals extension library.
//!
//! Constructors:
//!
//! - `optional.of(T) -> optional<T>`
//! - `optional.none() -> optional`
//! - `optional.ofNonZeroValue(T) -> optional<T>` - absent for zero values
//!
//! Methods:
//!
//! - `.hasValue() -> bool`
//! - `.value() -> T` - errors on an absent optional
//! - `.or(optional<T>) -> optional<T>` - first present optional
//! - `.orValue(T) -> T` - inner value or default
//!
//! `optMap`/`optFlatMap` are parse-time macros, and the `.?`/`[?]`
//! operators are handled structurally by the interpreter.

use crate::eval::{EvalError, FunctionRegistry, OptionalValue, Overload, Value};

/// Register the optionals extension.
pub fn install(registry: &mut FunctionRegistry) {
    registry.register(
        "optional.of",
        Overload::global("optional_of", 1, |args| {
            Value::optional_some(args[0].clone())
        }),
    );

    registry.register(
        "optional.none",
        Overload::global("optional_none", 0, |_args| Value::optional_none()),
    );

    registry.register(
        "optional.ofNonZeroValue",
        Overload::global("optional_of_non_zero_value", 1, |args| {
            if args[0].is_zero_value() {
                Value::optional_none()
            } else {
                Value::optional_some(args[0].clone())
            }
        }),
    );

    registry.register(
        "hasValue",
        Overload::member("optional_has_value", 1, |args| match &args[0] {
            Value::Optional(opt) => Value::Bool(opt.is_present()),
            other => Value::error(not_optional(other)),
        }),
    );

    registry.register(
        "value",
        Overload::member("optional_value", 1, |args| match &args[0] {
            Value::Optional(OptionalValue::Some(v)) => (**v).clone(),
            Value::Optional(OptionalValue::None) => {
                Value::error(EvalError::invalid_argument("optional.none() dereference"))
            }
            other => Value::error(not_optional(other)),
        }),
    );

    registry.register(
        "or",
        Overload::member("optional_or_optional", 2, |args| match (&args[0], &args[1]) {
            (Value::Optional(OptionalValue::Some(_)), _) => args[0].clone(),
            (Value::Optional(OptionalValue::None), Value::Optional(_)) => args[1].clone(),
            (Value::Optional(OptionalValue::None), other) => Value::error(not_optional(other)),
            (other, _) => Value::error(not_optional(other)),
        }),
    );

    registry.register(
        "orValue",
        Overload::member("optional_or_value", 2, |args| match &args[0] {
            Value::Optional(OptionalValue::Some(v)) => (**v).clone(),
            Value::Optional(OptionalValue::None) => args[1].clone(),
            other => Value::error(not_optional(other)),
        }),
    );
}

fn not_optional(value: &Value) -> EvalError {
    EvalError::type_mismatch("optional", &value.type_name())
}
