//! Math extension library.
//!
//! Registers the `math.*` functions:
//!
//! - `math.greatest(...)` / `math.least(...)` - variadic or single-list
//! - `math.ceil/floor/round/trunc(double)` - rounding family
//! - `math.abs/sign(number)` - type-preserving
//! - `math.isNaN/isInf/isFinite(double)`
//! - `math.bitAnd/bitOr/bitXor/bitNot` - same-type int or uint
//! - `math.bitShiftLeft/bitShiftRight` - negative shift errors, shifts of
//!   64 or more yield zero

use std::cmp::Ordering;

use crate::eval::{EvalError, FunctionRegistry, Overload, Value};

/// Register the math extension.
pub fn install(registry: &mut FunctionRegistry) {
    registry.register(
        "math.greatest",
        Overload::variadic("math_greatest", |args| min_max(args, Ordering::Greater)),
    );
    registry.register(
        "math.least",
        Overload::variadic("math_least", |args| min_max(args, Ordering::Less)),
    );

    registry.register(
        "math.ceil",
        Overload::global("math_ceil_double", 1, |args| rounding(&args[0], f64::ceil)),
    );
    registry.register(
        "math.floor",
        Overload::global("math_floor_double", 1, |args| rounding(&args[0], f64::floor)),
    );
    registry.register(
        "math.round",
        Overload::global("math_round_double", 1, |args| rounding(&args[0], f64::round)),
    );
    registry.register(
        "math.trunc",
        Overload::global("math_trunc_double", 1, |args| rounding(&args[0], f64::trunc)),
    );

    registry.register("math.abs", Overload::global("math_abs", 1, |args| abs(&args[0])));
    registry.register("math.sign", Overload::global("math_sign", 1, |args| sign(&args[0])));

    registry.register(
        "math.isNaN",
        Overload::global("math_isnan_double", 1, |args| {
            double_probe(&args[0], "math.isNaN", f64::is_nan)
        }),
    );
    registry.register(
        "math.isInf",
        Overload::global("math_isinf_double", 1, |args| {
            double_probe(&args[0], "math.isInf", f64::is_infinite)
        }),
    );
    registry.register(
        "math.isFinite",
        Overload::global("math_isfinite_double", 1, |args| {
            double_probe(&args[0], "math.isFinite", f64::is_finite)
        }),
    );

    registry.register(
        "math.bitAnd",
        Overload::global("math_bitand", 2, |args| {
            bit_binary(&args[0], &args[1], "math.bitAnd", |a, b| a & b, |a, b| a & b)
        }),
    );
    registry.register(
        "math.bitOr",
        Overload::global("math_bitor", 2, |args| {
            bit_binary(&args[0], &args[1], "math.bitOr", |a, b| a | b, |a, b| a | b)
        }),
    );
    registry.register(
        "math.bitXor",
        Overload::global("math_bitxor", 2, |args| {
            bit_binary(&args[0], &args[1], "math.bitXor", |a, b| a ^ b, |a, b| a ^ b)
        }),
    );
    registry.register(
        "math.bitNot",
        Overload::global("math_bitnot", 1, |args| match &args[0] {
            Value::Int(i) => Value::Int(!i),
            Value::UInt(u) => Value::UInt(!u),
            other => Value::error(type_error("math.bitNot", other)),
        }),
    );
    registry.register(
        "math.bitShiftLeft",
        Overload::global("math_bitshiftleft", 2, |args| {
            bit_shift(&args[0], &args[1], true)
        }),
    );
    registry.register(
        "math.bitShiftRight",
        Overload::global("math_bitshiftright", 2, |args| {
            bit_shift(&args[0], &args[1], false)
        }),
    );
}

fn type_error(name: &str, value: &Value) -> EvalError {
    EvalError::no_matching_overload(&format!("{} on {}", name, value.type_name()))
}

/// Variadic (or single-list) fold under cross-numeric comparison.
fn min_max(args: &[Value], keep: Ordering) -> Value {
    let name = if keep == Ordering::Greater {
        "math.greatest"
    } else {
        "math.least"
    };

    let items: Vec<Value> = match args {
        [] => {
            return Value::error(EvalError::invalid_argument(format!(
                "{} requires at least one argument",
                name
            )))
        }
        [Value::List(list)] => {
            if list.is_empty() {
                return Value::error(EvalError::invalid_argument(format!(
                    "{} on an empty list",
                    name
                )));
            }
            list.to_vec()
        }
        _ => args.to_vec(),
    };

    let mut best: Option<Value> = None;
    for item in items {
        if !item.is_numeric() {
            return Value::error(type_error(name, &item));
        }
        if matches!(item, Value::Double(d) if d.is_nan()) {
            return Value::error(EvalError::invalid_argument(format!("{} of NaN", name)));
        }
        best = Some(match best {
            None => item,
            Some(current) => match current.compare(&item) {
                Some(ordering) if ordering == keep => current,
                Some(_) => item,
                None => return Value::error(type_error(name, &item)),
            },
        });
    }
    best.unwrap_or(Value::Null)
}

fn rounding(value: &Value, f: fn(f64) -> f64) -> Value {
    match value {
        Value::Double(d) => Value::Double(f(*d)),
        other => Value::error(type_error("math rounding", other)),
    }
}

fn abs(value: &Value) -> Value {
    match value {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .unwrap_or_else(|| Value::error(EvalError::overflow("math.abs overflow"))),
        Value::UInt(u) => Value::UInt(*u),
        Value::Double(d) => Value::Double(d.abs()),
        other => Value::error(type_error("math.abs", other)),
    }
}

fn sign(value: &Value) -> Value {
    match value {
        Value::Int(i) => Value::Int(i.signum()),
        Value::UInt(u) => Value::UInt(if *u == 0 { 0 } else { 1 }),
        Value::Double(d) => {
            if d.is_nan() {
                Value::Double(f64::NAN)
            } else if *d == 0.0 {
                Value::Double(0.0)
            } else {
                Value::Double(d.signum())
            }
        }
        other => Value::error(type_error("math.sign", other)),
    }
}

fn double_probe(value: &Value, name: &str, probe: fn(f64) -> bool) -> Value {
    match value {
        Value::Double(d) => Value::Bool(probe(*d)),
        other => Value::error(type_error(name, other)),
    }
}

fn bit_binary(
    left: &Value,
    right: &Value,
    name: &str,
    int_op: fn(i64, i64) -> i64,
    uint_op: fn(u64, u64) -> u64,
) -> Value {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Value::Int(int_op(*a, *b)),
        (Value::UInt(a), Value::UInt(b)) => Value::UInt(uint_op(*a, *b)),
        _ => Value::error(EvalError::no_matching_overload(name)),
    }
}

/// Shifts take an int shift count; negative counts error, counts of 64 or
/// more produce zero. Right shifts are logical (two's-complement bit
/// pattern).
fn bit_shift(value: &Value, shift: &Value, left_shift: bool) -> Value {
    let s = match shift {
        Value::Int(s) => *s,
        other => {
            return Value::error(EvalError::type_mismatch("int shift count", &other.type_name()))
        }
    };
    if s < 0 {
        return Value::error(EvalError::invalid_argument(format!(
            "negative shift count: {}",
            s
        )));
    }

    match value {
        Value::Int(i) => {
            if s >= 64 {
                return Value::Int(0);
            }
            let bits = *i as u64;
            let shifted = if left_shift { bits << s } else { bits >> s };
            Value::Int(shifted as i64)
        }
        Value::UInt(u) => {
            if s >= 64 {
                return Value::UInt(0);
            }
            Value::UInt(if left_shift { u << s } else { u >> s })
        }
        other => Value::error(type_error("math.bitShift", other)),
    }
}
