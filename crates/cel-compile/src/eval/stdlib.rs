//! CEL standard library functions.
//!
//! Installs `size`, the string predicates, `matches`, and the
//! timestamp/duration accessors into the function registry. Operators and
//! type conversions are handled structurally by the interpreter.

use std::sync::Arc;

use super::time::{self, TimestampComponent};
use super::{Duration, EvalError, FunctionRegistry, Overload, Timestamp, Value};

/// Register the standard library.
pub fn install(registry: &mut FunctionRegistry) {
    // size() is both a global function and a method
    registry.register("size", Overload::global("size", 1, |args| size(&args[0])));
    registry.register("size", Overload::member("size_member", 1, |args| size(&args[0])));

    registry.register(
        "contains",
        Overload::member("contains_string", 2, |args| {
            string_predicate(args, "contains", |s, sub| s.contains(sub))
        }),
    );
    registry.register(
        "startsWith",
        Overload::member("starts_with_string", 2, |args| {
            string_predicate(args, "startsWith", |s, prefix| s.starts_with(prefix))
        }),
    );
    registry.register(
        "endsWith",
        Overload::member("ends_with_string", 2, |args| {
            string_predicate(args, "endsWith", |s, suffix| s.ends_with(suffix))
        }),
    );

    registry.register(
        "matches",
        Overload::member("matches_string", 2, |args| matches_impl(&args[0], &args[1])),
    );
    registry.register(
        "matches",
        Overload::global("matches_global", 2, |args| matches_impl(&args[0], &args[1])),
    );

    install_timestamp_accessors(registry);
}

/// `size(v)`: element count for list/map/bytes, code-point count for
/// strings.
fn size(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            // ASCII fast path: byte length equals code-point count
            if s.is_ascii() {
                Value::Int(s.len() as i64)
            } else {
                Value::Int(s.chars().count() as i64)
            }
        }
        Value::Bytes(b) => Value::Int(b.len() as i64),
        Value::List(l) => Value::Int(l.len() as i64),
        Value::Map(m) => Value::Int(m.len() as i64),
        other => Value::error(EvalError::no_matching_overload_for("size", other)),
    }
}

fn string_predicate(
    args: &[Value],
    name: &str,
    pred: impl Fn(&str, &str) -> bool,
) -> Value {
    match (&args[0], &args[1]) {
        (Value::String(s), Value::String(arg)) => Value::Bool(pred(s, arg)),
        _ => Value::error(EvalError::no_matching_overload(name)),
    }
}

/// RE2-compatible unanchored match; invalid patterns are a value-domain
/// error.
fn matches_impl(subject: &Value, pattern: &Value) -> Value {
    match (subject, pattern) {
        (Value::String(s), Value::String(pattern)) => {
            match regex::Regex::new(pattern.as_ref()) {
                Ok(re) => Value::Bool(re.is_match(s.as_ref())),
                Err(e) => Value::error(EvalError::range_error(format!("invalid regex: {}", e))),
            }
        }
        _ => Value::error(EvalError::no_matching_overload("matches")),
    }
}

impl EvalError {
    fn no_matching_overload_for(name: &str, value: &Value) -> EvalError {
        EvalError::no_matching_overload(&format!("{} on {}", name, value.type_name()))
    }
}

// ==================== Timestamp / Duration Accessors ====================

fn install_timestamp_accessors(registry: &mut FunctionRegistry) {
    use TimestampComponent as C;

    // Date components exist on timestamps only
    for (name, id, component) in [
        ("getFullYear", "ts_full_year", C::FullYear),
        ("getMonth", "ts_month", C::Month),
        ("getDate", "ts_date", C::Date),
        ("getDayOfMonth", "ts_day_of_month", C::DayOfMonth),
        ("getDayOfWeek", "ts_day_of_week", C::DayOfWeek),
        ("getDayOfYear", "ts_day_of_year", C::DayOfYear),
    ] {
        registry.register(
            name,
            Overload::member(id, 1, move |args| component_utc(&args[0], component)),
        );
        registry.register(
            name,
            Overload {
                id,
                is_member: true,
                arity: Some(2),
                implementation: Arc::new(move |args: &[Value]| {
                    component_in_zone(&args[0], &args[1], component)
                }),
            },
        );
    }

    // Time-of-day components also apply to durations as totals
    for (name, id, component, total) in [
        (
            "getHours",
            "time_hours",
            C::Hours,
            Duration::get_hours as fn(&Duration) -> i64,
        ),
        ("getMinutes", "time_minutes", C::Minutes, Duration::get_minutes),
        ("getSeconds", "time_seconds", C::Seconds, Duration::total_seconds),
        (
            "getMilliseconds",
            "time_millis",
            C::Milliseconds,
            Duration::get_milliseconds,
        ),
    ] {
        registry.register(
            name,
            Overload::member(id, 1, move |args| match &args[0] {
                Value::Duration(d) => Value::Int(total(d)),
                other => component_utc(other, component),
            }),
        );
        registry.register(
            name,
            Overload {
                id,
                is_member: true,
                arity: Some(2),
                implementation: Arc::new(move |args: &[Value]| {
                    component_in_zone(&args[0], &args[1], component)
                }),
            },
        );
    }
}

fn component_utc(value: &Value, component: TimestampComponent) -> Value {
    match value {
        Value::Timestamp(ts) => extract_component(ts, None, component),
        other => Value::error(EvalError::no_matching_overload(&format!(
            "get{} on {}",
            component.name(),
            other.type_name()
        ))),
    }
}

fn component_in_zone(value: &Value, tz: &Value, component: TimestampComponent) -> Value {
    match (value, tz) {
        (Value::Timestamp(ts), Value::String(tz)) => extract_component(ts, Some(tz), component),
        _ => Value::error(EvalError::no_matching_overload(&format!(
            "get{}",
            component.name()
        ))),
    }
}

fn extract_component(ts: &Timestamp, tz: Option<&str>, component: TimestampComponent) -> Value {
    match tz {
        None => match ts.to_datetime_utc() {
            Some(dt) => Value::Int(component.extract(&dt)),
            None => Value::error(EvalError::range_error("invalid timestamp")),
        },
        Some(tz) => match time::parse_timezone(tz) {
            Ok(tz_info) => match tz_info.datetime_from_timestamp(ts) {
                Some(dt) => Value::Int(component.extract(&dt)),
                None => Value::error(EvalError::range_error("invalid timestamp")),
            },
            Err(e) => Value::error(EvalError::range_error(e)),
        },
    }
}
