//! Strings extension library.
//!
//! Member functions on strings, all code-point indexed:
//!
//! - `charAt`, `indexOf`, `lastIndexOf`, `substring`
//! - `trim` (Unicode whitespace), `replace` (optional count), `split`
//!   (optional limit), `join` (on lists of strings)
//! - `quote` (also reachable as `strings.quote`)
//! - `format` with the Go verbs `%s %d %f %e %b %o %x %X`

use std::sync::Arc;

use crate::eval::{EvalError, FunctionRegistry, Overload, Value};

/// Register the strings extension.
pub fn install(registry: &mut FunctionRegistry) {
    registry.register(
        "charAt",
        Overload::member("string_char_at", 2, |args| {
            with_string(&args[0], "charAt", |s| char_at(s, &args[1]))
        }),
    );

    registry.register(
        "indexOf",
        Overload::member("string_index_of", 2, |args| {
            with_string(&args[0], "indexOf", |s| index_of(s, &args[1], &Value::Int(0)))
        }),
    );
    registry.register(
        "indexOf",
        Overload::member("string_index_of_offset", 3, |args| {
            with_string(&args[0], "indexOf", |s| index_of(s, &args[1], &args[2]))
        }),
    );

    registry.register(
        "lastIndexOf",
        Overload::member("string_last_index_of", 2, |args| {
            with_string(&args[0], "lastIndexOf", |s| last_index_of(s, &args[1], None))
        }),
    );
    registry.register(
        "lastIndexOf",
        Overload::member("string_last_index_of_offset", 3, |args| {
            with_string(&args[0], "lastIndexOf", |s| {
                last_index_of(s, &args[1], Some(&args[2]))
            })
        }),
    );

    registry.register(
        "substring",
        Overload::member("string_substring_start", 2, |args| {
            with_string(&args[0], "substring", |s| substring(s, &args[1], None))
        }),
    );
    registry.register(
        "substring",
        Overload::member("string_substring_range", 3, |args| {
            with_string(&args[0], "substring", |s| {
                substring(s, &args[1], Some(&args[2]))
            })
        }),
    );

    registry.register(
        "trim",
        Overload::member("string_trim", 1, |args| {
            with_string(&args[0], "trim", |s| Value::from(s.trim()))
        }),
    );

    registry.register(
        "replace",
        Overload::member("string_replace", 3, |args| {
            with_string(&args[0], "replace", |s| {
                replace(s, &args[1], &args[2], &Value::Int(-1))
            })
        }),
    );
    registry.register(
        "replace",
        Overload::member("string_replace_count", 4, |args| {
            with_string(&args[0], "replace", |s| {
                replace(s, &args[1], &args[2], &args[3])
            })
        }),
    );

    registry.register(
        "split",
        Overload::member("string_split", 2, |args| {
            with_string(&args[0], "split", |s| split(s, &args[1], &Value::Int(-1)))
        }),
    );
    registry.register(
        "split",
        Overload::member("string_split_limit", 3, |args| {
            with_string(&args[0], "split", |s| split(s, &args[1], &args[2]))
        }),
    );

    registry.register("join", Overload::member("list_join", 1, |args| join(&args[0], "")));
    registry.register(
        "join",
        Overload::member("list_join_separator", 2, |args| match &args[1] {
            Value::String(sep) => join(&args[0], sep),
            other => Value::error(EvalError::type_mismatch("string", &other.type_name())),
        }),
    );

    registry.register(
        "quote",
        Overload::member("string_quote", 1, |args| {
            with_string(&args[0], "quote", |s| Value::from(quote(s)))
        }),
    );
    registry.register(
        "strings.quote",
        Overload::global("strings_quote", 1, |args| {
            with_string(&args[0], "strings.quote", |s| Value::from(quote(s)))
        }),
    );

    registry.register(
        "format",
        Overload::member("string_format", 2, |args| {
            with_string(&args[0], "format", |s| match &args[1] {
                Value::List(list) => format(s, list),
                other => Value::error(EvalError::type_mismatch("list", &other.type_name())),
            })
        }),
    );
}

fn with_string(value: &Value, name: &str, f: impl FnOnce(&str) -> Value) -> Value {
    match value {
        Value::String(s) => f(s),
        other => Value::error(EvalError::no_matching_overload(&format!(
            "{} on {}",
            name,
            other.type_name()
        ))),
    }
}

fn int_arg(value: &Value, name: &str) -> Result<i64, EvalError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(EvalError::type_mismatch(
            "int",
            &format!("{} in {}", other.type_name(), name),
        )),
    }
}

/// Code-point index of a sub-string's first occurrence at or after `from`,
/// or -1.
fn index_of(s: &str, sub: &Value, from: &Value) -> Value {
    let sub = match sub {
        Value::String(sub) => sub,
        other => return Value::error(EvalError::type_mismatch("string", &other.type_name())),
    };
    let from = match int_arg(from, "indexOf") {
        Ok(i) => i,
        Err(e) => return Value::error(e),
    };

    let total = s.chars().count() as i64;
    if from < 0 || from > total {
        return Value::error(EvalError::index_out_of_bounds(from, total as usize));
    }

    let byte_from = char_to_byte_index(s, from as usize);
    match s[byte_from..].find(sub.as_ref()) {
        Some(offset) => {
            let cp = s[..byte_from + offset].chars().count() as i64;
            Value::Int(cp)
        }
        None => Value::Int(-1),
    }
}

/// Code-point index of the last occurrence at or before `before`, or -1.
fn last_index_of(s: &str, sub: &Value, before: Option<&Value>) -> Value {
    let sub = match sub {
        Value::String(sub) => sub,
        other => return Value::error(EvalError::type_mismatch("string", &other.type_name())),
    };

    let total = s.chars().count() as i64;
    let limit = match before {
        None => total,
        Some(v) => match int_arg(v, "lastIndexOf") {
            Ok(i) if i >= 0 && i <= total => i,
            Ok(i) => return Value::error(EvalError::index_out_of_bounds(i, total as usize)),
            Err(e) => return Value::error(e),
        },
    };

    // Search within the prefix ending `limit` code points in, extended by
    // the needle so matches starting at the limit are found
    let end = char_to_byte_index(s, ((limit as usize) + sub.chars().count()).min(s.chars().count()));
    match s[..end].rfind(sub.as_ref()) {
        Some(byte_idx) => Value::Int(s[..byte_idx].chars().count() as i64),
        None => Value::Int(-1),
    }
}

fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(b, _)| b)
        .unwrap_or(s.len())
}

/// One-character string at the code-point index; the index one past the
/// end yields the empty string.
fn char_at(s: &str, index: &Value) -> Value {
    let i = match int_arg(index, "charAt") {
        Ok(i) => i,
        Err(e) => return Value::error(e),
    };
    let total = s.chars().count() as i64;
    if i < 0 || i > total {
        return Value::error(EvalError::index_out_of_bounds(i, total as usize));
    }
    if i == total {
        return Value::from("");
    }
    match s.chars().nth(i as usize) {
        Some(c) => Value::from(c.to_string()),
        None => Value::from(""),
    }
}

/// Code-point substring; `[start, end)` with `0 <= start <= end <= len`.
fn substring(s: &str, start: &Value, end: Option<&Value>) -> Value {
    let total = s.chars().count() as i64;
    let start = match int_arg(start, "substring") {
        Ok(i) => i,
        Err(e) => return Value::error(e),
    };
    let end = match end {
        None => total,
        Some(v) => match int_arg(v, "substring") {
            Ok(i) => i,
            Err(e) => return Value::error(e),
        },
    };

    if start < 0 || end < start || end > total {
        return Value::error(EvalError::invalid_argument(format!(
            "invalid substring range [{}, {})",
            start, end
        )));
    }

    let byte_start = char_to_byte_index(s, start as usize);
    let byte_end = char_to_byte_index(s, end as usize);
    Value::from(&s[byte_start..byte_end])
}

/// Replace up to `count` occurrences; a negative count means unlimited.
fn replace(s: &str, old: &Value, new: &Value, count: &Value) -> Value {
    let (old, new) = match (old, new) {
        (Value::String(old), Value::String(new)) => (old, new),
        _ => return Value::error(EvalError::no_matching_overload("replace")),
    };
    let count = match int_arg(count, "replace") {
        Ok(c) => c,
        Err(e) => return Value::error(e),
    };

    if count < 0 {
        return Value::from(s.replace(old.as_ref(), new));
    }
    Value::from(s.replacen(old.as_ref(), new, count as usize))
}

/// Split around a separator; the optional limit follows Go `SplitN`
/// semantics: negative for all pieces, zero for an empty list, and a
/// positive n caps the count with the remainder left in the last piece.
fn split(s: &str, sep: &Value, limit: &Value) -> Value {
    let sep = match sep {
        Value::String(sep) => sep,
        other => return Value::error(EvalError::type_mismatch("string", &other.type_name())),
    };
    let limit = match int_arg(limit, "split") {
        Ok(l) => l,
        Err(e) => return Value::error(e),
    };

    if limit == 0 {
        return Value::list(Vec::<Value>::new());
    }

    let pieces: Vec<Value> = if sep.is_empty() {
        // Empty separator splits into code points
        let chars: Vec<String> = s.chars().map(|c| c.to_string()).collect();
        if limit > 0 && (limit as usize) < chars.len() {
            let mut out: Vec<String> = chars[..limit as usize - 1].to_vec();
            out.push(chars[limit as usize - 1..].concat());
            out.into_iter().map(Value::from).collect()
        } else {
            chars.into_iter().map(Value::from).collect()
        }
    } else if limit > 0 {
        s.splitn(limit as usize, sep.as_ref())
            .map(Value::from)
            .collect()
    } else {
        s.split(sep.as_ref()).map(Value::from).collect()
    };

    Value::List(Arc::from(pieces))
}

/// Join a list of strings.
fn join(list: &Value, sep: &str) -> Value {
    let list = match list {
        Value::List(list) => list,
        other => {
            return Value::error(EvalError::no_matching_overload(&format!(
                "join on {}",
                other.type_name()
            )))
        }
    };

    let mut parts = Vec::with_capacity(list.len());
    for item in list.iter() {
        match item {
            Value::String(s) => parts.push(s.to_string()),
            other => {
                return Value::error(EvalError::type_mismatch("string", &other.type_name()))
            }
        }
    }
    Value::from(parts.join(sep))
}

/// Double-quote a string, escaping backslashes, quotes, and control
/// characters.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0C' => out.push_str("\\f"),
            '\x0B' => out.push_str("\\v"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ==================== format() ====================

/// Go-compatible format: `%s %d %f %e %b %o %x %X` and `%%`, with an
/// optional `.N` precision for `%f`/`%e`. `%f` rounds ties to even.
fn format(fmt: &str, args: &[Value]) -> Value {
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    let mut next_arg = 0usize;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        // Optional precision
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
                digits.push(d);
                chars.next();
            }
            precision = Some(digits.parse().unwrap_or(0));
        }

        let verb = match chars.next() {
            Some(v) => v,
            None => {
                return Value::error(EvalError::invalid_argument(
                    "format string ends with an incomplete verb",
                ))
            }
        };

        let arg = match args.get(next_arg) {
            Some(arg) => arg,
            None => {
                return Value::error(EvalError::invalid_argument(format!(
                    "format argument {} is missing",
                    next_arg
                )))
            }
        };
        next_arg += 1;

        match format_verb(verb, precision, arg) {
            Ok(text) => out.push_str(&text),
            Err(e) => return Value::error(e),
        }
    }

    if next_arg != args.len() {
        return Value::error(EvalError::invalid_argument(format!(
            "format received {} arguments but used {}",
            args.len(),
            next_arg
        )));
    }

    Value::from(out)
}

fn format_verb(verb: char, precision: Option<usize>, arg: &Value) -> Result<String, EvalError> {
    match verb {
        's' => Ok(plain_text(arg)),
        'd' => match arg {
            Value::Int(i) => Ok(i.to_string()),
            Value::UInt(u) => Ok(u.to_string()),
            other => Err(verb_error('d', other)),
        },
        'f' => {
            let d = numeric_as_double(arg).ok_or_else(|| verb_error('f', arg))?;
            // Rust's exact decimal formatting rounds ties to even
            Ok(format!("{:.*}", precision.unwrap_or(6), d))
        }
        'e' => {
            let d = numeric_as_double(arg).ok_or_else(|| verb_error('e', arg))?;
            Ok(scientific(d, precision.unwrap_or(6)))
        }
        'b' => match arg {
            Value::Int(i) => Ok(signed_radix(*i, 2)),
            Value::UInt(u) => Ok(format!("{:b}", u)),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(verb_error('b', other)),
        },
        'o' => match arg {
            Value::Int(i) => Ok(signed_radix(*i, 8)),
            Value::UInt(u) => Ok(format!("{:o}", u)),
            other => Err(verb_error('o', other)),
        },
        'x' | 'X' => {
            let text = match arg {
                Value::Int(i) => signed_radix(*i, 16),
                Value::UInt(u) => format!("{:x}", u),
                Value::String(s) => hex_bytes(s.as_bytes()),
                Value::Bytes(b) => hex_bytes(b),
                other => return Err(verb_error(verb, other)),
            };
            Ok(if verb == 'X' {
                text.to_uppercase()
            } else {
                text
            })
        }
        other => Err(EvalError::invalid_argument(format!(
            "unsupported format verb: %{}",
            other
        ))),
    }
}

fn verb_error(verb: char, value: &Value) -> EvalError {
    EvalError::invalid_argument(format!(
        "format verb %{} does not accept {}",
        verb,
        value.type_name()
    ))
}

fn numeric_as_double(value: &Value) -> Option<f64> {
    match value {
        Value::Double(d) => Some(*d),
        Value::Int(i) => Some(*i as f64),
        Value::UInt(u) => Some(*u as f64),
        _ => None,
    }
}

/// %s text: the value's unquoted rendering.
fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        Value::Bytes(b) => String::from_utf8_lossy(b).to_string(),
        Value::Type(t) => t.name.to_string(),
        other => other.to_string(),
    }
}

/// Signed values format with a minus sign rather than two's complement.
fn signed_radix(i: i64, radix: u32) -> String {
    let magnitude = i.unsigned_abs();
    let digits = match radix {
        2 => format!("{:b}", magnitude),
        8 => format!("{:o}", magnitude),
        _ => format!("{:x}", magnitude),
    };
    if i < 0 {
        format!("-{}", digits)
    } else {
        digits
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Go-style scientific notation: `d.dddddde+XX` with a signed two-digit
/// exponent.
fn scientific(d: f64, precision: usize) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }

    let formatted = format!("{:.*e}", precision, d);
    // Rust renders "1.500000e2"; Go wants "1.500000e+02"
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exp: i32 = exponent.parse().unwrap_or(0);
            format!("{}e{}{:02}", mantissa, if exp < 0 { "-" } else { "+" }, exp.abs())
        }
        None => formatted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_at() {
        assert_eq!(char_at("hello", &Value::Int(1)), Value::from("e"));
        assert_eq!(char_at("héllo", &Value::Int(1)), Value::from("é"));
        // One past the end yields the empty string
        assert_eq!(char_at("hi", &Value::Int(2)), Value::from(""));
        assert!(char_at("hi", &Value::Int(3)).is_error());
        assert!(char_at("hi", &Value::Int(-1)).is_error());
    }

    #[test]
    fn test_index_of() {
        assert_eq!(
            index_of("hello mellow", &Value::from("ello"), &Value::Int(0)),
            Value::Int(1)
        );
        assert_eq!(
            index_of("hello mellow", &Value::from("ello"), &Value::Int(2)),
            Value::Int(7)
        );
        assert_eq!(
            index_of("hello", &Value::from("z"), &Value::Int(0)),
            Value::Int(-1)
        );
        // Code-point offsets on multibyte text
        assert_eq!(
            index_of("日本語語", &Value::from("語"), &Value::Int(3)),
            Value::Int(3)
        );
        assert!(index_of("x", &Value::from("x"), &Value::Int(5)).is_error());
    }

    #[test]
    fn test_last_index_of() {
        assert_eq!(
            last_index_of("hello mellow", &Value::from("ello"), None),
            Value::Int(7)
        );
        assert_eq!(
            last_index_of("hello mellow", &Value::from("ello"), Some(&Value::Int(6))),
            Value::Int(1)
        );
        assert_eq!(last_index_of("hello", &Value::from("z"), None), Value::Int(-1));
    }

    #[test]
    fn test_substring() {
        assert_eq!(
            substring("tacocat", &Value::Int(1), Some(&Value::Int(4))),
            Value::from("aco")
        );
        assert_eq!(substring("tacocat", &Value::Int(4), None), Value::from("cat"));
        assert_eq!(
            substring("日本語", &Value::Int(1), Some(&Value::Int(2))),
            Value::from("本")
        );
        assert!(substring("x", &Value::Int(0), Some(&Value::Int(5))).is_error());
        assert!(substring("x", &Value::Int(-1), None).is_error());
        assert!(substring("abc", &Value::Int(2), Some(&Value::Int(1))).is_error());
    }

    #[test]
    fn test_trim() {
        assert_eq!(
            with_string(&Value::from("  hi  "), "trim", |s| Value::from(s.trim())),
            Value::from("hi")
        );
        // Unicode whitespace class
        assert_eq!(
            with_string(&Value::from("\u{2003}hi\u{2003}"), "trim", |s| Value::from(s.trim())),
            Value::from("hi")
        );
    }

    #[test]
    fn test_replace() {
        assert_eq!(
            replace("hello hello", &Value::from("he"), &Value::from("we"), &Value::Int(-1)),
            Value::from("wello wello")
        );
        assert_eq!(
            replace("hello hello", &Value::from("he"), &Value::from("we"), &Value::Int(1)),
            Value::from("wello hello")
        );
        assert_eq!(
            replace("aaa", &Value::from("a"), &Value::from("b"), &Value::Int(0)),
            Value::from("aaa")
        );
    }

    #[test]
    fn test_split() {
        assert_eq!(
            split("a,b,c", &Value::from(","), &Value::Int(-1)),
            Value::list(["a", "b", "c"])
        );
        assert_eq!(
            split("a,b,c", &Value::from(","), &Value::Int(2)),
            Value::list(["a", "b,c"])
        );
        assert_eq!(
            split("a,b,c", &Value::from(","), &Value::Int(0)),
            Value::list(Vec::<Value>::new())
        );
        assert_eq!(
            split("abc", &Value::from(""), &Value::Int(-1)),
            Value::list(["a", "b", "c"])
        );
    }

    #[test]
    fn test_join() {
        assert_eq!(join(&Value::list(["a", "b"]), "-"), Value::from("a-b"));
        assert_eq!(join(&Value::list(Vec::<Value>::new()), "-"), Value::from(""));
        assert!(join(&Value::list([1i64]), "-").is_error());
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote("a\nb\tc"), "\"a\\nb\\tc\"");
        assert_eq!(quote("back\\slash"), "\"back\\\\slash\"");
    }

    #[test]
    fn test_format_basic_verbs() {
        assert_eq!(
            format("%s scored %d", &[Value::from("ada"), Value::Int(100)]),
            Value::from("ada scored 100")
        );
        assert_eq!(format("%f", &[Value::Double(1.5)]), Value::from("1.500000"));
        assert_eq!(format("%.2f", &[Value::Double(1.5)]), Value::from("1.50"));
        assert_eq!(format("%b", &[Value::Int(5)]), Value::from("101"));
        assert_eq!(format("%o", &[Value::Int(-15)]), Value::from("-17"));
        assert_eq!(format("%x", &[Value::Int(255)]), Value::from("ff"));
        assert_eq!(format("%X", &[Value::Int(255)]), Value::from("FF"));
        assert_eq!(format("%x", &[Value::from("ab")]), Value::from("6162"));
        assert_eq!(format("100%%", &[]), Value::from("100%"));
    }

    #[test]
    fn test_format_scientific() {
        assert_eq!(
            format("%e", &[Value::Double(12345678.0)]),
            Value::from("1.234568e+07")
        );
        assert_eq!(
            format("%.2e", &[Value::Double(0.00123)]),
            Value::from("1.23e-03")
        );
    }

    #[test]
    fn test_format_bankers_rounding() {
        // Ties round to even
        assert_eq!(format("%.1f", &[Value::Double(0.25)]), Value::from("0.2"));
        assert_eq!(format("%.1f", &[Value::Double(0.35)]), Value::from("0.3"));
    }

    #[test]
    fn test_format_errors() {
        assert!(format("%d", &[Value::from("x")]).is_error());
        assert!(format("%d %d", &[Value::Int(1)]).is_error());
        assert!(format("%d", &[Value::Int(1), Value::Int(2)]).is_error());
        assert!(format("%q", &[Value::Int(1)]).is_error());
        assert!(format("trailing %", &[Value::Int(1)]).is_error());
    }
}
