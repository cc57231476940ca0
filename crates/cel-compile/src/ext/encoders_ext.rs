//! Encoders extension library.
//!
//! - `base64.encode(bytes) -> string`
//! - `base64.decode(string) -> bytes` - accepts padded or unpadded input

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

use crate::eval::{EvalError, FunctionRegistry, Overload, Value};

/// Register the encoders extension.
pub fn install(registry: &mut FunctionRegistry) {
    registry.register(
        "base64.encode",
        Overload::global("base64_encode_bytes", 1, |args| match &args[0] {
            Value::Bytes(b) => Value::from(STANDARD.encode(b)),
            other => Value::error(EvalError::type_mismatch("bytes", &other.type_name())),
        }),
    );

    registry.register(
        "base64.decode",
        Overload::global("base64_decode_string", 1, |args| match &args[0] {
            Value::String(s) => {
                let engine = if s.len() % 4 == 0 {
                    &STANDARD
                } else {
                    &STANDARD_NO_PAD
                };
                match engine.decode(s.as_bytes()) {
                    Ok(bytes) => Value::from(bytes),
                    Err(e) => Value::error(EvalError::invalid_argument(format!(
                        "invalid base64: {}",
                        e
                    ))),
                }
            }
            other => Value::error(EvalError::type_mismatch("string", &other.type_name())),
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arg: Value) -> Value {
        let mut registry = FunctionRegistry::new();
        install(&mut registry);
        let overloads = registry.find(name, 1, false);
        overloads[0].call(&[arg])
    }

    #[test]
    fn test_encode() {
        assert_eq!(
            call("base64.encode", Value::from(b"hello".to_vec())),
            Value::from("aGVsbG8=")
        );
        assert!(call("base64.encode", Value::from("not bytes")).is_error());
    }

    #[test]
    fn test_decode_padded_and_unpadded() {
        assert_eq!(
            call("base64.decode", Value::from("aGVsbG8=")),
            Value::from(b"hello".to_vec())
        );
        assert_eq!(
            call("base64.decode", Value::from("aGVsbG8")),
            Value::from(b"hello".to_vec())
        );
        assert!(call("base64.decode", Value::from("!!!")).is_error());
    }
}
