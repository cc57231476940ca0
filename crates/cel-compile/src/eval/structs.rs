//! Schema-less struct values.
//!
//! A struct is a tagged record: a qualified type name plus the set of
//! explicitly-set fields. No protobuf descriptor is consulted; absent
//! fields produce a type-appropriate default inferred from proto naming
//! conventions on the field name. An embedder with descriptors would
//! replace [`default_for_field`] and the proto2 test in
//! [`StructValue::has_field`] with schema-driven answers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::value::ValueMap;
use super::{EvalError, Value};

/// A tagged record with a qualified type name and explicitly-set fields.
///
/// Field presence is tracked: absence is distinguishable from
/// presence-of-default.
#[derive(Debug, Clone)]
pub struct StructValue {
    type_name: Arc<str>,
    fields: BTreeMap<String, Value>,
}

impl StructValue {
    /// Create an empty struct of the given type.
    pub fn new(type_name: impl Into<Arc<str>>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Create a struct from explicitly-set fields.
    pub fn from_fields(
        type_name: impl Into<Arc<str>>,
        fields: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            fields: fields.into_iter().collect(),
        }
    }

    /// The qualified type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// True if no field is explicitly set.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Get an explicitly-set field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a field.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Iterate over explicitly-set fields.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Field access: the stored value if present, else the
    /// convention-derived default. Unknown field names (no matching proto
    /// naming pattern) yield the error sentinel: "definitely absent" is
    /// distinguishable from "don't know".
    pub fn field_or_default(&self, field: &str) -> Value {
        if let Some(v) = self.fields.get(field) {
            return v.clone();
        }
        match default_for_field(&self.type_name, field) {
            Some(default) => default,
            None => Value::error(EvalError::field_not_found(field)),
        }
    }

    /// Presence test for `has(s.f)`:
    /// - repeated/map fields are present when non-empty;
    /// - proto2-style messages report any explicitly-set field;
    /// - proto3-style scalar fields must differ from the type default;
    /// - message and wrapper fields are present whenever set.
    ///
    /// Unset fields are absent regardless of naming pattern; `has` never
    /// errors.
    pub fn has_field(&self, field: &str) -> bool {
        let value = match self.fields.get(field) {
            Some(v) => v,
            None => return false,
        };
        if field.starts_with("repeated_") || field.starts_with("map_") {
            return !value.is_zero_value();
        }
        if self.type_name.contains(".proto2.") {
            return true;
        }
        if is_scalar_field(field) {
            return !value.is_zero_value();
        }
        true
    }
}

impl PartialEq for StructValue {
    /// Structs compare by qualified type name and the union of
    /// explicitly-set fields, with absent fields compared as type defaults.
    fn eq(&self, other: &Self) -> bool {
        if self.type_name != other.type_name {
            return false;
        }
        let keys: std::collections::BTreeSet<&String> =
            self.fields.keys().chain(other.fields.keys()).collect();
        for key in keys {
            let matched = match (self.fields.get(key), other.fields.get(key)) {
                (Some(a), Some(b)) => a == b,
                (Some(v), None) | (None, Some(v)) => {
                    match default_for_field(&self.type_name, key) {
                        Some(default) => *v == default,
                        None => false,
                    }
                }
                (None, None) => true,
            };
            if !matched {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for StructValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.type_name)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// True if the field name follows a scalar proto naming pattern.
fn is_scalar_field(field: &str) -> bool {
    ["uint", "double", "float", "bool", "string", "bytes", "int", "enum", "fixed"]
        .iter()
        .any(|pat| field.contains(pat))
}

/// Derive the default value for an absent field from naming conventions.
/// Returns None when the name matches no known pattern.
pub fn default_for_field(type_name: &str, field: &str) -> Option<Value> {
    if field.starts_with("repeated_") {
        return Some(Value::List(Arc::from(Vec::<Value>::new())));
    }
    if field.starts_with("map_") {
        return Some(Value::Map(Arc::new(ValueMap::new())));
    }
    if field.contains("wrapper") {
        return Some(Value::Null);
    }
    // Unsigned before signed: "uint" contains "int", and plain "fixed"
    // (unlike "sfixed") is unsigned in proto
    if field.contains("uint") || (field.contains("fixed") && !field.contains("sfixed")) {
        return Some(Value::UInt(0));
    }
    if field.contains("double") || field.contains("float") {
        return Some(Value::Double(0.0));
    }
    if field.contains("bool") {
        return Some(Value::Bool(false));
    }
    if field.contains("string") {
        return Some(Value::String(Arc::from("")));
    }
    if field.contains("bytes") {
        return Some(Value::Bytes(Arc::from(Vec::<u8>::new())));
    }
    if field.contains("message") || field.contains("proto") {
        return Some(Value::Struct(Arc::new(StructValue::new(
            nested_message_type_name(type_name, field),
        ))));
    }
    if field.contains("int") || field.contains("enum") || field.contains("sfixed") {
        return Some(Value::Int(0));
    }
    None
}

/// Best-effort type name for a convention-defaulted message field:
/// `TestAllTypes` + `single_nested_message` -> `TestAllTypes.NestedMessage`.
fn nested_message_type_name(parent: &str, field: &str) -> String {
    let trimmed = field
        .strip_prefix("single_")
        .or_else(|| field.strip_prefix("standalone_"))
        .unwrap_or(field);
    let camel: String = trimmed
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    format!("{}.{}", parent, camel)
}

/// Construct a struct value, applying well-known-type unwrapping.
///
/// Wrapper types collapse to their primitive at construction; `Value`,
/// `Struct`, and `ListValue` construct the corresponding CEL shapes; `Any`
/// cannot be unpacked without wire decoding and errors.
pub fn construct(type_name: &str, fields: Vec<(String, Value)>) -> Value {
    match type_name {
        "google.protobuf.BoolValue" => wrapper_or(fields, Value::Bool(false)),
        "google.protobuf.Int32Value" | "google.protobuf.Int64Value" => {
            wrapper_or(fields, Value::Int(0))
        }
        "google.protobuf.UInt32Value" | "google.protobuf.UInt64Value" => {
            wrapper_or(fields, Value::UInt(0))
        }
        "google.protobuf.FloatValue" => {
            // Floats carry 32-bit precision
            match wrapper_or(fields, Value::Double(0.0)) {
                Value::Double(d) => Value::Double(d as f32 as f64),
                other => other,
            }
        }
        "google.protobuf.DoubleValue" => wrapper_or(fields, Value::Double(0.0)),
        "google.protobuf.StringValue" => wrapper_or(fields, Value::String(Arc::from(""))),
        "google.protobuf.BytesValue" => {
            wrapper_or(fields, Value::Bytes(Arc::from(Vec::<u8>::new())))
        }
        "google.protobuf.Value" => construct_json_value(fields),
        "google.protobuf.Struct" => take_field(fields, "fields")
            .unwrap_or_else(|| Value::Map(Arc::new(ValueMap::new()))),
        "google.protobuf.ListValue" => take_field(fields, "values")
            .unwrap_or_else(|| Value::List(Arc::from(Vec::<Value>::new()))),
        "google.protobuf.Timestamp" => {
            let seconds = int_field(&fields, "seconds");
            let nanos = int_field(&fields, "nanos") as i32;
            let ts = super::Timestamp::new(seconds, nanos);
            if ts.is_valid() {
                Value::Timestamp(ts)
            } else {
                Value::error(EvalError::range_error(
                    "timestamp out of range: must be between year 0001 and 9999",
                ))
            }
        }
        "google.protobuf.Duration" => {
            let seconds = int_field(&fields, "seconds");
            let nanos = int_field(&fields, "nanos");
            match super::Duration::normalized(seconds, nanos) {
                Some(d) => Value::Duration(d),
                None => Value::error(EvalError::range_error(
                    "duration out of range: total nanoseconds must fit in int64",
                )),
            }
        }
        "google.protobuf.Any" => Value::error(EvalError::invalid_argument(
            "google.protobuf.Any requires binary wire decoding, which is not supported",
        )),
        _ => Value::Struct(Arc::new(StructValue::from_fields(
            type_name.to_string(),
            fields,
        ))),
    }
}

fn take_field(fields: Vec<(String, Value)>, name: &str) -> Option<Value> {
    fields.into_iter().find(|(f, _)| f == name).map(|(_, v)| v)
}

fn int_field(fields: &[(String, Value)], name: &str) -> i64 {
    fields
        .iter()
        .find(|(f, _)| f == name)
        .and_then(|(_, v)| match v {
            Value::Int(i) => Some(*i),
            _ => None,
        })
        .unwrap_or(0)
}

fn wrapper_or(fields: Vec<(String, Value)>, default: Value) -> Value {
    take_field(fields, "value").unwrap_or(default)
}

/// `google.protobuf.Value` holds one of the JSON shapes.
fn construct_json_value(fields: Vec<(String, Value)>) -> Value {
    match fields.into_iter().next() {
        None => Value::Null,
        Some((name, value)) => match name.as_str() {
            "null_value" => Value::Null,
            "number_value" | "string_value" | "bool_value" | "struct_value" | "list_value" => {
                value
            }
            other => Value::error(EvalError::field_not_found(other)),
        },
    }
}
